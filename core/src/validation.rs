use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use utoipa::ToSchema;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[\d\s\-()]{7,}$").expect("valid phone regex"));
static ZIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w\s-]{3,10}$").expect("valid zip regex"));
static CURRENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").expect("valid currency regex"));
static STORAGE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_\-/]+\.[a-zA-Z0-9]{2,4}$").expect("valid storage path regex")
});

const PASSWORD_SPECIALS: &str = "!@#$%^&*(),.?\":{}|<>";
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "svg"];

pub const PASSWORD_REQUIREMENTS: &str = "Password must be at least 8 characters long and contain at least one uppercase letter, one lowercase letter, one number, and one special character (!@#$%^&*(),.?\":{}|<>).";

/// A request field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_RE.is_match(phone)
}

pub fn is_valid_zip(zip: &str) -> bool {
    ZIP_RE.is_match(zip)
}

pub fn is_valid_currency(currency: &str) -> bool {
    CURRENCY_RE.is_match(currency)
}

/// Absolute http(s) URL.
pub fn is_valid_url(raw: &str) -> bool {
    url::Url::parse(raw)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// IANA timezone identifier such as `Europe/London`.
pub fn is_valid_timezone(tz: &str) -> bool {
    tz.parse::<chrono_tz::Tz>().is_ok()
}

pub fn is_valid_password(password: &str) -> bool {
    password.chars().count() >= 8
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SPECIALS.contains(c))
}

/// Relative upload path like `uploads/1763244573603.jpg`.
pub fn is_valid_storage_path(path: &str) -> bool {
    if !STORAGE_PATH_RE.is_match(path) {
        return false;
    }
    path.rsplit('.')
        .next()
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Present and non-blank. Returns the trimmed value.
pub fn required<'a>(
    value: Option<&'a str>,
    field: &str,
    label: &str,
) -> Result<&'a str, ValidationError> {
    match value {
        None => Err(ValidationError::new(field, format!("{label} is required."))),
        Some(v) if v.is_empty() => Err(ValidationError::new(field, format!("{label} is required."))),
        Some(v) if v.trim().is_empty() => {
            Err(ValidationError::new(field, format!("{label} cannot be empty.")))
        }
        Some(v) => Ok(v.trim()),
    }
}

/// Sign-up and sign-in credentials.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Credential rules for new accounts. Returns the trimmed email.
pub fn validate_credentials(creds: &Credentials) -> Result<String, ValidationError> {
    let email = required(creds.email.as_deref(), "email", "Email")?;
    if !is_valid_email(email) {
        return Err(ValidationError::new("email", "Invalid email format."));
    }
    let password = creds.password.as_deref().unwrap_or_default();
    required(Some(password), "password", "Password")?;
    if !is_valid_password(password) {
        return Err(ValidationError::new(
            "password",
            format!("Invalid password. {PASSWORD_REQUIREMENTS}"),
        ));
    }

    let lower = email.to_lowercase();
    if lower.contains("..") {
        return Err(ValidationError::new("email", "Email cannot contain consecutive dots."));
    }
    let local = lower.split('@').next().unwrap_or_default();
    if local.starts_with('.') || local.ends_with('.') {
        return Err(ValidationError::new(
            "email",
            "Email local part cannot start or end with a dot.",
        ));
    }
    if lower.chars().count() > 254 {
        return Err(ValidationError::new(
            "email",
            "Email address is too long (maximum 254 characters).",
        ));
    }
    if local.chars().count() > 64 {
        return Err(ValidationError::new(
            "email",
            "Email local part is too long (maximum 64 characters).",
        ));
    }
    Ok(email.to_string())
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CompanyAddress {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
}

/// Organisation onboarding payload.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CompanyInfo {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub address: Option<CompanyAddress>,
    pub timezone: Option<String>,
    pub currency: Option<String>,
    pub logo: Option<String>,
    pub assigned_sales_person_id: Option<String>,
    /// Accepted from clients but always replaced server-side
    #[schema(value_type = Option<Object>)]
    pub organisation_id: Option<serde_json::Value>,
    #[schema(value_type = Option<Object>)]
    pub is_disabled: Option<serde_json::Value>,
    #[schema(value_type = Option<Object>)]
    pub created_at: Option<serde_json::Value>,
    #[schema(value_type = Option<Object>)]
    pub modified_date: Option<serde_json::Value>,
}

pub fn validate_company_info(info: &CompanyInfo) -> Result<(), ValidationError> {
    required(info.name.as_deref(), "name", "Company name")?;
    let phone = required(info.phone.as_deref(), "phone", "Company phone")?;
    let timezone = required(info.timezone.as_deref(), "timezone", "Timezone")?;

    if !is_valid_phone(phone) {
        return Err(ValidationError::new("phone", "Invalid phone number format."));
    }
    if !is_valid_timezone(timezone) {
        return Err(ValidationError::new(
            "timezone",
            "Invalid timezone. Must be a valid IANA timezone identifier (e.g., 'America/New_York', 'Europe/London', 'Asia/Tokyo').",
        ));
    }

    let Some(address) = info.address.as_ref() else {
        return Err(ValidationError::new("address", "Address is required."));
    };
    required(address.street.as_deref(), "address.street", "Street address")?;
    required(address.city.as_deref(), "address.city", "City")?;
    required(address.state.as_deref(), "address.state", "State")?;
    let zip = required(address.zip.as_deref(), "address.zip", "ZIP code")?;
    required(address.country.as_deref(), "address.country", "Country")?;
    if !is_valid_zip(zip) {
        return Err(ValidationError::new("address.zip", "Invalid zip/postal code format."));
    }

    if let Some(currency) = info.currency.as_deref().map(str::trim) {
        if !currency.is_empty() && !is_valid_currency(currency) {
            return Err(ValidationError::new(
                "currency",
                "Invalid currency format. Must be a 3-letter ISO code (e.g., 'USD', 'EUR', 'GBP').",
            ));
        }
    }
    if let Some(website) = info.website.as_deref().map(str::trim) {
        if !website.is_empty() && !is_valid_url(website) {
            return Err(ValidationError::new(
                "website",
                "Invalid website URL format. Must start with http:// or https://",
            ));
        }
    }
    if let Some(logo) = info.logo.as_deref().map(str::trim) {
        if !logo.is_empty() && !is_valid_storage_path(logo) {
            return Err(ValidationError::new(
                "logo",
                "Invalid logo path format. Must be a relative upload path like 'uploads/filename.jpg'",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(email: &str, password: &str) -> Credentials {
        Credentials {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
        }
    }

    fn company() -> CompanyInfo {
        CompanyInfo {
            name: Some("Acme Catering".into()),
            phone: Some("+1 (555) 123-4567".into()),
            timezone: Some("America/New_York".into()),
            address: Some(CompanyAddress {
                street: Some("1 Main St".into()),
                city: Some("Springfield".into()),
                state: Some("IL".into()),
                zip: Some("62701".into()),
                country: Some("US".into()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn password_strength() {
        assert!(is_valid_password("Str0ng!pw"));
        assert!(!is_valid_password("Sh0rt!"));
        assert!(!is_valid_password("nouppercase1!"));
        assert!(!is_valid_password("NoDigits!!"));
        assert!(!is_valid_password("NoSpecial12"));
    }

    #[test]
    fn credential_rules() {
        assert_eq!(validate_credentials(&creds(" ann@example.com ", "Str0ng!pw")).unwrap(), "ann@example.com");
        let err = validate_credentials(&creds("ann..b@example.com", "Str0ng!pw")).unwrap_err();
        assert_eq!(err.message, "Email cannot contain consecutive dots.");
        let err = validate_credentials(&creds(".ann@example.com", "Str0ng!pw")).unwrap_err();
        assert!(err.message.contains("start or end with a dot"));
        let long_local = format!("{}@example.com", "a".repeat(65));
        assert!(validate_credentials(&creds(&long_local, "Str0ng!pw")).is_err());
        let err = validate_credentials(&creds("ann@example.com", "weak")).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("password"));
        let err = validate_credentials(&Credentials { email: None, password: None }).unwrap_err();
        assert_eq!(err.message, "Email is required.");
    }

    #[test]
    fn credentials_reject_unknown_fields() {
        let parsed: Result<Credentials, _> =
            serde_json::from_str(r#"{"email":"a@b.co","password":"x","pasword":"y"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn company_info_accepts_valid_payload() {
        assert!(validate_company_info(&company()).is_ok());
        let mut info = company();
        info.website = Some("https://acme.example".into());
        info.currency = Some("EUR".into());
        info.logo = Some("uploads/1763244573603.jpg".into());
        assert!(validate_company_info(&info).is_ok());
    }

    #[test]
    fn company_info_field_errors() {
        let mut info = company();
        info.timezone = Some("Mars/Olympus".into());
        assert_eq!(validate_company_info(&info).unwrap_err().field.as_deref(), Some("timezone"));

        let mut info = company();
        info.phone = Some("12ab".into());
        assert_eq!(validate_company_info(&info).unwrap_err().field.as_deref(), Some("phone"));

        let mut info = company();
        info.currency = Some("usd".into());
        assert_eq!(validate_company_info(&info).unwrap_err().field.as_deref(), Some("currency"));

        let mut info = company();
        info.website = Some("ftp://acme.example".into());
        assert_eq!(validate_company_info(&info).unwrap_err().field.as_deref(), Some("website"));

        let mut info = company();
        info.logo = Some("uploads/report.pdf".into());
        assert_eq!(validate_company_info(&info).unwrap_err().field.as_deref(), Some("logo"));

        let mut info = company();
        info.address.as_mut().unwrap().zip = Some("!!".into());
        assert_eq!(validate_company_info(&info).unwrap_err().field.as_deref(), Some("address.zip"));

        let mut info = company();
        info.address = None;
        assert_eq!(validate_company_info(&info).unwrap_err().message, "Address is required.");

        let mut info = company();
        info.name = Some("   ".into());
        assert_eq!(validate_company_info(&info).unwrap_err().message, "Company name cannot be empty.");
    }

    #[test]
    fn company_info_rejects_unexpected_fields() {
        let parsed: Result<CompanyInfo, _> = serde_json::from_str(r#"{"name":"x","nmae":"y"}"#);
        assert!(parsed.is_err());
        let parsed: Result<CompanyInfo, _> =
            serde_json::from_str(r#"{"name":"x","organisationId":"ignored","modifiedDate":1}"#);
        assert!(parsed.is_ok());
    }
}
