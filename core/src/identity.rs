use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role stored on a `users` profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    SuperAdmin,
    Admin,
    Host,
    /// Sales portal account; never scoped to an organisation
    SalesPerson,
    None,
}

impl Role {
    pub fn parse(raw: &str) -> Role {
        match raw.trim() {
            "superAdmin" | "super_admin" | "superadmin" => Role::SuperAdmin,
            "admin" => Role::Admin,
            "host" => Role::Host,
            "sales_person" | "salesPerson" => Role::SalesPerson,
            _ => Role::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::SuperAdmin => "superAdmin",
            Role::Admin => "admin",
            Role::Host => "host",
            Role::SalesPerson => "sales_person",
            Role::None => "none",
        }
    }
}

/// A `users/{uid}` profile document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub email_lower: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub organisation_id: Option<String>,
    /// Organisations a host works for
    pub managed_by_org_ids: Vec<String>,
    /// Sales directory record a sales portal account belongs to
    pub sales_person_id: Option<String>,
    pub is_disabled: bool,
    pub address: Option<String>,
    pub country: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn role(&self) -> Role {
        Role::parse(self.role.as_deref().unwrap_or_default())
    }

    pub fn organisation(&self) -> Option<&str> {
        self.organisation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// An entry in an organisation's host directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostEntry {
    pub host_uid: String,
    pub organisation_id: String,
    pub email: Option<String>,
    pub email_lower: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub country: Option<String>,
    pub is_disabled: bool,
    pub password_reset_email_sent_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Document id of a host directory entry, one per (organisation, host).
pub fn host_entry_id(organisation_id: &str, host_uid: &str) -> String {
    format!("{organisation_id}_{host_uid}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthzDecision {
    Allow,
    Deny(&'static str),
}

impl AuthzDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthzDecision::Allow)
    }
}

/// Whether the caller owning `profile` may act on `organisation_id`.
///
/// Super-admins may act anywhere, admins only on their own organisation and
/// hosts on any organisation that manages them.
pub fn authorize(profile: Option<&UserProfile>, organisation_id: &str) -> AuthzDecision {
    let Some(profile) = profile else {
        return AuthzDecision::Deny("User profile not found.");
    };
    match profile.role() {
        Role::SuperAdmin => AuthzDecision::Allow,
        Role::Admin => {
            if profile.organisation() == Some(organisation_id) {
                AuthzDecision::Allow
            } else {
                AuthzDecision::Deny("You can only manage your own organisation.")
            }
        }
        Role::Host => {
            if profile.managed_by_org_ids.iter().any(|id| id == organisation_id) {
                AuthzDecision::Allow
            } else {
                AuthzDecision::Deny("You can only manage organisations that manage you.")
            }
        }
        Role::SalesPerson | Role::None => {
            AuthzDecision::Deny("Only admins or hosts can perform this action.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(role: &str, org: Option<&str>, managed: &[&str]) -> UserProfile {
        UserProfile {
            role: Some(role.to_string()),
            organisation_id: org.map(str::to_string),
            managed_by_org_ids: managed.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn super_admin_aliases() {
        for raw in ["superAdmin", "super_admin", "superadmin"] {
            assert_eq!(Role::parse(raw), Role::SuperAdmin);
            assert!(authorize(Some(&profile(raw, None, &[])), "any").is_allowed());
        }
    }

    #[test]
    fn admin_limited_to_own_organisation() {
        let admin = profile("admin", Some("org1"), &[]);
        assert_eq!(authorize(Some(&admin), "org1"), AuthzDecision::Allow);
        assert!(!authorize(Some(&admin), "org2").is_allowed());

        let orphan = profile("admin", Some("  "), &[]);
        assert!(!authorize(Some(&orphan), "").is_allowed());
    }

    #[test]
    fn host_allowed_for_managing_organisations() {
        let host = profile("host", Some("org9"), &["org1", "org2"]);
        assert!(authorize(Some(&host), "org1").is_allowed());
        assert!(authorize(Some(&host), "org2").is_allowed());
        assert!(!authorize(Some(&host), "org9").is_allowed());
    }

    #[test]
    fn missing_profile_or_unknown_role_denied() {
        assert!(!authorize(None, "org1").is_allowed());
        assert!(!authorize(Some(&profile("guest", Some("org1"), &[])), "org1").is_allowed());
        assert!(!authorize(Some(&UserProfile::default()), "org1").is_allowed());
    }

    #[test]
    fn sales_person_has_no_organisation_access() {
        for raw in ["sales_person", "salesPerson"] {
            assert_eq!(Role::parse(raw), Role::SalesPerson);
        }
        assert_eq!(Role::SalesPerson.as_str(), "sales_person");
        let sales = profile("sales_person", Some("org1"), &["org1"]);
        assert!(!authorize(Some(&sales), "org1").is_allowed());
    }
}
