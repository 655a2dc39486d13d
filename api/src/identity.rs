//! Account directory behind the `IdentityProvider` interface.
//!
//! `StoreIdentityProvider` keeps accounts in the document store: one
//! `accounts/{uid}` document per account, an `accountEmails/{emailLower}`
//! pointer that keeps emails unique, SHA-256 hashed bearer tokens under
//! `accountTokens` and one-hour reset tokens under `passwordResets`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use trax_core::auth;
use trax_core::validation::is_valid_email;

use crate::store::{
    DocumentStore, RetryPolicy, StoreError, collections, decode, encode, run_transaction,
};

const ACCESS_TOKEN_TTL_DAYS: i64 = 7;
const PASSWORD_RESET_TTL_HOURS: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("an account already exists for this email")]
    EmailAlreadyExists,
    #[error("invalid email")]
    InvalidEmail,
    #[error("user not found")]
    UserNotFound,
    #[error("identity backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for IdentityError {
    fn from(err: StoreError) -> Self {
        IdentityError::Backend(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityUser {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub disabled: bool,
    pub email_verified: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub disabled: bool,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Uid behind a bearer token, `None` for unknown, expired or disabled.
    async fn verify_access_token(&self, token: &str) -> Result<Option<String>, IdentityError>;

    async fn get_user(&self, uid: &str) -> Result<Option<IdentityUser>, IdentityError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<IdentityUser>, IdentityError>;

    async fn create_user(&self, user: NewUser) -> Result<IdentityUser, IdentityError>;

    async fn set_disabled(&self, uid: &str, disabled: bool) -> Result<(), IdentityError>;

    async fn set_email_verified(&self, uid: &str, verified: bool) -> Result<(), IdentityError>;

    async fn delete_user(&self, uid: &str) -> Result<(), IdentityError>;

    /// Link the account owner can follow to choose a new password.
    async fn generate_password_reset_link(&self, email: &str) -> Result<String, IdentityError>;

    async fn issue_access_token(&self, uid: &str) -> Result<String, IdentityError>;

    /// The account when `password` matches, `None` otherwise.
    async fn verify_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<IdentityUser>, IdentityError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRecord {
    uid: String,
    email: String,
    email_lower: String,
    #[serde(default)]
    display_name: Option<String>,
    password_hash: String,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    email_verified: bool,
    created_at: DateTime<Utc>,
}

impl AccountRecord {
    fn user(&self) -> IdentityUser {
        IdentityUser {
            uid: self.uid.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            disabled: self.disabled,
            email_verified: self.email_verified,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenRecord {
    uid: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

pub struct StoreIdentityProvider {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    app_base_url: String,
}

impl StoreIdentityProvider {
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy, app_base_url: String) -> Self {
        Self {
            store,
            retry,
            app_base_url: app_base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn account(&self, uid: &str) -> Result<Option<AccountRecord>, IdentityError> {
        match self.store.get(collections::ACCOUNTS, uid).await? {
            Some(doc) => Ok(Some(decode(doc)?)),
            None => Ok(None),
        }
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<AccountRecord>, IdentityError> {
        let lower = email.trim().to_lowercase();
        if lower.is_empty() {
            return Ok(None);
        }
        let Some(pointer) = self.store.get(collections::ACCOUNT_EMAILS, &lower).await? else {
            return Ok(None);
        };
        match pointer.get("uid").and_then(|v| v.as_str()) {
            Some(uid) => self.account(uid).await,
            None => Ok(None),
        }
    }

    async fn require_account(&self, uid: &str) -> Result<AccountRecord, IdentityError> {
        self.account(uid).await?.ok_or(IdentityError::UserNotFound)
    }
}

#[async_trait]
impl IdentityProvider for StoreIdentityProvider {
    async fn verify_access_token(&self, token: &str) -> Result<Option<String>, IdentityError> {
        if !token.starts_with("trax_at_") {
            return Ok(None);
        }
        let hash = auth::hash_token(token);
        let Some(doc) = self.store.get(collections::ACCOUNT_TOKENS, &hash).await? else {
            return Ok(None);
        };
        let record: TokenRecord = decode(doc)?;
        if record.expires_at < Utc::now() {
            return Ok(None);
        }
        match self.account(&record.uid).await? {
            Some(account) if !account.disabled => Ok(Some(account.uid)),
            _ => Ok(None),
        }
    }

    async fn get_user(&self, uid: &str) -> Result<Option<IdentityUser>, IdentityError> {
        Ok(self.account(uid).await?.map(|a| a.user()))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<IdentityUser>, IdentityError> {
        Ok(self.account_by_email(email).await?.map(|a| a.user()))
    }

    async fn create_user(&self, user: NewUser) -> Result<IdentityUser, IdentityError> {
        let email = user.email.trim().to_string();
        let email_lower = email.to_lowercase();
        if !is_valid_email(&email) {
            return Err(IdentityError::InvalidEmail);
        }
        let password_hash = auth::hash_password(&user.password).map_err(IdentityError::Backend)?;
        let account = AccountRecord {
            uid: auth::compact_id(),
            email,
            email_lower: email_lower.clone(),
            display_name: user.display_name.filter(|n| !n.trim().is_empty()),
            password_hash,
            disabled: user.disabled,
            email_verified: false,
            created_at: Utc::now(),
        };
        let account_doc = encode(&account)?;
        let uid = account.uid.clone();

        let created = run_transaction(self.store.as_ref(), &self.retry, |tx| {
            let email_lower = email_lower.clone();
            let account_doc = account_doc.clone();
            let uid = uid.clone();
            Box::pin(async move {
                if tx.get(collections::ACCOUNT_EMAILS, &email_lower).await?.is_some() {
                    return Ok(false);
                }
                tx.set(collections::ACCOUNT_EMAILS, &email_lower, json!({ "uid": uid }));
                tx.set(collections::ACCOUNTS, &uid, account_doc);
                Ok(true)
            })
        })
        .await
        .map_err(|e| IdentityError::Backend(e.to_string()))?;

        if !created {
            return Err(IdentityError::EmailAlreadyExists);
        }
        tracing::info!(uid = %account.uid, "identity account created");
        Ok(account.user())
    }

    async fn set_disabled(&self, uid: &str, disabled: bool) -> Result<(), IdentityError> {
        self.require_account(uid).await?;
        self.store
            .merge(collections::ACCOUNTS, uid, json!({ "disabled": disabled }))
            .await?;
        Ok(())
    }

    async fn set_email_verified(&self, uid: &str, verified: bool) -> Result<(), IdentityError> {
        self.require_account(uid).await?;
        self.store
            .merge(collections::ACCOUNTS, uid, json!({ "emailVerified": verified }))
            .await?;
        Ok(())
    }

    async fn delete_user(&self, uid: &str) -> Result<(), IdentityError> {
        let account = self.require_account(uid).await?;
        self.store
            .delete(collections::ACCOUNT_EMAILS, &account.email_lower)
            .await?;
        self.store.delete(collections::ACCOUNTS, uid).await?;
        tracing::info!(uid = %uid, "identity account deleted");
        Ok(())
    }

    async fn generate_password_reset_link(&self, email: &str) -> Result<String, IdentityError> {
        let account = self
            .account_by_email(email)
            .await?
            .ok_or(IdentityError::UserNotFound)?;
        let (token, hash) = auth::generate_password_reset_token();
        let now = Utc::now();
        self.store
            .set(
                collections::PASSWORD_RESETS,
                &hash,
                json!({
                    "uid": account.uid,
                    "email": account.email,
                    "createdAt": now,
                    "expiresAt": now + Duration::hours(PASSWORD_RESET_TTL_HOURS),
                }),
            )
            .await?;
        Ok(format!("{}/reset-password?token={token}", self.app_base_url))
    }

    async fn issue_access_token(&self, uid: &str) -> Result<String, IdentityError> {
        self.require_account(uid).await?;
        let (token, hash) = auth::generate_access_token();
        let now = Utc::now();
        let record = TokenRecord {
            uid: uid.to_string(),
            created_at: now,
            expires_at: now + Duration::days(ACCESS_TOKEN_TTL_DAYS),
        };
        self.store
            .set(collections::ACCOUNT_TOKENS, &hash, encode(&record)?)
            .await?;
        Ok(token)
    }

    async fn verify_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<IdentityUser>, IdentityError> {
        let Some(account) = self.account_by_email(email).await? else {
            return Ok(None);
        };
        let matches =
            auth::verify_password(password, &account.password_hash).map_err(IdentityError::Backend)?;
        Ok(matches.then(|| account.user()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn provider() -> (MemoryStore, StoreIdentityProvider) {
        let store = MemoryStore::new();
        let provider = StoreIdentityProvider::new(
            Arc::new(store.clone()),
            RetryPolicy::default(),
            "https://trax-event.app/".to_string(),
        );
        (store, provider)
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password: "Str0ng!pass".to_string(),
            display_name: Some("Ana".to_string()),
            disabled: false,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_case_insensitively() {
        let (store, provider) = provider();
        provider.create_user(new_user("ana@example.com")).await.unwrap();
        let err = provider.create_user(new_user("ANA@example.com")).await.unwrap_err();
        assert!(matches!(err, IdentityError::EmailAlreadyExists));
        assert_eq!(store.count(collections::ACCOUNTS), 1);
    }

    #[tokio::test]
    async fn invalid_email_is_rejected() {
        let (_, provider) = provider();
        let err = provider.create_user(new_user("not-an-email")).await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidEmail));
    }

    #[tokio::test]
    async fn tokens_resolve_until_account_is_disabled() {
        let (_, provider) = provider();
        let user = provider.create_user(new_user("ana@example.com")).await.unwrap();
        let token = provider.issue_access_token(&user.uid).await.unwrap();
        assert!(token.starts_with("trax_at_"));
        assert_eq!(provider.verify_access_token(&token).await.unwrap(), Some(user.uid.clone()));
        assert_eq!(provider.verify_access_token("trax_at_bogus").await.unwrap(), None);

        provider.set_disabled(&user.uid, true).await.unwrap();
        assert_eq!(provider.verify_access_token(&token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn password_check_uses_stored_hash() {
        let (_, provider) = provider();
        provider.create_user(new_user("ana@example.com")).await.unwrap();
        assert!(provider.verify_password("ana@example.com", "Str0ng!pass").await.unwrap().is_some());
        assert!(provider.verify_password("ana@example.com", "wrong").await.unwrap().is_none());
        assert!(provider.verify_password("bob@example.com", "Str0ng!pass").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reset_link_points_at_app() {
        let (store, provider) = provider();
        provider.create_user(new_user("ana@example.com")).await.unwrap();
        let link = provider.generate_password_reset_link("ana@example.com").await.unwrap();
        assert!(link.starts_with("https://trax-event.app/reset-password?token=trax_rst_"));
        assert_eq!(store.count(collections::PASSWORD_RESETS), 1);
        assert!(matches!(
            provider.generate_password_reset_link("nobody@example.com").await,
            Err(IdentityError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn delete_frees_the_email() {
        let (_, provider) = provider();
        let user = provider.create_user(new_user("ana@example.com")).await.unwrap();
        provider.delete_user(&user.uid).await.unwrap();
        assert_eq!(provider.get_user(&user.uid).await.unwrap(), None);
        provider.create_user(new_user("ana@example.com")).await.unwrap();
    }
}
