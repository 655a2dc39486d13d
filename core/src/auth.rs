use argon2::Argon2;
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Alphabet for human-shareable invitation codes. No 0/O/1/I.
pub const INVITATION_CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const INVITATION_CODE_LEN: usize = 8;

/// Guest link token: 24 random bytes hex-encoded (48 chars).
pub fn generate_invitation_token() -> String {
    random_hex(24)
}

/// Human-shareable code, `INVITATION_CODE_LEN` symbols from `INVITATION_CODE_ALPHABET`.
pub fn generate_invitation_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITATION_CODE_LEN)
        .map(|_| {
            let idx = rng.r#gen::<u8>() as usize % INVITATION_CODE_ALPHABET.len();
            INVITATION_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Generate an access token. Returns `(full_token, sha256_hash)`.
/// Format: `trax_at_` + 32 random bytes hex-encoded.
pub fn generate_access_token() -> (String, String) {
    let raw = random_hex(32);
    let full_token = format!("trax_at_{raw}");
    let hash = hash_token(&full_token);
    (full_token, hash)
}

/// Generate a password reset token. Returns `(full_token, sha256_hash)`.
/// Format: `trax_rst_` + 32 random bytes hex-encoded.
pub fn generate_password_reset_token() -> (String, String) {
    let raw = random_hex(32);
    let full_token = format!("trax_rst_{raw}");
    let hash = hash_token(&full_token);
    (full_token, hash)
}

/// Throwaway password for accounts provisioned on someone else's behalf.
pub fn generate_temporary_password() -> String {
    random_hex(12)
}

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash a password with Argon2id and a random salt.
pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| format!("Failed to hash password: {e}"))
}

/// Verify a password against an Argon2id hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, String> {
    let parsed = PasswordHash::new(hash).map_err(|e| format!("Invalid password hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Hyphen-less v4 UUID, the id format used for organisations and roles.
pub fn compact_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Generate `n` random bytes and return as hex string.
fn random_hex(n: usize) -> String {
    let bytes: Vec<u8> = (0..n).map(|_| rand::thread_rng().r#gen::<u8>()).collect();
    hex::encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invitation_token_carries_24_bytes() {
        let token = generate_invitation_token();
        assert_eq!(token.len(), 48);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_invitation_token());
    }

    #[test]
    fn invitation_code_uses_unambiguous_alphabet() {
        for _ in 0..50 {
            let code = generate_invitation_code();
            assert_eq!(code.len(), INVITATION_CODE_LEN);
            assert!(code.bytes().all(|b| INVITATION_CODE_ALPHABET.contains(&b)));
            assert!(!code.contains('0') && !code.contains('O'));
            assert!(!code.contains('1') && !code.contains('I'));
        }
    }

    #[test]
    fn access_token_roundtrip() {
        let (token, hash) = generate_access_token();
        assert!(token.starts_with("trax_at_"));
        assert_eq!(hash, hash_token(&token));
    }

    #[test]
    fn password_reset_token_roundtrip() {
        let (token, hash) = generate_password_reset_token();
        assert!(token.starts_with("trax_rst_"));
        assert_eq!(hash, hash_token(&token));
    }

    #[test]
    fn password_roundtrip() {
        let password = "Test_password_123";
        let hash = hash_password(password).unwrap();
        assert!(verify_password(password, &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn compact_id_has_no_hyphens() {
        let id = compact_id();
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
    }
}
