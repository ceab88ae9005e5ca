use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Hash a password with Argon2id on the blocking pool.
///
/// # Errors
/// Returns an error if hashing fails or the blocking task panics.
pub async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| anyhow!("failed to hash password: {err}"))
    })
    .await
    .context("password hashing task failed")?
}

/// Check a password against a stored PHC string.
///
/// # Errors
/// Returns an error if the stored hash is malformed or the blocking task panics.
pub async fn verify_password(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || -> Result<bool> {
        let parsed = PasswordHash::new(&hash).map_err(|err| anyhow!("invalid password hash: {err}"))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .context("password verification task failed")?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_and_verify() -> Result<()> {
        let hash = hash_password("correct horse".to_string()).await?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse".to_string(), hash.clone()).await?);
        assert!(!verify_password("wrong horse".to_string(), hash).await?);
        Ok(())
    }

    #[tokio::test]
    async fn same_password_gets_distinct_salts() -> Result<()> {
        let first = hash_password("same-password".to_string()).await?;
        let second = hash_password("same-password".to_string()).await?;
        assert_ne!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_hash_is_an_error() {
        assert!(verify_password("x".to_string(), "not-a-phc-string".to_string()).await.is_err());
    }
}
