//! Credential hashing collaborator.
//!
//! Hashing is deliberately slow, so the async helpers move it onto tokio's
//! blocking pool and hand back a [`JoinHandle`] the session task can wait on
//! alongside its socket and timers.

use std::sync::Arc;

use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use crate::core::AuthError;

/// One-way, salted, verifiable password hash.
pub trait CredentialHasher: Send + Sync + 'static {
    /// Hash a password for storage.
    fn hash(&self, password: &str) -> Result<String, AuthError>;

    /// Check a password against a stored hash.
    fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError>;
}

/// bcrypt-backed [`CredentialHasher`].
#[derive(Debug, Clone, Copy)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    /// Create a hasher with the given work factor (4..=31).
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Work factor.
    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

impl CredentialHasher for BcryptHasher {
    fn hash(&self, password: &str) -> Result<String, AuthError> {
        bcrypt::hash(password, self.cost).map_err(|e| AuthError::Hash(e.to_string()))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        bcrypt::verify(password, hash).map_err(|e| AuthError::Hash(e.to_string()))
    }
}

/// Verify `password` against `hash` on the blocking pool.
///
/// Resolves to `Ok(())` only for a match.
pub fn spawn_verify(
    hasher: Arc<dyn CredentialHasher>,
    password: Zeroizing<String>,
    hash: String,
) -> JoinHandle<Result<(), AuthError>> {
    tokio::task::spawn_blocking(move || {
        if hasher.verify(&password, &hash)? {
            Ok(())
        } else {
            Err(AuthError::Rejected)
        }
    })
}

/// Hash `password` on the blocking pool.
pub fn spawn_hash(
    hasher: Arc<dyn CredentialHasher>,
    password: Zeroizing<String>,
) -> JoinHandle<Result<String, AuthError>> {
    tokio::task::spawn_blocking(move || hasher.hash(&password))
}

/// Flatten a finished blocking task into its result.
pub fn joined<T>(result: Result<Result<T, AuthError>, tokio::task::JoinError>) -> Result<T, AuthError> {
    result.map_err(|e| AuthError::Hash(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_COST: u32 = 4;

    #[test]
    fn test_hash_and_verify() {
        let hasher = BcryptHasher::new(TEST_COST);
        let hash = hasher.hash("correct horse").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(hasher.verify("correct horse", &hash).unwrap());
        assert!(!hasher.verify("battery staple", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let hasher = BcryptHasher::new(TEST_COST);
        assert_ne!(hasher.hash("pw").unwrap(), hasher.hash("pw").unwrap());
    }

    #[test]
    fn test_verify_against_garbage_hash() {
        let hasher = BcryptHasher::new(TEST_COST);
        assert!(matches!(
            hasher.verify("pw", "not-a-hash"),
            Err(AuthError::Hash(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_verify() {
        let hasher: Arc<dyn CredentialHasher> = Arc::new(BcryptHasher::new(TEST_COST));
        let hash = hasher.hash("pw").unwrap();

        let ok = spawn_verify(hasher.clone(), Zeroizing::new("pw".into()), hash.clone()).await;
        assert!(joined(ok).is_ok());

        let bad = spawn_verify(hasher, Zeroizing::new("nope".into()), hash).await;
        assert!(matches!(joined(bad), Err(AuthError::Rejected)));
    }

    #[tokio::test]
    async fn test_spawn_hash() {
        let hasher: Arc<dyn CredentialHasher> = Arc::new(BcryptHasher::new(TEST_COST));
        let hash = joined(spawn_hash(hasher.clone(), Zeroizing::new("new".into())).await).unwrap();
        assert!(hasher.verify("new", &hash).unwrap());
    }
}
