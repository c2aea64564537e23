use crate::error::{AuthError, AuthResult};

/// bcrypt wrapper. The salt is embedded in each hash, so hashing the same
/// secret twice yields different strings.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn hash(&self, plaintext: &str) -> AuthResult<String> {
        bcrypt::hash(plaintext, self.cost)
            .map_err(|e| AuthError::Internal(format!("password hashing failed: {e}")))
    }

    /// A malformed stored hash counts as a mismatch.
    pub fn matches(&self, plaintext: &str, hash: &str) -> bool {
        bcrypt::verify(plaintext, hash).unwrap_or(false)
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}
