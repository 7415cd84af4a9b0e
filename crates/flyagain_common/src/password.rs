//! Adaptive password hashing.
//!
//! bcrypt with a configurable work factor. The verifier string embeds its
//! own salt and cost, so verification needs no extra state.

use crate::error::ServiceError;

#[derive(Clone, Copy, Debug)]
pub struct PasswordVerifier {
    cost: u32,
}

impl PasswordVerifier {
    /// Construct with the given work factor. Costs outside bcrypt's
    /// 4..=31 domain are rejected here rather than at first use.
    pub fn new(cost: u32) -> Result<Self, ServiceError> {
        if !(4..=31).contains(&cost) {
            return Err(ServiceError::Internal(format!(
                "bcrypt cost {cost} is outside the valid range 4..=31"
            )));
        }
        Ok(Self { cost })
    }

    pub fn hash(&self, password: &str) -> Result<String, ServiceError> {
        bcrypt::hash(password, self.cost)
            .map_err(|e| ServiceError::Internal(format!("password hashing failed: {e}")))
    }

    /// Constant result shape for bad hashes: a stored verifier that fails to
    /// parse counts as a mismatch, never as an error the caller can leak.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        bcrypt::verify(password, stored).unwrap_or(false)
    }
}
