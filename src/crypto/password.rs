use argon2::Argon2;
use rand::Rng;

use crate::error::AppError;

pub const DIGEST_LEN: usize = 32;

/// Argon2id digest of a password together with the salt it was derived with.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordDigest {
    hash: [u8; DIGEST_LEN],
    salt: [u8; DIGEST_LEN],
}

impl std::fmt::Debug for PasswordDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordDigest(..)")
    }
}

impl PasswordDigest {
    /// Derive a digest under a fresh random salt.
    pub fn derive(password: &str) -> Result<Self, AppError> {
        let salt: [u8; DIGEST_LEN] = rand::thread_rng().gen();
        let hash = hash_with_salt(password, &salt)?;
        Ok(PasswordDigest { hash, salt })
    }

    /// Rebuild a digest from stored columns.
    pub fn from_parts(hash: &[u8], salt: &[u8]) -> Result<Self, AppError> {
        let hash: [u8; DIGEST_LEN] = hash
            .try_into()
            .map_err(|_| AppError::Crypto("Invalid stored hash length".to_string()))?;
        let salt: [u8; DIGEST_LEN] = salt
            .try_into()
            .map_err(|_| AppError::Crypto("Invalid stored salt length".to_string()))?;
        Ok(PasswordDigest { hash, salt })
    }

    pub fn verify(&self, password: &str) -> Result<bool, AppError> {
        let computed = hash_with_salt(password, &self.salt)?;
        // constant time over the full digest
        let diff = computed
            .iter()
            .zip(self.hash.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        Ok(diff == 0)
    }

    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }
}

fn hash_with_salt(password: &str, salt: &[u8]) -> Result<[u8; DIGEST_LEN], AppError> {
    let mut hash = [0u8; DIGEST_LEN];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut hash)
        .map_err(|e| AppError::Crypto(format!("Password hashing failed: {}", e)))?;
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_verify() {
        let digest = PasswordDigest::derive("rahasia").unwrap();
        assert!(digest.verify("rahasia").unwrap());
        assert!(!digest.verify("Rahasia").unwrap());
    }

    #[test]
    fn test_from_parts_round_trip() {
        let digest = PasswordDigest::derive("pw").unwrap();
        let restored = PasswordDigest::from_parts(digest.hash(), digest.salt()).unwrap();
        assert!(restored.verify("pw").unwrap());
    }

    #[test]
    fn test_from_parts_rejects_short_columns() {
        assert!(matches!(
            PasswordDigest::from_parts(&[1, 2, 3], &[0u8; DIGEST_LEN]),
            Err(AppError::Crypto(_))
        ));
    }
}
