//! Argon2id password hashing.
//!
//! Hashes are PHC strings with a random salt. Both hashing and verification run on
//! the blocking pool. A dummy hash computed at construction is verified whenever the
//! account is unknown, so a missing username costs the same as a wrong password.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use secrecy::{ExposeSecret, SecretString};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashingParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CredentialHasher {
    params: Params,
    dummy_hash: String,
}

impl CredentialHasher {
    /// # Errors
    /// Returns an error if the parameters are rejected by Argon2.
    pub fn new(params: HashingParams) -> Result<Self> {
        let params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            None,
        )
        .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
        let dummy_hash = hash_with(&params, b"votegate-dummy-password")?;
        Ok(Self { params, dummy_hash })
    }

    /// # Errors
    /// Returns an error if hashing fails or the blocking task is cancelled.
    pub async fn hash(&self, password: &SecretString) -> Result<String> {
        let params = self.params.clone();
        let password = SecretString::from(password.expose_secret().to_owned());
        tokio::task::spawn_blocking(move || {
            hash_with(&params, password.expose_secret().as_bytes())
        })
        .await
        .context("password hashing task failed")?
    }

    /// Verify against `stored`, or against the dummy hash when there is no account.
    /// The dummy branch always reports a mismatch.
    ///
    /// # Errors
    /// Returns an error if the stored hash is not a valid PHC string.
    pub async fn verify(&self, password: &SecretString, stored: Option<&str>) -> Result<bool> {
        let known = stored.is_some();
        let hash = stored.unwrap_or(&self.dummy_hash).to_owned();
        let params = self.params.clone();
        let password = SecretString::from(password.expose_secret().to_owned());
        let matched = tokio::task::spawn_blocking(move || -> Result<bool> {
            let parsed =
                PasswordHash::new(&hash).map_err(|err| anyhow!("invalid password hash: {err}"))?;
            let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
            Ok(argon2
                .verify_password(password.expose_secret().as_bytes(), &parsed)
                .is_ok())
        })
        .await
        .context("password verification task failed")??;
        Ok(known && matched)
    }
}

fn hash_with(params: &Params, password: &[u8]) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone());
    let hash = argon2
        .hash_password(password, &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?
        .to_string();
    Ok(hash)
}
