//! JWT minting and verification with the device key.
//!
//! The bridge authenticates a device with a JWT passed as the MQTT password.
//! Tokens are signed with ES256 using the device's P-256 private key and carry
//! three claims: the project id as audience, the issue time and the expiry.
//!
//! Minting is stateless and loads the key on every call. Whether a token is
//! reused is decided by the credential strategies in [`crate::credentials`],
//! which all rely on [`Device::verify_jwt`] below.

use std::{fs, path::Path, time::Duration};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use p256::{
    pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding},
    SecretKey,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::trace;

use crate::{
    device::Device,
    error::{IotCoreError, Result},
};

/// The only signing algorithm accepted by the bridge for EC keys.
pub const ALGORITHM: Algorithm = Algorithm::ES256;

/// Claims carried by a device token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Audience, always the project id.
    pub aud: String,
    /// Issued at, Unix seconds.
    pub iat: i64,
    /// Expires at, Unix seconds.
    pub exp: i64,
}

impl Device {
    /// Creates a token signed with the device key that expires after `ttl`.
    ///
    /// # Errors
    /// - `KeyLoad` if the key file is unreadable or is not a P-256 key
    /// - `Signing` if the signature cannot be produced
    pub fn new_jwt(&self, ttl: Duration) -> Result<String> {
        let key = load_secret_key(self.private_key_path())?;
        let pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| IotCoreError::KeyLoad(format!("failed to encode key: {e}")))?;
        let encoding_key = EncodingKey::from_ec_pem(pem.as_bytes())
            .map_err(|e| IotCoreError::KeyLoad(e.to_string()))?;

        let now = unix_now();
        let ttl_secs = i64::try_from(whole_seconds(ttl)).unwrap_or(i64::MAX);
        let claims = Claims {
            aud: self.project_id().to_string(),
            iat: now,
            exp: now.saturating_add(ttl_secs),
        };

        let token = jsonwebtoken::encode(&Header::new(ALGORITHM), &claims, &encoding_key)
            .map_err(|e| IotCoreError::Signing(e.to_string()))?;
        trace!(aud = %claims.aud, exp = claims.exp, "minted device token");
        Ok(token)
    }

    /// Checks a token's algorithm, signature, audience and expiry.
    ///
    /// Returns `Ok(true)` only for a usable token. An empty token yields
    /// `Ok(false)`. Every other rejection is an error; callers must treat
    /// `Ok(false)` and `Err(_)` the same way.
    ///
    /// Tokens signed with any algorithm other than ES256 are rejected before the
    /// key is consulted, which rules out algorithm substitution.
    pub fn verify_jwt(&self, token: &str) -> Result<bool> {
        if token.is_empty() {
            return Ok(false);
        }

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| IotCoreError::TokenInvalid(format!("malformed token: {e}")))?;
        if header.alg != ALGORITHM {
            return Err(IotCoreError::TokenInvalid(format!(
                "unexpected signing method {:?}",
                header.alg
            )));
        }

        let decoding_key = self.decoding_key()?;
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.set_audience(&[self.project_id()]);
        validation.set_required_spec_claims(&["exp", "aud"]);

        let data = jsonwebtoken::decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|e| IotCoreError::TokenInvalid(e.to_string()))?;

        // `exp == now` is already expired.
        if data.claims.exp <= unix_now() {
            return Err(IotCoreError::TokenInvalid("token has expired".into()));
        }

        Ok(true)
    }

    /// Public half of the device key, in the form the JWT decoder expects.
    fn decoding_key(&self) -> Result<DecodingKey> {
        let key = load_secret_key(self.private_key_path())?;
        let pem = key
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| IotCoreError::KeyLoad(format!("failed to encode public key: {e}")))?;
        DecodingKey::from_ec_pem(pem.as_bytes()).map_err(|e| IotCoreError::KeyLoad(e.to_string()))
    }
}

/// Reads a P-256 private key in SEC1 or PKCS#8 PEM form.
fn load_secret_key(path: &Path) -> Result<SecretKey> {
    let pem = fs::read_to_string(path)
        .map_err(|e| IotCoreError::KeyLoad(format!("{}: {e}", path.display())))?;

    SecretKey::from_sec1_pem(&pem)
        .or_else(|_| SecretKey::from_pkcs8_pem(&pem))
        .map_err(|e| IotCoreError::KeyLoad(format!("{}: {e}", path.display())))
}

/// Claims carry whole seconds. Rounding up keeps a sub-second lifetime from
/// collapsing into a token that is expired when minted.
fn whole_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0))
}

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
