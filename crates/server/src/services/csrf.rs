//! Anti-forgery token service.
//!
//! Stateless keyed-hash scheme: a token is `hex(ts).hex(mac)` where `ts` is
//! the issue time in unix seconds and `mac = HMAC-SHA256(key, "{identity_id}:{ts}")`.
//! Tokens are bound to the acting identity, expire after one hour, and are
//! verified with a constant-time comparison. No server-side registry exists,
//! so verification needs no shared mutable state and scales without
//! coordination.
//!
//! Mutating admin routes require the token in the [`CSRF_HEADER`] header.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use copperleaf_core::UserId;

use crate::error::AppError;

/// Request header carrying the anti-forgery token.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Token lifetime in seconds.
const TOKEN_TTL_SECS: i64 = 3600;

/// Permitted clock skew when checking a token is not from the future.
const MAX_SKEW_SECS: i64 = 30;

type HmacSha256 = Hmac<Sha256>;

/// Issues and verifies anti-forgery tokens.
#[derive(Clone)]
pub struct CsrfService {
    key: SecretString,
}

impl CsrfService {
    #[must_use]
    pub const fn new(key: SecretString) -> Self {
        Self { key }
    }

    /// Issue a token for `identity` valid for one hour.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] if the MAC cannot be keyed.
    pub fn issue(&self, identity: &UserId) -> Result<String, AppError> {
        self.issue_at(identity, Utc::now())
    }

    fn issue_at(&self, identity: &UserId, now: DateTime<Utc>) -> Result<String, AppError> {
        let ts = now.timestamp();
        let mac = self.mac_for(identity, ts)?;
        Ok(format!("{ts:x}.{}", hex::encode(mac)))
    }

    /// Verify a token presented by `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Forbidden`] on a missing, malformed, expired, or
    /// forged token. The message never distinguishes forgery from expiry.
    pub fn verify(&self, identity: &UserId, token: Option<&str>) -> Result<(), AppError> {
        self.verify_at(identity, token, Utc::now())
    }

    fn verify_at(
        &self,
        identity: &UserId,
        token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let denied = || AppError::Forbidden("missing or invalid anti-forgery token".to_owned());

        let token = token.ok_or_else(denied)?;
        let (ts_hex, mac_hex) = token.split_once('.').ok_or_else(denied)?;
        let ts = i64::from_str_radix(ts_hex, 16).map_err(|_| denied())?;
        let presented = hex::decode(mac_hex).map_err(|_| denied())?;

        let age = now.timestamp() - ts;
        if age > TOKEN_TTL_SECS || age < -MAX_SKEW_SECS {
            return Err(denied());
        }

        let expected = self.mac_for(identity, ts)?;
        if expected.ct_eq(&presented).into() {
            Ok(())
        } else {
            Err(denied())
        }
    }

    fn mac_for(&self, identity: &UserId, ts: i64) -> Result<Vec<u8>, AppError> {
        let mut mac = HmacSha256::new_from_slice(self.key.expose_secret().as_bytes())
            .map_err(|_| AppError::Internal("anti-forgery key rejected".to_owned()))?;
        mac.update(identity.as_str().as_bytes());
        mac.update(b":");
        mac.update(ts.to_string().as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
