use crate::common::config::CredentialConfig;
use crate::common::{SmartLockError, Result};
use crate::core::sessions::expiry_after;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::{Rng, rngs::OsRng};
use std::fmt;
use std::str::FromStr;

const OTP_DIGITS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Password,
    Pin,
    Otp,
    Voice,
    CenterPattern,
}

impl AuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMethod::Password => "password",
            AuthMethod::Pin => "pin",
            AuthMethod::Otp => "otp",
            AuthMethod::Voice => "voice",
            AuthMethod::CenterPattern => "centerpattern",
        }
    }

    fn rejection(self) -> &'static str {
        match self {
            AuthMethod::Password => "Wrong password",
            AuthMethod::Pin => "Wrong PIN",
            AuthMethod::Otp => "Wrong or expired OTP",
            AuthMethod::Voice => "Wrong voice phrase",
            AuthMethod::CenterPattern => "Wrong center pattern",
        }
    }
}

impl FromStr for AuthMethod {
    type Err = SmartLockError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "password" => Ok(AuthMethod::Password),
            "pin" => Ok(AuthMethod::Pin),
            "otp" => Ok(AuthMethod::Otp),
            "voice" => Ok(AuthMethod::Voice),
            "centerpattern" => Ok(AuthMethod::CenterPattern),
            _ => Err(SmartLockError::InvalidMethod),
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneTimeCode {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

/// Static secrets plus the single outstanding one-time code.
pub struct CredentialStore {
    secrets: CredentialConfig,
    otp_ttl: u64,
    // At most one live code; issuing replaces it
    otp: Mutex<Option<OneTimeCode>>,
}

impl CredentialStore {
    pub fn new(secrets: CredentialConfig, otp_ttl: u64) -> Self {
        Self {
            secrets,
            otp_ttl,
            otp: Mutex::new(None),
        }
    }

    pub fn otp_ttl(&self) -> u64 {
        self.otp_ttl
    }

    pub fn issue_otp(&self, now: DateTime<Utc>) -> OneTimeCode {
        let value: String = (0..OTP_DIGITS)
            .map(|_| char::from(b'0' + OsRng.gen_range(0..10u8)))
            .collect();
        let code = OneTimeCode {
            value,
            expires_at: expiry_after(now, self.otp_ttl),
        };
        *self.otp.lock() = Some(code.clone());
        code
    }

    /// Check `presented` against the secret for `method`.
    ///
    /// A matching OTP stays usable until it expires or a new one is issued.
    pub fn verify(&self, method: AuthMethod, presented: &str, now: DateTime<Utc>) -> Result<()> {
        let presented = presented.trim();
        let accepted = match method {
            AuthMethod::Password => presented == self.secrets.password,
            AuthMethod::Pin => presented == self.secrets.pin,
            AuthMethod::CenterPattern => presented == self.secrets.center_pattern,
            AuthMethod::Voice => presented.to_lowercase() == self.secrets.voice_phrase.to_lowercase(),
            AuthMethod::Otp => match self.otp.lock().as_ref() {
                Some(code) => now < code.expires_at && presented == code.value,
                None => false,
            },
        };

        if accepted {
            Ok(())
        } else {
            Err(SmartLockError::Rejected(method.rejection().to_string()))
        }
    }
}
