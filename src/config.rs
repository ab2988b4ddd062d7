use crate::stt::SttError;
use std::env;
use std::time::Duration;

pub const APP_ID_VAR: &str = "RAASR_APP_ID";
pub const SECRET_KEY_VAR: &str = "RAASR_SECRET_KEY";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 120;
const DEFAULT_MAX_RETRIES: u8 = 3;

/// Shared-secret credentials for the transcription service. Immutable once
/// constructed; absence or emptiness is a configuration error, not a
/// runtime surprise.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub app_id: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(app_id: impl Into<String>, secret: impl Into<String>) -> Result<Self, SttError> {
        let app_id = app_id.into();
        let secret = secret.into();

        if app_id.trim().is_empty() {
            return Err(SttError::Config("app id is empty".to_string()));
        }
        if secret.trim().is_empty() {
            return Err(SttError::Config("secret key is empty".to_string()));
        }

        Ok(Self { app_id, secret })
    }

    pub fn from_env() -> Result<Self, SttError> {
        let app_id = env::var(APP_ID_VAR)
            .map_err(|_| SttError::Config(format!("{} is not set", APP_ID_VAR)))?;
        let secret = env::var(SECRET_KEY_VAR)
            .map_err(|_| SttError::Config(format!("{} is not set", SECRET_KEY_VAR)))?;
        Self::new(app_id, secret)
    }
}

/// Tuning knobs for one transcription session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Wait between progress checks.
    pub poll_interval: Duration,
    /// Progress checks before the session gives up on the remote task.
    pub max_poll_attempts: u32,
    /// Transport-error retries per remote call.
    pub max_retries: u8,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}
