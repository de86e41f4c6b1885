use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_PROJECT_NAME: &str = "Attendance Management System";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("failed to parse {name}: {value:?}")]
    BadNumber { name: &'static str, value: String },
    #[error("AGE_ENCRYPTION_KEY must be base64 of exactly 32 bytes")]
    BadAgeKey,
}

#[derive(Clone)]
pub struct Settings {
    pub project_name: String,
    pub secret_key: String,
    pub age_key: [u8; 32],
    pub access_token_expire_minutes: i64,
    pub max_devices_per_user: i64,
    pub session_cleanup_minutes: i64,
    pub workspace: Option<PathBuf>,
}

// Keys stay out of log output.
impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("project_name", &self.project_name)
            .field("access_token_expire_minutes", &self.access_token_expire_minutes)
            .field("max_devices_per_user", &self.max_devices_per_user)
            .field("session_cleanup_minutes", &self.session_cleanup_minutes)
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        // .env is optional.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret_key = lookup("SECRET_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("SECRET_KEY"))?;
        let raw_age_key =
            lookup("AGE_ENCRYPTION_KEY").ok_or(ConfigError::Missing("AGE_ENCRYPTION_KEY"))?;
        let age_key = decode_age_key(&raw_age_key)?;

        Ok(Settings {
            project_name: lookup("PROJECT_NAME")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string()),
            secret_key,
            age_key,
            access_token_expire_minutes: parse_number(
                &lookup,
                "ACCESS_TOKEN_EXPIRE_MINUTES",
                60 * 24,
            )?,
            max_devices_per_user: parse_number(&lookup, "MAX_DEVICES_PER_USER", 2)?,
            session_cleanup_minutes: parse_number(&lookup, "SESSION_CLEANUP_MINUTES", 60 * 24)?,
            workspace: lookup("ATTENDANCE_WORKSPACE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        })
    }
}

fn parse_number<F>(lookup: &F, name: &'static str, default: i64) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    match raw.trim().parse::<i64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ConfigError::BadNumber { name, value: raw }),
    }
}

fn decode_age_key(raw: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = B64
        .decode(raw.trim())
        .map_err(|_| ConfigError::BadAgeKey)?;
    bytes.try_into().map_err(|_| ConfigError::BadAgeKey)
}
