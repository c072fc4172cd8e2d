//! Settings read from the process environment.

use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Deployment stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Local,
    CiTesting,
    Testing,
    Develop,
    Staging,
    Production,
}

impl FromStr for Stage {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "local" => Ok(Self::Local),
            "ci-testing" => Ok(Self::CiTesting),
            "testing" => Ok(Self::Testing),
            "develop" => Ok(Self::Develop),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(AppError::Config(format!("STAGE `{other}` is not a known stage"))),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::CiTesting => "ci-testing",
            Self::Testing => "testing",
            Self::Develop => "develop",
            Self::Staging => "staging",
            Self::Production => "production",
        })
    }
}

/// Runtime settings of the admin binary.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub stage: Stage,
    pub database_url: String,
    pub max_connections: u32,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("stage", &self.stage)
            .field("database_url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an unknown stage or a malformed number.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`.
    ///
    /// `DATABASE_URL` wins when set; otherwise the URL is composed from the
    /// `DB_*` variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an unknown stage or a malformed number.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_owned());

        let stage = lookup("STAGE").map_or(Ok(Stage::default()), |s| s.parse())?;
        let database_url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                var("DB_USER", "duperuser"),
                var("DB_PASSWORD", "abc123"),
                var("DB_HOST", "localhost"),
                var("DB_PORT", "5432"),
                var("DB_NAME", "iam_service"),
            ),
        };
        let max_connections = var("DB_MAX_CONNECTIONS", "10")
            .parse()
            .map_err(|e| AppError::Config(format!("DB_MAX_CONNECTIONS must be a valid u32: {e}")))?;

        Ok(Self {
            stage,
            database_url,
            max_connections,
        })
    }
}
