//! Runtime environment detection.
//!
//! Provides a single source of truth for determining the runtime environment
//! (test, development, production) based on the `CAREHOME_ENV` environment
//! variable.
//!
//! # Usage
//!
//! ```rust
//! use carehome_live::env::{Environment, is_test_mode};
//!
//! if Environment::current().is_development() {
//!     // Verbose logging, local server defaults
//! }
//!
//! if is_test_mode() {
//!     // Keep config files inside the repository
//! }
//! ```
//!
//! # Environment Variable
//!
//! Set `CAREHOME_ENV` to one of:
//! - `test` - Test mode (config lives under the repo's `tmp/` directory)
//! - `development` or `dev` - Development mode (debug logging by default)
//! - (anything else or unset) - Production mode

/// Name of the variable selecting the runtime environment.
pub const ENV_VAR: &str = "CAREHOME_ENV";

/// Runtime environment for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment.
    Test,
}

impl Environment {
    /// Detect current environment from `CAREHOME_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::from_value(std::env::var(ENV_VAR).ok().as_deref())
    }

    /// Map a raw `CAREHOME_ENV` value to an environment.
    #[must_use]
    pub fn from_value(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }

    /// Returns `true` if this is the development environment.
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }

    /// Default `env_logger` filter for this environment.
    #[must_use]
    pub fn default_log_filter(self) -> &'static str {
        match self {
            Self::Development => "debug",
            Self::Production | Self::Test => "info",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Convenience function to check if running in test mode.
///
/// Equivalent to `Environment::current().is_test()`.
#[must_use]
pub fn is_test_mode() -> bool {
    Environment::current().is_test()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Production.to_string(), "production");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Test.to_string(), "test");
    }

    #[test]
    fn test_from_value() {
        assert_eq!(Environment::from_value(Some("test")), Environment::Test);
        assert_eq!(Environment::from_value(Some("dev")), Environment::Development);
        assert_eq!(
            Environment::from_value(Some("development")),
            Environment::Development
        );
        assert_eq!(Environment::from_value(Some("staging")), Environment::Production);
        assert_eq!(Environment::from_value(None), Environment::Production);
    }

    #[test]
    fn test_environment_is_methods() {
        assert!(Environment::Test.is_test());
        assert!(!Environment::Test.is_development());

        assert!(!Environment::Production.is_test());
        assert!(!Environment::Production.is_development());

        assert!(Environment::Development.is_development());
        assert!(!Environment::Development.is_test());
    }

    #[test]
    fn test_default_log_filter() {
        assert_eq!(Environment::Development.default_log_filter(), "debug");
        assert_eq!(Environment::Production.default_log_filter(), "info");
    }
}
