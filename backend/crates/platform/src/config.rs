//! Environment configuration helpers
//!
//! Typed access to process environment variables. Only binaries call these;
//! library types take plain config structs.

use std::str::FromStr;
use std::time::Duration;

/// Error raised when an environment variable is present but unusable
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

/// Read `name` and parse it, falling back to `default` when unset or blank.
pub fn env_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_or(name, std::env::var(name).ok(), default)
}

/// Read `name` as a string, falling back to `default` when unset or blank.
pub fn env_string_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Read `name` as whole minutes, falling back to `default` when unset or blank.
pub fn env_minutes_or(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    minutes_or(name, std::env::var(name).ok(), default)
}

fn minutes_or(name: &str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => {
            let minutes: u64 = parse_or(name, Some(value.to_string()), 0)?;
            minutes
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| ConfigError::Invalid {
                    name: name.to_string(),
                    value: value.to_string(),
                    reason: "minutes overflow a duration".to_string(),
                })
        }
    }
}

fn parse_or<T>(name: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value.parse::<T>().map_err(|e| ConfigError::Invalid {
            name: name.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_uses_default() {
        let v: u64 = parse_or("QUEUE_MAX_SIZE", None, 1000).unwrap();
        assert_eq!(v, 1000);

        let v: u64 = parse_or("QUEUE_MAX_SIZE", Some("   ".into()), 1000).unwrap();
        assert_eq!(v, 1000);
    }

    #[test]
    fn test_present_value_is_parsed() {
        let v: u64 = parse_or("QUEUE_MAX_SIZE", Some(" 250 ".into()), 1000).unwrap();
        assert_eq!(v, 250);
    }

    #[test]
    fn test_garbage_is_an_error() {
        let err = parse_or::<u64>("QUEUE_MAX_SIZE", Some("many".into()), 1000).unwrap_err();
        assert!(err.to_string().contains("QUEUE_MAX_SIZE"));
        assert!(err.to_string().contains("many"));
    }

    #[test]
    fn test_minutes_are_converted() {
        let default = Duration::from_secs(30 * 60);
        assert_eq!(minutes_or("QUEUE_MAX_WAIT_MINUTES", None, default).unwrap(), default);
        assert_eq!(
            minutes_or("QUEUE_MAX_WAIT_MINUTES", Some("5".into()), default).unwrap(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_huge_minutes_are_an_error() {
        let raw = Some(u64::MAX.to_string());
        let err = minutes_or("QUEUE_MAX_WAIT_MINUTES", raw, Duration::ZERO).unwrap_err();
        assert!(err.to_string().contains("QUEUE_MAX_WAIT_MINUTES"));
    }
}
