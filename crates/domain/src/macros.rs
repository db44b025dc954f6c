//! Macro for implementing Display and FromStr for status enums
//!
//! # Example
//!
//! ```rust
//! use rxflow_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum RunPhase {
//!     Loading,
//!     Running,
//!     Done,
//! }
//!
//! impl_domain_status_conversions!(RunPhase {
//!     Loading => "loading",
//!     Running => "running",
//!     Done => "done",
//! });
//!
//! assert_eq!("RUNNING".parse::<RunPhase>(), Ok(RunPhase::Running));
//! ```

/// Implements Display and FromStr traits for status enums
///
/// - Display writes the mapped wire string
/// - FromStr parses case-insensitively and reports the enum name on failure
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestStatus {
        Waiting,
        InFlight,
    }

    impl_domain_status_conversions!(TestStatus {
        Waiting => "waiting",
        InFlight => "in_flight",
    });

    #[test]
    fn test_display_conversion() {
        assert_eq!(TestStatus::Waiting.to_string(), "waiting");
        assert_eq!(TestStatus::InFlight.to_string(), "in_flight");
    }

    #[test]
    fn test_fromstr_mixed_case() {
        assert_eq!(TestStatus::from_str("IN_FLIGHT").unwrap(), TestStatus::InFlight);
        assert_eq!(TestStatus::from_str("Waiting").unwrap(), TestStatus::Waiting);
    }

    mod with_result_alias {
        #[allow(dead_code)]
        type Result<T> = std::result::Result<T, String>;

        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Mode {
            Fast,
        }

        impl_domain_status_conversions!(Mode { Fast => "fast" });
    }

    #[test]
    fn test_expands_next_to_result_alias() {
        let mode: with_result_alias::Mode = "FAST".parse().unwrap();
        assert_eq!(mode, with_result_alias::Mode::Fast);
    }

    #[test]
    fn test_fromstr_invalid() {
        let err = TestStatus::from_str("gone").unwrap_err();
        assert_eq!(err, "Invalid TestStatus: gone");
    }
}
