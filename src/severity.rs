use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Log priority attached to every record from a captured stream.
///
/// Discriminants match the Android log priorities so the value can be handed
/// straight to `__android_log_write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum Severity {
    Unknown = 0,
    Verbose = 2,
    Debug = 3,
    Info = 4,
    #[serde(alias = "warning")]
    Warn = 5,
    Error = 6,
    Fatal = 7,
}

impl Severity {
    pub const ALL: [Severity; 7] = [
        Severity::Unknown,
        Severity::Verbose,
        Severity::Debug,
        Severity::Info,
        Severity::Warn,
        Severity::Error,
        Severity::Fatal,
    ];

    pub fn priority(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Unknown => "unknown",
            Severity::Verbose => "verbose",
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }

    /// Closest `tracing` level. `tracing` has no fatal or unknown level, so
    /// those fold into ERROR and INFO.
    pub fn tracing_level(self) -> tracing::Level {
        match self {
            Severity::Verbose => tracing::Level::TRACE,
            Severity::Debug => tracing::Level::DEBUG,
            Severity::Unknown | Severity::Info => tracing::Level::INFO,
            Severity::Warn => tracing::Level::WARN,
            Severity::Error | Severity::Fatal => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if lower == "warning" {
            return Ok(Severity::Warn);
        }
        Severity::ALL
            .into_iter()
            .find(|sev| sev.as_str() == lower)
            .ok_or_else(|| format!("unknown severity '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_priority() {
        assert!(Severity::Verbose < Severity::Debug);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Error < Severity::Fatal);
        for pair in Severity::ALL.windows(2) {
            assert!(pair[0].priority() < pair[1].priority());
        }
    }

    #[test]
    fn android_priorities() {
        assert_eq!(Severity::Unknown.priority(), 0);
        assert_eq!(Severity::Info.priority(), 4);
        assert_eq!(Severity::Warn.priority(), 5);
        assert_eq!(Severity::Fatal.priority(), 7);
    }

    #[test]
    fn parse_names() {
        assert_eq!("info".parse::<Severity>().unwrap(), Severity::Info);
        assert_eq!("WARN".parse::<Severity>().unwrap(), Severity::Warn);
        assert_eq!(" warning ".parse::<Severity>().unwrap(), Severity::Warn);
        assert!("loud".parse::<Severity>().is_err());
    }

    #[test]
    fn display_roundtrips_through_from_str() {
        for sev in Severity::ALL {
            assert_eq!(sev.to_string().parse::<Severity>().unwrap(), sev);
        }
    }

    #[test]
    fn tracing_levels() {
        assert_eq!(Severity::Verbose.tracing_level(), tracing::Level::TRACE);
        assert_eq!(Severity::Warn.tracing_level(), tracing::Level::WARN);
        assert_eq!(Severity::Fatal.tracing_level(), tracing::Level::ERROR);
        assert_eq!(Severity::Unknown.tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            severity: Severity,
        }
        let w: Wrapper = toml::from_str(r#"severity = "warning""#).unwrap();
        assert_eq!(w.severity, Severity::Warn);
        let w: Wrapper = toml::from_str(r#"severity = "error""#).unwrap();
        assert_eq!(w.severity, Severity::Error);
    }
}
