use std::fmt;
use std::str::FromStr;

/// Fault severity of a unit. Ordered: `Normal < Warning < Error`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    #[default]
    Normal,
    Warning,
    Error,
}

/// Generation lifecycle of a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum UnitStatus {
    #[default]
    Created,
    Generated,
    Exported,
}

/// Whether a unit is tracked by a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SnapshotStatus {
    #[default]
    Untracked,
    Tracked,
    Error,
}

/// Raised when a persisted keyword is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised {kind} \"{value}\"")]
pub struct UnknownKeyword {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! keyword_enum {
    ($ty:ty, $kind:literal, { $($variant:path => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownKeyword;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($variant),)+
                    other => Err(UnknownKeyword {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

keyword_enum!(Severity, "state", {
    Severity::Normal => "normal",
    Severity::Warning => "warning",
    Severity::Error => "error",
});

keyword_enum!(UnitStatus, "status", {
    UnitStatus::Created => "created",
    UnitStatus::Generated => "generated",
    UnitStatus::Exported => "exported",
});

keyword_enum!(SnapshotStatus, "snapshot status", {
    SnapshotStatus::Untracked => "untracked",
    SnapshotStatus::Tracked => "tracked",
    SnapshotStatus::Error => "error",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Normal);
    }

    #[test]
    fn test_keywords_parse() {
        assert_eq!("WARNING".parse::<Severity>(), Ok(Severity::Warning));
        assert_eq!(" exported ".parse::<UnitStatus>(), Ok(UnitStatus::Exported));
        assert_eq!("tracked".parse::<SnapshotStatus>(), Ok(SnapshotStatus::Tracked));
        assert!("fatal".parse::<Severity>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(UnitStatus::Generated.to_string(), "generated");
        assert_eq!(SnapshotStatus::Untracked.to_string(), "untracked");
    }
}
