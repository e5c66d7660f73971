use serde::{Deserialize, Serialize};
use std::fmt;

/// Size descriptor of a resource.
///
/// Streamable media is usually announced with a duration long before anyone
/// knows how many bytes it is, and plenty of linked files announce nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "lowercase")]
pub enum Size {
    Bytes(u64),
    Seconds(u64),
    #[default]
    Unknown,
}

impl Size {
    /// Byte count, if known.
    pub fn bytes(&self) -> Option<u64> {
        match self {
            Self::Bytes(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Storage representation: unit tag plus optional value.
    pub fn to_parts(&self) -> (&'static str, Option<u64>) {
        match self {
            Self::Bytes(b) => ("bytes", Some(*b)),
            Self::Seconds(s) => ("seconds", Some(*s)),
            Self::Unknown => ("unknown", None),
        }
    }

    /// Inverse of [`to_parts`](Self::to_parts). Anything that doesn't make
    /// sense collapses to [`Unknown`](Self::Unknown).
    pub fn from_parts(unit: &str, value: Option<u64>) -> Self {
        match (unit, value) {
            ("bytes", Some(b)) => Self::Bytes(b),
            ("seconds", Some(s)) => Self::Seconds(s),
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => write!(f, "{b} B"),
            Self::Seconds(s) => write!(f, "{s} s"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}
