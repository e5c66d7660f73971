use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What a resource is, or what happened to it.
///
/// The first three variants are *data* kinds, assigned at discovery. The
/// last two are terminal synthetic kinds: once a resource becomes
/// [`Corrupted`](Self::Corrupted) or [`Hardlink`](Self::Hardlink) it never
/// touches the network again for the rest of the run.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[display("document")]
    Document,
    #[display("video")]
    Video,
    /// A file linked from the course page, hosted somewhere else.
    #[display("extern")]
    Extern,
    /// Download failed or was invalid; permanently skipped this run.
    #[display("corrupted")]
    Corrupted,
    /// Content is identical to another resource; never downloaded itself.
    #[display("hardlink")]
    Hardlink,
}

impl MediaKind {
    /// `true` for [`Corrupted`](Self::Corrupted) and [`Hardlink`](Self::Hardlink).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Corrupted | Self::Hardlink)
    }

    /// Subdirectory (below the course directory) that resources of this kind
    /// are written to when subdivision is enabled. Documents live directly in
    /// the course directory.
    pub fn dir_name(&self) -> Option<&'static str> {
        match self {
            Self::Video => Some("Videos"),
            Self::Extern => Some("Extern"),
            Self::Document | Self::Corrupted | Self::Hardlink => None,
        }
    }
}

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
#[display("unknown media kind: {_0}")]
pub struct UnknownKind(#[error(not(source))] pub String);

impl FromStr for MediaKind {
    type Err = UnknownKind;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "document" => Self::Document,
            "video" => Self::Video,
            "extern" => Self::Extern,
            "corrupted" => Self::Corrupted,
            "hardlink" => Self::Hardlink,
            other => return Err(UnknownKind(other.to_string())),
        })
    }
}
