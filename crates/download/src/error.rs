use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Why a single resource could not be brought to completion.
///
/// None of these escape the scheduler: a failed transfer demotes its
/// resource to corrupted and the run goes on.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not connect to {_0}")]
    Connect(#[error(not(source))] String),
    #[display("response body could not be read")]
    Read,
    #[display("response body ended after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },
    #[display("could not write {}", _0.display())]
    Write(#[error(not(source))] PathBuf),
    #[display("could not link or copy {}", _0.display())]
    Link(#[error(not(source))] PathBuf),
    #[display("HTTP client could not be built")]
    Client,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Connect(_) | ErrorKind::Read | ErrorKind::Truncated { .. })
    }
}
