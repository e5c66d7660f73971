//! Fatal errors of a run.
//!
//! Everything that goes wrong with a single resource, or with the cache, is
//! handled where it happens and never reaches this level.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No usable session credential was supplied.
    #[display("no usable credential")]
    Credential,
    /// The list of courses could not be retrieved.
    #[display("course list unavailable")]
    CourseList,
    #[display("transport could not be set up")]
    Transport,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::CourseList)
    }
}
