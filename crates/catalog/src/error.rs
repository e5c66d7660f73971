use derive_more::{Display, Error};
use lectern_model::CourseId;
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The candidate belongs to a course that was not registered for this run.
    #[display("unknown course: {_0}")]
    UnknownCourse(#[error(not(source))] CourseId),
    #[display("could not create directory {}", _0.display())]
    Directory(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Directory(_))
    }
}
