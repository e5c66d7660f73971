use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not read {} for checksumming", _0.display())]
    Read(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        false
    }
}
