use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration file {} does not exist", _0.display())]
    Missing(#[error(not(source))] PathBuf),
    #[display("unsupported configuration format: {}", _0.display())]
    Format(#[error(not(source))] PathBuf),
    #[display("configuration could not be loaded")]
    Load,
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] &'static str),
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        false
    }
}
