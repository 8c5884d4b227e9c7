use thiserror::Error;

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    #[error("Invalid address")]
    InvalidAddress,
    #[error("Invalid hex string: '{0}'")]
    InvalidHex(String),
    #[error("Unknown fork: '{0}'")]
    UnknownFork(String),
}
