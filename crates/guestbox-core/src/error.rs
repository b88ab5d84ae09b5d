use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuestBoxError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("missing asset: {0}")]
    MissingAsset(String),
    #[error("privileged access unavailable: {0}")]
    PrivilegeUnavailable(String),
    #[error("resource error: {0}")]
    Resource(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("component is already bound to an environment")]
    AlreadyBound,
}
