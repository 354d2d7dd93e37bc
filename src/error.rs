use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetblockError {
    #[error("Insufficient privileges to modify the firewall. Run as administrator/root.")]
    PrivilegeRequired,

    #[error("Invalid endpoint address: {0}")]
    InvalidEndpoint(String),

    #[error("Refusing to pass unsafe argument to the shell: {0}")]
    UnsafeArgument(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Command `{command}` timed out after {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetblockError>;
