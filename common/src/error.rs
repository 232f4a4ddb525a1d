use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifxError {
    #[error("LIFX token must be 64 characters")]
    InvalidToken,
    #[error("invalid scene: {0}")]
    InvalidScene(&'static str),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("no lights found")]
    NoLights,
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
#[error("led output failed: {0}")]
pub struct LedError(pub String);

#[derive(Debug, Error)]
#[error("wifi link error: {0}")]
pub struct WifiError(pub String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{role} pin GPIO{pin} {reason}")]
    InvalidPin {
        role: &'static str,
        pin: i32,
        reason: &'static str,
    },
    #[error("GPIO{pin} assigned to both {first} and {second}")]
    DuplicatePin {
        pin: i32,
        first: &'static str,
        second: &'static str,
    },
}
