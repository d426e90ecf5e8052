use thiserror::Error;

/// Bus publish/consume failures.
///
/// `Transient` is worth retrying at the call site; `Fatal` bubbles up and
/// terminates the worker. The in-process backend never fails.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("transient bus error: {0}")]
    Transient(String),
    #[error("fatal bus error: {0}")]
    Fatal(String),
}

impl BusError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Transient(_))
    }
}

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() || err.is_connection_dropped() || err.is_io_error() {
            BusError::Transient(err.to_string())
        } else {
            BusError::Fatal(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Fatal(format!("message encode: {err}"))
    }
}
