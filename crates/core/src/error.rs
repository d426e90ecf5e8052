use thiserror::Error;

/// Errors surfaced by exchange adapters.
///
/// `NotSupported` is terminal for the (exchange, symbol) pair; everything
/// else is retried by the producer state machine.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("transient: {0}")]
    Transient(String),
}

impl AdapterError {
    pub fn is_not_supported(&self) -> bool {
        matches!(self, AdapterError::NotSupported(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AdapterError::Timeout(_))
    }
}

/// Truncate an error message for the logs
pub fn truncate_err(msg: &str) -> String {
    const MAX: usize = 200;
    if msg.len() > MAX {
        let mut cut = MAX;
        while !msg.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &msg[..cut])
    } else {
        msg.to_string()
    }
}
