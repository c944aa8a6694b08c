use std::io;

use crate::config::Protocol;

/// Errors surfaced by the relay core.
///
/// Per-connection I/O failures never show up here: a worker treats them as an
/// implicit disconnect and only logs them.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("failed to bind {protocol} listener on {addr}: {source}")]
    Bind {
        protocol: Protocol,
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("broadcast channel is closed")]
    ChannelClosed,

    #[error("unsupported protocol: {0} (expected tcp or udp)")]
    UnsupportedProtocol(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;

/// Whether an I/O error only means the peer went away.
///
/// These are expected on every disconnect and are logged at debug level.
pub(crate) fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_kinds() {
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_disconnect(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn bind_error_mentions_protocol_and_addr() {
        let err = ChatError::Bind {
            protocol: Protocol::Udp,
            addr: "0.0.0.0:8081".to_string(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        let msg = err.to_string();
        assert!(msg.contains("udp"));
        assert!(msg.contains("0.0.0.0:8081"));
    }
}
