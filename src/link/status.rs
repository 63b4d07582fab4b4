use std::fmt;

use tokio_tungstenite::tungstenite;

/// Coarse outcome of a link stream, used to decide whether a failure is a
/// repeat of the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    Ok,
    Unavailable,
    DataLoss,
    Internal,
    Unknown,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Ok => "OK",
            LinkStatus::Unavailable => "UNAVAILABLE",
            LinkStatus::DataLoss => "DATA_LOSS",
            LinkStatus::Internal => "INTERNAL",
            LinkStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("connect failed: {0}")]
    Connect(#[source] tungstenite::Error),
    #[error("link handshake failed: {0}")]
    Handshake(String),
    #[error("transport error: {0}")]
    Transport(#[source] tungstenite::Error),
    #[error("stream closed by peer")]
    Closed,
}

impl LinkError {
    pub fn status(&self) -> LinkStatus {
        match self {
            LinkError::Connect(e) | LinkError::Transport(e) => transport_status(e),
            LinkError::Handshake(_) => LinkStatus::Internal,
            LinkError::Closed => LinkStatus::Unavailable,
        }
    }
}

fn transport_status(e: &tungstenite::Error) -> LinkStatus {
    match e {
        tungstenite::Error::Io(_)
        | tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed => LinkStatus::Unavailable,
        tungstenite::Error::Http(resp) if resp.status().is_server_error() => {
            LinkStatus::Unavailable
        }
        tungstenite::Error::Http(_)
        | tungstenite::Error::HttpFormat(_)
        | tungstenite::Error::Url(_)
        | tungstenite::Error::Protocol(_) => LinkStatus::Internal,
        tungstenite::Error::Capacity(_) => LinkStatus::DataLoss,
        _ => LinkStatus::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_unavailable() {
        let err = LinkError::Connect(tungstenite::Error::Io(std::io::Error::from(
            std::io::ErrorKind::ConnectionRefused,
        )));
        assert_eq!(err.status(), LinkStatus::Unavailable);
    }

    #[test]
    fn test_peer_close_is_unavailable() {
        assert_eq!(LinkError::Closed.status(), LinkStatus::Unavailable);
        assert_eq!(
            LinkError::Transport(tungstenite::Error::ConnectionClosed).status(),
            LinkStatus::Unavailable
        );
    }

    #[test]
    fn test_rejected_handshake_is_internal() {
        let err = LinkError::Handshake("write failed".into());
        assert_eq!(err.status(), LinkStatus::Internal);
        assert_eq!(err.status().to_string(), "INTERNAL");
    }
}
