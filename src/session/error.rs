//! Session errors and the severity policy applied by the forwarding loops.
//!
//! Every I/O result inside a loop is reduced to an [`ErrorLevel`]: `None`
//! proceeds, `Transient` skips the current packet, `Fatal` ends the loop and
//! closes the session.

use crate::address::AddressError;
use crate::cipher::CipherError;
use crate::config::ConfigError;
use crate::transport::TransportError;
use crate::tun::TunError;
use std::io;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors related to session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already started")]
    AlreadyStarted,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("address error: {0}")]
    Address(#[from] AddressError),

    #[error("TUN error: {0}")]
    Tun(#[from] TunError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("interface error: {0}")]
    Interface(#[source] io::Error),

    #[error("interface closed")]
    InterfaceClosed,

    #[error("invalid packet: {0}")]
    InvalidPacket(#[source] CipherError),

    #[error("session closed")]
    Closed,
}

/// Severity of an operation's outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorLevel {
    /// Operation succeeded.
    None,
    /// Skip this packet and keep going.
    Transient,
    /// Stop the loop and tear down the session.
    Fatal,
}

impl SessionError {
    /// Classify this error.
    pub fn level(&self) -> ErrorLevel {
        match self {
            SessionError::InvalidPacket(_) => ErrorLevel::Transient,
            SessionError::Transport(e) => transport_level(e),
            SessionError::Interface(e) if e.kind() == io::ErrorKind::Interrupted => {
                ErrorLevel::Transient
            }
            _ => ErrorLevel::Fatal,
        }
    }
}

fn transport_level(err: &TransportError) -> ErrorLevel {
    match err {
        TransportError::NoPeer | TransportError::FrameTooLarge { .. } => ErrorLevel::Transient,
        TransportError::Io(e) => network_io_level(e),
        _ => ErrorLevel::Fatal,
    }
}

/// Classify a socket error.
///
/// Timeouts are always fatal. Conditions the kernel reports for a single
/// packet or a momentary resource shortage are transient.
///
/// `ConnectionRefused` is transient on purpose. On a connected UDP socket
/// it only reports an ICMP port unreachable for an earlier datagram, which
/// is what a peer that is restarting produces; treating it as fatal would
/// take the client down every time the server restarts.
///
/// Everything else, end-of-stream included, is fatal.
pub fn network_io_level(err: &io::Error) -> ErrorLevel {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorLevel::Fatal,
        io::ErrorKind::UnexpectedEof => ErrorLevel::Fatal,
        io::ErrorKind::Interrupted
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => ErrorLevel::Transient,
        _ => match err.raw_os_error() {
            Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOBUFS) => {
                ErrorLevel::Transient
            }
            _ => ErrorLevel::Fatal,
        },
    }
}

/// Log an error against its call site and return its level.
pub fn report(err: &SessionError, site: &'static str) -> ErrorLevel {
    let level = err.level();
    match (level, err) {
        (_, SessionError::Closed) => debug!(site, "session closed"),
        (ErrorLevel::Fatal, _) => warn!(site, error = %err, "fatal error"),
        _ => debug!(site, error = %err, "transient error"),
    }
    level
}

/// Classify an operation result, logging any error.
pub fn classify<T>(result: &Result<T, SessionError>, site: &'static str) -> ErrorLevel {
    match result {
        Ok(_) => ErrorLevel::None,
        Err(e) => report(e, site),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_err(kind: io::ErrorKind) -> io::Error {
        io::Error::new(kind, "test")
    }

    fn transport(kind: io::ErrorKind) -> SessionError {
        SessionError::Transport(TransportError::Io(io_err(kind)))
    }

    #[test]
    fn test_ok_is_none() {
        let ok: Result<usize, SessionError> = Ok(3);
        assert_eq!(classify(&ok, "test"), ErrorLevel::None);
    }

    #[test]
    fn test_timeout_is_fatal() {
        assert_eq!(transport(io::ErrorKind::TimedOut).level(), ErrorLevel::Fatal);
        assert_eq!(transport(io::ErrorKind::WouldBlock).level(), ErrorLevel::Fatal);
    }

    #[test]
    fn test_temporary_network_errors_are_transient() {
        for kind in [
            io::ErrorKind::Interrupted,
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
        ] {
            assert_eq!(transport(kind).level(), ErrorLevel::Transient, "{:?}", kind);
        }

        let nobufs = SessionError::Transport(TransportError::Io(io::Error::from_raw_os_error(
            libc::ENOBUFS,
        )));
        assert_eq!(nobufs.level(), ErrorLevel::Transient);
    }

    #[test]
    fn test_permanent_network_errors_are_fatal() {
        for kind in [
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::NotConnected,
            io::ErrorKind::AddrNotAvailable,
            io::ErrorKind::PermissionDenied,
        ] {
            assert_eq!(transport(kind).level(), ErrorLevel::Fatal, "{:?}", kind);
        }
        let badf = SessionError::Transport(TransportError::Io(io::Error::from_raw_os_error(
            libc::EBADF,
        )));
        assert_eq!(badf.level(), ErrorLevel::Fatal);
    }

    #[test]
    fn test_decode_rejection_is_transient() {
        let err = SessionError::InvalidPacket(CipherError::Authentication);
        assert_eq!(err.level(), ErrorLevel::Transient);

        let err = SessionError::InvalidPacket(CipherError::Truncated { expected: 40, got: 3 });
        assert_eq!(classify::<()>(&Err(err), "test"), ErrorLevel::Transient);
    }

    #[test]
    fn test_missing_peer_is_transient() {
        let err = SessionError::Transport(TransportError::NoPeer);
        assert_eq!(err.level(), ErrorLevel::Transient);
    }

    #[test]
    fn test_interface_errors_are_fatal() {
        for kind in [
            io::ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied,
            io::ErrorKind::InvalidInput,
            io::ErrorKind::Other,
        ] {
            assert_eq!(
                SessionError::Interface(io_err(kind)).level(),
                ErrorLevel::Fatal,
                "{:?}",
                kind
            );
        }
        assert_eq!(
            SessionError::Interface(io_err(io::ErrorKind::Interrupted)).level(),
            ErrorLevel::Transient
        );
        assert_eq!(SessionError::InterfaceClosed.level(), ErrorLevel::Fatal);
    }

    #[test]
    fn test_closed_and_setup_errors_are_fatal() {
        assert_eq!(SessionError::Closed.level(), ErrorLevel::Fatal);
        assert_eq!(SessionError::AlreadyStarted.level(), ErrorLevel::Fatal);
        assert_eq!(
            SessionError::Transport(TransportError::StartFailed("bind".into())).level(),
            ErrorLevel::Fatal
        );
    }
}
