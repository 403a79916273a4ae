//! Systemd service integration
//!
//! Minimal sd-notify support so the daemon can run as a `Type=notify`
//! unit: readiness, shutdown and a status line with the attached boards.

use anyhow::{Context, Result};
use std::env;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use tracing::debug;

/// State reported to the service manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdState {
    Ready,
    Stopping,
    Status(String),
}

impl SdState {
    fn message(&self) -> String {
        match self {
            SdState::Ready => "READY=1".to_string(),
            SdState::Stopping => "STOPPING=1".to_string(),
            SdState::Status(status) => format!("STATUS={}", status),
        }
    }
}

/// Check if running under systemd
pub fn is_systemd() -> bool {
    env::var_os("NOTIFY_SOCKET").is_some()
}

/// Send `state` to `$NOTIFY_SOCKET`; a no-op outside systemd
pub fn notify(state: SdState) -> Result<()> {
    match env::var_os("NOTIFY_SOCKET") {
        Some(socket_path) => notify_to(Path::new(&socket_path), &state),
        None => {
            debug!("NOTIFY_SOCKET not set, skipping {:?}", state);
            Ok(())
        }
    }
}

fn notify_to(socket_path: &Path, state: &SdState) -> Result<()> {
    let socket = UnixDatagram::unbound().context("Failed to create Unix socket")?;
    socket
        .send_to(state.message().as_bytes(), socket_path)
        .with_context(|| format!("Failed to send {:?} to systemd", state))?;
    debug!("Notified systemd: {}", state.message());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(SdState::Ready.message(), "READY=1");
        assert_eq!(SdState::Stopping.message(), "STOPPING=1");
        assert_eq!(
            SdState::Status("2 boards attached".to_string()).message(),
            "STATUS=2 boards attached"
        );
    }

    #[test]
    fn test_notify_to_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify.sock");
        let listener = UnixDatagram::bind(&path).unwrap();

        notify_to(&path, &SdState::Ready).unwrap();

        let mut buf = [0u8; 64];
        let n = listener.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"READY=1");
    }

    #[test]
    fn test_notify_to_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        assert!(notify_to(&dir.path().join("absent.sock"), &SdState::Stopping).is_err());
    }
}
