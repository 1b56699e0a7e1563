//! IPC Transport
//!
//! Two connectionless Unix datagram sockets stand in for the antenna: a
//! bound receive endpoint and an unbound send endpoint addressed at the
//! peer's rendezvous path. The role decides the path pairing, base station
//! binds the server path and sends to the client path, mobile the reverse,
//! loopback binds and sends to the same path.
//!
//! Rendezvous paths default to well-known locations under /tmp so that
//! containerized peers can share them, and can be overridden per process
//! by environment or per device by configuration.

use std::fs;
use std::io::{self, ErrorKind};
use std::net::Shutdown;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

use common::NodeRole;
use tracing::{info, warn};

use crate::RadioError;

/// Default rendezvous path bound by the base station role.
pub const DEFAULT_SERVER_PATH: &str = "/tmp/ipcrf-server.sock";

/// Default rendezvous path bound by the mobile and loopback roles.
pub const DEFAULT_CLIENT_PATH: &str = "/tmp/ipcrf-client.sock";

/// Environment override for the server rendezvous path.
pub const SERVER_PATH_ENV: &str = "IPCRF_SERVER_SOCK";

/// Environment override for the client rendezvous path.
pub const CLIENT_PATH_ENV: &str = "IPCRF_CLIENT_SOCK";

/// Result of one transmit attempt.
#[derive(Debug)]
pub enum SendOutcome {
    /// The full frame went out in one datagram.
    Sent(usize),
    /// The outbound socket still holds unconsumed data, the frame was
    /// discarded rather than queued behind it.
    Backlogged { pending_bytes: usize },
    /// The peer is not listening yet (absent path, refused, would-block).
    /// Recoverable, the frame is dropped and the link keeps running.
    NotReady(io::Error),
}

/// The pair of datagram endpoints backing one radio link.
pub struct IpcTransport {
    rx: UnixDatagram,
    tx: UnixDatagram,
    local: PathBuf,
    remote: PathBuf,
}

fn resolve_path(configured: Option<&Path>, env_var: &str, default: &str) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    match std::env::var_os(env_var) {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(default),
    }
}

/// Unlink a stale rendezvous file left behind by an earlier run.
///
/// A missing file is the normal case. A permission failure is a
/// deployment problem the process cannot fix, so it is surfaced as a
/// configuration error.
fn remove_stale(path: &Path) -> Result<(), RadioError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) if err.kind() == ErrorKind::PermissionDenied => Err(RadioError::Config(format!(
            "cannot unlink {}: {err}; check file permissions and privilege",
            path.display()
        ))),
        Err(err) => Err(RadioError::Transport(format!(
            "cannot unlink {}: {err}",
            path.display()
        ))),
    }
}

impl IpcTransport {
    /// Create both endpoints and bind the receive side for `role`.
    ///
    /// The receive socket is left in blocking mode, it is only ever read
    /// from the dedicated receive worker.
    pub fn open(
        role: NodeRole,
        server_path: Option<&Path>,
        client_path: Option<&Path>,
    ) -> Result<Self, RadioError> {
        let server = resolve_path(server_path, SERVER_PATH_ENV, DEFAULT_SERVER_PATH);
        let client = resolve_path(client_path, CLIENT_PATH_ENV, DEFAULT_CLIENT_PATH);

        let (local, remote) = match role {
            NodeRole::BaseStation => (server, client),
            NodeRole::Mobile => (client, server),
            NodeRole::Loopback => (client.clone(), client),
        };

        remove_stale(&local)?;

        let rx = UnixDatagram::bind(&local).map_err(|err| match err.kind() {
            ErrorKind::PermissionDenied => RadioError::Config(format!(
                "cannot bind {}: {err}; check directory permissions and privilege",
                local.display()
            )),
            _ => RadioError::Transport(format!("cannot bind {}: {err}", local.display())),
        })?;
        rx.set_nonblocking(false)
            .map_err(|err| RadioError::Transport(format!("cannot set blocking mode: {err}")))?;

        let tx = UnixDatagram::unbound()
            .map_err(|err| RadioError::Transport(format!("cannot create send socket: {err}")))?;

        info!(role = %role, local = %local.display(), remote = %remote.display(),
              "ipc transport open");

        Ok(Self { rx, tx, local, remote })
    }

    /// Path the receive socket is bound to.
    pub fn local_path(&self) -> &Path {
        &self.local
    }

    /// Path transmissions are addressed to.
    pub fn remote_path(&self) -> &Path {
        &self.remote
    }

    /// Duplicate the receive socket handle for the receive worker.
    pub fn try_clone_rx(&self) -> io::Result<UnixDatagram> {
        self.rx.try_clone()
    }

    /// Unblock a worker parked in a receive call.
    pub fn shutdown_rx(&self) {
        let _ = self.rx.shutdown(Shutdown::Read);
    }

    /// Bytes still queued on the outbound socket, i.e. sent datagrams the
    /// peer has not consumed yet.
    fn outbound_backlog(&self) -> io::Result<usize> {
        let mut pending: libc::c_int = 0;
        // SAFETY: TIOCOUTQ reads the socket send-queue size into an int
        // owned by this frame.
        let rc = unsafe { libc::ioctl(self.tx.as_raw_fd(), libc::TIOCOUTQ as _, &mut pending) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(pending.max(0) as usize)
        }
    }

    /// Transmit one framed message as a single atomic datagram.
    ///
    /// A non-empty outbound backlog means the peer cannot keep up, queuing
    /// more only increases staleness, so the frame is discarded instead.
    /// Short writes are errors, a datagram either goes out whole or not at
    /// all.
    pub fn send_frame(&self, frame: &[u8]) -> Result<SendOutcome, RadioError> {
        match self.outbound_backlog() {
            Ok(0) => {}
            Ok(pending_bytes) => return Ok(SendOutcome::Backlogged { pending_bytes }),
            Err(err) => warn!("outbound backlog query failed: {err}"),
        }

        match self.tx.send_to(frame, &self.remote) {
            Ok(n) if n == frame.len() => Ok(SendOutcome::Sent(n)),
            Ok(n) => Err(RadioError::Transport(format!(
                "short write, {n} of {} bytes",
                frame.len()
            ))),
            Err(err) => match err.kind() {
                ErrorKind::WouldBlock
                | ErrorKind::NotConnected
                | ErrorKind::ConnectionRefused
                | ErrorKind::NotFound => Ok(SendOutcome::NotReady(err)),
                ErrorKind::PermissionDenied => Err(RadioError::Config(format!(
                    "send to {} denied: {err}; check file permissions and privilege",
                    self.remote.display()
                ))),
                _ => Err(RadioError::Transport(format!(
                    "send to {} failed: {err}",
                    self.remote.display()
                ))),
            },
        }
    }
}

impl Drop for IpcTransport {
    fn drop(&mut self) {
        // Leave nothing behind for the next open to trip over.
        let _ = fs::remove_file(&self.local);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ipcrf-transport-{}-{tag}.sock", std::process::id()))
    }

    #[test]
    fn test_role_selects_path_pairing() {
        let server = test_path("pair-s");
        let client = test_path("pair-c");

        let t = IpcTransport::open(NodeRole::BaseStation, Some(&server), Some(&client)).unwrap();
        assert_eq!(t.local_path(), server.as_path());
        assert_eq!(t.remote_path(), client.as_path());
        drop(t);

        let t = IpcTransport::open(NodeRole::Mobile, Some(&server), Some(&client)).unwrap();
        assert_eq!(t.local_path(), client.as_path());
        assert_eq!(t.remote_path(), server.as_path());
        drop(t);

        let t = IpcTransport::open(NodeRole::Loopback, Some(&server), Some(&client)).unwrap();
        assert_eq!(t.local_path(), t.remote_path());
    }

    #[test]
    fn test_reopen_after_drop_leaves_no_artifacts() {
        let server = test_path("reopen-s");
        let client = test_path("reopen-c");

        let t = IpcTransport::open(NodeRole::BaseStation, Some(&server), Some(&client)).unwrap();
        assert!(server.exists());
        drop(t);
        assert!(!server.exists());

        // A second open in the same role must succeed on a clean slate.
        let t = IpcTransport::open(NodeRole::BaseStation, Some(&server), Some(&client)).unwrap();
        drop(t);
    }

    #[test]
    fn test_open_unlinks_stale_rendezvous_file() {
        let server = test_path("stale-s");
        let client = test_path("stale-c");
        fs::write(&server, b"stale").unwrap();

        let t = IpcTransport::open(NodeRole::BaseStation, Some(&server), Some(&client)).unwrap();
        drop(t);
        let _ = fs::remove_file(&client);
    }

    #[test]
    fn test_send_without_peer_is_not_ready() {
        let server = test_path("nopeer-s");
        let client = test_path("nopeer-c");

        let t = IpcTransport::open(NodeRole::BaseStation, Some(&server), Some(&client)).unwrap();
        match t.send_frame(&[0u8; 64]).unwrap() {
            SendOutcome::NotReady(_) => {}
            other => panic!("expected NotReady, got {other:?}"),
        }
    }

    #[test]
    fn test_backlogged_frame_is_discarded() {
        let server = test_path("backlog-s");
        let client = test_path("backlog-c");

        // Bind the peer path but never read from it, so the first datagram
        // stays charged to the sender's outbound queue.
        let peer = UnixDatagram::bind(&client).unwrap();
        let t = IpcTransport::open(NodeRole::BaseStation, Some(&server), Some(&client)).unwrap();

        match t.send_frame(&[1u8; 256]).unwrap() {
            SendOutcome::Sent(n) => assert_eq!(n, 256),
            other => panic!("expected Sent, got {other:?}"),
        }
        match t.send_frame(&[2u8; 256]).unwrap() {
            SendOutcome::Backlogged { pending_bytes } => assert!(pending_bytes > 0),
            other => panic!("expected Backlogged, got {other:?}"),
        }

        drop(peer);
        let _ = fs::remove_file(&client);
    }
}
