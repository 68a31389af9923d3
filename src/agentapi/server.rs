//! Leader endpoint: serves the lock store over a Unix domain socket.

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{Request, Response, read_frame, write_frame};
use super::{ApiError, LockStore};

/// Pause after a transient accept failure. The listener stays readable while
/// the process is out of descriptors, so retrying at once would spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A bound leader endpoint, ready to [`serve`](Server::serve).
pub struct Server {
    path: PathBuf,
    listener: UnixListener,
    store: Arc<LockStore>,
}

impl Server {
    /// Bind a fresh, empty store at `path`.
    ///
    /// A leftover socket file with nobody listening behind it is replaced.
    /// If another leader still answers on `path`, binding fails with
    /// `AddrInUse` rather than stealing its address. Anything at `path` that
    /// is not a socket is left alone and binding fails.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self, ApiError> {
        Self::bind_with_store(path, Arc::new(LockStore::new()))
    }

    pub fn bind_with_store(
        path: impl Into<PathBuf>,
        store: Arc<LockStore>,
    ) -> Result<Self, ApiError> {
        let path = path.into();
        let bind_err = |source| ApiError::Bind {
            path: path.clone(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "path exists and is not a socket",
                )));
            }
            if std::os::unix::net::UnixStream::connect(&path).is_ok() {
                return Err(bind_err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    "another leader is already listening",
                )));
            }
            debug!("Removing stale leader socket at {}", path.display());
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        info!("Leader listening on {}", path.display());

        Ok(Self {
            path,
            listener,
            store,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared handle to the store, mainly for in-process inspection.
    pub fn store(&self) -> Arc<LockStore> {
        self.store.clone()
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// Each connection is handled on its own task; handlers only meet inside
    /// the store's critical section. On shutdown, open connections are
    /// cancelled and joined and the socket file is removed.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ApiError> {
        let mut connections = JoinSet::new();

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let store = self.store.clone();
                        let cancel = shutdown.child_token();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, store, cancel).await {
                                warn!("Leader connection ended with error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept leader connection: {}", e);
                        if is_fatal_accept_error(&e) {
                            break Err(ApiError::Transport(e));
                        }
                        if !pause_after_accept_error(&shutdown).await {
                            break Ok(());
                        }
                    }
                },
                // Reap finished handlers so the set does not grow unbounded.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };

        shutdown.cancel();
        while connections.join_next().await.is_some() {}

        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!("Failed to remove leader socket {}: {}", self.path.display(), e);
        }
        info!("Leader on {} shut down", self.path.display());

        result
    }
}

/// Serve requests from one client, in order, until it hangs up.
async fn handle_connection(
    stream: UnixStream,
    store: Arc<LockStore>,
    cancel: CancellationToken,
) -> Result<(), ApiError> {
    debug!("Leader connection opened");
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = read_frame::<_, Request>(&mut reader) => frame,
        };

        let (response, hang_up) = match frame {
            Ok(Some(request)) => (dispatch(&store, request), false),
            Ok(None) => break,
            Err(ApiError::Protocol(message)) => {
                debug!("Rejecting malformed request: {}", message);
                (Response::Error { message }, true)
            }
            Err(e) => return Err(e),
        };

        // A peer that stops reading must not hold up shutdown.
        let written = tokio::select! {
            _ = cancel.cancelled() => break,
            written = write_frame(&mut write_half, &response) => written,
        };
        if hang_up {
            // Best effort: the peer may already be gone.
            break;
        }
        written?;
    }

    debug!("Leader connection closed");
    Ok(())
}

fn dispatch(store: &LockStore, request: Request) -> Response {
    match request {
        Request::Get { key } => Response::Value {
            value: store.get(&key),
        },
        Request::CompareAndSwap { key, old, new } => {
            let (value, swapped) = store.compare_and_swap(&key, &old, &new);
            debug!(key = %key, swapped, "compare-and-swap");
            Response::Swap { value, swapped }
        }
    }
}

/// Wait out [`ACCEPT_ERROR_BACKOFF`]. False if `shutdown` fired first.
async fn pause_after_accept_error(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => true,
    }
}

// Per-connection failures (aborted handshakes, fd pressure) are transient;
// anything else means the listener itself is broken.
fn is_fatal_accept_error(e: &io::Error) -> bool {
    !matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    ) && e.raw_os_error() != Some(libc::EMFILE)
        && e.raw_os_error() != Some(libc::ENFILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    fn spawn_server(dir: &Path) -> (PathBuf, CancellationToken, tokio::task::JoinHandle<()>) {
        let path = dir.join("leader.sock");
        let server = Server::bind(&path).unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            server.serve(token).await.unwrap();
        });
        (path, shutdown, handle)
    }

    async fn exchange(stream: &mut UnixStream, line: &str) -> String {
        stream.write_all(line.as_bytes()).await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut response = String::new();
        reader.read_line(&mut response).await.unwrap();
        response
    }

    #[test]
    fn dispatch_maps_requests_onto_store() {
        let store = LockStore::new();
        let swap = dispatch(
            &store,
            Request::CompareAndSwap {
                key: "llama".into(),
                old: "".into(),
                new: "acquired".into(),
            },
        );
        assert_eq!(
            swap,
            Response::Swap {
                value: "".into(),
                swapped: true
            }
        );
        let get = dispatch(&store, Request::Get { key: "llama".into() });
        assert_eq!(
            get,
            Response::Value {
                value: "acquired".into()
            }
        );
    }

    #[tokio::test]
    async fn serves_requests_in_order_on_one_connection() {
        let tmp = tempfile::tempdir().unwrap();
        let (path, shutdown, handle) = spawn_server(tmp.path());

        let mut stream = UnixStream::connect(&path).await.unwrap();
        let first = exchange(
            &mut stream,
            "{\"op\":\"compare_and_swap\",\"key\":\"k\",\"old\":\"\",\"new\":\"v\"}\n",
        )
        .await;
        assert_eq!(first.trim(), r#"{"kind":"swap","value":"","swapped":true}"#);

        let second = exchange(&mut stream, "{\"op\":\"get\",\"key\":\"k\"}\n").await;
        assert_eq!(second.trim(), r#"{"kind":"value","value":"v"}"#);

        shutdown.cancel();
        handle.await.unwrap();
        assert!(!path.exists(), "socket file should be removed on shutdown");
    }

    #[tokio::test]
    async fn malformed_request_gets_error_and_hangup() {
        let tmp = tempfile::tempdir().unwrap();
        let (path, shutdown, handle) = spawn_server(tmp.path());

        let mut stream = UnixStream::connect(&path).await.unwrap();
        let response = exchange(&mut stream, "not json\n").await;
        let decoded: Response = serde_json::from_str(response.trim()).unwrap();
        assert!(matches!(decoded, Response::Error { .. }));

        // Other connections are unaffected.
        let mut other = UnixStream::connect(&path).await.unwrap();
        let ok = exchange(&mut other, "{\"op\":\"get\",\"key\":\"k\"}\n").await;
        assert_eq!(ok.trim(), r#"{"kind":"value","value":""}"#);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn rebinding_replaces_stale_socket() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("leader.sock");
        {
            let _stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
        }
        assert!(path.exists());

        let server = Server::bind(&path).unwrap();
        assert_eq!(server.path(), path.as_path());
    }

    #[tokio::test]
    async fn refuses_to_steal_a_live_socket() {
        let tmp = tempfile::tempdir().unwrap();
        let (path, shutdown, handle) = spawn_server(tmp.path());

        match Server::bind(&path) {
            Err(ApiError::Bind { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::AddrInUse)
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("second leader must not bind a live socket"),
        }

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_idle_connections() {
        let tmp = tempfile::tempdir().unwrap();
        let (path, shutdown, handle) = spawn_server(tmp.path());

        let _idle = UnixStream::connect(&path).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        shutdown.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("serve should return once handlers are cancelled")
            .unwrap();
    }

    #[tokio::test]
    async fn refuses_to_replace_a_regular_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("leader.sock");
        std::fs::write(&path, "not a socket").unwrap();

        match Server::bind(&path) {
            Err(ApiError::Bind { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::AlreadyExists)
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("bind must not delete a regular file"),
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not a socket");
    }

    #[test]
    fn descriptor_exhaustion_is_transient() {
        assert!(!is_fatal_accept_error(&io::Error::from_raw_os_error(
            libc::EMFILE
        )));
        assert!(!is_fatal_accept_error(&io::Error::from_raw_os_error(
            libc::ENFILE
        )));
        assert!(is_fatal_accept_error(&io::Error::from_raw_os_error(
            libc::EBADF
        )));
    }

    #[tokio::test]
    async fn accept_errors_back_off_until_shutdown() {
        let shutdown = CancellationToken::new();
        let started = tokio::time::Instant::now();
        assert!(pause_after_accept_error(&shutdown).await);
        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF);

        shutdown.cancel();
        let started = tokio::time::Instant::now();
        assert!(!pause_after_accept_error(&shutdown).await);
        assert!(started.elapsed() < ACCEPT_ERROR_BACKOFF);
    }

    #[tokio::test]
    async fn shutdown_does_not_wait_on_a_client_that_never_reads() {
        let tmp = tempfile::tempdir().unwrap();
        let (path, shutdown, handle) = spawn_server(tmp.path());

        let mut stream = UnixStream::connect(&path).await.unwrap();
        let big = "x".repeat(60 * 1024);
        let cas = format!(
            "{{\"op\":\"compare_and_swap\",\"key\":\"k\",\"old\":\"\",\"new\":\"{}\"}}\n",
            big
        );
        stream.write_all(cas.as_bytes()).await.unwrap();
        // Each reply carries the large value; none are read, so the leader's
        // writes back up once the socket buffer is full.
        let gets = "{\"op\":\"get\",\"key\":\"k\"}\n".repeat(200);
        stream.write_all(gets.as_bytes()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(3), handle)
            .await
            .expect("serve should return while a write is blocked")
            .unwrap();
        assert!(!path.exists());
        drop(stream);
    }
}
