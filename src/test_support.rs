use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agentapi::{Client, Context, LockStore, Server, leader_path};

/// A leader endpoint serving from a private temporary sockets directory.
///
/// Must be started inside a tokio runtime.
pub(crate) struct TestLeader {
    pub(crate) dir: TempDir,
    pub(crate) path: PathBuf,
    pub(crate) store: Arc<LockStore>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestLeader {
    pub(crate) fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let path = leader_path(dir.path());
        let server = Server::bind(&path).unwrap();
        let store = server.store();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            server.serve(token).await.unwrap();
        });
        Self {
            dir,
            path,
            store,
            shutdown,
            handle,
        }
    }

    pub(crate) fn sockets_dir(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) async fn client(&self) -> Client {
        Client::new(&Context::background(), &self.path).await.unwrap()
    }

    pub(crate) async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap();
    }
}
