//! Typed client for the leader endpoint.

use std::path::{Path, PathBuf};

use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::trace;

use super::protocol::{Request, Response, read_frame, write_frame};
use super::{ApiError, Context};

/// Connection to the leader, reused across calls.
///
/// Calls on one client are serialized, which keeps request/response pairs
/// aligned on the shared connection. A connection that saw an error or was
/// abandoned by a cancelled call is dropped and the next call redials.
pub struct Client {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    /// Dial the leader at `path`.
    ///
    /// Fails fast with [`ApiError::LeaderUnavailable`] when nothing is
    /// listening, so callers can report "no leader running".
    pub async fn new(ctx: &Context, path: impl Into<PathBuf>) -> Result<Self, ApiError> {
        let path = path.into();
        let conn = ctx.run(Connection::open(&path)).await?;
        Ok(Self {
            path,
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current value of `key`; an unheld key yields the empty string.
    pub async fn lock_get(&self, ctx: &Context, key: &str) -> Result<String, ApiError> {
        let request = Request::Get {
            key: key.to_string(),
        };
        self.round_trip(ctx, &request, |response| match response {
            Response::Value { value } => Ok(value),
            other => Err(other),
        })
        .await
    }

    /// Atomically replace `old` with `new` for `key`.
    ///
    /// Returns the value observed before the call and whether it was swapped.
    pub async fn lock_compare_and_swap(
        &self,
        ctx: &Context,
        key: &str,
        old: &str,
        new: &str,
    ) -> Result<(String, bool), ApiError> {
        let request = Request::CompareAndSwap {
            key: key.to_string(),
            old: old.to_string(),
            new: new.to_string(),
        };
        self.round_trip(ctx, &request, |response| match response {
            Response::Swap { value, swapped } => Ok((value, swapped)),
            other => Err(other),
        })
        .await
    }

    /// Send `request` and decode the reply with `decode`, which hands back
    /// responses of the wrong kind.
    async fn round_trip<T>(
        &self,
        ctx: &Context,
        request: &Request,
        decode: impl FnOnce(Response) -> Result<T, Response>,
    ) -> Result<T, ApiError> {
        // Waiting for another call on this client is a suspension point too.
        let mut slot = ctx.run(async { Ok(self.conn.lock().await) }).await?;

        // Taken out of the slot so that any early return below drops it.
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => {
                trace!("Redialing leader at {}", self.path.display());
                ctx.run(Connection::open(&self.path)).await?
            }
        };

        let response = ctx.run(conn.exchange(request)).await?;
        let value = match response {
            Response::Error { message } => return Err(ApiError::Rejected(message)),
            other => decode(other).map_err(|other| unexpected(request, &other))?,
        };

        *slot = Some(conn);
        Ok(value)
    }
}

impl Connection {
    async fn open(path: &Path) -> Result<Self, ApiError> {
        let stream =
            UnixStream::connect(path)
                .await
                .map_err(|source| ApiError::LeaderUnavailable {
                    path: path.to_path_buf(),
                    source,
                })?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
        })
    }

    async fn exchange(&mut self, request: &Request) -> Result<Response, ApiError> {
        write_frame(&mut self.writer, request).await?;
        match read_frame(&mut self.reader).await? {
            Some(response) => Ok(response),
            None => Err(ApiError::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "leader closed the connection",
            ))),
        }
    }
}

fn unexpected(request: &Request, response: &Response) -> ApiError {
    ApiError::Protocol(format!(
        "unexpected response {:?} to request {:?}",
        response, request
    ))
}
