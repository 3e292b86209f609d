//! One-shot HTTP server for the volume resource.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use volume_protocol::{build_response, content_length, Method, ProtocolError, RequestLine};

use crate::backend::VolumeBackend;
use crate::config::DaemonConfig;
use crate::router::Router;
use crate::{DaemonError, Result};

/// Pause after a failed `accept` so a persistent error (e.g. EMFILE) does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// HTTP server exposing one host's volume and mute state.
///
/// Every connection carries exactly one request and is closed after the
/// reply. Each connection is handled on its own task, so a slow peer never
/// holds up the accept loop or other peers.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use volume_daemon::{DaemonConfig, SoftwareBackend, VolumeServer};
///
/// #[tokio::main]
/// async fn main() -> Result<(), volume_daemon::DaemonError> {
///     let config = DaemonConfig::default();
///     let backend = Arc::new(SoftwareBackend::with_volume(config.initial_volume));
///
///     let server = VolumeServer::start(&config, backend).await?;
///     println!("Listening on {}", server.local_addr());
///
///     tokio::signal::ctrl_c().await?;
///     server.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct VolumeServer {
    local_addr: SocketAddr,
    shutdown_tx: Option<mpsc::Sender<()>>,
    server_handle: Option<JoinHandle<()>>,
}

/// Per-connection bounds taken from the config
#[derive(Debug, Clone, Copy)]
struct ConnectionLimits {
    request_timeout: Duration,
    max_head_bytes: usize,
    max_body_bytes: usize,
}

impl From<&DaemonConfig> for ConnectionLimits {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            max_head_bytes: config.max_head_bytes,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// Why a connection was closed without a reply
#[derive(Debug, Error)]
enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Malformed(#[from] ProtocolError),

    #[error("Connection closed before the request line was complete")]
    Truncated,

    #[error("Request head larger than {0} bytes")]
    HeadTooLarge(usize),

    #[error("Request body of {0} bytes exceeds the limit")]
    BodyTooLarge(usize),
}

/// What was read from the wire before routing
#[derive(Debug)]
struct Request {
    line: RequestLine,
    body: Vec<u8>,
}

impl VolumeServer {
    /// Bind the configured address and start accepting connections.
    ///
    /// Returns once the socket is bound, so connections made after this
    /// returns are queued even if the accept loop has not run yet.
    pub async fn start(
        config: &DaemonConfig,
        backend: Arc<dyn VolumeBackend>,
    ) -> Result<Self> {
        config.validate()?;

        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| DaemonError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let router = Router::new(backend, config.legacy_volume_endpoint);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let server_handle =
            Self::start_server(listener, router, ConnectionLimits::from(config), shutdown_rx);

        info!("Volume server listening on {}", local_addr);

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// Address the listener is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting connections and close the listening socket.
    ///
    /// Connections that were already accepted run to completion on their own
    /// tasks.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
    }

    fn start_server(
        listener: TcpListener,
        router: Router,
        limits: ConnectionLimits,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let router = router.clone();
                            tokio::spawn(handle_connection(stream, peer, router, limits));
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    },
                }
            }

            drop(listener);
            info!("Volume server stopped accepting connections");
        })
    }
}

impl Drop for VolumeServer {
    fn drop(&mut self) {
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    limits: ConnectionLimits,
) {
    match tokio::time::timeout(limits.request_timeout, serve(stream, &router, &limits)).await {
        Ok(Ok(())) => {}
        Ok(Err(ConnectionError::Io(e))) => {
            warn!("Connection from {} failed: {}", peer, e);
        }
        Ok(Err(e)) => {
            debug!("Closing connection from {} without reply: {}", peer, e);
        }
        Err(_) => {
            debug!(
                "Connection from {} timed out after {:?}",
                peer, limits.request_timeout
            );
        }
    }
}

async fn serve(
    mut stream: TcpStream,
    router: &Router,
    limits: &ConnectionLimits,
) -> std::result::Result<(), ConnectionError> {
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);

    let request = read_request(&mut reader, limits).await?;
    let reply = router
        .route(&request.line.method, &request.line.path, &request.body)
        .await;
    debug!(
        "{} {} -> {}",
        request.line.method,
        request.line.path,
        reply.to_body().trim_end()
    );

    write_half.write_all(&build_response(&reply)).await?;
    write_half.shutdown().await?;
    Ok(())
}

/// Read the request line, the headers and, for `POST`, the body
async fn read_request<R>(
    reader: &mut BufReader<R>,
    limits: &ConnectionLimits,
) -> std::result::Result<Request, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut remaining = limits.max_head_bytes;

    let line = match read_head_line(reader, &mut remaining).await? {
        HeadLine::Complete(line) => RequestLine::parse(&line)?,
        HeadLine::Partial(_) | HeadLine::Eof => return Err(ConnectionError::Truncated),
    };

    let mut body_len = 0;
    loop {
        match read_head_line(reader, &mut remaining).await? {
            HeadLine::Complete(header) => {
                if header.trim_end().is_empty() {
                    break;
                }
                if let Some(len) = content_length(&header) {
                    body_len = len;
                }
            }
            // Peer half-closed mid-headers: go with what arrived
            HeadLine::Partial(header) => {
                if let Some(len) = content_length(&header) {
                    body_len = len;
                }
                break;
            }
            HeadLine::Eof => break,
        }
    }

    let mut body = Vec::new();
    if line.method == Method::Post && body_len > 0 {
        if body_len > limits.max_body_bytes {
            return Err(ConnectionError::BodyTooLarge(body_len));
        }
        body.resize(body_len, 0);
        reader.read_exact(&mut body).await?;
    }

    Ok(Request { line, body })
}

enum HeadLine {
    /// A line terminated by `\n`
    Complete(String),
    /// Bytes followed by EOF with no terminator
    Partial(String),
    Eof,
}

/// Read one head line, charging its length against `remaining`
async fn read_head_line<R>(
    reader: &mut BufReader<R>,
    remaining: &mut usize,
) -> std::result::Result<HeadLine, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(*remaining as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    *remaining -= read;

    if read == 0 {
        return if *remaining == 0 {
            Err(ConnectionError::HeadTooLarge(0))
        } else {
            Ok(HeadLine::Eof)
        };
    }

    let text = String::from_utf8_lossy(&buf).into_owned();
    if buf.ends_with(b"\n") {
        Ok(HeadLine::Complete(text))
    } else if *remaining == 0 {
        Err(ConnectionError::HeadTooLarge(read))
    } else {
        Ok(HeadLine::Partial(text))
    }
}
