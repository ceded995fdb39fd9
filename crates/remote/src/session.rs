//! Transport session: owns one byte stream and drives its I/O.
//!
//! A session runs a single driver task that performs every read and write on
//! the stream. Other tasks only reach the stream through a [`SessionHandle`],
//! which enqueues outgoing buffers and triggers close.

use crate::error::{Error, Result};
use crate::layer::{Deliver, Transmit};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long a closing session keeps trying to flush queued writes.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Reading and writing.
    Open,
    /// Close requested; the driver is flushing and shutting down.
    Closing,
    /// Socket released.
    Closed,
}

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity reserved for each socket read.
    pub read_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 8 * 1024,
        }
    }
}

struct Shared {
    id: u64,
    state: watch::Sender<SessionState>,
    outgoing: mpsc::UnboundedSender<Bytes>,
    shutdown: CancellationToken,
}

impl Shared {
    fn begin_close(&self) -> bool {
        let initiated = self.state.send_if_modified(|state| {
            if *state == SessionState::Open {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        });
        if initiated {
            debug!("Session {} closing", self.id);
            self.shutdown.cancel();
        }
        initiated
    }
}

/// A session that has not started reading yet.
pub struct Session {
    shared: Arc<Shared>,
    reader: BoxedReader,
    writer: BoxedWriter,
    outgoing_rx: mpsc::UnboundedReceiver<Bytes>,
    config: SessionConfig,
}

impl Session {
    /// Wrap a connected stream.
    pub fn new<S>(stream: S, config: &SessionConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        static NEXT_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

        let (reader, writer) = tokio::io::split(stream);
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Open);

        Self {
            shared: Arc::new(Shared {
                id: NEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
                state,
                outgoing,
                shutdown: CancellationToken::new(),
            }),
            reader: Box::new(reader),
            writer: Box::new(writer),
            outgoing_rx,
            config: config.clone(),
        }
    }

    /// Handle for sending and closing, usable before the session starts.
    ///
    /// Buffers sent before [`Session::start`] are queued and flushed once the
    /// driver runs.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Spawn the driver task and begin reading.
    ///
    /// Every successful read is handed to `upward` as-is.
    pub fn start<D: Deliver>(self, upward: D) -> SessionHandle {
        let handle = self.handle();
        let Self {
            shared,
            reader,
            writer,
            outgoing_rx,
            config,
        } = self;

        debug!("Session {} started", shared.id);
        tokio::spawn(drive(shared, reader, writer, outgoing_rx, config, upward));

        handle
    }
}

async fn drive<D: Deliver>(
    shared: Arc<Shared>,
    reader: BoxedReader,
    writer: BoxedWriter,
    outgoing_rx: mpsc::UnboundedReceiver<Bytes>,
    config: SessionConfig,
    mut upward: D,
) {
    tokio::join!(
        read_loop(&shared, reader, config.read_buffer_size, &mut upward),
        write_loop(&shared, writer, outgoing_rx),
    );

    upward.closed();
    shared.state.send_replace(SessionState::Closed);
    debug!("Session {} closed", shared.id);
}

async fn read_loop<D: Deliver>(
    shared: &Shared,
    mut reader: BoxedReader,
    buffer_size: usize,
    upward: &mut D,
) {
    let mut buf = BytesMut::with_capacity(buffer_size);

    loop {
        buf.reserve(buffer_size);
        tokio::select! {
            () = shared.shutdown.cancelled() => break,
            result = reader.read_buf(&mut buf) => match result {
                Ok(0) => {
                    debug!("Session {} reached end of stream", shared.id);
                    break;
                }
                Ok(_) => {
                    if let Err(e) = upward.deliver(buf.split().freeze()) {
                        warn!("Session {} rejected inbound data: {}", shared.id, e);
                        break;
                    }
                }
                Err(e) => {
                    warn!("Session {} read failed: {}", shared.id, e);
                    break;
                }
            }
        }
    }

    shared.begin_close();
}

async fn write_loop(
    shared: &Shared,
    mut writer: BoxedWriter,
    mut outgoing_rx: mpsc::UnboundedReceiver<Bytes>,
) {
    let flush = async {
        loop {
            tokio::select! {
                biased;
                data = outgoing_rx.recv() => match data {
                    Some(data) => writer.write_all(&data).await?,
                    None => break,
                },
                () = shared.shutdown.cancelled() => break,
            }
        }
        // Best-effort flush of whatever was queued before the close.
        while let Ok(data) = outgoing_rx.try_recv() {
            writer.write_all(&data).await?;
        }
        writer.flush().await
    };
    let deadline = async {
        shared.shutdown.cancelled().await;
        tokio::time::sleep(CLOSE_FLUSH_TIMEOUT).await;
    };

    tokio::select! {
        result = flush => {
            if let Err(e) = result {
                warn!("Session {} write failed: {}", shared.id, e);
                shared.begin_close();
            }
        }
        () = deadline => {
            debug!("Session {} abandoned unflushed writes", shared.id);
        }
    }

    outgoing_rx.close();
    let _ = writer.shutdown().await;
}

/// Send/close control surface of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Numeric id used in logs.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Wait until the session reaches [`SessionState::Closed`].
    pub async fn wait_closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
    }
}

impl Transmit for SessionHandle {
    fn send(&self, data: Bytes) -> Result<()> {
        if self.state() != SessionState::Open {
            return Err(Error::Disconnected);
        }
        self.shared
            .outgoing
            .send(data)
            .map_err(|_| Error::Disconnected)
    }

    fn close(&self) -> bool {
        self.shared.begin_close()
    }

    fn is_closed(&self) -> bool {
        self.state() != SessionState::Open
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}
