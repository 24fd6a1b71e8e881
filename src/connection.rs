//! Connection lifecycle: one live channel to the host at a time.

use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::dispatch_frame;
use crate::config::Limits;
use crate::error::{BridgeError, FrameError, Result};
use crate::message::Request;
use crate::pending::PendingTable;
use crate::transport::{encode_message, FrameReader, FrameWriter};

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An open duplex byte channel to the host.
pub struct Channel {
    reader: BoxReader,
    writer: BoxWriter,
    child: Option<Child>,
}

impl Channel {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }

    /// Keep `child` alive for as long as the channel is in use.
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }
}

/// Opens channels to the host.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = io::Result<Channel>> + Send;
}

/// Spawns the host program and talks to it over its stdin/stdout.
#[derive(Debug, Clone)]
pub struct ProcessConnector {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessConnector {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl Connector for ProcessConnector {
    async fn connect(&self) -> io::Result<Channel> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "host stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "host stdout unavailable"))?;
        info!(program = %self.program.display(), pid = ?child.id(), "spawned native host");
        Ok(Channel::new(stdout, stdin).with_child(child))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// A request already encoded, waiting for the writer task.
struct Outgoing {
    id: u64,
    frame: Vec<u8>,
}

/// Live-connection state guarded by the manager's lock.
///
/// Holding the guard serializes id allocation and queueing, so frames reach
/// the host in id order. No I/O happens under the guard except `connect`.
pub(crate) struct Link {
    state: ConnectionState,
    outbox: Option<mpsc::UnboundedSender<Outgoing>>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
    child: Option<Child>,
    next_id: u64,
    generation: u64,
    max_outgoing: usize,
}

impl Link {
    /// Pre-increment: the first id of every connection is 1.
    pub(crate) fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Encode `request` and queue it for the writer task. Returns the frame length.
    pub(crate) fn enqueue(&self, request: &Request) -> std::result::Result<usize, FrameError> {
        let frame = encode_message(request, self.max_outgoing)?;
        let outbox = self.outbox.as_ref().ok_or_else(|| {
            FrameError::Io(io::Error::new(io::ErrorKind::NotConnected, "no live channel"))
        })?;
        let len = frame.len();
        outbox
            .send(Outgoing {
                id: request.id,
                frame,
            })
            .map_err(|_| {
                FrameError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "host writer stopped"))
            })?;
        Ok(len)
    }

    /// May abort the calling task; callers return right after.
    fn teardown(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.outbox = None;
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}

struct Shared {
    link: Mutex<Link>,
    pending: PendingTable,
}

/// Owns the connect/disconnect transitions and the inbound listener.
pub struct ConnectionManager<C> {
    connector: C,
    shared: Arc<Shared>,
    limits: Limits,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, pending: PendingTable, limits: Limits) -> Self {
        Self {
            connector,
            shared: Arc::new(Shared {
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    outbox: None,
                    reader_task: None,
                    writer_task: None,
                    child: None,
                    next_id: 0,
                    generation: 0,
                    max_outgoing: limits.max_outgoing_bytes,
                }),
                pending,
            }),
            limits,
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.link.lock().await.state
    }

    /// Open the channel if needed. A no-op when already connected.
    pub async fn connect(&self) -> Result<()> {
        let mut link = self.shared.link.lock().await;
        self.connect_locked(&mut link).await
    }

    /// Lock the link, connecting first if necessary.
    pub(crate) async fn lock_connected(&self) -> Result<MutexGuard<'_, Link>> {
        let mut link = self.shared.link.lock().await;
        self.connect_locked(&mut link).await?;
        Ok(link)
    }

    async fn connect_locked(&self, link: &mut Link) -> Result<()> {
        if link.state == ConnectionState::Connected {
            return Ok(());
        }
        let channel = self.connector.connect().await.map_err(|e| {
            warn!(error = %e, "native host connect failed");
            BridgeError::Connect(Arc::new(e))
        })?;

        link.generation += 1;
        link.next_id = 0;
        link.child = channel.child;

        let (outbox, queue) = mpsc::unbounded_channel();
        let writer = FrameWriter::new(channel.writer, self.limits.max_outgoing_bytes);
        link.outbox = Some(outbox);
        link.writer_task = Some(tokio::spawn(write_queued(
            Arc::clone(&self.shared),
            writer,
            queue,
            link.generation,
        )));

        let reader = FrameReader::new(channel.reader, self.limits.max_incoming_bytes);
        link.reader_task = Some(tokio::spawn(listen(
            Arc::clone(&self.shared),
            reader,
            link.generation,
        )));
        link.state = ConnectionState::Connected;
        info!(generation = link.generation, "connected to native host");
        Ok(())
    }

    /// Close the channel and forget any pending requests.
    pub async fn disconnect(&self) {
        let mut link = self.shared.link.lock().await;
        let was_connected = link.state == ConnectionState::Connected;
        link.teardown();
        let cleared = self.shared.pending.clear();
        if was_connected {
            info!(generation = link.generation, cleared, "disconnected from native host");
        }
    }
}

impl<C> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        if let Ok(mut link) = self.shared.link.try_lock() {
            link.teardown();
        }
        self.shared.pending.clear();
    }
}

/// Outbound writer: the only task that writes to the host.
///
/// A host that stops reading parks this task, never a caller. A write error
/// fails the request being written and then the whole connection, since a
/// partial frame may already be on the wire.
async fn write_queued(
    shared: Arc<Shared>,
    mut writer: FrameWriter<BoxWriter>,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    generation: u64,
) {
    while let Some(Outgoing { id, frame }) = queue.recv().await {
        match writer.write_frame(&frame).await {
            Ok(len) => debug!(id, len, "request sent"),
            Err(e) => {
                warn!(generation, id, error = %e, "failed to send request; dropping connection");
                let mut link = shared.link.lock().await;
                // After a reconnect the id may belong to the new connection.
                if link.generation == generation {
                    shared.pending.reject(
                        id,
                        BridgeError::Send {
                            id,
                            source: Arc::new(e),
                        },
                    );
                }
                close_link(&shared, &mut link, generation, BridgeError::ConnectionLost);
                return;
            }
        }
    }
}

/// Inbound listener: feeds frames to the dispatcher until the host goes away.
async fn listen(shared: Arc<Shared>, mut reader: FrameReader<BoxReader>, generation: u64) {
    let failure = loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => dispatch_frame(&shared.pending, &frame),
            Ok(None) => {
                info!(generation, "native host closed the channel");
                break BridgeError::ConnectionLost;
            }
            Err(e) => {
                warn!(generation, error = %e, "framing error from native host; dropping connection");
                break BridgeError::Framing(Arc::new(e));
            }
        }
    };
    peer_closed(&shared, generation, failure).await;
}

async fn peer_closed(shared: &Shared, generation: u64, failure: BridgeError) {
    let mut link = shared.link.lock().await;
    close_link(shared, &mut link, generation, failure);
}

/// Tear down `generation` if it is still the live connection and fail
/// everything it left pending.
fn close_link(shared: &Shared, link: &mut Link, generation: u64, failure: BridgeError) {
    if link.generation != generation || link.state == ConnectionState::Disconnected {
        return;
    }
    link.teardown();
    let failed = shared.pending.drain_all_with_error(failure);
    if failed > 0 {
        warn!(generation, failed, "failed in-flight requests after disconnect");
    }
}
