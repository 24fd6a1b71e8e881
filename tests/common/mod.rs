#![allow(dead_code)]

use std::collections::HashMap;
use std::env;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use keepass_bridge::host::{serve, Router};
use keepass_bridge::transport::{FrameReader, FrameWriter, MAX_FROM_HOST, MAX_TO_HOST};
use keepass_bridge::{Channel, Connector, Request, Response};
use tokio::io::{AsyncWrite, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

/// Env guard that restores previous env vars on drop.
pub struct EnvGuard {
    old: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn set(vars: &[(&str, String)]) -> Self {
        let mut old = HashMap::new();
        for (k, v) in vars {
            old.insert((*k).to_string(), env::var(k).ok());
            env::set_var(k, v);
        }
        Self { old }
    }

    pub fn unset(keys: &[&str]) -> Self {
        let mut old = HashMap::new();
        for k in keys {
            old.insert((*k).to_string(), env::var(k).ok());
            env::remove_var(k);
        }
        Self { old }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (k, prev) in self.old.drain() {
            match prev {
                Some(v) => env::set_var(k, v),
                None => env::remove_var(k),
            }
        }
    }
}

const PIPE_CAPACITY: usize = 64 * 1024;

enum Mode {
    Serve(Arc<Router>),
    Manual(mpsc::UnboundedSender<DuplexStream>),
    BrokenWrite(mpsc::UnboundedSender<DuplexStream>),
    Refuse,
}

/// Write side whose every write fails, as if the host closed its stdin.
struct ClosedInput;

impl AsyncWrite for ClosedInput {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "host stopped reading",
        )))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// In-memory stand-in for a host process.
///
/// `connects` counts how many times the bridge asked for a new channel.
pub struct TestConnector {
    pub connects: Arc<AtomicUsize>,
    mode: Mode,
}

impl TestConnector {
    /// Every connection is answered by `router`.
    pub fn serving(router: Router) -> Self {
        Self {
            connects: Arc::default(),
            mode: Mode::Serve(Arc::new(router)),
        }
    }

    /// Every connection hands its host end to the returned queue.
    pub fn manual() -> (Self, PeerQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            connects: Arc::default(),
            mode: Mode::Manual(tx),
        };
        (connector, PeerQueue { rx })
    }

    /// Like [`TestConnector::manual`], but writes towards the host fail
    /// while its output stays open.
    pub fn broken_write() -> (Self, PeerQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            connects: Arc::default(),
            mode: Mode::BrokenWrite(tx),
        };
        (connector, PeerQueue { rx })
    }

    /// Every connection attempt fails.
    pub fn refusing() -> Self {
        Self {
            connects: Arc::default(),
            mode: Mode::Refuse,
        }
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connects)
    }
}

impl Connector for TestConnector {
    async fn connect(&self) -> io::Result<Channel> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        match &self.mode {
            Mode::Refuse => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "host refused",
                ))
            }
            Mode::Serve(router) => {
                let router = Arc::clone(router);
                tokio::spawn(async move {
                    let (r, w) = tokio::io::split(theirs);
                    let _ = serve(r, w, &router).await;
                });
            }
            Mode::Manual(tx) => {
                tx.send(theirs)
                    .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer queue closed"))?;
            }
            Mode::BrokenWrite(tx) => {
                tx.send(theirs)
                    .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer queue closed"))?;
                let (r, _) = tokio::io::split(ours);
                return Ok(Channel::new(r, ClosedInput));
            }
        }
        let (r, w) = tokio::io::split(ours);
        Ok(Channel::new(r, w))
    }
}

pub struct PeerQueue {
    rx: mpsc::UnboundedReceiver<DuplexStream>,
}

impl PeerQueue {
    /// Host end of the next connection the bridge opens.
    pub async fn next(&mut self) -> Peer {
        let stream = self.rx.recv().await.expect("connector dropped");
        let (r, w) = tokio::io::split(stream);
        Peer {
            reader: FrameReader::new(r, MAX_TO_HOST),
            writer: FrameWriter::new(w, MAX_FROM_HOST),
        }
    }
}

/// A scripted host: the test decides what to read and what to answer.
pub struct Peer {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
}

impl Peer {
    pub async fn recv(&mut self) -> Request {
        self.reader
            .read_message()
            .await
            .expect("read request")
            .expect("bridge closed the channel")
    }

    pub async fn reply(&mut self, response: &Response) {
        self.writer.write_message(response).await.expect("write reply");
    }

    pub async fn send_raw(&mut self, value: &serde_json::Value) {
        self.writer.write_message(value).await.expect("write raw");
    }

    /// Raw bytes, bypassing framing.
    pub async fn write_bytes(self, bytes: &[u8]) {
        use tokio::io::AsyncWriteExt;
        let mut w = self.writer.into_inner();
        w.write_all(bytes).await.expect("write bytes");
        w.flush().await.expect("flush");
        drop(w);
    }
}
