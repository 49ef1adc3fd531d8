//! Write side of a client connection
//!
//! The read loop and every invocation context of a channel write through the
//! same [`Outbound`], so whole signals are never interleaved on the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::debug;

use tether_protocol::{CodecError, SignalCodec, Signal};
use tether_utils::{Result, TetherError};

/// Trait alias for connection write halves
pub trait WriteStream: AsyncWrite + Unpin + Send {}
impl<T: AsyncWrite + Unpin + Send> WriteStream for T {}

type Sink = FramedWrite<Box<dyn WriteStream>, SignalCodec>;

/// Clonable handle to a connection's framed writer
#[derive(Clone)]
pub struct Outbound {
    sink: Arc<Mutex<Sink>>,
    closed: Arc<AtomicBool>,
}

impl Outbound {
    pub fn new(writer: Box<dyn WriteStream>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(FramedWrite::new(writer, SignalCodec::new()))),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Write and flush one signal
    pub async fn send(&self, signal: Signal) -> Result<()> {
        if self.is_closed() {
            return Err(TetherError::ConnectionClosed);
        }
        debug!("=> {}", signal.kind());
        let mut sink = self.sink.lock().await;
        sink.send(signal).await.map_err(codec_error)
    }

    /// Refuse further signals without touching the socket
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Mark closed and shut the write half down
    pub async fn shutdown(&self) {
        self.mark_closed();
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!("Connection writer already gone: {}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Map a codec failure onto the workspace error type
pub fn codec_error(err: CodecError) -> TetherError {
    match err {
        CodecError::Io(e) => TetherError::Io(e),
        CodecError::Bincode(e) => TetherError::InvalidMessage(e.to_string()),
        CodecError::MessageTooLarge { size, max } => TetherError::MessageTooLarge { size, max },
    }
}
