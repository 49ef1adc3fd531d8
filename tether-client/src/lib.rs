//! tether-client: connect to a tether shell server
//!
//! [`Client`] owns one connection. It can be used request/response style
//! (`commands`, `run_to_completion`) or split into a [`ClientSender`] and a
//! [`ClientReceiver`] for interactive use, where output of a running command
//! arrives while the user keeps typing.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

use tether_protocol::{CommandDescriptor, FaultClass, Payload, Signal, SignalCodec};
use tether_utils::{derive_port, Result, TetherError, DEFAULT_BEGIN_PORT, DEFAULT_END_PORT};

/// Timeout for server responses
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Address a server for `app_name` listens on when no port is configured
pub fn app_addr(host: IpAddr, app_name: &str) -> Result<SocketAddr> {
    let port = derive_port(app_name, DEFAULT_BEGIN_PORT, DEFAULT_END_PORT)?;
    Ok(SocketAddr::new(host, port))
}

/// Write half of a connection
#[derive(Debug)]
pub struct ClientSender {
    writer: FramedWrite<OwnedWriteHalf, SignalCodec>,
}

impl ClientSender {
    /// Send a signal to the server
    pub async fn send(&mut self, signal: Signal) -> Result<()> {
        debug!("=> {}", signal.kind());
        self.writer
            .send(signal)
            .await
            .map_err(|e| TetherError::connection(format!("Failed to send: {}", e)))
    }

    /// Ask for the command descriptors
    pub async fn meta(&mut self) -> Result<()> {
        self.send(Signal::Meta).await
    }

    /// Submit a command line
    pub async fn execute(&mut self, line: impl Into<String>) -> Result<()> {
        self.send(Signal::stdin(line)).await
    }

    /// Ask to interrupt the running command
    pub async fn interrupt(&mut self) -> Result<()> {
        self.send(Signal::PreInterrupt).await
    }

    /// Answer an interrupt prompt
    pub async fn confirm_interrupt(&mut self, confirm: bool) -> Result<()> {
        self.send(Signal::AckInterrupt { confirm }).await
    }
}

/// Read half of a connection
#[derive(Debug)]
pub struct ClientReceiver {
    reader: FramedRead<OwnedReadHalf, SignalCodec>,
    timeout: Duration,
}

impl ClientReceiver {
    /// Receive a signal, failing after the response timeout
    pub async fn recv(&mut self) -> Result<Signal> {
        match timeout(self.timeout, self.next_signal()).await {
            Ok(Some(signal)) => signal,
            Ok(None) => Err(TetherError::ConnectionClosed),
            Err(_) => Err(TetherError::ConnectionTimeout {
                seconds: self.timeout.as_secs(),
            }),
        }
    }

    /// Wait for the next signal without a deadline; `None` once closed
    pub async fn next_signal(&mut self) -> Option<Result<Signal>> {
        let signal = self.reader.next().await?.map_err(|e| {
            TetherError::connection(format!("Failed to receive: {}", e))
        });
        if let Ok(signal) = &signal {
            debug!("<= {}", signal.kind());
        }
        Some(signal)
    }
}

/// One connection to a tether server
#[derive(Debug)]
pub struct Client {
    sender: ClientSender,
    receiver: ClientReceiver,
}

impl Client {
    /// Connect to a server
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TetherError::connection(format!("Failed to connect to {}: {}", addr, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }
        let (reader, writer) = stream.into_split();

        debug!(%addr, "Connected");
        Ok(Self {
            sender: ClientSender {
                writer: FramedWrite::new(writer, SignalCodec::new()),
            },
            receiver: ClientReceiver {
                reader: FramedRead::new(reader, SignalCodec::new()),
                timeout: RESPONSE_TIMEOUT,
            },
        })
    }

    /// Connect to the server of `app_name` on `host`, using the derived port
    pub async fn connect_app(host: IpAddr, app_name: &str) -> Result<Self> {
        Self::connect(app_addr(host, app_name)?).await
    }

    /// Replace the response timeout used by [`Client::recv`]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.receiver.timeout = timeout;
        self
    }

    pub async fn send(&mut self, signal: Signal) -> Result<()> {
        self.sender.send(signal).await
    }

    pub async fn recv(&mut self) -> Result<Signal> {
        self.receiver.recv().await
    }

    /// Fetch the registered command descriptors
    ///
    /// Output of a command still running on this connection is discarded
    /// while waiting for the reply.
    pub async fn commands(&mut self) -> Result<Vec<CommandDescriptor>> {
        self.sender.meta().await?;
        loop {
            match self.recv().await? {
                Signal::Output(Payload::Commands(descriptors)) => return Ok(descriptors),
                other => debug!("Skipping {} while waiting for commands", other.kind()),
            }
        }
    }

    /// Submit a command line without waiting for its output
    pub async fn execute(&mut self, line: impl Into<String>) -> Result<()> {
        self.sender.execute(line).await
    }

    /// Submit a command line and collect its output
    ///
    /// Returns every payload up to and including `Completed`, or up to a
    /// `Busy` fault when the line was refused.
    pub async fn run_to_completion(&mut self, line: impl Into<String>) -> Result<Vec<Payload>> {
        self.execute(line).await?;
        let mut payloads = Vec::new();
        loop {
            match self.recv().await? {
                Signal::Output(payload) => {
                    let done = matches!(
                        payload,
                        Payload::Completed
                            | Payload::Fault {
                                class: FaultClass::Busy,
                                ..
                            }
                    );
                    payloads.push(payload);
                    if done {
                        return Ok(payloads);
                    }
                }
                other => {
                    return Err(TetherError::protocol(format!(
                        "unexpected {} while running a command",
                        other.kind()
                    )))
                }
            }
        }
    }

    pub async fn interrupt(&mut self) -> Result<()> {
        self.sender.interrupt().await
    }

    pub async fn confirm_interrupt(&mut self, confirm: bool) -> Result<()> {
        self.sender.confirm_interrupt(confirm).await
    }

    /// Split into independently usable halves
    pub fn into_split(self) -> (ClientSender, ClientReceiver) {
        (self.sender, self.receiver)
    }
}
