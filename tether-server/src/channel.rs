//! Per-connection protocol loop
//!
//! A channel reads signals from one client, answers the synchronous ones
//! inline and hands command lines to its execution lane. Output produced by
//! commands flows back through the shared [`Outbound`] writer.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::{FutureExt, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

use tether_protocol::{FaultClass, LenientSignalCodec, Payload, Signal, INTERRUPT_PROMPT};
use tether_utils::{Result, TetherError};

use crate::context::{BaseContext, ContextState, ShellContext};
use crate::lane::ExecutionLane;
use crate::outbound::{codec_error, Outbound};
use crate::panic::panic_message;
use crate::registry::CommandRegistry;
use crate::server::ChannelSet;

/// Identifier of a live channel, unique per server
pub type ChannelId = u64;

/// Fault class reported to the client for an error
pub fn fault_class(err: &TetherError) -> FaultClass {
    match err {
        TetherError::UnknownCommand(_) | TetherError::InvalidArgument { .. } => {
            FaultClass::Resolution
        }
        TetherError::MultipleContextParameters { .. }
        | TetherError::Config(_)
        | TetherError::ConfigInvalid { .. }
        | TetherError::ConfigNotFound(_) => FaultClass::Configuration,
        TetherError::LaneBusy => FaultClass::Busy,
        TetherError::InvalidMessage(_) => FaultClass::Decode,
        TetherError::Protocol(_) => FaultClass::Protocol,
        _ => FaultClass::Execution,
    }
}

/// State shared between a channel's read loop and its lane jobs
struct Dispatcher {
    id: ChannelId,
    registry: Arc<CommandRegistry>,
    outbound: Outbound,
    current: ArcSwap<BaseContext>,
}

impl Dispatcher {
    fn current(&self) -> Arc<BaseContext> {
        self.current.load_full()
    }

    fn reset_current(&self) {
        self.current
            .store(Arc::new(BaseContext::idle(self.outbound.clone())));
    }

    /// Lane job for one command line
    async fn execute(self: Arc<Self>, line: String) {
        let context = BaseContext::new(line.as_str(), self.outbound.clone());

        if let Err(err) = self.run_line(&context).await {
            let class = fault_class(&err);
            debug!(channel = self.id, %class, "Command line failed: {}", err);
            if let Err(e) = self.outbound.send(Signal::fault(class, err.to_string())).await {
                debug!(channel = self.id, "Could not report fault: {}", e);
            }
        }

        // A running context is completed by its command
        if context.state() != ContextState::Running {
            context.completed().await;
        }
    }

    async fn run_line(&self, context: &BaseContext) -> Result<()> {
        let (command, mut args) = self.registry.resolve(context.line())?;
        let descriptor = command.descriptor();

        let slots = descriptor.context_slots();
        if slots.len() > 1 {
            return Err(TetherError::MultipleContextParameters {
                command: descriptor.name.clone(),
                count: slots.len(),
            });
        }
        if let Some(&(position, kind)) = slots.first() {
            let name = descriptor.params[position].name.clone();
            args.insert_context(position, name, ShellContext::of(kind, context.clone()));
            self.current.store(Arc::new(context.clone()));
            context.begin();
        }

        debug!(channel = self.id, command = command.name(), "Invoking command");
        let outcome = AssertUnwindSafe(command.invoke(args)).catch_unwind().await;
        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(TetherError::command_failed(command.name(), err.to_string()));
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(channel = self.id, command = command.name(), "Command panicked: {}", message);
                return Err(TetherError::command_failed(
                    command.name(),
                    format!("panicked: {}", message),
                ));
            }
        };

        match output {
            Some(text) => self.outbound.send(Signal::text(text)).await,
            None => Ok(()),
        }
    }
}

/// One client connection
pub struct Channel {
    id: ChannelId,
    dispatcher: Arc<Dispatcher>,
    lane: ExecutionLane,
    live: ChannelSet,
    server_running: Arc<AtomicBool>,
    idle_delay: Duration,
    closed: AtomicBool,
}

impl Channel {
    /// Build a channel; must be called inside a tokio runtime
    pub(crate) fn new(
        id: ChannelId,
        registry: Arc<CommandRegistry>,
        outbound: Outbound,
        live: ChannelSet,
        server_running: Arc<AtomicBool>,
        idle_delay: Duration,
    ) -> Self {
        let current = ArcSwap::from_pointee(BaseContext::idle(outbound.clone()));
        Self {
            id,
            dispatcher: Arc::new(Dispatcher {
                id,
                registry,
                outbound,
                current,
            }),
            lane: ExecutionLane::new(),
            live,
            server_running,
            idle_delay,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Context that receives listener notifications right now
    pub fn current_context(&self) -> Arc<BaseContext> {
        self.dispatcher.current()
    }

    /// Read and dispatch signals until the peer leaves or the server stops
    pub async fn run<R>(self, reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut frames = FramedRead::new(reader, LenientSignalCodec::new());
        info!(channel = self.id, "Channel opened");

        while !self.is_closed() && self.server_running.load(Ordering::SeqCst) {
            let terminal = match frames.next().await {
                None => {
                    debug!(channel = self.id, "Client closed the connection");
                    true
                }
                // Framing failures leave the stream unusable
                Some(Err(e)) => {
                    self.handle_error(codec_error(e)).await;
                    true
                }
                Some(Ok(Err(malformed))) => {
                    warn!(channel = self.id, "{}", malformed);
                    self.send_fault(FaultClass::Decode, malformed.to_string()).await
                }
                Some(Ok(Ok(signal))) => {
                    debug!(channel = self.id, "<= {}", signal.kind());
                    match self.handle(signal).await {
                        Ok(()) => false,
                        Err(e) => self.handle_error(e).await,
                    }
                }
            };
            if terminal {
                break;
            }

            if !self.idle_delay.is_zero() {
                tokio::time::sleep(self.idle_delay).await;
            }
        }

        self.close().await;
    }

    async fn handle(&self, signal: Signal) -> Result<()> {
        if signal.is_client_bound() {
            return Err(TetherError::protocol(format!(
                "{} signals are not accepted by the server",
                signal.kind()
            )));
        }

        let outbound = &self.dispatcher.outbound;
        match signal {
            Signal::Meta => {
                let descriptors = self.dispatcher.registry.descriptors();
                outbound.send(Signal::Output(Payload::Commands(descriptors))).await
            }
            Signal::PreInterrupt => {
                self.dispatcher.current().fire_pre_interrupt();
                outbound
                    .send(Signal::AskInterrupt {
                        prompt: INTERRUPT_PROMPT.to_string(),
                    })
                    .await
            }
            Signal::AckInterrupt { confirm } => {
                info!(channel = self.id, confirm, "Interrupt answered");
                self.dispatcher.current().fire_interrupt(confirm);
                Ok(())
            }
            Signal::Stdin { line } => {
                self.dispatcher.current().fire_command(&line);
                let dispatcher = Arc::clone(&self.dispatcher);
                self.lane.submit(dispatcher.execute(line))
            }
            // Rejected before dispatch
            Signal::AskInterrupt { .. } | Signal::Output(_) => Ok(()),
        }
    }

    /// Report `err` to the client; returns whether the channel must close
    async fn handle_error(&self, err: TetherError) -> bool {
        if err.is_disconnect() {
            warn!(channel = self.id, "Client disconnected: {}", err);
            return true;
        }
        if let TetherError::MessageTooLarge { .. } = err {
            warn!(channel = self.id, "Closing channel: {}", err);
            return true;
        }
        debug!(channel = self.id, "Reporting error: {}", err);
        self.send_fault(fault_class(&err), err.to_string()).await
    }

    async fn send_fault(&self, class: FaultClass, message: String) -> bool {
        match self.dispatcher.outbound.send(Signal::fault(class, message)).await {
            Ok(()) => false,
            Err(e) if e.is_disconnect() => {
                warn!(channel = self.id, "Client disconnected: {}", e);
                true
            }
            Err(e) => {
                error!(channel = self.id, "Failed to report fault: {}", e);
                false
            }
        }
    }

    /// Release everything this channel holds; later calls do nothing
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.dispatcher.reset_current();
        self.lane.shutdown();
        self.dispatcher.outbound.shutdown().await;

        if let Some((_, handle)) = self.live.remove(&self.id) {
            handle.abort();
        }
        info!(channel = self.id, remaining = self.live.len(), "Channel closed");
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.dispatcher.outbound.mark_closed();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("lane", &self.lane)
            .finish()
    }
}
