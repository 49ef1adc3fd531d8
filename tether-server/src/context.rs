//! Invocation context state machine
//!
//! A context is created for every command line accepted into a channel's
//! execution lane. It routes output back to the connection, tracks the
//! invocation through `Created -> Running -> Completed`, and carries the
//! listeners notified during interrupt negotiation.
//!
//! ```text
//! Created --begin()------> Running --completed()--> Completed
//! Created --completed()--------------------------> Completed
//! ```

use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tracing::{debug, warn};

use tether_protocol::{ContextKind, FaultClass, Payload, Signal};
use tether_utils::{Result, TetherError};

use crate::outbound::Outbound;
use crate::panic::panic_message;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of an invocation context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    Created,
    Running,
    Completed,
}

/// Callbacks fired at protocol points of a channel
///
/// Listeners run synchronously on the channel's read loop, in registration
/// order. A panicking listener is logged and the remaining ones still run.
pub trait ContextListener: Send + Sync {
    /// A new command line arrived while this context was current
    fn on_command(&self, _ctx: &BaseContext, _line: &str) {}

    /// The client asked to interrupt
    fn on_pre_interrupt(&self, _ctx: &BaseContext) {}

    /// The client answered the interrupt prompt
    fn on_interrupt(&self, _ctx: &BaseContext, _confirmed: bool) {}
}

type Listeners = Vec<Arc<dyn ContextListener>>;

struct ContextInner {
    id: u64,
    line: String,
    outbound: Outbound,
    state: watch::Sender<ContextState>,
    interrupted: watch::Sender<bool>,
    listeners: ArcSwap<Listeners>,
}

/// State machine shared by every context flavour
#[derive(Clone)]
pub struct BaseContext {
    inner: Arc<ContextInner>,
}

impl BaseContext {
    /// Fresh context for `line`, in the `Created` state
    pub fn new(line: impl Into<String>, outbound: Outbound) -> Self {
        let (state, _) = watch::channel(ContextState::Created);
        let (interrupted, _) = watch::channel(false);
        Self {
            inner: Arc::new(ContextInner {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                line: line.into(),
                outbound,
                state,
                interrupted,
                listeners: ArcSwap::from_pointee(Vec::new()),
            }),
        }
    }

    /// Placeholder context of a channel with nothing running yet
    pub fn idle(outbound: Outbound) -> Self {
        Self::new(String::new(), outbound)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Command line this context was created for
    pub fn line(&self) -> &str {
        &self.inner.line
    }

    pub fn state(&self) -> ContextState {
        *self.inner.state.borrow()
    }

    /// `Created -> Running`; returns whether the state changed
    pub fn begin(&self) -> bool {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == ContextState::Created {
                *state = ContextState::Running;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(context = self.id(), "Context running");
        }
        changed
    }

    /// `Created | Running -> Completed`; returns whether the state changed
    ///
    /// The client is told with an `Output(Completed)` signal exactly once.
    pub async fn completed(&self) -> bool {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == ContextState::Completed {
                false
            } else {
                *state = ContextState::Completed;
                true
            }
        });
        if changed {
            debug!(context = self.id(), "Context completed");
            if let Err(e) = self.inner.outbound.send(Signal::Output(Payload::Completed)).await {
                debug!(context = self.id(), "Could not report completion: {}", e);
            }
        }
        changed
    }

    /// Resolves once the context is `Completed`
    pub async fn wait_completed(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == ContextState::Completed).await;
    }

    /// Send a line of output to the client
    pub async fn print(&self, text: impl Into<String>) -> Result<()> {
        self.emit(Signal::text(text)).await
    }

    /// Report an error to the client without ending the invocation
    pub async fn print_fault(&self, message: impl Into<String>) -> Result<()> {
        self.emit(Signal::fault(FaultClass::Execution, message)).await
    }

    async fn emit(&self, signal: Signal) -> Result<()> {
        if self.state() == ContextState::Completed {
            return Err(TetherError::ContextCompleted);
        }
        self.inner.outbound.send(signal).await
    }

    /// Append a listener; the set never shrinks
    pub fn add_listener(&self, listener: Arc<dyn ContextListener>) {
        self.inner.listeners.rcu(|current| {
            let mut next = Listeners::clone(current);
            next.push(Arc::clone(&listener));
            Arc::new(next)
        });
    }

    /// Immutable snapshot of the listener set
    pub fn listeners(&self) -> Arc<Listeners> {
        self.inner.listeners.load_full()
    }

    /// Whether the client confirmed an interruption
    pub fn is_interrupted(&self) -> bool {
        *self.inner.interrupted.borrow()
    }

    /// Resolves once the client confirms an interruption
    pub async fn interrupted(&self) {
        let mut rx = self.inner.interrupted.subscribe();
        let _ = rx.wait_for(|interrupted| *interrupted).await;
    }

    pub(crate) fn fire_command(&self, line: &str) {
        self.each_listener("on_command", |listener| listener.on_command(self, line));
    }

    pub(crate) fn fire_pre_interrupt(&self) {
        self.each_listener("on_pre_interrupt", |listener| listener.on_pre_interrupt(self));
    }

    pub(crate) fn fire_interrupt(&self, confirmed: bool) {
        if confirmed {
            self.inner.interrupted.send_replace(true);
        }
        self.each_listener("on_interrupt", |listener| {
            listener.on_interrupt(self, confirmed)
        });
    }

    fn each_listener(&self, event: &'static str, f: impl Fn(&dyn ContextListener)) {
        for listener in self.listeners().iter() {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| f(listener.as_ref())));
            if let Err(payload) = outcome {
                warn!(
                    context = self.id(),
                    event,
                    "Context listener panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

impl std::fmt::Debug for BaseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseContext")
            .field("id", &self.id())
            .field("line", &self.line())
            .field("state", &self.state())
            .field("listeners", &self.listeners().len())
            .finish()
    }
}

/// Plain output context
#[derive(Debug, Clone)]
pub struct SimpleContext(BaseContext);

impl Deref for SimpleContext {
    type Target = BaseContext;

    fn deref(&self) -> &BaseContext {
        &self.0
    }
}

/// Context that can also report progress
#[derive(Debug, Clone)]
pub struct ProgressContext(BaseContext);

impl ProgressContext {
    /// Report `progress` out of `whole`; progress is clamped to `whole`
    pub async fn print_progress(
        &self,
        title: impl Into<String>,
        progress: u64,
        whole: u64,
    ) -> Result<()> {
        self.0
            .emit(Signal::Output(Payload::Progress {
                title: title.into(),
                progress: progress.min(whole),
                whole,
            }))
            .await
    }
}

impl Deref for ProgressContext {
    type Target = BaseContext;

    fn deref(&self) -> &BaseContext {
        &self.0
    }
}

/// Context handed to a command, flavoured by its declared parameter kind
#[derive(Debug, Clone)]
pub enum ShellContext {
    Simple(SimpleContext),
    Progress(ProgressContext),
}

impl ShellContext {
    /// Wrap `base` in the flavour a descriptor declared
    pub fn of(kind: ContextKind, base: BaseContext) -> Self {
        match kind {
            ContextKind::Simple => Self::Simple(SimpleContext(base)),
            ContextKind::Progress => Self::Progress(ProgressContext(base)),
        }
    }

    pub fn kind(&self) -> ContextKind {
        match self {
            Self::Simple(_) => ContextKind::Simple,
            Self::Progress(_) => ContextKind::Progress,
        }
    }

    pub fn base(&self) -> &BaseContext {
        match self {
            Self::Simple(ctx) => ctx,
            Self::Progress(ctx) => ctx,
        }
    }

    pub fn as_simple(&self) -> Option<&SimpleContext> {
        match self {
            Self::Simple(ctx) => Some(ctx),
            Self::Progress(_) => None,
        }
    }

    pub fn as_progress(&self) -> Option<&ProgressContext> {
        match self {
            Self::Progress(ctx) => Some(ctx),
            Self::Simple(_) => None,
        }
    }
}

impl Deref for ShellContext {
    type Target = BaseContext;

    fn deref(&self) -> &BaseContext {
        self.base()
    }
}
