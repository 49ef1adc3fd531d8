//! tether-server: embeddable remote-administration shell
//!
//! A host application registers commands, starts a [`ShellServer`] and lets
//! operators drive those commands over TCP. Each connection is a
//! [`Channel`] with its own execution lane; commands talk back to the client
//! through an invocation context.

pub mod builder;
pub mod cache;
pub mod channel;
pub mod config;
pub mod context;
pub mod demo;
pub mod lane;
pub mod outbound;
mod panic;
pub mod registry;
pub mod server;

pub use builder::ShellServerBuilder;
pub use cache::{MemoryCache, ShellCache, ShellCacheExt};
pub use channel::{fault_class, Channel, ChannelId};
pub use config::{ConfigLoader, ShellConfig};
pub use context::{
    BaseContext, ContextListener, ContextState, ProgressContext, ShellContext, SimpleContext,
};
pub use lane::{ExecutionLane, LANE_CAPACITY};
pub use registry::{Args, Argument, Command, CommandBuilder, CommandOutput, CommandRegistry, Value};
pub use server::{ChannelSet, ShellServer};
