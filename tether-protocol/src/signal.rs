//! Signal vocabulary shared by client and server
//!
//! Every unit of exchange on a connection is one [`Signal`]. The client sends
//! `Meta`, `Stdin`, `PreInterrupt` and `AckInterrupt`; the server answers with
//! `AskInterrupt` and streams everything else as `Output`.

use serde::{Deserialize, Serialize};

/// Confirmation prompt sent in reply to [`Signal::PreInterrupt`]
pub const INTERRUPT_PROMPT: &str = "Are you sure you want to cancel execution? (y|n)";

/// One discrete wire-protocol message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// Request the registered command descriptors
    Meta,
    /// Raw command line submitted by the client
    Stdin { line: String },
    /// Client asks to interrupt the in-flight command
    PreInterrupt,
    /// Server asks the client to confirm an interruption
    AskInterrupt { prompt: String },
    /// Client's answer to [`Signal::AskInterrupt`]
    AckInterrupt { confirm: bool },
    /// Result, progress or error payload streamed to the client
    Output(Payload),
}

impl Signal {
    /// Shorthand for a `Stdin` signal
    pub fn stdin(line: impl Into<String>) -> Self {
        Self::Stdin { line: line.into() }
    }

    /// Shorthand for a text `Output` signal
    pub fn text(text: impl Into<String>) -> Self {
        Self::Output(Payload::Text(text.into()))
    }

    /// Shorthand for a fault `Output` signal
    pub fn fault(class: FaultClass, message: impl Into<String>) -> Self {
        Self::Output(Payload::Fault {
            class,
            message: message.into(),
        })
    }

    /// Whether this signal only travels from server to client
    pub fn is_client_bound(&self) -> bool {
        matches!(self, Self::AskInterrupt { .. } | Self::Output(_))
    }

    /// Short variant name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Meta => "Meta",
            Self::Stdin { .. } => "Stdin",
            Self::PreInterrupt => "PreInterrupt",
            Self::AskInterrupt { .. } => "AskInterrupt",
            Self::AckInterrupt { .. } => "AckInterrupt",
            Self::Output(_) => "Output",
        }
    }
}

/// Payload of an [`Signal::Output`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Plain command output
    Text(String),
    /// Registered commands, in reply to [`Signal::Meta`]
    Commands(Vec<CommandDescriptor>),
    /// Progress report from a progress-capable context
    Progress {
        title: String,
        progress: u64,
        whole: u64,
    },
    /// Error report; the connection stays usable
    Fault { class: FaultClass, message: String },
    /// The invocation context of the last command line has completed
    Completed,
}

/// Classification of a reported fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultClass {
    /// Malformed signal
    Decode,
    /// Unknown command or argument mismatch
    Resolution,
    /// The command body failed
    Execution,
    /// Invalid command signature
    Configuration,
    /// The execution lane is full
    Busy,
    /// Signal not valid in this direction
    Protocol,
}

impl std::fmt::Display for FaultClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Decode => "decode",
            Self::Resolution => "resolution",
            Self::Execution => "execution",
            Self::Configuration => "configuration",
            Self::Busy => "busy",
            Self::Protocol => "protocol",
        };
        f.write_str(name)
    }
}

/// Invocation context flavour a command can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextKind {
    /// Plain output context
    Simple,
    /// Context that can also report progress
    Progress,
}

/// Declared type of a command parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    String,
    Integer,
    Boolean,
    /// Injected by the server, never bound from the command line
    Context(ContextKind),
}

/// Shape of one command parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamShape {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub help: Option<String>,
}

impl ParamShape {
    fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            help: None,
        }
    }

    /// Optional string parameter
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::String)
    }

    /// Optional integer parameter
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Integer)
    }

    /// Boolean flag, false unless given
    pub fn flag(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Boolean)
    }

    /// Context parameter of the given kind
    pub fn context(name: impl Into<String>, kind: ContextKind) -> Self {
        Self::new(name, ParamKind::Context(kind))
    }

    /// Mark the parameter as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Attach a help line
    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Whether the server injects this parameter
    pub fn is_context(&self) -> bool {
        matches!(self.kind, ParamKind::Context(_))
    }
}

/// Name and parameter shapes of one registered command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub name: String,
    pub help: Option<String>,
    pub params: Vec<ParamShape>,
}

impl CommandDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: None,
            params: Vec::new(),
        }
    }

    /// Declared position and kind of every context parameter
    pub fn context_slots(&self) -> Vec<(usize, ContextKind)> {
        self.params
            .iter()
            .enumerate()
            .filter_map(|(index, param)| match param.kind {
                ParamKind::Context(kind) => Some((index, kind)),
                _ => None,
            })
            .collect()
    }

    /// Parameters bound from the command line
    pub fn line_params(&self) -> impl Iterator<Item = &ParamShape> {
        self.params.iter().filter(|param| !param.is_context())
    }

    /// One-line usage string, e.g. `sum <a> <b> [--verbose]`
    pub fn usage(&self) -> String {
        let mut usage = self.name.clone();
        for param in self.line_params() {
            let rendered = match (param.kind, param.required) {
                (ParamKind::Boolean, _) => format!(" [--{}]", param.name),
                (_, true) => format!(" <{}>", param.name),
                (_, false) => format!(" [{}]", param.name),
            };
            usage.push_str(&rendered);
        }
        usage
    }
}
