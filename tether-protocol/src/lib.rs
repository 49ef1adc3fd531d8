//! tether-protocol: Signal definitions for the embedded admin shell
//!
//! This crate defines the signals exchanged between a console client and the
//! shell server over TCP, the command descriptors carried by `Meta` replies,
//! and the self-framing codec used on the wire.

pub mod codec;
pub mod signal;

// Re-export main types at crate root
pub use codec::{CodecError, LenientSignalCodec, MalformedSignal, SignalCodec, MAX_SIGNAL_SIZE};
pub use signal::{
    CommandDescriptor, ContextKind, FaultClass, ParamKind, ParamShape, Payload, Signal,
    INTERRUPT_PROMPT,
};
