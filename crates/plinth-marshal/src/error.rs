//! Error taxonomy for the marshaling subsystem.

use thiserror::Error;

/// A single failure indication surfaced to the caller of `marshal`/`unmarshal`.
///
/// Every variant is fatal to the current call; there is no partial success
/// and no internal recovery.
#[derive(Debug, Error)]
pub enum MarshalError {
    /// The decoder read past the end of the input buffer.
    #[error("truncated input at offset {offset}: needed {needed} more byte(s)")]
    Truncated {
        /// Offset at which the read was attempted.
        offset: usize,
        /// Number of additional bytes the read required.
        needed: usize,
    },

    /// The decoder encountered a byte with no meaning in the current position.
    #[error("bad opcode {opcode:#04x} at offset {offset}")]
    BadOpcode {
        /// The unrecognized byte.
        opcode: u8,
        /// Offset of the unrecognized byte.
        offset: usize,
    },

    /// A back-reference id was out of range of its lookup table.
    #[error("bad reference: id {id} out of range ({kind}, {len} entries known)")]
    BadReference {
        /// The id-space the reference belongs to.
        kind: ReferenceKind,
        /// The offending id.
        id: u32,
        /// Number of entries known at the time of the reference.
        len: usize,
    },

    /// The host bytecode verifier rejected a decoded function definition.
    #[error("decoded function definition failed bytecode verification")]
    BadBytecode,

    /// A coroutine frame failed a consistency check.
    #[error("bad coroutine frame: {0}")]
    BadFrame(&'static str),

    /// A table's prototype was present but was not itself a table.
    #[error("table prototype must be a table")]
    BadPrototype,

    /// The encoder was asked to serialize a currently-executing coroutine.
    #[error("cannot marshal a coroutine in the alive (running) status")]
    AliveCoroutine,

    /// A coroutine frame's function is a host-native routine, not bytecode.
    #[error("cannot marshal a coroutine frame whose function is host-native")]
    NativeFrame,

    /// An opaque value's type has no marshal/unmarshal installed, or is unknown on decode.
    #[error("unregistered opaque type: {0}")]
    UnregisteredOpaque(String),

    /// A value kind has no encoding rule (should not occur for well-formed `Value`s).
    #[error("no encoding rule for this value kind")]
    NoEncoding,

    /// Recursion depth exceeded the host-configured bound.
    #[error("stack overflow: recursion depth exceeded {limit}")]
    StackOverflow {
        /// The configured bound that was exceeded.
        limit: u32,
    },
}

/// Which id-space a [`MarshalError::BadReference`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// The value id-space (`0xDB reference`).
    Value,
    /// The function-definition id-space (`0xDD funcdef-ref`).
    FuncDef,
    /// The function-environment id-space (`0xDC funcenv-ref`).
    FuncEnv,
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReferenceKind::Value => "value",
            ReferenceKind::FuncDef => "funcdef",
            ReferenceKind::FuncEnv => "funcenv",
        };
        f.write_str(s)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MarshalError>;
