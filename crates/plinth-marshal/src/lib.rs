//! Marshaling subsystem: serialize and deserialize runtime values, closures,
//! and coroutines to a compact byte format.
//!
//! The wire format, recursion rules, and identity semantics implemented
//! here are described module-by-module below. A typical embedder only
//! needs [`marshal`] and [`unmarshal`] (or [`Marshaler`]/[`Unmarshaler`] if
//! it has a registry or opaque types to register); everything else is
//! exposed for hosts that assemble their own value graphs directly.

mod api;
mod closure;
mod coroutine;
mod error;
mod funcdef;
mod funcenv;
mod host;
mod opaque;
mod opcode;
mod primitive;
mod registry;
mod sink;
mod state;
mod value;
mod varint;

pub use api::{env_lookup, marshal, unmarshal, Marshaler, TableForwardRegistry, Unmarshaler};
pub use coroutine::{CoroutineData, CoroutineStatus, Frame};
pub use error::{MarshalError, ReferenceKind, Result};
pub use funcdef::{FunctionDef, SourceRange};
pub use funcenv::{FunctionEnv, FunctionEnvStorage};
pub use host::{
    AcceptAllVerifier, BytecodeVerifier, EmptyOpaqueRegistry, ForwardRegistry, OpaqueType,
    OpaqueTypeRegistry, ReverseRegistry,
};
pub use opaque::{MarshalCtx, OpaqueValue, UnmarshalCtx};
pub use sink::Sink;
pub use state::RecursionLimits;
pub use value::{Closure, Interned, SeenKey, StructData, TableData, TupleData, Value};
