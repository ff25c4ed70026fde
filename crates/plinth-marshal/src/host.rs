//! Host interfaces the marshal subsystem consumes or exposes (spec §6).
//!
//! These are trait seams, not concrete implementations: the interpreter,
//! GC, and bytecode verifier are external collaborators (spec §1) that a
//! host embedding this crate supplies. Defaults are provided where a
//! reasonable stand-in exists (a plain heap allocator in place of a
//! tracing GC) so the crate is usable standalone.

use crate::funcdef::FunctionDef;
use crate::value::Value;

/// Verifies a decoded function definition before it is released to
/// execution (spec §4.7). Treated as a black box: a single pass/fail.
pub trait BytecodeVerifier {
    fn verify(&self, def: &FunctionDef) -> bool;
}

/// A verifier that accepts everything. Useful for tests and for hosts that
/// verify bytecode at a different layer (e.g. ahead-of-time, before it ever
/// reaches marshal).
pub struct AcceptAllVerifier;

impl BytecodeVerifier for AcceptAllVerifier {
    fn verify(&self, _def: &FunctionDef) -> bool {
        true
    }
}

/// A per-type descriptor for a host-defined opaque value (spec §4.6).
pub trait OpaqueType {
    /// Keyword type name used on the wire.
    fn name(&self) -> &str;

    /// Declared byte size of the opaque payload.
    fn size(&self) -> u32;

    /// Serialize `value` using the primitives exposed on `ctx`.
    ///
    /// Returns `Err` ("unregistered opaque type") if this type has no
    /// marshal support installed.
    fn marshal(&self, value: &dyn std::any::Any, ctx: &mut crate::opaque::MarshalCtx) -> crate::error::Result<()>;

    /// Deserialize a payload of the declared size using the primitives
    /// exposed on `ctx`.
    fn unmarshal(&self, ctx: &mut crate::opaque::UnmarshalCtx) -> crate::error::Result<Box<dyn std::any::Any>>;
}

/// Resolves opaque type names to their descriptor (spec §6: `get_opaque_type`).
pub trait OpaqueTypeRegistry {
    fn get(&self, name: &str) -> Option<&dyn OpaqueType>;
}

/// A registry with no registered types. Any opaque value fails to encode or
/// decode against it, which is the correct default for a host that hasn't
/// registered anything yet.
pub struct EmptyOpaqueRegistry;

impl OpaqueTypeRegistry for EmptyOpaqueRegistry {
    fn get(&self, _name: &str) -> Option<&dyn OpaqueType> {
        None
    }
}

/// Reverse registry consulted by the encoder: maps a value to the symbolic
/// name it should be replaced by (spec §4.5).
pub trait ReverseRegistry {
    fn lookup(&self, value: &Value) -> Option<&str>;
}

/// Forward registry consulted by the decoder: maps a symbolic name back to
/// a value (spec §4.5). A miss yields `nil`, per spec.
pub trait ForwardRegistry {
    fn resolve(&self, name: &str) -> Option<Value>;
}

impl ReverseRegistry for () {
    fn lookup(&self, _value: &Value) -> Option<&str> {
        None
    }
}

impl ForwardRegistry for () {
    fn resolve(&self, _name: &str) -> Option<Value> {
        None
    }
}
