//! Public entry points (spec §4.12).
//!
//! [`Marshaler`] and [`Unmarshaler`] carry the host hooks (registries,
//! opaque-type descriptors, the bytecode verifier, recursion limits) across
//! a single `marshal`/`unmarshal` call. The free [`marshal`]/[`unmarshal`]
//! functions are a convenience for hosts with no registries or opaque types
//! to register.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;
use crate::host::{
    AcceptAllVerifier, BytecodeVerifier, EmptyOpaqueRegistry, ForwardRegistry, OpaqueTypeRegistry,
    ReverseRegistry,
};
use crate::state::{DecodeState, EncodeState, RecursionLimits};
use crate::value::{TableData, Value};

/// Encodes values against a fixed set of host hooks.
pub struct Marshaler<'a> {
    reverse_registry: &'a dyn ReverseRegistry,
    opaque_registry: &'a dyn OpaqueTypeRegistry,
    limits: RecursionLimits,
}

impl<'a> Marshaler<'a> {
    pub fn new(
        reverse_registry: &'a dyn ReverseRegistry,
        opaque_registry: &'a dyn OpaqueTypeRegistry,
    ) -> Self {
        Self {
            reverse_registry,
            opaque_registry,
            limits: RecursionLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: RecursionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Serialize `value` to a fresh byte buffer (spec §4.12).
    pub fn marshal(&self, value: &Value) -> Result<Vec<u8>> {
        let mut sink = Vec::new();
        let mut state = EncodeState::new(&mut sink, self.reverse_registry, self.opaque_registry);
        state.limits = self.limits;
        crate::primitive::encode_value(&mut state, value)?;
        Ok(sink)
    }
}

/// Decodes values against a fixed set of host hooks.
pub struct Unmarshaler<'a> {
    forward_registry: &'a dyn ForwardRegistry,
    verifier: &'a dyn BytecodeVerifier,
    opaque_registry: &'a dyn OpaqueTypeRegistry,
    limits: RecursionLimits,
}

impl<'a> Unmarshaler<'a> {
    pub fn new(
        forward_registry: &'a dyn ForwardRegistry,
        verifier: &'a dyn BytecodeVerifier,
        opaque_registry: &'a dyn OpaqueTypeRegistry,
    ) -> Self {
        Self {
            forward_registry,
            verifier,
            opaque_registry,
            limits: RecursionLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: RecursionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Deserialize a single value starting at the front of `bytes` (spec
    /// §4.12), returning the value alongside the byte offset just past it.
    /// A caller with several values concatenated back-to-back in one buffer
    /// feeds that offset back in as the next call's starting point, instead
    /// of needing a length-prefixed stream.
    pub fn unmarshal(&self, bytes: &[u8]) -> Result<(Value, usize)> {
        let mut state = DecodeState::new(
            bytes,
            self.forward_registry,
            self.verifier,
            self.opaque_registry,
        );
        state.limits = self.limits;
        let value = crate::primitive::decode_value(&mut state)?;
        Ok((value, state.pos))
    }
}

/// Serialize `value` with no registry and no opaque types registered.
pub fn marshal(value: &Value) -> Result<Vec<u8>> {
    Marshaler::new(&(), &EmptyOpaqueRegistry).marshal(value)
}

/// Deserialize the value at the front of `bytes` with no registry, no
/// opaque types, and a verifier that accepts every function definition.
/// Returns the value and the cursor offset just past it, so a stream of
/// concatenated values can be walked one call at a time.
pub fn unmarshal(bytes: &[u8]) -> Result<(Value, usize)> {
    Unmarshaler::new(&(), &AcceptAllVerifier, &EmptyOpaqueRegistry).unmarshal(bytes)
}

/// A [`ForwardRegistry`] backed by a live table: resolves a symbolic name by
/// looking it up as a keyword key in `environment_table`, the way a host's
/// top-level module environment is typically shaped (spec §4.12,
/// `env_lookup`).
pub struct TableForwardRegistry {
    table: Rc<RefCell<TableData>>,
}

impl TableForwardRegistry {
    pub fn new(table: Rc<RefCell<TableData>>) -> Self {
        Self { table }
    }
}

impl ForwardRegistry for TableForwardRegistry {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.table.borrow().entries.iter().find_map(|(k, v)| match k {
            Value::Keyword(s) if s.as_ref() == name => Some(v.clone()),
            _ => None,
        })
    }
}

/// Build a [`ForwardRegistry`] over a host's environment table, for hosts
/// that keep registered singletons as keyword-named table entries rather
/// than through a custom [`ForwardRegistry`] implementation.
pub fn env_lookup(environment_table: Rc<RefCell<TableData>>) -> TableForwardRegistry {
    TableForwardRegistry::new(environment_table)
}
