//! Opaque-value codec (spec §4.6).
//!
//! Opaque values carry a pointer to a per-type descriptor with an optional
//! `marshal`/`unmarshal` pair and a declared byte size. The type name is an
//! ordinary keyword, deduplicated by the value codec's seen-table like any
//! other reference value (spec §9 "Opaque-type identity").

use crate::error::{MarshalError, Result};
use crate::state::{DecodeState, EncodeState};
use crate::value::{Interned, Value};
use crate::varint;
use std::any::Any;
use std::cell::RefCell;

/// A host-defined opaque value: a type name, a declared size, and
/// type-specific data only the registered descriptor understands.
pub struct OpaqueValue {
    pub type_name: Interned,
    pub size: u32,
    pub data: RefCell<Box<dyn Any>>,
}

impl std::fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpaqueValue")
            .field("type_name", &self.type_name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Context handed to a type's `marshal` callback: push-only primitives plus
/// the shared recursion-depth counter (spec §6).
pub struct MarshalCtx<'a, 'b> {
    pub(crate) state: &'a mut EncodeState<'b>,
}

impl MarshalCtx<'_, '_> {
    pub fn push_varint(&mut self, i: i32) {
        varint::push(self.state.sink, i);
    }

    pub fn push_byte(&mut self, b: u8) {
        self.state.sink.push_byte(b);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.state.sink.push_bytes(bytes);
    }

    pub fn push_value(&mut self, value: &crate::value::Value) -> Result<()> {
        crate::primitive::encode_value(self.state, value)
    }

    pub fn depth(&self) -> u32 {
        self.state.depth
    }
}

/// Context handed to a type's `unmarshal` callback: read-only primitives
/// plus the shared recursion-depth counter (spec §6).
pub struct UnmarshalCtx<'a, 'b> {
    pub(crate) state: &'a mut DecodeState<'b>,
}

impl UnmarshalCtx<'_, '_> {
    pub fn read_varint(&mut self) -> Result<i32> {
        self.state.read_varint()
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        self.state.read_u8()
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.state.read_bytes(len)?.to_vec())
    }

    pub fn read_value(&mut self) -> Result<crate::value::Value> {
        crate::primitive::decode_value(self.state)
    }

    pub fn depth(&self) -> u32 {
        self.state.depth
    }
}

/// Encode an opaque value: the outer opcode, then the type name as an
/// ordinary keyword (so a repeated type name becomes a back-reference
/// through the value codec's seen-table instead of being re-emitted), then
/// the declared size, then the descriptor's `marshal` callback.
pub fn encode_opaque(state: &mut EncodeState, opaque: &OpaqueValue) -> Result<()> {
    let descriptor = state
        .opaque_registry
        .get(&opaque.type_name)
        .ok_or_else(|| MarshalError::UnregisteredOpaque(opaque.type_name.to_string()))?;

    state.sink.push_byte(crate::opcode::OPAQUE);
    crate::primitive::encode_value(state, &Value::Keyword(opaque.type_name.clone()))?;
    varint::push(state.sink, opaque.size as i32);

    let data_ref = opaque.data.borrow();
    let mut ctx = MarshalCtx { state };
    descriptor.marshal(data_ref.as_ref(), &mut ctx)
}

/// Decode an opaque value. The outer opcode byte is already consumed by the
/// caller; what follows is the type-name keyword (possibly a back-reference),
/// the declared size, then the descriptor's `unmarshal` callback.
pub fn decode_opaque(state: &mut DecodeState) -> Result<OpaqueValue> {
    let type_name: Interned = match crate::primitive::decode_value(state)? {
        Value::Keyword(k) => k,
        _ => {
            return Err(MarshalError::BadFrame(
                "opaque type name did not decode to a keyword",
            ))
        }
    };
    let size = varint::read(state.bytes, &mut state.pos)? as u32;

    let descriptor = state
        .opaque_registry
        .get(&type_name)
        .ok_or_else(|| MarshalError::UnregisteredOpaque(type_name.to_string()))?;

    let mut ctx = UnmarshalCtx { state };
    let data = descriptor.unmarshal(&mut ctx)?;

    Ok(OpaqueValue {
        type_name,
        size,
        data: RefCell::new(data),
    })
}
