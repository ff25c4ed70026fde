//! Central value dispatch (spec §4.4, §9 "mutual recursion").
//!
//! Every codec in this crate — function definitions, environments,
//! coroutines, opaque values — ultimately bottoms out in `encode_value`/
//! `decode_value` for its nested values. This is the one place the
//! seen-table, registry, and per-kind wire formats all come together.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{MarshalError, Result};
use crate::opcode;
use crate::state::{DecodeState, EncodeState};
use crate::value::{SeenKey, StructData, TableData, TupleData, Value};
use crate::varint;

pub fn encode_value(state: &mut EncodeState, value: &Value) -> Result<()> {
    let mut state = crate::state::DepthGuard::enter(state)?;
    match value {
        Value::Nil => {
            state.sink.push_byte(opcode::NIL);
            Ok(())
        }
        Value::Bool(true) => {
            state.sink.push_byte(opcode::TRUE);
            Ok(())
        }
        Value::Bool(false) => {
            state.sink.push_byte(opcode::FALSE);
            Ok(())
        }
        Value::Int(i) => {
            varint::push(state.sink, *i);
            Ok(())
        }
        Value::Number(n) => encode_number(&mut state, *n),
        _ => encode_reference(&mut state, value),
    }
}

fn encode_number(state: &mut EncodeState, n: f64) -> Result<()> {
    if let Some(i) = Value::is_inline_integer(n) {
        varint::push(state.sink, i);
        return Ok(());
    }
    state.mark_seen(SeenKey::Bits(n.to_bits()));
    state.sink.push_byte(opcode::REAL);
    state.sink.push_bytes(&n.to_le_bytes());
    Ok(())
}

fn encode_reference(state: &mut EncodeState, value: &Value) -> Result<()> {
    let key = value
        .seen_key()
        .expect("reference-typed value must carry a seen-table key");

    if let Some(id) = state.seen_id(key) {
        state.sink.push_byte(opcode::REFERENCE);
        varint::push(state.sink, id as i32);
        return Ok(());
    }

    if let Some(name) = state.reverse_registry.lookup(value) {
        let name = name.to_string();
        crate::registry::encode_registry_hit(state, &name);
        state.mark_seen(key);
        return Ok(());
    }

    match value {
        Value::String(s) => encode_interned(state, opcode::STRING, s, key),
        Value::Symbol(s) => encode_interned(state, opcode::SYMBOL, s, key),
        Value::Keyword(s) => encode_interned(state, opcode::KEYWORD, s, key),
        Value::Buffer(b) => {
            state.mark_seen(key);
            let data = b.borrow();
            encode_interned_bytes(state, opcode::BUFFER, &data);
            Ok(())
        }
        Value::Array(a) => {
            state.mark_seen(key);
            state.sink.push_byte(opcode::ARRAY);
            let items = a.borrow();
            varint::push(state.sink, items.len() as i32);
            for item in items.iter() {
                encode_value(state, item)?;
            }
            Ok(())
        }
        Value::Tuple(t) => {
            state.sink.push_byte(opcode::TUPLE);
            varint::push(state.sink, t.items.len() as i32);
            // Tag occupies the upper 16 bits of the wire flag word; the
            // lower 16 bits are reserved and always written zero.
            varint::push(state.sink, (t.tag as i32) << 16);
            for item in &t.items {
                encode_value(state, item)?;
            }
            state.mark_seen(key);
            Ok(())
        }
        Value::Table(t) => {
            state.mark_seen(key);
            let data = t.borrow();
            let entries: Vec<&(Value, Value)> = data
                .entries
                .iter()
                .filter(|(k, _)| !matches!(k, Value::Nil))
                .collect();
            if let Some(proto) = &data.proto {
                if !matches!(proto, Value::Table(_)) {
                    return Err(MarshalError::BadPrototype);
                }
                state.sink.push_byte(opcode::TABLE_PROTO);
                varint::push(state.sink, entries.len() as i32);
                encode_value(state, proto)?;
            } else {
                state.sink.push_byte(opcode::TABLE);
                varint::push(state.sink, entries.len() as i32);
            }
            for (k, v) in entries {
                encode_value(state, k)?;
                encode_value(state, v)?;
            }
            Ok(())
        }
        Value::Struct(s) => {
            state.sink.push_byte(opcode::STRUCT);
            varint::push(state.sink, s.entries.len() as i32);
            for (k, v) in &s.entries {
                encode_value(state, k)?;
                encode_value(state, v)?;
            }
            state.mark_seen(key);
            Ok(())
        }
        Value::Opaque(o) => {
            state.mark_seen(key);
            crate::opaque::encode_opaque(state, o)
        }
        Value::Function(f) => crate::closure::encode_closure(state, f, key),
        Value::Coroutine(c) => crate::coroutine::encode_coroutine(state, c, key),
        Value::Nil | Value::Bool(_) | Value::Int(_) | Value::Number(_) => unreachable!(),
    }
}

fn encode_interned(state: &mut EncodeState, opcode: u8, s: &Rc<str>, key: SeenKey) -> Result<()> {
    state.mark_seen(key);
    encode_interned_bytes(state, opcode, s.as_bytes());
    Ok(())
}

/// Push `opcode`, a varint length, then raw bytes — shared by string-like
/// primitives (string, symbol, keyword, buffer).
pub fn encode_interned_bytes(state: &mut EncodeState, opcode: u8, bytes: &[u8]) {
    state.sink.push_byte(opcode);
    varint::push(state.sink, bytes.len() as i32);
    state.sink.push_bytes(bytes);
}

pub fn decode_value(state: &mut DecodeState) -> Result<Value> {
    let mut state = crate::state::DepthGuard::enter(state)?;
    let tag = state.peek_u8()?;

    if tag <= 0x7F || (tag & 0xC0) == 0x80 || tag == opcode::LONG_INTEGER {
        let i = state.read_varint()?;
        return Ok(Value::Int(i));
    }

    if !opcode::is_known(tag) {
        return Err(MarshalError::BadOpcode {
            opcode: tag,
            offset: state.pos,
        });
    }

    match tag {
        opcode::NIL => {
            state.pos += 1;
            Ok(Value::Nil)
        }
        opcode::TRUE => {
            state.pos += 1;
            Ok(Value::Bool(true))
        }
        opcode::FALSE => {
            state.pos += 1;
            Ok(Value::Bool(false))
        }
        opcode::REAL => {
            state.pos += 1;
            let bytes = state.read_bytes(8)?;
            let n = f64::from_le_bytes(bytes.try_into().unwrap());
            let value = Value::Number(n);
            state.push_value(value.clone());
            Ok(value)
        }
        opcode::STRING => decode_interned(&mut state, Value::String),
        opcode::SYMBOL => decode_interned(&mut state, Value::Symbol),
        opcode::KEYWORD => decode_interned(&mut state, Value::Keyword),
        opcode::BUFFER => {
            state.pos += 1;
            let len = state.read_varint()? as usize;
            let bytes = state.read_bytes(len)?.to_vec();
            let value = Value::Buffer(Rc::new(RefCell::new(bytes)));
            state.push_value(value.clone());
            Ok(value)
        }
        opcode::ARRAY => {
            state.pos += 1;
            let count = state.read_varint()? as usize;
            let rc = Rc::new(RefCell::new(Vec::with_capacity(count)));
            let value = Value::Array(rc.clone());
            state.push_value(value.clone());
            for _ in 0..count {
                let item = decode_value(&mut state)?;
                rc.borrow_mut().push(item);
            }
            Ok(value)
        }
        opcode::TUPLE => {
            state.pos += 1;
            let count = state.read_varint()? as usize;
            let word = state.read_varint()?;
            let tag = (word >> 16) as u16;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_value(&mut state)?);
            }
            let value = Value::Tuple(Rc::new(TupleData { tag, items }));
            state.push_value(value.clone());
            Ok(value)
        }
        opcode::TABLE | opcode::TABLE_PROTO => {
            let has_proto = tag == opcode::TABLE_PROTO;
            state.pos += 1;
            let count = state.read_varint()? as usize;
            let rc = Rc::new(RefCell::new(TableData::default()));
            let value = Value::Table(rc.clone());
            state.push_value(value.clone());
            if has_proto {
                let proto = decode_value(&mut state)?;
                if !matches!(proto, Value::Table(_)) {
                    return Err(MarshalError::BadPrototype);
                }
                rc.borrow_mut().proto = Some(proto);
            }
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let k = decode_value(&mut state)?;
                let v = decode_value(&mut state)?;
                entries.push((k, v));
            }
            rc.borrow_mut().entries = entries;
            Ok(value)
        }
        opcode::STRUCT => {
            state.pos += 1;
            let count = state.read_varint()? as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let k = decode_value(&mut state)?;
                let v = decode_value(&mut state)?;
                entries.push((k, v));
            }
            let value = Value::Struct(Rc::new(StructData { entries }));
            state.push_value(value.clone());
            Ok(value)
        }
        opcode::OPAQUE => {
            state.pos += 1;
            let opaque = crate::opaque::decode_opaque(&mut state)?;
            let value = Value::Opaque(Rc::new(opaque));
            state.push_value(value.clone());
            Ok(value)
        }
        opcode::FUNCTION => {
            state.pos += 1;
            crate::closure::decode_closure(&mut state)
        }
        opcode::COROUTINE => {
            state.pos += 1;
            crate::coroutine::decode_coroutine(&mut state)
        }
        opcode::REGISTRY => {
            state.pos += 1;
            crate::registry::decode_registry(&mut state)
        }
        opcode::REFERENCE => {
            state.pos += 1;
            let id = state.read_varint()? as u32;
            state.get_value(id)
        }
        _ => Err(MarshalError::BadOpcode {
            opcode: tag,
            offset: state.pos,
        }),
    }
}

fn decode_interned(state: &mut DecodeState, wrap: fn(Rc<str>) -> Value) -> Result<Value> {
    state.pos += 1;
    let bytes = decode_interned_bytes_raw(state)?;
    let value = wrap(bytes);
    state.push_value(value.clone());
    Ok(value)
}

fn decode_interned_bytes_raw(state: &mut DecodeState) -> Result<Rc<str>> {
    let len = state.read_varint()? as usize;
    let bytes = state.read_bytes(len)?;
    let s = std::str::from_utf8(bytes)
        .map_err(|_| MarshalError::BadFrame("string-like value is not valid UTF-8"))?;
    Ok(Rc::from(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::EmptyOpaqueRegistry;

    fn roundtrip(value: &Value) -> Value {
        let mut sink = Vec::new();
        let mut enc = EncodeState::new(&mut sink, &(), &EmptyOpaqueRegistry);
        encode_value(&mut enc, value).unwrap();
        let verifier = crate::host::AcceptAllVerifier;
        let mut dec = DecodeState::new(&sink, &(), &verifier, &EmptyOpaqueRegistry);
        decode_value(&mut dec).unwrap()
    }

    #[test]
    fn tuple_tag_is_shifted_into_the_upper_bits() {
        let t = Rc::new(TupleData {
            tag: 0x1234,
            items: vec![],
        });
        let mut sink = Vec::new();
        let mut enc = EncodeState::new(&mut sink, &(), &EmptyOpaqueRegistry);
        encode_value(&mut enc, &Value::Tuple(t)).unwrap();
        // opcode, count varint (0x00), then the flag word varint
        let mut pos = 2;
        let word = crate::varint::read(&sink, &mut pos).unwrap();
        assert_eq!(word, 0x1234 << 16);
    }

    #[test]
    fn table_with_non_table_prototype_is_rejected_on_encode() {
        let table = Rc::new(RefCell::new(TableData {
            proto: Some(Value::Int(1)),
            entries: vec![],
        }));
        let mut sink = Vec::new();
        let mut enc = EncodeState::new(&mut sink, &(), &EmptyOpaqueRegistry);
        let err = encode_value(&mut enc, &Value::Table(table)).unwrap_err();
        assert!(matches!(err, MarshalError::BadPrototype));
    }

    #[test]
    fn table_with_non_table_prototype_is_rejected_on_decode() {
        // TABLE_PROTO opcode, 0 entries, then a nil where a table is expected.
        let bytes = [opcode::TABLE_PROTO, 0x00, opcode::NIL];
        let verifier = crate::host::AcceptAllVerifier;
        let mut dec = DecodeState::new(&bytes, &(), &verifier, &EmptyOpaqueRegistry);
        let err = decode_value(&mut dec).unwrap_err();
        assert!(matches!(err, MarshalError::BadPrototype));
    }

    #[test]
    fn array_and_int_roundtrip_through_the_dispatcher() {
        let array = Rc::new(RefCell::new(vec![Value::Int(1), Value::Int(2)]));
        match roundtrip(&Value::Array(array)) {
            Value::Array(a) => assert_eq!(a.borrow().len(), 2),
            other => panic!("expected Array, got {other:?}"),
        }
    }
}
