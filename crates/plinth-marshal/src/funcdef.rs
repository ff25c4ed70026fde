//! Function definition codec (spec §4.7).
//!
//! A function definition is the immutable, shared record of a function's
//! code, constants, and metadata. It is never mutated after compilation
//! (spec §3), so — unlike environments and coroutines — it never
//! participates in a genuine cycle; dedup through `funcdef-ref` exists
//! purely to avoid re-emitting a definition shared by multiple closures.

use std::rc::Rc;

use crate::error::Result;
use crate::opcode;
use crate::state::{DecodeState, EncodeState};
use crate::value::Value;
use crate::varint;

const HAS_NAME: i32 = 0x01;
const HAS_SOURCE: i32 = 0x02;
const HAS_NESTED: i32 = 0x04;
const HAS_ENVIRONMENTS: i32 = 0x08;
const HAS_SOURCE_MAP: i32 = 0x10;
const PRESENCE_MASK: i32 = HAS_NAME | HAS_SOURCE | HAS_NESTED | HAS_ENVIRONMENTS | HAS_SOURCE_MAP;

/// A half-open byte range into the original source, one per bytecode word.
pub type SourceRange = (u32, u32);

/// The immutable, shared record of a function's code and metadata (spec §3).
#[derive(Debug, Default)]
pub struct FunctionDef {
    /// Flag bits outside the presence mask (host-defined, e.g. vararg/macro bits).
    pub flags: i32,
    pub arity: i32,
    pub slot_count: i32,
    pub constants: Vec<Value>,
    pub bytecode: Vec<u32>,
    /// Which lexical frames this function's code captures.
    pub environments: Vec<i32>,
    pub nested: Vec<Rc<FunctionDef>>,
    pub name: Option<Rc<str>>,
    pub source: Option<Rc<str>>,
    pub source_map: Option<Vec<SourceRange>>,
}

pub fn encode_funcdef(state: &mut EncodeState, def: &Rc<FunctionDef>) -> Result<()> {
    if let Some(id) = state.funcdef_id(def) {
        state.sink.push_byte(opcode::FUNCDEF_REF);
        varint::push(state.sink, id as i32);
        return Ok(());
    }
    // Nested definitions recurse through this function directly rather than
    // through `encode_value`, so the recursion guard is entered here too.
    let mut state = crate::state::DepthGuard::enter(state)?;
    state.mark_funcdef_seen(def);

    let has_name = def.name.is_some();
    let has_source = def.source.is_some();
    let has_nested = !def.nested.is_empty();
    let has_envs = !def.environments.is_empty();
    let has_srcmap = def.source_map.is_some();

    let mut wire_flags = def.flags & !PRESENCE_MASK;
    if has_name {
        wire_flags |= HAS_NAME;
    }
    if has_source {
        wire_flags |= HAS_SOURCE;
    }
    if has_nested {
        wire_flags |= HAS_NESTED;
    }
    if has_envs {
        wire_flags |= HAS_ENVIRONMENTS;
    }
    if has_srcmap {
        wire_flags |= HAS_SOURCE_MAP;
    }

    varint::push(state.sink, wire_flags);
    varint::push(state.sink, def.slot_count);
    varint::push(state.sink, def.arity);
    varint::push(state.sink, def.constants.len() as i32);
    varint::push(state.sink, def.bytecode.len() as i32);
    if has_envs {
        varint::push(state.sink, def.environments.len() as i32);
    }
    if has_nested {
        varint::push(state.sink, def.nested.len() as i32);
    }
    if let Some(name) = &def.name {
        push_raw_string(state.sink, name);
    }
    if let Some(source) = &def.source {
        push_raw_string(state.sink, source);
    }
    for constant in &def.constants {
        crate::primitive::encode_value(&mut state, constant)?;
    }
    for word in &def.bytecode {
        state.sink.push_bytes(&word.to_le_bytes());
    }
    for index in &def.environments {
        varint::push(state.sink, *index);
    }
    for nested in &def.nested {
        encode_funcdef(&mut state, nested)?;
    }
    if let Some(map) = &def.source_map {
        let mut running: i64 = 0;
        for (start, end) in map {
            varint::push(state.sink, (*start as i64 - running) as i32);
            varint::push(state.sink, (*end as i64 - *start as i64) as i32);
            running = *end as i64;
        }
    }
    Ok(())
}

pub fn decode_funcdef(state: &mut DecodeState) -> Result<Rc<FunctionDef>> {
    let tag = state.peek_u8()?;
    if tag == opcode::FUNCDEF_REF {
        state.pos += 1;
        let id = state.read_varint()? as u32;
        return state.get_funcdef(id);
    }

    let mut state = crate::state::DepthGuard::enter(state)?;
    let id = state.reserve_funcdef_slot(Rc::new(FunctionDef::default()));

    let wire_flags = state.read_varint()?;
    let has_name = wire_flags & HAS_NAME != 0;
    let has_source = wire_flags & HAS_SOURCE != 0;
    let has_nested = wire_flags & HAS_NESTED != 0;
    let has_envs = wire_flags & HAS_ENVIRONMENTS != 0;
    let has_srcmap = wire_flags & HAS_SOURCE_MAP != 0;

    let slot_count = state.read_varint()?;
    let arity = state.read_varint()?;
    let constants_count = state.read_varint()? as usize;
    let bytecode_count = state.read_varint()? as usize;
    let env_count = if has_envs { state.read_varint()? as usize } else { 0 };
    let nested_count = if has_nested { state.read_varint()? as usize } else { 0 };

    let name = if has_name {
        Some(read_raw_string(&mut state)?)
    } else {
        None
    };
    let source = if has_source {
        Some(read_raw_string(&mut state)?)
    } else {
        None
    };

    let mut constants = Vec::with_capacity(constants_count);
    for _ in 0..constants_count {
        constants.push(crate::primitive::decode_value(&mut state)?);
    }

    let mut bytecode = Vec::with_capacity(bytecode_count);
    for _ in 0..bytecode_count {
        let bytes = state.read_bytes(4)?;
        bytecode.push(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
    }

    let mut environments = Vec::with_capacity(env_count);
    for _ in 0..env_count {
        environments.push(state.read_varint()?);
    }

    let mut nested = Vec::with_capacity(nested_count);
    for _ in 0..nested_count {
        nested.push(decode_funcdef(&mut state)?);
    }

    let source_map = if has_srcmap {
        let mut map = Vec::with_capacity(bytecode_count);
        let mut running: i64 = 0;
        for _ in 0..bytecode_count {
            let start = running + state.read_varint()? as i64;
            let end = start + state.read_varint()? as i64;
            map.push((start as u32, end as u32));
            running = end;
        }
        Some(map)
    } else {
        None
    };

    let def = Rc::new(FunctionDef {
        flags: wire_flags & !PRESENCE_MASK,
        arity,
        slot_count,
        constants,
        bytecode,
        environments,
        nested,
        name,
        source,
        source_map,
    });

    if !state.verifier.verify(&def) {
        return Err(crate::error::MarshalError::BadBytecode);
    }

    state.fill_funcdef(id, def.clone());
    Ok(def)
}

fn push_raw_string(sink: &mut dyn crate::sink::Sink, s: &str) {
    varint::push(sink, s.len() as i32);
    sink.push_bytes(s.as_bytes());
}

fn read_raw_string(state: &mut DecodeState) -> Result<Rc<str>> {
    let len = state.read_varint()? as usize;
    let bytes = state.read_bytes(len)?;
    let s = std::str::from_utf8(bytes)
        .map_err(|_| crate::error::MarshalError::BadFrame("function name/source is not valid UTF-8"))?;
    Ok(Rc::from(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{AcceptAllVerifier, EmptyOpaqueRegistry};

    fn sample(name: &str) -> Rc<FunctionDef> {
        Rc::new(FunctionDef {
            flags: 0,
            arity: 2,
            slot_count: 4,
            constants: vec![Value::Int(7)],
            bytecode: vec![0x01020304],
            environments: vec![],
            nested: vec![],
            name: Some(Rc::from(name)),
            source: None,
            source_map: None,
        })
    }

    #[test]
    fn funcdef_roundtrips_name_arity_and_bytecode() {
        let def = sample("greet");
        let mut sink = Vec::new();
        let mut enc = EncodeState::new(&mut sink, &(), &EmptyOpaqueRegistry);
        encode_funcdef(&mut enc, &def).unwrap();

        let verifier = AcceptAllVerifier;
        let mut dec = DecodeState::new(&sink, &(), &verifier, &EmptyOpaqueRegistry);
        let decoded = decode_funcdef(&mut dec).unwrap();

        assert_eq!(decoded.arity, 2);
        assert_eq!(decoded.slot_count, 4);
        assert_eq!(decoded.bytecode, vec![0x01020304]);
        assert_eq!(decoded.name.as_deref(), Some("greet"));
    }

    #[test]
    fn repeated_funcdef_is_emitted_once_and_shared_on_decode() {
        let def = sample("shared");
        let mut sink = Vec::new();
        let mut enc = EncodeState::new(&mut sink, &(), &EmptyOpaqueRegistry);
        encode_funcdef(&mut enc, &def).unwrap();
        encode_funcdef(&mut enc, &def).unwrap();

        let verifier = AcceptAllVerifier;
        let mut dec = DecodeState::new(&sink, &(), &verifier, &EmptyOpaqueRegistry);
        let first = decode_funcdef(&mut dec).unwrap();
        let second = decode_funcdef(&mut dec).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn deeply_nested_funcdefs_trip_the_recursion_guard() {
        let mut def = sample("leaf");
        for _ in 0..5000 {
            def = Rc::new(FunctionDef {
                flags: 0,
                arity: 0,
                slot_count: 0,
                constants: vec![],
                bytecode: vec![],
                environments: vec![],
                nested: vec![def],
                name: None,
                source: None,
                source_map: None,
            });
        }
        let mut sink = Vec::new();
        let mut enc = EncodeState::new(&mut sink, &(), &EmptyOpaqueRegistry);
        let err = encode_funcdef(&mut enc, &def).unwrap_err();
        assert!(matches!(err, crate::error::MarshalError::StackOverflow { .. }));
    }
}
