//! Registry codec (spec §4.5).
//!
//! The registry lets a host attach a symbolic name to an out-of-band
//! singleton (e.g. a native module table) so it round-trips by name instead
//! of by structure. A registry hit still occupies a seen-table slot like any
//! other reference value — a second reference to the same named value later
//! in the same stream is a plain back-reference, not a second registry
//! lookup.

use crate::error::Result;
use crate::opcode;
use crate::state::{DecodeState, EncodeState};
use crate::value::Value;
use crate::varint;

pub fn encode_registry_hit(state: &mut EncodeState, name: &str) {
    state.sink.push_byte(opcode::REGISTRY);
    varint::push(state.sink, name.len() as i32);
    state.sink.push_bytes(name.as_bytes());
}

/// Decode a registry reference. A name the host's forward registry doesn't
/// recognize resolves to `nil` (spec §4.5) rather than an error, since the
/// host may simply not have registered that name in this process.
pub fn decode_registry(state: &mut DecodeState) -> Result<Value> {
    let len = state.read_varint()? as usize;
    let bytes = state.read_bytes(len)?;
    let name = std::str::from_utf8(bytes)
        .map_err(|_| crate::error::MarshalError::BadFrame("registry name is not valid UTF-8"))?;
    let value = state.forward_registry.resolve(name).unwrap_or(Value::Nil);
    state.push_value(value.clone());
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{AcceptAllVerifier, EmptyOpaqueRegistry, ForwardRegistry, ReverseRegistry};

    struct NativeModule;

    impl ReverseRegistry for NativeModule {
        fn lookup(&self, value: &Value) -> Option<&str> {
            match value {
                Value::Keyword(k) if k.as_ref() == "native-module" => Some("native-module"),
                _ => None,
            }
        }
    }

    impl ForwardRegistry for NativeModule {
        fn resolve(&self, name: &str) -> Option<Value> {
            if name == "native-module" {
                Some(Value::Keyword(std::rc::Rc::from("native-module")))
            } else {
                None
            }
        }
    }

    #[test]
    fn registered_value_round_trips_by_name() {
        let value = Value::Keyword(std::rc::Rc::from("native-module"));
        let registry = NativeModule;
        let mut sink = Vec::new();
        let mut enc = EncodeState::new(&mut sink, &registry, &EmptyOpaqueRegistry);
        crate::primitive::encode_value(&mut enc, &value).unwrap();
        assert_eq!(sink[0], opcode::REGISTRY);

        let verifier = AcceptAllVerifier;
        let mut dec = DecodeState::new(&sink, &registry, &verifier, &EmptyOpaqueRegistry);
        let decoded = crate::primitive::decode_value(&mut dec).unwrap();
        assert!(matches!(decoded, Value::Keyword(k) if k.as_ref() == "native-module"));
    }

    #[test]
    fn unregistered_name_resolves_to_nil() {
        // Payload only: the outer opcode byte is stripped by the caller
        // (`primitive::decode_value`) before `decode_registry` ever runs.
        let bytes = {
            let mut sink = Vec::new();
            varint::push(&mut sink, "missing".len() as i32);
            sink.extend_from_slice(b"missing");
            sink
        };
        let verifier = AcceptAllVerifier;
        let mut dec = DecodeState::new(&bytes, &(), &verifier, &EmptyOpaqueRegistry);
        let decoded = decode_registry(&mut dec).unwrap();
        assert!(matches!(decoded, Value::Nil));
    }
}
