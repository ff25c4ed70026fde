//! Function environment codec (spec §4.8).
//!
//! An environment is either *live* — a window `[offset, offset+length)`
//! into a still-running coroutine's data vector — or *detached*, owning its
//! captured values outright once the frame that created it has returned.
//! The live case is the one genuine source of cycles in this subsystem: a
//! coroutine's own frame can capture an environment that points straight
//! back at that coroutine (spec §4.10, "a coroutine awaiting itself
//! indirectly through a captured environment").

use std::cell::RefCell;
use std::rc::Rc;

use crate::coroutine::CoroutineData;
use crate::error::Result;
use crate::opcode;
use crate::state::{DecodeState, EncodeState};
use crate::value::Value;
use crate::varint;

#[derive(Debug)]
pub enum FunctionEnvStorage {
    Live(Rc<RefCell<CoroutineData>>),
    Detached(RefCell<Vec<Value>>),
}

/// A function environment: captured upvalues for a closure (spec §3).
#[derive(Debug)]
pub struct FunctionEnv {
    pub offset: u32,
    pub length: u32,
    pub storage: FunctionEnvStorage,
}

impl FunctionEnv {
    fn placeholder() -> Self {
        FunctionEnv {
            offset: 0,
            length: 0,
            storage: FunctionEnvStorage::Detached(RefCell::new(Vec::new())),
        }
    }
}

pub fn encode_funcenv(state: &mut EncodeState, env: &Rc<FunctionEnv>) -> Result<()> {
    if let Some(id) = state.funcenv_id(env) {
        state.sink.push_byte(opcode::FUNCENV_REF);
        varint::push(state.sink, id as i32);
        return Ok(());
    }
    state.mark_funcenv_seen(env);

    varint::push(state.sink, env.offset as i32);
    varint::push(state.sink, env.length as i32);
    match &env.storage {
        FunctionEnvStorage::Live(coroutine) => {
            crate::primitive::encode_value(state, &Value::Coroutine(coroutine.clone()))?;
        }
        FunctionEnvStorage::Detached(values) => {
            let values = values.borrow();
            for value in values.iter() {
                crate::primitive::encode_value(state, value)?;
            }
        }
    }
    Ok(())
}

pub fn decode_funcenv(state: &mut DecodeState) -> Result<Rc<FunctionEnv>> {
    let tag = state.peek_u8()?;
    if tag == opcode::FUNCENV_REF {
        state.pos += 1;
        let id = state.read_varint()? as u32;
        return state.get_funcenv(id);
    }

    let offset = state.read_varint()? as u32;
    let length = state.read_varint()? as u32;

    let id = state.reserve_funcenv_slot(Rc::new(FunctionEnv::placeholder()));

    let storage = if offset != 0 {
        let decoded = crate::primitive::decode_value(state)?;
        let coroutine = match decoded {
            Value::Coroutine(c) => c,
            _ => {
                return Err(crate::error::MarshalError::BadFrame(
                    "live environment did not resolve to a coroutine",
                ))
            }
        };
        // The environment self-reports its (offset, length) window; verify it
        // against the coroutine's declared stack_top rather than trusting it
        // blindly, since a corrupted or adversarial stream could claim any
        // range. `stack_top` is known as soon as the coroutine header is
        // read, unlike `data` which may still be under construction if this
        // environment is reached through a cycle back into its own
        // enclosing coroutine.
        let claimed_end = offset as u64 + length as u64;
        if claimed_end > coroutine.borrow().stack_top as u64 {
            return Err(crate::error::MarshalError::BadFrame(
                "live environment range exceeds its coroutine's stack top",
            ));
        }
        FunctionEnvStorage::Live(coroutine)
    } else {
        let mut values = Vec::with_capacity(length as usize);
        for _ in 0..length {
            values.push(crate::primitive::decode_value(state)?);
        }
        FunctionEnvStorage::Detached(RefCell::new(values))
    };

    let env = Rc::new(FunctionEnv {
        offset,
        length,
        storage,
    });
    state.fill_funcenv(id, env.clone());
    Ok(env)
}
