//! Closure codec (spec §4.9).
//!
//! A closure is emitted as its function definition followed by exactly
//! `definition.environments.len()` captured environments, in order. The
//! closure's own value identity is marked seen *between* the definition and
//! the environments, which is what lets a self-recursive closure — one that
//! captures an environment holding itself — round-trip without looping
//! forever (spec §8 item 6).

use std::rc::Rc;

use crate::error::Result;
use crate::funcenv::FunctionEnv;
use crate::opcode;
use crate::state::{DecodeState, EncodeState};
use crate::value::{Closure, SeenKey, Value};

pub fn encode_closure(state: &mut EncodeState, closure: &Rc<Closure>, key: SeenKey) -> Result<()> {
    state.sink.push_byte(opcode::FUNCTION);
    crate::funcdef::encode_funcdef(state, &closure.def)?;
    state.mark_seen(key);

    let captured = closure.captured.borrow();
    for env in captured.iter() {
        crate::funcenv::encode_funcenv(state, env)?;
    }
    Ok(())
}

pub fn decode_closure(state: &mut DecodeState) -> Result<Value> {
    let def = crate::funcdef::decode_funcdef(state)?;
    let env_count = def.environments.len();

    let closure = Rc::new(Closure {
        def,
        captured: std::cell::RefCell::new(Vec::with_capacity(env_count)),
    });
    let value = Value::Function(closure.clone());
    state.push_value(value.clone());

    for _ in 0..env_count {
        let env: Rc<FunctionEnv> = crate::funcenv::decode_funcenv(state)?;
        closure.captured.borrow_mut().push(env);
    }
    Ok(value)
}
