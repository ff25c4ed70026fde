//! Coroutine codec (spec §4.10).
//!
//! A coroutine carries its call-frame stack and its shared value data
//! vector. Frames are emitted innermost-to-outermost (the order a debugger
//! would unwind them); alive coroutines and native (non-bytecode) frames
//! cannot be represented on the wire and are rejected outright rather than
//! silently truncated. A coroutine may optionally be awaiting a child
//! coroutine, emitted after the frame chain.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{MarshalError, Result};
use crate::funcenv::FunctionEnv;
use crate::opcode;
use crate::state::{DecodeState, EncodeState};
use crate::value::{Closure, SeenKey, Value};
use crate::varint;

const STATUS_MASK: i32 = 0x0F;
const HAS_CHILD: i32 = 0x10;
const FRAME_HAS_ENV: i32 = 0x01;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoroutineStatus {
    New,
    Suspended,
    Alive,
    Dead,
    Errored,
}

impl CoroutineStatus {
    fn to_byte(self) -> u8 {
        match self {
            CoroutineStatus::New => 0,
            CoroutineStatus::Suspended => 1,
            CoroutineStatus::Alive => 2,
            CoroutineStatus::Dead => 3,
            CoroutineStatus::Errored => 4,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(CoroutineStatus::New),
            1 => Ok(CoroutineStatus::Suspended),
            2 => Ok(CoroutineStatus::Alive),
            3 => Ok(CoroutineStatus::Dead),
            4 => Ok(CoroutineStatus::Errored),
            _ => Err(MarshalError::BadFrame("unrecognized coroutine status byte")),
        }
    }
}

/// A single call frame. `closure` is `None` for a native (host-function)
/// frame, which has no bytecode and so cannot be marshaled (spec §4.10).
#[derive(Debug)]
pub struct Frame {
    pub closure: Option<Rc<Closure>>,
    pub pc: u32,
    pub base: u32,
    /// Offset back to the previous (outward) frame's header.
    pub prev_frame: u32,
    /// The environment this frame captured, if it closed over one of its
    /// own slots rather than a detached copy.
    pub env: Option<Rc<FunctionEnv>>,
}

#[derive(Debug)]
pub struct CoroutineData {
    pub status: CoroutineStatus,
    /// Outermost frame first, innermost (currently executing) frame last.
    pub frames: Vec<Frame>,
    /// The value stack shared by every frame; live environments index into
    /// this by `[offset, offset+length)`.
    pub data: Vec<Value>,
    /// Saved top-of-stack slot index.
    pub stack_top: u32,
    /// Total slots allocated for this coroutine's stack.
    pub maxstack: u32,
    /// A coroutine this one is currently awaiting, if any.
    pub child: Option<Rc<RefCell<CoroutineData>>>,
}

pub fn encode_coroutine(
    state: &mut EncodeState,
    coroutine: &Rc<RefCell<CoroutineData>>,
    key: SeenKey,
) -> Result<()> {
    state.mark_seen(key);

    let data = coroutine.borrow();
    if data.status == CoroutineStatus::Alive {
        return Err(MarshalError::AliveCoroutine);
    }

    state.sink.push_byte(opcode::COROUTINE);

    let mut flags = data.status.to_byte() as i32;
    if data.child.is_some() {
        flags |= HAS_CHILD;
    }
    varint::push(state.sink, flags);

    let frame_base = data.frames.last().map(|f| f.base).unwrap_or(0);
    varint::push(state.sink, frame_base as i32);
    varint::push(state.sink, data.stack_top as i32);
    varint::push(state.sink, data.maxstack as i32);
    varint::push(state.sink, data.frames.len() as i32);

    for (idx, frame) in data.frames.iter().enumerate().rev() {
        let closure = frame.closure.as_ref().ok_or(MarshalError::NativeFrame)?;

        let mut frame_flags: i32 = 0;
        if frame.env.is_some() {
            frame_flags |= FRAME_HAS_ENV;
        }
        varint::push(state.sink, frame_flags);
        varint::push(state.sink, frame.prev_frame as i32);
        varint::push(state.sink, frame.pc as i32);
        crate::primitive::encode_value(state, &Value::Function(closure.clone()))?;
        if let Some(env) = &frame.env {
            crate::funcenv::encode_funcenv(state, env)?;
        }

        let slot_top = if idx + 1 < data.frames.len() {
            data.frames[idx + 1].base
        } else {
            data.stack_top
        };
        let slots = &data.data[frame.base as usize..slot_top as usize];
        varint::push(state.sink, slots.len() as i32);
        for value in slots {
            crate::primitive::encode_value(state, value)?;
        }
    }

    if let Some(child) = &data.child {
        crate::primitive::encode_value(state, &Value::Coroutine(child.clone()))?;
    }

    Ok(())
}

pub fn decode_coroutine(state: &mut DecodeState) -> Result<Value> {
    let flags = state.read_varint()?;
    let status = CoroutineStatus::from_byte((flags & STATUS_MASK) as u8)?;
    if status == CoroutineStatus::Alive {
        return Err(MarshalError::AliveCoroutine);
    }
    let has_child = flags & HAS_CHILD != 0;

    let _frame_base = state.read_varint()? as u32;
    let stack_top = state.read_varint()? as u32;
    let maxstack = state.read_varint()? as u32;

    let rc = Rc::new(RefCell::new(CoroutineData {
        status,
        frames: Vec::new(),
        data: Vec::new(),
        stack_top,
        maxstack,
        child: None,
    }));
    let value = Value::Coroutine(rc.clone());
    state.push_value(value.clone());

    let frame_count = state.read_varint()? as usize;
    let mut innermost_first = Vec::with_capacity(frame_count);
    let mut slot_chunks = Vec::with_capacity(frame_count);
    for _ in 0..frame_count {
        let frame_flags = state.read_varint()?;
        let has_env = frame_flags & FRAME_HAS_ENV != 0;
        let prev_frame = state.read_varint()? as u32;
        let pc = state.read_varint()? as u32;

        let decoded = crate::primitive::decode_value(state)?;
        let closure = match decoded {
            Value::Function(c) => c,
            _ => {
                return Err(MarshalError::BadFrame(
                    "coroutine frame did not decode a function",
                ))
            }
        };
        if pc as usize > closure.def.bytecode.len() {
            return Err(MarshalError::BadFrame("frame program counter out of bounds"));
        }
        let env = if has_env {
            Some(crate::funcenv::decode_funcenv(state)?)
        } else {
            None
        };

        let slot_count = state.read_varint()? as usize;
        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            slots.push(crate::primitive::decode_value(state)?);
        }

        innermost_first.push(Frame {
            closure: Some(closure),
            pc,
            base: 0,
            prev_frame,
            env,
        });
        slot_chunks.push(slots);
    }

    let mut outer_first = innermost_first;
    outer_first.reverse();
    slot_chunks.reverse();

    let mut base = 0u32;
    for (frame, slots) in outer_first.iter_mut().zip(slot_chunks.iter()) {
        frame.base = base;
        base += slots.len() as u32;
    }
    if base != stack_top {
        return Err(MarshalError::BadFrame(
            "reconstructed stack top does not match the declared stack top",
        ));
    }

    for pair in outer_first.windows(2) {
        let outer = &pair[0];
        let inner = &pair[1];
        if inner.prev_frame > inner.base {
            return Err(MarshalError::BadFrame(
                "frame's previous-frame offset exceeds its base",
            ));
        }
        let outer_slots = outer.closure.as_ref().unwrap().def.slot_count as u32;
        if inner.base != outer.base + outer_slots {
            return Err(MarshalError::BadFrame(
                "frame base misaligned with caller's slot count",
            ));
        }
    }
    if let Some(innermost) = outer_first.last() {
        let expected = innermost.closure.as_ref().unwrap().def.slot_count as u32;
        if stack_top - innermost.base != expected {
            return Err(MarshalError::BadFrame(
                "innermost frame's slot count does not match the stack top",
            ));
        }
    }

    let mut data = Vec::with_capacity(stack_top as usize);
    for slots in slot_chunks {
        data.extend(slots);
    }

    let child = if has_child {
        let decoded = crate::primitive::decode_value(state)?;
        match decoded {
            Value::Coroutine(c) => Some(c),
            _ => {
                return Err(MarshalError::BadFrame(
                    "coroutine child did not decode a coroutine",
                ))
            }
        }
    } else {
        None
    };

    {
        let mut coro = rc.borrow_mut();
        coro.frames = outer_first;
        coro.data = data;
        coro.child = child;
    }
    Ok(value)
}
