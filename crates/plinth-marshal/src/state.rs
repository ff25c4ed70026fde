//! Shared encoder/decoder state (spec §4.2, §4.11, §9 "mutual recursion").
//!
//! Value, function-definition, function-environment, and coroutine codecs
//! form a tight recursive cycle. Rather than a dispatch table, each codec
//! is an independent routine over this shared state record, exactly as
//! spec §9 recommends: "a single tagged-variant switch per entry point
//! suffices."

use rustc_hash::FxHashMap;

use crate::error::{MarshalError, Result};
use crate::funcdef::FunctionDef;
use crate::funcenv::FunctionEnv;
use crate::host::{ForwardRegistry, OpaqueTypeRegistry, ReverseRegistry};
use crate::sink::Sink;
use crate::value::{SeenKey, Value};
use std::rc::Rc;

/// Host-configured bounds for the recursion guard (spec §4.11).
#[derive(Clone, Copy, Debug)]
pub struct RecursionLimits {
    pub max_depth: u32,
}

impl Default for RecursionLimits {
    fn default() -> Self {
        // 16-bit depth counter per spec §4.11; default well below its ceiling.
        Self { max_depth: 4096 }
    }
}

/// Implemented by both `EncodeState` and `DecodeState` so `DepthGuard` can
/// wrap either one.
pub trait HasDepth {
    fn depth_mut(&mut self) -> &mut u32;
    fn depth(&self) -> u32;
    fn limits(&self) -> RecursionLimits;
}

/// A scope guard that increments the shared depth counter on construction
/// and decrements it on drop, so every exit path (including `?`) unwinds
/// the count correctly. Wraps the whole state rather than just the depth
/// field and derefs to it, so callers keep using `state.whatever` exactly
/// as they would without the guard.
pub struct DepthGuard<'a, T: HasDepth> {
    inner: &'a mut T,
}

impl<'a, T: HasDepth> DepthGuard<'a, T> {
    pub fn enter(inner: &'a mut T) -> Result<Self> {
        if inner.depth() >= inner.limits().max_depth {
            return Err(MarshalError::StackOverflow {
                limit: inner.limits().max_depth,
            });
        }
        *inner.depth_mut() += 1;
        Ok(Self { inner })
    }
}

impl<'a, T: HasDepth> std::ops::Deref for DepthGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner
    }
}

impl<'a, T: HasDepth> std::ops::DerefMut for DepthGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner
    }
}

impl<'a, T: HasDepth> Drop for DepthGuard<'a, T> {
    fn drop(&mut self) {
        *self.inner.depth_mut() -= 1;
    }
}

/// Encoder-side scratch state, owned for the duration of one `marshal` call.
pub struct EncodeState<'a> {
    pub sink: &'a mut dyn Sink,
    seen: FxHashMap<SeenKey, u32>,
    next_value_id: u32,
    funcdefs: FxHashMap<usize, u32>,
    next_funcdef_id: u32,
    funcenvs: FxHashMap<usize, u32>,
    next_funcenv_id: u32,
    pub depth: u32,
    pub limits: RecursionLimits,
    pub reverse_registry: &'a dyn ReverseRegistry,
    pub opaque_registry: &'a dyn OpaqueTypeRegistry,
}

impl<'a> EncodeState<'a> {
    pub fn new(
        sink: &'a mut dyn Sink,
        reverse_registry: &'a dyn ReverseRegistry,
        opaque_registry: &'a dyn OpaqueTypeRegistry,
    ) -> Self {
        Self {
            sink,
            seen: FxHashMap::default(),
            next_value_id: 0,
            funcdefs: FxHashMap::default(),
            next_funcdef_id: 0,
            funcenvs: FxHashMap::default(),
            next_funcenv_id: 0,
            depth: 0,
            limits: RecursionLimits::default(),
            reverse_registry,
            opaque_registry,
        }
    }

    /// Look up (or assign) the dense id for a value's seen-table key.
    /// Returns `Some(id)` if this key was already seen (caller must emit a
    /// back-reference instead of a full encoding).
    pub fn seen_id(&self, key: SeenKey) -> Option<u32> {
        self.seen.get(&key).copied()
    }

    /// Mark a key seen, assigning it the next value id. Must be called
    /// exactly once per reference-typed value emitted, at the point spec §3
    /// dictates (before children for mutable containers, after for
    /// immutable ones).
    pub fn mark_seen(&mut self, key: SeenKey) -> u32 {
        let id = self.next_value_id;
        self.next_value_id += 1;
        self.seen.insert(key, id);
        id
    }

    pub fn funcdef_id(&self, def: &Rc<FunctionDef>) -> Option<u32> {
        self.funcdefs.get(&(Rc::as_ptr(def) as usize)).copied()
    }

    pub fn mark_funcdef_seen(&mut self, def: &Rc<FunctionDef>) -> u32 {
        let id = self.next_funcdef_id;
        self.next_funcdef_id += 1;
        self.funcdefs.insert(Rc::as_ptr(def) as usize, id);
        id
    }

    pub fn funcenv_id(&self, env: &Rc<FunctionEnv>) -> Option<u32> {
        self.funcenvs.get(&(Rc::as_ptr(env) as usize)).copied()
    }

    pub fn mark_funcenv_seen(&mut self, env: &Rc<FunctionEnv>) -> u32 {
        let id = self.next_funcenv_id;
        self.next_funcenv_id += 1;
        self.funcenvs.insert(Rc::as_ptr(env) as usize, id);
        id
    }
}

impl HasDepth for EncodeState<'_> {
    fn depth_mut(&mut self) -> &mut u32 {
        &mut self.depth
    }

    fn depth(&self) -> u32 {
        self.depth
    }

    fn limits(&self) -> RecursionLimits {
        self.limits
    }
}

/// Decoder-side scratch state, owned for the duration of one `unmarshal` call.
pub struct DecodeState<'a> {
    pub bytes: &'a [u8],
    pub pos: usize,
    values: Vec<Value>,
    funcdefs: Vec<Rc<FunctionDef>>,
    funcenvs: Vec<Rc<FunctionEnv>>,
    pub depth: u32,
    pub limits: RecursionLimits,
    pub forward_registry: &'a dyn ForwardRegistry,
    pub verifier: &'a dyn crate::host::BytecodeVerifier,
    pub opaque_registry: &'a dyn OpaqueTypeRegistry,
}

impl<'a> DecodeState<'a> {
    pub fn new(
        bytes: &'a [u8],
        forward_registry: &'a dyn ForwardRegistry,
        verifier: &'a dyn crate::host::BytecodeVerifier,
        opaque_registry: &'a dyn OpaqueTypeRegistry,
    ) -> Self {
        Self {
            bytes,
            pos: 0,
            values: Vec::new(),
            funcdefs: Vec::new(),
            funcenvs: Vec::new(),
            depth: 0,
            limits: RecursionLimits::default(),
            forward_registry,
            verifier,
            opaque_registry,
        }
    }

    /// Register a fully-formed value and return its id. For mutable
    /// containers (array/table/buffer/function/coroutine) the caller
    /// constructs the `Rc` shell first and pushes it before filling in its
    /// contents, so a back-reference encountered among those contents
    /// resolves to the same identity (spec §3, "mark seen before children").
    pub fn push_value(&mut self, value: Value) -> u32 {
        let id = self.values.len() as u32;
        self.values.push(value);
        id
    }

    pub fn get_value(&self, id: u32) -> Result<Value> {
        self.values
            .get(id as usize)
            .cloned()
            .ok_or(MarshalError::BadReference {
                kind: crate::error::ReferenceKind::Value,
                id,
                len: self.values.len(),
            })
    }

    pub fn reserve_funcdef_slot(&mut self, def: Rc<FunctionDef>) -> u32 {
        let id = self.funcdefs.len() as u32;
        self.funcdefs.push(def);
        id
    }

    pub fn fill_funcdef(&mut self, id: u32, def: Rc<FunctionDef>) {
        self.funcdefs[id as usize] = def;
    }

    pub fn get_funcdef(&self, id: u32) -> Result<Rc<FunctionDef>> {
        self.funcdefs
            .get(id as usize)
            .cloned()
            .ok_or(MarshalError::BadReference {
                kind: crate::error::ReferenceKind::FuncDef,
                id,
                len: self.funcdefs.len(),
            })
    }

    /// Reserve a funcenv id before the environment's contents are known
    /// (used while decoding the live branch, which may recurse back into
    /// the owning coroutine before this environment is complete).
    pub fn reserve_funcenv_slot(&mut self, env: Rc<FunctionEnv>) -> u32 {
        let id = self.funcenvs.len() as u32;
        self.funcenvs.push(env);
        id
    }

    pub fn fill_funcenv(&mut self, id: u32, env: Rc<FunctionEnv>) {
        self.funcenvs[id as usize] = env;
    }

    pub fn get_funcenv(&self, id: u32) -> Result<Rc<FunctionEnv>> {
        self.funcenvs
            .get(id as usize)
            .cloned()
            .ok_or(MarshalError::BadReference {
                kind: crate::error::ReferenceKind::FuncEnv,
                id,
                len: self.funcenvs.len(),
            })
    }

    /// Byte(s) remaining from the current cursor.
    pub fn require(&self, needed: usize) -> Result<()> {
        if self.pos + needed > self.bytes.len() {
            Err(MarshalError::Truncated {
                offset: self.pos,
                needed: self.pos + needed - self.bytes.len(),
            })
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.require(1)?;
        let b = self.bytes[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.require(1)?;
        Ok(self.bytes[self.pos])
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.require(len)?;
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_varint(&mut self) -> Result<i32> {
        crate::varint::read(self.bytes, &mut self.pos)
    }
}

impl HasDepth for DecodeState<'_> {
    fn depth_mut(&mut self) -> &mut u32 {
        &mut self.depth
    }

    fn depth(&self) -> u32 {
        self.depth
    }

    fn limits(&self) -> RecursionLimits {
        self.limits
    }
}
