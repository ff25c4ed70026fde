//! Wire-format opcode table (spec §4.3).
//!
//! Integers below `0x00..0x7F` and `0x80..0xBF` (two-byte varints) are
//! inlined values handled by [`crate::varint`]; everything from `0xC8` up
//! introduces a typed node. `0xC9..=0xFF` outside the table below is
//! reserved and decodes as [`crate::error::MarshalError::BadOpcode`].

pub const LONG_INTEGER: u8 = 0xC8;
pub const REAL: u8 = 0xC9;
pub const NIL: u8 = 0xCA;
pub const FALSE: u8 = 0xCB;
pub const TRUE: u8 = 0xCC;
pub const COROUTINE: u8 = 0xCD;
// 0xCE is an integer-kind prefix and unreachable as a standalone opcode.
pub const STRING: u8 = 0xCF;
pub const SYMBOL: u8 = 0xD0;
pub const KEYWORD: u8 = 0xD1;
pub const ARRAY: u8 = 0xD2;
pub const TUPLE: u8 = 0xD3;
pub const TABLE: u8 = 0xD4;
pub const TABLE_PROTO: u8 = 0xD5;
pub const STRUCT: u8 = 0xD6;
pub const BUFFER: u8 = 0xD7;
pub const FUNCTION: u8 = 0xD8;
pub const REGISTRY: u8 = 0xD9;
pub const OPAQUE: u8 = 0xDA;
pub const REFERENCE: u8 = 0xDB;
pub const FUNCENV_REF: u8 = 0xDC;
pub const FUNCDEF_REF: u8 = 0xDD;

/// `true` for every byte that introduces a typed node (the range `0xC8..=0xDD`
/// minus the unreachable `0xCE` slot).
pub fn is_known(byte: u8) -> bool {
    matches!(
        byte,
        LONG_INTEGER
            | REAL
            | NIL
            | FALSE
            | TRUE
            | COROUTINE
            | STRING
            | SYMBOL
            | KEYWORD
            | ARRAY
            | TUPLE
            | TABLE
            | TABLE_PROTO
            | STRUCT
            | BUFFER
            | FUNCTION
            | REGISTRY
            | OPAQUE
            | REFERENCE
            | FUNCENV_REF
            | FUNCDEF_REF
    )
}
