//! Opcode-substitution tables for size compression.
//!
//! Many instructions carry small immediates that repeat constantly: local
//! indices 0..31, the constants 0 and 1, common memory offsets. A module may
//! carry a table assigning such `(opcode, immediates)` tuples to opcode byte
//! values the module does not otherwise use; the emitter then writes the
//! single table byte instead of the long form.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use super::buffer::{self, Buffer};
use crate::errors::DecodeError;
use crate::ir::{Ieee32, Ieee64, Literal, Type};

pub const MAX_IMMEDIATES: usize = 2;
pub const MAX_OPCODE: usize = 256;

/// The immediates attached to one emitted opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Imms {
    None,
    U32(u32),
    S32(i32),
    S64(i64),
    F32(Ieee32),
    F64(Ieee64),
    Pair(u32, u32),
}

/// An opcode plus its immediate values, the unit the table substitutes.
/// Totally ordered so tables and candidate lists are deterministic.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct OpcodeEntry {
    pub op: u8,
    pub values: SmallVec<[Literal; MAX_IMMEDIATES]>,
}

impl OpcodeEntry {
    pub fn new(op: u8, imms: Imms) -> OpcodeEntry {
        let mut values = SmallVec::new();
        match imms {
            Imms::None => {}
            // unsigned immediates ride in i32 literals; the re-reader
            // interprets them per opcode
            Imms::U32(x) => values.push(Literal::I32(x as i32)),
            Imms::S32(x) => values.push(Literal::I32(x)),
            Imms::S64(x) => values.push(Literal::I64(x)),
            Imms::F32(x) => values.push(Literal::F32(x)),
            Imms::F64(x) => values.push(Literal::F64(x)),
            Imms::Pair(x, y) => {
                values.push(Literal::I32(x as i32));
                values.push(Literal::I32(y as i32));
            }
        }
        OpcodeEntry { op, values }
    }

    pub fn has_immediates(&self) -> bool {
        !self.values.is_empty()
    }
}

/// Frequencies and immediate byte sizes observed during a trial encoding.
#[derive(Clone, Debug)]
pub struct OpcodeInfo {
    /// How often each raw opcode byte was emitted; nonzero means the byte
    /// value is taken and cannot host a table entry.
    freqs: Vec<usize>,
    /// Per distinct `(opcode, immediates)` tuple: (frequency, immediate
    /// byte size).
    entries: BTreeMap<OpcodeEntry, (usize, usize)>,
}

impl Default for OpcodeInfo {
    fn default() -> OpcodeInfo {
        OpcodeInfo {
            freqs: vec![0; MAX_OPCODE],
            entries: BTreeMap::new(),
        }
    }
}

impl OpcodeInfo {
    pub fn record(&mut self, entry: OpcodeEntry, imm_bytes: usize) {
        self.freqs[entry.op as usize] += 1;
        let slot = self.entries.entry(entry).or_insert((0, imm_bytes));
        slot.0 += 1;
    }

    /// frequency x immediate-byte-size: the bytes saved by emitting the
    /// single table byte instead of the long form. Higher is better.
    pub fn cost(&self, entry: &OpcodeEntry) -> usize {
        match self.entries.get(entry) {
            Some(&(freq, imm_bytes)) => freq * imm_bytes,
            None => 0,
        }
    }
}

/// A built table: byte value -> entry, plus the reverse mapping used while
/// emitting.
#[derive(Clone, Debug)]
pub struct OpcodeTable {
    entries: Vec<Option<OpcodeEntry>>,
    mapping: BTreeMap<OpcodeEntry, u8>,
}

impl Default for OpcodeTable {
    fn default() -> OpcodeTable {
        OpcodeTable {
            entries: vec![None; MAX_OPCODE],
            mapping: BTreeMap::new(),
        }
    }
}

impl OpcodeTable {
    /// Assign the highest-cost tuples to the opcode byte values the module
    /// leaves unused. Candidates are ordered by cost descending, ties by
    /// opcode byte then immediate values.
    pub fn build(info: &OpcodeInfo) -> OpcodeTable {
        let mut order: Vec<&OpcodeEntry> = info
            .entries
            .keys()
            .filter(|e| info.cost(e) > 0)
            .collect();
        order.sort_by(|a, b| {
            info.cost(b)
                .cmp(&info.cost(a))
                .then_with(|| a.op.cmp(&b.op))
                .then_with(|| a.values.cmp(&b.values))
        });

        let mut table = OpcodeTable::default();
        let mut next = 0;
        for byte in 0..MAX_OPCODE {
            if info.freqs[byte] > 0 || next >= order.len() {
                continue;
            }
            let entry = order[next].clone();
            table.mapping.insert(entry.clone(), byte as u8);
            table.entries[byte] = Some(entry);
            next += 1;
        }
        table
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// The byte assigned to this tuple, if any.
    pub fn lookup(&self, entry: &OpcodeEntry) -> Option<u8> {
        self.mapping.get(entry).copied()
    }

    /// The entry occupying a byte value, if any.
    pub fn get(&self, byte: u8) -> Option<&OpcodeEntry> {
        self.entries[byte as usize].as_ref()
    }

    /// Section body: `(count, repeated (used-byte, real-opcode,
    /// immediate-count, per-immediate (type-byte, typed-value)))`.
    pub fn emit(&self, buf: &mut Buffer) {
        buf.push_u8(self.mapping.len() as u8);
        for (byte, entry) in self.entries.iter().enumerate() {
            let Some(entry) = entry else { continue };
            buf.push_u8(byte as u8);
            buf.push_u8(entry.op);
            buf.push_u8(entry.values.len() as u8);
            for value in &entry.values {
                buf.push_u8(super::type_code(value.ty()));
                match value {
                    Literal::I32(v) => buf.push_s32_leb(*v),
                    Literal::I64(v) => buf.push_s64_leb(*v),
                    Literal::F32(v) => buf.push_f32(*v),
                    Literal::F64(v) => buf.push_f64(*v),
                }
            }
        }
    }

    /// Parse a section body written by [`OpcodeTable::emit`].
    pub fn parse(input: &[u8], pos: &mut usize) -> Result<OpcodeTable, DecodeError> {
        let mut table = OpcodeTable::default();
        let count = buffer::read_u8(input, pos)? as usize;
        for _ in 0..count {
            let used_byte = buffer::read_u8(input, pos)?;
            let op = buffer::read_u8(input, pos)?;
            let size = buffer::read_u8(input, pos)? as usize;
            if size > MAX_IMMEDIATES {
                return Err(DecodeError::Malformed(format!(
                    "opcode-table entry with {} immediates",
                    size
                )));
            }
            let mut values = SmallVec::new();
            for _ in 0..size {
                let ty = buffer::read_u8(input, pos)?;
                let value = match super::type_from_code(ty) {
                    Some(Type::I32) => Literal::I32(buffer::read_s32_leb(input, pos)?),
                    Some(Type::I64) => Literal::I64(buffer::read_s64_leb(input, pos)?),
                    Some(Type::F32) => Literal::F32(Ieee32(buffer::read_u32(input, pos)?)),
                    Some(Type::F64) => Literal::F64(Ieee64(buffer::read_u64(input, pos)?)),
                    _ => return Err(DecodeError::BadType(ty)),
                };
                values.push(value);
            }
            let entry = OpcodeEntry { op, values };
            table.mapping.insert(entry.clone(), used_byte);
            table.entries[used_byte as usize] = Some(entry);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_cost_entry_gets_the_first_free_byte() {
        let mut info = OpcodeInfo::default();
        // pretend opcode 0x14 (get_local) was emitted a lot with index 0,
        // occasionally with index 1
        for _ in 0..10 {
            info.record(OpcodeEntry::new(0x14, Imms::U32(0)), 1);
        }
        for _ in 0..2 {
            info.record(OpcodeEntry::new(0x14, Imms::U32(1)), 1);
        }
        let table = OpcodeTable::build(&info);
        assert_eq!(table.len(), 2);
        // byte 0 is free (only 0x14 is in use), so the hottest entry lands
        // there
        let e0 = table.get(0).unwrap();
        assert_eq!(e0.op, 0x14);
        assert_eq!(e0.values[0], Literal::I32(0));
        assert_eq!(
            table.lookup(&OpcodeEntry::new(0x14, Imms::U32(0))),
            Some(0)
        );
        // the used byte itself hosts no entry
        assert!(table.get(0x14).is_none());
    }

    #[test]
    fn emit_then_parse_restores_the_table() {
        let mut info = OpcodeInfo::default();
        info.record(OpcodeEntry::new(0x10, Imms::S32(-5)), 1);
        info.record(OpcodeEntry::new(0x06, Imms::Pair(1, 2)), 2);
        let table = OpcodeTable::build(&info);
        let mut buf = Buffer::new();
        table.emit(&mut buf);
        let mut pos = 0;
        let parsed = OpcodeTable::parse(buf.as_slice(), &mut pos).unwrap();
        assert_eq!(pos, buf.len());
        assert_eq!(parsed.len(), table.len());
        for byte in 0..MAX_OPCODE {
            assert_eq!(parsed.get(byte as u8), table.get(byte as u8));
        }
    }
}
