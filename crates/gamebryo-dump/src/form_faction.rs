//! TESFaction reader.
//!
//! Small struct: `76 + shift` bytes. The full name BSStringT sits at
//! `+28 + shift`, the faction flags word at `+52 + shift`. Candidates
//! located by name-table carving often carry the display name already; the
//! in-struct string is only consulted when they don't.

use crate::context::RuntimeContext;
use crate::form_types::{FormCandidate, FormType, RecordHeader};
use crate::io_utils::u32_be_at;
use serde::{Deserialize, Serialize};

const FACTION_STRUCT_SIZE: usize = 76;

/// Faction flag bits (low word of the flags field).
pub const FACTION_HIDDEN_FROM_PC: u32 = 0x01;
pub const FACTION_EVIL: u32 = 0x02;
pub const FACTION_SPECIAL_COMBAT: u32 = 0x04;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactionRecord {
    pub header: RecordHeader,
    pub flags: u32,
}

impl FactionRecord {
    pub fn is_hidden_from_pc(&self) -> bool {
        self.flags & FACTION_HIDDEN_FROM_PC != 0
    }

    pub fn is_evil(&self) -> bool {
        self.flags & FACTION_EVIL != 0
    }
}

pub fn read_faction(ctx: &RuntimeContext, candidate: &FormCandidate) -> Option<FactionRecord> {
    if candidate.expected_form_type != FormType::Faction.code() {
        return None;
    }
    let s = ctx.shift() as usize;
    let size = FACTION_STRUCT_SIZE + s;
    if candidate.file_offset + size as u64 > ctx.file_size() {
        return None;
    }
    let buf = ctx.read_bytes(candidate.file_offset, size)?;
    if u32_be_at(buf, 12)? != candidate.expected_form_id {
        return None;
    }

    let mut header = RecordHeader::from_candidate(buf, candidate);
    if header.full_name.is_none() {
        header.full_name = ctx.bs_string_in_buf(buf, 28 + s);
    }

    Some(FactionRecord {
        header,
        flags: u32_be_at(buf, 52 + s)?,
    })
}
