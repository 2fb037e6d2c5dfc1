//! Script (SCPT) reader.
//!
//! The runtime Script struct is 100 bytes with a fixed layout across all
//! builds (no shift):
//!
//! | Offset | Type  | Field |
//! |--------|-------|-------|
//! | +20    | char* | compiled bytecode |
//! | +24    | char* | source text (null-terminated) |
//! | +40    | u32   | variable_count |
//! | +44    | u32   | ref_object_count |
//! | +48    | u32   | data_size |
//! | +52    | u32   | last_variable_id |
//! | +56    | u8    | is_quest |
//! | +57    | u8    | is_magic_effect |
//! | +58    | u8    | is_compiled |
//! | +60    | 8     | referenced-object list head (data, next) |
//! | +68    | 8     | variable list head (data, next) |
//!
//! Both strings are plain `char*`, not BSStringT. Referenced-object
//! entries are 16 bytes `{ editor_id: BSStringT, form*, variable_id }`;
//! variable entries are 32 bytes `{ SCRIPT_LOCAL(24), name: BSStringT }`
//! with the integer flag at SCRIPT_LOCAL +12.

use crate::context::RuntimeContext;
use crate::form_types::{FormCandidate, FormType, RecordHeader};
use crate::io_utils::{u32_be_at, u8_at};
use crate::list_walk;
use serde::{Deserialize, Serialize};

const SCRIPT_STRUCT_SIZE: usize = 100;

const MAX_VARIABLE_COUNT: u32 = 1000;
const MAX_REF_OBJECT_COUNT: u32 = 1000;
const MAX_DATA_SIZE: u32 = 1_000_000;
const MAX_SOURCE_TEXT: usize = 16384;
const MAX_VARIABLE_INDEX: u32 = 10_000;

/// One entry of the script's referenced-object table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRef {
    pub form_id: Option<u32>,
    pub editor_id: Option<String>,
    pub variable_id: u32,
}

/// One declared script variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptVariable {
    pub index: u32,
    pub is_integer: bool,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRecord {
    pub header: RecordHeader,
    pub variable_count: u32,
    pub ref_object_count: u32,
    pub data_size: u32,
    pub last_variable_id: u32,
    pub is_quest: bool,
    pub is_magic_effect: bool,
    pub is_compiled: bool,
    pub source_text: Option<String>,
    pub compiled_data: Option<Vec<u8>>,
    pub referenced_objects: Vec<ScriptRef>,
    pub variables: Vec<ScriptVariable>,
}

pub fn read_script(ctx: &RuntimeContext, candidate: &FormCandidate) -> Option<ScriptRecord> {
    if candidate.expected_form_type != FormType::Script.code() {
        return None;
    }
    if candidate.file_offset + SCRIPT_STRUCT_SIZE as u64 > ctx.file_size() {
        return None;
    }
    let buf = ctx.read_bytes(candidate.file_offset, SCRIPT_STRUCT_SIZE)?;
    if u32_be_at(buf, 12)? != candidate.expected_form_id {
        return None;
    }

    let variable_count = u32_be_at(buf, 40)?;
    let ref_object_count = u32_be_at(buf, 44)?;
    let data_size = u32_be_at(buf, 48)?;
    if variable_count > MAX_VARIABLE_COUNT
        || ref_object_count > MAX_REF_OBJECT_COUNT
        || data_size > MAX_DATA_SIZE
    {
        return None;
    }

    let source_text = u32_be_at(buf, 24)
        .filter(|&va| va != 0)
        .and_then(|va| ctx.read_text_va(va, MAX_SOURCE_TEXT));

    let compiled_data = if data_size > 0 {
        u32_be_at(buf, 20)
            .filter(|&va| va != 0 && ctx.is_valid_pointer(va))
            .and_then(|va| ctx.read_bytes_va(va, data_size as usize))
            .map(|bytes| bytes.to_vec())
    } else {
        None
    };

    let referenced_objects = collect_script_refs(ctx, buf);
    let variables = collect_script_variables(ctx, buf);

    Some(ScriptRecord {
        header: RecordHeader::from_candidate(buf, candidate),
        variable_count,
        ref_object_count,
        data_size,
        last_variable_id: u32_be_at(buf, 52)?,
        is_quest: u8_at(buf, 56)? != 0,
        is_magic_effect: u8_at(buf, 57)? != 0,
        is_compiled: u8_at(buf, 58)? != 0,
        source_text,
        compiled_data,
        referenced_objects,
        variables,
    })
}

fn collect_script_refs(ctx: &RuntimeContext, buf: &[u8]) -> Vec<ScriptRef> {
    let head_item = u32_be_at(buf, 60).unwrap_or(0);
    let head_next = u32_be_at(buf, 64).unwrap_or(0);
    list_walk::collect_bs_simple_list(ctx, head_item, head_next)
        .into_iter()
        .filter_map(|va| {
            let entry = ctx.read_bytes_va(va, 16)?;
            Some(ScriptRef {
                form_id: ctx.follow_pointer_to_form_id(entry, 8),
                editor_id: ctx.bs_string_in_buf(entry, 0),
                variable_id: u32_be_at(entry, 12)?,
            })
        })
        .collect()
}

fn collect_script_variables(ctx: &RuntimeContext, buf: &[u8]) -> Vec<ScriptVariable> {
    let head_item = u32_be_at(buf, 68).unwrap_or(0);
    let head_next = u32_be_at(buf, 72).unwrap_or(0);
    list_walk::collect_bs_simple_list(ctx, head_item, head_next)
        .into_iter()
        .filter_map(|va| {
            let entry = ctx.read_bytes_va(va, 32)?;
            let index = u32_be_at(entry, 0)?;
            if index > MAX_VARIABLE_INDEX {
                return None;
            }
            Some(ScriptVariable {
                index,
                is_integer: u32_be_at(entry, 12)? != 0,
                name: ctx.bs_string_in_buf(entry, 24),
            })
        })
        .collect()
}
