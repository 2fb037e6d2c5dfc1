//! TESPackage reader.
//!
//! Struct size `128 + shift`. Inline blocks:
//!
//! | Offset | Size | Block |
//! |--------|------|-------|
//! | +28    | 12   | PACKAGE_DATA `{ flags: u32, type: u8, pad, fallout_flags: u16, type_specific: u16 }` |
//! | +44    | ptr  | → PackageLocation (12 bytes) |
//! | +48    | ptr  | → PackageTarget (16 bytes) |
//! | +56    | 8    | PackageSchedule `{ month: i8, day_of_week: i8, date: u8, time: i8, duration: i32 }` |
//!
//! Location and target both start with a type word followed by a union
//! word: for location types 0 (near reference), 1 (in cell), and 4 (object
//! id) the union is a TESForm* resolved to a FormID; for everything else
//! it stays a raw enum value. Targets discriminate the same way on types
//! 0 (specific reference) and 1 (object id).

use crate::context::RuntimeContext;
use crate::form_types::{FormCandidate, FormType, RecordHeader};
use crate::io_utils::{i32_be_at, u32_be_at, BinaryReader};
use serde::{Deserialize, Serialize};

const PACKAGE_STRUCT_SIZE: usize = 128;

const MAX_PACKAGE_TYPE: u8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageData {
    pub flags: u32,
    pub package_type: u8,
    pub fallout_flags: u16,
    pub type_specific: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSchedule {
    /// -1 = any month, else 0-11.
    pub month: i8,
    /// -1 = any day, else 0-6.
    pub day_of_week: i8,
    pub date: u8,
    /// -1 = any hour, else 0-23.
    pub time: i8,
    /// Duration in hours, 0-744 (a full month).
    pub duration: i32,
}

/// Either a live form reference or the raw union value, depending on the
/// discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageObject {
    Form(u32),
    Raw(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageLocation {
    pub location_type: u32,
    pub object: PackageObject,
    pub radius: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageTarget {
    pub target_type: u32,
    pub object: PackageObject,
    pub count_or_distance: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub header: RecordHeader,
    pub data: Option<PackageData>,
    pub schedule: Option<PackageSchedule>,
    pub location: Option<PackageLocation>,
    pub target: Option<PackageTarget>,
}

pub fn read_package(ctx: &RuntimeContext, candidate: &FormCandidate) -> Option<PackageRecord> {
    if candidate.expected_form_type != FormType::Package.code() {
        return None;
    }
    let s = ctx.shift() as usize;
    let size = PACKAGE_STRUCT_SIZE + s;
    if candidate.file_offset + size as u64 > ctx.file_size() {
        return None;
    }
    let buf = ctx.read_bytes(candidate.file_offset, size)?;
    if u32_be_at(buf, 12)? != candidate.expected_form_id {
        return None;
    }

    Some(PackageRecord {
        header: RecordHeader::from_candidate(buf, candidate),
        data: parse_package_data(buf, 28 + s),
        schedule: parse_schedule(buf, 56 + s),
        location: read_location(ctx, u32_be_at(buf, 44 + s).unwrap_or(0)),
        target: read_target(ctx, u32_be_at(buf, 48 + s).unwrap_or(0)),
    })
}

fn parse_package_data(buf: &[u8], offset: usize) -> Option<PackageData> {
    let mut reader = BinaryReader::at_offset(buf, offset as u64);
    let flags = reader.read_u32()?;
    let package_type = reader.read_u8()?;
    reader.skip(1)?; // pad
    if package_type > MAX_PACKAGE_TYPE {
        return None;
    }
    Some(PackageData {
        flags,
        package_type,
        fallout_flags: reader.read_u16()?,
        type_specific: reader.read_u16()?,
    })
}

fn parse_schedule(buf: &[u8], offset: usize) -> Option<PackageSchedule> {
    let mut reader = BinaryReader::at_offset(buf, offset as u64);
    let month = reader.read_u8()? as i8;
    let day_of_week = reader.read_u8()? as i8;
    let date = reader.read_u8()?;
    let time = reader.read_u8()? as i8;
    let duration = reader.read_i32()?;

    if !(-1..=11).contains(&month) || !(-1..=6).contains(&day_of_week) {
        return None;
    }
    if !(-1..=23).contains(&time) || !(0..=744).contains(&duration) {
        return None;
    }
    Some(PackageSchedule {
        month,
        day_of_week,
        date,
        time,
        duration,
    })
}

/// Location types whose union word holds a TESForm*.
fn location_holds_form(location_type: u32) -> bool {
    matches!(location_type, 0 | 1 | 4)
}

fn read_location(ctx: &RuntimeContext, va: u32) -> Option<PackageLocation> {
    if va == 0 || !ctx.is_valid_pointer(va) {
        return None;
    }
    let buf = ctx.read_bytes_va(va, 12)?;
    let location_type = u32_be_at(buf, 0)?;
    let union_word = u32_be_at(buf, 4)?;
    let object = if location_holds_form(location_type) {
        PackageObject::Form(ctx.follow_pointer_va_to_form_id(union_word)?)
    } else {
        PackageObject::Raw(union_word)
    };
    Some(PackageLocation {
        location_type,
        object,
        radius: u32_be_at(buf, 8)?,
    })
}

fn read_target(ctx: &RuntimeContext, va: u32) -> Option<PackageTarget> {
    if va == 0 || !ctx.is_valid_pointer(va) {
        return None;
    }
    let buf = ctx.read_bytes_va(va, 16)?;
    let target_type = u32_be_at(buf, 0)?;
    let union_word = u32_be_at(buf, 4)?;
    let object = if matches!(target_type, 0 | 1) {
        PackageObject::Form(ctx.follow_pointer_va_to_form_id(union_word)?)
    } else {
        PackageObject::Raw(union_word)
    };
    Some(PackageTarget {
        target_type,
        object,
        count_or_distance: i32_be_at(buf, 8)?,
    })
}
