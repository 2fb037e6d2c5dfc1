//! BGSProjectile reader.
//!
//! Fixed 224-byte layout across all builds (no shift). Physics block:
//!
//! | Offset | Type | Field |
//! |--------|------|-------|
//! | +100   | u16  | flags |
//! | +102   | u16  | projectile type |
//! | +120   | f32  | gravity |
//! | +124   | f32  | speed |
//! | +128   | f32  | range |
//! | +132   | f32  | muzzle-flash duration |
//! | +136   | f32  | force |
//! | +140.. | ptr  | 4 sound references |
//! | +156   | ptr  | explosion |
//!
//! Non-finite physics values clamp to zero; the record survives.

use crate::context::RuntimeContext;
use crate::form_types::{FormCandidate, FormType, RecordHeader};
use crate::io_utils::{f32_be_at, u16_be_at, u32_be_at};
use serde::{Deserialize, Serialize};

const PROJECTILE_STRUCT_SIZE: usize = 224;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileRecord {
    pub header: RecordHeader,
    pub flags: u16,
    pub projectile_type: u16,
    pub gravity: f32,
    pub speed: f32,
    pub range: f32,
    pub muzzle_flash_duration: f32,
    pub force: f32,
    /// Active, countdown, disable, dirt-impact.
    pub sounds: [Option<u32>; 4],
    pub explosion: Option<u32>,
}

fn finite_or_zero(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

pub fn read_projectile(
    ctx: &RuntimeContext,
    candidate: &FormCandidate,
) -> Option<ProjectileRecord> {
    if candidate.expected_form_type != FormType::Projectile.code() {
        return None;
    }
    if candidate.file_offset + PROJECTILE_STRUCT_SIZE as u64 > ctx.file_size() {
        return None;
    }
    let buf = ctx.read_bytes(candidate.file_offset, PROJECTILE_STRUCT_SIZE)?;
    if u32_be_at(buf, 12)? != candidate.expected_form_id {
        return None;
    }

    let mut sounds = [None; 4];
    for (i, slot) in sounds.iter_mut().enumerate() {
        *slot = ctx.follow_pointer_to_form_id(buf, 140 + i * 4);
    }

    Some(ProjectileRecord {
        header: RecordHeader::from_candidate(buf, candidate),
        flags: u16_be_at(buf, 100)?,
        projectile_type: u16_be_at(buf, 102)?,
        gravity: finite_or_zero(f32_be_at(buf, 120)?),
        speed: finite_or_zero(f32_be_at(buf, 124)?),
        range: finite_or_zero(f32_be_at(buf, 128)?),
        muzzle_flash_duration: finite_or_zero(f32_be_at(buf, 132)?),
        force: finite_or_zero(f32_be_at(buf, 136)?),
        sounds,
        explosion: ctx.follow_pointer_to_form_id(buf, 156),
    })
}
