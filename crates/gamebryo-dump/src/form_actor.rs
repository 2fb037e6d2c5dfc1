//! Actor readers: TESNPC and TESCreature.
//!
//! Both carry the 24-byte TESActorBaseData (ACBS) block:
//!
//! | Offset | Type | Field          |
//! |--------|------|----------------|
//! | 0      | u32  | flags          |
//! | 4      | u16  | fatigue        |
//! | 6      | u16  | barter_gold    |
//! | 8      | i16  | level          |
//! | 10     | u16  | calc_min       |
//! | 12     | u16  | calc_max       |
//! | 14     | u16  | speed_mult     |
//! | 16     | f32  | karma          |
//! | 20     | i16  | disposition    |
//! | 22     | u16  | template_flags |
//!
//! NPC member offsets (PDB offset, shifted by the build profile):
//!
//! | Offset  | Field                                  |
//! |---------|----------------------------------------|
//! | +52     | ACBS                                   |
//! | +76     | death item*                            |
//! | +80     | voice type*                            |
//! | +84     | template*                              |
//! | +96     | faction list head VA                   |
//! | +104    | inventory inline head (data, next)     |
//! | +148    | AI data (aggression..responsibility)   |
//! | +152    | mood                                   |
//! | +156    | AI flags                               |
//! | +162    | assistance                             |
//! | +168    | package list inline head (item, next)  |
//! | +188    | S.P.E.C.I.A.L. (7 × u8)                |
//! | +248    | script*                                |
//! | +272    | race*                                  |
//! | +276    | skills (14 × u8)                       |
//! | +304    | class*                                 |
//! | +320/332, +352/364, +384/396 | FaceGen morph (ptr, count) pairs |
//! | +440    | hair*                                  |
//! | +444    | hair length (f32)                      |
//! | +448    | eyes*                                  |
//! | +468    | combat style*                          |
//!
//! An NPC whose ACBS fails validation still yields a minimal record (the
//! header plus the script reference) -- heap forms are routinely mid-update
//! when the console faults.

use crate::context::RuntimeContext;
use crate::form_types::{
    FactionMembership, FormCandidate, FormType, InventoryItem, RecordHeader,
};
use crate::io_utils::{i16_be_at, u32_be_at, u8_at, BinaryReader};
use crate::list_walk;
use serde::{Deserialize, Serialize};

const NPC_STRUCT_SIZE: usize = 492;
const CREATURE_STRUCT_SIZE: usize = 352;

const MAX_FACEGEN_COEFFS: usize = 200;

/// The decoded ACBS block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActorBaseData {
    pub flags: u32,
    pub fatigue: u16,
    pub barter_gold: u16,
    pub level: i16,
    pub calc_min: u16,
    pub calc_max: u16,
    pub speed_mult: u16,
    pub karma: f32,
    pub disposition: i16,
    pub template_flags: u16,
}

/// Which actor variant the ACBS validation rules apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    Npc,
    Creature,
}

/// Parse and validate an ACBS block at `offset` inside `buf`. Any field
/// out of range fails the whole block.
pub fn parse_acbs(buf: &[u8], offset: usize, kind: ActorKind) -> Option<ActorBaseData> {
    let mut reader = BinaryReader::at_offset(buf, offset as u64);
    let acbs = ActorBaseData {
        flags: reader.read_u32()?,
        fatigue: reader.read_u16()?,
        barter_gold: reader.read_u16()?,
        level: reader.read_i16()?,
        calc_min: reader.read_u16()?,
        calc_max: reader.read_u16()?,
        speed_mult: reader.read_u16()?,
        karma: reader.read_f32()?,
        disposition: reader.read_i16()?,
        template_flags: reader.read_u16()?,
    };

    if acbs.fatigue > 5000 || acbs.barter_gold > 50000 || acbs.speed_mult > 500 {
        return None;
    }
    if !crate::context::is_normal_float(acbs.karma) {
        return None;
    }
    match kind {
        ActorKind::Npc => {
            if !(-128..=100).contains(&acbs.level) {
                return None;
            }
            if acbs.calc_min > 100 || acbs.calc_max > 100 {
                return None;
            }
        }
        ActorKind::Creature => {
            if !(-127..=255).contains(&acbs.level) {
                return None;
            }
            if !(-1000.0..=1000.0).contains(&acbs.karma) {
                return None;
            }
            if !(-200..=200).contains(&acbs.disposition) {
                return None;
            }
        }
    }
    Some(acbs)
}

/// The AI data block shared by both actor variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiData {
    pub aggression: u8,
    pub confidence: u8,
    pub energy: u8,
    pub responsibility: u8,
    pub mood: u8,
    pub flags: u32,
    pub assistance: u8,
}

fn parse_ai_data(buf: &[u8], shift: usize) -> Option<AiData> {
    let aggression = u8_at(buf, 148 + shift)?;
    let confidence = u8_at(buf, 149 + shift)?;
    let energy = u8_at(buf, 150 + shift)?;
    let responsibility = u8_at(buf, 151 + shift)?;
    let mut mood = u8_at(buf, 152 + shift)?;
    let flags = u32_be_at(buf, 156 + shift)?;
    let assistance = u8_at(buf, 162 + shift)?;

    if aggression > 3 || confidence > 4 || assistance > 2 {
        return None;
    }
    if mood > 7 {
        mood = 0;
    }
    Some(AiData {
        aggression,
        confidence,
        energy,
        responsibility,
        mood,
        flags,
        assistance,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcRecord {
    pub header: RecordHeader,
    pub stats: Option<ActorBaseData>,
    pub death_item: Option<u32>,
    pub voice_type: Option<u32>,
    pub template: Option<u32>,
    pub race: Option<u32>,
    pub class: Option<u32>,
    pub hair: Option<u32>,
    pub eyes: Option<u32>,
    pub combat_style: Option<u32>,
    pub script: Option<u32>,
    pub inventory: Vec<InventoryItem>,
    pub factions: Vec<FactionMembership>,
    pub special_stats: Option<[u8; 7]>,
    pub skills: Option<[u8; 14]>,
    pub ai_data: Option<AiData>,
    pub hair_length: Option<f32>,
    pub facegen_geometry_symmetric: Option<Vec<f32>>,
    pub facegen_geometry_asymmetric: Option<Vec<f32>>,
    pub facegen_texture_symmetric: Option<Vec<f32>>,
    pub packages: Vec<u32>,
}

/// Read a TESNPC at the candidate's offset. Returns `None` when the
/// candidate gate, range check, or FormID identity check fails; returns a
/// minimal record when only the ACBS block is implausible.
pub fn read_npc(ctx: &RuntimeContext, candidate: &FormCandidate) -> Option<NpcRecord> {
    if candidate.expected_form_type != FormType::Npc.code() {
        return None;
    }
    let s = ctx.shift() as usize;
    let size = NPC_STRUCT_SIZE + s;
    if candidate.file_offset + size as u64 > ctx.file_size() {
        return None;
    }
    let buf = ctx.read_bytes(candidate.file_offset, size)?;
    if u32_be_at(buf, 12)? != candidate.expected_form_id {
        return None;
    }

    let header = RecordHeader::from_candidate(buf, candidate);
    let script = ctx.follow_pointer_to_form_id(buf, 248 + s);

    let Some(stats) = parse_acbs(buf, 52 + s, ActorKind::Npc) else {
        // Minimal record: identity plus the script reference.
        return Some(NpcRecord {
            header,
            stats: None,
            death_item: None,
            voice_type: None,
            template: None,
            race: None,
            class: None,
            hair: None,
            eyes: None,
            combat_style: None,
            script,
            inventory: Vec::new(),
            factions: Vec::new(),
            special_stats: None,
            skills: None,
            ai_data: None,
            hair_length: None,
            facegen_geometry_symmetric: None,
            facegen_geometry_asymmetric: None,
            facegen_texture_symmetric: None,
            packages: Vec::new(),
        });
    };

    let faction_head = u32_be_at(buf, 96 + s).unwrap_or(0);

    Some(NpcRecord {
        header,
        stats: Some(stats),
        death_item: ctx.follow_pointer_to_form_id(buf, 76 + s),
        voice_type: ctx.follow_pointer_to_form_id(buf, 80 + s),
        template: ctx.follow_pointer_to_form_id(buf, 84 + s),
        race: ctx.follow_pointer_to_form_id(buf, 272 + s),
        class: ctx.follow_pointer_to_form_id(buf, 304 + s),
        hair: ctx.follow_pointer_to_form_id(buf, 440 + s),
        eyes: ctx.follow_pointer_to_form_id(buf, 448 + s),
        combat_style: ctx.follow_pointer_to_form_id(buf, 468 + s),
        script,
        inventory: list_walk::walk_inventory(ctx, buf, 104 + s, 108 + s),
        factions: list_walk::walk_factions(ctx, faction_head),
        special_stats: parse_special(buf, 188 + s),
        skills: parse_skills(buf, 276 + s),
        ai_data: parse_ai_data(buf, s),
        hair_length: parse_hair_length(buf, 444 + s),
        facegen_geometry_symmetric: read_facegen_array(ctx, buf, 320 + s, 332 + s),
        facegen_geometry_asymmetric: read_facegen_array(ctx, buf, 352 + s, 364 + s),
        facegen_texture_symmetric: read_facegen_array(ctx, buf, 384 + s, 396 + s),
        packages: list_walk::walk_package_list(ctx, buf, 168 + s, 172 + s),
    })
}

/// Seven S.P.E.C.I.A.L. attributes, each capped at 15; an all-zero block
/// means the form was never populated.
fn parse_special(buf: &[u8], offset: usize) -> Option<[u8; 7]> {
    let bytes = buf.get(offset..offset + 7)?;
    let mut special = [0u8; 7];
    special.copy_from_slice(bytes);
    if special.iter().any(|&v| v > 15) || special.iter().all(|&v| v == 0) {
        return None;
    }
    Some(special)
}

/// Fourteen skill values, each capped at 100.
fn parse_skills(buf: &[u8], offset: usize) -> Option<[u8; 14]> {
    let bytes = buf.get(offset..offset + 14)?;
    let mut skills = [0u8; 14];
    skills.copy_from_slice(bytes);
    if skills.iter().any(|&v| v > 100) || skills.iter().all(|&v| v == 0) {
        return None;
    }
    Some(skills)
}

/// Hair length: the zero bit pattern means unset, anything else must be a
/// normal float in [0, 10].
fn parse_hair_length(buf: &[u8], offset: usize) -> Option<f32> {
    let raw = u32_be_at(buf, offset)?;
    if raw == 0 {
        return None;
    }
    let value = f32::from_bits(raw);
    if crate::context::is_normal_float(value) && (0.0..=10.0).contains(&value) {
        Some(value)
    } else {
        None
    }
}

/// Read a FaceGen morph coefficient array through its (pointer, count)
/// pair. At least half of the floats must be normal and below 100 in
/// magnitude, or the array is noise.
fn read_facegen_array(
    ctx: &RuntimeContext,
    buf: &[u8],
    ptr_offset: usize,
    count_offset: usize,
) -> Option<Vec<f32>> {
    let ptr = u32_be_at(buf, ptr_offset)?;
    let count = u32_be_at(buf, count_offset)? as usize;
    if ptr == 0 || count == 0 || count > MAX_FACEGEN_COEFFS || !ctx.is_valid_pointer(ptr) {
        return None;
    }
    let raw = ctx.read_bytes_va(ptr, count * 4)?;
    let values: Vec<f32> = raw
        .chunks_exact(4)
        .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let ok = values
        .iter()
        .filter(|v| crate::context::is_normal_float(**v) && v.abs() < 100.0)
        .count();
    if ok * 2 >= values.len() {
        Some(values)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatureRecord {
    pub header: RecordHeader,
    pub stats: Option<ActorBaseData>,
    pub model_path: Option<String>,
    /// Combat, magic, stealth.
    pub skills: [u8; 3],
    pub attack_damage: i16,
    pub creature_type: u8,
    pub script: Option<u32>,
    pub packages: Vec<u32>,
}

/// Read a TESCreature at the candidate's offset.
pub fn read_creature(ctx: &RuntimeContext, candidate: &FormCandidate) -> Option<CreatureRecord> {
    if candidate.expected_form_type != FormType::Creature.code() {
        return None;
    }
    let s = ctx.shift() as usize;
    let size = CREATURE_STRUCT_SIZE + s;
    if candidate.file_offset + size as u64 > ctx.file_size() {
        return None;
    }
    let buf = ctx.read_bytes(candidate.file_offset, size)?;
    if u32_be_at(buf, 12)? != candidate.expected_form_id {
        return None;
    }

    let stats = parse_acbs(buf, 8 + s, ActorKind::Creature);

    let skills = [
        u8_at(buf, 212 + s)?,
        u8_at(buf, 213 + s)?,
        u8_at(buf, 214 + s)?,
    ];
    let attack_damage = i16_be_at(buf, 216 + s)?.clamp(0, 10_000);
    let mut creature_type = u8_at(buf, 220 + s)?;
    if creature_type > 7 {
        creature_type = 0;
    }

    Some(CreatureRecord {
        header: RecordHeader::from_candidate(buf, candidate),
        stats,
        model_path: ctx.bs_string_in_buf(buf, 172 + s),
        skills,
        attack_damage,
        creature_type,
        script: ctx.follow_pointer_to_form_id(buf, 248 + s),
        // TESActorBase puts the package head 116 bytes past ACBS; the
        // creature's ACBS sits at +8 where the NPC's sits at +52.
        packages: list_walk::walk_package_list(ctx, buf, 124 + s, 128 + s),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acbs_bytes(fatigue: u16, level: i16, karma: f32) -> Vec<u8> {
        let mut b = vec![0u8; 24];
        b[4..6].copy_from_slice(&fatigue.to_be_bytes());
        b[6..8].copy_from_slice(&200u16.to_be_bytes());
        b[8..10].copy_from_slice(&level.to_be_bytes());
        b[10..12].copy_from_slice(&1u16.to_be_bytes());
        b[12..14].copy_from_slice(&5u16.to_be_bytes());
        b[14..16].copy_from_slice(&100u16.to_be_bytes());
        b[16..20].copy_from_slice(&karma.to_be_bytes());
        b
    }

    #[test]
    fn test_parse_acbs_npc_happy() {
        let b = acbs_bytes(100, 5, 50.0);
        let acbs = parse_acbs(&b, 0, ActorKind::Npc).unwrap();
        assert_eq!(acbs.fatigue, 100);
        assert_eq!(acbs.level, 5);
        assert_eq!(acbs.karma, 50.0);
    }

    #[test]
    fn test_parse_acbs_rejects_out_of_range() {
        assert!(parse_acbs(&acbs_bytes(9999, 5, 50.0), 0, ActorKind::Npc).is_none());
        assert!(parse_acbs(&acbs_bytes(100, 120, 50.0), 0, ActorKind::Npc).is_none());
        assert!(parse_acbs(&acbs_bytes(100, 5, f32::NAN), 0, ActorKind::Npc).is_none());
        // Creature tolerates level 120 but not karma 2000.
        assert!(parse_acbs(&acbs_bytes(100, 120, 50.0), 0, ActorKind::Creature).is_some());
        assert!(parse_acbs(&acbs_bytes(100, 120, 2000.0), 0, ActorKind::Creature).is_none());
    }

    #[test]
    fn test_parse_special_and_skills() {
        let mut buf = vec![0u8; 32];
        buf[0..7].copy_from_slice(&[6, 5, 4, 4, 4, 6, 4]);
        assert_eq!(parse_special(&buf, 0), Some([6, 5, 4, 4, 4, 6, 4]));
        buf[0] = 16; // above cap
        assert_eq!(parse_special(&buf, 0), None);
        assert_eq!(parse_special(&vec![0u8; 8], 0), None); // all zero

        let mut buf = vec![0u8; 32];
        buf[0..14].copy_from_slice(&[12, 12, 14, 14, 14, 12, 47, 12, 12, 47, 47, 12, 12, 12]);
        let skills = parse_skills(&buf, 0).unwrap();
        assert_eq!(skills[6], 47);
        buf[3] = 101;
        assert_eq!(parse_skills(&buf, 0), None);
    }

    #[test]
    fn test_parse_hair_length() {
        let mut buf = vec![0u8; 8];
        assert_eq!(parse_hair_length(&buf, 0), None); // unset
        buf[0..4].copy_from_slice(&2.5f32.to_be_bytes());
        assert_eq!(parse_hair_length(&buf, 0), Some(2.5));
        buf[0..4].copy_from_slice(&50.0f32.to_be_bytes());
        assert_eq!(parse_hair_length(&buf, 0), None); // out of range
    }

    #[test]
    fn test_parse_ai_data_clamps_mood_rejects_bad_aggression() {
        let mut buf = vec![0u8; 200];
        buf[148] = 1; // aggression
        buf[149] = 4; // confidence
        buf[150] = 50;
        buf[151] = 50;
        buf[152] = 9; // mood, clamps to 0
        buf[162] = 2; // assistance
        let ai = parse_ai_data(&buf, 0).unwrap();
        assert_eq!(ai.aggression, 1);
        assert_eq!(ai.mood, 0);
        assert_eq!(ai.assistance, 2);

        buf[148] = 7;
        assert_eq!(parse_ai_data(&buf, 0), None);
    }
}
