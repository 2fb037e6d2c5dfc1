//! Item-form readers: weapon, armor, ammo, misc, key, container, consumable.
//!
//! All follow the shared template (gate, range check, bulk read, identity
//! check, fixed-offset extraction). Per-field validation is soft: a value
//! outside its plausible range clamps to zero and the record survives.
//! Ranges:
//!
//! - currency value        [0, 1_000_000]
//! - weight                [0, 500]
//! - health                [0, 100_000]
//! - damage                [0, 10_000]
//! - critical-chance       [0, 100] %
//! - reach / shots-per-sec [0, 1000]
//! - ranges / speeds       [0, 100_000]
//!
//! Per-form member offsets (PDB offset, shifted by the build profile unless
//! noted). Every struct opens with the 16-byte TESForm header and the full
//! name BSStringT at +28.
//!
//! | Form | Size | Members |
//! |------|------|---------|
//! | WEAP | 452  | value +100, health +104, weight +108, damage +112, clip +114, ammo* +116, script* +120, impact* +124, sounds* +128..+164, DNAM +168 (intra offsets fixed) |
//! | ARMO | 304  | biped flags +56, script* +120, value +196, health +200, weight +204, rating +208 |
//! | AMMO | 192  | script* +120, projectile* +140, speed +144, flags +148, value +152, weight +156 |
//! | MISC | 176  | value +148, weight +152 |
//! | KEYM | 176  | as MISC (TESKey extends TESObjectMISC) |
//! | CONT | 200  | script* +112, contents head +120/+124, flags +128 |
//! | ALCH | 208  | weight +140, value +144, flags +148, script* +152 |

use crate::context::{is_normal_float, RuntimeContext};
use crate::form_types::{FormCandidate, FormType, InventoryItem, RecordHeader};
use crate::io_utils::{f32_be_at, i16_be_at, i32_be_at, u32_be_at, u8_at};
use crate::list_walk;
use serde::{Deserialize, Serialize};

const WEAPON_STRUCT_SIZE: usize = 452;
const ARMOR_STRUCT_SIZE: usize = 304;
const AMMO_STRUCT_SIZE: usize = 192;
const MISC_STRUCT_SIZE: usize = 176;
const KEY_STRUCT_SIZE: usize = 176;
const CONTAINER_STRUCT_SIZE: usize = 200;
const CONSUMABLE_STRUCT_SIZE: usize = 208;

const DNAM_OFFSET: usize = 168;

/// Clamp an i32 field to its plausible range, zeroing outliers.
fn clamp_i32(value: i32, max: i32) -> i32 {
    if (0..=max).contains(&value) {
        value
    } else {
        0
    }
}

fn clamp_i16(value: i16, max: i16) -> i16 {
    if (0..=max).contains(&value) {
        value
    } else {
        0
    }
}

/// Clamp a float field: non-normal or out-of-range values become 0.
fn clamp_f32(value: f32, max: f32) -> f32 {
    if is_normal_float(value) && (0.0..=max).contains(&value) {
        value
    } else {
        0.0
    }
}

/// Read, range-check, and identity-check the struct buffer: the shared
/// head of every item reader.
fn read_struct<'a>(
    ctx: &RuntimeContext<'a>,
    candidate: &FormCandidate,
    expected: FormType,
    base_size: usize,
) -> Option<&'a [u8]> {
    if candidate.expected_form_type != expected.code() {
        return None;
    }
    let size = base_size + ctx.shift() as usize;
    if candidate.file_offset + size as u64 > ctx.file_size() {
        return None;
    }
    let buf = ctx.read_bytes(candidate.file_offset, size)?;
    if u32_be_at(buf, 12)? != candidate.expected_form_id {
        return None;
    }
    Some(buf)
}

fn header_with_name(
    ctx: &RuntimeContext,
    buf: &[u8],
    candidate: &FormCandidate,
    shift: usize,
) -> RecordHeader {
    let mut header = RecordHeader::from_candidate(buf, candidate);
    if header.full_name.is_none() {
        header.full_name = ctx.bs_string_in_buf(buf, 28 + shift);
    }
    header
}

/// Weapon class derived from the DNAM animation-type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeaponType {
    HandToHand,
    OneHandMelee,
    TwoHandMelee,
    OneHandPistol,
    OneHandPistolEnergy,
    TwoHandRifle,
    TwoHandAutomatic,
    TwoHandRifleEnergy,
    TwoHandHandle,
    TwoHandLauncher,
    OneHandGrenade,
    OneHandMine,
}

impl WeaponType {
    pub fn from_anim_type(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::HandToHand,
            1 => Self::OneHandMelee,
            2 => Self::TwoHandMelee,
            3 => Self::OneHandPistol,
            4 => Self::OneHandPistolEnergy,
            5 => Self::TwoHandRifle,
            6 => Self::TwoHandAutomatic,
            7 => Self::TwoHandRifleEnergy,
            8 => Self::TwoHandHandle,
            9 => Self::TwoHandLauncher,
            10 => Self::OneHandGrenade,
            11 => Self::OneHandMine,
            _ => return None,
        })
    }
}

/// The weapon game-data block. Offsets inside the block are relative and
/// do NOT shift with the build profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaponDnam {
    pub weapon_type: Option<WeaponType>,
    pub anim_speed: f32,
    pub reach: f32,
    pub flags1: u8,
    pub grip_anim: u8,
    pub ammo_use: u8,
    pub attack_anim: u8,
    pub min_spread: f32,
    pub spread: f32,
    pub sight_fov: f32,
    pub projectile: Option<u32>,
    pub vats_chance: u8,
    pub num_projectiles: u8,
    pub min_range: f32,
    pub max_range: f32,
    pub on_hit: u32,
    pub flags2: u32,
    pub attack_mult: f32,
    pub fire_rate: f32,
    pub action_points: f32,
    pub rumble_left: f32,
    pub rumble_right: f32,
    pub rumble_duration: f32,
    pub crit_damage: u16,
    pub crit_chance: f32,
    pub crit_effect: Option<u32>,
}

fn parse_weapon_dnam(ctx: &RuntimeContext, buf: &[u8], base: usize) -> Option<WeaponDnam> {
    Some(WeaponDnam {
        weapon_type: WeaponType::from_anim_type(u8_at(buf, base)?),
        anim_speed: clamp_f32(f32_be_at(buf, base + 4)?, 10.0),
        reach: clamp_f32(f32_be_at(buf, base + 8)?, 1000.0),
        flags1: u8_at(buf, base + 12)?,
        grip_anim: u8_at(buf, base + 13)?,
        ammo_use: u8_at(buf, base + 14)?,
        attack_anim: u8_at(buf, base + 15)?,
        min_spread: clamp_f32(f32_be_at(buf, base + 16)?, 100.0),
        spread: clamp_f32(f32_be_at(buf, base + 20)?, 100.0),
        sight_fov: clamp_f32(f32_be_at(buf, base + 24)?, 180.0),
        projectile: ctx.follow_pointer_to_form_id(buf, base + 28),
        vats_chance: {
            let v = u8_at(buf, base + 32)?;
            if v > 100 {
                0
            } else {
                v
            }
        },
        num_projectiles: u8_at(buf, base + 33)?,
        min_range: clamp_f32(f32_be_at(buf, base + 36)?, 100_000.0),
        max_range: clamp_f32(f32_be_at(buf, base + 40)?, 100_000.0),
        on_hit: u32_be_at(buf, base + 44)?,
        flags2: u32_be_at(buf, base + 48)?,
        attack_mult: clamp_f32(f32_be_at(buf, base + 52)?, 10.0),
        fire_rate: clamp_f32(f32_be_at(buf, base + 56)?, 1000.0),
        action_points: clamp_f32(f32_be_at(buf, base + 60)?, 1000.0),
        rumble_left: clamp_f32(f32_be_at(buf, base + 64)?, 1.0),
        rumble_right: clamp_f32(f32_be_at(buf, base + 68)?, 1.0),
        rumble_duration: clamp_f32(f32_be_at(buf, base + 72)?, 60.0),
        crit_damage: {
            let v = i16_be_at(buf, base + 80)?;
            clamp_i16(v, 10_000) as u16
        },
        crit_chance: clamp_f32(f32_be_at(buf, base + 84)?, 100.0),
        crit_effect: ctx.follow_pointer_to_form_id(buf, base + 88),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaponRecord {
    pub header: RecordHeader,
    pub value: i32,
    pub health: i32,
    pub weight: f32,
    pub base_damage: i16,
    pub clip_rounds: u8,
    pub ammo: Option<u32>,
    pub script: Option<u32>,
    pub impact_dataset: Option<u32>,
    /// Pickup, putdown, fire, fire distant, idle, equip, unequip, jam,
    /// dry-fire.
    pub sounds: [Option<u32>; 9],
    pub dnam: Option<WeaponDnam>,
}

pub fn read_weapon(ctx: &RuntimeContext, candidate: &FormCandidate) -> Option<WeaponRecord> {
    let buf = read_struct(ctx, candidate, FormType::Weapon, WEAPON_STRUCT_SIZE)?;
    let s = ctx.shift() as usize;

    let mut sounds = [None; 9];
    for (i, slot) in sounds.iter_mut().enumerate() {
        *slot = ctx.follow_pointer_to_form_id(buf, 128 + s + i * 4);
    }

    Some(WeaponRecord {
        header: header_with_name(ctx, buf, candidate, s),
        value: clamp_i32(i32_be_at(buf, 100 + s)?, 1_000_000),
        health: clamp_i32(i32_be_at(buf, 104 + s)?, 100_000),
        weight: clamp_f32(f32_be_at(buf, 108 + s)?, 500.0),
        base_damage: clamp_i16(i16_be_at(buf, 112 + s)?, 10_000),
        clip_rounds: u8_at(buf, 114 + s)?,
        ammo: ctx.follow_pointer_to_form_id(buf, 116 + s),
        script: ctx.follow_pointer_to_form_id(buf, 120 + s),
        impact_dataset: ctx.follow_pointer_to_form_id(buf, 124 + s),
        sounds,
        dnam: parse_weapon_dnam(ctx, buf, DNAM_OFFSET + s),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmorRecord {
    pub header: RecordHeader,
    pub biped_flags: u32,
    pub script: Option<u32>,
    pub value: i32,
    pub health: i32,
    pub weight: f32,
    pub damage_resistance: i16,
}

pub fn read_armor(ctx: &RuntimeContext, candidate: &FormCandidate) -> Option<ArmorRecord> {
    let buf = read_struct(ctx, candidate, FormType::Armor, ARMOR_STRUCT_SIZE)?;
    let s = ctx.shift() as usize;
    Some(ArmorRecord {
        header: header_with_name(ctx, buf, candidate, s),
        biped_flags: u32_be_at(buf, 56 + s)?,
        script: ctx.follow_pointer_to_form_id(buf, 120 + s),
        value: clamp_i32(i32_be_at(buf, 196 + s)?, 1_000_000),
        health: clamp_i32(i32_be_at(buf, 200 + s)?, 100_000),
        weight: clamp_f32(f32_be_at(buf, 204 + s)?, 500.0),
        damage_resistance: clamp_i16(i16_be_at(buf, 208 + s)?, 10_000),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmmoRecord {
    pub header: RecordHeader,
    pub script: Option<u32>,
    pub projectile: Option<u32>,
    pub speed: f32,
    pub flags: u8,
    pub value: i32,
    pub weight: f32,
}

pub fn read_ammo(ctx: &RuntimeContext, candidate: &FormCandidate) -> Option<AmmoRecord> {
    let buf = read_struct(ctx, candidate, FormType::Ammo, AMMO_STRUCT_SIZE)?;
    let s = ctx.shift() as usize;
    Some(AmmoRecord {
        header: header_with_name(ctx, buf, candidate, s),
        script: ctx.follow_pointer_to_form_id(buf, 120 + s),
        projectile: ctx.follow_pointer_to_form_id(buf, 140 + s),
        speed: clamp_f32(f32_be_at(buf, 144 + s)?, 100_000.0),
        flags: u8_at(buf, 148 + s)?,
        value: clamp_i32(i32_be_at(buf, 152 + s)?, 1_000_000),
        weight: clamp_f32(f32_be_at(buf, 156 + s)?, 500.0),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiscRecord {
    pub header: RecordHeader,
    pub value: i32,
    pub weight: f32,
}

pub fn read_misc(ctx: &RuntimeContext, candidate: &FormCandidate) -> Option<MiscRecord> {
    let buf = read_struct(ctx, candidate, FormType::Misc, MISC_STRUCT_SIZE)?;
    let s = ctx.shift() as usize;
    Some(MiscRecord {
        header: header_with_name(ctx, buf, candidate, s),
        value: clamp_i32(i32_be_at(buf, 148 + s)?, 1_000_000),
        weight: clamp_f32(f32_be_at(buf, 152 + s)?, 500.0),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub header: RecordHeader,
    pub value: i32,
    pub weight: f32,
}

pub fn read_key(ctx: &RuntimeContext, candidate: &FormCandidate) -> Option<KeyRecord> {
    let buf = read_struct(ctx, candidate, FormType::Key, KEY_STRUCT_SIZE)?;
    let s = ctx.shift() as usize;
    Some(KeyRecord {
        header: header_with_name(ctx, buf, candidate, s),
        value: clamp_i32(i32_be_at(buf, 148 + s)?, 1_000_000),
        weight: clamp_f32(f32_be_at(buf, 152 + s)?, 500.0),
    })
}

/// Container flag bits.
pub const CONTAINER_RESPAWNS: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub header: RecordHeader,
    pub script: Option<u32>,
    pub contents: Vec<InventoryItem>,
    pub flags: u8,
}

impl ContainerRecord {
    pub fn respawns(&self) -> bool {
        self.flags & CONTAINER_RESPAWNS != 0
    }
}

pub fn read_container(ctx: &RuntimeContext, candidate: &FormCandidate) -> Option<ContainerRecord> {
    let buf = read_struct(ctx, candidate, FormType::Container, CONTAINER_STRUCT_SIZE)?;
    let s = ctx.shift() as usize;
    Some(ContainerRecord {
        header: header_with_name(ctx, buf, candidate, s),
        script: ctx.follow_pointer_to_form_id(buf, 112 + s),
        contents: list_walk::walk_inventory(ctx, buf, 120 + s, 124 + s),
        flags: u8_at(buf, 128 + s)?,
    })
}

/// Consumable flag bits.
pub const CONSUMABLE_NO_AUTO_CALC: u8 = 0x01;
pub const CONSUMABLE_FOOD_ITEM: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumableRecord {
    pub header: RecordHeader,
    pub weight: f32,
    pub value: i32,
    pub flags: u8,
    pub script: Option<u32>,
}

impl ConsumableRecord {
    pub fn is_food(&self) -> bool {
        self.flags & CONSUMABLE_FOOD_ITEM != 0
    }
}

pub fn read_consumable(
    ctx: &RuntimeContext,
    candidate: &FormCandidate,
) -> Option<ConsumableRecord> {
    let buf = read_struct(ctx, candidate, FormType::Consumable, CONSUMABLE_STRUCT_SIZE)?;
    let s = ctx.shift() as usize;
    Some(ConsumableRecord {
        header: header_with_name(ctx, buf, candidate, s),
        weight: clamp_f32(f32_be_at(buf, 140 + s)?, 500.0),
        value: clamp_i32(i32_be_at(buf, 144 + s)?, 1_000_000),
        flags: u8_at(buf, 148 + s)?,
        script: ctx.follow_pointer_to_form_id(buf, 152 + s),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::DumpAccessor;
    use crate::memory_map::{MemoryMap, MemorySegment};

    fn fixture(fill: impl FnOnce(&mut Vec<u8>)) -> (DumpAccessor, MemoryMap) {
        let mut data = vec![0u8; 0x2000];
        fill(&mut data);
        let map = MemoryMap::new(
            vec![MemorySegment {
                virtual_address: 0x4000_0000,
                size: 0x2000,
                file_offset: 0,
            }],
            vec![],
        );
        (DumpAccessor::from_bytes(data), map)
    }

    fn put_u32(d: &mut [u8], off: usize, v: u32) {
        d[off..off + 4].copy_from_slice(&v.to_be_bytes());
    }

    fn put_f32(d: &mut [u8], off: usize, v: f32) {
        d[off..off + 4].copy_from_slice(&v.to_be_bytes());
    }

    fn candidate(form_type: u8) -> FormCandidate {
        FormCandidate {
            file_offset: 0x100,
            expected_form_id: 0x0003_4051,
            expected_form_type: form_type,
            editor_id: None,
            display_name: None,
        }
    }

    #[test]
    fn test_read_misc_clamps_out_of_range_value() {
        let (acc, map) = fixture(|d| {
            d[0x100 + 4] = 0x1F;
            put_u32(d, 0x100 + 12, 0x0003_4051);
            put_u32(d, 0x100 + 148, 2_000_000); // above currency cap
            put_f32(d, 0x100 + 152, 1.5);
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let record = read_misc(&ctx, &candidate(0x1F)).unwrap();
        assert_eq!(record.value, 0);
        assert_eq!(record.weight, 1.5);
    }

    #[test]
    fn test_read_weapon_dnam_and_sounds() {
        let (acc, map) = fixture(|d| {
            d[0x100 + 4] = 0x28;
            put_u32(d, 0x100 + 12, 0x0003_4051);
            put_u32(d, 0x100 + 100, 120); // value
            put_u32(d, 0x100 + 104, 400); // health
            put_f32(d, 0x100 + 108, 6.0); // weight
            d[0x100 + 112..0x100 + 114].copy_from_slice(&25i16.to_be_bytes());
            d[0x100 + 114] = 24; // clip
            // Sound form at 0xC00.
            put_u32(d, 0xC00 + 12, 0x0009_9A01);
            put_u32(d, 0x100 + 128, 0x4000_0C00); // first sound slot
            // DNAM at +168: anim type 5 (two-hand rifle), fire rate 8.0.
            d[0x100 + 168] = 5;
            put_f32(d, 0x100 + 168 + 56, 8.0);
            put_f32(d, 0x100 + 168 + 84, 150.0); // crit chance out of range
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let record = read_weapon(&ctx, &candidate(0x28)).unwrap();
        assert_eq!(record.value, 120);
        assert_eq!(record.base_damage, 25);
        assert_eq!(record.clip_rounds, 24);
        assert_eq!(record.sounds[0], Some(0x0009_9A01));
        assert_eq!(record.sounds[1], None);
        let dnam = record.dnam.unwrap();
        assert_eq!(dnam.weapon_type, Some(WeaponType::TwoHandRifle));
        assert_eq!(dnam.fire_rate, 8.0);
        assert_eq!(dnam.crit_chance, 0.0); // clamped
    }

    #[test]
    fn test_read_weapon_rejects_identity_mismatch() {
        let (acc, map) = fixture(|d| {
            d[0x100 + 4] = 0x28;
            put_u32(d, 0x100 + 12, 0xFFFF_0000);
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        assert!(read_weapon(&ctx, &candidate(0x28)).is_none());
    }

    #[test]
    fn test_read_container_contents() {
        let (acc, map) = fixture(|d| {
            d[0x100 + 4] = 0x1B;
            put_u32(d, 0x100 + 12, 0x0003_4051);
            // Item form at 0xC40.
            put_u32(d, 0xC40 + 12, 0x0001_2345);
            // ContainerObject at 0xC00: count 3 → item.
            put_u32(d, 0xC00, 3);
            put_u32(d, 0xC04, 0x4000_0C40);
            // Inline head: data → container object, next null.
            put_u32(d, 0x100 + 120, 0x4000_0C00);
            put_u32(d, 0x100 + 124, 0);
            d[0x100 + 128] = CONTAINER_RESPAWNS;
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let record = read_container(&ctx, &candidate(0x1B)).unwrap();
        assert_eq!(
            record.contents,
            vec![InventoryItem {
                form_id: 0x0001_2345,
                count: 3
            }]
        );
        assert!(record.respawns());
    }

    #[test]
    fn test_shifted_offsets() {
        // Same misc form laid out for a Release build (shift 16).
        let (acc, map) = fixture(|d| {
            d[0x100 + 4] = 0x1F;
            put_u32(d, 0x100 + 12, 0x0003_4051);
            put_u32(d, 0x100 + 148 + 16, 500);
            put_f32(d, 0x100 + 152 + 16, 2.0);
        });
        let ctx = RuntimeContext::new(&acc, &map, 16);
        let record = read_misc(&ctx, &candidate(0x1F)).unwrap();
        assert_eq!(record.value, 500);
        assert_eq!(record.weight, 2.0);
    }
}
