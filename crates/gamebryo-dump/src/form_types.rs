//! Shared form-record model: type codes, candidates, and the tagged record
//! enum produced by the readers.
//!
//! Every runtime form starts with the 16-byte TESForm header:
//!
//! | Offset | Type  | Field     |
//! |--------|-------|-----------|
//! | 0      | u32   | vfptr     |
//! | 4      | u8    | form_type |
//! | 5      | u8[3] | (pad)     |
//! | 8      | u32   | flags     |
//! | 12     | u32   | form_id   |
//!
//! All scalars big-endian. Readers validate the FormID at +12 against the
//! candidate before accepting anything else.

use crate::form_actor::{CreatureRecord, NpcRecord};
use crate::form_faction::FactionRecord;
use crate::form_item::{
    AmmoRecord, ArmorRecord, ConsumableRecord, ContainerRecord, KeyRecord, MiscRecord,
    WeaponRecord,
};
use crate::form_land::LandRecord;
use crate::form_package::PackageRecord;
use crate::form_projectile::ProjectileRecord;
use crate::form_script::ScriptRecord;
use crate::io_utils::{u32_be_at, u8_at};
use serde::{Deserialize, Serialize};

/// Runtime form-class discriminator stored at TESForm +4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FormType {
    Faction = 0x08,
    Script = 0x11,
    Armor = 0x18,
    Container = 0x1B,
    Misc = 0x1F,
    Weapon = 0x28,
    Ammo = 0x29,
    Npc = 0x2A,
    Creature = 0x2B,
    Key = 0x2E,
    Consumable = 0x2F,
    Projectile = 0x33,
    Land = 0x41,
    Package = 0x46,
}

impl FormType {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x08 => Self::Faction,
            0x11 => Self::Script,
            0x18 => Self::Armor,
            0x1B => Self::Container,
            0x1F => Self::Misc,
            0x28 => Self::Weapon,
            0x29 => Self::Ammo,
            0x2A => Self::Npc,
            0x2B => Self::Creature,
            0x2E => Self::Key,
            0x2F => Self::Consumable,
            0x33 => Self::Projectile,
            0x41 => Self::Land,
            0x46 => Self::Package,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// The four-letter record signature used by the editor and plugins.
    pub fn signature(self) -> &'static str {
        match self {
            Self::Faction => "FACT",
            Self::Script => "SCPT",
            Self::Armor => "ARMO",
            Self::Container => "CONT",
            Self::Misc => "MISC",
            Self::Weapon => "WEAP",
            Self::Ammo => "AMMO",
            Self::Npc => "NPC_",
            Self::Creature => "CREA",
            Self::Key => "KEYM",
            Self::Consumable => "ALCH",
            Self::Projectile => "PROJ",
            Self::Land => "LAND",
            Self::Package => "PACK",
        }
    }

    pub fn is_known_code(code: u8) -> bool {
        Self::from_code(code).is_some()
    }
}

/// A pre-located candidate produced by an external locator: where a form of
/// a given type and identity is believed to live. Consumed once per reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormCandidate {
    pub file_offset: u64,
    pub expected_form_id: u32,
    pub expected_form_type: u8,
    pub editor_id: Option<String>,
    pub display_name: Option<String>,
}

/// The header shared by every produced record. Scalars in the source are
/// big-endian; values here are already decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub form_id: u32,
    pub form_type: u8,
    pub flags: u32,
    pub source_offset: u64,
    pub editor_id: Option<String>,
    pub full_name: Option<String>,
}

impl RecordHeader {
    /// Build the header from a validated struct buffer plus candidate
    /// metadata. The caller has already matched the FormID.
    pub fn from_candidate(buf: &[u8], candidate: &FormCandidate) -> Self {
        Self {
            form_id: u32_be_at(buf, 12).unwrap_or(candidate.expected_form_id),
            form_type: u8_at(buf, 4).unwrap_or(candidate.expected_form_type),
            flags: u32_be_at(buf, 8).unwrap_or(0),
            source_offset: candidate.file_offset,
            editor_id: candidate.editor_id.clone(),
            full_name: candidate.display_name.clone(),
        }
    }
}

/// One inventory entry recovered from a ContainerObject chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub form_id: u32,
    pub count: i32,
}

/// One faction membership recovered from the NiTList chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactionMembership {
    pub faction_form_id: u32,
    pub rank: i8,
}

/// A fully assembled record, one variant per form class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedRecord {
    Npc(NpcRecord),
    Creature(CreatureRecord),
    Faction(FactionRecord),
    Weapon(WeaponRecord),
    Armor(ArmorRecord),
    Ammo(AmmoRecord),
    Misc(MiscRecord),
    Key(KeyRecord),
    Container(ContainerRecord),
    Consumable(ConsumableRecord),
    Package(PackageRecord),
    Land(LandRecord),
    Script(ScriptRecord),
    Projectile(ProjectileRecord),
}

impl TypedRecord {
    pub fn header(&self) -> &RecordHeader {
        match self {
            Self::Npc(r) => &r.header,
            Self::Creature(r) => &r.header,
            Self::Faction(r) => &r.header,
            Self::Weapon(r) => &r.header,
            Self::Armor(r) => &r.header,
            Self::Ammo(r) => &r.header,
            Self::Misc(r) => &r.header,
            Self::Key(r) => &r.header,
            Self::Container(r) => &r.header,
            Self::Consumable(r) => &r.header,
            Self::Package(r) => &r.header,
            Self::Land(r) => &r.header,
            Self::Script(r) => &r.header,
            Self::Projectile(r) => &r.header,
        }
    }

    pub fn form_id(&self) -> u32 {
        self.header().form_id
    }

    pub fn source_offset(&self) -> u64 {
        self.header().source_offset
    }
}
