//! TESObjectLAND reader.
//!
//! The form itself is tiny (`44 + shift` bytes): a TESForm header plus a
//! pointer at `+40 + shift` to the LoadedLandData block. LoadedLandData is
//! a standalone fixed layout of 164 bytes and does NOT shift:
//!
//! | Offset | Type | Field |
//! |--------|------|-------|
//! | +4     | T**  | vertex positions (required) |
//! | +8     | T**  | vertex normals (optional)   |
//! | +12    | T**  | vertex colors, RGBA (optional) |
//! | +24    | f32  | min height |
//! | +28    | f32  | max height |
//! | +152   | i32  | cell X |
//! | +156   | i32  | cell Y |
//! | +160   | f32  | base height |
//!
//! The vertex arrays are double-indirected: the block stores a pointer to
//! a pointer to the float array. A cell is a 33 × 33 vertex grid (32 × 32
//! quads at 128 world units each), so a well-formed X or Y extent spans
//! 1000-10000 units. Terrain validation is stricter than FaceGen: at least
//! 70% of the expected floats must pass.

use crate::context::{is_normal_float, RuntimeContext};
use crate::form_types::{FormCandidate, FormType, RecordHeader};
use crate::io_utils::{i32_be_at, u32_be_at};
use serde::{Deserialize, Serialize};

const LAND_STRUCT_SIZE: usize = 44;
const LOADED_LAND_DATA_SIZE: usize = 164;

/// 33 × 33 height-field vertices per cell.
pub const LAND_VERTEX_COUNT: usize = 1089;

const MIN_CELL_EXTENT: f32 = 1000.0;
const MAX_CELL_EXTENT: f32 = 10_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainMesh {
    /// 3 × 1089 interleaved XYZ floats.
    pub positions: Vec<f32>,
    pub normals: Option<Vec<f32>>,
    /// RGBA, 4 × 1089 floats.
    pub colors: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedLandData {
    pub cell_x: i32,
    pub cell_y: i32,
    pub base_height: f32,
    pub height_min: f32,
    pub height_max: f32,
    pub mesh: Option<TerrainMesh>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandRecord {
    pub header: RecordHeader,
    pub loaded: Option<LoadedLandData>,
}

pub fn read_land(ctx: &RuntimeContext, candidate: &FormCandidate) -> Option<LandRecord> {
    if candidate.expected_form_type != FormType::Land.code() {
        return None;
    }
    let s = ctx.shift() as usize;
    let size = LAND_STRUCT_SIZE + s;
    if candidate.file_offset + size as u64 > ctx.file_size() {
        return None;
    }
    let buf = ctx.read_bytes(candidate.file_offset, size)?;
    if u32_be_at(buf, 12)? != candidate.expected_form_id {
        return None;
    }

    let loaded = u32_be_at(buf, 40 + s)
        .filter(|&va| va != 0 && ctx.is_valid_pointer(va))
        .and_then(|va| read_loaded_land_data(ctx, va));

    Some(LandRecord {
        header: RecordHeader::from_candidate(buf, candidate),
        loaded,
    })
}

fn read_loaded_land_data(ctx: &RuntimeContext, va: u32) -> Option<LoadedLandData> {
    let offset = ctx.va_to_offset(va)?;
    let buf = ctx.read_bytes(offset, LOADED_LAND_DATA_SIZE)?;

    let clamp_cell = |v: i32| if (-1000..=1000).contains(&v) { v } else { 0 };
    let cell_x = clamp_cell(i32_be_at(buf, 152)?);
    let cell_y = clamp_cell(i32_be_at(buf, 156)?);

    let base_raw = f32::from_bits(u32_be_at(buf, 160)?);
    let base_height = if is_normal_float(base_raw) && base_raw.abs() <= 100_000.0 {
        base_raw
    } else {
        0.0
    };

    Some(LoadedLandData {
        cell_x,
        cell_y,
        base_height,
        height_min: f32::from_bits(u32_be_at(buf, 24)?),
        height_max: f32::from_bits(u32_be_at(buf, 28)?),
        mesh: read_terrain_mesh(ctx, buf),
    })
}

fn read_terrain_mesh(ctx: &RuntimeContext, land_data: &[u8]) -> Option<TerrainMesh> {
    let positions = read_indirect_floats(ctx, land_data, 4, LAND_VERTEX_COUNT * 3)?;

    // 70% of position floats must be normal and inside the world bound.
    let valid = positions
        .iter()
        .filter(|v| is_normal_float(**v) && v.abs() <= 200_000.0)
        .count();
    if valid * 10 < positions.len() * 7 {
        return None;
    }

    // The height field spans a cell: X and Y extents must look like one.
    let extent = |axis: usize| -> f32 {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for chunk in positions.chunks_exact(3) {
            let v = chunk[axis];
            if is_normal_float(v) && v.abs() <= 200_000.0 {
                min = min.min(v);
                max = max.max(v);
            }
        }
        if min > max {
            0.0
        } else {
            max - min
        }
    };
    let x_extent = extent(0);
    let y_extent = extent(1);
    if !(MIN_CELL_EXTENT..=MAX_CELL_EXTENT).contains(&x_extent)
        || !(MIN_CELL_EXTENT..=MAX_CELL_EXTENT).contains(&y_extent)
    {
        return None;
    }

    let normals = read_indirect_floats(ctx, land_data, 8, LAND_VERTEX_COUNT * 3)
        .filter(|values| floats_within(values, 2.0, 7, 10));
    let colors = read_indirect_floats(ctx, land_data, 12, LAND_VERTEX_COUNT * 4)
        .filter(|values| floats_within(values, 2.0, 7, 10));

    Some(TerrainMesh {
        positions,
        normals,
        colors,
    })
}

/// At least `num/den` of the floats are normal with |v| ≤ bound.
fn floats_within(values: &[f32], bound: f32, num: usize, den: usize) -> bool {
    let ok = values
        .iter()
        .filter(|v| is_normal_float(**v) && v.abs() <= bound)
        .count();
    ok * den >= values.len() * num
}

/// Follow a T** stored at `ptr_offset` inside the land-data block: the
/// block holds a pointer to a pointer to the actual float array.
fn read_indirect_floats(
    ctx: &RuntimeContext,
    land_data: &[u8],
    ptr_offset: usize,
    count: usize,
) -> Option<Vec<f32>> {
    let outer = u32_be_at(land_data, ptr_offset)?;
    if outer == 0 || !ctx.is_valid_pointer(outer) {
        return None;
    }
    let inner = ctx.read_u32_be_va(outer)?;
    if inner == 0 || !ctx.is_valid_pointer(inner) {
        return None;
    }
    let raw = ctx.read_bytes_va(inner, count * 4)?;
    Some(
        raw.chunks_exact(4)
            .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
