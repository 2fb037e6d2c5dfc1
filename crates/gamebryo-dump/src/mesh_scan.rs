//! Mesh extraction: heap scan for NiTriShapeData / NiTriStripsData.
//!
//! Gamebryo geometry blocks share the NiGeometryData prefix:
//!
//! | Offset | Type | Field |
//! |--------|------|-------|
//! | +4     | u32  | ref count |
//! | +8     | u16  | vertex count |
//! | +16    | f32×3| bound center |
//! | +28    | f32  | bound radius |
//! | +32    | ptr  | vertices (3 × N floats) |
//! | +36    | ptr  | normals |
//! | +40    | ptr  | vertex colors (RGBA) |
//! | +44    | ptr  | UV sets |
//! | +64    | u16  | triangle count (NiTriBasedGeomData) |
//!
//! NiTriShapeData extends to 88 bytes with a flat index list (`u32` length
//! at +68, pointer at +72); NiTriStripsData extends to 80 with strip
//! lengths/lists pointers at +72/+76. A candidate is tried as a tri-shape
//! first and as strips second; strips are unrolled with alternating
//! winding, dropping degenerate triangles.
//!
//! Deduplication hashes the bit patterns of the first 24 vertex floats --
//! the first candidate at each hash (in ascending offset order) wins.

use crate::context::{is_normal_float, RuntimeContext};
use crate::heap_scan::AlignedHeapScanner;
use crate::io_utils::{f32_be_at, u16_be_at, u32_be_at};
use crate::progress::{CancelToken, ProgressCounter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// NiTriStripsData is the smaller of the two layouts.
const MIN_GEOMETRY_STRUCT: usize = 80;

const MAX_REF_COUNT: u32 = 10_000;
const MIN_VERTEX_COUNT: u16 = 3;
const MAX_STRIP_COUNT: u16 = 1000;
const MAX_COORD: f32 = 500_000.0;
const MAX_BOUND_RADIUS: f32 = 200_000.0;

/// Floats hashed for deduplication (8 vertices × XYZ).
const DEDUP_FLOATS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshKind {
    TriShape,
    TriStrips,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMesh {
    pub kind: MeshKind,
    pub vertex_count: u16,
    /// 3 × N interleaved XYZ floats.
    pub vertices: Vec<f32>,
    pub normals: Option<Vec<f32>>,
    /// 2 × N floats.
    pub uvs: Option<Vec<f32>>,
    /// 4 × N RGBA floats.
    pub colors: Option<Vec<f32>>,
    /// Flat triangle list, indices into the vertex array.
    pub triangle_indices: Vec<u16>,
    pub bound_center: [f32; 3],
    pub bound_radius: f32,
    pub source_offset: u64,
    pub vertex_hash: u64,
}

impl ExtractedMesh {
    pub fn triangle_count(&self) -> usize {
        self.triangle_indices.len() / 3
    }
}

/// 64-bit FNV-1a over the big-endian bit patterns of the leading vertex
/// floats.
pub fn vertex_hash(vertex_bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in vertex_bytes.iter().take(DEDUP_FLOATS * 4) {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Cheap structural filter run at every aligned heap position.
fn fast_filter(ctx: &RuntimeContext, chunk: &[u8], pos: usize) -> bool {
    let Some(ref_count) = u32_be_at(chunk, pos + 4) else {
        return false;
    };
    if ref_count == 0 || ref_count > MAX_REF_COUNT {
        return false;
    }
    let Some(vertex_count) = u16_be_at(chunk, pos + 8) else {
        return false;
    };
    if vertex_count < MIN_VERTEX_COUNT {
        return false;
    }
    match u16_be_at(chunk, pos + 64) {
        Some(tri_count) if tri_count > 0 => {}
        _ => return false,
    }
    match f32_be_at(chunk, pos + 28) {
        Some(radius)
            if is_normal_float(radius) && radius > 0.0 && radius <= MAX_BOUND_RADIUS => {}
        _ => return false,
    }
    match u32_be_at(chunk, pos + 32) {
        Some(vp) if vp != 0 && ctx.is_valid_pointer(vp) => {}
        _ => return false,
    }
    let normal_ptr = u32_be_at(chunk, pos + 36).unwrap_or(0);
    let uv_ptr = u32_be_at(chunk, pos + 44).unwrap_or(0);
    if normal_ptr == 0 && uv_ptr == 0 {
        return false;
    }
    if normal_ptr != 0 && !ctx.is_valid_pointer(normal_ptr) {
        return false;
    }
    if uv_ptr != 0 && !ctx.is_valid_pointer(uv_ptr) {
        return false;
    }
    true
}

/// Full validation and extraction of one candidate.
fn process_candidate(
    ctx: &RuntimeContext,
    chunk: &[u8],
    pos: usize,
    file_offset: u64,
) -> Option<ExtractedMesh> {
    let vertex_count = u16_be_at(chunk, pos + 8)?;
    let triangle_count = u16_be_at(chunk, pos + 64)?;
    let n = vertex_count as usize;

    let vertex_ptr = u32_be_at(chunk, pos + 32)?;
    let raw = ctx.read_bytes_va(vertex_ptr, n * 3 * 4)?;
    let vertices: Vec<f32> = raw
        .chunks_exact(4)
        .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let valid = vertices
        .iter()
        .filter(|v| is_normal_float(**v) && v.abs() <= MAX_COORD)
        .count();
    if valid * 2 < vertices.len() {
        return None;
    }
    if !spatial_extent_plausible(&vertices) {
        return None;
    }

    let normals = read_float_attribute(ctx, chunk, pos + 36, n * 3, 2.0);
    let colors = read_float_attribute(ctx, chunk, pos + 40, n * 4, 2.0);
    let uvs = read_float_attribute(ctx, chunk, pos + 44, n * 2, 100.0);

    let (kind, triangle_indices) = read_tri_shape_indices(ctx, chunk, pos, vertex_count, triangle_count)
        .map(|idx| (MeshKind::TriShape, idx))
        .or_else(|| {
            read_tri_strip_indices(ctx, chunk, pos, vertex_count)
                .map(|idx| (MeshKind::TriStrips, idx))
        })?;
    if triangle_indices.len() < 3 {
        return None;
    }

    Some(ExtractedMesh {
        kind,
        vertex_count,
        bound_center: [
            f32_be_at(chunk, pos + 16)?,
            f32_be_at(chunk, pos + 20)?,
            f32_be_at(chunk, pos + 24)?,
        ],
        bound_radius: f32_be_at(chunk, pos + 28)?,
        vertex_hash: vertex_hash(raw),
        vertices,
        normals,
        uvs,
        colors,
        triangle_indices,
        source_offset: file_offset,
    })
}

/// The mesh must span something physical: the widest axis range lies in
/// [0.1, 200000] world units.
fn spatial_extent_plausible(vertices: &[f32]) -> bool {
    let mut min = [f32::MAX; 3];
    let mut max = [f32::MIN; 3];
    for chunk in vertices.chunks_exact(3) {
        for axis in 0..3 {
            let v = chunk[axis];
            if is_normal_float(v) && v.abs() <= MAX_COORD {
                min[axis] = min[axis].min(v);
                max[axis] = max[axis].max(v);
            }
        }
    }
    let widest = (0..3)
        .map(|a| if min[a] > max[a] { 0.0 } else { max[a] - min[a] })
        .fold(0.0f32, f32::max);
    (0.1..=MAX_BOUND_RADIUS).contains(&widest)
}

/// Optional per-vertex float attribute behind a pointer: every value must
/// be finite and within the magnitude bound, or the attribute is dropped.
fn read_float_attribute(
    ctx: &RuntimeContext,
    chunk: &[u8],
    ptr_offset: usize,
    count: usize,
    bound: f32,
) -> Option<Vec<f32>> {
    let ptr = u32_be_at(chunk, ptr_offset)?;
    if ptr == 0 || !ctx.is_valid_pointer(ptr) {
        return None;
    }
    let raw = ctx.read_bytes_va(ptr, count * 4)?;
    let values: Vec<f32> = raw
        .chunks_exact(4)
        .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if values.iter().all(|v| v.is_finite() && v.abs() <= bound) {
        Some(values)
    } else {
        None
    }
}

/// NiTriShapeData: a flat u16 index list. The stored length must be a
/// multiple of three, agree with the triangle count, and stay within six
/// indices per vertex.
fn read_tri_shape_indices(
    ctx: &RuntimeContext,
    chunk: &[u8],
    pos: usize,
    vertex_count: u16,
    triangle_count: u16,
) -> Option<Vec<u16>> {
    let length = u32_be_at(chunk, pos + 68)? as usize;
    if length == 0 || length % 3 != 0 {
        return None;
    }
    if length != triangle_count as usize * 3 || length > vertex_count as usize * 6 {
        return None;
    }
    let ptr = u32_be_at(chunk, pos + 72)?;
    if ptr == 0 || !ctx.is_valid_pointer(ptr) {
        return None;
    }
    let raw = ctx.read_bytes_va(ptr, length * 2)?;
    let indices: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    if indices.iter().all(|&i| i < vertex_count) {
        Some(indices)
    } else {
        None
    }
}

/// NiTriStripsData: per-strip lengths plus concatenated strip indices,
/// unrolled into a flat triangle list with alternating winding.
fn read_tri_strip_indices(
    ctx: &RuntimeContext,
    chunk: &[u8],
    pos: usize,
    vertex_count: u16,
) -> Option<Vec<u16>> {
    let strip_count = u16_be_at(chunk, pos + 68)?;
    if strip_count == 0 || strip_count > MAX_STRIP_COUNT {
        return None;
    }
    let lengths_ptr = u32_be_at(chunk, pos + 72)?;
    let lists_ptr = u32_be_at(chunk, pos + 76)?;
    if !ctx.is_valid_pointer(lengths_ptr) || !ctx.is_valid_pointer(lists_ptr) {
        return None;
    }

    let raw_lengths = ctx.read_bytes_va(lengths_ptr, strip_count as usize * 2)?;
    let lengths: Vec<usize> = raw_lengths
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]) as usize)
        .collect();
    let total: usize = lengths.iter().sum();
    if total == 0 || total > vertex_count as usize * 6 {
        return None;
    }

    let raw_points = ctx.read_bytes_va(lists_ptr, total * 2)?;
    let points: Vec<u16> = raw_points
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    if points.iter().any(|&p| p >= vertex_count) {
        return None;
    }

    let mut triangles = Vec::new();
    let mut cursor = 0usize;
    for len in lengths {
        let strip = &points[cursor..cursor + len];
        cursor += len;
        for i in 2..len {
            let (a, b, c) = if i % 2 == 1 {
                (strip[i - 1], strip[i - 2], strip[i])
            } else {
                (strip[i - 2], strip[i - 1], strip[i])
            };
            if a != b && b != c && a != c {
                triangles.extend_from_slice(&[a, b, c]);
            }
        }
    }
    if triangles.is_empty() {
        return None;
    }
    Some(triangles)
}

/// Scan every heap region for geometry blocks, deduplicating by vertex
/// hash (first hit wins).
pub fn scan_meshes(
    ctx: &RuntimeContext,
    counter: Option<&ProgressCounter>,
    cancel: Option<&CancelToken>,
) -> Vec<ExtractedMesh> {
    let scanner = AlignedHeapScanner::new(MIN_GEOMETRY_STRUCT);
    let mut meshes = scanner.scan(
        ctx,
        |chunk, pos| fast_filter(ctx, chunk, pos),
        |chunk, pos, file_offset| process_candidate(ctx, chunk, pos, file_offset),
        counter,
        cancel,
    );
    meshes.sort_by_key(|m| m.source_offset);

    let mut seen: HashSet<u64> = HashSet::new();
    meshes.retain(|m| seen.insert(m.vertex_hash));
    meshes
}
