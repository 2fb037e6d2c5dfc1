//! Scene-graph walker: find the NiTriShape nodes that own extracted
//! meshes and recover their place in the scene hierarchy.
//!
//! NiTriShape is 240 bytes. The fields used here:
//!
//! | Offset | Type | Field |
//! |--------|------|-------|
//! | +4     | u32  | ref count |
//! | +8     | ptr  | node name (NiFixedString) |
//! | +24    | ptr  | parent NiNode |
//! | +128   | 64   | world NiTransform |
//! | +176   | f32×3| world translation (inside the transform) |
//! | +220   | ptr  | m_spModelData (the geometry block) |
//!
//! The prefilter is an exact join: the model-data pointer must equal the
//! VA of a mesh recovered by the mesh scanner. The parent chain is walked
//! leaf → root for at most 32 steps; every visited node contributes its
//! name through the same +8 / +24 fields (NiNode and NiTriShape share the
//! NiAVObject prefix).

use crate::context::RuntimeContext;
use crate::heap_scan::AlignedHeapScanner;
use crate::io_utils::{f32_be_at, u32_be_at};
use crate::mesh_scan::ExtractedMesh;
use crate::progress::{CancelToken, ProgressCounter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const TRI_SHAPE_STRUCT: usize = 240;

const MAX_REF_COUNT: u32 = 10_000;
const MAX_PARENT_DEPTH: usize = 32;
const MAX_NODE_NAME: usize = 255;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneGraphInfo {
    /// File offset of the NiTriShape node itself.
    pub tri_shape_offset: u64,
    /// File offset of the mesh block the node renders.
    pub mesh_source_offset: u64,
    pub node_name: String,
    /// Ancestor names in leaf → root order (excluding the node itself).
    pub parent_names: Vec<String>,
    /// VA of the chain's topmost node.
    pub root_node_va: u32,
    pub world_translation: [f32; 3],
}

impl SceneGraphInfo {
    /// "root/…/parent/leaf".
    pub fn full_path(&self) -> String {
        let mut parts: Vec<&str> = self.parent_names.iter().map(String::as_str).rev().collect();
        parts.push(&self.node_name);
        parts.join("/")
    }
}

/// Locate the NiTriShape parents of the given meshes and walk their
/// ancestor chains. Results are sorted by tri-shape offset.
pub fn scan_scene_graph(
    ctx: &RuntimeContext,
    meshes: &[ExtractedMesh],
    counter: Option<&ProgressCounter>,
    cancel: Option<&CancelToken>,
) -> Vec<SceneGraphInfo> {
    // Join key: the VA each mesh block was captured from.
    let mesh_by_va: HashMap<u32, u64> = meshes
        .iter()
        .filter_map(|m| ctx.offset_to_va(m.source_offset).map(|va| (va, m.source_offset)))
        .collect();
    if mesh_by_va.is_empty() {
        return Vec::new();
    }

    let scanner = AlignedHeapScanner::new(TRI_SHAPE_STRUCT);
    let mut infos = scanner.scan(
        ctx,
        |chunk, pos| {
            let Some(model) = u32_be_at(chunk, pos + 220) else {
                return false;
            };
            if !mesh_by_va.contains_key(&model) {
                return false;
            }
            matches!(u32_be_at(chunk, pos + 4), Some(rc) if rc > 0 && rc <= MAX_REF_COUNT)
        },
        |chunk, pos, file_offset| {
            let model = u32_be_at(chunk, pos + 220)?;
            let mesh_source_offset = *mesh_by_va.get(&model)?;
            process_tri_shape(ctx, chunk, pos, file_offset, mesh_source_offset)
        },
        counter,
        cancel,
    );
    infos.sort_by_key(|i| i.tri_shape_offset);
    infos
}

fn process_tri_shape(
    ctx: &RuntimeContext,
    chunk: &[u8],
    pos: usize,
    file_offset: u64,
    mesh_source_offset: u64,
) -> Option<SceneGraphInfo> {
    let name_ptr = u32_be_at(chunk, pos + 8)?;
    let node_name = ctx.read_cstring_va(name_ptr, MAX_NODE_NAME)?;
    if node_name.is_empty() {
        return None;
    }

    let world_translation = [
        f32_be_at(chunk, pos + 176)?,
        f32_be_at(chunk, pos + 180)?,
        f32_be_at(chunk, pos + 184)?,
    ];

    let leaf_va = ctx.offset_to_va(file_offset)?;
    let (parent_names, root_node_va) =
        walk_parent_chain(ctx, u32_be_at(chunk, pos + 24)?, leaf_va);

    Some(SceneGraphInfo {
        tri_shape_offset: file_offset,
        mesh_source_offset,
        node_name,
        parent_names,
        root_node_va,
        world_translation,
    })
}

/// Follow parent pointers for at most 32 steps, collecting names leaf →
/// root. The chain ends at a null parent, an uncaptured node, or an
/// unreadable name; the VA of the last node reached is the root.
fn walk_parent_chain(ctx: &RuntimeContext, first_parent: u32, leaf_va: u32) -> (Vec<String>, u32) {
    let mut names = Vec::new();
    let mut root_va = leaf_va;
    let mut current = first_parent;
    for _ in 0..MAX_PARENT_DEPTH {
        if current == 0 || !ctx.is_valid_pointer(current) {
            break;
        }
        let Some(node) = ctx.read_bytes_va(current, 28) else {
            break;
        };
        let Some(name_ptr) = u32_be_at(node, 8) else {
            break;
        };
        let Some(name) = ctx.read_cstring_va(name_ptr, MAX_NODE_NAME) else {
            break;
        };
        names.push(name);
        root_va = current;
        current = u32_be_at(node, 24).unwrap_or(0);
    }
    (names, root_va)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::DumpAccessor;
    use crate::memory_map::{MemoryMap, MemorySegment};
    use crate::mesh_scan::MeshKind;

    const HEAP_VA: u32 = 0x4000_0000;

    fn put_u32(d: &mut [u8], off: usize, v: u32) {
        d[off..off + 4].copy_from_slice(&v.to_be_bytes());
    }

    fn put_f32(d: &mut [u8], off: usize, v: f32) {
        d[off..off + 4].copy_from_slice(&v.to_be_bytes());
    }

    fn mesh_at(offset: u64) -> ExtractedMesh {
        ExtractedMesh {
            kind: MeshKind::TriShape,
            vertex_count: 3,
            vertices: vec![0.0; 9],
            normals: None,
            uvs: None,
            colors: None,
            triangle_indices: vec![0, 1, 2],
            bound_center: [0.0; 3],
            bound_radius: 1.0,
            source_offset: offset,
            vertex_hash: 0x1234,
        }
    }

    /// Heap image with a NiTriShape at 0x1000 whose model data points at
    /// 0x2000, parents "mid" (0x3000) and "root" (0x3100).
    fn fixture() -> (DumpAccessor, MemoryMap) {
        let mut d = vec![0u8; 0x8000];

        // Names.
        d[0x4000..0x4005].copy_from_slice(b"leaf\0");
        d[0x4010..0x4014].copy_from_slice(b"mid\0");
        d[0x4020..0x4025].copy_from_slice(b"root\0");

        // Leaf NiTriShape at 0x1000.
        put_u32(&mut d, 0x1000 + 4, 2);
        put_u32(&mut d, 0x1000 + 8, HEAP_VA + 0x4000);
        put_u32(&mut d, 0x1000 + 24, HEAP_VA + 0x3000);
        put_f32(&mut d, 0x1000 + 176, 10.0);
        put_f32(&mut d, 0x1000 + 180, -4.0);
        put_f32(&mut d, 0x1000 + 184, 0.5);
        put_u32(&mut d, 0x1000 + 220, HEAP_VA + 0x2000);

        // "mid" node at 0x3000 → parent "root" at 0x3100.
        put_u32(&mut d, 0x3000 + 8, HEAP_VA + 0x4010);
        put_u32(&mut d, 0x3000 + 24, HEAP_VA + 0x3100);
        // "root" node, no parent.
        put_u32(&mut d, 0x3100 + 8, HEAP_VA + 0x4020);
        put_u32(&mut d, 0x3100 + 24, 0);

        let map = MemoryMap::new(
            vec![MemorySegment {
                virtual_address: HEAP_VA,
                size: 0x8000,
                file_offset: 0,
            }],
            vec![],
        );
        (DumpAccessor::from_bytes(d), map)
    }

    #[test]
    fn test_scene_graph_chain() {
        let (acc, map) = fixture();
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let infos = scan_scene_graph(&ctx, &[mesh_at(0x2000)], None, None);
        assert_eq!(infos.len(), 1);
        let info = &infos[0];
        assert_eq!(info.node_name, "leaf");
        assert_eq!(info.parent_names, vec!["mid", "root"]);
        assert_eq!(info.full_path(), "root/mid/leaf");
        assert_eq!(info.root_node_va, HEAP_VA + 0x3100);
        assert_eq!(info.world_translation, [10.0, -4.0, 0.5]);
        assert_eq!(info.mesh_source_offset, 0x2000);
        assert_eq!(info.tri_shape_offset, 0x1000);
    }

    #[test]
    fn test_no_match_for_unknown_mesh_va() {
        let (acc, map) = fixture();
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let infos = scan_scene_graph(&ctx, &[mesh_at(0x5000)], None, None);
        assert!(infos.is_empty());
    }

    #[test]
    fn test_parent_cycle_capped_at_depth_limit() {
        let (acc, map) = fixture();
        // Make "mid" its own parent.
        let mut d = acc.read(0, 0x8000).unwrap().to_vec();
        put_u32(&mut d, 0x3000 + 24, HEAP_VA + 0x3000);
        let acc = DumpAccessor::from_bytes(d);
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let infos = scan_scene_graph(&ctx, &[mesh_at(0x2000)], None, None);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].parent_names.len(), MAX_PARENT_DEPTH);
        assert!(infos[0].parent_names.iter().all(|n| n == "mid"));
    }
}
