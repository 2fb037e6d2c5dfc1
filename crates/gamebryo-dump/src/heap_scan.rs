//! Aligned heap scanning engine.
//!
//! One engine serves every heuristic pass (meshes, textures, scene-graph
//! nodes, RTTI census): iterate every aligned position inside every
//! heap-classified contiguous region group, hand it to a cheap candidate
//! predicate, and on acceptance to a processor. Region groups fan out
//! across the rayon pool, one worker per group; within a group positions
//! are visited in ascending order, and the merged result list preserves
//! group order, so output is deterministic without cross-region ordering
//! guarantees during the scan itself.
//!
//! `min_struct_size` bounds the tail of each region -- no candidate may
//! extend past the region end. The cancellation token is observed once per
//! region group; in-progress groups run to completion.

use crate::context::RuntimeContext;
use crate::memory_map::RegionGroup;
use crate::progress::{self, CancelToken, ProgressCounter};
use rayon::prelude::*;

/// Heap object headers are 16-byte aligned by the console allocator.
pub const HEAP_ALIGNMENT: usize = 16;

/// Run `f` over every region group in parallel, returning per-group results
/// in group order. Cancelled or unreadable groups yield `R::default()`.
pub fn map_regions<R, F>(
    ctx: &RuntimeContext,
    groups: &[RegionGroup],
    f: F,
    counter: Option<&ProgressCounter>,
    cancel: Option<&CancelToken>,
) -> Vec<R>
where
    R: Send + Default,
    F: Fn(&RegionGroup, &[u8]) -> R + Sync,
{
    groups
        .par_iter()
        .map(|group| {
            if cancel.is_some_and(progress::is_cancelled) {
                return R::default();
            }
            let len = usize::try_from(group.size).unwrap_or(usize::MAX);
            let result = match ctx.read_bytes(group.file_offset, len) {
                Some(chunk) => f(group, chunk),
                None => R::default(),
            };
            if let Some(c) = counter {
                progress::tick(c);
            }
            result
        })
        .collect()
}

pub struct AlignedHeapScanner {
    pub alignment: usize,
    pub min_struct_size: usize,
}

impl AlignedHeapScanner {
    pub fn new(min_struct_size: usize) -> Self {
        Self {
            alignment: HEAP_ALIGNMENT,
            min_struct_size,
        }
    }

    pub fn with_alignment(min_struct_size: usize, alignment: usize) -> Self {
        Self {
            alignment,
            min_struct_size,
        }
    }

    /// Scan all heap-classified region groups. `candidate_test` sees the
    /// region chunk and an aligned offset inside it; on `true`,
    /// `process_candidate` additionally receives the absolute file offset
    /// and may produce a result. Both run on worker threads and must not
    /// rely on cross-candidate state.
    pub fn scan<T, F, P>(
        &self,
        ctx: &RuntimeContext,
        candidate_test: F,
        process_candidate: P,
        counter: Option<&ProgressCounter>,
        cancel: Option<&CancelToken>,
    ) -> Vec<T>
    where
        T: Send,
        F: Fn(&[u8], usize) -> bool + Sync,
        P: Fn(&[u8], usize, u64) -> Option<T> + Sync,
    {
        let groups = ctx.memory_map().heap_region_groups();
        let per_group: Vec<Vec<T>> = map_regions(
            ctx,
            &groups,
            |group, chunk| {
                let mut found = Vec::new();
                if chunk.len() < self.min_struct_size {
                    return found;
                }
                let last = chunk.len() - self.min_struct_size;
                let mut pos = 0usize;
                while pos <= last {
                    if candidate_test(chunk, pos) {
                        if let Some(item) =
                            process_candidate(chunk, pos, group.file_offset + pos as u64)
                        {
                            found.push(item);
                        }
                    }
                    pos += self.alignment;
                }
                found
            },
            counter,
            cancel,
        );
        per_group.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::DumpAccessor;
    use crate::memory_map::{MemoryMap, MemorySegment};
    use crate::progress;

    const MAGIC: u32 = 0xDEAD_BEEF;

    /// Two disjoint heap regions and one module region; magic words are
    /// planted at 16-byte-aligned offsets.
    fn fixture(plant: &[u64]) -> (DumpAccessor, MemoryMap) {
        let mut data = vec![0u8; 0x3000];
        for &off in plant {
            data[off as usize..off as usize + 4].copy_from_slice(&MAGIC.to_be_bytes());
        }
        let map = MemoryMap::new(
            vec![
                MemorySegment {
                    virtual_address: 0x4000_0000,
                    size: 0x1000,
                    file_offset: 0,
                },
                MemorySegment {
                    virtual_address: 0x4800_0000,
                    size: 0x1000,
                    file_offset: 0x1000,
                },
                MemorySegment {
                    virtual_address: 0x8200_0000,
                    size: 0x1000,
                    file_offset: 0x2000,
                },
            ],
            vec![],
        );
        (DumpAccessor::from_bytes(data), map)
    }

    fn is_magic(chunk: &[u8], pos: usize) -> bool {
        chunk[pos..pos + 4] == MAGIC.to_be_bytes()
    }

    #[test]
    fn test_finds_candidates_in_ascending_order() {
        let (acc, map) = fixture(&[0x40, 0x20, 0x1010]);
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let scanner = AlignedHeapScanner::new(16);
        let hits = scanner.scan(&ctx, is_magic, |_, _, off| Some(off), None, None);
        assert_eq!(hits, vec![0x20, 0x40, 0x1010]);
    }

    #[test]
    fn test_module_regions_not_scanned() {
        let (acc, map) = fixture(&[0x2010]);
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let scanner = AlignedHeapScanner::new(16);
        let hits = scanner.scan(&ctx, is_magic, |_, _, off| Some(off), None, None);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_min_struct_size_bounds_region_tail() {
        // A magic word 8 bytes before the region end: a 16-byte struct
        // would cross the boundary, so the position is never offered.
        let (acc, map) = fixture(&[0xFF0]);
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let scanner = AlignedHeapScanner::new(32);
        let hits = scanner.scan(&ctx, is_magic, |_, _, off| Some(off), None, None);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_unaligned_plant_is_missed() {
        let (acc, map) = fixture(&[0x24]);
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let scanner = AlignedHeapScanner::new(16);
        let hits = scanner.scan(&ctx, is_magic, |_, _, off| Some(off), None, None);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_progress_and_cancellation() {
        let (acc, map) = fixture(&[0x20]);
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let scanner = AlignedHeapScanner::new(16);

        let counter = progress::new_counter();
        let hits = scanner.scan(
            &ctx,
            is_magic,
            |_, _, off| Some(off),
            Some(&counter),
            None,
        );
        assert_eq!(hits.len(), 1);
        // One tick per heap region group.
        assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 2);

        let token = progress::new_cancel_token();
        progress::cancel(&token);
        let hits = scanner.scan(
            &ctx,
            is_magic,
            |_, _, off| Some(off),
            None,
            Some(&token),
        );
        assert!(hits.is_empty());
    }
}
