//! Memory map: sorted VA → file-offset segment table plus loaded modules.
//!
//! Built once from the minidump's memory streams (by an external parser)
//! and immutable afterwards. All lookups are total functions returning a
//! sentinel on miss; nothing here panics.
//!
//! Xbox 360 address windows:
//! - module range: 0x82000000–0x8FFFFFFF (64 KiB aligned module bases)
//! - heap range:   0x40000000–0x7FFFFFFF
//!
//! A VA may classify as a valid pointer yet not resolve to a captured
//! segment -- minidumps routinely omit ranges. Callers that actually read
//! through a pointer must also check `va_to_offset`.

use serde::{Deserialize, Serialize};

/// Inclusive module-range bounds.
pub const MODULE_RANGE_START: u32 = 0x8200_0000;
pub const MODULE_RANGE_END: u32 = 0x8FFF_FFFF;

/// Inclusive heap-range bounds.
pub const HEAP_RANGE_START: u32 = 0x4000_0000;
pub const HEAP_RANGE_END: u32 = 0x7FFF_FFFF;

/// A captured memory range: `size` bytes at `virtual_address`, stored at
/// `file_offset` in the dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySegment {
    pub virtual_address: u32,
    pub size: u32,
    pub file_offset: u64,
}

impl MemorySegment {
    /// One past the last VA covered by this segment.
    pub fn end_va(&self) -> u64 {
        self.virtual_address as u64 + self.size as u64
    }

    /// One past the last file offset covered by this segment.
    pub fn end_offset(&self) -> u64 {
        self.file_offset + self.size as u64
    }

    pub fn contains_va(&self, va: u32) -> bool {
        (va as u64) >= self.virtual_address as u64 && (va as u64) < self.end_va()
    }

    pub fn contains_offset(&self, offset: u64) -> bool {
        offset >= self.file_offset && offset < self.end_offset()
    }
}

/// A module captured in the dump (executable or loaded library).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub base_va: u32,
    pub size: u32,
    pub timestamp: u32,
}

/// Pointer classification against the Xbox 360 address windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerClass {
    Module,
    Heap,
    Invalid,
}

/// A maximal run of segments contiguous in both VA and file offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionGroup {
    pub virtual_address: u32,
    pub file_offset: u64,
    pub size: u64,
}

/// The dump's memory map: segments sorted by VA, plus the module list.
#[derive(Debug, Clone)]
pub struct MemoryMap {
    segments: Vec<MemorySegment>,
    /// Indices into `segments`, sorted by file offset.
    by_offset: Vec<usize>,
    modules: Vec<Module>,
}

impl MemoryMap {
    /// Build a map from unordered segments and modules. Segments are sorted
    /// by VA; zero-sized segments are dropped.
    pub fn new(mut segments: Vec<MemorySegment>, modules: Vec<Module>) -> Self {
        segments.retain(|s| s.size > 0);
        segments.sort_by_key(|s| s.virtual_address);
        let mut by_offset: Vec<usize> = (0..segments.len()).collect();
        by_offset.sort_by_key(|&i| segments[i].file_offset);
        Self {
            segments,
            by_offset,
            modules,
        }
    }

    pub fn segments(&self) -> &[MemorySegment] {
        &self.segments
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Translate a VA to its file offset, or `None` if the VA is not
    /// captured. O(log N).
    pub fn va_to_offset(&self, va: u32) -> Option<u64> {
        let seg = self.segment_for_va(va)?;
        Some(seg.file_offset + (va - seg.virtual_address) as u64)
    }

    /// Translate a file offset back to the VA it was captured from.
    pub fn offset_to_va(&self, offset: u64) -> Option<u32> {
        let seg = self.segment_for_offset(offset)?;
        Some(seg.virtual_address + (offset - seg.file_offset) as u32)
    }

    /// The segment containing `va`, if captured.
    pub fn segment_for_va(&self, va: u32) -> Option<&MemorySegment> {
        let idx = self
            .segments
            .partition_point(|s| s.virtual_address <= va)
            .checked_sub(1)?;
        let seg = &self.segments[idx];
        seg.contains_va(va).then_some(seg)
    }

    /// The segment containing `offset`, if any.
    pub fn segment_for_offset(&self, offset: u64) -> Option<&MemorySegment> {
        let idx = self
            .by_offset
            .partition_point(|&i| self.segments[i].file_offset <= offset)
            .checked_sub(1)?;
        let seg = &self.segments[self.by_offset[idx]];
        seg.contains_offset(offset).then_some(seg)
    }

    /// Classify a VA against the console's address windows. True heap and
    /// module pointers fall in fixed ranges; everything else is garbage as
    /// far as the readers are concerned.
    pub fn classify_pointer(&self, va: u32) -> PointerClass {
        if (MODULE_RANGE_START..=MODULE_RANGE_END).contains(&va) {
            PointerClass::Module
        } else if (HEAP_RANGE_START..=HEAP_RANGE_END).contains(&va) {
            PointerClass::Heap
        } else {
            PointerClass::Invalid
        }
    }

    /// True if the VA lies in the module or heap window. The VA may still
    /// be uncaptured -- reads through it then return `None`.
    pub fn valid_pointer(&self, va: u32) -> bool {
        self.classify_pointer(va) != PointerClass::Invalid
    }

    /// The module whose range covers `va`, if any.
    pub fn module_for_va(&self, va: u32) -> Option<&Module> {
        self.modules
            .iter()
            .find(|m| va >= m.base_va && (va as u64) < m.base_va as u64 + m.size as u64)
    }

    /// Bytes available starting at `offset` without crossing a VA
    /// discontinuity, accumulating adjacent segments whose VA (and file
    /// position) follow directly from the previous segment's end.
    pub fn contiguous_bytes_from_offset(&self, offset: u64) -> usize {
        let Some(seg) = self.segment_for_offset(offset) else {
            return 0;
        };
        let mut avail = seg.end_offset() - offset;
        let mut prev = *seg;
        loop {
            match self.segment_for_va_start(prev.end_va()) {
                Some(next) if next.file_offset == prev.end_offset() => {
                    avail += next.size as u64;
                    prev = *next;
                }
                _ => break,
            }
        }
        usize::try_from(avail).unwrap_or(usize::MAX)
    }

    /// The segment starting exactly at `va_end`, if any.
    fn segment_for_va_start(&self, va_end: u64) -> Option<&MemorySegment> {
        let va = u32::try_from(va_end).ok()?;
        let idx = self.segments.partition_point(|s| s.virtual_address < va);
        let seg = self.segments.get(idx)?;
        (seg.virtual_address == va).then_some(seg)
    }

    /// Maximal runs of segments where each successor's VA equals the
    /// predecessor's end (and the file bytes are likewise adjacent). These
    /// are the units of parallel fan-out for heap scans.
    pub fn contiguous_region_groups(&self) -> Vec<RegionGroup> {
        let mut groups: Vec<RegionGroup> = Vec::new();
        for seg in &self.segments {
            match groups.last_mut() {
                Some(g)
                    if g.virtual_address as u64 + g.size == seg.virtual_address as u64
                        && g.file_offset + g.size == seg.file_offset =>
                {
                    g.size += seg.size as u64;
                }
                _ => groups.push(RegionGroup {
                    virtual_address: seg.virtual_address,
                    file_offset: seg.file_offset,
                    size: seg.size as u64,
                }),
            }
        }
        groups
    }

    /// Contiguous region groups whose start VA classifies as heap.
    pub fn heap_region_groups(&self) -> Vec<RegionGroup> {
        self.contiguous_region_groups()
            .into_iter()
            .filter(|g| self.classify_pointer(g.virtual_address) == PointerClass::Heap)
            .collect()
    }
}
