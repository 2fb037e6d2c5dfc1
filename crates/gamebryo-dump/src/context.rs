//! Runtime context: the composed view every reader works through.
//!
//! Combines the accessor (raw bytes) with the memory map (VA translation)
//! and the build shift. All derived reads return `None` on any boundary
//! violation, pointer miss, or string-validation failure -- a miss is the
//! common case during heuristic scans, never an error.

use crate::accessor::DumpAccessor;
use crate::io_utils::{self, u16_be_at, u32_be_at};
use crate::memory_map::{MemoryMap, PointerClass};

/// Ceiling applied to every intrusive-list traversal.
pub const MAX_LIST_ITEMS: usize = 4096;

/// BSStringT payloads longer than this are treated as garbage.
pub const MAX_BS_STRING_LEN: usize = 256;

/// FormID field offset inside the 16-byte TESForm header.
pub const FORM_ID_OFFSET: u64 = 12;

/// True for FormIDs that can name a live object.
#[inline]
pub fn plausible_form_id(id: u32) -> bool {
    id != 0 && id != 0xFFFF_FFFF
}

/// True iff `f` is neither NaN, ±∞, nor a denormal. Normal zero is
/// accepted. Callers that need to detect "unset" must compare the raw bit
/// pattern against zero separately.
#[inline]
pub fn is_normal_float(f: f32) -> bool {
    matches!(
        f.classify(),
        std::num::FpCategory::Normal | std::num::FpCategory::Zero
    )
}

pub struct RuntimeContext<'a> {
    accessor: &'a DumpAccessor,
    map: &'a MemoryMap,
    /// Build-specific struct-offset shift (see [`crate::BuildProfile`]).
    shift: u32,
}

impl<'a> RuntimeContext<'a> {
    pub fn new(accessor: &'a DumpAccessor, map: &'a MemoryMap, shift: u32) -> Self {
        Self {
            accessor,
            map,
            shift,
        }
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    pub fn file_size(&self) -> u64 {
        self.accessor.len()
    }

    pub fn memory_map(&self) -> &'a MemoryMap {
        self.map
    }

    // --- raw reads (file offsets) ---

    pub fn read_bytes(&self, offset: u64, len: usize) -> Option<&'a [u8]> {
        self.accessor.read(offset, len)
    }

    pub fn read_u8(&self, offset: u64) -> Option<u8> {
        self.read_bytes(offset, 1).map(|b| b[0])
    }

    pub fn read_u16_be(&self, offset: u64) -> Option<u16> {
        self.read_bytes(offset, 2).and_then(|b| u16_be_at(b, 0))
    }

    pub fn read_u32_be(&self, offset: u64) -> Option<u32> {
        self.read_bytes(offset, 4).and_then(|b| u32_be_at(b, 0))
    }

    pub fn read_i32_be(&self, offset: u64) -> Option<i32> {
        self.read_u32_be(offset).map(|v| v as i32)
    }

    pub fn read_float_be(&self, offset: u64) -> Option<f32> {
        self.read_u32_be(offset).map(f32::from_bits)
    }

    // --- VA-based reads ---

    pub fn va_to_offset(&self, va: u32) -> Option<u64> {
        self.map.va_to_offset(va)
    }

    pub fn offset_to_va(&self, offset: u64) -> Option<u32> {
        self.map.offset_to_va(offset)
    }

    pub fn classify_pointer(&self, va: u32) -> PointerClass {
        self.map.classify_pointer(va)
    }

    /// True if the VA lies in the module or heap window.
    pub fn is_valid_pointer(&self, va: u32) -> bool {
        self.map.valid_pointer(va)
    }

    pub fn read_u32_be_va(&self, va: u32) -> Option<u32> {
        self.read_u32_be(self.va_to_offset(va)?)
    }

    pub fn read_bytes_va(&self, va: u32, len: usize) -> Option<&'a [u8]> {
        self.read_bytes(self.va_to_offset(va)?, len)
    }

    // --- derived reads ---

    /// Read a pointer stored at `offset` inside `buf` and resolve it to the
    /// FormID of the TESForm it points at. `None` if the word is zero, is
    /// not a valid pointer, is uncaptured, or the FormID is the 0 /
    /// 0xFFFFFFFF sentinel.
    pub fn follow_pointer_to_form_id(&self, buf: &[u8], offset: usize) -> Option<u32> {
        let va = u32_be_at(buf, offset)?;
        if va == 0 {
            return None;
        }
        self.follow_pointer_va_to_form_id(va)
    }

    /// As [`follow_pointer_to_form_id`], starting from a VA.
    ///
    /// [`follow_pointer_to_form_id`]: Self::follow_pointer_to_form_id
    pub fn follow_pointer_va_to_form_id(&self, va: u32) -> Option<u32> {
        if !self.is_valid_pointer(va) {
            return None;
        }
        let offset = self.va_to_offset(va)?;
        let form_id = self.read_u32_be(offset + FORM_ID_OFFSET)?;
        plausible_form_id(form_id).then_some(form_id)
    }

    /// Read the 8-byte BSStringT descriptor `{ data_va: u32, length: u16,
    /// capacity: u16 }` at `base_offset + field_offset` and return its
    /// payload. The descriptor is accepted only when length ∈ (0, 256] and
    /// the data pointer lands in module-range static data; payload bytes
    /// must all be printable ASCII.
    pub fn read_bs_string(&self, base_offset: u64, field_offset: u64) -> Option<String> {
        let desc = self.read_bytes(base_offset + field_offset, 8)?;
        self.bs_string_from_descriptor(desc)
    }

    /// As [`read_bs_string`], with the descriptor already in a local buffer.
    ///
    /// [`read_bs_string`]: Self::read_bs_string
    pub fn bs_string_in_buf(&self, buf: &[u8], offset: usize) -> Option<String> {
        let desc = buf.get(offset..offset + 8)?;
        self.bs_string_from_descriptor(desc)
    }

    fn bs_string_from_descriptor(&self, desc: &[u8]) -> Option<String> {
        let data_va = u32_be_at(desc, 0)?;
        let length = u16_be_at(desc, 4)? as usize;
        if length == 0 || length > MAX_BS_STRING_LEN {
            return None;
        }
        if self.classify_pointer(data_va) != PointerClass::Module {
            return None;
        }
        let bytes = self.read_bytes_va(data_va, length)?;
        if bytes.iter().all(|&b| io_utils::is_printable_ascii(b)) {
            Some(String::from_utf8_lossy(bytes).into_owned())
        } else {
            None
        }
    }

    /// Follow a plain `char*` at `va` and read a null-terminated printable
    /// ASCII string bounded at `max_len` bytes (NiFixedString names).
    pub fn read_cstring_va(&self, va: u32, max_len: usize) -> Option<String> {
        self.terminated_va(va, max_len, io_utils::cstring_at)
    }

    /// As [`read_cstring_va`] but tolerating tab/CR/LF -- script source text
    /// is multi-line.
    ///
    /// [`read_cstring_va`]: Self::read_cstring_va
    pub fn read_text_va(&self, va: u32, max_len: usize) -> Option<String> {
        self.terminated_va(va, max_len, io_utils::text_at)
    }

    fn terminated_va(
        &self,
        va: u32,
        max_len: usize,
        read: fn(&[u8], usize, usize) -> Option<String>,
    ) -> Option<String> {
        if !self.is_valid_pointer(va) {
            return None;
        }
        let offset = self.va_to_offset(va)?;
        let avail = self
            .map
            .contiguous_bytes_from_offset(offset)
            .min(max_len + 1);
        let buf = self.read_bytes(offset, avail)?;
        read(buf, 0, max_len + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_map::{MemorySegment, Module};

    /// One heap segment at 0x40000000 → offset 0, one module segment at
    /// 0x82000000 → offset 0x1000, each 0x1000 bytes.
    fn fixture(fill: impl FnOnce(&mut Vec<u8>)) -> (DumpAccessor, MemoryMap) {
        let mut data = vec![0u8; 0x2000];
        fill(&mut data);
        let map = MemoryMap::new(
            vec![
                MemorySegment {
                    virtual_address: 0x4000_0000,
                    size: 0x1000,
                    file_offset: 0,
                },
                MemorySegment {
                    virtual_address: 0x8200_0000,
                    size: 0x1000,
                    file_offset: 0x1000,
                },
            ],
            vec![Module {
                name: "Fallout3.exe".to_string(),
                base_va: 0x8200_0000,
                size: 0x1000,
                timestamp: 0,
            }],
        );
        (DumpAccessor::from_bytes(data), map)
    }

    #[test]
    fn test_scalar_reads_are_big_endian() {
        let (acc, map) = fixture(|d| {
            d[0..4].copy_from_slice(&[0x00, 0x01, 0x02, 0x03]);
            d[4..8].copy_from_slice(&0x42C8_0000u32.to_be_bytes()); // 100.0f32
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        assert_eq!(ctx.read_u32_be(0), Some(0x0001_0203));
        assert_eq!(ctx.read_u16_be(0), Some(0x0001));
        assert_eq!(ctx.read_float_be(4), Some(100.0));
        assert_eq!(ctx.read_u32_be(0x1FFD), None);
    }

    #[test]
    fn test_follow_pointer_to_form_id() {
        let (acc, map) = fixture(|d| {
            // A TESForm at VA 0x40000100 (offset 0x100) with FormID 0xE2790.
            d[0x100 + 12..0x100 + 16].copy_from_slice(&0x000E_2790u32.to_be_bytes());
            // Parent buffer holds a pointer to it at +8.
            d[0x200 + 8..0x200 + 12].copy_from_slice(&0x4000_0100u32.to_be_bytes());
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let parent = ctx.read_bytes(0x200, 16).unwrap();
        assert_eq!(ctx.follow_pointer_to_form_id(parent, 8), Some(0x000E_2790));
        // Null pointer word.
        assert_eq!(ctx.follow_pointer_to_form_id(parent, 0), None);
        // Garbage VA.
        assert_eq!(ctx.follow_pointer_va_to_form_id(0x1234_5678), None);
        // Valid window, uncaptured.
        assert_eq!(ctx.follow_pointer_va_to_form_id(0x7000_0000), None);
    }

    #[test]
    fn test_follow_pointer_rejects_sentinel_form_ids() {
        let (acc, map) = fixture(|d| {
            d[0x100 + 12..0x100 + 16].copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        assert_eq!(ctx.follow_pointer_va_to_form_id(0x4000_0100), None);
    }

    #[test]
    fn test_read_bs_string() {
        let (acc, map) = fixture(|d| {
            // String data in the module segment at VA 0x82000020.
            d[0x1020..0x1028].copy_from_slice(b"RaiderA\0");
            // Descriptor at heap offset 0x300: data_va, len=7, cap=8.
            d[0x300..0x304].copy_from_slice(&0x8200_0020u32.to_be_bytes());
            d[0x304..0x306].copy_from_slice(&7u16.to_be_bytes());
            d[0x306..0x308].copy_from_slice(&8u16.to_be_bytes());
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        assert_eq!(ctx.read_bs_string(0x300, 0), Some("RaiderA".to_string()));
    }

    #[test]
    fn test_read_bs_string_rejects_heap_data_and_bad_length() {
        let (acc, map) = fixture(|d| {
            d[0x40..0x47].copy_from_slice(b"heapstr");
            // Descriptor pointing into the heap window.
            d[0x300..0x304].copy_from_slice(&0x4000_0040u32.to_be_bytes());
            d[0x304..0x306].copy_from_slice(&7u16.to_be_bytes());
            // Second descriptor: module pointer but zero length.
            d[0x310..0x314].copy_from_slice(&0x8200_0020u32.to_be_bytes());
            d[0x314..0x316].copy_from_slice(&0u16.to_be_bytes());
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        assert_eq!(ctx.read_bs_string(0x300, 0), None);
        assert_eq!(ctx.read_bs_string(0x310, 0), None);
    }

    #[test]
    fn test_read_bs_string_rejects_non_printable() {
        let (acc, map) = fixture(|d| {
            d[0x1020..0x1024].copy_from_slice(&[b'a', 0x01, b'c', 0]);
            d[0x300..0x304].copy_from_slice(&0x8200_0020u32.to_be_bytes());
            d[0x304..0x306].copy_from_slice(&3u16.to_be_bytes());
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        assert_eq!(ctx.read_bs_string(0x300, 0), None);
    }

    #[test]
    fn test_is_normal_float() {
        assert!(is_normal_float(0.0));
        assert!(is_normal_float(-50.5));
        assert!(!is_normal_float(f32::NAN));
        assert!(!is_normal_float(f32::INFINITY));
        assert!(!is_normal_float(f32::NEG_INFINITY));
        assert!(!is_normal_float(f32::from_bits(0x0000_0001))); // denormal
    }

    #[test]
    fn test_read_cstring_va() {
        let (acc, map) = fixture(|d| {
            d[0x500..0x50C].copy_from_slice(b"root/mid/lf\0");
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        assert_eq!(
            ctx.read_cstring_va(0x4000_0500, 255),
            Some("root/mid/lf".to_string())
        );
        assert_eq!(ctx.read_cstring_va(0x0000_0500, 255), None);
    }
}
