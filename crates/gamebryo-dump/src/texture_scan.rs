//! Texture extraction: a single combined heap pass for NiPixelData and
//! NiSourceTexture.
//!
//! NiPixelData (116 bytes):
//!
//! | Offset | Type | Field |
//! |--------|------|-------|
//! | +4     | u32  | ref count |
//! | +12    | u32  | pixel format (≤ 13) |
//! | +80    | ptr  | pixel bytes |
//! | +84    | ptr  | per-mip width array |
//! | +88    | ptr  | per-mip height array |
//! | +92    | ptr  | per-mip offset array (mips + 1 entries; last = total) |
//! | +96    | u32  | mip levels (1-16) |
//! | +100   | u32  | bits per pixel |
//! | +104   | u32  | pixel stride (bytes) |
//! | +108   | u32  | face count (1, or 6 for cubemaps) |
//!
//! NiSourceTexture (72 bytes): ref count at +4, filename NiFixedString at
//! +48, NiPixelData pointer at +60.
//!
//! Validation is format-driven: DXT formats demand power-of-two,
//! block-aligned dims; non-POT is tolerated only for uncompressed single
//! mip, single face data whose stride and bit depth match the format
//! exactly. A texture whose first 256 pixel bytes are all zero sits in an
//! unmapped page and is dropped. Dedup hashes the first 64 pixel bytes
//! mixed with the total length; source textures are joined back by their
//! NiPixelData VA to attach filenames.

use crate::context::RuntimeContext;
use crate::heap_scan::AlignedHeapScanner;
use crate::io_utils::u32_be_at;
use crate::progress::{CancelToken, ProgressCounter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const SOURCE_TEXTURE_STRUCT: usize = 72;

const MAX_REF_COUNT: u32 = 10_000;
const MAX_FORMAT: u32 = 13;
const MAX_MIP_LEVELS: u32 = 16;
const MAX_FACES: u32 = 6;
const MIN_DIM: u32 = 4;
const MAX_DIM: u32 = 4096;
const MAX_PIXEL_BYTES: usize = 64 * 1024 * 1024;
const MAX_FILENAME: usize = 255;
const ZERO_PREFIX_PROBE: usize = 256;

/// Gamebryo pixel formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextureFormat {
    Rgb,
    Rgba,
    Pal,
    PalA,
    Dxt1,
    Dxt3,
    Dxt5,
    Rgb565,
    Bump,
    BumpLuma,
    Luminance8,
    LuminanceAlpha16,
    Argb4,
    OneChannel8,
}

impl TextureFormat {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Rgb,
            1 => Self::Rgba,
            2 => Self::Pal,
            3 => Self::PalA,
            4 => Self::Dxt1,
            5 => Self::Dxt3,
            6 => Self::Dxt5,
            7 => Self::Rgb565,
            8 => Self::Bump,
            9 => Self::BumpLuma,
            10 => Self::Luminance8,
            11 => Self::LuminanceAlpha16,
            12 => Self::Argb4,
            13 => Self::OneChannel8,
            _ => return None,
        })
    }

    pub fn is_compressed(self) -> bool {
        matches!(self, Self::Dxt1 | Self::Dxt3 | Self::Dxt5)
    }

    /// Uncompressed bits per pixel; 0 for block-compressed formats.
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Rgb => 24,
            Self::Rgba => 32,
            Self::Pal | Self::PalA | Self::Luminance8 | Self::OneChannel8 => 8,
            Self::Rgb565 | Self::Bump | Self::BumpLuma | Self::LuminanceAlpha16 | Self::Argb4 => {
                16
            }
            Self::Dxt1 | Self::Dxt3 | Self::Dxt5 => 0,
        }
    }

    /// Bytes for one mip level at the given dims.
    pub fn mip_bytes(self, width: u32, height: u32) -> usize {
        match self {
            Self::Dxt1 => block_count(width) * block_count(height) * 8,
            Self::Dxt3 | Self::Dxt5 => block_count(width) * block_count(height) * 16,
            _ => width as usize * height as usize * (self.bits_per_pixel() as usize / 8),
        }
    }
}

fn block_count(dim: u32) -> usize {
    (dim as usize).div_ceil(4).max(1)
}

fn is_pot(v: u32) -> bool {
    v != 0 && v & (v - 1) == 0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTexture {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub face_count: u32,
    pub format: TextureFormat,
    pub bits_per_pixel: u32,
    pub pixel_data: Vec<u8>,
    pub data_hash: u64,
    pub filename: Option<String>,
    pub source_offset: u64,
}

/// A NiSourceTexture sighting, kept for the filename join.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceTextureRef {
    source_offset: u64,
    pixel_data_va: u32,
    filename_va: u32,
}

enum TextureHit {
    Pixels(Box<ExtractedTexture>),
    Source(SourceTextureRef),
}

/// 64-bit FNV-1a over the first 64 pixel bytes, mixed with the total
/// length so equal prefixes of different sizes stay distinct.
pub fn pixel_hash(pixel_bytes: &[u8], total_len: usize) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ total_len as u64;
    for &b in pixel_bytes.iter().take(64) {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn fast_filter(chunk: &[u8], pos: usize) -> bool {
    match u32_be_at(chunk, pos + 4) {
        Some(rc) => rc > 0 && rc <= MAX_REF_COUNT,
        None => false,
    }
}

fn process_candidate(
    ctx: &RuntimeContext,
    chunk: &[u8],
    pos: usize,
    file_offset: u64,
) -> Option<Vec<TextureHit>> {
    let mut hits = Vec::new();

    // NiSourceTexture: a live NiPixelData reference at +60.
    if let Some(pixel_data_va) = u32_be_at(chunk, pos + 60) {
        if pixel_data_va != 0 && ctx.is_valid_pointer(pixel_data_va) {
            hits.push(TextureHit::Source(SourceTextureRef {
                source_offset: file_offset,
                pixel_data_va,
                filename_va: u32_be_at(chunk, pos + 48).unwrap_or(0),
            }));
        }
    }

    if let Some(texture) = try_pixel_data(ctx, chunk, pos, file_offset) {
        hits.push(TextureHit::Pixels(Box::new(texture)));
    }

    if hits.is_empty() {
        None
    } else {
        Some(hits)
    }
}

fn try_pixel_data(
    ctx: &RuntimeContext,
    chunk: &[u8],
    pos: usize,
    file_offset: u64,
) -> Option<ExtractedTexture> {
    let format = TextureFormat::from_code(u32_be_at(chunk, pos + 12)?)?;
    let mip_levels = u32_be_at(chunk, pos + 96)?;
    if mip_levels == 0 || mip_levels > MAX_MIP_LEVELS {
        return None;
    }
    let face_count = u32_be_at(chunk, pos + 108)?;
    if face_count == 0 || face_count > MAX_FACES {
        return None;
    }
    let pixels_ptr = u32_be_at(chunk, pos + 80)?;
    let width_ptr = u32_be_at(chunk, pos + 84)?;
    let height_ptr = u32_be_at(chunk, pos + 88)?;
    if !ctx.is_valid_pointer(pixels_ptr)
        || !ctx.is_valid_pointer(width_ptr)
        || !ctx.is_valid_pointer(height_ptr)
    {
        return None;
    }

    let width = ctx.read_u32_be_va(width_ptr)?;
    let height = ctx.read_u32_be_va(height_ptr)?;
    if !(MIN_DIM..=MAX_DIM).contains(&width) || !(MIN_DIM..=MAX_DIM).contains(&height) {
        return None;
    }

    let bits_per_pixel = u32_be_at(chunk, pos + 100)?;
    let stride = u32_be_at(chunk, pos + 104)?;
    let pot = is_pot(width) && is_pot(height);

    if format.is_compressed() {
        if !pot || width % 4 != 0 || height % 4 != 0 {
            return None;
        }
    } else if !pot {
        // Non-POT survives only as plain single-surface data whose stride
        // and depth agree with the format.
        if mip_levels != 1 || face_count != 1 {
            return None;
        }
        let expected_bpp = format.bits_per_pixel();
        if bits_per_pixel != expected_bpp || stride != expected_bpp / 8 {
            return None;
        }
    }

    // Expected size walks the mip chain down from the base level.
    let mut expected: usize = 0;
    let mut mip0 = 0usize;
    let (mut w, mut h) = (width, height);
    for level in 0..mip_levels {
        let bytes = format.mip_bytes(w, h);
        if level == 0 {
            mip0 = bytes;
        }
        expected += bytes;
        w = (w / 2).max(1);
        h = (h / 2).max(1);
    }
    expected *= face_count as usize;
    if expected == 0 || expected > MAX_PIXEL_BYTES {
        return None;
    }

    // Cross-check against the offset table's final entry.
    let offsets_ptr = u32_be_at(chunk, pos + 92)?;
    if !ctx.is_valid_pointer(offsets_ptr) {
        return None;
    }
    let declared =
        ctx.read_u32_be_va(offsets_ptr.wrapping_add(mip_levels * 4))? as usize;
    if pot {
        if declared < mip0 || declared > expected * 2 {
            return None;
        }
    } else if declared != expected {
        return None;
    }

    let pixel_data = ctx.read_bytes_va(pixels_ptr, expected)?;
    if pixel_data
        .iter()
        .take(ZERO_PREFIX_PROBE)
        .all(|&b| b == 0)
    {
        return None;
    }

    Some(ExtractedTexture {
        width,
        height,
        mip_levels,
        face_count,
        format,
        bits_per_pixel,
        data_hash: pixel_hash(pixel_data, expected),
        pixel_data: pixel_data.to_vec(),
        filename: None,
        source_offset: file_offset,
    })
}

/// Scan every heap region for textures, deduplicate by pixel hash, and
/// attach filenames from the NiSourceTextures seen in the same pass.
pub fn scan_textures(
    ctx: &RuntimeContext,
    counter: Option<&ProgressCounter>,
    cancel: Option<&CancelToken>,
) -> Vec<ExtractedTexture> {
    let scanner = AlignedHeapScanner::new(SOURCE_TEXTURE_STRUCT);
    let hits: Vec<Vec<TextureHit>> = scanner.scan(
        ctx,
        fast_filter,
        |chunk, pos, file_offset| process_candidate(ctx, chunk, pos, file_offset),
        counter,
        cancel,
    );

    let mut textures: Vec<ExtractedTexture> = Vec::new();
    let mut sources: Vec<SourceTextureRef> = Vec::new();
    for hit in hits.into_iter().flatten() {
        match hit {
            TextureHit::Pixels(t) => textures.push(*t),
            TextureHit::Source(s) => sources.push(s),
        }
    }

    textures.sort_by_key(|t| t.source_offset);
    let mut seen: HashMap<u64, ()> = HashMap::new();
    textures.retain(|t| seen.insert(t.data_hash, ()).is_none());

    // Filename join: match each source texture's NiPixelData VA against
    // the VA the texture block was captured from.
    let by_va: HashMap<u32, usize> = textures
        .iter()
        .enumerate()
        .filter_map(|(i, t)| ctx.offset_to_va(t.source_offset).map(|va| (va, i)))
        .collect();
    for source in sources {
        if let Some(&i) = by_va.get(&source.pixel_data_va) {
            if textures[i].filename.is_none() && source.filename_va != 0 {
                textures[i].filename = ctx.read_cstring_va(source.filename_va, MAX_FILENAME);
            }
        }
    }
    textures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::DumpAccessor;
    use crate::memory_map::{MemoryMap, MemorySegment};

    const HEAP_VA: u32 = 0x4000_0000;

    fn put_u32(d: &mut [u8], off: usize, v: u32) {
        d[off..off + 4].copy_from_slice(&v.to_be_bytes());
    }

    fn fixture(size: usize, fill: impl FnOnce(&mut Vec<u8>)) -> (DumpAccessor, MemoryMap) {
        let mut data = vec![0u8; size];
        fill(&mut data);
        let map = MemoryMap::new(
            vec![MemorySegment {
                virtual_address: HEAP_VA,
                size: size as u32,
                file_offset: 0,
            }],
            vec![],
        );
        (DumpAccessor::from_bytes(data), map)
    }

    /// Lay out a NiPixelData block plus its side arrays and pixel bytes.
    fn build_pixel_data(
        d: &mut Vec<u8>,
        pos: usize,
        format: u32,
        width: u32,
        height: u32,
        mips: u32,
        faces: u32,
        declared_total: u32,
        arrays_at: usize,
        pixels_at: usize,
    ) {
        put_u32(d, pos + 4, 1); // ref count
        put_u32(d, pos + 12, format);
        put_u32(d, pos + 80, HEAP_VA + pixels_at as u32);
        put_u32(d, pos + 84, HEAP_VA + arrays_at as u32); // widths
        put_u32(d, pos + 88, HEAP_VA + arrays_at as u32 + 0x40); // heights
        put_u32(d, pos + 92, HEAP_VA + arrays_at as u32 + 0x80); // offsets
        put_u32(d, pos + 96, mips);
        put_u32(d, pos + 108, faces);

        let (mut w, mut h) = (width, height);
        for m in 0..mips {
            put_u32(d, arrays_at + m as usize * 4, w);
            put_u32(d, arrays_at + 0x40 + m as usize * 4, h);
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }
        put_u32(d, arrays_at + 0x80 + mips as usize * 4, declared_total);
        // Non-zero pixel prefix so the unmapped-page probe passes.
        d[pixels_at] = 0x5A;
        d[pixels_at + 1] = 0xA5;
    }

    #[test]
    fn test_dxt1_pot_accepted() {
        // 128x128 DXT1, 7 mips: 8192+2048+512+128+32+8+8 = 10928 per face.
        let (acc, map) = fixture(0x20000, |d| {
            build_pixel_data(d, 0x100, 4, 128, 128, 7, 1, 10928, 0x800, 0x1000);
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let textures = scan_textures(&ctx, None, None);
        assert_eq!(textures.len(), 1);
        let t = &textures[0];
        assert_eq!(t.format, TextureFormat::Dxt1);
        assert_eq!(t.width, 128);
        assert_eq!(t.mip_levels, 7);
        assert_eq!(t.pixel_data.len(), 10928);
    }

    #[test]
    fn test_dxt1_non_pot_rejected() {
        let (acc, map) = fixture(0x80000, |d| {
            build_pixel_data(d, 0x100, 4, 260, 260, 1, 1, 34060, 0x800, 0x1000);
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        assert!(scan_textures(&ctx, None, None).is_empty());
    }

    #[test]
    fn test_rgba_non_pot_accepted_with_matching_stride() {
        // 260x200 RGBA, single mip, single face: 208000 bytes.
        let (acc, map) = fixture(0x60000, |d| {
            build_pixel_data(d, 0x100, 1, 260, 200, 1, 1, 208_000, 0x800, 0x1000);
            put_u32(d, 0x100 + 100, 32); // bits per pixel
            put_u32(d, 0x100 + 104, 4); // stride
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let textures = scan_textures(&ctx, None, None);
        assert_eq!(textures.len(), 1);
        assert_eq!(textures[0].width, 260);
        assert_eq!(textures[0].height, 200);
    }

    #[test]
    fn test_rgba_non_pot_rejected_on_stride_mismatch() {
        let (acc, map) = fixture(0x60000, |d| {
            build_pixel_data(d, 0x100, 1, 260, 200, 1, 1, 208_000, 0x800, 0x1000);
            put_u32(d, 0x100 + 100, 32);
            put_u32(d, 0x100 + 104, 3); // wrong stride for RGBA
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        assert!(scan_textures(&ctx, None, None).is_empty());
    }

    #[test]
    fn test_zero_prefix_rejected() {
        let (acc, map) = fixture(0x20000, |d| {
            build_pixel_data(d, 0x100, 4, 128, 128, 7, 1, 10928, 0x800, 0x1000);
            d[0x1000] = 0;
            d[0x1001] = 0;
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        assert!(scan_textures(&ctx, None, None).is_empty());
    }

    #[test]
    fn test_filename_enrichment() {
        let (acc, map) = fixture(0x20000, |d| {
            build_pixel_data(d, 0x100, 4, 128, 128, 7, 1, 10928, 0x800, 0x1000);
            // NiSourceTexture at 0x4000 pointing at the pixel block.
            put_u32(d, 0x4000 + 4, 1);
            put_u32(d, 0x4000 + 60, HEAP_VA + 0x100);
            put_u32(d, 0x4000 + 48, HEAP_VA + 0x5000);
            d[0x5000..0x501B].copy_from_slice(b"textures/weapons/rifle.dds\0");
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let textures = scan_textures(&ctx, None, None);
        assert_eq!(textures.len(), 1);
        assert_eq!(
            textures[0].filename.as_deref(),
            Some("textures/weapons/rifle.dds")
        );
    }

    #[test]
    fn test_dedup_by_pixel_hash() {
        let (acc, map) = fixture(0x20000, |d| {
            build_pixel_data(d, 0x100, 4, 128, 128, 7, 1, 10928, 0x800, 0x1000);
            // Second block sharing the same pixel bytes.
            build_pixel_data(d, 0x8000, 4, 128, 128, 7, 1, 10928, 0x8800, 0x1000);
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let textures = scan_textures(&ctx, None, None);
        assert_eq!(textures.len(), 1);
        assert_eq!(textures[0].source_offset, 0x100);
    }
}
