//! MSVC RTTI walking: vtable VA → C++ class name and inheritance chain.
//!
//! The compiler emits a CompleteObjectLocator pointer one word before each
//! vtable. Following it through the TypeDescriptor and the
//! ClassHierarchyDescriptor recovers the mangled class name and every base
//! class, all without symbols:
//!
//! ```text
//! vtable[-1] → COL (20 B) → TypeDescriptor (8 B + name)
//!                         → ClassHierarchyDescriptor (16 B)
//!                            → BaseClassDescriptor[n] (24 B each)
//! ```
//!
//! All fields are big-endian u32. Any failure anywhere in the chain yields
//! `None` -- never a partial result.
//!
//! The census pass sweeps the heap at 4-byte alignment counting distinct
//! module-range pointer values (vtable frequency), then resolves each
//! candidate seen at least twice, most frequent first.

use crate::context::RuntimeContext;
use crate::heap_scan::map_regions;
use crate::io_utils::{self, u32_be_at};
use crate::memory_map::PointerClass;
use crate::progress::{CancelToken, ProgressCounter};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;

/// Mangled type names longer than this are garbage, not RTTI.
const MAX_MANGLED_NAME: usize = 512;

/// CHD base-class counts outside [1, 32] mark a bogus hierarchy.
const MAX_BASE_CLASSES: u32 = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RttiBaseClass {
    pub class_name: String,
    /// Number of nested base classes contained under this one.
    pub contained_count: u32,
    /// Member displacement of the base subobject, signed.
    pub member_displacement: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RttiResult {
    pub vtable_va: u32,
    pub class_name: String,
    pub mangled_name: String,
    /// Offset of this vtable's subobject within the complete object.
    pub object_offset: u32,
    pub base_classes: Vec<RttiBaseClass>,
    pub has_multiple_inheritance: bool,
    pub has_virtual_inheritance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CensusEntry {
    pub rtti: RttiResult,
    /// Heap words carrying this vtable VA (a proxy for instance count).
    pub instance_count: u64,
    /// True when the base-class list names TESForm or TESObject.
    pub is_tes_form: bool,
}

/// Strip the MSVC `.?AV` (class) / `.?AU` (struct) prefix and everything
/// from `@@` onward. `None` if the prefix is absent.
pub fn demangle(mangled: &str) -> Option<String> {
    let body = mangled
        .strip_prefix(".?AV")
        .or_else(|| mangled.strip_prefix(".?AU"))?;
    let body = body.split("@@").next().unwrap_or(body);
    if body.is_empty() {
        None
    } else {
        Some(body.to_string())
    }
}

pub struct RttiResolver<'a> {
    ctx: &'a RuntimeContext<'a>,
    /// One resolution per unique vtable VA; misses are cached too.
    cache: RefCell<HashMap<u32, Option<RttiResult>>>,
}

impl<'a> RttiResolver<'a> {
    pub fn new(ctx: &'a RuntimeContext<'a>) -> Self {
        Self {
            ctx,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Resolve a candidate vtable VA to its class, or `None` when any link
    /// of the RTTI chain fails validation.
    pub fn resolve(&self, vtable_va: u32) -> Option<RttiResult> {
        if let Some(cached) = self.cache.borrow().get(&vtable_va) {
            return cached.clone();
        }
        let result = self.resolve_uncached(vtable_va);
        self.cache
            .borrow_mut()
            .insert(vtable_va, result.clone());
        result
    }

    fn resolve_uncached(&self, vtable_va: u32) -> Option<RttiResult> {
        let ctx = self.ctx;

        let col_ptr = ctx.read_u32_be_va(vtable_va.checked_sub(4)?)?;
        if ctx.classify_pointer(col_ptr) != PointerClass::Module {
            return None;
        }

        // CompleteObjectLocator: signature, offset, cdOffset, pTypeDescriptor,
        // pClassHierarchyDescriptor.
        let col = ctx.read_bytes_va(col_ptr, 20)?;
        let signature = u32_be_at(col, 0)?;
        if signature != 0 {
            return None;
        }
        let object_offset = u32_be_at(col, 4)?;
        let p_type_descriptor = u32_be_at(col, 12)?;
        let p_chd = u32_be_at(col, 16)?;
        if ctx.classify_pointer(p_type_descriptor) != PointerClass::Module {
            return None;
        }

        let mangled_name = self.read_type_descriptor_name(p_type_descriptor)?;
        let class_name = demangle(&mangled_name)?;

        // ClassHierarchyDescriptor: signature, attributes, numBaseClasses,
        // pBaseClassArray. Attribute bit 0 = multiple inheritance, bit 1 =
        // virtual inheritance.
        let chd = ctx.read_bytes_va(p_chd, 16)?;
        let attributes = u32_be_at(chd, 4)?;
        let num_base_classes = u32_be_at(chd, 8)?;
        let p_base_class_array = u32_be_at(chd, 12)?;
        if num_base_classes == 0 || num_base_classes > MAX_BASE_CLASSES {
            return None;
        }

        let mut base_classes = Vec::with_capacity(num_base_classes as usize);
        for i in 0..num_base_classes {
            let bcd_ptr = ctx.read_u32_be_va(p_base_class_array.wrapping_add(4 * i))?;
            let bcd = ctx.read_bytes_va(bcd_ptr, 12)?;
            let base_td = u32_be_at(bcd, 0)?;
            let contained_count = u32_be_at(bcd, 4)?;
            let member_displacement = u32_be_at(bcd, 8)? as i32;
            let base_mangled = self.read_type_descriptor_name(base_td)?;
            base_classes.push(RttiBaseClass {
                class_name: demangle(&base_mangled)?,
                contained_count,
                member_displacement,
            });
        }

        Some(RttiResult {
            vtable_va,
            class_name,
            mangled_name,
            object_offset,
            base_classes,
            has_multiple_inheritance: attributes & 1 != 0,
            has_virtual_inheritance: attributes & 2 != 0,
        })
    }

    /// TypeDescriptor: vfptr + spare (8 bytes), then the null-terminated
    /// mangled name. The name must carry the `.?AV` / `.?AU` prefix.
    fn read_type_descriptor_name(&self, td_va: u32) -> Option<String> {
        let offset = self.ctx.va_to_offset(td_va)?.checked_add(8)?;
        let avail = self
            .ctx
            .memory_map()
            .contiguous_bytes_from_offset(offset)
            .min(MAX_MANGLED_NAME);
        let buf = self.ctx.read_bytes(offset, avail)?;
        let name = io_utils::cstring_at(buf, 0, MAX_MANGLED_NAME)?;
        if name.starts_with(".?AV") || name.starts_with(".?AU") {
            Some(name)
        } else {
            None
        }
    }

    /// Heap-wide vtable census: count every module-range pointer value at
    /// 4-byte alignment, drop singletons, resolve the rest in descending
    /// frequency order.
    pub fn census(
        &self,
        counter: Option<&ProgressCounter>,
        cancel: Option<&CancelToken>,
    ) -> Vec<CensusEntry> {
        // The closure must not capture `self`: the resolution cache is a
        // RefCell and the sweep fans out across worker threads.
        let ctx = self.ctx;
        let groups = ctx.memory_map().heap_region_groups();
        let per_region: Vec<HashMap<u32, u64>> = map_regions(
            ctx,
            &groups,
            |_, chunk| {
                let mut counts: HashMap<u32, u64> = HashMap::new();
                let mut pos = 0usize;
                while pos + 4 <= chunk.len() {
                    let value = u32::from_be_bytes([
                        chunk[pos],
                        chunk[pos + 1],
                        chunk[pos + 2],
                        chunk[pos + 3],
                    ]);
                    if ctx.classify_pointer(value) == PointerClass::Module {
                        *counts.entry(value).or_insert(0) += 1;
                    }
                    pos += 4;
                }
                counts
            },
            counter,
            cancel,
        );

        let mut totals: HashMap<u32, u64> = HashMap::new();
        for counts in per_region {
            for (va, n) in counts {
                *totals.entry(va).or_insert(0) += n;
            }
        }

        let mut candidates: Vec<(u32, u64)> = totals
            .into_iter()
            .filter(|&(_, count)| count >= 2)
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        candidates
            .into_iter()
            .filter_map(|(va, count)| {
                let rtti = self.resolve(va)?;
                let is_tes_form = rtti
                    .base_classes
                    .iter()
                    .any(|b| b.class_name == "TESForm" || b.class_name == "TESObject");
                Some(CensusEntry {
                    rtti,
                    instance_count: count,
                    is_tes_form,
                })
            })
            .collect()
    }
}
