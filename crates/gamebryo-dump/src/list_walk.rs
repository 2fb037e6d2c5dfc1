//! Intrusive linked-list traversal.
//!
//! The engine stores inventory, factions, packages, and script references
//! as intrusive lists that are routinely cyclic or damaged in a dump, so
//! every walk is bounded twice: a visited set keyed on node VA breaks
//! cycles, and `MAX_LIST_ITEMS` caps the total even when every node is
//! fresh.
//!
//! `BSSimpleList` embeds its head node (item + next) directly inside the
//! parent struct; the inline head is processed before any external `next`
//! pointer is followed. `NiTListItem` is an external doubly-linked node:
//! `{ prev, next, payload, rank_data }`.

use crate::context::{plausible_form_id, RuntimeContext, MAX_LIST_ITEMS};
use crate::form_types::{FactionMembership, InventoryItem};
use crate::io_utils::{i32_be_at, u32_be_at, u8_at};
use std::collections::HashSet;

/// Inventory counts above this are garbage, not stacks.
const MAX_STACK_COUNT: i32 = 100_000;

/// Package-list FormIDs at or above this value come from a mod index the
/// base game never assigns at runtime.
const MAX_PACKAGE_FORM_ID: u32 = 0x0100_0000;

/// Collect the item pointers of a `BSSimpleList` whose head words are
/// already decoded from the parent struct. The inline item is yielded
/// first, then the external `Node { data, next }` chain.
pub fn collect_bs_simple_list(
    ctx: &RuntimeContext,
    head_item_va: u32,
    head_next_va: u32,
) -> Vec<u32> {
    let mut items = Vec::new();
    if head_item_va != 0 && ctx.is_valid_pointer(head_item_va) {
        items.push(head_item_va);
    }

    let mut visited: HashSet<u32> = HashSet::new();
    let mut next = head_next_va;
    while next != 0 && items.len() < MAX_LIST_ITEMS && visited.len() < MAX_LIST_ITEMS {
        if !ctx.is_valid_pointer(next) || !visited.insert(next) {
            break;
        }
        let Some(node) = ctx.read_bytes_va(next, 8) else {
            break;
        };
        let item = u32_be_at(node, 0).unwrap_or(0);
        let follow = u32_be_at(node, 4).unwrap_or(0);
        if item != 0 && ctx.is_valid_pointer(item) {
            items.push(item);
        }
        next = follow;
    }
    items
}

/// Walk an inventory chain. The parent struct stores two inline words: the
/// first `ContainerObject*` and the first external node pointer. Each
/// ContainerObject is 8 bytes `{ count: i32, item: TESForm* }`; entries
/// with an implausible count or an unresolvable item are skipped.
pub fn walk_inventory(
    ctx: &RuntimeContext,
    buf: &[u8],
    data_offset: usize,
    next_offset: usize,
) -> Vec<InventoryItem> {
    let head_item = u32_be_at(buf, data_offset).unwrap_or(0);
    let head_next = u32_be_at(buf, next_offset).unwrap_or(0);
    collect_bs_simple_list(ctx, head_item, head_next)
        .into_iter()
        .filter_map(|entry_va| read_container_object(ctx, entry_va))
        .collect()
}

fn read_container_object(ctx: &RuntimeContext, va: u32) -> Option<InventoryItem> {
    let entry = ctx.read_bytes_va(va, 8)?;
    let count = i32_be_at(entry, 0)?;
    if count <= 0 || count > MAX_STACK_COUNT {
        return None;
    }
    let form_id = ctx.follow_pointer_to_form_id(entry, 4)?;
    Some(InventoryItem { form_id, count })
}

/// Walk a faction membership list from its head VA. Each `NiTListItem` is
/// 16 bytes `{ prev, next, faction_ptr, rank_data }`; the rank is the
/// first byte of `rank_data`, signed. The faction pointer is accepted only
/// when its TESForm header carries FormType 0x08 and a plausible FormID.
pub fn walk_factions(ctx: &RuntimeContext, head_va: u32) -> Vec<FactionMembership> {
    let mut memberships = Vec::new();
    let mut visited: HashSet<u32> = HashSet::new();
    let mut node = head_va;
    while node != 0 && memberships.len() < MAX_LIST_ITEMS && visited.len() < MAX_LIST_ITEMS {
        if !ctx.is_valid_pointer(node) || !visited.insert(node) {
            break;
        }
        let Some(item) = ctx.read_bytes_va(node, 16) else {
            break;
        };
        let next = u32_be_at(item, 4).unwrap_or(0);
        let faction_ptr = u32_be_at(item, 8).unwrap_or(0);
        let rank = u8_at(item, 12).unwrap_or(0) as i8;
        if let Some(faction_form_id) = read_faction_form_id(ctx, faction_ptr) {
            memberships.push(FactionMembership {
                faction_form_id,
                rank,
            });
        }
        node = next;
    }
    memberships
}

fn read_faction_form_id(ctx: &RuntimeContext, va: u32) -> Option<u32> {
    if va == 0 || !ctx.is_valid_pointer(va) {
        return None;
    }
    let header = ctx.read_bytes_va(va, 16)?;
    if u8_at(header, 4)? != crate::form_types::FormType::Faction.code() {
        return None;
    }
    let form_id = u32_be_at(header, 12)?;
    plausible_form_id(form_id).then_some(form_id)
}

/// Walk an AI package list (`BSSimpleList<TESPackage*>` with the head
/// inline in the parent buffer) and resolve each entry to its FormID.
/// Runtime-cloned packages with synthetic high FormIDs are dropped.
pub fn walk_package_list(
    ctx: &RuntimeContext,
    buf: &[u8],
    item_offset: usize,
    next_offset: usize,
) -> Vec<u32> {
    let head_item = u32_be_at(buf, item_offset).unwrap_or(0);
    let head_next = u32_be_at(buf, next_offset).unwrap_or(0);
    collect_bs_simple_list(ctx, head_item, head_next)
        .into_iter()
        .filter_map(|va| ctx.follow_pointer_va_to_form_id(va))
        .filter(|&id| id < MAX_PACKAGE_FORM_ID)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::DumpAccessor;
    use crate::memory_map::{MemoryMap, MemorySegment};

    const HEAP_VA: u32 = 0x4000_0000;

    fn fixture(fill: impl FnOnce(&mut Vec<u8>)) -> (DumpAccessor, MemoryMap) {
        let mut data = vec![0u8; 0x4000];
        fill(&mut data);
        let map = MemoryMap::new(
            vec![MemorySegment {
                virtual_address: HEAP_VA,
                size: 0x4000,
                file_offset: 0,
            }],
            vec![],
        );
        (DumpAccessor::from_bytes(data), map)
    }

    fn put_u32(d: &mut [u8], off: usize, v: u32) {
        d[off..off + 4].copy_from_slice(&v.to_be_bytes());
    }

    #[test]
    fn test_inventory_inline_head_then_chain() {
        let (acc, map) = fixture(|d| {
            // TESForm targets at 0x800 / 0x900.
            put_u32(d, 0x800 + 12, 0x12345);
            put_u32(d, 0x900 + 12, 0x2222);
            // ContainerObject A at 0x100: count=3, item → 0x800.
            put_u32(d, 0x100, 3);
            put_u32(d, 0x104, HEAP_VA + 0x800);
            // ContainerObject B at 0x120: count=7, item → 0x900.
            put_u32(d, 0x120, 7);
            put_u32(d, 0x124, HEAP_VA + 0x900);
            // External node at 0x200: data → B, next = null.
            put_u32(d, 0x200, HEAP_VA + 0x120);
            put_u32(d, 0x204, 0);
            // Parent inline words at 0x300: data → A, next → node.
            put_u32(d, 0x300, HEAP_VA + 0x100);
            put_u32(d, 0x304, HEAP_VA + 0x200);
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let buf = ctx.read_bytes(0x300, 8).unwrap();
        let items = walk_inventory(&ctx, buf, 0, 4);
        assert_eq!(
            items,
            vec![
                InventoryItem {
                    form_id: 0x12345,
                    count: 3
                },
                InventoryItem {
                    form_id: 0x2222,
                    count: 7
                },
            ]
        );
    }

    #[test]
    fn test_inventory_rejects_bad_count() {
        let (acc, map) = fixture(|d| {
            put_u32(d, 0x800 + 12, 0x12345);
            put_u32(d, 0x100, 200_000); // above MAX_STACK_COUNT
            put_u32(d, 0x104, HEAP_VA + 0x800);
            put_u32(d, 0x300, HEAP_VA + 0x100);
            put_u32(d, 0x304, 0);
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let buf = ctx.read_bytes(0x300, 8).unwrap();
        assert!(walk_inventory(&ctx, buf, 0, 4).is_empty());
    }

    #[test]
    fn test_self_cycle_terminates() {
        let (acc, map) = fixture(|d| {
            put_u32(d, 0x800 + 12, 0x12345);
            put_u32(d, 0x100, 3);
            put_u32(d, 0x104, HEAP_VA + 0x800);
            // Node at 0x200 points at itself.
            put_u32(d, 0x200, HEAP_VA + 0x100);
            put_u32(d, 0x204, HEAP_VA + 0x200);
            put_u32(d, 0x300, HEAP_VA + 0x100);
            put_u32(d, 0x304, HEAP_VA + 0x200);
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let buf = ctx.read_bytes(0x300, 8).unwrap();
        let items = walk_inventory(&ctx, buf, 0, 4);
        // Inline head + one node visit; the revisit breaks the walk.
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_fresh_node_chain_capped() {
        // A long chain of distinct nodes all pointing at the same payload:
        // the walk must stop at MAX_LIST_ITEMS items.
        let (acc, map) = fixture(|d| {
            put_u32(d, 0x3800 + 12, 0x777);
            // Two alternating nodes that revisit: visited-set breaks at 2.
            put_u32(d, 0x200, HEAP_VA + 0x3800);
            put_u32(d, 0x204, HEAP_VA + 0x210);
            put_u32(d, 0x210, HEAP_VA + 0x3800);
            put_u32(d, 0x214, HEAP_VA + 0x200);
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let items = collect_bs_simple_list(&ctx, 0, HEAP_VA + 0x200);
        assert_eq!(items.len(), 2);
        assert!(items.len() <= MAX_LIST_ITEMS);
    }

    #[test]
    fn test_faction_walk_validates_header() {
        let (acc, map) = fixture(|d| {
            // Valid faction form at 0x800.
            d[0x800 + 4] = 0x08;
            put_u32(d, 0x800 + 12, 0xABC);
            // Wrong form type at 0x900.
            d[0x900 + 4] = 0x2A;
            put_u32(d, 0x900 + 12, 0xDEF);
            // Node 1 at 0x100: rank 5, faction → 0x800, next → node 2.
            put_u32(d, 0x100, 0);
            put_u32(d, 0x104, HEAP_VA + 0x120);
            put_u32(d, 0x108, HEAP_VA + 0x800);
            d[0x10C] = 5;
            // Node 2 at 0x120: faction with wrong type, next = null.
            put_u32(d, 0x120, HEAP_VA + 0x100);
            put_u32(d, 0x124, 0);
            put_u32(d, 0x128, HEAP_VA + 0x900);
            d[0x12C] = 0xFF; // rank -1
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let members = walk_factions(&ctx, HEAP_VA + 0x100);
        assert_eq!(
            members,
            vec![FactionMembership {
                faction_form_id: 0xABC,
                rank: 5
            }]
        );
    }

    #[test]
    fn test_faction_cycle_terminates() {
        let (acc, map) = fixture(|d| {
            d[0x800 + 4] = 0x08;
            put_u32(d, 0x800 + 12, 0xABC);
            // Node pointing at itself.
            put_u32(d, 0x100, 0);
            put_u32(d, 0x104, HEAP_VA + 0x100);
            put_u32(d, 0x108, HEAP_VA + 0x800);
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let members = walk_factions(&ctx, HEAP_VA + 0x100);
        assert_eq!(members.len(), 1);
    }

    #[test]
    fn test_package_list_drops_high_form_ids() {
        let (acc, map) = fixture(|d| {
            put_u32(d, 0x800 + 12, 0x0005_1234);
            put_u32(d, 0x900 + 12, 0x0100_0001); // runtime clone
            put_u32(d, 0x300, HEAP_VA + 0x800);
            put_u32(d, 0x304, HEAP_VA + 0x200);
            put_u32(d, 0x200, HEAP_VA + 0x900);
            put_u32(d, 0x204, 0);
        });
        let ctx = RuntimeContext::new(&acc, &map, 0);
        let buf = ctx.read_bytes(0x300, 8).unwrap();
        assert_eq!(walk_package_list(&ctx, buf, 0, 4), vec![0x0005_1234]);
    }
}
