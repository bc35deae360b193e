//! Buddy allocator that keeps one free list per order.

use super::{order_for_count, PAGE_SIZE};
use crate::mem::{linked_list::LinkedList, AllocStats, Frame, FrameTable, PageAllocator};
use core::cmp;

/// The maximum order for the buddy allocator (inclusive).
///
/// The largest block is `2^MAX_ORDER` frames, calculated using:
///     max_size = 2^MAX_ORDER * PAGE_SIZE
pub const MAX_ORDER: usize = 15;

/// The size of the orders array inside the buddy allocator.
///
/// We add `1` here because this is the size of the array.
pub const ORDER_COUNT: usize = MAX_ORDER + 1;

const NAME: &str = "List Buddy Allocator";

/// The central structure that is responsible for allocating frames
/// using the buddy algorithm.
///
/// Every list holds the head frames of the free blocks of its order,
/// sorted by ascending address. No two blocks of one list are buddies.
pub struct ListBuddyAllocator {
    frames: FrameTable,
    orders: [LinkedList; ORDER_COUNT],
    free: usize,
    stats: AllocStats,
}

impl ListBuddyAllocator {
    /// Create a new allocator for the given frame table, without any free frames.
    pub fn new(frames: FrameTable) -> Self {
        Self {
            frames,
            orders: [LinkedList::new(); ORDER_COUNT],
            free: 0,
            stats: AllocStats::with_name(NAME),
        }
    }

    /// Returns an iterator over the free blocks of the given order.
    pub fn free_blocks(&self, order: usize) -> impl Iterator<Item = Frame> + '_ {
        self.orders[order]
            .iter(self.frames.as_slice())
            .map(Frame::new)
    }

    /// Insert a free block and merge it with its buddies as long as possible.
    fn insert_block(&mut self, mut block: usize, mut order: usize) {
        let frames = self.frames.as_mut_slice();

        while order < MAX_ORDER {
            // this is a trick to find the index of the other buddy,
            // if we have the index of one of the buddies.
            let buddy = block ^ (1 << order);
            match self.orders[order].iter(frames).find(|&idx| idx == buddy) {
                Some(buddy) => {
                    self.orders[order].remove(frames, buddy);
                    frames[buddy].clear_head();
                    block = cmp::min(block, buddy);
                    order += 1;
                }
                None => break,
            }
        }

        frames[block].mark_head(order);
        self.orders[order].insert_sorted(frames, block);
    }
}

impl PageAllocator for ListBuddyAllocator {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&mut self) {
        self.orders = [LinkedList::new(); ORDER_COUNT];
        self.frames.reserve_all();
        self.free = 0;
        self.stats = AllocStats::with_name(NAME);
    }

    fn register_region(&mut self, base: Frame, count: usize) {
        self.frames.release(base, count);
        log::debug!("Registering {} frames starting at {}", count, base);

        // split the range into the largest aligned blocks that fit
        let mut start = base.index();
        let end = start + count;
        while start < end {
            let mut order = cmp::min(start.trailing_zeros() as usize, MAX_ORDER);
            while start + (1 << order) > end {
                order -= 1;
            }

            self.insert_block(start, order);
            start += 1 << order;
        }

        self.free += count;
        self.stats.total += count * PAGE_SIZE;
    }

    fn allocate_pages(&mut self, count: usize) -> Option<Frame> {
        assert!(count > 0, "tried to allocate zero frames");

        let order = order_for_count(count);
        if order > MAX_ORDER {
            return None;
        }

        // find the smallest order that has a block we can split
        let split_order = (order..ORDER_COUNT).find(|&order| !self.orders[order].is_empty())?;

        let frames = self.frames.as_mut_slice();
        for order_to_split in (order + 1..=split_order).rev() {
            let block = self.orders[order_to_split].pop_front(frames)?;
            let target = order_to_split - 1;
            let buddy = block + (1 << target);

            // all orders below `split_order` are empty, so the target list stays sorted
            frames[block].mark_head(target);
            frames[buddy].mark_head(target);
            self.orders[target].push_front(frames, block);
            self.orders[target].insert_after(frames, block, buddy);
        }

        let block = Frame::new(self.orders[order].pop_front(frames)?);
        let size = 1 << order;
        self.frames.prepare_alloc(block, size, count);

        self.free -= size;
        self.stats.record_alloc(count, size);
        Some(block)
    }

    fn free_pages(&mut self, base: Frame, count: usize) {
        assert!(count > 0, "tried to free zero frames");
        let order = order_for_count(count);
        assert!(order <= MAX_ORDER, "tried to free a block of order {}", order);

        let size = 1 << order;
        assert_eq!(
            base.index() % size,
            0,
            "{} is not aligned to a block of {} frames",
            base,
            size
        );

        let requested = self.frames.prepare_free(base, size);
        let allocated = order_for_count(requested);
        assert_eq!(
            allocated, order,
            "tried to free {} with {} frames, but it was allocated with {}",
            base, size, 1 << allocated
        );

        self.insert_block(base.index(), order);
        self.free += size;
        self.stats.record_free(requested, size);
    }

    fn free_page_count(&self) -> usize {
        self.free
    }

    fn self_check(&mut self) {
        super::self_check(self, MAX_ORDER);
    }

    fn frames(&self) -> &FrameTable {
        &self.frames
    }

    fn stats(&self) -> AllocStats {
        self.stats.clone()
    }
}
