//! Buddy allocator that is encoded as a complete binary tree inside an array.
//!
//! The region is rounded up to `2^order_max` frames. Node `0` is the root,
//! the children of node `i` are `2i + 1` and `2i + 2`, and the leaves are the
//! last `2^order_max` nodes. Each node stores the order of the largest free
//! block inside its subtree, or `None` if the subtree has no free frame.
//!
//! ```text
//!                 [  2  ]
//!         [  1  ]         [  2  ]
//!     [ 0 ]   [ 1 ]   [ 1 ]   [ 1 ]
//!    [-] [0] [0] [0] [0] [0] [0] [0]       <- frame 0 is allocated
//! ```

use super::{order_for_count, PAGE_SIZE};
use crate::mem::{AllocStats, Frame, FrameTable, PageAllocator};
use alloc::{vec, vec::Vec};

const NAME: &str = "Tree Buddy Allocator";

/// Buddy allocator that finds free blocks by walking a tree of free orders.
pub struct TreeBuddyAllocator {
    frames: FrameTable,
    order_max: usize,
    nodes: Vec<Option<u8>>,
    free: usize,
    stats: AllocStats,
}

impl TreeBuddyAllocator {
    /// Create a new allocator for the given frame table, without any free frames.
    pub fn new(frames: FrameTable) -> Self {
        let order_max = order_for_count(frames.len());
        Self {
            frames,
            order_max,
            nodes: vec![None; (2 << order_max) - 1],
            free: 0,
            stats: AllocStats::with_name(NAME),
        }
    }

    /// The order of the whole tree, the frame table holds at most `2^order_max` frames.
    pub fn order_max(&self) -> usize {
        self.order_max
    }

    /// The order of the largest block that can currently be allocated.
    pub fn largest_free_order(&self) -> Option<usize> {
        self.nodes[0].map(usize::from)
    }

    fn leaf(&self, frame: Frame) -> usize {
        frame.index() + (1 << self.order_max) - 1
    }

    /// Set the node at `index` to a free block of `order`, then walk up
    /// and merge it with its buddies.
    fn restore(&mut self, mut index: usize, mut order: usize) {
        self.nodes[index] = Some(order as u8);

        while index > 0 {
            let parent = (index - 1) / 2;
            let buddy = ((index - 1) ^ 1) + 1;
            let node = self.nodes[index];

            if self.nodes[parent] < node {
                self.nodes[parent] = node;
            } else if node == Some(order as u8) && self.nodes[buddy] == node {
                self.nodes[parent] = Some(order as u8 + 1);
            }

            index = parent;
            order += 1;
        }
    }
}

impl PageAllocator for TreeBuddyAllocator {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&mut self) {
        self.nodes.fill(None);
        self.frames.reserve_all();
        self.free = 0;
        self.stats = AllocStats::with_name(NAME);
    }

    fn register_region(&mut self, base: Frame, count: usize) {
        self.frames.release(base, count);
        log::debug!("Registering {} frames starting at {}", count, base);

        for offset in 0..count {
            let leaf = self.leaf(base.add(offset));
            self.restore(leaf, 0);
        }

        self.free += count;
        self.stats.total += count * PAGE_SIZE;
    }

    fn allocate_pages(&mut self, count: usize) -> Option<Frame> {
        assert!(count > 0, "tried to allocate zero frames");

        let order = order_for_count(count);
        if order > self.order_max {
            return None;
        }

        let wanted = Some(order as u8);
        if self.nodes[0] < wanted {
            return None;
        }

        // walk down to the node that describes a free block of exactly `order`
        let mut index = 0;
        let mut depth = 0;
        while depth < self.order_max {
            let (left, right) = (self.nodes[2 * index + 1], self.nodes[2 * index + 2]);

            index = if self.nodes[index] == wanted {
                if left == wanted {
                    2 * index + 1
                } else if right == wanted {
                    2 * index + 2
                } else {
                    // both children are merged into this node
                    break;
                }
            } else if right >= wanted && (right < left || left < wanted) {
                // prefer the smaller of both blocks, to keep large ones intact
                2 * index + 2
            } else {
                2 * index + 1
            };
            depth += 1;
        }

        self.nodes[index] = None;
        let base = Frame::new((index + 1 - (1 << depth)) << (self.order_max - depth));

        let mut node = index;
        while node > 0 {
            node = (node - 1) / 2;
            self.nodes[node] = self.nodes[2 * node + 1].max(self.nodes[2 * node + 2]);
        }

        let size = 1 << order;
        self.frames.prepare_alloc(base, size, count);
        self.free -= size;
        self.stats.record_alloc(count, size);
        Some(base)
    }

    fn free_pages(&mut self, base: Frame, count: usize) {
        assert!(count > 0, "tried to free zero frames");
        let order = order_for_count(count);
        let size = 1 << order;
        let requested = self.frames.prepare_free(base, size);

        // the allocated block is the first node above the leaf without free space
        let mut index = self.leaf(base);
        let mut level = 0;
        while self.nodes[index].is_some() {
            assert!(index != 0, "tried to free {}, which is not allocated", base);
            index = (index - 1) / 2;
            level += 1;
        }

        assert_eq!(
            level, order,
            "tried to free {} with {} frames, but it was allocated with {}",
            base, size, 1 << level
        );

        self.restore(index, level);
        self.free += size;
        self.stats.record_free(requested, size);
    }

    fn free_page_count(&self) -> usize {
        self.free
    }

    fn self_check(&mut self) {
        let order_max = self.order_max;
        super::self_check(self, order_max);
    }

    fn frames(&self) -> &FrameTable {
        &self.frames
    }

    fn stats(&self) -> AllocStats {
        self.stats.clone()
    }
}
