//! Physical memory allocation.
//!
//! Every allocator inside this module implements [`PageAllocator`] and owns the
//! [`FrameTable`] it manages. Which allocator is used by the kernel is decided
//! at runtime using a [`Strategy`].

use crate::unit::{self, KIB};
use alloc::boxed::Box;
use core::{fmt, str::FromStr};
use displaydoc_lite::displaydoc;
use spin::{Mutex, MutexGuard};

pub mod arena;
pub mod buddy;
pub mod frame;
pub mod linked_list;
pub mod run;
pub mod segment;

pub use buddy::{list::ListBuddyAllocator, tree::TreeBuddyAllocator};
pub use frame::{Frame, FrameFlags, FrameTable, PageFrame};
pub use segment::{ByteSegment, SegmentAllocator};

/// The size of a single page in memory.
///
/// This is also the size of an order-0 block inside the buddy allocators.
pub const PAGE_SIZE: usize = 4 * KIB;

/// Result for every operation that can fail without violating an allocator invariant.
pub type Result<T, E = Error> = core::result::Result<T, E>;

displaydoc! {
    /// Any error that can happen while selecting an allocator.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        /// unknown allocation strategy. expected `tree`, `list` or `segment`.
        UnknownStrategy,
    }
}

/// Statistics for a memory allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocStats {
    /// The name of the allocator that collected these stats.
    pub name: &'static str,
    /// The number of bytes that were requested by the callers.
    pub requested: usize,
    /// The number of bytes that were actually allocated.
    ///
    /// This differs from `requested` for the buddy allocators,
    /// which round every request up to a power of two.
    pub allocated: usize,
    /// The total number of bytes that this allocator has available for allocation.
    pub total: usize,
}

impl AllocStats {
    /// Create a new [`AllocStats`] instance for the given allocator name.
    pub const fn with_name(name: &'static str) -> Self {
        Self {
            name,
            requested: 0,
            allocated: 0,
            total: 0,
        }
    }

    pub(crate) fn record_alloc(&mut self, requested: usize, allocated: usize) {
        self.requested += requested * PAGE_SIZE;
        self.allocated += allocated * PAGE_SIZE;
    }

    pub(crate) fn record_free(&mut self, requested: usize, allocated: usize) {
        self.requested -= requested * PAGE_SIZE;
        self.allocated -= allocated * PAGE_SIZE;
    }
}

impl fmt::Display for AllocStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f, "\nRequested bytes: {}", unit::bytes(self.requested))?;
        writeln!(f, "Allocated bytes: {}", unit::bytes(self.allocated))?;
        writeln!(f, "Total bytes:     {}", unit::bytes(self.total))?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f)?;
        Ok(())
    }
}

/// The operations every physical page allocator provides.
///
/// Running out of memory is reported by returning `None`. Violating the
/// contract (freeing a frame twice, freeing with the wrong size, registering
/// a frame twice, ...) is a bug in the caller and panics.
pub trait PageAllocator: Send {
    /// The name of this allocator, e.g. for boot messages.
    fn name(&self) -> &'static str;

    /// Reset this allocator.
    ///
    /// Every frame goes back to the reserved state and all free structures are
    /// emptied, so the allocator is unusable until a region is registered again.
    fn init(&mut self);

    /// Make the `count` reserved frames starting at `base` available for allocation.
    ///
    /// # Panics
    ///
    /// Panics if any frame of the range is not reserved or outside the frame table.
    fn register_region(&mut self, base: Frame, count: usize);

    /// Allocate a block of at least `count` contiguous frames.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    fn allocate_pages(&mut self, count: usize) -> Option<Frame>;

    /// Return the block of `count` frames starting at `base`.
    ///
    /// `count` must be the same value that was passed to
    /// [`allocate_pages`](Self::allocate_pages).
    fn free_pages(&mut self, base: Frame, count: usize);

    /// The number of frames that can currently be allocated.
    fn free_page_count(&self) -> usize;

    /// Run the boot time sanity check, panicking on the first failed assertion.
    ///
    /// Must run on an allocator where nothing is allocated.
    /// Every frame is free again once this returns.
    fn self_check(&mut self);

    /// The frame table managed by this allocator.
    fn frames(&self) -> &FrameTable;

    /// Return the statistics for this allocator.
    fn stats(&self) -> AllocStats;
}

/// The available allocation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Buddy allocator encoded as a complete binary tree, see [`TreeBuddyAllocator`].
    Tree,
    /// Buddy allocator with one free list per order, see [`ListBuddyAllocator`].
    List,
    /// First-fit allocator with byte arenas, see [`SegmentAllocator`].
    Segment,
}

impl Strategy {
    /// Create an allocator of this strategy that manages `frames`.
    pub fn build(self, frames: FrameTable) -> Box<dyn PageAllocator> {
        match self {
            Strategy::Tree => Box::new(TreeBuddyAllocator::new(frames)),
            Strategy::List => Box::new(ListBuddyAllocator::new(frames)),
            Strategy::Segment => Box::new(SegmentAllocator::new(frames)),
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tree" | "buddy" => Ok(Strategy::Tree),
            "list" | "linkbuddy" => Ok(Strategy::List),
            "segment" | "slub" => Ok(Strategy::Segment),
            _ => Err(Error::UnknownStrategy),
        }
    }
}

/// A page allocator behind a spinlock, used as the single global instance of a kernel.
pub struct LockedAllocator<A>(Mutex<A>);

impl<A: PageAllocator> LockedAllocator<A> {
    /// Wrap the given allocator.
    pub const fn new(alloc: A) -> Self {
        Self(Mutex::new(alloc))
    }

    /// Lock the allocator to perform multiple operations at once.
    pub fn lock(&self) -> MutexGuard<'_, A> {
        self.0.lock()
    }

    /// Allocate `count` contiguous frames.
    pub fn allocate_pages(&self, count: usize) -> Option<Frame> {
        self.0.lock().allocate_pages(count)
    }

    /// Free the block of `count` frames at `base`.
    pub fn free_pages(&self, base: Frame, count: usize) {
        self.0.lock().free_pages(base, count)
    }

    /// The number of frames that can currently be allocated.
    pub fn free_page_count(&self) -> usize {
        self.0.lock().free_page_count()
    }

    /// Return the statistics for the wrapped allocator.
    pub fn stats(&self) -> AllocStats {
        self.0.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FrameTable {
        FrameTable::new(0x80200, 64)
    }

    #[test]
    fn strategy_from_str() {
        assert_eq!("tree".parse::<Strategy>(), Ok(Strategy::Tree));
        assert_eq!("linkbuddy".parse::<Strategy>(), Ok(Strategy::List));
        assert_eq!("segment".parse::<Strategy>(), Ok(Strategy::Segment));
        assert_eq!("slab".parse::<Strategy>(), Err(Error::UnknownStrategy));
    }

    #[test]
    fn every_strategy_passes_self_check() {
        for strategy in [Strategy::Tree, Strategy::List, Strategy::Segment] {
            let mut alloc = strategy.build(table());
            alloc.register_region(Frame::new(0), 64);
            assert_eq!(alloc.free_page_count(), 64, "{}", alloc.name());
            alloc.self_check();
            assert_eq!(alloc.free_page_count(), alloc.frames().unreserved() - arena_pages(strategy));
        }
    }

    fn arena_pages(strategy: Strategy) -> usize {
        // the segment self check binds one byte arena for good
        match strategy {
            Strategy::Segment => 1,
            _ => 0,
        }
    }

    #[test]
    fn stats_track_rounding() {
        let mut alloc = Strategy::List.build(table());
        alloc.register_region(Frame::new(0), 64);
        assert_eq!(alloc.stats().total, 64 * PAGE_SIZE);

        let frame = alloc.allocate_pages(3).unwrap();
        let stats = alloc.stats();
        assert_eq!(stats.requested, 3 * PAGE_SIZE);
        assert_eq!(stats.allocated, 4 * PAGE_SIZE);

        alloc.free_pages(frame, 3);
        assert_eq!(alloc.stats().allocated, 0);
    }

    #[test]
    fn stats_display() {
        let mut stats = AllocStats::with_name("Test");
        stats.total = 8 * KIB;
        let text = stats.to_string();
        assert!(text.starts_with("Test\n~~~~\n"));
        assert!(text.contains("Total bytes:     8.00 KiB"));
    }

    #[test]
    fn locked_allocator() {
        let mut alloc = SegmentAllocator::new(table());
        alloc.register_region(Frame::new(8), 8);
        let locked = LockedAllocator::new(alloc);

        let frame = locked.allocate_pages(5).unwrap();
        assert_eq!(frame, Frame::new(8));
        assert_eq!(locked.free_page_count(), 3);
        locked.free_pages(frame, 5);
        assert_eq!(locked.lock().free_page_count(), 8);
    }
}
