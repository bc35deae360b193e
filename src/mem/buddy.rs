//! The two buddy allocators and the parts they share.
//!
//! Both allocators hand out blocks of `2^order` frames that are aligned to
//! their size, relative to the first frame of the [`FrameTable`].
//! A request for `n` frames is rounded up to the next power of two.

use super::{Frame, FrameTable, PageAllocator, PAGE_SIZE};
use alloc::vec::Vec;

pub mod list;
pub mod tree;

/// The smallest order whose blocks can hold `count` frames.
pub fn order_for_count(count: usize) -> usize {
    count.next_power_of_two().trailing_zeros() as usize
}

/// Calculates the number of bytes inside a block of the given `order`.
pub fn size_for_order(order: usize) -> usize {
    (1 << order) * PAGE_SIZE
}

/// Number of blocks of `order` that are aligned and completely unreserved.
///
/// On an allocator without any allocations these are exactly the blocks of
/// `order` that can be allocated at the same time.
pub fn aligned_free_blocks(frames: &FrameTable, order: usize) -> usize {
    let size = 1 << order;
    (0..frames.len() / size)
        .filter(|block| {
            frames
                .iter()
                .skip(block * size)
                .take(size)
                .all(|frame| !frame.is_reserved())
        })
        .count()
}

/// Allocations made by the self check, so everything can be returned at the end.
struct Held(Vec<(Frame, usize)>);

impl Held {
    fn take<A: PageAllocator + ?Sized>(&mut self, alloc: &mut A, count: usize) -> Option<Frame> {
        let frame = alloc.allocate_pages(count)?;
        self.0.push((frame, count));
        Some(frame)
    }

    fn must_take<A: PageAllocator + ?Sized>(&mut self, alloc: &mut A, count: usize) -> Frame {
        self.take(alloc, count)
            .unwrap_or_else(|| panic!("{} ran out of memory during the self check", alloc.name()))
    }

    fn release<A: PageAllocator + ?Sized>(&mut self, alloc: &mut A, frame: Frame) {
        let pos = self
            .0
            .iter()
            .position(|&(held, _)| held == frame)
            .unwrap_or_else(|| panic!("{} is not held by the self check", frame));
        let (frame, count) = self.0.swap_remove(pos);
        alloc.free_pages(frame, count);
    }

    fn release_all<A: PageAllocator + ?Sized>(&mut self, alloc: &mut A) {
        while let Some((frame, count)) = self.0.pop() {
            alloc.free_pages(frame, count);
        }
    }
}

/// The boot time check shared by both buddy allocators.
///
/// `max_order` is the largest order the allocator can hand out.
pub(crate) fn self_check<A: PageAllocator + ?Sized>(alloc: &mut A, max_order: usize) {
    let initial = alloc.free_page_count();
    assert!(initial > 0, "{} has no free frames to check", alloc.name());
    assert_eq!(
        initial,
        alloc.frames().unreserved(),
        "the self check must run before any allocation"
    );

    log::info!("Running self check for {} ({} frames)", alloc.name(), initial);

    basic_check(alloc);

    let top = (0..=max_order)
        .rev()
        .find(|&order| aligned_free_blocks(alloc.frames(), order) > 0)
        .unwrap_or(0);
    exhaust_order(alloc, top);
    if top > 0 {
        exhaust_order(alloc, top - 1);
    }

    // every single frame outside of one top block is taken,
    // the remaining top block must still be available in one piece.
    let mut held = Held(Vec::new());
    for _ in 0..initial - (1 << top) {
        assert!(held.take(alloc, 1).is_some(), "ran out of single frames");
    }
    let block = held.take(alloc, 1 << top);
    assert!(block.is_some(), "order {} block was split by single allocations", top);
    assert_eq!(alloc.free_page_count(), 0);
    if let Some(block) = block {
        held.release(alloc, block);
    }

    if top >= 3 {
        merge_check(alloc);
    } else {
        log::warn!("Skipping merge check, largest free block has order {}", top);
    }

    held.release_all(alloc);
    assert_eq!(alloc.free_page_count(), initial);
    log::info!("Self check for {} succeeded", alloc.name());
}

fn basic_check<A: PageAllocator + ?Sized>(alloc: &mut A) {
    let mut held = Held(Vec::new());
    let mut taken = [Frame::new(0); 3];
    for slot in &mut taken {
        match held.take(alloc, 1) {
            Some(frame) => *slot = frame,
            // not enough frames for a meaningful check
            None => return held.release_all(alloc),
        }
    }

    let [p0, p1, p2] = taken;
    assert!(p0 != p1 && p0 != p2 && p1 != p2, "single frames are handed out twice");
    for frame in taken {
        assert!(alloc.frames().contains(frame), "{} is outside of the frame table", frame);
        let record = &alloc.frames()[frame];
        assert!(!record.is_reserved(), "allocated the reserved {}", frame);
        assert_eq!(record.ref_count, 0, "{} has a reference count", frame);
    }

    held.release_all(alloc);
}

/// Allocate every block of `order`, check that no further one exists,
/// and that freeing one makes it available again.
fn exhaust_order<A: PageAllocator + ?Sized>(alloc: &mut A, order: usize) {
    let count = 1 << order;
    let expected = aligned_free_blocks(alloc.frames(), order);
    let mut held = Held(Vec::new());

    for _ in 0..expected {
        let block = held.take(alloc, count);
        let block = block.unwrap_or_else(|| panic!("missing block of order {}", order));
        assert_eq!(block.index() % count, 0, "block of order {} is unaligned", order);
    }
    assert!(
        alloc.allocate_pages(count).is_none(),
        "more than {} blocks of order {}",
        expected,
        order
    );

    if let Some(&(last, _)) = held.0.last() {
        held.release(alloc, last);
        assert_eq!(held.take(alloc, count), Some(last), "freed block of order {} is lost", order);
    }
    held.release_all(alloc);
}

/// Checks that freed frames are merged with their buddy, and only with it.
///
/// Must be called while the only free memory is one block of order 3 or higher.
fn merge_check<A: PageAllocator + ?Sized>(alloc: &mut A) {
    let mut held = Held(Vec::new());

    let p0 = held.must_take(alloc, 1);
    let p1 = held.must_take(alloc, 1);
    let p2 = held.must_take(alloc, 1);
    let p3 = held.must_take(alloc, 1);
    assert_eq!([p1, p2, p3], [p0.add(1), p0.add(2), p0.add(3)]);

    // `p1` and `p2` are neighbours, but not buddies
    held.release(alloc, p1);
    held.release(alloc, p2);
    assert_eq!(held.must_take(alloc, 2), p3.add(1));

    // `p2` and `p3` are buddies
    held.release(alloc, p3);
    assert_eq!(held.must_take(alloc, 2), p2);

    held.release_all(alloc);
}
