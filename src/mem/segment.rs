//! First-fit allocator over an address ordered list of free runs,
//! with a set of [`ByteArena`]s on top for allocations smaller than a page.

use super::{
    arena::ByteArena,
    linked_list::LinkedList,
    run::{self, Run},
    AllocStats, Frame, FrameTable, PageAllocator, PAGE_SIZE,
};
use core::array;

/// The maximum number of pages that are used for byte allocations.
pub const ARENA_COUNT: usize = 10;

const NAME: &str = "Segment Allocator";

/// A range of bytes inside a page, returned by
/// [`SegmentAllocator::allocate_bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSegment {
    frame: Frame,
    offset: usize,
}

impl ByteSegment {
    /// The frame that contains this segment.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// The offset of the first byte inside the frame.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Allocator that hands out exactly the requested number of frames,
/// taken from the first free run that is large enough.
pub struct SegmentAllocator {
    frames: FrameTable,
    free_list: LinkedList,
    free: usize,
    arenas: [ByteArena; ARENA_COUNT],
    stats: AllocStats,
}

impl SegmentAllocator {
    /// Create a new allocator for the given frame table, without any free frames.
    pub fn new(frames: FrameTable) -> Self {
        Self {
            frames,
            free_list: LinkedList::new(),
            free: 0,
            arenas: array::from_fn(|_| ByteArena::new()),
            stats: AllocStats::with_name(NAME),
        }
    }

    /// Returns an iterator over all free runs, as `(start, length)` pairs.
    pub fn free_runs(&self) -> impl Iterator<Item = (Frame, usize)> + '_ {
        let frames = self.frames.as_slice();
        self.free_list
            .iter(frames)
            .map(move |idx| (Frame::new(idx), frames[idx].run_len()))
    }

    /// The byte arenas, in the order they are used.
    pub fn arenas(&self) -> &[ByteArena] {
        &self.arenas
    }

    /// Allocate `size` bytes from the first byte arena that can hold them.
    ///
    /// Arenas are bound to a page the first time they are needed.
    /// Returns `None` if `size` is larger than a page, or all arenas are
    /// full and no further arena can be bound.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn allocate_bytes(&mut self, size: usize) -> Option<ByteSegment> {
        assert!(size > 0, "tried to allocate zero bytes");
        if size > PAGE_SIZE {
            return None;
        }

        for index in 0..ARENA_COUNT {
            let frame = match self.arenas[index].page() {
                Some(frame) => frame,
                None => {
                    let frame = self.allocate_pages(1)?;
                    log::debug!("Binding byte arena {} to {}", index, frame);
                    self.arenas[index].bind(frame);
                    frame
                }
            };

            if let Some(offset) = self.arenas[index].allocate(size) {
                return Some(ByteSegment { frame, offset });
            }
        }

        None
    }

    /// Return the `size` bytes of `segment` to their arena.
    ///
    /// # Panics
    ///
    /// Panics if no arena is bound to the frame of `segment`,
    /// or the bytes overlap bytes that are already free.
    pub fn free_bytes(&mut self, segment: ByteSegment, size: usize) {
        let arena = self
            .arenas
            .iter_mut()
            .find(|arena| arena.page() == Some(segment.frame))
            .unwrap_or_else(|| panic!("{} does not belong to a byte arena", segment.frame));
        arena.deallocate(segment.offset, size);
    }

    fn check_first_fit(&mut self) {
        let (start, len) = match self.free_runs().next() {
            Some(run) => run,
            None => return,
        };

        if len < 3 {
            log::warn!("Skipping coalescing check, the first free run is too short");
            return;
        }

        let p0 = self.allocate_pages(1);
        let p1 = self.allocate_pages(1);
        let p2 = self.allocate_pages(1);
        assert_eq!(
            [p0, p1, p2],
            [Some(start), Some(start.add(1)), Some(start.add(2))],
            "first-fit allocations are not consecutive"
        );

        // the middle frame merges with both of its neighbours
        self.free_pages(start, 1);
        self.free_pages(start.add(2), 1);
        self.free_pages(start.add(1), 1);
        assert_eq!(self.free_runs().next(), Some((start, len)));
    }

    fn check_exact_sizes(&mut self) {
        let before = self.free;
        if let Some(base) = self.allocate_pages(3) {
            assert_eq!(self.free, before - 3, "allocation was rounded");
            self.free_pages(base, 3);
        }

        if let Some(largest) = self.free_runs().map(|(_, len)| len).max() {
            let first = self.free_runs().find(|&(_, len)| len == largest).map(|(frame, _)| frame);
            assert_eq!(self.allocate_pages(largest + 1), None);

            let block = self.allocate_pages(largest);
            assert_eq!(block, first, "first-fit did not pick the first large enough run");
            if let Some(block) = block {
                self.free_pages(block, largest);
            }
        }
        assert_eq!(self.free, before);
    }

    fn check_arena(&mut self) {
        let a = self.allocate_bytes(100);
        let a = a.unwrap_or_else(|| panic!("no byte arena available"));
        let b = self.allocate_bytes(PAGE_SIZE - 100);
        assert_eq!(
            b,
            Some(ByteSegment {
                frame: a.frame,
                offset: a.offset + 100
            }),
            "byte allocations are not packed"
        );

        self.free_bytes(a, 100);
        if let Some(b) = b {
            self.free_bytes(b, PAGE_SIZE - 100);
        }

        // both segments merged back into the whole page
        let page = self.allocate_bytes(PAGE_SIZE);
        assert_eq!(page, Some(ByteSegment { frame: a.frame, offset: 0 }));
        if let Some(page) = page {
            self.free_bytes(page, PAGE_SIZE);
        }
    }
}

impl PageAllocator for SegmentAllocator {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&mut self) {
        self.free_list = LinkedList::new();
        self.frames.reserve_all();
        self.free = 0;
        self.arenas = array::from_fn(|_| ByteArena::new());
        self.stats = AllocStats::with_name(NAME);
    }

    fn register_region(&mut self, base: Frame, count: usize) {
        self.frames.release(base, count);
        log::debug!("Registering {} frames starting at {}", count, base);

        run::insert(&mut self.free_list, self.frames.as_mut_slice(), base.index(), count);
        self.free += count;
        self.stats.total += count * PAGE_SIZE;
    }

    fn allocate_pages(&mut self, count: usize) -> Option<Frame> {
        assert!(count > 0, "tried to allocate zero frames");
        if count > self.free {
            return None;
        }

        let base = run::first_fit(&mut self.free_list, self.frames.as_mut_slice(), count)?;
        let base = Frame::new(base);
        self.frames.prepare_alloc(base, count, count);

        self.free -= count;
        self.stats.record_alloc(count, count);
        Some(base)
    }

    fn free_pages(&mut self, base: Frame, count: usize) {
        let range = base.index()..base.index().saturating_add(count);
        if let Some(page) = self
            .arenas
            .iter()
            .filter_map(ByteArena::page)
            .find(|page| range.contains(&page.index()))
        {
            panic!("tried to free {}, which is bound to a byte arena", page);
        }

        let allocated = self.frames.prepare_free(base, count);
        assert_eq!(
            allocated, count,
            "tried to free {} with {} frames, but it was allocated with {}",
            base, count, allocated
        );
        run::insert(&mut self.free_list, self.frames.as_mut_slice(), base.index(), count);

        self.free += count;
        self.stats.record_free(count, count);
    }

    fn free_page_count(&self) -> usize {
        self.free
    }

    fn self_check(&mut self) {
        let bound = self.arenas.iter().filter(|arena| arena.page().is_some()).count();
        let initial = self.free;
        assert!(initial > 0, "{} has no free frames to check", NAME);
        assert_eq!(
            initial + bound,
            self.frames.unreserved(),
            "the self check must run before any allocation"
        );
        assert!(
            self.arenas.iter().all(|arena| arena.page().is_none() || arena.free_bytes() == PAGE_SIZE),
            "the self check must run before any byte allocation"
        );

        log::info!("Running self check for {} ({} frames)", NAME, initial);

        self.check_first_fit();
        self.check_exact_sizes();
        self.check_arena();

        let newly_bound = self.arenas.iter().filter(|arena| arena.page().is_some()).count() - bound;
        assert_eq!(self.free, initial - newly_bound);
        log::info!("Self check for {} succeeded", NAME);
    }

    fn frames(&self) -> &FrameTable {
        &self.frames
    }

    fn stats(&self) -> AllocStats {
        self.stats.clone()
    }
}
