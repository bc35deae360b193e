//! Byte arenas, pages that are split into byte granular segments.
//!
//! An arena is bound to one frame the first time it is used and keeps an
//! address ordered list of free segments over the byte offsets of that page.
//! Segment `o` is described by the descriptor at index `o`, so the run
//! algorithms work on byte offsets directly.

use super::{
    linked_list::{Link, Linked, LinkedList},
    run::{self, Run},
    Frame, PAGE_SIZE,
};
use alloc::{vec, vec::Vec};

/// Descriptor of the free segment that starts at its byte offset.
#[derive(Debug, Clone, Default)]
struct Segment {
    link: Link,
    size: usize,
}

impl Linked for Segment {
    fn link(&self) -> &Link {
        &self.link
    }

    fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }
}

impl Run for Segment {
    fn run_len(&self) -> usize {
        self.size
    }

    fn set_run_len(&mut self, len: usize) {
        self.size = len;
    }
}

/// A page that hands out byte segments.
#[derive(Debug, Default)]
pub struct ByteArena {
    page: Option<Frame>,
    segments: Vec<Segment>,
    free_list: LinkedList,
    free: usize,
}

impl ByteArena {
    /// Creates a new, unbound arena.
    pub const fn new() -> Self {
        Self {
            page: None,
            segments: Vec::new(),
            free_list: LinkedList::new(),
            free: 0,
        }
    }

    /// The frame backing this arena, if it was bound already.
    pub fn page(&self) -> Option<Frame> {
        self.page
    }

    /// The number of free bytes inside this arena.
    pub fn free_bytes(&self) -> usize {
        self.free
    }

    /// Bind this arena to `page`, making the whole page available as one segment.
    ///
    /// # Panics
    ///
    /// Panics if the arena is bound already.
    pub fn bind(&mut self, page: Frame) {
        assert!(self.page.is_none(), "arena is already bound to {:?}", self.page);

        self.segments = vec![Segment::default(); PAGE_SIZE];
        self.free_list = LinkedList::new();
        self.segments[0].size = PAGE_SIZE;
        self.free_list.push_back(&mut self.segments, 0);
        self.free = PAGE_SIZE;
        self.page = Some(page);
    }

    /// Allocates `size` bytes and returns their offset inside the page.
    ///
    /// # Panics
    ///
    /// Panics if the arena is not bound or `size` is zero.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        assert!(self.page.is_some(), "arena is not bound to a page");
        assert!(size > 0, "tried to allocate zero bytes");

        let offset = run::first_fit(&mut self.free_list, &mut self.segments, size)?;
        self.free -= size;
        Some(offset)
    }

    /// Return the `size` bytes at `offset` to this arena.
    ///
    /// # Panics
    ///
    /// Panics if the segment is outside of the page or overlaps free bytes.
    pub fn deallocate(&mut self, offset: usize, size: usize) {
        assert!(self.page.is_some(), "arena is not bound to a page");
        assert!(
            size > 0 && offset.checked_add(size).map_or(false, |end| end <= PAGE_SIZE),
            "segment {:#x}..+{:#x} is outside of the page",
            offset,
            size
        );

        run::insert(&mut self.free_list, &mut self.segments, offset, size);
        self.free += size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound() -> ByteArena {
        let mut arena = ByteArena::new();
        arena.bind(Frame::new(7));
        arena
    }

    #[test]
    fn allocations_are_packed() {
        let mut arena = bound();
        assert_eq!(arena.page(), Some(Frame::new(7)));

        assert_eq!(arena.allocate(100), Some(0));
        assert_eq!(arena.allocate(28), Some(100));
        assert_eq!(arena.allocate(1), Some(128));
        assert_eq!(arena.free_bytes(), PAGE_SIZE - 129);
        assert_eq!(arena.allocate(PAGE_SIZE), None);
    }

    #[test]
    fn freed_segments_coalesce() {
        let mut arena = bound();
        let a = arena.allocate(64).unwrap();
        let b = arena.allocate(64).unwrap();
        let c = arena.allocate(64).unwrap();

        arena.deallocate(a, 64);
        arena.deallocate(c, 64);
        // the hole at `a` is too small, first-fit goes to the tail
        assert_eq!(arena.allocate(65), Some(c));
        arena.deallocate(c, 65);

        arena.deallocate(b, 64);
        assert_eq!(arena.free_bytes(), PAGE_SIZE);
        assert_eq!(arena.allocate(PAGE_SIZE), Some(0));
    }

    #[test]
    #[should_panic(expected = "not bound")]
    fn allocate_unbound() {
        ByteArena::new().allocate(8);
    }

    #[test]
    #[should_panic(expected = "overlaps")]
    fn double_free() {
        let mut arena = bound();
        let a = arena.allocate(16).unwrap();
        arena.deallocate(a, 16);
        arena.deallocate(a, 16);
    }

    #[test]
    #[should_panic(expected = "outside of the page")]
    fn free_past_page_end() {
        let mut arena = bound();
        arena.deallocate(PAGE_SIZE - 8, 16);
    }
}
