//! The frame table: one [`PageFrame`] record per physical page.

use super::{
    linked_list::{Link, Linked},
    run::Run,
    PAGE_SIZE,
};
use alloc::{vec, vec::Vec};
use bitflags::bitflags;
use core::{fmt, ops::Index, slice};

bitflags! {
    /// State bits of a [`PageFrame`].
    pub struct FrameFlags: u8 {
        /// The frame is not managed by any allocator.
        const RESERVED = 1 << 0;
        /// The frame is the head of a tracked free block and
        /// [`PageFrame::property`] is valid.
        const PROPERTY = 1 << 1;
        /// The frame is the head of a block that is handed out to a caller and
        /// [`PageFrame::property`] holds the number of frames requested for it.
        const ALLOCATED = 1 << 2;
    }
}

/// Handle to a frame, the index of its record inside the [`FrameTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Frame(usize);

impl Frame {
    /// Create a handle for the frame at `index`.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The index of this frame inside the frame table.
    pub const fn index(self) -> usize {
        self.0
    }

    /// The frame `count` frames after this one.
    pub const fn add(self, count: usize) -> Self {
        Self(self.0 + count)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame #{}", self.0)
    }
}

/// The record describing a single physical page.
#[derive(Debug, Clone)]
pub struct PageFrame {
    /// The state of this frame.
    pub flags: FrameFlags,
    /// Reference count maintained by the users of the page.
    /// It is reset whenever the frame is allocated or freed.
    pub ref_count: usize,
    /// Meaning depends on the strategy: the order of a free buddy block or the
    /// length of a free run while [`FrameFlags::PROPERTY`] is set.
    /// The requested number of frames while [`FrameFlags::ALLOCATED`] is set.
    pub property: usize,
    link: Link,
}

impl PageFrame {
    const fn reserved() -> Self {
        Self {
            flags: FrameFlags::RESERVED,
            ref_count: 0,
            property: 0,
            link: Link::new(),
        }
    }

    /// Whether this frame is not handed to any allocator.
    pub fn is_reserved(&self) -> bool {
        self.flags.contains(FrameFlags::RESERVED)
    }

    /// Whether this frame is the head of a tracked free block.
    pub fn is_free_head(&self) -> bool {
        self.flags.contains(FrameFlags::PROPERTY)
    }

    /// Whether this frame is the head of a block that is handed out to a caller.
    pub fn is_allocated_head(&self) -> bool {
        self.flags.contains(FrameFlags::ALLOCATED)
    }

    /// Mark this frame as the head of a free block described by `property`.
    pub(crate) fn mark_head(&mut self, property: usize) {
        self.property = property;
        self.flags.insert(FrameFlags::PROPERTY);
    }

    /// This frame no longer starts a free block.
    pub(crate) fn clear_head(&mut self) {
        self.property = 0;
        self.flags.remove(FrameFlags::PROPERTY);
    }
}

impl Linked for PageFrame {
    fn link(&self) -> &Link {
        &self.link
    }

    fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }
}

impl Run for PageFrame {
    fn run_len(&self) -> usize {
        if self.is_free_head() {
            self.property
        } else {
            0
        }
    }

    fn set_run_len(&mut self, len: usize) {
        if len == 0 {
            self.clear_head();
        } else {
            self.mark_head(len);
        }
    }
}

/// The flat array of [`PageFrame`]s an allocator manages.
///
/// Frame `0` of the table describes the physical page number `first_pfn`.
/// A fresh table has every frame reserved.
#[derive(Debug, Clone)]
pub struct FrameTable {
    frames: Vec<PageFrame>,
    first_pfn: usize,
}

impl FrameTable {
    /// Create a table of `len` reserved frames, starting at physical page `first_pfn`.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero.
    pub fn new(first_pfn: usize, len: usize) -> Self {
        assert!(len > 0, "a frame table needs at least one frame");
        Self {
            frames: vec![PageFrame::reserved(); len],
            first_pfn,
        }
    }

    /// The number of frames inside this table.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// A frame table is never empty, this only exists for completeness.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The physical page number of the first frame.
    pub fn first_pfn(&self) -> usize {
        self.first_pfn
    }

    /// Whether `frame` has a record inside this table.
    pub fn contains(&self, frame: Frame) -> bool {
        frame.index() < self.frames.len()
    }

    /// The physical page number of `frame`.
    pub fn pfn(&self, frame: Frame) -> usize {
        self.first_pfn + frame.index()
    }

    /// The physical address of the first byte of `frame`.
    pub fn phys_addr(&self, frame: Frame) -> usize {
        self.pfn(frame) * PAGE_SIZE
    }

    /// The frame that contains the physical address `addr`, if it is part of this table.
    pub fn frame_of_addr(&self, addr: usize) -> Option<Frame> {
        let index = (addr / PAGE_SIZE).checked_sub(self.first_pfn)?;
        let frame = Frame::new(index);
        self.contains(frame).then(|| frame)
    }

    /// Returns an iterator over all records of this table.
    pub fn iter(&self) -> slice::Iter<'_, PageFrame> {
        self.frames.iter()
    }

    /// Number of frames that are handed to an allocator.
    pub fn unreserved(&self) -> usize {
        self.frames.iter().filter(|frame| !frame.is_reserved()).count()
    }

    pub(crate) fn as_slice(&self) -> &[PageFrame] {
        &self.frames
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [PageFrame] {
        &mut self.frames
    }

    /// Put every frame back into the reserved state.
    pub(crate) fn reserve_all(&mut self) {
        self.frames.fill(PageFrame::reserved());
    }

    /// Hand `count` reserved frames starting at `base` over to an allocator.
    pub(crate) fn release(&mut self, base: Frame, count: usize) {
        self.assert_range(base, count);
        for (offset, frame) in self.frames[base.index()..][..count].iter_mut().enumerate() {
            assert!(
                frame.is_reserved(),
                "{} is registered twice",
                base.add(offset)
            );
            frame.flags = FrameFlags::empty();
            frame.property = 0;
            frame.ref_count = 0;
        }
    }

    /// Reset the records of a block of `size` frames that is handed out to a caller,
    /// and remember that `requested` frames were asked for.
    pub(crate) fn prepare_alloc(&mut self, base: Frame, size: usize, requested: usize) {
        for frame in &mut self.frames[base.index()..][..size] {
            frame.clear_head();
            frame.ref_count = 0;
        }

        let head = &mut self.frames[base.index()];
        head.property = requested;
        head.flags.insert(FrameFlags::ALLOCATED);
    }

    /// Validate and reset the records of a block that comes back from a caller.
    ///
    /// Returns the number of frames that were requested when the block was allocated.
    ///
    /// # Panics
    ///
    /// Panics if any frame of the block is reserved, starts a free block or starts
    /// another allocated block, or if `base` is not the head of an allocated block.
    pub(crate) fn prepare_free(&mut self, base: Frame, count: usize) -> usize {
        self.assert_range(base, count);
        for (offset, frame) in self.frames[base.index()..][..count].iter_mut().enumerate() {
            assert!(
                !frame.is_reserved(),
                "tried to free the reserved {}",
                base.add(offset)
            );
            assert!(
                !frame.is_free_head(),
                "tried to free {}, which is already free",
                base.add(offset)
            );
            assert!(
                offset == 0 || !frame.is_allocated_head(),
                "tried to free {} frames at {}, which overlaps the allocated {}",
                count,
                base,
                base.add(offset)
            );
            frame.ref_count = 0;
        }

        let head = &mut self.frames[base.index()];
        assert!(
            head.is_allocated_head(),
            "tried to free {}, which is not allocated",
            base
        );
        head.flags.remove(FrameFlags::ALLOCATED);
        let requested = head.property;
        head.property = 0;
        requested
    }

    /// # Panics
    ///
    /// Panics if `base..base + count` is empty or not inside this table.
    pub(crate) fn assert_range(&self, base: Frame, count: usize) {
        assert!(count > 0, "a block must contain at least one frame");
        assert!(
            base.index()
                .checked_add(count)
                .map_or(false, |end| end <= self.frames.len()),
            "{}..+{} is outside of the frame table ({} frames)",
            base,
            count,
            self.frames.len()
        );
    }
}

impl Index<Frame> for FrameTable {
    type Output = PageFrame;

    fn index(&self, frame: Frame) -> &Self::Output {
        &self.frames[frame.index()]
    }
}
