//! Boot time detection of the memory that can be handed to a page allocator.
//!
//! Physical memory is laid out like this:
//!
//! ```text
//! memory_start                                              end
//! |  kernel image  |  frame table  |       usable frames       |
//!                  ^ kernel_end
//! ```
//!
//! where `end` is the end of physical memory, clamped to the highest address
//! the kernel can reach.

use crate::{
    mem::{Frame, FrameTable, PageAllocator, PageFrame, PAGE_SIZE},
    unit,
};
use core::{cmp, mem, ops::Range};
use displaydoc_lite::displaydoc;

/// Result for every probing operation.
pub type Result<T, E = Error> = core::result::Result<T, E>;

displaydoc! {
    /// Errors that can happen while probing the memory layout.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        /// the memory layout is inverted, or the kernel lies outside of physical memory.
        InvalidLayout,
        /// no memory is left after the kernel image and the frame table.
        EmptyRegion,
        /// the usable memory is not covered by the frame table of the allocator.
        OutsideFrameTable,
    }
}

/// The physical memory layout, as reported by the firmware and linker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Physical address of the first byte of memory.
    pub memory_start: usize,
    /// Physical address one past the last byte of memory.
    pub memory_end: usize,
    /// Highest physical address the kernel can reach.
    pub max_phys_addr: usize,
    /// Physical address one past the end of the kernel image.
    pub kernel_end: usize,
}

impl MemoryLayout {
    /// The end of the memory that is managed.
    pub fn end(&self) -> usize {
        cmp::min(self.memory_end, self.max_phys_addr)
    }

    /// Number of frames between the start of memory and [`end`](Self::end).
    pub fn frame_count(&self) -> usize {
        (self.end() / PAGE_SIZE).saturating_sub(self.memory_start / PAGE_SIZE)
    }

    fn validate(&self) -> Result<()> {
        let valid = self.memory_start < self.end()
            && self.memory_start <= self.kernel_end
            && self.kernel_end <= self.end()
            && self.frame_count() > 0;

        if valid {
            Ok(())
        } else {
            Err(Error::InvalidLayout)
        }
    }

    /// The page aligned range of physical addresses that can be used for allocation.
    pub fn usable_range(&self) -> Result<Range<usize>> {
        self.validate()?;

        let table_size = self.frame_count() * mem::size_of::<PageFrame>();
        let start = align_up(self.kernel_end, PAGE_SIZE)
            .and_then(|table| table.checked_add(table_size))
            .and_then(|table_end| align_up(table_end, PAGE_SIZE))
            .ok_or(Error::EmptyRegion)?;
        let end = align_down(self.end(), PAGE_SIZE);

        if start < end {
            Ok(start..end)
        } else {
            Err(Error::EmptyRegion)
        }
    }
}

impl FrameTable {
    /// Create a frame table that covers all the memory of `layout`.
    pub fn for_layout(layout: &MemoryLayout) -> Result<Self> {
        layout.validate()?;
        Ok(FrameTable::new(
            layout.memory_start / PAGE_SIZE,
            layout.frame_count(),
        ))
    }
}

fn align_up(addr: usize, align: usize) -> Option<usize> {
    Some(addr.checked_add(align - 1)? & !(align - 1))
}

fn align_down(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}

/// Register the usable memory of `layout` with the given allocator.
///
/// Returns the number of frames that were made available.
pub fn init<A: PageAllocator + ?Sized>(alloc: &mut A, layout: &MemoryLayout) -> Result<usize> {
    let Range { start, end } = layout.usable_range()?;
    let count = (end - start) / PAGE_SIZE;

    let frames = alloc.frames();
    let base = frames
        .frame_of_addr(start)
        .ok_or(Error::OutsideFrameTable)?;
    if !frames.contains(base.add(count - 1)) {
        return Err(Error::OutsideFrameTable);
    }

    log::debug!(
        "Making region {:#X}..{:#X} available for allocation",
        start,
        end
    );
    alloc.register_region(base, count);

    log::info!(
        "Made {} available for physical memory allocation using the {}",
        unit::bytes(count * PAGE_SIZE),
        alloc.name(),
    );
    Ok(count)
}

/// The frame that contains the physical address `addr`, if `alloc` manages it.
pub fn frame_of_addr<A: PageAllocator + ?Sized>(alloc: &A, addr: usize) -> Option<Frame> {
    alloc.frames().frame_of_addr(addr)
}
