//! Physical page allocators for the Windy kernel.
//!
//! Three interchangeable strategies manage the same [`FrameTable`](mem::FrameTable):
//!
//! - [`TreeBuddyAllocator`](mem::TreeBuddyAllocator), a buddy system encoded in a
//!   complete binary tree,
//! - [`ListBuddyAllocator`](mem::ListBuddyAllocator), a buddy system with one free
//!   list per order,
//! - [`SegmentAllocator`](mem::SegmentAllocator), a first-fit allocator of exact
//!   page counts that additionally hands out byte segments from a small set of
//!   page-backed arenas.
//!
//! All of them implement [`PageAllocator`](mem::PageAllocator). Exhaustion is
//! reported as `None`, a violated contract (double free, wrong size, ...) panics.
#![deny(rust_2018_idioms, rustdoc::broken_intra_doc_links)]
#![cfg_attr(not(test), no_std)]

#[cfg(not(target_has_atomic = "ptr"))]
compile_error!("windy_pmem can only run on systems that have atomic support");

extern crate alloc;

pub mod logging;
pub mod mem;
pub mod probe;
pub mod unit;
