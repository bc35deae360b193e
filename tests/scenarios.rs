use windy_pmem::mem::{Frame, FrameTable, PageAllocator, Strategy, PAGE_SIZE};

const STRATEGIES: [Strategy; 3] = [Strategy::Tree, Strategy::List, Strategy::Segment];
const BUDDIES: [Strategy; 2] = [Strategy::Tree, Strategy::List];

fn allocator(strategy: Strategy, len: usize) -> Box<dyn PageAllocator> {
    let mut alloc = strategy.build(FrameTable::new(0x80000, len));
    alloc.register_region(Frame::new(0), len);
    alloc
}

/// Number of frames that are actually taken for a request of `count`.
fn rounded(strategy: Strategy, count: usize) -> usize {
    match strategy {
        Strategy::Segment => count,
        _ => count.next_power_of_two(),
    }
}

/// Small xorshift generator, so the workload is the same on every run.
struct Rng(u64);

impl Rng {
    fn next(&mut self, bound: usize) -> usize {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 % bound as u64) as usize
    }
}

#[test]
fn free_count_and_disjoint_blocks() {
    for strategy in STRATEGIES {
        let mut alloc = allocator(strategy, 1000);
        let mut rng = Rng(0x2545_f491_4f6c_dd1d);
        let mut live: Vec<(Frame, usize)> = Vec::new();
        let mut used = 0;

        for _ in 0..2000 {
            if live.is_empty() || rng.next(3) > 0 {
                let count = rng.next(40) + 1;
                if let Some(frame) = alloc.allocate_pages(count) {
                    let size = rounded(strategy, count);
                    let end = frame.index() + size;
                    assert!(end <= 1000, "{:?}: block past the table end", strategy);
                    assert!(
                        live.iter().all(|&(other, n)| {
                            let other_end = other.index() + rounded(strategy, n);
                            end <= other.index() || other_end <= frame.index()
                        }),
                        "{:?}: {} overlaps a live block",
                        strategy,
                        frame
                    );
                    live.push((frame, count));
                    used += size;
                }
            } else {
                let (frame, count) = live.swap_remove(rng.next(live.len()));
                alloc.free_pages(frame, count);
                used -= rounded(strategy, count);
            }

            assert_eq!(alloc.free_page_count(), 1000 - used, "{:?}", strategy);
            assert_eq!(alloc.stats().allocated, used * PAGE_SIZE);
        }

        for (frame, count) in live.drain(..) {
            alloc.free_pages(frame, count);
        }
        assert_eq!(alloc.free_page_count(), 1000);
        // everything merged back, the largest request works again
        let largest = match strategy {
            Strategy::Segment => 1000,
            _ => 512,
        };
        assert!(alloc.allocate_pages(largest).is_some(), "{:?}", strategy);
    }
}

#[test]
fn free_restores_allocation() {
    for strategy in STRATEGIES {
        let mut alloc = allocator(strategy, 64);
        alloc.allocate_pages(3).unwrap();

        let frame = alloc.allocate_pages(5).unwrap();
        alloc.free_pages(frame, 5);
        assert_eq!(alloc.allocate_pages(5), Some(frame), "{:?}", strategy);
    }
}

#[test]
fn buddy_rounds_to_power_of_two() {
    for strategy in BUDDIES {
        let mut alloc = allocator(strategy, 64);
        for (count, expected) in [(1, 1), (3, 4), (5, 8), (16, 16), (17, 32)] {
            let before = alloc.free_page_count();
            let frame = alloc.allocate_pages(count).unwrap();
            assert_eq!(before - alloc.free_page_count(), expected);
            assert_eq!(frame.index() % expected, 0, "{:?}: unaligned block", strategy);
            alloc.free_pages(frame, count);
        }
    }
}

#[test]
fn free_with_rounded_size() {
    for strategy in STRATEGIES {
        let mut alloc = allocator(strategy, 64);
        let counts = [1, 3, 5, 6, 9];
        let frames: Vec<_> = counts
            .iter()
            .map(|&count| alloc.allocate_pages(count).unwrap())
            .collect();
        assert_eq!(alloc.stats().requested, 24 * PAGE_SIZE);

        for (frame, count) in frames.into_iter().zip(counts) {
            alloc.free_pages(frame, rounded(strategy, count));
        }

        let stats = alloc.stats();
        assert_eq!(stats.requested, 0, "{:?}", strategy);
        assert_eq!(stats.allocated, 0, "{:?}", strategy);
        assert_eq!(alloc.free_page_count(), 64);
    }
}

#[test]
fn free_inside_block_panics() {
    for strategy in STRATEGIES {
        let result = std::panic::catch_unwind(|| {
            let mut alloc = allocator(strategy, 16);
            let frame = alloc.allocate_pages(4).unwrap();
            alloc.free_pages(frame.add(1), 1);
        });
        assert!(result.is_err(), "{:?}: freed a frame inside a live block", strategy);
    }
}

#[test]
fn large_region_boundaries() {
    for strategy in BUDDIES {
        let mut alloc = allocator(strategy, 31929);

        let block = alloc.allocate_pages(1 << 14).unwrap();
        assert_eq!(alloc.allocate_pages(1 << 14), None, "{:?}", strategy);
        alloc.free_pages(block, 1 << 14);
        let block = alloc.allocate_pages(1 << 14).unwrap();
        alloc.free_pages(block, 1 << 14);

        let blocks = [(); 3].map(|_| alloc.allocate_pages(1 << 13).unwrap());
        assert_eq!(alloc.allocate_pages(1 << 13), None, "{:?}", strategy);
        for block in blocks {
            alloc.free_pages(block, 1 << 13);
        }
        let block = alloc.allocate_pages(1 << 13).unwrap();
        alloc.free_pages(block, 1 << 13);

        assert_eq!(alloc.free_page_count(), 31929);
    }
}

#[test]
fn singles_keep_largest_block() {
    for strategy in BUDDIES {
        let mut alloc = allocator(strategy, 31929);
        let singles: Vec<_> = (0..31929 - (1 << 14))
            .map(|_| alloc.allocate_pages(1).unwrap())
            .collect();

        let block = alloc.allocate_pages(1 << 14);
        assert!(block.is_some(), "{:?}", strategy);
        assert_eq!(alloc.free_page_count(), 0);

        alloc.free_pages(block.unwrap(), 1 << 14);
        for frame in singles {
            alloc.free_pages(frame, 1);
        }
        assert_eq!(alloc.free_page_count(), 31929);
    }
}

#[test]
fn freed_buddies_merge() {
    for strategy in BUDDIES {
        let mut alloc = allocator(strategy, 8);
        let p: Vec<_> = (0..4).map(|_| alloc.allocate_pages(1).unwrap()).collect();
        assert_eq!(p, [0, 1, 2, 3].map(Frame::new));

        alloc.free_pages(p[1], 1);
        alloc.free_pages(p[2], 1);
        assert_eq!(alloc.allocate_pages(2), Some(p[3].add(1)), "{:?}", strategy);

        alloc.free_pages(p[3], 1);
        assert_eq!(alloc.allocate_pages(2), Some(p[2]), "{:?}", strategy);
    }
}

#[test]
fn boot_self_check() {
    for strategy in STRATEGIES {
        let mut alloc = allocator(strategy, 31929);
        alloc.self_check();
        assert!(alloc.free_page_count() >= 31929 - 1);
    }
}

#[test]
fn reinit_and_register_again() {
    for strategy in STRATEGIES {
        let mut alloc = allocator(strategy, 128);
        alloc.allocate_pages(7).unwrap();

        alloc.init();
        assert_eq!(alloc.free_page_count(), 0);
        assert_eq!(alloc.allocate_pages(1), None, "{:?}", strategy);

        alloc.register_region(Frame::new(0), 64);
        alloc.register_region(Frame::new(64), 64);
        assert_eq!(alloc.free_page_count(), 128);
        assert!(alloc.allocate_pages(128).is_some(), "{:?}", strategy);
    }
}

#[test]
#[should_panic(expected = "reserved")]
fn free_reserved_frame_panics() {
    let mut alloc = Strategy::Segment.build(FrameTable::new(0, 16));
    alloc.register_region(Frame::new(0), 8);
    alloc.free_pages(Frame::new(10), 2);
}
