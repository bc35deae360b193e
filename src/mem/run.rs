//! First-fit allocation over an address ordered list of free runs.
//!
//! A run is a contiguous stretch of free units (frames or bytes) that is
//! described by the node at its first unit. The segment allocator uses these
//! functions at page granularity, every byte arena uses them over its page.

use super::linked_list::{Linked, LinkedList};

/// A node that can describe the free run starting at it.
pub trait Run: Linked {
    /// Length of the run starting at this node, `0` if none starts here.
    fn run_len(&self) -> usize;

    /// Set the length of the run starting at this node. `0` clears it.
    fn set_run_len(&mut self, len: usize);
}

/// Take `count` units from the first run that is large enough.
///
/// The run is shrunk from the front, or removed if it fits exactly.
/// Returns the index of the first unit taken.
pub fn first_fit<T: Run>(list: &mut LinkedList, nodes: &mut [T], count: usize) -> Option<usize> {
    let start = list.iter(nodes).find(|&idx| nodes[idx].run_len() >= count)?;
    let len = nodes[start].run_len();

    if len > count {
        let rest = start + count;
        nodes[rest].set_run_len(len - count);
        list.insert_after(nodes, start, rest);
    }

    list.remove(nodes, start);
    nodes[start].set_run_len(0);
    Some(start)
}

/// Insert the run `start..start + count` and merge it with the directly
/// adjacent runs before and after it.
///
/// # Panics
///
/// Panics if the new run overlaps a run that is already free.
pub fn insert<T: Run>(list: &mut LinkedList, nodes: &mut [T], start: usize, count: usize) {
    assert!(count > 0, "tried to insert an empty run");

    let next = list.iter(nodes).find(|&idx| idx > start);
    let prev = match next {
        Some(next) => nodes[next].link().prev(),
        None => list.back(),
    };

    if let Some(prev) = prev {
        assert!(
            prev + nodes[prev].run_len() <= start,
            "run {}..{} overlaps the free run starting at {}",
            start,
            start + count,
            prev
        );
    }
    if let Some(next) = next {
        assert!(
            start + count <= next,
            "run {}..{} overlaps the free run starting at {}",
            start,
            start + count,
            next
        );
    }

    nodes[start].set_run_len(count);
    match next {
        Some(next) => list.insert_before(nodes, next, start),
        None => list.push_back(nodes, start),
    }

    let mut head = start;
    if let Some(prev) = prev {
        let prev_len = nodes[prev].run_len();
        if prev + prev_len == start {
            nodes[prev].set_run_len(prev_len + count);
            nodes[start].set_run_len(0);
            list.remove(nodes, start);
            head = prev;
        }
    }

    if let Some(next) = next {
        let head_len = nodes[head].run_len();
        if head + head_len == next {
            let next_len = nodes[next].run_len();
            nodes[head].set_run_len(head_len + next_len);
            nodes[next].set_run_len(0);
            list.remove(nodes, next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::linked_list::Link;

    #[derive(Default, Clone)]
    struct Unit {
        link: Link,
        len: usize,
    }

    impl Linked for Unit {
        fn link(&self) -> &Link {
            &self.link
        }

        fn link_mut(&mut self) -> &mut Link {
            &mut self.link
        }
    }

    impl Run for Unit {
        fn run_len(&self) -> usize {
            self.len
        }

        fn set_run_len(&mut self, len: usize) {
            self.len = len;
        }
    }

    fn runs(list: &LinkedList, nodes: &[Unit]) -> Vec<(usize, usize)> {
        list.iter(nodes).map(|idx| (idx, nodes[idx].len)).collect()
    }

    #[test]
    fn first_fit_shrinks_from_front() {
        let mut nodes = vec![Unit::default(); 32];
        let mut list = LinkedList::new();
        insert(&mut list, &mut nodes, 0, 2);
        insert(&mut list, &mut nodes, 8, 10);

        assert_eq!(first_fit(&mut list, &mut nodes, 3), Some(8));
        assert_eq!(runs(&list, &nodes), [(0, 2), (11, 7)]);
        assert_eq!(first_fit(&mut list, &mut nodes, 2), Some(0));
        assert_eq!(runs(&list, &nodes), [(11, 7)]);
        assert_eq!(first_fit(&mut list, &mut nodes, 8), None);
        assert_eq!(first_fit(&mut list, &mut nodes, 7), Some(11));
        assert!(list.is_empty());
    }

    #[test]
    fn insert_merges_neighbours() {
        let mut nodes = vec![Unit::default(); 32];
        let mut list = LinkedList::new();
        insert(&mut list, &mut nodes, 4, 2);
        insert(&mut list, &mut nodes, 10, 2);
        insert(&mut list, &mut nodes, 20, 1);
        assert_eq!(runs(&list, &nodes), [(4, 2), (10, 2), (20, 1)]);

        // touches only the predecessor
        insert(&mut list, &mut nodes, 6, 1);
        assert_eq!(runs(&list, &nodes), [(4, 3), (10, 2), (20, 1)]);

        // touches only the successor
        insert(&mut list, &mut nodes, 18, 2);
        assert_eq!(runs(&list, &nodes), [(4, 3), (10, 2), (18, 3)]);

        // closes the gap on both sides
        insert(&mut list, &mut nodes, 7, 3);
        assert_eq!(runs(&list, &nodes), [(4, 8), (18, 3)]);
        assert_eq!(nodes[7].len, 0);
        assert_eq!(nodes[10].len, 0);
    }

    #[test]
    #[should_panic(expected = "overlaps")]
    fn insert_overlapping_run() {
        let mut nodes = vec![Unit::default(); 16];
        let mut list = LinkedList::new();
        insert(&mut list, &mut nodes, 2, 6);
        insert(&mut list, &mut nodes, 5, 1);
    }

    #[test]
    #[should_panic(expected = "overlaps")]
    fn insert_into_successor() {
        let mut nodes = vec![Unit::default(); 16];
        let mut list = LinkedList::new();
        insert(&mut list, &mut nodes, 8, 2);
        insert(&mut list, &mut nodes, 6, 3);
    }
}
