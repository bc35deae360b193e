//! Index based doubly linked list.
//!
//! The nodes of a list live in a slice owned by somebody else (the frame table,
//! a byte arena, ...) and refer to each other by their index inside that slice.
//! This way a single backing array can host any number of lists, and removing
//! a node from the middle of a list is `O(1)`.

/// The list linkage embedded in every node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    prev: Option<usize>,
    next: Option<usize>,
}

impl Link {
    /// A link that is not part of any list.
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
        }
    }

    /// Index of the previous node.
    pub fn prev(&self) -> Option<usize> {
        self.prev
    }

    /// Index of the next node.
    pub fn next(&self) -> Option<usize> {
        self.next
    }
}

/// Types that can be threaded into a [`LinkedList`].
pub trait Linked {
    fn link(&self) -> &Link;

    fn link_mut(&mut self) -> &mut Link;
}

/// A doubly linked list over the nodes of a caller owned slice.
///
/// Every method that touches links takes the backing slice. Passing a
/// different slice than the one the list was built on is a logic error.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkedList {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl LinkedList {
    /// Create a new, empty list.
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Returns whether this list is empty.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Returns the number of nodes inside this list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Index of the first node.
    pub fn front(&self) -> Option<usize> {
        self.head
    }

    /// Index of the last node.
    pub fn back(&self) -> Option<usize> {
        self.tail
    }

    /// Push the node `idx` to the front of the list.
    pub fn push_front<T: Linked>(&mut self, nodes: &mut [T], idx: usize) {
        match self.head {
            Some(head) => self.insert_before(nodes, head, idx),
            None => self.link_first(nodes, idx),
        }
    }

    /// Push the node `idx` to the end of the list.
    pub fn push_back<T: Linked>(&mut self, nodes: &mut [T], idx: usize) {
        match self.tail {
            Some(tail) => self.insert_after(nodes, tail, idx),
            None => self.link_first(nodes, idx),
        }
    }

    /// Insert the node `idx` right after the node `at`, which must be part of this list.
    pub fn insert_after<T: Linked>(&mut self, nodes: &mut [T], at: usize, idx: usize) {
        let next = nodes[at].link().next;
        *nodes[idx].link_mut() = Link {
            prev: Some(at),
            next,
        };
        nodes[at].link_mut().next = Some(idx);

        match next {
            Some(next) => nodes[next].link_mut().prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.len += 1;
    }

    /// Insert the node `idx` right before the node `at`, which must be part of this list.
    pub fn insert_before<T: Linked>(&mut self, nodes: &mut [T], at: usize, idx: usize) {
        let prev = nodes[at].link().prev;
        *nodes[idx].link_mut() = Link {
            prev,
            next: Some(at),
        };
        nodes[at].link_mut().prev = Some(idx);

        match prev {
            Some(prev) => nodes[prev].link_mut().next = Some(idx),
            None => self.head = Some(idx),
        }
        self.len += 1;
    }

    /// Insert the node `idx` so the list stays sorted by ascending index.
    pub fn insert_sorted<T: Linked>(&mut self, nodes: &mut [T], idx: usize) {
        match self.iter(nodes).find(|&other| other > idx) {
            Some(successor) => self.insert_before(nodes, successor, idx),
            None => self.push_back(nodes, idx),
        }
    }

    /// Unlink the node `idx` from this list.
    pub fn remove<T: Linked>(&mut self, nodes: &mut [T], idx: usize) {
        let Link { prev, next } = *nodes[idx].link();

        match prev {
            Some(prev) => nodes[prev].link_mut().next = next,
            None => {
                assert_eq!(self.head, Some(idx), "node {} is not part of this list", idx);
                self.head = next;
            }
        }
        match next {
            Some(next) => nodes[next].link_mut().prev = prev,
            None => self.tail = prev,
        }

        *nodes[idx].link_mut() = Link::default();
        self.len -= 1;
    }

    /// Remove the first node of this list and return its index.
    pub fn pop_front<T: Linked>(&mut self, nodes: &mut [T]) -> Option<usize> {
        let head = self.head?;
        self.remove(nodes, head);
        Some(head)
    }

    /// Returns an iterator over the node indices of this list, front to back.
    pub fn iter<'nodes, T: Linked>(&self, nodes: &'nodes [T]) -> Iter<'nodes, T> {
        Iter {
            nodes,
            head: self.head,
        }
    }

    fn link_first<T: Linked>(&mut self, nodes: &mut [T], idx: usize) {
        *nodes[idx].link_mut() = Link::default();
        self.head = Some(idx);
        self.tail = Some(idx);
        self.len = 1;
    }
}

/// Iterator over the node indices of a [`LinkedList`].
pub struct Iter<'nodes, T> {
    nodes: &'nodes [T],
    head: Option<usize>,
}

impl<T: Linked> Iterator for Iter<'_, T> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.head?;
        self.head = self.nodes[idx].link().next;
        Some(idx)
    }
}
