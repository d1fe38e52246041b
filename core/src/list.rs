//! # Intrusive Lists
//!
//! Doubly linked lists whose link fields live inside the nodes themselves.
//!
//! Nodes are named by copyable ids rather than pointers. A [`List`] only
//! stores its head, tail and length; every other link is reached through
//! a [`Links`] implementation over the node storage. One node can sit on
//! several lists at once by carrying several [`Link`] fields (the timer rows
//! do this), and linking never allocates.

/// Link fields embedded in a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link<I> {
    prev: Option<I>,
    next: Option<I>,
    linked: bool,
}

impl<I> Link<I> {
    /// An unlinked node
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
            linked: false,
        }
    }

    /// Is the node currently on a list?
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

impl<I> Default for Link<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// Access to the [`Link`] of a node, given its id
pub trait Links<I> {
    /// Shared access to the link of `id`
    fn link(&self, id: I) -> &Link<I>;

    /// Exclusive access to the link of `id`
    fn link_mut(&mut self, id: I) -> &mut Link<I>;
}

/// List head
#[derive(Debug, Clone)]
pub struct List<I> {
    head: Option<I>,
    tail: Option<I>,
    len: usize,
}

impl<I: Copy + Eq> List<I> {
    /// Create an empty list
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Is the list empty?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Number of linked nodes
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// First node
    #[inline]
    pub fn front(&self) -> Option<I> {
        self.head
    }

    /// Last node
    #[inline]
    pub fn back(&self) -> Option<I> {
        self.tail
    }

    /// Node after `id`
    #[inline]
    pub fn next<L: Links<I> + ?Sized>(&self, nodes: &L, id: I) -> Option<I> {
        nodes.link(id).next
    }

    /// Iterate from head to tail
    pub fn iter<'a, L: Links<I> + ?Sized>(&self, nodes: &'a L) -> Iter<'a, I, L> {
        Iter {
            nodes,
            cursor: self.head,
        }
    }

    /// Append `id` at the tail
    pub fn push_back<L: Links<I> + ?Sized>(&mut self, nodes: &mut L, id: I) {
        match self.tail {
            Some(tail) => self.insert_after(nodes, tail, id),
            None => self.link_only(nodes, id),
        }
    }

    /// Prepend `id` at the head
    pub fn push_front<L: Links<I> + ?Sized>(&mut self, nodes: &mut L, id: I) {
        match self.head {
            Some(head) => self.insert_before(nodes, head, id),
            None => self.link_only(nodes, id),
        }
    }

    /// Link `id` right after `anchor`, which must be on this list
    pub fn insert_after<L: Links<I> + ?Sized>(&mut self, nodes: &mut L, anchor: I, id: I) {
        debug_assert!(!nodes.link(id).linked, "node already linked");
        let next = nodes.link(anchor).next;
        *nodes.link_mut(id) = Link {
            prev: Some(anchor),
            next,
            linked: true,
        };
        nodes.link_mut(anchor).next = Some(id);
        match next {
            Some(next) => nodes.link_mut(next).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.len += 1;
    }

    /// Link `id` right before `anchor`, which must be on this list
    pub fn insert_before<L: Links<I> + ?Sized>(&mut self, nodes: &mut L, anchor: I, id: I) {
        debug_assert!(!nodes.link(id).linked, "node already linked");
        let prev = nodes.link(anchor).prev;
        *nodes.link_mut(id) = Link {
            prev,
            next: Some(anchor),
            linked: true,
        };
        nodes.link_mut(anchor).prev = Some(id);
        match prev {
            Some(prev) => nodes.link_mut(prev).next = Some(id),
            None => self.head = Some(id),
        }
        self.len += 1;
    }

    /// Unlink `id`, which must be on this list
    pub fn remove<L: Links<I> + ?Sized>(&mut self, nodes: &mut L, id: I) {
        let Link { prev, next, linked } = *nodes.link(id);
        debug_assert!(linked, "node not linked");
        match prev {
            Some(prev) => nodes.link_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => nodes.link_mut(next).prev = prev,
            None => self.tail = prev,
        }
        *nodes.link_mut(id) = Link::new();
        self.len -= 1;
    }

    /// Unlink and return the head
    pub fn pop_front<L: Links<I> + ?Sized>(&mut self, nodes: &mut L) -> Option<I> {
        let head = self.head?;
        self.remove(nodes, head);
        Some(head)
    }

    fn link_only<L: Links<I> + ?Sized>(&mut self, nodes: &mut L, id: I) {
        debug_assert!(!nodes.link(id).linked, "node already linked");
        *nodes.link_mut(id) = Link {
            prev: None,
            next: None,
            linked: true,
        };
        self.head = Some(id);
        self.tail = Some(id);
        self.len = 1;
    }
}

impl<I: Copy + Eq> Default for List<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the ids of a [`List`]
pub struct Iter<'a, I, L: ?Sized> {
    nodes: &'a L,
    cursor: Option<I>,
}

impl<I: Copy, L: Links<I> + ?Sized> Iterator for Iter<'_, I, L> {
    type Item = I;

    fn next(&mut self) -> Option<I> {
        let id = self.cursor?;
        self.cursor = self.nodes.link(id).next;
        Some(id)
    }
}
