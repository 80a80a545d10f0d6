//! Slot arena with index-linked lists.
//!
//! Both in-process layers keep their entries in a dense `Vec` of slots and
//! thread doubly linked lists through slot indices instead of pointers.
//! Reclaimed slots go on a free-list and are reused by the next insert.

/// Head/tail of one list threaded through an [`Arena`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct List {
    pub head: Option<usize>,
    pub tail: Option<usize>,
    pub len: usize,
}

impl List {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug)]
pub(crate) struct Node<T> {
    pub value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
enum Slot<T> {
    Occupied(Node<T>),
    Vacant,
}

#[derive(Debug)]
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Arena<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Stores `value` in a free slot (or a new one) and returns its index.
    /// The node is not linked into any list yet.
    pub fn insert(&mut self, value: T) -> usize {
        let node = Node {
            value,
            prev: None,
            next: None,
        };
        self.len += 1;
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Slot::Occupied(node);
                idx
            }
            None => {
                self.slots.push(Slot::Occupied(node));
                self.slots.len() - 1
            }
        }
    }

    /// Frees a slot. The node must already be unlinked.
    pub fn remove(&mut self, idx: usize) -> Option<T> {
        match std::mem::replace(self.slots.get_mut(idx)?, Slot::Vacant) {
            Slot::Occupied(node) => {
                self.len -= 1;
                self.free.push(idx);
                Some(node.value)
            }
            Slot::Vacant => None,
        }
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        match self.slots.get(idx)? {
            Slot::Occupied(node) => Some(&node.value),
            Slot::Vacant => None,
        }
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        match self.slots.get_mut(idx)? {
            Slot::Occupied(node) => Some(&mut node.value),
            Slot::Vacant => None,
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.len = 0;
    }

    fn node(&self, idx: usize) -> &Node<T> {
        match &self.slots[idx] {
            Slot::Occupied(node) => node,
            Slot::Vacant => unreachable!("arena slot {idx} is vacant"),
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<T> {
        match &mut self.slots[idx] {
            Slot::Occupied(node) => node,
            Slot::Vacant => unreachable!("arena slot {idx} is vacant"),
        }
    }

    /// Appends `idx` to the tail of `list`.
    pub fn push_back(&mut self, list: &mut List, idx: usize) {
        let old_tail = list.tail;
        {
            let node = self.node_mut(idx);
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(tail) => self.node_mut(tail).next = Some(idx),
            None => list.head = Some(idx),
        }
        list.tail = Some(idx);
        list.len += 1;
    }

    /// Detaches `idx` from `list`, leaving the slot occupied.
    pub fn unlink(&mut self, list: &mut List, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => list.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => list.tail = prev,
        }
        let node = self.node_mut(idx);
        node.prev = None;
        node.next = None;
        list.len -= 1;
    }

    /// Walks `list` from head to tail.
    pub fn iter_list<'a>(&'a self, list: &List) -> impl Iterator<Item = (usize, &'a T)> + 'a {
        let mut cursor = list.head;
        std::iter::from_fn(move || {
            let idx = cursor?;
            let node = self.node(idx);
            cursor = node.next;
            Some((idx, &node.value))
        })
    }
}
