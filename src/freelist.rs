//! The free-list protocol shared by both backends.
//!
//! Free slots form a singly linked stack threaded through the arena: each
//! free slot's first word links to the next free slot. `pop` hands out the
//! top slot, `push` puts a slot back on top. A slot is never on the stack and
//! in a client's hands at the same time.

use alloc::vec;

use crate::arena::{Arena, Link};

/// A stack of free slot indices over an [`Arena`].
pub(crate) trait FreeList {
    /// The arena whose slots this list links together.
    fn arena(&self) -> &Arena;

    /// Remove the top slot and return its index, or `None` if every slot is in
    /// use.
    fn pop(&self) -> Option<usize>;

    /// Put slot `index` back on top of the stack.
    ///
    /// # Safety
    ///
    /// `index` must have come from `pop` on this list, and must not have been
    /// pushed since.
    unsafe fn push(&self, index: usize);

    /// Link to the top slot. The `&mut` receiver means nothing else is using
    /// the list while the caller walks it.
    fn first(&mut self) -> Link;
}

/// Validity contains a representation of all invalid states found while
/// walking a free list.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Validity {
    /// Links pointing outside the arena. The walk stops at the first one.
    pub out_of_bounds: usize,

    /// Slots reached a second time, meaning the list loops back on itself.
    /// This is what a double free looks like. The walk stops here too.
    pub duplicates: usize,

    /// Free slots whose guard word was overwritten while they were free.
    /// Only counted with the `guards` feature.
    pub corrupted: usize,
}

impl Validity {
    /// Returns a boolean - a simple check if all cases are 0
    pub fn is_valid(&self) -> bool {
        self.out_of_bounds == 0 && self.duplicates == 0 && self.corrupted == 0
    }
}

impl From<Validity> for bool {
    fn from(v: Validity) -> bool {
        v.is_valid()
    }
}

/// How many slots a pool holds, and how they are split between the free
/// list and clients.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub capacity: usize,
    pub free: usize,
    pub in_use: usize,
}

/// Walk the whole free list, counting slots and checking links.
pub(crate) fn survey<L: FreeList>(list: &mut L) -> (Validity, Stats) {
    let mut link = list.first();
    let arena = list.arena();
    let capacity = arena.capacity();

    let mut validity = Validity::default();
    let mut free = 0;
    let mut seen = vec![false; capacity];

    while let Some(index) = link.index() {
        if index >= capacity {
            validity.out_of_bounds += 1;
            break;
        }
        if seen[index] {
            validity.duplicates += 1;
            break;
        }
        seen[index] = true;
        free += 1;

        // `first` took `&mut`, so every slot reached here is free and
        // untouched by other threads.
        unsafe {
            if !arena.guard_intact(index) {
                validity.corrupted += 1;
            }
            link = arena.read_link(index);
        }
    }

    let stats = Stats {
        capacity,
        free,
        in_use: capacity - free,
    };

    (validity, stats)
}
