//! The fallback free list: a plain linked stack behind a spin lock.
//!
//! Used on targets where the lock-free head would need a hidden lock anyway.
//! The lock is held only while the head is swapped, so no tag is needed.

use spin::Mutex;

use crate::arena::{Arena, Link};
use crate::freelist::FreeList;

pub(crate) struct LockedList {
    head: Mutex<Link>,
    arena: Arena,
}

impl LockedList {
    /// Link every slot of `arena` into a fresh list, all slots free.
    pub(crate) fn new(mut arena: Arena) -> LockedList {
        let first = arena.thread();
        LockedList {
            head: Mutex::new(first),
            arena,
        }
    }
}

impl FreeList for LockedList {
    fn arena(&self) -> &Arena {
        &self.arena
    }

    fn pop(&self) -> Option<usize> {
        let mut head = self.head.lock();
        let index = head.index()?;
        // The slot is on the list and we hold the lock: nobody else can be
        // looking at its link.
        *head = unsafe { self.arena.read_link(index) };
        Some(index)
    }

    unsafe fn push(&self, index: usize) {
        let mut head = self.head.lock();
        self.arena.write_link(index, *head);
        *head = Link::to(index);
    }

    fn first(&mut self) -> Link {
        *self.head.get_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use core::alloc::Layout;

    use test_log::test;

    #[test]
    fn test_pop_push_is_lifo() {
        let l = LockedList::new(Arena::new(Layout::new::<u32>(), 3).unwrap());
        assert_eq!(l.pop(), Some(0));
        assert_eq!(l.pop(), Some(1));
        assert_eq!(l.pop(), Some(2));
        assert_eq!(l.pop(), None);

        unsafe {
            l.push(0);
            l.push(2);
        }
        assert_eq!(l.pop(), Some(2));
        assert_eq!(l.pop(), Some(0));
        assert_eq!(l.pop(), None);
    }

    #[test]
    fn test_first_follows_the_head() {
        let mut l = LockedList::new(Arena::new(Layout::new::<u64>(), 2).unwrap());
        assert_eq!(l.first(), Link::to(0));
        let a = l.pop().unwrap();
        let b = l.pop().unwrap();
        assert_eq!(l.first(), Link::END);
        unsafe { l.push(b) };
        assert_eq!(l.first(), Link::to(b));
        unsafe { l.push(a) };
        assert_eq!(l.first(), Link::to(a));
    }
}
