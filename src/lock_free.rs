//! The lock-free free list: a Treiber stack with a tagged head.
//!
//! The head is one `u64`: the link to the top slot in the low half and a
//! counter in the high half. Every successful push or pop bumps the counter,
//! so a thread that read the head, stalled, and comes back to find the same
//! top slot still fails its compare-and-swap if anything happened in between.
//! Without the tag, that thread could install a stale `next` link (the ABA
//! problem).

use core::mem::size_of;
use core::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::{Backoff, CachePadded};
use static_assertions::{assert_eq_size, const_assert};

use crate::arena::{Arena, Link};
use crate::error::PoolError;
use crate::freelist::FreeList;
use crate::probe;

// The tag and the link share one word.
const_assert!(2 * size_of::<u32>() == size_of::<u64>());
assert_eq_size!(u64, AtomicU64);

/// The most slots a lock-free list can address: links are `index + 1` and
/// have to fit in the low 32 bits of the head.
pub const MAX_LOCK_FREE_SLOTS: usize = u32::MAX as usize;

/// A snapshot of the list head.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct TaggedHead {
    link: u32,
    tag: u32,
}

impl TaggedHead {
    fn pack(self) -> u64 {
        (u64::from(self.tag) << 32) | u64::from(self.link)
    }

    fn unpack(raw: u64) -> TaggedHead {
        TaggedHead {
            link: raw as u32,
            tag: (raw >> 32) as u32,
        }
    }

    fn top(self) -> Option<usize> {
        Link::from_raw(self.link as usize).index()
    }

    /// The head that replaces this one when `link` becomes the top of the
    /// stack. The tag wraps around after 2^32 updates.
    fn succeed(self, link: Link) -> TaggedHead {
        TaggedHead {
            // Links in the list are bounded by MAX_LOCK_FREE_SLOTS. A stale
            // read may be truncated here, but then the CAS fails anyway.
            link: link.raw() as u32,
            tag: self.tag.wrapping_add(1),
        }
    }
}

pub(crate) struct LockFreeList {
    head: CachePadded<AtomicU64>,
    arena: Arena,
}

impl LockFreeList {
    /// Check whether a lock-free list could manage `capacity` slots on this
    /// target, before any memory is committed to it.
    pub(crate) fn check(capacity: usize) -> Result<(), PoolError> {
        if !probe::tagged_head_is_lock_free() {
            return Err(PoolError::LockFreeUnsupported);
        }
        if capacity > MAX_LOCK_FREE_SLOTS {
            return Err(PoolError::CapacityTooLarge {
                capacity,
                max: MAX_LOCK_FREE_SLOTS,
            });
        }
        Ok(())
    }

    /// Link every slot of `arena` into a fresh list, all slots free.
    pub(crate) fn new(mut arena: Arena) -> Result<LockFreeList, PoolError> {
        LockFreeList::check(arena.capacity())?;

        let first = arena.thread();
        let head = TaggedHead {
            link: first.raw() as u32,
            tag: 0,
        };

        Ok(LockFreeList {
            head: CachePadded::new(AtomicU64::new(head.pack())),
            arena,
        })
    }

    fn load(&self) -> TaggedHead {
        TaggedHead::unpack(self.head.load(Ordering::Acquire))
    }
}

impl FreeList for LockFreeList {
    fn arena(&self) -> &Arena {
        &self.arena
    }

    fn pop(&self) -> Option<usize> {
        let backoff = Backoff::new();
        let mut current = self.load();

        loop {
            let index = current.top()?;

            // Another thread may pop this slot and hand it to a client before
            // our CAS; `next` is garbage then, but the tag has moved on and
            // the CAS below fails.
            let next = unsafe { self.arena.read_link(index) };
            let new = current.succeed(next);

            match self.head.compare_exchange_weak(
                current.pack(),
                new.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(index),
                Err(actual) => {
                    current = TaggedHead::unpack(actual);
                    backoff.spin();
                }
            }
        }
    }

    unsafe fn push(&self, index: usize) {
        let backoff = Backoff::new();
        let mut current = TaggedHead::unpack(self.head.load(Ordering::Relaxed));

        loop {
            self.arena.write_link(index, Link::from_raw(current.link as usize));
            let new = current.succeed(Link::to(index));

            match self.head.compare_exchange_weak(
                current.pack(),
                new.pack(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => {
                    current = TaggedHead::unpack(actual);
                    backoff.spin();
                }
            }
        }
    }

    fn first(&mut self) -> Link {
        Link::from_raw(TaggedHead::unpack(*self.head.get_mut()).link as usize)
    }
}
