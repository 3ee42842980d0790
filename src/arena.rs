//! The backing storage for a pool: one contiguous block, cut into equal
//! slots.
//!
//! A slot is either free, in which case its first machine word is a [`Link`]
//! to the next free slot, or in use, in which case every byte belongs to the
//! client. This module is the only place that turns slot indices into
//! addresses (and back), and the only place that reinterprets a slot's bytes
//! as a link.

use alloc::alloc::{alloc, dealloc};
#[cfg(feature = "guards")]
use alloc::boxed::Box;
use core::alloc::Layout;
use core::fmt;
use core::mem::{align_of, size_of};
use core::ptr::NonNull;
#[cfg(feature = "guards")]
use core::sync::atomic::AtomicBool;
use core::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use static_assertions::{assert_eq_size, const_assert_eq};

use crate::error::PoolError;

/// Size of the link stored at the start of every free slot.
pub(crate) const LINK_SIZE: usize = size_of::<usize>();

// Links are read and written through `AtomicUsize`, so the two must be
// interchangeable in memory.
assert_eq_size!(usize, AtomicUsize);
const_assert_eq!(align_of::<usize>(), align_of::<AtomicUsize>());

/// Written into the second word of a free slot when the `guards` feature is
/// on.
#[cfg(feature = "guards")]
const GUARD: usize = 0xF4EE_5107;

/// A free-list link: `0` ends the list, anything else is one past the index
/// of the next free slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub(crate) struct Link(usize);

impl Link {
    pub(crate) const END: Link = Link(0);

    /// A link pointing at slot `index`.
    pub(crate) const fn to(index: usize) -> Link {
        Link(index + 1)
    }

    pub(crate) const fn from_raw(raw: usize) -> Link {
        Link(raw)
    }

    pub(crate) const fn raw(self) -> usize {
        self.0
    }

    /// The slot this link points at, or `None` at the end of the list.
    pub(crate) const fn index(self) -> Option<usize> {
        self.0.checked_sub(1)
    }
}

/// The size and alignment of one slot.
///
/// A slot must be able to hold either the client's object or a link, and
/// every slot in an array of them must be aligned for both.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SlotLayout {
    size: usize,
    align: usize,
}

impl SlotLayout {
    /// Compute the slot layout for objects described by `object`.
    ///
    /// Returns `None` if rounding the size up to the alignment overflows.
    pub fn new(object: Layout) -> Option<SlotLayout> {
        let link = Layout::new::<usize>();
        let size = object.size().max(LINK_SIZE);
        let align = object.align().max(link.align());
        let padded = Layout::from_size_align(size, align).ok()?.pad_to_align();

        Some(SlotLayout {
            size: padded.size(),
            align: padded.align(),
        })
    }

    /// Bytes per slot. Always a non-zero multiple of [`align`](Self::align).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment of every slot, and of the arena as a whole.
    pub fn align(&self) -> usize {
        self.align
    }

    /// Layout of `count` back-to-back slots, or `None` on overflow.
    pub fn array(&self, count: usize) -> Option<Layout> {
        let bytes = self.size.checked_mul(count)?;
        Layout::from_size_align(bytes, self.align).ok()
    }
}

/// A block of `capacity` slots, allocated once and freed on drop.
pub(crate) struct Arena {
    base: NonNull<u8>,
    layout: Layout,
    slot: SlotLayout,
    capacity: usize,
    /// Which slots are free, kept apart from the slots so that nothing a
    /// client stores can make a live slot look free.
    #[cfg(feature = "guards")]
    free: Box<[AtomicBool]>,
}

// The arena is a plain block of bytes. Who may touch which slot is decided by
// the free-list protocol layered on top, not by the arena itself.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Allocate room for `capacity` objects described by `object`.
    ///
    /// The slots are left unlinked; see [`thread`](Self::thread).
    pub(crate) fn new(object: Layout, capacity: usize) -> Result<Arena, PoolError> {
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }

        let overflow = PoolError::LayoutOverflow {
            size: object.size(),
            align: object.align(),
            capacity,
        };
        let slot = SlotLayout::new(object).ok_or(overflow)?;
        let layout = slot.array(capacity).ok_or(overflow)?;

        // The layout is never zero-sized: capacity >= 1 and slot.size >= LINK_SIZE.
        let base = unsafe { alloc(layout) };
        let base = NonNull::new(base).ok_or(PoolError::OutOfMemory {
            bytes: layout.size(),
        })?;

        debug!(
            "Allocated arena at {:?}: {} slots of {} bytes",
            base, capacity, slot.size
        );

        Ok(Arena {
            base,
            layout,
            slot,
            capacity,
            #[cfg(feature = "guards")]
            free: (0..capacity).map(|_| AtomicBool::new(false)).collect(),
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn slot_layout(&self) -> SlotLayout {
        self.slot
    }

    /// Link every slot to the one after it, ending the chain at the last slot,
    /// and return a link to the first slot.
    ///
    /// Taking `&mut self` guarantees no free list is using the arena yet.
    pub(crate) fn thread(&mut self) -> Link {
        for index in 0..self.capacity {
            let next = if index + 1 < self.capacity {
                Link::to(index + 1)
            } else {
                Link::END
            };
            unsafe {
                self.write_link(index, next);
                self.init_guard(index);
            }
        }

        Link::to(0)
    }

    /// Address of slot `index`.
    ///
    /// Indices come from links, which only ever point inside the arena.
    #[inline]
    pub(crate) fn slot(&self, index: usize) -> NonNull<u8> {
        debug_assert!(
            index < self.capacity,
            "slot {} out of range ({} slots)",
            index,
            self.capacity
        );
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(index * self.slot.size)) }
    }

    /// Index of the slot starting at `ptr`, if `ptr` is the start of one of
    /// this arena's slots.
    #[inline]
    pub(crate) fn index_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = (ptr.as_ptr() as usize).checked_sub(self.base.as_ptr() as usize)?;
        let index = offset / self.slot.size;
        (offset % self.slot.size == 0 && index < self.capacity).then_some(index)
    }

    fn link_cell(&self, index: usize) -> &AtomicUsize {
        // Every slot is aligned for, and at least as large as, a usize.
        unsafe { self.slot(index).cast::<AtomicUsize>().as_ref() }
    }

    /// Read the link stored in slot `index`.
    ///
    /// # Safety
    ///
    /// `index < capacity`. The value is only meaningful while the slot is
    /// free; the lock-free list may read a slot that has just been handed out
    /// and must then discard what it read.
    #[inline]
    pub(crate) unsafe fn read_link(&self, index: usize) -> Link {
        Link(self.link_cell(index).load(Ordering::Relaxed))
    }

    /// Store `next` as the link of slot `index`.
    ///
    /// # Safety
    ///
    /// The caller must own slot `index`: it is neither in use by a client
    /// nor reachable from the free list.
    #[inline]
    pub(crate) unsafe fn write_link(&self, index: usize, next: Link) {
        self.link_cell(index).store(next.0, Ordering::Relaxed);
    }

    /// Pointer to the guard word of slot `index`, when a slot has room for
    /// one after its link.
    #[cfg(feature = "guards")]
    fn guard_word(&self, index: usize) -> Option<*mut usize> {
        if self.slot.size < 2 * LINK_SIZE {
            return None;
        }
        Some(unsafe { self.slot(index).cast::<usize>().as_ptr().add(1) })
    }

    /// Mark a slot that has never been handed out as free.
    #[cfg(feature = "guards")]
    unsafe fn init_guard(&self, index: usize) {
        self.free[index].store(true, Ordering::Relaxed);
        if let Some(word) = self.guard_word(index) {
            word.write(GUARD);
        }
    }

    #[cfg(not(feature = "guards"))]
    #[inline(always)]
    unsafe fn init_guard(&self, _index: usize) {}

    /// Record that slot `index` is about to become free.
    ///
    /// # Panics
    ///
    /// With the `guards` feature, panics if the slot is already free, which
    /// means it is being deallocated twice.
    ///
    /// # Safety
    ///
    /// The caller must own slot `index`.
    #[cfg(feature = "guards")]
    pub(crate) unsafe fn mark_free(&self, index: usize) {
        if self.free[index].swap(true, Ordering::AcqRel) {
            panic!("double free of slot {} at {:?}", index, self.slot(index));
        }
        if let Some(word) = self.guard_word(index) {
            word.write(GUARD);
        }
    }

    #[cfg(not(feature = "guards"))]
    #[inline(always)]
    pub(crate) unsafe fn mark_free(&self, _index: usize) {}

    /// Record that slot `index` has just left the free list.
    ///
    /// # Panics
    ///
    /// With the `guards` feature, panics if the guard word written when the
    /// slot was freed has been overwritten.
    ///
    /// # Safety
    ///
    /// The caller must own slot `index`.
    #[cfg(feature = "guards")]
    pub(crate) unsafe fn mark_in_use(&self, index: usize) {
        if !self.guard_intact(index) {
            panic!(
                "slot {} at {:?} modified while free",
                index,
                self.slot(index)
            );
        }
        self.free[index].store(false, Ordering::Release);
    }

    #[cfg(not(feature = "guards"))]
    #[inline(always)]
    pub(crate) unsafe fn mark_in_use(&self, _index: usize) {}

    /// Whether a free slot still carries its guard word. Always true when
    /// guards are disabled or do not fit.
    ///
    /// # Safety
    ///
    /// Slot `index` must be free and the free list quiescent.
    #[cfg(feature = "guards")]
    pub(crate) unsafe fn guard_intact(&self, index: usize) -> bool {
        self.guard_word(index).map_or(true, |word| word.read() == GUARD)
    }

    #[cfg(not(feature = "guards"))]
    pub(crate) unsafe fn guard_intact(&self, _index: usize) -> bool {
        true
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        debug!("Releasing arena at {:?} ({} bytes)", self.base, self.layout.size());
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("base", &self.base)
            .field("slot", &self.slot)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn test_slot_layout() {
        // Tiny objects still get room for a link.
        let tiny = SlotLayout::new(Layout::new::<u8>()).unwrap();
        assert_eq!(tiny.size(), LINK_SIZE);
        assert_eq!(tiny.align(), align_of::<usize>());

        // Odd sizes are padded to the alignment.
        let odd = SlotLayout::new(Layout::from_size_align(LINK_SIZE + 4, 4).unwrap()).unwrap();
        assert_eq!(odd.size(), 2 * LINK_SIZE);
        assert_eq!(odd.size() % odd.align(), 0);

        // Large alignments win over the link's.
        let wide = SlotLayout::new(Layout::from_size_align(8, 64).unwrap()).unwrap();
        assert_eq!(wide.size(), 64);
        assert_eq!(wide.align(), 64);

        let array = odd.array(10).unwrap();
        assert_eq!(array.size(), 20 * LINK_SIZE);
        assert!(odd.array(usize::MAX).is_none());
    }

    #[test]
    fn test_construction_errors() {
        let layout = Layout::new::<u64>();
        assert_eq!(
            Arena::new(layout, 0).unwrap_err(),
            PoolError::ZeroCapacity
        );

        let huge = Layout::from_size_align(usize::MAX / 4, 8).unwrap();
        assert_eq!(
            Arena::new(huge, 8).unwrap_err(),
            PoolError::LayoutOverflow {
                size: usize::MAX / 4,
                align: 8,
                capacity: 8,
            }
        );
    }

    #[test]
    fn test_thread_links_every_slot() {
        let mut arena = Arena::new(Layout::new::<[u64; 3]>(), 5).unwrap();
        let mut link = arena.thread();
        let mut order = std::vec::Vec::new();
        while let Some(index) = link.index() {
            order.push(index);
            link = unsafe { arena.read_link(index) };
        }
        assert_eq!(order, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_index_of() {
        let arena = Arena::new(Layout::new::<[u8; 24]>(), 4).unwrap();
        let size = arena.slot_layout().size();

        for index in 0..4 {
            let slot = arena.slot(index);
            assert_eq!(arena.index_of(slot), Some(index));
            assert_eq!(slot.as_ptr() as usize % arena.slot_layout().align(), 0);
        }

        // Inside a slot, past the end, and before the start.
        let inside = NonNull::new(arena.slot(1).as_ptr().wrapping_add(1)).unwrap();
        assert_eq!(arena.index_of(inside), None);
        let past = NonNull::new(arena.slot(3).as_ptr().wrapping_add(size)).unwrap();
        assert_eq!(arena.index_of(past), None);
        let before = NonNull::new(arena.slot(0).as_ptr().wrapping_sub(size)).unwrap();
        assert_eq!(arena.index_of(before), None);
    }

    #[test]
    fn test_link_encoding() {
        assert_eq!(Link::END.index(), None);
        assert_eq!(Link::to(0).index(), Some(0));
        assert_eq!(Link::to(41).raw(), 42);
        assert_eq!(Link::from_raw(42), Link::to(41));
    }
}
