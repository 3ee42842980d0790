//! The pool itself: one arena, one free list, picked once at construction.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

use log::{debug, trace};

use crate::arena::{Arena, Link, SlotLayout};
use crate::error::PoolError;
use crate::freelist::{self, FreeList, Stats, Validity};
#[cfg(target_has_atomic = "64")]
use crate::lock_free::LockFreeList;
use crate::locked::LockedList;
use crate::probe;

/// Which free list a pool should use.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum BackendChoice {
    /// Lock-free if the target supports it, spin-locked otherwise.
    #[default]
    Auto,
    /// Lock-free, or a construction error if the target cannot do it.
    LockFree,
    /// Spin-locked, whatever the target.
    Locked,
}

/// Which free list a pool ended up with.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BackendKind {
    LockFree,
    Locked,
}

enum Backend {
    #[cfg(target_has_atomic = "64")]
    LockFree(LockFreeList),
    Locked(LockedList),
}

impl Backend {
    fn build(kind: BackendKind, object: Layout, capacity: usize) -> Result<Backend, PoolError> {
        match kind {
            BackendKind::LockFree => Backend::lock_free(object, capacity),
            BackendKind::Locked => Ok(Backend::Locked(LockedList::new(Arena::new(
                object, capacity,
            )?))),
        }
    }

    #[cfg(target_has_atomic = "64")]
    fn lock_free(object: Layout, capacity: usize) -> Result<Backend, PoolError> {
        // Refuse before committing memory to the arena.
        LockFreeList::check(capacity)?;
        let arena = Arena::new(object, capacity)?;
        Ok(Backend::LockFree(LockFreeList::new(arena)?))
    }

    #[cfg(not(target_has_atomic = "64"))]
    fn lock_free(_object: Layout, _capacity: usize) -> Result<Backend, PoolError> {
        Err(PoolError::LockFreeUnsupported)
    }

    fn kind(&self) -> BackendKind {
        match self {
            #[cfg(target_has_atomic = "64")]
            Backend::LockFree(_) => BackendKind::LockFree,
            Backend::Locked(_) => BackendKind::Locked,
        }
    }
}

impl FreeList for Backend {
    #[inline]
    fn arena(&self) -> &Arena {
        match self {
            #[cfg(target_has_atomic = "64")]
            Backend::LockFree(list) => list.arena(),
            Backend::Locked(list) => list.arena(),
        }
    }

    #[inline]
    fn pop(&self) -> Option<usize> {
        match self {
            #[cfg(target_has_atomic = "64")]
            Backend::LockFree(list) => list.pop(),
            Backend::Locked(list) => list.pop(),
        }
    }

    #[inline]
    unsafe fn push(&self, index: usize) {
        match self {
            #[cfg(target_has_atomic = "64")]
            Backend::LockFree(list) => list.push(index),
            Backend::Locked(list) => list.push(index),
        }
    }

    fn first(&mut self) -> Link {
        match self {
            #[cfg(target_has_atomic = "64")]
            Backend::LockFree(list) => list.first(),
            Backend::Locked(list) => list.first(),
        }
    }
}

/// A fixed number of fixed-size slots, handed out and taken back in O(1)
/// from any number of threads.
///
/// The pool only manages raw storage: [`allocate`](Pool::allocate) returns
/// uninitialized memory and [`deallocate`](Pool::deallocate) never runs a
/// destructor. See [`TypedPool`](crate::TypedPool) for a wrapper that does.
///
/// ```
/// use adaptive_pool::Pool;
///
/// let pool = Pool::for_type::<[u64; 8]>(2).unwrap();
/// let a = pool.allocate().unwrap();
/// let b = pool.allocate().unwrap();
/// assert_ne!(a, b);
/// assert!(pool.allocate().is_none());
///
/// unsafe { pool.deallocate(a) };
/// assert_eq!(pool.allocate(), Some(a));
/// # unsafe { pool.deallocate(a); pool.deallocate(b) };
/// ```
pub struct Pool {
    backend: Backend,
}

impl Pool {
    /// Build a pool of `capacity` slots for objects described by `object`,
    /// lock-free where the target allows it.
    pub fn new(object: Layout, capacity: usize) -> Result<Pool, PoolError> {
        Pool::with_backend(object, capacity, BackendChoice::Auto)
    }

    /// Build a pool of `capacity` slots, each able to hold a `T`.
    pub fn for_type<T>(capacity: usize) -> Result<Pool, PoolError> {
        Pool::new(Layout::new::<T>(), capacity)
    }

    /// Build a pool of `capacity` slots of at least `size` bytes, aligned to
    /// `align`.
    pub fn from_size_align(size: usize, align: usize, capacity: usize) -> Result<Pool, PoolError> {
        let object = Layout::from_size_align(size, align).map_err(|_| {
            PoolError::LayoutOverflow {
                size,
                align,
                capacity,
            }
        })?;
        Pool::new(object, capacity)
    }

    /// Build a pool with an explicit choice of free list.
    ///
    /// With [`BackendChoice::Auto`], the decision is made here, once, by
    /// [`tagged_head_is_lock_free`](crate::tagged_head_is_lock_free). If the
    /// lock-free list is chosen but cannot take `capacity` slots, that is
    /// reported rather than quietly falling back to a lock.
    pub fn with_backend(
        object: Layout,
        capacity: usize,
        choice: BackendChoice,
    ) -> Result<Pool, PoolError> {
        let kind = match choice {
            BackendChoice::Auto if probe::tagged_head_is_lock_free() => BackendKind::LockFree,
            BackendChoice::Auto => BackendKind::Locked,
            BackendChoice::LockFree => BackendKind::LockFree,
            BackendChoice::Locked => BackendKind::Locked,
        };

        let backend = Backend::build(kind, object, capacity)?;
        let pool = Pool { backend };
        debug!(
            "Using {:?} pool: {} slots of {} bytes (requested {:?})",
            kind,
            capacity,
            pool.slot_size(),
            choice
        );

        Ok(pool)
    }

    /// Take a free slot, or `None` if all `capacity` slots are in use.
    ///
    /// The returned memory is `slot_size()` bytes, aligned to
    /// `slot_layout().align()`, and uninitialized.
    #[inline]
    pub fn allocate(&self) -> Option<NonNull<u8>> {
        let index = match self.backend.pop() {
            Some(index) => index,
            None => {
                trace!("Pool exhausted: all {} slots in use", self.capacity());
                return None;
            }
        };

        let arena = self.backend.arena();
        // We won the slot; nobody else can see it until it is pushed again.
        unsafe { arena.mark_in_use(index) };
        Some(arena.slot(index))
    }

    /// Return a slot to the pool.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not the start of one of this pool's slots.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate`](Pool::allocate) on this
    /// pool and not deallocated since. Anything stored in the slot must
    /// already have been dropped or be fine to forget; the slot must not be
    /// touched again until a later `allocate` returns it.
    #[inline]
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        let arena = self.backend.arena();
        let index = match arena.index_of(ptr) {
            Some(index) => index,
            None => panic!("{:?} does not belong to this pool", ptr),
        };

        arena.mark_free(index);
        self.backend.push(index);
    }

    /// Whether `ptr` is the start of one of this pool's slots.
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.backend.arena().index_of(ptr).is_some()
    }

    /// Which free list this pool uses.
    pub fn backend(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn is_lock_free(&self) -> bool {
        self.backend() == BackendKind::LockFree
    }

    pub fn capacity(&self) -> usize {
        self.backend.arena().capacity()
    }

    pub fn slot_size(&self) -> usize {
        self.slot_layout().size()
    }

    pub fn slot_layout(&self) -> SlotLayout {
        self.backend.arena().slot_layout()
    }

    /// Count free and in-use slots, and verify the free list.
    ///
    /// Taking `&mut self` means no other thread is allocating or
    /// deallocating while the list is walked.
    pub fn stats(&mut self) -> (Validity, Stats) {
        freelist::survey(&mut self.backend)
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("backend", &self.backend())
            .field("arena", self.backend.arena())
            .finish()
    }
}
