//! A typed layer over [`Pool`]: moves values into slots and drops them on
//! the way out.

use core::alloc::Layout;
use core::fmt;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};

use crate::error::PoolError;
use crate::pool::{BackendChoice, Pool};

/// A pool of slots sized and aligned for `T`.
///
/// ```
/// use adaptive_pool::TypedPool;
///
/// struct Request {
///     id: u32,
///     score: f64,
/// }
///
/// let pool = TypedPool::new(1000).unwrap();
/// let mut req = pool.alloc(Request { id: 1, score: 2.0 }).ok().unwrap();
/// req.score += 1.0;
/// assert_eq!(req.id, 1);
/// drop(req); // Drops the Request and hands its slot back.
/// ```
pub struct TypedPool<T> {
    pool: Pool,
    // The pool never owns a `T` itself; every live value is owned by a
    // `PoolBox`, which carries the `Send`/`Sync` bounds.
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedPool<T> {
    pub fn new(capacity: usize) -> Result<TypedPool<T>, PoolError> {
        TypedPool::with_backend(capacity, BackendChoice::Auto)
    }

    pub fn with_backend(capacity: usize, choice: BackendChoice) -> Result<TypedPool<T>, PoolError> {
        Ok(TypedPool {
            pool: Pool::with_backend(Layout::new::<T>(), capacity, choice)?,
            _marker: PhantomData,
        })
    }

    /// Move `value` into a free slot. If the pool is exhausted, `value` is
    /// handed back.
    pub fn alloc(&self, value: T) -> Result<PoolBox<'_, T>, T> {
        let ptr = match self.pool.allocate() {
            Some(ptr) => ptr.cast::<T>(),
            None => return Err(value),
        };

        // The slot is sized and aligned for T, and ours alone.
        unsafe { ptr.as_ptr().write(value) };
        Ok(PoolBox { ptr, pool: self })
    }

    /// The untyped pool underneath.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn is_lock_free(&self) -> bool {
        self.pool.is_lock_free()
    }
}

impl<T> fmt::Debug for TypedPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedPool").field(&self.pool).finish()
    }
}

/// A `T` living in a [`TypedPool`] slot. Dropping it drops the value and
/// returns the slot.
pub struct PoolBox<'pool, T> {
    ptr: NonNull<T>,
    pool: &'pool TypedPool<T>,
}

// A PoolBox owns its T exclusively, like a Box; the pool it points back to is
// shared by design.
unsafe impl<T: Send> Send for PoolBox<'_, T> {}
unsafe impl<T: Sync> Sync for PoolBox<'_, T> {}

impl<'pool, T> PoolBox<'pool, T> {
    /// Move the value out and give the slot back.
    pub fn into_inner(this: PoolBox<'pool, T>) -> T {
        let this = ManuallyDrop::new(this);
        unsafe {
            let value = this.ptr.as_ptr().read();
            this.pool.pool.deallocate(this.ptr.cast());
            value
        }
    }

    /// The address of the slot holding the value.
    pub fn as_ptr(this: &PoolBox<'pool, T>) -> NonNull<T> {
        this.ptr
    }
}

impl<T> Deref for PoolBox<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for PoolBox<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for PoolBox<'_, T> {
    fn drop(&mut self) {
        unsafe {
            ptr::drop_in_place(self.ptr.as_ptr());
            self.pool.pool.deallocate(self.ptr.cast());
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PoolBox<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
