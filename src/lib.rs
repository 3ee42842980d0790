#![no_std]

//! A fixed-capacity pool of fixed-size slots.
//!
//! All slots live in one block of memory allocated when the pool is built and
//! freed when it is dropped. Free slots are threaded into a stack, so handing
//! one out or taking one back is O(1) and the pool never fragments.
//!
//! ## Basic Types
//!
//! ### [`Pool`](struct.Pool.html)
//!
//! Raw, untyped slots: [`Pool::allocate`] returns a pointer to uninitialized
//! memory, or `None` once every slot is in use. [`Pool::deallocate`] puts it
//! back. Both take `&self` and can be called from any number of threads.
//!
//! ### [`TypedPool`](struct.TypedPool.html)
//!
//! Slots for one type `T`. Values are moved in with [`TypedPool::alloc`] and
//! live in a [`PoolBox`] that drops them and returns the slot.
//!
//! ## Backends
//!
//! A pool keeps its free slots in one of two stacks, chosen once when it is
//! built:
//!
//! - **lock-free**: the head of the stack is a slot link plus a counter in a
//!   single 64-bit word, updated by compare-and-swap. The counter changes on
//!   every update, so a stalled thread cannot mistake "popped and pushed
//!   back" for "unchanged".
//! - **locked**: the head sits behind a spin lock. Used on targets without
//!   native 64-bit atomics.
//!
//! [`tagged_head_is_lock_free`] reports which one this target gets;
//! [`BackendChoice`] overrides it.
//!
//! ## Safety
//!
//! Deallocating a pointer twice, or one that came from a different pool, or
//! touching a slot after deallocating it, is undefined behaviour and is not
//! checked. The `guards` feature adds a guard word to free slots that catches
//! the common cases with a panic.

extern crate alloc;
#[cfg(test)]
extern crate std;

mod arena;
mod error;
mod freelist;
#[cfg(target_has_atomic = "64")]
mod lock_free;
mod locked;
mod pool;
mod probe;
mod typed;

pub use arena::SlotLayout;
pub use error::PoolError;
pub use freelist::{Stats, Validity};
#[cfg(target_has_atomic = "64")]
pub use lock_free::MAX_LOCK_FREE_SLOTS;
pub use pool::{BackendChoice, BackendKind, Pool};
pub use probe::tagged_head_is_lock_free;
pub use typed::{PoolBox, TypedPool};
