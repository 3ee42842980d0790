//! Which free-list backend this target can run.
//!
//! The lock-free list keeps its head as a slot link plus a tag packed into
//! one 64-bit word, and updates it with compare-and-swap. That is only
//! lock-free where the target has native 64-bit atomics; everywhere else the
//! pool has to use the spin-locked list.

/// Whether the tagged head of the lock-free list can be updated with a true
/// atomic read-modify-write on this target.
///
/// This is a property of the compilation target and never changes at run
/// time; pools ask once, when they are built.
pub const fn tagged_head_is_lock_free() -> bool {
    cfg!(target_has_atomic = "64")
}
