//! Errors reported while building a pool.
//!
//! Once a pool exists, nothing it does can fail: `allocate` reports
//! exhaustion as `None`, and `deallocate` has no failure path.

use thiserror::Error;

/// Why a pool could not be constructed.
///
/// Construction is all-or-nothing; a caller receiving one of these never
/// holds a partially built pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool was asked to hold no slots at all.
    #[error("pool capacity must be at least 1")]
    ZeroCapacity,

    /// The slot size, alignment and capacity do not describe a valid block of
    /// memory (overflow, or an alignment that is not a power of two).
    #[error("cannot lay out {capacity} slots of {size} bytes aligned to {align}")]
    LayoutOverflow {
        size: usize,
        align: usize,
        capacity: usize,
    },

    /// The global allocator refused to hand out the arena.
    #[error("failed to allocate a {bytes} byte arena")]
    OutOfMemory { bytes: usize },

    /// A lock-free pool was requested, but this target cannot update the
    /// tagged free-list head without a lock.
    #[error("tagged compare-and-swap is not lock-free on this target")]
    LockFreeUnsupported,

    /// The lock-free head packs a slot link into 32 bits, which caps the
    /// number of slots it can address.
    #[error("capacity {capacity} exceeds the lock-free limit of {max} slots")]
    CapacityTooLarge { capacity: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::string::ToString;

    #[test]
    fn messages_name_the_numbers() {
        let err = PoolError::LayoutOverflow {
            size: 24,
            align: 8,
            capacity: usize::MAX,
        };
        let msg = err.to_string();
        assert!(msg.contains("24 bytes"));
        assert!(msg.contains("aligned to 8"));

        let err = PoolError::CapacityTooLarge {
            capacity: 5_000_000_000,
            max: 4_294_967_295,
        };
        assert!(err.to_string().contains("5000000000"));
    }
}
