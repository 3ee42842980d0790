use core::alloc::Layout;
use core::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use adaptive_pool::{tagged_head_is_lock_free, BackendChoice, Pool};

use rand::{Rng, RngCore, SeedableRng};
use test_log::test;

const THREADS: usize = 8;
const STEPS_PER_THREAD: usize = 20_000;

fn backends() -> Vec<BackendChoice> {
    let mut choices = vec![BackendChoice::Locked];
    if tagged_head_is_lock_free() {
        choices.push(BackendChoice::LockFree);
    }
    choices
}

/// Tracks which slots are live, to catch a slot being handed out twice.
struct Ledger {
    base: usize,
    slot_size: usize,
    live: Vec<AtomicBool>,
    live_count: AtomicUsize,
    peak: AtomicUsize,
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
}

impl Ledger {
    fn new(pool: &Pool) -> Ledger {
        // Find the arena base by draining the pool once.
        let all: Vec<NonNull<u8>> = std::iter::from_fn(|| pool.allocate()).collect();
        let base = all.iter().map(|p| p.as_ptr() as usize).min().unwrap();
        for ptr in all {
            unsafe { pool.deallocate(ptr) };
        }

        Ledger {
            base,
            slot_size: pool.slot_size(),
            live: (0..pool.capacity()).map(|_| AtomicBool::new(false)).collect(),
            live_count: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
            deallocations: AtomicUsize::new(0),
        }
    }

    fn index(&self, ptr: NonNull<u8>) -> usize {
        (ptr.as_ptr() as usize - self.base) / self.slot_size
    }

    fn allocated(&self, ptr: NonNull<u8>) {
        let was_live = self.live[self.index(ptr)].swap(true, Ordering::SeqCst);
        assert!(!was_live, "slot {:?} handed out twice", ptr);
        let now = self.live_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    fn deallocating(&self, ptr: NonNull<u8>) {
        let was_live = self.live[self.index(ptr)].swap(false, Ordering::SeqCst);
        assert!(was_live, "slot {:?} freed while not live", ptr);
        self.live_count.fetch_sub(1, Ordering::SeqCst);
        self.deallocations.fetch_add(1, Ordering::Relaxed);
    }
}

// Each slot gets a per-thread stamp written past its first word; if the pool
// ever gives a live slot to a second thread, the stamp changes under us.
fn stamp(ptr: NonNull<u8>, value: u64) {
    unsafe { ptr.cast::<u64>().as_ptr().add(1).write_volatile(value) };
}

fn read_stamp(ptr: NonNull<u8>) -> u64 {
    unsafe { ptr.cast::<u64>().as_ptr().add(1).read_volatile() }
}

fn hammer(pool: &Pool, ledger: &Ledger, thread_id: u64, seed: u64) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut held: Vec<(NonNull<u8>, u64)> = Vec::new();

    for step in 0..STEPS_PER_THREAD as u64 {
        let allocate = held.is_empty() || (held.len() < 4 && rng.gen_bool(0.5));
        if allocate {
            if let Some(ptr) = pool.allocate() {
                ledger.allocated(ptr);
                let value = (thread_id << 32) | step;
                stamp(ptr, value);
                held.push((ptr, value));
            }
        } else {
            let victim = rng.gen_range(0..held.len());
            let (ptr, value) = held.swap_remove(victim);
            assert_eq!(read_stamp(ptr), value, "slot {:?} was reused while live", ptr);
            ledger.deallocating(ptr);
            unsafe { pool.deallocate(ptr) };
        }
    }

    for (ptr, value) in held {
        assert_eq!(read_stamp(ptr), value);
        ledger.deallocating(ptr);
        unsafe { pool.deallocate(ptr) };
    }
}

fn run(choice: BackendChoice, capacity: usize) {
    let mut pool = Pool::with_backend(Layout::new::<[u64; 8]>(), capacity, choice).unwrap();
    let ledger = Ledger::new(&pool);

    let seed: u64 = rand::thread_rng().next_u64();
    log::info!("{:?} with {} slots, using seed {}", choice, capacity, seed);

    thread::scope(|s| {
        for t in 0..THREADS as u64 {
            let pool = &pool;
            let ledger = &ledger;
            s.spawn(move || hammer(pool, ledger, t, seed.wrapping_add(t)));
        }
    });

    let allocations = ledger.allocations.load(Ordering::SeqCst);
    let deallocations = ledger.deallocations.load(Ordering::SeqCst);
    log::info!(
        "allocations: {}, deallocations: {}, peak live: {}",
        allocations,
        deallocations,
        ledger.peak.load(Ordering::SeqCst)
    );
    assert_eq!(allocations, deallocations);
    assert_eq!(ledger.live_count.load(Ordering::SeqCst), 0);
    assert!(ledger.peak.load(Ordering::SeqCst) <= capacity);
    assert!(allocations > 0);

    let (validity, stats) = pool.stats();
    assert!(validity.is_valid(), "{:?}", validity);
    assert_eq!(stats.free, capacity);
}

#[test]
fn test_stress_contended() {
    // Fewer slots than threads, so exhaustion is hit constantly.
    for choice in backends() {
        run(choice, 3);
    }
}

#[test]
fn test_stress_roomy() {
    for choice in backends() {
        run(choice, THREADS * 4);
    }
}

// The original workload: every thread grabs as much as it can, then frees it
// all; afterwards the pool must be completely full again.
#[test]
fn test_fill_and_drain() {
    const PER_THREAD: usize = 5_000;

    for choice in backends() {
        let pool = Pool::with_backend(Layout::new::<[u8; 64]>(), THREADS * PER_THREAD, choice)
            .unwrap();

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    let mut taken = Vec::with_capacity(PER_THREAD);
                    for _ in 0..PER_THREAD {
                        if let Some(ptr) = pool.allocate() {
                            taken.push(ptr);
                        }
                    }
                    for ptr in taken {
                        unsafe { pool.deallocate(ptr) };
                    }
                });
            }
        });

        let all: Vec<_> = std::iter::from_fn(|| pool.allocate()).collect();
        assert_eq!(all.len(), THREADS * PER_THREAD);
        assert!(pool.allocate().is_none());
        for ptr in all {
            unsafe { pool.deallocate(ptr) };
        }
    }
}
