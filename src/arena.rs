//! Arena allocation for short-lived compiler and runtime objects.
//!
//! [`Arena`] is a bump allocator over `bumpalo`: objects are never
//! individually destructed, and `reset` is the only way memory is
//! reclaimed. The `T: Copy` bound on the typed allocation entry points is
//! the compile-time capability restriction: only types needing no cleanup
//! may live in an arena.
//!
//! [`ThreadCachedArena`] lazily provisions one private `Arena` per calling
//! thread. The allocation path touches only the calling thread's arena;
//! the shared mutex guards nothing but the registry of arenas, visited by
//! `reset` and `memory_usage`.

use bumpalo::Bump;
use std::cell::{RefCell, UnsafeCell};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Bump allocator. Whole-arena `reset` is the only reclamation.
#[derive(Default)]
pub struct Arena {
    bump: Bump,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `n` zero-filled bytes from the current block, growing the
    /// backing pool as needed.
    pub fn allocate(&self, n: usize) -> &mut [u8] {
        self.bump.alloc_slice_fill_copy(n, 0u8)
    }

    /// Construct a value in freshly allocated storage. Restricted to
    /// `Copy` types: the arena never runs destructors.
    pub fn alloc<T: Copy>(&self, value: T) -> &mut T {
        self.bump.alloc(value)
    }

    /// Copy a slice into freshly allocated storage.
    pub fn alloc_slice<T: Copy>(&self, values: &[T]) -> &mut [T] {
        self.bump.alloc_slice_copy(values)
    }

    /// Allocate a slice of `len` copies of `value`.
    pub fn alloc_slice_fill<T: Copy>(&self, len: usize, value: T) -> &mut [T] {
        self.bump.alloc_slice_fill_copy(len, value)
    }

    /// Discard all allocations at once. The largest backing block is
    /// retained, so a reset-then-allocate cycle reuses capacity.
    pub fn reset(&mut self) {
        self.bump.reset();
    }

    /// Total bytes committed to backing blocks.
    pub fn memory_usage(&self) -> usize {
        self.bump.allocated_bytes()
    }
}

/// One thread's arena plus a byte counter readable from other threads.
/// The counter exists so aggregate `memory_usage` never has to touch a
/// foreign thread's `Bump`.
struct ThreadArena {
    arena: UnsafeCell<Arena>,
    bytes: AtomicUsize,
}

// Safety: the inner arena is only dereferenced by its owning thread on the
// allocation path (each thread reaches its own slot through thread-local
// lookup), and by `reset`, which requires `&mut ThreadCachedArena` and so
// excludes all concurrent allocation borrows. Cross-thread reads go through
// the atomic counter only.
unsafe impl Sync for ThreadArena {}

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Owner id → slot, for every ThreadCachedArena this thread has touched.
    // Owner ids are never reused; an entry for a dropped owner only keeps
    // its Arc alive until the thread exits.
    static LOCAL_SLOTS: RefCell<Vec<(u64, Arc<ThreadArena>)>> = const { RefCell::new(Vec::new()) };
}

/// Per-thread arena cache with a mutex-guarded registry of all arenas.
///
/// Allocation is lock-free after a thread's first use. `reset` takes
/// `&mut self`: exclusive access is the compile-time replacement for the
/// race window a lock-per-allocation scheme would reopen.
pub struct ThreadCachedArena {
    id: u64,
    slots: Mutex<Vec<Arc<ThreadArena>>>,
}

impl Default for ThreadCachedArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadCachedArena {
    pub fn new() -> Self {
        Self {
            id: NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed),
            slots: Mutex::new(Vec::new()),
        }
    }

    /// The calling thread's slot, provisioning it on first use. The shared
    /// lock is taken only on that first touch, to register the new arena
    /// into the durable list.
    fn local_slot(&self) -> Arc<ThreadArena> {
        LOCAL_SLOTS.with(|cache| {
            let mut cache = cache.borrow_mut();
            if let Some((_, slot)) = cache.iter().find(|(id, _)| *id == self.id) {
                return slot.clone();
            }
            let slot = Arc::new(ThreadArena {
                arena: UnsafeCell::new(Arena::new()),
                bytes: AtomicUsize::new(0),
            });
            self.slots
                .lock()
                .expect("arena registry poisoned")
                .push(slot.clone());
            cache.push((self.id, slot.clone()));
            slot
        })
    }

    /// Allocate `n` zero-filled bytes from the calling thread's arena.
    pub fn allocate(&self, n: usize) -> &mut [u8] {
        let slot = self.local_slot();
        // Safety: see ThreadArena. The storage lives in a Bump owned by the
        // registry (at least as long as self), and reset cannot run while
        // this &self-derived borrow is alive.
        let arena = unsafe { &*slot.arena.get() };
        let buf = arena.allocate(n);
        slot.bytes.store(arena.memory_usage(), Ordering::Relaxed);
        unsafe { &mut *(buf as *mut [u8]) }
    }

    /// Construct a `Copy` value in the calling thread's arena.
    pub fn alloc<T: Copy>(&self, value: T) -> &mut T {
        let slot = self.local_slot();
        // Safety: as in allocate.
        let arena = unsafe { &*slot.arena.get() };
        let v = arena.alloc(value);
        slot.bytes.store(arena.memory_usage(), Ordering::Relaxed);
        unsafe { &mut *(v as *mut T) }
    }

    /// Copy a slice into the calling thread's arena.
    pub fn alloc_slice<T: Copy>(&self, values: &[T]) -> &mut [T] {
        let slot = self.local_slot();
        // Safety: as in allocate.
        let arena = unsafe { &*slot.arena.get() };
        let v = arena.alloc_slice(values);
        slot.bytes.store(arena.memory_usage(), Ordering::Relaxed);
        unsafe { &mut *(v as *mut [T]) }
    }

    /// Reset every thread's arena. Exclusive access guarantees no thread
    /// is mid-allocation.
    pub fn reset(&mut self) {
        let slots = self.slots.get_mut().expect("arena registry poisoned");
        for slot in slots.iter() {
            // Safety: &mut self excludes all allocation borrows.
            let arena = unsafe { &mut *slot.arena.get() };
            arena.reset();
            slot.bytes.store(arena.memory_usage(), Ordering::Relaxed);
        }
    }

    /// Aggregate bytes committed across every thread's arena.
    pub fn memory_usage(&self) -> usize {
        let slots = self.slots.lock().expect("arena registry poisoned");
        slots
            .iter()
            .map(|slot| slot.bytes.load(Ordering::Relaxed))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_allocates_and_resets() {
        let mut arena = Arena::new();
        assert_eq!(arena.memory_usage(), 0);

        let bytes = arena.allocate(1 << 20);
        assert_eq!(bytes.len(), 1 << 20);
        assert!(bytes.iter().all(|&b| b == 0));
        let peak = arena.memory_usage();
        assert!(peak >= 1 << 20);

        arena.reset();
        let baseline = arena.memory_usage();
        assert!(baseline <= peak);

        // Fresh allocation after reset reuses retained capacity: committed
        // bytes do not grow for a small request.
        let _ = arena.allocate(1024);
        assert_eq!(arena.memory_usage(), baseline);
    }

    #[test]
    fn typed_allocation_round_trips() {
        let arena = Arena::new();
        let x = arena.alloc(42u64);
        assert_eq!(*x, 42);
        *x = 7;
        assert_eq!(*x, 7);

        let s = arena.alloc_slice(&[1.0f32, 2.0, 3.0]);
        assert_eq!(s, &[1.0, 2.0, 3.0]);

        let filled = arena.alloc_slice_fill(4, 9i32);
        assert_eq!(filled, &[9, 9, 9, 9]);
    }

    #[test]
    fn thread_cached_arena_is_per_thread() {
        let mut cached = ThreadCachedArena::new();

        std::thread::scope(|scope| {
            let shared = &cached;
            for _ in 0..4 {
                scope.spawn(move || {
                    let buf = shared.allocate(64 * 1024);
                    assert_eq!(buf.len(), 64 * 1024);
                    let v = shared.alloc(3.5f64);
                    assert_eq!(*v, 3.5);
                });
            }
        });

        // Four threads committed at least 64 KiB each.
        assert!(cached.memory_usage() >= 4 * 64 * 1024);

        let peak = cached.memory_usage();
        cached.reset();
        assert!(cached.memory_usage() <= peak);
    }

    #[test]
    fn two_owners_do_not_share_slots() {
        let a = ThreadCachedArena::new();
        let b = ThreadCachedArena::new();
        let _ = a.allocate(4096);
        assert!(a.memory_usage() > 0);
        assert_eq!(b.memory_usage(), 0);
    }
}
