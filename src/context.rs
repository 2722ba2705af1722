//! Execution context handle.
//!
//! The context is the opaque handle generated code threads through nested
//! calls (the `CtxPtr` semantic type). Its main job is hosting the arena
//! that vector kernels allocate result storage from: one invocation of a
//! compiled function may produce many short-lived vectors, and none of
//! them need individual destruction.

use crate::arena::Arena;
use crate::vector::VectorView;

/// Per-invocation execution context. Create one, pass its address as the
/// `CtxPtr` argument, and `reset` between invocations to reclaim every
/// temporary at once.
#[derive(Default)]
pub struct ExecContext {
    arena: Arena,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Allocate an uninitialized-length result vector, zero-filled.
    pub fn new_vector<T: Copy + Default>(&self, len: usize) -> VectorView<'_, T> {
        VectorView::new(self.arena.alloc_slice_fill(len, T::default()))
    }

    /// Copy a slice into arena storage and return a view over the copy.
    pub fn vector_from<T: Copy>(&self, values: &[T]) -> VectorView<'_, T> {
        VectorView::new(self.arena.alloc_slice(values))
    }

    /// Reclaim all temporaries allocated since the last reset.
    pub fn reset(&mut self) {
        self.arena.reset();
    }

    pub fn memory_usage(&self) -> usize {
        self.arena.memory_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_allocates_result_vectors() {
        let mut ctx = ExecContext::new();
        let v = ctx.new_vector::<f32>(8);
        assert_eq!(v.len(), 8);
        assert!(v.as_slice().iter().all(|&x| x == 0.0));

        let w = ctx.vector_from(&[1i64, 2, 3]);
        assert_eq!(w.as_slice(), &[1, 2, 3]);

        assert!(ctx.memory_usage() > 0);
        ctx.reset();
        let peak = ctx.memory_usage();
        let _ = ctx.new_vector::<f32>(4);
        assert_eq!(ctx.memory_usage(), peak);
    }
}
