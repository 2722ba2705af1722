//! Pointer + length value types shared between host and generated code.
//!
//! These are the span-like types the ABI classification models as two
//! register slots. Layout is `#[repr(C)]` `{ data, size }` and must match
//! the `{ ptr, i64 }` struct the code generator builds in `jit::types`.

use std::fmt;
use std::marker::PhantomData;
use std::slice;
use std::str;

/// Borrowed vector of scalar elements.
///
/// Passed by value (two registers) or by address once the register budget
/// is exhausted; the generated code never owns the storage.
#[repr(C)]
pub struct VectorView<'a, T> {
    data: *mut T,
    size: usize,
    _marker: PhantomData<&'a mut [T]>,
}

impl<'a, T> VectorView<'a, T> {
    pub fn new(data: &'a mut [T]) -> Self {
        Self {
            data: data.as_mut_ptr(),
            size: data.len(),
            _marker: PhantomData,
        }
    }

    /// Wrap raw parts handed back from generated code.
    ///
    /// # Safety
    /// `data` must point to `size` initialized elements valid for `'a`.
    pub unsafe fn from_raw_parts(data: *mut T, size: usize) -> Self {
        Self {
            data,
            size,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn as_ptr(&self) -> *mut T {
        self.data
    }

    pub fn as_slice(&self) -> &[T] {
        // Safety: constructed from a live slice or valid raw parts.
        unsafe { slice::from_raw_parts(self.data, self.size) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // Safety: as above; &mut self gives unique access.
        unsafe { slice::from_raw_parts_mut(self.data, self.size) }
    }
}

impl<T> Clone for VectorView<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for VectorView<'_, T> {}

impl<T: fmt::Debug> fmt::Debug for VectorView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

/// Borrowed byte span holding UTF-8 text.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct StringView<'a> {
    data: *const u8,
    size: usize,
    _marker: PhantomData<&'a str>,
}

impl<'a> StringView<'a> {
    pub fn new(s: &'a str) -> Self {
        Self {
            data: s.as_ptr(),
            size: s.len(),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn as_str(&self) -> &'a str {
        // Safety: constructed from a live &str.
        unsafe { str::from_utf8_unchecked(slice::from_raw_parts(self.data, self.size)) }
    }
}

impl fmt::Debug for StringView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_view_round_trips() {
        let mut data = vec![3.0f32, 1.0, 2.0];
        let mut view = VectorView::new(&mut data);
        assert_eq!(view.len(), 3);
        view.as_mut_slice()[0] = 5.0;
        assert_eq!(view.as_slice(), &[5.0, 1.0, 2.0]);
    }

    #[test]
    fn layout_is_pointer_plus_length() {
        assert_eq!(
            std::mem::size_of::<VectorView<'_, f64>>(),
            2 * std::mem::size_of::<usize>()
        );
        assert_eq!(
            std::mem::size_of::<StringView<'_>>(),
            2 * std::mem::size_of::<usize>()
        );
    }

    #[test]
    fn string_view_reads_back() {
        let s = StringView::new("hello");
        assert_eq!(s.len(), 5);
        assert_eq!(s.as_str(), "hello");
    }
}
