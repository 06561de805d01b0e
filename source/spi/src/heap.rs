//! # Reply headroom
//!
//! Replies are built on the requesting runtime's heap. Before building one,
//! the driver asks the [`Heap`] for enough free words; if it cannot get them,
//! the reply degrades to `out_of_memory` instead of being dropped.

use core::fmt;

/// Size of a machine word on the runtime's heap, in bytes.
pub const WORD_SIZE: usize = 4;
/// A two-element tuple: header plus two elements.
pub const PAIR_WORDS: usize = 3;
/// A boxed integer: header plus payload.
pub const BOXED_INT_WORDS: usize = 2;
/// Header words preceding binary data.
pub const BINARY_HEADER_WORDS: usize = 2;

/// The heap could not provide the requested headroom.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutOfMemory {
    pub requested: usize,
}

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not reserve {} heap words", self.requested)
    }
}

/// Source of heap headroom for building replies.
pub trait Heap {
    /// Make sure at least `words` words can be allocated.
    fn ensure_free(&mut self, words: usize) -> Result<(), OutOfMemory>;
}

/// A heap that never runs out.
#[derive(Copy, Clone, Debug, Default)]
pub struct Unbounded;

impl Heap for Unbounded {
    fn ensure_free(&mut self, _words: usize) -> Result<(), OutOfMemory> {
        Ok(())
    }
}

/// A heap that can hold at most `words` words for any single reply.
#[derive(Copy, Clone, Debug)]
pub struct Budget {
    pub words: usize,
}

impl Heap for Budget {
    fn ensure_free(&mut self, words: usize) -> Result<(), OutOfMemory> {
        if words <= self.words {
            Ok(())
        } else {
            Err(OutOfMemory { requested: words })
        }
    }
}

impl<H: Heap + ?Sized> Heap for &mut H {
    fn ensure_free(&mut self, words: usize) -> Result<(), OutOfMemory> {
        (**self).ensure_free(words)
    }
}

/// Words needed for a binary of `len` bytes.
pub const fn binary_words(len: usize) -> usize {
    BINARY_HEADER_WORDS + len.div_ceil(WORD_SIZE)
}
