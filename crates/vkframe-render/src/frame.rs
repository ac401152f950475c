// SPDX-License-Identifier: CEPL-1.0
//! Frame slots and the per-slot arena.
//!
//! A frame slot owns the sync objects of one frame in flight. Slots rotate
//! modulo [`FRAME_LAG`], so at most that many frames can have GPU work
//! outstanding at once.

use std::fmt;
use std::ops::{Index, IndexMut};

/// Maximum number of frames allowed in flight on the GPU.
pub const FRAME_LAG: usize = 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameSlot(usize);

impl FrameSlot {
    pub const FIRST: FrameSlot = FrameSlot(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0
    }

    #[inline]
    pub fn next(self) -> Self {
        Self((self.0 + 1) % FRAME_LAG)
    }

    pub fn all() -> impl Iterator<Item = FrameSlot> {
        (0..FRAME_LAG).map(FrameSlot)
    }
}

impl fmt::Display for FrameSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot{}", self.0)
    }
}

/// Exactly one `T` per frame slot, indexed by [`FrameSlot`].
#[derive(Debug, Clone)]
pub struct PerFrame<T> {
    items: Vec<T>,
}

impl<T> PerFrame<T> {
    pub fn new(mut make: impl FnMut(FrameSlot) -> T) -> Self {
        Self {
            items: FrameSlot::all().map(&mut make).collect(),
        }
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> Index<FrameSlot> for PerFrame<T> {
    type Output = T;

    fn index(&self, slot: FrameSlot) -> &T {
        &self.items[slot.0]
    }
}

impl<T> IndexMut<FrameSlot> for PerFrame<T> {
    fn index_mut(&mut self, slot: FrameSlot) -> &mut T {
        &mut self.items[slot.0]
    }
}
