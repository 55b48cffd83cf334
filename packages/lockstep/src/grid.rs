//! P×P single-writer communication cells.

use std::cell::UnsafeCell;

/// A square grid of per-(sender, receiver) cells.
///
/// Cell (a, b) holds traffic flowing from processor `a` to processor `b`.
/// [`outbound(a, b)`][Self::outbound] and [`inbound(a, b)`][Self::inbound]
/// resolve to the same cell, named from the sender's and the receiver's
/// point of view respectively.
///
/// The grid performs no locking. Callers uphold the superstep protocol:
/// during a computation phase each cell is touched only by its sender, and
/// during the sync phases only by its receiver, with a barrier separating
/// the two. The accessors are `unsafe` to make that contract explicit.
#[derive(Debug)]
pub(crate) struct PairGrid<T> {
    cells: Vec<UnsafeCell<T>>,
    processors: usize,
}

// SAFETY: cross-thread access is serialized by the superstep barrier
// protocol documented on the type; at any instant each cell has at most one
// thread touching it.
unsafe impl<T: Send> Sync for PairGrid<T> {}

impl<T: Default> PairGrid<T> {
    pub(crate) fn new(processors: usize) -> Self {
        let cell_count = processors
            .checked_mul(processors)
            .expect("processor count overflows the communication grid");

        Self {
            cells: (0..cell_count).map(|_| UnsafeCell::new(T::default())).collect(),
            processors,
        }
    }
}

impl<T> PairGrid<T> {
    fn index(&self, sender: usize, receiver: usize) -> usize {
        debug_assert!(sender < self.processors);
        debug_assert!(receiver < self.processors);

        sender * self.processors + receiver
    }

    /// The cell written by `sender` with traffic destined for `receiver`.
    ///
    /// # Safety
    ///
    /// The caller must be the cell's exclusive owner for the current
    /// protocol phase: the sender during a computation phase, or the
    /// receiver during its sync phase, with a barrier between the two.
    #[allow(
        clippy::mut_from_ref,
        reason = "single-owner-per-phase cell, serialized by the barrier protocol"
    )]
    pub(crate) unsafe fn outbound(&self, sender: usize, receiver: usize) -> &mut T {
        // SAFETY: exclusivity is guaranteed by the caller per the contract.
        unsafe { &mut *self.cells[self.index(sender, receiver)].get() }
    }

    /// The cell read by `receiver`, populated by `sender`. Same cell as
    /// [`outbound`][Self::outbound] with the same arguments.
    ///
    /// # Safety
    ///
    /// Same contract as [`outbound`][Self::outbound].
    #[allow(
        clippy::mut_from_ref,
        reason = "single-owner-per-phase cell, serialized by the barrier protocol"
    )]
    pub(crate) unsafe fn inbound(&self, sender: usize, receiver: usize) -> &mut T {
        // SAFETY: forwarded contract.
        unsafe { self.outbound(sender, receiver) }
    }

    /// Exclusive access to every cell, for between-run resets.
    pub(crate) fn cells_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.cells.iter_mut().map(UnsafeCell::get_mut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_and_inbound_alias_the_same_cell() {
        let grid = PairGrid::<Vec<u32>>::new(3);

        // SAFETY: single-threaded test; no concurrent access.
        unsafe {
            grid.outbound(1, 2).push(42);
            assert_eq!(grid.inbound(1, 2).as_slice(), &[42]);
        }
    }

    #[test]
    fn cells_are_distinct_per_direction() {
        let grid = PairGrid::<Vec<u32>>::new(2);

        // SAFETY: single-threaded test; no concurrent access.
        unsafe {
            grid.outbound(0, 1).push(1);
            assert!(grid.inbound(1, 0).is_empty());
            assert_eq!(grid.inbound(0, 1).as_slice(), &[1]);
        }
    }

    #[test]
    fn cells_mut_visits_every_cell() {
        let mut grid = PairGrid::<Vec<u32>>::new(2);

        // SAFETY: single-threaded test; no concurrent access.
        unsafe {
            grid.outbound(0, 0).push(7);
            grid.outbound(1, 1).push(7);
        }

        for cell in grid.cells_mut() {
            cell.clear();
        }

        // SAFETY: single-threaded test; no concurrent access.
        unsafe {
            assert!(grid.inbound(0, 0).is_empty());
            assert!(grid.inbound(1, 1).is_empty());
        }
    }
}
