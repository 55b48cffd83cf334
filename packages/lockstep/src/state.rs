//! Per-processor runtime state.

use std::cell::UnsafeCell;
use std::time::Instant;

use crate::arena::ByteArena;
use crate::region::{Region, RegionBuffer};
use crate::requests::{PopRequest, PushRequest, RegisterInfo, SendRequest};

/// Everything one processor owns between barriers.
///
/// A `ProcessorState` is mutated exclusively by its owning thread: during
/// computation phases through the processor handle, and during sync phases
/// by the same thread applying its inbound traffic. No other thread ever
/// reads or writes it.
#[derive(Debug)]
pub(crate) struct ProcessorState {
    /// Backing storage for every region registered during the current run,
    /// indexed by [`Region::index`]. Never shrinks: deregistration only
    /// removes the table entry, so slot indices keep resolving to the
    /// buffer the sender named at enqueue time.
    pub(crate) regions: Vec<RegionBuffer>,

    /// Committed registrations: handle → slot metadata.
    pub(crate) registers: foldhash::HashMap<Region, RegisterInfo>,

    /// Slot index → index into `regions`. Append-only within a run.
    pub(crate) slots: Vec<usize>,

    /// The slot index the next registration request will claim. Incremented
    /// at request time, not at commit time.
    pub(crate) next_slot: usize,

    /// Registrations requested this superstep, applied in sync phase 3.
    pub(crate) pending_pushes: Vec<PushRequest>,

    /// Deregistrations requested this superstep, applied in sync phase 2
    /// before anything else so a deregister-then-register sequence within
    /// one superstep behaves as two separate supersteps would.
    pub(crate) pending_pops: Vec<PopRequest>,

    /// Inbound message queue assembled at the last sync, in ascending
    /// sender id order.
    pub(crate) in_queue: Vec<SendRequest>,

    /// Index of the next message a receive will dequeue.
    pub(crate) received: usize,

    /// Storage behind `in_queue`'s payload and tag locations.
    pub(crate) send_arena: ByteArena,

    /// Tag size this processor proposes for the next superstep.
    pub(crate) proposed_tag_size: usize,

    /// When this processor's thread entered the run.
    pub(crate) started_at: Instant,
}

impl ProcessorState {
    pub(crate) fn new() -> Self {
        Self {
            regions: Vec::new(),
            registers: foldhash::HashMap::default(),
            slots: Vec::new(),
            next_slot: 0,
            pending_pushes: Vec::new(),
            pending_pops: Vec::new(),
            in_queue: Vec::new(),
            received: 0,
            send_arena: ByteArena::new(),
            proposed_tag_size: 0,
            started_at: Instant::now(),
        }
    }
}

/// One [`ProcessorState`] cell per processor.
///
/// Interior mutability without locking: the superstep protocol guarantees
/// each cell is only ever touched by its owning thread, so handing out
/// `&mut` from `&self` is sound as long as the caller is that thread and
/// does not overlap borrows.
#[derive(Debug)]
pub(crate) struct StateCells {
    cells: Vec<UnsafeCell<ProcessorState>>,
}

// SAFETY: each cell is accessed only by its owning processor's thread; the
// runtime hands out exactly one processor handle per thread.
unsafe impl Sync for StateCells {}

impl StateCells {
    pub(crate) fn new(processors: usize) -> Self {
        Self {
            cells: (0..processors)
                .map(|_| UnsafeCell::new(ProcessorState::new()))
                .collect(),
        }
    }

    /// Exclusive access to `pid`'s state.
    ///
    /// # Safety
    ///
    /// The caller must be the thread that owns `pid`, and must not let the
    /// returned borrow overlap another reference obtained from this cell.
    #[allow(
        clippy::mut_from_ref,
        reason = "owner-thread-only cell; exclusivity is the caller's documented obligation"
    )]
    pub(crate) unsafe fn state_mut(&self, pid: usize) -> &mut ProcessorState {
        // SAFETY: ownership and non-overlap guaranteed by the caller.
        unsafe { &mut *self.cells[pid].get() }
    }

    /// Rebuilds every cell from scratch, dropping all regions and queues.
    pub(crate) fn reset(&mut self) {
        for cell in &mut self.cells {
            *cell.get_mut() = ProcessorState::new();
        }
    }
}

/// Put-buffer arenas, one per processor, kept apart from [`StateCells`]
/// because their sharing profile differs: during sync phase 2 every
/// receiver reads every sender's put arena, while owners leave their own
/// arena untouched until the phase-3 clear. The rest of the per-processor
/// state never crosses threads at all.
#[derive(Debug)]
pub(crate) struct ArenaCells {
    cells: Vec<UnsafeCell<ByteArena>>,
}

// SAFETY: owner-exclusive mutation and cross-thread shared reads are
// separated by the barriers around sync phase 2.
unsafe impl Sync for ArenaCells {}

impl ArenaCells {
    pub(crate) fn new(processors: usize, initial_capacity: usize) -> Self {
        Self {
            cells: (0..processors)
                .map(|_| UnsafeCell::new(ByteArena::with_capacity(initial_capacity)))
                .collect(),
        }
    }

    /// Exclusive access to `pid`'s put arena.
    ///
    /// # Safety
    ///
    /// The caller must be the thread that owns `pid`, calling outside sync
    /// phase 2 (during which peers hold shared references).
    #[allow(
        clippy::mut_from_ref,
        reason = "owner-exclusive outside phase 2; exclusivity is the caller's obligation"
    )]
    pub(crate) unsafe fn arena_mut(&self, pid: usize) -> &mut ByteArena {
        // SAFETY: exclusivity guaranteed by the caller per the contract.
        unsafe { &mut *self.cells[pid].get() }
    }

    /// Shared access to `pid`'s put arena.
    ///
    /// # Safety
    ///
    /// Only valid during sync phase 2, between barriers B and C, while no
    /// thread mutates the arena.
    pub(crate) unsafe fn arena(&self, pid: usize) -> &ByteArena {
        // SAFETY: phase-2 quiescence guaranteed by the caller.
        unsafe { &*self.cells[pid].get() }
    }

    /// Exclusive access to every arena, for between-run resets.
    pub(crate) fn cells_mut(&mut self) -> impl Iterator<Item = &mut ByteArena> {
        self.cells.iter_mut().map(UnsafeCell::get_mut)
    }
}
