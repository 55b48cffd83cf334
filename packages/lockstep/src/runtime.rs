//! The superstep coordinator.

use std::any::type_name;
use std::num::NonZero;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use std::{fmt, thread};

use new_zealand::nz;
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::arena::ByteArena;
use crate::barrier::{MixedBarrier, WaitOutcome};
use crate::errors::{AbortSignal, RunError, panic_message};
use crate::grid::PairGrid;
use crate::processor::Processor;
use crate::requests::{GetRequest, PutRequest, SendRequest};
use crate::state::{ArenaCells, StateCells};

/// Initial capacity of each put-buffer arena, sized so that typical
/// supersteps never reallocate mid-phase.
const PUT_ARENA_INITIAL_CAPACITY: usize = 8 * 1024;

/// The superstep coordinator for one group of logical processors.
///
/// A `Runtime` is created once with a fixed processor count and can host
/// any number of consecutive runs. Each [`run`][Self::run] performs one
/// full BSP cycle: it spawns P−1 worker threads, executes the entry
/// closure on every processor (the calling thread doubles as processor 0),
/// drains with a final barrier and joins the workers before returning.
///
/// All communication state is indexed by processor id. Cross-thread access
/// follows the four-barrier superstep protocol implemented in
/// [`sync`][Self::sync]; see the individual phase methods for the exact
/// ownership windows.
pub struct Runtime {
    processors: NonZero<usize>,
    barrier: MixedBarrier,

    pub(crate) states: StateCells,
    pub(crate) put_arenas: ArenaCells,

    /// Queued one-sided writes, cell (sender, receiver).
    pub(crate) put_requests: PairGrid<Vec<PutRequest>>,

    /// Queued one-sided reads, cell (requester, holder).
    pub(crate) get_requests: PairGrid<Vec<GetRequest>>,

    /// Staged messages and their backing bytes, cell (sender, receiver).
    pub(crate) tmp_send_requests: PairGrid<Vec<SendRequest>>,
    pub(crate) tmp_send_arenas: PairGrid<ByteArena>,

    /// The committed, cluster-uniform tag size.
    pub(crate) tag_size: AtomicUsize,

    abort: AtomicBool,
    failure: Mutex<Option<RunError>>,
    ended: AtomicBool,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("processors", &self.processors)
            .field("ended", &self.ended.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Creates a runtime for `processors` logical processors.
    #[must_use]
    pub fn new(processors: NonZero<usize>) -> Self {
        let procs = processors.get();

        Self {
            processors,
            barrier: MixedBarrier::new(processors),
            states: StateCells::new(procs),
            put_arenas: ArenaCells::new(procs, PUT_ARENA_INITIAL_CAPACITY),
            put_requests: PairGrid::new(procs),
            get_requests: PairGrid::new(procs),
            tmp_send_requests: PairGrid::new(procs),
            tmp_send_arenas: PairGrid::new(procs),
            tag_size: AtomicUsize::new(0),
            abort: AtomicBool::new(false),
            failure: Mutex::new(None),
            ended: AtomicBool::new(true),
        }
    }

    /// The hardware concurrency hint: how many processors a runtime created
    /// with [`Default`] would use.
    #[must_use]
    pub fn available_processors() -> NonZero<usize> {
        thread::available_parallelism().unwrap_or(nz!(1))
    }

    /// The configured number of logical processors.
    #[must_use]
    pub fn processor_count(&self) -> NonZero<usize> {
        self.processors
    }

    /// Whether the runtime is between runs. True from creation until the
    /// first [`run`][Self::run] begins, and again after each run ends.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Executes one full BSP cycle of `entry` across all processors.
    ///
    /// The entry closure is invoked once per processor, each invocation on
    /// its own thread with its own [`Processor`] handle; the calling thread
    /// runs processor 0. The call returns once every processor has finished
    /// and all workers are joined.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Aborted`] if any processor called
    /// [`Processor::abort`], or [`RunError::ProcessorPanicked`] if entry
    /// code panicked. In both cases every processor has unwound and all
    /// queued operations of the failing superstep were discarded.
    pub fn run<F>(&mut self, entry: F) -> Result<(), RunError>
    where
        F: Fn(&mut Processor<'_>) + Sync,
    {
        self.reset_for_run();

        let this = &*self;
        let procs = this.processors.get();
        debug!(processors = procs, "BSP run starting");

        thread::scope(|scope| {
            for pid in 1..procs {
                let entry = &entry;
                thread::Builder::new()
                    .name(format!("lockstep-p{pid}"))
                    .spawn_scoped(scope, move || this.processor_main(pid, entry))
                    .expect(
                        "failed to spawn worker thread: thread spawning failure is not supported",
                    );
            }

            this.processor_main(0, &entry);
        });

        self.ended.store(true, Ordering::Release);
        debug!(processors = procs, "BSP run ended");

        match self.failure.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Entry point of each processor's thread, processor 0 included.
    #[cfg_attr(test, mutants::skip)] // Removing the panic trap deadlocks whole-run tests.
    fn processor_main<F>(&self, pid: usize, entry: &F)
    where
        F: Fn(&mut Processor<'_>) + Sync,
    {
        // SAFETY: this thread is the exclusive owner of `pid`'s cell.
        unsafe { self.states.state_mut(pid) }.started_at = Instant::now();

        if pid != 0 {
            debug!(pid, "worker thread started");
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut processor = Processor::new(self, pid);
            entry(&mut processor);
        }));

        match outcome {
            Ok(()) => {
                // Final drain: one barrier so no processor tears down while
                // a peer still runs. An abort observed here needs no further
                // propagation; the run is already failing.
                let _ = self.sync_point();
            }
            Err(payload) => {
                if payload.downcast_ref::<AbortSignal>().is_none() {
                    // A plain panic in entry code. Record it and release
                    // every peer blocked in the barrier; continuing the
                    // superstep protocol without this processor would
                    // deadlock them.
                    let message = panic_message(payload.as_ref());
                    error!(pid, message = message.as_str(), "processor entry panicked");
                    self.fail(RunError::ProcessorPanicked { pid, message });
                }
            }
        }

        if pid != 0 {
            debug!(pid, "worker thread exiting");
        }
    }

    /// Records the run's failure (first writer wins) and releases every
    /// processor blocked in the barrier.
    fn fail(&self, error: RunError) {
        {
            let mut slot = self.failure.lock();
            if slot.is_none() {
                *slot = Some(error);
            }
        }

        // Release pairs with the Acquire checks in barrier waits.
        self.abort.store(true, Ordering::Release);
        self.barrier.wake_all();
    }

    /// Aborts the run on behalf of `pid` and unwinds the calling thread.
    pub(crate) fn abort_run(&self, pid: usize, message: String) -> ! {
        error!(pid, message = message.as_str(), "BSP run aborted");
        self.fail(RunError::Aborted { message });
        panic::panic_any(AbortSignal);
    }

    fn sync_point(&self) -> WaitOutcome {
        self.barrier.wait(&self.abort)
    }

    /// Waits at a barrier, unwinding with the abort signal if the run is
    /// aborting, so the unwind reaches the worker root without re-entering
    /// user code.
    fn sync_point_or_unwind(&self) {
        if self.sync_point() == WaitOutcome::Aborted {
            panic::panic_any(AbortSignal);
        }
    }

    /// The four-barrier superstep protocol.
    ///
    /// Barrier A fences all enqueuing. Phase 1 turns inbound gets into
    /// puts. Barrier B fences the synthesized traffic. Phase 2 applies
    /// pops, assembles the inbound message queue and applies puts. Barrier
    /// C fences all cross-thread arena reads. Phase 3 clears the put arena
    /// and commits registrations. Barrier D makes everything visible before
    /// the next computation phase.
    pub(crate) fn sync(&self, pid: usize) {
        trace!(pid, "entering superstep sync");

        self.sync_point_or_unwind(); // A

        if pid == 0 {
            self.commit_tag_size();
        }

        self.translate_get_requests(pid);

        self.sync_point_or_unwind(); // B

        self.apply_pop_requests(pid);
        self.assemble_in_queue(pid);
        self.apply_put_requests(pid);

        self.sync_point_or_unwind(); // C

        // SAFETY: every phase-2 reader of this arena is past barrier C.
        unsafe { self.put_arenas.arena_mut(pid) }.clear();

        self.apply_push_requests(pid);

        self.sync_point_or_unwind(); // D
    }

    /// Adopts processor 0's proposed tag size as the cluster-wide value.
    /// The user contract requires all processors to propose the same value
    /// in the same superstep; nothing is verified.
    fn commit_tag_size(&self) {
        // SAFETY: called by processor 0 on its own cell.
        let proposed = unsafe { self.states.state_mut(0) }.proposed_tag_size;

        if proposed != self.tag_size.load(Ordering::Relaxed) {
            // Release pairs with the Acquire load in send enqueues, which
            // only happen on the far side of barrier D.
            self.tag_size.store(proposed, Ordering::Release);
        }
    }

    /// Phase 1: the holder turns each inbound get into an outbound put
    /// whose payload is staged in the holder's own put arena.
    fn translate_get_requests(&self, pid: usize) {
        for requester in 0..self.processors.get() {
            // SAFETY: past barrier A the holder exclusively owns its
            // inbound get cells until the requests are drained.
            let queue = unsafe { self.get_requests.inbound(requester, pid) };
            if queue.is_empty() {
                continue;
            }

            // Reverse order, mirroring the receiver's reverse application
            // pass over the synthesized puts.
            for request in queue.drain(..).rev() {
                // SAFETY: the holder reads its own slot table and region
                // bytes; nothing mutates them during this phase.
                let state = unsafe { self.states.state_mut(pid) };
                let region_index = state.slots[request.src_slot.0];
                let buffer = &state.regions[region_index];
                debug_assert!(
                    request.src_offset + request.len <= buffer.len(),
                    "get source range exceeds the registered region"
                );

                // SAFETY: no exclusive reference to these bytes is live.
                let bytes = unsafe { buffer.as_slice() };
                let bytes = &bytes[request.src_offset..request.src_offset + request.len];

                // SAFETY: the holder owns its put arena outside phase 2.
                let payload = unsafe { self.put_arenas.arena_mut(pid) }.alloc(bytes);

                // SAFETY: the holder is this cell's writer until barrier B.
                let puts = unsafe { self.put_requests.outbound(pid, requester) };
                puts.push(PutRequest {
                    payload,
                    dst_slot: request.dst_slot,
                    dst_offset: request.dst_offset,
                    len: request.len,
                });
            }
        }
    }

    /// Phase 2, step 1: erase deregistered entries from the table. Runs
    /// before registrations commit so a deregister-and-re-register within
    /// one superstep behaves like two consecutive supersteps.
    fn apply_pop_requests(&self, pid: usize) {
        // SAFETY: own cell.
        let state = unsafe { self.states.state_mut(pid) };

        for pop in &state.pending_pops {
            state.registers.remove(&pop.region);
        }
        state.pending_pops.clear();
    }

    /// Phase 2, step 2: concatenate all inbound temp send arenas into this
    /// processor's send arena, in ascending sender id order, re-homing each
    /// staged message by the running offset.
    fn assemble_in_queue(&self, pid: usize) {
        // SAFETY: own cell.
        let state = unsafe { self.states.state_mut(pid) };
        state.in_queue.clear();
        state.received = 0;
        state.send_arena.clear();

        let mut offset = 0_usize;
        for sender in 0..self.processors.get() {
            // SAFETY: past barrier A the receiver owns its inbound temp
            // send cells; senders touch them again only after barrier D.
            let queue = unsafe { self.tmp_send_requests.inbound(sender, pid) };
            if queue.is_empty() {
                continue;
            }

            for mut request in queue.drain(..) {
                request.payload = request.payload.offset_by(offset);
                request.tag = request.tag.offset_by(offset);
                state.in_queue.push(request);
            }

            // SAFETY: same ownership window as the request cell.
            let arena = unsafe { self.tmp_send_arenas.inbound(sender, pid) };
            offset += arena.len();
            state.send_arena.merge(arena);
        }
    }

    /// Phase 2, step 3: apply inbound puts. Requests from one sender are
    /// applied in reverse enqueue order so that the earliest put to a byte
    /// range is written last and therefore wins.
    fn apply_put_requests(&self, pid: usize) {
        for sender in 0..self.processors.get() {
            // SAFETY: past barrier B the receiver owns its inbound put
            // cells.
            let queue = unsafe { self.put_requests.inbound(sender, pid) };
            if queue.is_empty() {
                continue;
            }

            // SAFETY: between barriers B and C nobody mutates put arenas;
            // this is the documented shared-read window.
            let arena = unsafe { self.put_arenas.arena(sender) };

            for request in queue.drain(..).rev() {
                // SAFETY: the receiver owns its state cell.
                let state = unsafe { self.states.state_mut(pid) };
                let region_index = state.slots[request.dst_slot.0];
                let buffer = &state.regions[region_index];
                debug_assert!(
                    request.dst_offset + request.len <= buffer.len(),
                    "put destination range exceeds the registered region"
                );

                // SAFETY: receiver-owned bytes; user borrows cannot outlive
                // the `&mut` sync call that got us here.
                let dst = unsafe { buffer.as_mut_slice() };
                arena.extract(
                    request.payload,
                    &mut dst[request.dst_offset..request.dst_offset + request.len],
                );
            }
        }
    }

    /// Phase 3: commit registrations requested this superstep. Slot
    /// indices were assigned at request time; applying in request order
    /// keeps the slot table dense.
    fn apply_push_requests(&self, pid: usize) {
        // SAFETY: own cell.
        let state = unsafe { self.states.state_mut(pid) };

        for push in &state.pending_pushes {
            debug_assert_eq!(state.slots.len(), push.info.slot.0);

            state.registers.insert(push.region, push.info);
            state.slots.push(push.region.index);
        }
        state.pending_pushes.clear();
    }

    /// Returns the runtime to a pristine state before a run begins.
    fn reset_for_run(&mut self) {
        self.barrier = MixedBarrier::new(self.processors);
        self.states.reset();

        for arena in self.put_arenas.cells_mut() {
            arena.clear();
        }
        for queue in self.put_requests.cells_mut() {
            queue.clear();
        }
        for queue in self.get_requests.cells_mut() {
            queue.clear();
        }
        for queue in self.tmp_send_requests.cells_mut() {
            queue.clear();
        }
        for arena in self.tmp_send_arenas.cells_mut() {
            arena.clear();
        }

        self.tag_size.store(0, Ordering::Release);
        self.abort.store(false, Ordering::Release);
        *self.failure.get_mut() = None;
        self.ended.store(false, Ordering::Release);
    }
}

impl Default for Runtime {
    /// Creates a runtime with one logical processor per hardware processor.
    fn default() -> Self {
        Self::new(Self::available_processors())
    }
}
