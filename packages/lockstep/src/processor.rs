//! The per-thread processor context.

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::region::{Region, RegionBuffer};
use crate::requests::{
    GetRequest, PopRequest, PushRequest, PutRequest, RegisterInfo, SendRequest, SlotIndex,
};
use crate::runtime::Runtime;
use crate::state::ProcessorState;

/// Pending inbound message statistics, as reported by
/// [`Processor::incoming`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct QueueStats {
    /// Messages delivered to this processor at the last sync.
    pub messages: usize,

    /// Their accumulated payload size in bytes.
    pub payload_bytes: usize,
}

/// One logical processor's view of the runtime.
///
/// Exactly one handle exists per processor per run, created by the runtime
/// and passed to the entry closure on the processor's own thread. The
/// handle is `!Send`: a processor's state belongs to the thread it was
/// bound to.
///
/// All communication operations are pure enqueues that take effect at the
/// next [`sync`][Self::sync]; only `sync` blocks.
pub struct Processor<'rt> {
    runtime: &'rt Runtime,
    pid: usize,
    _not_send: PhantomData<*const ()>,
}

impl fmt::Debug for Processor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl<'rt> Processor<'rt> {
    pub(crate) fn new(runtime: &'rt Runtime, pid: usize) -> Self {
        Self {
            runtime,
            pid,
            _not_send: PhantomData,
        }
    }

    /// Exclusive access to this processor's own state.
    ///
    /// Sound because the handle is `!Send`, unique per processor, and no
    /// method lets a state-derived borrow escape (region bytes are reached
    /// through their own stable allocations, not through this borrow).
    #[expect(
        clippy::mut_from_ref,
        reason = "owner-thread-only cell; borrows stay method-local"
    )]
    fn state(&self) -> &mut ProcessorState {
        // SAFETY: this thread owns `pid`; borrows stay method-local.
        unsafe { self.runtime.states.state_mut(self.pid) }
    }

    fn register_info(&self, region: Region, operation: &str) -> RegisterInfo {
        assert_eq!(
            region.owner, self.pid,
            "{operation}: region handle belongs to processor {}, used on processor {}",
            region.owner, self.pid
        );

        *self
            .state()
            .registers
            .get(&region)
            .unwrap_or_else(|| panic!("{operation}: region is not registered; sync after register"))
    }

    /// This processor's id, in `[0, processor_count)`.
    #[must_use]
    pub fn id(&self) -> usize {
        self.pid
    }

    /// The number of processors in the run.
    #[must_use]
    pub fn processor_count(&self) -> NonZero<usize> {
        self.runtime.processor_count()
    }

    /// Time elapsed since this processor's thread entered the run, from a
    /// monotonic clock. Non-decreasing between consecutive calls.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.state().started_at.elapsed()
    }

    /// Registers a fresh zero-filled region of `len` bytes and returns its
    /// handle.
    ///
    /// The region occupies the next slot index on this processor. By the
    /// BSP convention, all processors call `register` in the same order so
    /// that slot k resolves to the intended region on every processor; the
    /// runtime does not verify this. The registration becomes visible to
    /// peers at the next [`sync`][Self::sync]; local access through
    /// [`region`][Self::region] and [`region_mut`][Self::region_mut] works
    /// immediately.
    #[must_use]
    pub fn register(&self, len: usize) -> Region {
        let state = self.state();

        let region = Region {
            owner: self.pid,
            index: state.regions.len(),
        };
        state.regions.push(RegionBuffer::zeroed(len));

        let slot = SlotIndex(state.next_slot);
        state.next_slot += 1;

        state.pending_pushes.push(PushRequest {
            region,
            info: RegisterInfo { len, slot },
        });

        region
    }

    /// Deregisters a region at the next [`sync`][Self::sync].
    ///
    /// Deregistrations apply before the same superstep's registrations, so
    /// deregistering and registering within one superstep is valid. The
    /// backing bytes stay alive for the rest of the run: operations already
    /// queued against the old slot still land.
    pub fn deregister(&self, region: Region) {
        assert_eq!(
            region.owner, self.pid,
            "deregister: region handle belongs to processor {}, used on processor {}",
            region.owner, self.pid
        );

        self.state().pending_pops.push(PopRequest { region });
    }

    /// This processor's bytes for `region`, for reading.
    #[must_use]
    pub fn region(&self, region: Region) -> &[u8] {
        let buffer = self.buffer(region);

        // SAFETY: only this thread touches these bytes between barriers,
        // and all mutation goes through `&mut self`, which cannot coexist
        // with the returned borrow.
        unsafe { buffer.as_slice() }
    }

    /// This processor's bytes for `region`, for writing.
    ///
    /// Taking `&mut self` guarantees the borrow ends before the next
    /// [`sync`][Self::sync], when remote puts may rewrite the bytes.
    #[must_use]
    pub fn region_mut(&mut self, region: Region) -> &mut [u8] {
        let buffer = self.buffer(region);

        // SAFETY: `&mut self` excludes every other borrow of this
        // processor's regions for the slice's lifetime.
        unsafe { buffer.as_mut_slice() }
    }

    fn buffer(&self, region: Region) -> &RegionBuffer {
        assert_eq!(
            region.owner, self.pid,
            "region access: handle belongs to processor {}, used on processor {}",
            region.owner, self.pid
        );

        let state = self.state();
        &state.regions[region.index]
    }

    /// Queues a one-sided write of `src` into processor `dest`'s
    /// counterpart of `dst`, at byte offset `dst_offset`, effective at the
    /// next [`sync`][Self::sync].
    ///
    /// `dst` is this processor's own handle naming the slot; the write
    /// lands in whatever region occupies the same slot on `dest`. When the
    /// same byte range is written twice in one superstep by the same
    /// sender, the first enqueued write wins. An empty `src` is a
    /// well-defined no-op.
    pub fn put(&self, dest: usize, src: &[u8], dst: Region, dst_offset: usize) {
        assert!(
            dest < self.processor_count().get(),
            "put: destination processor {dest} out of range"
        );

        let info = self.register_info(dst, "put");
        debug_assert!(
            dst_offset + src.len() <= info.len,
            "put range exceeds the registered region"
        );

        // SAFETY: this processor owns its put arena during computation.
        let payload = unsafe { self.runtime.put_arenas.arena_mut(self.pid) }.alloc(src);

        // SAFETY: this processor is the cell's writer until barrier A.
        let queue = unsafe { self.runtime.put_requests.outbound(self.pid, dest) };
        queue.push(PutRequest {
            payload,
            dst_slot: info.slot,
            dst_offset,
            len: src.len(),
        });
    }

    /// Queues a one-sided read of `len` bytes from processor `holder`'s
    /// counterpart of `src` (at `src_offset`) into this processor's `dst`
    /// region (at `dst_offset`), effective at the next
    /// [`sync`][Self::sync].
    ///
    /// Both handles are this processor's own: `src` names the slot to read
    /// on `holder`, `dst` names where the bytes land locally. The holder
    /// reads its bytes at the barrier, before any of this superstep's puts
    /// are applied.
    pub fn get(
        &self,
        holder: usize,
        src: Region,
        src_offset: usize,
        dst: Region,
        dst_offset: usize,
        len: usize,
    ) {
        assert!(
            holder < self.processor_count().get(),
            "get: holder processor {holder} out of range"
        );

        let src_info = self.register_info(src, "get");
        let dst_info = self.register_info(dst, "get");
        debug_assert!(
            dst_offset + len <= dst_info.len,
            "get destination range exceeds the registered region"
        );

        // SAFETY: this processor is the cell's writer until barrier A.
        let queue = unsafe { self.runtime.get_requests.outbound(self.pid, holder) };
        queue.push(GetRequest {
            src_slot: src_info.slot,
            src_offset,
            dst_slot: dst_info.slot,
            dst_offset,
            len,
        });
    }

    /// Queues a tagged message for processor `dest`, delivered into its
    /// inbound queue at the next [`sync`][Self::sync].
    ///
    /// The tag must be exactly the current tag size long (see
    /// [`set_tag_size`][Self::set_tag_size]). Messages are delivered in
    /// ascending sender id order, and in enqueue order within one sender.
    pub fn send(&self, dest: usize, tag: &[u8], payload: &[u8]) {
        assert!(
            dest < self.processor_count().get(),
            "send: destination processor {dest} out of range"
        );

        let tag_size = self.runtime.tag_size.load(Ordering::Acquire);
        assert_eq!(
            tag.len(),
            tag_size,
            "send: tag length does not match the current tag size"
        );
        debug_assert_eq!(
            self.state().proposed_tag_size,
            tag_size,
            "send issued with a tag re-size pending in the same superstep"
        );

        // SAFETY: this processor is the cell's writer until barrier A.
        let arena = unsafe { self.runtime.tmp_send_arenas.outbound(self.pid, dest) };
        let payload_location = arena.alloc(payload);
        let tag_location = arena.alloc(tag);

        // SAFETY: as above.
        let queue = unsafe { self.runtime.tmp_send_requests.outbound(self.pid, dest) };
        queue.push(SendRequest {
            payload: payload_location,
            payload_len: payload.len(),
            tag: tag_location,
            tag_len: tag.len(),
        });
    }

    /// Dequeues the next pending inbound message, copying up to
    /// `dst.len()` payload bytes into `dst`.
    ///
    /// Returns the number of bytes copied, or `None` when no message is
    /// pending (in which case nothing happens).
    pub fn receive(&self, dst: &mut [u8]) -> Option<usize> {
        let state = self.state();

        let request = *state.in_queue.get(state.received)?;
        state.received += 1;

        let copy_len = dst.len().min(request.payload_len);
        state
            .send_arena
            .extract(request.payload, &mut dst[..copy_len]);

        Some(copy_len)
    }

    /// Peeks at the head of the inbound queue without dequeuing.
    ///
    /// Copies the head message's tag into `tag` and returns its payload
    /// length, or `None` when no message is pending. `tag` must hold at
    /// least the current tag size.
    pub fn peek_tag(&self, tag: &mut [u8]) -> Option<usize> {
        let state = self.state();

        let request = state.in_queue.get(state.received)?;
        debug_assert_eq!(
            request.tag_len,
            self.runtime.tag_size.load(Ordering::Acquire),
            "message tag predates a tag re-size"
        );
        assert!(
            tag.len() >= request.tag_len,
            "peek_tag: tag buffer shorter than the tag size"
        );

        state
            .send_arena
            .extract(request.tag, &mut tag[..request.tag_len]);

        Some(request.payload_len)
    }

    /// The number of messages delivered at the last sync and their
    /// accumulated payload size.
    #[must_use]
    pub fn incoming(&self) -> QueueStats {
        let state = self.state();

        QueueStats {
            messages: state.in_queue.len(),
            payload_bytes: state.in_queue.iter().map(|r| r.payload_len).sum(),
        }
    }

    /// Proposes `len` as the tag size for the next superstep and returns
    /// the currently effective size.
    ///
    /// Processor 0's proposal becomes authoritative at the start of the
    /// next [`sync`][Self::sync]; the user contract requires all
    /// processors to propose the same value in the same superstep. Sends
    /// issued before that sync keep using the old size.
    pub fn set_tag_size(&self, len: usize) -> usize {
        let current = self.runtime.tag_size.load(Ordering::Acquire);
        self.state().proposed_tag_size = len;
        current
    }

    /// Enters the barrier and applies all queued operations of this
    /// superstep, in the globally consistent order described on
    /// [`Runtime`]. Blocks until every processor has called `sync`.
    ///
    /// Taking `&mut self` ends all outstanding region borrows first: the
    /// bytes may be rewritten by inbound puts while this call runs.
    pub fn sync(&mut self) {
        self.runtime.sync(self.pid);
    }

    /// Aborts the whole run with `message`.
    ///
    /// Sets the abort flag, releases every processor blocked in a barrier,
    /// and unwinds this thread. All queued operations of the aborted
    /// superstep are discarded; [`Runtime::run`] reports
    /// [`RunError::Aborted`][crate::RunError::Aborted] with the first
    /// aborter's message.
    pub fn abort(&self, message: impl Into<String>) -> ! {
        self.runtime.abort_run(self.pid, message.into())
    }
}
