//! Shared-memory Bulk Synchronous Parallel (BSP) superstep runtime.
//!
//! A BSP program is a single closure launched on P logical processors, one
//! thread each, all sharing the process address space. Execution alternates
//! between local computation and global synchronization barriers
//! ("supersteps"): between barriers a processor enqueues one-sided writes
//! ([`Processor::put`]), one-sided reads ([`Processor::get`]), tagged
//! messages ([`Processor::send`]) and registration changes, all of which
//! take effect atomically at the next [`Processor::sync`]. After a sync,
//! every processor observes the post-barrier memory state of every other
//! processor.
//!
//! # Quick start
//!
//! Rotate a value around a ring of four processors:
//!
//! ```rust
//! use std::num::NonZero;
//!
//! use lockstep::Runtime;
//!
//! let mut runtime = Runtime::new(NonZero::new(4).unwrap());
//!
//! runtime
//!     .run(|p| {
//!         let procs = p.processor_count().get();
//!
//!         // All processors register in the same order, so this region is
//!         // slot 0 everywhere.
//!         let slot = p.register(4);
//!         let id_bytes = (p.id() as u32).to_le_bytes();
//!         p.region_mut(slot).copy_from_slice(&id_bytes);
//!         p.sync();
//!
//!         // Write our value into the next processor's slot 0.
//!         let value = p.region(slot).to_vec();
//!         p.put((p.id() + 1) % procs, &value, slot, 0);
//!         p.sync();
//!
//!         let received = u32::from_le_bytes(p.region(slot).try_into().unwrap());
//!         assert_eq!(received as usize, (p.id() + procs - 1) % procs);
//!     })
//!     .unwrap();
//! ```
//!
//! # Key properties
//!
//! - **Deferred effects**: operations issued in superstep S become visible
//!   to every processor in superstep S+1 and never during S.
//! - **Put ordering**: when one sender writes the same bytes twice in one
//!   superstep, the first enqueued write wins at the receiver.
//! - **Message ordering**: sends are delivered in ascending sender id, and
//!   in enqueue order within one sender.
//! - **Abort propagation**: [`Processor::abort`] releases every processor
//!   blocked in a barrier and unwinds the whole run without deadlock.

mod arena;
mod barrier;
mod errors;
mod grid;
mod processor;
mod region;
mod requests;
mod runtime;
mod state;

pub use barrier::{CondvarBarrier, MixedBarrier, WaitOutcome};
pub use errors::RunError;
pub use processor::{Processor, QueueStats};
pub use region::Region;
pub use runtime::Runtime;
