//! Queued-operation records exchanged at the barrier.

use crate::arena::ArenaLocation;
use crate::region::Region;

/// Identity of a registration slot.
///
/// The k-th successful registration on every processor names the same
/// logical slot, so a sender can target "slot k of processor q" without
/// knowing anything about q's memory.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SlotIndex(pub(crate) usize);

/// Registration metadata held per region once a registration commits.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RegisterInfo {
    pub(crate) len: usize,
    pub(crate) slot: SlotIndex,
}

/// A queued one-sided write, applied by the receiver during sync phase 2.
///
/// The payload was copied into the sender's put arena at enqueue time; the
/// destination travels as a slot index the receiver resolves against its
/// own slot table.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PutRequest {
    pub(crate) payload: ArenaLocation,
    pub(crate) dst_slot: SlotIndex,
    pub(crate) dst_offset: usize,
    pub(crate) len: usize,
}

/// A queued one-sided read. The holder translates it into a [`PutRequest`]
/// aimed back at the requester during sync phase 1.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GetRequest {
    pub(crate) src_slot: SlotIndex,
    pub(crate) src_offset: usize,
    pub(crate) dst_slot: SlotIndex,
    pub(crate) dst_offset: usize,
    pub(crate) len: usize,
}

/// A staged tagged message.
///
/// Payload and tag bytes live in the (sender, receiver) temp send arena
/// until the receiver re-homes them into its own send arena at sync,
/// shifting both locations by the running concatenation offset.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SendRequest {
    pub(crate) payload: ArenaLocation,
    pub(crate) payload_len: usize,
    pub(crate) tag: ArenaLocation,
    pub(crate) tag_len: usize,
}

/// A pending registration. The slot index was assigned at request time; the
/// table insertion happens during sync phase 3.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PushRequest {
    pub(crate) region: Region,
    pub(crate) info: RegisterInfo,
}

/// A pending deregistration, applied at the start of sync phase 2, before
/// the same superstep's registrations commit.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PopRequest {
    pub(crate) region: Region,
}
