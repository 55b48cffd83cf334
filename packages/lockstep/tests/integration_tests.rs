//! End-to-end superstep scenarios exercising the public API.

use std::num::NonZero;
use std::sync::atomic::{AtomicUsize, Ordering};

use new_zealand::nz;

use lockstep::{RunError, Runtime};

fn u32_of(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes.try_into().unwrap())
}

#[test]
fn rotate_ring_of_four() {
    let mut runtime = Runtime::new(nz!(4));

    runtime
        .run(|p| {
            let procs = p.processor_count().get();

            let slot = p.register(4);
            let id_bytes = (p.id() as u32).to_le_bytes();
            p.region_mut(slot).copy_from_slice(&id_bytes);
            p.sync();

            let own = p.region(slot).to_vec();
            p.put((p.id() + 1) % procs, &own, slot, 0);
            p.sync();

            let received = u32_of(p.region(slot));
            assert_eq!(received as usize, (p.id() + procs - 1) % procs);
        })
        .unwrap();
}

#[test]
fn ring_increment_many_supersteps() {
    const STEPS: u32 = 1_000;

    let mut runtime = Runtime::new(nz!(8));

    runtime
        .run(|p| {
            let procs = p.processor_count().get();
            let next = (p.id() + 1) % procs;

            let slot = p.register(4);
            p.sync();

            for i in 0..STEPS {
                let own = p.region(slot).to_vec();
                p.put(next, &own, slot, 0);
                p.sync();

                assert_eq!(u32_of(p.region(slot)), i);
                p.region_mut(slot)
                    .copy_from_slice(&(i + 1).to_le_bytes());
            }

            assert_eq!(u32_of(p.region(slot)), STEPS);
        })
        .unwrap();
}

#[test]
fn tagged_message_fanout() {
    let mut runtime = Runtime::new(nz!(3));

    runtime
        .run(|p| {
            assert_eq!(p.set_tag_size(4), 0);
            p.sync();

            if p.id() == 0 {
                p.send(1, &1_u32.to_le_bytes(), b"a");
                p.send(1, &2_u32.to_le_bytes(), b"bb");
                p.send(1, &3_u32.to_le_bytes(), b"ccc");
            }
            p.sync();

            if p.id() == 1 {
                let stats = p.incoming();
                assert_eq!(stats.messages, 3);
                assert_eq!(stats.payload_bytes, 6);

                for expected_tag in 1..=3_u32 {
                    let mut tag = [0_u8; 4];
                    let payload_len = p.peek_tag(&mut tag).unwrap();
                    assert_eq!(u32_of(&tag), expected_tag);
                    assert_eq!(payload_len, expected_tag as usize);

                    let mut payload = [0_u8; 8];
                    let copied = p.receive(&mut payload).unwrap();
                    assert_eq!(copied, expected_tag as usize);
                }

                // The queue is drained now.
                assert_eq!(p.receive(&mut [0_u8; 8]), None);
            }
        })
        .unwrap();
}

#[test]
fn sends_deliver_in_ascending_sender_order() {
    let mut runtime = Runtime::new(nz!(4));

    runtime
        .run(|p| {
            assert_eq!(p.set_tag_size(1), 0);
            p.sync();

            if p.id() != 0 {
                // Everyone but processor 0 sends it two messages.
                let tag = [p.id() as u8];
                p.send(0, &tag, &[p.id() as u8, 1]);
                p.send(0, &tag, &[p.id() as u8, 2]);
            }
            p.sync();

            if p.id() == 0 {
                assert_eq!(p.incoming().messages, 6);

                // Ascending sender id, enqueue order within a sender.
                for sender in 1..4_u8 {
                    for ordinal in 1..=2_u8 {
                        let mut payload = [0_u8; 2];
                        assert_eq!(p.receive(&mut payload), Some(2));
                        assert_eq!(payload, [sender, ordinal]);
                    }
                }
            }
        })
        .unwrap();
}

#[test]
fn get_with_offset() {
    let mut runtime = Runtime::new(nz!(2));

    runtime
        .run(|p| {
            let source = p.register(16);
            let scratch = p.register(8);

            if p.id() == 0 {
                let mut bytes = Vec::new();
                for value in [10_u32, 20, 30, 40] {
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
                p.region_mut(source).copy_from_slice(&bytes);
            }
            p.sync();

            if p.id() == 1 {
                // Two values starting at element 1 of processor 0's buffer.
                p.get(0, source, 4, scratch, 0, 8);
            }
            p.sync();

            if p.id() == 1 {
                assert_eq!(u32_of(&p.region(scratch)[0..4]), 20);
                assert_eq!(u32_of(&p.region(scratch)[4..8]), 30);
            }
        })
        .unwrap();
}

#[test]
fn get_matches_symmetric_put_one_superstep_later() {
    let mut runtime = Runtime::new(nz!(2));

    runtime
        .run(|p| {
            let value = p.register(4);
            let via_get = p.register(4);
            let via_put = p.register(4);

            if p.id() == 0 {
                p.region_mut(value).copy_from_slice(&99_u32.to_le_bytes());
            }
            p.sync();

            if p.id() == 1 {
                p.get(0, value, 0, via_get, 0, 4);
            }
            if p.id() == 0 {
                let own = p.region(value).to_vec();
                p.put(1, &own, via_put, 0);
            }
            p.sync();

            if p.id() == 1 {
                assert_eq!(u32_of(p.region(via_get)), 99);
                assert_eq!(u32_of(p.region(via_put)), 99);
            }
        })
        .unwrap();
}

#[test]
fn first_enqueued_put_wins() {
    let mut runtime = Runtime::new(nz!(2));

    runtime
        .run(|p| {
            let slot = p.register(4);
            p.sync();

            if p.id() == 0 {
                p.put(1, &1_u32.to_le_bytes(), slot, 0);
                p.put(1, &2_u32.to_le_bytes(), slot, 0);
            }
            p.sync();

            if p.id() == 1 {
                assert_eq!(u32_of(p.region(slot)), 1);
            }
        })
        .unwrap();
}

#[test]
fn zero_length_put_is_a_no_op() {
    let mut runtime = Runtime::new(nz!(2));

    runtime
        .run(|p| {
            let slot = p.register(4);
            p.region_mut(slot).copy_from_slice(&[5, 6, 7, 8]);
            p.sync();

            if p.id() == 0 {
                p.put(1, &[], slot, 0);
            }
            p.sync();

            assert_eq!(p.region(slot), [5, 6, 7, 8]);
        })
        .unwrap();
}

#[test]
fn empty_queue_boundary_behavior() {
    let mut runtime = Runtime::new(nz!(2));

    runtime
        .run(|p| {
            p.sync();

            assert_eq!(p.incoming().messages, 0);
            assert_eq!(p.incoming().payload_bytes, 0);

            let mut buffer = [0xFF_u8; 4];
            assert_eq!(p.receive(&mut buffer), None);
            assert_eq!(buffer, [0xFF; 4], "receive on empty queue must not write");

            assert_eq!(p.peek_tag(&mut []), None);
        })
        .unwrap();
}

#[test]
fn deregister_then_register_within_one_superstep() {
    let mut runtime = Runtime::new(nz!(2));

    runtime
        .run(|p| {
            let first = p.register(4);
            p.sync();

            // Operations against the old slot land even though the slot is
            // replaced in the same superstep.
            p.put(p.id() ^ 1, &11_u32.to_le_bytes(), first, 0);
            p.deregister(first);
            let second = p.register(4);
            p.sync();

            assert_eq!(u32_of(p.region(first)), 11);

            // The replacement occupies the next slot and is fully usable.
            p.put(p.id() ^ 1, &22_u32.to_le_bytes(), second, 0);
            p.sync();

            assert_eq!(u32_of(p.region(second)), 22);
        })
        .unwrap();
}

#[test]
fn registration_round_trip_leaves_table_unchanged() {
    let mut runtime = Runtime::new(nz!(2));

    runtime
        .run(|p| {
            let transient = p.register(4);
            p.sync();

            p.deregister(transient);
            p.sync();

            // The table is back to its initial state: fresh registrations
            // still align across processors and communication works.
            let durable = p.register(4);
            p.sync();

            p.put(p.id() ^ 1, &77_u32.to_le_bytes(), durable, 0);
            p.sync();

            assert_eq!(u32_of(p.region(durable)), 77);
        })
        .unwrap();
}

#[test]
fn abort_propagates_without_deadlock() {
    let mut runtime = Runtime::new(nz!(4));
    let supersteps_reached = AtomicUsize::new(0);

    let result = runtime.run(|p| {
        p.sync();
        p.sync();
        supersteps_reached.fetch_add(1, Ordering::SeqCst);

        if p.id() == 2 {
            p.abort("processor 2 gave up");
        }

        // Everyone else blocks here until the abort releases them.
        p.sync();
        unreachable!("no processor may pass the aborted barrier");
    });

    assert_eq!(supersteps_reached.load(Ordering::SeqCst), 4);
    match result {
        Err(RunError::Aborted { message }) => {
            assert_eq!(message, "processor 2 gave up");
        }
        other => panic!("expected an abort, got {other:?}"),
    }
}

#[test]
fn elapsed_is_non_decreasing() {
    let mut runtime = Runtime::new(nz!(2));

    runtime
        .run(|p| {
            let first = p.elapsed();
            p.sync();
            let second = p.elapsed();

            assert!(second >= first);
        })
        .unwrap();
}

#[test]
fn queue_counts_match_sends_of_previous_superstep() {
    let mut runtime = Runtime::new(nz!(3));

    runtime
        .run(|p| {
            let procs = p.processor_count().get();

            p.sync();

            // Superstep S: everyone sends one empty-tagged message to each
            // peer. Superstep S+1: everyone holds procs - 1 messages.
            for peer in 0..procs {
                if peer != p.id() {
                    p.send(peer, &[], &[p.id() as u8]);
                }
            }
            p.sync();

            assert_eq!(p.incoming().messages, procs - 1);
            assert_eq!(p.incoming().payload_bytes, procs - 1);
        })
        .unwrap();
}

#[test]
fn larger_runtime_from_hardware_hint() {
    // The pre-run hint is at least one and a runtime built from it works.
    let hint = Runtime::available_processors();
    assert!(hint.get() >= 1);

    let capped = NonZero::new(hint.get().min(4)).unwrap();
    let mut runtime = Runtime::new(capped);

    runtime
        .run(|p| {
            p.sync();
        })
        .unwrap();
}
