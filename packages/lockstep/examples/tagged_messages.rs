//! Fan tagged messages into one processor and drain them in order.

use std::num::NonZero;

use lockstep::Runtime;

const COLLECTOR: usize = 0;

fn main() {
    let processors = NonZero::new(4).unwrap();
    let mut runtime = Runtime::new(processors);

    runtime
        .run(|p| {
            // Tags carry the sender id as a little-endian u32.
            p.set_tag_size(4);
            p.sync();

            if p.id() != COLLECTOR {
                let tag = (p.id() as u32).to_le_bytes();
                let payload = format!("greetings from processor {}", p.id());
                p.send(COLLECTOR, &tag, payload.as_bytes());
            }
            p.sync();

            if p.id() == COLLECTOR {
                let stats = p.incoming();
                println!(
                    "collector received {} messages, {} payload bytes",
                    stats.messages, stats.payload_bytes
                );

                let mut tag = [0_u8; 4];
                while let Some(payload_len) = p.peek_tag(&mut tag) {
                    let mut payload = vec![0_u8; payload_len];
                    p.receive(&mut payload);

                    let sender = u32::from_le_bytes(tag);
                    println!(
                        "tag {sender}: {}",
                        String::from_utf8_lossy(&payload)
                    );
                }
            }
        })
        .unwrap();
}
