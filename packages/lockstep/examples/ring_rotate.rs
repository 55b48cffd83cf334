//! Rotate a value around a ring of processors, one hop per superstep.

use std::num::NonZero;

use lockstep::Runtime;

fn main() {
    let processors = NonZero::new(4).unwrap();
    let mut runtime = Runtime::new(processors);

    runtime
        .run(|p| {
            let procs = p.processor_count().get();
            let next = (p.id() + 1) % procs;

            let slot = p.register(4);
            let id_bytes = (p.id() as u32).to_le_bytes();
            p.region_mut(slot).copy_from_slice(&id_bytes);
            p.sync();

            for hop in 1..=procs {
                let own = p.region(slot).to_vec();
                p.put(next, &own, slot, 0);
                p.sync();

                let value = u32::from_le_bytes(p.region(slot).try_into().unwrap());
                println!(
                    "processor {} after hop {hop}: holds value {value}",
                    p.id()
                );
            }

            // After a full loop the original value is home again.
            let value = u32::from_le_bytes(p.region(slot).try_into().unwrap());
            assert_eq!(value as usize, p.id());
        })
        .unwrap();
}
