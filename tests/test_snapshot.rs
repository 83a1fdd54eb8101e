use solax_bridge::snapshot::TelemetryStore;
use solax_bridge::solax::telemetry::{self, UnitTelemetry};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const PUBLISHES: i32 = 2000;

fn bank(cycle: i32) -> Vec<UnitTelemetry> {
    (1..=(cycle % 4) + 1)
        .map(|position| UnitTelemetry {
            parallel_num: position,
            ac_output_active_power: cycle,
            ..Default::default()
        })
        .collect()
}

#[test]
fn readers_never_see_mixed_snapshots() {
    let store = TelemetryStore::new();
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let mut last_sequence = 0;
                let mut reads = 0u64;
                while !done.load(Ordering::Acquire) {
                    let snapshot = store.load();
                    assert!(snapshot.sequence >= last_sequence);
                    last_sequence = snapshot.sequence;

                    if snapshot.sequence == 0 {
                        assert!(snapshot.units.is_empty());
                        continue;
                    }

                    // summary and unit list must come from the same cycle
                    let cycle = snapshot.aggregated.ac_power as i32 / snapshot.units.len() as i32;
                    assert_eq!(snapshot.units, bank(cycle));
                    assert_eq!(snapshot.aggregated, telemetry::aggregate(&snapshot.units));
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    for cycle in 1..=PUBLISHES {
        let units = bank(cycle);
        store.publish(telemetry::aggregate(&units), units);
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        reader.join().expect("reader panicked");
    }

    let last = store.load();
    assert_eq!(last.sequence, PUBLISHES as u64);
    assert_eq!(last.units, bank(PUBLISHES));
}
