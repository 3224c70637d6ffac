//! Benchmark: timer list churn shaped like the event loop's use of it.
//! Every connection is touched repeatedly (modify), a tick sweeps the expired
//! prefix, and closed connections are deleted.

use std::hint::black_box;
use std::time::{Duration, Instant};

use tinyserve::timer::{TimerId, TimerList};

const CONNECTIONS: usize = 10_000;
const IDLE: Duration = Duration::from_secs(15);

fn main() {
    let mut list = TimerList::with_capacity(CONNECTIONS);
    let base = Instant::now();
    let mut ids: Vec<Option<TimerId>> = (0..CONNECTIONS)
        .map(|i| Some(list.add(base + IDLE + Duration::from_micros(i as u64), i)))
        .collect();

    let start = Instant::now();
    const TARGET_DURATION: Duration = Duration::from_secs(2);
    let mut touches: u64 = 0;
    let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut clock = base;

    while start.elapsed() < TARGET_DURATION {
        seed = seed
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let i = (seed >> 33) as usize % CONNECTIONS;
        clock += Duration::from_micros(10);

        match ids[i].take() {
            Some(id) if seed & 0xff == 0 => {
                black_box(list.delete(id));
            }
            Some(id) => {
                list.modify(&id, clock + IDLE);
                ids[i] = Some(id);
            }
            None => ids[i] = Some(list.add(clock + IDLE, i)),
        }
        touches += 1;
    }
    let elapsed = start.elapsed();

    let swept_at = clock + IDLE / 2;
    let sweep_start = Instant::now();
    let evicted = list.sweep(swept_at, |payload| {
        black_box(payload);
    });

    eprintln!(
        "timer churn: {} ops in {:?}  {:.0} ops/s  ({} live)",
        touches,
        elapsed,
        touches as f64 / elapsed.as_secs_f64(),
        list.len()
    );
    eprintln!(
        "sweep: evicted {} in {:?}",
        evicted,
        sweep_start.elapsed()
    );
}
