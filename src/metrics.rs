#[cfg(feature = "metrics")]
mod imp {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use tracing::info;

    // Connection lifecycle (cumulative counts)
    static ACCEPTED: AtomicU64 = AtomicU64::new(0);
    static BUSY_REJECTED: AtomicU64 = AtomicU64::new(0);
    static EVICTED: AtomicU64 = AtomicU64::new(0);
    // Backpressure
    static QUEUE_REJECTED: AtomicU64 = AtomicU64::new(0);
    // Responses by class
    static RESP_2XX: AtomicU64 = AtomicU64::new(0);
    static RESP_4XX: AtomicU64 = AtomicU64::new(0);
    static RESP_5XX: AtomicU64 = AtomicU64::new(0);
    static BYTES_WRITTEN: AtomicU64 = AtomicU64::new(0);

    #[derive(Clone, Copy, Debug, Default)]
    pub struct MetricsSnapshot {
        pub accepted: u64,
        pub busy_rejected: u64,
        pub evicted: u64,
        pub queue_rejected: u64,
        pub resp_2xx: u64,
        pub resp_4xx: u64,
        pub resp_5xx: u64,
        pub bytes_written: u64,
    }

    pub fn inc_accepted() {
        ACCEPTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_busy_rejected() {
        BUSY_REJECTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_evicted() {
        EVICTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_queue_rejected() {
        QUEUE_REJECTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_response(status: u16) {
        let counter = match status {
            200..=299 => &RESP_2XX,
            400..=499 => &RESP_4XX,
            _ => &RESP_5XX,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_written(n: u64) {
        BYTES_WRITTEN.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            accepted: ACCEPTED.load(Ordering::Relaxed),
            busy_rejected: BUSY_REJECTED.load(Ordering::Relaxed),
            evicted: EVICTED.load(Ordering::Relaxed),
            queue_rejected: QUEUE_REJECTED.load(Ordering::Relaxed),
            resp_2xx: RESP_2XX.load(Ordering::Relaxed),
            resp_4xx: RESP_4XX.load(Ordering::Relaxed),
            resp_5xx: RESP_5XX.load(Ordering::Relaxed),
            bytes_written: BYTES_WRITTEN.load(Ordering::Relaxed),
        }
    }

    pub fn spawn_reporter() {
        const INTERVAL_SECS: u64 = 10;
        let spawned = std::thread::Builder::new()
            .name("metrics".into())
            .spawn(|| {
                let mut last = snapshot();
                loop {
                    std::thread::sleep(Duration::from_secs(INTERVAL_SECS));
                    let snap = snapshot();
                    info!(
                        interval_secs = INTERVAL_SECS,
                        accepted = snap.accepted.saturating_sub(last.accepted),
                        busy = snap.busy_rejected.saturating_sub(last.busy_rejected),
                        evicted = snap.evicted.saturating_sub(last.evicted),
                        queue_rejected = snap.queue_rejected.saturating_sub(last.queue_rejected),
                        resp_2xx = snap.resp_2xx.saturating_sub(last.resp_2xx),
                        resp_4xx = snap.resp_4xx.saturating_sub(last.resp_4xx),
                        resp_5xx = snap.resp_5xx.saturating_sub(last.resp_5xx),
                        bytes = snap.bytes_written.saturating_sub(last.bytes_written),
                        "metrics delta"
                    );
                    last = snap;
                }
            });
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "metrics reporter not started");
        }
    }
}

#[cfg(not(feature = "metrics"))]
#[allow(dead_code)]
mod imp {
    #[derive(Clone, Copy, Debug, Default)]
    pub struct MetricsSnapshot {
        pub accepted: u64,
        pub busy_rejected: u64,
        pub evicted: u64,
        pub queue_rejected: u64,
        pub resp_2xx: u64,
        pub resp_4xx: u64,
        pub resp_5xx: u64,
        pub bytes_written: u64,
    }

    pub fn inc_accepted() {}
    pub fn inc_busy_rejected() {}
    pub fn inc_evicted() {}
    pub fn inc_queue_rejected() {}
    pub fn inc_response(_: u16) {}
    pub fn add_bytes_written(_: u64) {}
    pub fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot::default()
    }
    pub fn spawn_reporter() {}
}

pub use imp::*;
