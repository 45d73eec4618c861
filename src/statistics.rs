use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// The type of information passed to the statistics instance.
#[derive(Debug, Clone, Copy)]
pub enum Stats {
    ReceivedBytes(usize),
    SendBytes(usize),
    ReceivedPkts(usize),
    SendPkts(usize),
    DroppedPkts(usize),
}

#[derive(Debug, Default)]
pub struct Count(AtomicUsize);

impl Count {
    pub fn add(&self, value: usize) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Process-wide packet and byte counters, shared by every socket task.
#[derive(Debug, Default)]
pub struct Counts {
    pub received_bytes: Count,
    pub send_bytes: Count,
    pub received_pkts: Count,
    pub send_pkts: Count,
    pub dropped_pkts: Count,
}

/// worker cluster statistics
///
/// # Example
///
/// ```
/// use tunnel_server::statistics::*;
///
/// let statistics = Statistics::default();
///
/// statistics.add(Stats::ReceivedBytes(100));
/// statistics.add(Stats::ReceivedPkts(1));
///
/// assert_eq!(statistics.counts().received_bytes.get(), 100);
/// assert_eq!(statistics.counts().received_pkts.get(), 1);
/// assert_eq!(statistics.counts().send_pkts.get(), 0);
/// ```
#[derive(Default, Clone)]
pub struct Statistics(Arc<Counts>);

impl Statistics {
    pub fn add(&self, report: Stats) {
        match report {
            Stats::ReceivedBytes(value) => self.0.received_bytes.add(value),
            Stats::SendBytes(value) => self.0.send_bytes.add(value),
            Stats::ReceivedPkts(value) => self.0.received_pkts.add(value),
            Stats::SendPkts(value) => self.0.send_pkts.add(value),
            Stats::DroppedPkts(value) => self.0.dropped_pkts.add(value),
        }
    }

    pub fn counts(&self) -> &Counts {
        &self.0
    }
}
