use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory activity counters, flushed to the log once a day.
#[derive(Debug, Default)]
pub struct ActivityStats {
    check_ins: AtomicU64,
    check_outs: AtomicU64,
    force_checkouts: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub check_ins: u64,
    pub check_outs: u64,
    pub force_checkouts: u64,
    pub failures: u64,
}

impl ActivityStats {
    pub fn record_check_in(&self) {
        self.check_ins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_check_out(&self) {
        self.check_outs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_force_checkouts(&self, count: u64) {
        self.force_checkouts.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            check_ins: self.check_ins.load(Ordering::Relaxed),
            check_outs: self.check_outs.load(Ordering::Relaxed),
            force_checkouts: self.force_checkouts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Returns the current counts and resets them to zero.
    pub fn take(&self) -> StatsSnapshot {
        StatsSnapshot {
            check_ins: self.check_ins.swap(0, Ordering::Relaxed),
            check_outs: self.check_outs.swap(0, Ordering::Relaxed),
            force_checkouts: self.force_checkouts.swap(0, Ordering::Relaxed),
            failures: self.failures.swap(0, Ordering::Relaxed),
        }
    }

    pub fn flush_to_log(&self) {
        let snapshot = self.take();
        tracing::info!(
            "Daily activity: {} check-ins, {} check-outs, {} forced check-outs, {} failures",
            snapshot.check_ins,
            snapshot.check_outs,
            snapshot.force_checkouts,
            snapshot.failures
        );
    }
}
