//! Delay providers for the bit-banged protocols
//!
//! Every reader takes its delays through [`embedded_hal::delay::DelayNs`], the
//! same seam display and sensor drivers use, so the decoding core never
//! decides how time passes. Settle times and bit periods are far below the
//! scheduler's granularity, so the runtime implementation spins on a
//! monotonic clock instead of sleeping. Spinning blocks the calling thread
//! for the whole delay; callers run it only on the decoder's own thread.

use embedded_hal::delay::DelayNs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Busy-wait delay against [`Instant`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinDelay;

impl SpinDelay {
    /// Spins until `deadline`, returning at once if it already passed
    pub fn until(deadline: Instant) {
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}

impl DelayNs for SpinDelay {
    #[inline]
    fn delay_ns(&mut self, ns: u32) {
        Self::until(Instant::now() + Duration::from_nanos(u64::from(ns)));
    }

    #[inline]
    fn delay_us(&mut self, us: u32) {
        Self::until(Instant::now() + Duration::from_micros(u64::from(us)));
    }
}

/// Delay that returns immediately and remembers what was asked of it.
///
/// Lets simulations and tests check the timing schedule of a frame without
/// spending the time.
#[derive(Debug, Default, Clone)]
pub struct RecordedDelay {
    delays_ns: Vec<u64>,
}

impl RecordedDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested delays in whole microseconds
    pub fn delays(&self) -> Vec<u32> {
        self.delays_ns
            .iter()
            .map(|&ns| u32::try_from(ns / 1_000).unwrap_or(u32::MAX))
            .collect()
    }

    pub fn delays_ns(&self) -> &[u64] {
        &self.delays_ns
    }

    pub fn total_us(&self) -> u64 {
        self.delays_ns.iter().sum::<u64>() / 1_000
    }

    pub fn clear(&mut self) {
        self.delays_ns.clear();
    }
}

impl DelayNs for RecordedDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.delays_ns.push(u64::from(ns));
    }

    // Recorded as one entry; the default splits long waits into chunks
    fn delay_us(&mut self, us: u32) {
        self.delays_ns.push(u64::from(us) * 1_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delays_ns.push(u64::from(ms) * 1_000_000);
    }
}

/// Simulated clock that only moves when a delay is requested.
///
/// Clones share the same time, so a simulated bus can read the instant a
/// reader has waited up to.
#[derive(Debug, Default, Clone)]
pub struct VirtualClock {
    now_ns: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::Acquire)
    }

    pub fn advance_ns(&self, ns: u64) {
        self.now_ns.fetch_add(ns, Ordering::AcqRel);
    }
}

impl DelayNs for VirtualClock {
    fn delay_ns(&mut self, ns: u32) {
        self.advance_ns(u64::from(ns));
    }

    fn delay_us(&mut self, us: u32) {
        self.advance_ns(u64::from(us) * 1_000);
    }
}
