//! Cycle-counter clock and cycle/nanosecond conversion.
//!
//! Ingress code stamps records with [`now_cycles`] (one register read) and
//! consumers convert elapsed cycles to nanoseconds through a calibrated
//! [`CycleClock`]. Calibration happens once, at construction, by measuring
//! the counter against `CLOCK_MONOTONIC` over a fixed interval; the
//! resulting clock value is passed explicitly to whoever needs to convert.
//!
//! On platforms without a usable cycle counter, [`now_cycles`] falls back
//! to the monotonic nanosecond clock and calibration lands at (about)
//! 10^9 cycles per second, so all conversions keep working unchanged.

use std::thread;
use std::time::Duration;

/// Minimum interval measured during [`CycleClock::calibrate`].
const CALIBRATION_INTERVAL: Duration = Duration::from_millis(100);

/// Returns the monotonic clock in nanoseconds.
///
/// Not related to any epoch; only differences are meaningful.
#[inline]
pub fn mono_time_ns() -> u64 {
    clock_gettime_ns(libc::CLOCK_MONOTONIC)
}

/// Returns wall-clock nanoseconds since the Unix epoch.
///
/// Used for stamping `exchange_timestamp`-style fields; latency math goes
/// through cycles instead.
#[inline]
pub fn now_nanos() -> u64 {
    clock_gettime_ns(libc::CLOCK_REALTIME)
}

#[inline]
fn clock_gettime_ns(clock_id: libc::clockid_t) -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(clock_id, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

/// Reads the per-CPU cycle counter.
///
/// `rdtscp` on x86-64 (waits for prior instructions to retire before
/// sampling), `cntvct_el0` on aarch64. Monotonic on a pinned thread.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn now_cycles() -> u64 {
    let low: u32;
    let high: u32;
    unsafe {
        core::arch::asm!(
            "rdtscp",
            out("eax") low,
            out("edx") high,
            out("ecx") _,
            options(nomem, nostack, preserves_flags),
        );
    }
    ((high as u64) << 32) | (low as u64)
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn now_cycles() -> u64 {
    let cnt: u64;
    unsafe {
        core::arch::asm!(
            "isb",
            "mrs {}, cntvct_el0",
            out(reg) cnt,
            options(nomem, nostack, preserves_flags),
        );
    }
    cnt
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
pub fn now_cycles() -> u64 {
    // No cycle counter on this target; the nanosecond clock stands in and
    // calibration converges on ~10^9 cycles per second.
    mono_time_ns()
}

/// Calibrated cycle-to-nanosecond converter.
///
/// Cheap to copy; hand one to every thread that needs to turn cycle deltas
/// into durations.
#[derive(Debug, Clone, Copy)]
pub struct CycleClock {
    cycles_per_second: u64,
}

impl CycleClock {
    /// Measures the cycle counter against the monotonic clock and returns
    /// a converter.
    ///
    /// Sleeps for the calibration interval (at least 100 ms); call it once
    /// at startup, before any worker that converts.
    pub fn calibrate() -> Self {
        let start_cycles = now_cycles();
        let start_ns = mono_time_ns();

        thread::sleep(CALIBRATION_INTERVAL);

        let end_cycles = now_cycles();
        let end_ns = mono_time_ns();

        let elapsed_ns = end_ns.saturating_sub(start_ns).max(1);
        let elapsed_cycles = end_cycles.wrapping_sub(start_cycles);

        let cps = (elapsed_cycles as u128 * 1_000_000_000 / elapsed_ns as u128) as u64;
        Self::with_frequency(cps)
    }

    /// Builds a converter with a known counter frequency in Hz.
    ///
    /// The frequency is clamped to at least 1 so conversions can never
    /// divide by zero.
    pub fn with_frequency(cycles_per_second: u64) -> Self {
        Self {
            cycles_per_second: cycles_per_second.max(1),
        }
    }

    /// Calibrated counter frequency in Hz.
    #[inline(always)]
    pub fn cycles_per_second(&self) -> u64 {
        self.cycles_per_second
    }

    /// Converts a cycle delta to nanoseconds.
    #[inline(always)]
    pub fn cycles_to_nanos(&self, cycles: u64) -> u64 {
        (cycles as u128 * 1_000_000_000 / self.cycles_per_second as u128) as u64
    }

    /// Converts nanoseconds to a cycle delta.
    #[inline(always)]
    pub fn nanos_to_cycles(&self, nanos: u64) -> u64 {
        (nanos as u128 * self.cycles_per_second as u128 / 1_000_000_000) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_time_is_non_decreasing() {
        let t1 = mono_time_ns();
        let t2 = mono_time_ns();
        assert!(t2 >= t1, "monotonic clock went backwards: {} < {}", t2, t1);
    }

    #[test]
    fn mono_time_advances_over_sleep() {
        let t1 = mono_time_ns();
        thread::sleep(Duration::from_millis(5));
        let t2 = mono_time_ns();
        assert!(t2 > t1);
    }

    #[test]
    fn cycle_counter_advances() {
        let c1 = now_cycles();
        thread::sleep(Duration::from_millis(1));
        let c2 = now_cycles();
        assert!(c2 > c1, "cycle counter did not advance: {} -> {}", c1, c2);
    }

    #[test]
    fn calibrate_yields_plausible_frequency() {
        let clock = CycleClock::calibrate();
        // Anything from a 1 MHz generic timer to a 10 GHz TSC is plausible;
        // the fallback path lands near 1 GHz.
        let cps = clock.cycles_per_second();
        assert!(cps > 100_000, "implausibly slow counter: {} Hz", cps);
        assert!(cps < 20_000_000_000, "implausibly fast counter: {} Hz", cps);
    }

    #[test]
    fn conversions_round_trip_at_known_frequency() {
        let clock = CycleClock::with_frequency(3_000_000_000);
        assert_eq!(clock.cycles_to_nanos(3_000_000_000), 1_000_000_000);
        assert_eq!(clock.cycles_to_nanos(3), 1);
        assert_eq!(clock.nanos_to_cycles(1_000_000_000), 3_000_000_000);
        assert_eq!(clock.nanos_to_cycles(1), 3);
    }

    #[test]
    fn fallback_frequency_matches_nanosecond_counter() {
        let clock = CycleClock::with_frequency(1_000_000_000);
        assert_eq!(clock.cycles_to_nanos(12_345), 12_345);
        assert_eq!(clock.nanos_to_cycles(12_345), 12_345);
    }

    #[test]
    fn zero_frequency_is_clamped() {
        let clock = CycleClock::with_frequency(0);
        assert_eq!(clock.cycles_per_second(), 1);
        // Must not panic.
        let _ = clock.cycles_to_nanos(u64::MAX);
    }

    #[test]
    fn large_deltas_do_not_overflow() {
        let clock = CycleClock::with_frequency(3_000_000_000);
        // An hour of cycles at 3 GHz.
        let cycles = 3_000_000_000u64 * 3600;
        assert_eq!(clock.cycles_to_nanos(cycles), 3_600_000_000_000);
    }
}
