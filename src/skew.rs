//! Server/client clock-skew tracking.
//!
//! ownCloud servers routinely run with a clock offset from the client,
//! which would make every file look modified. The tracker learns the
//! offset from `Date:` response headers and the backend corrects
//! mtimes in both directions: subtract on read, add on write.

use tracing::{debug, warn};

/// Default warn threshold for skew jumps between samples, seconds.
pub const DEFAULT_WARN_THRESHOLD: i64 = 5;

#[derive(Debug, Clone)]
pub struct ClockSkew {
    time_delta: i64,
    prev_delta: i64,
    sum: i64,
    count: u64,
    warn_threshold: i64,
}

impl Default for ClockSkew {
    fn default() -> Self {
        ClockSkew {
            time_delta: 0,
            prev_delta: 0,
            sum: 0,
            count: 0,
            warn_threshold: DEFAULT_WARN_THRESHOLD,
        }
    }
}

impl ClockSkew {
    /// Record one `server_time - client_time` observation.
    pub fn update(&mut self, server_time: i64, client_time: i64) {
        let skew = server_time - client_time;
        self.prev_delta = self.time_delta;
        self.time_delta = skew;
        self.sum += skew;
        self.count += 1;

        debug!(delta = skew, samples = self.count, "observed server time delta");

        if self.count >= 2 && (self.time_delta - self.prev_delta).abs() > self.warn_threshold {
            warn!(
                delta = self.time_delta,
                previous = self.prev_delta,
                "server time delta changed between requests"
            );
        }
    }

    /// Current `server - client` offset in seconds.
    pub fn delta(&self) -> i64 {
        self.time_delta
    }

    /// Mean offset over all samples, for diagnostics.
    pub fn mean_delta(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }

    pub fn samples(&self) -> u64 {
        self.count
    }

    pub fn set_warn_threshold(&mut self, seconds: i64) {
        self.warn_threshold = seconds;
    }

    /// Convert a server-side mtime to the engine's view.
    pub fn to_engine_mtime(&self, server_mtime: i64) -> i64 {
        server_mtime - self.time_delta
    }

    /// Convert an engine mtime to the value sent on the wire.
    pub fn to_server_mtime(&self, engine_mtime: i64) -> i64 {
        engine_mtime + self.time_delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_tracks_delta_and_previous() {
        let mut skew = ClockSkew::default();
        skew.update(1_000_300, 1_000_000);
        assert_eq!(skew.delta(), 300);
        skew.update(1_000_310, 1_000_000);
        assert_eq!(skew.delta(), 310);
        assert_eq!(skew.samples(), 2);
        assert_eq!(skew.mean_delta(), 305.0);
    }

    #[test]
    fn test_mtime_correction_both_directions() {
        let mut skew = ClockSkew::default();
        skew.update(1_700_000_300, 1_700_000_000);
        assert_eq!(skew.to_engine_mtime(1_700_000_000), 1_699_999_700);
        assert_eq!(skew.to_server_mtime(1_699_999_700), 1_700_000_000);
    }

    #[test]
    fn test_zero_samples_mean() {
        assert_eq!(ClockSkew::default().mean_delta(), 0.0);
    }

    #[test]
    fn test_negative_skew() {
        let mut skew = ClockSkew::default();
        skew.update(999_900, 1_000_000);
        assert_eq!(skew.delta(), -100);
        assert_eq!(skew.to_engine_mtime(500_000), 500_100);
    }
}
