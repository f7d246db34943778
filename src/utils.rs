/// Per-operation poll statistics and timing helpers

use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::ModbusError;

/// Outcome counters for one polling loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollStatistics {
    pub polls: u64,
    /// Responses that decoded into values
    pub successes: u64,
    pub exceptions: u64,
    /// Responses whose function code matched neither the request nor its exception
    pub mismatches: u64,
    /// Timeouts, I/O and connection failures
    pub transport_errors: u64,
    /// Replies the transport rejected as malformed (CRC, framing, unit id)
    pub frame_errors: u64,
    pub values_decoded: u64,
    pub last_exception_code: Option<u8>,
    pub total_duration: Duration,
    pub max_duration: Option<Duration>,
}

impl PollStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_poll(&mut self, duration: Duration) {
        self.polls += 1;
        self.total_duration += duration;
        self.max_duration = Some(self.max_duration.map_or(duration, |max| max.max(duration)));
    }

    pub fn record_success(&mut self, duration: Duration, values: usize) {
        self.record_poll(duration);
        self.successes += 1;
        self.values_decoded += values as u64;
    }

    pub fn record_exception(&mut self, duration: Duration, code: u8) {
        self.record_poll(duration);
        self.exceptions += 1;
        self.last_exception_code = Some(code);
    }

    pub fn record_mismatch(&mut self, duration: Duration) {
        self.record_poll(duration);
        self.mismatches += 1;
    }

    /// Count a failed send under the class of its error
    pub fn record_error(&mut self, duration: Duration, error: &ModbusError) {
        self.record_poll(duration);
        if error.is_transport_error() {
            self.transport_errors += 1;
        } else {
            self.frame_errors += 1;
        }
    }

    /// Get success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.polls == 0 {
            return 0.0;
        }
        (self.successes as f64 / self.polls as f64) * 100.0
    }

    pub fn avg_duration(&self) -> Duration {
        if self.polls == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_duration.as_nanos() / self.polls as u128;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for PollStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "polls={} ok={} ({:.1}%) exceptions={} mismatches={} errors={} bad_frames={} avg={}",
            self.polls,
            self.successes,
            self.success_rate(),
            self.exceptions,
            self.mismatches,
            self.transport_errors,
            self.frame_errors,
            format::format_duration(self.avg_duration()),
        )
    }
}

/// Timer for measuring operation duration
pub struct OperationTimer {
    start: Instant,
    operation_name: String,
}

impl OperationTimer {
    pub fn start(operation_name: &str) -> Self {
        Self {
            start: Instant::now(),
            operation_name: operation_name.to_string(),
        }
    }

    pub fn stop(self) -> Duration {
        let duration = self.start.elapsed();
        debug!("Operation '{}' completed in {:?}", self.operation_name, duration);
        duration
    }
}

/// Formatting and display utilities
pub mod format {
    use std::time::Duration;

    /// Format duration in a human-readable way
    pub fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis < 1000 {
            format!("{}ms", millis)
        } else if millis < 60_000 {
            format!("{:.2}s", duration.as_secs_f64())
        } else {
            let mins = millis / 60_000;
            let secs = (millis % 60_000) as f64 / 1000.0;
            format!("{}m {:.1}s", mins, secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_statistics() {
        let mut stats = PollStatistics::new();
        stats.record_success(Duration::from_millis(10), 2);
        stats.record_success(Duration::from_millis(30), 2);
        stats.record_exception(Duration::from_millis(20), 0x02);
        stats.record_error(Duration::from_millis(40), &ModbusError::timeout("read response", 40));

        assert_eq!(stats.polls, 4);
        assert_eq!(stats.values_decoded, 4);
        assert_eq!(stats.last_exception_code, Some(0x02));
        assert_eq!(stats.max_duration, Some(Duration::from_millis(40)));
        assert_eq!(stats.avg_duration(), Duration::from_millis(25));
        assert!((stats.success_rate() - 50.0).abs() < f64::EPSILON);
        assert!(stats.to_string().contains("exceptions=1"));
        assert_eq!(stats.transport_errors, 1);
        assert_eq!(stats.frame_errors, 0);
    }

    #[test]
    fn test_errors_counted_by_class() {
        let mut stats = PollStatistics::new();
        stats.record_error(Duration::from_millis(5), &ModbusError::io("broken pipe"));
        stats.record_error(Duration::from_millis(5), &ModbusError::connection("refused"));
        stats.record_error(Duration::from_millis(5), &ModbusError::crc_mismatch(0x1234, 0x4321));
        stats.record_error(Duration::from_millis(5), &ModbusError::frame("unit id 2, expected 1"));

        assert_eq!(stats.polls, 4);
        assert_eq!(stats.transport_errors, 2);
        assert_eq!(stats.frame_errors, 2);
        assert!(stats.to_string().contains("bad_frames=2"));
    }

    #[test]
    fn test_avg_duration_with_large_poll_count() {
        let stats = PollStatistics {
            polls: 1 << 32,
            total_duration: Duration::from_secs(1 << 32),
            ..PollStatistics::default()
        };
        assert_eq!(stats.avg_duration(), Duration::from_secs(1));

        let stats = PollStatistics {
            polls: 3,
            total_duration: Duration::from_millis(10),
            ..PollStatistics::default()
        };
        assert_eq!(stats.avg_duration(), Duration::from_nanos(3_333_333));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format::format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format::format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format::format_duration(Duration::from_secs(90)), "1m 30.0s");
    }
}
