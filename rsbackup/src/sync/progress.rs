//! Decoding of rsync's `--info=progress2` status lines.
//!
//! With `--info=progress2` rsync rewrites a single status line in place by
//! prefixing every update with a carriage return. Each update carries four
//! whitespace-separated fields:
//!
//! ```text
//!       1,234  45%   10.00kB/s    0:01:23
//! ```
//!
//! bytes sent (with thousands separators), completion percentage, transfer
//! rate, and estimated time remaining. Trailing fields such as
//! `(xfr#1, to-chk=0/3)` are ignored.

use crate::utils::{BackupError, Result};

/// Marker that distinguishes progress updates from ordinary log lines.
pub const PROGRESS_MARKER: char = '\r';

/// One decoded progress update.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    /// Total number of bytes sent to the target so far.
    pub bytes_sent: u64,

    /// Completion between 0.0 and 1.0 (1.0 means rsync is done).
    pub completion: f64,

    /// Estimated time remaining, passed through verbatim (`h:mm:ss`).
    pub eta: String,
}

impl ProgressSample {
    /// Decode a single progress segment (without the leading `\r`).
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(protocol_error(
                line,
                format!("expected at least 4 fields, found {}", fields.len()),
            ));
        }

        let bytes_sent = fields[0]
            .replace(',', "")
            .parse::<u64>()
            .map_err(|e| protocol_error(line, format!("bad byte count {:?}: {}", fields[0], e)))?;

        let percent = fields[1]
            .strip_suffix('%')
            .ok_or_else(|| protocol_error(line, format!("percentage {:?} lacks '%'", fields[1])))?
            .parse::<f64>()
            .map_err(|e| protocol_error(line, format!("bad percentage {:?}: {}", fields[1], e)))?;

        if !(0.0..=100.0).contains(&percent) {
            return Err(protocol_error(
                line,
                format!("percentage {} out of range", percent),
            ));
        }

        Ok(Self {
            bytes_sent,
            completion: percent / 100.0,
            eta: fields[3].to_string(),
        })
    }

    /// Decode every update contained in one carriage-return prefixed line.
    ///
    /// rsync may emit several `\r`-separated updates before the next newline;
    /// blank segments are skipped.
    pub fn parse_all(line: &str) -> Result<Vec<Self>> {
        line.split(PROGRESS_MARKER)
            .filter(|segment| !segment.trim().is_empty())
            .map(Self::parse)
            .collect()
    }
}

/// Whether a raw output line is a progress update rather than a log line.
pub fn is_progress_line(line: &str) -> bool {
    line.starts_with(PROGRESS_MARKER)
}

fn protocol_error(line: &str, reason: String) -> BackupError {
    BackupError::Protocol {
        line: line.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_line() {
        let sample = ProgressSample::parse("1,234 45% 10.00kB/s 0:01:23").unwrap();
        assert_eq!(sample.bytes_sent, 1234);
        assert!((sample.completion - 0.45).abs() < 1e-9);
        assert_eq!(sample.eta, "0:01:23");
    }

    #[test]
    fn test_parse_padded_line_with_trailer() {
        let sample =
            ProgressSample::parse("    32,768,000 100%   12.34MB/s    0:00:02 (xfr#3, to-chk=0/7)")
                .unwrap();
        assert_eq!(sample.bytes_sent, 32_768_000);
        assert_eq!(sample.completion, 1.0);
        assert_eq!(sample.eta, "0:00:02");
    }

    #[test]
    fn test_parse_built_line() {
        for (n, p) in [(0u64, 0u32), (17, 3), (1_000_000, 50), (u64::MAX, 100)] {
            let line = format!("{} {}% 1.00kB/s 1:02:03", n, p);
            let sample = ProgressSample::parse(&line).unwrap();
            assert_eq!(sample.bytes_sent, n);
            assert!((sample.completion - p as f64 / 100.0).abs() < 1e-9);
            assert_eq!(sample.eta, "1:02:03");
        }
    }

    #[test]
    fn test_parse_too_few_fields() {
        let err = ProgressSample::parse("1,234 45%").unwrap_err();
        assert!(matches!(err, BackupError::Protocol { .. }));
    }

    #[test]
    fn test_parse_non_numeric_fields() {
        assert!(ProgressSample::parse("abc 45% 10.00kB/s 0:01:23").is_err());
        assert!(ProgressSample::parse("1,234 many% 10.00kB/s 0:01:23").is_err());
        assert!(ProgressSample::parse("1,234 145% 10.00kB/s 0:01:23").is_err());
    }

    #[test]
    fn test_parse_percentage_requires_suffix() {
        let err = ProgressSample::parse("1,234 45 10.00kB/s 0:01:23").unwrap_err();
        assert!(matches!(err, BackupError::Protocol { ref reason, .. } if reason.contains("'%'")));
    }

    #[test]
    fn test_parse_all_multiple_updates() {
        let samples =
            ProgressSample::parse_all("\r  100   1%  1.00kB/s 0:00:09\r  200   2%  1.00kB/s 0:00:08")
                .unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].bytes_sent, 100);
        assert_eq!(samples[1].bytes_sent, 200);
        assert_eq!(samples[1].eta, "0:00:08");
    }

    #[test]
    fn test_is_progress_line() {
        assert!(is_progress_line("\r 1 0% 0.00kB/s 0:00:00"));
        assert!(!is_progress_line("sending incremental file list"));
        assert!(!is_progress_line(" \r1 0% 0.00kB/s 0:00:00"));
    }
}
