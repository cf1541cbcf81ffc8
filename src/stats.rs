use std::fmt;

use serde::Serialize;

/// A free whose address had no live block when it was replayed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    /// Position of the event in the trace
    pub index: usize,
    pub line: Option<usize>,
    pub timestamp: f64,
    pub address: u64,
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "double free or free of untracked address {:#010x} (event #{}",
            self.address, self.index
        )?;
        if let Some(line) = self.line {
            write!(f, ", line {line}")?;
        }
        write!(f, ", t={:.6}s)", self.timestamp)
    }
}

/// A live block as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutEntry {
    pub address: u64,
    pub size: u64,
    /// Allocator entry point that created the block
    pub function: String,
}

impl LayoutEntry {
    /// First address past the block.
    pub fn end(&self) -> u64 {
        self.address.saturating_add(self.size)
    }
}

/// Lifetime statistics over a whole trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeapSummary {
    pub alloc_count: usize,
    /// Every free event, including anomalous ones
    pub free_count: usize,
    pub total_bytes_allocated: u64,
    pub live_block_count: usize,
    pub live_bytes: u64,
    /// Blocks never freed, ascending by address
    pub live: Vec<LayoutEntry>,
    pub anomalies: Vec<Anomaly>,
}

/// The live heap just before `cutoff`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layout {
    pub cutoff: f64,
    /// Ascending by address
    pub entries: Vec<LayoutEntry>,
    pub anomalies: Vec<Anomaly>,
}

impl Layout {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn live_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsageSample {
    /// Seconds since the start of the trace
    pub time: f64,
    pub bytes: u64,
}

/// Live bytes after each event, one sample per event in trace order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSeries {
    pub samples: Vec<UsageSample>,
    pub anomalies: Vec<Anomaly>,
}

impl UsageSeries {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&UsageSample> {
        self.samples.last()
    }

    /// Highest sample, earliest one on ties.
    pub fn peak(&self) -> Option<&UsageSample> {
        self.samples
            .iter()
            .reduce(|best, s| if s.bytes > best.bytes { s } else { best })
    }
}

impl IntoIterator for UsageSeries {
    type Item = UsageSample;
    type IntoIter = std::vec::IntoIter<UsageSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

impl<'a> IntoIterator for &'a UsageSeries {
    type Item = &'a UsageSample;
    type IntoIter = std::slice::Iter<'a, UsageSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anomaly_display_names_the_line() {
        let anomaly = Anomaly {
            index: 3,
            line: Some(4),
            timestamp: 0.3,
            address: 0x1000,
        };
        assert_eq!(
            anomaly.to_string(),
            "double free or free of untracked address 0x00001000 (event #3, line 4, t=0.300000s)"
        );
    }

    #[test]
    fn peak_prefers_earliest_maximum() {
        let series = UsageSeries {
            samples: vec![
                UsageSample { time: 0.0, bytes: 10 },
                UsageSample { time: 1.0, bytes: 30 },
                UsageSample { time: 2.0, bytes: 30 },
                UsageSample { time: 3.0, bytes: 5 },
            ],
            anomalies: Vec::new(),
        };
        assert_eq!(series.peak(), Some(&UsageSample { time: 1.0, bytes: 30 }));
        assert_eq!(series.last().map(|s| s.bytes), Some(5));
    }
}
