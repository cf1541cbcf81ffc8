use std::{io::Write, path::Path};

use serde::Serialize;

use crate::{
    config::ReportConfig,
    error::Result,
    stats::{Anomaly, HeapSummary, Layout, LayoutEntry, UsageSeries},
};

/// Placeholder replaced with the JSON sample series in the chart template.
const CHART_DATA_PLACEHOLDER: &str = "{undefined}";

pub fn write_summary<W: Write>(mut out: W, summary: &HeapSummary) -> Result<()> {
    writeln!(out, "HEAP SUMMARY:")?;
    writeln!(
        out,
        "    in use at exit   : {} bytes in {} blocks",
        summary.live_bytes, summary.live_block_count
    )?;
    writeln!(
        out,
        "    total heap usage : {} allocs, {} frees, {} bytes allocated",
        summary.alloc_count, summary.free_count, summary.total_bytes_allocated
    )?;
    write_anomalies(&mut out, &summary.anomalies)
}

/// One line per live block in address order, with a marker line wherever the
/// next block starts more than `gap_slack` bytes past the end of the previous.
pub fn write_layout<W: Write>(mut out: W, layout: &Layout, config: &ReportConfig) -> Result<()> {
    writeln!(
        out,
        "HEAP LAYOUT at t={:.6}s: {} bytes in {} blocks",
        layout.cutoff,
        layout.live_bytes(),
        layout.entries.len()
    )?;

    let mut previous: Option<&LayoutEntry> = None;
    for entry in &layout.entries {
        if let Some(prev) = previous
            && let Some(gap) = gap_between(prev, entry, config.gap_slack)
        {
            writeln!(out, "    ... {gap} byte gap ...")?;
        }
        writeln!(
            out,
            "    {:#018x}  {:>10} bytes  {}",
            entry.address, entry.size, entry.function
        )?;
        previous = Some(entry);
    }
    write_anomalies(&mut out, &layout.anomalies)
}

/// Size of the hole between `prev` and `next`, if it exceeds `slack`.
pub fn gap_between(prev: &LayoutEntry, next: &LayoutEntry, slack: u64) -> Option<u64> {
    let gap = next.address.checked_sub(prev.end())?;
    (gap > slack).then_some(gap)
}

pub fn write_usage<W: Write>(mut out: W, usage: &UsageSeries, config: &ReportConfig) -> Result<()> {
    writeln!(out, "time_s,{}", config.unit.label())?;
    for sample in usage {
        writeln!(out, "{:.9},{:.3}", sample.time, config.unit.convert(sample.bytes))?;
    }
    write_anomalies(&mut out, &usage.anomalies)
}

#[derive(Serialize)]
struct ChartData {
    unit: &'static str,
    peak: f64,
    max_time: f64,
    times: Vec<f64>,
    values: Vec<f64>,
}

/// Write an HTML page plotting memory usage over time at the given path.
pub fn write_usage_chart<P>(usage: &UsageSeries, config: &ReportConfig, path: P) -> Result<()>
where
    P: AsRef<Path>,
{
    std::fs::write(path, render_usage_chart(usage, config)?)?;
    Ok(())
}

pub fn render_usage_chart(usage: &UsageSeries, config: &ReportConfig) -> Result<String> {
    let unit = config.unit;
    let data = ChartData {
        unit: unit.label(),
        peak: usage.peak().map(|s| unit.convert(s.bytes)).unwrap_or(0.0),
        max_time: usage.samples.iter().map(|s| s.time).fold(0.0, f64::max),
        times: usage.samples.iter().map(|s| s.time).collect(),
        values: usage.samples.iter().map(|s| unit.convert(s.bytes)).collect(),
    };
    let d = serde_json::to_string(&data)?;
    let html = include_str!("../usage_chart.html");
    Ok(html.replace(CHART_DATA_PLACEHOLDER, &d))
}

/// Pretty-printed JSON of any query result.
pub fn write_json<W: Write, T: Serialize>(mut out: W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn write_anomalies<W: Write>(out: &mut W, anomalies: &[Anomaly]) -> Result<()> {
    for anomaly in anomalies {
        writeln!(out, "warning: {anomaly}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{config::SizeUnit, stats::UsageSample};

    fn entry(address: u64, size: u64) -> LayoutEntry {
        LayoutEntry {
            address,
            size,
            function: "malloc".to_string(),
        }
    }

    fn render<F: FnOnce(&mut Vec<u8>) -> Result<()>>(f: F) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn summary_text() {
        let summary = HeapSummary {
            alloc_count: 2,
            free_count: 2,
            total_bytes_allocated: 192,
            live_block_count: 1,
            live_bytes: 128,
            live: vec![entry(0x2000, 128)],
            anomalies: vec![Anomaly {
                index: 3,
                line: Some(4),
                timestamp: 0.3,
                address: 0x1000,
            }],
        };

        let text = render(|out| write_summary(out, &summary));
        assert_eq!(
            text,
            "HEAP SUMMARY:\n\
             \x20   in use at exit   : 128 bytes in 1 blocks\n\
             \x20   total heap usage : 2 allocs, 2 frees, 192 bytes allocated\n\
             warning: double free or free of untracked address 0x00001000 (event #3, line 4, t=0.300000s)\n"
        );
    }

    #[test]
    fn gap_needs_more_than_slack() {
        let prev = entry(0x1000, 0x40);
        assert_eq!(gap_between(&prev, &entry(0x1040, 8), 16), None);
        assert_eq!(gap_between(&prev, &entry(0x1050, 8), 16), None);
        assert_eq!(gap_between(&prev, &entry(0x1051, 8), 16), Some(17));
        // Overlap is not a gap.
        assert_eq!(gap_between(&prev, &entry(0x1020, 8), 16), None);
    }

    #[test]
    fn layout_marks_gaps() {
        let layout = Layout {
            cutoff: 1.0,
            entries: vec![entry(0x1000, 0x20), entry(0x1030, 0x10), entry(0x2000, 0x10)],
            anomalies: Vec::new(),
        };

        let text = render(|out| write_layout(out, &layout, &ReportConfig::default()));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "HEAP LAYOUT at t=1.000000s: 64 bytes in 3 blocks");
        assert!(lines[1].contains("0x0000000000001000"));
        assert!(lines[2].contains("0x0000000000001030"));
        assert_eq!(lines[3], "    ... 4032 byte gap ...");
        assert!(lines[4].contains("0x0000000000002000"));
    }

    #[test]
    fn usage_in_kib() {
        let usage = UsageSeries {
            samples: vec![
                UsageSample { time: 0.0, bytes: 1024 },
                UsageSample { time: 0.5, bytes: 512 },
            ],
            anomalies: Vec::new(),
        };
        let text = render(|out| write_usage(out, &usage, &ReportConfig::default()));
        assert_eq!(text, "time_s,kB\n0.000000000,1.000\n0.500000000,0.500\n");

        let config = ReportConfig {
            unit: SizeUnit::Bytes,
            ..ReportConfig::default()
        };
        let html = render_usage_chart(&usage, &config).unwrap();
        assert!(html.contains(r#""values":[1024.0,512.0]"#));
        assert!(html.contains(r#""max_time":0.5"#));
        assert!(html.contains("Math.max(1e-9, data.max_time)"));
        assert!(!html.contains(CHART_DATA_PLACEHOLDER));
    }
}
