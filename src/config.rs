use clap::ValueEnum;
use serde::Serialize;

/// Slack tolerated between two live blocks before the layout report marks a gap.
pub const DEFAULT_GAP_SLACK: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    Bytes,
    #[default]
    #[value(name = "kib")]
    KiB,
}

impl SizeUnit {
    pub fn convert(self, bytes: u64) -> f64 {
        match self {
            SizeUnit::Bytes => bytes as f64,
            SizeUnit::KiB => bytes as f64 / 1024.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SizeUnit::Bytes => "bytes",
            SizeUnit::KiB => "kB",
        }
    }
}

/// Presentation settings shared by the reporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportConfig {
    pub gap_slack: u64,
    pub unit: SizeUnit,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            gap_slack: DEFAULT_GAP_SLACK,
            unit: SizeUnit::default(),
        }
    }
}
