//src/types.rs

use ahash::AHashMap;
use std::fmt;

/// Join key for a physical well.
///
/// Rotor-Gene and Mic number their wells; QuantStudio joins on the plate
/// position label (`A1`, `H12`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WellKey {
    Number(u32),
    Position(String),
}

impl WellKey {
    /// Parses a numbered well. Accepts zero-padded labels (`01`) and
    /// integral floats (`3.0`, as spreadsheets store them).
    pub fn parse_number(raw: &str) -> Option<WellKey> {
        let raw = raw.trim();
        if let Ok(n) = raw.parse::<u32>() {
            return Some(WellKey::Number(n));
        }
        let f: f64 = raw.parse().ok()?;
        if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 {
            Some(WellKey::Number(f as u32))
        } else {
            None
        }
    }

    pub fn position(raw: &str) -> WellKey {
        WellKey::Position(raw.trim().to_string())
    }
}

impl fmt::Display for WellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WellKey::Number(n) => write!(f, "{n}"),
            WellKey::Position(p) => f.write_str(p),
        }
    }
}

/// Identifying columns that only some instruments provide.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WellInfo {
    /// Rotor-Gene `Given Conc (copies/reaction)`, kept as written.
    pub copies: Option<String>,
    /// Rotor-Gene `Ct Comment`.
    pub comments: Option<String>,
    /// Mic sample `Type` (standard / unknown / control).
    pub task: Option<String>,
    /// Mic `Standards Concentration`.
    pub assigned_quantity: Option<f64>,
}

/// Per-reporter numbers for one well.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Measurement {
    pub cq: f64,
    pub cq_conf: Option<f64>,
    pub delta_rn: Option<f64>,
    pub quantity: Option<f64>,
}

/// One row of a per-reporter partial table.
#[derive(Debug, Clone, PartialEq)]
pub struct ReporterRow {
    pub well: WellKey,
    pub sample_name: String,
    pub info: WellInfo,
    pub measurement: Measurement,
}

/// Everything one instrument reported for one reporter channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialTable {
    pub reporter: String,
    pub rows: Vec<ReporterRow>,
}

impl PartialTable {
    pub fn new(reporter: impl Into<String>) -> Self {
        Self { reporter: reporter.into(), rows: Vec::new() }
    }
}

/// Raw metadata rows copied from the export, passed through for provenance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderBlock(pub Vec<Vec<String>>);

impl HeaderBlock {
    pub fn rows(&self) -> &[Vec<String>] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// reporter id -> largest delta-Rn among wells with a trustworthy baseline.
pub type MaxSignalMap = AHashMap<String, f64>;

/// VHF outcome for a well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VhfCall {
    /// Carries the display name of the winning reporter.
    Positive(String),
    Negative,
    Invalid,
}

impl fmt::Display for VhfCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VhfCall::Positive(name) => write!(f, "{name} Positive"),
            VhfCall::Negative => f.write_str("Negative"),
            VhfCall::Invalid => f.write_str("Invalid Result"),
        }
    }
}

/// HIV drug-resistance-mutation outcome for one reporter of one well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrmCall {
    Negative,
    Positive,
    Indeterminate,
}

impl fmt::Display for DrmCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DrmCall::Negative => "Negative",
            DrmCall::Positive => "Positive",
            DrmCall::Indeterminate => "Indeterminate",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReporterCall {
    pub reporter: String,
    pub display_name: String,
    /// Mutant quantity over internal-control quantity.
    pub drm_fraction: f64,
    pub call: DrmCall,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    Qualitative(VhfCall),
    Quantitative(Vec<ReporterCall>),
}

/// One physical well after the per-reporter tables were joined.
#[derive(Debug, Clone, PartialEq)]
pub struct WellRecord {
    pub well: WellKey,
    pub sample_name: String,
    pub info: WellInfo,
    /// `(reporter id, measurement)` in merge order.
    pub measurements: Vec<(String, Measurement)>,
    pub call: Option<CallResult>,
}

impl WellRecord {
    pub fn measurement(&self, reporter: &str) -> Option<&Measurement> {
        self.measurements
            .iter()
            .find(|(id, _)| id == reporter)
            .map(|(_, m)| m)
    }
}

/// The unified per-well table. Wells are unique by key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedTable {
    pub reporters: Vec<String>,
    pub wells: Vec<WellRecord>,
}

impl MergedTable {
    pub fn len(&self) -> usize {
        self.wells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wells.is_empty()
    }

    pub fn get(&self, well: &WellKey) -> Option<&WellRecord> {
        self.wells.iter().find(|r| &r.well == well)
    }
}
