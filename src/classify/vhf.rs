// src/classify/vhf.rs

use crate::config::{ReporterMap, RunSettings};
use crate::types::{CallResult, MaxSignalMap, Measurement, MergedTable, VhfCall, WellRecord};

/// Placeholder in the internal control's slot, above any callable Cq.
pub const CONTROL_SLOT: f64 = 98.0;
/// Placeholder for a target that was not called positive.
pub const NOT_CALLED: f64 = 99.0;

/// Cutoffs for the qualitative workflow.
#[derive(Debug, Clone, Copy)]
pub struct VhfRules<'a> {
    pub pos_cutoff: f64,
    pub drn_percent_cutoff: f64,
    /// Set only for instruments whose Cq is not already gated on signal size.
    pub max_signal: Option<&'a MaxSignalMap>,
}

impl<'a> VhfRules<'a> {
    pub fn for_run(settings: &RunSettings, max_signal: &'a MaxSignalMap) -> Self {
        Self {
            pos_cutoff: settings.thresholds.pos_cutoff,
            drn_percent_cutoff: settings.thresholds.drn_percent_cutoff,
            max_signal: settings.instrument.requires_signal_gating().then_some(max_signal),
        }
    }

    /// Cq strictly below the cutoff and, when gated, delta-Rn above the
    /// configured share of the plate maximum for that reporter.
    pub fn is_positive(&self, reporter: &str, m: &Measurement) -> bool {
        if !(m.cq < self.pos_cutoff) {
            return false;
        }
        let Some(max_signal) = self.max_signal else {
            return true;
        };
        match (m.delta_rn, max_signal.get(reporter)) {
            (Some(delta_rn), Some(&max)) => delta_rn / max > self.drn_percent_cutoff,
            _ => false,
        }
    }
}

/// Qualitative call for one well.
///
/// Each target contributes its Cq if called positive, `NOT_CALLED` otherwise;
/// the lowest value wins and the earliest configured target wins ties. If no
/// target wins, the internal control decides between negative and invalid.
pub fn vhf_call(record: &WellRecord, reporters: &ReporterMap, rules: &VhfRules<'_>) -> VhfCall {
    let targets: Vec<(&str, &str)> = reporters.targets().collect();
    let mut candidates = Vec::with_capacity(targets.len() + 1);
    candidates.push(CONTROL_SLOT);
    for (id, _) in &targets {
        let value = match record.measurement(id) {
            Some(m) if rules.is_positive(id, m) => m.cq,
            _ => NOT_CALLED,
        };
        candidates.push(value);
    }

    let mut best = 0;
    for (i, &value) in candidates.iter().enumerate().skip(1) {
        if value < candidates[best] {
            best = i;
        }
    }

    if best != 0 {
        return VhfCall::Positive(targets[best - 1].1.to_string());
    }
    match record.measurement(reporters.internal_control()) {
        Some(ic) if ic.cq < rules.pos_cutoff => VhfCall::Negative,
        _ => VhfCall::Invalid,
    }
}

/// Attaches a qualitative call to every well. Re-running replaces the calls
/// with identical ones.
pub fn classify_vhf(mut table: MergedTable, reporters: &ReporterMap, rules: &VhfRules<'_>) -> MergedTable {
    for record in &mut table.wells {
        record.call = Some(CallResult::Qualitative(vhf_call(record, reporters, rules)));
    }
    table
}
