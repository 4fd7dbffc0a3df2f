// src/classify/hiv.rs

use crate::config::{ReporterMap, RunSettings};
use crate::types::{CallResult, DrmCall, MergedTable, ReporterCall, WellRecord};

/// Below this many internal-control copies a well cannot be called positive.
pub const MIN_CONTROL_COPIES: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HivRules {
    pub min_drm_fraction: f64,
    pub max_drm_fraction: f64,
}

impl HivRules {
    pub fn for_run(settings: &RunSettings) -> Self {
        Self {
            min_drm_fraction: settings.thresholds.min_drm_percent,
            max_drm_fraction: settings.thresholds.max_drm_percent,
        }
    }
}

/// Mutant copies over internal-control copies; 0 instead of a division fault.
pub fn drm_fraction(mutant: f64, control: f64) -> f64 {
    if control == 0.0 {
        return 0.0;
    }
    let fraction = mutant / control;
    if fraction.is_finite() {
        fraction
    } else {
        0.0
    }
}

pub fn drm_call(fraction: f64, control: f64, rules: &HivRules) -> DrmCall {
    if fraction < rules.min_drm_fraction || control < MIN_CONTROL_COPIES {
        DrmCall::Negative
    } else if fraction >= rules.max_drm_fraction {
        DrmCall::Positive
    } else {
        DrmCall::Indeterminate
    }
}

/// One call per non-control reporter, in configured order.
pub fn hiv_calls(record: &WellRecord, reporters: &ReporterMap, rules: &HivRules) -> Vec<ReporterCall> {
    let quantity = |id: &str| {
        record
            .measurement(id)
            .and_then(|m| m.quantity)
            .unwrap_or(0.0)
    };
    let control = quantity(reporters.internal_control());

    reporters
        .targets()
        .map(|(id, name)| {
            let fraction = drm_fraction(quantity(id), control);
            ReporterCall {
                reporter: id.to_string(),
                display_name: name.to_string(),
                drm_fraction: fraction,
                call: drm_call(fraction, control, rules),
            }
        })
        .collect()
}

pub fn classify_hiv(mut table: MergedTable, reporters: &ReporterMap, rules: &HivRules) -> MergedTable {
    for record in &mut table.wells {
        record.call = Some(CallResult::Quantitative(hiv_calls(record, reporters, rules)));
    }
    table
}
