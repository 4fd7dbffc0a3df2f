pub mod hiv;
pub mod vhf;

pub use hiv::{classify_hiv, drm_call, drm_fraction, hiv_calls, HivRules};
pub use vhf::{classify_vhf, vhf_call, VhfRules};

use crate::config::{Division, ReporterMap, RunSettings};
use crate::types::{MaxSignalMap, MergedTable};

/// Runs the decision procedure of the run's division over every well.
pub fn classify(
    table: MergedTable,
    reporters: &ReporterMap,
    settings: &RunSettings,
    max_signal: &MaxSignalMap,
) -> MergedTable {
    log::info!("Classifying {} wells ({:?})", table.len(), settings.division);
    match settings.division {
        Division::Vhf => classify_vhf(table, reporters, &VhfRules::for_run(settings, max_signal)),
        Division::Hiv => classify_hiv(table, reporters, &HivRules::for_run(settings)),
    }
}
