//src/merge.rs

use ahash::{AHashMap, AHashSet};

use crate::error::{FormatError, MismatchError, QpcrResult};
use crate::types::{MergedTable, PartialTable, WellKey, WellRecord};

fn sorted_labels<'a>(keys: impl Iterator<Item = &'a WellKey>) -> Vec<String> {
    let mut keys: Vec<&WellKey> = keys.collect();
    keys.sort();
    keys.into_iter().map(WellKey::to_string).collect()
}

/// Joins per-reporter tables on well key, left to right.
///
/// The first table seeds well order and identifying columns; later tables add
/// only their measurements. Every table must cover exactly the same wells.
pub fn merge(partials: Vec<PartialTable>) -> QpcrResult<MergedTable> {
    let mut partials = partials.into_iter();
    let first = partials.next().ok_or(FormatError::NoTable { context: None })?;
    if first.rows.is_empty() {
        return Err(FormatError::NoTable { context: Some(first.reporter) }.into());
    }

    let mut reporters = vec![first.reporter.clone()];
    let mut index: AHashMap<WellKey, usize> = AHashMap::with_capacity(first.rows.len());
    let mut wells = Vec::with_capacity(first.rows.len());

    for row in first.rows {
        if index.insert(row.well.clone(), wells.len()).is_some() {
            return Err(MismatchError::DuplicateWell { reporter: first.reporter, well: row.well.to_string() }.into());
        }
        wells.push(WellRecord {
            well: row.well,
            sample_name: row.sample_name,
            info: row.info,
            measurements: vec![(first.reporter.clone(), row.measurement)],
            call: None,
        });
    }

    for partial in partials {
        let mut seen: AHashSet<&WellKey> = AHashSet::with_capacity(partial.rows.len());
        let mut unexpected = Vec::new();
        for row in &partial.rows {
            if !seen.insert(&row.well) {
                return Err(MismatchError::DuplicateWell {
                    reporter: partial.reporter.clone(),
                    well: row.well.to_string(),
                }
                .into());
            }
            if !index.contains_key(&row.well) {
                unexpected.push(&row.well);
            }
        }
        let missing: Vec<&WellKey> = index.keys().filter(|k| !seen.contains(k)).collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(MismatchError::Wells {
                reporter: partial.reporter.clone(),
                missing: sorted_labels(missing.into_iter()),
                unexpected: sorted_labels(unexpected.into_iter()),
            }
            .into());
        }

        for row in &partial.rows {
            let slot = index[&row.well];
            wells[slot].measurements.push((partial.reporter.clone(), row.measurement));
        }
        reporters.push(partial.reporter);
    }

    log::info!("Merged {} wells across {} reporters", wells.len(), reporters.len());
    Ok(MergedTable { reporters, wells })
}
