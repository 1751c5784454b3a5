use std::collections::HashMap;
use std::hash::Hash;

pub const KILOMETER_TO_FT: f64 = 3280.84;
pub const FT_PER_MIN_TO_MPH: f64 = 0.0113636;
pub const FEET_TO_MILES: f64 = 0.000189394;
pub const MAX_SPEED_MPH: f64 = 65.0;
pub const MEAN_SPEED_MPH: f64 = 30.0;

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Rounds to `digits` decimal places.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

/// Sum of the present values; `None` when every value is missing.
pub fn sum_present(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    values
        .into_iter()
        .flatten()
        .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

/// Speed in mph from a spacing in feet and a running time in minutes.
pub fn speed_mph(spacing_ft: Option<f64>, running_time_min: Option<f64>) -> Option<f64> {
    match (spacing_ft, running_time_min) {
        (Some(s), Some(t)) if t > 0.0 => Some(round_to(s / t * FT_PER_MIN_TO_MPH, 2)),
        _ => None,
    }
}

/// Groups values by key and averages each group.
///
/// Missing values are skipped; keys whose values are all missing are absent.
pub fn mean_by<K, I>(items: I) -> HashMap<K, f64>
where
    K: Eq + Hash,
    I: IntoIterator<Item = (K, Option<f64>)>,
{
    let mut groups: HashMap<K, Vec<f64>> = HashMap::new();
    for (key, value) in items {
        let entry = groups.entry(key).or_default();
        if let Some(v) = value {
            entry.push(v);
        }
    }
    groups
        .into_iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(key, values)| (key, mean(&values)))
        .collect()
}

/// Successive differences of `values` after sorting, keyed back to each item.
///
/// The smallest value of each group gets no difference.
pub fn sorted_diffs<K, Id>(items: impl IntoIterator<Item = (K, Id, i64)>) -> HashMap<Id, f64>
where
    K: Eq + Hash,
    Id: Eq + Hash,
{
    let mut groups: HashMap<K, Vec<(i64, Id)>> = HashMap::new();
    for (key, id, value) in items {
        groups.entry(key).or_default().push((value, id));
    }

    let mut diffs = HashMap::new();
    for (_, mut group) in groups {
        group.sort_by_key(|(value, _)| *value);
        let mut prev: Option<i64> = None;
        for (value, id) in group {
            if let Some(p) = prev {
                diffs.insert(id, (value - p) as f64);
            }
            prev = Some(value);
        }
    }
    diffs
}
