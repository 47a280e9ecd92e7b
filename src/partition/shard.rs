//! Year histogram splitting across shards

use crate::partition::YearCounts;
use crate::ConfigError;

const EPSILON: f64 = 1e-6;

/// Divides a year→count map into `shards` parts of approximately equal volume
///
/// Years are taken in ascending order and poured into shards against a target
/// of `total / shards` records each. When a year would overflow the current
/// shard, the portion that completes the shard (rounded to an integer) stays
/// there and the remainder opens the next shard. A year is therefore split
/// across at most two consecutive shards. The last shard absorbs every year
/// that reaches it, since its target is whatever remains.
///
/// Per-year counts are split exactly (`take + rest == count`), so the union of
/// all parts always sums back to the input. When `shards` exceeds what the
/// histogram can fill, trailing parts are empty maps: callers treat those as
/// "no work" rather than as an error.
///
/// # Errors
///
/// Returns `ConfigError::Validation` if `shards` is zero.
///
/// # Example
///
/// ```
/// use judgments_harvester::partition::{split_years, YearCounts};
///
/// let counts = YearCounts::from([(2020, 100), (2021, 50)]);
/// let parts = split_years(&counts, 2).unwrap();
/// assert_eq!(parts[0], YearCounts::from([(2020, 75)]));
/// assert_eq!(parts[1], YearCounts::from([(2020, 25), (2021, 50)]));
/// ```
pub fn split_years(counts: &YearCounts, shards: usize) -> Result<Vec<YearCounts>, ConfigError> {
    if shards == 0 {
        return Err(ConfigError::Validation(
            "shard count must be >= 1".to_string(),
        ));
    }

    let mut parts = vec![YearCounts::new(); shards];
    let total: u64 = counts.values().sum();
    let target = total as f64 / shards as f64;
    let last = shards - 1;

    let mut part = 0;
    let mut filled = 0.0_f64;

    for (&year, &count) in counts {
        if part == last {
            parts[last].insert(year, count);
            continue;
        }

        if filled + count as f64 > target + EPSILON {
            let take = (target - filled).round().clamp(0.0, count as f64) as u64;
            let rest = count - take;

            if take > 0 {
                parts[part].insert(year, take);
            }

            part += 1;
            filled = rest as f64;

            if rest > 0 {
                parts[part].insert(year, rest);
            }

            // The remainder may fill the next shard on its own; it is never
            // split a second time.
            if filled >= target - EPSILON && part < last {
                part += 1;
                filled = 0.0;
            }
        } else {
            parts[part].insert(year, count);
            filled += count as f64;

            if filled >= target - EPSILON {
                part += 1;
                filled = 0.0;
            }
        }
    }

    Ok(parts)
}
