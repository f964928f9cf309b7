use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Arithmetic mean of timestamps, computed over epoch seconds.
///
/// Returns `None` for an empty slice or a mean outside the representable
/// range.
pub fn mean_timestamp(times: &[DateTime<Utc>]) -> Option<DateTime<Utc>> {
    if times.is_empty() {
        return None;
    }

    let sum: f64 = times
        .iter()
        .map(|t| t.timestamp_micros() as f64 / 1e6)
        .sum();
    let mean_secs = sum / times.len() as f64;

    DateTime::from_timestamp_micros((mean_secs * 1e6).round() as i64)
}

/// Arithmetic mean of the precomputed anomaly scores.
pub fn mean_score(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

/// Most frequent hostname among the members, ties broken by first encounter
/// in batch order. Never alphabetical.
pub fn mode_hostname<'a>(hostnames: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for name in hostnames {
        let count = counts.entry(name).or_insert(0);
        if *count == 0 {
            order.push(name);
        }
        *count += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for name in order {
        let count = counts[name];
        match best {
            // Strictly greater, so the first-encountered name wins ties.
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((name, count)),
        }
    }

    best.map(|(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn mean_of_nine_daily_timestamps_is_the_middle_one() {
        let base = Utc.with_ymd_and_hms(2021, 12, 10, 12, 0, 0).unwrap();
        let times: Vec<_> = (0..9).map(|d| base - Duration::days(d)).collect();

        let mean = mean_timestamp(&times).unwrap();
        assert_eq!(mean, times[4]);
    }

    #[test]
    fn mean_of_single_timestamp_is_itself() {
        let t = Utc.with_ymd_and_hms(2022, 3, 1, 8, 30, 15).unwrap();
        assert_eq!(mean_timestamp(&[t]).unwrap(), t);
    }

    #[test]
    fn mean_timestamp_of_empty_slice_is_none() {
        assert!(mean_timestamp(&[]).is_none());
    }

    #[test]
    fn mean_score_averages() {
        let mean = mean_score(&[0.2, 0.4, 0.9]).unwrap();
        assert!((mean - 0.5).abs() < 1e-12);
    }

    #[test]
    fn mode_picks_most_frequent() {
        let mode = mode_hostname(["alpha", "alpha", "beta"]);
        assert_eq!(mode, Some("alpha"));
    }

    #[test]
    fn mode_tie_breaks_by_first_encounter() {
        // "zeta" sorts after "alpha" but arrives first.
        let mode = mode_hostname(["zeta", "alpha"]);
        assert_eq!(mode, Some("zeta"));

        let mode = mode_hostname(["beta", "alpha", "alpha", "beta"]);
        assert_eq!(mode, Some("beta"));
    }

    #[test]
    fn mode_of_empty_iterator_is_none() {
        assert_eq!(mode_hostname(std::iter::empty::<&str>()), None);
    }
}
