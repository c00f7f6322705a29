//! Small numeric helpers shared by validation and bucket merging.

/// Sample standard deviation; zero for fewer than two values.
pub fn sample_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

/// Sum of counters, pinned at `u64::MAX` instead of overflowing.
pub fn saturating_sum(values: impl IntoIterator<Item = u64>) -> u64 {
    values.into_iter().fold(0, u64::saturating_add)
}

/// Render a float the way downstream plotting scripts expect: integral
/// values keep one decimal (`12.0`), others use the shortest exact form.
pub fn py_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdev_of_known_samples() {
        assert!((sample_stdev(&[100.0, 200.0, 300.0]) - 100.0).abs() < 1e-9);
        assert_eq!(sample_stdev(&[7.0]), 0.0);
        assert_eq!(sample_stdev(&[]), 0.0);
    }

    #[test]
    fn sums_saturate() {
        assert_eq!(saturating_sum([1, 2, 3]), 6);
        assert_eq!(saturating_sum([u64::MAX, 1]), u64::MAX);
        assert_eq!(saturating_sum([]), 0);
    }

    #[test]
    fn floats_keep_a_decimal() {
        assert_eq!(py_float(12.0), "12.0");
        assert_eq!(py_float(0.0), "0.0");
        assert_eq!(py_float(12.5), "12.5");
        assert_eq!(py_float(0.1), "0.1");
    }
}
