//! Numeric summaries shared by the aggregate fallback and the expression
//! engine.

/// Arithmetic mean; undefined for no values.
pub(crate) fn mean(numbers: &[f64]) -> Option<f64> {
    if numbers.is_empty() {
        None
    } else {
        Some(numbers.iter().sum::<f64>() / numbers.len() as f64)
    }
}

/// Sample standard deviation (n - 1 divisor); undefined below two values.
pub(crate) fn sample_sd(numbers: &[f64]) -> Option<f64> {
    if numbers.len() < 2 {
        return None;
    }
    let m = mean(numbers)?;
    let variance =
        numbers.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (numbers.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Continuous quantile with linear interpolation, as PERCENTILE_CONT.
/// `sorted` must be ascending.
pub(crate) fn quantile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let position = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}
