//! Reductions over float slices. NaN inputs are skipped; an empty input
//! gives NaN (count gives 0).

pub fn count(values: &[f64]) -> usize {
    values.iter().filter(|x| !x.is_nan()).count()
}

pub fn sum(values: &[f64]) -> f64 {
    values.iter().filter(|x| !x.is_nan()).sum()
}

pub fn mean(values: &[f64]) -> f64 {
    let n = count(values);
    if n == 0 {
        return f64::NAN;
    }
    sum(values) / n as f64
}

/// Sample standard deviation (n - 1 in the denominator).
pub fn std(values: &[f64]) -> f64 {
    let n = count(values);
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values
        .iter()
        .filter(|x| !x.is_nan())
        .map(|x| (x - m).powi(2))
        .sum();
    (ss / (n - 1) as f64).sqrt()
}

pub fn min(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|x| !x.is_nan())
        .fold(f64::NAN, |acc, x| if acc.is_nan() || x < acc { x } else { acc })
}

pub fn max(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|x| !x.is_nan())
        .fold(f64::NAN, |acc, x| if acc.is_nan() || x > acc { x } else { acc })
}

/// Linear-interpolated quantile, `q` in `[0, 1]`.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Pearson correlation over the positions where both inputs are present.
pub fn corr(a: &[f64], b: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter(|(x, y)| !x.is_nan() && !y.is_nan())
        .map(|(x, y)| (*x, *y))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let ma = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mb = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut va, mut vb) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va == 0.0 || vb == 0.0 {
        return f64::NAN;
    }
    cov / (va * vb).sqrt()
}
