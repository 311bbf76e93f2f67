use anyhow::ensure;
use num_complex::Complex;
use rustfft::FftPlanner;

/// Lag (in samples) at which `series2` best matches `series1`, found as the
/// argmax of the circular cross-correlation `ifft(fft(a) * conj(fft(b)))`.
///
/// A result of `k` means `series1[i + k] ~ series2[i]`, wrapping around the
/// end of the series; lags past the midpoint are negative shifts.
pub fn shift_between(series1: &[f64], series2: &[f64]) -> crate::Result<usize> {
    ensure!(!series1.is_empty(), "cannot correlate empty series");
    ensure!(
        series1.len() == series2.len(),
        "series lengths differ: {} vs {}",
        series1.len(),
        series2.len()
    );

    let len = series1.len();
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(len);
    let ifft = planner.plan_fft_inverse(len);

    let mut a: Vec<Complex<f64>> = series1.iter().map(|&v| Complex::new(v, 0.0)).collect();
    let mut b: Vec<Complex<f64>> = series2.iter().map(|&v| Complex::new(v, 0.0)).collect();
    fft.process(&mut a);
    fft.process(&mut b);

    let mut cross: Vec<Complex<f64>> = a
        .iter()
        .zip(b.iter())
        .map(|(fa, fb)| fa * fb.conj())
        .collect();
    ifft.process(&mut cross);

    // argmax over the real part; first maximum wins on ties
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, value) in cross.iter().enumerate() {
        if value.re > best_value {
            best_value = value.re;
            best = i;
        }
    }
    Ok(best)
}

/// Signed version of [`shift_between`]: lags past half the length wrap to
/// negative values.
pub fn signed_shift_between(series1: &[f64], series2: &[f64]) -> crate::Result<isize> {
    let len = series1.len() as isize;
    let shift = shift_between(series1, series2)? as isize;
    Ok(if shift > len / 2 { shift - len } else { shift })
}
