use crate::error::{Error, Result};
use nalgebra::{DMatrix, DVector};

/// Residuals smaller than this are rounding noise and never clipped.
const RESIDUAL_FLOOR: f64 = 1e-9;

/// `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LineFit {
    /// Distance of `(x, y)` from the line, measured perpendicular to it.
    pub fn perpendicular_residual(&self, x: f64, y: f64) -> f64 {
        (self.slope * x - y + self.intercept).abs() / libm::sqrt(1.0 + self.slope * self.slope)
    }
}

/// Unweighted least-squares line through the points.
pub fn fit_line(x: &[f64], y: &[f64]) -> Result<LineFit> {
    if x.len() != y.len() {
        return Err(Error::Fit(format!(
            "{} x values but {} y values",
            x.len(),
            y.len()
        )));
    }
    if x.is_empty() {
        return Err(Error::Fit("no points to fit".into()));
    }

    let a = DMatrix::from_fn(x.len(), 2, |i, j| if j == 0 { x[i] } else { 1.0 });
    let b = DVector::from_column_slice(y);
    let svd = a.svd(true, true);
    let solution = svd
        .solve(&b, 1e-10)
        .map_err(|e| Error::Fit(format!("SVD solve failed: {}", e)))?;

    Ok(LineFit {
        slope: solution[0],
        intercept: solution[1],
    })
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    libm::sqrt(values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n)
}

/// Fit a line and flag, in one pass, the points whose perpendicular residual
/// exceeds `sigma` standard deviations of all residuals. Returns the fit and
/// a keep mask.
pub fn clip_outliers(x: &[f64], y: &[f64], sigma: f64) -> Result<(LineFit, Vec<bool>)> {
    let fit = fit_line(x, y)?;
    let residuals: Vec<f64> = x
        .iter()
        .zip(y)
        .map(|(&x, &y)| fit.perpendicular_residual(x, y))
        .collect();

    let limit = sigma * std_dev(&residuals);
    let keep = residuals
        .iter()
        .map(|&r| r <= limit || r <= RESIDUAL_FLOOR)
        .collect();
    Ok((fit, keep))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_recovers_exact_line() {
        let x = [0.1, 0.2, 0.3, 0.4];
        let y: Vec<f64> = x.iter().map(|v| 1.5 * v + 0.25).collect();
        let fit = fit_line(&x, &y).unwrap();
        assert!((fit.slope - 1.5).abs() < 1e-10);
        assert!((fit.intercept - 0.25).abs() < 1e-10);
    }

    #[test]
    fn perpendicular_residual_geometry() {
        let fit = LineFit {
            slope: 1.0,
            intercept: 0.0,
        };
        let r = fit.perpendicular_residual(0.0, 1.0);
        assert!((r - 1.0 / 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(fit.perpendicular_residual(2.0, 2.0), 0.0);
    }

    #[test]
    fn population_std() {
        assert!((std_dev(&[1.0, 3.0]) - 1.0).abs() < 1e-12);
        assert_eq!(std_dev(&[]), 0.0);
    }

    #[test]
    fn collinear_points_are_all_kept() {
        let x: Vec<f64> = (0..40).map(|i| 0.1 + i as f64 * 0.01).collect();
        let y: Vec<f64> = x.iter().map(|v| 1.9 * v + 0.31).collect();
        let (_, keep) = clip_outliers(&x, &y, 3.0).unwrap();
        assert!(keep.iter().all(|&k| k));
    }

    #[test]
    fn single_outlier_is_clipped() {
        let mut x: Vec<f64> = (0..30).map(|i| i as f64 * 0.01).collect();
        let mut y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, v)| 2.0 * v + if i % 2 == 0 { 0.001 } else { -0.001 })
            .collect();
        x.push(0.15);
        y.push(2.0 * 0.15 + 0.5);

        let (_, keep) = clip_outliers(&x, &y, 3.0).unwrap();
        assert!(!keep[30]);
        assert_eq!(keep.iter().filter(|&&k| !k).count(), 1);
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(fit_line(&[], &[]), Err(Error::Fit(_))));
        assert!(fit_line(&[1.0], &[]).is_err());
    }
}
