//! 加权直线拟合 y = offset + slope·x

use super::outcome::FitOutcome;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineCoefficients {
    pub offset: f64,
    pub slope: f64,
    pub offset_error: f64,
    pub slope_error: f64,
}

/// 加权最小二乘直线拟合
///
/// 权重≤0或非有限的点被忽略；有效点少于2个或x无离散度时返回 `Failed`。
pub fn fit_line(xs: &[f64], ys: &[f64], weights: &[f64]) -> FitOutcome<LineCoefficients> {
    let points: Vec<(f64, f64, f64)> = xs
        .iter()
        .zip(ys)
        .zip(weights)
        .filter(|((x, y), w)| x.is_finite() && y.is_finite() && w.is_finite() && **w > 0.0)
        .map(|((&x, &y), &w)| (x, y, w))
        .collect();

    if points.len() < 2 {
        return FitOutcome::failed(format!("有效拟合点不足: {}", points.len()));
    }

    let sw: f64 = points.iter().map(|p| p.2).sum();
    let mean_x = points.iter().map(|p| p.2 * p.0).sum::<f64>() / sw;
    let mean_y = points.iter().map(|p| p.2 * p.1).sum::<f64>() / sw;
    let sxx: f64 = points.iter().map(|p| p.2 * (p.0 - mean_x).powi(2)).sum();
    let sxy: f64 = points
        .iter()
        .map(|p| p.2 * (p.0 - mean_x) * (p.1 - mean_y))
        .sum();

    if sxx <= f64::EPSILON * sw * (mean_x.abs() + 1.0) {
        return FitOutcome::failed("x无离散度，直线拟合退化");
    }

    let slope = sxy / sxx;
    let offset = mean_y - slope * mean_x;

    // 以残差估计单位权方差
    let dof = points.len().saturating_sub(2).max(1) as f64;
    let rss: f64 = points
        .iter()
        .map(|p| p.2 * (p.1 - offset - slope * p.0).powi(2))
        .sum();
    let s2 = rss / dof;
    let slope_error = (s2 / sxx).sqrt();
    let offset_error = (s2 * (1.0 / sw + mean_x * mean_x / sxx)).sqrt();

    FitOutcome::Converged(LineCoefficients {
        offset,
        slope,
        offset_error,
        slope_error,
    })
}
