//! 高斯拟合（Levenberg–Marquardt 非线性最小二乘）
//!
//! 模型：f(x) = A·exp(−(x − μ)² / (2σ²))

use super::outcome::FitOutcome;
use crate::histogram::Histogram1D;
use crate::tools::constants::fit as limits;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// 高斯拟合系数及其统计误差
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussCoefficients {
    pub amplitude: f64,
    pub mean: f64,
    pub sigma: f64,
    pub amplitude_error: f64,
    pub mean_error: f64,
    pub sigma_error: f64,
}

impl GaussCoefficients {
    /// 半高全宽
    pub fn fwhm(&self) -> f64 {
        2.0 * (2.0 * std::f64::consts::LN_2).sqrt() * self.sigma
    }
}

#[inline]
fn gauss(x: f64, p: &Vector3<f64>) -> f64 {
    p[0] * (-(x - p[1]).powi(2) / (2.0 * p[2] * p[2])).exp()
}

fn chi_square(xs: &[f64], ys: &[f64], p: &Vector3<f64>) -> f64 {
    xs.iter()
        .zip(ys)
        .map(|(&x, &y)| (y - gauss(x, p)).powi(2))
        .sum()
}

/// 法方程 JᵀJ 与梯度 Jᵀr
fn normal_equations(xs: &[f64], ys: &[f64], p: &Vector3<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    let mut jtj = Matrix3::zeros();
    let mut jtr = Vector3::zeros();
    let (a, mu, sigma) = (p[0], p[1], p[2]);
    let s2 = sigma * sigma;

    for (&x, &y) in xs.iter().zip(ys) {
        let d = x - mu;
        let e = (-d * d / (2.0 * s2)).exp();
        let j = Vector3::new(e, a * e * d / s2, a * e * d * d / (s2 * sigma));
        let r = y - a * e;
        jtj += j * j.transpose();
        jtr += j * r;
    }
    (jtj, jtr)
}

/// 对 (x, y) 点拟合高斯
///
/// `initial` 为 (A, μ, σ) 初值，通常取 (峰高, 样本均值, 样本RMS)。
pub fn fit_gaussian(xs: &[f64], ys: &[f64], initial: (f64, f64, f64)) -> FitOutcome<GaussCoefficients> {
    if xs.len() != ys.len() {
        return FitOutcome::failed("x/y长度不一致");
    }
    if xs.len() < 4 {
        return FitOutcome::failed(format!("拟合点数不足: {}", xs.len()));
    }
    let (a0, mu0, sigma0) = initial;
    if !(a0.is_finite() && mu0.is_finite() && sigma0.is_finite()) || sigma0 <= 0.0 || a0 <= 0.0 {
        return FitOutcome::failed(format!("无效初值: A={a0}, μ={mu0}, σ={sigma0}"));
    }

    let mut p = Vector3::new(a0, mu0, sigma0);
    let mut chi2 = chi_square(xs, ys, &p);
    let mut lambda = limits::LM_INITIAL_LAMBDA;
    let mut converged = false;

    for _ in 0..limits::LM_MAX_ITERATIONS {
        let (jtj, jtr) = normal_equations(xs, ys, &p);
        let mut damped = jtj;
        for i in 0..3 {
            damped[(i, i)] += lambda * jtj[(i, i)].max(f64::MIN_POSITIVE);
        }
        let Some(step) = damped.lu().solve(&jtr) else {
            lambda *= 10.0;
            if lambda > limits::LM_MAX_LAMBDA {
                break;
            }
            continue;
        };

        let candidate = p + step;
        let candidate_chi2 = chi_square(xs, ys, &candidate);
        if candidate_chi2.is_finite() && candidate_chi2 <= chi2 && candidate[2] != 0.0 {
            let improvement = chi2 - candidate_chi2;
            p = candidate;
            chi2 = candidate_chi2;
            lambda = (lambda / 10.0).max(1e-12);
            let small_step = step.norm() <= limits::LM_STEP_TOLERANCE * (p.norm() + 1e-12);
            if improvement <= limits::LM_CHI2_TOLERANCE * chi2.max(f64::MIN_POSITIVE) || small_step {
                converged = true;
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > limits::LM_MAX_LAMBDA {
                // 无法再下降：已处于极小值
                converged = chi2.is_finite();
                break;
            }
        }
    }

    if !converged {
        return FitOutcome::failed("Levenberg–Marquardt 未在最大迭代次数内收敛");
    }
    let sigma = p[2].abs();
    if !(p[0].is_finite() && p[1].is_finite() && sigma.is_finite()) || sigma == 0.0 || p[0] <= 0.0 {
        return FitOutcome::failed(format!(
            "拟合结果无效: A={}, μ={}, σ={}",
            p[0], p[1], p[2]
        ));
    }

    // 协方差 = (JᵀJ)⁻¹ · χ²/(n − 3)
    let (jtj, _) = normal_equations(xs, ys, &p);
    let dof = (xs.len() - 3) as f64;
    let errors = jtj
        .try_inverse()
        .map(|cov| cov * (chi2 / dof))
        .map(|cov| Vector3::new(cov[(0, 0)], cov[(1, 1)], cov[(2, 2)]).map(|v| v.abs().sqrt()))
        .unwrap_or_else(|| Vector3::repeat(f64::NAN));

    FitOutcome::Converged(GaussCoefficients {
        amplitude: p[0],
        mean: p[1],
        sigma,
        amplitude_error: errors[0],
        mean_error: errors[1],
        sigma_error: errors[2],
    })
}

/// 对一维直方图拟合高斯，初值取 (峰高, 均值, RMS)
pub fn fit_histogram(hist: &Histogram1D) -> FitOutcome<GaussCoefficients> {
    let Some((mean, rms)) = hist.mean_and_std() else {
        return FitOutcome::failed("直方图为空");
    };
    let peak = hist.counts().iter().copied().max().unwrap_or(0) as f64;
    let rms = if rms > 0.0 {
        rms
    } else {
        // 全部计数落在单个bin：以bin宽作为σ初值
        let e = hist.edges().as_slice();
        (e[1] - e[0]).abs()
    };
    let centers = hist.edges().centers();
    let counts: Vec<f64> = hist.counts().iter().map(|&k| k as f64).collect();
    fit_gaussian(&centers, &counts, (peak, mean, rms))
}
