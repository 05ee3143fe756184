//! 峰值与半高全宽检测
//!
//! 用于在第一个数据块上确定残差轴的bin边界：
//! 1. 高斯拟合第一块的直方图得到中心和FWHM
//! 2. 拟合不收敛时退回简单峰值法（最高bin + 半高交点插值）
//! 3. 两者均失败时使用以0为中心、固定像素倍数的窗口

use super::accumulator::Histogram1D;
use super::edges::BinEdges;
use crate::error::AnalysisResult;
use crate::fit::fit_histogram;
use crate::tools::constants::histogram as hist_limits;
use serde::{Deserialize, Serialize};

/// 峰值估计
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakEstimate {
    pub center: f64,
    pub fwhm: f64,
    pub height: f64,
}

/// 窗口边界的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakSource {
    GaussianFit,
    SimplePeak,
    DefaultWindow,
}

/// 残差窗口参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPolicy {
    /// 像素间距
    pub pixel_pitch: f64,
    /// 窗口宽度下限：N个像素间距
    pub window_pixels: f64,
    /// 窗口宽度下限：M倍FWHM
    pub window_fwhm: f64,
    /// 显式bin数；为空时由 `bins_per_pixel` 推导
    pub nbins: Option<usize>,
    pub bins_per_pixel: f64,
}

/// 高斯拟合得到峰值
pub fn gaussian_peak(hist: &Histogram1D) -> Option<PeakEstimate> {
    let coeffs = *fit_histogram(hist).coefficients()?;
    let (lo, hi) = (hist.edges().min(), hist.edges().max());
    // 中心落在直方图范围外视为不可信
    (coeffs.mean >= lo && coeffs.mean <= hi).then(|| PeakEstimate {
        center: coeffs.mean,
        fwhm: coeffs.fwhm(),
        height: coeffs.amplitude,
    })
}

/// 简单峰值法：最高bin为中心，左右寻找半高交点并线性插值
pub fn simple_peak(hist: &Histogram1D) -> Option<PeakEstimate> {
    let counts = hist.counts();
    let (peak_bin, &peak) = counts
        .iter()
        .enumerate()
        .max_by_key(|&(i, &k)| (k, std::cmp::Reverse(i)))?;
    if peak == 0 {
        return None;
    }
    let centers = hist.edges().centers();
    let half = peak as f64 / 2.0;

    let crossing = |from: usize, to: usize| -> f64 {
        // from 在半高之上，to 在半高之下（或等于）
        let (y0, y1) = (counts[from] as f64, counts[to] as f64);
        let t = if y0 != y1 { (y0 - half) / (y0 - y1) } else { 0.5 };
        centers[from] + (centers[to] - centers[from]) * t
    };

    let left = (0..peak_bin)
        .rev()
        .find(|&i| (counts[i] as f64) <= half)
        .map(|i| crossing(i + 1, i))
        .unwrap_or(hist.edges().min());
    let right = (peak_bin + 1..counts.len())
        .find(|&i| (counts[i] as f64) <= half)
        .map(|i| crossing(i - 1, i))
        .unwrap_or(hist.edges().max());

    let fwhm = right - left;
    (fwhm > 0.0).then_some(PeakEstimate {
        center: centers[peak_bin],
        fwhm,
        height: peak as f64,
    })
}

/// 第一块样本的粗略直方图（均值 ± 5·RMS，自动分bin）
fn initial_histogram(sample: &[f64]) -> Option<Histogram1D> {
    let finite: Vec<f64> = sample.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return None;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let rms = (finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if !(rms > 0.0) {
        return None;
    }
    let half = hist_limits::INITIAL_RANGE_RMS * rms;
    let edges = BinEdges::auto(&finite, Some((mean - half, mean + half))).ok()?;
    let mut hist = Histogram1D::new(edges);
    hist.fill(&finite);
    Some(hist)
}

/// 基于第一数据块确定残差轴边界
///
/// 窗口宽度 = max(N·像素间距, M·FWHM)，以检测到的峰为中心。
pub fn establish_residual_edges(
    sample: &[f64],
    policy: &WindowPolicy,
) -> AnalysisResult<(BinEdges, PeakSource)> {
    let initial = initial_histogram(sample);
    let detected = initial.as_ref().and_then(|hist| {
        gaussian_peak(hist)
            .map(|p| (p, PeakSource::GaussianFit))
            .or_else(|| simple_peak(hist).map(|p| (p, PeakSource::SimplePeak)))
    });

    let min_width = policy.window_pixels * policy.pixel_pitch;
    let (center, width, source) = match detected {
        Some((peak, source)) => (
            peak.center,
            min_width.max(policy.window_fwhm * peak.fwhm),
            source,
        ),
        None => (0.0, min_width, PeakSource::DefaultWindow),
    };

    let nbins = policy.nbins.unwrap_or_else(|| {
        let bin_width = policy.pixel_pitch / policy.bins_per_pixel;
        ((width / bin_width).round() as usize).max(1)
    });
    let edges = BinEdges::uniform(center - width / 2.0, center + width / 2.0, nbins)?;
    Ok((edges, source))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> WindowPolicy {
        WindowPolicy {
            pixel_pitch: 50.0,
            window_pixels: 10.0,
            window_fwhm: 8.0,
            nbins: None,
            bins_per_pixel: 10.0,
        }
    }

    #[test]
    fn test_simple_peak_triangle() {
        let edges = BinEdges::uniform(0.0, 7.0, 7).unwrap();
        let mut hist = Histogram1D::new(edges);
        for (bin, count) in [0usize, 2, 4, 8, 4, 2, 0].iter().enumerate() {
            for _ in 0..*count {
                hist.fill_one(bin as f64 + 0.5);
            }
        }
        let peak = simple_peak(&hist).unwrap();
        assert_eq!(peak.center, 3.5);
        assert_eq!(peak.height, 8.0);
        assert!((peak.fwhm - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_default_window_when_no_data() {
        let (edges, source) = establish_residual_edges(&[], &policy()).unwrap();
        assert_eq!(source, PeakSource::DefaultWindow);
        assert_eq!(edges.min(), -250.0);
        assert_eq!(edges.max(), 250.0);
        assert_eq!(edges.n_bins(), 100);
    }

    #[test]
    fn test_wide_peak_sets_window_from_fwhm() {
        // 宽度约400的三角分布，FWHM≈200 → 8·FWHM > 10·50
        let sample: Vec<f64> = (0..4000)
            .map(|i| {
                let u = (i as f64 + 0.5) / 4000.0;
                let t = if u < 0.5 { (2.0 * u).sqrt() - 1.0 } else { 1.0 - (2.0 * (1.0 - u)).sqrt() };
                30.0 + 200.0 * t
            })
            .collect();
        let (edges, source) = establish_residual_edges(&sample, &policy()).unwrap();
        assert_ne!(source, PeakSource::DefaultWindow);
        let width = edges.max() - edges.min();
        assert!(width > 500.0);
        let center = 0.5 * (edges.max() + edges.min());
        assert!((center - 30.0).abs() < 20.0);
    }
}
