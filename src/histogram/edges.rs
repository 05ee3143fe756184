//! Bin边界
//!
//! 边界在第一个数据块确定后冻结，后续所有数据块必须使用同一组边界。

use crate::error::{AnalysisError, AnalysisResult};
use crate::tools::constants::histogram as limits;
use serde::{Deserialize, Serialize};

/// 单调递增的bin边界
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BinEdges {
    edges: Vec<f64>,
}

impl BinEdges {
    /// 从显式边界构造（校验有限且严格递增）
    pub fn new(edges: Vec<f64>) -> AnalysisResult<Self> {
        if edges.len() < 2 {
            return Err(AnalysisError::InvalidInput(
                "bin边界至少需要2个值".to_string(),
            ));
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(AnalysisError::InvalidInput("bin边界包含非有限值".to_string()));
        }
        if edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(AnalysisError::InvalidInput("bin边界必须严格递增".to_string()));
        }
        Ok(Self { edges })
    }

    /// 等宽bin（与 numpy.linspace 一致）
    pub fn uniform(min: f64, max: f64, n_bins: usize) -> AnalysisResult<Self> {
        if n_bins == 0 || !(max > min) {
            return Err(AnalysisError::InvalidInput(format!(
                "无效的等宽分bin: [{min}, {max}] / {n_bins}"
            )));
        }
        let step = (max - min) / n_bins as f64;
        let mut edges: Vec<f64> = (0..n_bins).map(|i| min + step * i as f64).collect();
        edges.push(max);
        Self::new(edges)
    }

    /// 按bin宽分bin，bin数向上取整，上界随之外扩
    pub fn with_width(min: f64, max: f64, width: f64) -> AnalysisResult<Self> {
        if !(width > 0.0) {
            return Err(AnalysisError::InvalidInput(format!("bin宽必须为正: {width}")));
        }
        let n_bins = (((max - min) / width) - 1e-9).ceil().max(1.0) as usize;
        Self::uniform(min, min + width * n_bins as f64, n_bins)
    }

    /// 自动分bin（numpy "auto" 规则）
    ///
    /// `range` 为空时使用数据极值；超出range的样本不参与估计。
    pub fn auto(sample: &[f64], range: Option<(f64, f64)>) -> AnalysisResult<Self> {
        let mut values: Vec<f64> = sample
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .filter(|v| range.is_none_or(|(lo, hi)| *v >= lo && *v <= hi))
            .collect();

        let (lo, hi) = match range {
            Some(r) => r,
            None => match (
                values.iter().copied().reduce(f64::min),
                values.iter().copied().reduce(f64::max),
            ) {
                (Some(lo), Some(hi)) => (lo, hi),
                _ => (-0.5, 0.5),
            },
        };
        let (lo, hi) = if hi > lo { (lo, hi) } else { (lo - 0.5, hi + 0.5) };

        if values.len() < 2 {
            return Self::uniform(lo, hi, 1);
        }

        values.sort_by(f64::total_cmp);
        let n = values.len() as f64;
        let span = hi - lo;

        let sturges = span / (n.log2() + 1.0);
        let iqr = percentile_sorted(&values, 75.0) - percentile_sorted(&values, 25.0);
        let fd = 2.0 * iqr * n.powf(-1.0 / 3.0);
        let width = if fd > 0.0 { sturges.min(fd) } else { sturges };

        let n_bins = ((span / width).ceil() as usize).clamp(1, limits::MAX_AUTO_BINS);
        Self::uniform(lo, hi, n_bins)
    }

    #[inline]
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.edges
    }

    pub fn min(&self) -> f64 {
        self.edges[0]
    }

    pub fn max(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    /// bin中心
    pub fn centers(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
    }

    /// 查找样本所在bin
    ///
    /// 左闭右开，最后一个bin右端闭合（numpy约定）；范围外或NaN返回None。
    #[inline]
    pub fn find_bin(&self, x: f64) -> Option<usize> {
        let last = self.max();
        if !(x >= self.min() && x <= last) {
            return None;
        }
        if x == last {
            return Some(self.n_bins() - 1);
        }
        Some(self.edges.partition_point(|&e| e <= x) - 1)
    }
}

/// 已排序数据的线性插值百分位数
pub(crate) fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = (q / 100.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}
