//! 流式直方图累加器
//!
//! 每个数据块先生成局部直方图，再按元素加到累计计数中；
//! 逐bin均值使用加权合并。合并任意数量的数据块后结果与单次遍历一致。

use super::edges::BinEdges;
use crate::error::{AnalysisError, AnalysisResult};

/// 可合并的累计状态
pub trait Mergeable {
    /// 将另一份（同一组边界下的）局部状态并入自身
    fn merge_from(&mut self, other: &Self) -> AnalysisResult<()>;
}

fn ensure_same_edges(name: &str, a: &BinEdges, b: &BinEdges) -> AnalysisResult<()> {
    if a == b {
        Ok(())
    } else {
        Err(AnalysisError::BinningMismatch(format!(
            "{name}: {} bins [{}, {}] vs {} bins [{}, {}]",
            a.n_bins(),
            a.min(),
            a.max(),
            b.n_bins(),
            b.min(),
            b.max()
        )))
    }
}

// ==================== 一维直方图 ====================

/// 一维计数直方图
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram1D {
    edges: BinEdges,
    counts: Vec<u64>,
}

impl Histogram1D {
    pub fn new(edges: BinEdges) -> Self {
        let counts = vec![0; edges.n_bins()];
        Self { edges, counts }
    }

    /// 同边界的空直方图（用作数据块局部状态）
    pub fn empty_like(&self) -> Self {
        Self::new(self.edges.clone())
    }

    #[inline]
    pub fn fill_one(&mut self, x: f64) {
        if let Some(bin) = self.edges.find_bin(x) {
            self.counts[bin] += 1;
        }
    }

    pub fn fill(&mut self, values: &[f64]) {
        for &x in values {
            self.fill_one(x);
        }
    }

    pub fn edges(&self) -> &BinEdges {
        &self.edges
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// 以bin中心计算的加权均值与标准差（空直方图返回None）
    pub fn mean_and_std(&self) -> Option<(f64, f64)> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let centers = self.edges.centers();
        let n = total as f64;
        let mean = centers
            .iter()
            .zip(&self.counts)
            .map(|(c, &k)| c * k as f64)
            .sum::<f64>()
            / n;
        let var = centers
            .iter()
            .zip(&self.counts)
            .map(|(c, &k)| (c - mean).powi(2) * k as f64)
            .sum::<f64>()
            / n;
        Some((mean, var.sqrt()))
    }
}

impl Mergeable for Histogram1D {
    fn merge_from(&mut self, other: &Self) -> AnalysisResult<()> {
        ensure_same_edges("Histogram1D", &self.edges, &other.edges)?;
        for (acc, &k) in self.counts.iter_mut().zip(&other.counts) {
            *acc += k;
        }
        Ok(())
    }
}

// ==================== 二维直方图 ====================

/// 二维计数直方图，按 `[ix * ny + iy]` 行优先存储
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram2D {
    x_edges: BinEdges,
    y_edges: BinEdges,
    counts: Vec<u64>,
}

impl Histogram2D {
    pub fn new(x_edges: BinEdges, y_edges: BinEdges) -> Self {
        let counts = vec![0; x_edges.n_bins() * y_edges.n_bins()];
        Self {
            x_edges,
            y_edges,
            counts,
        }
    }

    pub fn empty_like(&self) -> Self {
        Self::new(self.x_edges.clone(), self.y_edges.clone())
    }

    #[inline]
    pub fn bin_index(&self, x: f64, y: f64) -> Option<usize> {
        let ix = self.x_edges.find_bin(x)?;
        let iy = self.y_edges.find_bin(y)?;
        Some(ix * self.y_edges.n_bins() + iy)
    }

    #[inline]
    pub fn fill_one(&mut self, x: f64, y: f64) {
        if let Some(index) = self.bin_index(x, y) {
            self.counts[index] += 1;
        }
    }

    pub fn fill(&mut self, xs: &[f64], ys: &[f64]) {
        for (&x, &y) in xs.iter().zip(ys) {
            self.fill_one(x, y);
        }
    }

    pub fn get(&self, ix: usize, iy: usize) -> u64 {
        self.counts[ix * self.y_edges.n_bins() + iy]
    }

    pub fn x_edges(&self) -> &BinEdges {
        &self.x_edges
    }

    pub fn y_edges(&self) -> &BinEdges {
        &self.y_edges
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.x_edges.n_bins(), self.y_edges.n_bins())
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

impl Mergeable for Histogram2D {
    fn merge_from(&mut self, other: &Self) -> AnalysisResult<()> {
        ensure_same_edges("Histogram2D.x", &self.x_edges, &other.x_edges)?;
        ensure_same_edges("Histogram2D.y", &self.y_edges, &other.y_edges)?;
        for (acc, &k) in self.counts.iter_mut().zip(&other.counts) {
            *acc += k;
        }
        Ok(())
    }
}

// ==================== 逐bin运行均值 ====================

/// 逐bin均值与计数
///
/// 合并规则：M' = M + (mₖ − M)·nₖ/(N + nₖ)，与 (M·N + mₖ·nₖ)/(N + nₖ) 等价，
/// 在 N ≫ nₖ 时数值稳定；空bin保持均值0，由下游掩码。
#[derive(Debug, Clone, PartialEq)]
pub struct RunningMeans {
    means: Vec<f64>,
    counts: Vec<u64>,
}

impl RunningMeans {
    pub fn new(n_bins: usize) -> Self {
        Self {
            means: vec![0.0; n_bins],
            counts: vec![0; n_bins],
        }
    }

    /// 以逐bin求和并入一个数据块
    fn merge_sums(&mut self, sums: &[f64], counts: &[u64]) {
        for (bin, (&sum, &n)) in sums.iter().zip(counts).enumerate() {
            if n > 0 {
                self.merge_bin(bin, sum / n as f64, n);
            }
        }
    }

    /// 加权合并单个bin
    #[inline]
    fn merge_bin(&mut self, bin: usize, chunk_mean: f64, chunk_count: u64) {
        if chunk_count == 0 {
            return;
        }
        let total = self.counts[bin] + chunk_count;
        let weight = chunk_count as f64 / total as f64;
        self.means[bin] += (chunk_mean - self.means[bin]) * weight;
        self.counts[bin] = total;
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&n| n == 0)
    }
}

impl Mergeable for RunningMeans {
    fn merge_from(&mut self, other: &Self) -> AnalysisResult<()> {
        if self.len() != other.len() {
            return Err(AnalysisError::BinningMismatch(format!(
                "RunningMeans: {} vs {} bins",
                self.len(),
                other.len()
            )));
        }
        for bin in 0..other.len() {
            self.merge_bin(bin, other.means[bin], other.counts[bin]);
        }
        Ok(())
    }
}

/// 一维分bin均值（如位置–残差剖面）
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedMean1D {
    edges: BinEdges,
    stats: RunningMeans,
}

impl BinnedMean1D {
    pub fn new(edges: BinEdges) -> Self {
        let stats = RunningMeans::new(edges.n_bins());
        Self { edges, stats }
    }

    /// 并入一个数据块：先求块内逐bin均值，再加权合并
    pub fn update_chunk(&mut self, positions: &[f64], values: &[f64]) {
        let n = self.edges.n_bins();
        let mut sums = vec![0.0; n];
        let mut counts = vec![0u64; n];
        for (&x, &v) in positions.iter().zip(values) {
            if !v.is_finite() {
                continue;
            }
            if let Some(bin) = self.edges.find_bin(x) {
                sums[bin] += v;
                counts[bin] += 1;
            }
        }
        self.stats.merge_sums(&sums, &counts);
    }

    pub fn edges(&self) -> &BinEdges {
        &self.edges
    }

    pub fn means(&self) -> &[f64] {
        self.stats.means()
    }

    pub fn counts(&self) -> &[u64] {
        self.stats.counts()
    }
}

impl Mergeable for BinnedMean1D {
    fn merge_from(&mut self, other: &Self) -> AnalysisResult<()> {
        ensure_same_edges("BinnedMean1D", &self.edges, &other.edges)?;
        self.stats.merge_from(&other.stats)
    }
}

/// 二维分bin均值（如击中–轨迹距离图）
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedMean2D {
    x_edges: BinEdges,
    y_edges: BinEdges,
    stats: RunningMeans,
}

impl BinnedMean2D {
    pub fn new(x_edges: BinEdges, y_edges: BinEdges) -> Self {
        let stats = RunningMeans::new(x_edges.n_bins() * y_edges.n_bins());
        Self {
            x_edges,
            y_edges,
            stats,
        }
    }

    pub fn update_chunk(&mut self, xs: &[f64], ys: &[f64], values: &[f64]) {
        let ny = self.y_edges.n_bins();
        let n = self.stats.len();
        let mut sums = vec![0.0; n];
        let mut counts = vec![0u64; n];
        for ((&x, &y), &v) in xs.iter().zip(ys).zip(values) {
            if !v.is_finite() {
                continue;
            }
            if let (Some(ix), Some(iy)) = (self.x_edges.find_bin(x), self.y_edges.find_bin(y)) {
                sums[ix * ny + iy] += v;
                counts[ix * ny + iy] += 1;
            }
        }
        self.stats.merge_sums(&sums, &counts);
    }

    pub fn x_edges(&self) -> &BinEdges {
        &self.x_edges
    }

    pub fn y_edges(&self) -> &BinEdges {
        &self.y_edges
    }

    pub fn means(&self) -> &[f64] {
        self.stats.means()
    }

    pub fn counts(&self) -> &[u64] {
        self.stats.counts()
    }
}

impl Mergeable for BinnedMean2D {
    fn merge_from(&mut self, other: &Self) -> AnalysisResult<()> {
        ensure_same_edges("BinnedMean2D.x", &self.x_edges, &other.x_edges)?;
        ensure_same_edges("BinnedMean2D.y", &self.y_edges, &other.y_edges)?;
        self.stats.merge_from(&other.stats)
    }
}

/// 二维逐bin极值（如最小/最大击中–轨迹距离图）
///
/// 空bin的最小值为 +∞、最大值为 −∞，由下游掩码。
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedExtrema2D {
    x_edges: BinEdges,
    y_edges: BinEdges,
    mins: Vec<f64>,
    maxs: Vec<f64>,
    counts: Vec<u64>,
}

impl BinnedExtrema2D {
    pub fn new(x_edges: BinEdges, y_edges: BinEdges) -> Self {
        let n = x_edges.n_bins() * y_edges.n_bins();
        Self {
            x_edges,
            y_edges,
            mins: vec![f64::INFINITY; n],
            maxs: vec![f64::NEG_INFINITY; n],
            counts: vec![0; n],
        }
    }

    pub fn update_chunk(&mut self, xs: &[f64], ys: &[f64], values: &[f64]) {
        let ny = self.y_edges.n_bins();
        for ((&x, &y), &v) in xs.iter().zip(ys).zip(values) {
            if !v.is_finite() {
                continue;
            }
            if let (Some(ix), Some(iy)) = (self.x_edges.find_bin(x), self.y_edges.find_bin(y)) {
                let bin = ix * ny + iy;
                self.mins[bin] = self.mins[bin].min(v);
                self.maxs[bin] = self.maxs[bin].max(v);
                self.counts[bin] += 1;
            }
        }
    }

    pub fn mins(&self) -> &[f64] {
        &self.mins
    }

    pub fn maxs(&self) -> &[f64] {
        &self.maxs
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }
}

impl Mergeable for BinnedExtrema2D {
    fn merge_from(&mut self, other: &Self) -> AnalysisResult<()> {
        ensure_same_edges("BinnedExtrema2D.x", &self.x_edges, &other.x_edges)?;
        ensure_same_edges("BinnedExtrema2D.y", &self.y_edges, &other.y_edges)?;
        for bin in 0..self.counts.len() {
            self.mins[bin] = self.mins[bin].min(other.mins[bin]);
            self.maxs[bin] = self.maxs[bin].max(other.maxs[bin]);
            self.counts[bin] += other.counts[bin];
        }
        Ok(())
    }
}
