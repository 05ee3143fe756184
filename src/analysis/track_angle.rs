//! 轨迹角度分析
//!
//! 参考系（某DUT或望远镜单位系）的平面法向 n（z分量为正）、列轴 u、行轴 v。
//! 对每条轨迹的单位方向 ŝ：
//! - 总角度 = arccos(n·ŝ)
//! - α：ŝ 投影到垂直于 n×u 的平面后与 n 的夹角，符号取 ŝ·u
//! - β：ŝ 投影到垂直于 n×v 的平面后与 n 的夹角，符号取 ŝ·v
//!
//! 未给出显式范围时，先缓存至少 `MIN_RANGE_SAMPLES` 条轨迹再由 均值 ± 5σ 冻结边界，
//! 避免一个很小的首数据块把窗口压成一条线。

use super::config::TrackAngleSettings;
use super::{AnalyzerPhase, ChunkAnalyzer};
use crate::error::AnalysisResult;
use crate::fit::{FitOutcome, GaussCoefficients, fit_histogram};
use crate::geometry::DutTransform;
use crate::histogram::{BinEdges, Histogram1D, Mergeable};
use crate::table::TrackRecord;
use crate::tools::constants::track_angle::{MIN_RANGE_SAMPLES, RANGE_SIGMA};
use log::warn;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

/// 角度参考系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleReference {
    Telescope,
    Dut(usize),
}

impl AngleReference {
    pub fn label(&self) -> String {
        match self {
            Self::Telescope => "telescope".to_string(),
            Self::Dut(i) => format!("DUT{i}"),
        }
    }
}

/// 角度种类
pub const ANGLE_KINDS: [&str; 3] = ["total", "alpha", "beta"];

#[derive(Debug, Clone)]
pub struct AngleHistogram {
    pub kind: &'static str,
    pub histogram: Histogram1D,
    pub fit: FitOutcome<GaussCoefficients>,
}

#[derive(Debug, Clone)]
pub struct TrackAngleResult {
    pub reference: AngleReference,
    /// [总角度, α, β]
    pub angles: Vec<AngleHistogram>,
    pub n_tracks: u64,
    pub warnings: Vec<String>,
}

impl TrackAngleResult {
    /// (均值, σ)：束流发散度
    pub fn divergence(&self, kind: &str) -> Option<(f64, f64)> {
        let angle = self.angles.iter().find(|a| a.kind == kind)?;
        angle.fit.coefficients().map(|c| (c.mean, c.sigma.abs()))
    }
}

/// 参考系的三个单位轴
#[derive(Debug, Clone, Copy)]
struct ReferenceAxes {
    normal: Vector3<f64>,
    column: Vector3<f64>,
    row: Vector3<f64>,
}

impl ReferenceAxes {
    fn from_transform(transform: &DutTransform) -> Self {
        Self {
            normal: transform.plane_normal(),
            column: transform.column_axis(),
            row: transform.row_axis(),
        }
    }

    /// ŝ 在垂直于 n×axis 的平面内与 n 的夹角，符号取 ŝ·axis
    fn projected_angle(&self, direction: &Vector3<f64>, axis: &Vector3<f64>) -> f64 {
        let Some(w) = self.normal.cross(axis).try_normalize(f64::EPSILON) else {
            return f64::NAN;
        };
        let projected = direction - w * direction.dot(&w);
        let Some(projected) = projected.try_normalize(f64::EPSILON) else {
            return f64::NAN;
        };
        let angle = projected.dot(&self.normal).clamp(-1.0, 1.0).acos();
        if direction.dot(axis) < 0.0 { -angle } else { angle }
    }

    /// [总角度, α, β]
    fn angles(&self, slope: &Vector3<f64>) -> Option<[f64; 3]> {
        let direction = slope.try_normalize(f64::EPSILON)?;
        let total = self.normal.dot(&direction).clamp(-1.0, 1.0).acos();
        Some([
            total,
            self.projected_angle(&direction, &self.column),
            self.projected_angle(&direction, &self.row),
        ])
    }
}

pub struct TrackAngleAnalyzer {
    reference: AngleReference,
    axes: ReferenceAxes,
    config: TrackAngleSettings,
    max_chi2: Option<f64>,
    phase: AnalyzerPhase,
    /// 边界冻结前缓存的角度样本
    pending: Vec<[f64; 3]>,
    histograms: Vec<Histogram1D>,
    n_tracks: u64,
    warnings: Vec<String>,
}

impl TrackAngleAnalyzer {
    pub fn new(
        reference: AngleReference,
        transform: &DutTransform,
        config: &TrackAngleSettings,
        max_chi2: Option<f64>,
    ) -> Self {
        Self {
            reference,
            axes: ReferenceAxes::from_transform(transform),
            config: config.clone(),
            max_chi2,
            phase: AnalyzerPhase::Uninitialized,
            pending: Vec::new(),
            histograms: Vec::new(),
            n_tracks: 0,
            warnings: Vec::new(),
        }
    }

    /// 望远镜参考系（单位旋转）
    pub fn telescope(config: &TrackAngleSettings, max_chi2: Option<f64>) -> Self {
        Self::new(AngleReference::Telescope, &DutTransform::identity(), config, max_chi2)
    }

    /// 显式范围，否则缓存样本的 均值 ± 5σ；无样本或所有轨迹平行时取 ±π/2；总角度非负
    fn edges_for(&self, kind: usize, sample: &[f64]) -> AnalysisResult<BinEdges> {
        let nbins = self.config.nbins;
        if let Some(range) = self.config.angle_range {
            return if kind == 0 {
                BinEdges::uniform(0.0, range, nbins)
            } else {
                BinEdges::uniform(-range, range, nbins)
            };
        }

        let finite: Vec<f64> = sample.iter().copied().filter(|v| v.is_finite()).collect();
        let n = finite.len() as f64;
        let mean = finite.iter().sum::<f64>() / n;
        let sigma = (finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        let (lo, hi) = if finite.is_empty() || !(sigma > 0.0) {
            (-FRAC_PI_2, FRAC_PI_2)
        } else {
            (mean - RANGE_SIGMA * sigma, mean + RANGE_SIGMA * sigma)
        };
        let lo = if kind == 0 { lo.max(0.0) } else { lo };
        if hi > lo {
            BinEdges::uniform(lo, hi, nbins)
        } else {
            BinEdges::uniform(0.0, FRAC_PI_2, nbins)
        }
    }

    fn establish(&mut self, samples: &[[f64; 3]]) -> AnalysisResult<()> {
        let mut histograms = Vec::with_capacity(ANGLE_KINDS.len());
        for kind in 0..ANGLE_KINDS.len() {
            let values: Vec<f64> = samples.iter().map(|a| a[kind]).collect();
            histograms.push(Histogram1D::new(self.edges_for(kind, &values)?));
        }
        self.histograms = histograms;
        self.phase = AnalyzerPhase::BinningEstablished;
        Ok(())
    }

    /// 冻结边界并填入缓存样本
    fn establish_from_pending(&mut self) -> AnalysisResult<()> {
        let pending = std::mem::take(&mut self.pending);
        self.establish(&pending)?;
        self.fold(&pending)
    }

    fn fold(&mut self, samples: &[[f64; 3]]) -> AnalysisResult<()> {
        for (kind, histogram) in self.histograms.iter_mut().enumerate() {
            let mut partial = histogram.empty_like();
            for angles in samples {
                partial.fill_one(angles[kind]);
            }
            histogram.merge_from(&partial)?;
        }
        self.n_tracks += samples.len() as u64;
        self.phase = AnalyzerPhase::Accumulating;
        Ok(())
    }
}

impl ChunkAnalyzer for TrackAngleAnalyzer {
    type Row = TrackRecord;
    type Output = TrackAngleResult;

    fn process_chunk(&mut self, chunk: &[TrackRecord]) -> AnalysisResult<()> {
        self.phase.ensure_open("track_angle")?;
        let samples: Vec<[f64; 3]> = chunk
            .iter()
            .filter(|r| r.has_valid_track() && r.passes_chi2(self.max_chi2))
            .filter_map(|r| self.axes.angles(&r.slope()))
            .collect();

        if self.phase == AnalyzerPhase::Uninitialized {
            self.pending.extend(samples);
            let ready =
                self.config.angle_range.is_some() || self.pending.len() >= MIN_RANGE_SAMPLES;
            if ready && !self.pending.is_empty() {
                self.establish_from_pending()?;
            }
            return Ok(());
        }
        self.fold(&samples)
    }

    fn finalize(&mut self) -> AnalysisResult<TrackAngleResult> {
        self.phase.ensure_open("track_angle")?;
        if self.phase == AnalyzerPhase::Uninitialized {
            self.establish_from_pending()?;
        }
        let label = self.reference.label();
        let mut angles = Vec::with_capacity(self.histograms.len());
        for (kind, histogram) in ANGLE_KINDS.into_iter().zip(std::mem::take(&mut self.histograms)) {
            let fit = fit_histogram(&histogram);
            if let Some(reason) = fit.failure_reason() {
                let message = format!("{label} {kind} 角度高斯拟合失败: {reason}");
                warn!("{message}");
                self.warnings.push(message);
            }
            angles.push(AngleHistogram {
                kind,
                histogram,
                fit,
            });
        }
        self.phase = AnalyzerPhase::Finalized;
        Ok(TrackAngleResult {
            reference: self.reference,
            angles,
            n_tracks: self.n_tracks,
            warnings: std::mem::take(&mut self.warnings),
        })
    }

    fn phase(&self) -> AnalyzerPhase {
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_signs_follow_axes() {
        let axes = ReferenceAxes::from_transform(&DutTransform::identity());
        let [total, alpha, beta] = axes.angles(&Vector3::new(0.01, -0.02, 1.0)).unwrap();

        assert!((alpha - 0.01f64.atan()).abs() < 1e-12);
        assert!((beta + 0.02f64.atan()).abs() < 1e-12);
        let expected_total = (1.0 / (1.0f64 + 0.0001 + 0.0004).sqrt()).acos();
        assert!((total - expected_total).abs() < 1e-12);
    }

    #[test]
    fn test_normal_incidence_on_rotated_plane() {
        // 绕y轴转0.1 rad的平面：沿其法向入射的轨迹 α = β = 0
        let transform = DutTransform::aligned(Vector3::zeros(), 0.0, 0.1, 0.0);
        let axes = ReferenceAxes::from_transform(&transform);
        let [total, alpha, beta] = axes.angles(&transform.plane_normal()).unwrap();
        assert!(total.abs() < 1e-7);
        assert!(alpha.abs() < 1e-7);
        assert!(beta.abs() < 1e-7);

        let [_, alpha, _] = axes.angles(&Vector3::z()).unwrap();
        assert!((alpha.abs() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_explicit_range_and_chunking() {
        let config = TrackAngleSettings {
            nbins: 50,
            angle_range: Some(0.01),
        };
        let mut analyzer = TrackAngleAnalyzer::telescope(&config, None);
        let rows: Vec<TrackRecord> = (0..400)
            .map(|i| TrackRecord {
                event_number: i,
                offset: [0.0; 3],
                slope: [((i % 21) as f64 - 10.0) * 2e-4, 0.0, 1.0],
                track_chi2: 1.0,
                hits: vec![],
            })
            .collect();
        for chunk in rows.chunks(33) {
            analyzer.process_chunk(chunk).unwrap();
        }
        let result = analyzer.finalize().unwrap();
        assert_eq!(result.n_tracks, 400);
        let alpha = &result.angles[1];
        assert_eq!(alpha.histogram.total(), 400);
        assert_eq!(alpha.histogram.edges().min(), -0.01);
        // 总角度非负
        assert_eq!(result.angles[0].histogram.edges().min(), 0.0);
    }

    fn tilted(i: i64, alpha: f64) -> TrackRecord {
        TrackRecord {
            event_number: i,
            offset: [0.0; 3],
            slope: [alpha.tan(), 0.0, 1.0],
            track_chi2: 1.0,
            hits: vec![],
        }
    }

    fn spread_rows() -> Vec<TrackRecord> {
        // α 在 ±1 mrad 内均匀分布，顺序打乱
        (0..1000)
            .map(|i| {
                let k = (i * 7919) % 1000;
                tilted(i, (k as f64 / 999.0 - 0.5) * 2e-3)
            })
            .collect()
    }

    #[test]
    fn test_single_row_chunks_keep_every_track() {
        let config = TrackAngleSettings {
            nbins: 50,
            angle_range: None,
        };
        let rows = spread_rows();

        let mut whole = TrackAngleAnalyzer::telescope(&config, None);
        whole.process_chunk(&rows).unwrap();
        let whole = whole.finalize().unwrap();

        let mut single = TrackAngleAnalyzer::telescope(&config, None);
        for row in rows.chunks(1) {
            single.process_chunk(row).unwrap();
        }
        let single = single.finalize().unwrap();

        assert_eq!(whole.angles[1].histogram.total(), 1000);
        assert_eq!(single.angles[1].histogram.total(), 1000);
        let edges = single.angles[1].histogram.edges();
        assert!(edges.max() - edges.min() > 2e-3);

        let (_, sigma_whole) = whole.divergence("alpha").unwrap();
        let (_, sigma_single) = single.divergence("alpha").unwrap();
        assert!((sigma_whole - sigma_single).abs() < 0.2 * sigma_whole);
    }

    #[test]
    fn test_parallel_tracks_use_default_range() {
        let config = TrackAngleSettings {
            nbins: 20,
            angle_range: None,
        };
        let mut analyzer = TrackAngleAnalyzer::telescope(&config, None);
        let rows: Vec<TrackRecord> = (0..150).map(|i| tilted(i, 0.0)).collect();
        analyzer.process_chunk(&rows).unwrap();
        let result = analyzer.finalize().unwrap();
        let alpha = result.angles[1].histogram.edges();
        assert_eq!(alpha.min(), -FRAC_PI_2);
        assert_eq!(alpha.max(), FRAC_PI_2);
        assert_eq!(result.angles[1].histogram.total(), 150);
        assert_eq!(result.angles[0].histogram.edges().min(), 0.0);
    }

    #[test]
    fn test_small_stream_establishes_on_finalize() {
        let config = TrackAngleSettings {
            nbins: 20,
            angle_range: None,
        };
        let mut analyzer = TrackAngleAnalyzer::telescope(&config, None);
        for (i, row) in spread_rows().into_iter().take(30).enumerate() {
            analyzer.process_chunk(&[row]).unwrap();
            assert_eq!(analyzer.phase(), AnalyzerPhase::Uninitialized, "row {i}");
        }
        let result = analyzer.finalize().unwrap();
        assert_eq!(result.n_tracks, 30);
        assert_eq!(result.angles[2].histogram.total(), 30);
        assert_eq!(analyzer.phase(), AnalyzerPhase::Finalized);
    }
}
