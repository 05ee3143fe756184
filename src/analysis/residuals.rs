//! 残差分析
//!
//! 残差 = 击中 − 轨迹交点，分全局坐标系（x/y残差）与局部坐标系（列/行残差）
//! 两个族，二者不可互换。每个族有：
//! - 一维残差分布（不受拟合范围限制），结束时高斯拟合，σ即分辨率
//! - 残差 vs 本轴位置、残差 vs 正交轴位置两幅二维直方图
//! - 对应的逐位置平均残差剖面，结束时加权直线拟合
//!
//! 位置取轨迹交点坐标。拟合范围只限制二维直方图与剖面。

use super::config::{AxisLimits, DutSettings};
use super::projection::{DutProjector, ProjectedRow};
use super::{AnalyzerPhase, ChunkAnalyzer, within_limits};
use crate::error::AnalysisResult;
use crate::fit::{FitOutcome, GaussCoefficients, LineCoefficients, fit_histogram, fit_line};
use crate::histogram::{
    BinEdges, BinnedMean1D, Histogram1D, Histogram2D, Mergeable, PeakSource,
    establish_residual_edges,
};
use log::{debug, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// 残差族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidualFamily {
    GlobalX,
    GlobalY,
    Column,
    Row,
}

impl ResidualFamily {
    pub const ALL: [Self; 4] = [Self::GlobalX, Self::GlobalY, Self::Column, Self::Row];

    pub fn name(&self) -> &'static str {
        match self {
            Self::GlobalX => "global_x",
            Self::GlobalY => "global_y",
            Self::Column => "column",
            Self::Row => "row",
        }
    }

    /// 坐标轴：0 = x/列，1 = y/行
    pub fn axis(&self) -> usize {
        match self {
            Self::GlobalX | Self::Column => 0,
            Self::GlobalY | Self::Row => 1,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Column | Self::Row)
    }

    fn frame(&self) -> usize {
        usize::from(self.is_local())
    }
}

/// 一行的残差与交点位置，按 [全局, 局部] 排列
#[derive(Debug, Clone, Copy)]
struct ResidualSample {
    residual: [[f64; 2]; 2],
    position: [[f64; 2]; 2],
}

impl ResidualSample {
    fn from_row(row: &ProjectedRow, cluster_size: Option<u32>) -> Option<Self> {
        if cluster_size.is_some() && row.cluster_size != cluster_size {
            return None;
        }
        let diff = |hit: Vector3<f64>, track: Vector3<f64>| [hit.x - track.x, hit.y - track.y];
        let (hit_g, track_g) = (row.hit_global?, row.intersection_global?);
        let (hit_l, track_l) = (row.hit_local?, row.intersection_local?);
        Some(Self {
            residual: [diff(hit_g, track_g), diff(hit_l, track_l)],
            position: [[track_g.x, track_g.y], [track_l.x, track_l.y]],
        })
    }

    #[inline]
    fn residual(&self, family: ResidualFamily) -> f64 {
        self.residual[family.frame()][family.axis()]
    }

    /// [本轴位置, 正交轴位置]
    #[inline]
    fn positions(&self, family: ResidualFamily) -> [f64; 2] {
        let p = self.position[family.frame()];
        [p[family.axis()], p[1 - family.axis()]]
    }
}

/// 单个残差族的累加状态
#[derive(Debug, Clone)]
struct FamilyState {
    family: ResidualFamily,
    peak_source: PeakSource,
    distribution: Histogram1D,
    correlations: [Histogram2D; 2],
    profiles: [BinnedMean1D; 2],
}

/// 单个残差族的最终结果
#[derive(Debug, Clone)]
pub struct FamilyResult {
    pub family: ResidualFamily,
    pub peak_source: PeakSource,
    pub distribution: Histogram1D,
    pub fit: FitOutcome<GaussCoefficients>,
    /// [残差 vs 本轴位置, 残差 vs 正交轴位置]
    pub correlations: [Histogram2D; 2],
    pub profiles: [BinnedMean1D; 2],
    pub profile_fits: [FitOutcome<LineCoefficients>; 2],
}

#[derive(Debug, Clone)]
pub struct ResidualResult {
    pub families: Vec<FamilyResult>,
    pub n_selected: u64,
    pub warnings: Vec<String>,
}

impl ResidualResult {
    pub fn family(&self, family: ResidualFamily) -> Option<&FamilyResult> {
        self.families.iter().find(|f| f.family == family)
    }

    /// 高斯拟合得到的分辨率
    pub fn sigma(&self, family: ResidualFamily) -> Option<f64> {
        self.family(family)?
            .fit
            .coefficients()
            .map(|c| c.sigma.abs())
    }
}

/// 残差分析器
pub struct ResidualAnalyzer {
    projector: DutProjector,
    settings: DutSettings,
    /// [全局, 局部]
    fit_limits: [AxisLimits; 2],
    phase: AnalyzerPhase,
    families: Vec<FamilyState>,
    n_selected: u64,
    warnings: Vec<String>,
}

impl ResidualAnalyzer {
    /// `stored_fit_ranges` 为预对准保存的拟合范围，仅在未配置局部拟合范围时使用
    pub fn new(
        settings: &DutSettings,
        projector: DutProjector,
        stored_fit_ranges: (Option<[f64; 2]>, Option<[f64; 2]>),
    ) -> Self {
        let res = &settings.residuals;
        let fit_limits = if res.use_fit_limits {
            let mut local = res.local_fit_limits;
            local[0] = local[0].or(stored_fit_ranges.0);
            local[1] = local[1].or(stored_fit_ranges.1);
            [res.global_fit_limits, local]
        } else {
            [[None, None], [None, None]]
        };
        Self {
            projector,
            settings: settings.clone(),
            fit_limits,
            phase: AnalyzerPhase::Uninitialized,
            families: Vec::new(),
            n_selected: 0,
            warnings: Vec::new(),
        }
    }

    /// 传感器在全局坐标系中的范围（由四角变换得到）
    fn global_sensor_range(&self) -> [(f64, f64); 2] {
        let (x0, x1) = self.settings.sensor_range(0);
        let (y0, y1) = self.settings.sensor_range(1);
        let transform = self.projector.transform();
        let corners = transform.to_global_batch(
            &[(x0, y0), (x0, y1), (x1, y0), (x1, y1)].map(|(x, y)| Vector3::new(x, y, 0.0)),
        );

        let mut ranges = [(f64::INFINITY, f64::NEG_INFINITY); 2];
        for corner in &corners {
            for (axis, range) in ranges.iter_mut().enumerate() {
                range.0 = range.0.min(corner[axis]);
                range.1 = range.1.max(corner[axis]);
            }
        }
        // 传感器绕y/x轴旋转90°时投影退化为一条线
        for (axis, range) in ranges.iter_mut().enumerate() {
            if !(range.1 > range.0) {
                let half = self.settings.pixel_size[axis] / 2.0;
                *range = (range.0 - half, range.1 + half);
            }
        }
        ranges
    }

    /// 位置轴边界：按 `npixels_per_bin` 等宽，否则自动分bin
    fn position_edges(
        &self,
        samples: &[ResidualSample],
        frame: usize,
        axis: usize,
        range: (f64, f64),
    ) -> AnalysisResult<BinEdges> {
        match self.settings.residuals.npixels_per_bin {
            Some(n) => {
                BinEdges::with_width(range.0, range.1, n as f64 * self.settings.pixel_size[axis])
            }
            None => {
                let positions: Vec<f64> = samples.iter().map(|s| s.position[frame][axis]).collect();
                BinEdges::auto(&positions, Some(range))
            }
        }
    }

    /// 由第一块样本冻结所有边界
    fn establish_binning(&mut self, samples: &[ResidualSample]) -> AnalysisResult<()> {
        let global_range = self.global_sensor_range();
        let local_range = [self.settings.sensor_range(0), self.settings.sensor_range(1)];
        let ranges = [global_range, local_range];

        let mut position = Vec::with_capacity(2);
        for (frame, frame_ranges) in ranges.iter().enumerate() {
            position.push([
                self.position_edges(samples, frame, 0, frame_ranges[0])?,
                self.position_edges(samples, frame, 1, frame_ranges[1])?,
            ]);
        }

        let mut families = Vec::with_capacity(ResidualFamily::ALL.len());
        for family in ResidualFamily::ALL {
            let values: Vec<f64> = samples.iter().map(|s| s.residual(family)).collect();
            let policy = self.settings.window_policy(family.axis());
            let (edges, peak_source) = establish_residual_edges(&values, &policy)?;
            debug!(
                "DUT{} {} 残差窗口 [{:.2}, {:.2}] ({} bins, {:?})",
                self.projector.dut(),
                family.name(),
                edges.min(),
                edges.max(),
                edges.n_bins(),
                peak_source
            );

            let frame_edges = &position[family.frame()];
            let own = frame_edges[family.axis()].clone();
            let orthogonal = frame_edges[1 - family.axis()].clone();
            families.push(FamilyState {
                family,
                peak_source,
                distribution: Histogram1D::new(edges.clone()),
                correlations: [
                    Histogram2D::new(own.clone(), edges.clone()),
                    Histogram2D::new(orthogonal.clone(), edges),
                ],
                profiles: [BinnedMean1D::new(own), BinnedMean1D::new(orthogonal)],
            });
        }

        self.families = families;
        self.phase = AnalyzerPhase::BinningEstablished;
        Ok(())
    }

    /// 将一块样本并入累计状态
    fn fold(&mut self, samples: &[ResidualSample]) -> AnalysisResult<()> {
        let limited: [Vec<&ResidualSample>; 2] = [0, 1].map(|frame| {
            samples
                .iter()
                .filter(|s| {
                    let [x, y] = s.position[frame];
                    within_limits(&self.fit_limits[frame], x, y)
                })
                .collect()
        });

        for state in &mut self.families {
            let family = state.family;

            let mut distribution = state.distribution.empty_like();
            for sample in samples {
                distribution.fill_one(sample.residual(family));
            }
            state.distribution.merge_from(&distribution)?;

            let rows = &limited[family.frame()];
            let residuals: Vec<f64> = rows.iter().map(|s| s.residual(family)).collect();
            for kind in 0..2 {
                let positions: Vec<f64> = rows.iter().map(|s| s.positions(family)[kind]).collect();
                let mut partial = state.correlations[kind].empty_like();
                partial.fill(&positions, &residuals);
                state.correlations[kind].merge_from(&partial)?;
                state.profiles[kind].update_chunk(&positions, &residuals);
            }
        }

        self.n_selected += samples.len() as u64;
        self.phase = AnalyzerPhase::Accumulating;
        Ok(())
    }
}

impl ChunkAnalyzer for ResidualAnalyzer {
    type Row = ProjectedRow;
    type Output = ResidualResult;

    fn process_chunk(&mut self, rows: &[ProjectedRow]) -> AnalysisResult<()> {
        self.phase.ensure_open("residual")?;
        let samples: Vec<ResidualSample> = rows
            .iter()
            .filter_map(|row| ResidualSample::from_row(row, self.settings.cluster_size_selection))
            .collect();

        if self.phase == AnalyzerPhase::Uninitialized {
            if samples.is_empty() {
                return Ok(());
            }
            self.establish_binning(&samples)?;
        }
        self.fold(&samples)
    }

    fn finalize(&mut self) -> AnalysisResult<ResidualResult> {
        self.phase.ensure_open("residual")?;
        let dut = self.projector.dut();
        if self.phase == AnalyzerPhase::Uninitialized {
            self.establish_binning(&[])?;
            let message = format!("DUT{dut} 没有可用于残差分析的击中");
            warn!("{message}");
            self.warnings.push(message);
        }

        let mut families = Vec::with_capacity(self.families.len());
        for state in std::mem::take(&mut self.families) {
            let fit = fit_histogram(&state.distribution);
            if let Some(reason) = fit.failure_reason() {
                let message = format!(
                    "DUT{dut} {} 残差高斯拟合失败: {reason}",
                    state.family.name()
                );
                warn!("{message}");
                self.warnings.push(message);
            }
            let profile_fits = [0, 1].map(|kind| {
                let profile = &state.profiles[kind];
                let weights: Vec<f64> = profile.counts().iter().map(|&n| n as f64).collect();
                fit_line(&profile.edges().centers(), profile.means(), &weights)
            });
            families.push(FamilyResult {
                family: state.family,
                peak_source: state.peak_source,
                distribution: state.distribution,
                fit,
                correlations: state.correlations,
                profiles: state.profiles,
                profile_fits,
            });
        }

        self.phase = AnalyzerPhase::Finalized;
        Ok(ResidualResult {
            families,
            n_selected: self.n_selected,
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
    use crate::analysis::config::RunConfig;
    use crate::geometry::DutTransform;
    use crate::table::{DutHit, TrackRecord};

    fn settings(extra: serde_json::Value) -> DutSettings {
        let mut json = serde_json::json!({
            "dut_names": ["DUT"],
            "pixel_size": [50.0, 50.0],
            "n_pixels": [80, 80],
        });
        if let (Some(base), Some(extra)) = (json.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        let config: RunConfig = serde_json::from_value(json).unwrap();
        config.resolve().unwrap().remove(0)
    }

    fn track(event: i64, x: f64, y: f64, dx: f64, dy: f64) -> TrackRecord {
        TrackRecord {
            event_number: event,
            offset: [x, y, 0.0],
            slope: [0.0, 0.0, 1.0],
            track_chi2: 1.0,
            hits: vec![DutHit::new(x + dx, y + dy, 0.0).with_cluster_size(1 + (event % 2) as u32)],
        }
    }

    fn rows() -> Vec<TrackRecord> {
        (0..2000)
            .map(|i| {
                let x = -1900.0 + (i % 39) as f64 * 100.0;
                let y = -1900.0 + (i % 37) as f64 * 100.0;
                let dx = ((i * 7919) % 41) as f64 - 20.0;
                track(i as i64, x, y, dx + 3.0, -dx)
            })
            .collect()
    }

    fn projected(projector: &DutProjector) -> Vec<ProjectedRow> {
        projector.project(&rows(), None).unwrap()
    }

    #[test]
    fn test_global_and_local_agree_for_identity() {
        let projector = DutProjector::new(0, DutTransform::identity());
        let mut analyzer = ResidualAnalyzer::new(&settings(serde_json::json!({})), projector, (None, None));
        assert_eq!(analyzer.phase(), AnalyzerPhase::Uninitialized);
        analyzer.process_chunk(&projected(&projector)).unwrap();
        assert_eq!(analyzer.phase(), AnalyzerPhase::Accumulating);
        let result = analyzer.finalize().unwrap();
        assert_eq!(analyzer.phase(), AnalyzerPhase::Finalized);

        assert_eq!(result.n_selected, 2000);
        let gx = result.family(ResidualFamily::GlobalX).unwrap();
        let col = result.family(ResidualFamily::Column).unwrap();
        assert_eq!(gx.distribution.counts(), col.distribution.counts());
        assert_eq!(gx.distribution.total(), 2000);
        // 窗口宽度至少10个像素
        let edges = gx.distribution.edges();
        assert!(edges.max() - edges.min() >= 500.0 - 1e-9);
    }

    #[test]
    fn test_finalized_analyzer_rejects_more_chunks() {
        let projector = DutProjector::new(0, DutTransform::identity());
        let mut analyzer = ResidualAnalyzer::new(&settings(serde_json::json!({})), projector, (None, None));
        analyzer.process_chunk(&projected(&projector)).unwrap();
        analyzer.finalize().unwrap();
        assert!(analyzer.process_chunk(&projected(&projector)).is_err());
        assert!(analyzer.finalize().is_err());
    }

    #[test]
    fn test_fit_limits_restrict_only_correlations() {
        let config = settings(serde_json::json!({
            "residuals": {"local_fit_limits": [[-500.0, 500.0], null]}
        }));
        let projector = DutProjector::new(0, DutTransform::identity());
        let mut analyzer = ResidualAnalyzer::new(&config, projector, (None, None));
        analyzer.process_chunk(&projected(&projector)).unwrap();
        let result = analyzer.finalize().unwrap();

        let col = result.family(ResidualFamily::Column).unwrap();
        let gx = result.family(ResidualFamily::GlobalX).unwrap();
        assert_eq!(col.distribution.total(), 2000);
        assert!(col.correlations[0].total() < 2000);
        assert_eq!(gx.correlations[0].total(), 2000);
    }

    #[test]
    fn test_stored_fit_range_used_without_explicit_limits() {
        let projector = DutProjector::new(0, DutTransform::pre_aligned(0.0, 0.0, 0.0));
        let mut analyzer = ResidualAnalyzer::new(
            &settings(serde_json::json!({})),
            projector,
            (Some([0.0, 2000.0]), None),
        );
        analyzer.process_chunk(&projected(&projector)).unwrap();
        let result = analyzer.finalize().unwrap();
        let col = result.family(ResidualFamily::Column).unwrap();
        assert!(col.correlations[0].total() < 2000);
        assert!(col.correlations[0].total() > 0);
    }

    #[test]
    fn test_cluster_size_selection() {
        let config = settings(serde_json::json!({"cluster_size_selection": 2}));
        let projector = DutProjector::new(0, DutTransform::identity());
        let mut analyzer = ResidualAnalyzer::new(&config, projector, (None, None));
        analyzer.process_chunk(&projected(&projector)).unwrap();
        assert_eq!(analyzer.finalize().unwrap().n_selected, 1000);
    }

    #[test]
    fn test_empty_stream_finalizes_with_default_window() {
        let projector = DutProjector::new(0, DutTransform::identity());
        let mut analyzer = ResidualAnalyzer::new(&settings(serde_json::json!({})), projector, (None, None));
        let result = analyzer.finalize().unwrap();
        assert_eq!(result.families.len(), 4);
        for family in &result.families {
            assert_eq!(family.peak_source, PeakSource::DefaultWindow);
            assert!(!family.fit.is_converged());
        }
        assert!(!result.warnings.is_empty());
    }
}
