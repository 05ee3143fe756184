//! 击中效率分析
//!
//! 分母：落在传感器（及可选局部区域）内的有效轨迹交点；
//! 分子：DUT击中与交点的局部距离不超过截断距离的轨迹（未设截断时只要求存在击中）。
//! 分bin效率图只作展示，全局效率由非分bin的总数经 Clopper–Pearson 区间计算。
//! 匹配轨迹另记逐bin击中–轨迹距离的均值、最小值与最大值。

use super::config::{DutSettings, EfficiencySettings};
use super::projection::ProjectedRow;
use super::{AnalyzerPhase, ChunkAnalyzer, sensor_edges, within_limits};
use crate::error::AnalysisResult;
use crate::fit::{BinomialEstimate, binomial_estimate};
use crate::histogram::{BinnedExtrema2D, BinnedMean2D, Histogram2D, MaskedMap, Mergeable};
use crate::tools::constants::fit::BINOMIAL_CONFIDENCE;
use log::warn;

#[derive(Debug, Clone)]
pub struct EfficiencyResult {
    pub total_track_density: Histogram2D,
    pub matched_track_density: Histogram2D,
    pub efficiency: MaskedMap,
    /// 逐bin平均击中–轨迹距离
    pub distance: BinnedMean2D,
    pub distance_map: MaskedMap,
    pub distance_extrema: BinnedExtrema2D,
    pub min_distance_map: MaskedMap,
    pub max_distance_map: MaskedMap,
    pub n_pass: u64,
    pub n_total: u64,
    /// 全局效率（百分比），无轨迹时为None
    pub estimate: Option<BinomialEstimate>,
    pub warnings: Vec<String>,
}

pub struct EfficiencyAnalyzer {
    dut: usize,
    config: EfficiencySettings,
    phase: AnalyzerPhase,
    total: Histogram2D,
    matched: Histogram2D,
    distance: BinnedMean2D,
    extrema: BinnedExtrema2D,
    n_pass: u64,
    n_total: u64,
}

impl EfficiencyAnalyzer {
    /// 效率图的bin由传感器尺寸与虚拟像素大小决定，构造时即冻结
    pub fn new(settings: &DutSettings) -> AnalysisResult<Self> {
        let [x_edges, y_edges] = sensor_edges(settings, settings.efficiency.bin_size)?;
        let total = Histogram2D::new(x_edges.clone(), y_edges.clone());
        Ok(Self {
            dut: settings.index,
            config: settings.efficiency.clone(),
            phase: AnalyzerPhase::BinningEstablished,
            matched: total.empty_like(),
            total,
            distance: BinnedMean2D::new(x_edges.clone(), y_edges.clone()),
            extrema: BinnedExtrema2D::new(x_edges, y_edges),
            n_pass: 0,
            n_total: 0,
        })
    }
}

impl ChunkAnalyzer for EfficiencyAnalyzer {
    type Row = ProjectedRow;
    type Output = EfficiencyResult;

    fn process_chunk(&mut self, rows: &[ProjectedRow]) -> AnalysisResult<()> {
        self.phase.ensure_open("efficiency")?;
        let mut total = self.total.empty_like();
        let mut matched = self.matched.empty_like();
        let (mut dist_x, mut dist_y, mut dist) = (Vec::new(), Vec::new(), Vec::new());

        for row in rows {
            let Some(track) = row.intersection_local else {
                continue;
            };
            if !within_limits(&self.config.local_limits, track.x, track.y)
                || total.bin_index(track.x, track.y).is_none()
            {
                continue;
            }
            total.fill_one(track.x, track.y);
            self.n_total += 1;

            let distance = row.local_distance();
            let is_matched = match (distance, self.config.cut_distance) {
                (Some(d), Some(cut)) => d <= cut,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if is_matched {
                matched.fill_one(track.x, track.y);
                self.n_pass += 1;
                if let Some(d) = distance {
                    dist_x.push(track.x);
                    dist_y.push(track.y);
                    dist.push(d);
                }
            }
        }

        self.total.merge_from(&total)?;
        self.matched.merge_from(&matched)?;
        self.distance.update_chunk(&dist_x, &dist_y, &dist);
        self.extrema.update_chunk(&dist_x, &dist_y, &dist);
        self.phase = AnalyzerPhase::Accumulating;
        Ok(())
    }

    fn finalize(&mut self) -> AnalysisResult<EfficiencyResult> {
        self.phase.ensure_open("efficiency")?;
        let dut = self.dut;
        let mut warnings = Vec::new();

        let efficiency = MaskedMap::percentage(
            &self.matched,
            &self.total,
            self.config.minimum_track_density,
        )?;
        let minimum = self.config.minimum_track_density;
        let distance_map =
            MaskedMap::from_values(self.distance.means(), self.distance.counts(), minimum);
        let min_distance_map =
            MaskedMap::from_values(self.extrema.mins(), self.extrema.counts(), minimum);
        let max_distance_map =
            MaskedMap::from_values(self.extrema.maxs(), self.extrema.counts(), minimum);

        if efficiency.all_masked() {
            warnings.push(format!("DUT{dut} 效率图全部被掩码（轨迹密度不足）"));
        } else if efficiency.all_zero() {
            warnings.push(format!("DUT{dut} 效率图全部为0（对准或截断距离可能有误）"));
        }
        for message in &warnings {
            warn!("{message}");
        }

        let estimate = binomial_estimate(self.n_pass, self.n_total, BINOMIAL_CONFIDENCE)?;

        self.phase = AnalyzerPhase::Finalized;
        Ok(EfficiencyResult {
            total_track_density: self.total.clone(),
            matched_track_density: self.matched.clone(),
            efficiency,
            distance: self.distance.clone(),
            distance_map,
            distance_extrema: self.extrema.clone(),
            min_distance_map,
            max_distance_map,
            n_pass: self.n_pass,
            n_total: self.n_total,
            estimate,
            warnings,
        })
    }

    fn phase(&self) -> AnalyzerPhase {
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::DutProjector;
    use crate::analysis::config::RunConfig;
    use crate::geometry::DutTransform;
    use crate::table::{DutHit, TrackRecord};

    fn settings(extra: serde_json::Value) -> DutSettings {
        let mut json = serde_json::json!({
            "dut_names": ["DUT"],
            "pixel_size": [100.0, 100.0],
            "n_pixels": [10, 10],
        });
        if let (Some(base), Some(extra)) = (json.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        let config: RunConfig = serde_json::from_value(json).unwrap();
        config.resolve().unwrap().remove(0)
    }

    fn track(i: i64, hit: DutHit) -> TrackRecord {
        let x = -450.0 + (i % 10) as f64 * 100.0;
        let y = -450.0 + ((i / 10) % 10) as f64 * 100.0;
        TrackRecord {
            event_number: i,
            offset: [x, y, 0.0],
            slope: [0.0, 0.0, 1.0],
            track_chi2: 1.0,
            hits: vec![DutHit { x: x + hit.x, y: y + hit.y, ..hit }],
        }
    }

    fn analyzer(extra: serde_json::Value) -> EfficiencyAnalyzer {
        EfficiencyAnalyzer::new(&settings(extra)).unwrap()
    }

    fn project(rows: &[TrackRecord]) -> Vec<ProjectedRow> {
        DutProjector::new(0, DutTransform::identity())
            .project(rows, None)
            .unwrap()
    }

    #[test]
    fn test_cut_distance_applies() {
        let mut eff = analyzer(serde_json::json!({"efficiency": {"cut_distance": 20.0}}));
        let rows: Vec<TrackRecord> = (0..200)
            .map(|i| {
                let offset = if i % 4 == 0 { 30.0 } else { 5.0 };
                track(i, DutHit::new(offset, 0.0, 0.0))
            })
            .collect();
        eff.process_chunk(&project(&rows)).unwrap();
        let result = eff.finalize().unwrap();
        assert_eq!(eff.phase(), AnalyzerPhase::Finalized);
        assert_eq!(result.n_total, 200);
        assert_eq!(result.n_pass, 150);
        let estimate = result.estimate.unwrap();
        assert!((estimate.value - 75.0).abs() < 1e-12);
    }

    #[test]
    fn test_distance_extrema_maps() {
        let mut eff = analyzer(serde_json::json!({}));
        // 每个bin两条轨迹：距离 4 与 12
        let rows: Vec<TrackRecord> = (0..200)
            .map(|i| {
                let offset = if i < 100 { 4.0 } else { 12.0 };
                track(i, DutHit::new(0.0, offset, 0.0))
            })
            .collect();
        eff.process_chunk(&project(&rows[..130])).unwrap();
        eff.process_chunk(&project(&rows[130..])).unwrap();
        let result = eff.finalize().unwrap();

        assert!(result.min_distance_map.unmasked().all(|v| (v - 4.0).abs() < 1e-9));
        assert!(result.max_distance_map.unmasked().all(|v| (v - 12.0).abs() < 1e-9));
        assert!(result.distance_map.unmasked().all(|v| (v - 8.0).abs() < 1e-9));
        assert!(!result.min_distance_map.all_masked());
    }

    #[test]
    fn test_local_limits_exclude_edge_tracks() {
        let mut eff = analyzer(serde_json::json!({
            "efficiency": {"local_limits": [[-400.0, 400.0], [-400.0, 400.0]]}
        }));
        let rows: Vec<TrackRecord> = (0..100).map(|i| track(i, DutHit::new(0.0, 0.0, 0.0))).collect();
        eff.process_chunk(&project(&rows)).unwrap();
        let result = eff.finalize().unwrap();
        assert_eq!(result.n_total, 64);
        assert_eq!(result.total_track_density.total(), 64);
    }

    #[test]
    fn test_no_hits_is_reported() {
        let mut eff = analyzer(serde_json::json!({}));
        let rows: Vec<TrackRecord> = (0..100).map(|i| track(i, DutHit::missing())).collect();
        eff.process_chunk(&project(&rows)).unwrap();
        let result = eff.finalize().unwrap();
        assert_eq!(result.n_pass, 0);
        assert!(result.efficiency.all_zero());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.distance_map.all_masked());
        assert!(result.max_distance_map.all_masked());
    }
}
