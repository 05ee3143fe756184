//! 击中纯度分析
//!
//! 效率分析的对偶：分母为传感器内全部有效DUT击中，
//! 分子为与轨迹交点距离小于截断距离的击中。
//! 未通过χ²截断的行在投影时已整行剔除，不进入分母；轨迹无效的击中计为不纯。

use super::config::{DutSettings, PuritySettings};
use super::projection::ProjectedRow;
use super::{AnalyzerPhase, ChunkAnalyzer, sensor_edges};
use crate::error::AnalysisResult;
use crate::fit::{BinomialEstimate, binomial_estimate};
use crate::histogram::{Histogram2D, MaskedMap, Mergeable};
use crate::tools::constants::fit::BINOMIAL_CONFIDENCE;
use log::warn;

#[derive(Debug, Clone)]
pub struct PurityResult {
    pub total_hit_density: Histogram2D,
    pub pure_hit_density: Histogram2D,
    pub purity: MaskedMap,
    pub n_pure: u64,
    pub n_total: u64,
    pub estimate: Option<BinomialEstimate>,
    pub warnings: Vec<String>,
}

pub struct PurityAnalyzer {
    dut: usize,
    config: PuritySettings,
    phase: AnalyzerPhase,
    total: Histogram2D,
    pure: Histogram2D,
    n_pure: u64,
    n_total: u64,
}

impl PurityAnalyzer {
    pub fn new(settings: &DutSettings) -> AnalysisResult<Self> {
        let [x_edges, y_edges] = sensor_edges(settings, settings.purity.bin_size)?;
        let total = Histogram2D::new(x_edges, y_edges);
        Ok(Self {
            dut: settings.index,
            config: settings.purity.clone(),
            phase: AnalyzerPhase::BinningEstablished,
            pure: total.empty_like(),
            total,
            n_pure: 0,
            n_total: 0,
        })
    }
}

impl ChunkAnalyzer for PurityAnalyzer {
    type Row = ProjectedRow;
    type Output = PurityResult;

    fn process_chunk(&mut self, rows: &[ProjectedRow]) -> AnalysisResult<()> {
        self.phase.ensure_open("purity")?;
        let mut total = self.total.empty_like();
        let mut pure = self.pure.empty_like();

        for row in rows {
            let Some(hit) = row.hit_local else {
                continue;
            };
            if total.bin_index(hit.x, hit.y).is_none() {
                continue;
            }
            total.fill_one(hit.x, hit.y);
            self.n_total += 1;

            let is_pure = match (row.local_distance(), self.config.cut_distance) {
                (Some(d), Some(cut)) => d < cut,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if is_pure {
                pure.fill_one(hit.x, hit.y);
                self.n_pure += 1;
            }
        }

        self.total.merge_from(&total)?;
        self.pure.merge_from(&pure)?;
        self.phase = AnalyzerPhase::Accumulating;
        Ok(())
    }

    fn finalize(&mut self) -> AnalysisResult<PurityResult> {
        self.phase.ensure_open("purity")?;
        let dut = self.dut;
        let purity =
            MaskedMap::percentage(&self.pure, &self.total, self.config.minimum_hit_density)?;

        let mut warnings = Vec::new();
        if purity.all_masked() {
            warnings.push(format!("DUT{dut} 纯度图全部被掩码（击中密度不足）"));
        } else if purity.all_zero() {
            warnings.push(format!("DUT{dut} 纯度图全部为0"));
        }
        for message in &warnings {
            warn!("{message}");
        }

        let estimate = binomial_estimate(self.n_pure, self.n_total, BINOMIAL_CONFIDENCE)?;
        self.phase = AnalyzerPhase::Finalized;
        Ok(PurityResult {
            total_hit_density: self.total.clone(),
            pure_hit_density: self.pure.clone(),
            purity,
            n_pure: self.n_pure,
            n_total: self.n_total,
            estimate,
            warnings,
        })
    }

    fn phase(&self) -> AnalyzerPhase {
        self.phase
    }
}
