//! DUT结果分析
//!
//! 每个分析器是一个逐DUT的显式累加状态，按顺序消费数据块：
//! 第一个非空数据块确定分bin，其后只做加法合并，`finalize` 后做曲线拟合。
//! 分析器之间不共享可变状态。数据块在流水线中只投影一次，
//! 残差、效率、纯度分析器消费投影后的行，轨迹角度分析器消费原始轨迹行。

pub mod config;
pub mod efficiency;
pub mod pipeline;
pub mod projection;
pub mod purity;
pub mod report;
pub mod residuals;
pub mod track_angle;

use crate::error::{AnalysisError, AnalysisResult};

pub use config::{DutSettings, PerDut, RunConfig};
pub use efficiency::{EfficiencyAnalyzer, EfficiencyResult};
pub use pipeline::{analyze_dut, analyze_telescope_angles};
pub use projection::{DutProjector, ProjectedRow};
pub use purity::{PurityAnalyzer, PurityResult};
pub use report::{DutReport, HistogramTable, RunSummary};
pub use residuals::{ResidualAnalyzer, ResidualFamily, ResidualResult};
pub use track_angle::{AngleReference, TrackAngleAnalyzer, TrackAngleResult};

/// 逐块分析器
pub trait ChunkAnalyzer {
    /// 一个数据块的行类型
    type Row;
    type Output;

    /// 并入一个数据块（同一事件的行保证在同一块中）
    ///
    /// 进入 `Finalized` 后再送入数据块返回错误。
    fn process_chunk(&mut self, chunk: &[Self::Row]) -> AnalysisResult<()>;

    /// 结束累加并计算最终结果，之后分析器处于 `Finalized`
    fn finalize(&mut self) -> AnalysisResult<Self::Output>;

    fn phase(&self) -> AnalyzerPhase;
}

/// 分析器生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerPhase {
    Uninitialized,
    BinningEstablished,
    Accumulating,
    Finalized,
}

impl AnalyzerPhase {
    /// 已结束的分析器不再接受数据块，也不能重复结束
    pub(crate) fn ensure_open(self, analyzer: &str) -> AnalysisResult<()> {
        if self == Self::Finalized {
            return Err(AnalysisError::CalculationError(format!(
                "{analyzer} 分析器已结束，不能继续处理"
            )));
        }
        Ok(())
    }
}

/// 逐轴范围限制（None表示不限制）
#[inline]
pub(crate) fn within_limits(limits: &config::AxisLimits, x: f64, y: f64) -> bool {
    let inside = |limit: &Option<[f64; 2]>, v: f64| limit.is_none_or(|[lo, hi]| v >= lo && v <= hi);
    inside(&limits[0], x) && inside(&limits[1], y)
}

/// 传感器局部范围上的均匀bin（bin大小已在配置阶段校验整除）
pub(crate) fn sensor_edges(
    settings: &DutSettings,
    bin_size: [f64; 2],
) -> AnalysisResult<[crate::histogram::BinEdges; 2]> {
    let size = settings.sensor_size();
    let axis = |i: usize| {
        let (lo, hi) = settings.sensor_range(i);
        let n = ((size[i] / bin_size[i]).round() as usize).max(1);
        crate::histogram::BinEdges::uniform(lo, hi, n)
    };
    Ok([axis(0)?, axis(1)?])
}
