//! 单DUT分析流水线
//!
//! 一次遍历数据块：每块先投影一次，投影结果送入残差、效率、纯度分析器，
//! 原始轨迹行送入轨迹角度分析器；全部到达结束状态后才生成报告，
//! 任一致命错误中止该DUT。

use super::config::{DutSettings, TrackAngleSettings};
use super::efficiency::EfficiencyAnalyzer;
use super::projection::DutProjector;
use super::purity::PurityAnalyzer;
use super::report::{DutReport, ReportParts};
use super::residuals::ResidualAnalyzer;
use super::track_angle::{AngleReference, TrackAngleAnalyzer, TrackAngleResult};
use super::ChunkAnalyzer;
use crate::error::AnalysisResult;
use crate::geometry::AlignmentTable;
use crate::table::TrackChunkSource;
use log::{debug, info};

/// 对单个DUT执行全部分析
pub fn analyze_dut(
    settings: &DutSettings,
    alignment: &AlignmentTable,
    source: &mut dyn TrackChunkSource,
) -> AnalysisResult<DutReport> {
    let dut = settings.index;
    let transform = alignment.dut_transform(dut)?;
    let projector = DutProjector::new(dut, transform);

    let mut residuals =
        ResidualAnalyzer::new(settings, projector, alignment.stored_fit_ranges(dut));
    let mut efficiency = EfficiencyAnalyzer::new(settings)?;
    let mut purity = PurityAnalyzer::new(settings)?;
    let mut track_angle = TrackAngleAnalyzer::new(
        AngleReference::Dut(dut),
        &transform,
        &settings.track_angle,
        settings.max_chi2,
    );

    info!("DUT{dut} ({}) 开始分析", settings.name);
    let mut n_chunks = 0usize;
    while let Some(chunk) = source.next_chunk()? {
        let rows = projector.project(&chunk, settings.max_chi2)?;
        residuals.process_chunk(&rows)?;
        efficiency.process_chunk(&rows)?;
        purity.process_chunk(&rows)?;
        track_angle.process_chunk(&chunk)?;
        n_chunks += 1;
        debug!("DUT{dut} 数据块 #{n_chunks}: {} 行", chunk.len());
    }
    info!(
        "DUT{dut} ({}) 读取 {} 行 / {n_chunks} 个数据块",
        settings.name,
        source.rows_read()
    );

    let parts = ReportParts {
        dut_index: dut,
        dut_name: settings.name.clone(),
        alignment_model: alignment_model_name(alignment).to_string(),
        rows_read: source.rows_read(),
        residuals: residuals.finalize()?,
        efficiency: efficiency.finalize()?,
        purity: purity.finalize()?,
        track_angle: track_angle.finalize()?,
    };
    Ok(DutReport::from(parts))
}

/// 望远镜参考系（单位旋转）下的轨迹角度
pub fn analyze_telescope_angles(
    config: &TrackAngleSettings,
    max_chi2: Option<f64>,
    source: &mut dyn TrackChunkSource,
) -> AnalysisResult<TrackAngleResult> {
    let mut analyzer = TrackAngleAnalyzer::telescope(config, max_chi2);
    while let Some(chunk) = source.next_chunk()? {
        analyzer.process_chunk(&chunk)?;
    }
    analyzer.finalize()
}

pub fn alignment_model_name(alignment: &AlignmentTable) -> &'static str {
    if alignment.is_prealignment() {
        "prealignment"
    } else {
        "alignment"
    }
}
