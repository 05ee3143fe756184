//! DUT处理模块
//!
//! 负责运行准备（配置、对准、轨迹表定位）、单DUT分析和结果文件写入。

use super::cli::AppConfig;
use super::{scanner, utils};
use crate::analysis::report::AngleSummary;
use crate::analysis::{DutReport, DutSettings, RunConfig, analyze_dut, analyze_telescope_angles};
use crate::error::{AnalysisResult, config_error};
use crate::geometry::AlignmentTable;
use crate::table::JsonlTrackReader;
use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// 所有DUT共享的只读运行上下文
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: RunConfig,
    pub settings: Vec<DutSettings>,
    pub alignment: AlignmentTable,
    pub tables: Vec<PathBuf>,
    pub output_dir: PathBuf,
}

impl RunContext {
    pub fn n_duts(&self) -> usize {
        self.settings.len()
    }

    pub fn dut_label(&self, dut: usize) -> String {
        match self.settings.get(dut) {
            Some(s) => format!("DUT{dut} ({})", s.name),
            None => format!("DUT{dut}"),
        }
    }
}

/// 相对路径以配置文件所在目录为基准
fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// 准备运行：所有配置错误在读取任何数据块之前返回
pub fn prepare_run(app: &AppConfig) -> AnalysisResult<RunContext> {
    let mut config = RunConfig::load(&app.config_path)?;
    if let Some(chunk_size) = app.chunk_size {
        config.chunk_size = chunk_size;
    }
    config.use_prealignment |= app.use_prealignment;
    let settings = config.resolve()?;

    let base = utils::get_parent_dir(&app.config_path).to_path_buf();

    let alignment_path = app
        .alignment_path
        .clone()
        .or_else(|| config.alignment_file.as_ref().map(|p| resolve_relative(&base, p)))
        .ok_or_else(|| config_error("未指定对准文件 (--alignment 或 alignment_file)"))?;
    let alignment = AlignmentTable::load(&alignment_path, config.use_prealignment)?;
    if alignment.n_duts() != settings.len() {
        return Err(config_error(format!(
            "对准表有 {} 个DUT，但配置有 {} 个",
            alignment.n_duts(),
            settings.len()
        )));
    }

    let tables = if !config.track_tables.is_empty() {
        config
            .track_tables
            .iter()
            .map(|p| resolve_relative(&base, p))
            .collect()
    } else if let Some(dir) = &config.tracks_dir {
        scanner::scan_track_tables(&resolve_relative(&base, dir), settings.len())?
    } else {
        return Err(config_error("未指定轨迹表 (track_tables 或 tracks_dir)"));
    };

    info!(
        "{} 个DUT, 对准模型: {}, 数据块 {} 行",
        settings.len(),
        crate::analysis::pipeline::alignment_model_name(&alignment),
        config.chunk_size
    );

    Ok(RunContext {
        config,
        settings,
        alignment,
        tables,
        output_dir: app.output_dir.clone(),
    })
}

/// 分析单个DUT
pub fn process_dut(ctx: &RunContext, dut: usize) -> AnalysisResult<DutReport> {
    let settings = ctx
        .settings
        .get(dut)
        .ok_or_else(|| config_error(format!("DUT{dut} 不存在")))?;
    let table = ctx
        .tables
        .get(dut)
        .ok_or_else(|| config_error(format!("DUT{dut} 没有轨迹表")))?;
    let mut reader = JsonlTrackReader::open(table, ctx.config.chunk_size)?;
    analyze_dut(settings, &ctx.alignment, &mut reader)
}

/// 分析单个DUT并写入结果文件（仅在分析完成后写入）
pub fn process_and_save_dut(ctx: &RunContext, dut: usize) -> AnalysisResult<DutReport> {
    let report = process_dut(ctx, dut)?;
    save_dut_report(&ctx.output_dir, &report)?;
    Ok(report)
}

/// 望远镜参考系的轨迹角度（使用第一个DUT的轨迹表）
///
/// 失败只记录警告，不影响各DUT结果。
pub fn process_telescope_angles(ctx: &RunContext) -> Option<AngleSummary> {
    let table = ctx.tables.first()?;
    let settings = ctx.settings.first()?;
    let result = JsonlTrackReader::open(table, ctx.config.chunk_size).and_then(|mut reader| {
        analyze_telescope_angles(&settings.track_angle, settings.max_chi2, &mut reader)
    });
    match result {
        Ok(result) => Some(AngleSummary::from_result(&result)),
        Err(e) => {
            warn!("望远镜轨迹角度分析失败 / Telescope track angle analysis failed: {e}");
            None
        }
    }
}

/// 结果文件路径
pub fn dut_report_path(output_dir: &Path, report: &DutReport) -> PathBuf {
    output_dir.join(format!(
        "dut_{}_{}.json",
        report.dut_index,
        utils::sanitize_name(&report.dut_name)
    ))
}

/// 写入临时文件后重命名，中止的运行不会留下不完整的结果文件
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> AnalysisResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = utils::extract_filename_lossy(path);
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(&temp_path, content)?;
    if let Err(e) = std::fs::rename(&temp_path, path) {
        std::fs::remove_file(&temp_path).ok();
        return Err(e.into());
    }
    Ok(())
}

pub fn save_dut_report(output_dir: &Path, report: &DutReport) -> AnalysisResult<PathBuf> {
    let path = dut_report_path(output_dir, report);
    write_json_atomic(&path, report)?;
    info!("DUT{} 结果已保存: {}", report.dut_index, path.display());
    Ok(path)
}
