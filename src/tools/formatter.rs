//! 输出格式化模块
//!
//! 运行汇总的控制台表格与 `summary.json` 写入。

use super::batch_state::DutStatsSnapshot;
use super::processor::write_json_atomic;
use crate::analysis::RunSummary;
use crate::error::AnalysisResult;
use crate::fit::BinomialEstimate;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use std::path::{Path, PathBuf};

/// 应用程序版本信息
const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// 汇总时间戳（本地时间，RFC 3339）
pub fn timestamp() -> String {
    chrono::Local::now().to_rfc3339()
}

fn format_sigma(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

/// 百分比与非对称误差，如 `99.52 -0.11/+0.08`
pub fn format_estimate(estimate: Option<&BinomialEstimate>) -> String {
    match estimate {
        Some(e) => format!(
            "{:.2} -{:.2}/+{:.2}",
            e.value, e.lower_error, e.upper_error
        ),
        None => "-".to_string(),
    }
}

fn right(text: String) -> Cell {
    Cell::new(text).set_alignment(CellAlignment::Right)
}

/// 按DUT索引排列的汇总表
pub fn create_summary_table(summary: &RunSummary) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "DUT",
        "σ x / µm",
        "σ y / µm",
        "σ col / µm",
        "σ row / µm",
        "Efficiency / 效率 %",
        "Purity / 纯度 %",
        "Status / 状态",
    ]);

    for (i, name) in summary.dut_names.iter().enumerate() {
        let failure = summary.failed.iter().find(|f| f.dut_index == i);
        let status = match failure {
            Some(f) => format!("FAIL [{}]", f.category),
            None => match summary.warnings.get(i).map_or(0, Vec::len) {
                0 => "OK".to_string(),
                n => format!("OK ({n} warnings)"),
            },
        };
        let at = |list: &Vec<Option<f64>>| list.get(i).copied().flatten();
        table.add_row(vec![
            Cell::new(format!("{i}: {name}")),
            right(format_sigma(at(&summary.residual_sigma_x))),
            right(format_sigma(at(&summary.residual_sigma_y))),
            right(format_sigma(at(&summary.residual_sigma_column))),
            right(format_sigma(at(&summary.residual_sigma_row))),
            right(format_estimate(summary.efficiency.get(i).and_then(Option::as_ref))),
            right(format_estimate(summary.purity.get(i).and_then(Option::as_ref))),
            Cell::new(status),
        ]);
    }
    table.to_string()
}

/// 打印汇总与统计
pub fn show_run_summary(summary: &RunSummary, stats: &DutStatsSnapshot, summary_path: &Path) {
    println!();
    println!("{}", create_summary_table(summary));
    if let Some(telescope) = &summary.telescope_angle {
        let sigma = |fit| format_sigma(crate::analysis::report::AngleSummary::sigma(fit));
        println!(
            "[INFO] 望远镜轨迹发散度 / Telescope divergence: α σ = {} rad, β σ = {} rad ({} tracks)",
            sigma(&telescope.alpha),
            sigma(&telescope.beta),
            telescope.n_tracks
        );
    }
    println!();
    println!(
        "[INFO] 成功 / Succeeded: {} / {}",
        stats.succeeded,
        stats.succeeded + stats.failed
    );
    for (category, duts) in stats.sorted_failures() {
        println!("   {}: {}", category.display_name(), duts.join(", "));
    }
    println!("[INFO] 汇总已保存 / Summary saved: {}", summary_path.display());
    println!("DUT Result Analysis v{VERSION}");
}

/// 写入 `summary.json`
pub fn write_summary(output_dir: &Path, summary: &RunSummary) -> AnalysisResult<PathBuf> {
    let path = output_dir.join(SUMMARY_FILE_NAME);
    write_json_atomic(&path, summary)?;
    Ok(path)
}
