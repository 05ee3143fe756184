//! DUT Result Analysis - 主程序入口
//!
//! 纯流程控制器，负责协调各个工具模块完成逐DUT分析任务。

use dut_result_analysis::{
    analysis::{DutReport, RunSummary, pipeline::alignment_model_name},
    error::{AnalysisError, AnalysisResult, ErrorCategory},
    tools::{self, AppConfig, RunContext},
};
use std::process;

/// 错误退出码定义
mod exit_codes {
    /// 通用错误
    pub const GENERAL_ERROR: i32 = 1;
    /// 格式/输入错误
    pub const FORMAT_ERROR: i32 = 2;
    /// 配置错误
    pub const CONFIGURATION_ERROR: i32 = 3;
    /// 对准一致性错误
    pub const ALIGNMENT_ERROR: i32 = 4;
    /// 计算错误
    pub const CALCULATION_ERROR: i32 = 5;
    /// 资源/并发错误
    pub const RESOURCE_ERROR: i32 = 6;
    /// 部分DUT失败
    pub const PARTIAL_FAILURE: i32 = 10;
}

/// 获取错误建议文本
fn get_error_suggestion(error: &AnalysisError) -> &'static str {
    match error {
        AnalysisError::ResourceError(_) => {
            "资源不可用，请重试或使用 --serial 串行模式 / Resource unavailable, retry or use --serial"
        }
        _ => match ErrorCategory::from_analysis_error(error) {
            ErrorCategory::Io => {
                "检查文件路径是否正确，文件是否存在且可读 / Check that the file exists and is readable"
            }
            ErrorCategory::Format => {
                "检查轨迹表与对准文件的JSON格式 / Check the JSON format of track tables and alignment file"
            }
            ErrorCategory::Configuration => {
                "检查运行配置：逐DUT列表长度、bin大小与像素数 / Check per-DUT list lengths, bin sizes and pixel counts"
            }
            ErrorCategory::Alignment => {
                "对准数据可能属于其他DUT或已过期 / Alignment may belong to another DUT or be outdated"
            }
            ErrorCategory::Calculation => {
                "计算过程出现异常，请检查输入数据 / Calculation error, check the input data"
            }
            ErrorCategory::Other => "请检查输入文件和参数设置 / Please check input files and parameters",
        },
    }
}

fn exit_code_for(error: &AnalysisError) -> i32 {
    match error {
        AnalysisError::ResourceError(_) => exit_codes::RESOURCE_ERROR,
        AnalysisError::InvalidInput(_) => exit_codes::FORMAT_ERROR,
        _ => match ErrorCategory::from_analysis_error(error) {
            ErrorCategory::Format => exit_codes::FORMAT_ERROR,
            ErrorCategory::Configuration => exit_codes::CONFIGURATION_ERROR,
            ErrorCategory::Alignment => exit_codes::ALIGNMENT_ERROR,
            ErrorCategory::Calculation => exit_codes::CALCULATION_ERROR,
            ErrorCategory::Io | ErrorCategory::Other => exit_codes::GENERAL_ERROR,
        },
    }
}

/// 错误处理和建议
fn handle_error(error: AnalysisError) -> ! {
    eprintln!("[ERROR] 错误 / Error: {error}");
    eprintln!("[INFO] 建议 / Suggestion: {}", get_error_suggestion(&error));
    process::exit(exit_code_for(&error));
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();
}

/// 串行处理所有DUT
fn process_duts_serial(
    ctx: &RunContext,
    config: &AppConfig,
) -> (Vec<AnalysisResult<DutReport>>, tools::DutStatsSnapshot) {
    let mut stats = tools::SerialDutStats::new();
    let total = ctx.n_duts();
    let mut results = Vec::with_capacity(total);

    for dut in 0..total {
        let label = ctx.dut_label(dut);
        if config.verbose {
            println!("[PROCESSING] [{}/{total}] {label}", dut + 1);
        }
        let result = tools::process_and_save_dut(ctx, dut);
        match &result {
            Ok(report) => {
                stats.record_success();
                if config.verbose {
                    println!(
                        "   [OK] 处理成功 / Processing succeeded ({} rows, {} warnings)",
                        report.rows_read,
                        report.warnings.len()
                    );
                }
            }
            Err(e) => {
                let category = ErrorCategory::from_analysis_error(e);
                println!(
                    "[FAIL] [{}/{total}] {label} - [{}] {e}",
                    dut + 1,
                    category.display_name()
                );
                stats.record_failure(e, label);
            }
        }
        results.push(result);
    }
    (results, stats.snapshot())
}

/// 应用程序主逻辑（便于测试和复用）
fn run(config: &AppConfig) -> Result<i32, AnalysisError> {
    tools::show_startup_info(config);

    // 1. 所有配置错误在读取数据之前返回
    let ctx = tools::prepare_run(config)?;
    tools::show_scan_results(&ctx.tables, config.verbose);

    // 2. 逐DUT分析（并行失败时降级为串行）
    let (results, stats) = match config.parallel_duts {
        Some(degree) => {
            let degree = tools::utils::effective_parallel_degree(degree, Some(ctx.n_duts()));
            if degree == 1 {
                process_duts_serial(&ctx, config)
            } else {
                tools::process_duts_parallel(&ctx, config, degree).unwrap_or_else(|e| {
                    eprintln!("[WARNING] 并行处理失败 / Parallel processing failed: {e}，回退到串行模式 / fallback to serial");
                    process_duts_serial(&ctx, config)
                })
            }
        }
        None => process_duts_serial(&ctx, config),
    };

    // 3. 汇总
    let telescope = tools::process_telescope_angles(&ctx);
    let summary = RunSummary::new(
        tools::timestamp(),
        alignment_model_name(&ctx.alignment),
        &ctx.config.dut_names,
        &results,
        telescope,
    );
    let summary_path = tools::write_summary(&ctx.output_dir, &summary)?;
    tools::show_run_summary(&summary, &stats, &summary_path);
    tools::show_completion_info(config);

    Ok(if stats.failed > 0 {
        exit_codes::PARTIAL_FAILURE
    } else {
        0
    })
}

fn main() {
    let config = tools::parse_args();
    init_logging(config.verbose);

    match run(&config) {
        Ok(0) => {}
        Ok(code) => process::exit(code),
        Err(error) => handle_error(error),
    }
}
