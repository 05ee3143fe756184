//! DUT级并行处理模块
//!
//! 使用rayon线程池按DUT并行分析，DUT之间只共享只读的运行上下文；
//! 结果按DUT索引排序，与完成顺序无关。

use super::batch_state::{DutStatsSnapshot, ParallelDutStats};
use super::cli::AppConfig;
use super::processor::{RunContext, process_and_save_dut};
use crate::analysis::DutReport;
use crate::error::{AnalysisError, AnalysisResult, ErrorCategory};
use rayon::prelude::*;

/// 有序结果容器
struct OrderedResult {
    index: usize,
    result: AnalysisResult<DutReport>,
}

/// 多DUT并行处理
///
/// 返回按DUT索引排列的结果；单个DUT的致命错误不影响其他DUT。
pub fn process_duts_parallel(
    ctx: &RunContext,
    app: &AppConfig,
    parallel_degree: usize,
) -> AnalysisResult<(Vec<AnalysisResult<DutReport>>, DutStatsSnapshot)> {
    println!("[INFO] DUT并行处理 / Parallel DUT processing: {parallel_degree} 并发度 / workers");

    let stats = ParallelDutStats::new();
    let total = ctx.n_duts();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallel_degree)
        .thread_name(|i| format!("dut-worker-{i}"))
        .build()
        .map_err(|e| AnalysisError::ResourceError(format!("线程池创建失败: {e}")))?;

    let mut results: Vec<OrderedResult> = pool.install(|| {
        (0..total)
            .into_par_iter()
            .map(|index| {
                let result = process_and_save_dut(ctx, index);
                let label = ctx.dut_label(index);
                match &result {
                    Ok(_) => {
                        let count = stats.record_success();
                        if app.verbose {
                            println!("[OK] [{count}/{total}] {label}");
                        }
                    }
                    Err(e) => {
                        stats.record_failure(e, label.clone());
                        println!(
                            "[FAIL] {label} - [{}] {e}",
                            ErrorCategory::from_analysis_error(e).display_name()
                        );
                    }
                }
                OrderedResult { index, result }
            })
            .collect()
    });

    results.sort_by_key(|r| r.index);
    Ok((
        results.into_iter().map(|r| r.result).collect(),
        stats.snapshot(),
    ))
}
