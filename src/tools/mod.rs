//! 工具模块集合
//!
//! 包含CLI、轨迹表扫描、DUT处理、格式化等工具模块，支持main.rs的流程控制。

pub mod batch_state;
pub mod cli;
pub mod constants;
pub mod formatter;
pub mod parallel_processor;
pub mod processor;
pub mod scanner;
pub mod utils;

// 重新导出主要的公共接口
pub use batch_state::{DutStatsSnapshot, ParallelDutStats, SerialDutStats};
pub use cli::{AppConfig, parse_args, parse_args_from, show_completion_info, show_startup_info};
pub use formatter::{create_summary_table, show_run_summary, timestamp, write_summary};
pub use parallel_processor::process_duts_parallel;
pub use processor::{
    RunContext, prepare_run, process_and_save_dut, process_dut, process_telescope_angles,
    save_dut_report, write_json_atomic,
};
pub use scanner::{scan_track_tables, show_scan_results};
