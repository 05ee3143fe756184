//! 命令行接口模块
//!
//! 负责命令行参数解析、配置管理和程序信息展示。

use super::constants::{defaults, parallel_limits};
use clap::{Arg, ArgAction, Command, value_parser};
use std::path::PathBuf;

/// 应用程序版本信息
const VERSION: &str = env!("CARGO_PKG_VERSION");
const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// 应用程序配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 运行配置文件（JSON）
    pub config_path: PathBuf,

    /// 对准文件（覆盖配置文件中的 `alignment_file`）
    pub alignment_path: Option<PathBuf>,

    /// 结果输出目录
    pub output_dir: PathBuf,

    /// 是否显示详细信息
    pub verbose: bool,

    /// DUT并发度（None = 串行）
    pub parallel_duts: Option<usize>,

    /// 强制使用预对准
    pub use_prealignment: bool,

    /// 覆盖数据块行数
    pub chunk_size: Option<usize>,
}

impl AppConfig {
    /// 是否按DUT并行
    #[inline]
    pub fn is_parallel(&self) -> bool {
        self.parallel_duts.is_some_and(|n| n > 1)
    }
}

fn build_command() -> Command {
    Command::new("dut-analysis")
        .version(VERSION)
        .about(DESCRIPTION)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("运行配置文件 (JSON) / Run configuration file")
                .value_name("FILE")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("alignment")
                .long("alignment")
                .short('a')
                .help("对准文件 (JSON)，覆盖配置中的 alignment_file / Alignment file")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .help("结果输出目录 / Output directory")
                .value_name("DIR")
                .default_value("results")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("显示详细处理信息 / Verbose output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("serial")
                .long("serial")
                .help("逐个DUT串行处理 / Process DUTs one after another")
                .action(ArgAction::SetTrue)
                .conflicts_with("parallel-duts"),
        )
        .arg(
            Arg::new("parallel-duts")
                .long("parallel-duts")
                .help("并行处理的DUT数 (1-16) / Number of DUTs processed in parallel")
                .value_name("N")
                .value_parser(
                    value_parser!(u16).range(
                        parallel_limits::MIN_PARALLEL_DEGREE as i64
                            ..=parallel_limits::MAX_PARALLEL_DEGREE as i64,
                    ),
                ),
        )
        .arg(
            Arg::new("use-prealignment")
                .long("use-prealignment")
                .help("忽略完整对准，使用预对准 / Use pre-alignment even if alignment exists")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("chunk-size")
                .long("chunk-size")
                .help("每个数据块的行数 / Rows per chunk")
                .value_name("ROWS")
                .value_parser(value_parser!(usize)),
        )
}

/// 从参数列表解析配置（便于测试）
pub fn parse_args_from<I, T>(args: I) -> Result<AppConfig, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = build_command().try_get_matches_from(args)?;

    let parallel_duts = if matches.get_flag("serial") {
        None
    } else {
        Some(
            matches
                .get_one::<u16>("parallel-duts")
                .map(|&n| n as usize)
                .unwrap_or(defaults::PARALLEL_DUTS_DEGREE),
        )
    };

    Ok(AppConfig {
        config_path: matches
            .get_one::<PathBuf>("config")
            .cloned()
            .unwrap_or_default(),
        alignment_path: matches.get_one::<PathBuf>("alignment").cloned(),
        output_dir: matches
            .get_one::<PathBuf>("output")
            .cloned()
            .unwrap_or_else(|| PathBuf::from("results")),
        verbose: matches.get_flag("verbose"),
        parallel_duts,
        use_prealignment: matches.get_flag("use-prealignment"),
        chunk_size: matches.get_one::<usize>("chunk-size").copied(),
    })
}

/// 解析命令行参数并创建配置（参数错误时由clap打印用法并退出）
pub fn parse_args() -> AppConfig {
    parse_args_from(std::env::args_os()).unwrap_or_else(|e| e.exit())
}

/// 显示程序启动信息
pub fn show_startup_info(config: &AppConfig) {
    println!("DUT Result Analysis v{VERSION} 启动 / started");
    println!("{DESCRIPTION}");
    if config.verbose {
        println!("   配置 / Config: {}", config.config_path.display());
        match config.parallel_duts {
            Some(n) => println!("   并发度 / Parallelism: {n}"),
            None => println!("   串行模式 / Serial mode"),
        }
    }
    println!();
}

/// 显示程序完成信息
pub fn show_completion_info(config: &AppConfig) {
    if config.verbose {
        println!("[OK] 所有DUT处理完成 / All DUTs processed");
    }
}
