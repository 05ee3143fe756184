//! 工具函数模块
//!
//! 提供文件路径处理、并发度计算等通用工具函数。

use super::constants::parallel_limits;

/// 文件路径处理工具函数
pub mod path {
    use std::path::Path;

    /// 提取文件stem（不含扩展名）
    #[inline]
    pub fn extract_file_stem(path: &Path) -> &str {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("")
    }

    /// 提取文件名（返回String，用于日志显示）
    #[inline]
    pub fn extract_filename_lossy(path: &Path) -> String {
        path.file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }

    /// 获取父目录，如果不存在则返回当前目录
    #[inline]
    pub fn get_parent_dir(path: &Path) -> &Path {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

/// 计算实际并发度：限制在 [1, 16] 且不超过任务数
pub fn effective_parallel_degree(requested: usize, task_count: Option<usize>) -> usize {
    let degree = requested.clamp(
        parallel_limits::MIN_PARALLEL_DEGREE,
        parallel_limits::MAX_PARALLEL_DEGREE,
    );
    match task_count {
        Some(n) if n > 0 => degree.min(n),
        _ => degree,
    }
}

/// DUT结果文件名中使用的安全名称
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "dut".to_string()
    } else {
        cleaned
    }
}

// 重新导出为平级函数
pub use path::{extract_file_stem, extract_filename_lossy, get_parent_dir};
