//! 轨迹表扫描模块
//!
//! 在目录中查找 `tracks_dut_<i>.jsonl`，按DUT索引排列。

use super::utils;
use crate::error::{AnalysisError, AnalysisResult, config_error};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const TABLE_PREFIX: &str = "tracks_dut_";
const TABLE_EXTENSION: &str = "jsonl";

/// 子目录扫描深度
const MAX_SCAN_DEPTH: usize = 2;

/// 从文件名解析DUT索引
fn parse_dut_index(path: &Path) -> Option<usize> {
    let extension = path.extension()?.to_str()?;
    if !extension.eq_ignore_ascii_case(TABLE_EXTENSION) {
        return None;
    }
    utils::extract_file_stem(path)
        .strip_prefix(TABLE_PREFIX)?
        .parse()
        .ok()
}

/// 扫描目录中的逐DUT轨迹表
///
/// 返回长度为 `n_duts` 的路径表；缺少任一DUT的表或同一DUT出现多个表时报错。
pub fn scan_track_tables(dir_path: &Path, n_duts: usize) -> AnalysisResult<Vec<PathBuf>> {
    if !dir_path.exists() {
        return Err(AnalysisError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("目录不存在: {}", dir_path.display()),
        )));
    }
    if !dir_path.is_dir() {
        return Err(AnalysisError::InvalidInput(format!(
            "路径不是目录: {}",
            dir_path.display()
        )));
    }

    let mut tables: Vec<Option<PathBuf>> = vec![None; n_duts];
    for entry in WalkDir::new(dir_path)
        .max_depth(MAX_SCAN_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let Some(index) = parse_dut_index(entry.path()) else {
            continue;
        };
        let Some(slot) = tables.get_mut(index) else {
            log::warn!(
                "忽略超出DUT数的轨迹表 / Ignoring table beyond DUT count: {}",
                entry.path().display()
            );
            continue;
        };
        if let Some(existing) = slot {
            return Err(config_error(format!(
                "DUT{index} 有多个轨迹表: {} 与 {}",
                existing.display(),
                entry.path().display()
            )));
        }
        *slot = Some(entry.into_path());
    }

    tables
        .into_iter()
        .enumerate()
        .map(|(i, table)| {
            table.ok_or_else(|| {
                config_error(format!(
                    "目录 {} 中缺少 {TABLE_PREFIX}{i}.{TABLE_EXTENSION}",
                    dir_path.display()
                ))
            })
        })
        .collect()
}

/// 显示扫描结果
pub fn show_scan_results(tables: &[PathBuf], verbose: bool) {
    println!("[INFO] 找到 {} 个轨迹表 / Found {} track tables", tables.len(), tables.len());
    if verbose {
        for (i, table) in tables.iter().enumerate() {
            println!("   DUT{i}: {}", table.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dut_index() {
        assert_eq!(parse_dut_index(Path::new("a/tracks_dut_3.jsonl")), Some(3));
        assert_eq!(parse_dut_index(Path::new("tracks_dut_12.JSONL")), Some(12));
        assert_eq!(parse_dut_index(Path::new("tracks_dut_x.jsonl")), None);
        assert_eq!(parse_dut_index(Path::new("tracks_dut_1.json")), None);
        assert_eq!(parse_dut_index(Path::new("hits_dut_1.jsonl")), None);
    }

    #[test]
    fn test_scan_missing_directory() {
        let dir = std::env::temp_dir().join("dut_analysis_scan_missing_dir");
        let err = scan_track_tables(&dir, 2).unwrap_err();
        assert!(matches!(err, AnalysisError::IoError(_)));
    }

    #[test]
    fn test_scan_finds_tables_in_order() {
        let dir = std::env::temp_dir().join(format!("dut_analysis_scan_{}", std::process::id()));
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("tracks_dut_1.jsonl"), "").unwrap();
        std::fs::write(dir.join("sub").join("tracks_dut_0.jsonl"), "").unwrap();
        std::fs::write(dir.join("notes.txt"), "").unwrap();

        let tables = scan_track_tables(&dir, 2).unwrap();
        assert!(tables[0].ends_with("sub/tracks_dut_0.jsonl"));
        assert!(tables[1].ends_with("tracks_dut_1.jsonl"));
        assert!(scan_track_tables(&dir, 3).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
