//! DUT批处理状态
//!
//! 统计成功/失败的DUT数与按错误类别分组的失败DUT，支持串行和并行两种模式。

use crate::error::{AnalysisError, ErrorCategory};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// 统计快照
#[derive(Debug, Clone, Default)]
pub struct DutStatsSnapshot {
    pub succeeded: usize,
    pub failed: usize,
    /// 错误类别 -> 失败的DUT标签
    pub failures: HashMap<ErrorCategory, Vec<String>>,
}

impl DutStatsSnapshot {
    /// 按类别名称排序的失败列表（输出稳定）
    pub fn sorted_failures(&self) -> Vec<(ErrorCategory, Vec<String>)> {
        let mut failures: Vec<_> = self
            .failures
            .iter()
            .map(|(category, duts)| (*category, duts.clone()))
            .collect();
        failures.sort_by_key(|(category, _)| category.display_name());
        failures
    }
}

/// 串行统计
#[derive(Debug, Default)]
pub struct SerialDutStats {
    succeeded: usize,
    failed: usize,
    failures: HashMap<ErrorCategory, Vec<String>>,
}

impl SerialDutStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_success(&mut self) -> usize {
        self.succeeded += 1;
        self.succeeded
    }

    pub fn record_failure(&mut self, error: &AnalysisError, dut_label: String) -> usize {
        self.failed += 1;
        self.failures
            .entry(ErrorCategory::from_analysis_error(error))
            .or_default()
            .push(dut_label);
        self.failed
    }

    pub fn snapshot(&self) -> DutStatsSnapshot {
        DutStatsSnapshot {
            succeeded: self.succeeded,
            failed: self.failed,
            failures: self.failures.clone(),
        }
    }
}

/// 并行统计（可跨线程克隆共享）
#[derive(Debug, Clone, Default)]
pub struct ParallelDutStats {
    succeeded: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    failures: Arc<Mutex<HashMap<ErrorCategory, Vec<String>>>>,
}

impl ParallelDutStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_success(&self) -> usize {
        self.succeeded.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_failure(&self, error: &AnalysisError, dut_label: String) -> usize {
        let count = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Ok(mut failures) = self.failures.lock() {
            failures
                .entry(ErrorCategory::from_analysis_error(error))
                .or_default()
                .push(dut_label);
        }
        count
    }

    pub fn snapshot(&self) -> DutStatsSnapshot {
        DutStatsSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            failures: self
                .failures
                .lock()
                .map(|failures| failures.clone())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alignment_error(dut: usize) -> AnalysisError {
        AnalysisError::AlignmentConsistency {
            dut,
            max_abs_z: 1.0,
            tolerance: 1e-3,
        }
    }

    #[test]
    fn test_serial_stats_by_category() {
        let mut stats = SerialDutStats::new();
        assert_eq!(stats.record_success(), 1);
        assert_eq!(stats.record_failure(&alignment_error(1), "DUT1".to_string()), 1);
        assert_eq!(stats.record_failure(&alignment_error(2), "DUT2".to_string()), 2);
        assert_eq!(
            stats.record_failure(&AnalysisError::FormatError("x".to_string()), "DUT3".to_string()),
            3
        );

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.failed, 3);
        assert_eq!(snapshot.failures[&ErrorCategory::Alignment], vec!["DUT1", "DUT2"]);
        assert_eq!(snapshot.sorted_failures().len(), 2);
    }

    #[test]
    fn test_parallel_stats_concurrent_updates() {
        use rayon::prelude::*;

        let stats = ParallelDutStats::new();
        (0..64).into_par_iter().for_each(|i| {
            if i % 4 == 0 {
                stats.record_failure(&alignment_error(i), format!("DUT{i}"));
            } else {
                stats.record_success();
            }
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.succeeded, 48);
        assert_eq!(snapshot.failed, 16);
        assert_eq!(snapshot.failures[&ErrorCategory::Alignment].len(), 16);
    }

    #[test]
    fn test_parallel_stats_clone_shares_state() {
        let a = ParallelDutStats::new();
        let b = a.clone();
        a.record_success();
        b.record_success();
        assert_eq!(a.snapshot().succeeded, 2);
    }
}
