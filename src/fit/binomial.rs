//! 二项比例置信区间（Clopper–Pearson）
//!
//! 全局效率/纯度由非分bin的 pass/total 总数直接计算，
//! 避免掩码bin与小计数比值平均引入的偏差。

use crate::error::{AnalysisResult, calculation_error};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, ContinuousCDF};

/// 百分比形式的比例及其非对称误差
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinomialEstimate {
    pub pass: u64,
    pub total: u64,
    /// 百分比 [0, 100]
    pub value: f64,
    /// value − 区间下限
    pub lower_error: f64,
    /// 区间上限 − value
    pub upper_error: f64,
}

/// Clopper–Pearson 区间（比例，[0, 1]）
pub fn clopper_pearson(pass: u64, total: u64, confidence: f64) -> AnalysisResult<(f64, f64)> {
    if total == 0 || pass > total {
        return Err(calculation_error(
            "二项区间",
            format!("pass={pass}, total={total}"),
        ));
    }
    let alpha = 1.0 - confidence;
    let k = pass as f64;
    let n = total as f64;

    let lower = if pass == 0 {
        0.0
    } else {
        Beta::new(k, n - k + 1.0)
            .map_err(|e| calculation_error("Beta分布", e))?
            .inverse_cdf(alpha / 2.0)
    };
    let upper = if pass == total {
        1.0
    } else {
        Beta::new(k + 1.0, n - k)
            .map_err(|e| calculation_error("Beta分布", e))?
            .inverse_cdf(1.0 - alpha / 2.0)
    };
    Ok((lower, upper))
}

/// 计算百分比形式的比例及误差；total为0时返回None
pub fn binomial_estimate(
    pass: u64,
    total: u64,
    confidence: f64,
) -> AnalysisResult<Option<BinomialEstimate>> {
    if total == 0 {
        return Ok(None);
    }
    let (lower, upper) = clopper_pearson(pass, total, confidence)?;
    let value = 100.0 * pass as f64 / total as f64;
    Ok(Some(BinomialEstimate {
        pass,
        total,
        value,
        lower_error: (value - 100.0 * lower).max(0.0),
        upper_error: (100.0 * upper - value).max(0.0),
    }))
}
