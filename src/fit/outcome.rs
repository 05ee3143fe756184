//! 拟合结果类型
//!
//! 拟合不收敛属于预期情形：以 `Failed` 记录原因并继续分析，不作为错误传播。

use serde::{Deserialize, Serialize};

/// 拟合结果：成功携带系数，失败携带原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FitOutcome<T> {
    Converged(T),
    Failed { reason: String },
}

impl<T> FitOutcome<T> {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged(_))
    }

    pub fn coefficients(&self) -> Option<&T> {
        match self {
            Self::Converged(c) => Some(c),
            Self::Failed { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Converged(_) => None,
            Self::Failed { reason } => Some(reason),
        }
    }
}
