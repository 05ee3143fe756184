//! 统一错误处理框架
//!
//! 分析引擎的核心错误类型定义。致命错误只中止当前DUT，
//! 拟合不收敛不在此列（见 `fit::FitOutcome`）。

use std::fmt;
use std::io;

/// 分析相关的统一错误类型
#[derive(Debug)]
pub enum AnalysisError {
    /// 输入验证错误
    InvalidInput(String),

    /// 文件I/O错误
    IoError(io::Error),

    /// 数据格式错误（轨迹表、对准表解析失败）
    FormatError(String),

    /// 配置错误 - 在读取任何数据块之前触发
    ConfigurationError(String),

    /// 对准一致性错误：局部坐标z分量不为0
    AlignmentConsistency {
        dut: usize,
        max_abs_z: f64,
        tolerance: f64,
    },

    /// 直方图合并时bin边界不一致
    BinningMismatch(String),

    /// 计算异常
    CalculationError(String),

    /// 资源访问错误（线程池等）
    ResourceError(String),
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::InvalidInput(msg) => write!(f, "输入验证失败: {msg}"),
            AnalysisError::IoError(err) => write!(f, "文件I/O错误: {err}"),
            AnalysisError::FormatError(msg) => write!(f, "数据格式错误: {msg}"),
            AnalysisError::ConfigurationError(msg) => write!(f, "配置错误: {msg}"),
            AnalysisError::AlignmentConsistency {
                dut,
                max_abs_z,
                tolerance,
            } => write!(
                f,
                "DUT{dut} 对准不一致: 局部z偏差 {max_abs_z:.3e} 超出容差 {tolerance:.3e}（对准数据可能不属于该DUT）"
            ),
            AnalysisError::BinningMismatch(msg) => write!(f, "直方图bin边界不一致: {msg}"),
            AnalysisError::CalculationError(msg) => write!(f, "计算异常: {msg}"),
            AnalysisError::ResourceError(msg) => write!(f, "资源访问错误: {msg}"),
        }
    }
}

impl std::error::Error for AnalysisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AnalysisError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for AnalysisError {
    fn from(err: io::Error) -> Self {
        AnalysisError::IoError(err)
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(err: serde_json::Error) -> Self {
        AnalysisError::FormatError(format!("JSON解析错误: {err}"))
    }
}

/// 分析操作的标准Result类型
pub type AnalysisResult<T> = Result<T, AnalysisError>;

// ==================== 错误转换Helper函数 ====================

/// 创建格式错误的helper函数
#[inline]
pub fn format_error<E: fmt::Display>(context: &str, err: E) -> AnalysisError {
    AnalysisError::FormatError(format!("{context}: {err}"))
}

/// 创建配置错误的helper函数
#[inline]
pub fn config_error(msg: impl Into<String>) -> AnalysisError {
    AnalysisError::ConfigurationError(msg.into())
}

/// 创建计算错误的helper函数
#[inline]
pub fn calculation_error<E: fmt::Display>(context: &str, err: E) -> AnalysisError {
    AnalysisError::CalculationError(format!("{context}: {err}"))
}

// ==================== 错误分类系统 ====================

/// 错误类别枚举（用于逐DUT失败统计和退出码）
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum ErrorCategory {
    /// 数据格式错误
    Format,
    /// 配置错误
    Configuration,
    /// 对准一致性错误
    Alignment,
    /// I/O相关错误
    Io,
    /// 计算相关错误（含bin边界不一致）
    Calculation,
    /// 其他未分类错误
    Other,
}

impl ErrorCategory {
    /// 从AnalysisError提取错误类别
    pub fn from_analysis_error(e: &AnalysisError) -> Self {
        match e {
            AnalysisError::FormatError(_) => Self::Format,
            AnalysisError::ConfigurationError(_) => Self::Configuration,
            AnalysisError::AlignmentConsistency { .. } => Self::Alignment,
            AnalysisError::IoError(_) => Self::Io,
            AnalysisError::CalculationError(_) | AnalysisError::BinningMismatch(_) => {
                Self::Calculation
            }
            AnalysisError::InvalidInput(_) | AnalysisError::ResourceError(_) => Self::Other,
        }
    }

    /// 获取错误类别的显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Format => "格式错误",
            Self::Configuration => "配置错误",
            Self::Alignment => "对准错误",
            Self::Io => "I/O错误",
            Self::Calculation => "计算错误",
            Self::Other => "其他错误",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_error_category() {
        let err = AnalysisError::AlignmentConsistency {
            dut: 2,
            max_abs_z: 0.5,
            tolerance: 1e-3,
        };
        assert_eq!(
            ErrorCategory::from_analysis_error(&err),
            ErrorCategory::Alignment
        );
        assert!(err.to_string().contains("DUT2"));
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: Result<u32, _> = serde_json::from_str::<u32>("not json");
        let err: AnalysisError = parse.unwrap_err().into();
        assert_eq!(ErrorCategory::from_analysis_error(&err), ErrorCategory::Format);
    }
}
