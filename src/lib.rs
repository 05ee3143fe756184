//! DUT Result Analysis
//!
//! 束流测试中被测探测器（DUT）的结果分析引擎。
//!
//! ## 核心特性
//! - 全局/局部坐标变换：预对准（平移+缩放）与完整对准（R = Rz(γ)·Ry(β)·Rx(α)）
//! - 逐块流式累加的直方图与逐bin均值，合并任意数据块后与单次遍历一致
//! - 残差（全局x/y、局部列/行）、击中效率、击中纯度、轨迹角度分析
//! - 高斯/直线拟合与 Clopper–Pearson 二项置信区间
//! - DUT级并行处理，结果按DUT索引输出

pub mod analysis;
pub mod error;
pub mod fit;
pub mod geometry;
pub mod histogram;
pub mod table;
pub mod tools;

// 重新导出核心类型
pub use analysis::{ChunkAnalyzer, DutReport, DutSettings, RunConfig, RunSummary};
pub use error::{AnalysisError, AnalysisResult, ErrorCategory};
pub use geometry::{AlignmentTable, DutTransform};
pub use histogram::{BinEdges, Histogram1D, Histogram2D, Mergeable};
pub use table::{JsonlTrackReader, MemoryTrackSource, TrackChunkSource, TrackRecord};
