//! 直方图模块
//!
//! 冻结边界的分bin、可合并的计数/均值累加器、掩码比例图以及峰值检测。

pub mod accumulator;
pub mod edges;
pub mod masked;
pub mod peak;

pub use accumulator::{
    BinnedExtrema2D, BinnedMean1D, BinnedMean2D, Histogram1D, Histogram2D, Mergeable,
    RunningMeans,
};
pub use edges::BinEdges;
pub use masked::MaskedMap;
pub use peak::{PeakEstimate, PeakSource, WindowPolicy, establish_residual_edges};
