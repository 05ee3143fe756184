//! 常量和默认配置集中管理
//!
//! 将所有重要常量集中定义，避免"默认值漂移"和重复定义

/// 几何一致性容差
pub mod geometry {
    /// 局部z分量的绝对容差（µm）
    pub const LOCAL_Z_ABS_TOLERANCE: f64 = 1e-3;

    /// 局部z分量的相对容差（相对全局坐标模长）
    pub const LOCAL_Z_REL_TOLERANCE: f64 = 1e-9;
}

/// 直方图相关常量
pub mod histogram {
    /// 自动分bin的最大bin数
    pub const MAX_AUTO_BINS: usize = 10_000;

    /// 初始（第一数据块）分布的范围：均值 ± N×RMS
    pub const INITIAL_RANGE_RMS: f64 = 5.0;
}

/// 残差分析常量
pub mod residuals {
    /// 残差窗口宽度下限：N个像素间距
    pub const WINDOW_PIXELS: f64 = 10.0;

    /// 残差窗口宽度下限：M倍FWHM
    pub const WINDOW_FWHM: f64 = 8.0;

    /// 每个像素间距对应的残差bin数
    pub const BINS_PER_PIXEL: f64 = 10.0;
}

/// 拟合常量
pub mod fit {
    pub const LM_MAX_ITERATIONS: usize = 200;
    pub const LM_INITIAL_LAMBDA: f64 = 1e-3;
    pub const LM_MAX_LAMBDA: f64 = 1e12;
    pub const LM_CHI2_TOLERANCE: f64 = 1e-10;
    pub const LM_STEP_TOLERANCE: f64 = 1e-10;

    /// 二项置信区间的置信度（1σ中心区间）
    pub const BINOMIAL_CONFIDENCE: f64 = 0.682_689_492_137;
}

/// 轨迹角度分析常量
pub mod track_angle {
    /// 默认角度直方图bin数
    pub const DEFAULT_NBINS: usize = 100;

    /// 第一数据块推导角度范围：均值 ± N×σ
    pub const RANGE_SIGMA: f64 = 5.0;

    /// 推导角度范围前至少收集的轨迹数（跨数据块缓存）
    pub const MIN_RANGE_SAMPLES: usize = 100;
}

/// 默认配置值
pub mod defaults {
    /// 默认数据块行数
    ///
    /// 单块内存占用约为 行数 × DUT数 × 5 × 8 字节
    pub const CHUNK_SIZE: usize = 100_000;

    /// 默认最小轨迹/击中密度
    pub const MINIMUM_DENSITY: u64 = 1;

    /// 默认DUT并发度
    pub const PARALLEL_DUTS_DEGREE: usize = 4;
}

/// 并发度限制常量
pub mod parallel_limits {
    /// 最小并发度
    pub const MIN_PARALLEL_DEGREE: usize = 1;

    /// 最大并发度
    ///
    /// 限制最大并发度为16，避免过度并发导致的内存占用过高
    pub const MAX_PARALLEL_DEGREE: usize = 16;
}
