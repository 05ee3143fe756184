//! 运行配置与逐DUT参数归一化
//!
//! 配置中的每个参数可写成单值（广播到所有DUT）或逐DUT列表。
//! 在读取任何数据块之前一次性展开为按DUT索引的定长数组，
//! 长度不一致、bin大小不能整除传感器尺寸等错误在此处致命返回。

use crate::error::{AnalysisResult, config_error};
use crate::histogram::WindowPolicy;
use crate::tools::constants::{defaults, residuals, track_angle};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 每轴 [下限, 上限]，None 表示该轴不限制
pub type AxisLimits = [Option<[f64; 2]>; 2];

/// 单值或逐DUT列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerDut<T> {
    Single(T),
    PerDut(Vec<T>),
}

impl<T: Default> Default for PerDut<T> {
    fn default() -> Self {
        Self::Single(T::default())
    }
}

impl<T: Clone> PerDut<T> {
    /// 展开为长度为 `n_duts` 的数组
    pub fn broadcast(&self, name: &str, n_duts: usize) -> AnalysisResult<Vec<T>> {
        match self {
            Self::Single(value) => Ok(vec![value.clone(); n_duts]),
            Self::PerDut(values) if values.len() == n_duts => Ok(values.clone()),
            Self::PerDut(values) => Err(config_error(format!(
                "参数 `{name}` 有 {} 项，但DUT数为 {n_duts}",
                values.len()
            ))),
        }
    }
}

fn default_chunk_size() -> usize {
    defaults::CHUNK_SIZE
}

fn default_minimum_density() -> PerDut<u64> {
    PerDut::Single(defaults::MINIMUM_DENSITY)
}

fn default_true() -> bool {
    true
}

fn default_window_pixels() -> f64 {
    residuals::WINDOW_PIXELS
}

fn default_window_fwhm() -> f64 {
    residuals::WINDOW_FWHM
}

fn default_bins_per_pixel() -> f64 {
    residuals::BINS_PER_PIXEL
}

fn default_angle_nbins() -> usize {
    track_angle::DEFAULT_NBINS
}

/// 残差分析配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualConfig {
    /// 显式残差bin数
    #[serde(default)]
    pub nbins: PerDut<Option<usize>>,
    #[serde(default = "default_bins_per_pixel")]
    pub bins_per_pixel: f64,
    #[serde(default = "default_window_pixels")]
    pub window_pixels: f64,
    #[serde(default = "default_window_fwhm")]
    pub window_fwhm: f64,
    /// 位置轴每bin像素数（为空时自动分bin）
    #[serde(default)]
    pub npixels_per_bin: PerDut<Option<usize>>,
    #[serde(default = "default_true")]
    pub use_fit_limits: bool,
    #[serde(default)]
    pub local_fit_limits: PerDut<AxisLimits>,
    #[serde(default)]
    pub global_fit_limits: PerDut<AxisLimits>,
}

impl Default for ResidualConfig {
    fn default() -> Self {
        Self {
            nbins: PerDut::default(),
            bins_per_pixel: default_bins_per_pixel(),
            window_pixels: default_window_pixels(),
            window_fwhm: default_window_fwhm(),
            npixels_per_bin: PerDut::default(),
            use_fit_limits: true,
            local_fit_limits: PerDut::default(),
            global_fit_limits: PerDut::default(),
        }
    }
}

/// 效率分析配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyConfig {
    #[serde(default)]
    pub cut_distance: PerDut<Option<f64>>,
    #[serde(default = "default_minimum_density")]
    pub minimum_track_density: PerDut<u64>,
    /// 虚拟像素大小（为空时使用真实像素间距）
    #[serde(default)]
    pub bin_size: PerDut<Option<[f64; 2]>>,
    /// 计入效率的局部坐标区域（排除边缘像素）
    #[serde(default)]
    pub local_limits: PerDut<AxisLimits>,
}

impl Default for EfficiencyConfig {
    fn default() -> Self {
        Self {
            cut_distance: PerDut::default(),
            minimum_track_density: default_minimum_density(),
            bin_size: PerDut::default(),
            local_limits: PerDut::default(),
        }
    }
}

/// 纯度分析配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurityConfig {
    #[serde(default)]
    pub cut_distance: PerDut<Option<f64>>,
    #[serde(default = "default_minimum_density")]
    pub minimum_hit_density: PerDut<u64>,
    #[serde(default)]
    pub bin_size: PerDut<Option<[f64; 2]>>,
}

impl Default for PurityConfig {
    fn default() -> Self {
        Self {
            cut_distance: PerDut::default(),
            minimum_hit_density: default_minimum_density(),
            bin_size: PerDut::default(),
        }
    }
}

/// 轨迹角度配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackAngleConfig {
    #[serde(default = "default_angle_nbins")]
    pub nbins: usize,
    /// 显式角度范围 ±range（rad）；为空时由第一数据块推导
    #[serde(default)]
    pub angle_range: Option<f64>,
}

impl Default for TrackAngleConfig {
    fn default() -> Self {
        Self {
            nbins: default_angle_nbins(),
            angle_range: None,
        }
    }
}

/// 运行配置（JSON）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub dut_names: Vec<String>,
    /// 逐DUT轨迹表路径
    #[serde(default)]
    pub track_tables: Vec<PathBuf>,
    /// 轨迹表目录（按 `tracks_dut_<i>.jsonl` 发现）
    #[serde(default)]
    pub tracks_dir: Option<PathBuf>,
    #[serde(default)]
    pub alignment_file: Option<PathBuf>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// 像素间距 [列, 行]（µm）
    pub pixel_size: PerDut<[f64; 2]>,
    /// 像素数 [列, 行]
    pub n_pixels: PerDut<[usize; 2]>,
    #[serde(default)]
    pub max_chi2: PerDut<Option<f64>>,
    /// 仅使用给定团簇大小的击中计算残差
    #[serde(default)]
    pub cluster_size_selection: PerDut<Option<u32>>,
    #[serde(default)]
    pub use_prealignment: bool,
    #[serde(default)]
    pub residuals: ResidualConfig,
    #[serde(default)]
    pub efficiency: EfficiencyConfig,
    #[serde(default)]
    pub purity: PurityConfig,
    #[serde(default)]
    pub track_angle: TrackAngleConfig,
}

/// 单个DUT的残差设置
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualSettings {
    pub nbins: Option<usize>,
    pub bins_per_pixel: f64,
    pub window_pixels: f64,
    pub window_fwhm: f64,
    pub npixels_per_bin: Option<usize>,
    pub use_fit_limits: bool,
    pub local_fit_limits: AxisLimits,
    pub global_fit_limits: AxisLimits,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EfficiencySettings {
    pub cut_distance: Option<f64>,
    pub minimum_track_density: u64,
    pub bin_size: [f64; 2],
    pub local_limits: AxisLimits,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PuritySettings {
    pub cut_distance: Option<f64>,
    pub minimum_hit_density: u64,
    pub bin_size: [f64; 2],
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackAngleSettings {
    pub nbins: usize,
    pub angle_range: Option<f64>,
}

/// 归一化后的单DUT设置
#[derive(Debug, Clone, PartialEq)]
pub struct DutSettings {
    pub index: usize,
    pub name: String,
    pub pixel_size: [f64; 2],
    pub n_pixels: [usize; 2],
    pub max_chi2: Option<f64>,
    pub cluster_size_selection: Option<u32>,
    pub residuals: ResidualSettings,
    pub efficiency: EfficiencySettings,
    pub purity: PuritySettings,
    pub track_angle: TrackAngleSettings,
}

impl DutSettings {
    /// 传感器尺寸 [列, 行]（µm）
    pub fn sensor_size(&self) -> [f64; 2] {
        [
            self.pixel_size[0] * self.n_pixels[0] as f64,
            self.pixel_size[1] * self.n_pixels[1] as f64,
        ]
    }

    /// 局部坐标下的传感器范围（以传感器中心为原点）
    pub fn sensor_range(&self, axis: usize) -> (f64, f64) {
        let half = self.sensor_size()[axis] / 2.0;
        (-half, half)
    }

    /// 残差窗口策略（按轴选择像素间距）
    pub fn window_policy(&self, axis: usize) -> WindowPolicy {
        WindowPolicy {
            pixel_pitch: self.pixel_size[axis],
            window_pixels: self.residuals.window_pixels,
            window_fwhm: self.residuals.window_fwhm,
            nbins: self.residuals.nbins,
            bins_per_pixel: self.residuals.bins_per_pixel,
        }
    }
}

/// bin大小必须整除传感器尺寸
fn check_divides(dut: usize, what: &str, size: f64, bin: f64) -> AnalysisResult<()> {
    if !(bin > 0.0) || !bin.is_finite() {
        return Err(config_error(format!("DUT{dut} {what} 必须为正: {bin}")));
    }
    let ratio = size / bin;
    if (ratio - ratio.round()).abs() > 1e-6 * ratio.max(1.0) {
        return Err(config_error(format!(
            "DUT{dut} {what} {bin} 不能整除传感器尺寸 {size}"
        )));
    }
    Ok(())
}

fn check_limits(dut: usize, what: &str, limits: &AxisLimits) -> AnalysisResult<()> {
    for [lo, hi] in limits.iter().flatten() {
        if !(lo < hi) {
            return Err(config_error(format!(
                "DUT{dut} {what} 下限必须小于上限: [{lo}, {hi}]"
            )));
        }
    }
    Ok(())
}

impl RunConfig {
    /// 读取JSON配置文件
    pub fn load(path: &std::path::Path) -> AnalysisResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn n_duts(&self) -> usize {
        self.dut_names.len()
    }

    /// 展开并校验所有逐DUT参数
    pub fn resolve(&self) -> AnalysisResult<Vec<DutSettings>> {
        let n = self.n_duts();
        if n == 0 {
            return Err(config_error("dut_names 为空"));
        }
        if self.chunk_size == 0 {
            return Err(config_error("chunk_size 必须大于0"));
        }
        if !self.track_tables.is_empty() && self.track_tables.len() != n {
            return Err(config_error(format!(
                "track_tables 有 {} 项，但DUT数为 {n}",
                self.track_tables.len()
            )));
        }
        if self.track_angle.nbins == 0 {
            return Err(config_error("track_angle.nbins 必须大于0"));
        }
        if !(self.residuals.bins_per_pixel > 0.0) {
            return Err(config_error("residuals.bins_per_pixel 必须为正"));
        }

        let pixel_size = self.pixel_size.broadcast("pixel_size", n)?;
        let n_pixels = self.n_pixels.broadcast("n_pixels", n)?;
        let max_chi2 = self.max_chi2.broadcast("max_chi2", n)?;
        let cluster = self
            .cluster_size_selection
            .broadcast("cluster_size_selection", n)?;
        let res_nbins = self.residuals.nbins.broadcast("residuals.nbins", n)?;
        let npixels_per_bin = self
            .residuals
            .npixels_per_bin
            .broadcast("residuals.npixels_per_bin", n)?;
        let local_fit = self
            .residuals
            .local_fit_limits
            .broadcast("residuals.local_fit_limits", n)?;
        let global_fit = self
            .residuals
            .global_fit_limits
            .broadcast("residuals.global_fit_limits", n)?;
        let eff_cut = self
            .efficiency
            .cut_distance
            .broadcast("efficiency.cut_distance", n)?;
        let eff_min = self
            .efficiency
            .minimum_track_density
            .broadcast("efficiency.minimum_track_density", n)?;
        let eff_bins = self.efficiency.bin_size.broadcast("efficiency.bin_size", n)?;
        let eff_limits = self
            .efficiency
            .local_limits
            .broadcast("efficiency.local_limits", n)?;
        let pur_cut = self.purity.cut_distance.broadcast("purity.cut_distance", n)?;
        let pur_min = self
            .purity
            .minimum_hit_density
            .broadcast("purity.minimum_hit_density", n)?;
        let pur_bins = self.purity.bin_size.broadcast("purity.bin_size", n)?;

        let mut settings = Vec::with_capacity(n);
        for dut in 0..n {
            let pitch = pixel_size[dut];
            let pixels = n_pixels[dut];
            if pitch.iter().any(|&p| !(p > 0.0) || !p.is_finite()) {
                return Err(config_error(format!("DUT{dut} 像素间距必须为正: {pitch:?}")));
            }
            if pixels.contains(&0) {
                return Err(config_error(format!("DUT{dut} 像素数必须大于0: {pixels:?}")));
            }
            let size = [pitch[0] * pixels[0] as f64, pitch[1] * pixels[1] as f64];

            let eff_bin = eff_bins[dut].unwrap_or(pitch);
            let pur_bin = pur_bins[dut].unwrap_or(pitch);
            for axis in 0..2 {
                check_divides(dut, "efficiency.bin_size", size[axis], eff_bin[axis])?;
                check_divides(dut, "purity.bin_size", size[axis], pur_bin[axis])?;
                if let Some(npix) = npixels_per_bin[dut] {
                    if npix == 0 || pixels[axis] % npix != 0 {
                        return Err(config_error(format!(
                            "DUT{dut} residuals.npixels_per_bin {npix} 不能整除像素数 {}",
                            pixels[axis]
                        )));
                    }
                }
            }
            check_limits(dut, "local_fit_limits", &local_fit[dut])?;
            check_limits(dut, "global_fit_limits", &global_fit[dut])?;
            check_limits(dut, "efficiency.local_limits", &eff_limits[dut])?;
            for (what, cut) in [("efficiency.cut_distance", eff_cut[dut]), ("purity.cut_distance", pur_cut[dut])] {
                if let Some(c) = cut
                    && !(c > 0.0)
                {
                    return Err(config_error(format!("DUT{dut} {what} 必须为正: {c}")));
                }
            }

            settings.push(DutSettings {
                index: dut,
                name: self.dut_names[dut].clone(),
                pixel_size: pitch,
                n_pixels: pixels,
                max_chi2: max_chi2[dut],
                cluster_size_selection: cluster[dut],
                residuals: ResidualSettings {
                    nbins: res_nbins[dut],
                    bins_per_pixel: self.residuals.bins_per_pixel,
                    window_pixels: self.residuals.window_pixels,
                    window_fwhm: self.residuals.window_fwhm,
                    npixels_per_bin: npixels_per_bin[dut],
                    use_fit_limits: self.residuals.use_fit_limits,
                    local_fit_limits: local_fit[dut],
                    global_fit_limits: global_fit[dut],
                },
                efficiency: EfficiencySettings {
                    cut_distance: eff_cut[dut],
                    minimum_track_density: eff_min[dut],
                    bin_size: eff_bin,
                    local_limits: eff_limits[dut],
                },
                purity: PuritySettings {
                    cut_distance: pur_cut[dut],
                    minimum_hit_density: pur_min[dut],
                    bin_size: pur_bin,
                },
                track_angle: TrackAngleSettings {
                    nbins: self.track_angle.nbins,
                    angle_range: self.track_angle.angle_range,
                },
            });
        }
        Ok(settings)
    }
}
