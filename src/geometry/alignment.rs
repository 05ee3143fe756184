//! 对准参数表
//!
//! 每次分析开始时从持久化存储加载一次，运行期间不可变，
//! 可在各DUT分析之间只读共享。

use super::transform::DutTransform;
use crate::error::{AnalysisError, AnalysisResult, config_error};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_scale() -> f64 {
    1.0
}

/// 预对准记录：平面内平移 + 可选缩放
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreAlignmentRecord {
    pub offset_x: f64,
    pub offset_y: f64,
    #[serde(default = "default_scale")]
    pub scale_x: f64,
    #[serde(default = "default_scale")]
    pub scale_y: f64,
    /// 平面z位置
    pub z: f64,
    /// 预对准时保存的有效拟合范围（局部坐标）
    #[serde(default)]
    pub fit_range_x: Option<[f64; 2]>,
    #[serde(default)]
    pub fit_range_y: Option<[f64; 2]>,
}

/// 完整对准记录：三维平移 + 欧拉角
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRecord {
    pub translation_x: f64,
    pub translation_y: f64,
    pub translation_z: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

/// 对准文件的持久化格式：两种表至少存在一种
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlignmentFile {
    #[serde(default)]
    pub alignment: Option<Vec<AlignmentRecord>>,
    #[serde(default)]
    pub prealignment: Option<Vec<PreAlignmentRecord>>,
}

/// 运行期间唯一生效的对准模型
#[derive(Debug, Clone, PartialEq)]
pub enum AlignmentTable {
    PreAlignment(Vec<PreAlignmentRecord>),
    Alignment(Vec<AlignmentRecord>),
}

impl AlignmentTable {
    /// 从对准文件选择生效模型
    ///
    /// 优先使用完整对准；不存在（或强制预对准）时回退到预对准。
    pub fn from_file_contents(file: AlignmentFile, force_prealignment: bool) -> AnalysisResult<Self> {
        let table = match (file.alignment, file.prealignment) {
            (Some(alignment), _) if !force_prealignment => Self::Alignment(alignment),
            (_, Some(prealignment)) => {
                if !force_prealignment {
                    log::info!(
                        "对准表不存在，回退到预对准 / Alignment table absent, falling back to pre-alignment"
                    );
                }
                Self::PreAlignment(prealignment)
            }
            (Some(_), None) => {
                return Err(config_error(
                    "要求使用预对准，但对准文件中没有预对准表 / pre-alignment requested but not present",
                ));
            }
            (None, None) => {
                return Err(AnalysisError::FormatError(
                    "对准文件既无alignment也无prealignment表".to_string(),
                ));
            }
        };
        table.validate()?;
        Ok(table)
    }

    /// 读取JSON对准文件
    pub fn load(path: &Path, force_prealignment: bool) -> AnalysisResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: AlignmentFile = serde_json::from_str(&content)?;
        Self::from_file_contents(file, force_prealignment)
    }

    fn validate(&self) -> AnalysisResult<()> {
        if let Self::PreAlignment(records) = self {
            for (dut, record) in records.iter().enumerate() {
                if record.scale_x == 0.0 || record.scale_y == 0.0 {
                    return Err(config_error(format!("DUT{dut} 预对准缩放因子为0")));
                }
            }
        }
        if self.n_duts() == 0 {
            return Err(config_error("对准表为空"));
        }
        Ok(())
    }

    pub fn n_duts(&self) -> usize {
        match self {
            Self::PreAlignment(records) => records.len(),
            Self::Alignment(records) => records.len(),
        }
    }

    pub fn is_prealignment(&self) -> bool {
        matches!(self, Self::PreAlignment(_))
    }

    /// 构造指定DUT的坐标变换
    pub fn dut_transform(&self, dut: usize) -> AnalysisResult<DutTransform> {
        let missing = || {
            AnalysisError::InvalidInput(format!(
                "DUT{dut} 不在对准表中（共 {} 个DUT）",
                self.n_duts()
            ))
        };
        match self {
            Self::PreAlignment(records) => {
                let r = records.get(dut).ok_or_else(missing)?;
                Ok(DutTransform::PreAligned {
                    offset: Vector2::new(r.offset_x, r.offset_y),
                    scale: Vector2::new(r.scale_x, r.scale_y),
                    z: r.z,
                })
            }
            Self::Alignment(records) => {
                let r = records.get(dut).ok_or_else(missing)?;
                Ok(DutTransform::aligned(
                    Vector3::new(r.translation_x, r.translation_y, r.translation_z),
                    r.alpha,
                    r.beta,
                    r.gamma,
                ))
            }
        }
    }

    /// 预对准保存的拟合范围 (x, y)；完整对准时无
    pub fn stored_fit_ranges(&self, dut: usize) -> (Option<[f64; 2]>, Option<[f64; 2]>) {
        match self {
            Self::PreAlignment(records) => records
                .get(dut)
                .map(|r| (r.fit_range_x, r.fit_range_y))
                .unwrap_or((None, None)),
            Self::Alignment(_) => (None, None),
        }
    }
}
