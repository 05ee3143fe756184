//! 坐标变换（全局 ↔ DUT局部）
//!
//! 纯函数实现，无内部状态：相同输入在任意调用顺序下得到相同结果，
//! 可在每个数据块中重复调用。
//!
//! 局部坐标系定义：探测器平面位于 z = 0，原点在传感器中心。

use super::rotation::rotation_matrix;
use crate::error::{AnalysisError, AnalysisResult};
use crate::tools::constants::geometry;
use nalgebra::{Matrix3, Vector2, Vector3};

/// 单个DUT的刚体（或纯平移）变换
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DutTransform {
    /// 预对准：平面内平移 + 可选逐轴缩放，无旋转
    PreAligned {
        offset: Vector2<f64>,
        scale: Vector2<f64>,
        z: f64,
    },

    /// 完整对准：平移 + 旋转 R = Rz(γ)·Ry(β)·Rx(α)
    Aligned {
        rotation: Matrix3<f64>,
        translation: Vector3<f64>,
    },
}

impl DutTransform {
    /// 从欧拉角与平移构造完整对准变换
    pub fn aligned(translation: Vector3<f64>, alpha: f64, beta: f64, gamma: f64) -> Self {
        Self::Aligned {
            rotation: rotation_matrix(alpha, beta, gamma),
            translation,
        }
    }

    /// 纯平移的预对准变换（缩放为1）
    pub fn pre_aligned(offset_x: f64, offset_y: f64, z: f64) -> Self {
        Self::PreAligned {
            offset: Vector2::new(offset_x, offset_y),
            scale: Vector2::new(1.0, 1.0),
            z,
        }
    }

    /// 单位变换（望远镜参考系）
    pub fn identity() -> Self {
        Self::Aligned {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// 全局 → 局部
    #[inline]
    pub fn to_local(&self, global: &Vector3<f64>) -> Vector3<f64> {
        match self {
            Self::PreAligned { offset, scale, z } => Vector3::new(
                (global.x - offset.x) / scale.x,
                (global.y - offset.y) / scale.y,
                global.z - z,
            ),
            Self::Aligned {
                rotation,
                translation,
            } => rotation.transpose() * (global - translation),
        }
    }

    /// 局部 → 全局
    #[inline]
    pub fn to_global(&self, local: &Vector3<f64>) -> Vector3<f64> {
        match self {
            Self::PreAligned { offset, scale, z } => Vector3::new(
                local.x * scale.x + offset.x,
                local.y * scale.y + offset.y,
                local.z + z,
            ),
            Self::Aligned {
                rotation,
                translation,
            } => rotation * local + translation,
        }
    }

    /// 批量全局 → 局部
    pub fn to_local_batch(&self, points: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        points.iter().map(|p| self.to_local(p)).collect()
    }

    /// 批量局部 → 全局
    pub fn to_global_batch(&self, points: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        points.iter().map(|p| self.to_global(p)).collect()
    }

    /// 旋转部分（预对准为单位阵）
    pub fn rotation(&self) -> Matrix3<f64> {
        match self {
            Self::PreAligned { .. } => Matrix3::identity(),
            Self::Aligned { rotation, .. } => *rotation,
        }
    }

    /// 平面上一点（局部原点的全局位置）
    pub fn plane_point(&self) -> Vector3<f64> {
        self.to_global(&Vector3::zeros())
    }

    /// 平面法向量（全局），符号修正为 z 分量为正
    pub fn plane_normal(&self) -> Vector3<f64> {
        let normal = self.rotation() * Vector3::z();
        if normal.z < 0.0 { -normal } else { normal }
    }

    /// 列方向（局部x轴）的全局方向
    pub fn column_axis(&self) -> Vector3<f64> {
        self.rotation() * Vector3::x()
    }

    /// 行方向（局部y轴）的全局方向
    pub fn row_axis(&self) -> Vector3<f64> {
        self.rotation() * Vector3::y()
    }

    /// 轨迹与本DUT平面的交点（全局坐标）
    pub fn intersect_track(&self, offset: &Vector3<f64>, slope: &Vector3<f64>) -> Vector3<f64> {
        line_plane_intersection(offset, slope, &self.plane_point(), &self.plane_normal())
    }
}

/// 直线 `offset + t·slope` 与平面的交点
///
/// 直线与平面平行时返回全NaN向量，由调用方作为无效行过滤。
pub fn line_plane_intersection(
    offset: &Vector3<f64>,
    slope: &Vector3<f64>,
    plane_point: &Vector3<f64>,
    plane_normal: &Vector3<f64>,
) -> Vector3<f64> {
    let denom = plane_normal.dot(slope);
    if denom.abs() < f64::EPSILON {
        return Vector3::repeat(f64::NAN);
    }
    let t = plane_normal.dot(&(plane_point - offset)) / denom;
    offset + slope * t
}

/// 校验变换到局部坐标后的点位于 z = 0 平面
///
/// `local_z` 与 `magnitudes`（对应全局点的模长）一一对应，NaN项跳过。
/// 容差 = 绝对容差 + 相对容差 × 模长。
pub fn check_local_z(dut: usize, local_z: &[f64], magnitudes: &[f64]) -> AnalysisResult<()> {
    let mut worst: Option<(f64, f64)> = None;

    for (&z, &magnitude) in local_z.iter().zip(magnitudes) {
        if !z.is_finite() || !magnitude.is_finite() {
            continue;
        }
        let tolerance =
            geometry::LOCAL_Z_ABS_TOLERANCE + geometry::LOCAL_Z_REL_TOLERANCE * magnitude;
        let excess = z.abs() - tolerance;
        if excess > 0.0 && worst.is_none_or(|(w, _)| z.abs() > w) {
            worst = Some((z.abs(), tolerance));
        }
    }

    match worst {
        Some((max_abs_z, tolerance)) => Err(AnalysisError::AlignmentConsistency {
            dut,
            max_abs_z,
            tolerance,
        }),
        None => Ok(()),
    }
}
