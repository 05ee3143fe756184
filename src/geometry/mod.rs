//! 几何模块
//!
//! 对准参数、旋转矩阵以及全局/局部坐标变换。

pub mod alignment;
pub mod rotation;
pub mod transform;

pub use alignment::{AlignmentFile, AlignmentRecord, AlignmentTable, PreAlignmentRecord};
pub use rotation::rotation_matrix;
pub use transform::{DutTransform, check_local_z, line_plane_intersection};
