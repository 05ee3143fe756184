//! 旋转矩阵
//!
//! 约定：右手系主动旋转，组合顺序固定为 R = Rz(γ)·Ry(β)·Rx(α)。
//! 交换顺序会改变结果，所有调用方必须经由 [`rotation_matrix`] 构造。

use nalgebra::Matrix3;

/// 绕x轴旋转α
pub fn rotation_matrix_x(alpha: f64) -> Matrix3<f64> {
    let (s, c) = alpha.sin_cos();
    Matrix3::new(
        1.0, 0.0, 0.0, //
        0.0, c, -s, //
        0.0, s, c,
    )
}

/// 绕y轴旋转β
pub fn rotation_matrix_y(beta: f64) -> Matrix3<f64> {
    let (s, c) = beta.sin_cos();
    Matrix3::new(
        c, 0.0, s, //
        0.0, 1.0, 0.0, //
        -s, 0.0, c,
    )
}

/// 绕z轴旋转γ
pub fn rotation_matrix_z(gamma: f64) -> Matrix3<f64> {
    let (s, c) = gamma.sin_cos();
    Matrix3::new(
        c, -s, 0.0, //
        s, c, 0.0, //
        0.0, 0.0, 1.0,
    )
}

/// 组合旋转矩阵 R = Rz(γ)·Ry(β)·Rx(α)
///
/// 局部→全局：`global = R·local + t`；全局→局部：`local = Rᵀ·(global − t)`。
pub fn rotation_matrix(alpha: f64, beta: f64, gamma: f64) -> Matrix3<f64> {
    rotation_matrix_z(gamma) * rotation_matrix_y(beta) * rotation_matrix_x(alpha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const ANGLES: [f64; 7] = [
        0.0,
        PI / 4.0,
        PI / 3.0,
        PI / 2.0,
        3.0 * PI / 4.0,
        PI,
        4.0 * PI / 3.0,
    ];

    fn assert_orthonormal(m: &Matrix3<f64>) {
        assert!((m.determinant() - 1.0).abs() < 1e-12);
        let inverse = m.try_inverse().expect("rotation must be invertible");
        assert!((m.transpose() - inverse).abs().max() < 1e-12);
    }

    #[test]
    fn test_single_axis_rotations_are_orthonormal() {
        for &angle in &ANGLES {
            assert_orthonormal(&rotation_matrix_x(angle));
            assert_orthonormal(&rotation_matrix_y(angle));
            assert_orthonormal(&rotation_matrix_z(angle));
        }
    }

    #[test]
    fn test_composed_rotation_is_orthonormal() {
        for &alpha in &ANGLES {
            for &beta in &ANGLES {
                for &gamma in &ANGLES {
                    assert_orthonormal(&rotation_matrix(alpha, beta, gamma));
                }
            }
        }
    }

    #[test]
    fn test_composition_order_is_z_y_x() {
        let (alpha, beta, gamma) = (0.1, -0.2, 0.3);
        let expected = rotation_matrix_z(gamma) * rotation_matrix_y(beta) * rotation_matrix_x(alpha);
        let swapped = rotation_matrix_x(alpha) * rotation_matrix_y(beta) * rotation_matrix_z(gamma);

        assert_eq!(rotation_matrix(alpha, beta, gamma), expected);
        // 顺序不同结果不同
        assert!((expected - swapped).abs().max() > 1e-3);
    }

    #[test]
    fn test_quarter_turn_about_z() {
        let m = rotation_matrix_z(PI / 2.0);
        let v = m * nalgebra::Vector3::new(1.0, 0.0, 0.0);
        assert!((v - nalgebra::Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-12);
    }
}
