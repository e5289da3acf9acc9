//! Math types for 3D graphics

pub use nalgebra::{Matrix4, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Column-major array layout expected by GLSL `mat4`
pub fn to_gpu_matrix(matrix: &Mat4) -> [[f32; 4]; 4] {
    (*matrix).into()
}

/// Sines and cosines of a Y-X-Z Tait-Bryan rotation as `(c1, s1, c2, s2, c3, s3)`,
/// where 1 is yaw (Y), 2 is pitch (X) and 3 is roll (Z)
pub(crate) fn yxz_terms(rotation: &Vec3) -> (f32, f32, f32, f32, f32, f32) {
    (
        rotation.y.cos(),
        rotation.y.sin(),
        rotation.x.cos(),
        rotation.x.sin(),
        rotation.z.cos(),
        rotation.z.sin(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gpu_matrix_is_column_major() {
        let mut m = Mat4::identity();
        m[(0, 3)] = 5.0;
        let columns = to_gpu_matrix(&m);
        assert_relative_eq!(columns[3][0], 5.0);
        assert_relative_eq!(columns[0][3], 0.0);
    }

    #[test]
    fn test_yxz_terms_of_zero_rotation() {
        let (c1, s1, c2, s2, c3, s3) = yxz_terms(&Vec3::zeros());
        assert_relative_eq!(c1 * c2 * c3, 1.0);
        assert_relative_eq!(s1 + s2 + s3, 0.0);
    }
}
