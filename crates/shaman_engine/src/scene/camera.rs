//! Camera projection and view matrices
//!
//! Right-handed with +Y down, matching Vulkan clip space; depth maps to 0..1.

use crate::foundation::math::{yxz_terms, Mat4, Vec3};

/// Projection and view matrices for one viewer
#[derive(Debug, Clone)]
pub struct Camera {
    projection: Mat4,
    view: Mat4,
    inverse_view: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            projection: Mat4::identity(),
            view: Mat4::identity(),
            inverse_view: Mat4::identity(),
        }
    }
}

impl Camera {
    /// Orthographic projection of the box `[left, right] x [top, bottom] x [near, far]`
    pub fn set_orthographic_projection(
        &mut self,
        left: f32,
        right: f32,
        top: f32,
        bottom: f32,
        near: f32,
        far: f32,
    ) {
        let mut projection = Mat4::identity();
        projection[(0, 0)] = 2.0 / (right - left);
        projection[(1, 1)] = 2.0 / (bottom - top);
        projection[(2, 2)] = 1.0 / (far - near);
        projection[(0, 3)] = -(right + left) / (right - left);
        projection[(1, 3)] = -(bottom + top) / (bottom - top);
        projection[(2, 3)] = -near / (far - near);
        self.projection = projection;
    }

    /// Perspective projection; `fovy` in radians, `aspect` is width over height
    pub fn set_perspective_projection(&mut self, fovy: f32, aspect: f32, near: f32, far: f32) {
        debug_assert!(aspect.abs() > f32::EPSILON, "aspect ratio must be nonzero");

        let tan_half_fovy = (fovy / 2.0).tan();
        let mut projection = Mat4::zeros();
        projection[(0, 0)] = 1.0 / (aspect * tan_half_fovy);
        projection[(1, 1)] = 1.0 / tan_half_fovy;
        projection[(2, 2)] = far / (far - near);
        projection[(3, 2)] = 1.0;
        projection[(2, 3)] = -(far * near) / (far - near);
        self.projection = projection;
    }

    /// Look from `position` along `direction`
    pub fn set_view_direction(&mut self, position: Vec3, direction: Vec3, up: Vec3) {
        let w = direction.normalize();
        let u = w.cross(&up).normalize();
        let v = w.cross(&u);
        self.set_view_basis(position, u, v, w);
    }

    /// Look from `position` toward `target`
    pub fn set_view_target(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        self.set_view_direction(position, target - position, up);
    }

    /// Orient with Y-X-Z Tait-Bryan angles, the inverse of an object's rotation
    pub fn set_view_yxz(&mut self, position: Vec3, rotation: Vec3) {
        let (c1, s1, c2, s2, c3, s3) = yxz_terms(&rotation);
        let u = Vec3::new(c1 * c3 + s1 * s2 * s3, c2 * s3, c1 * s2 * s3 - c3 * s1);
        let v = Vec3::new(c3 * s1 * s2 - c1 * s3, c2 * c3, c1 * c3 * s2 + s1 * s3);
        let w = Vec3::new(c2 * s1, -s2, c1 * c2);
        self.set_view_basis(position, u, v, w);
    }

    fn set_view_basis(&mut self, position: Vec3, u: Vec3, v: Vec3, w: Vec3) {
        let mut view = Mat4::identity();
        let mut inverse_view = Mat4::identity();
        for (row, axis) in [u, v, w].iter().enumerate() {
            for col in 0..3 {
                view[(row, col)] = axis[col];
                inverse_view[(col, row)] = axis[col];
            }
            view[(row, 3)] = -axis.dot(&position);
            inverse_view[(row, 3)] = position[row];
        }
        self.view = view;
        self.inverse_view = inverse_view;
    }

    /// Current projection matrix
    pub fn projection(&self) -> &Mat4 {
        &self.projection
    }

    /// Current view matrix
    pub fn view(&self) -> &Mat4 {
        &self.view
    }

    /// Camera-to-world matrix
    pub fn inverse_view(&self) -> &Mat4 {
        &self.inverse_view
    }

    /// `projection * view`
    pub fn projection_view(&self) -> Mat4 {
        self.projection * self.view
    }

    /// World position of the viewer
    pub fn position(&self) -> Vec3 {
        Vec3::new(
            self.inverse_view[(0, 3)],
            self.inverse_view[(1, 3)],
            self.inverse_view[(2, 3)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;

    #[test]
    fn test_perspective_depth_range() {
        let mut camera = Camera::default();
        camera.set_perspective_projection(50_f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);

        let near = camera.projection() * Vec4::new(0.0, 0.0, 0.1, 1.0);
        let far = camera.projection() * Vec4::new(0.0, 0.0, 100.0, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-6);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_perspective_aspect_scales_x() {
        let mut camera = Camera::default();
        camera.set_perspective_projection(std::f32::consts::FRAC_PI_2, 2.0, 0.1, 10.0);
        assert_relative_eq!(camera.projection()[(0, 0)], 0.5, epsilon = 1e-6);
        assert_relative_eq!(camera.projection()[(1, 1)], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_orthographic_maps_box_to_clip() {
        let mut camera = Camera::default();
        camera.set_orthographic_projection(-2.0, 2.0, -1.0, 1.0, 0.0, 10.0);

        let corner = camera.projection() * Vec4::new(2.0, 1.0, 10.0, 1.0);
        assert_relative_eq!(corner, Vec4::new(1.0, 1.0, 1.0, 1.0), epsilon = 1e-6);
        let origin = camera.projection() * Vec4::new(-2.0, -1.0, 0.0, 1.0);
        assert_relative_eq!(origin, Vec4::new(-1.0, -1.0, 0.0, 1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_view_target_puts_target_on_positive_z() {
        let mut camera = Camera::default();
        camera.set_view_target(
            Vec3::new(0.0, 0.0, -5.0),
            Vec3::zeros(),
            Vec3::new(0.0, -1.0, 0.0),
        );

        let target = camera.view() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(target, Vec4::new(0.0, 0.0, 5.0, 1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_inverse_view_round_trips() {
        let mut camera = Camera::default();
        camera.set_view_yxz(Vec3::new(1.0, -2.0, 3.0), Vec3::new(0.2, 0.9, -0.4));

        assert_relative_eq!(
            camera.view() * camera.inverse_view(),
            Mat4::identity(),
            epsilon = 1e-5
        );
        assert_relative_eq!(camera.position(), Vec3::new(1.0, -2.0, 3.0), epsilon = 1e-6);
    }

    #[test]
    fn test_zero_yxz_is_translation_only() {
        let mut camera = Camera::default();
        camera.set_view_yxz(Vec3::new(0.0, 0.0, -2.5), Vec3::zeros());

        let mut expected = Mat4::identity();
        expected[(2, 3)] = 2.5;
        assert_relative_eq!(*camera.view(), expected, epsilon = 1e-6);
    }
}
