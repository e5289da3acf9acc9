//! Render objects and their transforms

use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::foundation::math::{yxz_terms, Mat4, Vec3};
use crate::scene::model::Model;

/// Unique render object identifier
pub type ObjectId = u32;

static NEXT_OBJECT_ID: AtomicU32 = AtomicU32::new(0);

/// Translation, scale and Y-X-Z rotation of an object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// World-space position
    pub translation: Vec3,
    /// Per-axis scale
    pub scale: Vec3,
    /// Tait-Bryan angles in radians, applied Y then X then Z
    pub rotation: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::zeros(),
            scale: Vec3::new(1.0, 1.0, 1.0),
            rotation: Vec3::zeros(),
        }
    }
}

impl Transform {
    /// Model matrix `translate * Ry * Rx * Rz * scale`
    pub fn matrix(&self) -> Mat4 {
        let (c1, s1, c2, s2, c3, s3) = yxz_terms(&self.rotation);
        let s = &self.scale;
        let t = &self.translation;

        Mat4::new(
            s.x * (c1 * c3 + s1 * s2 * s3),
            s.y * (c3 * s1 * s2 - c1 * s3),
            s.z * (c2 * s1),
            t.x,
            s.x * (c2 * s3),
            s.y * (c2 * c3),
            s.z * (-s2),
            t.y,
            s.x * (c1 * s2 * s3 - c3 * s1),
            s.y * (c1 * c3 * s2 + s1 * s3),
            s.z * (c1 * c2),
            t.z,
            0.0,
            0.0,
            0.0,
            1.0,
        )
    }
}

/// Something the frame renderer draws: an optional model, a color and a transform
pub struct RenderObject {
    id: ObjectId,
    /// Geometry; objects without a model only exist for their transform
    pub model: Option<Rc<Model>>,
    /// Flat color pushed alongside the transform
    pub color: Vec3,
    /// Placement in the world
    pub transform: Transform,
}

impl RenderObject {
    /// Create an empty object with a process-unique id
    pub fn create() -> Self {
        Self {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            model: None,
            color: Vec3::zeros(),
            transform: Transform::default(),
        }
    }

    /// Unique id assigned at creation
    pub fn id(&self) -> ObjectId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_ids_are_unique() {
        let a = RenderObject::create();
        let b = RenderObject::create();
        assert_ne!(a.id(), b.id());
        assert!(a.model.is_none());
    }

    #[test]
    fn test_identity_transform() {
        assert_relative_eq!(Transform::default().matrix(), Mat4::identity());
    }

    #[test]
    fn test_translation_and_scale() {
        let transform = Transform {
            translation: Vec3::new(1.0, 2.0, 3.0),
            scale: Vec3::new(2.0, 3.0, 4.0),
            rotation: Vec3::zeros(),
        };
        let point = transform.matrix() * Vec4::new(1.0, 1.0, 1.0, 1.0);
        assert_relative_eq!(point, Vec4::new(3.0, 5.0, 7.0, 1.0));
    }

    #[test]
    fn test_yaw_rotates_x_toward_negative_z() {
        let transform = Transform {
            rotation: Vec3::new(0.0, FRAC_PI_2, 0.0),
            ..Transform::default()
        };
        let point = transform.matrix() * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(point, Vec4::new(0.0, 0.0, -1.0, 1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_rotation_preserves_length() {
        let transform = Transform {
            rotation: Vec3::new(0.3, 1.1, -0.7),
            ..Transform::default()
        };
        let point = transform.matrix() * Vec4::new(1.0, 2.0, 3.0, 0.0);
        assert_relative_eq!(point.norm(), 14.0_f32.sqrt(), epsilon = 1e-5);
    }
}
