//! Keyboard-driven viewer movement

use glfw::Key;
use std::f32::consts::TAU;

use crate::foundation::math::Vec3;
use crate::scene::object::RenderObject;

/// Pitch limit in radians, just short of straight up or down
pub const MAX_PITCH: f32 = 1.5;

/// Keys bound to each movement
#[derive(Debug, Clone, Copy)]
pub struct KeyMappings {
    /// Strafe left
    pub move_left: Key,
    /// Strafe right
    pub move_right: Key,
    /// Move along the view direction
    pub move_forward: Key,
    /// Move against the view direction
    pub move_backward: Key,
    /// Rise
    pub move_up: Key,
    /// Sink
    pub move_down: Key,
    /// Yaw left
    pub look_left: Key,
    /// Yaw right
    pub look_right: Key,
    /// Pitch up
    pub look_up: Key,
    /// Pitch down
    pub look_down: Key,
}

impl Default for KeyMappings {
    fn default() -> Self {
        Self {
            move_left: Key::A,
            move_right: Key::D,
            move_forward: Key::W,
            move_backward: Key::S,
            move_up: Key::E,
            move_down: Key::Q,
            look_left: Key::Left,
            look_right: Key::Right,
            look_up: Key::Up,
            look_down: Key::Down,
        }
    }
}

/// Moves an object in the XZ plane and turns it with the arrow keys
#[derive(Debug, Clone)]
pub struct KeyboardController {
    /// Active key bindings
    pub keys: KeyMappings,
    /// Units per second
    pub move_speed: f32,
    /// Radians per second
    pub look_speed: f32,
}

impl Default for KeyboardController {
    fn default() -> Self {
        Self {
            keys: KeyMappings::default(),
            move_speed: 3.0,
            look_speed: 1.5,
        }
    }
}

impl KeyboardController {
    /// Apply one frame of input to `object`.
    ///
    /// `is_pressed` reports whether a key is held; `dt` is in seconds.
    pub fn move_in_plane_xz(
        &self,
        is_pressed: impl Fn(Key) -> bool,
        dt: f32,
        object: &mut RenderObject,
    ) {
        let axis = |positive: Key, negative: Key| {
            f32::from(u8::from(is_pressed(positive))) - f32::from(u8::from(is_pressed(negative)))
        };

        let rotate = Vec3::new(
            axis(self.keys.look_up, self.keys.look_down),
            axis(self.keys.look_right, self.keys.look_left),
            0.0,
        );
        let rotation = &mut object.transform.rotation;
        if rotate.norm_squared() > f32::EPSILON {
            *rotation += self.look_speed * dt * rotate.normalize();
        }
        rotation.x = rotation.x.clamp(-MAX_PITCH, MAX_PITCH);
        rotation.y = rotation.y.rem_euclid(TAU);

        let yaw = rotation.y;
        let forward = Vec3::new(yaw.sin(), 0.0, yaw.cos());
        let right = Vec3::new(forward.z, 0.0, -forward.x);
        let up = Vec3::new(0.0, -1.0, 0.0);

        let direction = forward * axis(self.keys.move_forward, self.keys.move_backward)
            + right * axis(self.keys.move_right, self.keys.move_left)
            + up * axis(self.keys.move_up, self.keys.move_down);
        if direction.norm_squared() > f32::EPSILON {
            object.transform.translation += self.move_speed * dt * direction.normalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn held(keys: &'static [Key]) -> impl Fn(Key) -> bool {
        move |key| keys.contains(&key)
    }

    #[test]
    fn test_idle_input_leaves_object_alone() {
        let controller = KeyboardController::default();
        let mut object = RenderObject::create();
        controller.move_in_plane_xz(held(&[]), 0.5, &mut object);
        assert_relative_eq!(object.transform.translation, Vec3::zeros());
        assert_relative_eq!(object.transform.rotation, Vec3::zeros());
    }

    #[test]
    fn test_forward_follows_yaw() {
        let controller = KeyboardController::default();
        let mut object = RenderObject::create();
        controller.move_in_plane_xz(held(&[Key::W]), 1.0, &mut object);
        assert_relative_eq!(object.transform.translation, Vec3::new(0.0, 0.0, 3.0));

        let mut turned = RenderObject::create();
        turned.transform.rotation.y = std::f32::consts::FRAC_PI_2;
        controller.move_in_plane_xz(held(&[Key::W]), 1.0, &mut turned);
        assert_relative_eq!(
            turned.transform.translation,
            Vec3::new(3.0, 0.0, 0.0),
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_diagonal_movement_is_normalized() {
        let controller = KeyboardController::default();
        let mut object = RenderObject::create();
        controller.move_in_plane_xz(held(&[Key::W, Key::D, Key::E]), 1.0, &mut object);
        assert_relative_eq!(object.transform.translation.norm(), 3.0, epsilon = 1e-5);
        assert!(object.transform.translation.y < 0.0);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let controller = KeyboardController::default();
        let mut object = RenderObject::create();
        for _ in 0..10 {
            controller.move_in_plane_xz(held(&[Key::Up]), 1.0, &mut object);
        }
        assert_relative_eq!(object.transform.rotation.x, MAX_PITCH);

        for _ in 0..20 {
            controller.move_in_plane_xz(held(&[Key::Down]), 1.0, &mut object);
        }
        assert_relative_eq!(object.transform.rotation.x, -MAX_PITCH);
    }

    #[test]
    fn test_yaw_wraps() {
        let controller = KeyboardController::default();
        let mut object = RenderObject::create();
        controller.move_in_plane_xz(held(&[Key::Left]), 1.0, &mut object);
        assert_relative_eq!(object.transform.rotation.y, TAU - 1.5, epsilon = 1e-5);
    }
}
