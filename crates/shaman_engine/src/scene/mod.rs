//! Scene data consumed by the frame renderer
//!
//! Models own GPU vertex buffers; render objects pair a model with a color
//! and transform. The camera and keyboard controller turn input into the
//! matrices pushed each frame.

pub mod camera;
pub mod controller;
pub mod model;
pub mod object;

pub use camera::Camera;
pub use controller::{KeyMappings, KeyboardController};
pub use model::{cube_vertices, Model, Vertex};
pub use object::{ObjectId, RenderObject, Transform};
