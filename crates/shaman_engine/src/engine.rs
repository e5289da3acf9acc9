//! Engine main loop
//!
//! Wires the window, device, frame renderer and a small demo scene together
//! and drives them once per frame until the window closes.

use std::f32::consts::TAU;
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;

use crate::config::{ConfigError, EngineConfig, RenderMode};
use crate::foundation::math::Vec3;
use crate::foundation::time::{FpsCounter, FrameClock};
use crate::render::{
    Device, FrameRenderer, SurfaceWindow, VulkanError, VulkanFrameTarget, Window, WindowError,
};
use crate::scene::{Camera, KeyboardController, Model, RenderObject};

/// Vertical field of view of the demo camera
const FOV_Y_DEGREES: f32 = 50.0;
const NEAR_PLANE: f32 = 0.1;
const FAR_PLANE: f32 = 100.0;

/// Radians per second the demo cubes turn about (x, y)
const SPIN_SPEED: (f32, f32) = (0.25, 0.5);

/// Distance in front of the viewer where the scene sits
const SCENE_DEPTH: f32 = 2.5;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Window creation failed
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// Fatal GPU error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),
}

/// Window, GPU and scene for one run
pub struct ShamanEngine {
    // Field order is drop order: scene, renderer, device, then the window
    // the surface was created from.
    objects: Vec<RenderObject>,
    renderer: FrameRenderer<VulkanFrameTarget>,
    device: Rc<Device>,
    window: Window,
    config: EngineConfig,
}

impl ShamanEngine {
    /// Create every subsystem from `config`
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        log::info!("Initializing engine ({:?})", config.render_mode());

        let window = Window::new(&config.window)?;
        let device = Rc::new(Device::new(&window, &config)?);
        let extent = window.framebuffer_extent();

        let cube = Rc::new(Model::cube(Rc::clone(&device), Vec3::zeros())?);
        let target = match config.render_mode() {
            RenderMode::Raster => VulkanFrameTarget::raster(Rc::clone(&device), extent, &config)?,
            RenderMode::RayTrace => {
                // The tracer reads raw vertices, so the offset is baked in
                let scene = Rc::new(Model::cube(
                    Rc::clone(&device),
                    Vec3::new(0.0, 0.0, SCENE_DEPTH),
                )?);
                VulkanFrameTarget::ray_traced(Rc::clone(&device), extent, &config, scene)?
            }
        };
        let renderer = FrameRenderer::new(target)?;

        Ok(Self {
            objects: Self::load_objects(&cube),
            renderer,
            device,
            window,
            config,
        })
    }

    fn load_objects(cube: &Rc<Model>) -> Vec<RenderObject> {
        [
            (Vec3::new(-0.75, 0.0, SCENE_DEPTH), Vec3::new(0.1, 0.1, 0.8)),
            (Vec3::new(0.75, 0.0, SCENE_DEPTH), Vec3::new(0.8, 0.1, 0.1)),
        ]
        .into_iter()
        .map(|(translation, color)| {
            let mut object = RenderObject::create();
            object.model = Some(Rc::clone(cube));
            object.color = color;
            object.transform.translation = translation;
            object.transform.scale = Vec3::new(0.5, 0.5, 0.5);
            object
        })
        .collect()
    }

    /// Run until the window closes, then drain the GPU
    pub fn run(&mut self) -> Result<(), EngineError> {
        let controller = KeyboardController::default();
        let mut viewer = RenderObject::create();
        let mut camera = Camera::default();
        let mode = self.config.render_mode();

        let start = Instant::now();
        let mut clock = FrameClock::new(start, self.config.max_frame_time);
        let mut fps = FpsCounter::new(start);

        log::info!("Entering main loop");
        while !self.window.should_close() {
            self.window.poll_events();
            let dt = clock.tick(Instant::now());

            let window = &self.window;
            controller.move_in_plane_xz(|key| window.key_pressed(key), dt, &mut viewer);
            camera.set_view_yxz(viewer.transform.translation, viewer.transform.rotation);
            camera.set_perspective_projection(
                FOV_Y_DEGREES.to_radians(),
                self.renderer.aspect_ratio(),
                NEAR_PLANE,
                FAR_PLANE,
            );

            for object in &mut self.objects {
                let rotation = &mut object.transform.rotation;
                rotation.x = (rotation.x + SPIN_SPEED.0 * dt).rem_euclid(TAU);
                rotation.y = (rotation.y + SPIN_SPEED.1 * dt).rem_euclid(TAU);
            }

            if let Some(command_buffer) = self.renderer.begin_frame(&mut self.window)? {
                match mode {
                    RenderMode::Raster => {
                        self.renderer.begin_swap_chain_render_pass(command_buffer);
                        self.renderer
                            .render_objects(command_buffer, &self.objects, &camera)?;
                        self.renderer.end_swap_chain_render_pass(command_buffer);
                    }
                    RenderMode::RayTrace => self.renderer.render_rays(command_buffer, &camera)?,
                }
                self.renderer.end_frame(&mut self.window)?;
            }

            if let Some(rate) = fps.tick(Instant::now()) {
                log::info!("{:.1} FPS", rate);
                let title = format!("{} - {:.0} FPS", self.config.window.name, rate);
                self.window.set_title(&title);
            }
        }

        log::info!("Main loop finished, waiting for device idle");
        self.device.wait_idle()?;
        Ok(())
    }
}
