//! Frame orchestration
//!
//! [`FrameRenderer`] drives the acquire → record → submit bracket for one
//! frame slot at a time and rebuilds the swap chain and pipeline whenever the
//! presentation engine reports the surface as stale. The GPU side sits behind
//! [`FrameTarget`] so the state machine can be exercised without a device.

use ash::vk;

use crate::render::error::{VulkanError, VulkanResult};
use crate::render::swapchain::SwapChainFormats;
use crate::render::window::SurfaceWindow;

/// GPU operations the frame orchestrator depends on
pub trait FrameTarget {
    /// Number of frame slots (N)
    fn max_frames_in_flight(&self) -> usize;

    /// Allocate `count` primary command buffers
    fn allocate_command_buffers(&mut self, count: usize) -> VulkanResult<Vec<vk::CommandBuffer>>;

    /// Return command buffers to their pool
    fn free_command_buffers(&mut self, buffers: &[vk::CommandBuffer]);

    /// Wait for the current slot and acquire an image: `(index, suboptimal)`
    fn acquire_next_image(&mut self) -> VulkanResult<(u32, bool)>;

    /// Start recording into `command_buffer`
    fn begin_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Finish recording `command_buffer`
    fn end_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Submit, present and advance the slot; returns whether presentation was suboptimal
    fn submit_command_buffers(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
    ) -> VulkanResult<bool>;

    /// Slot the swap chain will use for the next acquire
    fn current_frame(&self) -> usize;

    /// Current swap chain extent
    fn extent(&self) -> vk::Extent2D;

    /// Formats chosen by the current swap chain
    fn formats(&self) -> SwapChainFormats;

    /// Begin the swap chain render pass on `image_index` and set a viewport
    /// and scissor covering the full extent
    fn begin_render_pass(&mut self, command_buffer: vk::CommandBuffer, image_index: u32);

    /// End the swap chain render pass
    fn end_render_pass(&mut self, command_buffer: vk::CommandBuffer);

    /// Block until the device has drained all submitted work
    fn wait_idle(&mut self) -> VulkanResult<()>;

    /// Replace the swap chain with one sized to `extent`
    fn rebuild_swap_chain(&mut self, extent: vk::Extent2D) -> VulkanResult<()>;

    /// Replace the pipeline so it matches the current swap chain
    fn rebuild_pipeline(&mut self) -> VulkanResult<()>;
}

/// Poll window events until the framebuffer has a nonzero area.
///
/// Blocks for as long as the window stays minimized.
pub fn wait_for_nonzero_extent(window: &mut impl SurfaceWindow) -> vk::Extent2D {
    let mut extent = window.framebuffer_extent();
    while extent.width == 0 || extent.height == 0 {
        window.wait_events();
        extent = window.framebuffer_extent();
    }
    extent
}

/// Per-frame state machine over a [`FrameTarget`]
pub struct FrameRenderer<T: FrameTarget> {
    target: T,
    command_buffers: Vec<vk::CommandBuffer>,
    current_image_index: u32,
    current_frame_index: usize,
    frame_in_progress: bool,
}

impl<T: FrameTarget> FrameRenderer<T> {
    /// Allocate one command buffer per frame slot
    pub fn new(mut target: T) -> VulkanResult<Self> {
        let count = target.max_frames_in_flight();
        let command_buffers = target.allocate_command_buffers(count)?;
        let current_frame_index = target.current_frame();

        log::debug!("Allocated {} frame command buffers", command_buffers.len());

        Ok(Self {
            target,
            command_buffers,
            current_image_index: 0,
            current_frame_index,
            frame_in_progress: false,
        })
    }

    /// Acquire the next image and begin recording.
    ///
    /// Returns `None` when the swap chain had to be rebuilt; the caller skips
    /// drawing this iteration.
    pub fn begin_frame(
        &mut self,
        window: &mut impl SurfaceWindow,
    ) -> VulkanResult<Option<vk::CommandBuffer>> {
        assert!(
            !self.frame_in_progress,
            "Can't call begin_frame while a frame is already in progress"
        );

        let (image_index, suboptimal) = match self.target.acquire_next_image() {
            Ok(acquired) => acquired,
            Err(err) if err.is_out_of_date() => {
                log::debug!("Swap chain out of date on acquire");
                self.recreate_swap_chain(window)?;
                return Ok(None);
            }
            Err(err) => {
                log::error!("Failed to acquire swap chain image: {}", err);
                return Err(err);
            }
        };
        if suboptimal {
            log::trace!("Acquired image {} from a suboptimal swap chain", image_index);
        }

        self.current_image_index = image_index;
        let command_buffer = self.active_command_buffer();
        self.target.begin_command_buffer(command_buffer)?;
        self.frame_in_progress = true;

        Ok(Some(command_buffer))
    }

    /// Finish recording, submit and present.
    ///
    /// A stale or suboptimal present, or a pending window resize, rebuilds
    /// the swap chain instead of advancing the slot.
    pub fn end_frame(&mut self, window: &mut impl SurfaceWindow) -> VulkanResult<()> {
        assert!(
            self.frame_in_progress,
            "Can't call end_frame while frame is not in progress"
        );

        let command_buffer = self.active_command_buffer();
        self.frame_in_progress = false;
        self.target.end_command_buffer(command_buffer)?;

        let stale = match self
            .target
            .submit_command_buffers(command_buffer, self.current_image_index)
        {
            Ok(suboptimal) => suboptimal,
            Err(err) if err.is_out_of_date() => true,
            Err(err) => {
                log::error!("Failed to present swap chain image: {}", err);
                return Err(err);
            }
        };

        if stale || window.was_resized() {
            window.reset_resized_flag();
            return self.recreate_swap_chain(window);
        }

        self.current_frame_index = (self.current_frame_index + 1) % self.command_buffers.len();
        Ok(())
    }

    /// Begin the swap chain render pass on the frame's command buffer
    pub fn begin_swap_chain_render_pass(&mut self, command_buffer: vk::CommandBuffer) {
        assert!(
            self.frame_in_progress,
            "Can't begin render pass when frame is not in progress"
        );
        assert_eq!(
            command_buffer,
            self.active_command_buffer(),
            "Can't begin render pass on a command buffer from a different frame"
        );

        self.target
            .begin_render_pass(command_buffer, self.current_image_index);
    }

    /// End the swap chain render pass on the frame's command buffer
    pub fn end_swap_chain_render_pass(&mut self, command_buffer: vk::CommandBuffer) {
        assert!(
            self.frame_in_progress,
            "Can't end render pass when frame is not in progress"
        );
        assert_eq!(
            command_buffer,
            self.active_command_buffer(),
            "Can't end render pass on a command buffer from a different frame"
        );

        self.target.end_render_pass(command_buffer);
    }

    fn recreate_swap_chain(&mut self, window: &mut impl SurfaceWindow) -> VulkanResult<()> {
        let extent = wait_for_nonzero_extent(window);
        self.target.wait_idle()?;

        let previous = self.target.formats();
        self.target.rebuild_swap_chain(extent)?;
        let current = self.target.formats();
        if previous != current {
            log::error!(
                "Swap chain formats changed during recreation: {:?} -> {:?}",
                previous,
                current
            );
            return Err(VulkanError::SwapChainFormatChanged { previous, current });
        }

        self.target.rebuild_pipeline()?;
        self.current_frame_index = self.target.current_frame();

        log::info!("Recreated swap chain at {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn active_command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffers[self.current_frame_index]
    }

    /// Command buffer of the frame being recorded
    pub fn current_command_buffer(&self) -> vk::CommandBuffer {
        assert!(
            self.frame_in_progress,
            "Cannot get command buffer when frame is not in progress"
        );
        self.active_command_buffer()
    }

    /// Slot index of the current frame
    pub fn frame_index(&self) -> usize {
        self.current_frame_index
    }

    /// Swap chain image targeted by the current frame
    pub fn image_index(&self) -> u32 {
        self.current_image_index
    }

    /// Whether `begin_frame` has been called without a matching `end_frame`
    pub fn is_frame_in_progress(&self) -> bool {
        self.frame_in_progress
    }

    /// Width over height of the swap chain extent
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.target.extent();
        extent.width as f32 / extent.height as f32
    }

    /// The GPU target
    pub fn target(&self) -> &T {
        &self.target
    }
}

impl<T: FrameTarget> Drop for FrameRenderer<T> {
    fn drop(&mut self) {
        // Buffers from earlier frames may still be pending after an error exit
        if let Err(e) = self.target.wait_idle() {
            log::error!("Failed to wait for device idle before freeing command buffers: {}", e);
        }
        let buffers = std::mem::take(&mut self.command_buffers);
        self.target.free_command_buffers(&buffers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::rc::Rc;

    const FORMATS: SwapChainFormats = SwapChainFormats {
        image: vk::Format::B8G8R8A8_SRGB,
        depth: vk::Format::D32_SFLOAT,
    };

    struct FakeTarget {
        frames: usize,
        current_frame: usize,
        extent: vk::Extent2D,
        formats: SwapChainFormats,
        rebuilt_formats: Option<SwapChainFormats>,
        acquire_results: VecDeque<VulkanResult<(u32, bool)>>,
        submit_results: VecDeque<VulkanResult<bool>>,
        acquires: usize,
        calls: Vec<&'static str>,
        rebuilds: Vec<vk::Extent2D>,
        pipeline_rebuilds: usize,
        render_pass_images: Vec<u32>,
        freed: Rc<Cell<usize>>,
        teardown: Rc<RefCell<Vec<&'static str>>>,
    }

    impl FakeTarget {
        fn new(frames: usize) -> Self {
            Self {
                frames,
                current_frame: 0,
                extent: vk::Extent2D { width: 800, height: 600 },
                formats: FORMATS,
                rebuilt_formats: None,
                acquire_results: VecDeque::new(),
                submit_results: VecDeque::new(),
                acquires: 0,
                calls: Vec::new(),
                rebuilds: Vec::new(),
                pipeline_rebuilds: 0,
                render_pass_images: Vec::new(),
                freed: Rc::new(Cell::new(0)),
                teardown: Rc::new(RefCell::new(Vec::new())),
            }
        }
    }

    impl FrameTarget for FakeTarget {
        fn max_frames_in_flight(&self) -> usize {
            self.frames
        }

        fn allocate_command_buffers(
            &mut self,
            count: usize,
        ) -> VulkanResult<Vec<vk::CommandBuffer>> {
            Ok((1..=count as u64).map(vk::CommandBuffer::from_raw).collect())
        }

        fn free_command_buffers(&mut self, buffers: &[vk::CommandBuffer]) {
            self.freed.set(self.freed.get() + buffers.len());
            self.teardown.borrow_mut().push("free_command_buffers");
        }

        fn acquire_next_image(&mut self) -> VulkanResult<(u32, bool)> {
            self.acquires += 1;
            self.calls.push("acquire");
            self.acquire_results.pop_front().unwrap_or(Ok((0, false)))
        }

        fn begin_command_buffer(&mut self, _: vk::CommandBuffer) -> VulkanResult<()> {
            self.calls.push("begin");
            Ok(())
        }

        fn end_command_buffer(&mut self, _: vk::CommandBuffer) -> VulkanResult<()> {
            self.calls.push("end");
            Ok(())
        }

        fn submit_command_buffers(
            &mut self,
            _: vk::CommandBuffer,
            _: u32,
        ) -> VulkanResult<bool> {
            self.calls.push("submit");
            self.current_frame = (self.current_frame + 1) % self.frames;
            self.submit_results.pop_front().unwrap_or(Ok(false))
        }

        fn current_frame(&self) -> usize {
            self.current_frame
        }

        fn extent(&self) -> vk::Extent2D {
            self.extent
        }

        fn formats(&self) -> SwapChainFormats {
            self.formats
        }

        fn begin_render_pass(&mut self, _: vk::CommandBuffer, image_index: u32) {
            self.render_pass_images.push(image_index);
        }

        fn end_render_pass(&mut self, _: vk::CommandBuffer) {}

        fn wait_idle(&mut self) -> VulkanResult<()> {
            self.calls.push("wait_idle");
            self.teardown.borrow_mut().push("wait_idle");
            Ok(())
        }

        fn rebuild_swap_chain(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
            self.calls.push("rebuild_swap_chain");
            self.rebuilds.push(extent);
            self.extent = extent;
            self.current_frame = 0;
            if let Some(formats) = self.rebuilt_formats {
                self.formats = formats;
            }
            Ok(())
        }

        fn rebuild_pipeline(&mut self) -> VulkanResult<()> {
            self.calls.push("rebuild_pipeline");
            self.pipeline_rebuilds += 1;
            Ok(())
        }
    }

    struct FakeWindow {
        extents: RefCell<VecDeque<vk::Extent2D>>,
        queries: Cell<usize>,
        waits: usize,
        resized: bool,
    }

    impl FakeWindow {
        fn new() -> Self {
            Self::with_extents(&[(800, 600)])
        }

        fn with_extents(extents: &[(u32, u32)]) -> Self {
            Self {
                extents: RefCell::new(
                    extents
                        .iter()
                        .map(|&(width, height)| vk::Extent2D { width, height })
                        .collect(),
                ),
                queries: Cell::new(0),
                waits: 0,
                resized: false,
            }
        }
    }

    impl SurfaceWindow for FakeWindow {
        fn framebuffer_extent(&self) -> vk::Extent2D {
            self.queries.set(self.queries.get() + 1);
            let mut extents = self.extents.borrow_mut();
            if extents.len() > 1 {
                extents.pop_front().unwrap()
            } else {
                extents[0]
            }
        }

        fn was_resized(&self) -> bool {
            self.resized
        }

        fn reset_resized_flag(&mut self) {
            self.resized = false;
        }

        fn wait_events(&mut self) {
            self.waits += 1;
        }
    }

    fn out_of_date() -> VulkanError {
        VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR)
    }

    #[test]
    fn test_frame_index_wraps_for_each_slot_count() {
        for frames in 1..=4 {
            let mut renderer = FrameRenderer::new(FakeTarget::new(frames)).unwrap();
            let mut window = FakeWindow::new();

            for frame in 0..frames * 3 {
                assert_eq!(renderer.frame_index(), frame % frames);
                let command_buffer = renderer.begin_frame(&mut window).unwrap().unwrap();
                assert_eq!(command_buffer.as_raw(), (frame % frames) as u64 + 1);
                renderer.end_frame(&mut window).unwrap();
            }
            assert_eq!(renderer.frame_index(), 0);
            assert_eq!(renderer.target().current_frame(), renderer.frame_index());
        }
    }

    #[test]
    fn test_begin_twice_panics_before_acquiring() {
        let mut renderer = FrameRenderer::new(FakeTarget::new(2)).unwrap();
        let mut window = FakeWindow::new();

        assert!(renderer.begin_frame(&mut window).unwrap().is_some());
        let second = catch_unwind(AssertUnwindSafe(|| renderer.begin_frame(&mut window)));

        assert!(second.is_err());
        assert_eq!(renderer.target().acquires, 1);
        assert!(renderer.is_frame_in_progress());
    }

    #[test]
    #[should_panic(expected = "not in progress")]
    fn test_end_without_begin_panics() {
        let mut renderer = FrameRenderer::new(FakeTarget::new(2)).unwrap();
        let mut window = FakeWindow::new();
        let _ = renderer.end_frame(&mut window);
    }

    #[test]
    fn test_out_of_date_acquire_rebuilds_and_skips_frame() {
        let mut target = FakeTarget::new(2);
        target.acquire_results.push_back(Err(out_of_date()));
        let mut renderer = FrameRenderer::new(target).unwrap();
        let mut window = FakeWindow::new();

        assert!(renderer.begin_frame(&mut window).unwrap().is_none());
        assert!(!renderer.is_frame_in_progress());
        assert_eq!(
            renderer.target().calls,
            vec!["acquire", "wait_idle", "rebuild_swap_chain", "rebuild_pipeline"]
        );

        // Next iteration proceeds normally
        assert!(renderer.begin_frame(&mut window).unwrap().is_some());
    }

    #[test]
    fn test_suboptimal_acquire_still_records() {
        let mut target = FakeTarget::new(2);
        target.acquire_results.push_back(Ok((1, true)));
        let mut renderer = FrameRenderer::new(target).unwrap();
        let mut window = FakeWindow::new();

        let command_buffer = renderer.begin_frame(&mut window).unwrap().unwrap();
        assert_eq!(renderer.image_index(), 1);
        assert!(renderer.target().rebuilds.is_empty());

        renderer.begin_swap_chain_render_pass(command_buffer);
        renderer.end_swap_chain_render_pass(command_buffer);
        assert_eq!(renderer.target().render_pass_images, vec![1]);
    }

    #[test]
    fn test_other_acquire_errors_propagate() {
        let mut target = FakeTarget::new(2);
        target
            .acquire_results
            .push_back(Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)));
        let mut renderer = FrameRenderer::new(target).unwrap();
        let mut window = FakeWindow::new();

        assert!(matches!(
            renderer.begin_frame(&mut window),
            Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))
        ));
        assert!(!renderer.is_frame_in_progress());
        assert!(renderer.target().rebuilds.is_empty());
    }

    fn end_frame_recreates(submit: VulkanResult<bool>, resized: bool) {
        let mut target = FakeTarget::new(2);
        target.submit_results.push_back(submit);
        let mut renderer = FrameRenderer::new(target).unwrap();
        let mut window = FakeWindow::with_extents(&[(1024, 768)]);

        renderer.begin_frame(&mut window).unwrap().unwrap();
        window.resized = resized;
        renderer.end_frame(&mut window).unwrap();

        assert!(!renderer.is_frame_in_progress());
        assert!(!window.resized);
        assert_eq!(
            renderer.target().rebuilds,
            vec![vk::Extent2D { width: 1024, height: 768 }]
        );
        assert_eq!(renderer.target().pipeline_rebuilds, 1);
        assert_eq!(renderer.frame_index(), renderer.target().current_frame());
    }

    #[test]
    fn test_out_of_date_present_recreates_once() {
        end_frame_recreates(Err(out_of_date()), false);
    }

    #[test]
    fn test_suboptimal_present_recreates_once() {
        end_frame_recreates(Ok(true), false);
    }

    #[test]
    fn test_pending_resize_recreates_once() {
        end_frame_recreates(Ok(false), true);
    }

    #[test]
    fn test_other_present_errors_propagate() {
        let mut target = FakeTarget::new(2);
        target
            .submit_results
            .push_back(Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)));
        let mut renderer = FrameRenderer::new(target).unwrap();
        let mut window = FakeWindow::new();

        renderer.begin_frame(&mut window).unwrap();
        assert!(renderer.end_frame(&mut window).is_err());
        assert!(!renderer.is_frame_in_progress());
    }

    #[test]
    fn test_format_change_is_fatal() {
        let mut target = FakeTarget::new(2);
        target.acquire_results.push_back(Err(out_of_date()));
        target.rebuilt_formats = Some(SwapChainFormats {
            image: vk::Format::R8G8B8A8_UNORM,
            ..FORMATS
        });
        let mut renderer = FrameRenderer::new(target).unwrap();
        let mut window = FakeWindow::new();

        match renderer.begin_frame(&mut window) {
            Err(VulkanError::SwapChainFormatChanged { previous, current }) => {
                assert_eq!(previous, FORMATS);
                assert_eq!(current.image, vk::Format::R8G8B8A8_UNORM);
            }
            other => panic!("expected format change, got {:?}", other),
        }
        assert_eq!(renderer.target().pipeline_rebuilds, 0);
    }

    #[test]
    fn test_minimized_window_waits_for_extent() {
        let mut target = FakeTarget::new(2);
        target.acquire_results.push_back(Err(out_of_date()));
        let mut renderer = FrameRenderer::new(target).unwrap();
        let mut window = FakeWindow::with_extents(&[(0, 0), (0, 0), (1280, 720)]);

        assert!(renderer.begin_frame(&mut window).unwrap().is_none());
        assert_eq!(window.queries.get(), 3);
        assert_eq!(window.waits, 2);
        assert_eq!(
            renderer.target().rebuilds,
            vec![vk::Extent2D { width: 1280, height: 720 }]
        );
    }

    #[test]
    fn test_zero_height_alone_still_waits() {
        let mut window = FakeWindow::with_extents(&[(640, 0), (640, 480)]);
        let extent = wait_for_nonzero_extent(&mut window);
        assert_eq!(extent, vk::Extent2D { width: 640, height: 480 });
        assert_eq!(window.waits, 1);
    }

    #[test]
    #[should_panic(expected = "different frame")]
    fn test_stale_command_buffer_is_rejected() {
        let mut renderer = FrameRenderer::new(FakeTarget::new(2)).unwrap();
        let mut window = FakeWindow::new();

        renderer.begin_frame(&mut window).unwrap().unwrap();
        renderer.begin_swap_chain_render_pass(vk::CommandBuffer::from_raw(999));
    }

    #[test]
    #[should_panic(expected = "not in progress")]
    fn test_render_pass_outside_frame_panics() {
        let mut renderer = FrameRenderer::new(FakeTarget::new(2)).unwrap();
        renderer.begin_swap_chain_render_pass(vk::CommandBuffer::from_raw(1));
    }

    #[test]
    fn test_drop_frees_command_buffers() {
        let target = FakeTarget::new(3);
        let freed = Rc::clone(&target.freed);
        let renderer = FrameRenderer::new(target).unwrap();
        drop(renderer);
        assert_eq!(freed.get(), 3);
    }

    #[test]
    fn test_drop_drains_device_before_freeing_buffers() {
        let mut target = FakeTarget::new(2);
        target.acquire_results.push_back(Ok((0, false)));
        target
            .acquire_results
            .push_back(Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR)));
        let teardown = Rc::clone(&target.teardown);
        let mut renderer = FrameRenderer::new(target).unwrap();
        let mut window = FakeWindow::new();

        // A frame was submitted, then the next acquire fails fatally
        assert!(renderer.begin_frame(&mut window).unwrap().is_some());
        renderer.end_frame(&mut window).unwrap();
        assert!(renderer.begin_frame(&mut window).is_err());
        drop(renderer);

        assert_eq!(*teardown.borrow(), vec!["wait_idle", "free_command_buffers"]);
    }

    #[test]
    fn test_aspect_ratio_follows_extent() {
        let renderer = FrameRenderer::new(FakeTarget::new(2)).unwrap();
        approx::assert_relative_eq!(renderer.aspect_ratio(), 800.0 / 600.0);
    }
}
