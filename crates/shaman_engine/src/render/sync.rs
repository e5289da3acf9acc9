//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! RAII wrappers for semaphores and fences, the per-slot [`FrameSync`] bundle
//! and the image-in-flight bookkeeping that keeps a new frame from rendering
//! into a swap chain image an older frame still owns.

use ash::{vk, Device};

use crate::render::error::{VulkanError, VulkanResult};

/// Semaphore wrapper with RAII cleanup
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let create_info = vk::FenceCreateInfo::builder().flags(fence_create_flags(signaled));

        let fence = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Block until the fence is signaled or `timeout` nanoseconds pass
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout)
                .map_err(VulkanError::Api)
        }
    }

    /// Reset fence
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Creation flags for a fence
pub(crate) fn fence_create_flags(signaled: bool) -> vk::FenceCreateFlags {
    if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    }
}

/// Synchronization objects owned by one frame slot
pub struct FrameSync {
    /// Signaled by the presentation engine when the acquired image is ready
    pub image_available: Semaphore,
    /// Signaled by the graphics queue when the slot's commands finish
    pub render_finished: Semaphore,
    /// Host-visible completion of the slot's last submission
    pub in_flight: Fence,
}

impl FrameSync {
    /// Whether slot fences start signaled. The first acquire on each slot
    /// waits on its fence before any submission could have signaled it.
    pub const FENCE_STARTS_SIGNALED: bool = true;

    /// Create frame synchronization objects
    pub fn new(device: Device) -> VulkanResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, Self::FENCE_STARTS_SIGNALED)?;

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }
}

/// Maps each swap chain image to the slot fence of the frame that last
/// rendered into it.
///
/// With M images and N slots the image index returned by acquire drifts
/// away from the slot index, so the slot fence alone does not prove the
/// image is free.
#[derive(Debug, Clone)]
pub struct ImageFenceTracker {
    images_in_flight: Vec<vk::Fence>,
}

impl ImageFenceTracker {
    /// Start with every image unowned
    pub fn new(image_count: usize) -> Self {
        Self {
            images_in_flight: vec![vk::Fence::null(); image_count],
        }
    }

    /// Hand `image_index` to the frame guarded by `slot_fence`.
    ///
    /// Returns the fence of the previous owner, which the caller must wait
    /// on before submitting.
    pub fn claim(&mut self, image_index: usize, slot_fence: vk::Fence) -> Option<vk::Fence> {
        let previous = std::mem::replace(&mut self.images_in_flight[image_index], slot_fence);
        (previous != vk::Fence::null()).then_some(previous)
    }

    /// Fence currently recorded for `image_index`
    pub fn owner(&self, image_index: usize) -> Option<vk::Fence> {
        self.images_in_flight
            .get(image_index)
            .copied()
            .filter(|fence| *fence != vk::Fence::null())
    }

    /// Number of tracked images
    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }
}

/// Single-image color barrier covering the whole first mip and layer
pub fn image_barrier(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access_mask: vk::AccessFlags,
    dst_access_mask: vk::AccessFlags,
) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(src_access_mask)
        .dst_access_mask(dst_access_mask)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn fence(raw: u64) -> vk::Fence {
        vk::Fence::from_raw(raw)
    }

    #[test]
    fn test_slot_fences_start_signaled() {
        assert!(fence_create_flags(FrameSync::FENCE_STARTS_SIGNALED)
            .contains(vk::FenceCreateFlags::SIGNALED));
        assert!(fence_create_flags(false).is_empty());
    }

    #[test]
    fn test_tracker_starts_unowned() {
        let tracker = ImageFenceTracker::new(3);
        assert_eq!(tracker.image_count(), 3);
        for image in 0..3 {
            assert_eq!(tracker.owner(image), None);
        }
    }

    #[test]
    fn test_first_claim_needs_no_wait() {
        let mut tracker = ImageFenceTracker::new(3);
        assert_eq!(tracker.claim(1, fence(10)), None);
        assert_eq!(tracker.owner(1), Some(fence(10)));
    }

    #[test]
    fn test_more_images_than_slots() {
        // Two slots (fences 10, 20), three images acquired out of order.
        let mut tracker = ImageFenceTracker::new(3);
        assert_eq!(tracker.claim(0, fence(10)), None);
        assert_eq!(tracker.claim(1, fence(20)), None);
        assert_eq!(tracker.claim(2, fence(10)), None);

        // Image 0 comes back while slot 1 is active: the frame must wait on
        // slot 0's fence even though its own slot fence is different.
        assert_eq!(tracker.claim(0, fence(20)), Some(fence(10)));
        assert_eq!(tracker.owner(0), Some(fence(20)));

        // Image 2 is handed back to the slot that already owns it.
        assert_eq!(tracker.claim(2, fence(10)), Some(fence(10)));
    }

    #[test]
    fn test_image_barrier_fields() {
        let image = vk::Image::from_raw(7);
        let barrier = image_barrier(
            image,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::SHADER_WRITE,
            vk::AccessFlags::TRANSFER_READ,
        );

        assert_eq!(barrier.image, image);
        assert_eq!(barrier.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);
    }
}
