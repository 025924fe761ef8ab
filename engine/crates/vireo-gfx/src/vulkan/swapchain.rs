use ash::vk;
use itertools::Itertools;

use crate::error::{GfxError, GfxResult};
use crate::types::{AcquireStatus, PresentStatus, SwapchainDesc, SwapchainInfo};

/// window surface 以及对应的 instance 函数指针
pub struct VulkanSurface {
    loader: ash::khr::surface::Instance,
    pub(crate) handle: vk::SurfaceKHR,
}

// new & init
impl VulkanSurface {
    pub fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        display: raw_window_handle::RawDisplayHandle,
        window: raw_window_handle::RawWindowHandle,
    ) -> GfxResult<Self> {
        let loader = ash::khr::surface::Instance::new(entry, instance);
        let handle = unsafe { ash_window::create_surface(entry, instance, display, window, None) }.map_err(|e| {
            GfxError::DeviceInit {
                reason: format!("failed to create window surface: {e:?}"),
            }
        })?;
        Ok(Self { loader, handle })
    }
}
// getters
impl VulkanSurface {
    #[inline]
    pub fn supports_present(&self, pdevice: vk::PhysicalDevice, family: u32) -> GfxResult<bool> {
        Ok(unsafe { self.loader.get_physical_device_surface_support(pdevice, family, self.handle) }?)
    }

    #[inline]
    pub fn capabilities(&self, pdevice: vk::PhysicalDevice) -> GfxResult<vk::SurfaceCapabilitiesKHR> {
        Ok(unsafe { self.loader.get_physical_device_surface_capabilities(pdevice, self.handle) }?)
    }
}
// destroy
impl VulkanSurface {
    pub fn destroy(self) {
        log::info!("destroying surface");
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}

pub struct VulkanSwapchain {
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    info: SwapchainInfo,
}

// new & init
impl VulkanSwapchain {
    pub fn new(
        device: &ash::Device,
        loader: &ash::khr::swapchain::Device,
        surface: &VulkanSurface,
        pdevice: vk::PhysicalDevice,
        desc: &SwapchainDesc,
    ) -> GfxResult<Self> {
        let surface_capabilities = surface.capabilities(pdevice)?;
        let extent = Self::calculate_swapchain_extent(&surface_capabilities, desc.extent);
        log::info!(
            "create swapchain:
            surface current extent: {}x{}, min extent: {}x{}, max extent: {}x{}
            window physical extent: {}x{}
            final swapchain extent: {}x{}",
            surface_capabilities.current_extent.width,
            surface_capabilities.current_extent.height,
            surface_capabilities.min_image_extent.width,
            surface_capabilities.min_image_extent.height,
            surface_capabilities.max_image_extent.width,
            surface_capabilities.max_image_extent.height,
            desc.extent.width,
            desc.extent.height,
            extent.width,
            extent.height
        );
        // 最小化时 surface 尺寸为 0，无法创建
        if extent.width == 0 || extent.height == 0 {
            return Err(GfxError::SwapchainOutOfDate);
        }

        let surface_format = Self::choose_surface_format(surface, pdevice)?;
        let present_mode = Self::choose_present_mode(surface, pdevice, desc.present_mode.to_vk())?;

        // max_image_count == 0，表示不限制 image 数量
        let image_count = if surface_capabilities.max_image_count == 0 {
            surface_capabilities.min_image_count + 1
        } else {
            u32::min(surface_capabilities.max_image_count, surface_capabilities.min_image_count + 1)
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(surface_capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true);

        let handle = unsafe { loader.create_swapchain(&create_info, None) }?;
        let images = unsafe { loader.get_swapchain_images(handle) }?;
        let views: Vec<vk::ImageView> = images
            .iter()
            .map(|image| {
                let view_ci = vk::ImageViewCreateInfo::default()
                    .image(*image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .level_count(1)
                            .layer_count(1),
                    );
                unsafe { device.create_image_view(&view_ci, None) }
            })
            .try_collect()?;

        let info = SwapchainInfo {
            extent,
            format: surface_format.format,
            image_count: images.len() as u32,
        };
        log::info!("swapchain created: {:?}, present mode {:?}", info, present_mode);

        Ok(Self {
            handle,
            images,
            views,
            info,
        })
    }

    fn choose_surface_format(surface: &VulkanSurface, pdevice: vk::PhysicalDevice) -> GfxResult<vk::SurfaceFormatKHR> {
        let formats = unsafe { surface.loader.get_physical_device_surface_formats(pdevice, surface.handle) }?;
        formats
            .iter()
            .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| formats.first())
            .copied()
            .ok_or_else(|| GfxError::InvalidState("surface reports no format".to_string()))
    }

    /// 请求的 present mode 不受支持时退回 FIFO（规范保证一定支持）
    fn choose_present_mode(
        surface: &VulkanSurface,
        pdevice: vk::PhysicalDevice,
        requested: vk::PresentModeKHR,
    ) -> GfxResult<vk::PresentModeKHR> {
        let modes = unsafe { surface.loader.get_physical_device_surface_present_modes(pdevice, surface.handle) }?;
        if modes.contains(&requested) {
            Ok(requested)
        } else {
            log::warn!("present mode {:?} is not supported, fallback to FIFO", requested);
            Ok(vk::PresentModeKHR::FIFO)
        }
    }
}
// getters
impl VulkanSwapchain {
    #[inline]
    pub fn info(&self) -> SwapchainInfo {
        self.info
    }

    #[inline]
    pub fn image(&self, index: u32) -> Option<(vk::Image, vk::ImageView)> {
        let index = index as usize;
        Some((*self.images.get(index)?, *self.views.get(index)?))
    }
}
// tools
impl VulkanSwapchain {
    /// 确定 window 的 extent 尺寸
    ///
    /// 如果 surface_capabilities.current_extent 包含特殊值 0xFFFFFFFF，则表示可以自己设置交换链的 extent
    pub fn calculate_swapchain_extent(
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        window_physical_extent: vk::Extent2D,
    ) -> vk::Extent2D {
        let surface_extent = surface_capabilities.current_extent;
        if surface_extent.width == 0xFFFFFFFF || surface_extent.height == 0xFFFFFFFF {
            let width = window_physical_extent
                .width
                .clamp(surface_capabilities.min_image_extent.width, surface_capabilities.max_image_extent.width);
            let height = window_physical_extent
                .height
                .clamp(surface_capabilities.min_image_extent.height, surface_capabilities.max_image_extent.height);
            vk::Extent2D { width, height }
        } else {
            surface_extent
        }
    }
}
// update
impl VulkanSwapchain {
    /// timeout: nano seconds
    pub fn acquire_next_image(
        &self,
        loader: &ash::khr::swapchain::Device,
        semaphore: vk::Semaphore,
        timeout: u64,
    ) -> GfxResult<AcquireStatus> {
        let result = unsafe { loader.acquire_next_image(self.handle, timeout, semaphore, vk::Fence::null()) };
        match result {
            Ok((image_index, suboptimal)) => {
                if suboptimal {
                    log::warn!("swapchain acquire image index {} is not optimal", image_index);
                }
                Ok(AcquireStatus::Acquired {
                    image_index,
                    suboptimal,
                })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when acquire next image");
                Ok(AcquireStatus::OutOfDate)
            }
            Err(e) => Err(GfxError::from(e)),
        }
    }

    pub fn present_image(
        &self,
        loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> GfxResult<PresentStatus> {
        let wait_semaphores = [wait_semaphore];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .image_indices(&image_indices)
            .swapchains(std::slice::from_ref(&self.handle));

        match unsafe { loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => {
                log::warn!("swapchain present image index {} is not optimal", image_index);
                Ok(PresentStatus::Suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when present image");
                Ok(PresentStatus::OutOfDate)
            }
            Err(e) => Err(GfxError::from(e)),
        }
    }
}
// destroy
impl VulkanSwapchain {
    pub fn destroy(self, device: &ash::Device, loader: &ash::khr::swapchain::Device) {
        log::info!("destroying swapchain");
        unsafe {
            for view in &self.views {
                device.destroy_image_view(*view, None);
            }
            loader.destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_swapchain_extent() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 0xFFFFFFFF,
                height: 0xFFFFFFFF,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let extent = VulkanSwapchain::calculate_swapchain_extent(
            &caps,
            vk::Extent2D {
                width: 4000,
                height: 600,
            },
        );
        assert_eq!(extent, vk::Extent2D { width: 1920, height: 600 });

        let fixed = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 800, height: 600 },
            ..caps
        };
        let extent = VulkanSwapchain::calculate_swapchain_extent(&fixed, vk::Extent2D { width: 1, height: 1 });
        assert_eq!(extent, vk::Extent2D { width: 800, height: 600 });
    }
}
