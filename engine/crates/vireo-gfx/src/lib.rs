//! Vireo GFX 层
//!
//! - [`device_context::DeviceContext`]：显式的设备上下文，持有一个 [`backend::GfxBackend`]
//! - [`vulkan::VulkanBackend`]：基于 ash + vk-mem 的实现
//! - [`headless::HeadlessBackend`]：软件模拟的设备，用于测试与无窗口运行

pub mod adapter;
pub mod backend;
pub mod commands;
pub mod device_context;
pub mod error;
pub mod handles;
pub mod headless;
pub mod shader;
pub mod types;
pub mod vulkan;

pub use ash::vk;
pub use error::{GfxError, GfxResult};
