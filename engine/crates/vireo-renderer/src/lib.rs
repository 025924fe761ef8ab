//! Vireo renderer
//!
//! - [`swapchain_coordinator::SwapchainCoordinator`]：swapchain 的状态机，负责 resize 之后的重建
//! - [`frame_scheduler::FrameScheduler`]：N 个 in-flight 帧的环形队列，fence 等待是 CPU 的背压
//! - [`renderer::Renderer`]：把 scene pass 和 UI overlay 录制到同一个 command buffer

pub mod camera;
pub mod config;
pub mod frame_scheduler;
pub mod renderer;
pub mod scene_pass;
pub mod swapchain_coordinator;
