//! RenderGraph 与 GPU 之间的边界
//!
//! - `GfxDevice`: 资源分配与延迟销毁
//! - `GfxQueue` / `GfxCommandRecorder`: 命令录制与提交
//! - `GfxSwapchain`: acquire / present
//! - `headless`: 只做簿记的实现，测试和演示程序使用

pub mod frame_counter;
pub mod gfx_commands;
pub mod gfx_device;
pub mod gfx_swapchain;
pub mod handles;
pub mod headless;
