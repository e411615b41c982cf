use ash::vk;

use crate::handles::{GfxSemaphoreHandle, GfxTextureHandle};

/// swapchain 的边界
///
/// 当前帧的 acquire/present semaphore 由 swapchain 自己管理，RenderGraph 只负责把它们接入 batch。
pub trait GfxSwapchain {
    /// 获取下一张 swapchain image，`acquire_semaphore` 在 image 可用时被 signal
    fn acquire_texture(&mut self, acquire_semaphore: GfxSemaphoreHandle) -> anyhow::Result<GfxTextureHandle>;

    /// 等待 `present_semaphore` 后呈现上一次 acquire 的 image
    fn present(&mut self, present_semaphore: GfxSemaphoreHandle) -> anyhow::Result<()>;

    fn extent(&self) -> vk::Extent2D;

    fn format(&self) -> vk::Format;

    fn usage(&self) -> vk::ImageUsageFlags;

    fn acquire_semaphore(&self) -> GfxSemaphoreHandle;

    fn present_semaphore(&self) -> GfxSemaphoreHandle;
}
