use ash::vk;

use super::resource_handle::RgSemaphoreId;

/// pass 声明的 semaphore 等待或信号
///
/// 只在 batch 边界生效：等待挂在 batch 的第一个 pass 上，信号挂在最后一个 pass 上。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgSemaphoreInfo {
    pub semaphore: RgSemaphoreId,
    /// 等待或信号所在的 pipeline stage
    pub stage: vk::PipelineStageFlags2,
    /// Timeline semaphore 的值（binary semaphore 为 None）
    pub value: Option<u64>,
}

impl RgSemaphoreInfo {
    #[inline]
    pub fn binary(semaphore: RgSemaphoreId, stage: vk::PipelineStageFlags2) -> Self {
        Self {
            semaphore,
            stage,
            value: None,
        }
    }

    #[inline]
    pub fn timeline(semaphore: RgSemaphoreId, stage: vk::PipelineStageFlags2, value: u64) -> Self {
        Self {
            semaphore,
            stage,
            value: Some(value),
        }
    }
}
