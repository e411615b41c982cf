//! 命令录制与提交的边界

use ash::vk;

use crate::handles::{GfxBufferHandle, GfxSemaphoreHandle, GfxTextureHandle};

/// 便捷创建 buffer memory barrier 的结构体
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxBufferBarrier {
    pub buffer: GfxBufferHandle,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl GfxBufferBarrier {
    pub fn new(buffer: GfxBufferHandle) -> Self {
        Self {
            buffer,
            src_stage: vk::PipelineStageFlags2::NONE,
            src_access: vk::AccessFlags2::NONE,
            dst_stage: vk::PipelineStageFlags2::NONE,
            dst_access: vk::AccessFlags2::NONE,
            offset: 0,
            size: vk::WHOLE_SIZE,
        }
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage: vk::PipelineStageFlags2, src_access: vk::AccessFlags2) -> Self {
        self.src_stage = src_stage;
        self.src_access = src_access;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage: vk::PipelineStageFlags2, dst_access: vk::AccessFlags2) -> Self {
        self.dst_stage = dst_stage;
        self.dst_access = dst_access;
        self
    }

    /// builder
    #[inline]
    pub fn range(mut self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.offset = offset;
        self.size = size;
        self
    }
}

/// 便捷创建 image memory barrier 的结构体
///
/// 作用于整个 texture（所有 mip 与 layer）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxTextureBarrier {
    pub texture: GfxTextureHandle,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub aspect: vk::ImageAspectFlags,
}

impl GfxTextureBarrier {
    pub fn new(texture: GfxTextureHandle) -> Self {
        Self {
            texture,
            src_stage: vk::PipelineStageFlags2::NONE,
            src_access: vk::AccessFlags2::NONE,
            dst_stage: vk::PipelineStageFlags2::NONE,
            dst_access: vk::AccessFlags2::NONE,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::UNDEFINED,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.old_layout = old_layout;
        self.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage: vk::PipelineStageFlags2, src_access: vk::AccessFlags2) -> Self {
        self.src_stage = src_stage;
        self.src_access = src_access;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage: vk::PipelineStageFlags2, dst_access: vk::AccessFlags2) -> Self {
        self.dst_stage = dst_stage;
        self.dst_access = dst_access;
        self
    }

    /// builder
    #[inline]
    pub fn image_aspect_flag(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect;
        self
    }
}

/// 提交时等待或发出的 semaphore
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxSemaphoreSubmit {
    pub semaphore: GfxSemaphoreHandle,
    pub stage: vk::PipelineStageFlags2,
    /// Timeline semaphore 的值（binary semaphore 为 None）
    pub value: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GfxClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

/// dynamic rendering 的单个 attachment
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GfxRenderingAttachment {
    pub texture: GfxTextureHandle,
    pub layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: Option<GfxClearValue>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GfxRenderingInfo {
    pub render_area: vk::Extent2D,
    pub color_attachments: Vec<GfxRenderingAttachment>,
    pub depth_attachment: Option<GfxRenderingAttachment>,
}

/// 命令录制接口
///
/// RenderGraph 只会通过这里录制 barrier、debug label 与 rendering 范围，
/// 具体的绘制命令由 pass 回调自行录制。
pub trait GfxCommandRecorder {
    fn pipeline_barrier(&mut self, buffer_barriers: &[GfxBufferBarrier], texture_barriers: &[GfxTextureBarrier]);

    fn begin_label(&mut self, name: &str);

    fn end_label(&mut self);

    fn begin_rendering(&mut self, info: &GfxRenderingInfo);

    fn end_rendering(&mut self);

    /// 整张 texture 的 blit，src 需要处于 TRANSFER_SRC，dst 处于 TRANSFER_DST
    fn blit_texture(&mut self, src: GfxTextureHandle, dst: GfxTextureHandle, filter: vk::Filter);
}

/// 单个 graphics/compute queue
pub trait GfxQueue {
    type CommandBuffer: GfxCommandRecorder;

    fn allocate_command_buffer(&mut self, name: &str) -> anyhow::Result<Self::CommandBuffer>;

    fn submit(
        &mut self,
        command_buffers: Vec<Self::CommandBuffer>,
        wait_semaphores: &[GfxSemaphoreSubmit],
        signal_semaphores: &[GfxSemaphoreSubmit],
    ) -> anyhow::Result<()>;
}
