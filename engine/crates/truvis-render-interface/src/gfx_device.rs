//! 设备侧资源分配的边界
//!
//! RenderGraph 不直接分配 GPU 内存，而是通过 `GfxDevice` 创建与销毁资源。
//! 销毁是延迟的：实现方需要记录提交销毁时的帧序号，等 GPU 不再使用后再真正释放。

use ash::vk;

use crate::handles::{GfxBufferHandle, GfxTextureHandle};

/// Buffer 所在的内存堆
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GfxBufferHeap {
    /// GPU 专用内存
    #[default]
    DeviceLocal,
    /// CPU 可写，GPU 可读
    Upload,
    /// GPU 写入，CPU 回读
    Readback,
}

/// Buffer 创建参数
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxBufferDesc {
    pub heap: GfxBufferHeap,
    pub size: vk::DeviceSize,
    pub alignment: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

impl GfxBufferDesc {
    #[inline]
    pub fn new(heap: GfxBufferHeap, size: vk::DeviceSize, alignment: vk::DeviceSize) -> Self {
        Self {
            heap,
            size,
            alignment,
            usage: vk::BufferUsageFlags::empty(),
        }
    }
}

/// Texture 创建参数
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxTextureDesc {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
}

impl GfxTextureDesc {
    /// 创建 2D 纹理描述，单个 mip、单个 layer
    #[inline]
    pub fn new_2d(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D { width, height, depth: 1 },
            mip_levels: 1,
            array_layers: 1,
            usage: vk::ImageUsageFlags::empty(),
        }
    }

    #[inline]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[inline]
    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    #[inline]
    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    /// 不考虑 usage 时描述是否一致（usage 由 RenderGraph 累积得到）
    #[inline]
    pub fn same_shape(&self, other: &Self) -> bool {
        Self { usage: other.usage, ..*self } == *other
    }

    /// 根据 format 推断 aspect
    pub fn infer_aspect(&self) -> vk::ImageAspectFlags {
        match self.format {
            vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
                vk::ImageAspectFlags::DEPTH
            }

            vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,

            vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }

            _ => vk::ImageAspectFlags::COLOR,
        }
    }
}

/// pass 回调中查询 buffer 得到的视图
#[derive(Clone, Copy, Debug)]
pub struct GfxBufferView {
    pub handle: GfxBufferHandle,
    pub device_address: vk::DeviceAddress,
    pub size: vk::DeviceSize,
}

/// pass 回调中查询 texture 得到的视图
#[derive(Clone, Copy, Debug)]
pub struct GfxTextureView {
    pub handle: GfxTextureHandle,
    pub desc: GfxTextureDesc,
}

/// 资源分配器
pub trait GfxDevice {
    fn create_buffer(&mut self, desc: &GfxBufferDesc, name: &str) -> anyhow::Result<GfxBufferHandle>;

    fn create_texture(&mut self, desc: &GfxTextureDesc, name: &str) -> anyhow::Result<GfxTextureHandle>;

    /// 延迟销毁：`frame_id` 是最后一次使用该资源的帧
    fn destroy_buffer(&mut self, handle: GfxBufferHandle, frame_id: u64);

    /// 延迟销毁：`frame_id` 是最后一次使用该资源的帧
    fn destroy_texture(&mut self, handle: GfxTextureHandle, frame_id: u64);

    fn get_buffer_view(&self, handle: GfxBufferHandle) -> Option<GfxBufferView>;

    fn get_texture_view(&self, handle: GfxTextureHandle) -> Option<GfxTextureView>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_aspect() {
        let color = GfxTextureDesc::new_2d(4, 4, vk::Format::R16G16B16A16_SFLOAT);
        let depth = GfxTextureDesc::new_2d(4, 4, vk::Format::D32_SFLOAT_S8_UINT);

        assert_eq!(color.infer_aspect(), vk::ImageAspectFlags::COLOR);
        assert_eq!(depth.infer_aspect(), vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL);
    }

    #[test]
    fn test_same_shape_ignores_usage() {
        let a = GfxTextureDesc::new_2d(8, 8, vk::Format::R8G8B8A8_UNORM);
        let b = a.with_usage(vk::ImageUsageFlags::SAMPLED);

        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&a.with_mip_levels(2)));
    }
}
