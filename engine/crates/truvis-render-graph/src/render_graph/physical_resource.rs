//! 物理资源
//!
//! 一个物理资源对应一次真实的分配。描述中的 usage 由本帧所有使用累积得到，
//! 直到 `RgBuilder::build` 才真正创建。

use ash::vk;
use truvis_render_interface::gfx_device::{GfxBufferDesc, GfxTextureDesc};
use truvis_render_interface::handles::{GfxBufferHandle, GfxTextureHandle};

use super::resource_state::{RgBufferState, RgTextureState};

/// 物理资源的来源，决定帧末如何处理
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgResourceKind {
    /// 只在本帧存在，帧末延迟销毁
    Transient,
    /// 跨帧保留的历史资源，帧末轮换 layer
    Temporal,
    /// 外部导入，graph 不负责创建和销毁，帧末解绑
    Imported,
}

/// 物理 buffer
#[derive(Debug)]
pub struct RgPhysicalBuffer {
    pub name: String,
    pub desc: GfxBufferDesc,
    pub handle: Option<GfxBufferHandle>,
    /// 上一次使用结束后的状态
    pub state: RgBufferState,
    pub kind: RgResourceKind,

    /// 本帧累积的 usage
    pub(crate) required_usage: vk::BufferUsageFlags,
    /// 本帧是否有 pass 使用
    pub(crate) used: bool,
}

impl RgPhysicalBuffer {
    pub fn new(name: impl Into<String>, desc: GfxBufferDesc, kind: RgResourceKind) -> Self {
        Self {
            name: name.into(),
            desc,
            handle: None,
            state: RgBufferState::UNDEFINED,
            kind,
            required_usage: vk::BufferUsageFlags::empty(),
            used: false,
        }
    }

    pub fn imported(
        name: impl Into<String>,
        handle: GfxBufferHandle,
        desc: GfxBufferDesc,
        state: RgBufferState,
    ) -> Self {
        Self {
            handle: Some(handle),
            state,
            ..Self::new(name, desc, RgResourceKind::Imported)
        }
    }

    /// 记录一次使用
    #[inline]
    pub(crate) fn add_use(&mut self, state: RgBufferState) {
        self.required_usage |= state.usage_flags();
        self.used = true;
    }

    #[inline]
    pub(crate) fn reset_frame_usage(&mut self) {
        self.required_usage = vk::BufferUsageFlags::empty();
        self.used = false;
    }

    /// 已有的分配是否满足本帧的 usage
    #[inline]
    pub fn satisfies_usage(&self) -> bool {
        self.desc.usage.contains(self.required_usage)
    }
}

/// 物理 texture
#[derive(Debug)]
pub struct RgPhysicalTexture {
    pub name: String,
    pub desc: GfxTextureDesc,
    pub handle: Option<GfxTextureHandle>,
    /// 上一次使用结束后的状态
    pub state: RgTextureState,
    pub kind: RgResourceKind,

    pub(crate) required_usage: vk::ImageUsageFlags,
    pub(crate) used: bool,
}

impl RgPhysicalTexture {
    pub fn new(name: impl Into<String>, desc: GfxTextureDesc, kind: RgResourceKind) -> Self {
        Self {
            name: name.into(),
            desc,
            handle: None,
            state: RgTextureState::UNDEFINED,
            kind,
            required_usage: vk::ImageUsageFlags::empty(),
            used: false,
        }
    }

    pub fn imported(
        name: impl Into<String>,
        handle: GfxTextureHandle,
        desc: GfxTextureDesc,
        state: RgTextureState,
    ) -> Self {
        Self {
            handle: Some(handle),
            state,
            ..Self::new(name, desc, RgResourceKind::Imported)
        }
    }

    #[inline]
    pub(crate) fn add_use(&mut self, state: RgTextureState) {
        self.required_usage |= state.usage_flags();
        self.used = true;
    }

    #[inline]
    pub(crate) fn reset_frame_usage(&mut self) {
        self.required_usage = vk::ImageUsageFlags::empty();
        self.used = false;
    }

    #[inline]
    pub fn satisfies_usage(&self) -> bool {
        self.desc.usage.contains(self.required_usage)
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.desc.infer_aspect()
    }
}

/// 同名 temporal 资源的所有 layer
///
/// `layers[0]` 是本帧的结果，`layers[k]` 是 k 帧之前的结果。
#[derive(Debug, Clone)]
pub struct RgTemporalGroup<P> {
    pub layers: Vec<P>,
    /// 本帧是否被声明
    pub(crate) declared: bool,
}

impl<P: Copy> RgTemporalGroup<P> {
    pub fn new(layers: Vec<P>) -> Self {
        Self { layers, declared: true }
    }

    /// 本帧的 layer 0 成为下一帧的 layer 1，最旧的 layer 被回收为下一帧的 layer 0
    #[inline]
    pub fn rotate(&mut self) {
        self.layers.rotate_right(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporal_rotate() {
        let mut group = RgTemporalGroup::new(vec!['a', 'b', 'c']);
        group.rotate();
        assert_eq!(group.layers, vec!['c', 'a', 'b']);
    }

    #[test]
    fn test_usage_accumulation() {
        let desc = GfxTextureDesc::new_2d(16, 16, vk::Format::R16G16B16A16_SFLOAT);
        let mut texture = RgPhysicalTexture::new("hdr", desc, RgResourceKind::Transient);

        texture.add_use(RgTextureState::COLOR_ATTACHMENT_WRITE);
        texture.add_use(RgTextureState::SHADER_READ_COMPUTE);

        assert!(texture.used);
        assert_eq!(texture.required_usage, vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED);
        assert!(!texture.satisfies_usage());
    }
}
