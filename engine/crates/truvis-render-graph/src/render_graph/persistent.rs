use truvis_render_interface::frame_counter::FrameCounter;
use truvis_render_interface::gfx_device::GfxDevice;

use super::builder::RgBuilder;
use super::resource_registry::RgResourceRegistry;
use super::settings::RgSettings;

/// 跨帧存在的 RenderGraph 状态
///
/// 每帧通过 `builder()` 重新声明 pass，物理资源（尤其是 temporal 资源）保存在这里。
pub struct RenderGraph {
    pub(crate) registry: RgResourceRegistry,
    pub(crate) settings: RgSettings,
    pub(crate) frame_counter: FrameCounter,
}

// new & init
impl RenderGraph {
    pub fn new(settings: RgSettings) -> Self {
        let frame_counter = FrameCounter::new(0, settings.frames_in_flight);
        log::info!(
            "RenderGraph: created, frames in flight {}, max temporal layers {}",
            settings.frames_in_flight,
            settings.max_temporal_layers
        );

        Self {
            registry: RgResourceRegistry::new(),
            settings,
            frame_counter,
        }
    }

    /// 开始声明新的一帧
    ///
    /// 上一次声明的帧如果没有执行（build 失败，或者编译结果被直接丢弃），先放弃它留下的资源。
    pub fn builder(&mut self) -> RgBuilder<'_> {
        if self.registry.is_frame_open() {
            log::warn!("RenderGraph: {} was not executed, abandoning it", self.frame_counter.frame_name());
            self.registry.abandon_frame();
        }
        RgBuilder::new(self)
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new(RgSettings::default())
    }
}

// destroy
impl RenderGraph {
    /// 销毁所有物理资源
    pub fn destroy(&mut self, device: &mut dyn GfxDevice) {
        self.registry.destroy(device, self.frame_counter.frame_id());
    }
}

// getters
impl RenderGraph {
    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    #[inline]
    pub fn registry(&self) -> &RgResourceRegistry {
        &self.registry
    }

    #[inline]
    pub fn settings(&self) -> &RgSettings {
        &self.settings
    }
}
