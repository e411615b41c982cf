//! Barrier 自动计算
//!
//! 按调度顺序模拟每个物理资源的状态，在每个 pass 之前生成最少的 barrier：
//! - layout 改变时总是生成 image barrier
//! - 写入前等待上一次写入（WAW）或之后的所有读取（WAR）
//! - 写入之后的第一次读取生成 barrier，之后的读取合并进这个 barrier，不会再生成新的

use ash::vk;
use slotmap::SecondaryMap;
use truvis_render_interface::gfx_commands::{GfxBufferBarrier, GfxTextureBarrier};
use truvis_render_interface::handles::{GfxBufferHandle, GfxTextureHandle};

use super::resource_handle::{RgPhysicalBufferId, RgPhysicalTextureId};
use super::resource_registry::RgResourceRegistry;
use super::resource_state::{RgBufferState, RgTextureState};

/// 图像 Barrier 描述
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgTextureBarrierDesc {
    pub texture: RgPhysicalTextureId,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    /// 图像 aspect（COLOR / DEPTH / STENCIL）
    pub aspect: vk::ImageAspectFlags,
}

impl RgTextureBarrierDesc {
    #[inline]
    pub fn is_layout_transition(&self) -> bool {
        self.old_layout != self.new_layout
    }

    /// 转换为 GfxTextureBarrier
    pub fn to_gfx_barrier(&self, texture: GfxTextureHandle) -> GfxTextureBarrier {
        GfxTextureBarrier::new(texture)
            .layout_transfer(self.old_layout, self.new_layout)
            .src_mask(self.src_stage, self.src_access)
            .dst_mask(self.dst_stage, self.dst_access)
            .image_aspect_flag(self.aspect)
    }
}

/// 缓冲区 Barrier 描述
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgBufferBarrierDesc {
    pub buffer: RgPhysicalBufferId,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl RgBufferBarrierDesc {
    /// 转换为 GfxBufferBarrier
    pub fn to_gfx_barrier(&self, buffer: GfxBufferHandle) -> GfxBufferBarrier {
        GfxBufferBarrier::new(buffer)
            .src_mask(self.src_stage, self.src_access)
            .dst_mask(self.dst_stage, self.dst_access)
    }
}

/// Pass 执行前需要的 Barrier 集合
#[derive(Clone, Debug, Default)]
pub struct RgPassBarriers {
    pub texture_barriers: Vec<RgTextureBarrierDesc>,
    pub buffer_barriers: Vec<RgBufferBarrierDesc>,
}

impl RgPassBarriers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 检查是否有 barrier
    #[inline]
    pub fn has_barriers(&self) -> bool {
        !self.texture_barriers.is_empty() || !self.buffer_barriers.is_empty()
    }

    #[inline]
    pub fn texture_barrier_count(&self) -> usize {
        self.texture_barriers.len()
    }

    #[inline]
    pub fn buffer_barrier_count(&self) -> usize {
        self.buffer_barriers.len()
    }
}

/// 单个 pass 中已经解析到物理资源的使用，按声明顺序
#[derive(Clone, Debug, Default)]
pub struct RgPassUses {
    pub buffer_reads: Vec<(RgPhysicalBufferId, RgBufferState)>,
    pub buffer_writes: Vec<(RgPhysicalBufferId, RgBufferState)>,
    pub texture_reads: Vec<(RgPhysicalTextureId, RgTextureState)>,
    pub texture_writes: Vec<(RgPhysicalTextureId, RgTextureState)>,
}

/// 单个物理资源的同步状态
#[derive(Clone, Copy, Debug, Default)]
struct SyncState {
    /// 最后一次写入 (stage, write access)
    last_write: Option<(vk::PipelineStageFlags2, vk::AccessFlags2)>,
    /// 最后一次写入之后所有读取的 stage
    read_stages: vk::PipelineStageFlags2,
    /// 让最后一次写入对读取可见的 barrier：(pass 下标, barrier 下标)
    read_barrier: Option<(usize, usize)>,
}

impl SyncState {
    fn from_state(stage: vk::PipelineStageFlags2, write_access: vk::AccessFlags2) -> Self {
        if stage == vk::PipelineStageFlags2::NONE {
            Self::default()
        } else if !write_access.is_empty() {
            Self {
                last_write: Some((stage, write_access)),
                ..Default::default()
            }
        } else {
            Self {
                read_stages: stage,
                ..Default::default()
            }
        }
    }

    /// 写入（或 layout 转换）之前需要等待的 (stage, access)
    ///
    /// 之前有读取时等待读取（只需要执行依赖），否则等待上一次写入。
    fn take_source(&mut self) -> Option<(vk::PipelineStageFlags2, vk::AccessFlags2)> {
        if !self.read_stages.is_empty() {
            let stages = std::mem::replace(&mut self.read_stages, vk::PipelineStageFlags2::NONE);
            self.read_barrier = None;
            Some((stages, vk::AccessFlags2::NONE))
        } else {
            self.last_write
        }
    }

    fn record_write(&mut self, stage: vk::PipelineStageFlags2, write_access: vk::AccessFlags2) {
        self.last_write = Some((stage, write_access));
        self.read_stages = vk::PipelineStageFlags2::NONE;
        self.read_barrier = None;
    }

    /// 写回到持久状态的 (stage, access)
    fn final_state(&self) -> Option<(vk::PipelineStageFlags2, vk::AccessFlags2)> {
        if !self.read_stages.is_empty() {
            Some((self.read_stages, vk::AccessFlags2::NONE))
        } else {
            self.last_write
        }
    }
}

struct TextureTrack {
    sync: SyncState,
    layout: vk::ImageLayout,
}

/// Barrier 计算器
///
/// 初始状态来自 `RgResourceRegistry` 中记录的上一次使用，结束后再写回。
pub struct RgBarrierSynthesizer<'r> {
    registry: &'r mut RgResourceRegistry,
    buffers: SecondaryMap<RgPhysicalBufferId, SyncState>,
    textures: SecondaryMap<RgPhysicalTextureId, TextureTrack>,
}

impl<'r> RgBarrierSynthesizer<'r> {
    pub fn new(registry: &'r mut RgResourceRegistry) -> Self {
        Self {
            registry,
            buffers: SecondaryMap::new(),
            textures: SecondaryMap::new(),
        }
    }

    /// 按 `schedule` 的顺序计算 barrier，返回值按 pass 下标索引
    pub fn synthesize(mut self, schedule: &[usize], uses: &[RgPassUses]) -> Vec<RgPassBarriers> {
        let _span = tracy_client::span!("RgBarrierSynthesizer::synthesize");

        let mut barriers = vec![RgPassBarriers::new(); uses.len()];

        for &pass_idx in schedule {
            let pass_uses = &uses[pass_idx];

            for &(texture, state) in &pass_uses.texture_reads {
                self.texture_use(&mut barriers, pass_idx, texture, state, false);
            }
            for &(buffer, state) in &pass_uses.buffer_reads {
                self.buffer_use(&mut barriers, pass_idx, buffer, state, false);
            }
            for &(texture, state) in &pass_uses.texture_writes {
                self.texture_use(&mut barriers, pass_idx, texture, state, true);
            }
            for &(buffer, state) in &pass_uses.buffer_writes {
                self.buffer_use(&mut barriers, pass_idx, buffer, state, true);
            }
        }

        self.write_back();
        barriers
    }

    fn texture_use(
        &mut self,
        barriers: &mut [RgPassBarriers],
        pass_idx: usize,
        texture: RgPhysicalTextureId,
        required: RgTextureState,
        is_write: bool,
    ) {
        let physical = self.registry.texture(texture);
        let aspect = physical.aspect();
        if !self.textures.contains_key(texture) {
            let state = physical.state;
            self.textures.insert(
                texture,
                TextureTrack {
                    sync: SyncState::from_state(state.stage, state.write_access()),
                    layout: state.layout,
                },
            );
        }
        let Some(track) = self.textures.get_mut(texture) else {
            return;
        };

        let pass_barriers = &mut barriers[pass_idx];
        let mut push = |src: (vk::PipelineStageFlags2, vk::AccessFlags2), old_layout: vk::ImageLayout| {
            pass_barriers.texture_barriers.push(RgTextureBarrierDesc {
                texture,
                src_stage: src.0,
                src_access: src.1,
                dst_stage: required.stage,
                dst_access: required.access,
                old_layout,
                new_layout: required.layout,
                aspect,
            });
            (pass_idx, pass_barriers.texture_barriers.len() - 1)
        };

        if track.layout != required.layout {
            let src = track.sync.take_source().unwrap_or((vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE));
            let location = push(src, track.layout);
            track.layout = required.layout;

            if is_write {
                track.sync.record_write(required.stage, required.write_access());
            } else {
                track.sync.read_stages |= required.stage;
                track.sync.read_barrier = Some(location);
            }
            return;
        }

        if required.stage == vk::PipelineStageFlags2::NONE {
            return;
        }

        if is_write {
            if let Some(src) = track.sync.take_source() {
                push(src, track.layout);
            }
            track.sync.record_write(required.stage, required.write_access());
        } else if track.sync.read_stages.is_empty() {
            if let Some(src) = track.sync.last_write {
                track.sync.read_barrier = Some(push(src, track.layout));
            }
            track.sync.read_stages |= required.stage;
        } else {
            if let Some((barrier_pass, barrier_idx)) = track.sync.read_barrier {
                let barrier = &mut barriers[barrier_pass].texture_barriers[barrier_idx];
                barrier.dst_stage |= required.stage;
                barrier.dst_access |= required.access;
            }
            track.sync.read_stages |= required.stage;
        }
    }

    fn buffer_use(
        &mut self,
        barriers: &mut [RgPassBarriers],
        pass_idx: usize,
        buffer: RgPhysicalBufferId,
        required: RgBufferState,
        is_write: bool,
    ) {
        // host 访问由 CPU 侧同步
        if required.is_host_only() {
            return;
        }

        if !self.buffers.contains_key(buffer) {
            let state = self.registry.buffer(buffer).state;
            self.buffers.insert(buffer, SyncState::from_state(state.stage, state.write_access()));
        }
        let Some(sync) = self.buffers.get_mut(buffer) else {
            return;
        };

        let mut push = |src: (vk::PipelineStageFlags2, vk::AccessFlags2)| {
            let pass_barriers = &mut barriers[pass_idx];
            pass_barriers.buffer_barriers.push(RgBufferBarrierDesc {
                buffer,
                src_stage: src.0,
                src_access: src.1,
                dst_stage: required.stage,
                dst_access: required.access,
            });
            (pass_idx, pass_barriers.buffer_barriers.len() - 1)
        };

        if is_write {
            if let Some(src) = sync.take_source() {
                push(src);
            }
            sync.record_write(required.stage, required.write_access());
        } else if sync.read_stages.is_empty() {
            if let Some(src) = sync.last_write {
                sync.read_barrier = Some(push(src));
            }
            sync.read_stages |= required.stage;
        } else {
            if let Some((barrier_pass, barrier_idx)) = sync.read_barrier {
                let barrier = &mut barriers[barrier_pass].buffer_barriers[barrier_idx];
                barrier.dst_stage |= required.stage;
                barrier.dst_access |= required.access;
            }
            sync.read_stages |= required.stage;
        }
    }

    /// 把最终状态写回注册表，下一帧从真实状态开始
    fn write_back(mut self) {
        for (buffer, sync) in &self.buffers {
            if let Some((stage, access)) = sync.final_state() {
                self.registry.buffer_mut(buffer).state = RgBufferState::new(stage, access);
            }
        }
        for (texture, track) in &self.textures {
            let (stage, access) =
                track.sync.final_state().unwrap_or((vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE));
            self.registry.texture_mut(texture).state = RgTextureState::new(stage, access, track.layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use truvis_render_interface::gfx_device::{GfxBufferDesc, GfxBufferHeap, GfxTextureDesc};

    use super::*;

    fn texture(registry: &mut RgResourceRegistry, name: &str) -> RgPhysicalTextureId {
        registry.declare_texture(name, 1, GfxTextureDesc::new_2d(32, 32, vk::Format::R8G8B8A8_UNORM)).0[0]
    }

    fn buffer(registry: &mut RgResourceRegistry, name: &str) -> RgPhysicalBufferId {
        registry.declare_buffer(name, 1, GfxBufferDesc::new(GfxBufferHeap::DeviceLocal, 1024, 16)).0[0]
    }

    fn synthesize(registry: &mut RgResourceRegistry, uses: &[RgPassUses]) -> Vec<RgPassBarriers> {
        let _client = tracy_client::Client::start();
        let schedule: Vec<_> = (0..uses.len()).collect();
        RgBarrierSynthesizer::new(registry).synthesize(&schedule, uses)
    }

    #[test]
    fn test_texture_read_after_read_is_merged() {
        let mut registry = RgResourceRegistry::new();
        let hdr = texture(&mut registry, "hdr");

        let uses = vec![
            RgPassUses {
                texture_writes: vec![(hdr, RgTextureState::COLOR_ATTACHMENT_WRITE)],
                ..Default::default()
            },
            RgPassUses {
                texture_reads: vec![(hdr, RgTextureState::SHADER_READ_FRAGMENT)],
                ..Default::default()
            },
            RgPassUses {
                texture_reads: vec![(hdr, RgTextureState::SHADER_READ_COMPUTE)],
                ..Default::default()
            },
        ];
        let barriers = synthesize(&mut registry, &uses);

        // 第一次使用也需要 layout 转换
        assert_eq!(barriers[0].texture_barrier_count(), 1);
        assert_eq!(barriers[0].texture_barriers[0].old_layout, vk::ImageLayout::UNDEFINED);

        assert_eq!(barriers[1].texture_barrier_count(), 1);
        let read_barrier = barriers[1].texture_barriers[0];
        assert_eq!(read_barrier.src_stage, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(read_barrier.src_access, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
        assert_eq!(
            read_barrier.dst_stage,
            vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER
        );
        assert!(!barriers[2].has_barriers());

        let state = registry.texture(hdr).state;
        assert_eq!(state.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(state.access, vk::AccessFlags2::NONE);
    }

    #[test]
    fn test_buffer_raw_then_war() {
        let mut registry = RgResourceRegistry::new();
        let b = buffer(&mut registry, "B");

        let uses = vec![
            RgPassUses {
                buffer_writes: vec![(b, RgBufferState::STORAGE_WRITE_COMPUTE)],
                ..Default::default()
            },
            RgPassUses {
                buffer_reads: vec![(b, RgBufferState::INDIRECT_BUFFER)],
                ..Default::default()
            },
            RgPassUses {
                buffer_reads: vec![(b, RgBufferState::STORAGE_READ_FRAGMENT)],
                ..Default::default()
            },
            RgPassUses {
                buffer_writes: vec![(b, RgBufferState::TRANSFER_DST)],
                ..Default::default()
            },
        ];
        let barriers = synthesize(&mut registry, &uses);

        // 第一次写入不需要 barrier
        assert!(!barriers[0].has_barriers());

        assert_eq!(barriers[1].buffer_barrier_count(), 1);
        assert_eq!(
            barriers[1].buffer_barriers[0].dst_access,
            vk::AccessFlags2::INDIRECT_COMMAND_READ | vk::AccessFlags2::SHADER_STORAGE_READ
        );
        assert!(!barriers[2].has_barriers());

        // WAR 只等待读取的 stage
        let war = barriers[3].buffer_barriers[0];
        assert_eq!(war.src_stage, vk::PipelineStageFlags2::DRAW_INDIRECT | vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert_eq!(war.src_access, vk::AccessFlags2::NONE);

        assert_eq!(registry.buffer(b).state, RgBufferState::TRANSFER_DST);
    }

    #[test]
    fn test_waw_same_layout() {
        let mut registry = RgResourceRegistry::new();
        let t = texture(&mut registry, "accum");

        let uses = vec![
            RgPassUses {
                texture_writes: vec![(t, RgTextureState::STORAGE_WRITE_COMPUTE)],
                ..Default::default()
            },
            RgPassUses {
                texture_writes: vec![(t, RgTextureState::STORAGE_READ_WRITE_COMPUTE)],
                ..Default::default()
            },
        ];
        let barriers = synthesize(&mut registry, &uses);

        let waw = barriers[1].texture_barriers[0];
        assert!(!waw.is_layout_transition());
        assert_eq!(waw.src_access, vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert_eq!(
            waw.dst_access,
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE
        );
    }

    #[test]
    fn test_host_access_has_no_barrier() {
        let mut registry = RgResourceRegistry::new();
        let b = buffer(&mut registry, "staging");

        let uses = vec![
            RgPassUses {
                buffer_writes: vec![(b, RgBufferState::HOST)],
                ..Default::default()
            },
            RgPassUses {
                buffer_reads: vec![(b, RgBufferState::HOST)],
                ..Default::default()
            },
        ];
        let barriers = synthesize(&mut registry, &uses);
        assert!(barriers.iter().all(|b| !b.has_barriers()));
    }

    #[test]
    fn test_state_carried_from_previous_frame() {
        let mut registry = RgResourceRegistry::new();
        let t = texture(&mut registry, "history");
        registry.texture_mut(t).state = RgTextureState::SHADER_READ_FRAGMENT;

        let uses = vec![RgPassUses {
            texture_writes: vec![(t, RgTextureState::COLOR_ATTACHMENT_WRITE)],
            ..Default::default()
        }];
        let barriers = synthesize(&mut registry, &uses);

        let barrier = barriers[0].texture_barriers[0];
        assert_eq!(barrier.old_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(barrier.src_stage, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert_eq!(barrier.src_access, vk::AccessFlags2::NONE);
    }
}
