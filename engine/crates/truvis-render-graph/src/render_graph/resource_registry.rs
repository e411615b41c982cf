use anyhow::Context;
use ash::vk;
use indexmap::IndexMap;
use slotmap::SlotMap;
use truvis_render_interface::gfx_device::{GfxBufferDesc, GfxDevice, GfxTextureDesc};
use truvis_render_interface::handles::{GfxBufferHandle, GfxTextureHandle};

use super::physical_resource::{RgPhysicalBuffer, RgPhysicalTexture, RgResourceKind, RgTemporalGroup};
use super::resource_handle::{RgPhysicalBufferId, RgPhysicalTextureId};
use super::resource_state::{RgBufferState, RgTextureState};

/// 物理资源注册表
///
/// 跨帧持久存在。transient 资源只活一帧，temporal 资源按名字分组并在帧末轮换，
/// imported 资源只在本帧绑定。
#[derive(Default)]
pub struct RgResourceRegistry {
    buffers: SlotMap<RgPhysicalBufferId, RgPhysicalBuffer>,
    textures: SlotMap<RgPhysicalTextureId, RgPhysicalTexture>,

    temporal_buffers: IndexMap<String, RgTemporalGroup<RgPhysicalBufferId>>,
    temporal_textures: IndexMap<String, RgTemporalGroup<RgPhysicalTextureId>>,

    /// 被放弃的帧留下的分配，下一次拿到 device 时销毁
    orphan_buffers: Vec<GfxBufferHandle>,
    orphan_textures: Vec<GfxTextureHandle>,
    /// 当前帧已经声明过资源，还没有 retire 或 abandon
    frame_open: bool,
}

// new & init
impl RgResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

// declare
impl RgResourceRegistry {
    /// 声明 `layers` 个 buffer
    ///
    /// 返回各 layer 的物理资源，以及它们是否是新注册的。
    /// 上一帧保留下来的同名、同描述 temporal 资源会被复用。
    pub fn declare_buffer(
        &mut self,
        name: &str,
        layers: usize,
        desc: GfxBufferDesc,
    ) -> (Vec<RgPhysicalBufferId>, bool) {
        self.frame_open = true;
        if layers == 1 {
            let id = self.buffers.insert(RgPhysicalBuffer::new(name, desc, RgResourceKind::Transient));
            return (vec![id], true);
        }

        if let Some(group) = self.temporal_buffers.get_mut(name) {
            let same_desc = group.layers.len() == layers
                && group.layers.iter().all(|&id| {
                    let old = &self.buffers[id].desc;
                    old.heap == desc.heap && old.size == desc.size && old.alignment == desc.alignment
                });
            if same_desc {
                group.declared = true;
                return (group.layers.clone(), false);
            }

            log::debug!("RenderGraph: temporal buffer \"{name}\" changed its description, recreating");
            let stale = self.temporal_buffers.shift_remove(name).into_iter().flat_map(|group| group.layers);
            for id in stale {
                self.buffers[id].kind = RgResourceKind::Transient;
            }
        }

        let ids: Vec<_> = (0..layers)
            .map(|layer| {
                self.buffers.insert(RgPhysicalBuffer::new(
                    format!("{name}#{layer}"),
                    desc,
                    RgResourceKind::Temporal,
                ))
            })
            .collect();
        self.temporal_buffers.insert(name.to_string(), RgTemporalGroup::new(ids.clone()));
        (ids, true)
    }

    /// 声明 `layers` 个 texture，规则与 `declare_buffer` 相同
    pub fn declare_texture(
        &mut self,
        name: &str,
        layers: usize,
        desc: GfxTextureDesc,
    ) -> (Vec<RgPhysicalTextureId>, bool) {
        self.frame_open = true;
        if layers == 1 {
            let id = self.textures.insert(RgPhysicalTexture::new(name, desc, RgResourceKind::Transient));
            return (vec![id], true);
        }

        if let Some(group) = self.temporal_textures.get_mut(name) {
            let same_desc = group.layers.len() == layers
                && group.layers.iter().all(|&id| self.textures[id].desc.same_shape(&desc));
            if same_desc {
                group.declared = true;
                return (group.layers.clone(), false);
            }

            log::debug!("RenderGraph: temporal texture \"{name}\" changed its description, recreating");
            let stale = self.temporal_textures.shift_remove(name).into_iter().flat_map(|group| group.layers);
            for id in stale {
                self.textures[id].kind = RgResourceKind::Transient;
            }
        }

        let ids: Vec<_> = (0..layers)
            .map(|layer| {
                self.textures.insert(RgPhysicalTexture::new(
                    format!("{name}#{layer}"),
                    desc,
                    RgResourceKind::Temporal,
                ))
            })
            .collect();
        self.temporal_textures.insert(name.to_string(), RgTemporalGroup::new(ids.clone()));
        (ids, true)
    }

    pub fn import_buffer(
        &mut self,
        name: &str,
        handle: GfxBufferHandle,
        desc: GfxBufferDesc,
        state: RgBufferState,
    ) -> RgPhysicalBufferId {
        self.frame_open = true;
        self.buffers.insert(RgPhysicalBuffer::imported(name, handle, desc, state))
    }

    pub fn import_texture(
        &mut self,
        name: &str,
        handle: GfxTextureHandle,
        desc: GfxTextureDesc,
        state: RgTextureState,
    ) -> RgPhysicalTextureId {
        self.frame_open = true;
        self.textures.insert(RgPhysicalTexture::imported(name, handle, desc, state))
    }
}

// allocate
impl RgResourceRegistry {
    /// 为本帧使用到的资源创建真实的分配
    ///
    /// - 同一个 temporal 组的所有 layer 使用相同的 usage
    /// - 复用的资源如果 usage 不够，会销毁后重新创建，内容丢失
    /// - 没有被任何 pass 使用的 transient 资源不会被创建
    pub fn allocate(&mut self, device: &mut dyn GfxDevice, frame_id: u64) -> anyhow::Result<()> {
        let _span = tracy_client::span!("RgResourceRegistry::allocate");
        self.release_orphans(device, frame_id);

        for group in self.temporal_buffers.values().filter(|group| group.declared) {
            let usage = group
                .layers
                .iter()
                .fold(vk::BufferUsageFlags::empty(), |usage, &id| usage | self.buffers[id].required_usage);
            let used = group.layers.iter().any(|&id| self.buffers[id].used);
            for &id in &group.layers {
                self.buffers[id].required_usage = usage;
                self.buffers[id].used = used;
            }
        }
        for group in self.temporal_textures.values().filter(|group| group.declared) {
            let usage = group
                .layers
                .iter()
                .fold(vk::ImageUsageFlags::empty(), |usage, &id| usage | self.textures[id].required_usage);
            let used = group.layers.iter().any(|&id| self.textures[id].used);
            for &id in &group.layers {
                self.textures[id].required_usage = usage;
                self.textures[id].used = used;
            }
        }

        for buffer in self.buffers.values_mut() {
            if buffer.kind == RgResourceKind::Imported {
                if !buffer.satisfies_usage() {
                    log::warn!(
                        "RenderGraph: imported buffer \"{}\" lacks usage {:?}",
                        buffer.name,
                        buffer.required_usage & !buffer.desc.usage
                    );
                }
                continue;
            }
            if !buffer.used {
                if buffer.handle.is_none() && buffer.kind == RgResourceKind::Transient {
                    log::warn!("RenderGraph: buffer \"{}\" is declared but never used", buffer.name);
                }
                continue;
            }
            if let Some(handle) = buffer.handle {
                if buffer.satisfies_usage() {
                    continue;
                }
                log::warn!("RenderGraph: buffer \"{}\" needs more usage, recreating", buffer.name);
                device.destroy_buffer(handle, frame_id);
                buffer.handle = None;
                buffer.state = RgBufferState::UNDEFINED;
            }

            buffer.desc.usage |= buffer.required_usage;
            let handle = device
                .create_buffer(&buffer.desc, &buffer.name)
                .with_context(|| format!("RenderGraph: failed to create buffer \"{}\"", buffer.name))?;
            buffer.handle = Some(handle);
        }

        for texture in self.textures.values_mut() {
            if texture.kind == RgResourceKind::Imported {
                if !texture.satisfies_usage() {
                    log::warn!(
                        "RenderGraph: imported texture \"{}\" lacks usage {:?}",
                        texture.name,
                        texture.required_usage & !texture.desc.usage
                    );
                }
                continue;
            }
            if !texture.used {
                if texture.handle.is_none() && texture.kind == RgResourceKind::Transient {
                    log::warn!("RenderGraph: texture \"{}\" is declared but never used", texture.name);
                }
                continue;
            }
            if let Some(handle) = texture.handle {
                if texture.satisfies_usage() {
                    continue;
                }
                log::warn!("RenderGraph: texture \"{}\" needs more usage, recreating", texture.name);
                device.destroy_texture(handle, frame_id);
                texture.handle = None;
                texture.state = RgTextureState::UNDEFINED;
            }

            texture.desc.usage |= texture.required_usage;
            let handle = device
                .create_texture(&texture.desc, &texture.name)
                .with_context(|| format!("RenderGraph: failed to create texture \"{}\"", texture.name))?;
            texture.handle = Some(handle);
        }

        Ok(())
    }

    /// temporal texture 在本帧 `allocate` 之后是否会是新的分配
    ///
    /// 第一次分配，或者 usage 不够需要重建时为 true，此时历史 layer 的内容是未定义的。
    /// 需要在本帧所有 pass 声明完之后调用。
    pub fn temporal_texture_needs_allocation(&self, name: &str) -> bool {
        let Some(group) = self.temporal_textures.get(name) else {
            return false;
        };
        let usage = group
            .layers
            .iter()
            .fold(vk::ImageUsageFlags::empty(), |usage, &id| usage | self.textures[id].required_usage);
        group.layers.iter().any(|&id| {
            let texture = &self.textures[id];
            texture.handle.is_none() || !texture.desc.usage.contains(usage)
        })
    }
}

// retention
impl RgResourceRegistry {
    /// 帧末处理
    ///
    /// - transient 资源延迟销毁后移除
    /// - imported 资源直接移除
    /// - 本帧未声明的 temporal 资源按 transient 处理
    /// - 本帧声明过的 temporal 资源轮换 layer
    pub fn retire_frame(&mut self, device: &mut dyn GfxDevice, frame_id: u64) {
        let _span = tracy_client::span!("RgResourceRegistry::retire_frame");

        self.temporal_buffers.retain(|name, group| {
            if !group.declared {
                log::debug!("RenderGraph: temporal buffer \"{name}\" was not declared, releasing");
            }
            group.declared
        });
        self.temporal_textures.retain(|name, group| {
            if !group.declared {
                log::debug!("RenderGraph: temporal texture \"{name}\" was not declared, releasing");
            }
            group.declared
        });

        for group in self.temporal_buffers.values_mut() {
            group.rotate();
            group.declared = false;
        }
        for group in self.temporal_textures.values_mut() {
            group.rotate();
            group.declared = false;
        }

        let (buffers, textures) = self.sweep();
        let released = buffers.len() + textures.len();
        for handle in buffers {
            device.destroy_buffer(handle, frame_id);
        }
        for handle in textures {
            device.destroy_texture(handle, frame_id);
        }
        self.release_orphans(device, frame_id);
        self.frame_open = false;

        log::debug!(
            "RenderGraph: frame {frame_id} retired, {released} allocations released, {} buffers and {} textures kept",
            self.buffers.len(),
            self.textures.len()
        );
    }

    /// 放弃当前帧，用于 build 失败或者编译结果没有执行
    ///
    /// 本帧声明过的 temporal 组记录的状态不再可信，整组释放；其余规则与 `retire_frame` 相同。
    /// 已有的分配在下一次 `allocate` / `retire_frame` / `destroy` 时销毁。
    pub fn abandon_frame(&mut self) {
        self.temporal_buffers.retain(|name, group| {
            if group.declared {
                log::warn!("RenderGraph: temporal buffer \"{name}\" is dropped with the abandoned frame");
            }
            !group.declared
        });
        self.temporal_textures.retain(|name, group| {
            if group.declared {
                log::warn!("RenderGraph: temporal texture \"{name}\" is dropped with the abandoned frame");
            }
            !group.declared
        });

        let (buffers, textures) = self.sweep();
        self.orphan_buffers.extend(buffers);
        self.orphan_textures.extend(textures);
        self.frame_open = false;
    }

    /// 移除不属于任何 temporal 组的资源，返回需要销毁的分配
    fn sweep(&mut self) -> (Vec<GfxBufferHandle>, Vec<GfxTextureHandle>) {
        let temporal_buffers = &self.temporal_buffers;
        let mut buffer_handles = Vec::new();
        self.buffers.retain(|id, buffer| {
            let retained = buffer.kind == RgResourceKind::Temporal
                && temporal_buffers.values().any(|group| group.layers.contains(&id));
            if retained {
                buffer.reset_frame_usage();
                return true;
            }
            if buffer.kind != RgResourceKind::Imported
                && let Some(handle) = buffer.handle
            {
                buffer_handles.push(handle);
            }
            false
        });

        let temporal_textures = &self.temporal_textures;
        let mut texture_handles = Vec::new();
        self.textures.retain(|id, texture| {
            let retained = texture.kind == RgResourceKind::Temporal
                && temporal_textures.values().any(|group| group.layers.contains(&id));
            if retained {
                texture.reset_frame_usage();
                return true;
            }
            if texture.kind != RgResourceKind::Imported
                && let Some(handle) = texture.handle
            {
                texture_handles.push(handle);
            }
            false
        });

        (buffer_handles, texture_handles)
    }

    fn release_orphans(&mut self, device: &mut dyn GfxDevice, frame_id: u64) {
        for handle in self.orphan_buffers.drain(..) {
            device.destroy_buffer(handle, frame_id);
        }
        for handle in self.orphan_textures.drain(..) {
            device.destroy_texture(handle, frame_id);
        }
    }

    /// 销毁所有资源，在 graph 销毁前调用
    pub fn destroy(&mut self, device: &mut dyn GfxDevice, frame_id: u64) {
        for (_, buffer) in self.buffers.drain() {
            if buffer.kind != RgResourceKind::Imported
                && let Some(handle) = buffer.handle
            {
                device.destroy_buffer(handle, frame_id);
            }
        }
        for (_, texture) in self.textures.drain() {
            if texture.kind != RgResourceKind::Imported
                && let Some(handle) = texture.handle
            {
                device.destroy_texture(handle, frame_id);
            }
        }
        self.temporal_buffers.clear();
        self.temporal_textures.clear();
        self.release_orphans(device, frame_id);
        self.frame_open = false;
    }
}

// getters
impl RgResourceRegistry {
    #[inline]
    pub fn buffer(&self, id: RgPhysicalBufferId) -> &RgPhysicalBuffer {
        &self.buffers[id]
    }

    #[inline]
    pub fn buffer_mut(&mut self, id: RgPhysicalBufferId) -> &mut RgPhysicalBuffer {
        &mut self.buffers[id]
    }

    #[inline]
    pub fn texture(&self, id: RgPhysicalTextureId) -> &RgPhysicalTexture {
        &self.textures[id]
    }

    #[inline]
    pub fn texture_mut(&mut self, id: RgPhysicalTextureId) -> &mut RgPhysicalTexture {
        &mut self.textures[id]
    }

    #[inline]
    pub fn contains_buffer(&self, id: RgPhysicalBufferId) -> bool {
        self.buffers.contains_key(id)
    }

    #[inline]
    pub fn contains_texture(&self, id: RgPhysicalTextureId) -> bool {
        self.textures.contains_key(id)
    }

    /// 是否有声明过资源但还没有 retire 的帧
    #[inline]
    pub fn is_frame_open(&self) -> bool {
        self.frame_open
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// temporal texture 当前的 layer 列表
    #[inline]
    pub fn temporal_texture_layers(&self, name: &str) -> Option<&[RgPhysicalTextureId]> {
        self.temporal_textures.get(name).map(|group| group.layers.as_slice())
    }

    #[inline]
    pub fn temporal_buffer_layers(&self, name: &str) -> Option<&[RgPhysicalBufferId]> {
        self.temporal_buffers.get(name).map(|group| group.layers.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use truvis_render_interface::gfx_device::GfxBufferHeap;
    use truvis_render_interface::headless::HeadlessDevice;

    use super::*;

    fn hdr_desc() -> GfxTextureDesc {
        GfxTextureDesc::new_2d(64, 64, vk::Format::R16G16B16A16_SFLOAT)
    }

    #[test]
    fn test_temporal_group_reused_and_rotated() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut registry = RgResourceRegistry::new();

        let (layers, fresh) = registry.declare_texture("taa", 2, hdr_desc());
        assert!(fresh);
        registry.texture_mut(layers[0]).add_use(RgTextureState::STORAGE_WRITE_COMPUTE);
        registry.allocate(&mut device, 0).unwrap();
        assert!(registry.texture(layers[1]).handle.is_some());

        registry.retire_frame(&mut device, 0);
        assert_eq!(registry.temporal_texture_layers("taa").unwrap(), &[layers[1], layers[0]]);

        let (next, fresh) = registry.declare_texture("taa", 2, hdr_desc());
        assert!(!fresh);
        assert_eq!(next, vec![layers[1], layers[0]]);
    }

    #[test]
    fn test_undeclared_temporal_is_destroyed() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut registry = RgResourceRegistry::new();

        let (layers, _) = registry.declare_texture("history", 3, hdr_desc());
        registry.texture_mut(layers[0]).add_use(RgTextureState::SHADER_READ_FRAGMENT);
        registry.allocate(&mut device, 0).unwrap();
        registry.retire_frame(&mut device, 0);
        assert_eq!(registry.texture_count(), 3);

        // 下一帧没有声明
        registry.retire_frame(&mut device, 1);
        assert_eq!(registry.texture_count(), 0);
        assert_eq!(device.pending_destroy_count(), 3);
    }

    #[test]
    fn test_changed_desc_recreates_group() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut registry = RgResourceRegistry::new();

        let desc = GfxBufferDesc::new(GfxBufferHeap::DeviceLocal, 256, 16);
        let (old, _) = registry.declare_buffer("reservoir", 2, desc);
        let (new, fresh) = registry.declare_buffer("reservoir", 2, GfxBufferDesc { size: 512, ..desc });

        assert!(fresh);
        assert_ne!(old, new);
        assert_eq!(registry.buffer(old[0]).kind, RgResourceKind::Transient);

        registry.retire_frame(&mut device, 0);
        assert!(!registry.contains_buffer(old[0]));
        assert!(registry.contains_buffer(new[0]));
    }

    #[test]
    fn test_history_needs_allocation_when_usage_grows() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut registry = RgResourceRegistry::new();

        let (layers, _) = registry.declare_texture("taa", 2, hdr_desc());
        assert!(registry.temporal_texture_needs_allocation("taa"));
        registry.texture_mut(layers[0]).add_use(RgTextureState::STORAGE_WRITE_COMPUTE);
        registry.allocate(&mut device, 0).unwrap();
        registry.retire_frame(&mut device, 0);

        let (layers, _) = registry.declare_texture("taa", 2, hdr_desc());
        registry.texture_mut(layers[0]).add_use(RgTextureState::STORAGE_WRITE_COMPUTE);
        assert!(!registry.temporal_texture_needs_allocation("taa"));

        // 只给 layer 0 加 usage，整组都要重建
        registry.texture_mut(layers[0]).add_use(RgTextureState::TRANSFER_SRC);
        assert!(registry.temporal_texture_needs_allocation("taa"));
        assert!(!registry.temporal_texture_needs_allocation("missing"));
    }

    #[test]
    fn test_abandoned_frame_is_cleaned_up() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut registry = RgResourceRegistry::new();

        // 第一帧正常完成，留下一个 temporal 组
        let (kept, _) = registry.declare_texture("kept", 2, hdr_desc());
        registry.texture_mut(kept[0]).add_use(RgTextureState::STORAGE_WRITE_COMPUTE);
        registry.allocate(&mut device, 0).unwrap();
        registry.retire_frame(&mut device, 0);
        assert!(!registry.is_frame_open());

        // 第二帧分配之后被放弃
        let (history, _) = registry.declare_texture("kept", 2, hdr_desc());
        let (scratch, _) = registry.declare_texture("scratch", 1, hdr_desc());
        registry.texture_mut(history[0]).add_use(RgTextureState::STORAGE_WRITE_COMPUTE);
        registry.texture_mut(scratch[0]).add_use(RgTextureState::STORAGE_WRITE_COMPUTE);
        registry.allocate(&mut device, 1).unwrap();
        assert!(registry.is_frame_open());

        registry.abandon_frame();
        assert!(!registry.is_frame_open());
        assert_eq!(registry.texture_count(), 0);
        assert!(registry.temporal_texture_layers("kept").is_none());
        assert_eq!(device.pending_destroy_count(), 0);

        // 下一次 allocate 时销毁留下的 3 个分配
        registry.allocate(&mut device, 2).unwrap();
        assert_eq!(device.pending_destroy_count(), 3);
    }

    #[test]
    fn test_unused_transient_not_allocated() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut registry = RgResourceRegistry::new();

        let desc = GfxBufferDesc::new(GfxBufferHeap::Upload, 64, 4);
        let (ids, _) = registry.declare_buffer("unused", 1, desc);
        registry.allocate(&mut device, 0).unwrap();

        assert!(registry.buffer(ids[0]).handle.is_none());
        assert_eq!(device.buffer_count(), 0);
    }
}
