//! Pass 定义和构建器
//!
//! `RgPassBuilder` 通过名字声明 pass 对资源的读写，每次写入都会产生一个新的逻辑版本。
//! `RgRuntime` 在 pass 回调中把逻辑句柄解析为设备句柄。

use ash::vk;
use truvis_render_interface::gfx_commands::{GfxClearValue, GfxCommandRecorder};
use truvis_render_interface::gfx_device::{
    GfxBufferDesc, GfxBufferHeap, GfxBufferView, GfxDevice, GfxTextureDesc, GfxTextureView,
};
use truvis_render_interface::handles::{GfxBufferHandle, GfxTextureHandle};

use super::builder::RgBuilder;
use super::resource_handle::{
    RgBufferId, RgPassId, RgPhysicalBufferId, RgPhysicalTextureId, RgSemaphoreId, RgTextureId,
};
use super::resource_registry::RgResourceRegistry;
use super::resource_state::{RgBufferState, RgTextureState};
use super::resource_table::RgLogicalTable;
use super::semaphore_info::RgSemaphoreInfo;

/// Pass 的类型，决定回调能拿到什么
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgPassType {
    /// 只在 CPU 上执行，不录制命令
    Host,
    Graphics,
    Compute,
    Transfer,
}

impl RgPassType {
    /// 该类型的 pass 可能涉及的 pipeline stage
    ///
    /// compute pass 也负责 indirect 参数和光追的 dispatch。
    pub fn stage_mask(self) -> vk::PipelineStageFlags2 {
        type Stage = vk::PipelineStageFlags2;
        match self {
            RgPassType::Host => Stage::HOST,
            RgPassType::Graphics => {
                Stage::ALL_GRAPHICS
                    | Stage::DRAW_INDIRECT
                    | Stage::VERTEX_INPUT
                    | Stage::INDEX_INPUT
                    | Stage::VERTEX_ATTRIBUTE_INPUT
                    | Stage::VERTEX_SHADER
                    | Stage::TESSELLATION_CONTROL_SHADER
                    | Stage::TESSELLATION_EVALUATION_SHADER
                    | Stage::GEOMETRY_SHADER
                    | Stage::FRAGMENT_SHADER
                    | Stage::EARLY_FRAGMENT_TESTS
                    | Stage::LATE_FRAGMENT_TESTS
                    | Stage::COLOR_ATTACHMENT_OUTPUT
            }
            RgPassType::Compute => Stage::COMPUTE_SHADER | Stage::DRAW_INDIRECT | Stage::RAY_TRACING_SHADER_KHR,
            RgPassType::Transfer => Stage::ALL_TRANSFER | Stage::COPY | Stage::BLIT | Stage::RESOLVE | Stage::CLEAR,
        }
    }

    /// 这种 pass 能否以 `stage` 使用资源
    ///
    /// `NONE` 只关心 layout（如 present、host 访问），任何 pass 都可以使用。
    #[inline]
    pub fn allows_stage(self, stage: vk::PipelineStageFlags2) -> bool {
        self.stage_mask().contains(stage)
    }

    #[inline]
    pub fn records_commands(self) -> bool {
        self != RgPassType::Host
    }
}

pub type RgHostCallback<'a> = Box<dyn FnOnce(&RgRuntime<'_>) + 'a>;
pub type RgRecordCallback<'a> = Box<dyn FnOnce(&RgRuntime<'_>, &mut dyn GfxCommandRecorder) + 'a>;

/// 按 pass 类型区分的回调
///
/// 回调只应该捕获逻辑句柄，真正的设备句柄在执行时通过 `RgRuntime` 查询。
pub enum RgPassCallback<'a> {
    Host(RgHostCallback<'a>),
    Graphics(RgRecordCallback<'a>),
    Compute(RgRecordCallback<'a>),
    Transfer(RgRecordCallback<'a>),
}

impl RgPassCallback<'_> {
    pub fn pass_type(&self) -> RgPassType {
        match self {
            RgPassCallback::Host(_) => RgPassType::Host,
            RgPassCallback::Graphics(_) => RgPassType::Graphics,
            RgPassCallback::Compute(_) => RgPassType::Compute,
            RgPassCallback::Transfer(_) => RgPassType::Transfer,
        }
    }
}

/// 单次 buffer 使用；写入时 `id` 是被写的旧版本
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgBufferUse {
    pub id: RgBufferId,
    pub state: RgBufferState,
}

/// 单次 texture 使用；写入时 `id` 是被写的旧版本
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgTextureUse {
    pub id: RgTextureId,
    pub state: RgTextureState,
}

/// attachment 的 load/store 方式
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RgAttachmentOps {
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: Option<GfxClearValue>,
}

impl RgAttachmentOps {
    pub fn clear_color(color: [f32; 4]) -> Self {
        Self {
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: Some(GfxClearValue::Color(color)),
        }
    }

    pub fn clear_depth(depth: f32) -> Self {
        Self {
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: Some(GfxClearValue::DepthStencil { depth, stencil: 0 }),
        }
    }

    pub fn load() -> Self {
        Self {
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: None,
        }
    }

    pub fn dont_care() -> Self {
        Self {
            load_op: vk::AttachmentLoadOp::DONT_CARE,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RgAttachment {
    pub texture: RgTextureId,
    pub layout: vk::ImageLayout,
    pub ops: RgAttachmentOps,
}

/// Pass 节点数据
pub struct RgPassNode<'a> {
    pub name: String,
    pub ty: RgPassType,

    pub buffer_reads: Vec<RgBufferUse>,
    pub buffer_writes: Vec<RgBufferUse>,
    pub texture_reads: Vec<RgTextureUse>,
    pub texture_writes: Vec<RgTextureUse>,

    pub waits: Vec<RgSemaphoreInfo>,
    pub signals: Vec<RgSemaphoreInfo>,

    pub color_attachments: Vec<RgAttachment>,
    pub depth_attachment: Option<RgAttachment>,

    pub(crate) callback: Option<RgPassCallback<'a>>,
    /// graph 注入的 pass，优先调度
    pub(crate) early: bool,
}

impl<'a> RgPassNode<'a> {
    pub(crate) fn new(name: impl Into<String>, ty: RgPassType) -> Self {
        Self {
            name: name.into(),
            ty,
            buffer_reads: Vec::new(),
            buffer_writes: Vec::new(),
            texture_reads: Vec::new(),
            texture_writes: Vec::new(),
            waits: Vec::new(),
            signals: Vec::new(),
            color_attachments: Vec::new(),
            depth_attachment: None,
            callback: None,
            early: false,
        }
    }

    #[inline]
    pub fn has_attachments(&self) -> bool {
        !self.color_attachments.is_empty() || self.depth_attachment.is_some()
    }

    pub(crate) fn set_callback(&mut self, callback: RgPassCallback<'a>) {
        assert_eq!(
            self.ty,
            callback.pass_type(),
            "RenderGraph: pass \"{}\" is a {:?} pass, can not take a {:?} callback",
            self.name,
            self.ty,
            callback.pass_type()
        );
        assert!(self.callback.is_none(), "RenderGraph: callback of pass \"{}\" is set twice", self.name);
        self.callback = Some(callback);
    }
}

/// Pass 执行时的上下文
///
/// 逻辑句柄到设备句柄的映射在 build 时已经压缩完毕，这里只读。
pub struct RgRuntime<'r> {
    pub(crate) buffers: &'r RgLogicalTable<RgBufferId, RgPhysicalBufferId>,
    pub(crate) textures: &'r RgLogicalTable<RgTextureId, RgPhysicalTextureId>,
    pub(crate) registry: &'r RgResourceRegistry,
    pub(crate) device: &'r dyn GfxDevice,
}

impl<'r> RgRuntime<'r> {
    /// 获取缓冲区的设备句柄
    #[inline]
    pub fn get_buffer(&self, id: RgBufferId) -> Option<GfxBufferHandle> {
        self.registry.buffer(self.buffers.resolved(id)).handle
    }

    /// 获取图像的设备句柄
    #[inline]
    pub fn get_texture(&self, id: RgTextureId) -> Option<GfxTextureHandle> {
        self.registry.texture(self.textures.resolved(id)).handle
    }

    pub fn get_buffer_view(&self, id: RgBufferId) -> Option<GfxBufferView> {
        self.device.get_buffer_view(self.get_buffer(id)?)
    }

    pub fn get_texture_view(&self, id: RgTextureId) -> Option<GfxTextureView> {
        self.device.get_texture_view(self.get_texture(id)?)
    }

    #[inline]
    pub fn device(&self) -> &'r dyn GfxDevice {
        self.device
    }
}

/// Pass 构建器
///
/// 由 `RgBuilder::create_pass` 创建，声明这个 pass 的资源使用、semaphore 与回调。
pub struct RgPassBuilder<'b, 'a> {
    pub(crate) builder: &'b mut RgBuilder<'a>,
    pub(crate) pass: RgPassId,
}

impl<'b, 'a> RgPassBuilder<'b, 'a> {
    #[inline]
    pub fn id(&self) -> RgPassId {
        self.pass
    }

    #[inline]
    fn node(&mut self) -> &mut RgPassNode<'a> {
        self.builder.pass_mut(self.pass)
    }

    fn assert_stage(&mut self, stage: vk::PipelineStageFlags2) {
        let node = self.node();
        assert!(
            node.ty.allows_stage(stage),
            "RenderGraph: {:?} pass \"{}\" can not use a resource at stage {:?}",
            node.ty,
            node.name,
            stage
        );
    }
}

// buffer
impl<'b, 'a> RgPassBuilder<'b, 'a> {
    /// 读取 `name` 的当前版本
    pub fn read_buffer(&mut self, name: &str, state: RgBufferState) -> RgBufferId {
        self.read_buffer_layer(name, state, 0)
    }

    /// 读取 temporal buffer 的第 `layer` 层（k 帧之前的结果）
    pub fn read_buffer_layer(&mut self, name: &str, state: RgBufferState, layer: usize) -> RgBufferId {
        self.assert_stage(state.stage);
        let id = self.builder.resolve_buffer_read(self.pass, name, layer);
        self.builder.add_buffer_use(id, state);
        self.node().buffer_reads.push(RgBufferUse { id, state });
        id
    }

    /// 由 `src` 的当前版本写出 `dst`，返回新版本
    pub fn write_buffer(&mut self, dst: &str, src: &str, state: RgBufferState) -> RgBufferId {
        self.assert_stage(state.stage);
        let (src_id, dst_id) = self.builder.resolve_buffer_write(self.pass, dst, src);
        self.builder.add_buffer_use(src_id, state);
        self.node().buffer_writes.push(RgBufferUse { id: src_id, state });
        dst_id
    }

    /// 创建只有一层的 buffer，并由这个 pass 写出第一个版本
    pub fn create_buffer(
        &mut self,
        name: &str,
        heap: GfxBufferHeap,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
        state: RgBufferState,
    ) -> RgBufferId {
        self.assert_stage(state.stage);
        let desc = GfxBufferDesc::new(heap, size, alignment);
        let (src_id, dst_id) = self.builder.create_buffer_in_pass(self.pass, name, desc);
        self.builder.add_buffer_use(src_id, state);
        self.node().buffer_writes.push(RgBufferUse { id: src_id, state });
        dst_id
    }
}

// texture
impl<'b, 'a> RgPassBuilder<'b, 'a> {
    pub fn read_texture(&mut self, name: &str, state: RgTextureState) -> RgTextureId {
        self.read_texture_layer(name, state, 0)
    }

    /// 读取 temporal texture 的第 `layer` 层
    ///
    /// `layer > 0` 只能通过 texture 第一次声明时的名字读取，原地写入之后也可以。
    pub fn read_texture_layer(&mut self, name: &str, state: RgTextureState, layer: usize) -> RgTextureId {
        self.assert_stage(state.stage);
        let id = self.builder.resolve_texture_read(self.pass, name, layer);
        self.builder.add_texture_use(id, state);
        self.node().texture_reads.push(RgTextureUse { id, state });
        id
    }

    pub fn write_texture(&mut self, dst: &str, src: &str, state: RgTextureState) -> RgTextureId {
        self.assert_stage(state.stage);
        let (src_id, dst_id) = self.builder.resolve_texture_write(self.pass, dst, src);
        self.builder.add_texture_use(src_id, state);
        self.node().texture_writes.push(RgTextureUse { id: src_id, state });
        dst_id
    }

    pub fn create_texture(&mut self, name: &str, desc: GfxTextureDesc, state: RgTextureState) -> RgTextureId {
        self.assert_stage(state.stage);
        let (src_id, dst_id) = self.builder.create_texture_in_pass(self.pass, name, desc);
        self.builder.add_texture_use(src_id, state);
        self.node().texture_writes.push(RgTextureUse { id: src_id, state });
        dst_id
    }
}

// attachment
impl<'b, 'a> RgPassBuilder<'b, 'a> {
    fn assert_graphics(&mut self, what: &str) {
        let node = self.node();
        assert_eq!(
            node.ty,
            RgPassType::Graphics,
            "RenderGraph: {what} used in non-graphics pass \"{}\"",
            node.name
        );
    }

    pub fn write_color_attachment(&mut self, dst: &str, src: &str, ops: RgAttachmentOps) -> RgTextureId {
        self.assert_graphics("color attachment");
        let state = if ops.load_op == vk::AttachmentLoadOp::LOAD {
            RgTextureState::COLOR_ATTACHMENT_READ_WRITE
        } else {
            RgTextureState::COLOR_ATTACHMENT_WRITE
        };
        let (src_id, dst_id) = self.builder.resolve_texture_write(self.pass, dst, src);
        self.push_color_attachment(src_id, state, ops);
        dst_id
    }

    pub fn create_color_attachment(&mut self, name: &str, desc: GfxTextureDesc, ops: RgAttachmentOps) -> RgTextureId {
        self.assert_graphics("color attachment");
        let (src_id, dst_id) = self.builder.create_texture_in_pass(self.pass, name, desc);
        self.push_color_attachment(src_id, RgTextureState::COLOR_ATTACHMENT_WRITE, ops);
        dst_id
    }

    fn push_color_attachment(&mut self, id: RgTextureId, state: RgTextureState, ops: RgAttachmentOps) {
        self.builder.add_texture_use(id, state);
        let node = self.node();
        node.texture_writes.push(RgTextureUse { id, state });
        node.color_attachments.push(RgAttachment {
            texture: id,
            layout: state.layout,
            ops,
        });
    }

    pub fn write_depth_attachment(&mut self, dst: &str, src: &str, ops: RgAttachmentOps) -> RgTextureId {
        self.assert_graphics("depth attachment");
        let state = if ops.load_op == vk::AttachmentLoadOp::LOAD {
            RgTextureState::DEPTH_ATTACHMENT_READ_WRITE
        } else {
            RgTextureState::DEPTH_ATTACHMENT_WRITE
        };
        let (src_id, dst_id) = self.builder.resolve_texture_write(self.pass, dst, src);
        self.builder.add_texture_use(src_id, state);
        self.set_depth_attachment(src_id, state, ops);
        self.node().texture_writes.push(RgTextureUse { id: src_id, state });
        dst_id
    }

    /// 只做深度测试
    pub fn read_depth_attachment(&mut self, name: &str) -> RgTextureId {
        self.assert_graphics("depth attachment");
        let state = RgTextureState::DEPTH_ATTACHMENT_READ;
        let id = self.builder.resolve_texture_read(self.pass, name, 0);
        self.builder.add_texture_use(id, state);
        self.set_depth_attachment(
            id,
            state,
            RgAttachmentOps {
                store_op: vk::AttachmentStoreOp::NONE,
                ..RgAttachmentOps::load()
            },
        );
        self.node().texture_reads.push(RgTextureUse { id, state });
        id
    }

    fn set_depth_attachment(&mut self, id: RgTextureId, state: RgTextureState, ops: RgAttachmentOps) {
        let node = self.node();
        assert!(
            node.depth_attachment.is_none(),
            "RenderGraph: pass \"{}\" already has a depth attachment",
            node.name
        );
        node.depth_attachment = Some(RgAttachment {
            texture: id,
            layout: state.layout,
            ops,
        });
    }
}

// semaphore & callback
impl<'b, 'a> RgPassBuilder<'b, 'a> {
    /// 这个 pass 所在的 batch 提交前等待 `semaphore`
    pub fn wait_semaphore(&mut self, semaphore: RgSemaphoreId, stage: vk::PipelineStageFlags2, value: Option<u64>) {
        self.node().waits.push(RgSemaphoreInfo { semaphore, stage, value });
    }

    /// 这个 pass 所在的 batch 完成后 signal `semaphore`
    pub fn signal_semaphore(&mut self, semaphore: RgSemaphoreId, stage: vk::PipelineStageFlags2, value: Option<u64>) {
        self.node().signals.push(RgSemaphoreInfo { semaphore, stage, value });
    }

    pub fn set_host_callback(&mut self, callback: impl FnOnce(&RgRuntime<'_>) + 'a) {
        self.node().set_callback(RgPassCallback::Host(Box::new(callback)));
    }

    pub fn set_graphics_callback(&mut self, callback: impl FnOnce(&RgRuntime<'_>, &mut dyn GfxCommandRecorder) + 'a) {
        self.node().set_callback(RgPassCallback::Graphics(Box::new(callback)));
    }

    pub fn set_compute_callback(&mut self, callback: impl FnOnce(&RgRuntime<'_>, &mut dyn GfxCommandRecorder) + 'a) {
        self.node().set_callback(RgPassCallback::Compute(Box::new(callback)));
    }

    pub fn set_transfer_callback(&mut self, callback: impl FnOnce(&RgRuntime<'_>, &mut dyn GfxCommandRecorder) + 'a) {
        self.node().set_callback(RgPassCallback::Transfer(Box::new(callback)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::persistent::RenderGraph;

    #[test]
    fn test_stage_mask() {
        assert!(RgPassType::Graphics.allows_stage(RgTextureState::DEPTH_ATTACHMENT_WRITE.stage));
        assert!(RgPassType::Graphics.allows_stage(RgBufferState::UNIFORM_VERTEX.stage));
        assert!(!RgPassType::Graphics.allows_stage(RgTextureState::STORAGE_WRITE_COMPUTE.stage));
        assert!(RgPassType::Compute.allows_stage(RgTextureState::STORAGE_WRITE_RAY_TRACING.stage));
        assert!(!RgPassType::Compute.allows_stage(RgTextureState::TRANSFER_SRC.stage));
        assert!(RgPassType::Transfer.allows_stage(RgTextureState::TRANSFER_DST.stage));
        assert!(RgPassType::Transfer.allows_stage(RgTextureState::PRESENT.stage));
        assert!(RgPassType::Host.allows_stage(RgBufferState::HOST.stage));
        assert!(!RgPassType::Host.allows_stage(RgBufferState::UNIFORM_COMPUTE.stage));
        assert!(!RgPassType::Host.records_commands());
    }

    #[test]
    #[should_panic(expected = "Compute pass \"blur\" can not use a resource at stage")]
    fn test_use_outside_pass_stage() {
        let mut graph = RenderGraph::default();
        let mut builder = graph.builder();
        builder.create_texture("hdr", 1, GfxTextureDesc::new_2d(16, 16, vk::Format::R16G16B16A16_SFLOAT));

        let mut pass = builder.create_pass("blur", RgPassType::Compute);
        pass.read_texture("hdr", RgTextureState::TRANSFER_SRC);
    }

    #[test]
    fn test_callback_kind_must_match() {
        let mut node = RgPassNode::new("blur", RgPassType::Compute);
        node.set_callback(RgPassCallback::Compute(Box::new(|_: &RgRuntime<'_>, _: &mut dyn GfxCommandRecorder| {})));
        assert!(node.callback.is_some());
    }

    #[test]
    #[should_panic(expected = "is a Compute pass")]
    fn test_callback_kind_mismatch() {
        let mut node = RgPassNode::new("blur", RgPassType::Compute);
        node.set_callback(RgPassCallback::Host(Box::new(|_: &RgRuntime<'_>| {})));
    }
}
