//! RenderGraph 构建器
//!
//! 每帧从 `RenderGraph::builder()` 开始：
//!
//! 1. 声明资源：`create_buffer` / `create_texture` / `import_*`
//! 2. 添加 pass：`create_pass`，通过 `RgPassBuilder` 按名字读写资源
//! 3. 编译：`build`，依次完成调度、物理资源分配、barrier 计算与 batch 划分
//! 4. 执行：`RgCompiledGraph::execute`
//!
//! 名字到逻辑版本的绑定只在构建期间存在。同一个名字每次被写入都会指向新的版本，
//! 所以读取总是拿到声明顺序上最新的版本。

use std::rc::Rc;

use anyhow::Context;
use ash::vk;
use indexmap::IndexMap;
use itertools::Itertools;
use truvis_render_interface::gfx_commands::GfxCommandRecorder;
use truvis_render_interface::gfx_device::{GfxBufferDesc, GfxBufferHeap, GfxDevice, GfxTextureDesc};
use truvis_render_interface::gfx_swapchain::GfxSwapchain;
use truvis_render_interface::handles::{GfxBufferHandle, GfxSemaphoreHandle, GfxTextureHandle};

use super::barrier::{RgBarrierSynthesizer, RgPassUses};
use super::batch::partition_batches;
use super::executor::{RgCompiledGraph, RgScheduledPass};
use super::graph::{DependencyAnalyzer, PassLinks};
use super::pass::{RgPassBuilder, RgPassCallback, RgPassNode, RgPassType, RgRuntime, RgTextureUse};
use super::persistent::RenderGraph;
use super::resource_handle::{
    RgBufferId, RgIndex, RgPassId, RgPhysicalBufferId, RgPhysicalTextureId, RgSemaphoreId, RgTextureId,
};
use super::resource_state::{RgBufferState, RgTextureState};
use super::resource_table::RgLogicalTable;

/// swapchain image 导入后的名字
pub const BACKBUFFER: &str = "backbuffer";

/// temporal texture 的初始化回调，参数是被初始化的那一层
pub type RgTextureInitCallback<'a> = Rc<dyn Fn(RgTextureId, &RgRuntime<'_>, &mut dyn GfxCommandRecorder) + 'a>;

/// 名字当前绑定的逻辑版本
struct RgNameBinding<I> {
    current: I,
    /// 只有声明资源的名字才有，`layers[k]` 是第 k 层的第一个版本
    layers: Vec<I>,
    /// 是否已经被 `write(name, name)` 原地写过
    in_place_written: bool,
}

impl<I: RgIndex> RgNameBinding<I> {
    fn declared(layers: Vec<I>) -> Self {
        Self {
            current: layers[0],
            layers,
            in_place_written: false,
        }
    }

    fn written(id: I) -> Self {
        Self {
            current: id,
            layers: Vec::new(),
            in_place_written: false,
        }
    }
}

fn resolve_read<I: RgIndex>(
    names: &IndexMap<String, RgNameBinding<I>>,
    kind: &str,
    name: &str,
    layer: usize,
    pass_name: &str,
) -> I {
    let Some(binding) = names.get(name) else {
        panic!("RenderGraph: pass \"{pass_name}\" reads unknown {kind} \"{name}\"");
    };
    if layer == 0 {
        return binding.current;
    }

    assert!(
        !binding.layers.is_empty(),
        "RenderGraph: Only the first declaration of a temporal {kind} can be used to read a previous temporal layer, \
         pass \"{pass_name}\" reads layer {layer} of \"{name}\""
    );
    assert!(
        layer < binding.layers.len(),
        "RenderGraph: temporal layer {layer} of {kind} \"{name}\" is out of range, it has {} layers",
        binding.layers.len()
    );
    binding.layers[layer]
}

/// 返回 (被写的旧版本, 新版本)
fn resolve_write<I: RgIndex, P: Copy>(
    table: &mut RgLogicalTable<I, P>,
    names: &mut IndexMap<String, RgNameBinding<I>>,
    kind: &str,
    dst: &str,
    src: &str,
    pass: RgPassId,
    pass_name: &str,
) -> (I, I) {
    let Some(src_binding) = names.get(src) else {
        panic!("RenderGraph: pass \"{pass_name}\" writes \"{dst}\" from unknown {kind} \"{src}\"");
    };
    let src_id = src_binding.current;

    if dst == src {
        assert!(
            !src_binding.in_place_written,
            "RenderGraph: {kind} \"{dst}\" is already written in place this frame, write from pass \"{pass_name}\" \
             rejected"
        );
    } else {
        assert!(
            !names.contains_key(dst),
            "RenderGraph: {kind} \"{dst}\" is already declared this frame, write from pass \"{pass_name}\" rejected"
        );
    }

    let dst_id = table.alias(dst, src_id, pass);
    match names.get_mut(dst) {
        Some(binding) => {
            binding.current = dst_id;
            binding.in_place_written = true;
        }
        None => {
            names.insert(dst.to_string(), RgNameBinding::written(dst_id));
        }
    }

    (src_id, dst_id)
}

/// 带初始化回调的 temporal texture
struct RgTemporalInit<'a> {
    name: String,
    /// 每个历史 layer 的 (根版本, 初始化写出的预留版本)
    history: Vec<(RgTextureId, RgTextureId)>,
    state: RgTextureState,
    callback: RgTextureInitCallback<'a>,
}

fn layer_name(name: &str, layer: usize) -> String {
    if layer == 0 { name.to_string() } else { format!("{name}#{layer}") }
}

/// 一帧的 RenderGraph 构建器
///
/// # 生命周期
///
/// `'a` 是 pass 回调可以借用的外部数据的生命周期，同时也借用了 `RenderGraph`。
pub struct RgBuilder<'a> {
    graph: &'a mut RenderGraph,

    buffers: RgLogicalTable<RgBufferId, RgPhysicalBufferId>,
    textures: RgLogicalTable<RgTextureId, RgPhysicalTextureId>,
    buffer_names: IndexMap<String, RgNameBinding<RgBufferId>>,
    texture_names: IndexMap<String, RgNameBinding<RgTextureId>>,
    semaphores: IndexMap<String, GfxSemaphoreHandle>,

    passes: Vec<RgPassNode<'a>>,
    /// 是否注入初始化 pass 要等所有 pass 声明完才能决定
    temporal_inits: Vec<RgTemporalInit<'a>>,
    /// present 需要 signal 的 semaphore
    present: Option<RgSemaphoreId>,
}

// new & init
impl<'a> RgBuilder<'a> {
    pub(crate) fn new(graph: &'a mut RenderGraph) -> Self {
        Self {
            graph,
            buffers: RgLogicalTable::new(),
            textures: RgLogicalTable::new(),
            buffer_names: IndexMap::new(),
            texture_names: IndexMap::new(),
            semaphores: IndexMap::new(),
            passes: Vec::new(),
            temporal_inits: Vec::new(),
            present: None,
        }
    }
}

// 资源声明
impl<'a> RgBuilder<'a> {
    fn assert_layers(&self, kind: &str, name: &str, layers: usize) {
        assert!(layers > 0, "RenderGraph: {kind} \"{name}\" needs at least one layer");
        assert!(
            layers <= self.graph.settings.max_temporal_layers,
            "RenderGraph: {kind} \"{name}\" has {layers} layers, at most {} are allowed",
            self.graph.settings.max_temporal_layers
        );
    }

    fn declare_buffer(&mut self, name: &str, layers: usize, desc: GfxBufferDesc) -> RgBufferId {
        self.assert_layers("buffer", name, layers);
        assert!(!self.buffer_names.contains_key(name), "RenderGraph: buffer \"{name}\" is already declared this frame");

        let (physicals, _) = self.graph.registry.declare_buffer(name, layers, desc);
        let ids = physicals
            .into_iter()
            .enumerate()
            .map(|(layer, physical)| self.buffers.create(layer_name(name, layer), physical))
            .collect_vec();
        let first = ids[0];
        self.buffer_names.insert(name.to_string(), RgNameBinding::declared(ids));
        first
    }

    fn declare_texture(&mut self, name: &str, layers: usize, desc: GfxTextureDesc) -> RgTextureId {
        self.assert_layers("texture", name, layers);
        assert!(!self.texture_names.contains_key(name), "RenderGraph: texture \"{name}\" is already declared this frame");

        let (physicals, _) = self.graph.registry.declare_texture(name, layers, desc);
        let ids = physicals
            .into_iter()
            .enumerate()
            .map(|(layer, physical)| self.textures.create(layer_name(name, layer), physical))
            .collect_vec();
        let first = ids[0];
        self.texture_names.insert(name.to_string(), RgNameBinding::declared(ids));
        first
    }

    /// 声明 buffer，`layers > 1` 时为 temporal 资源
    ///
    /// 返回第 0 层的第一个版本。
    pub fn create_buffer(
        &mut self,
        name: &str,
        layers: usize,
        heap: GfxBufferHeap,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
    ) -> RgBufferId {
        self.declare_buffer(name, layers, GfxBufferDesc::new(heap, size, alignment))
    }

    /// 声明 texture，`layers > 1` 时为 temporal 资源
    ///
    /// 上一帧保留下来的同名、同描述 temporal texture 会被复用，内容也会保留。
    pub fn create_texture(&mut self, name: &str, layers: usize, desc: GfxTextureDesc) -> RgTextureId {
        self.declare_texture(name, layers, desc)
    }

    /// 声明需要初始化历史的 temporal texture
    ///
    /// 历史 layer 在本帧是新的分配时（第一次声明、描述改变、或者 usage 增加导致重建），
    /// build 会为每个历史 layer 注入一个 `rg#init-<name>#<layer>` transfer pass，
    /// 以 `init_state` 写入并调用 `init`，这些 pass 排在所有用户 pass 之前。
    pub fn create_temporal_texture_with_init(
        &mut self,
        name: &str,
        layers: usize,
        desc: GfxTextureDesc,
        init_state: RgTextureState,
        init: impl Fn(RgTextureId, &RgRuntime<'_>, &mut dyn GfxCommandRecorder) + 'a,
    ) -> RgTextureId {
        assert!(layers > 1, "RenderGraph: texture \"{name}\" has no history layer to initialize");
        assert!(init_state.is_write(), "RenderGraph: init state of texture \"{name}\" must be a write");
        assert!(
            RgPassType::Transfer.allows_stage(init_state.stage),
            "RenderGraph: init state of texture \"{name}\" is not a transfer state"
        );

        let id = self.declare_texture(name, layers, desc);

        // 历史 layer 的读取总是绑定到预留版本上，是否真的有初始化 pass 写它由 build 决定
        let mut history = Vec::with_capacity(layers - 1);
        for layer in 1..layers {
            let src = self.texture_names[name].layers[layer];
            let dst = self.textures.reserve(layer_name(name, layer), src);
            self.add_texture_use(src, init_state);
            history.push((src, dst));
        }
        if let Some(binding) = self.texture_names.get_mut(name) {
            for (layer, &(_, dst)) in history.iter().enumerate() {
                binding.layers[layer + 1] = dst;
            }
        }

        self.temporal_inits.push(RgTemporalInit {
            name: name.to_string(),
            history,
            state: init_state,
            callback: Rc::new(init),
        });
        id
    }

    /// 为历史内容未定义的 temporal texture 注入初始化 pass
    fn inject_temporal_inits(&mut self) {
        for init in std::mem::take(&mut self.temporal_inits) {
            if !self.graph.registry.temporal_texture_needs_allocation(&init.name) {
                continue;
            }
            log::debug!("RenderGraph: history of temporal texture \"{}\" is new, initializing", init.name);

            for (layer, (src, dst)) in init.history.into_iter().enumerate() {
                let pass = self.push_pass(format!("rg#init-{}#{}", init.name, layer + 1), RgPassType::Transfer);
                self.textures.set_writer(src, dst, pass);

                let callback = Rc::clone(&init.callback);
                let node = self.pass_mut(pass);
                node.early = true;
                node.texture_writes.push(RgTextureUse { id: src, state: init.state });
                node.set_callback(RgPassCallback::Transfer(Box::new(
                    move |runtime: &RgRuntime<'_>, cmd: &mut dyn GfxCommandRecorder| callback(dst, runtime, cmd),
                )));
            }
        }
    }

    /// 导入外部 buffer，graph 不负责它的创建与销毁
    pub fn import_buffer(
        &mut self,
        name: &str,
        handle: GfxBufferHandle,
        desc: GfxBufferDesc,
        state: RgBufferState,
    ) -> RgBufferId {
        assert!(!self.buffer_names.contains_key(name), "RenderGraph: buffer \"{name}\" is already declared this frame");

        let physical = self.graph.registry.import_buffer(name, handle, desc, state);
        let id = self.buffers.create(name, physical);
        self.buffer_names.insert(name.to_string(), RgNameBinding::declared(vec![id]));
        id
    }

    /// 导入外部 texture，`state` 是它当前的状态
    pub fn import_texture(
        &mut self,
        name: &str,
        handle: GfxTextureHandle,
        desc: GfxTextureDesc,
        state: RgTextureState,
    ) -> RgTextureId {
        assert!(!self.texture_names.contains_key(name), "RenderGraph: texture \"{name}\" is already declared this frame");

        let physical = self.graph.registry.import_texture(name, handle, desc, state);
        let id = self.textures.create(name, physical);
        self.texture_names.insert(name.to_string(), RgNameBinding::declared(vec![id]));
        id
    }

    pub fn import_semaphore(&mut self, name: &str, handle: GfxSemaphoreHandle) -> RgSemaphoreId {
        let (index, old) = self.semaphores.insert_full(name.to_string(), handle);
        assert!(old.is_none(), "RenderGraph: semaphore \"{name}\" is already imported this frame");
        RgSemaphoreId::from_index(index)
    }
}

// pass
impl<'a> RgBuilder<'a> {
    fn push_pass(&mut self, name: impl Into<String>, ty: RgPassType) -> RgPassId {
        let id = RgPassId::from_index(self.passes.len());
        self.passes.push(RgPassNode::new(name, ty));
        id
    }

    /// 添加 pass，按声明顺序编号
    pub fn create_pass(&mut self, name: impl Into<String>, ty: RgPassType) -> RgPassBuilder<'_, 'a> {
        let pass = self.push_pass(name, ty);
        RgPassBuilder { builder: self, pass }
    }

    #[inline]
    pub(crate) fn pass_mut(&mut self, pass: RgPassId) -> &mut RgPassNode<'a> {
        &mut self.passes[pass.index()]
    }

    /// 把 `src` 的内容 blit 到 swapchain image 上并呈现
    ///
    /// 立即 acquire swapchain image，导入为 `backbuffer`，然后追加两个 pass：
    /// - `present-blit`：等待 acquire semaphore，blit 到 backbuffer
    /// - `present`：把 backbuffer 转换到 present layout，signal present semaphore
    ///
    /// `RgCompiledGraph::execute` 在提交之后调用 `GfxSwapchain::present`。
    pub fn present(&mut self, swapchain: &mut dyn GfxSwapchain, src: &str) -> anyhow::Result<()> {
        assert!(self.present.is_none(), "RenderGraph: present is requested twice in one frame");

        let acquire_semaphore = self.import_semaphore("swapchain-acquire", swapchain.acquire_semaphore());
        let present_semaphore = self.import_semaphore("swapchain-present", swapchain.present_semaphore());

        let image = swapchain
            .acquire_texture(swapchain.acquire_semaphore())
            .context("RenderGraph: failed to acquire swapchain image")?;
        let extent = swapchain.extent();
        let desc =
            GfxTextureDesc::new_2d(extent.width, extent.height, swapchain.format()).with_usage(swapchain.usage());
        self.import_texture(BACKBUFFER, image, desc, RgTextureState::UNDEFINED);

        let mut blit = self.create_pass("present-blit", RgPassType::Transfer);
        blit.wait_semaphore(acquire_semaphore, vk::PipelineStageFlags2::ALL_TRANSFER, None);
        let src_id = blit.read_texture(src, RgTextureState::TRANSFER_SRC);
        let dst_id = blit.write_texture(BACKBUFFER, BACKBUFFER, RgTextureState::TRANSFER_DST);
        blit.set_transfer_callback(move |runtime, cmd| {
            let (Some(src), Some(dst)) = (runtime.get_texture(src_id), runtime.get_texture(dst_id)) else {
                panic!("RenderGraph: present-blit from {src_id:?} to {dst_id:?} has no allocation");
            };
            cmd.blit_texture(src, dst, vk::Filter::LINEAR);
        });

        let mut present = self.create_pass("present", RgPassType::Transfer);
        present.read_texture(BACKBUFFER, RgTextureState::PRESENT);
        present.signal_semaphore(present_semaphore, vk::PipelineStageFlags2::ALL_COMMANDS, None);
        present.set_transfer_callback(|_, _| {});

        self.present = Some(present_semaphore);
        Ok(())
    }
}

// 供 RgPassBuilder 使用的名字解析
impl<'a> RgBuilder<'a> {
    pub(crate) fn resolve_buffer_read(&self, pass: RgPassId, name: &str, layer: usize) -> RgBufferId {
        resolve_read(&self.buffer_names, "buffer", name, layer, &self.passes[pass.index()].name)
    }

    pub(crate) fn resolve_texture_read(&self, pass: RgPassId, name: &str, layer: usize) -> RgTextureId {
        resolve_read(&self.texture_names, "texture", name, layer, &self.passes[pass.index()].name)
    }

    pub(crate) fn resolve_buffer_write(&mut self, pass: RgPassId, dst: &str, src: &str) -> (RgBufferId, RgBufferId) {
        let pass_name = &self.passes[pass.index()].name;
        resolve_write(&mut self.buffers, &mut self.buffer_names, "buffer", dst, src, pass, pass_name)
    }

    pub(crate) fn resolve_texture_write(
        &mut self,
        pass: RgPassId,
        dst: &str,
        src: &str,
    ) -> (RgTextureId, RgTextureId) {
        let pass_name = &self.passes[pass.index()].name;
        resolve_write(&mut self.textures, &mut self.texture_names, "texture", dst, src, pass, pass_name)
    }

    /// 单层 buffer，由 `pass` 写出第一个版本，返回 (根版本, 新版本)
    pub(crate) fn create_buffer_in_pass(
        &mut self,
        pass: RgPassId,
        name: &str,
        desc: GfxBufferDesc,
    ) -> (RgBufferId, RgBufferId) {
        let root = self.declare_buffer(name, 1, desc);
        let id = self.buffers.alias(name, root, pass);
        if let Some(binding) = self.buffer_names.get_mut(name) {
            binding.current = id;
        }
        (root, id)
    }

    pub(crate) fn create_texture_in_pass(
        &mut self,
        pass: RgPassId,
        name: &str,
        desc: GfxTextureDesc,
    ) -> (RgTextureId, RgTextureId) {
        let root = self.declare_texture(name, 1, desc);
        let id = self.textures.alias(name, root, pass);
        if let Some(binding) = self.texture_names.get_mut(name) {
            binding.current = id;
        }
        (root, id)
    }

    /// 把使用的 usage 累积到物理资源上
    pub(crate) fn add_buffer_use(&mut self, id: RgBufferId, state: RgBufferState) {
        let physical = self.buffers.resolved(id);
        self.graph.registry.buffer_mut(physical).add_use(state);
    }

    pub(crate) fn add_texture_use(&mut self, id: RgTextureId, state: RgTextureState) {
        let physical = self.textures.resolved(id);
        self.graph.registry.texture_mut(physical).add_use(state);
    }
}

// build
impl<'a> RgBuilder<'a> {
    /// 编译本帧的 graph
    ///
    /// 调度、分配物理资源、计算 barrier、划分 batch。
    /// 分配失败时放弃本帧并返回错误。
    ///
    /// # Panics
    /// - 有 pass 没有设置回调
    /// - 检测到循环依赖
    pub fn build(mut self, device: &mut dyn GfxDevice) -> anyhow::Result<RgCompiledGraph<'a>> {
        let _span = tracy_client::span!("RgBuilder::build");

        self.inject_temporal_inits();

        let RgBuilder {
            graph,
            mut buffers,
            mut textures,
            semaphores,
            passes,
            present,
            ..
        } = self;

        for pass in &passes {
            assert!(pass.callback.is_some(), "RenderGraph: callback of pass \"{}\" is not set", pass.name);
        }

        // 依赖分析与调度
        let links = passes
            .iter()
            .map(|pass| {
                let buffer_defs = pass.buffer_reads.iter().chain(&pass.buffer_writes).filter_map(|u| buffers.def(u.id));
                let texture_defs =
                    pass.texture_reads.iter().chain(&pass.texture_writes).filter_map(|u| textures.def(u.id));
                let buffer_kills = pass.buffer_reads.iter().filter_map(|u| buffers.kill(u.id));
                let texture_kills = pass.texture_reads.iter().filter_map(|u| textures.kill(u.id));

                PassLinks {
                    dependencies: buffer_defs.chain(texture_defs).map(|p| p.index()).collect(),
                    dependents: buffer_kills.chain(texture_kills).map(|p| p.index()).collect(),
                }
            })
            .collect_vec();

        let mut dep_graph = DependencyAnalyzer::analyze(&links);
        for (pass_idx, pass) in passes.iter().enumerate() {
            if pass.early {
                dep_graph.mark_early(pass_idx);
            }
        }
        let schedule = dep_graph.schedule().unwrap_or_else(|cycle| {
            let cycle_names = cycle.iter().map(|&i| passes[i].name.as_str()).collect_vec();
            panic!("RenderGraph: cycle detected involving passes: {cycle_names:?}");
        });

        // 物理资源
        let frame_id = graph.frame_counter.frame_id();
        if let Err(err) = graph.registry.allocate(device, frame_id) {
            graph.registry.abandon_frame();
            return Err(err);
        }

        buffers.compress_all();
        textures.compress_all();

        // barrier
        let uses = passes
            .iter()
            .map(|pass| RgPassUses {
                buffer_reads: pass.buffer_reads.iter().map(|u| (buffers.resolved(u.id), u.state)).collect(),
                buffer_writes: pass.buffer_writes.iter().map(|u| (buffers.resolved(u.id), u.state)).collect(),
                texture_reads: pass.texture_reads.iter().map(|u| (textures.resolved(u.id), u.state)).collect(),
                texture_writes: pass.texture_writes.iter().map(|u| (textures.resolved(u.id), u.state)).collect(),
            })
            .collect_vec();
        let barriers = RgBarrierSynthesizer::new(&mut graph.registry).synthesize(&schedule, &uses);

        // 按调度顺序排列
        let mut order = vec![0; passes.len()];
        for (position, &pass_idx) in schedule.iter().enumerate() {
            order[pass_idx] = position;
        }
        let scheduled = passes
            .into_iter()
            .zip(barriers)
            .enumerate()
            .sorted_by_key(|(pass_idx, _)| order[*pass_idx])
            .map(|(_, (node, barriers))| RgScheduledPass { node, barriers })
            .collect_vec();

        let syncs = scheduled.iter().map(|p| (p.node.waits.as_slice(), p.node.signals.as_slice())).collect_vec();
        let batches = partition_batches(&syncs);

        log::debug!(
            "RenderGraph: {} built, {} passes in {} batches",
            graph.frame_counter.frame_name(),
            scheduled.len(),
            batches.len()
        );

        let dump_schedule = graph.settings.dump_schedule;
        let compiled = RgCompiledGraph {
            graph,
            buffers,
            textures,
            passes: scheduled,
            batches,
            semaphores,
            present,
        };
        if dump_schedule {
            #[cfg(feature = "rg-debug")]
            compiled.log_schedule();
            #[cfg(not(feature = "rg-debug"))]
            log::debug!("RenderGraph: dump_schedule is ignored without feature \"rg-debug\"");
        }
        Ok(compiled)
    }
}
