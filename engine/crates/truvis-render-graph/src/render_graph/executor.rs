//! 编译后的 RenderGraph 与执行
//!
//! `RgCompiledGraph` 持有按调度顺序排列的 pass、每个 pass 的 barrier 以及 batch 划分。
//! `execute` 按 batch 录制、提交，然后 present 并处理跨帧资源。

use anyhow::Context;
use ash::vk;
use indexmap::IndexMap;
use itertools::Itertools;
use truvis_render_interface::gfx_commands::{
    GfxCommandRecorder, GfxQueue, GfxRenderingAttachment, GfxRenderingInfo, GfxSemaphoreSubmit,
};
use truvis_render_interface::gfx_device::GfxDevice;
use truvis_render_interface::gfx_swapchain::GfxSwapchain;
use truvis_render_interface::handles::{GfxSemaphoreHandle, GfxTextureHandle};

use super::barrier::RgPassBarriers;
use super::batch::RgBatch;
use super::pass::{RgAttachment, RgPassCallback, RgPassNode, RgPassType, RgRuntime};
use super::persistent::RenderGraph;
use super::resource_handle::{
    RgBufferId, RgIndex, RgPhysicalBufferId, RgPhysicalTextureId, RgSemaphoreId, RgTextureId,
};
use super::resource_registry::RgResourceRegistry;
use super::resource_table::RgLogicalTable;
use super::semaphore_info::RgSemaphoreInfo;

/// 已调度的 pass 和它执行前需要的 barrier
pub struct RgScheduledPass<'a> {
    pub node: RgPassNode<'a>,
    pub barriers: RgPassBarriers,
}

/// 编译后的 RenderGraph，只能执行一次
pub struct RgCompiledGraph<'a> {
    pub(crate) graph: &'a mut RenderGraph,

    pub(crate) buffers: RgLogicalTable<RgBufferId, RgPhysicalBufferId>,
    pub(crate) textures: RgLogicalTable<RgTextureId, RgPhysicalTextureId>,

    /// 按调度顺序
    pub(crate) passes: Vec<RgScheduledPass<'a>>,
    pub(crate) batches: Vec<RgBatch>,

    pub(crate) semaphores: IndexMap<String, GfxSemaphoreHandle>,
    pub(crate) present: Option<RgSemaphoreId>,
}

// getters
impl<'a> RgCompiledGraph<'a> {
    /// 按执行顺序返回 pass 名字
    pub fn schedule(&self) -> Vec<&str> {
        self.passes.iter().map(|pass| pass.node.name.as_str()).collect()
    }

    #[inline]
    pub fn batches(&self) -> &[RgBatch] {
        &self.batches
    }

    /// 指定 pass 执行前的 barrier
    pub fn barriers(&self, pass_name: &str) -> Option<&RgPassBarriers> {
        self.passes.iter().find(|pass| pass.node.name == pass_name).map(|pass| &pass.barriers)
    }

    #[inline]
    pub fn passes(&self) -> &[RgScheduledPass<'a>] {
        &self.passes
    }

    #[inline]
    pub fn buffer_physical(&self, id: RgBufferId) -> RgPhysicalBufferId {
        self.buffers.resolved(id)
    }

    #[inline]
    pub fn texture_physical(&self, id: RgTextureId) -> RgPhysicalTextureId {
        self.textures.resolved(id)
    }

    /// 逻辑 texture 对应的设备句柄
    pub fn texture_handle(&self, id: RgTextureId) -> Option<GfxTextureHandle> {
        self.graph.registry.texture(self.textures.resolved(id)).handle
    }

    #[inline]
    pub fn registry(&self) -> &RgResourceRegistry {
        &self.graph.registry
    }

    #[inline]
    pub fn semaphore_handle(&self, id: RgSemaphoreId) -> Option<GfxSemaphoreHandle> {
        self.semaphores.get_index(id.index()).map(|(_, handle)| *handle)
    }
}

// execute
impl<'a> RgCompiledGraph<'a> {
    /// 录制并提交所有 batch
    ///
    /// 提交完成后，如果请求过 present 则调用 `swapchain.present`，
    /// 然后释放本帧的 transient 资源、轮换 temporal 资源，并推进帧计数。
    ///
    /// # Panics
    /// 请求过 present 但没有传入 swapchain。
    pub fn execute<Q: GfxQueue>(
        self,
        device: &mut dyn GfxDevice,
        queue: &mut Q,
        swapchain: Option<&mut dyn GfxSwapchain>,
    ) -> anyhow::Result<()> {
        let _span = tracy_client::span!("RgCompiledGraph::execute");

        let RgCompiledGraph {
            graph,
            buffers,
            textures,
            passes,
            batches,
            semaphores,
            present,
        } = self;

        assert!(
            present.is_none() || swapchain.is_some(),
            "RenderGraph: present is requested but no swapchain is passed to execute"
        );

        let to_submit = |info: &RgSemaphoreInfo| -> anyhow::Result<GfxSemaphoreSubmit> {
            let (name, handle) = semaphores
                .get_index(info.semaphore.index())
                .with_context(|| format!("RenderGraph: unknown semaphore {:?}", info.semaphore))?;
            log::trace!("RenderGraph: semaphore \"{name}\" at {:?}", info.stage);
            Ok(GfxSemaphoreSubmit {
                semaphore: *handle,
                stage: info.stage,
                value: info.value,
            })
        };

        let runtime = RgRuntime {
            buffers: &buffers,
            textures: &textures,
            registry: &graph.registry,
            device: &*device,
        };

        let mut pass_iter = passes.into_iter();
        for (batch_idx, batch) in batches.iter().enumerate() {
            let _span = tracy_client::span!("RgCompiledGraph::batch");

            let mut command_buffer: Option<Q::CommandBuffer> = None;
            for RgScheduledPass { mut node, barriers } in pass_iter.by_ref().take(batch.len()) {
                let _span = tracy_client::span!("RgCompiledGraph::pass");

                let Some(callback) = node.callback.take() else {
                    panic!("RenderGraph: callback of pass \"{}\" is not set", node.name);
                };

                // host pass 没有 barrier 时不需要 command buffer
                if !node.ty.records_commands() && !barriers.has_barriers() {
                    if let RgPassCallback::Host(callback) = callback {
                        callback(&runtime);
                    }
                    continue;
                }

                let mut cmd = match command_buffer.take() {
                    Some(cmd) => cmd,
                    None => queue
                        .allocate_command_buffer(&format!("rg-batch-{batch_idx}"))
                        .with_context(|| format!("RenderGraph: failed to allocate command buffer of batch {batch_idx}"))?,
                };

                record_barriers(&mut cmd, &barriers, &graph.registry)
                    .with_context(|| format!("RenderGraph: pass \"{}\"", node.name))?;
                cmd.begin_label(&node.name);

                match callback {
                    RgPassCallback::Host(callback) => callback(&runtime),
                    RgPassCallback::Graphics(callback) => {
                        let rendering = node.has_attachments();
                        if rendering {
                            let info = rendering_info(&node, &runtime)
                                .with_context(|| format!("RenderGraph: pass \"{}\"", node.name))?;
                            cmd.begin_rendering(&info);
                        }
                        callback(&runtime, &mut cmd);
                        if rendering {
                            cmd.end_rendering();
                        }
                    }
                    RgPassCallback::Compute(callback) | RgPassCallback::Transfer(callback) => {
                        callback(&runtime, &mut cmd);
                    }
                }
                cmd.end_label();

                command_buffer = Some(cmd);
            }

            let command_buffers = command_buffer.into_iter().collect_vec();
            if command_buffers.is_empty() && batch.waits.is_empty() && batch.signals.is_empty() {
                continue;
            }

            let waits = batch.waits.iter().map(to_submit).collect::<anyhow::Result<Vec<_>>>()?;
            let signals = batch.signals.iter().map(to_submit).collect::<anyhow::Result<Vec<_>>>()?;
            queue
                .submit(command_buffers, &waits, &signals)
                .with_context(|| format!("RenderGraph: failed to submit batch {batch_idx}"))?;
        }

        if let Some(present_semaphore) = present
            && let Some(swapchain) = swapchain
        {
            let (_, &handle) = semaphores
                .get_index(present_semaphore.index())
                .context("RenderGraph: present semaphore is not imported")?;
            swapchain.present(handle).context("RenderGraph: failed to present")?;
        }

        let frame_id = graph.frame_counter.frame_id();
        graph.registry.retire_frame(device, frame_id);
        graph.frame_counter.next_frame();

        Ok(())
    }
}

fn record_barriers(
    cmd: &mut dyn GfxCommandRecorder,
    barriers: &RgPassBarriers,
    registry: &RgResourceRegistry,
) -> anyhow::Result<()> {
    if !barriers.has_barriers() {
        return Ok(());
    }

    let texture_barriers = barriers
        .texture_barriers
        .iter()
        .map(|barrier| {
            let texture = registry.texture(barrier.texture);
            let handle = texture
                .handle
                .with_context(|| format!("texture \"{}\" has no allocation", texture.name))?;
            anyhow::Ok(barrier.to_gfx_barrier(handle))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let buffer_barriers = barriers
        .buffer_barriers
        .iter()
        .map(|barrier| {
            let buffer = registry.buffer(barrier.buffer);
            let handle = buffer.handle.with_context(|| format!("buffer \"{}\" has no allocation", buffer.name))?;
            anyhow::Ok(barrier.to_gfx_barrier(handle))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    cmd.pipeline_barrier(&buffer_barriers, &texture_barriers);
    Ok(())
}

fn rendering_info(node: &RgPassNode<'_>, runtime: &RgRuntime<'_>) -> anyhow::Result<GfxRenderingInfo> {
    debug_assert_eq!(node.ty, RgPassType::Graphics);

    let to_gfx = |attachment: &RgAttachment| -> anyhow::Result<GfxRenderingAttachment> {
        let texture = runtime
            .get_texture(attachment.texture)
            .with_context(|| format!("attachment {:?} has no allocation", attachment.texture))?;
        Ok(GfxRenderingAttachment {
            texture,
            layout: attachment.layout,
            load_op: attachment.ops.load_op,
            store_op: attachment.ops.store_op,
            clear_value: attachment.ops.clear_value,
        })
    };

    // render area 取第一个 attachment 的大小
    let render_area = node
        .color_attachments
        .first()
        .or(node.depth_attachment.as_ref())
        .map(|attachment| {
            let extent = runtime.registry.texture(runtime.textures.resolved(attachment.texture)).desc.extent;
            vk::Extent2D {
                width: extent.width,
                height: extent.height,
            }
        })
        .unwrap_or_default();

    Ok(GfxRenderingInfo {
        render_area,
        color_attachments: node.color_attachments.iter().map(to_gfx).collect::<anyhow::Result<_>>()?,
        depth_attachment: node.depth_attachment.as_ref().map(to_gfx).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use truvis_render_interface::gfx_device::{GfxBufferHeap, GfxTextureDesc};
    use truvis_render_interface::headless::{HeadlessCommand, HeadlessDevice, HeadlessQueue, HeadlessSwapchain};

    use super::*;
    use crate::render_graph::builder::BACKBUFFER;
    use crate::render_graph::pass::RgAttachmentOps;
    use crate::render_graph::resource_state::{RgBufferState, RgTextureState};

    fn color_desc() -> GfxTextureDesc {
        GfxTextureDesc::new_2d(320, 180, vk::Format::R8G8B8A8_UNORM)
    }

    #[test]
    fn test_acquire_blit_present_one_batch() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut queue = HeadlessQueue::new();
        let acquire = device.create_semaphore("acquire");
        let present = device.create_semaphore("present");
        let swapchain_desc = color_desc().with_usage(vk::ImageUsageFlags::TRANSFER_DST);
        let swapchain_image = device.create_texture(&swapchain_desc, "swapchain").unwrap();

        let mut graph = RenderGraph::default();
        let mut builder = graph.builder();
        let acquire = builder.import_semaphore("acquire", acquire);
        let present = builder.import_semaphore("present", present);
        builder.import_texture("swapchain", swapchain_image, swapchain_desc, RgTextureState::UNDEFINED);
        builder.create_texture("scene", 1, color_desc());

        let mut pass = builder.create_pass("acquire", RgPassType::Transfer);
        pass.wait_semaphore(acquire, vk::PipelineStageFlags2::ALL_TRANSFER, None);
        pass.write_texture("scene", "scene", RgTextureState::TRANSFER_DST);
        pass.set_transfer_callback(|_, _| {});

        let mut pass = builder.create_pass("blit", RgPassType::Transfer);
        pass.read_texture("scene", RgTextureState::TRANSFER_SRC);
        pass.write_texture("swapchain", "swapchain", RgTextureState::TRANSFER_DST);
        pass.set_transfer_callback(|_, _| {});

        let mut pass = builder.create_pass("present", RgPassType::Transfer);
        pass.read_texture("swapchain", RgTextureState::PRESENT);
        pass.signal_semaphore(present, vk::PipelineStageFlags2::ALL_COMMANDS, None);
        pass.set_transfer_callback(|_, _| {});

        let compiled = builder.build(&mut device).unwrap();
        assert_eq!(compiled.schedule(), vec!["acquire", "blit", "present"]);
        assert_eq!(compiled.batches().len(), 1);
        compiled.execute(&mut device, &mut queue, None).unwrap();

        assert_eq!(queue.submissions.len(), 1);
        let submission = &queue.submissions[0];
        assert_eq!(submission.command_buffers.len(), 1);
        assert_eq!(submission.wait_semaphores.len(), 1);
        assert_eq!(submission.signal_semaphores.len(), 1);
        assert_eq!(queue.executed_labels(), vec!["acquire", "blit", "present"]);
    }

    #[test]
    fn test_present_through_builder() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut queue = HeadlessQueue::new();
        let mut swapchain =
            HeadlessSwapchain::new(&mut device, vk::Extent2D { width: 320, height: 180 }, vk::Format::B8G8R8A8_UNORM, 2);

        let mut graph = RenderGraph::default();
        for _ in 0..3 {
            let mut builder = graph.builder();
            let mut pass = builder.create_pass("draw", RgPassType::Graphics);
            pass.create_color_attachment("color", color_desc(), RgAttachmentOps::clear_color([0.0; 4]));
            pass.set_graphics_callback(|_, _| {});
            builder.present(&mut swapchain, "color").unwrap();

            let compiled = builder.build(&mut device).unwrap();
            assert_eq!(compiled.schedule(), vec!["draw", "present-blit", "present"]);
            let barriers = compiled.barriers("present").unwrap();
            assert_eq!(barriers.texture_barriers[0].new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
            assert!(compiled.registry().texture_count() >= 2);

            compiled.execute(&mut device, &mut queue, Some(&mut swapchain)).unwrap();
            device.cleanup(graph.frame_counter());
        }

        // 每帧两个 batch：draw | present-blit, present
        assert_eq!(swapchain.presented.len(), 3);
        assert_eq!(queue.submissions.len(), 6);
        assert_eq!(queue.submissions[1].wait_semaphores.len(), 1);
        assert_eq!(queue.submissions[1].signal_semaphores.len(), 1);
        let blits = queue.submissions[1].command_buffers[0]
            .commands
            .iter()
            .filter(|cmd| matches!(cmd, HeadlessCommand::Blit { .. }))
            .count();
        assert_eq!(blits, 1);
        assert_eq!(BACKBUFFER, "backbuffer");
    }

    #[test]
    #[should_panic(expected = "no swapchain is passed")]
    fn test_present_without_swapchain() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut queue = HeadlessQueue::new();
        let mut swapchain =
            HeadlessSwapchain::new(&mut device, vk::Extent2D { width: 8, height: 8 }, vk::Format::B8G8R8A8_UNORM, 1);

        let mut graph = RenderGraph::default();
        let mut builder = graph.builder();
        builder.create_texture("color", 1, color_desc());
        let mut pass = builder.create_pass("clear", RgPassType::Transfer);
        pass.write_texture("color", "color", RgTextureState::TRANSFER_DST);
        pass.set_transfer_callback(|_, _| {});
        builder.present(&mut swapchain, "color").unwrap();

        let compiled = builder.build(&mut device).unwrap();
        let _ = compiled.execute(&mut device, &mut queue, None);
    }

    #[test]
    fn test_temporal_kept_transient_released() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut queue = HeadlessQueue::new();
        let mut graph = RenderGraph::default();

        // 第一帧
        let mut builder = graph.builder();
        builder.create_texture("history", 2, color_desc());
        let mut pass = builder.create_pass("accumulate", RgPassType::Compute);
        pass.read_texture_layer("history", RgTextureState::SHADER_READ_COMPUTE, 1);
        let written = pass.write_texture("history", "history", RgTextureState::STORAGE_WRITE_COMPUTE);
        pass.create_texture("scratch", color_desc(), RgTextureState::STORAGE_WRITE_COMPUTE);
        pass.set_compute_callback(|_, _| {});

        let compiled = builder.build(&mut device).unwrap();
        let written_physical = compiled.texture_physical(written);
        let written_handle = compiled.texture_handle(written).unwrap();
        compiled.execute(&mut device, &mut queue, None).unwrap();

        assert_eq!(graph.registry().texture_count(), 2);
        assert_eq!(graph.registry().temporal_texture_layers("history").unwrap()[1], written_physical);
        assert_eq!(device.pending_destroy_count(), 1);

        // 第二帧读到上一帧写入的内容
        let mut builder = graph.builder();
        builder.create_texture("history", 2, color_desc());
        let mut pass = builder.create_pass("accumulate", RgPassType::Compute);
        let previous = pass.read_texture_layer("history", RgTextureState::SHADER_READ_COMPUTE, 1);
        pass.write_texture("history", "history", RgTextureState::STORAGE_WRITE_COMPUTE);
        pass.set_compute_callback(|_, _| {});

        let compiled = builder.build(&mut device).unwrap();
        assert_eq!(compiled.texture_physical(previous), written_physical);
        assert_eq!(compiled.texture_handle(previous), Some(written_handle));
        compiled.execute(&mut device, &mut queue, None).unwrap();

        // 第三帧不再声明，temporal 资源被释放
        let compiled = graph.builder().build(&mut device).unwrap();
        compiled.execute(&mut device, &mut queue, None).unwrap();
        assert_eq!(graph.registry().texture_count(), 0);
        assert!(device.is_texture_pending_destroy(written_handle));
    }

    #[test]
    fn test_init_passes_only_on_fresh_history() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut queue = HeadlessQueue::new();
        let mut graph = RenderGraph::default();
        let initialized = RefCell::new(Vec::new());

        for frame in 0..2 {
            let mut builder = graph.builder();
            builder.create_texture("scene", 1, color_desc());
            builder.create_temporal_texture_with_init(
                "taa",
                3,
                color_desc(),
                RgTextureState::TRANSFER_DST,
                |id, runtime, _| initialized.borrow_mut().push(runtime.get_texture(id)),
            );

            let mut pass = builder.create_pass("scene", RgPassType::Compute);
            pass.write_texture("scene", "scene", RgTextureState::STORAGE_WRITE_COMPUTE);
            pass.set_compute_callback(|_, _| {});

            let mut pass = builder.create_pass("taa", RgPassType::Compute);
            pass.read_texture("scene", RgTextureState::SHADER_READ_COMPUTE);
            pass.read_texture_layer("taa", RgTextureState::SHADER_READ_COMPUTE, 1);
            pass.read_texture_layer("taa", RgTextureState::SHADER_READ_COMPUTE, 2);
            pass.write_texture("taa", "taa", RgTextureState::STORAGE_WRITE_COMPUTE);
            pass.set_compute_callback(|_, _| {});

            let compiled = builder.build(&mut device).unwrap();
            if frame == 0 {
                assert_eq!(compiled.schedule(), vec!["rg#init-taa#1", "rg#init-taa#2", "scene", "taa"]);
                let barriers = compiled.barriers("taa").unwrap();
                assert!(
                    barriers
                        .texture_barriers
                        .iter()
                        .any(|b| b.old_layout == vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                );
            } else {
                assert_eq!(compiled.schedule(), vec!["scene", "taa"]);
            }
            compiled.execute(&mut device, &mut queue, None).unwrap();
        }

        let initialized = initialized.into_inner();
        assert_eq!(initialized.len(), 2);
        assert!(initialized.iter().all(Option::is_some));
    }

    #[test]
    fn test_history_reinitialized_after_reallocation() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut queue = HeadlessQueue::new();
        let mut graph = RenderGraph::default();
        let initialized = RefCell::new(Vec::new());

        for frame in 0..3 {
            let mut builder = graph.builder();
            builder.create_temporal_texture_with_init(
                "taa",
                2,
                color_desc(),
                RgTextureState::TRANSFER_DST,
                |id, runtime, _| initialized.borrow_mut().push(runtime.get_texture(id)),
            );

            let mut pass = builder.create_pass("taa", RgPassType::Compute);
            pass.read_texture_layer("taa", RgTextureState::SHADER_READ_COMPUTE, 1);
            pass.write_texture("taa", "taa", RgTextureState::STORAGE_WRITE_COMPUTE);
            pass.set_compute_callback(|_, _| {});

            // 从第二帧开始多了一个 transfer 读取，整组 usage 增加
            if frame > 0 {
                let mut pass = builder.create_pass("debug-copy", RgPassType::Transfer);
                pass.read_texture("taa", RgTextureState::TRANSFER_SRC);
                pass.set_transfer_callback(|_, _| {});
            }

            let compiled = builder.build(&mut device).unwrap();
            match frame {
                0 => assert_eq!(compiled.schedule(), vec!["rg#init-taa#1", "taa"]),
                1 => {
                    assert_eq!(compiled.schedule(), vec!["rg#init-taa#1", "taa", "debug-copy"]);
                    let barriers = compiled.barriers("taa").unwrap();
                    assert!(
                        barriers
                            .texture_barriers
                            .iter()
                            .any(|b| b.old_layout == vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    );
                }
                _ => assert_eq!(compiled.schedule(), vec!["taa", "debug-copy"]),
            }
            compiled.execute(&mut device, &mut queue, None).unwrap();
        }

        let initialized = initialized.into_inner();
        assert_eq!(initialized.len(), 2);
        assert_ne!(initialized[0], initialized[1]);
    }

    #[test]
    fn test_dropped_frame_reinitializes_history() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut queue = HeadlessQueue::new();
        let mut graph = RenderGraph::default();

        for execute in [false, true] {
            let mut builder = graph.builder();
            builder.create_temporal_texture_with_init(
                "history",
                2,
                color_desc(),
                RgTextureState::TRANSFER_DST,
                |_, _, _| {},
            );
            let mut pass = builder.create_pass("accumulate", RgPassType::Compute);
            pass.read_texture_layer("history", RgTextureState::SHADER_READ_COMPUTE, 1);
            pass.write_texture("history", "history", RgTextureState::STORAGE_WRITE_COMPUTE);
            pass.set_compute_callback(|_, _| {});

            // 没有执行的帧不算数，下一帧的历史仍然要初始化
            let compiled = builder.build(&mut device).unwrap();
            assert_eq!(compiled.schedule(), vec!["rg#init-history#1", "accumulate"]);
            if execute {
                compiled.execute(&mut device, &mut queue, None).unwrap();
            }
        }

        assert!(!graph.registry().is_frame_open());
        assert_eq!(graph.registry().texture_count(), 2);
        assert_eq!(device.pending_destroy_count(), 2);
    }

    #[test]
    fn test_host_pass_needs_no_command_buffer() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut queue = HeadlessQueue::new();
        let mut graph = RenderGraph::default();
        let uploaded = RefCell::new(false);

        let mut builder = graph.builder();
        let mut pass = builder.create_pass("upload", RgPassType::Host);
        let constants = pass.create_buffer("constants", GfxBufferHeap::Upload, 256, 16, RgBufferState::HOST);
        let flag = &uploaded;
        pass.set_host_callback(move |runtime| {
            *flag.borrow_mut() = runtime.get_buffer_view(constants).is_some();
        });

        let compiled = builder.build(&mut device).unwrap();
        compiled.execute(&mut device, &mut queue, None).unwrap();
        assert!(queue.submissions.is_empty());
        assert!(*uploaded.borrow());
    }

    #[test]
    fn test_rendering_info_from_attachments() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut queue = HeadlessQueue::new();
        let mut graph = RenderGraph::default();

        let mut builder = graph.builder();
        let mut pass = builder.create_pass("gbuffer", RgPassType::Graphics);
        pass.create_color_attachment("albedo", color_desc(), RgAttachmentOps::clear_color([0.0, 0.0, 0.0, 1.0]));
        pass.create_texture(
            "depth",
            GfxTextureDesc::new_2d(320, 180, vk::Format::D32_SFLOAT),
            RgTextureState::DEPTH_ATTACHMENT_WRITE,
        );
        pass.set_graphics_callback(|_, _| {});

        let mut pass = builder.create_pass("forward", RgPassType::Graphics);
        pass.write_color_attachment("lit", "albedo", RgAttachmentOps::load());
        pass.read_depth_attachment("depth");
        pass.set_graphics_callback(|_, _| {});

        builder.build(&mut device).unwrap().execute(&mut device, &mut queue, None).unwrap();

        let commands = &queue.submissions[0].command_buffers[0].commands;
        let infos = commands
            .iter()
            .filter_map(|cmd| match cmd {
                HeadlessCommand::BeginRendering(info) => Some(info),
                _ => None,
            })
            .collect_vec();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].render_area, vk::Extent2D { width: 320, height: 180 });
        assert_eq!(infos[1].color_attachments[0].load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(
            infos[1].depth_attachment.map(|d| d.layout),
            Some(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)
        );
    }

    #[test]
    fn test_submit_failure_is_reported() {
        let _client = tracy_client::Client::start();
        let mut device = HeadlessDevice::new();
        let mut queue = HeadlessQueue::new();
        queue.set_fail_submit(true);
        let mut graph = RenderGraph::default();

        let mut builder = graph.builder();
        let mut pass = builder.create_pass("clear", RgPassType::Transfer);
        pass.create_texture("color", color_desc(), RgTextureState::TRANSFER_DST);
        pass.set_transfer_callback(|_, _| {});

        let err = builder.build(&mut device).unwrap().execute(&mut device, &mut queue, None).unwrap_err();
        assert!(format!("{err:#}").contains("failed to submit batch 0"));
    }
}
