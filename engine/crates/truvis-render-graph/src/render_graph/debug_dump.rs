//! 调度结果的可读输出，仅在 `rg-debug` feature 下编译

use ash::vk;
use itertools::Itertools;

use super::executor::RgCompiledGraph;

impl RgCompiledGraph<'_> {
    /// 打印执行计划：调度顺序、batch 划分、每个 pass 的资源使用与 barrier
    pub fn log_schedule(&self) {
        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║              RenderGraph Execution Plan                          ║");
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!(
            "║ Total Passes: {}  |  Batches: {}  |  Order: [{}]",
            self.passes.len(),
            self.batches.len(),
            self.passes.iter().map(|pass| pass.node.name.as_str()).join(" → ")
        );
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        for (batch_idx, batch) in self.batches.iter().enumerate() {
            log::info!("");
            log::info!(
                "━━ Batch {batch_idx}: passes {:?}, {} waits, {} signals",
                batch.range,
                batch.waits.len(),
                batch.signals.len()
            );

            for order in batch.range.clone() {
                let pass = &self.passes[order];
                let node = &pass.node;

                log::info!("┌─────────────────────────────────────────────────────────────────┐");
                log::info!("│ [{}/{}] {:?} Pass: \"{}\"", order + 1, self.passes.len(), node.ty, node.name);
                log::info!("├─────────────────────────────────────────────────────────────────┤");

                for (title, uses) in [("Texture Reads", &node.texture_reads), ("Texture Writes", &node.texture_writes)] {
                    if uses.is_empty() {
                        continue;
                    }
                    log::info!("│ {title}:");
                    for texture_use in uses {
                        log::info!(
                            "│   \"{}\" @ {:?} (stage: {}, access: {})",
                            self.textures.name(texture_use.id),
                            texture_use.state.layout,
                            format_pipeline_stage(texture_use.state.stage),
                            format_access_flags(texture_use.state.access)
                        );
                    }
                }

                for (title, uses) in [("Buffer Reads", &node.buffer_reads), ("Buffer Writes", &node.buffer_writes)] {
                    if uses.is_empty() {
                        continue;
                    }
                    log::info!("│ {title}:");
                    for buffer_use in uses {
                        log::info!(
                            "│   \"{}\" (stage: {}, access: {})",
                            self.buffers.name(buffer_use.id),
                            format_pipeline_stage(buffer_use.state.stage),
                            format_access_flags(buffer_use.state.access)
                        );
                    }
                }

                let barriers = &pass.barriers;
                if barriers.has_barriers() {
                    log::info!("├─────────────────────────────────────────────────────────────────┤");
                    log::info!(
                        "│ Barriers: {} texture, {} buffer",
                        barriers.texture_barrier_count(),
                        barriers.buffer_barrier_count()
                    );

                    for barrier in &barriers.texture_barriers {
                        let layout_change = if barrier.is_layout_transition() {
                            format!("{:?} → {:?}", barrier.old_layout, barrier.new_layout)
                        } else {
                            format!("{:?} (no layout change)", barrier.old_layout)
                        };
                        log::info!("│   Texture \"{}\":", self.registry().texture(barrier.texture).name);
                        log::info!("│       Layout: {layout_change}");
                        log::info!(
                            "│       Stage:  {} → {}",
                            format_pipeline_stage(barrier.src_stage),
                            format_pipeline_stage(barrier.dst_stage)
                        );
                        log::info!(
                            "│       Access: {} → {}",
                            format_access_flags(barrier.src_access),
                            format_access_flags(barrier.dst_access)
                        );
                        log::info!("│       Aspect: {:?}", barrier.aspect);
                    }

                    for barrier in &barriers.buffer_barriers {
                        log::info!("│   Buffer \"{}\":", self.registry().buffer(barrier.buffer).name);
                        log::info!(
                            "│       Stage:  {} → {}",
                            format_pipeline_stage(barrier.src_stage),
                            format_pipeline_stage(barrier.dst_stage)
                        );
                        log::info!(
                            "│       Access: {} → {}",
                            format_access_flags(barrier.src_access),
                            format_access_flags(barrier.dst_access)
                        );
                    }
                } else {
                    log::info!("│ No barriers required");
                }

                log::info!("└─────────────────────────────────────────────────────────────────┘");
            }
        }

        log::info!("");
        log::info!("═══════════════════════ End of Execution Plan ═══════════════════════");
    }
}

const STAGE_NAMES: &[(vk::PipelineStageFlags2, &str)] = &[
    (vk::PipelineStageFlags2::TOP_OF_PIPE, "TOP_OF_PIPE"),
    (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, "BOTTOM_OF_PIPE"),
    (vk::PipelineStageFlags2::DRAW_INDIRECT, "DRAW_INDIRECT"),
    (vk::PipelineStageFlags2::VERTEX_INPUT, "VERTEX_INPUT"),
    (vk::PipelineStageFlags2::INDEX_INPUT, "INDEX_INPUT"),
    (vk::PipelineStageFlags2::VERTEX_SHADER, "VERTEX_SHADER"),
    (vk::PipelineStageFlags2::FRAGMENT_SHADER, "FRAGMENT_SHADER"),
    (vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, "EARLY_FRAGMENT_TESTS"),
    (vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS, "LATE_FRAGMENT_TESTS"),
    (vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, "COLOR_ATTACHMENT_OUTPUT"),
    (vk::PipelineStageFlags2::COMPUTE_SHADER, "COMPUTE_SHADER"),
    (vk::PipelineStageFlags2::ALL_TRANSFER, "TRANSFER"),
    (vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR, "RAY_TRACING_SHADER"),
    (vk::PipelineStageFlags2::ALL_GRAPHICS, "ALL_GRAPHICS"),
    (vk::PipelineStageFlags2::ALL_COMMANDS, "ALL_COMMANDS"),
];

const ACCESS_NAMES: &[(vk::AccessFlags2, &str)] = &[
    (vk::AccessFlags2::INDIRECT_COMMAND_READ, "INDIRECT_CMD_READ"),
    (vk::AccessFlags2::INDEX_READ, "INDEX_READ"),
    (vk::AccessFlags2::VERTEX_ATTRIBUTE_READ, "VERTEX_ATTR_READ"),
    (vk::AccessFlags2::UNIFORM_READ, "UNIFORM_READ"),
    (vk::AccessFlags2::SHADER_SAMPLED_READ, "SHADER_SAMPLED_READ"),
    (vk::AccessFlags2::SHADER_STORAGE_READ, "STORAGE_READ"),
    (vk::AccessFlags2::SHADER_STORAGE_WRITE, "STORAGE_WRITE"),
    (vk::AccessFlags2::COLOR_ATTACHMENT_READ, "COLOR_ATTACH_READ"),
    (vk::AccessFlags2::COLOR_ATTACHMENT_WRITE, "COLOR_ATTACH_WRITE"),
    (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ, "DEPTH_ATTACH_READ"),
    (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE, "DEPTH_ATTACH_WRITE"),
    (vk::AccessFlags2::TRANSFER_READ, "TRANSFER_READ"),
    (vk::AccessFlags2::TRANSFER_WRITE, "TRANSFER_WRITE"),
];

/// 格式化 PipelineStageFlags2 为可读字符串
fn format_pipeline_stage(stage: vk::PipelineStageFlags2) -> String {
    if stage == vk::PipelineStageFlags2::NONE {
        return "NONE".to_string();
    }

    let names = STAGE_NAMES.iter().filter(|(flag, _)| stage.contains(*flag)).map(|(_, name)| *name).collect_vec();
    if names.is_empty() { format!("{stage:?}") } else { names.join(" | ") }
}

/// 格式化 AccessFlags2 为可读字符串
fn format_access_flags(access: vk::AccessFlags2) -> String {
    if access == vk::AccessFlags2::NONE {
        return "NONE".to_string();
    }

    let names = ACCESS_NAMES.iter().filter(|(flag, _)| access.contains(*flag)).map(|(_, name)| *name).collect_vec();
    if names.is_empty() { format!("{access:?}") } else { names.join(" | ") }
}
