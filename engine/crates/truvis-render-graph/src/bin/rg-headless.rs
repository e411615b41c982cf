//! 在 headless 设备上跑几帧 deferred + TAA + present
//!
//! 用法：`rg-headless [settings.toml] [frames]`

use ash::vk;
use truvis_crate_tools::init_log::init_log;
use truvis_render_graph::render_graph::{
    RenderGraph, RgAttachmentOps, RgBufferState, RgPassType, RgSettings, RgTextureState,
};
use truvis_render_interface::gfx_device::{GfxBufferHeap, GfxTextureDesc};
use truvis_render_interface::headless::{HeadlessDevice, HeadlessQueue, HeadlessSwapchain};

const EXTENT: vk::Extent2D = vk::Extent2D { width: 1280, height: 720 };

fn record_frame(
    graph: &mut RenderGraph,
    device: &mut HeadlessDevice,
    queue: &mut HeadlessQueue,
    swapchain: &mut HeadlessSwapchain,
) -> anyhow::Result<()> {
    let color_desc = |format| GfxTextureDesc::new_2d(EXTENT.width, EXTENT.height, format);
    let frame_id = graph.frame_counter().frame_id();

    let mut builder = graph.builder();
    builder.create_temporal_texture_with_init(
        "taa-history",
        2,
        color_desc(vk::Format::R16G16B16A16_SFLOAT),
        RgTextureState::TRANSFER_DST,
        |id, runtime, _| log::info!("clear history {:?}: {:?}", id, runtime.get_texture(id)),
    );

    let mut upload = builder.create_pass("upload-camera", RgPassType::Host);
    let camera = upload.create_buffer("camera", GfxBufferHeap::Upload, 256, 256, RgBufferState::HOST);
    upload.set_host_callback(move |runtime| {
        log::debug!("frame {frame_id}: camera at {:?}", runtime.get_buffer_view(camera).map(|view| view.size));
    });

    let mut gbuffer = builder.create_pass("gbuffer", RgPassType::Graphics);
    gbuffer.read_buffer("camera", RgBufferState::UNIFORM_VERTEX);
    gbuffer.create_color_attachment(
        "albedo",
        color_desc(vk::Format::R8G8B8A8_UNORM),
        RgAttachmentOps::clear_color([0.0; 4]),
    );
    gbuffer.create_color_attachment(
        "normal",
        color_desc(vk::Format::R16G16B16A16_SFLOAT),
        RgAttachmentOps::clear_color([0.0; 4]),
    );
    gbuffer.create_texture("depth", color_desc(vk::Format::D32_SFLOAT), RgTextureState::DEPTH_ATTACHMENT_WRITE);
    gbuffer.set_graphics_callback(|_, _| {});

    let mut lighting = builder.create_pass("lighting", RgPassType::Compute);
    lighting.read_buffer("camera", RgBufferState::UNIFORM_COMPUTE);
    lighting.read_texture("albedo", RgTextureState::SHADER_READ_COMPUTE);
    lighting.read_texture("normal", RgTextureState::SHADER_READ_COMPUTE);
    lighting.read_texture("depth", RgTextureState::SHADER_READ_COMPUTE);
    lighting.create_texture("hdr", color_desc(vk::Format::R16G16B16A16_SFLOAT), RgTextureState::STORAGE_WRITE_COMPUTE);
    lighting.set_compute_callback(|_, _| {});

    let mut taa = builder.create_pass("taa", RgPassType::Compute);
    taa.read_texture("hdr", RgTextureState::SHADER_READ_COMPUTE);
    taa.read_texture_layer("taa-history", RgTextureState::SHADER_READ_COMPUTE, 1);
    taa.write_texture("taa-history", "taa-history", RgTextureState::STORAGE_WRITE_COMPUTE);
    taa.set_compute_callback(|_, _| {});

    let mut tonemap = builder.create_pass("tonemap", RgPassType::Compute);
    tonemap.read_texture("taa-history", RgTextureState::SHADER_READ_COMPUTE);
    tonemap.create_texture("ldr", color_desc(vk::Format::R8G8B8A8_UNORM), RgTextureState::STORAGE_WRITE_COMPUTE);
    tonemap.set_compute_callback(|_, _| {});

    builder.present(swapchain, "ldr")?;

    let compiled = builder.build(device)?;
    log::info!("frame {frame_id}: {}", compiled.schedule().join(" → "));
    for (idx, batch) in compiled.batches().iter().enumerate() {
        log::info!(
            "  batch {idx}: passes {:?}, {} waits, {} signals",
            batch.range,
            batch.waits.len(),
            batch.signals.len()
        );
    }
    compiled.execute(device, queue, Some(swapchain))
}

fn main() -> anyhow::Result<()> {
    init_log();
    let _client = tracy_client::Client::start();
    tracy_client::set_thread_name!("RenderThread");

    let mut args = std::env::args().skip(1);
    let settings = match args.next() {
        Some(path) => RgSettings::from_file(path)?,
        None => RgSettings::default(),
    };
    let frames: u64 = match args.next() {
        Some(frames) => frames.parse()?,
        None => 4,
    };

    let mut device = HeadlessDevice::new();
    let mut queue = HeadlessQueue::new();
    let mut swapchain = HeadlessSwapchain::new(&mut device, EXTENT, vk::Format::B8G8R8A8_UNORM, 3);
    let mut graph = RenderGraph::new(settings);

    for _ in 0..frames {
        record_frame(&mut graph, &mut device, &mut queue, &mut swapchain)?;
        device.cleanup(graph.frame_counter());
        tracy_client::frame_mark();

        log::info!(
            "retained {} textures, {} buffers; device holds {} textures, {} pending destroy",
            graph.registry().texture_count(),
            graph.registry().buffer_count(),
            device.texture_count(),
            device.pending_destroy_count()
        );
    }

    log::info!("submitted {} batches, presented {} images", queue.submissions.len(), swapchain.presented.len());
    graph.destroy(&mut device);
    Ok(())
}
