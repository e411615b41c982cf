//! 不接 GPU 的 collaborator 实现
//!
//! 只做簿记：分配句柄、记录每一条命令与每一次提交，延迟销毁的规则与真实设备一致。
//! 用于 RenderGraph 的单元测试以及 headless 演示程序。

use ash::vk;
use slotmap::SlotMap;

use crate::frame_counter::FrameCounter;
use crate::gfx_commands::{
    GfxBufferBarrier, GfxCommandRecorder, GfxQueue, GfxRenderingInfo, GfxSemaphoreSubmit, GfxTextureBarrier,
};
use crate::gfx_device::{GfxBufferDesc, GfxBufferView, GfxDevice, GfxTextureDesc, GfxTextureView};
use crate::gfx_swapchain::GfxSwapchain;
use crate::handles::{GfxBufferHandle, GfxSemaphoreHandle, GfxTextureHandle};

struct HeadlessBuffer {
    desc: GfxBufferDesc,
    device_address: vk::DeviceAddress,
    #[allow(dead_code)]
    name: String,
}

struct HeadlessTexture {
    desc: GfxTextureDesc,
    name: String,
}

/// 只做簿记的资源管理器
pub struct HeadlessDevice {
    buffer_pool: SlotMap<GfxBufferHandle, HeadlessBuffer>,
    texture_pool: SlotMap<GfxTextureHandle, HeadlessTexture>,
    semaphore_pool: SlotMap<GfxSemaphoreHandle, String>,

    // (handle, frame_id)
    pending_destroy_buffers: Vec<(GfxBufferHandle, u64)>,
    pending_destroy_textures: Vec<(GfxTextureHandle, u64)>,

    next_device_address: vk::DeviceAddress,
    /// 为 true 时所有创建请求都会失败，用于模拟显存耗尽
    fail_allocations: bool,
}
impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            buffer_pool: SlotMap::with_key(),
            texture_pool: SlotMap::with_key(),
            semaphore_pool: SlotMap::with_key(),
            pending_destroy_buffers: Vec::new(),
            pending_destroy_textures: Vec::new(),
            next_device_address: 0x1000,
            fail_allocations: false,
        }
    }

    pub fn create_semaphore(&mut self, name: impl Into<String>) -> GfxSemaphoreHandle {
        self.semaphore_pool.insert(name.into())
    }

    #[inline]
    pub fn set_fail_allocations(&mut self, fail: bool) {
        self.fail_allocations = fail;
    }
}
// Subsystem API
impl HeadlessDevice {
    /// 清理已过期的资源
    ///
    /// 销毁那些在 `frame_counter` 看来已经不再被 GPU 使用的资源。
    pub fn cleanup(&mut self, frame_counter: &FrameCounter) {
        let mut buffers_to_destroy = Vec::new();
        self.pending_destroy_buffers.retain(|(handle, frame_id)| {
            if frame_counter.is_retired(*frame_id) {
                buffers_to_destroy.push(*handle);
                false
            } else {
                true
            }
        });
        let buffers_released = buffers_to_destroy.len();
        for handle in buffers_to_destroy {
            self.buffer_pool.remove(handle);
        }

        let mut textures_to_destroy = Vec::new();
        self.pending_destroy_textures.retain(|(handle, frame_id)| {
            if frame_counter.is_retired(*frame_id) {
                textures_to_destroy.push(*handle);
                false
            } else {
                true
            }
        });
        let released = buffers_released + textures_to_destroy.len();
        for handle in textures_to_destroy {
            self.texture_pool.remove(handle);
        }

        if released > 0 {
            log::debug!("{} released {released} resources", frame_counter.frame_name());
        }
    }
}
// getters
impl HeadlessDevice {
    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffer_pool.len()
    }
    #[inline]
    pub fn texture_count(&self) -> usize {
        self.texture_pool.len()
    }
    #[inline]
    pub fn pending_destroy_count(&self) -> usize {
        self.pending_destroy_buffers.len() + self.pending_destroy_textures.len()
    }
    #[inline]
    pub fn is_buffer_alive(&self, handle: GfxBufferHandle) -> bool {
        self.buffer_pool.contains_key(handle)
    }
    #[inline]
    pub fn is_texture_alive(&self, handle: GfxTextureHandle) -> bool {
        self.texture_pool.contains_key(handle)
    }
    #[inline]
    pub fn is_texture_pending_destroy(&self, handle: GfxTextureHandle) -> bool {
        self.pending_destroy_textures.iter().any(|(h, _)| *h == handle)
    }
    #[inline]
    pub fn texture_name(&self, handle: GfxTextureHandle) -> Option<&str> {
        self.texture_pool.get(handle).map(|t| t.name.as_str())
    }
    #[inline]
    pub fn semaphore_name(&self, handle: GfxSemaphoreHandle) -> Option<&str> {
        self.semaphore_pool.get(handle).map(String::as_str)
    }
}
impl GfxDevice for HeadlessDevice {
    fn create_buffer(&mut self, desc: &GfxBufferDesc, name: &str) -> anyhow::Result<GfxBufferHandle> {
        anyhow::ensure!(!self.fail_allocations, "out of device memory while creating buffer {name}");
        anyhow::ensure!(desc.size > 0, "buffer {name} has zero size");

        let alignment = desc.alignment.max(1);
        let device_address = self.next_device_address.div_ceil(alignment) * alignment;
        self.next_device_address = device_address + desc.size;

        Ok(self.buffer_pool.insert(HeadlessBuffer {
            desc: *desc,
            device_address,
            name: name.to_string(),
        }))
    }

    fn create_texture(&mut self, desc: &GfxTextureDesc, name: &str) -> anyhow::Result<GfxTextureHandle> {
        anyhow::ensure!(!self.fail_allocations, "out of device memory while creating texture {name}");
        anyhow::ensure!(!desc.usage.is_empty(), "texture {name} has no usage flags");

        Ok(self.texture_pool.insert(HeadlessTexture {
            desc: *desc,
            name: name.to_string(),
        }))
    }

    fn destroy_buffer(&mut self, handle: GfxBufferHandle, frame_id: u64) {
        self.pending_destroy_buffers.push((handle, frame_id));
    }

    fn destroy_texture(&mut self, handle: GfxTextureHandle, frame_id: u64) {
        self.pending_destroy_textures.push((handle, frame_id));
    }

    fn get_buffer_view(&self, handle: GfxBufferHandle) -> Option<GfxBufferView> {
        self.buffer_pool.get(handle).map(|buffer| GfxBufferView {
            handle,
            device_address: buffer.device_address,
            size: buffer.desc.size,
        })
    }

    fn get_texture_view(&self, handle: GfxTextureHandle) -> Option<GfxTextureView> {
        self.texture_pool.get(handle).map(|texture| GfxTextureView {
            handle,
            desc: texture.desc,
        })
    }
}

/// 录制下来的单条命令
#[derive(Clone, Debug, PartialEq)]
pub enum HeadlessCommand {
    Barrier {
        buffer_barriers: Vec<GfxBufferBarrier>,
        texture_barriers: Vec<GfxTextureBarrier>,
    },
    BeginLabel(String),
    EndLabel,
    BeginRendering(GfxRenderingInfo),
    EndRendering,
    Blit {
        src: GfxTextureHandle,
        dst: GfxTextureHandle,
    },
    /// pass 回调自行录制的命令，用名字区分
    Marker(String),
}

#[derive(Debug, Default)]
pub struct HeadlessCommandBuffer {
    pub name: String,
    pub commands: Vec<HeadlessCommand>,
}

impl HeadlessCommandBuffer {
    #[inline]
    pub fn marker(&mut self, name: impl Into<String>) {
        self.commands.push(HeadlessCommand::Marker(name.into()));
    }

    /// 按录制顺序返回所有 label 的名字
    pub fn labels(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                HeadlessCommand::BeginLabel(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl GfxCommandRecorder for HeadlessCommandBuffer {
    fn pipeline_barrier(&mut self, buffer_barriers: &[GfxBufferBarrier], texture_barriers: &[GfxTextureBarrier]) {
        self.commands.push(HeadlessCommand::Barrier {
            buffer_barriers: buffer_barriers.to_vec(),
            texture_barriers: texture_barriers.to_vec(),
        });
    }

    fn begin_label(&mut self, name: &str) {
        self.commands.push(HeadlessCommand::BeginLabel(name.to_string()));
    }

    fn end_label(&mut self) {
        self.commands.push(HeadlessCommand::EndLabel);
    }

    fn begin_rendering(&mut self, info: &GfxRenderingInfo) {
        self.commands.push(HeadlessCommand::BeginRendering(info.clone()));
    }

    fn end_rendering(&mut self) {
        self.commands.push(HeadlessCommand::EndRendering);
    }

    fn blit_texture(&mut self, src: GfxTextureHandle, dst: GfxTextureHandle, _filter: vk::Filter) {
        self.commands.push(HeadlessCommand::Blit { src, dst });
    }
}

/// 一次 queue submit
#[derive(Debug)]
pub struct HeadlessSubmission {
    pub command_buffers: Vec<HeadlessCommandBuffer>,
    pub wait_semaphores: Vec<GfxSemaphoreSubmit>,
    pub signal_semaphores: Vec<GfxSemaphoreSubmit>,
}

#[derive(Default)]
pub struct HeadlessQueue {
    pub submissions: Vec<HeadlessSubmission>,
    fail_submit: bool,
}

impl HeadlessQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn set_fail_submit(&mut self, fail: bool) {
        self.fail_submit = fail;
    }

    /// 所有提交中按顺序出现的 label，也就是 pass 的实际执行顺序
    pub fn executed_labels(&self) -> Vec<String> {
        self.submissions
            .iter()
            .flat_map(|submission| submission.command_buffers.iter())
            .flat_map(|cmd| cmd.labels())
            .map(str::to_string)
            .collect()
    }
}

impl GfxQueue for HeadlessQueue {
    type CommandBuffer = HeadlessCommandBuffer;

    fn allocate_command_buffer(&mut self, name: &str) -> anyhow::Result<Self::CommandBuffer> {
        Ok(HeadlessCommandBuffer {
            name: name.to_string(),
            commands: Vec::new(),
        })
    }

    fn submit(
        &mut self,
        command_buffers: Vec<Self::CommandBuffer>,
        wait_semaphores: &[GfxSemaphoreSubmit],
        signal_semaphores: &[GfxSemaphoreSubmit],
    ) -> anyhow::Result<()> {
        anyhow::ensure!(!self.fail_submit, "device lost during queue submit");

        self.submissions.push(HeadlessSubmission {
            command_buffers,
            wait_semaphores: wait_semaphores.to_vec(),
            signal_semaphores: signal_semaphores.to_vec(),
        });
        Ok(())
    }
}

/// 轮流返回固定数量 image 的 swapchain
pub struct HeadlessSwapchain {
    images: Vec<GfxTextureHandle>,
    next_image: usize,
    acquired_image: Option<GfxTextureHandle>,

    acquire_semaphore: GfxSemaphoreHandle,
    present_semaphore: GfxSemaphoreHandle,

    extent: vk::Extent2D,
    format: vk::Format,

    /// 已经 present 的 image，按顺序
    pub presented: Vec<GfxTextureHandle>,
}

impl HeadlessSwapchain {
    pub fn new(device: &mut HeadlessDevice, extent: vk::Extent2D, format: vk::Format, image_count: usize) -> Self {
        assert!(image_count > 0);

        let desc = GfxTextureDesc::new_2d(extent.width, extent.height, format).with_usage(Self::USAGE);
        let images = (0..image_count)
            .map(|i| {
                device.texture_pool.insert(HeadlessTexture {
                    desc,
                    name: format!("swapchain-image-{i}"),
                })
            })
            .collect();

        Self {
            images,
            next_image: 0,
            acquired_image: None,
            acquire_semaphore: device.create_semaphore("swapchain-acquire"),
            present_semaphore: device.create_semaphore("swapchain-present"),
            extent,
            format,
            presented: Vec::new(),
        }
    }

    const USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
        vk::ImageUsageFlags::TRANSFER_DST.as_raw() | vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw(),
    );
}

impl GfxSwapchain for HeadlessSwapchain {
    fn acquire_texture(&mut self, acquire_semaphore: GfxSemaphoreHandle) -> anyhow::Result<GfxTextureHandle> {
        anyhow::ensure!(acquire_semaphore == self.acquire_semaphore, "unknown acquire semaphore");
        anyhow::ensure!(self.acquired_image.is_none(), "swapchain image acquired twice without present");

        let image = self.images[self.next_image];
        self.next_image = (self.next_image + 1) % self.images.len();
        self.acquired_image = Some(image);
        Ok(image)
    }

    fn present(&mut self, present_semaphore: GfxSemaphoreHandle) -> anyhow::Result<()> {
        anyhow::ensure!(present_semaphore == self.present_semaphore, "unknown present semaphore");
        let image = self.acquired_image.take().ok_or_else(|| anyhow::anyhow!("present without acquire"))?;
        self.presented.push(image);
        Ok(())
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn format(&self) -> vk::Format {
        self.format
    }

    fn usage(&self) -> vk::ImageUsageFlags {
        Self::USAGE
    }

    fn acquire_semaphore(&self) -> GfxSemaphoreHandle {
        self.acquire_semaphore
    }

    fn present_semaphore(&self) -> GfxSemaphoreHandle {
        self.present_semaphore
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx_device::GfxBufferHeap;

    #[test]
    fn test_deferred_destroy_waits_for_fif() {
        let mut device = HeadlessDevice::new();
        let mut counter = FrameCounter::new(0, 2);

        let buffer = device.create_buffer(&GfxBufferDesc::new(GfxBufferHeap::DeviceLocal, 256, 16), "b").unwrap();
        device.destroy_buffer(buffer, counter.frame_id());

        counter.next_frame();
        device.cleanup(&counter);
        assert!(device.is_buffer_alive(buffer));

        counter.next_frame();
        device.cleanup(&counter);
        assert!(!device.is_buffer_alive(buffer));
        assert_eq!(device.pending_destroy_count(), 0);
    }

    #[test]
    fn test_buffer_address_respects_alignment() {
        let mut device = HeadlessDevice::new();
        let a = device.create_buffer(&GfxBufferDesc::new(GfxBufferHeap::Upload, 3, 1), "a").unwrap();
        let b = device.create_buffer(&GfxBufferDesc::new(GfxBufferHeap::Upload, 64, 256), "b").unwrap();

        assert_eq!(device.get_buffer_view(a).unwrap().device_address, 0x1000);
        assert_eq!(device.get_buffer_view(b).unwrap().device_address % 256, 0);
    }

    #[test]
    fn test_failed_allocation_reports_error() {
        let mut device = HeadlessDevice::new();
        device.set_fail_allocations(true);

        let desc = GfxTextureDesc::new_2d(4, 4, vk::Format::R8_UNORM).with_usage(vk::ImageUsageFlags::SAMPLED);
        assert!(device.create_texture(&desc, "t").is_err());
    }

    #[test]
    fn test_swapchain_round_robin() {
        let mut device = HeadlessDevice::new();
        let mut swapchain =
            HeadlessSwapchain::new(&mut device, vk::Extent2D { width: 4, height: 4 }, vk::Format::B8G8R8A8_SRGB, 2);
        let acquire = swapchain.acquire_semaphore();
        let present = swapchain.present_semaphore();

        let first = swapchain.acquire_texture(acquire).unwrap();
        assert!(swapchain.acquire_texture(acquire).is_err());
        swapchain.present(present).unwrap();
        let second = swapchain.acquire_texture(acquire).unwrap();

        assert_ne!(first, second);
        assert_eq!(swapchain.presented, vec![first]);
    }
}
