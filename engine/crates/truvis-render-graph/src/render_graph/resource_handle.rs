//! RenderGraph 资源句柄定义
//!
//! 逻辑句柄（`RgBufferId` / `RgTextureId`）只在一帧的 graph 内有效，每次写入都会产生新的逻辑句柄；
//! 物理句柄（`RgPhysicalBufferId` / `RgPhysicalTextureId`）对应一次真实的分配，temporal 资源可以跨帧保留。

use std::fmt;

use slotmap::new_key_type;

new_key_type! {
    /// 物理 buffer，在 `RgResourceRegistry` 中持久存储
    pub struct RgPhysicalBufferId;
    /// 物理 texture，在 `RgResourceRegistry` 中持久存储
    pub struct RgPhysicalTextureId;
}

/// 帧内扁平数组的下标
pub trait RgIndex: Copy + Eq {
    fn from_index(index: usize) -> Self;
    fn index(&self) -> usize;
}

/// Graph 内部的 Buffer 句柄
///
/// 标识某个具名 buffer 的一个版本。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RgBufferId(u32);

impl RgIndex for RgBufferId {
    #[inline]
    fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
    #[inline]
    fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for RgBufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RgBuffer({})", self.0)
    }
}

/// Graph 内部的 Texture 句柄
///
/// 标识某个具名 texture 的一个版本。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RgTextureId(u32);

impl RgIndex for RgTextureId {
    #[inline]
    fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
    #[inline]
    fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for RgTextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RgTexture({})", self.0)
    }
}

/// Pass 在声明顺序中的下标
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RgPassId(u32);

impl RgIndex for RgPassId {
    #[inline]
    fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
    #[inline]
    fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for RgPassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RgPass({})", self.0)
    }
}

/// 本帧导入的 semaphore
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RgSemaphoreId(u32);

impl RgIndex for RgSemaphoreId {
    #[inline]
    fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
    #[inline]
    fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for RgSemaphoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RgSemaphore({})", self.0)
    }
}
