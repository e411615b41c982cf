use slotmap::new_key_type;

// 设备侧的资源句柄，由 GfxDevice 分配
new_key_type! {
    pub struct GfxBufferHandle;
    pub struct GfxTextureHandle;
    pub struct GfxSemaphoreHandle;
}
