/// 帧计数器
///
/// `frame_id` 一直累加；延迟销毁以 `frame_id + fif_count <= current` 判断资源是否已经不再被 GPU 使用。
#[derive(Clone, Copy, Debug)]
pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    /// frames in flight 数量
    fif_count: u64,
}
// new & init
impl FrameCounter {
    pub const DEFAULT_FIF_COUNT: u64 = 3;

    pub fn new(init_frame_id: u64, fif_count: u64) -> Self {
        assert!(fif_count > 0, "frames in flight must be at least 1");
        Self {
            frame_id: init_frame_id,
            fif_count,
        }
    }
}
impl Default for FrameCounter {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_FIF_COUNT)
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub fn fif_count(&self) -> u64 {
        self.fif_count
    }
    /// 当前帧使用的 fif 槽位
    #[inline]
    pub fn fif_index(&self) -> usize {
        (self.frame_id % self.fif_count) as usize
    }
    /// 在 `frame_id` 提交的资源，在当前帧是否可以安全销毁
    #[inline]
    pub fn is_retired(&self, frame_id: u64) -> bool {
        frame_id + self.fif_count <= self.frame_id
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}#{}]", self.frame_id, self.fif_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retire_after_fif_frames() {
        let mut counter = FrameCounter::new(10, 3);
        assert!(!counter.is_retired(10));

        counter.next_frame();
        counter.next_frame();
        assert!(!counter.is_retired(10));

        counter.next_frame();
        assert_eq!(counter.frame_id(), 13);
        assert!(counter.is_retired(10));
        assert_eq!(counter.frame_name(), "[F13#1]");
    }
}
