use std::ops::Range;

use super::semaphore_info::RgSemaphoreInfo;

/// 一次提交
///
/// `range` 是调度顺序中的连续区间。等待来自第一个 pass，信号来自最后一个 pass。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RgBatch {
    pub range: Range<usize>,
    pub waits: Vec<RgSemaphoreInfo>,
    pub signals: Vec<RgSemaphoreInfo>,
}

impl RgBatch {
    #[inline]
    pub fn len(&self) -> usize {
        self.range.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// 按 semaphore 切分调度序列
///
/// `syncs[i]` 是第 i 个已调度 pass 的 (waits, signals)。
/// 有等待的 pass 开始新的 batch，有信号的 pass 结束当前 batch。
pub fn partition_batches(syncs: &[(&[RgSemaphoreInfo], &[RgSemaphoreInfo])]) -> Vec<RgBatch> {
    let mut batches = Vec::new();
    let mut start = 0;

    let mut close = |start: usize, end: usize| {
        batches.push(RgBatch {
            range: start..end,
            waits: syncs[start].0.to_vec(),
            signals: syncs[end - 1].1.to_vec(),
        });
    };

    for (idx, (waits, signals)) in syncs.iter().enumerate() {
        if !waits.is_empty() && idx > start {
            close(start, idx);
            start = idx;
        }
        if !signals.is_empty() {
            close(start, idx + 1);
            start = idx + 1;
        }
    }
    if start < syncs.len() {
        close(start, syncs.len());
    }

    batches
}
