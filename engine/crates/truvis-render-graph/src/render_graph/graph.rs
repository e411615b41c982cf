//! 依赖图构建和拓扑排序
//!
//! 依赖只来自逻辑资源的 def/kill 关系：
//! - 读取和写入都必须在被读写版本的 def pass 之后
//! - 读取必须在被读版本的 kill pass 之前
//!
//! 拓扑排序使用优先队列，总是先调度依赖最早完成的 pass，相同时按声明顺序。

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// 依赖图
///
/// 节点是 pass 的声明下标。
pub struct DependencyGraph {
    /// Pass 数量
    pass_count: usize,
    /// 邻接表（出边）
    successors: Vec<Vec<usize>>,
    /// 邻接表（入边）
    predecessors: Vec<Vec<usize>>,
    /// 入度表
    in_degrees: Vec<usize>,
    /// 优先调度的 pass（graph 注入的初始化 pass）
    early: Vec<bool>,
}

impl DependencyGraph {
    pub fn new(pass_count: usize) -> Self {
        Self {
            pass_count,
            successors: vec![Vec::new(); pass_count],
            predecessors: vec![Vec::new(); pass_count],
            in_degrees: vec![0; pass_count],
            early: vec![false; pass_count],
        }
    }

    /// 添加依赖边，`producer` 先于 `consumer` 执行
    ///
    /// 重复的边只记录一次；`producer == consumer` 形成自环，排序时会被当作环报告。
    pub fn add_edge(&mut self, producer: usize, consumer: usize) {
        if !self.successors[producer].contains(&consumer) {
            self.successors[producer].push(consumer);
            self.predecessors[consumer].push(producer);
            self.in_degrees[consumer] += 1;
        }
    }

    #[inline]
    pub fn mark_early(&mut self, pass_index: usize) {
        self.early[pass_index] = true;
    }

    /// 执行拓扑排序
    ///
    /// 就绪 pass 的优先级为 `(是否 early, 前驱中最晚的调度时刻 + 1, pass 下标)`，越小越先。
    ///
    /// # 返回
    /// - `Ok(order)`: 排序后的 Pass 下标列表
    /// - `Err(cycle)`: 检测到循环依赖，返回无法调度的 Pass 下标
    pub fn schedule(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut in_degrees = self.in_degrees.clone();
        let mut schedule_times = vec![0usize; self.pass_count];
        let mut ready = BinaryHeap::new();
        let mut result = Vec::with_capacity(self.pass_count);

        let priority = |pass: usize, time: usize| Reverse((!self.early[pass], time, pass));

        for pass in 0..self.pass_count {
            if in_degrees[pass] == 0 {
                ready.push(priority(pass, 0));
            }
        }

        while let Some(Reverse((_, _, pass))) = ready.pop() {
            schedule_times[pass] = result.len();
            result.push(pass);

            for &successor in &self.successors[pass] {
                in_degrees[successor] -= 1;
                if in_degrees[successor] == 0 {
                    let time =
                        self.predecessors[successor].iter().map(|&p| schedule_times[p] + 1).max().unwrap_or(0);
                    ready.push(priority(successor, time));
                }
            }
        }

        if result.len() != self.pass_count {
            let remaining = (0..self.pass_count).filter(|&i| in_degrees[i] > 0).collect();
            Err(remaining)
        } else {
            Ok(result)
        }
    }

    /// 获取 Pass 的直接前驱
    #[inline]
    pub fn predecessors(&self, pass_index: usize) -> &[usize] {
        &self.predecessors[pass_index]
    }

    /// 获取 Pass 的直接后继
    #[inline]
    pub fn successors(&self, pass_index: usize) -> &[usize] {
        &self.successors[pass_index]
    }
}

/// 单个 pass 的依赖信息
#[derive(Clone, Debug, Default)]
pub struct PassLinks {
    /// 被读写版本的 def pass
    pub dependencies: Vec<usize>,
    /// 被读版本的 kill pass
    pub dependents: Vec<usize>,
}

/// 依赖分析器
pub struct DependencyAnalyzer;

impl DependencyAnalyzer {
    /// 由每个 pass 的 def/kill 信息构建依赖图
    pub fn analyze(links: &[PassLinks]) -> DependencyGraph {
        let mut graph = DependencyGraph::new(links.len());

        for (pass_idx, link) in links.iter().enumerate() {
            for &dependency in &link.dependencies {
                graph.add_edge(dependency, pass_idx);
            }
            for &dependent in &link.dependents {
                graph.add_edge(pass_idx, dependent);
            }
        }

        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(dependencies: &[usize], dependents: &[usize]) -> PassLinks {
        PassLinks {
            dependencies: dependencies.to_vec(),
            dependents: dependents.to_vec(),
        }
    }

    #[test]
    fn test_simple_dependency() {
        // Pass 0 定义，Pass 1 读取
        let graph = DependencyAnalyzer::analyze(&[links(&[], &[]), links(&[0], &[])]);
        assert_eq!(graph.schedule().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_reader_before_killer() {
        // Pass 0 定义 v0，Pass 1 读 v0，Pass 2 由 v0 写出 v1
        // Pass 2 的声明在 Pass 1 之前也要排在后面
        let graph = DependencyAnalyzer::analyze(&[links(&[], &[]), links(&[0], &[2]), links(&[0], &[])]);
        assert_eq!(graph.schedule().unwrap(), vec![0, 1, 2]);
        assert_eq!(graph.predecessors(2), &[1, 0]);
    }

    #[test]
    fn test_oldest_dependency_first() {
        // 0 -> 1 -> 2，3 只依赖 0
        // 1 调度后 2 与 3 同时就绪：2 的前驱最晚时刻是 1，3 的是 0，所以 3 先
        let graph = DependencyAnalyzer::analyze(&[
            links(&[], &[]),
            links(&[0], &[]),
            links(&[1], &[]),
            links(&[0], &[]),
        ]);
        assert_eq!(graph.schedule().unwrap(), vec![0, 1, 3, 2]);
    }

    #[test]
    fn test_early_pass_first() {
        let mut graph = DependencyAnalyzer::analyze(&[links(&[], &[]), links(&[], &[]), links(&[], &[])]);
        graph.mark_early(2);
        assert_eq!(graph.schedule().unwrap(), vec![2, 0, 1]);
    }

    #[test]
    fn test_self_edge_is_cycle() {
        // 读取并 kill 同一个版本
        let graph = DependencyAnalyzer::analyze(&[links(&[], &[0]), links(&[], &[])]);
        assert_eq!(graph.schedule().unwrap_err(), vec![0]);
    }

    #[test]
    fn test_cycle() {
        let graph = DependencyAnalyzer::analyze(&[links(&[1], &[]), links(&[0], &[]), links(&[], &[])]);
        assert_eq!(graph.schedule().unwrap_err(), vec![0, 1]);
    }
}
