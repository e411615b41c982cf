//! 逐帧构建的 RenderGraph
//!
//! pass 通过名字声明对 buffer / texture 的读写，graph 负责调度、分配物理资源、
//! 插入 barrier、按 semaphore 划分提交，并在帧间保留 temporal 资源。

pub mod render_graph;
