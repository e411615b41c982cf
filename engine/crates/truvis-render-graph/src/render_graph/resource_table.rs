//! 逻辑资源表
//!
//! 一帧之内，每次写入都会产生一个新的逻辑资源（版本）。逻辑资源之间通过 parent 数组组成并查集，
//! 根节点绑定一个物理资源；同一个物理资源的所有版本都会指向同一个根。
//!
//! 除了并查集之外，表里还记录了每个版本的 def（产生它的 pass）、kill（消耗它的 pass）
//! 以及 child（由它写出的下一个版本），用于依赖分析和单次赋值检查。

use super::resource_handle::{RgIndex, RgPassId};

/// 单个逻辑资源
struct RgLogicalEntry<P> {
    /// 只有根节点才会绑定物理资源
    physical: Option<P>,
    def: Option<RgPassId>,
    kill: Option<RgPassId>,
    child: Option<u32>,
    name: String,
}

/// 扁平数组实现的并查集
pub struct RgLogicalTable<I: RgIndex, P: Copy> {
    parents: Vec<u32>,
    entries: Vec<RgLogicalEntry<P>>,
    _marker: std::marker::PhantomData<I>,
}

impl<I: RgIndex, P: Copy> Default for RgLogicalTable<I, P> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<I: RgIndex, P: Copy> RgLogicalTable<I, P> {
    pub fn new() -> Self {
        Self {
            parents: Vec::new(),
            entries: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// 创建一个自成一组的逻辑资源，并绑定物理资源
    pub fn create(&mut self, name: impl Into<String>, physical: P) -> I {
        let index = self.entries.len();
        self.parents.push(index as u32);
        self.entries.push(RgLogicalEntry {
            physical: Some(physical),
            def: None,
            kill: None,
            child: None,
            name: name.into(),
        });
        I::from_index(index)
    }

    /// `pass` 从 `src` 写出一个新版本
    ///
    /// 新版本的 parent 是 `src` 所在组的根，`src` 被 `pass` kill。
    ///
    /// # Panics
    /// `src` 已经被写过一次
    pub fn alias(&mut self, name: impl Into<String>, src: I, pass: RgPassId) -> I {
        let dst = self.reserve(name, src);
        self.set_writer(src, dst, pass);
        dst
    }

    /// 为 `src` 预留下一个版本，写出它的 pass 之后由 `set_writer` 指定
    ///
    /// 一直没有 writer 的预留版本没有 def，读取它不依赖任何 pass。
    ///
    /// # Panics
    /// `src` 已经被写过一次
    pub fn reserve(&mut self, name: impl Into<String>, src: I) -> I {
        let name = name.into();
        let src_entry = &self.entries[src.index()];
        if src_entry.child.is_some() {
            panic!(
                "RenderGraph: resource \"{}\" can only be written once, write to \"{}\" rejected",
                src_entry.name, name
            );
        }

        let root = self.find(src);
        let index = self.entries.len();
        self.parents.push(root.index() as u32);
        self.entries.push(RgLogicalEntry {
            physical: None,
            def: None,
            kill: None,
            child: None,
            name,
        });
        self.entries[src.index()].child = Some(index as u32);

        I::from_index(index)
    }

    /// `pass` 从 `src` 写出预留的版本 `dst`
    ///
    /// # Panics
    /// `dst` 不是 `src` 的下一个版本，或者已经有 writer
    pub fn set_writer(&mut self, src: I, dst: I, pass: RgPassId) {
        assert_eq!(
            self.entries[src.index()].child,
            Some(dst.index() as u32),
            "RenderGraph: \"{}\" is not the next version of \"{}\"",
            self.entries[dst.index()].name,
            self.entries[src.index()].name
        );
        assert!(
            self.entries[dst.index()].def.is_none(),
            "RenderGraph: \"{}\" already has a writer",
            self.entries[dst.index()].name
        );

        self.entries[dst.index()].def = Some(pass);
        self.entries[src.index()].kill = Some(pass);
    }
}

// 并查集
impl<I: RgIndex, P: Copy> RgLogicalTable<I, P> {
    /// 查找根节点，同时进行路径压缩
    pub fn find(&mut self, id: I) -> I {
        let mut root = id.index();
        while self.parents[root] as usize != root {
            root = self.parents[root] as usize;
        }

        let mut node = id.index();
        while self.parents[node] as usize != root {
            let next = self.parents[node] as usize;
            self.parents[node] = root as u32;
            node = next;
        }

        I::from_index(root)
    }

    /// 压缩所有路径，之后每个节点的 parent 都是根
    pub fn compress_all(&mut self) {
        for index in 0..self.parents.len() {
            self.find(I::from_index(index));
        }
    }

    /// 只读地解析物理资源
    ///
    /// 在 `compress_all` 之后只需要一步。
    pub fn resolved(&self, id: I) -> P {
        let mut root = id.index();
        while self.parents[root] as usize != root {
            root = self.parents[root] as usize;
        }

        self.entries[root]
            .physical
            .unwrap_or_else(|| panic!("RenderGraph: root of \"{}\" is not bound", self.entries[root].name))
    }

    /// 是否每个节点都直接指向根
    pub fn is_compressed(&self) -> bool {
        self.parents.iter().all(|&parent| self.parents[parent as usize] == parent)
    }
}

// getters
impl<I: RgIndex, P: Copy> RgLogicalTable<I, P> {
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn def(&self, id: I) -> Option<RgPassId> {
        self.entries[id.index()].def
    }

    #[inline]
    pub fn kill(&self, id: I) -> Option<RgPassId> {
        self.entries[id.index()].kill
    }

    #[inline]
    pub fn child(&self, id: I) -> Option<I> {
        self.entries[id.index()].child.map(|index| I::from_index(index as usize))
    }

    #[inline]
    pub fn name(&self, id: I) -> &str {
        &self.entries[id.index()].name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::resource_handle::RgBufferId;

    fn pass(index: usize) -> RgPassId {
        RgPassId::from_index(index)
    }

    #[test]
    fn test_find_is_idempotent() {
        let mut table = RgLogicalTable::<RgBufferId, u32>::new();
        let a = table.create("a", 7);
        let a1 = table.alias("a", a, pass(0));
        let a2 = table.alias("a", a1, pass(1));

        assert_eq!(table.find(a2), a);
        assert_eq!(table.find(a2), table.find(a2));
        assert_eq!(table.resolved(a2), 7);
        assert_eq!(table.def(a2), Some(pass(1)));
        assert_eq!(table.kill(a1), Some(pass(1)));
        assert_eq!(table.child(a), Some(a1));
    }

    #[test]
    fn test_compress_all() {
        let mut table = RgLogicalTable::<RgBufferId, u32>::new();
        let mut ids = vec![table.create("chain", 1)];
        for i in 0..8 {
            let last = *ids.last().unwrap();
            ids.push(table.alias(format!("chain-{i}"), last, pass(i)));
        }
        let other = table.create("other", 2);

        table.compress_all();
        assert!(table.is_compressed());
        assert!(ids.iter().all(|&id| table.resolved(id) == 1));
        assert_eq!(table.resolved(other), 2);
    }

    #[test]
    #[should_panic(expected = "can only be written once")]
    fn test_single_assignment() {
        let mut table = RgLogicalTable::<RgBufferId, u32>::new();
        let a = table.create("a", 0);
        table.alias("b", a, pass(0));
        table.alias("c", a, pass(1));
    }

    #[test]
    fn test_reserved_version() {
        let mut table = RgLogicalTable::<RgBufferId, u32>::new();
        let a = table.create("a", 3);
        let a1 = table.reserve("a#init", a);

        // 没有 writer 时不产生依赖
        assert_eq!(table.def(a1), None);
        assert_eq!(table.kill(a), None);
        assert_eq!(table.resolved(a1), 3);

        table.set_writer(a, a1, pass(4));
        assert_eq!(table.def(a1), Some(pass(4)));
        assert_eq!(table.kill(a), Some(pass(4)));
    }

    #[test]
    #[should_panic(expected = "can only be written once")]
    fn test_reserved_version_blocks_alias() {
        let mut table = RgLogicalTable::<RgBufferId, u32>::new();
        let a = table.create("a", 0);
        table.reserve("a#init", a);
        table.alias("b", a, pass(0));
    }
}
