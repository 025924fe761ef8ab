//! 节点层级的 arena
//!
//! glTF 的节点通过 children 索引组成森林，这里在构建时做完整的校验：
//! - children 索引不能越界，不能引用自身
//! - 每个节点最多只有一个 parent
//! - 不能有环
//!
//! 校验通过后按「root 优先、深度优先前序」排列，保证 parent 的位置总是在 child 之前。

use crate::error::{SceneError, SceneResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeArena {
    /// arena 位置 -> 文档中的节点索引
    order: Vec<usize>,
    /// arena 位置 -> parent 的 arena 位置
    parents: Vec<Option<usize>>,
}

// getters
impl NodeArena {
    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 文档中的节点索引
    #[inline]
    pub fn doc_index(&self, arena_index: usize) -> usize {
        self.order[arena_index]
    }

    #[inline]
    pub fn parent(&self, arena_index: usize) -> Option<usize> {
        self.parents[arena_index]
    }

    /// (arena 位置, 文档索引, parent 的 arena 位置)
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, Option<usize>)> + '_ {
        self.order.iter().zip(self.parents.iter()).enumerate().map(|(i, (doc, parent))| (i, *doc, *parent))
    }
}

/// 根据每个节点的 children 列表构建 arena
///
/// `scene_roots` 是默认场景中列出的 root 节点，会排在最前面；
/// 其余没有 parent 的节点按文档顺序排在后面。
pub fn build_node_arena(children: &[Vec<usize>], scene_roots: &[usize]) -> SceneResult<NodeArena> {
    let node_count = children.len();

    let mut doc_parents: Vec<Option<usize>> = vec![None; node_count];
    for (node, node_children) in children.iter().enumerate() {
        for &child in node_children {
            if child >= node_count {
                return Err(SceneError::Malformed(format!(
                    "node {} references child {} but there are only {} nodes",
                    node, child, node_count
                )));
            }
            if child == node {
                return Err(SceneError::Malformed(format!("node {} is its own child", node)));
            }
            if let Some(existing) = doc_parents[child] {
                return Err(SceneError::Malformed(format!(
                    "node {} has multiple parents ({} and {})",
                    child, existing, node
                )));
            }
            doc_parents[child] = Some(node);
        }
    }

    let mut roots = Vec::with_capacity(node_count);
    let mut is_root = vec![false; node_count];
    for &root in scene_roots {
        if root >= node_count {
            return Err(SceneError::Malformed(format!("scene root {} is out of range", root)));
        }
        if let Some(parent) = doc_parents[root] {
            return Err(SceneError::Malformed(format!("scene root {} has parent {}", root, parent)));
        }
        if !is_root[root] {
            is_root[root] = true;
            roots.push(root);
        }
    }
    for node in 0..node_count {
        if doc_parents[node].is_none() && !is_root[node] {
            is_root[node] = true;
            roots.push(node);
        }
    }

    // 每个节点最多一个 parent，所以从 root 出发的 DFS 不会重复访问；
    // 没有被访问到的节点一定处在环上
    let mut order = Vec::with_capacity(node_count);
    let mut parents = Vec::with_capacity(node_count);
    let mut stack: Vec<(usize, Option<usize>)> = Vec::new();
    for &root in &roots {
        stack.push((root, None));
        while let Some((node, parent)) = stack.pop() {
            let arena_index = order.len();
            order.push(node);
            parents.push(parent);
            // 逆序入栈，保持 children 的原始顺序
            stack.extend(children[node].iter().rev().map(|&child| (child, Some(arena_index))));
        }
    }

    if order.len() != node_count {
        let mut visited = vec![false; node_count];
        order.iter().for_each(|&node| visited[node] = true);
        let cycle_nodes: Vec<usize> = (0..node_count).filter(|&node| !visited[node]).collect();
        return Err(SceneError::Malformed(format!("node hierarchy contains a cycle through nodes {:?}", cycle_nodes)));
    }

    Ok(NodeArena { order, parents })
}
