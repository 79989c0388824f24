//! Joint tree
//!
//! Nodes live in an arena and refer to each other through [`NodeHandle`]s.
//! The tree owns the child lists; the parent link is a plain handle.

use std::cmp::Ordering;
use std::fmt;

use glam::Mat4;

use crate::cad::ComponentId;
use crate::error::TreeError;
use crate::model::{EdgeId, GroupModel, JointGeometry, MassProperties, NodeId, RigidBody};

/// Index of a node inside a [`RigidTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(usize);

impl NodeHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node[{}]", self.0)
    }
}

/// Joint between a node and its parent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkeletalJoint {
    /// CAD edge this joint was selected from
    pub edge: EdgeId,
    pub geometry: JointGeometry,
}

/// A body placed in the tree
#[derive(Debug, Clone, PartialEq)]
pub struct RigidNode {
    handle: NodeHandle,
    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
    pub source: NodeId,
    pub name: String,
    pub components: Vec<ComponentId>,
    pub world_transform: Mat4,
    pub mass: Option<MassProperties>,
    pub model: Option<GroupModel>,
    /// `None` only at the root
    pub joint: Option<SkeletalJoint>,
}

impl RigidNode {
    fn from_body(handle: NodeHandle, body: &RigidBody) -> Self {
        Self {
            handle,
            parent: None,
            children: Vec::new(),
            source: body.id,
            name: body.name.clone(),
            components: body.components.clone(),
            world_transform: body.world_transform,
            mass: body.mass,
            model: body.model.clone(),
            joint: None,
        }
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Rooted tree of rigid nodes
#[derive(Debug, Clone)]
pub struct RigidTree {
    nodes: Vec<RigidNode>,
}

impl RigidTree {
    /// Create a tree holding only `root`
    pub fn new(root: &RigidBody) -> Self {
        Self {
            nodes: vec![RigidNode::from_body(NodeHandle(0), root)],
        }
    }

    pub fn root(&self) -> &RigidNode {
        &self.nodes[0]
    }

    pub fn root_handle(&self) -> NodeHandle {
        NodeHandle(0)
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&RigidNode> {
        self.nodes.get(handle.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in arena order
    pub fn iter(&self) -> impl Iterator<Item = &RigidNode> {
        self.nodes.iter()
    }

    /// Find the node built from a given body
    pub fn find(&self, source: NodeId) -> Option<NodeHandle> {
        self.nodes.iter().find(|n| n.source == source).map(|n| n.handle)
    }

    /// Append `body` as the last child of `parent`
    pub fn add_child(
        &mut self,
        parent: NodeHandle,
        body: &RigidBody,
        joint: SkeletalJoint,
    ) -> Result<NodeHandle, TreeError> {
        if parent.0 >= self.nodes.len() {
            return Err(TreeError::NodeNotFound(parent));
        }
        let handle = NodeHandle(self.nodes.len());
        let mut node = RigidNode::from_body(handle, body);
        node.parent = Some(parent);
        node.joint = Some(joint);
        self.nodes.push(node);
        self.nodes[parent.0].children.push(handle);
        Ok(handle)
    }

    /// Handles in pre-order: parent before children, children in list order
    pub fn list_all_nodes(&self) -> Vec<NodeHandle> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root_handle()];
        while let Some(handle) = stack.pop() {
            order.push(handle);
            stack.extend(self.nodes[handle.0].children.iter().rev().copied());
        }
        order
    }

    /// Number of joints between `handle` and the root
    pub fn depth(&self, handle: NodeHandle) -> Option<usize> {
        let mut node = self.get(handle)?;
        let mut depth = 0;
        while let Some(parent) = node.parent {
            node = &self.nodes[parent.0];
            depth += 1;
        }
        Some(depth)
    }

    /// Move `child` (with its subtree) under `new_parent` using `joint`
    pub fn reparent(
        &mut self,
        child: NodeHandle,
        new_parent: NodeHandle,
        joint: SkeletalJoint,
    ) -> Result<(), TreeError> {
        if self.get(child).is_none() {
            return Err(TreeError::NodeNotFound(child));
        }
        if self.get(new_parent).is_none() {
            return Err(TreeError::NodeNotFound(new_parent));
        }
        let old_parent = self.nodes[child.0].parent.ok_or(TreeError::RootHasNoParent)?;
        if self.would_create_cycle(new_parent, child) {
            return Err(TreeError::WouldCreateCycle {
                child,
                parent: new_parent,
            });
        }

        self.nodes[old_parent.0].children.retain(|c| *c != child);
        self.nodes[new_parent.0].children.push(child);
        let node = &mut self.nodes[child.0];
        node.parent = Some(new_parent);
        node.joint = Some(joint);
        Ok(())
    }

    /// Replace the originating model of a node
    pub fn set_model(
        &mut self,
        handle: NodeHandle,
        model: Option<GroupModel>,
    ) -> Result<(), TreeError> {
        let node = self
            .nodes
            .get_mut(handle.0)
            .ok_or(TreeError::NodeNotFound(handle))?;
        node.model = model;
        Ok(())
    }

    /// Reorder the children of one node
    pub fn sort_children_by<F>(&mut self, handle: NodeHandle, mut compare: F) -> Result<(), TreeError>
    where
        F: FnMut(&RigidNode, &RigidNode) -> Ordering,
    {
        let mut children = self
            .get(handle)
            .ok_or(TreeError::NodeNotFound(handle))?
            .children
            .clone();
        children.sort_by(|a, b| compare(&self.nodes[a.0], &self.nodes[b.0]));
        self.nodes[handle.0].children = children;
        Ok(())
    }

    /// Check if `child` is an ancestor of (or equal to) `parent`
    fn would_create_cycle(&self, parent: NodeHandle, child: NodeHandle) -> bool {
        let mut current = Some(parent);
        while let Some(handle) = current {
            if handle == child {
                return true;
            }
            current = self.nodes[handle.0].parent;
        }
        false
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, handle: NodeHandle, depth: usize) -> fmt::Result {
        let node = &self.nodes[handle.0];
        write!(f, "{:indent$}{} {}", "", node.source, node.name, indent = depth * 2)?;
        if let Some(joint) = &node.joint {
            write!(f, " <{}>", joint.geometry.joint_type.display_name())?;
        }
        if let Some(model) = &node.model {
            write!(f, " ({model})")?;
        }
        writeln!(f)?;
        for child in &node.children {
            self.fmt_node(f, *child, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for RigidTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(f, self.root_handle(), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JointType;

    fn joint(edge: u32) -> SkeletalJoint {
        SkeletalJoint {
            edge: EdgeId(edge),
            geometry: JointGeometry {
                joint_type: JointType::Revolute,
                ..JointGeometry::default()
            },
        }
    }

    /// r -> [a -> [c], b]
    fn sample() -> (RigidTree, [NodeHandle; 4]) {
        let mut tree = RigidTree::new(&RigidBody::new(0, "r").grounded());
        let r = tree.root_handle();
        let a = tree.add_child(r, &RigidBody::new(1, "a"), joint(0)).unwrap();
        let b = tree.add_child(r, &RigidBody::new(2, "b"), joint(1)).unwrap();
        let c = tree.add_child(a, &RigidBody::new(3, "c"), joint(2)).unwrap();
        (tree, [r, a, b, c])
    }

    #[test]
    fn test_pre_order_visits_subtree_before_sibling() {
        let (tree, [r, a, b, c]) = sample();
        assert_eq!(tree.list_all_nodes(), vec![r, a, c, b]);
    }

    #[test]
    fn test_parent_links_and_depth() {
        let (tree, [r, a, _b, c]) = sample();
        assert!(tree.root().is_root());
        assert!(tree.root().joint.is_none());
        assert_eq!(tree.get(c).unwrap().parent(), Some(a));
        assert_eq!(tree.depth(c), Some(2));
        assert_eq!(tree.depth(r), Some(0));
        assert_eq!(tree.find(NodeId(3)), Some(c));
    }

    #[test]
    fn test_reparent_moves_subtree() {
        let (mut tree, [r, a, b, c]) = sample();
        tree.reparent(a, b, joint(7)).unwrap();

        assert_eq!(tree.get(r).unwrap().children(), &[b]);
        assert_eq!(tree.get(b).unwrap().children(), &[a]);
        assert_eq!(tree.get(a).unwrap().joint.unwrap().edge, EdgeId(7));
        assert_eq!(tree.list_all_nodes(), vec![r, b, a, c]);
    }

    #[test]
    fn test_reparent_rejects_cycle_and_root() {
        let (mut tree, [r, a, _b, c]) = sample();
        assert_eq!(
            tree.reparent(a, c, joint(9)),
            Err(TreeError::WouldCreateCycle { child: a, parent: c })
        );
        assert_eq!(tree.reparent(r, a, joint(9)), Err(TreeError::RootHasNoParent));
    }

    #[test]
    fn test_sort_children_by_name_descending() {
        let (mut tree, [r, a, b, _c]) = sample();
        tree.sort_children_by(r, |x, y| y.name.cmp(&x.name)).unwrap();
        assert_eq!(tree.get(r).unwrap().children(), &[b, a]);
    }

    #[test]
    fn test_display_indents_children() {
        let (tree, _) = sample();
        let text = tree.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("#0 r"));
        assert!(lines[2].starts_with("    #3 c <Revolute>"));
    }
}
