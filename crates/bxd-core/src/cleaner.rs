//! Graph cleaning and joint tree construction
//!
//! Two passes, in order:
//! 1. [`clean_grounded_bodies`] welds every grounded body into one root and
//!    drops bodies left without any connection.
//! 2. [`build_and_clean_dijkstra`] picks one parent joint per body from the
//!    shortest-path tree rooted at the grounded body.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

use crate::error::GraphError;
use crate::model::{EdgeId, NodeId, RigidGraph};
use crate::tree::{RigidTree, SkeletalJoint};

/// A body removed because nothing connects it to the rest of the assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedBody {
    pub id: NodeId,
    pub name: String,
}

/// What [`clean_grounded_bodies`] changed
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CleanReport {
    /// The grounded body every other grounded body was merged into
    pub root: Option<NodeId>,
    /// Grounded bodies absorbed into the root
    pub merged: Vec<NodeId>,
    /// Edges that joined two grounded bodies
    pub dropped_edges: Vec<EdgeId>,
    pub orphans: Vec<OrphanedBody>,
}

/// Merge all grounded bodies into the one with the lowest id and drop orphans.
///
/// The surviving body gets the union of the merged components and the
/// combined mass. It keeps its own model, or adopts the first model found
/// among the merged bodies when it has none.
pub fn clean_grounded_bodies(graph: &mut RigidGraph) -> Result<CleanReport, GraphError> {
    let grounded = graph.grounded();
    let (&root, absorbed) = grounded.split_first().ok_or(GraphError::NoGroundedBody)?;
    let grounded_set: HashSet<NodeId> = grounded.iter().copied().collect();

    let mut report = CleanReport {
        root: Some(root),
        ..CleanReport::default()
    };

    for &id in absorbed {
        let Some(body) = graph.remove_body(id) else {
            continue;
        };
        if let Some(survivor) = graph.body_mut(root) {
            for component in body.components {
                if !survivor.components.contains(&component) {
                    survivor.components.push(component);
                }
            }
            survivor.mass = match (survivor.mass, body.mass) {
                (Some(a), Some(b)) => Some(a.combine(&b)),
                (a, b) => a.or(b),
            };
            if survivor.model.is_none() {
                survivor.model = body.model;
            }
        }
        report.merged.push(id);
    }

    let edges = graph.edges_mut();
    edges.retain(|edge| {
        let internal = grounded_set.contains(&edge.a) && grounded_set.contains(&edge.b);
        if internal {
            report.dropped_edges.push(edge.id);
        }
        !internal
    });
    for edge in edges.iter_mut() {
        if grounded_set.contains(&edge.a) {
            edge.a = root;
        }
        if grounded_set.contains(&edge.b) {
            edge.b = root;
        }
    }

    if !report.merged.is_empty() {
        tracing::info!(
            root = %root,
            merged = report.merged.len(),
            dropped_edges = report.dropped_edges.len(),
            "Merged grounded bodies"
        );
    }

    let orphans: Vec<NodeId> = graph
        .bodies()
        .filter(|b| b.id != root && !b.grounded)
        .map(|b| b.id)
        .filter(|&id| graph.degree(id) == 0)
        .collect();
    for id in orphans {
        if let Some(body) = graph.remove_body(id) {
            tracing::warn!(body = %id, name = %body.name, "Dropping body with no connections");
            report.orphans.push(OrphanedBody {
                id,
                name: body.name,
            });
        }
    }

    Ok(report)
}

/// Heap entry; ordered so that `BinaryHeap` pops the lowest cost, then lowest id
#[derive(Debug, Clone, Copy, PartialEq)]
struct Frontier {
    cost: f32,
    node: NodeId,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Best known way to reach a body
#[derive(Debug, Clone, Copy)]
struct Route {
    cost: f32,
    parent: NodeId,
    edge: usize,
}

/// Build the joint tree from a cleaned graph.
///
/// Every body's parent is its predecessor on the cheapest path from the
/// grounded root. Equal-cost candidates are resolved by the lower parent id,
/// then the lower edge id. Children are ordered by ascending body id.
pub fn build_and_clean_dijkstra(graph: &RigidGraph) -> Result<RigidTree, GraphError> {
    let grounded = graph.grounded();
    let root = match grounded.as_slice() {
        [] => return Err(GraphError::NoGroundedBody),
        [root] => *root,
        _ => return Err(GraphError::AmbiguousGround(grounded)),
    };

    let edges = graph.edges();
    let mut adjacency: BTreeMap<NodeId, Vec<usize>> = BTreeMap::new();
    for (index, edge) in edges.iter().enumerate() {
        adjacency.entry(edge.a).or_default().push(index);
        adjacency.entry(edge.b).or_default().push(index);
    }

    let mut dist: HashMap<NodeId, f32> = HashMap::from([(root, 0.0)]);
    let mut routes: HashMap<NodeId, Route> = HashMap::new();
    let mut settled: HashSet<NodeId> = HashSet::new();
    let mut heap = BinaryHeap::from([Frontier {
        cost: 0.0,
        node: root,
    }]);

    while let Some(Frontier { cost, node }) = heap.pop() {
        if !settled.insert(node) {
            continue;
        }
        let Some(incident) = adjacency.get(&node) else {
            continue;
        };
        for &index in incident {
            let edge = &edges[index];
            let Some(next) = edge.other(node) else {
                continue;
            };
            if settled.contains(&next) {
                continue;
            }
            // Weights are strictly positive, so every equal-cost parent settles before `next`
            let candidate = cost + edge.weight;
            let improves = match (dist.get(&next), routes.get(&next)) {
                (None, _) => true,
                (Some(&best), _) if candidate < best => true,
                (Some(&best), Some(route)) if candidate == best => {
                    (node, edge.id) < (route.parent, edges[route.edge].id)
                }
                _ => false,
            };
            if !improves {
                continue;
            }
            let is_new_cost = dist.get(&next).is_none_or(|&best| candidate < best);
            dist.insert(next, candidate);
            routes.insert(
                next,
                Route {
                    cost: candidate,
                    parent: node,
                    edge: index,
                },
            );
            if is_new_cost {
                heap.push(Frontier {
                    cost: candidate,
                    node: next,
                });
            }
        }
    }

    let unreachable: Vec<NodeId> = graph
        .bodies()
        .map(|b| b.id)
        .filter(|id| !settled.contains(id))
        .collect();
    if !unreachable.is_empty() {
        return Err(GraphError::Disconnected {
            root,
            nodes: unreachable,
        });
    }

    let mut children: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    for (&child, route) in &routes {
        children.entry(route.parent).or_default().push(child);
    }
    for list in children.values_mut() {
        list.sort();
    }

    // Bodies were all settled above, so every lookup below succeeds.
    let root_body = graph.body(root).ok_or(GraphError::NoGroundedBody)?;
    let mut tree = RigidTree::new(root_body);
    let mut stack = vec![(tree.root_handle(), root)];
    while let Some((handle, id)) = stack.pop() {
        let Some(kids) = children.get(&id) else {
            continue;
        };
        for &child in kids {
            let (Some(body), Some(route)) = (graph.body(child), routes.get(&child)) else {
                continue;
            };
            let edge = &edges[route.edge];
            let joint = SkeletalJoint {
                edge: edge.id,
                geometry: edge.geometry,
            };
            if let Ok(child_handle) = tree.add_child(handle, body, joint) {
                tracing::debug!(
                    parent = %id,
                    child = %child,
                    edge = %edge.id,
                    cost = route.cost,
                    "Selected parent joint"
                );
                stack.push((child_handle, child));
            }
        }
    }

    tracing::info!(nodes = tree.len(), root = %root, "Built joint tree");
    Ok(tree)
}
