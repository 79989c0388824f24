//! Rigid graph model
//!
//! An explicit undirected graph over the rigid bodies found by the CAD
//! analyzer. Bodies are keyed by [`NodeId`], edges live in an index-based list.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::cad::{CadBridge, CadContext, ComponentId, RigidAnalysis};
use crate::error::GraphError;

/// Stable identifier of a rigid body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable identifier of a joint edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub u32);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Joint type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum JointType {
    #[default]
    Fixed,
    Revolute,
    Prismatic,
    Cylindrical,
    Planar,
    Ball,
}

impl JointType {
    /// Check if this joint type has an axis
    pub fn has_axis(&self) -> bool {
        matches!(
            self,
            JointType::Revolute | JointType::Prismatic | JointType::Cylindrical
        )
    }

    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            JointType::Fixed => "Fixed",
            JointType::Revolute => "Revolute",
            JointType::Prismatic => "Prismatic",
            JointType::Cylindrical => "Cylindrical",
            JointType::Planar => "Planar",
            JointType::Ball => "Ball",
        }
    }
}

/// Joint limits (rad or m)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointLimits {
    pub lower: f32,
    pub upper: f32,
}

impl JointLimits {
    pub fn with_range(lower: f32, upper: f32) -> Self {
        Self { lower, upper }
    }
}

/// Raw joint geometry as reported by the CAD analyzer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointGeometry {
    pub joint_type: JointType,
    pub axis: Vec3,
    pub anchor: Vec3,
    pub limits: Option<JointLimits>,
}

impl Default for JointGeometry {
    fn default() -> Self {
        Self {
            joint_type: JointType::Fixed,
            axis: Vec3::Z,
            anchor: Vec3::ZERO,
            limits: None,
        }
    }
}

/// Mass and center of mass (world frame)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassProperties {
    pub mass: f32,
    pub center_of_mass: Vec3,
}

impl MassProperties {
    /// Combined properties of two bodies welded together
    pub fn combine(&self, other: &MassProperties) -> MassProperties {
        let mass = self.mass + other.mass;
        let center_of_mass = if mass > 0.0 {
            (self.center_of_mass * self.mass + other.center_of_mass * other.mass) / mass
        } else {
            (self.center_of_mass + other.center_of_mass) * 0.5
        };
        MassProperties {
            mass,
            center_of_mass,
        }
    }
}

/// Collision shape hint for a group
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Collider {
    Box { scale: [f32; 3] },
    Sphere { scale: f32 },
    Mesh { convex: bool },
}

impl Default for Collider {
    fn default() -> Self {
        Collider::Mesh { convex: true }
    }
}

/// Physics hints attached to a group by the grouping step
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupHints {
    #[serde(default)]
    pub collider: Collider,
    /// Members stay separate rigid bodies in the simulator
    #[serde(default)]
    pub separated: bool,
    #[serde(default)]
    pub friction: u32,
    #[serde(default)]
    pub mass: Option<f32>,
}

/// A user-defined group from the grouping step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomRigidGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub hints: GroupHints,
}

impl CustomRigidGroup {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            hints: GroupHints::default(),
        }
    }
}

/// What a body (and later a tree node) originates from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupModel {
    /// A rigid cluster found by the CAD analyzer without user annotation
    Cad { name: String },
    /// A group authored by the user
    Custom(CustomRigidGroup),
}

impl GroupModel {
    pub fn name(&self) -> &str {
        match self {
            GroupModel::Cad { name } => name,
            GroupModel::Custom(group) => &group.name,
        }
    }

    pub fn hints(&self) -> Option<&GroupHints> {
        match self {
            GroupModel::Cad { .. } => None,
            GroupModel::Custom(group) => Some(&group.hints),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, GroupModel::Custom(_))
    }
}

impl fmt::Display for GroupModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupModel::Cad { name } => write!(f, "cad:{name}"),
            GroupModel::Custom(group) => write!(f, "{} [{}]", group.name, group.id),
        }
    }
}

/// A rigid body: one or more fused CAD components
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    pub id: NodeId,
    pub name: String,
    pub components: Vec<ComponentId>,
    pub world_transform: Mat4,
    pub grounded: bool,
    pub mass: Option<MassProperties>,
    /// `None` for bodies without a semantic group
    pub model: Option<GroupModel>,
}

impl RigidBody {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: NodeId(id),
            name: name.into(),
            components: Vec::new(),
            world_transform: Mat4::IDENTITY,
            grounded: false,
            mass: None,
            model: None,
        }
    }

    pub fn grounded(mut self) -> Self {
        self.grounded = true;
        self
    }

    pub fn with_model(mut self, model: GroupModel) -> Self {
        self.model = Some(model);
        self
    }
}

/// Undirected mechanical connection between two bodies
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointEdge {
    pub id: EdgeId,
    pub a: NodeId,
    pub b: NodeId,
    /// Path cost for tree selection (lower is preferred)
    pub weight: f32,
    pub geometry: JointGeometry,
}

impl JointEdge {
    pub fn touches(&self, node: NodeId) -> bool {
        self.a == node || self.b == node
    }

    /// The endpoint opposite to `node`
    pub fn other(&self, node: NodeId) -> Option<NodeId> {
        if self.a == node {
            Some(self.b)
        } else if self.b == node {
            Some(self.a)
        } else {
            None
        }
    }
}

/// Undirected graph of rigid bodies and joints
#[derive(Debug, Clone, Default)]
pub struct RigidGraph {
    bodies: BTreeMap<NodeId, RigidBody>,
    edges: Vec<JointEdge>,
    next_edge: u32,
}

impl RigidGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from a CAD analysis and the user's groups.
    ///
    /// Fails on the first inconsistency; nothing is repaired here.
    pub fn from_analysis(
        bridge: &dyn CadBridge,
        ctx: &CadContext,
        analysis: &RigidAnalysis,
        groups: &[CustomRigidGroup],
        default_weight: f32,
    ) -> Result<Self, GraphError> {
        let mut group_index: HashMap<&str, &CustomRigidGroup> = HashMap::new();
        for group in groups {
            if group_index.insert(group.id.as_str(), group).is_some() {
                return Err(GraphError::DuplicateGroup(group.id.clone()));
            }
        }

        let mut graph = Self::new();
        let mut group_owner: HashMap<&str, NodeId> = HashMap::new();

        for raw in &analysis.bodies {
            let id = NodeId(raw.id);
            let model = match &raw.group {
                Some(group_id) => {
                    let group = group_index.get(group_id.as_str()).ok_or_else(|| {
                        GraphError::UnknownGroup {
                            node: id,
                            group: group_id.clone(),
                        }
                    })?;
                    if let Some(&first) = group_owner.get(group_id.as_str()) {
                        return Err(GraphError::SharedGroup {
                            group: group_id.clone(),
                            first,
                            second: id,
                        });
                    }
                    group_owner.insert(group.id.as_str(), id);
                    Some(GroupModel::Custom((*group).clone()))
                }
                None if raw.components.is_empty() => None,
                None => Some(GroupModel::Cad {
                    name: raw.name.clone(),
                }),
            };

            let world_transform = match raw.components.first() {
                Some(primary) => bridge
                    .world_transform(ctx, primary)
                    .map_err(|source| GraphError::Transform { node: id, source })?,
                None => Mat4::IDENTITY,
            };

            graph.add_body(RigidBody {
                id,
                name: raw.name.clone(),
                components: raw.components.clone(),
                world_transform,
                grounded: raw.grounded,
                mass: raw.mass,
                model,
            })?;
        }

        for connection in &analysis.connections {
            let geometry = JointGeometry {
                joint_type: connection.joint_type,
                axis: connection.axis,
                anchor: connection.anchor,
                limits: connection.limits,
            };
            graph.connect(
                NodeId(connection.bodies.0),
                NodeId(connection.bodies.1),
                connection.weight.unwrap_or(default_weight),
                geometry,
            )?;
        }

        tracing::info!(
            bodies = graph.body_count(),
            edges = graph.edge_count(),
            grounded = graph.grounded().len(),
            "Built rigid graph"
        );
        Ok(graph)
    }

    /// Add a body
    pub fn add_body(&mut self, body: RigidBody) -> Result<NodeId, GraphError> {
        let id = body.id;
        if self.bodies.contains_key(&id) {
            return Err(GraphError::DuplicateBody(id));
        }
        self.bodies.insert(id, body);
        Ok(id)
    }

    /// Connect two live, distinct bodies with a strictly positive weight
    pub fn connect(
        &mut self,
        a: NodeId,
        b: NodeId,
        weight: f32,
        geometry: JointGeometry,
    ) -> Result<EdgeId, GraphError> {
        let edge = EdgeId(self.next_edge);
        for node in [a, b] {
            if !self.bodies.contains_key(&node) {
                return Err(GraphError::UnknownNode { edge, node });
            }
        }
        if a == b {
            return Err(GraphError::SelfLoop { edge, node: a });
        }
        if !weight.is_finite() || weight <= 0.0 {
            return Err(GraphError::InvalidWeight { edge, weight });
        }

        self.next_edge += 1;
        self.edges.push(JointEdge {
            id: edge,
            a,
            b,
            weight,
            geometry,
        });
        Ok(edge)
    }

    pub fn body(&self, id: NodeId) -> Option<&RigidBody> {
        self.bodies.get(&id)
    }

    /// Bodies in ascending id order
    pub fn bodies(&self) -> impl Iterator<Item = &RigidBody> {
        self.bodies.values()
    }

    pub fn edges(&self) -> &[JointEdge] {
        &self.edges
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Ids of grounded bodies, ascending
    pub fn grounded(&self) -> Vec<NodeId> {
        self.bodies
            .values()
            .filter(|b| b.grounded)
            .map(|b| b.id)
            .collect()
    }

    pub fn incident_edges(&self, id: NodeId) -> impl Iterator<Item = &JointEdge> {
        self.edges.iter().filter(move |e| e.touches(id))
    }

    pub fn degree(&self, id: NodeId) -> usize {
        self.incident_edges(id).count()
    }

    pub(crate) fn body_mut(&mut self, id: NodeId) -> Option<&mut RigidBody> {
        self.bodies.get_mut(&id)
    }

    pub(crate) fn remove_body(&mut self, id: NodeId) -> Option<RigidBody> {
        self.bodies.remove(&id)
    }

    pub(crate) fn edges_mut(&mut self) -> &mut Vec<JointEdge> {
        &mut self.edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cad::{AnalyzedBody, AssemblyFixture};
    use crate::geometry::Pose;

    fn body(id: u32, grounded: bool, group: Option<&str>) -> AnalyzedBody {
        AnalyzedBody {
            id,
            name: format!("body{id}"),
            components: vec![ComponentId::new(format!("part{id}"))],
            grounded,
            mass: None,
            group: group.map(str::to_string),
        }
    }

    fn fixture() -> AssemblyFixture {
        AssemblyFixture::new("bot.iam")
            .with_occurrence("part0", None, Pose::default(), None)
            .with_occurrence("part1", None, Pose::from_position([0.0, 1.0, 0.0]), None)
            .with_occurrence("part2", None, Pose::default(), None)
    }

    #[test]
    fn test_from_analysis_attaches_models() {
        let fixture = fixture()
            .with_body(body(0, true, None))
            .with_body(body(1, false, Some("arm")))
            .with_connection(0, 1, 1.0)
            .with_group(CustomRigidGroup::new("arm", "Arm"));
        let ctx = fixture.context();

        let graph = RigidGraph::from_analysis(
            &fixture,
            &ctx,
            &fixture.analysis,
            &fixture.groups,
            1.0,
        )
        .unwrap();

        assert_eq!(graph.body_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.grounded(), vec![NodeId(0)]);

        let arm = graph.body(NodeId(1)).unwrap();
        assert!(matches!(&arm.model, Some(GroupModel::Custom(g)) if g.name == "Arm"));
        assert_eq!(arm.world_transform.w_axis.y, 1.0);

        let base = graph.body(NodeId(0)).unwrap();
        assert!(matches!(&base.model, Some(GroupModel::Cad { name }) if name == "body0"));
    }

    #[test]
    fn test_from_analysis_rejects_unknown_endpoint() {
        let fixture = fixture()
            .with_body(body(0, true, None))
            .with_connection(0, 5, 1.0);
        let ctx = fixture.context();

        let err = RigidGraph::from_analysis(&fixture, &ctx, &fixture.analysis, &[], 1.0)
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownNode { node: NodeId(5), .. }));
    }

    #[test]
    fn test_from_analysis_rejects_unknown_group() {
        let fixture = fixture().with_body(body(0, true, Some("ghost")));
        let ctx = fixture.context();

        let err = RigidGraph::from_analysis(&fixture, &ctx, &fixture.analysis, &[], 1.0)
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownGroup { .. }));
    }

    #[test]
    fn test_from_analysis_rejects_shared_group() {
        let fixture = fixture()
            .with_body(body(0, true, Some("g")))
            .with_body(body(1, false, Some("g")))
            .with_group(CustomRigidGroup::new("g", "G"));
        let ctx = fixture.context();

        let err = RigidGraph::from_analysis(
            &fixture,
            &ctx,
            &fixture.analysis,
            &fixture.groups,
            1.0,
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::SharedGroup { .. }));
    }

    #[test]
    fn test_connect_validation() {
        let mut graph = RigidGraph::new();
        graph.add_body(RigidBody::new(0, "a")).unwrap();
        graph.add_body(RigidBody::new(1, "b")).unwrap();

        assert!(matches!(
            graph.connect(NodeId(0), NodeId(0), 1.0, JointGeometry::default()),
            Err(GraphError::SelfLoop { .. })
        ));
        assert!(matches!(
            graph.connect(NodeId(0), NodeId(1), f32::NAN, JointGeometry::default()),
            Err(GraphError::InvalidWeight { .. })
        ));
        assert!(matches!(
            graph.connect(NodeId(0), NodeId(1), -1.0, JointGeometry::default()),
            Err(GraphError::InvalidWeight { .. })
        ));
        assert!(matches!(
            graph.connect(NodeId(0), NodeId(1), 0.0, JointGeometry::default()),
            Err(GraphError::InvalidWeight { .. })
        ));
        assert!(matches!(
            graph.add_body(RigidBody::new(1, "dup")),
            Err(GraphError::DuplicateBody(NodeId(1)))
        ));

        let edge = graph
            .connect(NodeId(0), NodeId(1), 2.0, JointGeometry::default())
            .unwrap();
        assert_eq!(edge, EdgeId(0));
        assert_eq!(graph.degree(NodeId(1)), 1);
        assert_eq!(graph.edges()[0].other(NodeId(1)), Some(NodeId(0)));
    }

    #[test]
    fn test_mass_combine() {
        let a = MassProperties {
            mass: 1.0,
            center_of_mass: Vec3::ZERO,
        };
        let b = MassProperties {
            mass: 3.0,
            center_of_mass: Vec3::new(4.0, 0.0, 0.0),
        };
        let c = a.combine(&b);
        assert_eq!(c.mass, 4.0);
        assert_eq!(c.center_of_mass, Vec3::new(3.0, 0.0, 0.0));
    }
}
