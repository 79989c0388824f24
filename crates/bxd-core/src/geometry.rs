//! Geometry primitives and world transform composition

use std::collections::HashSet;

use glam::{EulerRot, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::cad::{ComponentId, Occurrence};
use crate::error::BridgeError;

/// Pose (position and orientation)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub xyz: [f32; 3],
    pub rpy: [f32; 3], // roll, pitch, yaw in radians
}

impl Pose {
    pub fn new(xyz: [f32; 3], rpy: [f32; 3]) -> Self {
        Self { xyz, rpy }
    }

    pub fn from_position(xyz: [f32; 3]) -> Self {
        Self { xyz, rpy: [0.0; 3] }
    }

    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.to_quat(), self.position())
    }

    /// Decompose a rigid transform. Scale is discarded.
    pub fn from_mat4(transform: Mat4) -> Self {
        let (_, rotation, translation) = transform.to_scale_rotation_translation();
        let (roll, pitch, yaw) = rotation.to_euler(EulerRot::XYZ);
        Self {
            xyz: translation.to_array(),
            rpy: [roll, pitch, yaw],
        }
    }

    pub fn to_quat(&self) -> Quat {
        Quat::from_euler(EulerRot::XYZ, self.rpy[0], self.rpy[1], self.rpy[2])
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from(self.xyz)
    }
}

/// Transform of `child` expressed in the frame of `parent`
pub fn relative_transform(parent: Mat4, child: Mat4) -> Mat4 {
    parent.inverse() * child
}

/// Compose the world transform of an occurrence by walking its parent chain.
///
/// `lookup` answers the local transform and parent of one occurrence. The
/// chain is applied root first, so the result is
/// `root.transform * ... * parent.transform * occurrence.transform`.
pub fn world_transform<F>(component: &ComponentId, mut lookup: F) -> Result<Mat4, BridgeError>
where
    F: FnMut(&ComponentId) -> Option<Occurrence>,
{
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(component.clone());

    while let Some(id) = current {
        if !seen.insert(id.clone()) {
            return Err(BridgeError::OccurrenceCycle(id));
        }
        let occurrence = lookup(&id).ok_or_else(|| BridgeError::UnknownOccurrence(id.clone()))?;
        current = occurrence.parent.clone();
        chain.push(occurrence.transform);
    }

    Ok(chain
        .into_iter()
        .rev()
        .fold(Mat4::IDENTITY, |world, local| world * local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashMap;

    fn occ(id: &str, parent: Option<&str>, transform: Mat4) -> Occurrence {
        Occurrence {
            id: ComponentId::from(id),
            parent: parent.map(ComponentId::from),
            transform,
        }
    }

    #[test]
    fn test_world_transform_composes_parent_first() {
        let table: HashMap<ComponentId, Occurrence> = [
            occ("base", None, Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0))),
            occ(
                "arm",
                Some("base"),
                Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2),
            ),
            occ(
                "claw",
                Some("arm"),
                Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)),
            ),
        ]
        .into_iter()
        .map(|o| (o.id.clone(), o))
        .collect();

        let world = world_transform(&ComponentId::from("claw"), |id| table.get(id).cloned())
            .unwrap();
        let origin = world.transform_point3(Vec3::ZERO);

        // claw offset is rotated by the arm, then shifted by the base
        assert_relative_eq!(origin.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(origin.y, 2.0, epsilon = 1e-5);
        assert_relative_eq!(origin.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_world_transform_unknown_parent() {
        let table: HashMap<ComponentId, Occurrence> =
            [occ("orphan", Some("missing"), Mat4::IDENTITY)]
                .into_iter()
                .map(|o| (o.id.clone(), o))
                .collect();

        let result = world_transform(&ComponentId::from("orphan"), |id| table.get(id).cloned());
        assert!(matches!(result, Err(BridgeError::UnknownOccurrence(id)) if id.as_str() == "missing"));
    }

    #[test]
    fn test_world_transform_detects_cycle() {
        let table: HashMap<ComponentId, Occurrence> = [
            occ("a", Some("b"), Mat4::IDENTITY),
            occ("b", Some("a"), Mat4::IDENTITY),
        ]
        .into_iter()
        .map(|o| (o.id.clone(), o))
        .collect();

        let result = world_transform(&ComponentId::from("a"), |id| table.get(id).cloned());
        assert!(matches!(result, Err(BridgeError::OccurrenceCycle(_))));
    }

    #[test]
    fn test_pose_roundtrips_through_mat4() {
        let pose = Pose::new([0.5, -1.0, 2.0], [0.1, 0.2, 0.3]);
        let back = Pose::from_mat4(pose.to_mat4());
        for i in 0..3 {
            assert_relative_eq!(back.xyz[i], pose.xyz[i], epsilon = 1e-5);
            assert_relative_eq!(back.rpy[i], pose.rpy[i], epsilon = 1e-5);
        }
    }

    #[test]
    fn test_relative_transform() {
        let parent = Mat4::from_translation(Vec3::new(1.0, 1.0, 0.0));
        let child = Mat4::from_translation(Vec3::new(1.0, 3.0, 0.0));
        let rel = Pose::from_mat4(relative_transform(parent, child));
        assert_relative_eq!(rel.xyz[1], 2.0, epsilon = 1e-6);
        assert_relative_eq!(rel.xyz[0], 0.0, epsilon = 1e-6);
    }
}
