use crate::core::utils::geometry;
use nalgebra::{Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Euler angles in the ZXZ convention, in degrees.
///
/// The rotation taking a particle's local frame into the tomogram frame is
/// `Rz(phi) * Rx(theta) * Rz(psi)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EulerZxz {
    pub phi: f64,
    pub theta: f64,
    pub psi: f64,
}

impl EulerZxz {
    pub fn new(phi: f64, theta: f64, psi: f64) -> Self {
        Self { phi, theta, psi }
    }

    #[inline]
    pub fn to_rotation(&self) -> Rotation3<f64> {
        geometry::euler_zxz_rotation(self)
    }
}

/// Position and orientation of a particle, the part the aligner consumes and refines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Point3<f64>,
    pub orientation: EulerZxz,
}

impl Pose {
    pub fn new(position: Point3<f64>, orientation: EulerZxz) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Returns the pose reached by moving `offset` along this pose's local axes.
    ///
    /// The orientation is carried over unchanged; the aligner is expected to refine it.
    pub fn neighbor(&self, offset: &Vector3<f64>) -> Pose {
        Pose {
            position: geometry::apply_local_offset(&self.position, &self.orientation, offset),
            orientation: self.orientation,
        }
    }
}

/// An accepted particle.
///
/// `particle_id` is only unique within `source_round` until the catalog is written, at which
/// point every emitted particle is renumbered.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleRecord {
    pub position: Point3<f64>,
    pub orientation: EulerZxz,
    pub ccc: f64,
    pub wedge_weight: f64,
    pub source_round: u32,
    pub particle_id: u32,
}

impl ParticleRecord {
    /// Builds a seed record. Seeds carry no alignment score yet, so they are given a perfect
    /// one; they never reach a catalog directly.
    pub fn seed(particle_id: u32, pose: Pose) -> Self {
        Self {
            position: pose.position,
            orientation: pose.orientation,
            ccc: 1.0,
            wedge_weight: 1.0,
            source_round: 0,
            particle_id,
        }
    }

    #[inline]
    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.orientation)
    }

    #[inline]
    pub fn coords(&self) -> [f64; 3] {
        [self.position.x, self.position.y, self.position.z]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    #[test]
    fn neighbor_of_identity_pose_moves_along_global_axes() {
        let pose = Pose::new(Point3::new(10.0, 20.0, 30.0), EulerZxz::default());
        let next = pose.neighbor(&Vector3::new(5.0, 0.0, 0.0));
        assert!((next.position - Point3::new(15.0, 20.0, 30.0)).norm() < TOLERANCE);
        assert_eq!(next.orientation, pose.orientation);
    }

    #[test]
    fn neighbor_follows_local_frame_of_rotated_pose() {
        let pose = Pose::new(Point3::origin(), EulerZxz::new(90.0, 0.0, 0.0));
        let next = pose.neighbor(&Vector3::new(10.0, 0.0, 0.0));
        assert!((next.position - Point3::new(0.0, 10.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn seed_record_starts_in_round_zero() {
        let seed = ParticleRecord::seed(
            7,
            Pose::new(Point3::new(1.0, 2.0, 3.0), EulerZxz::default()),
        );
        assert_eq!(seed.source_round, 0);
        assert_eq!(seed.particle_id, 7);
        assert_eq!(seed.coords(), [1.0, 2.0, 3.0]);
    }
}
