use crate::core::models::particle::EulerZxz;
use nalgebra::{Point3, Rotation3, Vector3};

/// Rotation taking a particle's local frame into the tomogram frame.
pub fn euler_zxz_rotation(angles: &EulerZxz) -> Rotation3<f64> {
    let rz_phi = Rotation3::from_axis_angle(&Vector3::z_axis(), angles.phi.to_radians());
    let rx_theta = Rotation3::from_axis_angle(&Vector3::x_axis(), angles.theta.to_radians());
    let rz_psi = Rotation3::from_axis_angle(&Vector3::z_axis(), angles.psi.to_radians());
    rz_phi * rx_theta * rz_psi
}

pub fn apply_local_offset(
    position: &Point3<f64>,
    orientation: &EulerZxz,
    offset: &Vector3<f64>,
) -> Point3<f64> {
    position + euler_zxz_rotation(orientation) * offset
}

/// The particle's local Z axis expressed in the tomogram frame.
pub fn rotation_axis(orientation: &EulerZxz) -> Vector3<f64> {
    euler_zxz_rotation(orientation) * Vector3::z()
}
