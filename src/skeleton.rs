use nalgebra::{Matrix4, Point3, Quaternion, Translation3, UnitQuaternion, Vector3};
use crate::bfres::{Bone, RotationMode, Skeleton};

/// The bone's own rotation, from whichever representation its rotation
/// mode selects. Euler angles apply X, then Y, then Z.
pub fn bone_rotation(bone: &Bone) -> UnitQuaternion<f32> {
    match bone.rotation_mode {
        RotationMode::EulerXyz => {
            let [x, y, z, _] = bone.rotation;
            UnitQuaternion::from_euler_angles(x, y, z)
        }
        RotationMode::Quaternion => {
            let [x, y, z, w] = bone.rotation;
            UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z))
        }
    }
}

/// Scale, then rotation, then translation.
pub fn local_matrix(bone: &Bone) -> Matrix4<f32> {
    let translation = Translation3::from(Vector3::from(bone.position)).to_homogeneous();
    let scale = Matrix4::new_nonuniform_scaling(&Vector3::from(bone.scale));
    translation * bone_rotation(bone).to_homogeneous() * scale
}

/// The bone's transform relative to the model origin, folded over the
/// parent chain. Not memoized; each call re-walks the chain. Parent
/// indices are validated at parse time, and cycle-free chains are a
/// precondition.
pub fn world_matrix(bone: &Bone, skeleton: &Skeleton) -> Matrix4<f32> {
    let mut matrix = local_matrix(bone);
    let mut parent = bone.parent_index;
    while parent != -1 {
        let p = &skeleton.bones[parent as usize];
        matrix = local_matrix(p) * matrix;
        parent = p.parent_index;
    }
    matrix
}

/// Same ancestor walk as `world_matrix`, but over rotation components
/// only, so the result carries no scale or translation drift.
pub fn world_rotation(bone: &Bone, skeleton: &Skeleton) -> UnitQuaternion<f32> {
    let mut rotation = bone_rotation(bone);
    let mut parent = bone.parent_index;
    while parent != -1 {
        let p = &skeleton.bones[parent as usize];
        rotation = bone_rotation(p) * rotation;
        parent = p.parent_index;
    }
    rotation
}

pub fn world_position(bone: &Bone, skeleton: &Skeleton) -> Vector3<f32> {
    world_matrix(bone, skeleton)
        .transform_point(&Point3::origin())
        .coords
}


#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;
    use super::*;

    fn bone(parent: i16, position: [f32; 3], rotation_z: f32, scale: [f32; 3]) -> Bone {
        Bone {
            name: String::new(),
            parent_index: parent,
            rotation: [0., 0., rotation_z, 0.],
            position,
            scale,
            ..Bone::default()
        }
    }

    fn assert_mat_eq(a: &Matrix4<f32>, b: &Matrix4<f32>) {
        for i in 0 .. 4 {
            for j in 0 .. 4 {
                assert!(
                    (a[(i, j)] - b[(i, j)]).abs() < 1e-5,
                    "matrices differ at ({}, {}): {} vs {}", i, j, a, b,
                );
            }
        }
    }

    #[test]
    fn test_root_world_equals_local() {
        let root = bone(-1, [1., 2., 3.], 0.4, [1., 2., 1.]);
        let skeleton = Skeleton {
            bones: vec![root.clone()],
            matrix_to_bone_list: Vec::new(),
        };
        assert_mat_eq(&world_matrix(&root, &skeleton), &local_matrix(&root));
    }

    #[test]
    fn test_world_composes_with_parent() {
        let skeleton = Skeleton {
            bones: vec![
                bone(-1, [0., 1., 0.], FRAC_PI_2, [1., 1., 1.]),
                bone(0, [2., 0., 0.], 0., [1., 1., 1.]),
                bone(1, [0., 0., 3.], 0.3, [1., 1., 1.]),
            ],
            matrix_to_bone_list: Vec::new(),
        };
        let expected = world_matrix(&skeleton.bones[1], &skeleton)
            * local_matrix(&skeleton.bones[2]);
        assert_mat_eq(&world_matrix(&skeleton.bones[2], &skeleton), &expected);
    }

    #[test]
    fn test_child_position_rotated_into_parent_space() {
        // Parent rotates 90 degrees around Z, so the child's +X offset
        // lands on +Y.
        let skeleton = Skeleton {
            bones: vec![
                bone(-1, [0., 0., 0.], FRAC_PI_2, [1., 1., 1.]),
                bone(0, [1., 0., 0.], 0., [1., 1., 1.]),
            ],
            matrix_to_bone_list: Vec::new(),
        };
        let p = world_position(&skeleton.bones[1], &skeleton);
        assert!((p.x - 0.).abs() < 1e-5);
        assert!((p.y - 1.).abs() < 1e-5);
        assert!((p.z - 0.).abs() < 1e-5);
    }

    #[test]
    fn test_euler_and_quaternion_modes_agree() {
        let euler = bone(-1, [0.; 3], FRAC_PI_2, [1., 1., 1.]);
        let quat = Bone {
            rotation_mode: RotationMode::Quaternion,
            rotation: [0., 0., (FRAC_PI_2 / 2.).sin(), (FRAC_PI_2 / 2.).cos()],
            ..euler.clone()
        };
        assert_mat_eq(&local_matrix(&euler), &local_matrix(&quat));
    }

    #[test]
    fn test_world_rotation_ignores_scale_and_translation() {
        let skeleton = Skeleton {
            bones: vec![
                bone(-1, [5., 6., 7.], FRAC_PI_2, [3., 3., 3.]),
                bone(0, [1., 0., 0.], FRAC_PI_2, [2., 1., 1.]),
            ],
            matrix_to_bone_list: Vec::new(),
        };
        let r = world_rotation(&skeleton.bones[1], &skeleton);
        let expected = UnitQuaternion::from_euler_angles(0., 0., FRAC_PI_2 * 2.);
        assert!(r.angle_to(&expected) < 1e-5);
    }
}
