// SPDX-License-Identifier: CEPL-1.0
//! The demo cube and its per-frame transform.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(crate) struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
}

/// Contents of the per-image uniform buffer (std140: one column-major mat4).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct FrameUniforms {
    pub mvp: [[f32; 4]; 4],
}

pub(crate) const CUBE_VERTEX_COUNT: u32 = 36;

const EYE: Vec3 = Vec3::new(0.0, 3.0, 5.0);
const FOV_Y_DEGREES: f32 = 45.0;

// Each face: four corners counter-clockwise seen from outside, and a color.
const FACES: [([[f32; 3]; 4], [f32; 3]); 6] = [
    // +Z
    (
        [[-1.0, -1.0, 1.0], [1.0, -1.0, 1.0], [1.0, 1.0, 1.0], [-1.0, 1.0, 1.0]],
        [1.0, 0.0, 0.0],
    ),
    // -Z
    (
        [[1.0, -1.0, -1.0], [-1.0, -1.0, -1.0], [-1.0, 1.0, -1.0], [1.0, 1.0, -1.0]],
        [0.0, 1.0, 0.0],
    ),
    // +X
    (
        [[1.0, -1.0, 1.0], [1.0, -1.0, -1.0], [1.0, 1.0, -1.0], [1.0, 1.0, 1.0]],
        [0.0, 0.0, 1.0],
    ),
    // -X
    (
        [[-1.0, -1.0, -1.0], [-1.0, -1.0, 1.0], [-1.0, 1.0, 1.0], [-1.0, 1.0, -1.0]],
        [1.0, 1.0, 0.0],
    ),
    // +Y
    (
        [[-1.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, -1.0], [-1.0, 1.0, -1.0]],
        [1.0, 0.0, 1.0],
    ),
    // -Y
    (
        [[-1.0, -1.0, -1.0], [1.0, -1.0, -1.0], [1.0, -1.0, 1.0], [-1.0, -1.0, 1.0]],
        [0.0, 1.0, 1.0],
    ),
];

/// Twelve triangles, front faces counter-clockwise.
pub(crate) fn cube_vertices() -> Vec<Vertex> {
    let mut out = Vec::with_capacity(CUBE_VERTEX_COUNT as usize);
    for (corners, color) in FACES {
        for i in [0, 1, 2, 0, 2, 3] {
            out.push(Vertex {
                pos: corners[i],
                color,
            });
        }
    }
    out
}

/// Model-view-projection for the cube rotated `angle_degrees` about Y.
/// Clip-space Y is flipped to match Vulkan's downward framebuffer axis.
pub(crate) fn spin_mvp(angle_degrees: f32, width: u32, height: u32) -> Mat4 {
    let aspect = width.max(1) as f32 / height.max(1) as f32;
    let mut proj = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, 0.1, 100.0);
    proj.y_axis.y *= -1.0;
    let view = Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Y);
    let model = Mat4::from_rotation_y(angle_degrees.to_radians());
    proj * view * model
}

impl FrameUniforms {
    pub fn from_mvp(mvp: Mat4) -> Self {
        Self {
            mvp: mvp.to_cols_array_2d(),
        }
    }
}
