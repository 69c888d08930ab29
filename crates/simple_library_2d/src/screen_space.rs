//! Converts window pixel coordinates (origin top-left, y down) into the
//! clip-space vertices the pipelines consume.

use bevy_math::Vec2;

use crate::graphics_device::ColorVertex;
use crate::graphics_device::TexturedVertex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenSpace {
    size: Vec2,
}

impl ScreenSpace {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Vec2::new(width.max(1) as f32, height.max(1) as f32),
        }
    }

    pub fn to_clip(&self, pixel: Vec2) -> [f32; 3] {
        let unit = pixel / self.size;
        [unit.x * 2.0 - 1.0, 1.0 - unit.y * 2.0, 0.0]
    }

    pub fn triangle(
        &self,
        lower_left: Vec2,
        upper_left: Vec2,
        lower_right: Vec2,
        color: [f32; 4],
    ) -> [ColorVertex; 3] {
        [lower_left, upper_left, lower_right].map(|corner| ColorVertex {
            position: self.to_clip(corner),
            color,
        })
    }

    /// Two triangles sharing the lower-left to upper-right diagonal.
    pub fn rect(
        &self,
        lower_left: Vec2,
        upper_left: Vec2,
        upper_right: Vec2,
        lower_right: Vec2,
        color: [f32; 4],
    ) -> [ColorVertex; 6] {
        [
            lower_left,
            upper_left,
            upper_right,
            lower_left,
            upper_right,
            lower_right,
        ]
        .map(|corner| ColorVertex {
            position: self.to_clip(corner),
            color,
        })
    }

    /// Axis-aligned quad with its top-left corner at `top_left`, `size` pixels large.
    pub fn textured_quad(&self, top_left: Vec2, size: Vec2) -> [TexturedVertex; 6] {
        let bottom_right = top_left + size;
        let lower_left = TexturedVertex {
            position: self.to_clip(Vec2::new(top_left.x, bottom_right.y)),
            uv: [0.0, 1.0],
        };
        let upper_left = TexturedVertex {
            position: self.to_clip(top_left),
            uv: [0.0, 0.0],
        };
        let upper_right = TexturedVertex {
            position: self.to_clip(Vec2::new(bottom_right.x, top_left.y)),
            uv: [1.0, 0.0],
        };
        let lower_right = TexturedVertex {
            position: self.to_clip(bottom_right),
            uv: [1.0, 1.0],
        };
        [
            lower_left,
            upper_left,
            upper_right,
            lower_left,
            upper_right,
            lower_right,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners_map_to_clip_extremes() {
        let space = ScreenSpace::new(800, 600);
        assert_eq!(space.to_clip(Vec2::ZERO), [-1.0, 1.0, 0.0]);
        assert_eq!(space.to_clip(Vec2::new(800.0, 600.0)), [1.0, -1.0, 0.0]);
        assert_eq!(space.to_clip(Vec2::new(400.0, 300.0)), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn rect_splits_along_the_diagonal() {
        let space = ScreenSpace::new(2, 2);
        let white = [1.0; 4];
        let vertices = space.rect(
            Vec2::new(0.0, 2.0),
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 2.0),
            white,
        );
        assert_eq!(vertices[0].position, vertices[3].position);
        assert_eq!(vertices[2].position, vertices[4].position);
        assert_eq!(vertices[5].position, [1.0, -1.0, 0.0]);
    }

    #[test]
    fn textured_quad_spans_its_size() {
        let space = ScreenSpace::new(100, 100);
        let quad = space.textured_quad(Vec2::new(10.0, 20.0), Vec2::new(50.0, 30.0));
        assert_eq!(quad[1].uv, [0.0, 0.0]);
        assert_eq!(quad[1].position, space.to_clip(Vec2::new(10.0, 20.0)));
        assert_eq!(quad[5].position, space.to_clip(Vec2::new(60.0, 50.0)));
    }
}
