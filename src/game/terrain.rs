//! Destructible terrain: an opacity mask plus geometry extraction

use glam::Vec2;

use crate::config::MapConfig;

use super::physics::{PhysicsWorld, Segment};

const SOLID: u8 = 255;
const AIR: u8 = 0;

/// Per-pixel opacity of the terrain; 0 is air, 255 is solid ground
#[derive(Debug, Clone)]
pub struct TerrainMask {
    width: usize,
    height: usize,
    alpha: Vec<u8>,
}

impl TerrainMask {
    /// Fill every pixel below the map's ground profile
    pub fn from_map(map: &MapConfig) -> Self {
        let width = map.world_size.x.max(1.0) as usize;
        let height = map.world_size.y.max(1.0) as usize;
        let mut alpha = vec![AIR; width * height];
        for x in 0..width {
            let surface = map.ground_height(x as f32).max(0.0) as usize;
            for y in surface.min(height)..height {
                alpha[y * width + x] = SOLID;
            }
        }
        Self {
            width,
            height,
            alpha,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Opacity at a world point; outside the mask is air
    pub fn sample(&self, point: Vec2) -> f32 {
        if point.x < 0.0 || point.y < 0.0 {
            return AIR as f32;
        }
        let (x, y) = (point.x as usize, point.y as usize);
        if x >= self.width || y >= self.height {
            return AIR as f32;
        }
        self.alpha[y * self.width + x] as f32
    }

    #[cfg(test)]
    pub fn is_solid(&self, point: Vec2) -> bool {
        self.sample(point) > 0.0
    }

    /// Clear a disc of the mask
    pub fn erase_circle(&mut self, center: Vec2, radius: f32) {
        if radius <= 0.0 {
            return;
        }
        let min_x = (center.x - radius).floor().max(0.0) as usize;
        let min_y = (center.y - radius).floor().max(0.0) as usize;
        let max_x = ((center.x + radius).ceil().max(0.0) as usize).min(self.width);
        let max_y = ((center.y + radius).ceil().max(0.0) as usize).min(self.height);
        let r2 = radius * radius;
        for y in min_y..max_y {
            for x in min_x..max_x {
                let d = Vec2::new(x as f32, y as f32) - center;
                if d.length_squared() <= r2 {
                    self.alpha[y * self.width + x] = AIR;
                }
            }
        }
    }
}

/// Turns a terrain mask into static collision segments
pub trait GeometryExtractor {
    fn extract(&self, mask: &TerrainMask) -> Vec<Segment>;
}

/// Marching squares over a regular sample grid with interpolated edges
#[derive(Debug, Clone, Copy)]
pub struct MarchingSquares {
    pub samples_x: usize,
    pub samples_y: usize,
    /// Opacity at which a sample counts as solid
    pub threshold: f32,
}

impl Default for MarchingSquares {
    fn default() -> Self {
        Self {
            samples_x: 180,
            samples_y: 180,
            threshold: 90.0,
        }
    }
}

impl MarchingSquares {
    fn edge_point(&self, a: (Vec2, f32), b: (Vec2, f32)) -> Vec2 {
        let (pa, va) = a;
        let (pb, vb) = b;
        let denom = vb - va;
        let t = if denom.abs() < f32::EPSILON {
            0.5
        } else {
            ((self.threshold - va) / denom).clamp(0.0, 1.0)
        };
        pa + (pb - pa) * t
    }
}

impl GeometryExtractor for MarchingSquares {
    fn extract(&self, mask: &TerrainMask) -> Vec<Segment> {
        let mut segments = Vec::new();
        if self.samples_x < 2 || self.samples_y < 2 {
            return segments;
        }
        let step = Vec2::new(
            (mask.width().saturating_sub(1)) as f32 / (self.samples_x - 1) as f32,
            (mask.height().saturating_sub(1)) as f32 / (self.samples_y - 1) as f32,
        );
        let corner = |i: usize, j: usize| {
            let p = Vec2::new(i as f32 * step.x, j as f32 * step.y);
            (p, mask.sample(p))
        };

        for j in 0..self.samples_y - 1 {
            for i in 0..self.samples_x - 1 {
                let tl = corner(i, j);
                let tr = corner(i + 1, j);
                let br = corner(i + 1, j + 1);
                let bl = corner(i, j + 1);

                let solid = |c: (Vec2, f32)| c.1 > self.threshold;
                let case = (solid(tl) as u8) << 3
                    | (solid(tr) as u8) << 2
                    | (solid(br) as u8) << 1
                    | solid(bl) as u8;
                if case == 0 || case == 15 {
                    continue;
                }

                let top = || self.edge_point(tl, tr);
                let right = || self.edge_point(tr, br);
                let bottom = || self.edge_point(bl, br);
                let left = || self.edge_point(tl, bl);

                let mut push = |a: Vec2, b: Vec2| segments.push(Segment { a, b });
                match case {
                    1 | 14 => push(left(), bottom()),
                    2 | 13 => push(bottom(), right()),
                    3 | 12 => push(left(), right()),
                    4 | 11 => push(top(), right()),
                    6 | 9 => push(top(), bottom()),
                    7 | 8 => push(left(), top()),
                    5 => {
                        push(top(), right());
                        push(left(), bottom());
                    }
                    10 => {
                        push(left(), top());
                        push(bottom(), right());
                    }
                    _ => {}
                }
            }
        }
        segments
    }
}

/// Room terrain: the mask, the extractor that turns it into collision
/// geometry, and the erosion applied since the last snapshot
pub struct Terrain {
    mask: TerrainMask,
    extractor: Box<dyn GeometryExtractor>,
    erased: Vec<(Vec2, f32)>,
}

impl Terrain {
    pub fn new(mask: TerrainMask, extractor: Box<dyn GeometryExtractor>) -> Self {
        Self {
            mask,
            extractor,
            erased: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn mask(&self) -> &TerrainMask {
        &self.mask
    }

    /// Regenerate collision geometry from the current mask; returns the segment count
    pub fn rebuild(&self, physics: &mut dyn PhysicsWorld) -> usize {
        let segments = self.extractor.extract(&self.mask);
        physics.set_static_geometry(&segments);
        segments.len()
    }

    /// Carve a crater and record it for the next snapshot
    pub fn erase_circle(&mut self, center: Vec2, radius: f32, physics: &mut dyn PhysicsWorld) {
        self.mask.erase_circle(center, radius);
        self.rebuild(physics);
        self.erased.push((center, radius));
    }

    /// Craters since the previous call
    pub fn take_erased(&mut self) -> Vec<(Vec2, f32)> {
        std::mem::take(&mut self.erased)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::testing::ScriptedPhysics;

    fn flat_map(ground: f32) -> MapConfig {
        MapConfig {
            name: "flat".to_string(),
            world_size: Vec2::new(200.0, 100.0),
            max_players: 1,
            start_positions: vec![Vec2::new(50.0, 10.0)],
            start_directions: vec![Vec2::X],
            ground_profile: vec![Vec2::new(0.0, ground), Vec2::new(200.0, ground)],
        }
    }

    #[test]
    fn mask_is_solid_below_profile() {
        let mask = TerrainMask::from_map(&flat_map(60.0));
        assert_eq!((mask.width(), mask.height()), (200, 100));
        assert!(!mask.is_solid(Vec2::new(10.0, 59.0)));
        assert!(mask.is_solid(Vec2::new(10.0, 60.0)));
        assert!(!mask.is_solid(Vec2::new(-1.0, 80.0)));
        assert!(!mask.is_solid(Vec2::new(10.0, 500.0)));
    }

    #[test]
    fn erase_circle_clears_disc_only() {
        let mut mask = TerrainMask::from_map(&flat_map(50.0));
        mask.erase_circle(Vec2::new(100.0, 60.0), 10.0);
        assert!(!mask.is_solid(Vec2::new(100.0, 60.0)));
        assert!(!mask.is_solid(Vec2::new(100.0, 69.0)));
        assert!(mask.is_solid(Vec2::new(100.0, 71.0)));
        assert!(mask.is_solid(Vec2::new(150.0, 60.0)));
    }

    #[test]
    fn flat_ground_extracts_horizontal_surface() {
        let mask = TerrainMask::from_map(&flat_map(50.0));
        let extractor = MarchingSquares {
            samples_x: 21,
            samples_y: 11,
            threshold: 90.0,
        };
        let segments = extractor.extract(&mask);
        assert!(!segments.is_empty());
        for s in &segments {
            assert!((s.a.y - s.b.y).abs() < 1e-3);
            assert!(s.a.y > 49.0 && s.a.y < 60.0);
        }
    }

    #[test]
    fn crater_adds_geometry() {
        let extractor = MarchingSquares {
            samples_x: 41,
            samples_y: 21,
            threshold: 90.0,
        };
        let mut mask = TerrainMask::from_map(&flat_map(50.0));
        let before = extractor.extract(&mask).len();
        mask.erase_circle(Vec2::new(100.0, 50.0), 20.0);
        let after = extractor.extract(&mask);
        assert!(after.len() > before);
        assert!(after.iter().any(|s| s.a.y > 55.0 || s.b.y > 55.0));
    }

    #[test]
    fn empty_mask_has_no_geometry() {
        let mask = TerrainMask::from_map(&flat_map(1000.0));
        assert!(MarchingSquares::default().extract(&mask).is_empty());
    }

    #[test]
    fn erosion_rebuilds_geometry_and_is_drained_once() {
        let mut physics = ScriptedPhysics::new();
        let mut terrain = Terrain::new(
            TerrainMask::from_map(&flat_map(50.0)),
            Box::new(MarchingSquares {
                samples_x: 21,
                samples_y: 11,
                threshold: 90.0,
            }),
        );
        assert!(terrain.rebuild(&mut physics) > 0);
        assert_eq!(physics.geometry_updates, 1);

        terrain.erase_circle(Vec2::new(100.0, 50.0), 30.0, &mut physics);
        assert_eq!(physics.geometry_updates, 2);
        assert!(!terrain.mask().is_solid(Vec2::new(100.0, 70.0)));
        assert_eq!(terrain.take_erased(), vec![(Vec2::new(100.0, 50.0), 30.0)]);
        assert!(terrain.take_erased().is_empty());
    }
}
