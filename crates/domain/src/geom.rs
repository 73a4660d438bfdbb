//! World geometry: positions, named areas, and the town map.

use serde::{Deserialize, Serialize};

/// Side length of the square world, in world units.
pub const WORLD_SIZE: f32 = 2048.0;

/// The standing stone in the forest that the opening missions point at.
pub const FOREST_SHRINE: Vec2 = Vec2 { x: 288.0, y: 240.0 };

// =============================================================================
// Vec2
// =============================================================================

/// A 2D position or displacement in world units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (other - self).length()
    }

    /// Unit vector from `self` toward `other`, or `None` when the points
    /// coincide (no direction exists).
    pub fn toward(self, other: Vec2) -> Option<Vec2> {
        let delta = other - self;
        let len = delta.length();
        if len < f32::EPSILON {
            None
        } else {
            Some(Vec2::new(delta.x / len, delta.y / len))
        }
    }

    /// Clamp into the world square.
    pub fn clamp_to_world(self) -> Vec2 {
        Vec2::new(self.x.clamp(0.0, WORLD_SIZE), self.y.clamp(0.0, WORLD_SIZE))
    }
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

// =============================================================================
// Rect
// =============================================================================

/// Axis-aligned rectangle, inclusive of its min edge and exclusive of max.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub const fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min: Vec2 { x: min_x, y: min_y },
            max: Vec2 { x: max_x, y: max_y },
        }
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x < self.max.x && p.y >= self.min.y && p.y < self.max.y
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    pub fn clamp(&self, p: Vec2) -> Vec2 {
        Vec2::new(
            p.x.clamp(self.min.x, self.max.x - 1.0),
            p.y.clamp(self.min.y, self.max.y - 1.0),
        )
    }

    /// Distance from `p` to the nearest point of the rect (0 when inside).
    pub fn distance_to(&self, p: Vec2) -> f32 {
        self.clamp(p).distance(p)
    }

    /// A point inside the rect picked from two uniform draws.
    ///
    /// `draw(n)` must return a uniform value in `0..n`.
    pub fn sample(&self, draw: &mut dyn FnMut(u32) -> u32) -> Vec2 {
        let w = (self.max.x - self.min.x).max(1.0) as u32;
        let h = (self.max.y - self.min.y).max(1.0) as u32;
        Vec2::new(
            self.min.x + draw(w) as f32,
            self.min.y + draw(h) as f32,
        )
    }
}

// =============================================================================
// Named areas
// =============================================================================

/// The named districts of the town. Every routine phase, rumor entry, and
/// area-scoped objective refers to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Area {
    TownSquare,
    MarketRow,
    Smithy,
    Chapel,
    Docks,
    Farmland,
    Forest,
    Riverside,
    Tavern,
    ResidentialLanes,
}

impl Area {
    pub const ALL: [Area; 10] = [
        Area::TownSquare,
        Area::MarketRow,
        Area::Smithy,
        Area::Chapel,
        Area::Docks,
        Area::Farmland,
        Area::Forest,
        Area::Riverside,
        Area::Tavern,
        Area::ResidentialLanes,
    ];

    pub fn bounds(self) -> Rect {
        match self {
            Area::TownSquare => Rect::new(896.0, 896.0, 1152.0, 1152.0),
            Area::MarketRow => Rect::new(1152.0, 896.0, 1536.0, 1152.0),
            Area::Smithy => Rect::new(640.0, 1152.0, 896.0, 1408.0),
            Area::Chapel => Rect::new(640.0, 640.0, 896.0, 896.0),
            Area::Docks => Rect::new(1664.0, 640.0, 1984.0, 1152.0),
            Area::Farmland => Rect::new(256.0, 1152.0, 768.0, 1664.0),
            Area::Forest => Rect::new(64.0, 64.0, 640.0, 640.0),
            Area::Riverside => Rect::new(1536.0, 1280.0, 1984.0, 1792.0),
            Area::Tavern => Rect::new(1152.0, 1152.0, 1408.0, 1408.0),
            Area::ResidentialLanes => Rect::new(896.0, 1408.0, 1408.0, 1792.0),
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Area::TownSquare => "town square",
            Area::MarketRow => "market row",
            Area::Smithy => "smithy",
            Area::Chapel => "chapel",
            Area::Docks => "docks",
            Area::Farmland => "farmland",
            Area::Forest => "forest",
            Area::Riverside => "riverside",
            Area::Tavern => "tavern",
            Area::ResidentialLanes => "residential lanes",
        }
    }

    /// Parse a player-typed area name. Accepts the display name and a few
    /// common shorthands.
    pub fn parse(text: &str) -> Option<Area> {
        let needle = text.trim().to_lowercase();
        match needle.as_str() {
            "town square" | "square" => Some(Area::TownSquare),
            "market row" | "market" => Some(Area::MarketRow),
            "smithy" | "forge" => Some(Area::Smithy),
            "chapel" => Some(Area::Chapel),
            "docks" | "dock" => Some(Area::Docks),
            "farmland" | "farms" | "fields" => Some(Area::Farmland),
            "forest" | "woods" => Some(Area::Forest),
            "riverside" | "river" => Some(Area::Riverside),
            "tavern" | "inn" => Some(Area::Tavern),
            "residential lanes" | "lanes" | "homes" => Some(Area::ResidentialLanes),
            _ => None,
        }
    }

    /// The area whose bounds contain `p`, if any. Streets between districts
    /// belong to no area.
    pub fn containing(p: Vec2) -> Option<Area> {
        Area::ALL.into_iter().find(|a| a.bounds().contains(p))
    }

    /// The area nearest to `p`; equals `containing(p)` whenever that is Some.
    pub fn nearest(p: Vec2) -> Area {
        let mut best = Area::TownSquare;
        let mut best_dist = f32::MAX;
        for area in Area::ALL {
            let d = area.bounds().distance_to(p);
            if d < best_dist {
                best = area;
                best_dist = d;
            }
        }
        best
    }
}

impl std::fmt::Display for Area {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn areas_do_not_overlap() {
        for (i, a) in Area::ALL.iter().enumerate() {
            for b in &Area::ALL[i + 1..] {
                let ra = a.bounds();
                let rb = b.bounds();
                let separated = ra.max.x <= rb.min.x
                    || rb.max.x <= ra.min.x
                    || ra.max.y <= rb.min.y
                    || rb.max.y <= ra.min.y;
                assert!(separated, "{a} overlaps {b}");
            }
        }
    }

    #[test]
    fn every_area_contains_its_own_center() {
        for area in Area::ALL {
            let center = area.bounds().center();
            assert_eq!(Area::containing(center), Some(area));
            assert_eq!(Area::nearest(center), area);
        }
    }

    #[test]
    fn points_between_districts_belong_to_no_area() {
        // Just west of the town square, in the gap toward the chapel block.
        let street = Vec2::new(900.0, 200.0);
        assert_eq!(Area::containing(street), None);
    }

    #[test]
    fn nearest_is_total_even_outside_all_bounds() {
        let corner = Vec2::new(0.0, 2047.0);
        // Farmland is the closest district to the southwest corner.
        assert_eq!(Area::nearest(corner), Area::Farmland);
    }

    #[test]
    fn shrine_sits_in_the_forest() {
        assert_eq!(Area::containing(FOREST_SHRINE), Some(Area::Forest));
    }

    #[test]
    fn toward_returns_unit_vectors() {
        let dir = Vec2::new(0.0, 0.0)
            .toward(Vec2::new(3.0, 4.0))
            .unwrap();
        assert!((dir.length() - 1.0).abs() < 1e-5);
        assert!(Vec2::new(5.0, 5.0).toward(Vec2::new(5.0, 5.0)).is_none());
    }

    #[test]
    fn sample_stays_inside_the_rect() {
        let rect = Area::Tavern.bounds();
        let mut seq = [3u32, 250, 10, 0, 255, 99].into_iter().cycle();
        let mut draw = move |n: u32| seq.next().unwrap_or(0) % n.max(1);
        for _ in 0..6 {
            let p = rect.sample(&mut draw);
            assert!(rect.contains(p), "{p:?}");
        }
    }

    #[test]
    fn clamp_to_world_bounds_positions() {
        let p = Vec2::new(-50.0, 9000.0).clamp_to_world();
        assert_eq!(p, Vec2::new(0.0, WORLD_SIZE));
    }
}
