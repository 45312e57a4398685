use std::ops::{Add, Mul, Sub};

/// A point in normalized tile coordinates ([0,1]² covers the tile, y up).
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct Pt {
    pub x: f64,
    pub y: f64,
}

impl Pt {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn dot(self, other: Self) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y))
    }

    pub fn max(self, other: Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y))
    }
}

impl Add for Pt {
    type Output = Pt;

    fn add(self, rhs: Pt) -> Pt {
        Pt::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Pt {
    type Output = Pt;

    fn sub(self, rhs: Pt) -> Pt {
        Pt::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Pt {
    type Output = Pt;

    fn mul(self, rhs: f64) -> Pt {
        Pt::new(self.x * rhs, self.y * rhs)
    }
}

pub type Line = Vec<Pt>;
pub type MultiLine = Vec<Line>;

/// Closed ring; first and last points are equal.
pub type Ring = Vec<Pt>;

/// One outer ring followed by zero or more inner rings.
pub type Polygon = Vec<Ring>;
pub type MultiPolygon = Vec<Polygon>;

/// Signed shoelace area; counter-clockwise rings are positive.
pub fn ring_area(ring: &[Pt]) -> f64 {
    let mut area = 0.0;
    let mut j = ring.len().wrapping_sub(1);

    for i in 0..ring.len() {
        area += (ring[j].x - ring[i].x) * (ring[j].y + ring[i].y);
        j = i;
    }

    area / 2.0
}

/// Even-odd test against a single ring.
pub fn ring_contains(ring: &[Pt], p: Pt) -> bool {
    let mut inside = false;
    let mut j = ring.len().wrapping_sub(1);

    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);

        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }

        j = i;
    }

    inside
}

/// Even-odd test against a multi-ring polygon; holes flip the result.
pub fn polygon_contains(polygon: &[Ring], p: Pt) -> bool {
    polygon
        .iter()
        .fold(false, |inside, ring| inside ^ ring_contains(ring, p))
}

/// Min/max fold over a point sequence.
pub fn envelope<'a>(pts: impl IntoIterator<Item = &'a Pt>) -> (Pt, Pt) {
    let mut min = Pt::new(f64::INFINITY, f64::INFINITY);
    let mut max = Pt::new(f64::NEG_INFINITY, f64::NEG_INFINITY);

    for p in pts {
        min = min.min(*p);
        max = max.max(*p);
    }

    (min, max)
}

/// Axis-aligned bounding box, also used for longitude/latitude windows.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub const fn empty() -> Self {
        Self::new(
            f64::INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
        )
    }

    pub fn extend(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square_ccw() -> Ring {
        vec![
            Pt::new(0.0, 0.0),
            Pt::new(1.0, 0.0),
            Pt::new(1.0, 1.0),
            Pt::new(0.0, 1.0),
            Pt::new(0.0, 0.0),
        ]
    }

    #[test]
    fn area_sign() {
        let ccw = unit_square_ccw();

        assert!((ring_area(&ccw) - 1.0).abs() < 1e-12);

        let cw: Ring = ccw.iter().rev().copied().collect();

        assert!((ring_area(&cw) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn point_in_ring() {
        let ring = unit_square_ccw();

        assert!(ring_contains(&ring, Pt::new(0.5, 0.5)));
        assert!(!ring_contains(&ring, Pt::new(1.5, 0.5)));
        assert!(!ring_contains(&ring, Pt::new(-0.1, 0.9)));
    }

    #[test]
    fn hole_flips_containment() {
        let outer = unit_square_ccw();
        let hole = vec![
            Pt::new(0.25, 0.25),
            Pt::new(0.75, 0.25),
            Pt::new(0.75, 0.75),
            Pt::new(0.25, 0.75),
            Pt::new(0.25, 0.25),
        ];
        let polygon = vec![outer, hole];

        assert!(!polygon_contains(&polygon, Pt::new(0.5, 0.5)));
        assert!(polygon_contains(&polygon, Pt::new(0.1, 0.1)));
    }

    #[test]
    fn envelope_fold() {
        let pts = vec![Pt::new(0.2, 0.9), Pt::new(-1.0, 0.3), Pt::new(0.5, 2.0)];
        let (min, max) = envelope(&pts);

        assert_eq!(min, Pt::new(-1.0, 0.3));
        assert_eq!(max, Pt::new(0.5, 2.0));
    }

    #[test]
    fn bbox_ops() {
        let mut b = BBox::empty();

        b.extend(1.0, 2.0);
        b.extend(-1.0, 4.0);

        assert!(b.contains(0.0, 3.0));
        assert!(!b.contains(2.0, 3.0));
        assert!(b.intersects(&BBox::new(0.5, 1.0, 3.0, 2.5)));
        assert!(!b.intersects(&BBox::new(2.0, 0.0, 3.0, 1.0)));
    }
}
