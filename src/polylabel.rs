use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::geom::{envelope, ring_contains, Pt, Polygon};

fn seg_dist_sq(p: Pt, a: Pt, b: Pt) -> f64 {
    let mut x = a.x;
    let mut y = a.y;
    let dx = b.x - x;
    let dy = b.y - y;

    if dx != 0.0 || dy != 0.0 {
        let t = ((p.x - x) * dx + (p.y - y) * dy) / (dx * dx + dy * dy);

        if t > 1.0 {
            x = b.x;
            y = b.y;
        } else if t > 0.0 {
            x += dx * t;
            y += dy * t;
        }
    }

    let dx = p.x - x;
    let dy = p.y - y;

    dx * dx + dy * dy
}

/// Signed distance from a point to the polygon outline; negative outside.
fn point_to_polygon_dist(p: Pt, polygon: &Polygon) -> f64 {
    let mut min_dist_sq = f64::INFINITY;
    let mut inside = false;

    for ring in polygon {
        inside ^= ring_contains(ring, p);

        let mut j = ring.len().wrapping_sub(1);

        for i in 0..ring.len() {
            min_dist_sq = min_dist_sq.min(seg_dist_sq(p, ring[i], ring[j]));
            j = i;
        }
    }

    if inside {
        min_dist_sq.sqrt()
    } else {
        -min_dist_sq.sqrt()
    }
}

#[derive(Clone, Copy)]
struct Cell {
    c: Pt,
    h: f64,
    d: f64,
    max: f64,
}

impl Cell {
    fn new(c: Pt, h: f64, polygon: &Polygon) -> Self {
        let d = point_to_polygon_dist(c, polygon);

        Self {
            c,
            h,
            d,
            max: d + h * std::f64::consts::SQRT_2,
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.max == other.max
    }
}

impl Eq for Cell {}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        self.max.total_cmp(&other.max)
    }
}

fn centroid_cell(polygon: &Polygon) -> Cell {
    let ring = &polygon[0];
    let mut area = 0.0;
    let mut c = Pt::new(0.0, 0.0);
    let mut j = ring.len().wrapping_sub(1);

    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);
        let f = a.x * b.y - b.x * a.y;

        c.x += (a.x + b.x) * f;
        c.y += (a.y + b.y) * f;
        area += f * 3.0;
        j = i;
    }

    let center = if area == 0.0 { ring[0] } else { c * (1.0 / area) };

    Cell::new(center, 0.0, polygon)
}

/// Pole of inaccessibility: the interior point farthest from the polygon
/// outline, found by quadtree refinement down to `precision`.
pub fn polylabel(polygon: &Polygon, precision: f64) -> Pt {
    let (min, max) = envelope(&polygon[0]);
    let size = max - min;
    let cell_size = size.x.min(size.y);

    if cell_size == 0.0 {
        return min;
    }

    let mut h = cell_size / 2.0;
    let mut queue = BinaryHeap::new();

    // cover the polygon with the initial cell grid
    let mut x = min.x;

    while x < max.x {
        let mut y = min.y;

        while y < max.y {
            queue.push(Cell::new(Pt::new(x + h, y + h), h, polygon));
            y += cell_size;
        }

        x += cell_size;
    }

    let mut best = centroid_cell(polygon);

    let bbox_cell = Cell::new(min + size * 0.5, 0.0, polygon);

    if bbox_cell.d > best.d {
        best = bbox_cell;
    }

    while let Some(cell) = queue.pop() {
        if cell.d > best.d {
            best = cell;
        }

        // no chance of a better solution inside this cell
        if cell.max - best.d <= precision {
            continue;
        }

        h = cell.h / 2.0;

        queue.push(Cell::new(Pt::new(cell.c.x - h, cell.c.y - h), h, polygon));
        queue.push(Cell::new(Pt::new(cell.c.x + h, cell.c.y - h), h, polygon));
        queue.push(Cell::new(Pt::new(cell.c.x - h, cell.c.y + h), h, polygon));
        queue.push(Cell::new(Pt::new(cell.c.x + h, cell.c.y + h), h, polygon));
    }

    best.c
}
