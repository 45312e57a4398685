use crate::geom::{Line, MultiLine, Pt, Ring};

/// Axis a clipper operates on.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    fn coord(self, p: Pt) -> f64 {
        match self {
            Axis::X => p.x,
            Axis::Y => p.y,
        }
    }

    /// Point on segment a-b whose coordinate on this axis is exactly `v`.
    fn cut(self, a: Pt, b: Pt, v: f64) -> Pt {
        let t = (v - self.coord(a)) / (self.coord(b) - self.coord(a));

        match self {
            Axis::X => Pt::new(v, a.y + (b.y - a.y) * t),
            Axis::Y => Pt::new(a.x + (b.x - a.x) * t, v),
        }
    }
}

/// Clip an open line against `min..=max` on one axis. A clipped line may
/// leave and re-enter the slab, so the result is a multi-line.
pub fn clip_line(line: &[Pt], axis: Axis, min: f64, max: f64) -> MultiLine {
    let mut out = MultiLine::new();
    let mut part = Line::new();

    for win in line.windows(2) {
        let (a, b) = (win[0], win[1]);
        let ak = axis.coord(a);
        let bk = axis.coord(b);
        let d = bk - ak;

        // portion of the segment inside the slab, parameterized on [0,1]
        let (mut t0, mut t1) = (0.0f64, 1.0f64);

        if d == 0.0 {
            if ak < min || ak > max {
                flush(&mut out, &mut part);
                continue;
            }
        } else {
            let ta = (min - ak) / d;
            let tb = (max - ak) / d;
            let (lo, hi) = if ta < tb { (ta, tb) } else { (tb, ta) };

            t0 = t0.max(lo);
            t1 = t1.min(hi);

            if t0 > t1 {
                flush(&mut out, &mut part);
                continue;
            }
        }

        let p0 = if t0 > 0.0 {
            axis.cut(a, b, if d > 0.0 { min } else { max })
        } else {
            a
        };
        let p1 = if t1 < 1.0 {
            axis.cut(a, b, if d > 0.0 { max } else { min })
        } else {
            b
        };

        if part.is_empty() {
            part.push(p0);
        } else if t0 > 0.0 {
            // left the slab and came back
            flush(&mut out, &mut part);
            part.push(p0);
        }

        part.push(p1);

        if t1 < 1.0 {
            flush(&mut out, &mut part);
        }
    }

    flush(&mut out, &mut part);

    out
}

fn flush(out: &mut MultiLine, part: &mut Line) {
    if part.len() > 1 {
        out.push(std::mem::take(part));
    } else {
        part.clear();
    }
}

pub fn clip_multi_line(lines: &[Line], axis: Axis, min: f64, max: f64) -> MultiLine {
    lines
        .iter()
        .flat_map(|line| clip_line(line, axis, min, max))
        .collect()
}

/// Sutherland-Hodgman ring clip against `min..=max` on one axis.
pub fn clip_ring(ring: &[Pt], axis: Axis, min: f64, max: f64) -> Ring {
    let lower = clip_half_plane(ring, axis, min, true);

    clip_half_plane(&lower, axis, max, false)
}

fn clip_half_plane(ring: &[Pt], axis: Axis, v: f64, keep_greater: bool) -> Ring {
    if ring.len() < 3 {
        return Ring::new();
    }

    let inside = |p: Pt| {
        if keep_greater {
            axis.coord(p) >= v
        } else {
            axis.coord(p) <= v
        }
    };

    // input may or may not repeat the first point at the end
    let n = if ring.first() == ring.last() {
        ring.len() - 1
    } else {
        ring.len()
    };

    let mut out = Ring::new();

    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];

        if inside(a) {
            out.push(a);
        }

        if inside(a) != inside(b) {
            out.push(axis.cut(a, b, v));
        }
    }

    if out.len() < 3 {
        return Ring::new();
    }

    if out.first() != out.last() {
        let first = out[0];
        out.push(first);
    }

    out
}

/// Clip a ring to an axis-aligned rectangle, x axis then y axis.
pub fn clip_ring_rect(ring: &[Pt], min: Pt, max: Pt) -> Ring {
    let clipped = clip_ring(ring, Axis::X, min.x, max.x);

    clip_ring(&clipped, Axis::Y, min.y, max.y)
}
