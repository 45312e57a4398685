//! Coastline stitching.
//!
//! Input fragments are already clipped to the tile and expressed in
//! normalized tile coordinates. Water lies to the right of a coastline
//! way, so outer ocean rings wind clockwise (negative signed area). Open
//! fragments entering and leaving the tile are routed clockwise along the
//! tile perimeter, inserting corners as needed.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;

use tracing::{debug, warn};

use crate::geom::{ring_area, ring_contains, Line, MultiLine, MultiPolygon, Pt, Ring};
use crate::tile_id::TileId;

#[derive(Clone, Copy, PartialEq)]
struct PtKey(Pt);

impl Eq for PtKey {}

impl Ord for PtKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .x
            .total_cmp(&other.0.x)
            .then(self.0.y.total_cmp(&other.0.y))
    }
}

impl PartialOrd for PtKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Copy, PartialEq)]
struct DistKey(f64);

impl Eq for DistKey {}

impl Ord for DistKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for DistKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Clockwise distance along the tile perimeter from (0,0); `None` when the
/// point is not on the perimeter.
fn perim_dist_cw(p: Pt) -> Option<f64> {
    if p.x == 0.0 {
        Some(p.y)
    } else if p.y == 1.0 {
        Some(1.0 + p.x)
    } else if p.x == 1.0 {
        Some(2.0 + (1.0 - p.y))
    } else if p.y == 0.0 {
        Some(3.0 + (1.0 - p.x))
    } else {
        None
    }
}

const CORNERS: [Pt; 4] = [
    Pt::new(0.0, 0.0),
    Pt::new(0.0, 1.0),
    Pt::new(1.0, 1.0),
    Pt::new(1.0, 0.0),
];

/// Stitch coastline fragments into ocean polygons. An empty input yields
/// the full-tile ocean square. Returns `None` when a fragment endpoint is
/// not on the tile edge (broken coastline data).
pub fn stitch(id: TileId, fragments: MultiLine) -> Option<MultiPolygon> {
    debug!("processing {} coastline segments for tile {id}", fragments.len());

    let mut outers: MultiPolygon = Vec::new();
    let mut inners: Vec<Ring> = Vec::new();

    let mut add_ring = |ring: Ring| {
        if ring_area(&ring) > 0.0 {
            inners.push(ring);
        } else {
            outers.push(vec![ring]);
        }
    };

    let mut segments: BTreeMap<PtKey, Line> = BTreeMap::new();

    for way in fragments {
        if way.len() < 2 {
            continue;
        }

        if way.first() == way.last() {
            add_ring(way);
        } else {
            segments.entry(PtKey(way[0])).or_insert(way);
        }
    }

    // greedy join: splice fragments whose head continues another's tail
    let mut cursor = segments.keys().next().copied();

    while let Some(front) = cursor {
        let back = PtKey(*segments[&front].last().unwrap());

        if back == front {
            add_ring(segments.remove(&front).unwrap());
            cursor = next_key(&segments, front);
        } else if segments.contains_key(&back) {
            let tail = segments.remove(&back).unwrap();

            segments.get_mut(&front).unwrap().extend(tail);
            // retry the same entry with its new tail
        } else {
            cursor = next_key(&segments, front);
        }
    }

    // remaining fragments enter and exit on the tile edge; walk from each
    // exit clockwise along the perimeter to the next entry
    let mut edge_segs: BTreeMap<DistKey, Line> = BTreeMap::new();

    for (_, seg) in segments {
        let Some(d) = perim_dist_cw(seg[0]) else {
            warn!("invalid coastline segment for {id}");
            return None;
        };

        edge_segs.insert(DistKey(d), seg);
    }

    let mut cursor = edge_segs.keys().next().copied();

    while let Some(front) = cursor {
        let Some(d_back) = perim_dist_cw(*edge_segs[&front].last().unwrap()) else {
            warn!("invalid coastline segment for {id}");
            return None;
        };

        let next = edge_segs
            .range((Bound::Included(DistKey(d_back)), Bound::Unbounded))
            .next()
            .map(|(k, _)| *k)
            .or_else(|| edge_segs.keys().next().copied())
            .unwrap();

        let mut d_front = next.0;

        if d_front < d_back {
            d_front += 4.0;
        }

        let mut corner = d_back.ceil() as i64;
        let ring = edge_segs.get_mut(&front).unwrap();

        while (corner as f64) < d_front {
            ring.push(CORNERS[(corner % 4) as usize]);
            corner += 1;
        }

        if next == front {
            let dest = ring[0];

            ring.push(dest);
            add_ring(edge_segs.remove(&front).unwrap());
            cursor = next_key(&edge_segs, front);
        } else {
            let tail = edge_segs.remove(&next).unwrap();

            edge_segs.get_mut(&front).unwrap().extend(tail);
            // retry with the spliced tail
        }
    }

    debug_assert!(edge_segs.is_empty());

    // no outer ring means the coastline encloses land only; the ocean is
    // the rest of the tile
    if outers.is_empty() {
        outers.push(vec![vec![
            Pt::new(0.0, 0.0),
            Pt::new(0.0, 1.0),
            Pt::new(1.0, 1.0),
            Pt::new(1.0, 0.0),
            Pt::new(0.0, 0.0),
        ]]);
    }

    if outers.len() == 1 {
        outers[0].extend(inners);
    } else {
        for inner in inners {
            // prefer a probe point off the tile edge; the outer ring likely
            // runs along it
            let pin = inner
                .iter()
                .copied()
                .find(|p| p.x != 0.0 && p.y != 0.0 && p.x != 1.0 && p.y != 1.0)
                .unwrap_or(inner[0]);

            for outer in &mut outers {
                if ring_contains(&outer[0], pin) {
                    outer.push(inner);
                    break;
                }
            }
        }
    }

    Some(outers)
}

fn next_key<K: Ord + Copy, V>(map: &BTreeMap<K, V>, after: K) -> Option<K> {
    map.range((Bound::Excluded(after), Bound::Unbounded))
        .next()
        .map(|(k, _)| *k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> TileId {
        TileId::new(0, 0, 1)
    }

    fn total_area(polys: &MultiPolygon) -> f64 {
        polys
            .iter()
            .flat_map(|p| p.iter())
            .map(|r| ring_area(r))
            .sum()
    }

    #[test]
    fn empty_coastline_is_full_ocean() {
        let polys = stitch(id(), Vec::new()).unwrap();

        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0].len(), 1);
        assert!((ring_area(&polys[0][0]) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn straight_crossing_closes_along_perimeter() {
        // coastline heading east across the middle; water lies south
        let polys = stitch(id(), vec![vec![Pt::new(0.0, 0.5), Pt::new(1.0, 0.5)]]).unwrap();

        assert_eq!(polys.len(), 1);

        let ring = &polys[0][0];

        assert_eq!(ring.first(), ring.last());
        assert!((ring_area(ring) + 0.5).abs() < 1e-12);
        assert!(ring.contains(&Pt::new(1.0, 0.0)));
        assert!(ring.contains(&Pt::new(0.0, 0.0)));
    }

    #[test]
    fn two_fragments_splice_before_edge_routing() {
        let polys = stitch(
            id(),
            vec![
                vec![Pt::new(0.0, 0.5), Pt::new(0.5, 0.5)],
                vec![Pt::new(0.5, 0.5), Pt::new(1.0, 0.5)],
            ],
        )
        .unwrap();

        assert_eq!(polys.len(), 1);
        assert!((total_area(&polys) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn closed_island_ring_becomes_hole_of_full_ocean() {
        // counter-clockwise ring = land inside water
        let island = vec![
            Pt::new(0.4, 0.4),
            Pt::new(0.6, 0.4),
            Pt::new(0.6, 0.6),
            Pt::new(0.4, 0.6),
            Pt::new(0.4, 0.4),
        ];

        let polys = stitch(id(), vec![island]).unwrap();

        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0].len(), 2);
        assert!(ring_area(&polys[0][0]) < 0.0);
        assert!(ring_area(&polys[0][1]) > 0.0);
    }

    #[test]
    fn closed_lake_ring_is_outer() {
        // clockwise ring = water enclosed by land
        let lake = vec![
            Pt::new(0.4, 0.4),
            Pt::new(0.4, 0.6),
            Pt::new(0.6, 0.6),
            Pt::new(0.6, 0.4),
            Pt::new(0.4, 0.4),
        ];

        let polys = stitch(id(), vec![lake]).unwrap();

        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0].len(), 1);
        assert!(ring_area(&polys[0][0]) < 0.0);
    }

    #[test]
    fn island_nests_into_the_right_outer() {
        // two separate water pockets, an island inside the southern one
        let south = vec![Pt::new(0.0, 0.2), Pt::new(1.0, 0.2)];
        let north = vec![Pt::new(1.0, 0.8), Pt::new(0.0, 0.8)];
        let island = vec![
            Pt::new(0.4, 0.05),
            Pt::new(0.6, 0.05),
            Pt::new(0.6, 0.15),
            Pt::new(0.4, 0.15),
            Pt::new(0.4, 0.05),
        ];

        let polys = stitch(id(), vec![south, north, island]).unwrap();

        assert_eq!(polys.len(), 2);

        let with_hole: Vec<_> = polys.iter().filter(|p| p.len() == 2).collect();

        assert_eq!(with_hole.len(), 1);
        assert!(ring_contains(&with_hole[0][0], Pt::new(0.5, 0.1)));
    }

    #[test]
    fn off_edge_endpoint_is_rejected() {
        let dangling = vec![Pt::new(0.0, 0.5), Pt::new(0.5, 0.5)];

        assert!(stitch(id(), vec![dangling]).is_none());
    }
}
