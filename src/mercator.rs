use std::f64::consts::PI;

use crate::geom::BBox;
use crate::tile_id::TileId;

pub const EARTH_RADIUS_M: f64 = 6_378_137.0;
pub const EARTH_HALF_CIRCUMFERENCE_M: f64 = PI * EARTH_RADIUS_M;
pub const EARTH_CIRCUMFERENCE_M: f64 = 2.0 * PI * EARTH_RADIUS_M;

/// Width (and height) of one tile at a zoom level, in projected meters.
pub fn meters_per_tile(zoom: i8) -> f64 {
    EARTH_CIRCUMFERENCE_M / f64::from(1i32 << zoom)
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

pub fn projected_to_lng_lat(x: f64, y: f64) -> LngLat {
    LngLat {
        lng: x * 180.0 / EARTH_HALF_CIRCUMFERENCE_M,
        lat: (2.0 * (y / EARTH_RADIUS_M).exp().atan() - PI * 0.5) * 180.0 / PI,
    }
}

pub fn lng_lat_to_projected(lng: f64, lat: f64) -> (f64, f64) {
    let x = lng / 180.0 * EARTH_HALF_CIRCUMFERENCE_M;
    let y = EARTH_RADIUS_M * (PI * 0.25 + lat.to_radians() * 0.5).tan().ln();

    (x, y)
}

/// Projected meters of a fractional tile coordinate (y counts from the top).
pub fn tile_to_projected(x: f64, y: f64, zoom: i8) -> (f64, f64) {
    let m = meters_per_tile(zoom);

    (
        x * m - EARTH_HALF_CIRCUMFERENCE_M,
        EARTH_HALF_CIRCUMFERENCE_M - y * m,
    )
}

pub fn tile_south_west(id: TileId) -> (f64, f64) {
    tile_to_projected(f64::from(id.x), f64::from(id.y) + 1.0, id.z)
}

pub fn tile_center(id: TileId) -> (f64, f64) {
    tile_to_projected(f64::from(id.x) + 0.5, f64::from(id.y) + 0.5, id.z)
}

/// Longitude/latitude bounds of a tile.
pub fn tile_box(id: TileId) -> BBox {
    let (wx, sy) = tile_south_west(id);
    let (ex, ny) = tile_to_projected(f64::from(id.x) + 1.0, f64::from(id.y), id.z);

    let min = projected_to_lng_lat(wx, sy);
    let max = projected_to_lng_lat(ex, ny);

    BBox::new(min.lng, min.lat, max.lng, max.lat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_round_trip() {
        let (x, y) = lng_lat_to_projected(-122.4, 37.7);
        let back = projected_to_lng_lat(x, y);

        assert!((back.lng + 122.4).abs() < 1e-9);
        assert!((back.lat - 37.7).abs() < 1e-9);
    }

    #[test]
    fn world_tile_box() {
        let bbox = tile_box(TileId::new(0, 0, 0));

        assert!((bbox.min_x + 180.0).abs() < 1e-9);
        assert!((bbox.max_x - 180.0).abs() < 1e-9);
        assert!((bbox.min_y + 85.0511).abs() < 1e-3);
        assert!((bbox.max_y - 85.0511).abs() < 1e-3);
    }

    #[test]
    fn tile_box_nested_in_parent() {
        let id = TileId::new(5, 9, 4);
        let parent = tile_box(id.parent());
        let own = tile_box(id);

        let eps = 1e-9;

        assert!(own.min_x >= parent.min_x - eps);
        assert!(own.max_x <= parent.max_x + eps);
        assert!(own.min_y >= parent.min_y - eps);
        assert!(own.max_y <= parent.max_y + eps);
    }

    #[test]
    fn children_tile_the_parent() {
        let id = TileId::new(2, 3, 3);
        let parent = tile_box(id);

        let kids: Vec<_> = (0..4).map(|i| tile_box(id.child(i, 14))).collect();

        let eps = 1e-9;

        // the union of the children's corners spans the parent box
        let min_x = kids.iter().map(|b| b.min_x).fold(f64::INFINITY, f64::min);
        let max_x = kids
            .iter()
            .map(|b| b.max_x)
            .fold(f64::NEG_INFINITY, f64::max);

        assert!((min_x - parent.min_x).abs() < eps);
        assert!((max_x - parent.max_x).abs() < eps);

        // siblings sharing an edge meet exactly
        assert!((kids[0].max_x - kids[2].min_x).abs() < eps);
        assert!((kids[0].min_y - kids[1].max_y).abs() < eps);
    }

    #[test]
    fn meters_per_tile_halves() {
        assert!((meters_per_tile(0) - EARTH_CIRCUMFERENCE_M).abs() < 1e-6);
        assert!((meters_per_tile(5) * 2.0 - meters_per_tile(4)).abs() < 1e-6);
    }
}
