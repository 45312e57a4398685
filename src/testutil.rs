//! Shared helpers for tile-building tests.

use std::collections::HashMap;
use std::io::Read;

use flate2::read::GzDecoder;
use prost::Message;

use crate::builder::build_tile;
use crate::mercator;
use crate::mvt;
use crate::schema::{Schema, SchemaConfig};
use crate::store::{Kind, RawFeature, RawMember, Store};
use crate::tile_id::TileId;

pub fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn node(id: i64, lon: f64, lat: f64, pairs: &[(&str, &str)]) -> RawFeature {
    RawFeature::Node {
        id,
        lon,
        lat,
        tags: tags(pairs),
    }
}

pub fn way(id: i64, coords: Vec<(f64, f64)>, pairs: &[(&str, &str)]) -> RawFeature {
    RawFeature::Way {
        id,
        coords,
        tags: tags(pairs),
        area: None,
    }
}

pub fn relation(id: i64, members: &[(Kind, i64, &str)], pairs: &[(&str, &str)]) -> RawFeature {
    RawFeature::Relation {
        id,
        members: members
            .iter()
            .map(|&(kind, r#ref, role)| RawMember {
                kind,
                r#ref,
                role: role.to_string(),
            })
            .collect(),
        tags: tags(pairs),
    }
}

/// Closed square way in lon/lat around a center, sized in Mercator meters.
pub fn square_around(lng: f64, lat: f64, half_m: f64) -> Vec<(f64, f64)> {
    let (cx, cy) = mercator::lng_lat_to_projected(lng, lat);

    let corner = |dx: f64, dy: f64| {
        let p = mercator::projected_to_lng_lat(cx + dx * half_m, cy + dy * half_m);

        (p.lng, p.lat)
    };

    vec![
        corner(-1.0, -1.0),
        corner(1.0, -1.0),
        corner(1.0, 1.0),
        corner(-1.0, 1.0),
        corner(-1.0, -1.0),
    ]
}

/// Ocean polygon covering (almost) the whole projection.
pub fn world_ocean() -> RawFeature {
    way(
        1,
        vec![
            (-179.9, -85.0),
            (179.9, -85.0),
            (179.9, 85.0),
            (-179.9, 85.0),
            (-179.9, -85.0),
        ],
        &[],
    )
}

/// Tile containing a longitude/latitude at a zoom level.
pub fn tile_at(lng: f64, lat: f64, z: i8) -> TileId {
    let (mx, my) = mercator::lng_lat_to_projected(lng, lat);
    let m = mercator::meters_per_tile(z);
    let x = ((mx + mercator::EARTH_HALF_CIRCUMFERENCE_M) / m).floor() as i32;
    let y = ((mercator::EARTH_HALF_CIRCUMFERENCE_M - my) / m).floor() as i32;

    TileId::new(x, y, z)
}

pub fn build(world: Vec<RawFeature>, ocean: Vec<RawFeature>, id: TileId) -> Vec<u8> {
    build_with(world, ocean, SchemaConfig::default(), id)
}

pub fn build_with(
    world: Vec<RawFeature>,
    ocean: Vec<RawFeature>,
    cfg: SchemaConfig,
    id: TileId,
) -> Vec<u8> {
    let world = Store::from_raw(world);
    let ocean = Store::from_raw(ocean);
    let schema = Schema::new(&world, cfg);

    build_tile(&world, &ocean, &schema, id)
}

pub fn decode(bytes: &[u8]) -> mvt::Tile {
    let mut gz = GzDecoder::new(bytes);
    let mut buf = Vec::new();

    gz.read_to_end(&mut buf).unwrap();

    mvt::Tile::decode(buf.as_slice()).unwrap()
}

pub fn layer<'t>(tile: &'t mvt::Tile, name: &str) -> &'t mvt::Layer {
    tile.layers
        .iter()
        .find(|l| l.name == name)
        .unwrap_or_else(|| panic!("no layer {name}"))
}

pub fn tag_value<'t>(layer: &'t mvt::Layer, feature: &mvt::Feature, key: &str) -> &'t mvt::Value {
    let kid = layer
        .keys
        .iter()
        .position(|k| k == key)
        .unwrap_or_else(|| panic!("no key {key} in layer {}", layer.name));

    let vid = feature
        .tags
        .chunks(2)
        .find(|pair| pair[0] as usize == kid)
        .unwrap_or_else(|| panic!("feature has no tag {key}"))[1];

    &layer.values[vid as usize]
}

pub fn zigzag_decode(v: u32) -> i32 {
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}
