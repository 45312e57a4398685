//! Mapbox vector tile encoding.
//!
//! The protobuf messages are written out by hand against the v2 spec, see
//! <https://github.com/mapbox/vector-tile-spec/tree/master/2.1>.

use std::collections::HashMap;

use prost::{Enumeration, Message};

pub const EXTENT: u32 = 4096;
pub const MVT_VERSION: u32 = 2;

#[derive(Clone, PartialEq, Message)]
pub struct Tile {
    #[prost(message, repeated, tag = "3")]
    pub layers: Vec<Layer>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Layer {
    #[prost(uint32, required, tag = "15", default = "1")]
    pub version: u32,
    #[prost(string, required, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub features: Vec<Feature>,
    #[prost(string, repeated, tag = "3")]
    pub keys: Vec<String>,
    #[prost(message, repeated, tag = "4")]
    pub values: Vec<Value>,
    #[prost(uint32, tag = "5", default = "4096")]
    pub extent: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Feature {
    #[prost(uint64, optional, tag = "1", default = "0")]
    pub id: Option<u64>,
    /// Consecutive key/value index pairs into the layer dictionaries.
    #[prost(uint32, repeated, tag = "2")]
    pub tags: Vec<u32>,
    #[prost(enumeration = "GeomType", optional, tag = "3", default = "Unknown")]
    pub r#type: Option<i32>,
    /// Command/parameter integer stream.
    #[prost(uint32, repeated, tag = "4")]
    pub geometry: Vec<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum GeomType {
    Unknown = 0,
    Point = 1,
    Linestring = 2,
    Polygon = 3,
}

#[derive(Clone, PartialEq, Message)]
pub struct Value {
    #[prost(string, optional, tag = "1")]
    pub string_value: Option<String>,
    #[prost(float, optional, tag = "2")]
    pub float_value: Option<f32>,
    #[prost(double, optional, tag = "3")]
    pub double_value: Option<f64>,
    #[prost(int64, optional, tag = "4")]
    pub int_value: Option<i64>,
    #[prost(uint64, optional, tag = "5")]
    pub uint_value: Option<u64>,
    #[prost(sint64, optional, tag = "6")]
    pub sint_value: Option<i64>,
    #[prost(bool, optional, tag = "7")]
    pub bool_value: Option<bool>,
}

/// Hashable property value used to dedup the layer value dictionary.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PropValue {
    Str(String),
    // f64 stored as bits so the dictionary map can hash it
    Double(u64),
    Int(i64),
}

impl PropValue {
    pub fn double(v: f64) -> Self {
        Self::Double(v.to_bits())
    }

    fn to_value(&self) -> Value {
        let mut value = Value::default();

        match self {
            PropValue::Str(s) => value.string_value = Some(s.clone()),
            PropValue::Double(bits) => value.double_value = Some(f64::from_bits(*bits)),
            PropValue::Int(i) => value.int_value = Some(*i),
        }

        value
    }
}

/// Per-layer accumulator holding the key/value dictionaries.
pub struct LayerBuilder {
    name: String,
    features: Vec<Feature>,
    keys: Vec<String>,
    key_index: HashMap<String, u32>,
    values: Vec<Value>,
    value_index: HashMap<PropValue, u32>,
}

impl LayerBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            features: Vec::new(),
            keys: Vec::new(),
            key_index: HashMap::new(),
            values: Vec::new(),
            value_index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_id(&mut self, key: &str) -> u32 {
        if let Some(&id) = self.key_index.get(key) {
            return id;
        }

        let id = self.keys.len() as u32;

        self.keys.push(key.to_string());
        self.key_index.insert(key.to_string(), id);

        id
    }

    pub fn value_id(&mut self, value: PropValue) -> u32 {
        if let Some(&id) = self.value_index.get(&value) {
            return id;
        }

        let id = self.values.len() as u32;

        self.values.push(value.to_value());
        self.value_index.insert(value, id);

        id
    }

    pub fn push_feature(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn into_layer(self) -> Layer {
        Layer {
            version: MVT_VERSION,
            name: self.name,
            features: self.features,
            keys: self.keys,
            values: self.values,
            extent: EXTENT,
        }
    }
}

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

fn command(id: u32, count: u32) -> u32 {
    (id & 0x7) | (count << 3)
}

fn zigzag(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

/// Accumulates one feature's geometry and attribute indices. Geometry is
/// appended in quantized tile coordinates; the cursor is shared across
/// parts as required by the command encoding.
pub struct FeatureBuilder {
    geom_type: GeomType,
    geometry: Vec<u32>,
    tags: Vec<u32>,
    cursor: (i32, i32),
    has_geom: bool,
}

impl FeatureBuilder {
    pub fn new(geom_type: GeomType) -> Self {
        Self {
            geom_type,
            geometry: Vec::new(),
            tags: Vec::new(),
            cursor: (0, 0),
            has_geom: false,
        }
    }

    pub fn has_geom(&self) -> bool {
        self.has_geom
    }

    pub fn add_tag(&mut self, key_id: u32, value_id: u32) {
        self.tags.push(key_id);
        self.tags.push(value_id);
    }

    fn push_move(&mut self, p: (i32, i32)) {
        self.geometry.push(command(CMD_MOVE_TO, 1));
        self.push_delta(p);
    }

    fn push_delta(&mut self, p: (i32, i32)) {
        self.geometry.push(zigzag(p.0 - self.cursor.0));
        self.geometry.push(zigzag(p.1 - self.cursor.1));
        self.cursor = p;
    }

    pub fn add_point(&mut self, p: (i32, i32)) {
        debug_assert_eq!(self.geom_type, GeomType::Point);
        self.push_move(p);
        self.has_geom = true;
    }

    /// Append one linestring; needs at least two points.
    pub fn add_linestring(&mut self, pts: &[(i32, i32)]) {
        debug_assert_eq!(self.geom_type, GeomType::Linestring);

        if pts.len() < 2 {
            return;
        }

        self.push_move(pts[0]);
        self.geometry.push(command(CMD_LINE_TO, (pts.len() - 1) as u32));

        for &p in &pts[1..] {
            self.push_delta(p);
        }

        self.has_geom = true;
    }

    /// Append one ring given with its closing point repeated; needs at
    /// least four points including the repeat.
    pub fn add_ring(&mut self, pts: &[(i32, i32)]) {
        debug_assert_eq!(self.geom_type, GeomType::Polygon);

        if pts.len() < 4 {
            return;
        }

        // the explicit closing point is replaced by ClosePath
        let pts = &pts[..pts.len() - 1];

        self.push_move(pts[0]);
        self.geometry.push(command(CMD_LINE_TO, (pts.len() - 1) as u32));

        for &p in &pts[1..] {
            self.push_delta(p);
        }

        self.geometry.push(command(CMD_CLOSE_PATH, 1));
        self.has_geom = true;
    }

    pub fn into_feature(self) -> Feature {
        Feature {
            id: None,
            tags: self.tags,
            r#type: Some(self.geom_type as i32),
            geometry: self.geometry,
        }
    }
}

/// Serialize the non-empty layers; returns empty bytes when no layer has a
/// feature.
pub fn serialize(layers: Vec<LayerBuilder>) -> Vec<u8> {
    let tile = Tile {
        layers: layers
            .into_iter()
            .filter(|l| !l.is_empty())
            .map(LayerBuilder::into_layer)
            .collect(),
    };

    if tile.layers.is_empty() {
        return Vec::new();
    }

    tile.encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zigzag_encoding() {
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
        assert_eq!(zigzag(-2), 3);
    }

    #[test]
    fn point_geometry_stream() {
        let mut fb = FeatureBuilder::new(GeomType::Point);

        fb.add_point((25, 17));

        let feature = fb.into_feature();

        assert_eq!(feature.geometry, vec![command(CMD_MOVE_TO, 1), 50, 34]);
    }

    #[test]
    fn ring_uses_close_path() {
        let mut fb = FeatureBuilder::new(GeomType::Polygon);

        fb.add_ring(&[(0, 0), (10, 0), (10, 10), (0, 0)]);

        let feature = fb.into_feature();
        let geometry = feature.geometry;

        assert_eq!(geometry[0], command(CMD_MOVE_TO, 1));
        assert_eq!(geometry[3], command(CMD_LINE_TO, 2));
        assert_eq!(*geometry.last().unwrap(), command(CMD_CLOSE_PATH, 1));
    }

    #[test]
    fn short_ring_is_discarded() {
        let mut fb = FeatureBuilder::new(GeomType::Polygon);

        fb.add_ring(&[(0, 0), (10, 0), (0, 0)]);

        assert!(!fb.has_geom());
    }

    #[test]
    fn value_dictionary_dedups() {
        let mut layer = LayerBuilder::new("poi");

        let a = layer.value_id(PropValue::Str("cafe".to_string()));
        let b = layer.value_id(PropValue::Str("cafe".to_string()));
        let c = layer.value_id(PropValue::double(1.0));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(layer.key_id("amenity"), layer.key_id("amenity"));
    }

    #[test]
    fn empty_layers_serialize_to_nothing() {
        let layers = vec![LayerBuilder::new("water"), LayerBuilder::new("poi")];

        assert!(serialize(layers).is_empty());
    }

    #[test]
    fn round_trip_decode() {
        let mut layer = LayerBuilder::new("water");
        let key = layer.key_id("class");
        let value = layer.value_id(PropValue::Str("ocean".to_string()));

        let mut fb = FeatureBuilder::new(GeomType::Polygon);

        fb.add_ring(&[(0, 0), (4096, 0), (4096, 4096), (0, 4096), (0, 0)]);
        fb.add_tag(key, value);
        layer.push_feature(fb.into_feature());

        let bytes = serialize(vec![layer]);
        let tile = Tile::decode(bytes.as_slice()).unwrap();

        assert_eq!(tile.layers.len(), 1);
        assert_eq!(tile.layers[0].name, "water");
        assert_eq!(tile.layers[0].features.len(), 1);
        assert_eq!(tile.layers[0].keys, vec!["class"]);
        assert_eq!(
            tile.layers[0].values[0].string_value.as_deref(),
            Some("ocean")
        );
    }
}
