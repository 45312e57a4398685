//! Feature store stand-in.
//!
//! The production reader for the compressed feature format is an external
//! collaborator; this module loads a JSON snapshot into memory and exposes
//! the same capabilities: windowed spatial queries, interned tag-key
//! lookup, member iteration and ring-and-hole polygonization for area
//! relations. Coordinates are kept in projected web-Mercator meters.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;

use crate::error::Error;
use crate::geom::{polygon_contains, ring_contains, BBox, Polygon, Pt, Ring};
use crate::mercator;

/// Sentinel id carried by synthetic ocean features.
pub const OCEAN_ID: i64 = -1;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Node,
    Way,
    Relation,
}

/// Interned tag key; valid for the lifetime of the store that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Key(u32);

impl Key {
    /// A key absent from the store; matches no tag.
    pub const INVALID: Key = Key(u32::MAX);
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    Outer,
    Inner,
    Other,
}

#[derive(Clone, Copy, Debug)]
pub struct Member {
    pub feature: usize,
    pub role: Role,
}

#[derive(Debug)]
pub struct Feature {
    pub id: i64,
    pub kind: Kind,
    pub is_area: bool,
    pub in_relation: bool,
    /// Geometry in projected meters; one point for nodes.
    pub coords: Vec<Pt>,
    pub members: Vec<Member>,
    /// Longitude/latitude bounds used by window queries.
    pub bbox: BBox,
    tags: Vec<(Key, String)>,
}

impl Feature {
    pub fn tag(&self, key: Key) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has(&self, key: Key) -> bool {
        self.tag(key).is_some()
    }

    pub fn tag_in(&self, key: Key, values: &[&str]) -> bool {
        self.tag(key).is_some_and(|v| values.contains(&v))
    }

    /// Length in projected meters.
    pub fn length(&self) -> f64 {
        self.coords
            .windows(2)
            .map(|w| (w[1] - w[0]).length())
            .sum()
    }

    /// Representative point in projected meters: the node position, or the
    /// halfway point along a line.
    pub fn centroid(&self) -> Pt {
        match self.coords.len() {
            0 => Pt::new(0.0, 0.0),
            1 => self.coords[0],
            _ => {
                let half = self.length() / 2.0;
                let mut walked = 0.0;

                for w in self.coords.windows(2) {
                    let seg = (w[1] - w[0]).length();

                    if walked + seg >= half && seg > 0.0 {
                        return w[0] + (w[1] - w[0]) * ((half - walked) / seg);
                    }

                    walked += seg;
                }

                *self.coords.last().unwrap()
            }
        }
    }
}

#[derive(Deserialize)]
pub struct Snapshot {
    pub features: Vec<RawFeature>,
}

#[derive(Deserialize)]
pub struct RawMember {
    #[serde(rename = "type")]
    pub kind: Kind,
    pub r#ref: i64,
    #[serde(default)]
    pub role: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawFeature {
    Node {
        id: i64,
        lon: f64,
        lat: f64,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    Way {
        id: i64,
        coords: Vec<(f64, f64)>,
        #[serde(default)]
        tags: HashMap<String, String>,
        #[serde(default)]
        area: Option<bool>,
    },
    Relation {
        id: i64,
        members: Vec<RawMember>,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
}

pub struct Store {
    features: Vec<Feature>,
    key_names: Vec<String>,
    key_index: HashMap<String, u32>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path).map_err(|e| Error::SnapshotOpen(path.to_path_buf(), e))?;

        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::SnapshotParse(path.to_path_buf(), e))?;

        Ok(Self::from_raw(snapshot.features))
    }

    pub fn from_raw(raw: Vec<RawFeature>) -> Self {
        let mut store = Self {
            features: Vec::with_capacity(raw.len()),
            key_names: Vec::new(),
            key_index: HashMap::new(),
        };

        let mut index: HashMap<(Kind, i64), usize> = HashMap::new();
        let mut raw_members: Vec<Vec<RawMember>> = Vec::with_capacity(raw.len());

        for feature in raw {
            let (feature, members) = store.build_feature(feature);

            index.insert((feature.kind, feature.id), store.features.len());
            store.features.push(feature);
            raw_members.push(members);
        }

        // second pass: resolve relation members; unresolvable ones are
        // dropped so partial snapshots degrade gracefully
        for (i, members) in raw_members.into_iter().enumerate() {
            let mut resolved = Vec::new();
            let mut bbox = store.features[i].bbox;

            for m in members {
                let Some(&target) = index.get(&(m.kind, m.r#ref)) else {
                    continue;
                };

                let role = match m.role.as_str() {
                    "outer" | "" => Role::Outer,
                    "inner" => Role::Inner,
                    _ => Role::Other,
                };

                resolved.push(Member {
                    feature: target,
                    role,
                });

                let mb = store.features[target].bbox;

                if mb.min_x <= mb.max_x {
                    bbox.extend(mb.min_x, mb.min_y);
                    bbox.extend(mb.max_x, mb.max_y);
                }

                store.features[target].in_relation = true;
            }

            store.features[i].bbox = bbox;
            store.features[i].members = resolved;
        }

        store
    }

    fn build_feature(&mut self, raw: RawFeature) -> (Feature, Vec<RawMember>) {
        match raw {
            RawFeature::Node { id, lon, lat, tags } => {
                let (x, y) = mercator::lng_lat_to_projected(lon, lat);
                let mut bbox = BBox::empty();

                bbox.extend(lon, lat);

                (
                    Feature {
                        id,
                        kind: Kind::Node,
                        is_area: false,
                        in_relation: false,
                        coords: vec![Pt::new(x, y)],
                        members: Vec::new(),
                        bbox,
                        tags: self.intern_tags(tags),
                    },
                    Vec::new(),
                )
            }
            RawFeature::Way {
                id,
                coords,
                tags,
                area,
            } => {
                let mut bbox = BBox::empty();
                let pts: Vec<Pt> = coords
                    .iter()
                    .map(|&(lon, lat)| {
                        bbox.extend(lon, lat);

                        let (x, y) = mercator::lng_lat_to_projected(lon, lat);

                        Pt::new(x, y)
                    })
                    .collect();

                let closed = pts.len() >= 4 && pts.first() == pts.last();

                (
                    Feature {
                        id,
                        kind: Kind::Way,
                        is_area: area.unwrap_or(closed),
                        in_relation: false,
                        coords: pts,
                        members: Vec::new(),
                        bbox,
                        tags: self.intern_tags(tags),
                    },
                    Vec::new(),
                )
            }
            RawFeature::Relation { id, members, tags } => {
                let tags = self.intern_tags(tags);
                let type_key = self.lookup("type");
                let rel_type = tags
                    .iter()
                    .find(|(k, _)| Some(*k) == type_key)
                    .map(|(_, v)| v.as_str());
                let is_area = matches!(rel_type, Some("multipolygon") | Some("boundary"));

                (
                    Feature {
                        id,
                        kind: Kind::Relation,
                        is_area,
                        in_relation: false,
                        coords: Vec::new(),
                        members: Vec::new(),
                        bbox: BBox::empty(),
                        tags,
                    },
                    members,
                )
            }
        }
    }

    fn intern_tags(&mut self, tags: HashMap<String, String>) -> Vec<(Key, String)> {
        tags.into_iter()
            .map(|(k, v)| (self.intern(&k), v))
            .collect()
    }

    fn intern(&mut self, name: &str) -> Key {
        if let Some(&code) = self.key_index.get(name) {
            return Key(code);
        }

        let code = self.key_names.len() as u32;

        self.key_names.push(name.to_string());
        self.key_index.insert(name.to_string(), code);

        Key(code)
    }

    fn lookup(&self, name: &str) -> Option<Key> {
        self.key_index.get(name).map(|&code| Key(code))
    }

    /// Interned handle for a tag key. Keys absent from the snapshot return
    /// [`Key::INVALID`], which matches no tag.
    pub fn key(&self, name: &str) -> Key {
        self.lookup(name).unwrap_or(Key::INVALID)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Features whose bounds intersect a longitude/latitude window.
    pub fn window(&self, bbox: BBox) -> impl Iterator<Item = &Feature> + '_ {
        self.features
            .iter()
            .filter(move |f| f.bbox.intersects(&bbox))
    }

    pub fn members_of<'a>(&'a self, f: &'a Feature) -> impl Iterator<Item = &'a Feature> + 'a {
        f.members.iter().map(move |m| &self.features[m.feature])
    }

    /// Ring-and-hole polygonization for an area relation: each result is
    /// one outer ring followed by its holes, in projected meters. Open
    /// member ways are joined by shared endpoints; fragments that cannot
    /// be closed are dropped.
    pub fn polygonize(&self, rel: &Feature) -> Vec<Polygon> {
        let mut outer_rings = Vec::new();
        let mut inner_rings = Vec::new();
        let mut open_outer = Vec::new();
        let mut open_inner = Vec::new();

        for m in &rel.members {
            let f = &self.features[m.feature];

            if f.kind != Kind::Way || f.coords.len() < 2 {
                continue;
            }

            let closed = f.coords.len() >= 4 && f.coords.first() == f.coords.last();

            match (m.role, closed) {
                (Role::Inner, true) => inner_rings.push(f.coords.clone()),
                (Role::Inner, false) => open_inner.push(f.coords.clone()),
                (Role::Outer, true) => outer_rings.push(f.coords.clone()),
                (Role::Outer, false) => open_outer.push(f.coords.clone()),
                (Role::Other, _) => {}
            }
        }

        outer_rings.extend(assemble_rings(open_outer));
        inner_rings.extend(assemble_rings(open_inner));

        outer_rings
            .into_iter()
            .map(|outer| {
                let matched_inner: Vec<_> = inner_rings
                    .iter()
                    .filter(|inner| ring_contains(&outer, inner[0]))
                    .cloned()
                    .collect();

                let mut polygon = vec![outer];
                polygon.extend(matched_inner);

                polygon
            })
            .collect()
    }

    /// Whether any area feature contains the given position. Used to probe
    /// the ocean store for tiles without coastline.
    pub fn contains_lng_lat(&self, lng: f64, lat: f64) -> bool {
        let (x, y) = mercator::lng_lat_to_projected(lng, lat);
        let p = Pt::new(x, y);

        self.features.iter().any(|f| {
            if !f.is_area || !f.bbox.contains(lng, lat) {
                return false;
            }

            match f.kind {
                Kind::Way => ring_contains(&f.coords, p),
                Kind::Relation => self
                    .polygonize(f)
                    .iter()
                    .any(|polygon| polygon_contains(polygon, p)),
                Kind::Node => false,
            }
        })
    }
}

/// Join open way fragments into closed rings by endpoint matching,
/// reversing fragments where needed.
fn assemble_rings(mut segs: Vec<Vec<Pt>>) -> Vec<Ring> {
    let mut rings = Vec::new();

    while let Some(mut cur) = segs.pop() {
        loop {
            if cur.len() >= 4 && cur.first() == cur.last() {
                rings.push(cur);
                break;
            }

            let back = *cur.last().unwrap();

            let Some(pos) = segs
                .iter()
                .position(|s| *s.first().unwrap() == back || *s.last().unwrap() == back)
            else {
                break; // unclosable fragment
            };

            let mut next = segs.swap_remove(pos);

            if *next.last().unwrap() == back {
                next.reverse();
            }

            cur.extend(next.into_iter().skip(1));
        }
    }

    rings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn square_coords(lo: f64, hi: f64) -> Vec<(f64, f64)> {
        vec![(lo, lo), (hi, lo), (hi, hi), (lo, hi), (lo, lo)]
    }

    #[test]
    fn interning_and_lookup() {
        let store = Store::from_raw(vec![RawFeature::Node {
            id: 1,
            lon: 10.0,
            lat: 20.0,
            tags: tags(&[("place", "city"), ("name", "X")]),
        }]);

        let place = store.key("place");
        let missing = store.key("not-a-key");
        let f = store.window(BBox::new(9.0, 19.0, 11.0, 21.0)).next().unwrap();

        assert_eq!(f.tag(place), Some("city"));
        assert_eq!(f.tag(missing), None);
        assert_eq!(missing, Key::INVALID);
    }

    #[test]
    fn window_filters_by_bbox() {
        let store = Store::from_raw(vec![
            RawFeature::Node {
                id: 1,
                lon: 0.5,
                lat: 0.5,
                tags: HashMap::new(),
            },
            RawFeature::Node {
                id: 2,
                lon: 50.0,
                lat: 50.0,
                tags: HashMap::new(),
            },
        ]);

        let hits: Vec<_> = store.window(BBox::new(0.0, 0.0, 1.0, 1.0)).collect();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }

    #[test]
    fn closed_way_is_area_unless_overridden() {
        let store = Store::from_raw(vec![
            RawFeature::Way {
                id: 1,
                coords: square_coords(0.0, 1.0),
                tags: HashMap::new(),
                area: None,
            },
            RawFeature::Way {
                id: 2,
                coords: square_coords(0.0, 1.0),
                tags: HashMap::new(),
                area: Some(false),
            },
        ]);

        let mut features = store.window(BBox::new(-1.0, -1.0, 2.0, 2.0));

        assert!(features.next().unwrap().is_area);
        assert!(!features.next().unwrap().is_area);
    }

    #[test]
    fn polygonize_joins_fragments_and_nests_holes() {
        let store = Store::from_raw(vec![
            // outer square split into two open halves
            RawFeature::Way {
                id: 1,
                coords: vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0)],
                tags: HashMap::new(),
                area: None,
            },
            RawFeature::Way {
                id: 2,
                coords: vec![(4.0, 4.0), (0.0, 4.0), (0.0, 0.0)],
                tags: HashMap::new(),
                area: None,
            },
            RawFeature::Way {
                id: 3,
                coords: square_coords(1.0, 2.0),
                tags: HashMap::new(),
                area: None,
            },
            RawFeature::Relation {
                id: 4,
                members: vec![
                    RawMember {
                        kind: Kind::Way,
                        r#ref: 1,
                        role: "outer".to_string(),
                    },
                    RawMember {
                        kind: Kind::Way,
                        r#ref: 2,
                        role: "outer".to_string(),
                    },
                    RawMember {
                        kind: Kind::Way,
                        r#ref: 3,
                        role: "inner".to_string(),
                    },
                ],
                tags: tags(&[("type", "multipolygon")]),
            },
        ]);

        let rel = store
            .window(BBox::new(-1.0, -1.0, 5.0, 5.0))
            .find(|f| f.kind == Kind::Relation)
            .unwrap();

        assert!(rel.is_area);

        let polygons = store.polygonize(rel);

        assert_eq!(polygons.len(), 1);
        // one outer ring plus one hole
        assert_eq!(polygons[0].len(), 2);
        assert!(polygons[0][0].first() == polygons[0][0].last());
    }

    #[test]
    fn members_of_skips_missing_features() {
        let store = Store::from_raw(vec![RawFeature::Relation {
            id: 1,
            members: vec![RawMember {
                kind: Kind::Way,
                r#ref: 999,
                role: "outer".to_string(),
            }],
            tags: tags(&[("type", "boundary")]),
        }]);

        let rel = store
            .window(BBox::new(-180.0, -85.0, 180.0, 85.0))
            .next();

        // relation has an empty bbox, so it matches no window; resolve by len
        assert!(rel.is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn containment_probe() {
        let store = Store::from_raw(vec![RawFeature::Way {
            id: 1,
            coords: square_coords(-10.0, 10.0),
            tags: HashMap::new(),
            area: None,
        }]);

        assert!(store.contains_lng_lat(0.0, 0.0));
        assert!(!store.contains_lng_lat(20.0, 0.0));
    }

    #[test]
    fn membership_flag() {
        let store = Store::from_raw(vec![
            RawFeature::Way {
                id: 1,
                coords: vec![(0.0, 0.0), (1.0, 1.0)],
                tags: HashMap::new(),
                area: None,
            },
            RawFeature::Way {
                id: 2,
                coords: vec![(0.0, 0.0), (2.0, 2.0)],
                tags: HashMap::new(),
                area: None,
            },
            RawFeature::Relation {
                id: 3,
                members: vec![RawMember {
                    kind: Kind::Way,
                    r#ref: 1,
                    role: String::new(),
                }],
                tags: tags(&[("type", "route")]),
            },
        ]);

        let mut ways = store
            .window(BBox::new(-1.0, -1.0, 3.0, 3.0))
            .filter(|f| f.kind == Kind::Way);

        assert!(ways.next().unwrap().in_relation);
        assert!(!ways.next().unwrap().in_relation);
    }
}
