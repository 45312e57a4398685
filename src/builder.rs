//! Per-tile build orchestration.
//!
//! Loads features from the store window, hands each one to the schema
//! classifier, realizes the geometry it asks for (clip, simplify,
//! quantize), synthesizes ocean polygons and serializes the result as a
//! gzipped vector tile.

use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info, warn};

use crate::clip::{clip_line, clip_multi_line, clip_ring_rect, Axis};
use crate::coastline;
use crate::error::Error;
use crate::geom::{BBox, MultiLine, MultiPolygon, Polygon, Pt, Ring};
use crate::mercator;
use crate::mvt::{self, FeatureBuilder, GeomType, LayerBuilder, PropValue};
use crate::polylabel::polylabel;
use crate::simplify;
use crate::store::{Feature, Key, Kind, Store, OCEAN_ID};
use crate::tile_id::TileId;

const EXTENT_F: f64 = mvt::EXTENT as f64;

/// Schema classifiers plug in through this capability; the builder drives
/// one call per feature and supplies the geometry plumbing.
pub trait FeatureProcessor: Send + Sync {
    fn layers(&self) -> &[&'static str];

    fn process(&self, ctx: &mut TileBuilder) -> Result<(), Error>;
}

struct Pending {
    layer: usize,
    fb: FeatureBuilder,
}

pub struct TileBuilder<'a> {
    id: TileId,
    world: &'a Store,
    ocean: &'a Store,

    // coord mapping: store meters -> normalized tile coords
    origin: Pt,
    scale: f64,
    simplify_thresh: f64,
    tile_box: BBox,

    layers: Vec<LayerBuilder>,
    pending: Option<Pending>,

    // current feature
    feat_store: &'a Store,
    feat: Option<&'a Feature>,
    feat_id: i64,
    area: f64,
    centroid: Pt,
    mpoly: MultiPolygon,

    coastline: MultiLine,

    // scratch + stats
    tile_pts: Vec<(i32, i32)>,
    built_feats: u32,
    built_pts: u32,
}

fn in_unit(p: Pt) -> bool {
    p.x >= 0.0 && p.y >= 0.0 && p.x <= 1.0 && p.y <= 1.0
}

fn quantize(p: Pt) -> (i32, i32) {
    (
        (p.x * EXTENT_F + 0.5).floor() as i32,
        ((1.0 - p.y) * EXTENT_F + 0.5).floor() as i32,
    )
}

/// Simplify, quantize and dedup a point run into `out`.
fn to_tile_pts(pts: &[Pt], thresh: f64, out: &mut Vec<(i32, i32)>) {
    let keep = simplify::rdp(pts, thresh);

    out.clear();
    out.reserve(pts.len());

    for (i, p) in pts.iter().enumerate() {
        if let Some(keep) = &keep {
            if !keep[i] {
                continue;
            }
        }

        let ip = quantize(*p);

        if out.last() != Some(&ip) {
            out.push(ip);
        }
    }
}

impl<'a> TileBuilder<'a> {
    pub fn new(id: TileId, world: &'a Store, ocean: &'a Store, layers: &[&'static str]) -> Self {
        let (ox, oy) = mercator::tile_south_west(id);

        Self {
            id,
            world,
            ocean,
            origin: Pt::new(ox, oy),
            scale: 1.0 / mercator::meters_per_tile(id.z),
            // no simplification at the highest zoom, which may be over-zoomed
            simplify_thresh: if id.z < 14 { 1.0 / 512.0 } else { 0.0 },
            tile_box: mercator::tile_box(id),
            layers: layers.iter().map(|name| LayerBuilder::new(name)).collect(),
            pending: None,
            feat_store: world,
            feat: None,
            feat_id: -1,
            area: f64::NAN,
            centroid: Pt::default(),
            mpoly: MultiPolygon::new(),
            coastline: MultiLine::new(),
            tile_pts: Vec::new(),
            built_feats: 0,
            built_pts: 0,
        }
    }

    pub fn build(mut self, schema: &dyn FeatureProcessor, compress: bool) -> Result<Vec<u8>, Error> {
        let start = Instant::now();
        let tile_box = self.tile_box;
        let mut nfeats = 0usize;

        if self.id.z < 8 {
            if !self.low_zoom_pass(schema, &mut nfeats) {
                return Ok(Vec::new());
            }
        } else {
            let feats: Vec<&Feature> = self.world.window(tile_box).collect();

            for f in feats {
                self.set_feature_in(f, self.world);
                nfeats += 1;

                if !self.run_classifier(schema) {
                    return Ok(Vec::new());
                }
            }

            // ocean polygons
            self.feat = None;
            self.feat_id = OCEAN_ID;

            if !self.coastline.is_empty() {
                if !self.run_classifier(schema) {
                    return Ok(Vec::new());
                }
            } else {
                let (cx, cy) = mercator::tile_center(self.id);
                let center = mercator::projected_to_lng_lat(cx, cy);

                // all-ocean tile when the center falls in an ocean polygon
                if self.ocean.contains_lng_lat(center.lng, center.lat)
                    && !self.run_classifier(schema)
                {
                    return Ok(Vec::new());
                }
            }
        }

        self.flush_pending();

        let mvt_bytes = mvt::serialize(self.layers);

        if mvt_bytes.is_empty() {
            debug!("no features for tile {}", self.id);
            return Ok(Vec::new());
        }

        let built = start.elapsed();
        let raw_size = mvt_bytes.len();

        let out = if compress {
            // level 5 is nearly as small as 6 but noticeably faster
            let mut enc = GzEncoder::new(Vec::new(), Compression::new(5));

            enc.write_all(&mvt_bytes)?;
            enc.finish()?
        } else {
            mvt_bytes
        };

        info!(
            "tile {} ({} bytes) built in {:.1} ms ({}/{} features, {} points, gzip of {} bytes in {:.1} ms)",
            self.id,
            out.len(),
            start.elapsed().as_secs_f64() * 1000.0,
            self.built_feats,
            nfeats,
            self.built_pts,
            raw_size,
            (start.elapsed() - built).as_secs_f64() * 1000.0,
        );

        Ok(out)
    }

    /// Returns false when the classifier failed and the tile should come
    /// out empty.
    fn run_classifier(&mut self, schema: &dyn FeatureProcessor) -> bool {
        if let Err(e) = schema.process(self) {
            warn!(
                "error building tile {} (feature id {}): {e}",
                self.id, self.feat_id
            );

            return false;
        }

        true
    }

    /// Below z8 a full window scan is too expensive, so only a fixed set of
    /// category queries runs, plus the ocean store window.
    fn low_zoom_pass(&mut self, schema: &dyn FeatureProcessor, nfeats: &mut usize) -> bool {
        let z = self.id.z;
        let tile_box = self.tile_box;

        let k_place = self.world.key("place");
        let k_highway = self.world.key("highway");
        let k_boundary = self.world.key("boundary");
        let k_natural = self.world.key("natural");
        let k_waterway = self.world.key("waterway");

        let places: &[&str] = if z < 7 {
            &["continent", "country", "state", "city"]
        } else {
            &["continent", "country", "state", "city", "town"]
        };
        let highways: &[&str] = if z < 5 {
            &["motorway"]
        } else if z < 7 {
            &["motorway", "trunk"]
        } else {
            &["motorway", "trunk", "primary"]
        };

        let window: Vec<&Feature> = self.world.window(tile_box).collect();

        let queries: [Box<dyn Fn(&Feature) -> bool>; 6] = [
            Box::new(move |f| f.kind == Kind::Node && f.tag_in(k_place, places)),
            Box::new(move |f| f.kind == Kind::Way && f.tag_in(k_highway, highways)),
            Box::new(move |f| f.tag_in(k_boundary, &["administrative", "disputed"])),
            Box::new(move |f| f.is_area && f.tag_in(k_place, &["island"])),
            Box::new(move |f| f.is_area && f.tag_in(k_natural, &["water", "glacier"])),
            Box::new(move |f| f.is_area && f.tag_in(k_waterway, &["river"])),
        ];

        for query in &queries {
            let matched: Vec<&Feature> = window.iter().copied().filter(|f| query(f)).collect();

            for f in matched {
                self.set_feature_in(f, self.world);
                *nfeats += 1;

                if !self.run_classifier(schema) {
                    return false;
                }
            }
        }

        // ocean geometry comes from the ocean store, tagged with the
        // sentinel id so the classifier routes it to the water layer
        let ocean_feats: Vec<&Feature> = self.ocean.window(tile_box).collect();

        for f in ocean_feats {
            self.set_feature_in(f, self.ocean);
            self.feat_id = OCEAN_ID;
            *nfeats += 1;

            if !self.run_classifier(schema) {
                return false;
            }
        }

        true
    }

    fn set_feature_in(&mut self, f: &'a Feature, store: &'a Store) {
        self.feat = Some(f);
        self.feat_store = store;
        self.feat_id = f.id;
        self.area = f64::NAN;
        self.centroid = Pt::default();
        self.mpoly.clear();
    }

    /// Temporarily bind another feature of the same store as current (used
    /// when emitting relation members).
    pub fn set_feature(&mut self, f: &'a Feature) {
        self.set_feature_in(f, self.feat_store);
    }

    // reading the current feature

    pub fn feature(&self) -> &'a Feature {
        self.feat.expect("no current feature")
    }

    pub fn feat_id(&self) -> i64 {
        self.feat_id
    }

    pub fn find(&self, key: Key) -> Option<&'a str> {
        self.feat.and_then(|f| f.tag(key))
    }

    pub fn holds(&self, key: Key) -> bool {
        self.feat.is_some_and(|f| f.has(key))
    }

    pub fn min_zoom(&self, z: i32) -> bool {
        i32::from(self.id.z) >= z
    }

    pub fn is_closed(&self) -> bool {
        self.feat.is_some_and(|f| f.is_area)
    }

    /// Length of the current feature in Mercator meters.
    pub fn length(&self) -> f64 {
        self.feature().length()
    }

    /// Polygon area of the current feature in Mercator square meters.
    pub fn area(&mut self) -> f64 {
        if self.area.is_nan() {
            if self.feature().is_area {
                self.load_area_feature();
            } else {
                self.area = 0.0;
            }
        }

        self.area
    }

    /// Cheap upper bound of the feature's area from its stored bounds,
    /// usable before the exact polygon is loaded.
    pub fn bbox_area(&self) -> f64 {
        let Some(f) = self.feat else { return 0.0 };

        if f.bbox.min_x > f.bbox.max_x {
            return 0.0;
        }

        let (x0, y0) = mercator::lng_lat_to_projected(f.bbox.min_x, f.bbox.min_y);
        let (x1, y1) = mercator::lng_lat_to_projected(f.bbox.max_x, f.bbox.max_y);

        ((x1 - x0) * (y1 - y0)).abs()
    }

    pub fn members(&self) -> Vec<&'a Feature> {
        let Some(f) = self.feat else {
            return Vec::new();
        };

        self.feat_store.members_of(f).collect()
    }

    pub fn member_intersects_tile(&self, f: &Feature) -> bool {
        self.tile_box.intersects(&f.bbox)
    }

    // writing tile features

    pub fn attribute(&mut self, key: &str, val: Option<&str>) {
        let Some(val) = val else { return };

        if val.is_empty() {
            return;
        }

        self.add_tag(key, PropValue::Str(val.to_string()));
    }

    pub fn attribute_num(&mut self, key: &str, v: f64) {
        self.add_tag(key, PropValue::double(v));
    }

    pub fn attribute_int(&mut self, key: &str, v: i64) {
        self.add_tag(key, PropValue::Int(v));
    }

    fn add_tag(&mut self, key: &str, value: PropValue) {
        let Some(p) = self.pending.as_mut() else {
            return;
        };

        let layer = &mut self.layers[p.layer];
        let key_id = layer.key_id(key);
        let value_id = layer.value_id(value);

        p.fb.add_tag(key_id, value_id);
    }

    pub fn layer(&mut self, name: &str) {
        self.layer_impl(name, false);
    }

    pub fn layer_as_centroid(&mut self, name: &str) {
        self.layer_impl(name, true);
    }

    fn flush_pending(&mut self) {
        if let Some(p) = self.pending.take() {
            if p.fb.has_geom() {
                self.built_feats += 1;
                self.layers[p.layer].push_feature(p.fb.into_feature());
            }
        }
    }

    fn layer_impl(&mut self, name: &str, centroid: bool) {
        self.flush_pending();

        if name.is_empty() {
            return;
        }

        let Some(layer) = self.layers.iter().position(|l| l.name() == name) else {
            warn!("layer not found: {name}");
            return;
        };

        match self.feat {
            // synthetic ocean assembled from collected coastline
            None => {
                self.pending = Some(Pending {
                    layer,
                    fb: FeatureBuilder::new(GeomType::Polygon),
                });
                self.build_coastline_polygons();
            }
            Some(f) if f.kind == Kind::Node || centroid => {
                let p = self.label_point(f);
                let mut fb = FeatureBuilder::new(GeomType::Point);

                if in_unit(p) {
                    fb.add_point(quantize(p));
                    self.built_pts += 1;
                }

                self.pending = Some(Pending { layer, fb });
            }
            Some(f) if f.is_area => {
                self.pending = Some(Pending {
                    layer,
                    fb: FeatureBuilder::new(GeomType::Polygon),
                });
                self.build_polygon();
            }
            Some(f) => {
                self.pending = Some(Pending {
                    layer,
                    fb: FeatureBuilder::new(GeomType::Linestring),
                });

                if f.kind == Kind::Way {
                    self.build_line(f);
                } else {
                    // multi-linestring from relation members
                    let members: Vec<&Feature> = self
                        .feat_store
                        .members_of(f)
                        .filter(|c| c.kind == Kind::Way && self.tile_box.intersects(&c.bbox))
                        .collect();

                    for child in members {
                        self.build_line(child);
                    }
                }
            }
        }
    }

    /// Label position for a point feature: the node position, the polygon
    /// pole of inaccessibility, or the centroid as a fallback. Returns a
    /// point outside [0,1]² when the label falls off this tile.
    fn label_point(&mut self, f: &'a Feature) -> Pt {
        if !f.is_area {
            return self.to_tile_coord(f.centroid());
        }

        self.load_area_feature();

        let p = self.centroid;

        if in_unit(p) && self.mpoly.len() == 1 && self.mpoly[0][0].len() > 3 {
            if let Some(better) = self.refine_label(p) {
                return better;
            }
        }

        p
    }

    fn refine_label(&self, centroid: Pt) -> Option<Pt> {
        let pl = if self.id.z >= 14 {
            polylabel(&self.mpoly[0], 1.0 / 256.0)
        } else {
            // refine within the z14 subtile containing the centroid so the
            // label does not move when the viewer zooms in
            let zq = f64::exp2(f64::from(14 - self.id.z));
            let cell = Pt::new((centroid.x * zq).floor(), (centroid.y * zq).floor());
            let min = cell * (1.0 / zq);
            let max = (cell + Pt::new(1.0, 1.0)) * (1.0 / zq);

            let clipped: Polygon = self.mpoly[0]
                .iter()
                .map(|ring| clip_ring_rect(ring, min, max))
                .collect();

            if clipped[0].len() < 4 {
                return None;
            }

            let precision = (1.0 / 256.0) / zq.min(16.0);

            polylabel(&clipped, precision)
        };

        if in_unit(pl) {
            Some(pl)
        } else {
            debug!(
                "rejecting label position {:.3},{:.3} for {} (centroid {:.3},{:.3})",
                pl.x, pl.y, self.feat_id, centroid.x, centroid.y
            );

            None
        }
    }

    fn to_tile_coord(&self, p: Pt) -> Pt {
        (p - self.origin) * self.scale
    }

    /// Convert a way to clipped tile-coordinate lines; empty when fully
    /// outside the tile.
    fn load_way_feature(&self, way: &Feature) -> MultiLine {
        let mut pts: Vec<Pt> = Vec::with_capacity(way.coords.len());
        let mut pmin = Pt::new(f64::INFINITY, f64::INFINITY);
        let mut pmax = Pt::new(f64::NEG_INFINITY, f64::NEG_INFINITY);

        for &c in &way.coords {
            let p = self.to_tile_coord(c);

            pts.push(p);
            pmin = pmin.min(p);
            pmax = pmax.max(p);
        }

        if pmin.x > 1.0 || pmin.y > 1.0 || pmax.x < 0.0 || pmax.y < 0.0 {
            Vec::new()
        } else if pmin.x < 0.0 || pmin.y < 0.0 || pmax.x > 1.0 || pmax.y > 1.0 {
            let clipped = clip_line(&pts, Axis::X, 0.0, 1.0);

            clip_multi_line(&clipped, Axis::Y, 0.0, 1.0)
        } else {
            vec![pts]
        }
    }

    pub fn add_coastline(&mut self) {
        let lines = self.load_way_feature(self.feature());

        self.coastline.extend(lines);
    }

    fn build_line(&mut self, way: &Feature) {
        let lines = self.load_way_feature(way);

        for line in &lines {
            to_tile_pts(line, self.simplify_thresh, &mut self.tile_pts);

            if self.tile_pts.len() > 1 {
                let n = self.tile_pts.len() as u32;

                if let Some(p) = self.pending.as_mut() {
                    p.fb.add_linestring(&self.tile_pts);
                    self.built_pts += n;
                }
            }
        }
    }

    /// Load the current feature's polygon geometry and cache its area and
    /// centroid. Idempotent; `area` doubles as the loaded marker.
    fn load_area_feature(&mut self) {
        if !self.area.is_nan() {
            return;
        }

        self.area = 0.0;
        self.centroid = Pt::default();

        let f = self.feature();

        if f.kind == Kind::Way {
            let mut poly = Polygon::new();

            self.add_ring_from(&mut poly, &f.coords, true);
            self.mpoly.push(poly);
        } else {
            let polygons = self.feat_store.polygonize(f);

            for rings in &polygons {
                let mut poly = Polygon::new();

                for (i, ring) in rings.iter().enumerate() {
                    self.add_ring_from(&mut poly, ring, i == 0);

                    if i > 0 && poly.last().is_some_and(Vec::is_empty) {
                        poly.pop();
                    }
                }

                self.mpoly.push(poly);
            }
        }

        // centroid in tile units, then area in Mercator square meters
        if self.area != 0.0 {
            self.centroid = self.centroid * (1.0 / (6.0 * self.area));
        } else {
            // degenerate geometry; park the centroid off-tile so no label
            // gets placed
            self.centroid = Pt::new(-1.0, -1.0);
        }

        self.area *= mercator::meters_per_tile(self.id.z).powi(2);

        if self.area < 0.0 {
            debug!("polygon for feature {} has negative area", self.feat_id);
        }
    }

    fn add_ring_from(&mut self, poly: &mut Polygon, coords: &[Pt], outer: bool) {
        let mut ring: Ring = Vec::with_capacity(coords.len());
        let mut pmin = Pt::new(f64::INFINITY, f64::INFINITY);
        let mut pmax = Pt::new(f64::NEG_INFINITY, f64::NEG_INFINITY);

        for &c in coords {
            let p = self.to_tile_coord(c);

            ring.push(p);
            pmin = pmin.min(p);
            pmax = pmax.max(p);
        }

        // area and centroid of the whole feature, before clipping; first
        // and last ring points are assumed equal
        let mut area = 0.0;
        let mut centroid = Pt::default();

        for w in ring.windows(2) {
            let a = w[0].x * w[1].y - w[1].x * w[0].y;

            area += a;
            centroid.x += a * (w[0].x + w[1].x);
            centroid.y += a * (w[0].y + w[1].y);
        }

        if pmin.x > 1.0 || pmin.y > 1.0 || pmax.x < 0.0 || pmax.y < 0.0 {
            ring.clear();
        } else if pmin.x < 0.0 || pmin.y < 0.0 || pmax.x > 1.0 || pmax.y > 1.0 {
            ring = clip_ring_rect(&ring, Pt::new(0.0, 0.0), Pt::new(1.0, 1.0));
        }

        // sign of the area flips under the y flip applied at quantization,
        // so outer rings must come out clockwise here
        let rev = (area > 0.0) == outer;

        if rev {
            ring.reverse();
        }

        self.area += if rev { area / 2.0 } else { -area / 2.0 };
        self.centroid = self.centroid + centroid * if rev { 1.0 } else { -1.0 };

        poly.push(ring);
    }

    fn build_polygon(&mut self) {
        self.load_area_feature();

        for pi in 0..self.mpoly.len() {
            // skip the whole polygon when the outer ring got clipped away
            if self.mpoly[pi][0].len() < 4 {
                continue;
            }

            for ri in 0..self.mpoly[pi].len() {
                to_tile_pts(&self.mpoly[pi][ri], self.simplify_thresh, &mut self.tile_pts);
                self.emit_ring();
            }
        }
    }

    fn emit_ring(&mut self) {
        if self.tile_pts.len() < 4 {
            // tiny rings simplify away
        } else if self.tile_pts.first() != self.tile_pts.last() {
            debug!("invalid polygon ring for feature {}", self.feat_id);
        } else {
            let n = self.tile_pts.len() as u32;

            if let Some(p) = self.pending.as_mut() {
                p.fb.add_ring(&self.tile_pts);
                self.built_pts += n;
            }
        }
    }

    fn build_coastline_polygons(&mut self) {
        let fragments = std::mem::take(&mut self.coastline);

        let Some(polygons) = coastline::stitch(self.id, fragments) else {
            return;
        };

        for poly in &polygons {
            for ring in poly {
                to_tile_pts(ring, self.simplify_thresh, &mut self.tile_pts);
                self.emit_ring();
            }
        }
    }
}

/// Top-level per-tile entry: classifier errors and panics surface as empty
/// bytes so one broken feature cannot take the server down.
pub fn build_tile(
    world: &Store,
    ocean: &Store,
    schema: &dyn FeatureProcessor,
    id: TileId,
) -> Vec<u8> {
    let builder = TileBuilder::new(id, world, ocean, schema.layers());

    match catch_unwind(AssertUnwindSafe(|| builder.build(schema, true))) {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            warn!("error building tile {id}: {e}");
            Vec::new()
        }
        Err(_) => {
            warn!("panic while building tile {id}");
            Vec::new()
        }
    }
}
