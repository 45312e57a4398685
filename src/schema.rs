//! Tag-driven feature classifier.
//!
//! Decides which tile layers, zoom thresholds and attribute sets apply to
//! each OSM feature. Zoom tables live in [`ZMap`]s; frozen value sets in
//! [`Set`]s. All tag keys are resolved against the world store once, at
//! construction.

use std::collections::{HashMap, HashSet};

use crate::builder::{FeatureProcessor, TileBuilder};
use crate::error::Error;
use crate::store::{Key, Kind, Store, OCEAN_ID};

pub const LAYERS: [&str; 8] = [
    "place",
    "boundary",
    "poi",
    "transportation",
    "transit",
    "building",
    "water",
    "landuse",
];

/// Zoom sentinel meaning "never include".
const EXCLUDE: i32 = 100;

/// Label min-zoom is packed into the upper byte of a highway table entry;
/// link roads are negated and carry a ramp flag.
const fn lbl(z: i32) -> i32 {
    z << 8
}

struct Set {
    items: HashSet<&'static str>,
}

impl Set {
    fn new(items: &[&'static str]) -> Self {
        Self {
            items: items.iter().copied().collect(),
        }
    }

    fn contains(&self, value: Option<&str>) -> bool {
        value.is_some_and(|v| self.items.contains(v))
    }
}

/// Tag -> value -> min zoom, with a default for unlisted values.
struct ZMap {
    tag: &'static str,
    key: Key,
    items: HashMap<&'static str, i32>,
    dflt: i32,
}

impl ZMap {
    fn new(store: &Store, tag: &'static str, dflt: i32) -> Self {
        Self {
            tag,
            key: store.key(tag),
            items: HashMap::new(),
            dflt,
        }
    }

    fn add(mut self, z: i32, values: &[&'static str]) -> Self {
        for v in values {
            self.items.insert(v, z);
        }

        self
    }

    fn entry(mut self, value: &'static str, z: i32) -> Self {
        self.items.insert(value, z);
        self
    }

    fn tag(&self) -> &'static str {
        self.tag
    }

    fn key(&self) -> Key {
        self.key
    }

    fn get(&self, value: Option<&str>) -> i32 {
        value.map_or(self.dflt, |v| {
            self.items.get(v).copied().unwrap_or(self.dflt)
        })
    }
}

/// Interned handles for every tag key the classifier reads.
struct TagCodes {
    access: Key,
    addr_housenumber: Key,
    admin_level: Key,
    aerialway: Key,
    aerodrome: Key,
    aeroway: Key,
    amenity: Key,
    bicycle: Key,
    boundary: Key,
    bridge: Key,
    building: Key,
    building_levels: Key,
    building_min_level: Key,
    capital: Key,
    colour: Key,
    covered: Key,
    cycleway: Key,
    cycleway_both: Key,
    cycleway_left: Key,
    cycleway_right: Key,
    disputed: Key,
    ele: Key,
    footway: Key,
    ford: Key,
    golf: Key,
    height: Key,
    highway: Key,
    iata: Key,
    icao: Key,
    intermittent: Key,
    iso_a2: Key,
    landuse: Key,
    lanes: Key,
    leisure: Key,
    man_made: Key,
    maritime: Key,
    maxspeed: Key,
    meadow: Key,
    min_height: Key,
    mtb_scale: Key,
    name: Key,
    name_en: Key,
    natural: Key,
    network: Key,
    oneway: Key,
    operator: Key,
    piste_difficulty: Key,
    piste_grooming: Key,
    piste_type: Key,
    place: Key,
    place_cn: Key,
    population: Key,
    prominence: Key,
    protect_class: Key,
    protection_title: Key,
    railway: Key,
    reference: Key,
    rel_type: Key,
    route: Key,
    sac_scale: Key,
    service: Key,
    sqkm: Key,
    surface: Key,
    tourism: Key,
    trail_visibility: Key,
    tunnel: Key,
    water: Key,
    waterway: Key,
    wetland: Key,
    wikidata: Key,
    wikipedia: Key,
}

impl TagCodes {
    fn new(store: &Store) -> Self {
        Self {
            access: store.key("access"),
            addr_housenumber: store.key("addr:housenumber"),
            admin_level: store.key("admin_level"),
            aerialway: store.key("aerialway"),
            aerodrome: store.key("aerodrome"),
            aeroway: store.key("aeroway"),
            amenity: store.key("amenity"),
            bicycle: store.key("bicycle"),
            boundary: store.key("boundary"),
            bridge: store.key("bridge"),
            building: store.key("building"),
            building_levels: store.key("building:levels"),
            building_min_level: store.key("building:min_level"),
            capital: store.key("capital"),
            colour: store.key("colour"),
            covered: store.key("covered"),
            cycleway: store.key("cycleway"),
            cycleway_both: store.key("cycleway:both"),
            cycleway_left: store.key("cycleway:left"),
            cycleway_right: store.key("cycleway:right"),
            disputed: store.key("disputed"),
            ele: store.key("ele"),
            footway: store.key("footway"),
            ford: store.key("ford"),
            golf: store.key("golf"),
            height: store.key("height"),
            highway: store.key("highway"),
            iata: store.key("iata"),
            icao: store.key("icao"),
            intermittent: store.key("intermittent"),
            iso_a2: store.key("ISO3166-1:alpha2"),
            landuse: store.key("landuse"),
            lanes: store.key("lanes"),
            leisure: store.key("leisure"),
            man_made: store.key("man_made"),
            maritime: store.key("maritime"),
            maxspeed: store.key("maxspeed"),
            meadow: store.key("meadow"),
            min_height: store.key("min_height"),
            mtb_scale: store.key("mtb:scale"),
            name: store.key("name"),
            name_en: store.key("name:en"),
            natural: store.key("natural"),
            network: store.key("network"),
            oneway: store.key("oneway"),
            operator: store.key("operator"),
            piste_difficulty: store.key("piste:difficulty"),
            piste_grooming: store.key("piste:grooming"),
            piste_type: store.key("piste:type"),
            place: store.key("place"),
            place_cn: store.key("place:CN"),
            population: store.key("population"),
            prominence: store.key("prominence"),
            protect_class: store.key("protect_class"),
            protection_title: store.key("protection_title"),
            railway: store.key("railway"),
            reference: store.key("ref"),
            rel_type: store.key("type"),
            route: store.key("route"),
            sac_scale: store.key("sac_scale"),
            service: store.key("service"),
            sqkm: store.key("sqkm"),
            surface: store.key("surface"),
            tourism: store.key("tourism"),
            trail_visibility: store.key("trail_visibility"),
            tunnel: store.key("tunnel"),
            water: store.key("water"),
            waterway: store.key("waterway"),
            wetland: store.key("wetland"),
            wikidata: store.key("wikidata"),
            wikipedia: store.key("wikipedia"),
        }
    }
}

/// Schema-level knobs that used to be hard-coded.
pub struct SchemaConfig {
    /// Gate names of water bodies behind this zoom. `None` keeps the
    /// permissive legacy behavior (labels from z14).
    pub water_name_minzoom: Option<i32>,
    /// OSM way ids with known-broken coastline geometry, skipped entirely.
    pub bad_coastlines: HashSet<i64>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            water_name_minzoom: None,
            bad_coastlines: HashSet::new(),
        }
    }
}

pub struct Schema {
    cfg: SchemaConfig,
    k: TagCodes,

    aerodrome_values: Set,
    paved_values: Set,
    unpaved_values: Set,
    park_values: Set,
    landuse_areas: Set,
    natural_areas: Set,
    leisure_areas: Set,
    amenity_areas: Set,
    tourism_areas: Set,
    waterway_classes: Set,
    waterway_areas: Set,
    water_landuse: Set,
    no_name_water: Set,
    man_made_classes: Set,
    aeroway_classes: Set,
    aeroway_buildings: Set,

    highway_zoom: ZMap,
    transit_routes: ZMap,
    other_routes: ZMap,
    poi_tags: Vec<ZMap>,
    extra_poi_tags: Vec<ZMap>,
}

impl Schema {
    pub fn new(store: &Store, cfg: SchemaConfig) -> Self {
        Self {
            cfg,
            k: TagCodes::new(store),

            aerodrome_values: Set::new(&[
                "international",
                "public",
                "regional",
                "military",
                "private",
            ]),
            paved_values: Set::new(&[
                "paved",
                "asphalt",
                "cobblestone",
                "concrete",
                "concrete:lanes",
                "concrete:plates",
                "metal",
                "paving_stones",
                "sett",
                "unhewn_cobblestone",
                "wood",
            ]),
            unpaved_values: Set::new(&[
                "unpaved",
                "compacted",
                "dirt",
                "earth",
                "fine_gravel",
                "grass",
                "grass_paver",
                "gravel",
                "gravel_turf",
                "ground",
                "ice",
                "mud",
                "pebblestone",
                "salt",
                "sand",
                "snow",
                "woodchips",
            ]),
            park_values: Set::new(&["protected_area", "national_park"]),
            landuse_areas: Set::new(&[
                "retail",
                "military",
                "residential",
                "commercial",
                "industrial",
                "railway",
                "cemetery",
                "forest",
                "grass",
                "allotments",
                "meadow",
                "recreation_ground",
                "village_green",
                "landfill",
                "farmland",
                "farmyard",
                "orchard",
                "vineyard",
                "plant_nursery",
                "greenhouse_horticulture",
                "farm",
            ]),
            natural_areas: Set::new(&[
                "wood",
                "grassland",
                "grass",
                "scrub",
                "fell",
                "heath",
                "wetland",
                "glacier",
                "beach",
                "sand",
                "bare_rock",
                "scree",
            ]),
            leisure_areas: Set::new(&[
                "pitch",
                "park",
                "garden",
                "playground",
                "golf_course",
                "stadium",
            ]),
            amenity_areas: Set::new(&[
                "school",
                "university",
                "kindergarten",
                "college",
                "library",
                "hospital",
                "bus_station",
                "marketplace",
            ]),
            tourism_areas: Set::new(&["zoo", "theme_park", "aquarium"]),
            waterway_classes: Set::new(&["stream", "river", "canal", "drain", "ditch"]),
            waterway_areas: Set::new(&[
                "river",
                "riverbank",
                "stream",
                "canal",
                "drain",
                "ditch",
                "dock",
            ]),
            water_landuse: Set::new(&["reservoir", "basin", "salt_pond"]),
            no_name_water: Set::new(&[
                "river",
                "basin",
                "wastewater",
                "canal",
                "stream",
                "ditch",
                "drain",
            ]),
            man_made_classes: Set::new(&["pier", "breakwater", "groyne"]),
            aeroway_classes: Set::new(&[
                "taxiway",
                "hangar",
                "runway",
                "helipad",
                "aerodrome",
                "airstrip",
                "tower",
            ]),
            aeroway_buildings: Set::new(&["terminal", "gate", "tower"]),

            highway_zoom: ZMap::new(store, "highway", EXCLUDE)
                .entry("motorway", 4 | lbl(8))
                .entry("trunk", 6 | lbl(8))
                .entry("primary", 7 | lbl(12))
                .entry("secondary", 9 | lbl(12))
                .entry("tertiary", 11 | lbl(12))
                // minor roads
                .add(
                    12,
                    &["unclassified", "residential", "road", "living_street", "service"],
                )
                // tracks and paths
                .add(10, &["cycleway", "byway", "bridleway", "track"])
                .add(10, &["footway", "path", "steps", "pedestrian"])
                // link roads (on/off ramps)
                .add(
                    -11,
                    &[
                        "motorway_link",
                        "trunk_link",
                        "primary_link",
                        "secondary_link",
                        "tertiary_link",
                    ],
                ),
            transit_routes: ZMap::new(store, "route", EXCLUDE)
                .entry("train", 8)
                .entry("subway", 10)
                .entry("tram", 12)
                .entry("share_taxi", 12)
                .entry("light_rail", 12)
                .entry("bus", 14)
                .entry("trolleybus", 14),
            other_routes: ZMap::new(store, "route", EXCLUDE)
                .entry("road", 8)
                .entry("ferry", 9)
                .entry("bicycle", 10)
                .entry("hiking", 10)
                .entry("foot", 12)
                .entry("mtb", 10)
                .entry("ski", 12),
            poi_tags: vec![
                // common amenity values we do not want on the map are
                // excluded outright
                ZMap::new(store, "amenity", 14)
                    .add(12, &["bus_station", "ferry_terminal"])
                    .add(
                        EXCLUDE,
                        &[
                            "parking_space",
                            "bench",
                            "shelter",
                            "waste_basket",
                            "bicycle_parking",
                            "recycling",
                            "hunting_stand",
                            "vending_machine",
                            "post_box",
                            "parking_entrance",
                            "telephone",
                            "bbq",
                            "motorcycle_parking",
                            "grit_bin",
                            "clock",
                            "letter_box",
                            "watering_place",
                            "loading_dock",
                            "payment_terminal",
                            "mobile_money_agent",
                            "trolley_bay",
                            "ticket_validator",
                            "lounger",
                            "feeding_place",
                            "vacuum_cleaner",
                            "game_feeding",
                            "smoking_area",
                            "photo_booth",
                            "kneipp_water_cure",
                            "table",
                            "fixme",
                            "office",
                            "chair",
                        ],
                    ),
                ZMap::new(store, "tourism", 14)
                    .add(12, &["attraction", "viewpoint", "museum"])
                    .add(EXCLUDE, &["yes"]),
                ZMap::new(store, "leisure", 14).add(
                    EXCLUDE,
                    &[
                        "fitness_station",
                        "picnic_table",
                        "slipway",
                        "outdoor_seating",
                        "firepit",
                        "bleachers",
                        "common",
                        "yes",
                    ],
                ),
                ZMap::new(store, "shop", 14),
                ZMap::new(store, "sport", 14),
                ZMap::new(store, "landuse", EXCLUDE).add(
                    14,
                    &["basin", "brownfield", "cemetery", "reservoir", "winter_sports"],
                ),
                ZMap::new(store, "historic", EXCLUDE).add(
                    14,
                    &["monument", "castle", "ruins", "fort", "mine", "archaeological_site"],
                ),
                ZMap::new(store, "highway", EXCLUDE)
                    .add(12, &["bus_stop", "trailhead"])
                    .add(14, &["traffic_signals"]),
                ZMap::new(store, "railway", EXCLUDE)
                    .add(12, &["halt", "station", "tram_stop"])
                    .add(14, &["subway_entrance", "train_station_entrance"]),
                ZMap::new(store, "natural", EXCLUDE).add(
                    13,
                    &[
                        "spring",
                        "hot_spring",
                        "fumarole",
                        "geyser",
                        "sinkhole",
                        "arch",
                        "cave_entrance",
                        "saddle",
                    ],
                ),
                ZMap::new(store, "barrier", EXCLUDE).add(
                    14,
                    &[
                        "bollard",
                        "border_control",
                        "cycle_barrier",
                        "gate",
                        "lift_gate",
                        "sally_port",
                        "stile",
                        "toll_booth",
                    ],
                ),
                ZMap::new(store, "building", EXCLUDE).add(14, &["dormitory"]),
                ZMap::new(store, "aerialway", EXCLUDE).add(14, &["station"]),
                ZMap::new(store, "waterway", EXCLUDE).add(14, &["dock"]),
            ],
            extra_poi_tags: vec![
                ZMap::new(store, "cuisine", 14),
                ZMap::new(store, "station", 14),
                ZMap::new(store, "religion", 14),
                ZMap::new(store, "operator", 14),
                ZMap::new(store, "archaeological_site", 14),
                ZMap::new(store, "ref", 14),
            ],
        }
    }

    fn process_node(&self, ctx: &mut TileBuilder) {
        let k = &self.k;

        if let Some(place) = ctx.find(k.place) {
            let pop = parse_num(ctx.find(k.population)).unwrap_or(0.0);

            let mz = match place {
                "continent" => 0,
                "country" => 3 - i32::from(pop > 50e6) - i32::from(pop > 20e6),
                "state" => 4,
                "city" => 5 - i32::from(pop > 5e6) - i32::from(pop > 0.5e6),
                "town" => {
                    if pop > 8000.0 {
                        7
                    } else {
                        8
                    }
                }
                "village" => {
                    if pop > 2000.0 {
                        9
                    } else {
                        10
                    }
                }
                "suburb" => 11,
                "hamlet" | "quarter" => 12,
                // neighbourhood, locality and anything else
                _ => 13,
            };

            if !ctx.min_zoom(mz) {
                return;
            }

            ctx.layer("place");
            ctx.attribute("class", Some(place));
            ctx.attribute("place", Some(place));
            ctx.attribute("ref", ctx.find(k.reference));
            ctx.attribute("capital", ctx.find(k.capital));

            if pop > 0.0 {
                ctx.attribute_num("population", pop);
            }

            if let Some(sqkm) = parse_num(ctx.find(k.sqkm)) {
                ctx.attribute_num("sqkm", sqkm);
            }

            if place == "country" {
                ctx.attribute("iso_a2", ctx.find(k.iso_a2));
            }

            ctx.attribute("place_CN", ctx.find(k.place_cn));
            self.set_name_attributes(ctx, 0);
            self.set_id_attributes(ctx);
            return;
        }

        // many smaller airports only have an aerodrome node instead of a way
        if ctx.find(k.aeroway) == Some("aerodrome") {
            if !ctx.min_zoom(11) {
                return;
            }

            ctx.layer("transportation");
            ctx.attribute("aeroway", Some("aerodrome"));
            ctx.attribute("ref", ctx.find(k.reference));
            self.set_name_attributes(ctx, 0);
            self.set_ele_attributes(ctx);
            ctx.attribute("iata", ctx.find(k.iata));
            ctx.attribute("icao", ctx.find(k.icao));
            self.set_aerodrome_class(ctx);
            return;
        }

        self.write_poi(ctx, 0.0, false);

        let natural = ctx.find(k.natural);

        if matches!(natural, Some("peak") | Some("volcano")) {
            let prominence = parse_num(ctx.find(k.prominence)).unwrap_or(0.0);

            let mz = if prominence > 4000.0 {
                6
            } else if prominence > 3500.0 {
                7
            } else if prominence > 3000.0 {
                8
            } else if prominence > 2500.0 {
                9
            } else if prominence > 2000.0 {
                10
            } else {
                11
            };

            if !ctx.min_zoom(mz) {
                return;
            }

            ctx.layer("poi");
            self.set_name_attributes(ctx, 0);
            self.set_id_attributes(ctx);
            self.set_ele_attributes(ctx);

            if prominence > 0.0 {
                ctx.attribute_num("prominence", prominence);
            }

            ctx.attribute("natural", natural);
            return;
        }

        if natural == Some("bay") {
            if !ctx.min_zoom(8) {
                return;
            }

            ctx.layer("water");
            self.set_name_attributes(ctx, 0);
        }
    }

    fn process_way(&self, ctx: &mut TileBuilder) {
        let k = &self.k;

        // over half of all ways are buildings, so check those first
        if ctx.holds(k.building) {
            if !ctx.min_zoom(12) || !self.min_zoom_by_area(ctx, 0.0) {
                return;
            }

            ctx.layer("building");
            self.set_building_height_attributes(ctx);

            if ctx.min_zoom(14) {
                // housenumbers on poi nodes are useless without the street
                ctx.attribute("housenumber", ctx.find(k.addr_housenumber));
                self.write_poi(ctx, 0.0, true);
            }

            return;
        }

        if let Some(highway_tag) = ctx.find(k.highway) {
            let raw = self.highway_zoom.get(Some(highway_tag));
            let ramp = raw < 0;
            let mut minzoom = if ramp { -raw } else { raw };
            let highway = if ramp {
                highway_tag.split('_').next().unwrap_or(highway_tag)
            } else {
                highway_tag
            };

            let lblzoom = if minzoom >> 8 != 0 { minzoom >> 8 } else { 14 };

            minzoom &= 0xff;

            if !ctx.min_zoom(minzoom) {
                return;
            }

            let access = ctx.find(k.access);

            if access == Some("private") || access == Some("no") {
                return;
            }

            // sidewalks and crossings are mapped too inconsistently to be
            // anything but clutter
            if highway == "footway" && ctx.holds(k.footway) {
                return;
            }

            ctx.layer("transportation");
            ctx.attribute("highway", Some(highway));
            self.set_brunnel_attributes(ctx);

            if ramp {
                ctx.attribute_int("ramp", 1);
            }

            if highway == "service" {
                ctx.attribute("service", ctx.find(k.service));
            }

            let oneway = ctx.find(k.oneway);

            if oneway == Some("yes") || oneway == Some("1") {
                ctx.attribute_int("oneway", 1);
            }

            let cycleway = ctx.find(k.cycleway).or_else(|| ctx.find(k.cycleway_both));

            if let Some(c) = cycleway {
                if c != "no" {
                    ctx.attribute("cycleway", Some(c));
                }
            }

            for (key, attr) in [
                (k.cycleway_left, "cycleway_left"),
                (k.cycleway_right, "cycleway_right"),
                (k.bicycle, "bicycle"),
            ] {
                if let Some(v) = ctx.find(key) {
                    if v != "no" {
                        ctx.attribute(attr, Some(v));
                    }
                }
            }

            let surface = ctx.find(k.surface);

            if self.paved_values.contains(surface) {
                ctx.attribute("surface", Some("paved"));
            } else if self.unpaved_values.contains(surface) {
                ctx.attribute("surface", Some("unpaved"));
            }

            // trail and path details
            if let Some(v) = ctx.find(k.trail_visibility) {
                if v != "good" && v != "excellent" {
                    ctx.attribute("trail_visibility", Some(v));
                }
            }

            if let Some(v) = ctx.find(k.sac_scale) {
                if v != "hiking" {
                    ctx.attribute("sac_scale", Some(v));
                }
            }

            ctx.attribute("mtb_scale", ctx.find(k.mtb_scale));

            if highway == "path" {
                ctx.attribute("golf", ctx.find(k.golf));
            }

            self.set_name_attributes(ctx, lblzoom);
            ctx.attribute("maxspeed", ctx.find(k.maxspeed));
            ctx.attribute("lanes", ctx.find(k.lanes));
            ctx.attribute("ref", ctx.find(k.reference));
            return;
        }

        if let Some(railway) = ctx.find(k.railway) {
            let service = ctx.find(k.service);

            if !ctx.min_zoom(if service.is_some() { 12 } else { 9 }) {
                return;
            }

            ctx.layer("transportation");
            ctx.attribute("class", Some("rail"));
            ctx.attribute("railway", Some(railway));
            self.set_brunnel_attributes(ctx);
            self.set_name_attributes(ctx, 14);
            ctx.attribute("service", service);
            return;
        }

        let is_closed = ctx.is_closed();
        let waterway = ctx.find(k.waterway);
        let mut landuse = ctx.find(k.landuse);

        // a waterway way traces the course; wide rivers carry separate
        // area polygons
        if self.waterway_classes.contains(waterway) && !is_closed {
            let named_river = waterway == Some("river") && ctx.holds(k.name);

            if !ctx.min_zoom(if named_river { 8 } else { 12 }) {
                return;
            }

            ctx.layer("water");

            if ctx.find(k.intermittent) == Some("yes") {
                ctx.attribute_int("intermittent", 1);
            }

            ctx.attribute("class", waterway);
            ctx.attribute("waterway", waterway);
            self.set_name_attributes(ctx, 0);
            self.set_brunnel_attributes(ctx);
            return;
        } else if waterway == Some("dam") {
            if !ctx.min_zoom(12) {
                return;
            }

            ctx.layer("building");
            ctx.attribute("waterway", waterway);
            return;
        } else if matches!(waterway, Some("boatyard") | Some("fuel")) {
            landuse = Some("industrial");
        }

        let natural = ctx.find(k.natural);
        let leisure = ctx.find(k.leisure);

        let waterbody = if self.water_landuse.contains(landuse) {
            landuse
        } else if self.waterway_areas.contains(waterway) {
            waterway
        } else if leisure == Some("swimming_pool") {
            leisure
        } else if natural == Some("water") {
            // natural=bay carries the name, not the water itself
            natural
        } else {
            None
        };

        if let Some(waterbody) = waterbody {
            if !is_closed
                || !self.min_zoom_by_area(ctx, 0.0)
                || ctx.find(k.covered) == Some("yes")
            {
                return;
            }

            let class = if waterway.is_some() { "river" } else { "lake" };
            let water = ctx.find(k.water);

            ctx.layer("water");
            ctx.attribute("class", Some(class));
            ctx.attribute("water", Some(water.unwrap_or(waterbody)));

            if ctx.find(k.intermittent) == Some("yes") {
                ctx.attribute_int("intermittent", 1);
            }

            // no names for minor man-made basins or river polygons, which
            // carry the name on the waterway way
            if ctx.holds(k.name) && natural == Some("water") && !self.no_name_water.contains(water)
            {
                let label_zoom = self.cfg.water_name_minzoom.unwrap_or(14);

                self.set_name_attributes(ctx, label_zoom);

                let area = ctx.area();

                ctx.attribute_num("area", area);

                if ctx.min_zoom(label_zoom) {
                    // separate label point for the water name
                    ctx.layer_as_centroid("water");
                    self.set_name_attributes(ctx, label_zoom);
                    ctx.attribute_num("area", area);
                }
            }

            return;
        }

        if natural == Some("bay") && is_closed {
            if !ctx.min_zoom(8) {
                return;
            }

            ctx.layer_as_centroid("water");
            self.set_name_attributes(ctx, 0);
            return;
        }

        if let Some(nat) = natural {
            if nat == "coastline" {
                if !self.cfg.bad_coastlines.contains(&ctx.feat_id()) {
                    ctx.add_coastline();
                }
                // the way may also carry boundary tags, so keep going
            } else if nat == "valley" || nat == "gorge" {
                // valleys and gorges are mapped as ways; size by length
                let len = ctx.length();

                if !self.min_zoom_by_area(ctx, len * len) {
                    return;
                }

                ctx.layer("landuse");
                ctx.attribute("natural", Some(nat));
                self.set_name_attributes(ctx, 0);
                return;
            }
        }

        let boundary = ctx.find(k.boundary);
        let park_boundary = self.park_values.contains(boundary);

        if park_boundary || leisure == Some("nature_reserve") {
            if !self.min_zoom_by_area(ctx, 0.0) {
                return;
            }

            if ctx.find(k.protection_title) == Some("National Forest")
                && ctx.find(k.operator) == Some("United States Forest Service")
            {
                return; // too many
            }

            ctx.layer("landuse");
            ctx.attribute("class", if park_boundary { boundary } else { leisure });

            if park_boundary {
                ctx.attribute("boundary", boundary);
            }

            ctx.attribute("leisure", leisure);
            ctx.attribute("protect_class", ctx.find(k.protect_class));
            self.set_name_attributes(ctx, 0);

            let area = ctx.area();
            let force = ctx.min_zoom(14);

            self.write_poi(ctx, area, force);
        }

        // a way can share park and administrative boundary tagging; ways
        // with a parent relation are written by the relation instead
        if !ctx.feature().in_relation
            && matches!(boundary, Some("administrative") | Some("disputed"))
        {
            self.write_boundary(ctx);
        }

        if is_closed && matches!(ctx.find(k.place), Some("island") | Some("islet")) {
            if !self.min_zoom_by_area(ctx, 0.0) {
                return;
            }

            let place = ctx.find(k.place);

            ctx.layer_as_centroid("place");
            ctx.attribute("class", place);
            ctx.attribute("place", place);
            self.set_name_attributes(ctx, 0);
            self.set_id_attributes(ctx);
            return;
        }

        let amenity = ctx.find(k.amenity);
        let tourism = ctx.find(k.tourism);

        if landuse == Some("field") {
            landuse = Some("farmland");
        } else if landuse == Some("meadow") && ctx.find(k.meadow) == Some("agricultural") {
            landuse = Some("farmland");
        }

        if self.landuse_areas.contains(landuse)
            || self.natural_areas.contains(natural)
            || self.leisure_areas.contains(leisure)
            || self.amenity_areas.contains(amenity)
            || self.tourism_areas.contains(tourism)
        {
            if !self.min_zoom_by_area(ctx, 0.0) {
                return;
            }

            ctx.layer("landuse");
            ctx.attribute("landuse", landuse);
            ctx.attribute("natural", natural);
            ctx.attribute("leisure", leisure);
            ctx.attribute("amenity", amenity);
            ctx.attribute("tourism", tourism);

            if natural == Some("wetland") {
                ctx.attribute("wetland", ctx.find(k.wetland));
            }

            let area = ctx.area();
            let force = ctx.min_zoom(14);

            self.write_poi(ctx, area, force);
            return;
        }

        // less common ways

        let man_made = ctx.find(k.man_made);

        if self.man_made_classes.contains(man_made) {
            if !self.min_zoom_by_area(ctx, 0.0) {
                return;
            }

            ctx.layer("landuse");
            ctx.attribute("class", man_made);
            ctx.attribute("man_made", man_made);
            return;
        }

        if ctx.find(k.route) == Some("ferry") {
            if !ctx.min_zoom(9) {
                return;
            }

            // the parent relation writes the route instead
            if ctx.feature().in_relation {
                return;
            }

            ctx.layer("transportation");
            ctx.attribute("route", Some("ferry"));
            self.set_brunnel_attributes(ctx);
            self.set_name_attributes(ctx, 12);
            return;
        }

        if let Some(difficulty) = ctx.find(k.piste_difficulty) {
            if !ctx.min_zoom(10) {
                return;
            }

            ctx.layer("transportation");
            ctx.attribute("class", Some("piste"));
            ctx.attribute("route", Some("piste"));
            ctx.attribute("difficulty", Some(difficulty));
            ctx.attribute("piste_type", ctx.find(k.piste_type));
            // grooming distinguishes backcountry "pistes"
            ctx.attribute("piste_grooming", ctx.find(k.piste_grooming));
            self.set_name_attributes(ctx, 14);
            return;
        }

        if let Some(aerialway) = ctx.find(k.aerialway) {
            if !ctx.min_zoom(10) {
                return;
            }

            ctx.layer("transportation");
            ctx.attribute("class", Some("aerialway"));
            ctx.attribute("aerialway", Some(aerialway));
            self.set_name_attributes(ctx, 14);
            return;
        }

        let aeroway = ctx.find(k.aeroway);

        if self.aeroway_buildings.contains(aeroway) {
            if !self.min_zoom_by_area(ctx, 0.0) {
                return;
            }

            ctx.layer("building");
            ctx.attribute("aeroway", aeroway);
            self.set_building_height_attributes(ctx);

            if ctx.min_zoom(14) {
                self.write_poi(ctx, 0.0, true);
            }

            return;
        }

        if self.aeroway_classes.contains(aeroway) {
            if !ctx.min_zoom(10) {
                return;
            }

            ctx.layer("transportation");
            ctx.attribute("aeroway", aeroway);
            ctx.attribute("ref", ctx.find(k.reference));

            if aeroway == Some("aerodrome") {
                self.set_name_attributes(ctx, 0);
                self.set_ele_attributes(ctx);
                ctx.attribute("iata", ctx.find(k.iata));
                ctx.attribute("icao", ctx.find(k.icao));
                self.set_aerodrome_class(ctx);

                let area = ctx.area();

                ctx.attribute_num("area", area);

                // label point for the airport itself
                ctx.layer_as_centroid("poi");
                self.set_name_attributes(ctx, 0);
                self.set_id_attributes(ctx);
                ctx.attribute("aeroway", aeroway);
                ctx.attribute("iata", ctx.find(k.iata));
                ctx.attribute("icao", ctx.find(k.icao));
            }

            return;
        }

        if is_closed {
            self.write_poi(ctx, 0.0, false);
        }
    }

    fn process_relation(&self, ctx: &mut TileBuilder) {
        let k = &self.k;
        let rel_type = ctx.find(k.rel_type);

        if rel_type == Some("route") {
            let route = ctx.find(k.route);

            if route == Some("ferry") {
                if !ctx.min_zoom(9) {
                    return;
                }

                ctx.layer("transportation");
                ctx.attribute("route", Some("ferry"));
                self.set_name_attributes(ctx, 12);
                return;
            }

            if ctx.min_zoom(self.transit_routes.get(route)) {
                ctx.layer("transit");
            } else if ctx.min_zoom(self.other_routes.get(route)) {
                ctx.layer("transportation");
            } else {
                return;
            }

            ctx.attribute("class", Some("route"));
            ctx.attribute("route", route);
            ctx.attribute("name", ctx.find(k.name));
            ctx.attribute("ref", ctx.find(k.reference));
            ctx.attribute("network", ctx.find(k.network));
            // note OSM spelling
            ctx.attribute("color", ctx.find(k.colour));
            self.set_id_attributes(ctx);
            return;
        }

        if rel_type == Some("boundary") {
            let boundary = ctx.find(k.boundary);

            if matches!(boundary, Some("administrative") | Some("disputed")) {
                self.write_boundary(ctx);
                return;
            }

            if !self.park_values.contains(boundary) || !ctx.min_zoom(8) {
                return;
            }

            // marine sanctuaries are not useful for typical use
            if ctx.find(k.maritime) == Some("yes") {
                return;
            }

            let leisure = ctx.find(k.leisure);
            let protect_class = ctx.find(k.protect_class);
            let area = ctx.area();

            ctx.layer("landuse");
            ctx.attribute("class", boundary);
            ctx.attribute("boundary", boundary);
            ctx.attribute("leisure", leisure);
            ctx.attribute("protect_class", protect_class);
            self.set_name_attributes(ctx, 0);
            ctx.attribute_num("area", area);

            // label point at the centroid
            ctx.layer_as_centroid("poi");
            ctx.attribute("class", boundary);
            ctx.attribute("boundary", boundary);
            ctx.attribute("leisure", leisure);
            ctx.attribute("protect_class", protect_class);
            self.set_name_attributes(ctx, 0);
            self.set_id_attributes(ctx);
            ctx.attribute_num("area", area);
        }
    }

    fn write_boundary(&self, ctx: &mut TileBuilder) {
        let k = &self.k;
        let mut admin_level = parse_num(ctx.find(k.admin_level)).unwrap_or(11.0);

        if admin_level < 1.0 {
            admin_level = 11.0;
        }

        let mz = if admin_level >= 8.0 {
            12
        } else if admin_level >= 7.0 {
            10
        } else if admin_level >= 5.0 {
            8
        } else if admin_level >= 3.0 {
            4
        } else {
            2
        };

        if !ctx.min_zoom(mz) {
            return;
        }

        let maritime = ctx.find(k.maritime) == Some("yes");
        let disputed =
            ctx.find(k.boundary) == Some("disputed") || ctx.find(k.disputed) == Some("yes");

        if ctx.feature().kind == Kind::Way {
            ctx.layer("boundary");
            ctx.attribute_num("admin_level", admin_level);
            self.set_name_attributes(ctx, 0);
            // natural=coastline lets styles hide coastal borders
            ctx.attribute("natural", ctx.find(k.natural));

            if maritime {
                ctx.attribute("maritime", Some("yes"));
            }

            if disputed {
                ctx.attribute("disputed", Some("yes"));
            }

            return;
        }

        // names and the country code come from the relation; geometry from
        // each member way intersecting this tile
        let name = ctx.find(k.name);
        let name_en = ctx.find(k.name_en).filter(|en| Some(*en) != name);
        let iso = ctx.find(k.iso_a2);
        let relation = ctx.feature();

        for member in ctx.members() {
            if member.kind != Kind::Way || !ctx.member_intersects_tile(member) {
                continue;
            }

            ctx.set_feature(member);
            ctx.layer("boundary");
            ctx.attribute_num("admin_level", admin_level);
            ctx.attribute("name", name);
            ctx.attribute("name_en", name_en);
            ctx.attribute("iso_a2", iso);
            ctx.attribute("natural", ctx.find(k.natural));

            if maritime || ctx.find(k.maritime) == Some("yes") {
                ctx.attribute("maritime", Some("yes"));
            }

            if disputed
                || ctx.find(k.boundary) == Some("disputed")
                || ctx.find(k.disputed) == Some("yes")
            {
                ctx.attribute("disputed", Some("yes"));
            }
        }

        ctx.set_feature(relation);
    }

    /// Generic POI test. A feature is written when any poi tag qualifies
    /// for the current zoom, or unconditionally (given a name) when
    /// `force` is set.
    fn write_poi(&self, ctx: &mut TileBuilder, area: f64, force: bool) -> bool {
        if !ctx.min_zoom(12) {
            return false; // no POIs below z12
        }

        let force12 = area > 0.0 || ctx.holds(self.k.wikipedia);

        for z in &self.poi_tags {
            let val = ctx.find(z.key());

            if val.is_some() && (force12 || ctx.min_zoom(z.get(val))) {
                ctx.layer_as_centroid("poi");
                self.set_name_attributes(ctx, 0);
                self.set_id_attributes(ctx);

                if area > 0.0 {
                    ctx.attribute_num("area", area);
                }

                if ctx.holds(self.k.wikipedia) {
                    ctx.attribute_int("wikipedia", 1);
                }

                if ctx.holds(self.k.wikidata) {
                    ctx.attribute_int("wikidata", 1);
                }

                // write the value of every poi tag that is present
                for y in &self.poi_tags {
                    ctx.attribute(y.tag(), ctx.find(y.key()));
                }

                for extra in &self.extra_poi_tags {
                    ctx.attribute(extra.tag(), ctx.find(extra.key()));
                }

                return true;
            }
        }

        if force && ctx.holds(self.k.name) {
            ctx.layer_as_centroid("poi");
            self.set_name_attributes(ctx, 0);
            self.set_id_attributes(ctx);

            if area > 0.0 {
                ctx.attribute_num("area", area);
            }
        }

        false
    }

    fn set_name_attributes(&self, ctx: &mut TileBuilder, minzoom: i32) {
        if !ctx.min_zoom(minzoom) {
            return;
        }

        let name = ctx.find(self.k.name);

        ctx.attribute("name", name);

        if let Some(name_en) = ctx.find(self.k.name_en) {
            if Some(name_en) != name {
                ctx.attribute("name_en", Some(name_en));
            }
        }
    }

    // ids are only written for the poi, place and transit layers, where
    // the viewer needs to resolve the source feature
    fn set_id_attributes(&self, ctx: &mut TileBuilder) {
        let osm_type = match ctx.feature().kind {
            Kind::Node => "node",
            Kind::Way => "way",
            Kind::Relation => "relation",
        };

        let id = ctx.feat_id().to_string();

        ctx.attribute("osm_id", Some(id.as_str()));
        ctx.attribute("osm_type", Some(osm_type));
    }

    fn set_ele_attributes(&self, ctx: &mut TileBuilder) {
        if let Some(ele) = parse_num(ctx.find(self.k.ele)) {
            ctx.attribute_num("ele", ele);
        }
    }

    fn set_brunnel_attributes(&self, ctx: &mut TileBuilder) {
        if ctx.find(self.k.bridge) == Some("yes") {
            ctx.attribute("brunnel", Some("bridge"));
        } else if ctx.find(self.k.tunnel) == Some("yes") {
            ctx.attribute("brunnel", Some("tunnel"));
        } else if ctx.find(self.k.ford) == Some("yes") {
            ctx.attribute("brunnel", Some("ford"));
        }
    }

    fn set_aerodrome_class(&self, ctx: &mut TileBuilder) {
        let aerodrome = ctx.find(self.k.aerodrome);

        let class = match aerodrome {
            Some(v) if self.aerodrome_values.contains(aerodrome) => v,
            _ => "other",
        };

        ctx.attribute("aerodrome", Some(class));
    }

    fn set_building_height_attributes(&self, ctx: &mut TileBuilder) {
        const FLOOR_HEIGHT_M: f64 = 3.66;

        let mut height = 0.0;
        let mut min_height = 0.0;

        if let Some(h) = parse_num(ctx.find(self.k.height)) {
            height = h;
            min_height = parse_num(ctx.find(self.k.min_height)).unwrap_or(0.0);
        } else if let Some(levels) = parse_num(ctx.find(self.k.building_levels)) {
            height = levels * FLOOR_HEIGHT_M;
            min_height =
                parse_num(ctx.find(self.k.building_min_level)).unwrap_or(0.0) * FLOOR_HEIGHT_M;
        }

        if height < min_height {
            height += min_height;
        }

        if height > 0.0 {
            ctx.attribute_num("height", height);
        }

        if min_height > 0.0 {
            ctx.attribute_num("min_height", min_height);
        }
    }

    /// Area-based minimum zoom, with a bounding-box pre-filter that avoids
    /// loading the exact polygon when the bound already fails.
    fn min_zoom_by_area(&self, ctx: &mut TileBuilder, area: f64) -> bool {
        if ctx.min_zoom(14) {
            return true; // skip the area calculation at the highest zoom
        }

        if area > 0.0 {
            return ctx.min_zoom(area_min_zoom(area));
        }

        let bound = ctx.bbox_area();

        if bound > 0.0 && !ctx.min_zoom(area_min_zoom(bound)) {
            return false;
        }

        let area = ctx.area();

        ctx.min_zoom(area_min_zoom(area))
    }
}

/// Squared meters-per-pixel thresholds for a 256px tile at each zoom.
const ZRES5: f64 = 4891.97 * 4891.97;
const ZRES6: f64 = 2445.98 * 2445.98;
const ZRES7: f64 = 1222.99 * 1222.99;
const ZRES8: f64 = 611.5 * 611.5;
const ZRES9: f64 = 305.7 * 305.7;
const ZRES10: f64 = 152.9 * 152.9;
const ZRES11: f64 = 76.4 * 76.4;
const ZRES12: f64 = 38.2 * 38.2;

fn area_min_zoom(area: f64) -> i32 {
    if area > ZRES5 {
        6
    } else if area > ZRES6 {
        7
    } else if area > ZRES7 {
        8
    } else if area > ZRES8 {
        9
    } else if area > ZRES9 {
        10
    } else if area > ZRES10 {
        11
    } else if area > ZRES11 {
        12
    } else if area > ZRES12 {
        13
    } else {
        14
    }
}

fn parse_num(value: Option<&str>) -> Option<f64> {
    value.and_then(|v| v.parse().ok())
}

impl FeatureProcessor for Schema {
    fn layers(&self) -> &[&'static str] {
        &LAYERS
    }

    fn process(&self, ctx: &mut TileBuilder) -> Result<(), Error> {
        if ctx.feat_id() == OCEAN_ID {
            ctx.layer("water");
            ctx.attribute("class", Some("ocean"));
            ctx.attribute("water", Some("ocean"));
            return Ok(());
        }

        match ctx.feature().kind {
            Kind::Way => self.process_way(ctx),
            Kind::Node => self.process_node(ctx),
            Kind::Relation if ctx.find(self.k.rel_type) == Some("multipolygon") => {
                self.process_way(ctx)
            }
            Kind::Relation => self.process_relation(ctx),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvt::GeomType;
    use crate::testutil::*;
    use crate::tile_id::TileId;

    #[test]
    fn building_respects_zoom_gates() {
        let make = |z| {
            let id = tile_at(10.0, 50.0, z);
            let sq = square_around(10.0, 50.0, 200.0);

            build(
                vec![way(1, sq, &[("building", "yes"), ("name", "Big Hall")])],
                Vec::new(),
                id,
            )
        };

        // below z12 nothing is written at all
        assert!(make(11).is_empty());

        let bytes = make(14);
        let tile = decode(&bytes);
        let building = layer(&tile, "building");

        assert_eq!(building.features.len(), 1);
        assert_eq!(building.features[0].r#type, Some(GeomType::Polygon as i32));

        // forced POI at the centroid for named buildings
        let poi = layer(&tile, "poi");

        assert_eq!(poi.features.len(), 1);
        assert_eq!(
            tag_value(poi, &poi.features[0], "name")
                .string_value
                .as_deref(),
            Some("Big Hall")
        );
    }

    #[test]
    fn building_height_from_levels() {
        let id = tile_at(10.0, 50.0, 14);
        let sq = square_around(10.0, 50.0, 100.0);

        let bytes = build(
            vec![way(1, sq, &[("building", "yes"), ("building:levels", "3")])],
            Vec::new(),
            id,
        );

        let tile = decode(&bytes);
        let building = layer(&tile, "building");
        let h = tag_value(building, &building.features[0], "height")
            .double_value
            .unwrap();

        assert!((h - 3.0 * 3.66).abs() < 1e-9);
    }

    #[test]
    fn link_road_gets_ramp_flag() {
        let id = tile_at(10.0, 50.0, 12);
        let bbox = crate::mercator::tile_box(id);
        let lat = (bbox.min_y + bbox.max_y) / 2.0;

        let bytes = build(
            vec![way(
                1,
                vec![
                    (bbox.min_x + bbox.width() * 0.3, lat),
                    (bbox.min_x + bbox.width() * 0.7, lat),
                ],
                &[("highway", "motorway_link")],
            )],
            Vec::new(),
            id,
        );

        let tile = decode(&bytes);
        let transportation = layer(&tile, "transportation");
        let feature = &transportation.features[0];

        assert_eq!(
            tag_value(transportation, feature, "highway")
                .string_value
                .as_deref(),
            Some("motorway")
        );
        assert_eq!(tag_value(transportation, feature, "ramp").int_value, Some(1));
    }

    #[test]
    fn private_roads_are_skipped() {
        let id = tile_at(10.0, 50.0, 12);
        let bbox = crate::mercator::tile_box(id);
        let lat = (bbox.min_y + bbox.max_y) / 2.0;

        let bytes = build(
            vec![way(
                1,
                vec![
                    (bbox.min_x + bbox.width() * 0.3, lat),
                    (bbox.min_x + bbox.width() * 0.7, lat),
                ],
                &[("highway", "residential"), ("access", "private")],
            )],
            Vec::new(),
            id,
        );

        assert!(bytes.is_empty());
    }

    #[test]
    fn named_river_appears_at_z8() {
        let id = tile_at(10.0, 50.0, 8);
        let bbox = crate::mercator::tile_box(id);
        let lat = (bbox.min_y + bbox.max_y) / 2.0;
        let coords = vec![
            (bbox.min_x + bbox.width() * 0.2, lat),
            (bbox.min_x + bbox.width() * 0.8, lat + bbox.height() * 0.1),
        ];

        let named = build(
            vec![way(
                1,
                coords.clone(),
                &[("waterway", "river"), ("name", "Rhein")],
            )],
            Vec::new(),
            id,
        );

        assert!(!named.is_empty());

        let tile = decode(&named);
        let water = layer(&tile, "water");

        assert_eq!(
            tag_value(water, &water.features[0], "waterway")
                .string_value
                .as_deref(),
            Some("river")
        );

        // unnamed waterways wait for z12
        let unnamed = build(vec![way(1, coords, &[("waterway", "river")])], Vec::new(), id);

        assert!(unnamed.is_empty());
    }

    #[test]
    fn lake_emits_polygon_and_label_point() {
        let id = tile_at(10.0, 50.0, 14);
        let sq = square_around(10.0, 50.0, 300.0);

        let bytes = build(
            vec![way(
                1,
                sq,
                &[("natural", "water"), ("name", "Teich"), ("water", "pond")],
            )],
            Vec::new(),
            id,
        );

        let tile = decode(&bytes);
        let water = layer(&tile, "water");

        assert_eq!(water.features.len(), 2);
        assert_eq!(water.features[0].r#type, Some(GeomType::Polygon as i32));
        assert_eq!(water.features[1].r#type, Some(GeomType::Point as i32));
        assert_eq!(
            tag_value(water, &water.features[1], "name")
                .string_value
                .as_deref(),
            Some("Teich")
        );
    }

    #[test]
    fn excluded_amenity_writes_no_poi() {
        let id = tile_at(10.0, 50.0, 14);

        let cafe = build(
            vec![node(1, 10.0, 50.0, &[("amenity", "cafe"), ("name", "K")])],
            Vec::new(),
            id,
        );
        let tile = decode(&cafe);

        assert_eq!(layer(&tile, "poi").features.len(), 1);

        let bench = build(
            vec![node(1, 10.0, 50.0, &[("amenity", "bench")])],
            Vec::new(),
            id,
        );

        assert!(bench.is_empty());
    }

    #[test]
    fn poi_includes_extra_tags() {
        let id = tile_at(10.0, 50.0, 14);

        let bytes = build(
            vec![node(
                1,
                10.0,
                50.0,
                &[
                    ("amenity", "restaurant"),
                    ("cuisine", "thai"),
                    ("name", "T"),
                    ("wikipedia", "de:T"),
                ],
            )],
            Vec::new(),
            id,
        );

        let tile = decode(&bytes);
        let poi = layer(&tile, "poi");
        let feature = &poi.features[0];

        assert_eq!(
            tag_value(poi, feature, "cuisine").string_value.as_deref(),
            Some("thai")
        );
        assert_eq!(tag_value(poi, feature, "wikipedia").int_value, Some(1));
        assert_eq!(
            tag_value(poi, feature, "osm_type").string_value.as_deref(),
            Some("node")
        );
    }

    #[test]
    fn peak_zoom_scales_with_prominence() {
        let low = build(
            vec![node(1, 10.0, 50.0, &[("natural", "peak")])],
            Vec::new(),
            tile_at(10.0, 50.0, 10),
        );

        assert!(low.is_empty());

        let prominent = build(
            vec![node(
                1,
                10.0,
                50.0,
                &[("natural", "peak"), ("prominence", "4810"), ("ele", "4810")],
            )],
            Vec::new(),
            tile_at(10.0, 50.0, 10),
        );

        let tile = decode(&prominent);
        let poi = layer(&tile, "poi");

        assert_eq!(
            tag_value(poi, &poi.features[0], "ele").double_value,
            Some(4810.0)
        );
    }

    #[test]
    fn admin_relation_writes_member_ways() {
        let id = tile_at(10.0, 50.0, 8);
        let bbox = crate::mercator::tile_box(id);
        let lat = (bbox.min_y + bbox.max_y) / 2.0;

        let inside = vec![
            (bbox.min_x + bbox.width() * 0.2, lat),
            (bbox.min_x + bbox.width() * 0.8, lat),
        ];
        let outside = vec![(40.0, 10.0), (41.0, 10.0)];

        let world = vec![
            way(1, inside, &[]),
            way(2, outside, &[]),
            relation(
                3,
                &[(Kind::Way, 1, ""), (Kind::Way, 2, "")],
                &[
                    ("type", "boundary"),
                    ("boundary", "administrative"),
                    ("admin_level", "6"),
                    ("name", "Kreis"),
                ],
            ),
        ];

        let bytes = build(world, Vec::new(), id);
        let tile = decode(&bytes);
        let boundary = layer(&tile, "boundary");

        // only the member intersecting the tile is written
        assert_eq!(boundary.features.len(), 1);

        let feature = &boundary.features[0];

        assert_eq!(
            tag_value(boundary, feature, "name").string_value.as_deref(),
            Some("Kreis")
        );
        assert_eq!(
            tag_value(boundary, feature, "admin_level").double_value,
            Some(6.0)
        );
    }

    #[test]
    fn admin_level_zoom_table() {
        let make = |admin_level: &str, z| {
            let id = tile_at(10.0, 50.0, z);
            let bbox = crate::mercator::tile_box(id);
            let lat = (bbox.min_y + bbox.max_y) / 2.0;

            build(
                vec![way(
                    1,
                    vec![
                        (bbox.min_x + bbox.width() * 0.2, lat),
                        (bbox.min_x + bbox.width() * 0.8, lat),
                    ],
                    &[("boundary", "administrative"), ("admin_level", admin_level)],
                )],
                Vec::new(),
                id,
            )
        };

        assert!(!make("2", 2).is_empty());
        assert!(make("4", 3).is_empty());
        assert!(!make("4", 4).is_empty());
        assert!(make("8", 11).is_empty());
        assert!(!make("8", 12).is_empty());
    }

    #[test]
    fn protected_area_relation() {
        let id = tile_at(10.0, 50.0, 9);
        let sq = square_around(10.0, 50.0, 20_000.0);

        let world = vec![
            way(1, sq, &[]),
            relation(
                2,
                &[(Kind::Way, 1, "outer")],
                &[
                    ("type", "boundary"),
                    ("boundary", "national_park"),
                    ("name", "Park"),
                ],
            ),
        ];

        let bytes = build(world, Vec::new(), id);
        let tile = decode(&bytes);
        let landuse = layer(&tile, "landuse");

        assert_eq!(landuse.features.len(), 1);
        assert_eq!(
            tag_value(landuse, &landuse.features[0], "boundary")
                .string_value
                .as_deref(),
            Some("national_park")
        );

        // centroid POI alongside the polygon
        assert_eq!(layer(&tile, "poi").features.len(), 1);
    }

    #[test]
    fn transit_route_layer_selection() {
        let id = tile_at(10.0, 50.0, 9);
        let bbox = crate::mercator::tile_box(id);
        let lat = (bbox.min_y + bbox.max_y) / 2.0;
        let coords = vec![
            (bbox.min_x + bbox.width() * 0.2, lat),
            (bbox.min_x + bbox.width() * 0.8, lat),
        ];

        let world = vec![
            way(1, coords, &[]),
            relation(
                2,
                &[(Kind::Way, 1, "")],
                &[("type", "route"), ("route", "train"), ("name", "ICE")],
            ),
        ];

        let bytes = build(world, Vec::new(), id);
        let tile = decode(&bytes);
        let transit = layer(&tile, "transit");

        assert_eq!(transit.features.len(), 1);
        assert_eq!(transit.features[0].r#type, Some(GeomType::Linestring as i32));
        assert_eq!(
            tag_value(transit, &transit.features[0], "route")
                .string_value
                .as_deref(),
            Some("train")
        );
    }

    #[test]
    fn bad_coastline_ids_are_skipped() {
        let id = TileId::new(128, 128, 8);
        let bbox = crate::mercator::tile_box(id);
        let lat = (bbox.min_y + bbox.max_y) / 2.0;

        let world = vec![way(
            77,
            vec![(bbox.min_x - 0.05, lat), (bbox.max_x + 0.05, lat)],
            &[("natural", "coastline")],
        )];

        let mut cfg = SchemaConfig::default();

        cfg.bad_coastlines.insert(77);

        let bytes = build_with(world, Vec::new(), cfg, id);

        // without the coastline (and with a dry probe) the tile is empty
        assert!(bytes.is_empty());
    }

    #[test]
    fn island_area_becomes_place_point() {
        let id = tile_at(10.0, 50.0, 14);
        let sq = square_around(10.0, 50.0, 500.0);

        let bytes = build(
            vec![way(1, sq, &[("place", "island"), ("name", "Insel")])],
            Vec::new(),
            id,
        );

        let tile = decode(&bytes);
        let place = layer(&tile, "place");

        assert_eq!(place.features.len(), 1);
        assert_eq!(place.features[0].r#type, Some(GeomType::Point as i32));
        assert_eq!(
            tag_value(place, &place.features[0], "place")
                .string_value
                .as_deref(),
            Some("island")
        );
    }
}
