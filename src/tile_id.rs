use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Identifier of a map tile in the web-Mercator pyramid.
///
/// `z` is the data zoom and `s` the styling zoom; `s > z` means the tile is
/// over-zoomed (a higher-zoom view reusing lower-zoom data).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TileId {
    pub x: i32,
    pub y: i32,
    pub z: i8,
    pub s: i8,
}

impl TileId {
    pub const fn new(x: i32, y: i32, z: i8) -> Self {
        Self { x, y, z, s: z }
    }

    pub const fn with_styling(x: i32, y: i32, z: i8, s: i8) -> Self {
        Self { x, y, z, s }
    }

    /// Row index used by the mbtiles store.
    pub const fn y_tms(&self) -> i32 {
        (1 << self.z) - 1 - self.y
    }

    pub const fn is_valid(&self) -> bool {
        let max = 1 << self.z;

        self.z >= 0 && self.x >= 0 && self.x < max && self.y >= 0 && self.y < max
    }

    pub const fn is_valid_at(&self, max_zoom: i8) -> bool {
        self.is_valid() && self.z <= max_zoom
    }

    /// Clamp the data zoom to `max_zoom`, keeping the styling zoom.
    pub const fn with_max_source_zoom(self, max_zoom: i8) -> Self {
        if self.z <= max_zoom {
            return self;
        }

        let over = (self.z - max_zoom) as i32;

        Self::with_styling(self.x >> over, self.y >> over, max_zoom, self.s)
    }

    pub const fn parent(self) -> Self {
        if self.s > self.z {
            // over-zoomed; data coordinates stay put
            return Self::with_styling(self.x, self.y, self.z, self.s - 1);
        }

        Self::with_styling(self.x >> 1, self.y >> 1, self.z - 1, self.s - 1)
    }

    /// One of the four children (`index` in `0..4`), degrading to an
    /// over-zoomed id when the child would exceed `max_zoom`.
    pub fn child(self, index: u32, max_zoom: i8) -> Self {
        assert!(index < 4);

        let i = (index / 2) as i32;
        let j = (index % 2) as i32;

        Self::with_styling((self.x << 1) + i, (self.y << 1) + j, self.z + 1, self.s + 1)
            .with_max_source_zoom(max_zoom)
    }
}

// Ordered by styling zoom (highest first), then data zoom, then x, then y.
impl Ord for TileId {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .s
            .cmp(&self.s)
            .then(other.z.cmp(&self.z))
            .then(self.x.cmp(&other.x))
            .then(self.y.cmp(&other.y))
    }
}

impl PartialOrd for TileId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for TileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)?;

        if self.s != self.z {
            write!(f, "(s{})", self.s)?;
        }

        Ok(())
    }
}

impl FromStr for TileId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<_> = s.split('/').collect();

        let [z, x, y] = parts[..] else {
            return Err("expected z/x/y".to_string());
        };

        let id = TileId::new(
            x.parse().map_err(|_| "invalid x")?,
            y.parse().map_err(|_| "invalid y")?,
            z.parse().map_err(|_| "invalid z")?,
        );

        if !id.is_valid() {
            return Err(format!("tile id {s} is out of range"));
        }

        Ok(id)
    }
}
