use std::path::PathBuf;

use clap::Parser;

use crate::tile_id::TileId;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Options {
    /// World feature snapshot
    pub world: PathBuf,

    /// Ocean polygon snapshot (decides whether empty tiles are ocean or land)
    pub ocean: PathBuf,

    /// Sqlite file to store generated tiles
    #[arg(long, default_value = "planet.mbtiles")]
    pub db: PathBuf,

    /// TCP port to listen on
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Number of tile builder threads; default is CPU cores - 1
    #[arg(long)]
    pub threads: Option<usize>,

    /// Maximum tile zoom level
    #[arg(long, default_value_t = 14)]
    pub maxz: i8,

    /// Key required by the X-Admin-Key header to force tile rebuilds
    #[arg(long)]
    pub admin_key: Option<String>,

    /// Append log output to a file instead of stderr
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Build tile z/x/y and all children to maxz, then exit (no server)
    #[arg(long, value_name = "Z/X/Y")]
    pub build: Option<TileId>,
}

impl Options {
    pub fn build_threads(&self) -> usize {
        self.threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(2)
                    .max(2)
                    - 1
            })
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_build_tile() {
        let options =
            Options::parse_from(["vectile", "--build", "5/0/0", "world.json", "ocean.json"]);

        assert_eq!(options.build, Some(TileId::new(0, 0, 5)));
        assert_eq!(options.maxz, 14);
        assert_eq!(options.port, 8080);
    }

    #[test]
    fn rejects_bad_build_tile() {
        assert!(
            Options::try_parse_from(["vectile", "--build", "nope", "world.json", "ocean.json"])
                .is_err()
        );
    }
}
