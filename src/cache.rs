//! Tile blob store on SQLite, mbtiles layout.
//!
//! Reads go through a thread-local read-only connection per calling
//! thread; all writes are serialized onto one persister thread that owns
//! the only read-write connection. WAL lets readers run concurrently with
//! the writer.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Sender};
use std::thread::JoinHandle;

use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{error, info};

use crate::error::Error;
use crate::tile_id::TileId;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS metadata (
  name TEXT NOT NULL,
  value TEXT NOT NULL,
  UNIQUE(name)
);
CREATE TABLE IF NOT EXISTS tiles (
  zoom_level INTEGER,
  tile_column INTEGER,
  tile_row INTEGER,
  tile_data BLOB,
  created_at INTEGER DEFAULT (CAST(strftime('%s') AS INTEGER))
);
CREATE UNIQUE INDEX IF NOT EXISTS tile_index ON tiles (zoom_level, tile_column, tile_row);
";

const GET_TILE_SQL: &str =
    "SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3";

const PUT_TILE_SQL: &str =
    "REPLACE INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)";

thread_local! {
    static READ_CONN: RefCell<Option<Connection>> = const { RefCell::new(None) };
}

/// Read side of the tile store; each calling thread lazily opens its own
/// read-only connection.
#[derive(Clone)]
pub struct TileCache {
    path: PathBuf,
}

impl TileCache {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn read_tile(&self, id: TileId) -> Result<Option<Vec<u8>>, Error> {
        READ_CONN.with(|cell| {
            let mut conn = cell.borrow_mut();

            if conn.is_none() {
                *conn = Some(Connection::open_with_flags(
                    &self.path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?);
            }

            let conn = conn.as_ref().unwrap();
            let mut stmt = conn.prepare_cached(GET_TILE_SQL)?;

            Ok(stmt
                .query_row((id.z, id.x, id.y_tms()), |row| row.get::<_, Vec<u8>>(0))
                .optional()?)
        })
    }
}

pub struct PersistJob {
    pub id: TileId,
    pub bytes: std::sync::Arc<Vec<u8>>,
    /// Runs after the write attempt, success or not.
    pub on_done: Option<Box<dyn FnOnce() + Send>>,
}

/// Single-writer persistence worker. Owns the only read-write connection;
/// dropping the handle flushes the queue and joins the thread.
pub struct Persister {
    tx: Option<Sender<PersistJob>>,
    handle: Option<JoinHandle<()>>,
}

impl Persister {
    /// Open (creating if needed) the tile database on a dedicated thread
    /// and start draining write jobs. Fails if the database cannot be
    /// opened or migrated.
    pub fn spawn(path: &Path, max_zoom: i8) -> Result<Self, Error> {
        let (tx, rx) = channel::<PersistJob>();
        let (ready_tx, ready_rx) = channel::<Result<(), rusqlite::Error>>();
        let path = path.to_path_buf();

        let handle = std::thread::spawn(move || {
            let conn = match open_rw(&path, max_zoom) {
                Ok(conn) => {
                    let _ = ready_tx.send(Ok(()));
                    conn
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            while let Ok(job) = rx.recv() {
                let result = conn.execute(
                    PUT_TILE_SQL,
                    (job.id.z, job.id.x, job.id.y_tms(), job.bytes.as_slice()),
                );

                if let Err(e) = result {
                    error!("error adding tile {} to db: {e}", job.id);
                }

                if let Some(on_done) = job.on_done {
                    on_done();
                }
            }
        });

        ready_rx.recv().map_err(|_| Error::WorkerGone)??;

        info!("tile cache ready");

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn enqueue(&self, job: PersistJob) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(job);
        }
    }
}

impl Drop for Persister {
    fn drop(&mut self) {
        drop(self.tx.take());

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn open_rw(path: &Path, max_zoom: i8) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;

    // WAL allows reads concurrent with the single writer
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.execute_batch(SCHEMA_SQL)?;

    let mut meta = conn.prepare("INSERT OR IGNORE INTO metadata VALUES (?1, ?2)")?;

    for (name, value) in [
        ("name", "vectile".to_string()),
        ("format", "pbf".to_string()),
        ("minzoom", "0".to_string()),
        ("maxzoom", max_zoom.to_string()),
    ] {
        meta.execute((name, value))?;
    }

    drop(meta);

    Ok(conn)
}
