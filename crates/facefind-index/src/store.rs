//! SQLite cache of face representations per gallery image.

use chrono::{DateTime, Utc};
use facefind_core::{BoundingBox, Embedding, FaceRepresentation, GalleryFace};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS images (
        path          TEXT PRIMARY KEY,
        sha256        TEXT NOT NULL,
        size          INTEGER NOT NULL,
        modified_ns   INTEGER NOT NULL,
        model_version TEXT NOT NULL,
        indexed_at    TEXT NOT NULL,
        face_count    INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS faces (
        image_path  TEXT NOT NULL REFERENCES images(path) ON DELETE CASCADE,
        face_index  INTEGER NOT NULL,
        x           REAL NOT NULL,
        y           REAL NOT NULL,
        width       REAL NOT NULL,
        height      REAL NOT NULL,
        confidence  REAL NOT NULL,
        embedding   BLOB NOT NULL,
        PRIMARY KEY (image_path, face_index)
    );
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("could not create index directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt row for {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

/// Cached metadata for one gallery image.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedImage {
    pub path: PathBuf,
    pub sha256: String,
    pub size: u64,
    pub modified_ns: i64,
    pub model_version: String,
    pub indexed_at: DateTime<Utc>,
    pub face_count: usize,
}

pub struct IndexStore {
    conn: Connection,
}

impl IndexStore {
    /// Open (or create) the index database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened index database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// All cached images located under `root`.
    pub fn images_under(&self, root: &Path) -> Result<Vec<IndexedImage>, StoreError> {
        let mut stmt = self.conn.prepare(&format!("{IMAGE_COLUMNS} ORDER BY path"))?;
        let rows = stmt.query_map([], raw_image_row)?;

        let mut images = Vec::new();
        for row in rows {
            let raw = row?;
            if Path::new(&raw.0).starts_with(root) {
                images.push(image_from_raw(raw)?);
            }
        }
        Ok(images)
    }

    /// Look up one cached image.
    pub fn image(&self, path: &Path) -> Result<Option<IndexedImage>, StoreError> {
        self.conn
            .query_row(
                &format!("{IMAGE_COLUMNS} WHERE path = ?1"),
                [path_key(path)],
                raw_image_row,
            )
            .optional()?
            .map(image_from_raw)
            .transpose()
    }

    /// Insert or replace an image together with all of its faces.
    pub fn upsert_image(
        &mut self,
        image: &IndexedImage,
        faces: &[FaceRepresentation],
    ) -> Result<(), StoreError> {
        let key = path_key(&image.path);
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO images (path, sha256, size, modified_ns, model_version, indexed_at, face_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(path) DO UPDATE SET
                sha256 = excluded.sha256,
                size = excluded.size,
                modified_ns = excluded.modified_ns,
                model_version = excluded.model_version,
                indexed_at = excluded.indexed_at,
                face_count = excluded.face_count",
            params![
                key,
                image.sha256,
                image.size as i64,
                image.modified_ns,
                image.model_version,
                image.indexed_at.to_rfc3339(),
                faces.len() as i64,
            ],
        )?;
        tx.execute("DELETE FROM faces WHERE image_path = ?1", [&key])?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO faces (image_path, face_index, x, y, width, height, confidence, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (i, face) in faces.iter().enumerate() {
                let b = &face.bbox;
                insert.execute(params![
                    key,
                    i as i64,
                    b.x as f64,
                    b.y as f64,
                    b.width as f64,
                    b.height as f64,
                    b.confidence as f64,
                    embedding_to_blob(&face.embedding.values),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Record a new size/mtime for an image whose content hash is unchanged.
    pub fn touch_image(&self, path: &Path, size: u64, modified_ns: i64) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE images SET size = ?2, modified_ns = ?3 WHERE path = ?1",
            params![path_key(path), size as i64, modified_ns],
        )?;
        Ok(())
    }

    /// Remove an image and its faces. Returns whether it was cached.
    pub fn remove_image(&self, path: &Path) -> Result<bool, StoreError> {
        let n = self
            .conn
            .execute("DELETE FROM images WHERE path = ?1", [path_key(path)])?;
        Ok(n > 0)
    }

    /// Remove every image under `root`. Returns the number removed.
    pub fn remove_under(&self, root: &Path) -> Result<usize, StoreError> {
        let mut removed = 0;
        for image in self.images_under(root)? {
            if self.remove_image(&image.path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Every cached face belonging to an image under `root`.
    pub fn faces_under(&self, root: &Path) -> Result<Vec<GalleryFace>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT f.image_path, f.x, f.y, f.width, f.height, f.confidence, f.embedding, i.model_version
             FROM faces f JOIN images i ON i.path = f.image_path
             ORDER BY f.image_path, f.face_index",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                [
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                ],
                row.get::<_, Vec<u8>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut faces = Vec::new();
        for row in rows {
            let (path, [x, y, width, height, confidence], blob, model_version) = row?;
            if !Path::new(&path).starts_with(root) {
                continue;
            }
            let values = blob_to_embedding(&blob).ok_or_else(|| StoreError::Corrupt {
                path: path.clone(),
                reason: format!("embedding blob of {} bytes", blob.len()),
            })?;
            faces.push(GalleryFace {
                path: PathBuf::from(path),
                bbox: BoundingBox {
                    x: x as f32,
                    y: y as f32,
                    width: width as f32,
                    height: height as f32,
                    confidence: confidence as f32,
                    landmarks: None,
                },
                embedding: Embedding {
                    values,
                    model_version: Some(model_version),
                },
            });
        }
        Ok(faces)
    }
}

const IMAGE_COLUMNS: &str =
    "SELECT path, sha256, size, modified_ns, model_version, indexed_at, face_count FROM images";

type RawImageRow = (String, String, i64, i64, String, String, i64);

fn raw_image_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawImageRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn image_from_raw(raw: RawImageRow) -> Result<IndexedImage, StoreError> {
    let (path, sha256, size, modified_ns, model_version, indexed_at, face_count) = raw;
    let indexed_at = DateTime::parse_from_rfc3339(&indexed_at)
        .map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            reason: format!("indexed_at: {e}"),
        })?
        .with_timezone(&Utc);
    Ok(IndexedImage {
        path: PathBuf::from(path),
        sha256,
        size: size as u64,
        modified_ns,
        model_version,
        indexed_at,
        face_count: face_count as usize,
    })
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Serialize an embedding as little-endian `f32`s.
pub fn embedding_to_blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`embedding_to_blob`]. `None` when the length is not a multiple of 4.
pub fn blob_to_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
