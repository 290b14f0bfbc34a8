//! SQLite-backed catalog ledger.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, ToSql};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::CatalogRepository;
use crate::error::CatalogError;
use crate::model::{
    AssetKind, AssetState, Catalog, CatalogAsset, CatalogDetail, CatalogListing, CatalogQuery,
    CatalogState, CatalogStats, CatalogUpdate, NewAsset, NewCatalog,
};

/// Upper bound on `limit` for one listing page.
pub const MAX_LIST_LIMIT: u32 = 500;

const CATALOG_COLUMNS: &str = "id, name, description, category, state, total_pages, file_size, \
     original_filename, version, tags, processing_metadata, created_by, created_at, updated_at";

const ASSET_COLUMNS: &str = "id, catalog_id, kind, filename, url, object_key, page_number, \
     size_bytes, mime_type, checksum, metadata, state, created_at";

const ASSET_ORDER: &str = "ORDER BY catalog_id, \
     CASE kind WHEN 'pdf_original' THEN 0 WHEN 'page' THEN 1 ELSE 2 END, page_number, id";

/// SQLite-backed catalog ledger.
///
/// One connection guarded by a mutex. A file-backed ledger reopens its
/// connection once when a call fails with a cannot-open or I/O error, then
/// retries that call before surfacing the failure.
pub struct SqliteLedger {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) the ledger database at `path`.
    pub fn new(path: &Path) -> Result<Self, CatalogError> {
        let conn = Self::open(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory ledger (useful for testing).
    pub fn in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    fn open(path: &Path) -> Result<Connection, CatalogError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::initialize_schema(&conn)?;
        Ok(conn)
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CatalogError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS catalogs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL,
                total_pages INTEGER NOT NULL DEFAULT 0,
                file_size INTEGER NOT NULL DEFAULT 0,
                original_filename TEXT NOT NULL,
                version TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '{}',
                processing_metadata TEXT NOT NULL DEFAULT '{}',
                created_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_catalogs_state ON catalogs(state);
            CREATE INDEX IF NOT EXISTS idx_catalogs_category ON catalogs(category);
            CREATE INDEX IF NOT EXISTS idx_catalogs_created_at ON catalogs(created_at DESC);

            CREATE TABLE IF NOT EXISTS catalog_assets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                catalog_id INTEGER NOT NULL REFERENCES catalogs(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                filename TEXT NOT NULL,
                url TEXT NOT NULL,
                object_key TEXT NOT NULL,
                page_number INTEGER,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                mime_type TEXT NOT NULL,
                checksum TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (catalog_id, kind, page_number)
            );

            CREATE INDEX IF NOT EXISTS idx_assets_catalog ON catalog_assets(catalog_id);
            CREATE INDEX IF NOT EXISTS idx_assets_object_key ON catalog_assets(object_key);
            "#,
        )?;
        Ok(())
    }

    /// Run `op` against the connection, reopening it once on connection loss.
    fn with_conn<T>(
        &self,
        op: impl Fn(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, CatalogError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        match op(&*conn) {
            Err(e) if is_connection_lost(&e) => {
                let Some(path) = &self.path else {
                    return Err(e.into());
                };
                warn!(path = %path.display(), error = %e, "ledger: connection lost, reopening");
                *conn = Self::open(path)?;
                op(&*conn).map_err(CatalogError::from)
            }
            other => other.map_err(CatalogError::from),
        }
    }

    fn build_where_clause(query: &CatalogQuery) -> (String, Vec<Box<dyn ToSql>>) {
        let mut conditions = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(category) = &query.category {
            conditions.push("category = ?");
            values.push(Box::new(category.clone()));
        }

        if let Some(state) = query.state {
            conditions.push("state = ?");
            values.push(Box::new(state.as_str()));
        }

        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            conditions.push(r"(name LIKE ? ESCAPE '\' OR description LIKE ? ESCAPE '\')");
            let pattern = format!("%{}%", escape_like(search));
            values.push(Box::new(pattern.clone()));
            values.push(Box::new(pattern));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, values)
    }
}

impl CatalogRepository for SqliteLedger {
    fn create_catalog(&self, new: &NewCatalog) -> Result<Catalog, CatalogError> {
        let tags = to_json(&new.tags)?;
        let now = now_ts();

        let catalog = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO catalogs (name, description, category, state, total_pages, file_size, \
                 original_filename, version, tags, processing_metadata, created_by, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?8, '{}', ?9, ?10, ?10)",
                params![
                    new.name,
                    new.description,
                    new.category,
                    CatalogState::Processing.as_str(),
                    new.file_size as i64,
                    new.original_filename,
                    new.version,
                    tags,
                    new.created_by,
                    now,
                ],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {CATALOG_COLUMNS} FROM catalogs WHERE id = ?1"),
                [id],
                row_to_catalog,
            )
        })?;

        debug!(catalog_id = catalog.id, name = %catalog.name, "ledger: catalog created");
        Ok(catalog)
    }

    fn get_catalog(&self, id: i64) -> Result<Option<Catalog>, CatalogError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {CATALOG_COLUMNS} FROM catalogs WHERE id = ?1"),
                [id],
                row_to_catalog,
            )
            .optional()
        })
    }

    fn update_catalog(&self, id: i64, update: &CatalogUpdate) -> Result<usize, CatalogError> {
        let mut sets = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(name) = &update.name {
            sets.push("name = ?");
            values.push(Box::new(name.clone()));
        }
        if let Some(description) = &update.description {
            sets.push("description = ?");
            values.push(Box::new(description.clone()));
        }
        if let Some(category) = &update.category {
            sets.push("category = ?");
            values.push(Box::new(category.clone()));
        }
        if let Some(state) = update.state {
            sets.push("state = ?");
            values.push(Box::new(state.as_str()));
        }
        if let Some(version) = &update.version {
            sets.push("version = ?");
            values.push(Box::new(version.clone()));
        }
        if let Some(tags) = &update.tags {
            sets.push("tags = ?");
            values.push(Box::new(to_json(tags)?));
        }

        if sets.is_empty() {
            return Ok(0);
        }

        sets.push("updated_at = ?");
        values.push(Box::new(now_ts()));
        values.push(Box::new(id));

        let sql = format!("UPDATE catalogs SET {} WHERE id = ?", sets.join(", "));
        self.with_conn(|conn| conn.execute(&sql, params_from_iter(values.iter())))
    }

    fn update_catalog_state(
        &self,
        id: i64,
        state: CatalogState,
        metadata_patch: Option<&serde_json::Value>,
    ) -> Result<usize, CatalogError> {
        let patch = metadata_patch.map(|p| p.to_string());
        let now = now_ts();
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE catalogs SET state = ?1, \
                 processing_metadata = CASE WHEN ?2 IS NULL THEN processing_metadata \
                     ELSE json_patch(processing_metadata, ?2) END, \
                 updated_at = ?3 WHERE id = ?4",
                params![state.as_str(), patch, now, id],
            )
        })
    }

    fn finalize_catalog(
        &self,
        id: i64,
        total_pages: u32,
        state: CatalogState,
        metadata_patch: &serde_json::Value,
    ) -> Result<usize, CatalogError> {
        let patch = metadata_patch.to_string();
        let now = now_ts();
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE catalogs SET total_pages = ?1, state = ?2, \
                 processing_metadata = json_patch(processing_metadata, ?3), updated_at = ?4 \
                 WHERE id = ?5",
                params![total_pages, state.as_str(), patch, now, id],
            )
        })
    }

    fn set_total_pages(&self, id: i64, total_pages: u32) -> Result<usize, CatalogError> {
        let now = now_ts();
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE catalogs SET total_pages = ?1, updated_at = ?2 WHERE id = ?3",
                params![total_pages, now, id],
            )
        })
    }

    fn touch_catalog(&self, id: i64) -> Result<usize, CatalogError> {
        let now = now_ts();
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE catalogs SET updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )
        })
    }

    fn delete_catalog(&self, id: i64) -> Result<usize, CatalogError> {
        let removed =
            self.with_conn(|conn| conn.execute("DELETE FROM catalogs WHERE id = ?1", [id]))?;
        debug!(catalog_id = id, removed, "ledger: catalog deleted");
        Ok(removed)
    }

    fn list_catalogs(&self, query: &CatalogQuery) -> Result<CatalogListing, CatalogError> {
        let (where_clause, values) = Self::build_where_clause(query);
        let limit = query.limit.clamp(1, MAX_LIST_LIMIT);
        let offset = query.offset;

        let count_sql = format!("SELECT COUNT(*) FROM catalogs {where_clause}");
        let select_sql = format!(
            "SELECT {CATALOG_COLUMNS} FROM catalogs {where_clause} \
             ORDER BY created_at DESC, id DESC LIMIT {limit} OFFSET {offset}"
        );

        let (total, catalogs) = self.with_conn(|conn| {
            let total: i64 =
                conn.query_row(&count_sql, params_from_iter(values.iter()), |r| r.get(0))?;
            let mut stmt = conn.prepare(&select_sql)?;
            let catalogs = stmt
                .query_map(params_from_iter(values.iter()), row_to_catalog)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok((total, catalogs))
        })?;

        Ok(CatalogListing {
            catalogs,
            total: total.max(0) as u64,
            limit,
            offset,
        })
    }

    fn list_stale_catalogs(
        &self,
        state: CatalogState,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Catalog>, CatalogError> {
        let cutoff = ts(&updated_before);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CATALOG_COLUMNS} FROM catalogs WHERE state = ?1 AND updated_at < ?2 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![state.as_str(), cutoff], row_to_catalog)?;
            rows.collect()
        })
    }

    fn complete_catalog(&self, id: i64) -> Result<Option<CatalogDetail>, CatalogError> {
        let found = self.with_conn(|conn| {
            let catalog = conn
                .query_row(
                    &format!("SELECT {CATALOG_COLUMNS} FROM catalogs WHERE id = ?1"),
                    [id],
                    row_to_catalog,
                )
                .optional()?;
            match catalog {
                Some(catalog) => {
                    let assets = query_assets(conn, "WHERE catalog_id = ?1", [id])?;
                    Ok(Some((catalog, assets)))
                }
                None => Ok(None),
            }
        })?;

        Ok(found.map(|(catalog, assets)| {
            let mut original = None;
            let mut thumbnail = None;
            let mut pages = Vec::new();
            for asset in assets {
                match asset.kind {
                    AssetKind::PdfOriginal if original.is_none() => original = Some(asset),
                    AssetKind::Thumbnail if thumbnail.is_none() => thumbnail = Some(asset),
                    AssetKind::Page => pages.push(asset),
                    _ => {}
                }
            }
            CatalogDetail {
                catalog,
                original,
                thumbnail,
                pages,
            }
        }))
    }

    fn stats(&self) -> Result<CatalogStats, CatalogError> {
        self.with_conn(|conn| {
            let mut stats = conn.query_row(
                "SELECT COUNT(*), \
                   COALESCE(SUM(state = 'processing'), 0), \
                   COALESCE(SUM(state = 'active'), 0), \
                   COALESCE(SUM(state = 'error'), 0), \
                   COALESCE(SUM(state = 'inactive'), 0), \
                   COALESCE(SUM(total_pages), 0), \
                   COALESCE(SUM(file_size), 0) \
                 FROM catalogs",
                [],
                |row| {
                    Ok(CatalogStats {
                        total_catalogs: row.get::<_, i64>(0)? as u64,
                        processing: row.get::<_, i64>(1)? as u64,
                        active: row.get::<_, i64>(2)? as u64,
                        error: row.get::<_, i64>(3)? as u64,
                        inactive: row.get::<_, i64>(4)? as u64,
                        total_pages: row.get::<_, i64>(5)? as u64,
                        total_original_bytes: row.get::<_, i64>(6)? as u64,
                        total_asset_bytes: 0,
                    })
                },
            )?;
            let asset_bytes: i64 = conn.query_row(
                "SELECT COALESCE(SUM(size_bytes), 0) FROM catalog_assets",
                [],
                |r| r.get(0),
            )?;
            stats.total_asset_bytes = asset_bytes as u64;
            Ok(stats)
        })
    }

    fn create_asset(&self, new: &NewAsset) -> Result<CatalogAsset, CatalogError> {
        let metadata = new.metadata.to_string();
        let now = now_ts();

        let asset = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO catalog_assets (catalog_id, kind, filename, url, object_key, page_number, \
                 size_bytes, mime_type, checksum, metadata, state, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    new.catalog_id,
                    new.kind.as_str(),
                    new.filename,
                    new.url,
                    new.object_key,
                    new.page_number,
                    new.size_bytes as i64,
                    new.mime_type,
                    new.checksum,
                    metadata,
                    AssetState::Available.as_str(),
                    now,
                ],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {ASSET_COLUMNS} FROM catalog_assets WHERE id = ?1"),
                [id],
                row_to_asset,
            )
        })?;

        debug!(
            catalog_id = asset.catalog_id,
            asset_id = asset.id,
            kind = %asset.kind,
            key = %asset.object_key,
            "ledger: asset registered"
        );
        Ok(asset)
    }

    fn get_asset(&self, id: i64) -> Result<Option<CatalogAsset>, CatalogError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {ASSET_COLUMNS} FROM catalog_assets WHERE id = ?1"),
                [id],
                row_to_asset,
            )
            .optional()
        })
    }

    fn list_assets(&self, catalog_id: i64) -> Result<Vec<CatalogAsset>, CatalogError> {
        self.with_conn(|conn| query_assets(conn, "WHERE catalog_id = ?1", [catalog_id]))
    }

    fn list_pages(&self, catalog_id: i64) -> Result<Vec<CatalogAsset>, CatalogError> {
        self.with_conn(|conn| {
            query_assets(
                conn,
                "WHERE catalog_id = ?1 AND kind = ?2",
                params![catalog_id, AssetKind::Page.as_str()],
            )
        })
    }

    fn list_all_assets(&self) -> Result<Vec<CatalogAsset>, CatalogError> {
        self.with_conn(|conn| query_assets(conn, "", []))
    }

    fn delete_asset(&self, id: i64) -> Result<usize, CatalogError> {
        self.with_conn(|conn| conn.execute("DELETE FROM catalog_assets WHERE id = ?1", [id]))
    }

    fn count_assets(
        &self,
        catalog_id: i64,
        kind: AssetKind,
        state: AssetState,
    ) -> Result<u64, CatalogError> {
        let count: i64 = self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM catalog_assets WHERE catalog_id = ?1 AND kind = ?2 AND state = ?3",
                params![catalog_id, kind.as_str(), state.as_str()],
                |r| r.get(0),
            )
        })?;
        Ok(count.max(0) as u64)
    }

    fn ping(&self) -> Result<(), CatalogError> {
        self.with_conn(|conn| conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0)))?;
        Ok(())
    }
}

// ── Row mapping ──────────────────────────────────────────────────────────

fn query_assets<P: rusqlite::Params>(
    conn: &Connection,
    clause: &str,
    params: P,
) -> rusqlite::Result<Vec<CatalogAsset>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ASSET_COLUMNS} FROM catalog_assets {clause} {ASSET_ORDER}"
    ))?;
    let rows = stmt.query_map(params, row_to_asset)?;
    rows.collect()
}

fn row_to_catalog(row: &Row) -> rusqlite::Result<Catalog> {
    let state: String = row.get(4)?;
    let tags: String = row.get(9)?;
    let metadata: String = row.get(10)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    Ok(Catalog {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        state: parse_enum(4, &state)?,
        total_pages: row.get(5)?,
        file_size: row.get::<_, i64>(6)?.max(0) as u64,
        original_filename: row.get(7)?,
        version: row.get(8)?,
        tags: parse_json(9, &tags)?,
        processing_metadata: parse_json(10, &metadata)?,
        created_by: row.get(11)?,
        created_at: parse_ts(12, &created_at)?,
        updated_at: parse_ts(13, &updated_at)?,
    })
}

fn row_to_asset(row: &Row) -> rusqlite::Result<CatalogAsset> {
    let kind: String = row.get(2)?;
    let metadata: String = row.get(10)?;
    let state: String = row.get(11)?;
    let created_at: String = row.get(12)?;

    Ok(CatalogAsset {
        id: row.get(0)?,
        catalog_id: row.get(1)?,
        kind: parse_enum(2, &kind)?,
        filename: row.get(3)?,
        url: row.get(4)?,
        object_key: row.get(5)?,
        page_number: row.get(6)?,
        size_bytes: row.get::<_, i64>(7)?.max(0) as u64,
        mime_type: row.get(8)?,
        checksum: row.get(9)?,
        metadata: parse_json(10, &metadata)?,
        state: parse_enum(11, &state)?,
        created_at: parse_ts(12, &created_at)?,
    })
}

fn parse_enum<T: FromStr<Err = CatalogError>>(idx: usize, s: &str) -> rusqlite::Result<T> {
    s.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json<T: DeserializeOwned>(idx: usize, s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, CatalogError> {
    serde_json::to_string(value).map_err(|e| CatalogError::Internal(e.to_string()))
}

/// Fixed-width timestamps so text ordering matches time ordering.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now_ts() -> String {
    ts(&Utc::now())
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn is_connection_lost(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if matches!(f.code, ErrorCode::CannotOpen | ErrorCode::SystemIoFailure)
    )
}
