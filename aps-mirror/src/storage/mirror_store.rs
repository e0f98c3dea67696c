use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool, migrate::Migrator};
use thiserror::Error;
use time::OffsetDateTime;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const CONTENT_COLUMNS: &str =
    "id, project_id, parent_id, name, kind, data_type, translated, urn, version_id, updated_at";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("invalid token kind: {0}")]
    InvalidTokenKind(String),
    #[error("invalid content kind: {0}")]
    InvalidContentKind(String),
    #[error("row not found after upsert: {0}")]
    MissingRow(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenKind {
    AccessToken,
    RefreshToken,
    ClientId,
    ClientSecret,
}

impl TokenKind {
    pub const ALL: [TokenKind; 4] = [
        TokenKind::AccessToken,
        TokenKind::RefreshToken,
        TokenKind::ClientId,
        TokenKind::ClientSecret,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::AccessToken => "access-token",
            TokenKind::RefreshToken => "refresh-token",
            TokenKind::ClientId => "client-id",
            TokenKind::ClientSecret => "client-secret",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "access-token" => Ok(TokenKind::AccessToken),
            "refresh-token" => Ok(TokenKind::RefreshToken),
            "client-id" => Ok(TokenKind::ClientId),
            "client-secret" => Ok(TokenKind::ClientSecret),
            other => Err(StoreError::InvalidTokenKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub id: i64,
    pub kind: TokenKind,
    pub value: String,
    pub expires_in: Option<i64>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubRecord {
    pub id: String,
    pub name: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct ProjectInput {
    pub id: String,
    pub name: String,
    pub hub_id: String,
    pub hub_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub hub_id: String,
    pub hub_name: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Folder,
    Item,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Folder => "folder",
            ContentKind::Item => "item",
        }
    }

    fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "folder" => Ok(ContentKind::Folder),
            "item" => Ok(ContentKind::Item),
            other => Err(StoreError::InvalidContentKind(other.to_string())),
        }
    }
}

/// Derivative state of an item as last seen on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewerFields {
    pub version_id: String,
    pub urn: String,
    pub data_type: String,
    pub translated: bool,
}

#[derive(Debug, Clone)]
pub struct ContentInput {
    pub id: String,
    pub project_id: String,
    pub parent_id: String,
    pub name: String,
    pub kind: ContentKind,
    pub viewer: Option<ViewerFields>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentRecord {
    pub id: String,
    pub project_id: String,
    pub parent_id: String,
    pub name: String,
    pub kind: ContentKind,
    pub data_type: Option<String>,
    pub translated: Option<bool>,
    pub urn: Option<String>,
    pub version_id: Option<String>,
    pub updated_at: i64,
}

pub struct MirrorStore {
    pool: SqlitePool,
}

impl MirrorStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, StoreError> {
        let db_path = default_db_path()?;
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn get_token(&self, kind: TokenKind) -> Result<Option<TokenRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, kind, value, expires_in, updated_at FROM tokens WHERE kind = ?1",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| token_from_row(&row)).transpose()
    }

    pub async fn upsert_token(
        &self,
        kind: TokenKind,
        value: &str,
        expires_in: Option<i64>,
    ) -> Result<TokenRecord, StoreError> {
        self.upsert_token_at(kind, value, expires_in, now_unix())
            .await
    }

    /// Writes a token row with an explicit `updated_at`, which is the base of
    /// the expiry estimate for the access token.
    pub async fn upsert_token_at(
        &self,
        kind: TokenKind,
        value: &str,
        expires_in: Option<i64>,
        updated_at: i64,
    ) -> Result<TokenRecord, StoreError> {
        sqlx::query(
            "INSERT INTO tokens (kind, value, expires_in, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(kind) DO UPDATE SET
                value = excluded.value,
                expires_in = excluded.expires_in,
                updated_at = excluded.updated_at",
        )
        .bind(kind.as_str())
        .bind(value)
        .bind(expires_in)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;

        self.get_token(kind)
            .await?
            .ok_or_else(|| StoreError::MissingRow(kind.to_string()))
    }

    pub async fn list_tokens(&self) -> Result<Vec<TokenRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, kind, value, expires_in, updated_at FROM tokens ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(token_from_row).collect()
    }

    pub async fn delete_token(&self, kind: TokenKind) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tokens WHERE kind = ?1")
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Upserts a hub. An unchanged row keeps its `updated_at`.
    pub async fn upsert_hub(&self, id: &str, name: &str) -> Result<HubRecord, StoreError> {
        sqlx::query(
            "INSERT INTO hubs (id, name, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                updated_at = excluded.updated_at
             WHERE hubs.name IS NOT excluded.name",
        )
        .bind(id)
        .bind(name)
        .bind(now_unix())
        .execute(&self.pool)
        .await?;

        self.get_hub(id)
            .await?
            .ok_or_else(|| StoreError::MissingRow(id.to_string()))
    }

    pub async fn get_hub(&self, id: &str) -> Result<Option<HubRecord>, StoreError> {
        let row = sqlx::query("SELECT id, name, updated_at FROM hubs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| hub_from_row(&row)).transpose()
    }

    pub async fn list_hubs(&self) -> Result<Vec<HubRecord>, StoreError> {
        let rows = sqlx::query("SELECT id, name, updated_at FROM hubs ORDER BY rowid ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(hub_from_row).collect()
    }

    pub async fn upsert_project(&self, project: &ProjectInput) -> Result<ProjectRecord, StoreError> {
        sqlx::query(
            "INSERT INTO projects (id, name, hub_id, hub_name, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                hub_id = excluded.hub_id,
                hub_name = excluded.hub_name,
                updated_at = excluded.updated_at
             WHERE projects.name IS NOT excluded.name
                OR projects.hub_id IS NOT excluded.hub_id
                OR projects.hub_name IS NOT excluded.hub_name",
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.hub_id)
        .bind(&project.hub_name)
        .bind(now_unix())
        .execute(&self.pool)
        .await?;

        self.get_project(&project.id)
            .await?
            .ok_or_else(|| StoreError::MissingRow(project.id.clone()))
    }

    pub async fn get_project(&self, id: &str) -> Result<Option<ProjectRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, hub_id, hub_name, updated_at FROM projects WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| project_from_row(&row)).transpose()
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, hub_id, hub_name, updated_at FROM projects ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(project_from_row).collect()
    }

    /// Upserts a folder or item keyed by its remote id.
    ///
    /// Missing viewer fields do not clear what an earlier pass stored, so a
    /// failed per-item lookup keeps the last known derivative state.
    pub async fn upsert_content(&self, content: &ContentInput) -> Result<ContentRecord, StoreError> {
        let viewer = content.viewer.as_ref();
        sqlx::query(
            "INSERT INTO contents (
                id, project_id, parent_id, name, kind,
                data_type, translated, urn, version_id, updated_at
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                project_id = excluded.project_id,
                parent_id = excluded.parent_id,
                name = excluded.name,
                kind = excluded.kind,
                data_type = COALESCE(excluded.data_type, contents.data_type),
                translated = COALESCE(excluded.translated, contents.translated),
                urn = COALESCE(excluded.urn, contents.urn),
                version_id = COALESCE(excluded.version_id, contents.version_id),
                updated_at = excluded.updated_at
             WHERE contents.project_id IS NOT excluded.project_id
                OR contents.parent_id IS NOT excluded.parent_id
                OR contents.name IS NOT excluded.name
                OR contents.kind IS NOT excluded.kind
                OR contents.data_type IS NOT COALESCE(excluded.data_type, contents.data_type)
                OR contents.translated IS NOT COALESCE(excluded.translated, contents.translated)
                OR contents.urn IS NOT COALESCE(excluded.urn, contents.urn)
                OR contents.version_id IS NOT COALESCE(excluded.version_id, contents.version_id)",
        )
        .bind(&content.id)
        .bind(&content.project_id)
        .bind(&content.parent_id)
        .bind(&content.name)
        .bind(content.kind.as_str())
        .bind(viewer.map(|v| v.data_type.as_str()))
        .bind(viewer.map(|v| if v.translated { 1i64 } else { 0 }))
        .bind(viewer.map(|v| v.urn.as_str()))
        .bind(viewer.map(|v| v.version_id.as_str()))
        .bind(now_unix())
        .execute(&self.pool)
        .await?;

        self.get_content(&content.id)
            .await?
            .ok_or_else(|| StoreError::MissingRow(content.id.clone()))
    }

    pub async fn update_viewer_info(
        &self,
        id: &str,
        viewer: &ViewerFields,
    ) -> Result<Option<ContentRecord>, StoreError> {
        let result = sqlx::query(
            "UPDATE contents SET
                data_type = ?1,
                translated = ?2,
                urn = ?3,
                version_id = ?4,
                updated_at = ?5
             WHERE id = ?6",
        )
        .bind(&viewer.data_type)
        .bind(if viewer.translated { 1i64 } else { 0 })
        .bind(&viewer.urn)
        .bind(&viewer.version_id)
        .bind(now_unix())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_content(id).await
    }

    pub async fn get_content(&self, id: &str) -> Result<Option<ContentRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| content_from_row(&row)).transpose()
    }

    pub async fn get_content_by_urn(&self, urn: &str) -> Result<Option<ContentRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents WHERE urn = ?1 ORDER BY rowid ASC LIMIT 1"
        ))
        .bind(urn)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| content_from_row(&row)).transpose()
    }

    pub async fn list_contents(&self) -> Result<Vec<ContentRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents ORDER BY rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(content_from_row).collect()
    }

    pub async fn list_contents_by_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<ContentRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents WHERE project_id = ?1 ORDER BY rowid ASC"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(content_from_row).collect()
    }

    /// Removes every hub and project row. Returns `(hubs, projects)` deleted.
    pub async fn delete_hubs_and_projects(&self) -> Result<(u64, u64), StoreError> {
        let mut tx = self.pool.begin().await?;
        let projects = sqlx::query("DELETE FROM projects")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let hubs = sqlx::query("DELETE FROM hubs")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok((hubs, projects))
    }

    pub async fn delete_contents(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM contents")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_contents_by_project(&self, project_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM contents WHERE project_id = ?1")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_hubs(&self) -> Result<i64, StoreError> {
        self.count("hubs").await
    }

    pub async fn count_projects(&self) -> Result<i64, StoreError> {
        self.count("projects").await
    }

    pub async fn count_contents(&self) -> Result<i64, StoreError> {
        self.count("contents").await
    }

    async fn count(&self, table: &'static str) -> Result<i64, StoreError> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn default_db_path() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("aps-mirror");
    path.push("mirror.db");
    Ok(path)
}

fn token_from_row(row: &SqliteRow) -> Result<TokenRecord, StoreError> {
    let kind: String = row.try_get("kind")?;
    Ok(TokenRecord {
        id: row.try_get("id")?,
        kind: TokenKind::parse(&kind)?,
        value: row.try_get("value")?,
        expires_in: row.try_get("expires_in")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn hub_from_row(row: &SqliteRow) -> Result<HubRecord, StoreError> {
    Ok(HubRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn project_from_row(row: &SqliteRow) -> Result<ProjectRecord, StoreError> {
    Ok(ProjectRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        hub_id: row.try_get("hub_id")?,
        hub_name: row.try_get("hub_name")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn content_from_row(row: &SqliteRow) -> Result<ContentRecord, StoreError> {
    let kind: String = row.try_get("kind")?;
    let translated: Option<i64> = row.try_get("translated")?;
    Ok(ContentRecord {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        parent_id: row.try_get("parent_id")?,
        name: row.try_get("name")?,
        kind: ContentKind::parse(&kind)?,
        data_type: row.try_get("data_type")?,
        translated: translated.map(|v| v != 0),
        urn: row.try_get("urn")?,
        version_id: row.try_get("version_id")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
