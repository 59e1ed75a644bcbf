//! Database of record for the e-learning platform.
//!
//! Every entity (course, lesson, enrollment, user, chat thread, chat message)
//! is one row of a single `records` table. Resource payloads are computed
//! from it on cache misses only.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio_rusqlite::rusqlite::{self, OptionalExtension, Row};
use tokio_rusqlite::{Connection, params};
use versync_core::keys::normalize_search_term;
use versync_core::migrate::{self, Migration};
use versync_core::{Change, EntityKind, Error, Resource, ResourceSource};

const MIGRATIONS: &[Migration] = &[Migration::new(1, include_str!("../migrations/001_records.sql"))];

const COLUMNS: &str = "id, owner, parent, title, payload_json, updated_at";

const ALL_KINDS: [EntityKind; 6] = [
    EntityKind::Course,
    EntityKind::Lesson,
    EntityKind::Enrollment,
    EntityKind::User,
    EntityKind::ChatThread,
    EntityKind::ChatMessage,
];

/// A stored entity as returned in resource payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Record {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub title: String,
    pub payload: Value,
    pub updated_at: String,
}

/// Create, update or delete one record.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecordWrite {
    /// Kind of record: course, lesson, enrollment, user, chat_thread or chat_message.
    pub entity: EntityKind,

    /// Record id. Must not contain ':'.
    pub id: String,

    /// Owning user id. Required for enrollments, chat threads and chat messages.
    #[serde(default)]
    pub owner: Option<String>,

    /// Parent record id: the course of a lesson or enrollment, the thread of a message.
    #[serde(default)]
    pub parent: Option<String>,

    /// Display title. Kept unchanged when omitted on update.
    #[serde(default)]
    pub title: Option<String>,

    /// Arbitrary JSON attributes. Kept unchanged when omitted on update.
    #[serde(default)]
    pub payload: Option<Value>,

    /// Delete the record instead of writing it.
    #[serde(default)]
    pub delete: bool,
}

impl RecordWrite {
    pub fn upsert(entity: EntityKind, id: impl Into<String>) -> Self {
        Self { entity, id: id.into(), owner: None, parent: None, title: None, payload: None, delete: false }
    }

    pub fn delete(entity: EntityKind, id: impl Into<String>) -> Self {
        Self { delete: true, ..Self::upsert(entity, id) }
    }

    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn under(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    fn validate(&self) -> Result<(), Error> {
        check_id("id", &self.id)?;
        if let Some(owner) = &self.owner {
            check_id("owner", owner)?;
        }
        if let Some(parent) = &self.parent {
            check_id("parent", parent)?;
        }
        if let Some(payload) = &self.payload
            && !payload.is_object()
        {
            return Err(Error::InvalidInput("payload must be a JSON object".into()));
        }
        Ok(())
    }
}

fn check_id(field: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{field} cannot be empty")));
    }
    if value.contains(':') {
        return Err(Error::InvalidInput(format!("{field} cannot contain ':'")));
    }
    Ok(())
}

/// Which relations a kind of record must carry: (owner, parent).
fn required_relations(entity: EntityKind) -> (bool, bool) {
    match entity {
        EntityKind::Course | EntityKind::User => (false, false),
        EntityKind::Lesson => (false, true),
        EntityKind::Enrollment | EntityKind::ChatMessage => (true, true),
        EntityKind::ChatThread => (true, false),
    }
}

struct RecordRow {
    id: String,
    owner: Option<String>,
    parent: Option<String>,
    title: String,
    payload_json: String,
    updated_at: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            parent: row.get(2)?,
            title: row.get(3)?,
            payload_json: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<Record, Error> {
        Ok(Record {
            payload: serde_json::from_str(&self.payload_json)?,
            id: self.id,
            owner: self.owner,
            parent: self.parent,
            title: self.title,
            updated_at: self.updated_at,
        })
    }
}

/// Rows selected by a listing.
enum Filter {
    All,
    Owner(String),
    Parent(String),
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Catalog database handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread.
#[derive(Clone, Debug)]
pub struct Catalog {
    conn: Connection,
    page_size: u32,
}

impl Catalog {
    /// Open the catalog at the specified path, creating and migrating it as
    /// needed.
    pub async fn open(path: impl AsRef<Path>, page_size: u32) -> Result<Self, Error> {
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        migrate::run(&conn, MIGRATIONS).await?;
        Ok(Self { conn, page_size })
    }

    /// Open an in-memory catalog for testing.
    pub async fn open_in_memory(page_size: u32) -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        migrate::run(&conn, MIGRATIONS).await?;
        Ok(Self { conn, page_size })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Apply a write and describe what it changed.
    ///
    /// An update that moves a record to another owner or parent reports the
    /// old placement too, since views of both are now stale.
    pub async fn commit(&self, write: RecordWrite) -> Result<Vec<Change>, Error> {
        write.validate()?;
        let now = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<Vec<Change>, Error> {
                let tx = conn.transaction()?;
                let existing = tx
                    .query_row(
                        &format!("SELECT {COLUMNS} FROM records WHERE entity = ?1 AND id = ?2"),
                        params![write.entity.as_str(), write.id],
                        RecordRow::from_row,
                    )
                    .optional()?;

                let changes = if write.delete {
                    let Some(existing) = existing else {
                        return Err(Error::InvalidInput(format!("{} {} does not exist", write.entity, write.id)));
                    };
                    tx.execute(
                        "DELETE FROM records WHERE entity = ?1 AND id = ?2",
                        params![write.entity.as_str(), write.id],
                    )?;
                    vec![Change { entity: write.entity, id: write.id, owner: existing.owner, parent: existing.parent }]
                } else {
                    let owner = write.owner.or_else(|| existing.as_ref().and_then(|e| e.owner.clone()));
                    let parent = write.parent.or_else(|| existing.as_ref().and_then(|e| e.parent.clone()));

                    let (needs_owner, needs_parent) = required_relations(write.entity);
                    if needs_owner && owner.is_none() {
                        return Err(Error::InvalidInput(format!("{} requires an owner", write.entity)));
                    }
                    if needs_parent && parent.is_none() {
                        return Err(Error::InvalidInput(format!("{} requires a parent", write.entity)));
                    }

                    let title = write
                        .title
                        .or_else(|| existing.as_ref().map(|e| e.title.clone()))
                        .unwrap_or_default();
                    let search_title = normalize_search_term(&title);
                    let payload_json = match write.payload {
                        Some(payload) => serde_json::to_string(&payload)?,
                        None => existing
                            .as_ref()
                            .map(|e| e.payload_json.clone())
                            .unwrap_or_else(|| "{}".to_string()),
                    };

                    tx.execute(
                        "INSERT INTO records (entity, id, owner, parent, title, search_title, payload_json, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                         ON CONFLICT(entity, id) DO UPDATE SET
                            owner = excluded.owner,
                            parent = excluded.parent,
                            title = excluded.title,
                            search_title = excluded.search_title,
                            payload_json = excluded.payload_json,
                            updated_at = excluded.updated_at",
                        params![write.entity.as_str(), write.id, owner, parent, title, search_title, payload_json, now],
                    )?;

                    let current = Change { entity: write.entity, id: write.id, owner, parent };
                    let mut changes = vec![current.clone()];
                    if let Some(previous) = existing
                        && (previous.owner != current.owner || previous.parent != current.parent)
                    {
                        changes.push(Change { owner: previous.owner, parent: previous.parent, ..current });
                    }
                    changes
                };

                tx.commit()?;
                Ok(changes)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn get(&self, entity: EntityKind, id: &str) -> Result<Option<Record>, Error> {
        let id = id.to_string();
        let row = self
            .conn
            .call(move |conn| -> Result<Option<RecordRow>, Error> {
                Ok(conn
                    .query_row(
                        &format!("SELECT {COLUMNS} FROM records WHERE entity = ?1 AND id = ?2"),
                        params![entity.as_str(), id],
                        RecordRow::from_row,
                    )
                    .optional()?)
            })
            .await?;
        row.map(RecordRow::into_record).transpose()
    }

    async fn list(&self, entity: EntityKind, filter: Filter, order: &'static str) -> Result<Vec<Record>, Error> {
        let (clause, value) = match filter {
            Filter::All => ("", None),
            Filter::Owner(owner) => (" AND owner = ?2", Some(owner)),
            Filter::Parent(parent) => (" AND parent = ?2", Some(parent)),
        };
        let sql = format!("SELECT {COLUMNS} FROM records WHERE entity = ?1{clause} ORDER BY {order}");

        let rows = self
            .conn
            .call(move |conn| -> Result<Vec<RecordRow>, Error> {
                let mut stmt = conn.prepare(&sql)?;
                let rows = match value {
                    Some(value) => stmt.query_map(params![entity.as_str(), value], RecordRow::from_row)?,
                    None => stmt.query_map(params![entity.as_str()], RecordRow::from_row)?,
                };
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        rows.into_iter().map(RecordRow::into_record).collect()
    }

    async fn count_by(&self, entity: EntityKind, parent: &str) -> Result<u64, Error> {
        let parent = parent.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM records WHERE entity = ?1 AND parent = ?2",
                    params![entity.as_str(), parent],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    async fn dashboard_stats(&self) -> Result<Value, Error> {
        let counts = self
            .conn
            .call(|conn| -> Result<Vec<(String, i64)>, Error> {
                let mut stmt = conn.prepare("SELECT entity, COUNT(*) FROM records GROUP BY entity")?;
                let counts: Vec<(String, i64)> = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<_, _>>()?;
                Ok(counts)
            })
            .await?;

        let mut stats = Map::new();
        for kind in ALL_KINDS {
            let count = counts
                .iter()
                .find(|(entity, _)| entity == kind.as_str())
                .map_or(0, |(_, count)| *count);
            stats.insert(kind.as_str().to_string(), json!(count));
        }
        Ok(Value::Object(stats))
    }

    async fn analytics(&self) -> Result<Value, Error> {
        let rows = self
            .conn
            .call(|conn| -> Result<Vec<(String, String, i64)>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.title, COUNT(e.id)
                     FROM records c
                     LEFT JOIN records e ON e.entity = 'enrollment' AND e.parent = c.id
                     WHERE c.entity = 'course'
                     GROUP BY c.id, c.title
                     ORDER BY COUNT(e.id) DESC, c.title, c.id",
                )?;
                let rows: Vec<(String, String, i64)> = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect::<Result<_, _>>()?;
                Ok(rows)
            })
            .await?;

        let enrollments: Vec<Value> = rows
            .into_iter()
            .map(|(course_id, title, count)| json!({ "course_id": course_id, "title": title, "enrollments": count }))
            .collect();
        Ok(json!({ "enrollments_by_course": enrollments }))
    }

    async fn search(&self, term: &str, page: u32) -> Result<Value, Error> {
        let pattern = format!("%{}%", escape_like(&normalize_search_term(term)));
        let page_size = u64::from(self.page_size);
        let offset = u64::from(page) * page_size;
        let sql = format!(
            "SELECT {COLUMNS} FROM records
             WHERE entity = 'course' AND search_title LIKE ?1 ESCAPE '\\'
             ORDER BY title, id LIMIT {} OFFSET {offset}",
            page_size + 1
        );

        let rows = self
            .conn
            .call(move |conn| -> Result<Vec<RecordRow>, Error> {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![pattern], RecordRow::from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let has_more = rows.len() > self.page_size as usize;
        let items = rows
            .into_iter()
            .take(page_size as usize)
            .map(|row| row.into_record().map(|r| json!({ "id": r.id, "title": r.title })))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(json!({ "items": items, "page": page, "page_size": page_size, "has_more": has_more }))
    }

    async fn course_detail(&self, course_id: &str) -> Result<Value, Error> {
        let Some(course) = self.get(EntityKind::Course, course_id).await? else {
            return Ok(Value::Null);
        };
        let lessons = self
            .list(EntityKind::Lesson, Filter::Parent(course_id.to_string()), "id")
            .await?;
        let enrollment_count = self.count_by(EntityKind::Enrollment, course_id).await?;

        Ok(json!({ "course": course, "lessons": lessons, "enrollment_count": enrollment_count }))
    }

    async fn compute(&self, resource: &Resource) -> Result<Value, Error> {
        let value = match resource {
            Resource::CoursesList => {
                let courses = self.list(EntityKind::Course, Filter::All, "title, id").await?;
                let summaries: Vec<Value> = courses
                    .into_iter()
                    .map(|c| json!({ "id": c.id, "title": c.title }))
                    .collect();
                Value::Array(summaries)
            }
            Resource::AdminCoursesList => {
                serde_json::to_value(self.list(EntityKind::Course, Filter::All, "title, id").await?)?
            }
            Resource::CourseDetail { course_id } => self.course_detail(course_id).await?,
            Resource::CourseSearch { term, page } => self.search(term, *page).await?,
            Resource::LessonContent { lesson_id } => {
                serde_json::to_value(self.get(EntityKind::Lesson, lesson_id).await?)?
            }
            Resource::AdminUsers => serde_json::to_value(self.list(EntityKind::User, Filter::All, "title, id").await?)?,
            Resource::AdminEnrollments => {
                serde_json::to_value(self.list(EntityKind::Enrollment, Filter::All, "updated_at, id").await?)?
            }
            Resource::AdminDashboardStats => self.dashboard_stats().await?,
            Resource::AdminAnalytics => self.analytics().await?,
            Resource::AdminChatThreads => {
                serde_json::to_value(self.list(EntityKind::ChatThread, Filter::All, "updated_at DESC, id").await?)?
            }
            Resource::UserEnrollments { user_id } => serde_json::to_value(
                self.list(EntityKind::Enrollment, Filter::Owner(user_id.clone()), "updated_at, id")
                    .await?,
            )?,
            Resource::ChatThreads { user_id } => serde_json::to_value(
                self.list(EntityKind::ChatThread, Filter::Owner(user_id.clone()), "updated_at DESC, id")
                    .await?,
            )?,
            Resource::ChatMessages { thread_id } => serde_json::to_value(
                self.list(EntityKind::ChatMessage, Filter::Parent(thread_id.clone()), "updated_at, id")
                    .await?,
            )?,
        };
        Ok(value)
    }
}

#[async_trait]
impl ResourceSource for Catalog {
    async fn load(&self, resource: &Resource) -> Result<Value, Error> {
        self.compute(resource).await.map_err(|e| match e {
            Error::InvalidInput(_) | Error::SourceFailed(_) => e,
            other => Error::SourceFailed(other.to_string()),
        })
    }
}
