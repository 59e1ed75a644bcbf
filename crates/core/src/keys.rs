//! Cached resources and their key and TTL conventions.
//!
//! Every resource maps to:
//!
//! - a **version key** in the registry (several resources may share one)
//! - a **cache key** for its precomputed payload
//! - a **remote TTL** bounding payload staleness when no cascade reaches it
//! - a **client policy** describing how long a client may serve its copy
//!
//! | Resource class | Remote TTL | Client staleness |
//! |---|---|---|
//! | Rarely-changing lists | 30 days | 30 min |
//! | Dashboard stats / analytics | 30 days / 24 h | 10 min |
//! | Free-text search | 5 min | always network |
//! | Chat threads / messages | 6 h | 10 / 30 min |

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Error;

/// "Effectively forever" for lists that only change through cascades.
pub const TTL_LONG_LIVED: Duration = Duration::from_secs(2_592_000);

/// Sub-aggregates recomputed at least daily.
pub const TTL_SUB_AGGREGATE: Duration = Duration::from_secs(86_400);

/// Chat thread and message snapshots.
pub const TTL_CHAT: Duration = Duration::from_secs(21_600);

/// Free-text search pages. Never cascaded; this TTL is their only bound.
pub const TTL_SEARCH: Duration = Duration::from_secs(300);

const STALE_LISTS: Duration = Duration::from_secs(30 * 60);
const STALE_STATS: Duration = Duration::from_secs(10 * 60);
const STALE_CHAT_THREADS: Duration = Duration::from_secs(10 * 60);
const STALE_CHAT_MESSAGES: Duration = Duration::from_secs(30 * 60);

const COURSES_VERSION: &str = "courses-version";
const ADMIN_USERS_VERSION: &str = "admin-users-version";
const ADMIN_ENROLLMENTS_VERSION: &str = "admin-enrollments-version";
const ADMIN_DASHBOARD_STATS_VERSION: &str = "admin-dashboard-stats-version";
const ADMIN_ANALYTICS_VERSION: &str = "admin-analytics-version";
const ADMIN_CHAT_THREADS_VERSION: &str = "admin-chat-threads-version";

/// How a client may reuse its persisted copy of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPolicy {
    /// Persist the record; serve it without a round-trip until `stale_after`.
    Cached { stale_after: Duration },
    /// Never persist; every read goes to the server.
    NetworkOnly,
}

/// A cacheable resource together with the parameters that select it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resource {
    /// Course summaries shown to everyone.
    CoursesList,
    /// Full course records for the admin console.
    AdminCoursesList,
    /// One course with its lessons.
    CourseDetail { course_id: String },
    /// One page of a title search over courses.
    CourseSearch { term: String, page: u32 },
    /// One lesson's content.
    LessonContent { lesson_id: String },
    AdminUsers,
    AdminEnrollments,
    AdminDashboardStats,
    AdminAnalytics,
    AdminChatThreads,
    /// Courses a user is enrolled in.
    UserEnrollments { user_id: String },
    /// Chat threads a user participates in.
    ChatThreads { user_id: String },
    /// Messages of one thread.
    ChatMessages { thread_id: String },
}

impl Resource {
    /// Registry key whose counter stamps this resource.
    pub fn version_key(&self) -> String {
        match self {
            Resource::CoursesList
            | Resource::AdminCoursesList
            | Resource::CourseDetail { .. }
            | Resource::CourseSearch { .. }
            | Resource::LessonContent { .. } => COURSES_VERSION.to_string(),
            Resource::AdminUsers => ADMIN_USERS_VERSION.to_string(),
            Resource::AdminEnrollments => ADMIN_ENROLLMENTS_VERSION.to_string(),
            Resource::AdminDashboardStats => ADMIN_DASHBOARD_STATS_VERSION.to_string(),
            Resource::AdminAnalytics => ADMIN_ANALYTICS_VERSION.to_string(),
            Resource::AdminChatThreads => ADMIN_CHAT_THREADS_VERSION.to_string(),
            Resource::UserEnrollments { user_id } => format!("user:{user_id}-version"),
            Resource::ChatThreads { user_id } => format!("chat:{user_id}-version"),
            Resource::ChatMessages { thread_id } => format!("chat-thread:{thread_id}-version"),
        }
    }

    /// Remote cache key of the precomputed payload.
    pub fn cache_key(&self) -> String {
        match self {
            Resource::CoursesList => "courses-list".to_string(),
            Resource::AdminCoursesList => "admin-courses-list".to_string(),
            Resource::CourseDetail { course_id } => format!("course-detail:{course_id}"),
            Resource::CourseSearch { term, page } => format!("course-search:{}:{page}", search_digest(term)),
            Resource::LessonContent { lesson_id } => format!("lesson-content:{lesson_id}"),
            Resource::AdminUsers => "admin-users-list".to_string(),
            Resource::AdminEnrollments => "admin-enrollments-list".to_string(),
            Resource::AdminDashboardStats => "admin-dashboard-stats".to_string(),
            Resource::AdminAnalytics => "admin-analytics".to_string(),
            Resource::AdminChatThreads => "admin-chat-threads".to_string(),
            Resource::UserEnrollments { user_id } => format!("user-enrollments:{user_id}"),
            Resource::ChatThreads { user_id } => format!("chat-threads:{user_id}"),
            Resource::ChatMessages { thread_id } => format!("chat-messages:{thread_id}"),
        }
    }

    pub fn remote_ttl(&self) -> Duration {
        match self {
            Resource::CourseSearch { .. } => TTL_SEARCH,
            Resource::AdminAnalytics => TTL_SUB_AGGREGATE,
            Resource::ChatThreads { .. } | Resource::ChatMessages { .. } | Resource::AdminChatThreads => TTL_CHAT,
            _ => TTL_LONG_LIVED,
        }
    }

    pub fn client_policy(&self) -> ClientPolicy {
        let stale_after = match self {
            Resource::CourseSearch { .. } => return ClientPolicy::NetworkOnly,
            Resource::AdminDashboardStats | Resource::AdminAnalytics => STALE_STATS,
            Resource::ChatThreads { .. } | Resource::AdminChatThreads => STALE_CHAT_THREADS,
            Resource::ChatMessages { .. } => STALE_CHAT_MESSAGES,
            _ => STALE_LISTS,
        };
        ClientPolicy::Cached { stale_after }
    }

    /// Whether invalidation cascades clear this resource's payload.
    ///
    /// Search pages are keyed by term and page, so no mutation can name them;
    /// they age out through [`TTL_SEARCH`] instead.
    pub fn cascades(&self) -> bool {
        !matches!(self, Resource::CourseSearch { .. })
    }

    /// Client-side namespace of the persisted record.
    pub fn namespace(&self) -> String {
        self.cache_key()
    }

    /// Reject parameters that would produce ambiguous keys.
    pub fn validate(&self) -> Result<(), Error> {
        let (field, value) = match self {
            Resource::CourseDetail { course_id } => ("course_id", course_id),
            Resource::CourseSearch { term, .. } => ("term", term),
            Resource::LessonContent { lesson_id } => ("lesson_id", lesson_id),
            Resource::UserEnrollments { user_id } | Resource::ChatThreads { user_id } => ("user_id", user_id),
            Resource::ChatMessages { thread_id } => ("thread_id", thread_id),
            _ => return Ok(()),
        };

        if value.trim().is_empty() {
            return Err(Error::InvalidInput(format!("{field} cannot be empty")));
        }
        if value.contains(':') && field != "term" {
            return Err(Error::InvalidInput(format!("{field} cannot contain ':'")));
        }
        Ok(())
    }
}

/// Normalize a search term so case and surrounding whitespace share a key.
pub fn normalize_search_term(term: &str) -> String {
    term.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Short digest of a normalized search term, keeping keys bounded in length.
pub fn search_digest(term: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_search_term(term).as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}
