//! Declared dependencies from written entities to the resources derived
//! from them.
//!
//! Each entity kind lists, once, the resources its writes can change. A
//! committed [`Change`] is turned into an [`InvalidationPlan`] by evaluating
//! those declarations, so individual write paths never enumerate keys.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cascade::InvalidationPlan;
use crate::keys::Resource;

/// Kinds of records held by the database of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Course,
    Lesson,
    Enrollment,
    User,
    ChatThread,
    ChatMessage,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Course => "course",
            EntityKind::Lesson => "lesson",
            EntityKind::Enrollment => "enrollment",
            EntityKind::User => "user",
            EntityKind::ChatThread => "chat_thread",
            EntityKind::ChatMessage => "chat_message",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "course" => Ok(EntityKind::Course),
            "lesson" => Ok(EntityKind::Lesson),
            "enrollment" => Ok(EntityKind::Enrollment),
            "user" => Ok(EntityKind::User),
            "chat_thread" => Ok(EntityKind::ChatThread),
            "chat_message" => Ok(EntityKind::ChatMessage),
            other => Err(crate::Error::InvalidInput(format!("unknown entity kind: {other}"))),
        }
    }
}

/// A committed write to one record.
///
/// `owner` is the user a record belongs to (enrollments, threads, messages);
/// `parent` is the record it hangs off (a lesson's course, a message's thread).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Change {
    pub entity: EntityKind,
    pub id: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
}

impl Change {
    pub fn new(entity: EntityKind, id: impl Into<String>) -> Self {
        Self { entity, id: id.into(), owner: None, parent: None }
    }

    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn under(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

/// Derives one affected resource from a change, if the change carries the
/// parameters the resource needs.
pub type Derivation = fn(&Change) -> Option<Resource>;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: HashMap<EntityKind, Vec<Derivation>>,
}

impl DependencyGraph {
    /// Graph with no declarations.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Declare that writes to `entity` affect whatever `derive` yields.
    pub fn declare(mut self, entity: EntityKind, derive: Derivation) -> Self {
        self.edges.entry(entity).or_default().push(derive);
        self
    }

    /// Dependencies of the e-learning platform.
    pub fn platform() -> Self {
        use EntityKind::*;

        Self::empty()
            .declare(Course, |_| Some(Resource::CoursesList))
            .declare(Course, |_| Some(Resource::AdminCoursesList))
            .declare(Course, |c| Some(Resource::CourseDetail { course_id: c.id.clone() }))
            .declare(Course, |_| Some(Resource::AdminDashboardStats))
            .declare(Course, |_| Some(Resource::AdminAnalytics))
            .declare(Lesson, |c| Some(Resource::LessonContent { lesson_id: c.id.clone() }))
            .declare(Lesson, |c| c.parent.clone().map(|course_id| Resource::CourseDetail { course_id }))
            .declare(Lesson, |_| Some(Resource::AdminDashboardStats))
            .declare(Enrollment, |c| c.owner.clone().map(|user_id| Resource::UserEnrollments { user_id }))
            .declare(Enrollment, |c| c.parent.clone().map(|course_id| Resource::CourseDetail { course_id }))
            .declare(Enrollment, |_| Some(Resource::AdminEnrollments))
            .declare(Enrollment, |_| Some(Resource::AdminAnalytics))
            .declare(Enrollment, |_| Some(Resource::AdminDashboardStats))
            .declare(User, |_| Some(Resource::AdminUsers))
            .declare(User, |c| Some(Resource::UserEnrollments { user_id: c.id.clone() }))
            .declare(User, |_| Some(Resource::AdminAnalytics))
            .declare(User, |_| Some(Resource::AdminDashboardStats))
            .declare(ChatThread, |c| c.owner.clone().map(|user_id| Resource::ChatThreads { user_id }))
            .declare(ChatThread, |c| Some(Resource::ChatMessages { thread_id: c.id.clone() }))
            .declare(ChatThread, |_| Some(Resource::AdminChatThreads))
            .declare(ChatMessage, |c| c.parent.clone().map(|thread_id| Resource::ChatMessages { thread_id }))
            .declare(ChatMessage, |c| c.owner.clone().map(|user_id| Resource::ChatThreads { user_id }))
            .declare(ChatMessage, |_| Some(Resource::AdminChatThreads))
    }

    /// Resources derived from the changed record, in declaration order.
    pub fn derived(&self, change: &Change) -> Vec<Resource> {
        self.edges
            .get(&change.entity)
            .map(|derivations| derivations.iter().filter_map(|derive| derive(change)).collect())
            .unwrap_or_default()
    }

    pub fn plan(&self, change: &Change) -> InvalidationPlan {
        let derived = self.derived(change);
        if derived.is_empty() {
            tracing::warn!(entity = %change.entity, id = %change.id, "change has no declared dependents");
        }
        derived.iter().collect()
    }
}
