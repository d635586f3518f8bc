pub mod directory;
pub mod label;
pub mod message;
pub mod schema;
pub mod search;
pub mod user_search;

use std::sync::Arc;

use thiserror::Error;

use coursemail_blob::{BlobError, BlobStore};
use coursemail_sql::{SQLError, SQLStore};

use crate::model::{CourseId, UserId};

/// Mail service error type.
///
/// NotFound covers both absent entities and entities the caller may not
/// see, so existence is never leaked to unauthorized callers.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("forbidden: {0}")]
    PermissionDenied(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl From<MailError> for coursemail_core::ServiceError {
    fn from(e: MailError) -> Self {
        match e {
            MailError::NotFound(m) => coursemail_core::ServiceError::NotFound(m),
            MailError::Validation(m) => coursemail_core::ServiceError::Validation(m),
            MailError::PermissionDenied(m) => coursemail_core::ServiceError::PermissionDenied(m),
            MailError::Storage(m) => coursemail_core::ServiceError::Storage(m),
            MailError::Internal(m) => coursemail_core::ServiceError::Internal(m),
        }
    }
}

impl From<SQLError> for MailError {
    fn from(e: SQLError) -> Self {
        MailError::Storage(e.to_string())
    }
}

impl From<BlobError> for MailError {
    fn from(e: BlobError) -> Self {
        MailError::Storage(e.to_string())
    }
}

/// Capabilities a user may hold in a course context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Send mail to users sharing a role with the sender.
    MailSameRole,
    /// See members of all groups in separate-groups mode.
    AccessAllGroups,
    /// Use mail in courses hidden from regular participants.
    ViewHiddenCourses,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::MailSameRole => "mailsamerole",
            Capability::AccessAllGroups => "accessallgroups",
            Capability::ViewHiddenCourses => "viewhiddencourses",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "mailsamerole" => Some(Capability::MailSameRole),
            "accessallgroups" => Some(Capability::AccessAllGroups),
            "viewhiddencourses" => Some(Capability::ViewHiddenCourses),
            _ => None,
        }
    }
}

/// Authorization oracle consulted by the service. The platform decides
/// who holds which capability; the mail service only asks.
pub trait Capabilities: Send + Sync {
    fn has_capability(&self, user: UserId, course: CourseId, capability: Capability) -> bool;
}

/// Grants every capability. Useful for tests and trusted deployments.
pub struct AllowAll;

impl Capabilities for AllowAll {
    fn has_capability(&self, _user: UserId, _course: CourseId, _capability: Capability) -> bool {
        true
    }
}

/// Denies every capability.
pub struct DenyAll;

impl Capabilities for DenyAll {
    fn has_capability(&self, _user: UserId, _course: CourseId, _capability: Capability) -> bool {
        false
    }
}

/// Capability oracle backed by the `capability_grants` table, for
/// deployments where grants are seeded alongside the directory snapshot.
pub struct StoredCapabilities {
    sql: Arc<dyn SQLStore>,
}

impl StoredCapabilities {
    pub fn new(sql: Arc<dyn SQLStore>) -> Self {
        Self { sql }
    }
}

impl Capabilities for StoredCapabilities {
    fn has_capability(&self, user: UserId, course: CourseId, capability: Capability) -> bool {
        let result = self.sql.query(
            "SELECT 1 AS found FROM capability_grants \
             WHERE userid = ? AND courseid = ? AND capability = ?",
            &[
                coursemail_sql::Value::Integer(user.0),
                coursemail_sql::Value::Integer(course.0),
                coursemail_sql::Value::Text(capability.as_str().to_string()),
            ],
        );
        match result {
            Ok(rows) => !rows.is_empty(),
            Err(e) => {
                tracing::warn!("capability lookup failed: {}", e);
                false
            }
        }
    }
}

/// Mail service configuration.
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Maximum recipients per message.
    pub max_recipients: usize,
    /// Maximum attachments per message.
    pub max_files: usize,
    /// Maximum total attachment bytes per message. 0 means no limit.
    pub max_bytes: u64,
    /// Maximum results returned by recipient searches.
    pub user_search_limit: usize,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            max_recipients: 100,
            max_files: 20,
            max_bytes: 20 * 1024 * 1024,
            user_search_limit: 100,
        }
    }
}

/// The mail service. Holds storage backends and configuration.
pub struct MailService {
    pub(crate) sql: Arc<dyn SQLStore>,
    pub(crate) blob: Arc<dyn BlobStore>,
    pub(crate) caps: Arc<dyn Capabilities>,
    pub(crate) config: MailConfig,
}

impl MailService {
    /// Create a new MailService, initializing the DB schema.
    pub fn new(
        sql: Arc<dyn SQLStore>,
        blob: Arc<dyn BlobStore>,
        caps: Arc<dyn Capabilities>,
        config: MailConfig,
    ) -> Result<Arc<Self>, MailError> {
        schema::init_schema(sql.as_ref())?;
        Ok(Arc::new(Self { sql, blob, caps, config }))
    }

    pub fn config(&self) -> &MailConfig {
        &self.config
    }

    pub(crate) fn has_capability(
        &self,
        user: UserId,
        course: CourseId,
        capability: Capability,
    ) -> bool {
        self.caps.has_capability(user, course, capability)
    }
}
