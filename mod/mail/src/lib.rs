//! Mail module — course-scoped internal messaging.
//!
//! # Resources
//!
//! - **Message** — subject/body with per-user role, unread/starred state
//!   and a reply/forward lineage
//! - **Label** — per-user tag with a color, attachable to messages
//! - **Course / User / Group** — read-only directory snapshot pushed by
//!   the hosting platform
//!
//! # Usage
//!
//! ```ignore
//! use mail::{MailModule, service::MailConfig};
//!
//! let module = MailModule::new(sql, blob, caps, MailConfig::default())?;
//! let router = module.routes(); // Mount under /mail
//! ```

pub mod api;
pub mod model;
pub mod service;

use std::sync::Arc;

use axum::Router;

use coursemail_core::Module;

use crate::service::{Capabilities, MailConfig, MailService};

/// Mail module implementing the Module trait.
///
/// Holds the MailService and provides HTTP routes for all mail endpoints.
pub struct MailModule {
    service: Arc<MailService>,
}

impl MailModule {
    /// Create a new MailModule.
    pub fn new(
        sql: Arc<dyn coursemail_sql::SQLStore>,
        blob: Arc<dyn coursemail_blob::BlobStore>,
        caps: Arc<dyn Capabilities>,
        config: MailConfig,
    ) -> Result<Self, coursemail_core::ServiceError> {
        let service = MailService::new(sql, blob, caps, config)
            .map_err(coursemail_core::ServiceError::from)?;
        Ok(Self { service })
    }

    /// Get a reference to the underlying MailService.
    pub fn service(&self) -> &Arc<MailService> {
        &self.service
    }
}

impl Module for MailModule {
    fn name(&self) -> &str {
        "mail"
    }

    fn routes(&self) -> Router {
        api::build_router(self.service.clone())
    }
}
