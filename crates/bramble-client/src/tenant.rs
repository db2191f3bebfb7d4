// SPDX-License-Identifier: Apache-2.0
//! Ambient tenant context.
//!
//! The active organization slug is process-wide mutable state read at send
//! time, not at pipeline construction time: changing the slug affects the
//! very next request without rebuilding anything.

use std::sync::{Arc, PoisonError, RwLock};

/// Slug used until the application selects an organization.
pub const DEFAULT_ORG_SLUG: &str = "acme";

/// Shared handle to the active organization slug.
#[derive(Debug, Clone)]
pub struct TenantContext {
    slug: Arc<RwLock<String>>,
}

impl TenantContext {
    /// Creates a context with an explicit starting slug.
    #[must_use]
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: Arc::new(RwLock::new(slug.into())),
        }
    }

    /// The slug to attach to the next outbound request.
    #[must_use]
    pub fn slug(&self) -> String {
        self.slug
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Switches the active organization.
    pub fn set_slug(&self, slug: impl Into<String>) {
        *self.slug.write().unwrap_or_else(PoisonError::into_inner) = slug.into();
    }
}

impl Default for TenantContext {
    fn default() -> Self {
        Self::new(DEFAULT_ORG_SLUG)
    }
}
