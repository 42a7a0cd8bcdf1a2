//! Provider module: the engine's only route to the outside world.
//!
//! This module contains:
//! - The [`Provider`] capability implemented by every backend
//! - Bounded exponential backoff for retryable provider errors
//! - An in-process simulated cloud for local runs and tests
//! - A JSON-over-HTTP client for out-of-process provider plugins

mod http;
mod retry;
mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::graph::{AttrMap, ResourceId};

pub use http::HttpProvider;
pub use retry::{RetryPolicy, with_retry};
pub use simulated::SimulatedProvider;

/// A resource freshly created by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Created {
    /// Identifier assigned by the provider.
    #[serde(rename = "id")]
    pub provider_id: String,
    /// Outputs exposed to dependents.
    #[serde(default)]
    pub outputs: AttrMap,
}

/// Capability to create, update and delete resources.
///
/// Implementations must be safe to call concurrently for distinct resources.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates a resource from fully resolved attributes.
    async fn create(&self, id: &ResourceId, attributes: &AttrMap) -> Result<Created, ProviderError>;

    /// Updates the changed attributes of an existing resource in place.
    ///
    /// A `null` value removes the attribute. Returns the resource's outputs.
    async fn update(
        &self,
        id: &ResourceId,
        provider_id: &str,
        changed: &AttrMap,
    ) -> Result<AttrMap, ProviderError>;

    /// Deletes a resource.
    async fn delete(&self, id: &ResourceId, provider_id: &str) -> Result<(), ProviderError>;

    /// Short name of the provider for logs and reports.
    fn name(&self) -> &'static str;
}
