//! Resource discovery
//!
//! Lists the live resources of one type and narrows them with the configured filter.
//! A single call is one attempt; retrying transient failures is up to the caller.

use crate::config::FilterPattern;
use crate::error::DiscoveryError;
use crate::model::{ResourceRef, ResourceType};
use crate::session::CloudSession;
use log::debug;
use std::sync::Arc;

/// Discovers resources of any type through one session
pub struct Discoverer {
    session: Arc<dyn CloudSession>,
    region: String,
}

impl Discoverer {
    pub fn new(session: Arc<dyn CloudSession>, region: impl Into<String>) -> Self {
        Self {
            session,
            region: region.into(),
        }
    }

    /// List resources of `resource_type` selected by `filter`
    ///
    /// The result is sorted and contains no duplicates. Throttling, network errors and
    /// timeouts come back as `DiscoveryError::Transient`; everything else is permanent.
    pub async fn discover(
        &self,
        resource_type: ResourceType,
        filter: &FilterPattern,
    ) -> Result<Vec<ResourceRef>, DiscoveryError> {
        let identifiers = self
            .session
            .list_resources(resource_type, &self.region)
            .await?;
        let listed = identifiers.len();

        let mut refs: Vec<ResourceRef> = identifiers
            .into_iter()
            .map(|identifier| identifier.trim().to_string())
            .filter(|identifier| !identifier.is_empty() && filter.matches(identifier))
            .map(|identifier| ResourceRef::new(resource_type, identifier, self.region.clone()))
            .collect();
        refs.sort();
        refs.dedup();

        debug!(
            "Discovered {} of {} listed {} resources (filter: {})",
            refs.len(),
            listed,
            resource_type,
            filter
        );
        Ok(refs)
    }
}
