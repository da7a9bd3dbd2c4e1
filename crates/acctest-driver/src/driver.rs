use async_trait::async_trait;
use acctest_domain::{ExternalHandle, Locator, ParentHandle, ResourceReference};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LookupError;

/// Result of an out-of-band delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

/// Why a resource is being looked up. Decides what an absent parent means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    ConfirmExistence,
    ConfirmDestruction,
}

/// Outcome of walking state → parent → resource against the system of record.
#[derive(Debug, Clone)]
pub enum Resolution {
    Found(ExternalHandle),
    ResourceAbsent { locator: Locator, parent: ParentHandle },
    ParentAbsent { locator: Locator },
}

/// A [`Resolution`] interpreted for a specific [`Purpose`].
#[derive(Debug, Clone)]
pub enum Verdict {
    Present(ExternalHandle),
    Absent(Locator),
    /// Only produced for [`Purpose::ConfirmExistence`].
    ParentMissing(Locator),
}

impl Resolution {
    /// An absent parent counts as an absent resource when confirming
    /// destruction, and as a hard failure when confirming existence.
    pub fn for_purpose(self, purpose: Purpose) -> Verdict {
        match (self, purpose) {
            (Resolution::Found(handle), _) => Verdict::Present(handle),
            (Resolution::ResourceAbsent { locator, .. }, _) => Verdict::Absent(locator),
            (Resolution::ParentAbsent { locator }, Purpose::ConfirmDestruction) => {
                Verdict::Absent(locator)
            }
            (Resolution::ParentAbsent { locator }, Purpose::ConfirmExistence) => {
                Verdict::ParentMissing(locator)
            }
        }
    }
}

/// Read-mostly access to one resource family in the system of record.
///
/// Implementations hold only immutable clients so a single instance can be
/// shared across concurrently running scenarios.
#[async_trait]
pub trait ResourceDriver: Send + Sync + 'static {
    fn resource_type(&self) -> &str;

    fn parent_type(&self) -> &str;

    /// Pull the parent key and leaf name out of post-apply state. Lookups
    /// leave `version` unset so they follow the latest version.
    fn locate(&self, reference: &ResourceReference) -> Result<Locator, LookupError>;

    async fn find_parent(&self, locator: &Locator) -> Result<Option<ParentHandle>, LookupError>;

    /// `version = None` reads the latest version.
    async fn get(
        &self,
        parent: &ParentHandle,
        name: &str,
        version: Option<&str>,
    ) -> Result<Option<ExternalHandle>, LookupError>;

    async fn delete(&self, parent: &ParentHandle, name: &str) -> Result<DeleteOutcome, LookupError>;

    async fn delete_parent(&self, parent: &ParentHandle) -> Result<DeleteOutcome, LookupError>;
}

/// Resolve a state entry to its current form in the system of record.
pub async fn resolve(
    driver: &dyn ResourceDriver,
    reference: &ResourceReference,
) -> Result<Resolution, LookupError> {
    let locator = driver.locate(reference)?;

    let parent = match driver.find_parent(&locator).await? {
        Some(p) => p,
        None => {
            debug!(address = %reference.address(), parent = %locator.parent, "parent not found");
            return Ok(Resolution::ParentAbsent { locator });
        }
    };

    match driver
        .get(&parent, &locator.name, locator.version.as_deref())
        .await?
    {
        Some(handle) => Ok(Resolution::Found(handle)),
        None => {
            debug!(address = %reference.address(), name = %locator.name, "resource not found");
            Ok(Resolution::ResourceAbsent { locator, parent })
        }
    }
}
