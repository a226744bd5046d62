//! Site adapters provision drones on a resource provider and track their lifecycle.
//!
//! The adapters hold no registry of drones. Every operation receives a [`DroneDescriptor`]
//! owned by the caller and returns an updated copy of it.
pub mod htcondor;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::config::MachineMetaData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceStatus {
    Booting,
    Running,
    Stopped,
    Error,
    Deleted,
}

impl ResourceStatus {
    /// Terminal states are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResourceStatus::Stopped | ResourceStatus::Error | ResourceStatus::Deleted
        )
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceStatus::Booting => "Booting",
            ResourceStatus::Running => "Running",
            ResourceStatus::Stopped => "Stopped",
            ResourceStatus::Error => "Error",
            ResourceStatus::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

/// Identity and last known state of one drone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroneDescriptor {
    pub drone_uuid: String,
    pub created: DateTime<Utc>,
    /// Job id assigned by the batch system, known once the drone has been deployed.
    pub remote_resource_uuid: Option<String>,
    pub resource_status: Option<ResourceStatus>,
    pub updated: DateTime<Utc>,
}

impl DroneDescriptor {
    pub fn new(drone_uuid: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            drone_uuid: drone_uuid.into(),
            created: now,
            remote_resource_uuid: None,
            resource_status: None,
            updated: now,
        }
    }

    pub fn with_remote_resource_uuid(mut self, remote_resource_uuid: impl Into<String>) -> Self {
        self.remote_resource_uuid = Some(remote_resource_uuid.into());
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    /// Copy of the descriptor with `updated` set to now.
    pub fn touched(&self) -> Self {
        Self {
            updated: Utc::now(),
            ..self.clone()
        }
    }
}

pub type AdapterFuture<'a, T> = Pin<Box<dyn Future<Output = crate::Result<T>> + 'a>>;

/// Lifecycle operations of drones of one machine type on one site.
pub trait SiteAdapter {
    fn site_name(&self) -> &str;

    fn machine_type(&self) -> &str;

    fn machine_meta_data(&self) -> &MachineMetaData;

    /// Submits a new drone, the returned descriptor carries its remote id.
    fn deploy_resource<'a>(
        &'a self,
        drone: &'a DroneDescriptor,
    ) -> AdapterFuture<'a, DroneDescriptor>;

    fn resource_status<'a>(
        &'a self,
        drone: &'a DroneDescriptor,
    ) -> AdapterFuture<'a, DroneDescriptor>;

    fn stop_resource<'a>(
        &'a self,
        drone: &'a DroneDescriptor,
    ) -> AdapterFuture<'a, DroneDescriptor>;

    fn terminate_resource<'a>(
        &'a self,
        drone: &'a DroneDescriptor,
    ) -> AdapterFuture<'a, DroneDescriptor>;
}
