//! Adapters of the overlay batch system into which drones integrate as worker nodes.
pub mod htcondor;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::site::AdapterFuture;

/// State of a drone from the point of view of the overlay batch system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineStatus {
    Available,
    Draining,
    Drained,
    NotAvailable,
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MachineStatus::Available => "Available",
            MachineStatus::Draining => "Draining",
            MachineStatus::Drained => "Drained",
            MachineStatus::NotAvailable => "NotAvailable",
        };
        f.write_str(name)
    }
}

pub trait BatchSystemAdapter {
    fn integrate_machine<'a>(&'a self, drone_uuid: &'a str) -> AdapterFuture<'a, ()>;

    fn disintegrate_machine<'a>(&'a self, drone_uuid: &'a str) -> AdapterFuture<'a, ()>;

    /// Asks the batch system to stop scheduling new work on the drone.
    fn drain_machine<'a>(&'a self, drone_uuid: &'a str) -> AdapterFuture<'a, ()>;

    /// Ratios of used resources, e.g. CPU and memory, each in `[0, 1]`.
    fn get_resource_ratios<'a>(&'a self, drone_uuid: &'a str) -> AdapterFuture<'a, Vec<f64>>;

    fn get_allocation<'a>(&'a self, drone_uuid: &'a str) -> AdapterFuture<'a, f64>;

    fn get_utilization<'a>(&'a self, drone_uuid: &'a str) -> AdapterFuture<'a, f64>;

    fn get_machine_status<'a>(&'a self, drone_uuid: &'a str) -> AdapterFuture<'a, MachineStatus>;
}
