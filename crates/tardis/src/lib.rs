#![deny(clippy::await_holding_refcell_ref)]

pub mod batchsystem;
pub mod common;
pub mod site;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::TardisError;
pub type Result<T> = std::result::Result<T, Error>;

pub type Map<K, V> = hashbrown::HashMap<K, V, fxhash::FxBuildHasher>;

pub const TARDIS_VERSION: &str = env!("CARGO_PKG_VERSION");
