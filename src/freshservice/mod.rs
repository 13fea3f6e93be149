//! Freshservice API access and field discovery.

pub mod client;
pub mod discovery;

pub use client::FreshserviceClient;
pub use discovery::{Discovery, EntityType};
