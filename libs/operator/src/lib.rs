pub mod ancestor;
pub mod chi;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod factory;
pub mod host;
pub mod kube_adapter;
pub mod labels;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod plan;
pub mod poller;
pub mod ready;
pub mod reconcilers;
pub mod registry;
pub mod schemer;
pub mod selflabel;
pub mod shard;
pub mod telemetry;
pub mod zookeeper;

pub use error::{Error, Result};
