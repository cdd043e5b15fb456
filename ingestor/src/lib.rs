//! Smart-farm telemetry bridge: ingests device readings from MQTT, persists
//! them, drives the irrigation pump and fans readings out to dashboards.

pub mod broadcast;
pub mod config;
pub mod db;
pub mod decision;
pub mod errors;
pub mod forecast;
pub mod inbound;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod notify;
pub mod pipeline;
pub mod profile;
pub mod rest;
pub mod store;
pub mod threshold;
pub mod validate;
