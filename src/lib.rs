//! # Drone Bridge Library
//!
//! Control and telemetry bridge between a dashboard database and a
//! serial-attached drone.
//!
//! This library provides the core functionality for reconciling desired
//! control state (database) with actual device state (serial), parsing the
//! line-oriented device protocol, and tracking session and usage statistics.

pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod storage;
pub mod reconcile;
pub mod ingest;
pub mod tracker;
pub mod bridge;
