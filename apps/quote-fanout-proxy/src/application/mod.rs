//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Client-facing request and payload shapes.
pub mod dto;

/// Port interfaces for the upstream session and client channels.
pub mod ports;

/// Session table, fan-out dispatcher and upstream connector.
pub mod services;
