//! Application Layer - Core components and port definitions.
//!
//! This layer contains the stream supervisor and poll scheduler and the
//! port interfaces they drive.

/// Port interfaces for external systems (transport, upstream, clock).
pub mod ports;

/// Stream supervision, poll scheduling and their timer primitives.
pub mod services;
