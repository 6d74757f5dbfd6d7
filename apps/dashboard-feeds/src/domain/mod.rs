//! Domain Layer - Core dashboard data types and decision logic.
//!
//! Pure types and functions with no I/O. Everything time-dependent takes
//! the current instant as an argument.

/// Environmental sensor readings and stream frame classification.
pub mod sensor;

/// Exchange calendar, quotes and price history.
pub mod market;

/// Background poll scheduling decisions.
pub mod polling;

/// Upstream credit accounting.
pub mod quota;
