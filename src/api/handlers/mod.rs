//! API request handlers.

/// Registered agent listing.
pub mod agents;
/// Coordinator health.
pub mod health;
/// Research submission and status.
pub mod research;
/// Agent protocol socket upgrade.
pub mod ws;
