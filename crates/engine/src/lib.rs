//! Notification dispatch core: durable store, live connection registry,
//! bulk dispatch and open tracking.

pub mod dispatch;
pub mod registry;
pub mod store;
pub mod tracker;
