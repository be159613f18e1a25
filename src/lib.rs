//! Client-side cache and offline sync for the freelance marketplace.
//!
//! [`cache`] holds parsed application data by semantic key, [`market`] wraps
//! the origin API with it, [`worker`] intercepts raw requests with its own
//! generation-scoped caches, and [`offline`] queues mutations made while
//! disconnected.

pub mod cache;
pub mod clock;
pub mod config;
pub mod logging;
pub mod market;
pub mod offline;
pub mod worker;
