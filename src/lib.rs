//! Offline caching worker for a static tutorial site.
//!
//! The worker pre-seeds a versioned static cache, garbage-collects old cache
//! generations on activation, serves same-origin GETs cache-first with an
//! offline page fallback, and retries queued contact form submissions when
//! connectivity returns.

pub mod cache;
pub mod commands;
pub mod config;
pub mod logging;
pub mod net;
pub mod worker;
