//! netveil: a privacy-filtering gateway for network identifiers.
//!
//! Scans free-form text for IPv4, IPv6 and MAC literals, swaps each one for a
//! well-formed surrogate, and keeps the original↔surrogate mapping under a
//! short-lived handle so downstream consumers never see the raw identifiers.
//!
//! Layers, leaf first: [`redaction`] (detection and substitution), [`store`]
//! (mapping persistence with TTL), [`admission`] (size guard, rate limit,
//! timeout), [`server`] (HTTP transport).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod redaction;
pub mod store;

pub mod admission;
pub mod maintenance;
pub mod server;
