//! Marina Harbor: the hosting service around `marina-core`.
//!
//! Wires Redis-backed stores, the HTTP liveness oracle, and the
//! child-process worker launcher into the coordinator and exposes the five
//! hosting operations over HTTP.

pub mod cli;
pub mod config;
pub mod handlers;
pub mod launcher;
pub mod oracle;
pub mod storage;
