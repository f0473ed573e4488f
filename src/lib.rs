//! Castforged - supervised live stream capture
//!
//! This library crate exposes the recorder and configuration layers for the
//! `castforged` binary and for integration testing.

pub mod config;
pub mod recorder;
