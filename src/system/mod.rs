//! System utilities
//!
//! This module provides system-level probing used when configuring the engine.

pub mod resources;
