//! EagleHub loader server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod admin;
pub mod compiler;
pub mod config;
pub mod db;
pub mod keys;
pub mod loader;
pub mod moderation;
pub mod routes;
pub mod state;
pub mod store;
pub mod vm;
