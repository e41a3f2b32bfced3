//! Integration test suite for flakelock
//!
//! End-to-end tests against real Git repositories created in temporary
//! directories. They need a `git` binary on `PATH` but no network access.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **cli**: The `flakelock` binary and its subcommands
//! - **lock**: Writing, re-writing and loading `flake.lock`
//! - **resolve**: Resolution of local flake trees, refs and revisions
//! - **settings**: Settings discovery through the environment

mod common;

mod cli;
mod lock;
mod resolve;
mod settings;
