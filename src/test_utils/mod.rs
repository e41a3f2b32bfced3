//! Test utilities for flakelock
//!
//! Helpers for unit and integration tests: mock fetchers, a throwaway store
//! with a ready-made resolution context, flake fixtures and a Git wrapper
//! for building real repositories.
//!
//! # Example
//!
//! ```rust,no_run
//! use flakelock::flake_ref::FlakeRef;
//! use flakelock::registry::Registry;
//! use flakelock::resolver::resolve_flake;
//! use flakelock::test_utils::{TestEnv, flake_toml, test_rev};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let env = TestEnv::new();
//! let path = env.add_source(&[("flake.toml", &flake_toml("hello", &[], &[]))]);
//! let ctx = env
//!     .with_repo("https://example.org/hello.git", &path, test_rev(1), None)
//!     .context(Registry::new());
//! let deps = resolve_flake(&ctx, &FlakeRef::git("https://example.org/hello.git"), false, true).await?;
//! assert_eq!(deps.flake.id, "hello");
//! # Ok(())
//! # }
//! ```

pub mod environment;
pub mod fixtures;
pub mod git_helper;
pub mod mocks;

pub use environment::{TestEnv, TestStore};
pub use fixtures::{flake_toml, test_rev};
pub use git_helper::TestGit;
pub use mocks::{MockDownloader, MockExporter};

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. `level` wins over `RUST_LOG`; with
/// neither set, tests run without logging.
///
/// ```bash
/// RUST_LOG=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}
