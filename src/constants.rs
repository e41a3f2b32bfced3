//! Global constants used throughout the flakelock codebase.
//!
//! File names, schema versions, timeouts and retry parameters that are
//! shared between the resolver, the fetchers and the CLI live here so the
//! magic numbers stay discoverable.

use std::time::Duration;

/// Name of the flake description file at the root of every flake source.
pub const FLAKE_FILE: &str = "flake.toml";

/// Name of the lock file written next to [`FLAKE_FILE`].
pub const LOCK_FILE: &str = "flake.lock";

/// The only lock file schema version this crate reads or writes.
pub const LOCK_FILE_VERSION: u64 = 1;

/// The only registry schema version this crate reads or writes.
pub const REGISTRY_VERSION: u64 = 1;

/// Branch requested from hosted tarball endpoints when neither a ref nor a rev is set.
pub const DEFAULT_BRANCH: &str = "master";

/// Name given to every fetched source in the store.
pub const SOURCE_NAME: &str = "source";

/// Cache lifetime for downloads of pinned revisions (effectively forever).
///
/// A pinned revision can never change upstream, so the cached tarball is
/// valid for as long as it exists.
pub const PINNED_TTL: Duration = Duration::from_secs(1_000_000_000);

/// Default cache lifetime for downloads of mutable refs (one hour).
pub const DEFAULT_TARBALL_TTL: Duration = Duration::from_secs(3600);

/// Timeout for cloning a repository into the mirror cache.
pub const GIT_CLONE_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for fetching updates into an existing mirror.
pub const GIT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for `git archive` exports.
pub const GIT_EXPORT_TIMEOUT: Duration = Duration::from_secs(60);

/// Starting delay for exponential backoff of HTTP retries (10ms).
pub const STARTING_BACKOFF_DELAY_MS: u64 = 10;

/// Maximum backoff delay between HTTP retries (500ms).
pub const MAX_BACKOFF_DELAY_MS: u64 = 500;

/// Number of HTTP retries after the first attempt.
pub const HTTP_RETRY_ATTEMPTS: usize = 3;

/// User agent sent with every HTTP request.
pub const USER_AGENT: &str = concat!("flakelock/", env!("CARGO_PKG_VERSION"));

/// Maximum nesting of thunk forcing before evaluation reports infinite recursion.
pub const MAX_EVAL_DEPTH: usize = 256;
