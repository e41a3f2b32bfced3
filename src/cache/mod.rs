//! Cache directory helpers shared by the bundled fetchers.

pub mod lock;

pub use lock::CacheLock;
