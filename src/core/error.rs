//! Error handling for flakelock
//!
//! This module provides the error types and user-friendly error reporting for
//! the resolver. The error system is built around two ideas:
//! 1. **Strongly-typed errors** so callers (and tests) can match on the exact failure
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Architecture
//!
//! - [`FlakeError`] - Enumerated error types for every failure the resolver reports
//! - [`ErrorContext`] - Wrapper that adds details and suggestions for display
//!
//! # Error Categories
//!
//! - **Format**: [`FlakeError::UnsupportedVersion`], [`FlakeError::LockFileParseError`],
//!   [`FlakeError::RegistryParseError`], [`FlakeError::InvalidFlakeRef`]
//! - **Purity**: [`FlakeError::ImpureFetch`]
//! - **Registries**: [`FlakeError::RegistryCycle`], [`FlakeError::UnresolvedAlias`]
//! - **Fetching**: [`FlakeError::MissingEtag`], [`FlakeError::InvalidEtag`],
//!   [`FlakeError::NotARepository`], [`FlakeError::InvalidStorePath`],
//!   [`FlakeError::NetworkError`], plus the git variants
//! - **Evaluation**: [`FlakeError::MissingAttribute`], [`FlakeError::EvalError`]
//!
//! Use [`user_friendly_error`] to turn any [`anyhow::Error`] into an
//! [`ErrorContext`] ready for display.
//!
//! # Examples
//!
//! ```rust,no_run
//! use flakelock::core::{ErrorContext, FlakeError};
//!
//! let context = ErrorContext::new(FlakeError::GitNotFound)
//!     .with_suggestion("Install git from https://git-scm.com/")
//!     .with_details("Git and path flakes are exported with the system git binary");
//! context.display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for resolver operations.
///
/// Every variant carries owned strings rather than borrowed data so errors
/// can cross async boundaries and be stored in an [`ErrorContext`].
#[derive(Error, Debug)]
pub enum FlakeError {
    /// A registry or lock file declared a schema version other than 1.
    ///
    /// A missing `version` field is reported as version 0.
    #[error("{kind} '{path}' has unsupported version {version}")]
    UnsupportedVersion {
        /// Which kind of file was read ("flake registry" or "lock file")
        kind: String,
        /// Path of the offending file
        path: String,
        /// The version number found in the file
        version: u64,
    },

    /// A hosted tarball download succeeded without an `ETag` header.
    #[error("did not receive an ETag header from '{url}'")]
    MissingEtag {
        /// The tarball URL
        url: String,
    },

    /// The `ETag` header of a hosted tarball was not a quoted 40-character revision.
    #[error("ETag header '{etag}' from '{url}' is not a Git revision")]
    InvalidEtag {
        /// The raw header value
        etag: String,
        /// The tarball URL
        url: String,
    },

    /// A flake description lacks a required attribute.
    #[error("flake '{path}' lacks attribute '{attribute}'")]
    MissingAttribute {
        /// The missing attribute (`name` or `provides`)
        attribute: String,
        /// The flake source path
        path: String,
    },

    /// A mutable reference was fetched while purity was required.
    #[error("requested to fetch FlakeRef '{flake_ref}' purely, which is mutable")]
    ImpureFetch {
        /// The reference without a pinned revision
        flake_ref: String,
    },

    /// Registry lookups looped back onto an alias already visited.
    #[error("found cycle in flake registries: {chain}")]
    RegistryCycle {
        /// The visited chain joined with " - "
        chain: String,
    },

    /// An alias was not found in any registry.
    #[error("indirect flake URI '{flake_ref}' is the result of a lookup")]
    UnresolvedAlias {
        /// The alias that could not be resolved
        flake_ref: String,
        /// Registry aliases that look similar, for "did you mean" hints
        similar: Vec<String>,
    },

    /// A path reference does not point at a Git working tree.
    #[error("flake '{path}' does not reference a Git repository")]
    NotARepository {
        /// The referenced directory
        path: String,
    },

    /// A fetcher returned a path outside the store.
    #[error("path '{path}' is not in the store")]
    InvalidStorePath {
        /// The offending path
        path: String,
    },

    /// A flake reference string could not be parsed.
    #[error("invalid flake reference '{input}': {reason}")]
    InvalidFlakeRef {
        /// The text that failed to parse
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// The requested operation does not apply to this kind of flake.
    #[error("{message}")]
    Usage {
        /// Description of the misuse
        message: String,
    },

    /// The lock file exists but is not valid JSON of the expected shape.
    #[error("Invalid lock file syntax in {file}: {reason}")]
    LockFileParseError {
        /// Path of the lock file
        file: String,
        /// Parser message
        reason: String,
    },

    /// A registry file exists but is not valid JSON of the expected shape.
    #[error("Invalid flake registry syntax in {file}: {reason}")]
    RegistryParseError {
        /// Path of the registry file
        file: String,
        /// Parser message
        reason: String,
    },

    /// Git executable not found in PATH.
    #[error("Git is not installed or not found in PATH")]
    GitNotFound,

    /// A git command returned a non-zero exit code or timed out.
    #[error("Git operation failed: {operation}")]
    GitCommandError {
        /// The git operation that failed (e.g. "fetch", "archive")
        operation: String,
        /// The error output from git
        stderr: String,
    },

    /// Cloning a repository into the mirror cache failed.
    #[error("Failed to clone repository: {url}")]
    GitCloneFailed {
        /// The repository URL
        url: String,
        /// The reason reported by git
        reason: String,
    },

    /// An HTTP request failed.
    #[error("Network error: {operation}")]
    NetworkError {
        /// What was being attempted
        operation: String,
        /// The underlying failure
        reason: String,
    },

    /// The flake description could not be evaluated.
    #[error("evaluation error: {message}")]
    EvalError {
        /// Description of the evaluation failure
        message: String,
    },

    /// Standard I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Anything else.
    #[error("{message}")]
    Other {
        /// The error message
        message: String,
    },
}

impl Clone for FlakeError {
    fn clone(&self) -> Self {
        match self {
            Self::UnsupportedVersion {
                kind,
                path,
                version,
            } => Self::UnsupportedVersion {
                kind: kind.clone(),
                path: path.clone(),
                version: *version,
            },
            Self::MissingEtag {
                url,
            } => Self::MissingEtag {
                url: url.clone(),
            },
            Self::InvalidEtag {
                etag,
                url,
            } => Self::InvalidEtag {
                etag: etag.clone(),
                url: url.clone(),
            },
            Self::MissingAttribute {
                attribute,
                path,
            } => Self::MissingAttribute {
                attribute: attribute.clone(),
                path: path.clone(),
            },
            Self::ImpureFetch {
                flake_ref,
            } => Self::ImpureFetch {
                flake_ref: flake_ref.clone(),
            },
            Self::RegistryCycle {
                chain,
            } => Self::RegistryCycle {
                chain: chain.clone(),
            },
            Self::UnresolvedAlias {
                flake_ref,
                similar,
            } => Self::UnresolvedAlias {
                flake_ref: flake_ref.clone(),
                similar: similar.clone(),
            },
            Self::NotARepository {
                path,
            } => Self::NotARepository {
                path: path.clone(),
            },
            Self::InvalidStorePath {
                path,
            } => Self::InvalidStorePath {
                path: path.clone(),
            },
            Self::InvalidFlakeRef {
                input,
                reason,
            } => Self::InvalidFlakeRef {
                input: input.clone(),
                reason: reason.clone(),
            },
            Self::Usage {
                message,
            } => Self::Usage {
                message: message.clone(),
            },
            Self::LockFileParseError {
                file,
                reason,
            } => Self::LockFileParseError {
                file: file.clone(),
                reason: reason.clone(),
            },
            Self::RegistryParseError {
                file,
                reason,
            } => Self::RegistryParseError {
                file: file.clone(),
                reason: reason.clone(),
            },
            Self::GitNotFound => Self::GitNotFound,
            Self::GitCommandError {
                operation,
                stderr,
            } => Self::GitCommandError {
                operation: operation.clone(),
                stderr: stderr.clone(),
            },
            Self::GitCloneFailed {
                url,
                reason,
            } => Self::GitCloneFailed {
                url: url.clone(),
                reason: reason.clone(),
            },
            Self::NetworkError {
                operation,
                reason,
            } => Self::NetworkError {
                operation: operation.clone(),
                reason: reason.clone(),
            },
            Self::EvalError {
                message,
            } => Self::EvalError {
                message: message.clone(),
            },
            // For errors that don't implement Clone, convert to Other
            Self::IoError(e) => Self::Other {
                message: format!("IO error: {e}"),
            },
            Self::JsonError(e) => Self::Other {
                message: format!("JSON error: {e}"),
            },
            Self::TomlError(e) => Self::Other {
                message: format!("TOML parsing error: {e}"),
            },
            Self::Other {
                message,
            } => Self::Other {
                message: message.clone(),
            },
        }
    }
}

/// Error context wrapper that provides user-friendly error information.
///
/// When displayed, errors show the main message in red, optional details in
/// yellow and an optional suggestion in green.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: FlakeError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    #[must_use]
    pub const fn new(error: FlakeError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error, details and suggestion to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into a user-friendly [`ErrorContext`].
///
/// The error chain is searched for a [`FlakeError`]; when one is found its
/// variant decides the suggestion. The outermost message is kept as the
/// error text so context attached with `.with_context()` is not lost.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(flake_error) = error.downcast_ref::<FlakeError>() {
        return create_error_context(flake_error);
    }

    let mut current: &dyn std::error::Error = error.as_ref();
    loop {
        if let Some(flake_error) = current.downcast_ref::<FlakeError>() {
            let context = create_error_context(flake_error);
            let details = match context.details {
                Some(details) => format!("{}\n{details}", chain_description(&error)),
                None => chain_description(&error),
            };
            return ErrorContext {
                error: FlakeError::Other {
                    message: error.to_string(),
                },
                suggestion: context.suggestion,
                details: Some(details),
            };
        }

        match current.source() {
            Some(source) => current = source,
            None => break,
        }
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>()
        && io_error.kind() == std::io::ErrorKind::PermissionDenied
    {
        return ErrorContext::new(FlakeError::Other {
            message: error.to_string(),
        })
        .with_suggestion("Check file permissions on the store, cache and registry directories");
    }

    let mut context = ErrorContext::new(FlakeError::Other {
        message: error.to_string(),
    });
    if error.chain().count() > 1 {
        context = context.with_details(chain_description(&error));
    }
    context
}

fn chain_description(error: &anyhow::Error) -> String {
    let mut description = String::from("Caused by:");
    for cause in error.chain().skip(1) {
        description.push_str(&format!("\n  {cause}"));
    }
    description
}

fn create_error_context(error: &FlakeError) -> ErrorContext {
    let context = ErrorContext::new(error.clone());
    match error {
        FlakeError::GitNotFound => context
            .with_suggestion("Install git from https://git-scm.com/ or your package manager")
            .with_details("Git and path flakes are exported with the system git binary"),

        FlakeError::GitCommandError {
            operation,
            stderr,
        } => {
            let suggestion = match operation.as_str() {
                "fetch" => "Check your internet connection and repository access",
                "archive" | "rev-parse" => "Verify the branch, tag, or revision exists",
                "clone" => "Verify the repository URL and your network connection",
                _ => "Ensure git is properly configured and try again",
            };
            context
                .with_suggestion(suggestion)
                .with_details(format!("Git {operation} operation failed: {stderr}"))
        }

        FlakeError::GitCloneFailed {
            url,
            reason,
        } => context
            .with_suggestion(format!("Verify the repository URL is correct: {url}"))
            .with_details(reason.clone()),

        FlakeError::ImpureFetch {
            ..
        } => context
            .with_suggestion("Pin the reference to a revision, or pass --impure for the top-level flake")
            .with_details(
                "Pure evaluation only fetches references with a fixed revision. Lock file entries must always be pinned",
            ),

        FlakeError::RegistryCycle {
            ..
        } => context
            .with_suggestion("Edit the registries so the aliases above do not point at each other")
            .with_details("Registries are consulted in order: global, user, local, command line"),

        FlakeError::UnresolvedAlias {
            similar,
            ..
        } => {
            let context = context.with_suggestion(
                "Add the alias with 'flakelock registry add <alias> <ref>' or use a direct reference",
            );
            if similar.is_empty() {
                context
            } else {
                context.with_details(format!("Did you mean: {}", similar.join(", ")))
            }
        }

        FlakeError::UnsupportedVersion {
            ..
        } => context
            .with_suggestion("Regenerate the file with this version of flakelock")
            .with_details("Only version 1 registries and lock files are understood"),

        FlakeError::LockFileParseError {
            file,
            ..
        } => context
            .with_suggestion(format!(
                "Check the JSON syntax in {file}, or delete it and run 'flakelock lock' to regenerate it"
            )),

        FlakeError::RegistryParseError {
            file,
            ..
        } => context.with_suggestion(format!("Check the JSON syntax in {file}")),

        FlakeError::MissingEtag {
            ..
        }
        | FlakeError::InvalidEtag {
            ..
        } => context
            .with_suggestion("Retry later; the hosting service did not identify the revision it served")
            .with_details("The ETag of a tarball download is used as the fetched revision"),

        FlakeError::NotARepository {
            path,
        } => context.with_suggestion(format!("Run 'git init' in {path} and commit the flake")),

        FlakeError::MissingAttribute {
            attribute,
            ..
        } => context.with_suggestion(format!("Add a '{attribute}' entry to flake.toml")),

        FlakeError::NetworkError {
            reason,
            ..
        } => context
            .with_suggestion("Check your internet connection")
            .with_details(reason.clone()),

        _ => context,
    }
}
