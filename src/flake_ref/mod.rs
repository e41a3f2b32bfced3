//! Flake references.
//!
//! A [`FlakeRef`] names where a flake lives. It is a closed set of source
//! kinds ([`FlakeRefData`]) plus two optional selectors shared by all of
//! them: a symbolic `ref` (branch or tag) and a pinned `rev`.
//!
//! # Text Syntax
//!
//! | Form | Kind |
//! |------|------|
//! | `nixpkgs`, `flake:nixpkgs/release/<rev>` | alias, resolved through registries |
//! | `github:owner/repo[/ref][/rev]` | hosted repository shorthand |
//! | `git+https://host/repo?ref=main&rev=<rev>` | arbitrary Git URL |
//! | `/absolute/path` | local Git working tree |
//!
//! A path segment of exactly 40 hex characters is always read as a revision.
//!
//! ```rust
//! use flakelock::flake_ref::FlakeRef;
//!
//! let r: FlakeRef = "github:edolstra/dwarffs/1.0".parse().unwrap();
//! assert!(r.is_direct());
//! assert!(!r.is_immutable());
//! assert_eq!(r.base_ref().to_string(), "github:edolstra/dwarffs");
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::FlakeError;

static ALIAS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:flake:)?([a-zA-Z][a-zA-Z0-9_-]*)(?:/([^/\s?#]+))?(?:/([^/\s?#]+))?$")
        .expect("alias regex is valid")
});

static GITHUB_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^github:([a-zA-Z0-9][a-zA-Z0-9_.-]*)/([a-zA-Z0-9_.-]+)(?:/([^/\s?#]+))?(?:/([^/\s?#]+))?$",
    )
    .expect("github regex is valid")
});

static GIT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:git\+)?((?:https?|ssh|git|file)://[^?#\s]+)(?:\?([^#\s]*))?$")
        .expect("git regex is valid")
});

static REF_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9_.\-/+@]*$").expect("ref regex is valid")
});

/// A pinned 160-bit revision, written as 40 hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rev([u8; 20]);

impl Rev {
    /// Build a revision from its raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// The raw revision bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Whether `s` has the shape of a revision (exactly 40 hex digits).
    #[must_use]
    pub fn looks_like_rev(s: &str) -> bool {
        s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl FromStr for Rev {
    type Err = FlakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !Self::looks_like_rev(s) {
            return Err(FlakeError::InvalidFlakeRef {
                input: s.to_string(),
                reason: "a revision must be exactly 40 hexadecimal characters".to_string(),
            });
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| FlakeError::InvalidFlakeRef {
            input: s.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Rev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Rev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rev({self})")
    }
}

impl Serialize for Rev {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rev {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The source kind of a [`FlakeRef`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlakeRefData {
    /// A symbolic name that must be looked up in the registries.
    Alias {
        /// The alias, e.g. `nixpkgs`
        id: String,
    },
    /// An arbitrary Git repository URL.
    Git {
        /// The repository URL without the `git+` prefix or query
        uri: String,
    },
    /// A repository on GitHub.
    GitHub {
        /// Repository owner
        owner: String,
        /// Repository name
        repo: String,
    },
    /// A local Git working tree.
    Path {
        /// Absolute path of the working tree
        path: PathBuf,
    },
}

/// A reference to a flake: a source plus optional `ref` and `rev` selectors.
///
/// Equality is structural, so two references that differ only in their
/// selectors are different keys in a registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlakeRef {
    /// Where the flake lives
    pub data: FlakeRefData,
    /// Branch or tag to fetch
    pub git_ref: Option<String>,
    /// Pinned revision to fetch
    pub rev: Option<Rev>,
}

impl FlakeRef {
    fn from_data(data: FlakeRefData) -> Self {
        Self {
            data,
            git_ref: None,
            rev: None,
        }
    }

    /// An alias reference.
    pub fn alias(id: impl Into<String>) -> Self {
        Self::from_data(FlakeRefData::Alias {
            id: id.into(),
        })
    }

    /// A GitHub reference.
    pub fn github(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self::from_data(FlakeRefData::GitHub {
            owner: owner.into(),
            repo: repo.into(),
        })
    }

    /// A Git URL reference.
    pub fn git(uri: impl Into<String>) -> Self {
        Self::from_data(FlakeRefData::Git {
            uri: uri.into(),
        })
    }

    /// A local path reference.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::from_data(FlakeRefData::Path {
            path: path.into(),
        })
    }

    /// A `file://` Git reference to a local directory.
    ///
    /// Unlike [`FlakeRef::path`] this goes through the Git exporter directly
    /// without requiring a `.git` directory check up front. Directories whose
    /// path contains whitespace, `?` or `#` cannot be written as a Git URL and
    /// are rejected.
    pub fn file_uri(dir: &Path) -> Result<Self, FlakeError> {
        let uri = format!("file://{}", dir.display());
        if uri.contains(|c: char| c.is_whitespace() || c == '?' || c == '#') {
            return Err(Self::invalid(&uri, "directory path contains whitespace, '?' or '#'"));
        }
        Ok(Self::git(uri))
    }

    /// Return a copy with the given branch or tag.
    #[must_use]
    pub fn with_ref(mut self, git_ref: impl Into<String>) -> Self {
        self.git_ref = Some(git_ref.into());
        self
    }

    /// Return a copy pinned to the given revision.
    #[must_use]
    pub fn with_rev(mut self, rev: Rev) -> Self {
        self.rev = Some(rev);
        self
    }

    /// Whether the reference pins an exact revision.
    #[must_use]
    pub const fn is_immutable(&self) -> bool {
        self.rev.is_some()
    }

    /// Whether the reference names a source directly rather than through an alias.
    #[must_use]
    pub const fn is_direct(&self) -> bool {
        !matches!(self.data, FlakeRefData::Alias { .. })
    }

    /// The same source with both selectors removed.
    #[must_use]
    pub fn base_ref(&self) -> Self {
        Self::from_data(self.data.clone())
    }

    fn invalid(input: &str, reason: impl Into<String>) -> FlakeError {
        FlakeError::InvalidFlakeRef {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    /// Split up to two trailing path segments into `(ref, rev)`.
    fn parse_selectors(
        input: &str,
        first: Option<&str>,
        second: Option<&str>,
    ) -> Result<(Option<String>, Option<Rev>), FlakeError> {
        match (first, second) {
            (None, _) => Ok((None, None)),
            (Some(segment), None) if Rev::looks_like_rev(segment) => {
                Ok((None, Some(segment.parse()?)))
            }
            (Some(segment), None) => Ok((Some(Self::parse_git_ref(input, segment)?), None)),
            (Some(git_ref), Some(rev)) => {
                if !Rev::looks_like_rev(rev) {
                    return Err(Self::invalid(input, format!("'{rev}' is not a revision")));
                }
                Ok((Some(Self::parse_git_ref(input, git_ref)?), Some(rev.parse()?)))
            }
        }
    }

    fn parse_git_ref(input: &str, git_ref: &str) -> Result<String, FlakeError> {
        if REF_REGEX.is_match(git_ref) && !git_ref.contains("..") {
            Ok(git_ref.to_string())
        } else {
            Err(Self::invalid(input, format!("'{git_ref}' is not a valid branch or tag name")))
        }
    }

    fn parse_query(input: &str, query: &str) -> Result<(Option<String>, Option<Rev>), FlakeError> {
        let mut git_ref = None;
        let mut rev = None;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Self::invalid(input, format!("malformed query parameter '{pair}'")))?;
            match key {
                "ref" => git_ref = Some(Self::parse_git_ref(input, value)?),
                "rev" => rev = Some(value.parse()?),
                other => {
                    return Err(Self::invalid(input, format!("unsupported parameter '{other}'")));
                }
            }
        }
        Ok((git_ref, rev))
    }
}

impl FromStr for FlakeRef {
    type Err = FlakeError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.starts_with('/') {
            if input.contains(['?', '#']) {
                return Err(Self::invalid(input, "path references cannot carry a ref or rev"));
            }
            let trimmed = if input.len() > 1 {
                input.trim_end_matches('/')
            } else {
                input
            };
            return Ok(Self::path(trimmed));
        }

        if let Some(caps) = GITHUB_REGEX.captures(input) {
            let (git_ref, rev) = Self::parse_selectors(
                input,
                caps.get(3).map(|m| m.as_str()),
                caps.get(4).map(|m| m.as_str()),
            )?;
            return Ok(Self {
                data: FlakeRefData::GitHub {
                    owner: caps[1].to_string(),
                    repo: caps[2].to_string(),
                },
                git_ref,
                rev,
            });
        }
        if input.starts_with("github:") {
            return Err(Self::invalid(input, "expected github:<owner>/<repo>[/<ref>][/<rev>]"));
        }

        if let Some(caps) = GIT_REGEX.captures(input) {
            let (git_ref, rev) = match caps.get(2) {
                Some(query) => Self::parse_query(input, query.as_str())?,
                None => (None, None),
            };
            return Ok(Self {
                data: FlakeRefData::Git {
                    uri: caps[1].to_string(),
                },
                git_ref,
                rev,
            });
        }

        if let Some(caps) = ALIAS_REGEX.captures(input) {
            let (git_ref, rev) = Self::parse_selectors(
                input,
                caps.get(2).map(|m| m.as_str()),
                caps.get(3).map(|m| m.as_str()),
            )?;
            return Ok(Self {
                data: FlakeRefData::Alias {
                    id: caps[1].to_string(),
                },
                git_ref,
                rev,
            });
        }

        Err(Self::invalid(input, "unrecognised flake reference syntax"))
    }
}

impl fmt::Display for FlakeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            FlakeRefData::Alias {
                id,
            } => write!(f, "{id}")?,
            FlakeRefData::GitHub {
                owner,
                repo,
            } => write!(f, "github:{owner}/{repo}")?,
            FlakeRefData::Path {
                path,
            } => return write!(f, "{}", path.display()),
            FlakeRefData::Git {
                uri,
            } => {
                write!(f, "{uri}")?;
                let mut separator = '?';
                if let Some(git_ref) = &self.git_ref {
                    write!(f, "{separator}ref={git_ref}")?;
                    separator = '&';
                }
                if let Some(rev) = &self.rev {
                    write!(f, "{separator}rev={rev}")?;
                }
                return Ok(());
            }
        }
        if let Some(git_ref) = &self.git_ref {
            write!(f, "/{git_ref}")?;
        }
        if let Some(rev) = &self.rev {
            write!(f, "/{rev}")?;
        }
        Ok(())
    }
}

impl Serialize for FlakeRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FlakeRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
