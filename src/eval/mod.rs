//! The evaluator boundary.
//!
//! Resolution never interprets flake descriptions itself. It reads them and
//! builds projected values through the [`Evaluator`] trait, treating values
//! as opaque handles owned by the evaluator. In particular the `provides`
//! attribute of a flake is only checked to be callable and later applied to
//! the projected set with [`Evaluator::mk_app`].
//!
//! [`TomlEvaluator`] is the bundled implementation. It reads `flake.toml`
//! files and represents functions as [`tera`] templates.

mod evaluator;
mod value;

use anyhow::Result;
use std::path::{Path, PathBuf};

pub use evaluator::TomlEvaluator;
pub use value::{Lambda, Value};

/// Operations the resolver needs from a description-language evaluator.
///
/// Accessors that force values may fail with evaluation errors; constructors
/// never fail.
pub trait Evaluator {
    /// The evaluator's value handle.
    type Value: Clone;

    /// Evaluate the file at `path` into a value.
    fn eval_file(&self, path: &Path) -> Result<Self::Value>;

    /// Look up `name` in an attribute set, forcing `value` first.
    fn get_attr(&self, value: &Self::Value, name: &str) -> Result<Option<Self::Value>>;

    /// Force `value` to a string.
    fn force_string(&self, value: &Self::Value) -> Result<String>;

    /// Force `value` to a list.
    fn force_list(&self, value: &Self::Value) -> Result<Vec<Self::Value>>;

    /// Force `value` to an attribute set, returned in name order.
    fn force_attrs(&self, value: &Self::Value) -> Result<Vec<(String, Self::Value)>>;

    /// Check that `value` is callable.
    fn force_function(&self, value: &Self::Value) -> Result<()>;

    /// A string tied to the store paths it was derived from.
    fn mk_string(&self, s: &str, context: &[PathBuf]) -> Self::Value;

    /// An integer.
    fn mk_int(&self, n: i64) -> Self::Value;

    /// A fresh, empty attribute set.
    fn alloc_attrs(&self) -> Self::Value;

    /// Insert `value` under `name` into an attribute set made by [`Evaluator::alloc_attrs`].
    fn set_attr(&self, attrs: &Self::Value, name: &str, value: Self::Value) -> Result<()>;

    /// The lazy application of `function` to `arg`.
    fn mk_app(&self, function: &Self::Value, arg: &Self::Value) -> Self::Value;
}
