//! Values of the bundled evaluator.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

/// A value produced by [`super::TomlEvaluator`].
///
/// Attribute sets are shared and mutable so the projected flake set can be
/// filled in after the thunks referring to it are created. That makes the set
/// and its `provides` thunks a reference cycle which is never freed; values
/// live for one resolution only.
#[derive(Clone)]
pub enum Value {
    /// A string with the store paths it depends on
    String {
        /// Text
        value: String,
        /// Store paths the text was derived from
        context: BTreeSet<PathBuf>,
    },
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// Boolean
    Bool(bool),
    /// List
    List(Vec<Value>),
    /// Attribute set
    Attrs(Rc<RefCell<BTreeMap<String, Value>>>),
    /// A callable
    Lambda(Rc<Lambda>),
    /// A suspended function application
    Thunk(Rc<Thunk>),
}

/// A function: a template rendered against its argument.
#[derive(Debug)]
pub struct Lambda {
    /// The `tera` template source
    pub template: String,
    /// The file the function was defined in, used in error messages
    pub origin: PathBuf,
}

/// A pending application, evaluated at most once.
pub struct Thunk {
    pub(crate) function: Value,
    pub(crate) arg: Value,
    pub(crate) result: RefCell<Option<Value>>,
    pub(crate) forcing: Cell<bool>,
}

impl Value {
    /// A string without context.
    pub fn string(value: impl Into<String>) -> Self {
        Self::String {
            value: value.into(),
            context: BTreeSet::new(),
        }
    }

    /// An empty attribute set.
    pub fn attrs() -> Self {
        Self::Attrs(Rc::new(RefCell::new(BTreeMap::new())))
    }

    pub(crate) fn thunk(function: Value, arg: Value) -> Self {
        Self::Thunk(Rc::new(Thunk {
            function,
            arg,
            result: RefCell::new(None),
            forcing: Cell::new(false),
        }))
    }

    /// Name of the value's type for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String {
                ..
            } => "a string",
            Self::Int(_) => "an integer",
            Self::Float(_) => "a float",
            Self::Bool(_) => "a Boolean",
            Self::List(_) => "a list",
            Self::Attrs(_) => "a set",
            Self::Lambda(_) => "a function",
            Self::Thunk(_) => "a thunk",
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::string(""),
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Self::string(s),
            serde_json::Value::Array(items) => Self::List(items.into_iter().map(Into::into).collect()),
            serde_json::Value::Object(map) => Self::Attrs(Rc::new(RefCell::new(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ))),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String {
                value,
                ..
            } => write!(f, "{value:?}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::List(items) => f.debug_list().entries(items).finish(),
            // Sets may be cyclic, so only their names are shown
            Self::Attrs(attrs) => f.debug_set().entries(attrs.borrow().keys()).finish(),
            Self::Lambda(lambda) => write!(f, "<lambda from {}>", lambda.origin.display()),
            Self::Thunk(_) => write!(f, "<thunk>"),
        }
    }
}
