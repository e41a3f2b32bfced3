//! A minimal evaluator for `flake.toml` descriptions.
//!
//! TOML maps directly onto [`Value`]. A table of the form
//! `{ lambda = "<template>" }` is a function: applying it renders the
//! template with [`tera`], using the argument converted to JSON as the
//! template context. Top-level attributes of the argument are available as
//! variables and the whole argument as `args`. When the rendered text is
//! valid JSON it becomes structured data, otherwise it is a string.
//!
//! ```toml
//! name = "hello"
//! requires = ["nixpkgs"]
//!
//! [provides]
//! lambda = '{"bin": "{{ hello.outPath }}/bin/hello"}'
//! ```
//!
//! Applications are lazy. While a thunk is being forced it renders as
//! `null` to any template that sees it, so flakes can reference the set they
//! are part of without looping forever.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tera::{Context as TeraContext, Tera};

use super::value::{Lambda, Thunk, Value};
use super::Evaluator;
use crate::constants::MAX_EVAL_DEPTH;
use crate::core::FlakeError;

/// [`Evaluator`] over TOML files with template functions.
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlEvaluator;

fn eval_error(message: impl Into<String>) -> anyhow::Error {
    FlakeError::EvalError {
        message: message.into(),
    }
    .into()
}

fn type_error(value: &Value, expected: &str) -> anyhow::Error {
    eval_error(format!("value is {} while {expected} was expected", value.type_name()))
}

/// Strip tera's internal template name from its error chain.
fn format_tera_error(error: &tera::Error) -> String {
    use std::error::Error;

    let mut messages = vec![error.to_string()];
    let mut source = error.source();
    while let Some(err) = source {
        messages.push(err.to_string());
        source = err.source();
    }
    messages
        .iter()
        .map(|msg| {
            msg.replace("Failed to render '__tera_one_off'", "")
                .replace("Failed to parse '__tera_one_off'", "")
                .replace("'__tera_one_off'", "template")
                .trim()
                .to_string()
        })
        .filter(|msg| !msg.is_empty())
        .collect::<Vec<_>>()
        .join(": ")
}

impl TomlEvaluator {
    /// Create an evaluator.
    pub const fn new() -> Self {
        Self
    }

    fn from_toml(value: toml::Value, origin: &Path) -> Value {
        match value {
            toml::Value::String(s) => Value::string(s),
            toml::Value::Integer(i) => Value::Int(i),
            toml::Value::Float(f) => Value::Float(f),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::string(dt.to_string()),
            toml::Value::Array(items) => {
                Value::List(items.into_iter().map(|v| Self::from_toml(v, origin)).collect())
            }
            toml::Value::Table(table) => {
                if table.len() == 1
                    && let Some(toml::Value::String(template)) = table.get("lambda")
                {
                    return Value::Lambda(Rc::new(Lambda {
                        template: template.clone(),
                        origin: origin.to_path_buf(),
                    }));
                }
                let attrs = Value::attrs();
                if let Value::Attrs(map) = &attrs {
                    let mut map = map.borrow_mut();
                    for (name, v) in table {
                        map.insert(name, Self::from_toml(v, origin));
                    }
                }
                attrs
            }
        }
    }

    /// Force thunks until `value` is in weak head normal form.
    fn force(&self, value: &Value, depth: usize) -> Result<Value> {
        match value {
            Value::Thunk(thunk) => self.force_thunk(thunk, depth),
            other => Ok(other.clone()),
        }
    }

    fn force_thunk(&self, thunk: &Thunk, depth: usize) -> Result<Value> {
        if let Some(result) = thunk.result.borrow().as_ref() {
            return Ok(result.clone());
        }
        if thunk.forcing.get() || depth > MAX_EVAL_DEPTH {
            return Err(eval_error("infinite recursion encountered"));
        }

        thunk.forcing.set(true);
        let result = self.apply(&thunk.function, &thunk.arg, depth + 1);
        thunk.forcing.set(false);

        let result = self.force(&result?, depth + 1)?;
        *thunk.result.borrow_mut() = Some(result.clone());
        Ok(result)
    }

    fn apply(&self, function: &Value, arg: &Value, depth: usize) -> Result<Value> {
        let function = self.force(function, depth)?;
        let Value::Lambda(lambda) = &function else {
            return Err(eval_error(format!(
                "attempt to call something which is not a function but {}",
                function.type_name()
            )));
        };

        let mut string_context = BTreeSet::new();
        let json = self.to_json_inner(arg, depth, &mut string_context)?;

        let mut context = match &json {
            serde_json::Value::Object(_) => TeraContext::from_value(json.clone())
                .map_err(|e| eval_error(format_tera_error(&e)))?,
            _ => TeraContext::new(),
        };
        context.insert("args", &json);

        let rendered = Tera::one_off(&lambda.template, &context, false).map_err(|e| {
            eval_error(format!(
                "in function defined in '{}': {}",
                lambda.origin.display(),
                format_tera_error(&e)
            ))
        })?;

        Ok(match serde_json::from_str::<serde_json::Value>(rendered.trim()) {
            Ok(structured @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => {
                structured.into()
            }
            _ => Value::String {
                value: rendered,
                context: string_context,
            },
        })
    }

    fn to_json_inner(
        &self,
        value: &Value,
        depth: usize,
        string_context: &mut BTreeSet<PathBuf>,
    ) -> Result<serde_json::Value> {
        if depth > MAX_EVAL_DEPTH {
            return Err(eval_error("value is too deeply nested"));
        }
        Ok(match value {
            Value::String {
                value,
                context,
            } => {
                string_context.extend(context.iter().cloned());
                serde_json::Value::String(value.clone())
            }
            Value::Int(i) => (*i).into(),
            Value::Float(f) => (*f).into(),
            Value::Bool(b) => (*b).into(),
            Value::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| self.to_json_inner(v, depth + 1, string_context))
                    .collect::<Result<_>>()?,
            ),
            Value::Attrs(attrs) => {
                let entries: Vec<(String, Value)> =
                    attrs.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                let mut map = serde_json::Map::new();
                for (name, v) in entries {
                    map.insert(name, self.to_json_inner(&v, depth + 1, string_context)?);
                }
                serde_json::Value::Object(map)
            }
            Value::Lambda(_) => serde_json::Value::Null,
            Value::Thunk(thunk) if thunk.forcing.get() => {
                tracing::trace!("Thunk under evaluation rendered as null");
                serde_json::Value::Null
            }
            Value::Thunk(thunk) => {
                let forced = self.force_thunk(thunk, depth + 1)?;
                self.to_json_inner(&forced, depth + 1, string_context)?
            }
        })
    }

    /// Deeply force `value` and convert it to JSON. Functions become `null`.
    pub fn to_json(&self, value: &Value) -> Result<serde_json::Value> {
        self.to_json_inner(value, 0, &mut BTreeSet::new())
    }
}

impl Evaluator for TomlEvaluator {
    type Value = Value;

    fn eval_file(&self, path: &Path) -> Result<Value> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let table: toml::Value = toml::from_str(&content)
            .map_err(FlakeError::from)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Self::from_toml(table, path))
    }

    fn get_attr(&self, value: &Value, name: &str) -> Result<Option<Value>> {
        match self.force(value, 0)? {
            Value::Attrs(attrs) => Ok(attrs.borrow().get(name).cloned()),
            other => Err(type_error(&other, "a set")),
        }
    }

    fn force_string(&self, value: &Value) -> Result<String> {
        match self.force(value, 0)? {
            Value::String {
                value,
                ..
            } => Ok(value),
            other => Err(type_error(&other, "a string")),
        }
    }

    fn force_list(&self, value: &Value) -> Result<Vec<Value>> {
        match self.force(value, 0)? {
            Value::List(items) => Ok(items),
            other => Err(type_error(&other, "a list")),
        }
    }

    fn force_attrs(&self, value: &Value) -> Result<Vec<(String, Value)>> {
        match self.force(value, 0)? {
            Value::Attrs(attrs) => {
                Ok(attrs.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            other => Err(type_error(&other, "a set")),
        }
    }

    fn force_function(&self, value: &Value) -> Result<()> {
        match self.force(value, 0)? {
            Value::Lambda(_) => Ok(()),
            other => Err(type_error(&other, "a function")),
        }
    }

    fn mk_string(&self, s: &str, context: &[PathBuf]) -> Value {
        Value::String {
            value: s.to_string(),
            context: context.iter().cloned().collect(),
        }
    }

    fn mk_int(&self, n: i64) -> Value {
        Value::Int(n)
    }

    fn alloc_attrs(&self) -> Value {
        Value::attrs()
    }

    fn set_attr(&self, attrs: &Value, name: &str, value: Value) -> Result<()> {
        match attrs {
            Value::Attrs(map) => {
                map.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            other => Err(type_error(other, "a set")),
        }
    }

    fn mk_app(&self, function: &Value, arg: &Value) -> Value {
        Value::thunk(function.clone(), arg.clone())
    }
}
