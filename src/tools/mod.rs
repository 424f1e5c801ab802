//! Locally registered tools the model may call.
//!
//! A [`ToolRegistry`] is built once at startup and never mutated afterwards.
//! Each [`ToolSpec`] carries the argument types used for coercion and the
//! description embedded in the system prompt.

pub mod builtin;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::core::coerce::{ArgType, TypedArgs};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("path '{0}' is outside the workspace")]
    InvalidPath(String),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait Tool: Send + Sync {
    async fn invoke(&self, args: &TypedArgs) -> Result<String, ToolError>;
}

struct FnTool<F>(F);

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(&TypedArgs) -> Result<String, ToolError> + Send + Sync,
{
    async fn invoke(&self, args: &TypedArgs) -> Result<String, ToolError> {
        (self.0)(args)
    }
}

#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: String,
    pub ty: ArgType,
    pub description: String,
    pub required: bool,
}

impl ArgSpec {
    pub fn required(name: &str, ty: ArgType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            ty,
            description: description.to_string(),
            required: true,
        }
    }
}

#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub args: Vec<ArgSpec>,
    handler: Arc<dyn Tool>,
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl ToolSpec {
    pub fn new(
        name: &str,
        description: &str,
        args: Vec<ArgSpec>,
        handler: impl Tool + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            args,
            handler: Arc::new(handler),
        }
    }

    /// Wrap a synchronous function as a tool.
    pub fn from_fn<F>(name: &str, description: &str, args: Vec<ArgSpec>, f: F) -> Self
    where
        F: Fn(&TypedArgs) -> Result<String, ToolError> + Send + Sync + 'static,
    {
        Self::new(name, description, args, FnTool(f))
    }

    pub fn declared_types(&self) -> impl Iterator<Item = (&str, ArgType)> {
        self.args.iter().map(|arg| (arg.name.as_str(), arg.ty))
    }

    pub async fn invoke(&self, args: &TypedArgs) -> Result<String, ToolError> {
        self.handler.invoke(args).await
    }

    /// JSON description shown to the model.
    pub fn describe(&self) -> String {
        let mut parameters = Map::new();
        for arg in &self.args {
            parameters.insert(
                arg.name.clone(),
                json!({
                    "param_type": arg.ty.as_str(),
                    "description": arg.description,
                    "required": arg.required,
                }),
            );
        }
        let description = json!({
            "name": self.name,
            "description": self.description,
            "parameters": Value::Object(parameters),
        });
        description.to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool; a later tool with the same name replaces the earlier one.
    pub fn with(mut self, spec: ToolSpec) -> Self {
        match self.tools.iter_mut().find(|t| t.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.tools.push(spec),
        }
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn describe_all(&self) -> Vec<String> {
        self.tools.iter().map(ToolSpec::describe).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
