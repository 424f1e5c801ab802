use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ArgSpec, Tool, ToolError, ToolRegistry, ToolSpec};
use crate::core::coerce::{format_number, ArgType, TypedArgs};

/// Registry with the arithmetic and workspace file tools.
pub fn default_registry(workspace_dir: PathBuf) -> ToolRegistry {
    ToolRegistry::new()
        .with(ToolSpec::from_fn(
            "add",
            "Adds two numbers",
            number_pair(),
            |args| Ok(format_number(args.number("a") + args.number("b"))),
        ))
        .with(ToolSpec::from_fn(
            "multiply",
            "Multiplies two numbers",
            number_pair(),
            |args| Ok(format_number(args.number("a") * args.number("b"))),
        ))
        .with(ToolSpec::new(
            "read_file",
            "Read the contents of a file.",
            vec![ArgSpec::required(
                "filename",
                ArgType::String,
                "The name of the file to read",
            )],
            ReadFile {
                workspace: workspace_dir.clone(),
            },
        ))
        .with(ToolSpec::new(
            "write_file",
            "Write content to a file.",
            vec![
                ArgSpec::required("filename", ArgType::String, "The name of the file to write"),
                ArgSpec::required(
                    "content",
                    ArgType::String,
                    "The content to write to the file",
                ),
            ],
            WriteFile {
                workspace: workspace_dir,
            },
        ))
}

fn number_pair() -> Vec<ArgSpec> {
    vec![
        ArgSpec::required("a", ArgType::Number, "A number"),
        ArgSpec::required("b", ArgType::Number, "A number"),
    ]
}

/// Resolve `filename` inside `workspace`, refusing absolute paths and any
/// parent-directory component.
pub fn resolve_in_workspace(workspace: &Path, filename: &str) -> Result<PathBuf, ToolError> {
    let relative = Path::new(filename);
    let escapes = filename.trim().is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ToolError::InvalidPath(filename.to_string()));
    }
    Ok(workspace.join(relative))
}

fn filename_arg(args: &TypedArgs) -> &str {
    args.text("filename").unwrap_or_default()
}

struct ReadFile {
    workspace: PathBuf,
}

#[async_trait]
impl Tool for ReadFile {
    async fn invoke(&self, args: &TypedArgs) -> Result<String, ToolError> {
        let path = resolve_in_workspace(&self.workspace, filename_arg(args))?;
        debug!(path = %path.display(), "Reading workspace file");
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ToolError::Io { path, source })
    }
}

struct WriteFile {
    workspace: PathBuf,
}

#[async_trait]
impl Tool for WriteFile {
    async fn invoke(&self, args: &TypedArgs) -> Result<String, ToolError> {
        let filename = filename_arg(args);
        let path = resolve_in_workspace(&self.workspace, filename)?;
        let content = args.text("content").unwrap_or_default();
        debug!(path = %path.display(), bytes = content.len(), "Writing workspace file");

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ToolError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| ToolError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(format!("Contents were written to file {filename}."))
    }
}
