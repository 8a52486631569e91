// Terminal tools: shell command execution and directory listing

use crate::tools::{Tool, ToolRegistry};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use toolbridge_core::schema::{json_schema_object, json_schema_string};
use toolbridge_core::Arguments;

/// Wall-clock limit for a single shell command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Register `run_command` and `list_files` on a registry.
pub fn register_terminal_tools(registry: &mut ToolRegistry, project_dir: PathBuf) {
    registry.register_with_schema(
        "run_command",
        Arc::new(RunCommandTool::new()),
        "Execute a shell command and return its output.",
        json_schema_object(
            serde_json::json!({
                "command": json_schema_string("Shell command line to execute")
            }),
            vec!["command"],
        ),
    );
    registry.register_with_schema(
        "list_files",
        Arc::new(ListFilesTool::new(project_dir)),
        "List all files and folders in a given path. Defaults to the project directory.",
        json_schema_object(
            serde_json::json!({
                "path": json_schema_string("Directory to list (defaults to the project directory)")
            }),
            vec![],
        ),
    );
}

/// Tool running a command line through the platform shell
pub struct RunCommandTool {
    timeout: Duration,
}

impl RunCommandTool {
    pub fn new() -> Self {
        Self {
            timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn shell(command: &str) -> tokio::process::Command {
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = tokio::process::Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut cmd = tokio::process::Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        };
        cmd.stdin(std::process::Stdio::null()).kill_on_drop(true);
        cmd
    }

    async fn run(&self, command: &str) -> String {
        tracing::info!(command = %command, "Executing command");

        let output = match tokio::time::timeout(self.timeout, Self::shell(command).output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Command execution failed");
                return format!("Command execution failed: {}", e);
            }
            Err(_) => {
                return format!(
                    "Error: Command timed out after {} seconds",
                    self.timeout.as_secs()
                )
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut sections = Vec::new();
        if !stdout.is_empty() {
            sections.push(format!("STDOUT:\n{}", stdout));
        }
        if !stderr.is_empty() {
            sections.push(format!("STDERR:\n{}", stderr));
        }
        if !output.status.success() {
            match output.status.code() {
                Some(code) => sections.push(format!("Exit code: {}", code)),
                None => sections.push("Exit code: terminated by signal".to_string()),
            }
        }

        if sections.is_empty() {
            return "(Command executed successfully, no output)".to_string();
        }
        sections.join("\n\n")
    }
}

impl Default for RunCommandTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct RunCommandArgs {
    command: String,
}

#[async_trait::async_trait]
impl Tool for RunCommandTool {
    async fn call(&self, arguments: Arguments) -> Result<Value> {
        let args: RunCommandArgs = serde_json::from_value(Value::Object(arguments))
            .context("Invalid arguments for run_command")?;

        Ok(Value::String(self.run(&args.command).await))
    }
}

/// Tool listing the entries of a directory
pub struct ListFilesTool {
    default_dir: PathBuf,
}

impl ListFilesTool {
    pub fn new(default_dir: PathBuf) -> Self {
        Self { default_dir }
    }

    /// Absolute form of `path` with `.` and `..` folded away lexically.
    fn absolute(path: &Path) -> Result<PathBuf> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .context("Failed to resolve working directory")?
                .join(path)
        };
        Ok(normalize(&joined))
    }

    async fn list(&self, target: &Path) -> Result<String> {
        let abs_path = Self::absolute(target)?;
        tracing::info!(path = %abs_path.display(), "Listing files");

        let metadata = match tokio::fs::metadata(&abs_path).await {
            Ok(metadata) => metadata,
            Err(_) => return Ok(format!("Error: Path does not exist: {}", abs_path.display())),
        };
        if !metadata.is_dir() {
            return Ok(format!(
                "Error: Path is not a directory: {}",
                abs_path.display()
            ));
        }

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&abs_path)
            .await
            .with_context(|| format!("Failed to read directory {}", abs_path.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            // Follows symlinks, so a link to a directory lists as a directory.
            let is_dir = tokio::fs::metadata(entry.path())
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if is_dir {
                dirs.push(name);
            } else {
                files.push(name);
            }
        }

        if dirs.is_empty() && files.is_empty() {
            return Ok(format!("(Empty directory: {})", abs_path.display()));
        }

        dirs.sort();
        files.sort();

        let mut lines = vec![format!("Contents of: {}", abs_path.display()), String::new()];
        lines.extend(dirs.iter().map(|d| format!("[DIR]  {}", d)));
        lines.extend(files.iter().map(|f| format!("[FILE] {}", f)));
        lines.push(format!(
            "\nTotal: {} directories, {} files",
            dirs.len(),
            files.len()
        ));

        Ok(lines.join("\n"))
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            // Popping at the root is a no-op, so `/..` stays `/`.
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[derive(Debug, Deserialize)]
struct ListFilesArgs {
    #[serde(default)]
    path: Option<String>,
}

#[async_trait::async_trait]
impl Tool for ListFilesTool {
    async fn call(&self, arguments: Arguments) -> Result<Value> {
        let args: ListFilesArgs = serde_json::from_value(Value::Object(arguments))
            .context("Invalid arguments for list_files")?;

        let target = match args.path.as_deref() {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => self.default_dir.clone(),
        };

        match self.list(&target).await {
            Ok(text) => Ok(Value::String(text)),
            Err(e) => {
                tracing::error!(error = %e, "List files failed");
                Ok(Value::String(format!("Error: {:#}", e)))
            }
        }
    }
}
