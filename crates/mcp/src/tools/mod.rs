pub mod terminal;
mod registry;

pub use registry::{coerce_text, FnTool, RegistryError, Tool, ToolRegistry, DEFAULT_DESCRIPTION};
pub use terminal::{register_terminal_tools, ListFilesTool, RunCommandTool};
