//! Server descriptors and the seam through which they are discovered.

use serde::{Deserialize, Serialize};

/// `command` value marking an entry as a streamable-HTTP endpoint.
pub const HTTP_COMMAND: &str = "streamable_http";

/// How the client reaches a tool host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Spawn `command args...` and speak over its stdin/stdout.
    StdioProcess,
    /// POST to the URL in `args[0]`.
    HttpStream,
}

/// One configured tool host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub name: String,
    pub transport: TransportKind,
    pub command: String,
    pub args: Vec<String>,
}

impl ServerDescriptor {
    /// A host launched as a child process.
    pub fn stdio(
        name: impl Into<String>,
        command: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::StdioProcess,
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// A host reachable at a streamable-HTTP endpoint.
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::HttpStream,
            command: HTTP_COMMAND.to_string(),
            args: vec![url.into()],
        }
    }

    /// Build a descriptor from a configuration entry.
    ///
    /// An entry whose command is `streamable_http` is an HTTP endpoint with
    /// the URL as its first argument; anything else is a process to spawn.
    pub fn from_entry(name: impl Into<String>, entry: ServerEntry) -> Self {
        let transport = if entry.command == HTTP_COMMAND {
            TransportKind::HttpStream
        } else {
            TransportKind::StdioProcess
        };

        Self {
            name: name.into(),
            transport,
            command: entry.command,
            args: entry.args,
        }
    }

    /// Endpoint URL of an HTTP descriptor.
    pub fn url(&self) -> Option<&str> {
        match self.transport {
            TransportKind::HttpStream => self.args.first().map(String::as_str),
            TransportKind::StdioProcess => None,
        }
    }
}

/// A server entry as found in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Turn a name → entry map into descriptors, ordered by name.
pub fn descriptors_from_map<I>(entries: I) -> Vec<ServerDescriptor>
where
    I: IntoIterator<Item = (String, ServerEntry)>,
{
    let mut descriptors: Vec<_> = entries
        .into_iter()
        .map(|(name, entry)| ServerDescriptor::from_entry(name, entry))
        .collect();
    descriptors.sort_by(|a, b| a.name.cmp(&b.name));
    descriptors
}

/// Source of server descriptors.
pub trait Discovery: Send + Sync {
    /// Servers to load, in the order their tools should be merged.
    fn list_servers(&self) -> Vec<ServerDescriptor>;
}

/// Discovery over a fixed list.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    descriptors: Vec<ServerDescriptor>,
}

impl StaticDiscovery {
    pub fn new(descriptors: Vec<ServerDescriptor>) -> Self {
        Self { descriptors }
    }
}

impl Discovery for StaticDiscovery {
    fn list_servers(&self) -> Vec<ServerDescriptor> {
        self.descriptors.clone()
    }
}
