//! Loads every configured tool host once and merges their tools.

use crate::config::ClientConfig;
use crate::discovery::{Discovery, ServerDescriptor};
use crate::error::{ClientError, ClientResult, LoadError};
use crate::peer::McpPeer;
use crate::transport::{Connector, DefaultConnector};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task::JoinError;
use toolbridge_core::{Arguments, CallToolResult, InitializeResult, ToolDescriptor};
use tracing::{error, info, warn};

/// A remote tool, callable through the connection it was listed on.
#[derive(Clone)]
pub struct ToolHandle {
    server: String,
    exposed_name: String,
    descriptor: ToolDescriptor,
    peer: Arc<McpPeer>,
}

impl ToolHandle {
    /// Name under which the tool is exposed (see [`crate::config::NamingPolicy`]).
    pub fn name(&self) -> &str {
        &self.exposed_name
    }

    /// Name of the tool on its host.
    pub fn remote_name(&self) -> &str {
        &self.descriptor.name
    }

    /// Descriptor name of the host providing the tool.
    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn description(&self) -> &str {
        &self.descriptor.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.descriptor.input_schema
    }

    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    /// Invoke the tool. A result flagged `isError` becomes [`ClientError::Tool`].
    pub async fn call(&self, arguments: Arguments) -> ClientResult<CallToolResult> {
        let result = self.peer.call_tool(&self.descriptor.name, arguments).await?;
        if result.is_error() {
            return Err(ClientError::Tool {
                tool: self.exposed_name.clone(),
                message: result.text_content(),
            });
        }
        Ok(result)
    }

    /// Invoke the tool and return its text content.
    pub async fn call_text(&self, arguments: Arguments) -> ClientResult<String> {
        Ok(self.call(arguments).await?.text_content())
    }
}

impl fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolHandle")
            .field("server", &self.server)
            .field("name", &self.exposed_name)
            .field("remote_name", &self.descriptor.name)
            .finish()
    }
}

/// Everything loaded from one host.
pub struct Toolset {
    server: String,
    info: InitializeResult,
    peer: Arc<McpPeer>,
    tools: Vec<ToolHandle>,
}

impl Toolset {
    pub fn server(&self) -> &str {
        &self.server
    }

    /// What the host reported during the handshake.
    pub fn server_info(&self) -> &InitializeResult {
        &self.info
    }

    /// Tools in the order the host listed them.
    pub fn tools(&self) -> &[ToolHandle] {
        &self.tools
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for Toolset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolset")
            .field("server", &self.server)
            .field("host", &self.info.server_info.name)
            .field("tools", &self.tool_names())
            .finish()
    }
}

/// A tool left out of the merged list because its name was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowedTool {
    pub name: String,
    pub server: String,
    /// Server whose tool kept the name.
    pub kept_from: String,
}

/// Outcome of one load pass.
#[derive(Debug, Default)]
pub struct AggregateResult {
    pub loaded: BTreeMap<String, Toolset>,
    pub failed: BTreeMap<String, LoadError>,
    tools: Vec<ToolHandle>,
    shadowed: Vec<ShadowedTool>,
}

impl AggregateResult {
    /// Merged tools: descriptor order, then each host's own order.
    pub fn tools(&self) -> &[ToolHandle] {
        &self.tools
    }

    pub fn shadowed(&self) -> &[ShadowedTool] {
        &self.shadowed
    }

    /// Whether every configured server loaded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn tool(&self, name: &str) -> Option<&ToolHandle> {
        self.tools.iter().find(|t| t.name() == name)
    }

    fn merge(&mut self, order: &[ServerDescriptor]) {
        let mut owners: HashMap<String, String> = HashMap::new();

        for descriptor in order {
            let Some(toolset) = self.loaded.get(&descriptor.name) else {
                continue;
            };
            for tool in toolset.tools() {
                if let Some(owner) = owners.get(tool.name()) {
                    warn!(
                        tool = %tool.name(),
                        server = %toolset.server,
                        kept_from = %owner,
                        "Tool name already taken, skipping"
                    );
                    self.shadowed.push(ShadowedTool {
                        name: tool.name().to_string(),
                        server: toolset.server.clone(),
                        kept_from: owner.clone(),
                    });
                    continue;
                }
                owners.insert(tool.name().to_string(), toolset.server.clone());
                self.tools.push(tool.clone());
            }
        }
    }
}

/// Connects to every configured tool host once and exposes the union of
/// their tools.
///
/// Servers load concurrently and independently: one that cannot be reached,
/// rejects the handshake, stalls or panics is recorded in
/// [`AggregateResult::failed`] while the others load normally.
pub struct ToolsetAggregator {
    descriptors: Vec<ServerDescriptor>,
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    result: OnceCell<AggregateResult>,
}

impl ToolsetAggregator {
    /// Create an aggregator over `descriptors`, merged in the given order.
    pub fn new(descriptors: Vec<ServerDescriptor>, config: ClientConfig) -> Self {
        let mut seen = HashSet::new();
        let descriptors = descriptors
            .into_iter()
            .filter(|d| {
                let fresh = seen.insert(d.name.clone());
                if !fresh {
                    warn!(server = %d.name, "Duplicate server name, keeping the first entry");
                }
                fresh
            })
            .collect();

        Self {
            descriptors,
            config,
            connector: Arc::new(DefaultConnector::new()),
            result: OnceCell::new(),
        }
    }

    /// Create an aggregator over whatever `discovery` lists.
    pub fn from_discovery(discovery: &dyn Discovery, config: ClientConfig) -> Self {
        Self::new(discovery.list_servers(), config)
    }

    /// Replace the connector used to open transports.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn descriptors(&self) -> &[ServerDescriptor] {
        &self.descriptors
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Load every server, once. Later and concurrent calls share the first
    /// pass's result.
    pub async fn load_all(&self) -> &AggregateResult {
        self.result.get_or_init(|| self.load_pass()).await
    }

    /// The merged tool list.
    pub async fn get_tools(&self) -> Vec<ToolHandle> {
        self.load_all().await.tools().to_vec()
    }

    /// Close every loaded connection. Handles used afterwards fail with
    /// [`ClientError::Closed`].
    pub async fn close(&self) {
        let Some(result) = self.result.get() else {
            return;
        };
        for toolset in result.loaded.values() {
            if let Err(e) = toolset.peer.close().await {
                warn!(server = %toolset.server, error = %e, "Error while closing connection");
            }
        }
        info!(servers = result.loaded.len(), "Closed tool host connections");
    }

    async fn load_pass(&self) -> AggregateResult {
        info!(servers = self.descriptors.len(), "Loading toolsets");

        let tasks: Vec<_> = self
            .descriptors
            .iter()
            .cloned()
            .map(|descriptor| {
                let connector = self.connector.clone();
                let config = self.config.clone();
                tokio::spawn(async move {
                    let limit = config.connect_timeout;
                    let load = load_toolset(connector.as_ref(), &descriptor, &config);
                    match tokio::time::timeout(limit, load).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(LoadError::Timeout {
                            server: descriptor.name.clone(),
                            timeout: limit,
                        }),
                    }
                })
            })
            .collect();

        let mut result = AggregateResult::default();
        for (descriptor, task) in self.descriptors.iter().zip(tasks) {
            let outcome = task.await.unwrap_or_else(|e| {
                Err(LoadError::Panicked {
                    server: descriptor.name.clone(),
                    reason: panic_reason(e),
                })
            });

            match outcome {
                Ok(toolset) => {
                    info!(
                        server = %descriptor.name,
                        tools = ?toolset.tool_names(),
                        "Loaded tools"
                    );
                    result.loaded.insert(descriptor.name.clone(), toolset);
                }
                Err(e) => {
                    error!(server = %descriptor.name, error = %e, "Error loading tools");
                    result.failed.insert(descriptor.name.clone(), e);
                }
            }
        }

        result.merge(&self.descriptors);
        info!(
            loaded = result.loaded.len(),
            failed = result.failed.len(),
            tools = result.tools.len(),
            "Toolsets ready"
        );
        result
    }
}

async fn load_toolset(
    connector: &dyn Connector,
    descriptor: &ServerDescriptor,
    config: &ClientConfig,
) -> Result<Toolset, LoadError> {
    let server = descriptor.name.clone();

    let transport = connector
        .connect(descriptor)
        .await
        .map_err(|source| LoadError::Connect {
            server: server.clone(),
            source,
        })?;
    let peer = Arc::new(McpPeer::new(server.clone(), transport, config.request_timeout));

    let info = match peer.initialize(&config.client_info).await {
        Ok(info) => info,
        Err(source) => {
            shut(&peer).await;
            let server = server.clone();
            return Err(if source.is_transport() {
                LoadError::Connect { server, source }
            } else {
                LoadError::Handshake { server, source }
            });
        }
    };

    let listed = match peer.list_tools().await {
        Ok(listed) => listed,
        Err(source) => {
            shut(&peer).await;
            return Err(LoadError::Catalog { server, source });
        }
    };

    let mut names = HashSet::new();
    let tools = listed
        .into_iter()
        .filter(|tool| {
            let fresh = names.insert(tool.name.clone());
            if !fresh {
                warn!(server = %server, tool = %tool.name, "Host listed a tool twice");
            }
            fresh
        })
        .map(|descriptor| ToolHandle {
            server: server.clone(),
            exposed_name: config.naming.exposed_name(&server, &descriptor.name),
            descriptor,
            peer: peer.clone(),
        })
        .collect();

    Ok(Toolset {
        server,
        info,
        peer,
        tools,
    })
}

async fn shut(peer: &McpPeer) {
    if let Err(e) = peer.close().await {
        warn!(server = %peer.server(), error = %e, "Error while closing connection");
    }
}

fn panic_reason(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
