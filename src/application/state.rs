use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Instant,
};

use tokio::sync::{RwLock, broadcast};

use crate::{
    application::{
        accept_tasks::AcceptTaskRunner,
        config::{RegistryBackend, RuntimeConfig},
    },
    domain::{
        error::DomainError,
        events::{EventBus, EventSink, GatewayEvent},
        models::UNKNOWN_MODULE_VERSION,
        registry::DeviceRegistry,
    },
    interfaces::{memory_registry::MemoryRegistry, netboot_manager::NetbootManager},
    storage::{CommandStore, SqliteStore},
};

const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct SharedState {
    inner: Arc<InnerState>,
}

struct InnerState {
    config: RuntimeConfig,
    started_at: Instant,
    methods: Vec<String>,
    events: Vec<String>,
    registry: Arc<dyn DeviceRegistry>,
    commands: CommandStore,
    event_bus: EventBus,
    accept_tasks: AcceptTaskRunner,
    clients: RwLock<HashMap<String, ConnectedClient>>,
}

#[derive(Debug, Clone)]
pub struct ConnectedClient {
    pub conn_id: String,
    pub client_id: String,
    pub role: String,
    pub remote_ip: Option<String>,
    pub connected_at_ms: u64,
}

impl SharedState {
    pub async fn new(
        config: RuntimeConfig,
        methods: Vec<String>,
        events: Vec<String>,
    ) -> Result<Self, DomainError> {
        let registry: Arc<dyn DeviceRegistry> = match &config.registry {
            RegistryBackend::NetbootManager(binary) => Arc::new(NetbootManager::new(binary)),
            RegistryBackend::Memory => Arc::new(MemoryRegistry::seeded()),
        };
        Self::with_registry(config, methods, events, registry).await
    }

    pub async fn with_registry(
        config: RuntimeConfig,
        methods: Vec<String>,
        events: Vec<String>,
        registry: Arc<dyn DeviceRegistry>,
    ) -> Result<Self, DomainError> {
        let db = SqliteStore::connect(&config.db_path).await?;
        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
        let accept_tasks = AcceptTaskRunner::new(Arc::new(event_bus.clone()))?;

        Ok(Self {
            inner: Arc::new(InnerState {
                config,
                started_at: Instant::now(),
                methods,
                events,
                registry,
                commands: CommandStore::new(db),
                event_bus,
                accept_tasks,
                clients: RwLock::new(HashMap::new()),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn methods(&self) -> Vec<String> {
        self.inner.methods.clone()
    }

    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.inner.events.clone()
    }

    #[must_use]
    pub fn uptime_ms(&self) -> u64 {
        u64::try_from(self.inner.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn auth_mode_label(&self) -> &'static str {
        self.inner.config.auth_mode.label()
    }

    #[must_use]
    pub fn registry(&self) -> &dyn DeviceRegistry {
        self.inner.registry.as_ref()
    }

    #[must_use]
    pub fn commands(&self) -> &CommandStore {
        &self.inner.commands
    }

    #[must_use]
    pub fn accept_tasks(&self) -> &AcceptTaskRunner {
        &self.inner.accept_tasks
    }

    pub fn emit(&self, event: &str, payload: serde_json::Value) {
        self.inner.event_bus.emit(event, payload);
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.event_bus.subscribe()
    }

    /// Version recorded for commands of `module`.
    #[must_use]
    pub fn module_version(&self, module: &str) -> String {
        self.inner
            .config
            .module_versions
            .get(module)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_MODULE_VERSION.to_owned())
    }

    /// Whether a request addressed to `controller_id` is served locally.
    #[must_use]
    pub fn serves_controller(&self, controller_id: Option<&str>) -> bool {
        match (controller_id, self.inner.config.controller_id.as_deref()) {
            (None, _) => true,
            (Some(requested), Some(own)) => requested.eq_ignore_ascii_case(own),
            (Some(_), None) => false,
        }
    }

    pub async fn register_client(&self, client: ConnectedClient) {
        self.inner
            .clients
            .write()
            .await
            .insert(client.conn_id.clone(), client);
    }

    pub async fn unregister_client(&self, conn_id: &str) {
        self.inner.clients.write().await.remove(conn_id);
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.clients.read().await.len()
    }

    pub async fn health_payload(&self) -> Result<serde_json::Value, DomainError> {
        let controllers = self.inner.commands.commands_list().await?;
        let queued: usize = controllers
            .iter()
            .map(|controller| controller.commands.len())
            .sum();

        Ok(serde_json::json!({
            "ok": true,
            "version": self.inner.config.runtime_version,
            "controllerId": self.inner.config.controller_id,
            "uptimeMs": self.uptime_ms(),
            "connections": self.connection_count().await,
            "controllers": controllers.len(),
            "queuedCommands": queued,
        }))
    }

    /// Module name to version mapping, as exposed by `/info`.
    #[must_use]
    pub fn module_versions(&self) -> BTreeMap<String, String> {
        self.inner.config.module_versions.clone()
    }
}
