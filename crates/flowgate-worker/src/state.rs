//! Application state wiring repositories and services together.
//!
//! The core is generic over repository traits; AppState pins it to the
//! SQLite workflow store and whichever admission queue the configuration
//! selects.

use std::path::PathBuf;
use std::sync::Arc;

use flowgate_core::event::EventBus;
use flowgate_core::queue::ExecutionQueueDispatcher;
use flowgate_core::workflow::expression::JexlExpressionEvaluator;
use flowgate_core::workflow::host::LocalExecutionHost;
use flowgate_core::workflow::node::ServiceProvider;
use flowgate_core::workflow::runner::WorkflowRunner;
use flowgate_infra::entity::{InMemoryEntityStore, InMemorySchemaRegistry};
use flowgate_infra::queue::QueueBackend;
use flowgate_infra::sqlite::pool::DatabasePool;
use flowgate_infra::sqlite::workflow::SqliteWorkflowRepository;
use flowgate_types::config::EngineConfig;

pub type ConcreteRunner = WorkflowRunner<SqliteWorkflowRepository>;
pub type ConcreteHost = LocalExecutionHost<SqliteWorkflowRepository, QueueBackend>;
pub type ConcreteDispatcher = ExecutionQueueDispatcher<QueueBackend, ConcreteHost>;

pub struct AppState {
    pub config: EngineConfig,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
    pub workflows: Arc<SqliteWorkflowRepository>,
    pub queue: Arc<QueueBackend>,
    pub services: ServiceProvider,
    pub event_bus: EventBus,
}

impl AppState {
    /// Connect to the databases and wire the node services.
    pub async fn init(config: EngineConfig, data_dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;

        let db_url = config
            .database
            .url
            .clone()
            .unwrap_or_else(|| flowgate_infra::sqlite::pool::database_url_for(&data_dir));
        let db_pool = DatabasePool::new(&db_url).await?;
        let queue = QueueBackend::open(&db_pool, config.database.queue_url.as_deref()).await?;
        tracing::debug!(database = %db_url, queue = queue.name(), "storage ready");

        // Entity writes are checked against the `[[entities]]` schemas; the
        // same registry backs publish-time validation.
        let schemas = Arc::new(InMemorySchemaRegistry::from_config(&config.entities));
        let entities = InMemoryEntityStore::new().with_schemas(Arc::clone(&schemas));
        let services = ServiceProvider::new()
            .with_entities(Arc::new(entities))
            .with_evaluator(Arc::new(JexlExpressionEvaluator))
            .with_schemas(schemas);

        Ok(Self {
            workflows: Arc::new(SqliteWorkflowRepository::new(db_pool.clone())),
            queue: Arc::new(queue),
            services,
            event_bus: EventBus::default(),
            config,
            data_dir,
            db_pool,
        })
    }

    pub fn runner(&self) -> ConcreteRunner {
        WorkflowRunner::new(
            Arc::clone(&self.workflows),
            self.services.clone(),
            self.event_bus.clone(),
            self.config.activity.clone(),
            self.config.registry.clone(),
        )
    }

    pub fn local_host(&self) -> ConcreteHost {
        LocalExecutionHost::new(Arc::new(self.runner()), Arc::clone(&self.queue))
    }

    pub fn dispatcher(&self, host: Arc<ConcreteHost>) -> ConcreteDispatcher {
        ExecutionQueueDispatcher::new(
            Arc::clone(&self.queue),
            host,
            self.config.dispatcher.clone(),
            self.event_bus.clone(),
        )
    }
}
