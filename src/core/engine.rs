// src/core/engine.rs
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::{AnalysisConfig, Config};
use crate::error::MapperError;
use super::app::ServiceIntrospector;
use super::call_graph::{CallChainTracer, PersistenceClassifier, TracedChain};
use super::dependencies::DependencyResolver;
use super::export::GraphKind;
use super::extract::{ExtractedRoute, ModelExtractor, RouteExtractor};
use super::graph::{GraphBuilder, RouteFlow};
use super::mapper::Mapper;
use super::snapshot::{panic_message, Snapshot};

const CONFIG_FILE: &str = "projectmap.toml";

/// Runs every analysis stage against one introspector
pub struct AnalysisEngine {
    route_extractor: RouteExtractor,
    model_extractor: ModelExtractor,
    dependency_resolver: DependencyResolver,
    tracer: CallChainTracer,
    classifier: PersistenceClassifier,
    builder: GraphBuilder,
}

impl AnalysisEngine {
    pub fn new(config: &AnalysisConfig) -> crate::error::Result<Self> {
        Ok(Self {
            route_extractor: RouteExtractor::new()?,
            model_extractor: ModelExtractor::new(),
            dependency_resolver: DependencyResolver::new(),
            tracer: CallChainTracer::new(config.max_call_depth)?,
            classifier: PersistenceClassifier::new()?,
            builder: GraphBuilder::new(config.strict_dependency_cycles),
        })
    }

    /// Build both graphs; only registry failures and strict cycles are fatal
    pub fn analyze(&mut self, introspector: &dyn ServiceIntrospector) -> crate::error::Result<Snapshot> {
        let start_time = std::time::Instant::now();
        info!("🔍 Starting project map analysis...");

        let descriptors = introspector.routes()?;
        let routes = self.route_extractor.extract(&descriptors, introspector);
        info!("Found {} routes", routes.len());

        info!("📦 Extracting models and dependencies...");
        let models = self.model_extractor.extract(&routes, introspector);
        let dependencies = self.dependency_resolver.resolve(&routes, introspector);

        info!("🔗 Tracing call chains...");
        let flows: Vec<RouteFlow> = routes
            .iter()
            .map(|route| self.trace_route(route, introspector))
            .collect();

        let (structure, dataflow) = self.builder.build(&routes, models, dependencies, flows)?;
        let snapshot = Snapshot::new(structure, dataflow)?;

        info!("📊 Analysis complete:");
        info!("  - {} routes", snapshot.structure.routes.len());
        info!("  - {} models", snapshot.structure.models.len());
        info!("  - {} dependencies", snapshot.structure.dependencies.len());
        info!("  - {} database operations", snapshot.dataflow.db_operations.len());
        info!("  - completed in {}ms", start_time.elapsed().as_millis());

        Ok(snapshot)
    }

    fn trace_route(&mut self, route: &ExtractedRoute, introspector: &dyn ServiceIntrospector) -> RouteFlow {
        let tracer = &mut self.tracer;
        let chain = panic::catch_unwind(AssertUnwindSafe(|| tracer.trace(&route.node.handler, introspector)))
            .unwrap_or_else(|payload| {
                let message = panic_message(&*payload);
                warn!("Tracing {} panicked: {}", route.node.id, message);
                TracedChain {
                    calls: Vec::new(),
                    error: Some(format!("tracing panicked: {}", message)),
                }
            });

        let operations: Vec<_> = chain
            .calls
            .iter()
            .filter_map(|call| self.classifier.classify(&call.site).map(|op| (call.order, op)))
            .collect();

        debug!(
            "Route {}: {} calls, {} database operations",
            route.node.id,
            chain.calls.len(),
            operations.len()
        );

        RouteFlow {
            route: route.node.id.clone(),
            chain,
            operations,
        }
    }
}

/// Command-line orchestration over the mapper
pub struct Engine {
    config: Config,
}

impl Engine {
    pub async fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        debug!("Loaded configuration: {:?}", config);
        Ok(Self { config })
    }

    /// Write a default configuration file
    pub async fn init(&self, path: Option<PathBuf>) -> Result<()> {
        let target_dir = match path {
            Some(path) => path,
            None => std::env::current_dir()?,
        };
        let config_path = target_dir.join(CONFIG_FILE);
        info!("Initializing projectmap in: {}", target_dir.display());

        if config_path.exists() {
            warn!("{} already exists, leaving it untouched", config_path.display());
            return Ok(());
        }

        std::fs::create_dir_all(&target_dir)?;
        Config::default().save(&config_path)?;
        info!("✅ Wrote {}", config_path.display());
        Ok(())
    }

    pub async fn export(&self, source: Option<PathBuf>, graph: &str, format: &str, output: Option<PathBuf>) -> Result<()> {
        let graph = parse_graph(graph)?;
        let mapper = Mapper::for_sources(&self.with_source(source));

        info!("📤 Exporting {:?} graph as {}", graph, format);
        let snapshot = mapper.snapshot().await?;
        let exporter = mapper.exporter();

        let document = match format {
            "json" => exporter.graph_json(&snapshot, graph)?,
            "payload" => exporter.payload_json(&snapshot, graph)?,
            "html" => exporter.render_html(&snapshot, graph, &self.config.project.name)?,
            _ => return Err(MapperError::Config(format!("Unsupported format: {}", format)).into()),
        };

        match output {
            Some(path) => {
                std::fs::write(&path, document)?;
                info!("✅ Wrote {}", path.display());
            }
            None => println!("{}", document),
        }
        Ok(())
    }

    /// Resolve one endpoint path the way a host would
    pub async fn get(&self, path: &str, source: Option<PathBuf>, base_path: Option<String>) -> Result<()> {
        let mut mapper = Mapper::for_sources(&self.with_source(source));
        if let Some(base_path) = base_path {
            mapper = mapper.with_base_path(&base_path);
        }

        let Some(response) = mapper.handle(path).await else {
            let known = mapper.surface_paths().join(", ");
            return Err(MapperError::Config(format!("No map surface at {} (available: {})", path, known)).into());
        };

        println!("{}", response.body);
        if response.status != 200 {
            return Err(MapperError::Build(format!("{} answered with status {}", path, response.status)).into());
        }
        Ok(())
    }

    fn with_source(&self, source: Option<PathBuf>) -> Config {
        let mut config = self.config.clone();
        if let Some(source) = source {
            config.project.source_dirs = vec![source];
        }
        config
    }
}

fn parse_graph(graph: &str) -> Result<GraphKind> {
    match graph {
        "structure" => Ok(GraphKind::Structure),
        "dataflow" => Ok(GraphKind::Dataflow),
        _ => Err(MapperError::Config(format!("Unknown graph: {}", graph)).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::app::{
        DependencyRef, DependencyScope, FieldDescriptor, InMemoryRegistry, ParamDescriptor, ParamSource,
        RouteDescriptor, SourceLocation,
    };
    use crate::core::graph::{DbOperationKind, DbTarget, EdgeKind, NodeId, Truncation};

    fn registry() -> InMemoryRegistry {
        InMemoryRegistry::new()
            .model("Item", vec![
                FieldDescriptor::new("id", "int", true),
                FieldDescriptor::new("name", "str", true),
            ])
            .model("ItemCreate", vec![FieldDescriptor::new("name", "str", true)])
            .dependency("get_db", DependencyScope::Request, vec![])
            .route(
                RouteDescriptor::new("GET", "/items", "read_items")
                    .with_response_model("Item")
                    .with_dependency(DependencyRef::Named("get_db".to_string())),
            )
            .route(
                RouteDescriptor::new("POST", "/items", "create_item")
                    .with_param(ParamDescriptor::new("item", Some(ParamSource::Body), Some("ItemCreate")))
                    .with_response_model("Item"),
            )
            .route(RouteDescriptor::new("GET", "/health", "health"))
            .function(
                "read_items",
                SourceLocation::new("app/main.py", 20),
                "def read_items(db):\n    cursor = db.cursor()\n    cursor.execute(\"SELECT * FROM items\")\n    return cursor.fetchall()\n",
            )
            .function(
                "create_item",
                SourceLocation::new("app/main.py", 30),
                "def create_item(item, db):\n    db.execute(\"users\")\n    return item\n",
            )
            .function(
                "health",
                SourceLocation::new("app/main.py", 40),
                "def health():\n    return {\"status\": \"ok\"}\n",
            )
    }

    fn analyze(registry: &InMemoryRegistry) -> Snapshot {
        AnalysisEngine::new(&AnalysisConfig::default())
            .unwrap()
            .analyze(registry)
            .unwrap()
    }

    #[test]
    fn test_route_identity_is_shared_by_both_graphs() {
        let snapshot = analyze(&registry());

        let structure: Vec<_> = snapshot.structure.routes.iter().map(|r| &r.id).collect();
        let dataflow: Vec<_> = snapshot.dataflow.routes.iter().map(|r| &r.id).collect();
        assert_eq!(structure, dataflow);
        assert_eq!(structure.len(), 3);
        assert!(snapshot
            .dataflow
            .call_chains
            .iter()
            .all(|chain| structure.contains(&&chain.route)));
    }

    #[test]
    fn test_unchanged_structure_rebuilds_identically() {
        let first = analyze(&registry());
        let second = analyze(&registry());

        assert_eq!(first.structure, second.structure);
        assert_eq!(first.dataflow, second.dataflow);
        assert_eq!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn test_handler_without_calls_has_empty_chain() {
        let snapshot = analyze(&registry());
        let health = NodeId::route("GET", "/health");

        let chain = snapshot.dataflow.chain_for(&health).unwrap();
        assert!(chain.entries.is_empty());
        assert_eq!(chain.error, None);
        assert!(snapshot.dataflow.operations_for(&health).is_empty());
    }

    #[test]
    fn test_literal_table_yields_one_operation() {
        let snapshot = analyze(&registry());

        let create = snapshot.dataflow.operations_for(&NodeId::route("POST", "/items"));
        assert_eq!(create.len(), 1);
        assert_eq!(create[0].target, DbTarget::Resolved("users".to_string()));
        assert_eq!(create[0].kind, DbOperationKind::Unknown);
        assert_eq!(create[0].operation, "execute");

        let read = snapshot.dataflow.operations_for(&NodeId::route("GET", "/items"));
        let kinds: Vec<_> = read.iter().map(|op| (op.operation.as_str(), op.kind)).collect();
        // `db.cursor()` opens a cursor and is not an operation itself
        assert_eq!(kinds, vec![("execute", DbOperationKind::Read), ("fetchall", DbOperationKind::Read)]);
        assert_eq!(read[0].target, DbTarget::Resolved("items".to_string()));
    }

    #[test]
    fn test_truncated_entries_are_still_classified() {
        let registry = InMemoryRegistry::new()
            .route(RouteDescriptor::new("POST", "/sync", "sync"))
            .function(
                "sync",
                SourceLocation::new("app/sync.py", 1),
                "def sync(db):\n    return db.execute(\"users\")\n",
            )
            .function(
                "db.execute",
                SourceLocation::new("app/db.py", 1),
                "def execute(statement):\n    return db.execute(\"users\")\n",
            );

        let snapshot = analyze(&registry);
        let route = NodeId::route("POST", "/sync");
        let chain = snapshot.dataflow.chain_for(&route).unwrap();

        let shape: Vec<_> = chain.entries.iter().map(|e| (e.depth, e.truncated)).collect();
        assert_eq!(shape, vec![(0, None), (1, Some(Truncation::Recursion))]);

        let operations = snapshot.dataflow.operations_for(&route);
        assert_eq!(operations.len(), 2);
        assert_eq!(operations[1].entry, chain.entries[1].id);
        assert_eq!(operations[1].operation, "execute");
        assert_eq!(operations[1].target, DbTarget::Resolved("users".to_string()));
    }

    #[test]
    fn test_items_routes_reference_two_models() {
        let snapshot = analyze(&registry());

        assert_eq!(snapshot.structure.models.len(), 2);
        let references = |from: NodeId, to: &str| {
            snapshot
                .structure
                .edges
                .iter()
                .any(|e| e.kind == EdgeKind::References && e.from == from && e.to == NodeId::model(to))
        };
        assert!(references(NodeId::route("GET", "/items"), "Item"));
        assert!(references(NodeId::route("POST", "/items"), "ItemCreate"));
        assert!(references(NodeId::route("POST", "/items"), "Item"));
        assert!(!references(NodeId::route("GET", "/items"), "ItemCreate"));
    }

    #[test]
    fn test_registry_failure_is_fatal() {
        struct Unavailable;
        impl ServiceIntrospector for Unavailable {
            fn routes(&self) -> crate::error::Result<Vec<RouteDescriptor>> {
                Err(MapperError::Registry("not started".to_string()))
            }
            fn model(&self, _: &str) -> Option<crate::core::app::ModelDescriptor> {
                None
            }
            fn dependency(&self, _: &str) -> Option<crate::core::app::DependencyDescriptor> {
                None
            }
            fn function_source(&self, _: &str) -> Option<crate::core::app::FunctionSource> {
                None
            }
        }

        let err = AnalysisEngine::new(&AnalysisConfig::default())
            .unwrap()
            .analyze(&Unavailable)
            .unwrap_err();
        assert!(matches!(err, MapperError::Registry(_)));
    }

    #[tokio::test]
    async fn test_init_writes_default_config_once() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine { config: Config::default() };

        engine.init(Some(dir.path().to_path_buf())).await.unwrap();
        let written = Config::load(dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(written.analysis.max_call_depth, 6);

        engine.init(Some(dir.path().to_path_buf())).await.unwrap();
    }
}
