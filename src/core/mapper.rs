// src/core/mapper.rs
//! Host-facing facade
//!
//! A host mounts the four map surfaces under one base path and forwards
//! matching requests to [`Mapper::handle`]. Nothing here fails on the host's
//! side: analysis errors are answered with a 503 body.

use std::sync::Arc;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use super::app::ServiceIntrospector;
use super::engine::AnalysisEngine;
use super::export::{Exporter, GraphKind};
use super::languages::FastApiSource;
use super::snapshot::{Snapshot, SnapshotStore};

/// One of the four exported documents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    StructureJson,
    StructureHtml,
    DataflowJson,
    DataflowHtml,
}

impl Surface {
    pub const ALL: [Surface; 4] = [
        Surface::StructureJson,
        Surface::StructureHtml,
        Surface::DataflowJson,
        Surface::DataflowHtml,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            Surface::StructureJson => "/json",
            Surface::StructureHtml => "/html",
            Surface::DataflowJson => "/dataflow/json",
            Surface::DataflowHtml => "/dataflow/html",
        }
    }

    pub fn graph(&self) -> GraphKind {
        match self {
            Surface::StructureJson | Surface::StructureHtml => GraphKind::Structure,
            Surface::DataflowJson | Surface::DataflowHtml => GraphKind::Dataflow,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

pub struct Mapper {
    store: SnapshotStore,
    exporter: Exporter,
    base_path: String,
}

impl Mapper {
    /// Map a host that can describe itself through an introspector
    pub fn new(introspector: Arc<dyn ServiceIntrospector>, config: &Config) -> Self {
        let analysis = config.analysis.clone();
        let store = SnapshotStore::new(move || {
            let mut engine = AnalysisEngine::new(&analysis)?;
            engine.analyze(introspector.as_ref())
        });
        Self::with_store(store, config)
    }

    /// Map the FastAPI sources named in the configuration; each build rescans them
    pub fn for_sources(config: &Config) -> Self {
        let scan_config = config.clone();
        let store = SnapshotStore::new(move || {
            let source = FastApiSource::scan(&scan_config)?;
            let mut engine = AnalysisEngine::new(&scan_config.analysis)?;
            engine.analyze(&source)
        });
        Self::with_store(store, config)
    }

    fn with_store(store: SnapshotStore, config: &Config) -> Self {
        Self {
            store,
            exporter: Exporter::new(&config.output),
            base_path: normalize_base_path(&config.endpoints.base_path),
        }
    }

    pub fn with_base_path(mut self, base_path: &str) -> Self {
        self.base_path = normalize_base_path(base_path);
        self
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn exporter(&self) -> &Exporter {
        &self.exporter
    }

    /// Full request paths of every surface
    pub fn surface_paths(&self) -> Vec<String> {
        Surface::ALL
            .iter()
            .map(|surface| format!("{}{}", self.prefix(), surface.suffix()))
            .collect()
    }

    /// Match a request path (query string ignored) against the surfaces
    pub fn surface_for(&self, path: &str) -> Option<Surface> {
        let path = path.split('?').next().unwrap_or(path);
        let path = path.trim_end_matches('/');
        let rest = path.strip_prefix(self.prefix())?;
        Surface::ALL.into_iter().find(|surface| surface.suffix() == rest)
    }

    /// Current snapshot, built on first use
    pub async fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.store.get().await
    }

    /// Rebuild after the host's structure changed
    pub async fn rebuild(&self) -> Result<Arc<Snapshot>> {
        self.store.rebuild().await
    }

    pub async fn render(&self, surface: Surface) -> Result<String> {
        let snapshot = self.store.get().await?;
        match surface {
            Surface::StructureJson | Surface::DataflowJson => self.exporter.graph_json(&snapshot, surface.graph()),
            Surface::StructureHtml | Surface::DataflowHtml => self.exporter.payload_json(&snapshot, surface.graph()),
        }
    }

    /// Answer a request, or `None` so the host falls through to its own routing
    pub async fn handle(&self, path: &str) -> Option<EndpointResponse> {
        let surface = self.surface_for(path)?;
        debug!("Serving {:?} for {}", surface, path);

        let response = match self.render(surface).await {
            Ok(body) => EndpointResponse {
                status: 200,
                content_type: "application/json",
                body,
            },
            Err(e) => {
                warn!("Project map unavailable for {}: {}", path, e);
                EndpointResponse {
                    status: 503,
                    content_type: "application/json",
                    body: json!({ "error": e.to_string() }).to_string(),
                }
            }
        };
        Some(response)
    }

    fn prefix(&self) -> &str {
        self.base_path.trim_end_matches('/')
    }
}

fn normalize_base_path(base_path: &str) -> String {
    format!("/{}", base_path.trim().trim_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::app::{InMemoryRegistry, RouteDescriptor, SourceLocation};
    use crate::error::MapperError;

    fn mapper() -> Mapper {
        let registry = InMemoryRegistry::new()
            .route(RouteDescriptor::new("GET", "/users", "list_users"))
            .function(
                "list_users",
                SourceLocation::new("main.py", 3),
                "def list_users(db):\n    return db.query(User).all()\n",
            );
        Mapper::new(Arc::new(registry), &Config::default())
    }

    #[test]
    fn test_surfaces_resolve_under_the_base_path() {
        let mapper = mapper();

        assert_eq!(mapper.base_path(), "/_project_map");
        assert_eq!(mapper.surface_for("/_project_map/json"), Some(Surface::StructureJson));
        assert_eq!(mapper.surface_for("/_project_map/dataflow/html/"), Some(Surface::DataflowHtml));
        assert_eq!(mapper.surface_for("/_project_map/json?pretty=1"), Some(Surface::StructureJson));
        assert_eq!(mapper.surface_for("/users"), None);
        assert_eq!(mapper.surface_for("/_project_map"), None);

        let moved = mapper.with_base_path("internal/map/");
        assert_eq!(moved.base_path(), "/internal/map");
        assert_eq!(moved.surface_for("/internal/map/html"), Some(Surface::StructureHtml));
        assert_eq!(moved.surface_for("/_project_map/html"), None);

        let root = moved.with_base_path("/");
        assert_eq!(root.surface_paths()[0], "/json");
    }

    #[tokio::test]
    async fn test_handle_serves_documents_and_falls_through() {
        let mapper = mapper();

        assert!(mapper.handle("/items").await.is_none());

        let response = mapper.handle("/_project_map/dataflow/json").await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "application/json");
        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body["db_operations"][0]["api"], "sql.session");

        let payload = mapper.handle("/_project_map/html").await.unwrap();
        let body: serde_json::Value = serde_json::from_str(&payload.body).unwrap();
        assert_eq!(body["graph"], "structure");
        assert_eq!(body["nodes"][0]["id"], "route:GET /users");
    }

    #[tokio::test]
    async fn test_analysis_failure_becomes_503() {
        struct Broken;
        impl ServiceIntrospector for Broken {
            fn routes(&self) -> Result<Vec<RouteDescriptor>> {
                Err(MapperError::Registry("router not mounted".to_string()))
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

        let mapper = Mapper::new(Arc::new(Broken), &Config::default());
        let response = mapper.handle("/_project_map/json").await.unwrap();

        assert_eq!(response.status, 503);
        assert!(response.body.contains("router not mounted"));
    }

    #[tokio::test]
    async fn test_for_sources_maps_a_fastapi_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("main.py"),
            "from fastapi import FastAPI\n\napp = FastAPI()\n\n@app.get(\"/ping\")\ndef ping():\n    return {\"ok\": True}\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.project.source_dirs = vec![dir.path().to_path_buf()];
        let mapper = Mapper::for_sources(&config);

        let snapshot = mapper.snapshot().await.unwrap();
        assert_eq!(snapshot.structure.routes.len(), 1);
        assert_eq!(snapshot.structure.routes[0].path, "/ping");

        let rebuilt = mapper.rebuild().await.unwrap();
        assert_eq!(rebuilt.fingerprint, snapshot.fingerprint);
    }
}
