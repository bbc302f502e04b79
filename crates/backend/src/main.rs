mod config;
mod graphql;
mod seed;
mod storage;

use std::path::Path;

use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{extract::State, response::Html, routing::get, Router};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::ServerConfig;
use graphql::Schema;
use storage::{ImportSummary, Storage, StoreError};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

async fn graphql_handler(State(schema): State<Schema>, req: GraphQLRequest) -> GraphQLResponse {
    schema.execute(req.into_inner()).await.into()
}

async fn graphiql() -> Html<String> {
    Html(
        async_graphql::http::GraphiQLSource::build()
            .endpoint("/graphql")
            .finish(),
    )
}

async fn health() -> &'static str {
    "ok"
}

/// Build the full application router.
fn build_app(schema: Schema) -> Router {
    Router::new()
        .route("/graphql", get(graphiql).post(graphql_handler))
        .route("/health", get(health))
        .with_state(schema)
        .layer(CorsLayer::permissive())
}

/// `RUST_LOG` wins; otherwise log at info.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

/// Import the region files when the store holds no points yet.
///
/// A missing or unreadable data directory leaves the store empty rather than
/// aborting startup.
fn seed_if_empty(storage: &Storage, data_dir: &Path) -> Result<Option<ImportSummary>, StoreError> {
    if !storage.is_empty()? {
        return Ok(None);
    }
    match seed::load_region_dir(data_dir) {
        Ok(points) => {
            let summary = storage.import(&points)?;
            tracing::info!(
                dir = %data_dir.display(),
                inserted = summary.inserted,
                duplicates = summary.duplicates,
                "Seeded empty store"
            );
            Ok(Some(summary))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Skipping seed");
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    init_tracing();

    let config = ServerConfig::from_env();
    tracing::info!(?config, "Resolved configuration");

    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| StartupError::CreateDir {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let storage = Storage::open(&config.db_path)?;
    seed_if_empty(&storage, &config.data_dir)?;

    let counts = storage.counts()?;
    tracing::info!(
        total = counts.total,
        deleted = counts.deleted,
        "Point store ready"
    );

    let schema = graphql::build_schema(storage, config.view);
    let app = build_app(schema);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!("Server running at http://localhost:{}", config.port);
    tracing::info!("GraphiQL playground at http://localhost:{}/graphql", config.port);

    axum::serve(listener, app)
        .await
        .map_err(StartupError::Serve)
}
