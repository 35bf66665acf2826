//! One-time pgvector initialization for the knowledge-base vector store.
//!
//! Creates the `vector` extension, the integration schema, the login role the
//! knowledge base connects with, the embedding table and its indexes. Every
//! statement is idempotent so `Create` and `Update` share one path.

use std::fmt;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::{error, info};

use crate::config::VectorStoreConfig;
use crate::telemetry::{self, names};

/// Oldest pgvector release with HNSW index support.
pub const MIN_PGVECTOR_VERSION: (u32, u32, u32) = (0, 5, 0);

pub const CREATED_MESSAGE: &str = "Vector extension, schema, tables, and indexes created successfully";
pub const DELETE_MESSAGE: &str = "Delete request acknowledged";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LifecycleRequest {
    Create,
    Update,
    Delete,
}

impl fmt::Display for LifecycleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        })
    }
}

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("vector_store.database_url is not configured")]
    MissingDatabaseUrl,

    #[error("vector_store.user_password is not configured")]
    MissingPassword,

    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("pgvector extension is not installed")]
    ExtensionMissing,

    #[error("pgvector {found} is older than the required {required}")]
    UnsupportedVersion { found: String, required: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// DDL for one vector store, derived from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorStorePlan {
    schema: String,
    table: String,
    role: String,
    dimensions: u32,
    ef_construction: u32,
}

impl VectorStorePlan {
    pub fn from_config(settings: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        Ok(Self {
            schema: identifier(&settings.schema)?,
            table: identifier(&settings.table)?,
            role: identifier(&settings.role)?,
            dimensions: settings.dimensions,
            ef_construction: settings.ef_construction,
        })
    }

    fn qualified_table(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    pub fn create_extension(&self) -> String {
        "CREATE EXTENSION IF NOT EXISTS vector".to_string()
    }

    pub fn create_schema(&self) -> String {
        format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema)
    }

    pub fn create_role(&self, password: &str) -> String {
        format!("CREATE ROLE {} WITH PASSWORD {} LOGIN", self.role, quote_literal(password))
    }

    pub fn alter_role_password(&self, password: &str) -> String {
        format!("ALTER ROLE {} WITH PASSWORD {}", self.role, quote_literal(password))
    }

    pub fn grant_schema(&self) -> String {
        format!("GRANT ALL ON SCHEMA {} TO {}", self.schema, self.role)
    }

    pub fn create_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             id UUID PRIMARY KEY, \
             embedding vector({}), \
             chunks TEXT, \
             metadata JSON, \
             custom_metadata JSONB)",
            self.qualified_table(),
            self.dimensions
        )
    }

    pub fn grant_table(&self) -> String {
        format!("GRANT ALL ON TABLE {} TO {}", self.qualified_table(), self.role)
    }

    /// HNSW cosine index, GIN full-text index on `chunks`, GIN index on `custom_metadata`.
    pub fn create_indexes(&self) -> [String; 3] {
        let table = self.qualified_table();
        [
            format!(
                "CREATE INDEX IF NOT EXISTS vector_cosine_idx ON {table} \
                 USING hnsw (embedding vector_cosine_ops) WITH (ef_construction={})",
                self.ef_construction
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS chunks_idx ON {table} \
                 USING gin (to_tsvector('simple', chunks))"
            ),
            format!("CREATE INDEX IF NOT EXISTS metadata_idx ON {table} USING gin (custom_metadata)"),
        ]
    }
}

/// Runs a [`VectorStorePlan`] against PostgreSQL.
pub struct VectorStoreInitializer {
    pool: PgPool,
    plan: VectorStorePlan,
    password: String,
}

impl fmt::Debug for VectorStoreInitializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorStoreInitializer")
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

impl VectorStoreInitializer {
    pub async fn connect(settings: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        let plan = VectorStorePlan::from_config(settings)?;
        let url = settings
            .database_url
            .as_deref()
            .ok_or(VectorStoreError::MissingDatabaseUrl)?;
        let password = settings
            .user_password
            .clone()
            .ok_or(VectorStoreError::MissingPassword)?;

        let pool = PgPoolOptions::new().max_connections(1).connect(url).await?;
        Ok(Self {
            pool,
            plan,
            password,
        })
    }

    async fn execute(&self, sql: &str) -> Result<(), sqlx::Error> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn initialize(&self) -> Result<(), VectorStoreError> {
        info!("Creating vector extension");
        self.execute(&self.plan.create_extension()).await?;

        let version: Option<String> =
            sqlx::query_scalar("SELECT extversion FROM pg_extension WHERE extname = 'vector'")
                .fetch_optional(&self.pool)
                .await?;
        let version = version.ok_or(VectorStoreError::ExtensionMissing)?;
        info!(%version, "pgvector version");
        ensure_supported(&version)?;

        info!(schema = %self.plan.schema, "Creating schema");
        self.execute(&self.plan.create_schema()).await?;

        info!(role = %self.plan.role, "Creating role");
        if let Err(e) = self.execute(&self.plan.create_role(&self.password)).await {
            info!(error = %e, "Role not created, updating password of existing role");
            if let Err(e) = self.execute(&self.plan.alter_role_password(&self.password)).await {
                error!(error = %e, "Error updating role password");
            }
        }

        self.execute(&self.plan.grant_schema()).await?;

        info!(table = %self.plan.qualified_table(), "Creating table");
        self.execute(&self.plan.create_table()).await?;
        self.execute(&self.plan.grant_table()).await?;

        for sql in self.plan.create_indexes() {
            self.execute(&sql).await?;
        }
        info!("Created vector indexes");
        Ok(())
    }
}

/// Handle one lifecycle request; `Delete` needs no database work.
pub async fn run(
    request: LifecycleRequest,
    settings: &VectorStoreConfig,
) -> Result<&'static str, VectorStoreError> {
    if request == LifecycleRequest::Delete {
        info!("Delete request received, no action needed");
        return Ok(DELETE_MESSAGE);
    }

    info!(%request, "Initializing vector store");
    telemetry::count(names::VECTOR_INIT_ATTEMPT);

    let result = async {
        VectorStoreInitializer::connect(settings)
            .await?
            .initialize()
            .await
    }
    .await;

    match result {
        Ok(()) => {
            telemetry::count(names::VECTOR_INIT_SUCCESS);
            Ok(CREATED_MESSAGE)
        }
        Err(e) => {
            error!(error = %e, "Error initializing vector store");
            telemetry::count(names::VECTOR_INIT_FAILURE);
            Err(e)
        }
    }
}

fn ensure_supported(version: &str) -> Result<(), VectorStoreError> {
    let (major, minor, patch) = MIN_PGVECTOR_VERSION;
    if parse_version(version).is_some_and(|found| found >= MIN_PGVECTOR_VERSION) {
        return Ok(());
    }
    Err(VectorStoreError::UnsupportedVersion {
        found: version.to_string(),
        required: format!("{major}.{minor}.{patch}"),
    })
}

/// Parse `major.minor[.patch]`, ignoring any pre-release suffix.
fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let core = version.split(['-', '+']).next()?;
    let mut parts = core.split('.').map(str::parse::<u32>);
    let major = parts.next()?.ok()?;
    let minor = parts.next()?.ok()?;
    let patch = parts.next().transpose().ok()?.unwrap_or(0);
    Some((major, minor, patch))
}

fn identifier(name: &str) -> Result<String, VectorStoreError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        Ok(name.to_string())
    } else {
        Err(VectorStoreError::InvalidIdentifier(name.to_string()))
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
