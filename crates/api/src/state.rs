use sqlx::PgPool;
use truemid_db::PgSymbolRegistry;

/// Shared state for the read-only HTTP endpoints. All queries go through
/// the default pool, never the sinks' priority pools.
#[derive(Clone)]
pub struct AppState {
    pub registry: PgSymbolRegistry,
    pub pool: PgPool,
}

impl AppState {
    pub fn new(registry: PgSymbolRegistry, pool: PgPool) -> Self {
        Self { registry, pool }
    }
}
