use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::info;
use truemid_core::model::{MarketEntry, SymbolMapping, SymbolRecord};
use truemid_exchanges_common::SymbolDirectory;

/// PostgreSQL-backed symbol registry.
///
/// Symbols are identified by their canonical name and never deleted; the
/// per-exchange mapping is keyed by `(symbol_id, exchange)` with the native
/// symbol overwritten on re-seed.
#[derive(Clone)]
pub struct PgSymbolRegistry {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct MappingRow {
    symbol_id: i32,
    symbol: String,
    exchange: String,
    exchange_symbol: String,
    is_unavailable: bool,
}

impl From<MappingRow> for SymbolMapping {
    fn from(row: MappingRow) -> Self {
        SymbolMapping {
            symbol_id: row.symbol_id,
            symbol: row.symbol,
            exchange: row.exchange,
            native_symbol: row.exchange_symbol,
            unavailable: row.is_unavailable,
        }
    }
}

impl PgSymbolRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_symbol(&self, symbol: &str) -> Result<Option<SymbolRecord>> {
        let row = sqlx::query_as::<_, (i32, String, String, String)>(
            "SELECT id, symbol, base_asset, quote_asset FROM symbols WHERE symbol = $1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, symbol, base_asset, quote_asset)| SymbolRecord {
            id,
            symbol,
            base_asset,
            quote_asset,
        }))
    }

    pub async fn all_symbols(&self) -> Result<Vec<SymbolRecord>> {
        let rows = sqlx::query_as::<_, (i32, String, String, String)>(
            "SELECT id, symbol, base_asset, quote_asset FROM symbols ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, symbol, base_asset, quote_asset)| SymbolRecord {
                id,
                symbol,
                base_asset,
                quote_asset,
            })
            .collect())
    }
}

#[async_trait]
impl SymbolDirectory for PgSymbolRegistry {
    async fn get_mapping(&self, exchange: &str, symbol: &str) -> Result<Option<SymbolMapping>> {
        let row = sqlx::query_as::<_, MappingRow>(
            "SELECT m.symbol_id, s.symbol, m.exchange, m.exchange_symbol, m.is_unavailable \
             FROM symbols_map m JOIN symbols s ON s.id = m.symbol_id \
             WHERE m.exchange = $1 AND s.symbol = $2",
        )
        .bind(exchange)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SymbolMapping::from))
    }

    async fn upsert_markets(&self, exchange: &str, markets: &[MarketEntry]) -> Result<()> {
        if markets.is_empty() {
            return Ok(());
        }
        info!(exchange, count = markets.len(), "Seeding markets");

        let mut tx = self.pool.begin().await?;

        let mut insert_symbols = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "INSERT INTO symbols (symbol, base_asset, quote_asset) ",
        );
        insert_symbols.push_values(markets, |mut b, market| {
            b.push_bind(&market.symbol)
                .push_bind(&market.base)
                .push_bind(&market.quote);
        });
        insert_symbols.push(" ON CONFLICT (symbol) DO NOTHING");
        insert_symbols.build().execute(&mut *tx).await?;

        let ids: HashMap<String, i32> =
            sqlx::query_as::<_, (i32, String)>("SELECT id, symbol FROM symbols")
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(|(id, symbol)| (symbol, id))
                .collect();

        let mut insert_map = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "INSERT INTO symbols_map (symbol_id, exchange, exchange_symbol) ",
        );
        insert_map.push_values(
            markets.iter().filter_map(|m| {
                ids.get(&m.symbol).map(|&id| (id, &m.native_symbol))
            }),
            |mut b, (symbol_id, native_symbol)| {
                b.push_bind(symbol_id)
                    .push_bind(exchange)
                    .push_bind(native_symbol);
            },
        );
        insert_map.push(
            " ON CONFLICT (symbol_id, exchange) DO UPDATE SET exchange_symbol = EXCLUDED.exchange_symbol",
        );
        insert_map.build().execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_unavailable(&self, symbol_id: i32, exchange: &str, unavailable: bool) -> Result<()> {
        sqlx::query("UPDATE symbols_map SET is_unavailable = $3 WHERE symbol_id = $1 AND exchange = $2")
            .bind(symbol_id)
            .bind(exchange)
            .bind(unavailable)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_exchanges_for_symbol(&self, symbol: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT m.exchange FROM symbols_map m JOIN symbols s ON s.id = m.symbol_id \
             WHERE s.symbol = $1 AND NOT m.is_unavailable ORDER BY m.exchange",
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(exchange,)| exchange).collect())
    }

    async fn list_symbols_for_exchange(&self, exchange: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT s.symbol FROM symbols_map m JOIN symbols s ON s.id = m.symbol_id \
             WHERE m.exchange = $1 AND NOT m.is_unavailable ORDER BY s.symbol",
        )
        .bind(exchange)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(symbol,)| symbol).collect())
    }
}
