use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use truemid_core::messages::{Spread, Trade, TrueMidPrice};

/// Append a batch of trades in one transaction.
pub async fn insert_trades(pool: &PgPool, records: &[Trade]) -> sqlx::Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    let mut insert = sqlx::QueryBuilder::<sqlx::Postgres>::new(
        "INSERT INTO symbol_trades_stream \
         (exchange, symbol_id, ts, price, amount, is_buy, update_ts, fetch_ts) ",
    );
    insert.push_values(records, |mut b, trade| {
        b.push_bind(&trade.exchange)
            .push_bind(trade.symbol_id)
            .push("to_timestamp(")
            .push_bind_unseparated(trade.event_ts_ms)
            .push_unseparated(" / 1000.0)")
            .push_bind(trade.price)
            .push_bind(trade.amount)
            .push_bind(trade.is_buy)
            .push("NOW()")
            .push("to_timestamp(")
            .push_bind_unseparated(trade.fetch_ts_ms)
            .push_unseparated(" / 1000.0)");
    });
    insert.build().execute(&mut *tx).await?;
    tx.commit().await
}

/// Append a batch of spreads in one transaction.
pub async fn insert_spreads(pool: &PgPool, records: &[Spread]) -> sqlx::Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    let mut insert = sqlx::QueryBuilder::<sqlx::Postgres>::new(
        "INSERT INTO symbol_spreads_stream \
         (exchange, symbol_id, ts, best_bid, best_ask, update_ts, fetch_ts) ",
    );
    insert.push_values(records, |mut b, spread| {
        b.push_bind(&spread.exchange)
            .push_bind(spread.symbol_id)
            .push("to_timestamp(")
            .push_bind_unseparated(spread.event_ts_ms)
            .push_unseparated(" / 1000.0)")
            .push_bind(spread.best_bid)
            .push_bind(spread.best_ask)
            .push("NOW()")
            .push("to_timestamp(")
            .push_bind_unseparated(spread.fetch_ts_ms)
            .push_unseparated(" / 1000.0)");
    });
    insert.build().execute(&mut *tx).await?;
    tx.commit().await
}

/// Append a batch of consensus prices in one transaction.
pub async fn insert_true_mid_prices(pool: &PgPool, records: &[TrueMidPrice]) -> sqlx::Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let mut tx = pool.begin().await?;
    let mut insert = sqlx::QueryBuilder::<sqlx::Postgres>::new(
        "INSERT INTO symbol_true_mid_price_stream (symbol_id, ts, true_mid_price, update_ts) ",
    );
    insert.push_values(records, |mut b, price| {
        b.push_bind(price.symbol_id)
            .push("to_timestamp(")
            .push_bind_unseparated(price.event_ts_ms)
            .push_unseparated(" / 1000.0)")
            .push_bind(price.true_mid_price)
            .push("NOW()");
    });
    insert.build().execute(&mut *tx).await?;
    tx.commit().await
}

#[derive(Debug, Clone)]
pub struct TruePriceRow {
    pub ts: DateTime<Utc>,
    pub true_mid_price: Decimal,
}

/// Latest persisted consensus price for one symbol.
pub async fn get_last_true_mid_price(
    pool: &PgPool,
    symbol_id: i32,
) -> sqlx::Result<Option<TruePriceRow>> {
    let row = sqlx::query_as::<_, (DateTime<Utc>, Decimal)>(
        "SELECT ts, true_mid_price FROM symbol_true_mid_price_stream \
         WHERE symbol_id = $1 ORDER BY ts DESC LIMIT 1",
    )
    .bind(symbol_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(ts, true_mid_price)| TruePriceRow { ts, true_mid_price }))
}
