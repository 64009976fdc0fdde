use log::{debug, trace};
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{NewOrder, Order, OrderId, OrderStatusType},
    traits::TradeEngineError,
    OrderQueryFilter,
};

/// Inserts the order into the queue, returning `false` in the second parameter if the order
/// already exists.
pub async fn idempotent_insert(
    order: NewOrder,
    conn: &mut SqliteConnection,
) -> Result<(Order, bool), TradeEngineError> {
    let inserted = match fetch_order_by_order_id(&order.order_id, conn).await? {
        Some(order) => (order, false),
        None => {
            let order = insert_order(order, conn).await?;
            debug!("📝️ Order [{}] inserted with id {}", order.order_id, order.id);
            (order, true)
        },
    };
    Ok(inserted)
}

/// Inserts a new order in `Pending` state using the given connection. This is not atomic on its
/// own; embed the call inside a transaction and pass `&mut *tx` if you need atomicity with other
/// statements.
async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, TradeEngineError> {
    let order_id = order.order_id.clone();
    let result = sqlx::query_as(
        r#"
            INSERT INTO orders (
                order_id,
                user_id,
                ticker,
                direction,
                amount_usdp,
                amount_pv,
                status,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, 'Pending', $7)
            RETURNING *;
        "#,
    )
    .bind(order.order_id)
    .bind(order.user_id)
    .bind(order.ticker)
    .bind(order.direction.to_string())
    .bind(order.amount_usdp)
    .bind(order.amount_pv)
    .bind(order.created_at)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => TradeEngineError::OrderAlreadyExists(order_id),
        _ => TradeEngineError::from(e),
    })?;
    Ok(result)
}

pub async fn fetch_order_by_order_id(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE order_id = $1").bind(order_id.as_str()).fetch_optional(conn).await?;
    Ok(order)
}

/// Atomically claims the oldest pending order: the select and the transition to `Processing`
/// happen in one UPDATE statement, so no two callers can ever claim the same row. Returns `None`
/// when nothing is pending. Cancelled (and any other non-pending) orders are never candidates.
pub async fn claim_next(conn: &mut SqliteConnection) -> Result<Option<Order>, TradeEngineError> {
    let order: Option<Order> = sqlx::query_as(
        r#"
            UPDATE orders SET status = 'Processing', updated_at = CURRENT_TIMESTAMP
            WHERE id = (
                SELECT id FROM orders WHERE status = 'Pending' ORDER BY created_at ASC, id ASC LIMIT 1
            )
            RETURNING *;
        "#,
    )
    .fetch_optional(conn)
    .await?;
    if let Some(order) = &order {
        trace!("📝️ Claimed order [{}] (id {})", order.order_id, order.id);
    }
    Ok(order)
}

/// Conditionally transitions a `Processing` order to `Completed`. Returns `None` (changing
/// nothing) when the order is not currently `Processing`. Only the settlement transaction calls
/// this, after the curve and ledger writes have succeeded.
pub(crate) async fn complete_processing_order(
    id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as(
        "UPDATE orders SET status = 'Completed', updated_at = CURRENT_TIMESTAMP \
         WHERE id = $1 AND status = 'Processing' RETURNING *",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Conditionally transitions a `Processing` order to `Failed`, recording the reason. Returns
/// `None` (changing nothing) when the order is not currently `Processing`; the caller decides
/// whether that is an idempotent repeat or an invalid transition. The conditional UPDATE comes
/// first in the failure transaction so the write lock is taken up front.
pub(crate) async fn fail_processing_order(
    id: i64,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as(
        "UPDATE orders SET status = 'Failed', failure_reason = $1, updated_at = CURRENT_TIMESTAMP \
         WHERE id = $2 AND status = 'Processing' RETURNING *",
    )
    .bind(reason)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Transitions a pending order to `Cancelled` on behalf of the external order-placement flow.
pub async fn cancel_order(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<Order, TradeEngineError> {
    let current = fetch_order_by_order_id(order_id, &mut *conn)
        .await?
        .ok_or_else(|| TradeEngineError::OrderNotFound(order_id.clone()))?;
    if current.status == OrderStatusType::Cancelled {
        return Ok(current);
    }
    let cancelled: Option<Order> = sqlx::query_as(
        "UPDATE orders SET status = 'Cancelled', updated_at = CURRENT_TIMESTAMP \
         WHERE order_id = $1 AND status = 'Pending' RETURNING *",
    )
    .bind(order_id.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    match cancelled {
        Some(order) => {
            debug!("📝️ Order [{}] cancelled before claim", order.order_id);
            Ok(order)
        },
        // the conditional update missed: the order moved out of Pending underneath us
        None => {
            let current = fetch_order_by_order_id(order_id, conn)
                .await?
                .ok_or_else(|| TradeEngineError::OrderNotFound(order_id.clone()))?;
            Err(TradeEngineError::InvalidTransition { from: current.status, to: OrderStatusType::Cancelled })
        },
    }
}

pub async fn count_with_status(status: OrderStatusType, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE status = $1")
        .bind(status.to_string())
        .fetch_one(conn)
        .await?;
    Ok(count)
}

/// Fetches orders according to criteria specified in the `OrderQueryFilter`.
///
/// Resulting orders are ordered by `created_at` in ascending order.
pub async fn search_orders(query: OrderQueryFilter, conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        r#"
    SELECT * FROM orders
    "#,
    );
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(order_id) = query.order_id {
        where_clause.push("order_id = ");
        where_clause.push_bind_unseparated(order_id.0);
    }
    if let Some(user_id) = query.user_id {
        where_clause.push("user_id = ");
        where_clause.push_bind_unseparated(user_id);
    }
    if let Some(ticker) = query.ticker {
        where_clause.push("ticker = ");
        where_clause.push_bind_unseparated(ticker.0);
    }
    if query.status.as_ref().map(|s| !s.is_empty()).unwrap_or(false) {
        let mut statuses = vec![];
        query.status.as_ref().unwrap().iter().for_each(|s| {
            statuses.push(format!("'{s}'"));
        });
        let status_clause = statuses.join(",");
        where_clause.push(format!("status IN ({status_clause})"));
    }
    if let Some(since) = query.since {
        where_clause.push("created_at >= ");
        where_clause.push_bind_unseparated(since);
    }
    if let Some(until) = query.until {
        where_clause.push("created_at <= ");
        where_clause.push_bind_unseparated(until);
    }
    builder.push(" ORDER BY created_at ASC, id ASC");

    trace!("📝️ Executing query: {}", builder.sql());
    let query = builder.build_query_as::<Order>();
    let orders = query.fetch_all(conn).await?;
    trace!("📝️ Result of search_orders: {:?}", orders.len());
    Ok(orders)
}
