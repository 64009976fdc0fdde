//! End-to-end settlement flows against a real SQLite store.
use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use pv_trade_engine::{
    events::{EventHandlers, EventHooks},
    db_types::{NewIssuerCurve, NewOrder, OrderStatusType, Ticker, TradeDirection, TransactionStatus},
    test_utils::new_test_database,
    LedgerApi,
    OrderQueryFilter,
    ProcessOutcome,
    SqliteDatabase,
    TradeEngineError,
    TradeFlowApi,
    TradingEngineDatabase,
};
use pvx_common::{MicroPv, MicroUsdp};

const TICKER: &str = "ACME";

/// Fresh database with ACME listed at base 1.00, step 0.01.
async fn setup() -> (SqliteDatabase, TradeFlowApi<SqliteDatabase>, LedgerApi<SqliteDatabase>) {
    let db = new_test_database().await;
    db.create_issuer_curve(NewIssuerCurve::new(
        Ticker::from(TICKER),
        MicroUsdp::from_usdp(1),
        MicroUsdp::from(10_000),
    ))
    .await
    .expect("Error listing issuer");
    let api = TradeFlowApi::new(db.clone());
    let ledger = LedgerApi::new(db.clone());
    (db, api, ledger)
}

#[tokio::test]
async fn buy_settles_and_updates_every_store() {
    let (db, api, ledger) = setup().await;
    ledger.credit_currency("alice", MicroUsdp::from_usdp(1000)).await.unwrap();

    let order = NewOrder::buy("ord-1".parse().unwrap(), "alice", Ticker::from(TICKER), MicroUsdp::from_usdp(100));
    let (queued, inserted) = api.enqueue_order(order).await.unwrap();
    assert!(inserted);
    assert_eq!(queued.status, OrderStatusType::Pending);
    assert_eq!(api.pending_order_count().await.unwrap(), 1);

    let summary = api.process_all(10).await.unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 0);

    // the closed form: q = 100·(√3 − 1) ≈ 73.205080 PV
    let tokens = MicroPv::from(73_205_080);
    let curve = db.fetch_issuer_curve(&Ticker::from(TICKER)).await.unwrap().unwrap();
    assert_eq!(curve.current_supply, tokens);
    assert_eq!(curve.total_usdp, MicroUsdp::from_usdp(100));
    assert_eq!(curve.current_price, MicroUsdp::from(1_732_050));

    assert_eq!(ledger.currency_balance("alice").await.unwrap(), MicroUsdp::from_usdp(900));
    assert_eq!(ledger.share_balance("alice", &Ticker::from(TICKER)).await.unwrap(), tokens);

    let transactions = db.fetch_transactions_for_user("alice").await.unwrap();
    assert_eq!(transactions.len(), 1);
    let tx = &transactions[0];
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.direction, TradeDirection::Buy);
    assert_eq!(tx.usdp_amount, MicroUsdp::from_usdp(100));
    assert_eq!(tx.pv_amount, tokens);
    assert_eq!(tx.start_price, MicroUsdp::from_usdp(1));
    assert_eq!(tx.end_price, MicroUsdp::from(1_732_050));
    assert_eq!(tx.avg_price, MicroUsdp::from(1_366_025));

    let settled = db.fetch_order_by_order_id(&"ord-1".parse().unwrap()).await.unwrap().unwrap();
    assert_eq!(settled.status, OrderStatusType::Completed);

    // batch results serialize for the trigger adapters' response payloads
    let payload = serde_json::to_string(&summary).unwrap();
    assert!(payload.contains("ord-1"));
}

#[tokio::test]
async fn sell_returns_currency_and_burns_supply() {
    let (db, api, ledger) = setup().await;
    ledger.credit_currency("alice", MicroUsdp::from_usdp(500)).await.unwrap();

    let buy = NewOrder::buy("ord-1".parse().unwrap(), "alice", Ticker::from(TICKER), MicroUsdp::from_usdp(100));
    api.enqueue_order(buy).await.unwrap();
    api.process_all(10).await.unwrap();
    let holdings = ledger.share_balance("alice", &Ticker::from(TICKER)).await.unwrap();

    let sell = NewOrder::sell("ord-2".parse().unwrap(), "alice", Ticker::from(TICKER), holdings);
    api.enqueue_order(sell).await.unwrap();
    let summary = api.process_all(10).await.unwrap();
    assert_eq!(summary.successful, 1);

    // the whole position was sold back; only truncation dust stays with the curve
    let curve = db.fetch_issuer_curve(&Ticker::from(TICKER)).await.unwrap().unwrap();
    assert_eq!(curve.current_supply, MicroPv::from(0));
    assert_eq!(curve.current_price, MicroUsdp::from_usdp(1));
    assert!(curve.total_usdp < MicroUsdp::from_usdp(1));

    assert_eq!(ledger.share_balance("alice", &Ticker::from(TICKER)).await.unwrap(), MicroPv::from(0));
    let balance = ledger.currency_balance("alice").await.unwrap();
    assert!(balance > MicroUsdp::from_usdp(499));
    assert!(balance <= MicroUsdp::from_usdp(500));
}

#[tokio::test]
async fn insufficient_funds_fails_the_order_and_leaves_the_balance_alone() {
    let (db, api, ledger) = setup().await;
    ledger.credit_currency("bob", MicroUsdp::from_usdp(50)).await.unwrap();

    let order = NewOrder::buy("ord-1".parse().unwrap(), "bob", Ticker::from(TICKER), MicroUsdp::from_usdp(100));
    api.enqueue_order(order).await.unwrap();
    let summary = api.process_all(10).await.unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.failed, 1);
    match &summary.results[0] {
        ProcessOutcome::OrderFailed { order, reason } => {
            assert_eq!(order.status, OrderStatusType::Failed);
            assert!(reason.contains("Insufficient funds"), "unexpected reason: {reason}");
        },
        other => panic!("Expected OrderFailed, got {other:?}"),
    }

    assert_eq!(ledger.currency_balance("bob").await.unwrap(), MicroUsdp::from_usdp(50));
    let curve = db.fetch_issuer_curve(&Ticker::from(TICKER)).await.unwrap().unwrap();
    assert_eq!(curve.total_usdp, MicroUsdp::from(0));

    // the failure is recorded as a Failed transaction echoing the requested amount
    let records = db.fetch_transactions_for_order(&"ord-1".parse().unwrap()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TransactionStatus::Failed);
    assert_eq!(records[0].usdp_amount, MicroUsdp::from_usdp(100));
    assert_eq!(records[0].pv_amount, MicroPv::from(0));
}

#[tokio::test]
async fn selling_more_than_held_fails_cleanly() {
    let (_db, api, ledger) = setup().await;
    ledger.credit_currency("carol", MicroUsdp::from_usdp(100)).await.unwrap();
    let buy = NewOrder::buy("ord-1".parse().unwrap(), "carol", Ticker::from(TICKER), MicroUsdp::from_usdp(10));
    api.enqueue_order(buy).await.unwrap();
    api.process_all(10).await.unwrap();

    let sell = NewOrder::sell("ord-2".parse().unwrap(), "carol", Ticker::from(TICKER), MicroPv::from_pv(1_000));
    api.enqueue_order(sell).await.unwrap();
    let summary = api.process_all(10).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.successful, 0);
}

#[tokio::test]
async fn two_buys_apply_in_submission_order() {
    let (db, api, ledger) = setup().await;
    ledger.credit_currency("alice", MicroUsdp::from_usdp(300)).await.unwrap();

    let first = NewOrder::buy("ord-1".parse().unwrap(), "alice", Ticker::from(TICKER), MicroUsdp::from_usdp(100));
    let second = NewOrder::buy("ord-2".parse().unwrap(), "alice", Ticker::from(TICKER), MicroUsdp::from_usdp(100));
    api.enqueue_order(first).await.unwrap();
    api.enqueue_order(second).await.unwrap();

    let summary = api.process_all(10).await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.successful, 2);

    let curve = db.fetch_issuer_curve(&Ticker::from(TICKER)).await.unwrap().unwrap();
    assert_eq!(curve.total_usdp, MicroUsdp::from_usdp(200));

    // submission order: the second trade starts where the first ended
    let transactions = db.fetch_transactions_for_user("alice").await.unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0].order_id, "ord-1".parse().unwrap());
    assert_eq!(transactions[0].start_price, MicroUsdp::from_usdp(1));
    assert_eq!(transactions[1].order_id, "ord-2".parse().unwrap());
    assert_eq!(transactions[1].start_price, transactions[0].end_price);
    assert!(transactions[1].end_price > transactions[1].start_price);
    assert_eq!(
        curve.current_supply,
        transactions[0].pv_amount + transactions[1].pv_amount
    );
}

#[tokio::test]
async fn process_all_is_idempotent_on_an_empty_queue() {
    let (_db, api, ledger) = setup().await;
    ledger.credit_currency("alice", MicroUsdp::from_usdp(100)).await.unwrap();
    let order = NewOrder::buy("ord-1".parse().unwrap(), "alice", Ticker::from(TICKER), MicroUsdp::from_usdp(10));
    api.enqueue_order(order).await.unwrap();

    let first = api.process_all(10).await.unwrap();
    assert_eq!(first.total, 1);
    let second = api.process_all(10).await.unwrap();
    assert_eq!(second.total, 0);
    assert!(second.results.is_empty());
}

#[tokio::test]
async fn max_batch_caps_a_single_drain() {
    let (_db, api, ledger) = setup().await;
    ledger.credit_currency("alice", MicroUsdp::from_usdp(100)).await.unwrap();
    for i in 0..5 {
        let order =
            NewOrder::buy(format!("ord-{i}").parse().unwrap(), "alice", Ticker::from(TICKER), MicroUsdp::from_usdp(1));
        api.enqueue_order(order).await.unwrap();
    }
    let summary = api.process_all(3).await.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(api.pending_order_count().await.unwrap(), 2);
}

#[tokio::test]
async fn cancelled_orders_are_never_claimed() {
    let (_db, api, ledger) = setup().await;
    ledger.credit_currency("alice", MicroUsdp::from_usdp(100)).await.unwrap();
    let order = NewOrder::buy("ord-1".parse().unwrap(), "alice", Ticker::from(TICKER), MicroUsdp::from_usdp(10));
    api.enqueue_order(order).await.unwrap();

    let cancelled = api.cancel_order(&"ord-1".parse().unwrap()).await.unwrap();
    assert_eq!(cancelled.status, OrderStatusType::Cancelled);
    // cancelling again is a no-op
    let again = api.cancel_order(&"ord-1".parse().unwrap()).await.unwrap();
    assert_eq!(again.status, OrderStatusType::Cancelled);

    let summary = api.process_all(10).await.unwrap();
    assert_eq!(summary.total, 0);
    assert_eq!(ledger.currency_balance("alice").await.unwrap(), MicroUsdp::from_usdp(100));
}

#[tokio::test]
async fn terminal_orders_cannot_be_cancelled() {
    let (_db, api, ledger) = setup().await;
    ledger.credit_currency("alice", MicroUsdp::from_usdp(100)).await.unwrap();
    let order = NewOrder::buy("ord-1".parse().unwrap(), "alice", Ticker::from(TICKER), MicroUsdp::from_usdp(10));
    api.enqueue_order(order).await.unwrap();
    api.process_all(10).await.unwrap();

    let result = api.cancel_order(&"ord-1".parse().unwrap()).await;
    assert!(matches!(
        result,
        Err(TradeEngineError::InvalidTransition { from: OrderStatusType::Completed, to: OrderStatusType::Cancelled })
    ));
}

#[tokio::test]
async fn enqueue_validation() {
    let (_db, api, _ledger) = setup().await;

    // unlisted ticker is rejected before queueing
    let order = NewOrder::buy("ord-1".parse().unwrap(), "alice", Ticker::from("NOPE"), MicroUsdp::from_usdp(10));
    assert!(matches!(api.enqueue_order(order).await, Err(TradeEngineError::Validation(_))));

    // non-positive amounts are rejected before queueing
    let order = NewOrder::buy("ord-2".parse().unwrap(), "alice", Ticker::from(TICKER), MicroUsdp::from(0));
    assert!(matches!(api.enqueue_order(order).await, Err(TradeEngineError::Validation(_))));
    let order = NewOrder::sell("ord-3".parse().unwrap(), "alice", Ticker::from(TICKER), MicroPv::from(-1));
    assert!(matches!(api.enqueue_order(order).await, Err(TradeEngineError::Validation(_))));

    assert_eq!(api.pending_order_count().await.unwrap(), 0);
}

#[tokio::test]
async fn enqueue_is_idempotent_on_order_id() {
    let (_db, api, ledger) = setup().await;
    ledger.credit_currency("alice", MicroUsdp::from_usdp(100)).await.unwrap();
    let order = NewOrder::buy("ord-1".parse().unwrap(), "alice", Ticker::from(TICKER), MicroUsdp::from_usdp(10));
    let (first, inserted) = api.enqueue_order(order.clone()).await.unwrap();
    assert!(inserted);
    let (second, inserted) = api.enqueue_order(order).await.unwrap();
    assert!(!inserted);
    assert_eq!(first.id, second.id);
    assert_eq!(api.pending_order_count().await.unwrap(), 1);
}

#[tokio::test]
async fn settlement_and_failure_hooks_fire() {
    let (db, _api, ledger) = setup().await;
    ledger.credit_currency("alice", MicroUsdp::from_usdp(100)).await.unwrap();

    let settled = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let (s2, f2) = (settled.clone(), failed.clone());
    let mut hooks = EventHooks::default();
    hooks.on_order_settled(move |_ev| {
        let settled = settled.clone();
        Box::pin(async move {
            settled.fetch_add(1, Ordering::SeqCst);
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    hooks.on_order_failed(move |_ev| {
        let failed = failed.clone();
        Box::pin(async move {
            failed.fetch_add(1, Ordering::SeqCst);
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    let handlers = EventHandlers::new(8, hooks);
    let api = TradeFlowApi::new_with_hooks(db.clone(), handlers.producers());
    handlers.start_handlers().await;

    let good = NewOrder::buy("ord-1".parse().unwrap(), "alice", Ticker::from(TICKER), MicroUsdp::from_usdp(10));
    let broke = NewOrder::buy("ord-2".parse().unwrap(), "alice", Ticker::from(TICKER), MicroUsdp::from_usdp(5_000));
    api.enqueue_order(good).await.unwrap();
    api.enqueue_order(broke).await.unwrap();
    api.process_all(10).await.unwrap();

    // hook handlers run on their own tasks; give them a beat
    tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
    assert_eq!(s2.load(Ordering::SeqCst), 1);
    assert_eq!(f2.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn search_orders_filters_by_status_and_user() {
    let (db, api, ledger) = setup().await;
    ledger.credit_currency("alice", MicroUsdp::from_usdp(100)).await.unwrap();
    for i in 0..3 {
        let order =
            NewOrder::buy(format!("ord-{i}").parse().unwrap(), "alice", Ticker::from(TICKER), MicroUsdp::from_usdp(1));
        api.enqueue_order(order).await.unwrap();
    }
    api.process_all(2).await.unwrap();

    let completed = db
        .search_orders(OrderQueryFilter::default().with_user_id("alice").with_status(OrderStatusType::Completed))
        .await
        .unwrap();
    assert_eq!(completed.len(), 2);
    let pending =
        db.search_orders(OrderQueryFilter::default().with_status(OrderStatusType::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].order_id, "ord-2".parse().unwrap());
}
