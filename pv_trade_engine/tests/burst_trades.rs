//! Concurrency tests: many triggers draining the same queue at once.
use futures_util::future::join_all;
use log::*;
use pv_trade_engine::{
    curve::price_at,
    db_types::{NewIssuerCurve, NewOrder, OrderStatusType, Ticker, TradeDirection, TransactionStatus},
    test_utils::{new_test_database, prepare_test_env, random_db_path},
    LedgerApi,
    SqliteDatabase,
    TradeFlowApi,
    TradingEngineDatabase,
};
use pvx_common::{MicroPv, MicroUsdp};
use tokio::runtime::Runtime;

const NUM_ORDERS: usize = 12;
const NUM_DRAINERS: usize = 3;

#[test]
fn burst_trades() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async move {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
        let tickers = [Ticker::from("ALFA"), Ticker::from("BRVO")];
        for ticker in &tickers {
            db.create_issuer_curve(NewIssuerCurve::new(
                ticker.clone(),
                MicroUsdp::from_usdp(1),
                MicroUsdp::from(10_000),
            ))
            .await
            .expect("Error listing issuer");
        }
        let ledger = LedgerApi::new(db.clone());
        for user in ["u0", "u1", "u2", "u3"] {
            ledger.credit_currency(user, MicroUsdp::from_usdp(1_000)).await.unwrap();
        }

        info!("🚀️ Injecting {NUM_ORDERS} orders");
        let api = TradeFlowApi::new(db.clone());
        for i in 0..NUM_ORDERS {
            let user = format!("u{}", i % 4);
            let ticker = tickers[i % 2].clone();
            #[allow(clippy::cast_possible_wrap)]
            let spend = MicroUsdp::from_usdp(5 * (i + 1) as i64);
            let order = NewOrder::buy(format!("burst-{i}").parse().unwrap(), user, ticker, spend);
            api.enqueue_order(order).await.expect("Error queueing order");
        }

        info!("🚀️ Draining with {NUM_DRAINERS} concurrent batch drainers");
        let drainers = (0..NUM_DRAINERS)
            .map(|_| {
                let api = TradeFlowApi::new(db.clone());
                tokio::spawn(async move { api.process_all(NUM_ORDERS).await.expect("Error draining queue") })
            })
            .collect::<Vec<_>>();
        let summaries = join_all(drainers).await;

        // every order was processed exactly once across all drainers
        let processed: usize = summaries.iter().map(|s| s.as_ref().unwrap().total).sum();
        assert_eq!(processed, NUM_ORDERS);
        assert_eq!(api.pending_order_count().await.unwrap(), 0);
        assert_eq!(api.processing_order_count().await.unwrap(), 0);

        // every order is terminal, and settled effects reconcile exactly against the curve rows
        for ticker in &tickers {
            let transactions = db.fetch_transactions_for_ticker(ticker).await.unwrap();
            let settled_in = transactions
                .iter()
                .filter(|t| t.status == TransactionStatus::Completed && t.direction == TradeDirection::Buy)
                .map(|t| t.usdp_amount)
                .sum::<MicroUsdp>();
            let minted = transactions
                .iter()
                .filter(|t| t.status == TransactionStatus::Completed && t.direction == TradeDirection::Buy)
                .map(|t| t.pv_amount)
                .sum::<MicroPv>();
            let curve = db.fetch_issuer_curve(ticker).await.unwrap().unwrap();
            assert_eq!(curve.total_usdp, settled_in);
            assert_eq!(curve.current_supply, minted);
            // the cached price never drifts from the recomputed one
            assert_eq!(
                curve.current_price,
                price_at(curve.base_price, curve.price_step, curve.current_supply).unwrap()
            );
        }
    });
    info!("🚀️ test complete");
}

#[test]
fn concurrent_claims_never_hand_out_the_same_order() {
    let sys = Runtime::new().unwrap();
    sys.block_on(async move {
        let db = new_test_database().await;
        db.create_issuer_curve(NewIssuerCurve::new(Ticker::from("ALFA"), MicroUsdp::from_usdp(1), MicroUsdp::from(10_000)))
            .await
            .unwrap();
        let ledger = LedgerApi::new(db.clone());
        ledger.credit_currency("u0", MicroUsdp::from_usdp(100)).await.unwrap();
        let api = TradeFlowApi::new(db.clone());
        let n = 8;
        for i in 0..n {
            let order =
                NewOrder::buy(format!("claim-{i}").parse().unwrap(), "u0", Ticker::from("ALFA"), MicroUsdp::from_usdp(1));
            api.enqueue_order(order).await.unwrap();
        }

        let claims = (0..n)
            .map(|_| {
                let db = db.clone();
                tokio::spawn(async move { db.claim_next_order().await.expect("Error claiming") })
            })
            .collect::<Vec<_>>();
        let claimed = join_all(claims).await.into_iter().map(|r| r.unwrap()).collect::<Vec<_>>();

        // N claims on N pending orders: N distinct orders, each exactly once
        let mut ids = claimed.iter().map(|o| o.as_ref().expect("A claim came back empty").id).collect::<Vec<_>>();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), n);
        for order in claimed.iter().flatten() {
            assert_eq!(order.status, OrderStatusType::Processing);
        }
        assert_eq!(api.pending_order_count().await.unwrap(), 0);
        assert_eq!(api.processing_order_count().await.unwrap(), n as i64);

        // the queue is drained; another claim returns nothing
        assert!(db.claim_next_order().await.unwrap().is_none());
    });
}
