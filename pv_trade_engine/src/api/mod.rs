mod ledger_api;
mod order_objects;
mod trade_flow_api;

pub use ledger_api::LedgerApi;
pub use order_objects::OrderQueryFilter;
pub use trade_flow_api::{TradeFlowApi, DEFAULT_MAX_BATCH};
