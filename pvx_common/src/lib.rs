mod micro_pv;
mod micro_usdp;

pub mod op;

pub use micro_pv::{MicroPv, MicroPvConversionError, PV_UNIT_CODE};
pub use micro_usdp::{MicroUsdp, MicroUsdpConversionError, USDP_CURRENCY_CODE};
