//! The linear bonding-curve pricing model.
//!
//! Every trade on the platform is user-vs-curve: the marginal share price is
//! `price(supply) = base_price + price_step * supply`, so a buy integrates that line over the
//! currency spent (the positive root of a quadratic in the quantity), and a sell integrates it
//! over the quantity returned. The functions here are pure: they take a curve snapshot and a
//! trade request and produce a [`TradeQuote`], and it is the order processor's job to apply that
//! quote to the stores atomically.
//!
//! All arithmetic runs in [`Decimal`] and results are truncated down to micro-units, always in
//! the curve's favor, so the curve can never become under-collateralised through rounding.
use pvx_common::{MicroPv, MicroUsdp};
use rust_decimal::{Decimal, MathematicalOps};
use thiserror::Error;

use crate::db_types::IssuerCurve;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurveError {
    #[error("Trade amount must be positive")]
    NonPositiveAmount,
    #[error("Trade is too small to fill at the current price")]
    ZeroFill,
    #[error("Cannot sell {requested}; only {supply} are outstanding")]
    SupplyExceeded { requested: MicroPv, supply: MicroPv },
    #[error("Curve holds {held} but the trade would pay out {payout}")]
    Undercollateralised { held: MicroUsdp, payout: MicroUsdp },
    #[error("Curve has zero price and zero step; it cannot quote trades")]
    DegenerateCurve,
    #[error("The pricing quadratic has a negative discriminant")]
    NegativeDiscriminant,
    #[error("Curve arithmetic overflowed: {0}")]
    NumericOverflow(String),
}

/// The outcome of pricing one trade against a curve snapshot. Nothing has been applied yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeQuote {
    /// Currency side of the trade: the spend for a buy, the proceeds for a sell.
    pub usdp_amount: MicroUsdp,
    /// Share side of the trade: tokens received for a buy, tokens surrendered for a sell.
    pub pv_amount: MicroPv,
    pub avg_price: MicroUsdp,
    /// Marginal price before the trade.
    pub start_price: MicroUsdp,
    /// Marginal price after the trade; becomes the curve's new cached price.
    pub end_price: MicroUsdp,
    pub new_supply: MicroPv,
    pub new_total_usdp: MicroUsdp,
}

/// Recomputes the marginal price at the given supply. The curve's cached `current_price` must
/// always equal this value.
pub fn price_at(base_price: MicroUsdp, price_step: MicroUsdp, supply: MicroPv) -> Result<MicroUsdp, CurveError> {
    let price = base_price.to_decimal() + price_step.to_decimal() * supply.to_decimal();
    MicroUsdp::truncate_from_decimal(price).map_err(|e| CurveError::NumericOverflow(e.to_string()))
}

/// Quotes a buy: how many shares `spend` USDP purchases from the curve.
///
/// Solves `price_step/2·q² + current_price·q − spend = 0` for the positive root
/// `q = (√(p² + 2·step·spend) − p) / step`, degenerating to `q = spend / p` on a flat curve.
/// The quantity is truncated down to micro-units.
pub fn quote_buy(curve: &IssuerCurve, spend: MicroUsdp) -> Result<TradeQuote, CurveError> {
    if !spend.is_positive() {
        return Err(CurveError::NonPositiveAmount);
    }
    let p = curve.current_price.to_decimal();
    let step = curve.price_step.to_decimal();
    let amount = spend.to_decimal();
    // i64 micro-unit inputs keep every intermediate far below Decimal's 96-bit mantissa
    let quantity = if step.is_zero() {
        if p <= Decimal::ZERO {
            return Err(CurveError::DegenerateCurve);
        }
        amount / p
    } else {
        let discriminant = p * p + Decimal::TWO * step * amount;
        let root = discriminant.sqrt().ok_or(CurveError::NegativeDiscriminant)?;
        (root - p) / step
    };
    let tokens = MicroPv::truncate_from_decimal(quantity).map_err(|e| CurveError::NumericOverflow(e.to_string()))?;
    if !tokens.is_positive() {
        return Err(CurveError::ZeroFill);
    }
    let new_supply = curve.current_supply + tokens;
    let end_price = price_at(curve.base_price, curve.price_step, new_supply)?;
    let avg_price = MicroUsdp::truncate_from_decimal(amount / tokens.to_decimal())
        .map_err(|e| CurveError::NumericOverflow(e.to_string()))?;
    Ok(TradeQuote {
        usdp_amount: spend,
        pv_amount: tokens,
        avg_price,
        start_price: curve.current_price,
        end_price,
        new_supply,
        new_total_usdp: curve.total_usdp + spend,
    })
}

/// Quotes a sell: how much USDP the curve returns for `quantity` shares.
///
/// The definite integral of the price line over the quantity sold,
/// `y = q·(p − step·q/2)`, truncated down to micro-units. The quantity cannot exceed the
/// outstanding supply, and the payout cannot exceed what the curve holds.
pub fn quote_sell(curve: &IssuerCurve, quantity: MicroPv) -> Result<TradeQuote, CurveError> {
    if !quantity.is_positive() {
        return Err(CurveError::NonPositiveAmount);
    }
    if quantity > curve.current_supply {
        return Err(CurveError::SupplyExceeded { requested: quantity, supply: curve.current_supply });
    }
    let p = curve.current_price.to_decimal();
    let step = curve.price_step.to_decimal();
    let q = quantity.to_decimal();
    let gross = q * (p - step * q / Decimal::TWO);
    let proceeds =
        MicroUsdp::truncate_from_decimal(gross).map_err(|e| CurveError::NumericOverflow(e.to_string()))?;
    if !proceeds.is_positive() {
        return Err(CurveError::ZeroFill);
    }
    if proceeds > curve.total_usdp {
        return Err(CurveError::Undercollateralised { held: curve.total_usdp, payout: proceeds });
    }
    let new_supply = curve.current_supply - quantity;
    let end_price = price_at(curve.base_price, curve.price_step, new_supply)?;
    let avg_price = MicroUsdp::truncate_from_decimal(proceeds.to_decimal() / q)
        .map_err(|e| CurveError::NumericOverflow(e.to_string()))?;
    Ok(TradeQuote {
        usdp_amount: proceeds,
        pv_amount: quantity,
        avg_price,
        start_price: curve.current_price,
        end_price,
        new_supply,
        new_total_usdp: curve.total_usdp - proceeds,
    })
}
