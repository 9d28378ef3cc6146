//! Venue rounding rules, applied once at the order edge.
//!
//! Every outbound price and quantity passes through this table before
//! transmission so precision handling never leaks into strategy or sizing
//! code.

use crate::domain::trading::types::{Symbol, Venue};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceField {
    Price,
    Quantity,
}

/// Decimal places the venue accepts for the given symbol and field.
pub fn venue_precision(venue: Venue, symbol: &Symbol, field: PriceField) -> u32 {
    match venue {
        Venue::Alpaca | Venue::Mock => match field {
            // US equities quote in cents; fractional shares go to 9 places.
            PriceField::Price => 2,
            PriceField::Quantity => 9,
        },
        Venue::Kraken => match field {
            PriceField::Price => {
                if is_major_crypto(symbol) {
                    1
                } else {
                    2
                }
            }
            PriceField::Quantity => 8,
        },
    }
}

/// Round a value down to the venue-allowed precision.
///
/// Rounds toward zero so a rounded quantity never exceeds buying power and a
/// rounded limit never crosses the intended level.
pub fn round_for_venue(
    venue: Venue,
    symbol: &Symbol,
    field: PriceField,
    value: Decimal,
) -> Decimal {
    value.trunc_with_scale(venue_precision(venue, symbol, field))
}

fn is_major_crypto(symbol: &Symbol) -> bool {
    let base = symbol.as_str().split('/').next().unwrap_or("");
    matches!(base, "XBT" | "BTC" | "ETH")
}
