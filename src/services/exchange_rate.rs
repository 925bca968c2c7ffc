//! Static exchange-rate lookup
//!
//! Rates come from configuration (a table keyed by fiat/crypto pair).
//! A missing pair falls back to 1.0 and is logged as a data-quality
//! warning rather than a silent zero.

use rust_decimal::Decimal;
use tracing::warn;

use crate::config::RatePair;

pub struct ExchangeRateService {
    pairs: Vec<RatePair>,
}

impl ExchangeRateService {
    pub fn new(pairs: Vec<RatePair>) -> Self {
        Self { pairs }
    }

    pub fn rate(&self, fiat: &str, crypto: &str) -> Option<Decimal> {
        self.pairs
            .iter()
            .find(|p| p.fiat.eq_ignore_ascii_case(fiat) && p.crypto.eq_ignore_ascii_case(crypto))
            .map(|p| p.rate)
    }

    /// `fiat_amount / rate`, the undisambiguated crypto amount.
    pub fn base_crypto_amount(&self, fiat_amount: Decimal, fiat: &str, crypto: &str) -> Decimal {
        let rate = match self.rate(fiat, crypto) {
            Some(rate) if !rate.is_zero() => rate,
            Some(_) => {
                warn!(fiat = %fiat, crypto = %crypto, "Configured exchange rate is zero, using 1.0");
                Decimal::ONE
            }
            None => {
                warn!(fiat = %fiat, crypto = %crypto, "No exchange rate configured, using 1.0");
                Decimal::ONE
            }
        };
        fiat_amount / rate
    }
}
