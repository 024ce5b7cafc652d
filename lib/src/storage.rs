use tracing::warn;

use crate::price_series::*;

#[cfg(test)]
use mockall::{automock};

/// Source of raw price histories.
#[cfg_attr(test, automock)]
pub trait Storage {
    fn save_price_history(&mut self, series : &PriceSeries) -> anyhow::Result<()>;
    fn load_price_history(&mut self, key : &SeriesKey) -> anyhow::Result<PriceSeries>;
}

/// Reads from `primary` and falls back to `fallback` when the primary cannot provide a
/// series; writes always go to the primary.
pub struct FallbackStorage<P, F> {
    primary : P,
    fallback : F
}

impl<P : Storage, F : Storage> FallbackStorage<P, F> {
    pub fn new(primary : P, fallback : F) -> FallbackStorage<P, F> {
        FallbackStorage { primary, fallback }
    }
}

impl<P : Storage, F : Storage> Storage for FallbackStorage<P, F> {
    fn save_price_history(&mut self, series : &PriceSeries) -> anyhow::Result<()> {
        self.primary.save_price_history(series)
    }

    fn load_price_history(&mut self, key : &SeriesKey) -> anyhow::Result<PriceSeries> {
        match self.primary.load_price_history(key) {
            Ok(series) => Ok(series),
            Err(error) => {
                warn!(key = %key, "Primary price source failed ({:#}), using fallback", error);
                self.fallback.load_price_history(key)
            }
        }
    }
}
