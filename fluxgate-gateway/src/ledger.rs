use std::collections::HashMap;

/// Builds the venue-agnostic subscription granule `<symbol>@<stream_type>`.
pub fn stream_key(symbol: &str, stream_type: &str) -> String {
    format!("{}@{}", symbol, stream_type)
}

/// Splits a stream key back into `(symbol, stream_type)`.
pub fn split_stream_key(key: &str) -> (&str, &str) {
    match key.split_once('@') {
        Some((symbol, stream_type)) => (symbol, stream_type),
        None => (key, ""),
    }
}

/// Reference counts of client demand per market and stream key.
///
/// An upstream stream stays subscribed while its count is >= 1; entries at
/// zero are pending an upstream UNSUBSCRIBE and are pruned afterwards.
/// Counts never go below zero: releasing an unknown key is a no-op.
#[derive(Debug, Default)]
pub struct SubscriptionLedger {
    counts: HashMap<String, HashMap<String, u32>>,
}

impl SubscriptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, keys: &[String], market: &str) {
        let market_counts = self.counts.entry(market.to_string()).or_default();
        for key in keys {
            *market_counts.entry(key.clone()).or_insert(0) += 1;
        }
    }

    pub fn remove(&mut self, keys: &[String], market: &str) {
        if let Some(market_counts) = self.counts.get_mut(market) {
            for key in keys {
                if let Some(count) = market_counts.get_mut(key) {
                    *count = count.saturating_sub(1);
                }
            }
        }
    }

    pub fn count(&self, key: &str, market: &str) -> u32 {
        self.counts
            .get(market)
            .and_then(|market_counts| market_counts.get(key))
            .copied()
            .unwrap_or(0)
    }

    /// Keys with live demand, in no particular order.
    pub fn active_keys(&self, market: &str) -> Vec<String> {
        self.counts
            .get(market)
            .map(|market_counts| {
                market_counts
                    .iter()
                    .filter(|&(_, &count)| count > 0)
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Keys whose demand has drained to zero and that still await an
    /// upstream UNSUBSCRIBE.
    pub fn zero_keys(&self, market: &str) -> Vec<String> {
        self.counts
            .get(market)
            .map(|market_counts| {
                market_counts
                    .iter()
                    .filter(|&(_, &count)| count == 0)
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops all zero-count entries for the market.
    pub fn prune(&mut self, market: &str) {
        if let Some(market_counts) = self.counts.get_mut(market) {
            market_counts.retain(|_, &mut count| count > 0);
            if market_counts.is_empty() {
                self.counts.remove(market);
            }
        }
    }
}
