//! Price aggregator (C2). A pure module: it ingests per-source ticks and,
//! on demand, produces a validated `PriceUpdate`. It never schedules
//! itself — the oracle service drives it on a timer.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::{Confidence, PriceSample, PriceUpdate};

const SAMPLE_RING_CAP: usize = 2000;
const FRESHNESS_CUTOFF_MS: i64 = 30_000;
const CIRCUIT_BREAKER_COOLDOWN_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy)]
struct SourceEntry {
    price: f64,
    timestamp_ms: i64,
}

struct Inner {
    sources: HashMap<String, SourceEntry>,
    samples: std::collections::VecDeque<PriceSample>,
    last_known_good: f64,
    tripped: bool,
    tripped_at_ms: i64,
}

/// Tunables enumerated in spec §4.2/§6.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    pub twap_window_ms: i64,
    pub circuit_breaker_pct: f64,
    pub min_sources: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            twap_window_ms: 300_000,
            circuit_breaker_pct: 10.0,
            min_sources: 1,
        }
    }
}

pub struct PriceAggregator {
    config: AggregatorConfig,
    inner: Mutex<Inner>,
}

impl PriceAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                sources: HashMap::new(),
                samples: std::collections::VecDeque::with_capacity(SAMPLE_RING_CAP),
                last_known_good: 0.0,
                tripped: false,
                tripped_at_ms: 0,
            }),
        }
    }

    pub fn config(&self) -> AggregatorConfig {
        self.config
    }

    /// Overwrite the freshest known value for `source`. The aggregator is
    /// interested only in the latest tick per source, not the stream.
    pub fn ingest_tick(&self, source: &str, price: f64, timestamp_ms: i64) {
        if price <= 0.0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.sources.insert(
            source.to_string(),
            SourceEntry { price, timestamp_ms },
        );
    }

    /// Run the full compute pipeline for `now`. Returns `None` if no source
    /// has ticked within the freshness window.
    pub fn compute_update(&self, now_ms: i64) -> Option<PriceUpdate> {
        let mut inner = self.inner.lock();

        // 1. Freshness filter.
        let mut fresh: Vec<(String, f64)> = inner
            .sources
            .iter()
            .filter(|(_, e)| now_ms - e.timestamp_ms < FRESHNESS_CUTOFF_MS)
            .map(|(name, e)| (name.clone(), e.price))
            .collect();
        if fresh.is_empty() {
            return None;
        }
        fresh.sort_by(|a, b| a.0.cmp(&b.0));

        // 2. Median combine.
        let mut prices: Vec<f64> = fresh.iter().map(|(_, p)| *p).collect();
        prices.sort_by(|a, b| a.partial_cmp(b).expect("prices are finite"));
        let n = prices.len();
        let median = if n % 2 == 1 {
            prices[n / 2]
        } else {
            (prices[n / 2 - 1] + prices[n / 2]) / 2.0
        };

        // 3. Circuit breaker.
        let mut circuit_breaker = false;
        let sample_price;
        if inner.last_known_good > 0.0 {
            let delta = (median - inner.last_known_good).abs() / inner.last_known_good;
            if delta > self.config.circuit_breaker_pct / 100.0 {
                if !inner.tripped {
                    inner.tripped = true;
                    inner.tripped_at_ms = now_ms;
                } else if now_ms - inner.tripped_at_ms >= CIRCUIT_BREAKER_COOLDOWN_MS {
                    // Cooldown elapsed; re-evaluate fresh against the same
                    // threshold. Still over threshold -> re-trip with a new window.
                    inner.tripped_at_ms = now_ms;
                }
                circuit_breaker = true;
                sample_price = inner.last_known_good;
            } else {
                inner.tripped = false;
                inner.last_known_good = median;
                sample_price = median;
            }
        } else {
            inner.last_known_good = median;
            sample_price = median;
        }

        inner.samples.push_back(PriceSample {
            price: sample_price,
            timestamp_ms: now_ms,
        });
        while inner.samples.len() > SAMPLE_RING_CAP {
            inner.samples.pop_front();
        }

        // 4. TWAP over the trailing window.
        let window_start = now_ms - self.config.twap_window_ms;
        let twap_5m = compute_twap(&inner.samples, window_start, now_ms, inner.last_known_good);

        // 5. Confidence.
        let confidence = if fresh.len() >= 3 {
            let min = prices[0];
            let max = prices[n - 1];
            let spread = (max - min) / min;
            if spread < 0.005 {
                Confidence::High
            } else if spread < 0.01 {
                Confidence::Medium
            } else {
                Confidence::Low
            }
        } else if fresh.len() == 2 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        let sources: Vec<String> = fresh.into_iter().map(|(name, _)| name).collect();

        Some(PriceUpdate {
            price: median,
            timestamp_ms: now_ms,
            sources,
            twap_5m,
            confidence,
            circuit_breaker,
        })
    }

    /// Number of sources currently known, regardless of freshness. Used by
    /// the oracle service only for logging context around degradation.
    pub fn source_count(&self) -> usize {
        self.inner.lock().sources.len()
    }

    /// The frozen reference price the circuit breaker measures deviation
    /// against. Used by the oracle service to report the actual frozen
    /// value on a `CIRCUIT_BREAKER` system event, rather than the TWAP.
    pub fn last_known_good(&self) -> f64 {
        self.inner.lock().last_known_good
    }
}

fn compute_twap(
    samples: &std::collections::VecDeque<PriceSample>,
    window_start: i64,
    now_ms: i64,
    fallback: f64,
) -> f64 {
    let in_window: Vec<&PriceSample> = samples
        .iter()
        .filter(|s| s.timestamp_ms >= window_start && s.timestamp_ms <= now_ms)
        .collect();

    match in_window.len() {
        0 => fallback.max(0.0),
        1 => in_window[0].price,
        _ => {
            let mut weighted_sum = 0.0;
            let mut total_weight = 0.0;
            for i in 0..in_window.len() {
                let next_ts = if i + 1 < in_window.len() {
                    in_window[i + 1].timestamp_ms
                } else {
                    now_ms
                };
                let weight = (next_ts - in_window[i].timestamp_ms).max(0) as f64;
                weighted_sum += in_window[i].price * weight;
                total_weight += weight;
            }
            if total_weight > 0.0 {
                weighted_sum / total_weight
            } else {
                in_window.last().unwrap().price
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_sources_returns_none() {
        let agg = PriceAggregator::new(AggregatorConfig::default());
        assert!(agg.compute_update(1_000_000).is_none());
    }

    #[test]
    fn stale_sources_return_none() {
        let agg = PriceAggregator::new(AggregatorConfig::default());
        agg.ingest_tick("kraken", 60_000.0, 0);
        assert!(agg.compute_update(40_000).is_none());
    }

    // S5: median aggregation across three fresh sources. The scenario's
    // worked example claims HIGH confidence at this spread (~0.83%), but
    // the literal step-5 cutoff (HIGH < 0.5%) puts it in the MEDIUM band;
    // the cutoff is taken as authoritative here (see DESIGN.md).
    #[test]
    fn median_of_three_sources() {
        let agg = PriceAggregator::new(AggregatorConfig::default());
        agg.ingest_tick("kraken", 60_000.0, 1_000);
        agg.ingest_tick("coinbase", 60_500.0, 1_000);
        agg.ingest_tick("bitstamp", 60_200.0, 1_000);

        let update = agg.compute_update(1_000).unwrap();
        assert_eq!(update.price, 60_200.0);
        assert_eq!(update.sources.len(), 3);
        assert_eq!(update.confidence, Confidence::Medium);
    }

    #[test]
    fn sources_are_each_unique_and_nonempty() {
        let agg = PriceAggregator::new(AggregatorConfig::default());
        agg.ingest_tick("kraken", 60_000.0, 1_000);
        let update = agg.compute_update(1_000).unwrap();
        assert!(!update.sources.is_empty());
        let mut sorted = update.sources.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), update.sources.len());
    }

    #[test]
    fn repeated_compute_is_deterministic_within_same_tick() {
        let agg = PriceAggregator::new(AggregatorConfig::default());
        agg.ingest_tick("kraken", 60_000.0, 1_000);
        agg.ingest_tick("coinbase", 60_500.0, 1_000);
        let a = agg.compute_update(1_000).unwrap();
        agg.ingest_tick("kraken", 60_000.0, 1_000);
        agg.ingest_tick("coinbase", 60_500.0, 1_000);
        let b = agg.compute_update(1_000).unwrap();
        assert_eq!(a.sources, b.sources);
        assert_eq!(a.confidence, b.confidence);
    }

    // S6: circuit breaker trip and cooldown.
    #[test]
    fn circuit_breaker_trips_and_freezes_last_known_good() {
        let agg = PriceAggregator::new(AggregatorConfig::default());
        agg.ingest_tick("kraken", 60_000.0, 0);
        let first = agg.compute_update(0).unwrap();
        assert!(!first.circuit_breaker);
        assert_eq!(first.twap_5m, 60_000.0);

        agg.ingest_tick("kraken", 72_000.0, 5_000);
        let tripped = agg.compute_update(5_000).unwrap();
        assert_eq!(tripped.price, 72_000.0);
        assert!(tripped.circuit_breaker);

        // Within the cooldown, still tripped at the same anomalous price.
        agg.ingest_tick("kraken", 72_000.0, 30_000);
        let still_tripped = agg.compute_update(30_000).unwrap();
        assert!(still_tripped.circuit_breaker);

        // last_known_good must not have advanced to 72000: a subsequent
        // tick back at 60000 should not itself look like an anomaly.
        agg.ingest_tick("kraken", 60_100.0, 31_000);
        let back_to_normal = agg.compute_update(31_000).unwrap();
        assert!(!back_to_normal.circuit_breaker);
    }

    #[test]
    fn sample_ring_never_exceeds_cap() {
        let agg = PriceAggregator::new(AggregatorConfig::default());
        for i in 0..(SAMPLE_RING_CAP as i64 + 50) {
            agg.ingest_tick("kraken", 60_000.0, i * 1000);
            agg.compute_update(i * 1000);
        }
        assert!(agg.inner.lock().samples.len() <= SAMPLE_RING_CAP);
    }

    #[test]
    fn twap_single_sample_equals_sample_price() {
        let samples: std::collections::VecDeque<PriceSample> = [PriceSample {
            price: 12345.0,
            timestamp_ms: 1000,
        }]
        .into_iter()
        .collect();
        assert_eq!(compute_twap(&samples, 0, 1000, 0.0), 12345.0);
    }

    #[test]
    fn two_source_confidence_is_medium() {
        let agg = PriceAggregator::new(AggregatorConfig::default());
        agg.ingest_tick("kraken", 60_000.0, 0);
        agg.ingest_tick("coinbase", 60_000.0, 0);
        let update = agg.compute_update(0).unwrap();
        assert_eq!(update.confidence, Confidence::Medium);
    }

    #[test]
    fn one_source_confidence_is_low() {
        let agg = PriceAggregator::new(AggregatorConfig::default());
        agg.ingest_tick("kraken", 60_000.0, 0);
        let update = agg.compute_update(0).unwrap();
        assert_eq!(update.confidence, Confidence::Low);
    }
}
