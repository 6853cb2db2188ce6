//! Dynamic market selector.
//!
//! Periodically re-fetches market metadata, scores every market that clears
//! the eligibility thresholds, and publishes a ranked top-N watchlist. Feed
//! health (spread, update frequency) flows back in from the scheduler so the
//! ranking reflects live behavior, not just metadata.
//!
//! Failure semantics: fetch errors keep serving the last good watchlist and
//! back off exponentially; five consecutive failures with no good watchlist
//! pause the scheduler until a fetch succeeds.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use prism_market::{DiscoveryError, MarketMeta, MetadataClient};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::SelectorConfig;

/// Live feed statistics for one market, sampled once per selector tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedStats {
    pub spread_bps: Decimal,
    pub updates_per_min: Decimal,
}

/// One ranked watchlist entry.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchlistEntry {
    pub market_id: String,
    pub score: f64,
    pub rank: usize,
    pub eligible_until_ts: DateTime<Utc>,
}

/// The published watchlist, best first.
#[derive(Debug, Clone, Default)]
pub struct Watchlist {
    pub entries: Vec<WatchlistEntry>,
    pub ts: Option<DateTime<Utc>>,
}

impl Watchlist {
    pub fn market_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.market_id.clone()).collect()
    }

    pub fn contains(&self, market_id: &str) -> bool {
        self.entries.iter().any(|e| e.market_id == market_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Diff between two consecutive watchlists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchlistDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// (market_id, old_rank, new_rank)
    pub reranked: Vec<(String, usize, usize)>,
}

impl WatchlistDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.reranked.is_empty()
    }
}

/// Result of one selector tick.
#[derive(Debug, Clone)]
pub struct SelectorUpdate {
    pub watchlist: Watchlist,
    pub diff: WatchlistDiff,
    pub eligible_count: usize,
    /// Metadata for every market on the watchlist.
    pub metas: HashMap<String, MarketMeta>,
}

pub struct MarketSelector {
    config: SelectorConfig,
    client: MetadataClient,
    current: Watchlist,
    /// Markets on the list that failed thresholds last tick; two consecutive
    /// misses evict.
    failing: HashSet<String>,
    consecutive_fetch_failures: u32,
    backoff: Duration,
}

impl MarketSelector {
    pub fn new(config: SelectorConfig, client: MetadataClient) -> Self {
        Self {
            config,
            client,
            current: Watchlist::default(),
            failing: HashSet::new(),
            consecutive_fetch_failures: 0,
            backoff: Duration::from_secs(1),
        }
    }

    pub fn watchlist(&self) -> &Watchlist {
        &self.current
    }

    /// True when the selector has never produced (or has lost) a usable
    /// watchlist and fetches keep failing; the scheduler pauses on this.
    pub fn should_pause(&self) -> bool {
        self.consecutive_fetch_failures >= 5 && self.current.is_empty()
    }

    /// Current retry delay after a failed fetch (1s doubling to 30s, 10%
    /// deterministic jitter).
    pub fn retry_delay(&self) -> Duration {
        let jitter = self.backoff.as_millis() as u64 / 10;
        self.backoff + Duration::from_millis(jitter * (self.consecutive_fetch_failures as u64 % 2))
    }

    /// One selector tick: fetch, score, rank, diff. Idempotent per tick.
    /// On fetch failure the previous watchlist keeps serving.
    pub async fn refresh(
        &mut self,
        feed_stats: &HashMap<String, FeedStats>,
        now: DateTime<Utc>,
    ) -> Result<SelectorUpdate, DiscoveryError> {
        let markets = match self.client.fetch_markets().await {
            Ok(m) => {
                self.consecutive_fetch_failures = 0;
                self.backoff = Duration::from_secs(1);
                m
            }
            Err(e) => {
                self.consecutive_fetch_failures += 1;
                self.backoff = (self.backoff * 2).min(Duration::from_secs(30));
                warn!(
                    error = %e,
                    failures = self.consecutive_fetch_failures,
                    "metadata fetch failed, serving previous watchlist"
                );
                return Err(e);
            }
        };

        Ok(self.apply(markets, feed_stats, now))
    }

    /// Pure ranking step, separated from the fetch for testability.
    pub fn apply(
        &mut self,
        markets: Vec<MarketMeta>,
        feed_stats: &HashMap<String, FeedStats>,
        now: DateTime<Utc>,
    ) -> SelectorUpdate {
        let mut metas: HashMap<String, MarketMeta> = HashMap::new();
        let mut scored: Vec<(String, f64)> = Vec::new();
        let mut eligible_count = 0;
        let mut failing_next = HashSet::new();

        for m in markets {
            if !m.active {
                // Closed markets drop out immediately.
                continue;
            }
            let stats = feed_stats.get(&m.market_id).copied();
            let passes = self.passes_thresholds(&m, stats);
            if passes {
                eligible_count += 1;
            } else {
                let on_list = self.current.contains(&m.market_id);
                let failed_last_tick = self.failing.contains(&m.market_id);
                if on_list && !failed_last_tick {
                    // First miss: grace tick, stays ranked.
                    failing_next.insert(m.market_id.clone());
                } else {
                    continue;
                }
            }
            let score = self.score(&m, stats);
            metas.insert(m.market_id.clone(), m.clone());
            scored.push((m.market_id, score));
        }

        // Score descending, market_id ascending on ties for determinism.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(self.config.top_n_markets);

        let eligible_until = now + chrono::Duration::from_std(self.config.interval * 2)
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
        let entries: Vec<WatchlistEntry> = scored
            .iter()
            .enumerate()
            .map(|(i, (market_id, score))| WatchlistEntry {
                market_id: market_id.clone(),
                score: *score,
                rank: i + 1,
                eligible_until_ts: eligible_until,
            })
            .collect();

        let new_watchlist = Watchlist {
            entries,
            ts: Some(now),
        };
        let diff = diff_watchlists(&self.current, &new_watchlist);
        if !diff.is_empty() {
            info!(
                added = ?diff.added,
                removed = ?diff.removed,
                reranked = diff.reranked.len(),
                top = new_watchlist.entries.len(),
                eligible = eligible_count,
                "watchlist updated"
            );
        }

        self.failing = failing_next;
        self.current = new_watchlist.clone();
        metas.retain(|id, _| new_watchlist.contains(id));

        SelectorUpdate {
            watchlist: new_watchlist,
            diff,
            eligible_count,
            metas,
        }
    }

    fn passes_thresholds(&self, m: &MarketMeta, stats: Option<FeedStats>) -> bool {
        if m.volume_24h_usd < self.config.min_24h_volume_usd
            || m.liquidity_usd < self.config.min_liquidity_usd
        {
            return false;
        }
        // Feed-derived thresholds apply once the feed has produced stats;
        // before subscription there is nothing to measure.
        if let Some(s) = stats {
            if s.spread_bps < self.config.min_spread_bps
                || s.updates_per_min < self.config.min_updates_per_min
            {
                return false;
            }
        }
        true
    }

    fn score(&self, m: &MarketMeta, stats: Option<FeedStats>) -> f64 {
        let volume = m.volume_24h_usd.to_f64().unwrap_or(0.0).max(1.0);
        let liquidity = m.liquidity_usd.to_f64().unwrap_or(0.0).max(1.0);
        let (spread_bps, updates) = match stats {
            Some(s) => (
                s.spread_bps.to_f64().unwrap_or(0.0),
                s.updates_per_min.to_f64().unwrap_or(0.0),
            ),
            None => (0.0, 0.0),
        };
        self.config.w_volume * volume.ln()
            + self.config.w_liquidity * liquidity.ln()
            + self.config.w_spread * spread_bps
            + self.config.w_updates * updates
    }
}

/// Diff two watchlists into added / removed / reranked events.
pub fn diff_watchlists(old: &Watchlist, new: &Watchlist) -> WatchlistDiff {
    let old_ranks: HashMap<&str, usize> = old
        .entries
        .iter()
        .map(|e| (e.market_id.as_str(), e.rank))
        .collect();
    let new_ranks: HashMap<&str, usize> = new
        .entries
        .iter()
        .map(|e| (e.market_id.as_str(), e.rank))
        .collect();

    let mut diff = WatchlistDiff::default();
    for e in &new.entries {
        match old_ranks.get(e.market_id.as_str()) {
            None => diff.added.push(e.market_id.clone()),
            Some(&old_rank) if old_rank != e.rank => {
                diff.reranked.push((e.market_id.clone(), old_rank, e.rank));
            }
            _ => {}
        }
    }
    for e in &old.entries {
        if !new_ranks.contains_key(e.market_id.as_str()) {
            diff.removed.push(e.market_id.clone());
        }
    }
    diff
}
