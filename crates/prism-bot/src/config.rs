//! Configuration for prism-bot.
//!
//! Environment-first: every knob is an environment variable (a `.env` file is
//! loaded by `main` before parsing). The loaded `BotConfig` is an immutable
//! value passed into the engine at startup; only the scheduler's small
//! operational state (kill switch, pause) is mutable at runtime.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;

/// Which pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Selector + feed + storage only; no strategies, no broker.
    Scanner,
    /// The full core.
    Paper,
    /// Replay persisted tape through the identical downstream pipeline.
    Backtest,
}

impl RunMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "scanner" => Some(RunMode::Scanner),
            "paper" => Some(RunMode::Paper),
            "backtest" => Some(RunMode::Backtest),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Scanner => write!(f, "scanner"),
            RunMode::Paper => write!(f, "paper"),
            RunMode::Backtest => write!(f, "backtest"),
        }
    }
}

/// Paper vs live. Live order submission is refused at validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeMode {
    Paper,
    Live,
}

/// Broker behavior: simulate fills, or log-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Paper,
    Shadow,
}

/// Paper fill semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillModel {
    /// Resting limits fill when the opposing touch reaches them.
    MakerTouch,
    /// Resting limits fill only when a trade print crosses them.
    TradeThrough,
}

impl std::fmt::Display for FillModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillModel::MakerTouch => write!(f, "maker_touch"),
            FillModel::TradeThrough => write!(f, "trade_through"),
        }
    }
}

/// Market selector thresholds and cadence.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub interval: Duration,
    pub top_n_markets: usize,
    pub min_24h_volume_usd: Decimal,
    pub min_liquidity_usd: Decimal,
    pub min_spread_bps: Decimal,
    pub min_updates_per_min: Decimal,
    /// Score weights: volume, liquidity, spread, update-frequency.
    pub w_volume: f64,
    pub w_liquidity: f64,
    pub w_spread: f64,
    pub w_updates: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            top_n_markets: 20,
            min_24h_volume_usd: Decimal::from(20_000),
            min_liquidity_usd: Decimal::from(5_000),
            min_spread_bps: Decimal::from(20),
            min_updates_per_min: Decimal::from(6),
            w_volume: 1.0,
            w_liquidity: 1.0,
            w_spread: 0.5,
            w_updates: 0.2,
        }
    }
}

/// Risk limits.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub kill_switch: bool,
    pub daily_loss_limit: Decimal,
    pub reject_feed_lag_ms: u64,
    pub max_spread_bps: Decimal,
    pub max_position_per_market: Decimal,
    pub max_event_exposure_usd: Decimal,
    /// 0 disables the open-positions cap.
    pub max_open_positions: usize,
    /// 0 disables the position time stop.
    pub max_pos_age_secs: u64,
    pub unwind_interval_secs: u64,
    pub unwind_max_markets_per_cycle: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            kill_switch: false,
            daily_loss_limit: Decimal::from(200),
            reject_feed_lag_ms: 100,
            max_spread_bps: Decimal::from(1_500),
            max_position_per_market: Decimal::from(200),
            max_event_exposure_usd: Decimal::from(500),
            max_open_positions: 10,
            max_pos_age_secs: 0,
            unwind_interval_secs: 10,
            unwind_max_markets_per_cycle: 2,
        }
    }
}

/// Market-making strategy knobs.
#[derive(Debug, Clone)]
pub struct MmConfig {
    pub min_half_spread: Decimal,
    pub edge_ticks: Decimal,
    pub skew_k: Decimal,
    pub min_quote_life_secs: f64,
    /// Reprice threshold in ticks.
    pub reprice_threshold: Decimal,
    /// Absolute spread above which both sides are pulled.
    pub max_spread: Decimal,
}

impl Default for MmConfig {
    fn default() -> Self {
        Self {
            min_half_spread: Decimal::new(5, 3), // 0.005
            edge_ticks: Decimal::ONE,
            skew_k: Decimal::new(25, 2), // 0.25
            min_quote_life_secs: 1.0,
            reprice_threshold: Decimal::TWO,
            max_spread: Decimal::new(20, 2), // 0.20
        }
    }
}

/// Cross-venue fair-value strategy knobs.
#[derive(Debug, Clone)]
pub struct FvConfig {
    pub entry_edge: Decimal,
    pub exit_edge: Decimal,
    pub depth_mult: Decimal,
    pub max_staleness: Duration,
    pub time_stop_secs: u64,
    /// Conservative buffers folded into the fair price (bps).
    pub fees_bps: Decimal,
    pub slippage_bps: Decimal,
    pub latency_bps: Decimal,
    /// Use the seeded mock provider instead of the inert stub.
    pub use_mock_provider: bool,
}

impl Default for FvConfig {
    fn default() -> Self {
        Self {
            entry_edge: Decimal::new(2, 2),  // 0.02
            exit_edge: Decimal::new(5, 3),   // 0.005
            depth_mult: Decimal::new(15, 1), // 1.5
            max_staleness: Duration::from_secs(2),
            time_stop_secs: 300,
            fees_bps: Decimal::ZERO,
            slippage_bps: Decimal::from(10),
            latency_bps: Decimal::from(5),
            use_mock_provider: true,
        }
    }
}

/// Paper-execution frictions.
#[derive(Debug, Clone)]
pub struct PaperConfig {
    pub fill_model: FillModel,
    pub slippage_bps: Decimal,
    pub fees_bps: Decimal,
    pub min_rest_secs: f64,
    pub participation: Decimal,
    pub reset_on_start: bool,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            fill_model: FillModel::MakerTouch,
            slippage_bps: Decimal::ZERO,
            fees_bps: Decimal::ZERO,
            min_rest_secs: 1.0,
            participation: Decimal::new(5, 1), // 0.5
            reset_on_start: false,
        }
    }
}

/// Feed and scheduler plumbing.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub clob_ws_url: String,
    pub gamma_base_url: String,
    /// Merged feed channel capacity.
    pub queue_capacity: usize,
    pub idle_tick: Duration,
    pub strategy_min_interval: Duration,
    pub snapshot_interval: Duration,
    /// Network budgets (connect, read inactivity, metadata fetch).
    pub network_timeout: Duration,
    pub permanent_attempts: u32,
    /// Drive the engine from the synthetic feed instead of the live socket.
    pub mock_feed: bool,
    pub mock_feed_seed: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            clob_ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
            gamma_base_url: "https://gamma-api.polymarket.com".to_string(),
            queue_capacity: 10_000,
            idle_tick: Duration::from_millis(20),
            strategy_min_interval: Duration::from_millis(50),
            snapshot_interval: Duration::from_secs(5),
            network_timeout: Duration::from_secs(10),
            permanent_attempts: 20,
            mock_feed: false,
            mock_feed_seed: 11,
        }
    }
}

/// Backtest bounds and pacing.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Multiplier on wall-clock; 0 replays at maximum speed.
    pub speed: f64,
    pub start_ts: Option<f64>,
    pub end_ts: Option<f64>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            speed: 50.0,
            start_ts: None,
            end_ts: None,
        }
    }
}

/// Which strategies run.
#[derive(Debug, Clone)]
pub struct StrategiesConfig {
    pub fair_value: bool,
    pub market_maker: bool,
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            fair_value: true,
            market_maker: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub run_mode: RunMode,
    pub trade_mode: TradeMode,
    pub execution_mode: ExecutionMode,
    pub target_size: Decimal,
    pub strategies: StrategiesConfig,
    pub selector: SelectorConfig,
    pub risk: RiskConfig,
    pub mm: MmConfig,
    pub fv: FvConfig,
    pub paper: PaperConfig,
    pub feed: FeedConfig,
    pub backtest: BacktestConfig,
    pub sqlite_path: String,
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            run_mode: RunMode::Paper,
            trade_mode: TradeMode::Paper,
            execution_mode: ExecutionMode::Paper,
            target_size: Decimal::from(10),
            strategies: StrategiesConfig::default(),
            selector: SelectorConfig::default(),
            risk: RiskConfig::default(),
            mm: MmConfig::default(),
            fv: FvConfig::default(),
            paper: PaperConfig::default(),
            feed: FeedConfig::default(),
            backtest: BacktestConfig::default(),
            sqlite_path: "./data/prism.sqlite".to_string(),
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_decimal(key: &str, default: Decimal) -> Result<Decimal> {
    match env_str(key) {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{} must be a decimal number, got {:?}", key, v)),
        None => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env_str(key) {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{} must be an integer, got {:?}", key, v)),
        None => Ok(default),
    }
}

fn env_f64(key: &str, default: f64) -> Result<f64> {
    match env_str(key) {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got {:?}", key, v)),
        None => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_str(key) {
        Some(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
        None => default,
    }
}

impl BotConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = BotConfig::default();

        if let Some(v) = env_str("RUN_MODE") {
            config.run_mode = RunMode::from_str(&v)
                .with_context(|| format!("RUN_MODE must be scanner|paper|backtest, got {:?}", v))?;
        }
        if let Some(v) = env_str("TRADE_MODE") {
            config.trade_mode = match v.to_lowercase().as_str() {
                "paper" => TradeMode::Paper,
                "live" => TradeMode::Live,
                other => bail!("TRADE_MODE must be paper|live, got {:?}", other),
            };
        }
        if let Some(v) = env_str("EXECUTION_MODE") {
            config.execution_mode = match v.to_lowercase().as_str() {
                "paper" => ExecutionMode::Paper,
                "shadow" => ExecutionMode::Shadow,
                other => bail!("EXECUTION_MODE must be paper|shadow, got {:?}", other),
            };
        }
        if let Some(v) = env_str("PAPER_FILL_MODEL") {
            config.paper.fill_model = match v.to_lowercase().as_str() {
                "maker_touch" => FillModel::MakerTouch,
                "trade_through" => FillModel::TradeThrough,
                other => bail!("PAPER_FILL_MODEL must be maker_touch|trade_through, got {:?}", other),
            };
        }

        config.target_size = env_decimal("TARGET_SIZE", config.target_size)?;
        config.strategies.fair_value = env_bool("ENABLE_FV_STRATEGY", config.strategies.fair_value);
        config.strategies.market_maker = env_bool("ENABLE_MM_STRATEGY", config.strategies.market_maker);

        // Selector
        let s = &mut config.selector;
        s.interval = Duration::from_secs(env_u64("SELECTOR_INTERVAL_SECS", 60)?);
        s.top_n_markets = env_u64("TOP_N_MARKETS", s.top_n_markets as u64)? as usize;
        s.min_24h_volume_usd = env_decimal("MIN_24H_VOLUME_USD", s.min_24h_volume_usd)?;
        s.min_liquidity_usd = env_decimal("MIN_LIQUIDITY_USD", s.min_liquidity_usd)?;
        s.min_spread_bps = env_decimal("MIN_SPREAD_BPS", s.min_spread_bps)?;
        s.min_updates_per_min = env_decimal("MIN_UPDATES_MIN", s.min_updates_per_min)?;

        // Risk
        let r = &mut config.risk;
        r.kill_switch = env_bool("KILL_SWITCH", r.kill_switch);
        r.daily_loss_limit = env_decimal("DAILY_LOSS_LIMIT", r.daily_loss_limit)?;
        r.reject_feed_lag_ms = env_u64("REJECT_FEED_LAG_MS", r.reject_feed_lag_ms)?;
        r.max_spread_bps = env_decimal("MAX_SPREAD_BPS", r.max_spread_bps)?;
        r.max_position_per_market =
            env_decimal("MAX_POSITION_PER_MARKET", r.max_position_per_market)?;
        r.max_event_exposure_usd =
            env_decimal("MAX_EVENT_EXPOSURE_USD", r.max_event_exposure_usd)?;
        r.max_open_positions = env_u64("MAX_OPEN_POSITIONS", r.max_open_positions as u64)? as usize;
        r.max_pos_age_secs = env_u64("MAX_POS_AGE_SECS", r.max_pos_age_secs)?;
        r.unwind_interval_secs = env_u64("UNWIND_INTERVAL_SECS", r.unwind_interval_secs)?;
        r.unwind_max_markets_per_cycle =
            env_u64("UNWIND_MAX_MARKETS_PER_CYCLE", r.unwind_max_markets_per_cycle as u64)? as usize;

        // Market making
        let mm = &mut config.mm;
        mm.min_half_spread = env_decimal("MM_MIN_HALF_SPREAD", mm.min_half_spread)?;
        mm.edge_ticks = env_decimal("MM_EDGE_TICKS", mm.edge_ticks)?;
        mm.skew_k = env_decimal("MM_SKEW_K", mm.skew_k)?;
        mm.min_quote_life_secs = env_f64("MM_MIN_QUOTE_LIFE_SECS", mm.min_quote_life_secs)?;
        mm.reprice_threshold = env_decimal("MM_REPRICE_THRESHOLD", mm.reprice_threshold)?;
        mm.max_spread = env_decimal("MM_MAX_SPREAD", mm.max_spread)?;

        // Fair value
        let fv = &mut config.fv;
        fv.entry_edge = env_decimal("FV_ENTRY_EDGE", fv.entry_edge)?;
        fv.exit_edge = env_decimal("FV_EXIT_EDGE", fv.exit_edge)?;
        fv.depth_mult = env_decimal("FV_DEPTH_MULT", fv.depth_mult)?;
        fv.max_staleness = Duration::from_millis(env_u64("FV_MAX_STALENESS_MS", 2_000)?);
        fv.time_stop_secs = env_u64("FV_TIME_STOP_SECS", fv.time_stop_secs)?;
        fv.fees_bps = env_decimal("FEES_BPS", fv.fees_bps)?;
        fv.slippage_bps = env_decimal("SLIPPAGE_BPS", fv.slippage_bps)?;
        fv.latency_bps = env_decimal("LATENCY_BPS", fv.latency_bps)?;
        fv.use_mock_provider = env_bool("FV_MOCK_PROVIDER", fv.use_mock_provider);

        // Paper frictions
        let p = &mut config.paper;
        p.slippage_bps = env_decimal("SLIPPAGE_BPS", p.slippage_bps)?;
        p.fees_bps = env_decimal("FEES_BPS", p.fees_bps)?;
        p.min_rest_secs = env_f64("PAPER_MIN_REST_SECS", p.min_rest_secs)?;
        p.participation = env_decimal("PAPER_PARTICIPATION", p.participation)?;
        p.reset_on_start = env_bool("PAPER_RESET_ON_START", p.reset_on_start);

        // Feed / scheduler plumbing
        let f = &mut config.feed;
        if let Some(v) = env_str("CLOB_WS_URL") {
            f.clob_ws_url = v;
        }
        if let Some(v) = env_str("GAMMA_BASE_URL") {
            f.gamma_base_url = v;
        }
        f.queue_capacity = env_u64("FEED_QUEUE", f.queue_capacity as u64)? as usize;
        f.idle_tick = Duration::from_millis(env_u64("IDLE_TICK_MS", 20)?);
        f.strategy_min_interval =
            Duration::from_millis(env_u64("STRATEGY_MIN_INTERVAL_MS", 50)?);
        f.snapshot_interval = Duration::from_secs(env_u64("SNAPSHOT_INTERVAL_SECS", 5)?);
        f.network_timeout = Duration::from_secs(env_u64("NETWORK_TIMEOUT_SECS", 10)?);
        f.permanent_attempts = env_u64("N_PERMANENT_ATTEMPTS", f.permanent_attempts as u64)? as u32;
        f.mock_feed = env_bool("MOCK_FEED", f.mock_feed);
        f.mock_feed_seed = env_u64("MOCK_FEED_SEED", f.mock_feed_seed)?;

        // Backtest
        let b = &mut config.backtest;
        b.speed = env_f64("BACKTEST_SPEED", b.speed)?;
        b.start_ts = match env_str("BACKTEST_START_TS") {
            Some(v) => Some(v.trim().parse().context("BACKTEST_START_TS must be a unix timestamp")?),
            None => None,
        };
        b.end_ts = match env_str("BACKTEST_END_TS") {
            Some(v) => Some(v.trim().parse().context("BACKTEST_END_TS must be a unix timestamp")?),
            None => None,
        };

        if let Some(v) = env_str("SQLITE_PATH") {
            config.sqlite_path = v;
        }
        if let Some(v) = env_str("LOG_LEVEL") {
            config.log_level = v;
        }
        config.json_logs = env_bool("JSON_LOGS", config.json_logs);

        Ok(config)
    }

    /// Validate the configuration; the engine refuses to run on failure.
    pub fn validate(&self) -> Result<()> {
        if self.trade_mode == TradeMode::Live {
            bail!("TRADE_MODE=live is not supported by this build; paper only");
        }
        if self.sqlite_path.trim().is_empty() {
            bail!("SQLITE_PATH is empty; point it at a writable file");
        }
        if self.target_size <= Decimal::ZERO {
            bail!("TARGET_SIZE must be positive");
        }
        if self.selector.top_n_markets == 0 {
            bail!("TOP_N_MARKETS must be at least 1");
        }
        if self.risk.max_position_per_market <= Decimal::ZERO {
            bail!("MAX_POSITION_PER_MARKET must be positive");
        }
        if self.risk.max_event_exposure_usd <= Decimal::ZERO {
            bail!("MAX_EVENT_EXPOSURE_USD must be positive");
        }
        if self.risk.daily_loss_limit <= Decimal::ZERO {
            bail!("DAILY_LOSS_LIMIT must be positive");
        }
        if self.paper.participation <= Decimal::ZERO || self.paper.participation > Decimal::ONE {
            bail!("PAPER_PARTICIPATION must be in (0, 1]");
        }
        if self.mm.min_half_spread <= Decimal::ZERO {
            bail!("MM_MIN_HALF_SPREAD must be positive");
        }
        if self.fv.entry_edge <= self.fv.exit_edge {
            bail!("FV_ENTRY_EDGE must exceed FV_EXIT_EDGE");
        }
        if self.backtest.speed < 0.0 {
            bail!("BACKTEST_SPEED must be >= 0 (0 = max speed)");
        }
        if let (Some(start), Some(end)) = (self.backtest.start_ts, self.backtest.end_ts) {
            if end < start {
                bail!("BACKTEST_END_TS must not precede BACKTEST_START_TS");
            }
        }
        Ok(())
    }
}
