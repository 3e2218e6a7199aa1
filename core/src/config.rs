//! Engine configuration.
//!
//! Every weight is a named field with a documented default. Deployments
//! override them by shipping JSON files under a data directory; tests use
//! `ImpactConfig::default()`.

use serde::{Deserialize, Serialize};

use crate::types::Interval;

// ── Ranking score weights (additive method) ───────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Flat bonus for an artist profile claimed by its owner.
    pub claimed_bonus_artist: f64,
    /// Flat bonus for a claimed label profile.
    pub claimed_bonus_label: f64,
    /// Per radio spin in the window.
    pub spin_weight: f64,
    /// Per chart-reported spin in the window.
    pub chart_spin_weight: f64,
    /// Per chart appearance in the window.
    pub chart_appearance_bonus: f64,
    /// Per linked social account.
    pub social_weight: f64,
    pub release_weight: f64,
    pub video_weight: f64,
    /// Per video view (summed across all videos).
    pub view_weight: f64,
    /// Per post mentioning the entity by name.
    pub mention_weight: f64,
    /// Share of each roster artist's spin factor credited to its label.
    pub roster_spin_share: f64,
    /// Per active roster artist.
    pub roster_bonus: f64,
    /// Multiplier on a label's own social, view and EQS factors.
    pub label_own_factor: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            claimed_bonus_artist:   1000.0,
            claimed_bonus_label:    500.0,
            spin_weight:            10.0,
            chart_spin_weight:      2.0,
            chart_appearance_bonus: 50.0,
            social_weight:          40.0,
            release_weight:         25.0,
            video_weight:           15.0,
            view_weight:            0.01,
            mention_weight:         20.0,
            roster_spin_share:      0.25,
            roster_bonus:           100.0,
            label_own_factor:       0.5,
        }
    }
}

// ── Ranking run ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Intervals computed by each batch cycle, in order.
    pub intervals: Vec<Interval>,
    /// Score boost for investor-owned entities, applied after ordering.
    pub investor_multiplier: f64,
    pub apply_investor_multiplier: bool,
    /// Scoring threads per entity type. Only file-backed stores run in parallel.
    pub workers: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            intervals: vec![Interval::Daily, Interval::Weekly, Interval::Monthly],
            investor_multiplier: 1.05,
            apply_investor_multiplier: true,
            workers: 1,
        }
    }
}

// ── Leaderboard cache ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_hours: i64,
    pub default_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_hours: 6, default_limit: 50 }
    }
}

// ── Trust score (normalized method) ───────────────────────────────

/// Factor weights for the normalized 0–100 trust score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustWeights {
    pub spins:      f64,
    pub plays:      f64,
    pub engagement: f64,
    pub sparks:     f64,
    pub momentum:   f64,
}

impl Default for TrustWeights {
    fn default() -> Self {
        Self { spins: 0.25, plays: 0.25, engagement: 0.25, sparks: 0.15, momentum: 0.10 }
    }
}

impl TrustWeights {
    /// Scale the weights so they sum to 1. All-zero input falls back to defaults.
    pub fn normalized(&self) -> Self {
        let parts = [self.spins, self.plays, self.engagement, self.sparks, self.momentum];
        if parts.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Self::default();
        }
        let total: f64 = parts.iter().sum();
        if total <= 0.0 {
            return Self::default();
        }
        Self {
            spins:      self.spins / total,
            plays:      self.plays / total,
            engagement: self.engagement / total,
            sparks:     self.sparks / total,
            momentum:   self.momentum / total,
        }
    }
}

/// Points per engagement kind when building the engagement sub-score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementPoints {
    pub like:    f64,
    pub comment: f64,
    pub share:   f64,
    pub save:    f64,
}

impl Default for EngagementPoints {
    fn default() -> Self {
        Self { like: 1.0, comment: 3.0, share: 5.0, save: 2.0 }
    }
}

/// Every parameter of the normalized trust formula. A copy is stored with
/// each `normalized_v1` history record and replays read it from there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustFormula {
    pub weights: TrustWeights,
    pub engagement_points: EngagementPoints,
    /// Raw value that maps to a full 100 sub-score (log scaled).
    pub spins_cap:      f64,
    pub plays_cap:      f64,
    pub views_cap:      f64,
    pub engagement_cap: f64,
    pub sparks_cap:     f64,
    /// Momentum sub-score gained per percent of follower growth, around 50.
    pub momentum_per_growth_pct: f64,
    /// Like share of all engagement above which the fraud penalty applies.
    pub fraud_like_ratio: f64,
    pub fraud_penalty: f64,
    /// Reputation multiplier range mapped from a 0–100 reputation score.
    pub reputation_floor:   f64,
    pub reputation_ceiling: f64,
    /// Reputation assumed when an entity has none on file.
    pub neutral_reputation: f64,
}

impl Default for TrustFormula {
    fn default() -> Self {
        Self {
            weights: TrustWeights::default(),
            engagement_points: EngagementPoints::default(),
            spins_cap:      500.0,
            plays_cap:      10_000.0,
            views_cap:      100_000.0,
            engagement_cap: 2_000.0,
            sparks_cap:     1_000.0,
            momentum_per_growth_pct: 1.0,
            fraud_like_ratio: 0.95,
            fraud_penalty:    0.15,
            reputation_floor:   0.8,
            reputation_ceiling: 1.2,
            neutral_reputation: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustModelConfig {
    #[serde(flatten)]
    pub formula: TrustFormula,
    /// Absolute difference below which a recomputed score matches.
    pub match_tolerance: f64,
    /// Window the batch trust scorer records scores over.
    pub interval: Interval,
    /// Maximum entities verified per bulk verification pass.
    pub bulk_verification_limit: usize,
}

impl Default for TrustModelConfig {
    fn default() -> Self {
        Self {
            formula: TrustFormula::default(),
            match_tolerance: 0.01,
            interval: Interval::Daily,
            bulk_verification_limit: 200,
        }
    }
}

// ── Integrity score ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    pub pass_rate_target:          f64,
    pub pass_rate_penalty:         f64,
    pub correction_rate_threshold: f64,
    pub correction_penalty_factor: f64,
    pub correction_penalty_cap:    f64,
    pub dispute_penalty:           f64,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            pass_rate_target:          90.0,
            pass_rate_penalty:         0.5,
            correction_rate_threshold: 5.0,
            correction_penalty_factor: 2.0,
            correction_penalty_cap:    30.0,
            dispute_penalty:           5.0,
        }
    }
}

// ── Top level ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactConfig {
    pub scoring:   ScoreWeights,
    pub ranking:   RankingConfig,
    pub cache:     CacheConfig,
    pub trust:     TrustModelConfig,
    pub integrity: IntegrityConfig,
}

impl ImpactConfig {
    /// Load from a data directory laid out as:
    ///   scoring/score_weights.json
    ///   ranking/ranking_config.json   (also carries "cache")
    ///   trust/trust_model.json        (also carries "integrity")
    ///
    /// Fields missing from a file keep their defaults.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let scoring: ScoreWeights = read_json(data_dir, "scoring/score_weights.json")?;

        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct RankingFile {
            ranking: RankingConfig,
            cache:   CacheConfig,
        }
        let ranking_file: RankingFile = read_json(data_dir, "ranking/ranking_config.json")?;

        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct TrustFile {
            trust:     TrustModelConfig,
            integrity: IntegrityConfig,
        }
        let trust_file: TrustFile = read_json(data_dir, "trust/trust_model.json")?;

        let config = Self {
            scoring,
            ranking: ranking_file.ranking,
            cache: ranking_file.cache,
            trust: trust_file.trust,
            integrity: trust_file.integrity,
        };
        if config.ranking.intervals.is_empty() {
            anyhow::bail!("ranking.intervals must name at least one interval");
        }
        log::info!(
            "Loaded config from {data_dir}: intervals={:?} workers={}",
            config.ranking.intervals,
            config.ranking.workers
        );
        Ok(config)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(data_dir: &str, rel: &str) -> anyhow::Result<T> {
    let path = format!("{data_dir}/{rel}");
    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    serde_json::from_str(&content).map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))
}
