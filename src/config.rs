use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;

/// The scheduling policy run at every epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Policy {
    /// Efficiency-sorted greedy admission.
    #[serde(rename = "greedy")]
    Greedy,
    /// LP relaxation + tripartite matching + fractional local ratio.
    #[serde(rename = "graphMatch")]
    GraphMatch,
    /// Category-partitioned local-ratio approximation (energy flavor).
    #[serde(rename = "quickLR")]
    QuickLr,
    /// Category-partitioned local-ratio approximation (accuracy flavor).
    #[serde(rename = "fastSA")]
    FastSa,
    /// Non-cooperative baseline; runs on the greedy backbone.
    #[serde(rename = "gameTheory")]
    GameTheory,
}

impl FromStr for Policy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greedy" => Ok(Policy::Greedy),
            "graphMatch" => Ok(Policy::GraphMatch),
            "quickLR" => Ok(Policy::QuickLr),
            "fastSA" => Ok(Policy::FastSa),
            "gameTheory" => Ok(Policy::GameTheory),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

/// What a candidate's utility measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UtilityModel {
    /// Energy saved per unit period (default).
    Energy,
    /// Inference accuracy per unit period, via catalog quality tiers.
    Accuracy,
}

impl FromStr for UtilityModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "energy" => Ok(UtilityModel::Energy),
            "accuracy" => Ok(UtilityModel::Accuracy),
            other => Err(ConfigError::UnknownUtility(other.to_string())),
        }
    }
}

/// The closed configuration set of the scheduling core.
///
/// Validated once at engine construction; all values are fixed for the
/// engine's lifetime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerConfig {
    pub policy: Policy,

    pub utility: UtilityModel,

    /// Fraction of an RSU's available resources any single service instance
    /// may take. The graph-matching LP is capped by the complement,
    /// `ceil(available * (1 - fair_factor))`.
    pub fair_factor: f64,

    /// Enumeration step for resource blocks (counting down from the max).
    pub rb_step: u32,

    /// Enumeration step for computing units (counting down from the max).
    pub cu_step: u32,

    /// Fixed per-job setup delay (seconds) added to every offload.
    pub offload_overhead: f64,

    /// Backhaul bandwidth per hop, bytes per second.
    pub virtual_link_rate: f64,

    /// Maximum age (seconds) of a usable link sample.
    pub freshness_horizon: f64,

    /// Wall-clock budget (seconds) per LP solve. Overrun is logged, not fatal.
    pub lp_time_limit: f64,

    /// TTI duration (seconds) backing the per-TTI link-rate unit.
    pub tti: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: Policy::Greedy,
            utility: UtilityModel::Energy,
            fair_factor: 1.0,
            rb_step: 1,
            cu_step: 1,
            offload_overhead: 0.001,
            virtual_link_rate: 1.25e8, // 1 Gbps
            freshness_horizon: 1.0,
            lp_time_limit: 5.0,
            tti: 0.001,
        }
    }
}

impl SchedulerConfig {
    /// Build a config from `EDGESCHED_*` environment variables, falling back
    /// to the compile-time defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            policy: env_parse("EDGESCHED_POLICY").unwrap_or(d.policy),
            utility: env_parse("EDGESCHED_UTILITY").unwrap_or(d.utility),
            fair_factor: env_parse("EDGESCHED_FAIR_FACTOR").unwrap_or(d.fair_factor),
            rb_step: env_parse("EDGESCHED_RB_STEP").unwrap_or(d.rb_step),
            cu_step: env_parse("EDGESCHED_CU_STEP").unwrap_or(d.cu_step),
            offload_overhead: env_parse("EDGESCHED_OFFLOAD_OVERHEAD").unwrap_or(d.offload_overhead),
            virtual_link_rate: env_parse("EDGESCHED_VIRTUAL_LINK_RATE")
                .unwrap_or(d.virtual_link_rate),
            freshness_horizon: env_parse("EDGESCHED_FRESHNESS_HORIZON")
                .unwrap_or(d.freshness_horizon),
            lp_time_limit: env_parse("EDGESCHED_LP_TIME_LIMIT").unwrap_or(d.lp_time_limit),
            tti: env_parse("EDGESCHED_TTI").unwrap_or(d.tti),
        }
    }

    /// Validate the configuration. A failure here is the only hard error the
    /// core raises; everything at epoch time degrades to a local skip.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.fair_factor) {
            return Err(ConfigError::FairFactorOutOfRange(self.fair_factor));
        }
        if self.rb_step == 0 {
            return Err(ConfigError::NonPositive {
                name: "rb_step",
                value: 0.0,
            });
        }
        if self.cu_step == 0 {
            return Err(ConfigError::NonPositive {
                name: "cu_step",
                value: 0.0,
            });
        }
        if self.virtual_link_rate <= 0.0 {
            return Err(ConfigError::NonPositive {
                name: "virtual_link_rate",
                value: self.virtual_link_rate,
            });
        }
        if self.tti <= 0.0 {
            return Err(ConfigError::NonPositive {
                name: "tti",
                value: self.tti,
            });
        }
        if self.lp_time_limit <= 0.0 {
            return Err(ConfigError::NonPositive {
                name: "lp_time_limit",
                value: self.lp_time_limit,
            });
        }
        if self.offload_overhead < 0.0 {
            return Err(ConfigError::Negative {
                name: "offload_overhead",
                value: self.offload_overhead,
            });
        }
        if self.freshness_horizon < 0.0 {
            return Err(ConfigError::Negative {
                name: "freshness_horizon",
                value: self.freshness_horizon,
            });
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
