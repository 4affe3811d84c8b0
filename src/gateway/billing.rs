//! Usage billing estimates and SaaS tier configuration

use crate::error::{GatewayError, GatewayResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Per-tier prices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    pub kwh: f64,
    pub water: f64,
    pub platform: f64,
}

const RATE_CARD: [(&str, Rate); 3] = [
    (
        "free",
        Rate {
            kwh: 0.25,
            water: 0.05,
            platform: 0.0,
        },
    ),
    (
        "pro",
        Rate {
            kwh: 0.18,
            water: 0.03,
            platform: 5.0,
        },
    ),
    (
        "enterprise",
        Rate {
            kwh: 0.12,
            water: 0.02,
            platform: 15.0,
        },
    ),
];

pub fn rate_for(tier: &str) -> Option<Rate> {
    RATE_CARD
        .iter()
        .find(|(name, _)| *name == tier)
        .map(|(_, rate)| *rate)
}

/// Lower-case `tier` and check it against `allowed`
pub fn validate_tier<'a>(
    tier: &str,
    allowed: impl IntoIterator<Item = &'a str>,
) -> GatewayResult<String> {
    let tier_key = tier.to_lowercase();
    let mut allowed: Vec<&str> = allowed.into_iter().collect();
    if allowed.contains(&tier_key.as_str()) {
        return Ok(tier_key);
    }
    allowed.sort_unstable();
    Err(GatewayError::invalid_input(format!(
        "Unknown tier. Allowed: {}",
        allowed.join(", ")
    )))
}

fn default_tier() -> String {
    "pro".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingRequest {
    #[serde(default = "default_tier")]
    pub tier: String,
    #[serde(default)]
    pub usage_kwh: f64,
    #[serde(default)]
    pub water_liters: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BillingEstimate {
    pub tier: String,
    pub energy_cost: f64,
    pub water_cost: f64,
    pub platform_fee: f64,
    pub total_estimate: f64,
}

pub fn estimate(request: &BillingRequest) -> GatewayResult<BillingEstimate> {
    for (field, value) in [
        ("usage_kwh", request.usage_kwh),
        ("water_liters", request.water_liters),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(GatewayError::invalid_input(format!(
                "{field} must be greater than or equal to 0"
            )));
        }
    }

    let tier = validate_tier(&request.tier, RATE_CARD.iter().map(|(name, _)| *name))?;
    let rate = rate_for(&tier).ok_or_else(|| GatewayError::internal("rate card is missing a tier"))?;

    let energy_cost = request.usage_kwh * rate.kwh;
    let water_cost = request.water_liters * rate.water;
    let total = energy_cost + water_cost + rate.platform;

    Ok(BillingEstimate {
        tier,
        energy_cost: round_cents(energy_cost),
        water_cost: round_cents(water_cost),
        platform_fee: rate.platform,
        total_estimate: round_cents(total),
    })
}

/// Half-cent ties go to the even cent
fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round_ties_even() / 100.0
}

/// Feature set of one SaaS tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierConfig {
    pub features: Vec<String>,
    pub regulatory_log: bool,
    pub support_level: String,
}

/// Tier table, optionally replaced wholesale by an env var holding JSON
#[derive(Debug, Clone, PartialEq)]
pub struct SaasTiers(BTreeMap<String, TierConfig>);

impl Default for SaasTiers {
    fn default() -> Self {
        let tier = |features: &[&str], regulatory_log: bool, support_level: &str| TierConfig {
            features: features.iter().map(|f| f.to_string()).collect(),
            regulatory_log,
            support_level: support_level.to_string(),
        };

        Self(BTreeMap::from([
            (
                "free".to_string(),
                tier(&["basic-dashboard", "read-only-api"], false, "community"),
            ),
            (
                "pro".to_string(),
                tier(&["dashboard", "api-access", "iot-pipeline"], true, "standard"),
            ),
            (
                "enterprise".to_string(),
                tier(
                    &[
                        "dashboard",
                        "api-access",
                        "iot-pipeline",
                        "billing-hooks",
                        "audit-trail",
                    ],
                    true,
                    "dedicated",
                ),
            ),
        ]))
    }
}

impl SaasTiers {
    /// Tiers from the raw env value; anything but a JSON object of tiers
    /// falls back to the defaults
    pub fn from_env_value(raw: Option<&str>) -> Self {
        let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
            return Self::default();
        };

        match serde_json::from_str::<BTreeMap<String, TierConfig>>(raw) {
            Ok(tiers) => Self(tiers),
            Err(e) => {
                warn!(error = %e, "Ignoring SaaS tier override; using defaults");
                Self::default()
            }
        }
    }

    pub fn from_env(env_var: &str) -> Self {
        Self::from_env_value(std::env::var(env_var).ok().as_deref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn get(&self, tier: &str) -> Option<&TierConfig> {
        self.0.get(tier)
    }

    pub fn describe(&self, tier: &str) -> GatewayResult<TierDescription> {
        let tier = validate_tier(tier, self.names())?;
        let config = self
            .get(&tier)
            .ok_or_else(|| GatewayError::internal("tier table changed during lookup"))?;

        Ok(TierDescription {
            features: config.features.clone(),
            support_level: config.support_level.clone(),
            regulatory_log: AuditEntry {
                tier: tier.clone(),
                regulatory_log_enabled: config.regulatory_log,
                timestamp: Utc::now().to_rfc3339(),
            },
            tier,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TierRequest {
    pub tier: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuditEntry {
    pub tier: String,
    pub regulatory_log_enabled: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TierDescription {
    pub tier: String,
    pub features: Vec<String>,
    pub support_level: String,
    pub regulatory_log: AuditEntry,
}
