//! Closed-Loop Farm (P03) nutrient allocation
//!
//! Allocate N, P and K from waste streams so every crop demand is met while
//! the total allocated is as small as possible. Each nutrient is independent,
//! so the optimum allocates exactly the demand (never less than zero).

use super::{ensure_finite, SolveOutcome, SolverError};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

pub const NUTRIENTS: [&str; 3] = ["N", "P", "K"];

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct NutrientAmounts {
    #[serde(rename = "N")]
    pub n: f64,
    #[serde(rename = "P")]
    pub p: f64,
    #[serde(rename = "K")]
    pub k: f64,
}

impl NutrientAmounts {
    fn from_map(map: &BTreeMap<String, f64>, label: &str) -> Result<Self, SolverError> {
        let get = |key: &str| -> Result<f64, SolverError> {
            let value = map
                .get(key)
                .copied()
                .ok_or_else(|| SolverError::MissingNutrient(key.to_string()))?;
            ensure_finite(&format!("{label}.{key}"), value)
        };
        Ok(Self {
            n: get("N")?,
            p: get("P")?,
            k: get("K")?,
        })
    }

    fn values(&self) -> [f64; 3] {
        [self.n, self.p, self.k]
    }

    fn from_values([n, p, k]: [f64; 3]) -> Self {
        Self { n, p, k }
    }

    pub fn total(&self) -> f64 {
        self.n + self.p + self.k
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NutrientPlan {
    pub allocation: NutrientAmounts,
    pub waste: NutrientAmounts,
    pub objective_value: f64,
}

pub fn optimize_nutrient_cycle(
    waste_inputs: &BTreeMap<String, f64>,
    crop_demands: &BTreeMap<String, f64>,
) -> Result<SolveOutcome<NutrientPlan>, SolverError> {
    let available = NutrientAmounts::from_map(waste_inputs, "waste_inputs")?;
    let demand = NutrientAmounts::from_map(crop_demands, "crop_demands")?;

    let mut allocation = [0.0; 3];
    for (i, (supply, need)) in available.values().into_iter().zip(demand.values()).enumerate() {
        let required = need.max(0.0);
        if supply < 0.0 || required > supply {
            info!(nutrient = NUTRIENTS[i], supply, need, "Nutrient demand cannot be met");
            return Ok(SolveOutcome::infeasible());
        }
        allocation[i] = required;
    }

    let allocation = NutrientAmounts::from_values(allocation);
    let waste = NutrientAmounts::from_values([
        available.n - allocation.n,
        available.p - allocation.p,
        available.k - allocation.k,
    ]);

    Ok(SolveOutcome::Optimal(NutrientPlan {
        objective_value: allocation.total(),
        allocation,
        waste,
    }))
}
