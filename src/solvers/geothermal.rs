//! Geothermal network (P10) heat allocation
//!
//! Every building can take up to its load and the network delivers at most
//! the available capacity. Total delivered heat is maximised by filling
//! buildings in id order until capacity runs out.

use super::{ensure_finite, SolveOutcome, SolverError};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GeothermalPlan {
    pub allocations: BTreeMap<String, f64>,
    pub total_allocated: f64,
    pub capacity_utilization: f64,
    pub unmet_demand: BTreeMap<String, f64>,
}

pub fn optimize_geothermal_flow(
    building_loads: &BTreeMap<String, f64>,
    ground_temp: f64,
    available_capacity: f64,
) -> Result<SolveOutcome<GeothermalPlan>, SolverError> {
    ensure_finite("ground_temp", ground_temp)?;
    ensure_finite("available_capacity", available_capacity)?;
    for (building, load) in building_loads {
        ensure_finite(&format!("building_loads.{building}"), *load)?;
    }

    if available_capacity < 0.0 || building_loads.values().any(|load| *load < 0.0) {
        info!(available_capacity, "Geothermal bounds are inconsistent");
        return Ok(SolveOutcome::infeasible());
    }

    let mut remaining = available_capacity;
    let mut allocations = BTreeMap::new();
    let mut unmet_demand = BTreeMap::new();
    for (building, load) in building_loads {
        let allocated = load.min(remaining);
        remaining -= allocated;
        allocations.insert(building.clone(), allocated);
        unmet_demand.insert(building.clone(), (load - allocated).max(0.0));
    }

    let total_allocated: f64 = allocations.values().sum();
    let capacity_utilization = if available_capacity > 0.0 {
        total_allocated / available_capacity
    } else {
        0.0
    };
    debug!(ground_temp, total_allocated, capacity_utilization, "Geothermal allocation");

    Ok(SolveOutcome::Optimal(GeothermalPlan {
        allocations,
        total_allocated,
        capacity_utilization,
        unmet_demand,
    }))
}
