//! Optimisation for the ECOS initiatives
//!
//! Each problem is small enough to solve exactly in-process: the nutrient and
//! geothermal programs have closed-form optima, the AWG schedule is a 0-1
//! covering problem solved by branch and bound.

pub mod awg;
pub mod fungal;
pub mod geothermal;
pub mod nutrient;

pub use awg::{optimize_awg_schedule, AwgSchedule, MAX_SCHEDULE_HOURS};
pub use fungal::{optimize_fungal_match, FungalRecommendation};
pub use geothermal::{optimize_geothermal_flow, GeothermalPlan};
pub use nutrient::{optimize_nutrient_cycle, NutrientAmounts, NutrientPlan};

use serde::Serialize;
use thiserror::Error;

pub const NO_SOLUTION_MESSAGE: &str = "No solution found";

/// Result of an optimisation, tagged by `status`
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SolveOutcome<T> {
    Optimal(T),
    Infeasible { message: String },
}

impl<T> SolveOutcome<T> {
    pub fn infeasible() -> Self {
        SolveOutcome::Infeasible {
            message: NO_SOLUTION_MESSAGE.to_string(),
        }
    }

    pub fn is_optimal(&self) -> bool {
        matches!(self, SolveOutcome::Optimal(_))
    }

    pub fn optimal(self) -> Option<T> {
        match self {
            SolveOutcome::Optimal(solution) => Some(solution),
            SolveOutcome::Infeasible { .. } => None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SolverError {
    #[error("Missing nutrient '{0}'")]
    MissingNutrient(String),

    #[error("humidity_forecast has {humidity} hours but energy_prices has {prices}")]
    LengthMismatch { humidity: usize, prices: usize },

    #[error("Schedule has {hours} hours; at most {max} are accepted")]
    ScheduleTooLong { hours: usize, max: usize },

    #[error("{field} must be a finite number")]
    NonFinite { field: String },
}

impl SolverError {
    /// Every solver failure stems from the request itself
    pub fn is_input_error(&self) -> bool {
        true
    }
}

pub(crate) fn ensure_finite(field: &str, value: f64) -> Result<f64, SolverError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SolverError::NonFinite {
            field: field.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, PartialEq)]
    struct Plan {
        total: f64,
    }

    #[test]
    fn test_outcome_serialization() {
        let optimal = SolveOutcome::Optimal(Plan { total: 3.5 });
        assert_eq!(
            serde_json::to_value(&optimal).unwrap(),
            serde_json::json!({"status": "optimal", "total": 3.5})
        );

        let infeasible: SolveOutcome<Plan> = SolveOutcome::infeasible();
        assert_eq!(
            serde_json::to_value(&infeasible).unwrap(),
            serde_json::json!({"status": "infeasible", "message": "No solution found"})
        );
        assert!(infeasible.optimal().is_none());
    }

    #[test]
    fn test_ensure_finite() {
        assert_eq!(ensure_finite("x", 1.5), Ok(1.5));
        assert!(ensure_finite("x", f64::NAN).is_err());
        assert!(ensure_finite("x", f64::INFINITY).is_err());
    }
}
