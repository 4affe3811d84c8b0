//! AWG (P09) run scheduling
//!
//! Pick the hours to run the generator so that production reaches the target
//! at minimum energy cost:
//!
//! ```text
//! minimise   Σ run_h · price_h · 2 kWh
//! subject to Σ run_h · 0.1 · humidity_h >= target,  run_h ∈ {0, 1}
//! ```
//!
//! Hours with a negative price are flipped (run by default, "not running"
//! becomes the decision) so every decision carries a non-negative cost. The
//! remaining covering problem is solved by depth-first branch and bound,
//! bounded by the fractional relaxation over cost-per-liter order.

use super::{ensure_finite, SolveOutcome, SolverError};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Liters produced per hour per percentage point of humidity
pub const PRODUCTION_PER_HUMIDITY_POINT: f64 = 0.1;
pub const ENERGY_PER_HOUR_KWH: f64 = 2.0;

/// Longest schedule accepted: one year of hourly slots
pub const MAX_SCHEDULE_HOURS: usize = 8_760;

const EPSILON: f64 = 1e-9;
const NODE_BUDGET: u64 = 1_000_000;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AwgSchedule {
    pub schedule: Vec<u8>,
    pub total_production_liters: f64,
    pub total_cost_usd: f64,
    pub cost_per_liter: f64,
}

/// One open decision of the covering problem
#[derive(Debug, Clone, Copy)]
struct Decision {
    hour: usize,
    cost: f64,
    liters: f64,
}

enum Step {
    Visit { index: usize, cost: f64, required: f64 },
    /// Clear `selection[index]` once its include branch is exhausted
    Unset(usize),
}

struct BranchAndBound<'a> {
    decisions: &'a [Decision],
    /// Liters still obtainable from `decisions[i..]`
    suffix_liters: Vec<f64>,
    /// Running totals over `decisions[..i]`
    prefix_liters: Vec<f64>,
    prefix_costs: Vec<f64>,
    best_cost: f64,
    best_selection: Option<Vec<bool>>,
    selection: Vec<bool>,
    nodes: u64,
}

impl<'a> BranchAndBound<'a> {
    fn new(decisions: &'a [Decision], incumbent: Option<(f64, Vec<bool>)>) -> Self {
        let mut suffix_liters = vec![0.0; decisions.len() + 1];
        for i in (0..decisions.len()).rev() {
            suffix_liters[i] = suffix_liters[i + 1] + decisions[i].liters;
        }
        let mut prefix_liters = vec![0.0; decisions.len() + 1];
        let mut prefix_costs = vec![0.0; decisions.len() + 1];
        for (i, decision) in decisions.iter().enumerate() {
            prefix_liters[i + 1] = prefix_liters[i] + decision.liters;
            prefix_costs[i + 1] = prefix_costs[i] + decision.cost;
        }
        let (best_cost, best_selection) = match incumbent {
            Some((cost, selection)) => (cost, Some(selection)),
            None => (f64::INFINITY, None),
        };
        Self {
            decisions,
            suffix_liters,
            prefix_liters,
            prefix_costs,
            best_cost,
            best_selection,
            selection: vec![false; decisions.len()],
            nodes: 0,
        }
    }

    /// Cheapest fractional completion of `required` liters from `decisions[from..]`
    fn lower_bound(&self, from: usize, required: f64) -> f64 {
        let target = self.prefix_liters[from] + required;
        // First k with prefix_liters[k] >= target; decisions[from..k - 1] are taken whole
        let k = self.prefix_liters.partition_point(|liters| *liters < target - EPSILON);
        if k <= from + 1 {
            let decision = self.decisions[from];
            return decision.cost * required.min(decision.liters) / decision.liters;
        }
        if k > self.decisions.len() {
            return self.prefix_costs[self.decisions.len()] - self.prefix_costs[from];
        }
        let last = self.decisions[k - 1];
        let whole = self.prefix_costs[k - 1] - self.prefix_costs[from];
        let partial = (target - self.prefix_liters[k - 1]).clamp(0.0, last.liters);
        whole + last.cost * partial / last.liters
    }

    /// Depth-first over an explicit stack; the include branch is explored first
    fn search(&mut self, required: f64) {
        let mut stack = vec![Step::Visit {
            index: 0,
            cost: 0.0,
            required,
        }];

        while let Some(step) = stack.pop() {
            let (index, cost, required) = match step {
                Step::Unset(index) => {
                    self.selection[index] = false;
                    continue;
                }
                Step::Visit {
                    index,
                    cost,
                    required,
                } => (index, cost, required),
            };

            self.nodes += 1;
            if self.nodes > NODE_BUDGET {
                return;
            }

            if required <= EPSILON {
                if cost < self.best_cost - EPSILON {
                    self.best_cost = cost;
                    self.best_selection = Some(self.selection.clone());
                }
                continue;
            }
            if index == self.decisions.len() || self.suffix_liters[index] < required - EPSILON {
                continue;
            }
            if cost + self.lower_bound(index, required) >= self.best_cost - EPSILON {
                continue;
            }

            let decision = self.decisions[index];
            stack.push(Step::Visit {
                index: index + 1,
                cost,
                required,
            });
            stack.push(Step::Unset(index));
            self.selection[index] = true;
            stack.push(Step::Visit {
                index: index + 1,
                cost: cost + decision.cost,
                required: required - decision.liters,
            });
        }
    }
}

/// Take decisions in ratio order until the target is covered
fn greedy_incumbent(decisions: &[Decision], required: f64) -> Option<(f64, Vec<bool>)> {
    let mut selection = vec![false; decisions.len()];
    let mut remaining = required;
    let mut cost = 0.0;
    for (i, decision) in decisions.iter().enumerate() {
        if remaining <= EPSILON {
            break;
        }
        selection[i] = true;
        cost += decision.cost;
        remaining -= decision.liters;
    }
    (remaining <= EPSILON).then_some((cost, selection))
}

pub fn optimize_awg_schedule(
    humidity_forecast: &[f64],
    energy_prices: &[f64],
    target_liters: f64,
) -> Result<SolveOutcome<AwgSchedule>, SolverError> {
    if humidity_forecast.len() != energy_prices.len() {
        return Err(SolverError::LengthMismatch {
            humidity: humidity_forecast.len(),
            prices: energy_prices.len(),
        });
    }
    if humidity_forecast.len() > MAX_SCHEDULE_HOURS {
        return Err(SolverError::ScheduleTooLong {
            hours: humidity_forecast.len(),
            max: MAX_SCHEDULE_HOURS,
        });
    }
    ensure_finite("target_liters", target_liters)?;

    let hours = humidity_forecast.len();
    let mut rates = Vec::with_capacity(hours);
    let mut costs = Vec::with_capacity(hours);
    for hour in 0..hours {
        let humidity = ensure_finite("humidity_forecast", humidity_forecast[hour])?;
        let price = ensure_finite("energy_prices", energy_prices[hour])?;
        rates.push(humidity * PRODUCTION_PER_HUMIDITY_POINT);
        costs.push(price * ENERGY_PER_HOUR_KWH);
    }

    // Fixed part of the schedule: hours that are free or paid to run, and
    // hours that cost money without producing anything.
    let mut schedule = vec![0u8; hours];
    let mut open = Vec::new();
    let mut covered = 0.0;
    for hour in 0..hours {
        let (cost, liters) = (costs[hour], rates[hour]);
        if cost < 0.0 {
            schedule[hour] = 1;
            covered += liters;
            // Switching a paid hour off saves -liters of production at a cost of -cost
            if liters < 0.0 {
                open.push(Decision {
                    hour,
                    cost: -cost,
                    liters: -liters,
                });
            }
        } else if liters > 0.0 {
            if cost == 0.0 {
                schedule[hour] = 1;
                covered += liters;
            } else {
                open.push(Decision { hour, cost, liters });
            }
        }
    }

    let required = target_liters - covered;
    let total_available: f64 = open.iter().map(|d| d.liters).sum();
    if required > total_available + EPSILON {
        info!(target_liters, "AWG production target is unreachable");
        return Ok(SolveOutcome::infeasible());
    }

    if required > EPSILON {
        open.sort_by(|a, b| (a.cost / a.liters).total_cmp(&(b.cost / b.liters)));
        let incumbent = greedy_incumbent(&open, required);
        let mut search = BranchAndBound::new(&open, incumbent);
        search.search(required);
        if search.nodes > NODE_BUDGET {
            warn!(
                hours,
                "AWG branch and bound hit its node budget; using best schedule found"
            );
        }
        debug!(nodes = search.nodes, "AWG branch and bound finished");

        let Some(selection) = search.best_selection else {
            return Ok(SolveOutcome::infeasible());
        };
        for (decision, chosen) in open.iter().zip(selection) {
            if chosen {
                // A chosen flipped decision turns its hour off
                schedule[decision.hour] ^= 1;
            }
        }
    }

    let total_production_liters: f64 = schedule
        .iter()
        .zip(&rates)
        .map(|(run, rate)| f64::from(*run) * rate)
        .sum();
    let total_cost_usd: f64 = schedule
        .iter()
        .zip(&costs)
        .map(|(run, cost)| f64::from(*run) * cost)
        .sum();
    let cost_per_liter = if total_production_liters > 0.0 {
        total_cost_usd / total_production_liters
    } else {
        0.0
    };

    Ok(SolveOutcome::Optimal(AwgSchedule {
        schedule,
        total_production_liters,
        total_cost_usd,
        cost_per_liter,
    }))
}
