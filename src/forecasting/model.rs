//! Decomposable seasonal regression
//!
//! The model is `y(t) = g(t) + s(t)` in additive mode and
//! `y(t) = g(t) * (1 + s(t))` in multiplicative mode, where `g` is a linear
//! trend over time scaled to `[0, 1]` across the history and `s` is a sum of
//! Fourier terms for daily and weekly cycles. Coefficients are fitted by
//! least squares with a ridge penalty on the seasonal terms only.

use super::ForecastError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

const SECONDS_PER_DAY: f64 = 86_400.0;
const RIDGE_PENALTY: f64 = 0.01;
const PIVOT_EPSILON: f64 = 1e-12;
pub const DEFAULT_INTERVAL_WIDTH: f64 = 0.8;
/// Longest horizon `predict` will produce: one year of hourly steps
pub const MAX_FORECAST_HOURS: u32 = 8_760;

/// How seasonal terms combine with the trend
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalityMode {
    Additive,
    #[default]
    Multiplicative,
}

/// One point of a forecast frame
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ForecastPoint {
    pub ds: DateTime<Utc>,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Seasonality {
    name: &'static str,
    period_days: f64,
    order: usize,
}

const DAILY: Seasonality = Seasonality {
    name: "daily",
    period_days: 1.0,
    order: 4,
};

const WEEKLY: Seasonality = Seasonality {
    name: "weekly",
    period_days: 7.0,
    order: 3,
};

#[derive(Debug, Clone)]
struct FittedModel {
    mode: SeasonalityMode,
    start: DateTime<Utc>,
    span_secs: f64,
    y_scale: f64,
    intercept: f64,
    slope: f64,
    seasonalities: Vec<Seasonality>,
    seasonal_coefficients: Vec<f64>,
    sigma: f64,
    history: Vec<DateTime<Utc>>,
}

impl FittedModel {
    fn scaled_time(&self, ds: DateTime<Utc>) -> f64 {
        seconds_between(self.start, ds) / self.span_secs
    }

    fn trend(&self, ds: DateTime<Utc>) -> f64 {
        self.intercept + self.slope * self.scaled_time(ds)
    }

    fn seasonal(&self, ds: DateTime<Utc>) -> f64 {
        fourier_row(ds, &self.seasonalities)
            .iter()
            .zip(&self.seasonal_coefficients)
            .map(|(feature, coefficient)| feature * coefficient)
            .sum()
    }

    /// Point estimate in original units
    fn estimate(&self, ds: DateTime<Utc>) -> f64 {
        let trend = self.trend(ds);
        let seasonal = self.seasonal(ds);
        let scaled = match self.mode {
            SeasonalityMode::Additive => trend + seasonal,
            SeasonalityMode::Multiplicative => trend * (1.0 + seasonal),
        };
        scaled * self.y_scale
    }
}

/// Seasonal forecaster with a fit/predict lifecycle
#[derive(Debug, Clone)]
pub struct SeasonalForecaster {
    mode: SeasonalityMode,
    interval_width: f64,
    model: Option<FittedModel>,
}

impl Default for SeasonalForecaster {
    fn default() -> Self {
        Self::new(SeasonalityMode::default())
    }
}

impl SeasonalForecaster {
    pub fn new(mode: SeasonalityMode) -> Self {
        Self {
            mode,
            interval_width: DEFAULT_INTERVAL_WIDTH,
            model: None,
        }
    }

    /// Width of the uncertainty interval, strictly between 0 and 1
    pub fn with_interval_width(mut self, interval_width: f64) -> Result<Self, ForecastError> {
        if !(interval_width > 0.0 && interval_width < 1.0) {
            return Err(ForecastError::InvalidIntervalWidth(interval_width));
        }
        self.interval_width = interval_width;
        Ok(self)
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    /// Mode actually used by the fitted model, which may have fallen back to additive
    pub fn effective_mode(&self) -> Option<SeasonalityMode> {
        self.model.as_ref().map(|model| model.mode)
    }

    /// Names of the seasonal components enabled by the last fit
    pub fn seasonalities(&self) -> Vec<&'static str> {
        self.model
            .as_ref()
            .map(|model| model.seasonalities.iter().map(|s| s.name).collect())
            .unwrap_or_default()
    }

    /// Fit on `(ds, y)` observations; non-finite values are dropped
    pub fn fit(&mut self, points: &[(DateTime<Utc>, f64)]) -> Result<(), ForecastError> {
        let mut observations: Vec<(DateTime<Utc>, f64)> = points
            .iter()
            .copied()
            .filter(|(_, y)| y.is_finite())
            .collect();
        observations.sort_by_key(|(ds, _)| *ds);

        let (Some(&(start, _)), Some(&(end, _))) = (observations.first(), observations.last())
        else {
            return Err(ForecastError::InsufficientData {
                required: 2,
                actual: 0,
            });
        };
        let span_secs = seconds_between(start, end);
        if observations.len() < 2 || span_secs <= 0.0 {
            return Err(ForecastError::InsufficientData {
                required: 2,
                actual: observations.len(),
            });
        }

        let seasonalities = detect_seasonalities(&observations, span_secs);
        let y_scale = observations
            .iter()
            .map(|(_, y)| y.abs())
            .fold(0.0_f64, f64::max);
        let y_scale = if y_scale > 0.0 { y_scale } else { 1.0 };

        let scaled_t: Vec<f64> = observations
            .iter()
            .map(|(ds, _)| seconds_between(start, *ds) / span_secs)
            .collect();
        let scaled_y: Vec<f64> = observations.iter().map(|(_, y)| y / y_scale).collect();
        let fourier: Vec<Vec<f64>> = observations
            .iter()
            .map(|(ds, _)| fourier_row(*ds, &seasonalities))
            .collect();

        let mut mode = self.mode;
        let mut coefficients = None;

        if mode == SeasonalityMode::Multiplicative {
            let (intercept, slope) = fit_trend(&scaled_t, &scaled_y)?;
            // The trend must keep one sign over the history for ratios to mean anything
            let crosses_zero = intercept * (intercept + slope) <= 0.0;
            if crosses_zero {
                debug!("Trend crosses zero, falling back to additive seasonality");
                mode = SeasonalityMode::Additive;
            } else {
                let ratios: Vec<f64> = scaled_t
                    .iter()
                    .zip(&scaled_y)
                    .map(|(t, y)| y / (intercept + slope * t) - 1.0)
                    .collect();
                let seasonal = ridge_fit(&fourier, &ratios, 0)?;
                coefficients = Some((intercept, slope, seasonal));
            }
        }

        let (intercept, slope, seasonal_coefficients) = match coefficients {
            Some(fitted) => fitted,
            None => {
                let design: Vec<Vec<f64>> = scaled_t
                    .iter()
                    .zip(&fourier)
                    .map(|(t, row)| {
                        let mut full = Vec::with_capacity(row.len() + 2);
                        full.push(1.0);
                        full.push(*t);
                        full.extend_from_slice(row);
                        full
                    })
                    .collect();
                let beta = ridge_fit(&design, &scaled_y, 2)?;
                (beta[0], beta[1], beta[2..].to_vec())
            }
        };

        let mut model = FittedModel {
            mode,
            start,
            span_secs,
            y_scale,
            intercept,
            slope,
            seasonalities,
            seasonal_coefficients,
            sigma: 0.0,
            history: observations.iter().map(|(ds, _)| *ds).collect(),
        };

        let sse: f64 = observations
            .iter()
            .map(|(ds, y)| (y - model.estimate(*ds)).powi(2))
            .sum();
        let dof = observations.len().saturating_sub(2).max(1) as f64;
        model.sigma = (sse / dof).sqrt();

        debug!(
            observations = observations.len(),
            mode = ?model.mode,
            seasonalities = ?model.seasonalities.iter().map(|s| s.name).collect::<Vec<_>>(),
            sigma = model.sigma,
            "Fitted seasonal model"
        );

        self.model = Some(model);
        Ok(())
    }

    /// History plus `periods` hourly steps past the last observation
    pub fn predict(&self, periods: u32) -> Result<Vec<ForecastPoint>, ForecastError> {
        if periods > MAX_FORECAST_HOURS {
            return Err(ForecastError::HorizonTooLong {
                requested: periods,
                max: MAX_FORECAST_HOURS,
            });
        }
        let model = self.model.as_ref().ok_or(ForecastError::NotFitted)?;
        let z = normal_quantile(0.5 + self.interval_width / 2.0);
        let margin = z * model.sigma;

        let last = model
            .history
            .last()
            .copied()
            .ok_or(ForecastError::NotFitted)?;
        let future = (1..=i64::from(periods)).map(|hour| last + Duration::hours(hour));

        Ok(model
            .history
            .iter()
            .copied()
            .chain(future)
            .map(|ds| {
                let yhat = model.estimate(ds);
                ForecastPoint {
                    ds,
                    yhat,
                    yhat_lower: yhat - margin,
                    yhat_upper: yhat + margin,
                }
            })
            .collect())
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// Daily cycles need sub-daily sampling; weekly cycles need two weeks of history
fn detect_seasonalities(observations: &[(DateTime<Utc>, f64)], span_secs: f64) -> Vec<Seasonality> {
    let min_spacing = observations
        .windows(2)
        .map(|pair| seconds_between(pair[0].0, pair[1].0))
        .filter(|gap| *gap > 0.0)
        .fold(f64::INFINITY, f64::min);

    let mut enabled = Vec::new();
    if min_spacing < SECONDS_PER_DAY {
        enabled.push(DAILY);
    }
    if span_secs >= 14.0 * SECONDS_PER_DAY {
        enabled.push(WEEKLY);
    }
    enabled
}

fn fourier_row(ds: DateTime<Utc>, seasonalities: &[Seasonality]) -> Vec<f64> {
    let days = ds.timestamp_millis() as f64 / 1000.0 / SECONDS_PER_DAY;
    let mut row = Vec::new();
    for seasonality in seasonalities {
        for k in 1..=seasonality.order {
            let angle = 2.0 * PI * k as f64 * days / seasonality.period_days;
            row.push(angle.sin());
            row.push(angle.cos());
        }
    }
    row
}

/// Ordinary least squares line through `(t, y)`
fn fit_trend(t: &[f64], y: &[f64]) -> Result<(f64, f64), ForecastError> {
    let design: Vec<Vec<f64>> = t.iter().map(|t| vec![1.0, *t]).collect();
    let beta = ridge_fit(&design, y, 2)?;
    Ok((beta[0], beta[1]))
}

/// Solve `(XᵀX + λP)β = Xᵀy` where `P` penalises every column from
/// `unpenalised` onwards.
fn ridge_fit(design: &[Vec<f64>], y: &[f64], unpenalised: usize) -> Result<Vec<f64>, ForecastError> {
    let width = design.first().map(Vec::len).unwrap_or(0);
    if width == 0 {
        return Ok(Vec::new());
    }

    let mut gram = vec![vec![0.0; width]; width];
    let mut rhs = vec![0.0; width];
    for (row, target) in design.iter().zip(y) {
        for i in 0..width {
            rhs[i] += row[i] * target;
            for j in 0..width {
                gram[i][j] += row[i] * row[j];
            }
        }
    }
    for (i, gram_row) in gram.iter_mut().enumerate().skip(unpenalised) {
        gram_row[i] += RIDGE_PENALTY;
    }

    solve_linear_system(gram, rhs).ok_or(ForecastError::SingularSystem)
}

/// Gaussian elimination with partial pivoting
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < PIVOT_EPSILON {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        let pivot_row = a[col].clone();
        let pivot_rhs = b[col];
        for row in (col + 1)..n {
            let factor = a[row][col] / pivot_row[col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * pivot_row[k];
            }
            b[row] -= factor * pivot_rhs;
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

/// Inverse of the standard normal CDF (Acklam's rational approximation)
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hourly(values: &[f64]) -> Vec<(DateTime<Utc>, f64)> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, y)| (start + Duration::hours(i as i64), *y))
            .collect()
    }

    #[test]
    fn test_predict_requires_fit() {
        let forecaster = SeasonalForecaster::default();
        assert!(matches!(forecaster.predict(3), Err(ForecastError::NotFitted)));
    }

    #[test]
    fn test_horizon_is_capped_at_one_year() {
        let values: Vec<f64> = (0..48).map(|i| 5.0 + i as f64 * 0.1).collect();
        let mut forecaster = SeasonalForecaster::new(SeasonalityMode::Additive);
        forecaster.fit(&hourly(&values)).unwrap();

        assert_eq!(
            forecaster.predict(MAX_FORECAST_HOURS).unwrap().len(),
            48 + MAX_FORECAST_HOURS as usize
        );
        assert!(matches!(
            forecaster.predict(u32::MAX),
            Err(ForecastError::HorizonTooLong {
                requested: u32::MAX,
                max: MAX_FORECAST_HOURS
            })
        ));
    }

    #[test]
    fn test_linear_series_extrapolates() {
        let values: Vec<f64> = (0..48).map(|i| 5.0 + i as f64 * 0.1).collect();
        let mut forecaster = SeasonalForecaster::default();
        forecaster.fit(&hourly(&values)).unwrap();

        let forecast = forecaster.predict(24).unwrap();
        assert_eq!(forecast.len(), 72);
        let last = forecast.last().unwrap();
        assert!((last.yhat - (5.0 + 71.0 * 0.1)).abs() < 1e-6);
        assert!(last.yhat_lower <= last.yhat && last.yhat <= last.yhat_upper);
        assert_eq!(forecaster.effective_mode(), Some(SeasonalityMode::Multiplicative));
        assert_eq!(forecaster.seasonalities(), vec!["daily"]);
    }

    #[test]
    fn test_daily_cycle_is_recovered() {
        let values: Vec<f64> = (0..96)
            .map(|i| 50.0 + 10.0 * (2.0 * PI * i as f64 / 24.0).sin())
            .collect();
        let mut forecaster = SeasonalForecaster::new(SeasonalityMode::Additive);
        forecaster.fit(&hourly(&values)).unwrap();

        let forecast = forecaster.predict(24).unwrap();
        // 96 + 6 hours from midnight is 06:00, the peak of the cycle
        let six_am = &forecast[96 + 5];
        assert!((six_am.yhat - 60.0).abs() < 0.5, "got {}", six_am.yhat);
        let six_pm = &forecast[96 + 17];
        assert!((six_pm.yhat - 40.0).abs() < 0.5, "got {}", six_pm.yhat);
    }

    #[test]
    fn test_multiplicative_falls_back_when_trend_crosses_zero() {
        let values: Vec<f64> = (0..24).map(|i| -10.0 + i as f64).collect();
        let mut forecaster = SeasonalForecaster::default();
        forecaster.fit(&hourly(&values)).unwrap();
        assert_eq!(forecaster.effective_mode(), Some(SeasonalityMode::Additive));
    }

    #[test]
    fn test_seasonality_detection() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let daily_points: Vec<(DateTime<Utc>, f64)> = (0..100)
            .map(|i| (start + Duration::days(i), 10.0 + i as f64 * 0.1))
            .collect();
        let mut forecaster = SeasonalForecaster::default();
        forecaster.fit(&daily_points).unwrap();
        assert_eq!(forecaster.seasonalities(), vec!["weekly"]);
        assert_eq!(forecaster.predict(7).unwrap().len(), 107);
    }

    #[test]
    fn test_fit_rejects_degenerate_input() {
        let mut forecaster = SeasonalForecaster::default();
        assert!(matches!(
            forecaster.fit(&hourly(&[1.0])),
            Err(ForecastError::InsufficientData { actual: 1, .. })
        ));
        assert!(matches!(
            forecaster.fit(&hourly(&[f64::NAN, f64::NAN, 2.0])),
            Err(ForecastError::InsufficientData { actual: 1, .. })
        ));

        let same_time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(forecaster
            .fit(&[(same_time, 1.0), (same_time, 2.0)])
            .is_err());
        assert!(!forecaster.is_fitted());
    }

    #[test]
    fn test_interval_widens_with_noise() {
        let values: Vec<f64> = (0..48)
            .map(|i| 20.0 + if i % 2 == 0 { 1.5 } else { -1.5 })
            .collect();
        let mut forecaster = SeasonalForecaster::new(SeasonalityMode::Additive)
            .with_interval_width(0.95)
            .unwrap();
        forecaster.fit(&hourly(&values)).unwrap();
        let point = forecaster.predict(1).unwrap().pop().unwrap();
        assert!(point.yhat_upper - point.yhat_lower > 1.0);
    }

    #[test]
    fn test_interval_width_bounds() {
        assert!(SeasonalForecaster::default().with_interval_width(0.0).is_err());
        assert!(SeasonalForecaster::default().with_interval_width(1.0).is_err());
        assert!(SeasonalForecaster::default().with_interval_width(0.5).is_ok());
    }

    #[test]
    fn test_normal_quantile() {
        assert!(normal_quantile(0.5).abs() < 1e-9);
        assert!((normal_quantile(0.9) - 1.281_551_6).abs() < 1e-6);
        assert!((normal_quantile(0.975) - 1.959_964).abs() < 1e-5);
        assert!((normal_quantile(0.01) + 2.326_348).abs() < 1e-5);
    }

    #[test]
    fn test_solve_linear_system() {
        let solution =
            solve_linear_system(vec![vec![2.0, 1.0], vec![1.0, 3.0]], vec![3.0, 5.0]).unwrap();
        assert!((solution[0] - 0.8).abs() < 1e-12);
        assert!((solution[1] - 1.4).abs() < 1e-12);
        assert!(solve_linear_system(vec![vec![1.0, 2.0], vec![2.0, 4.0]], vec![1.0, 2.0]).is_none());
    }
}
