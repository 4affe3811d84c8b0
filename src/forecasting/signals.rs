//! Initiative-specific forecasts built on [`SeasonalForecaster`]

use super::model::{ForecastPoint, SeasonalForecaster};
use super::{ForecastError, HistoricalData};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Humidity (%) above which an AWG run window is worthwhile
pub const OPTIMAL_HUMIDITY: f64 = 70.0;

/// Ten years of continuous operation, in hours
pub const BULB_BASE_LIFETIME_HOURS: f64 = 87_600.0;
const HOURS_PER_YEAR: f64 = 8_760.0;
const NOMINAL_VOLTAGE: f64 = 12.0;
const THERMAL_CYCLE_SCALE: f64 = 10_000.0;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StreamFlowForecast {
    pub predicted_flow: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SolarForecast {
    pub predicted_irradiance: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HumidityForecast {
    pub predicted_humidity: f64,
    pub optimal_windows_count: usize,
    pub next_optimal_window: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BulbTelemetry {
    pub voltage: f64,
    /// Signed so a reset or miscalibrated counter still parses
    pub thermal_cycles: i64,
    pub uptime: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BulbPrediction {
    pub failure_probability: f64,
    pub expected_remaining_hours: f64,
    pub expected_remaining_years: f64,
    pub stress_score: f64,
}

fn run_forecast(
    data: &HistoricalData,
    series: &str,
    hours_ahead: u32,
) -> Result<Vec<ForecastPoint>, ForecastError> {
    let points = data.points(series)?;
    let mut forecaster = SeasonalForecaster::default();
    forecaster.fit(&points)?;
    forecaster.predict(hours_ahead)
}

fn final_point(forecast: &[ForecastPoint]) -> Result<&ForecastPoint, ForecastError> {
    forecast.last().ok_or(ForecastError::InsufficientData {
        required: 2,
        actual: 0,
    })
}

/// Micro-Hydro (P13): stream flow `hours_ahead` hours past the history
pub fn forecast_stream_flow(
    data: &HistoricalData,
    hours_ahead: u32,
) -> Result<StreamFlowForecast, ForecastError> {
    let forecast = run_forecast(data, "flow", hours_ahead)?;
    let last = final_point(&forecast)?;
    info!(hours_ahead, predicted_flow = last.yhat, "Stream flow forecast");

    Ok(StreamFlowForecast {
        predicted_flow: last.yhat,
        confidence_lower: last.yhat_lower,
        confidence_upper: last.yhat_upper,
    })
}

/// Solar Gardens (P12): irradiance `hours_ahead` hours past the history
pub fn forecast_solar_irradiance(
    data: &HistoricalData,
    hours_ahead: u32,
) -> Result<SolarForecast, ForecastError> {
    let forecast = run_forecast(data, "irradiance", hours_ahead)?;
    let last = final_point(&forecast)?;
    info!(hours_ahead, predicted_irradiance = last.yhat, "Solar irradiance forecast");

    Ok(SolarForecast {
        predicted_irradiance: last.yhat,
        confidence_lower: last.yhat_lower,
        confidence_upper: last.yhat_upper,
    })
}

/// AWG (P09): humidity outlook and run windows
///
/// Every point of the forecast frame counts as a candidate window, the
/// fitted history included.
pub fn forecast_humidity(
    data: &HistoricalData,
    hours_ahead: u32,
) -> Result<HumidityForecast, ForecastError> {
    let forecast = run_forecast(data, "humidity", hours_ahead)?;
    let last = final_point(&forecast)?;

    let windows: Vec<&ForecastPoint> = forecast
        .iter()
        .filter(|point| point.yhat > OPTIMAL_HUMIDITY)
        .collect();
    let next_optimal_window = windows
        .first()
        .map(|point| point.ds.to_rfc3339_opts(SecondsFormat::Secs, true));
    let optimal_windows_count = windows.len();
    info!(hours_ahead, optimal_windows_count, "Humidity forecast");

    Ok(HumidityForecast {
        predicted_humidity: last.yhat,
        optimal_windows_count,
        next_optimal_window,
    })
}

/// Centennial Bulb (P08): weighted stress model of failure risk
pub fn predict_bulb_failure(telemetry: &BulbTelemetry) -> BulbPrediction {
    let voltage_stress = ((telemetry.voltage - NOMINAL_VOLTAGE) / NOMINAL_VOLTAGE).max(0.0);
    let thermal_stress = (telemetry.thermal_cycles as f64 / THERMAL_CYCLE_SCALE).max(0.0);
    let age_factor = telemetry.uptime / BULB_BASE_LIFETIME_HOURS;

    let stress_score = voltage_stress * 0.3 + thermal_stress * 0.4 + age_factor * 0.3;
    let failure_probability = stress_score.min(1.0);
    let expected_remaining_hours = BULB_BASE_LIFETIME_HOURS * (1.0 - failure_probability);

    BulbPrediction {
        failure_probability,
        expected_remaining_hours,
        expected_remaining_years: expected_remaining_hours / HOURS_PER_YEAR,
        stress_score,
    }
}
