//! Per-initiative endpoints: request bodies and the library calls behind them

use crate::error::GatewayResult;
use crate::forecasting::{
    forecast_humidity, forecast_solar_irradiance, forecast_stream_flow, predict_bulb_failure,
    BulbPrediction, BulbTelemetry, HistoricalData, HumidityForecast, SolarForecast,
    StreamFlowForecast,
};
use crate::solvers::{
    optimize_awg_schedule, optimize_fungal_match, optimize_geothermal_flow,
    optimize_nutrient_cycle, AwgSchedule, FungalRecommendation, GeothermalPlan, NutrientPlan,
    SolveOutcome,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const HYDRO: &str = "P13_HYDRO";
pub const SOLAR: &str = "P12_SOLAR";
pub const AWG: &str = "P09_AWG";
pub const BULB: &str = "P08_BULB";
pub const FARM: &str = "P03_FARM";
pub const GEOTHERMAL: &str = "P10_GEOTHERMAL";
pub const SYMBIOSIS: &str = "P02_SYMBIOSIS";

const DEFAULT_FLOW_HOURS: u32 = 24;
const DEFAULT_SOLAR_HOURS: u32 = 24;
const DEFAULT_HUMIDITY_HOURS: u32 = 6;

/// `{project, result}` envelope returned by every initiative endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProjectResult<T> {
    pub project: &'static str,
    pub result: T,
}

fn wrap<T>(project: &'static str, result: T) -> ProjectResult<T> {
    ProjectResult { project, result }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastRequest {
    pub historical_data: HistoricalData,
    #[serde(default)]
    pub hours_ahead: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NutrientRequest {
    pub waste_inputs: BTreeMap<String, f64>,
    pub crop_demands: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwgScheduleRequest {
    pub humidity_forecast: Vec<f64>,
    pub energy_prices: Vec<f64>,
    pub target_liters: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeothermalRequest {
    pub building_loads: BTreeMap<String, f64>,
    pub ground_temp: f64,
    pub available_capacity: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FungalRequest {
    pub soil_data: BTreeMap<String, f64>,
}

pub fn hydro_forecast(request: &ForecastRequest) -> GatewayResult<ProjectResult<StreamFlowForecast>> {
    let hours = request.hours_ahead.unwrap_or(DEFAULT_FLOW_HOURS);
    Ok(wrap(HYDRO, forecast_stream_flow(&request.historical_data, hours)?))
}

pub fn solar_forecast(request: &ForecastRequest) -> GatewayResult<ProjectResult<SolarForecast>> {
    let hours = request.hours_ahead.unwrap_or(DEFAULT_SOLAR_HOURS);
    Ok(wrap(SOLAR, forecast_solar_irradiance(&request.historical_data, hours)?))
}

pub fn awg_forecast(request: &ForecastRequest) -> GatewayResult<ProjectResult<HumidityForecast>> {
    let hours = request.hours_ahead.unwrap_or(DEFAULT_HUMIDITY_HOURS);
    Ok(wrap(AWG, forecast_humidity(&request.historical_data, hours)?))
}

pub fn awg_optimize(
    request: &AwgScheduleRequest,
) -> GatewayResult<ProjectResult<SolveOutcome<AwgSchedule>>> {
    let outcome = optimize_awg_schedule(
        &request.humidity_forecast,
        &request.energy_prices,
        request.target_liters,
    )?;
    Ok(wrap(AWG, outcome))
}

pub fn bulb_predict(telemetry: &BulbTelemetry) -> ProjectResult<BulbPrediction> {
    wrap(BULB, predict_bulb_failure(telemetry))
}

pub fn farm_optimize(
    request: &NutrientRequest,
) -> GatewayResult<ProjectResult<SolveOutcome<NutrientPlan>>> {
    let outcome = optimize_nutrient_cycle(&request.waste_inputs, &request.crop_demands)?;
    Ok(wrap(FARM, outcome))
}

pub fn geothermal_optimize(
    request: &GeothermalRequest,
) -> GatewayResult<ProjectResult<SolveOutcome<GeothermalPlan>>> {
    let outcome = optimize_geothermal_flow(
        &request.building_loads,
        request.ground_temp,
        request.available_capacity,
    )?;
    Ok(wrap(GEOTHERMAL, outcome))
}

pub fn symbiosis_recommend(request: &FungalRequest) -> ProjectResult<FungalRecommendation> {
    wrap(SYMBIOSIS, optimize_fungal_match(&request.soil_data))
}
