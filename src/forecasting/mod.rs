//! Time-series forecasting for the ECOS initiatives
//!
//! [`SeasonalForecaster`] is the shared model; the functions in [`signals`]
//! wrap it for stream flow (P13), solar irradiance (P12) and humidity (P09),
//! and add the bulb reliability estimate used by P08.

pub mod model;
pub mod series;
pub mod signals;

pub use model::{ForecastPoint, SeasonalForecaster, SeasonalityMode, MAX_FORECAST_HOURS};
pub use series::HistoricalData;
pub use signals::{
    forecast_humidity, forecast_solar_irradiance, forecast_stream_flow, predict_bulb_failure,
    BulbPrediction, BulbTelemetry, HumidityForecast, SolarForecast, StreamFlowForecast,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Missing series '{0}' in historical_data")]
    MissingSeries(String),

    #[error("Series '{series}' has {actual} values but there are {expected} timestamps")]
    LengthMismatch {
        series: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unparseable timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("At least {required} distinct observations are needed, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Interval width must be between 0 and 1, got {0}")]
    InvalidIntervalWidth(f64),

    #[error("hours_ahead must be at most {max}, got {requested}")]
    HorizonTooLong { requested: u32, max: u32 },

    #[error("Model must be fitted before prediction")]
    NotFitted,

    #[error("Regression system is singular")]
    SingularSystem,
}

impl ForecastError {
    /// True when the caller supplied bad data rather than the model failing
    pub fn is_input_error(&self) -> bool {
        !matches!(self, ForecastError::NotFitted | ForecastError::SingularSystem)
    }
}
