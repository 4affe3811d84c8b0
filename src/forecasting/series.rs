//! Historical series as submitted by clients

use super::ForecastError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Column-oriented history: a `timestamp` column plus any number of named
/// numeric series of the same length.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HistoricalData {
    #[serde(default)]
    pub timestamp: Option<Vec<String>>,
    #[serde(flatten)]
    pub series: BTreeMap<String, Vec<f64>>,
}

impl HistoricalData {
    pub fn new(timestamp: Vec<String>) -> Self {
        Self {
            timestamp: Some(timestamp),
            series: BTreeMap::new(),
        }
    }

    pub fn with_series(mut self, name: &str, values: Vec<f64>) -> Self {
        self.series.insert(name.to_string(), values);
        self
    }

    /// Pair the timestamp column with the named series
    pub fn points(&self, name: &str) -> Result<Vec<(DateTime<Utc>, f64)>, ForecastError> {
        let timestamps = self
            .timestamp
            .as_ref()
            .ok_or_else(|| ForecastError::MissingSeries("timestamp".to_string()))?;
        let values = self
            .series
            .get(name)
            .ok_or_else(|| ForecastError::MissingSeries(name.to_string()))?;

        if values.len() != timestamps.len() {
            return Err(ForecastError::LengthMismatch {
                series: name.to_string(),
                expected: timestamps.len(),
                actual: values.len(),
            });
        }

        timestamps
            .iter()
            .zip(values)
            .map(|(raw, value)| Ok((parse_timestamp(raw)?, *value)))
            .collect()
    }
}

/// Accepts RFC 3339, naive ISO 8601 date-times (taken as UTC) and bare dates
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ForecastError> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ForecastError::InvalidTimestamp(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01T12:30:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-05-01T14:30:00+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-05-01T12:30:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-05-01 12:30:00.000").unwrap(), expected);
        assert_eq!(
            parse_timestamp("2024-05-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
        );
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(ForecastError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_deserialize_columns() {
        let data: HistoricalData = serde_json::from_str(
            r#"{"timestamp": ["2024-01-01T00:00:00", "2024-01-01T01:00:00"],
                "flow": [1.0, 2.0], "temperature": [15.0, 15.5]}"#,
        )
        .unwrap();
        assert_eq!(data.series.len(), 2);
        let points = data.points("flow").unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].1, 2.0);
    }

    #[test]
    fn test_points_errors() {
        let data = HistoricalData::new(vec!["2024-01-01".to_string()])
            .with_series("flow", vec![1.0, 2.0]);
        assert!(matches!(
            data.points("flow"),
            Err(ForecastError::LengthMismatch { expected: 1, actual: 2, .. })
        ));
        assert!(matches!(
            data.points("irradiance"),
            Err(ForecastError::MissingSeries(ref name)) if name == "irradiance"
        ));

        let no_time = HistoricalData::default().with_series("flow", vec![1.0]);
        assert!(matches!(
            no_time.points("flow"),
            Err(ForecastError::MissingSeries(ref name)) if name == "timestamp"
        ));
    }
}
