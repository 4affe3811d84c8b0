//! Symbiosis (P02) fungal strain matching

use serde::Serialize;
use std::collections::BTreeMap;

const DEFAULT_PH: f64 = 7.0;
const DEFAULT_MOISTURE: f64 = 50.0;
const MATCH_CONFIDENCE: f64 = 0.85;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FungalRecommendation {
    pub recommended_strain: String,
    pub expected_yield_increase: f64,
    pub confidence: f64,
    pub soil_compatibility: String,
}

/// Rule-based strain choice from soil pH, adjusted for moisture
pub fn optimize_fungal_match(soil_data: &BTreeMap<String, f64>) -> FungalRecommendation {
    let ph = soil_data.get("pH").copied().unwrap_or(DEFAULT_PH);
    let moisture = soil_data.get("moisture").copied().unwrap_or(DEFAULT_MOISTURE);

    let (strain, mut yield_increase) = if ph < 6.0 {
        ("Acidophilus_Strain_A", 0.25)
    } else if ph > 7.5 {
        ("Alkalophilus_Strain_B", 0.20)
    } else {
        ("Neutral_Strain_C", 0.30)
    };

    if moisture < 40.0 {
        yield_increase *= 0.8;
    } else if moisture > 70.0 {
        yield_increase *= 0.9;
    }

    let compatibility = if (6.0..=7.5).contains(&ph) {
        "high"
    } else {
        "medium"
    };

    FungalRecommendation {
        recommended_strain: strain.to_string(),
        expected_yield_increase: yield_increase,
        confidence: MATCH_CONFIDENCE,
        soil_compatibility: compatibility.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soil(ph: Option<f64>, moisture: Option<f64>) -> BTreeMap<String, f64> {
        let mut data = BTreeMap::new();
        if let Some(ph) = ph {
            data.insert("pH".to_string(), ph);
        }
        if let Some(moisture) = moisture {
            data.insert("moisture".to_string(), moisture);
        }
        data.insert("N".to_string(), 20.0);
        data
    }

    #[test]
    fn test_neutral_soil() {
        let result = optimize_fungal_match(&soil(Some(6.5), Some(55.0)));
        assert_eq!(result.recommended_strain, "Neutral_Strain_C");
        assert_eq!(result.expected_yield_increase, 0.30);
        assert_eq!(result.confidence, 0.85);
        assert_eq!(result.soil_compatibility, "high");
    }

    #[test]
    fn test_acidic_and_alkaline_soil() {
        let acidic = optimize_fungal_match(&soil(Some(5.2), Some(30.0)));
        assert_eq!(acidic.recommended_strain, "Acidophilus_Strain_A");
        assert!((acidic.expected_yield_increase - 0.20).abs() < 1e-12);
        assert_eq!(acidic.soil_compatibility, "medium");

        let alkaline = optimize_fungal_match(&soil(Some(8.1), Some(80.0)));
        assert_eq!(alkaline.recommended_strain, "Alkalophilus_Strain_B");
        assert!((alkaline.expected_yield_increase - 0.18).abs() < 1e-12);
    }

    #[test]
    fn test_boundaries_and_defaults() {
        assert_eq!(optimize_fungal_match(&soil(Some(6.0), None)).soil_compatibility, "high");
        assert_eq!(
            optimize_fungal_match(&soil(Some(7.5), None)).recommended_strain,
            "Neutral_Strain_C"
        );

        let defaults = optimize_fungal_match(&BTreeMap::new());
        assert_eq!(defaults.recommended_strain, "Neutral_Strain_C");
        assert_eq!(defaults.expected_yield_increase, 0.30);
    }
}
