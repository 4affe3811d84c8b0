//! The thirteen ECOS initiatives

use crate::checklist::ReadinessResults;
use serde::Serialize;

/// (code, product name, vertical)
pub const PROJECTS: [(&str, &str, &str); 13] = [
    ("P01", "EcoHomes OS", "Foam Homes"),
    ("P02", "AgriConnect", "Symbiosis"),
    ("P03", "RegeneraFarm", "Closed-Loop Farm"),
    ("P04", "HempMobility", "Hemp Lab"),
    ("P05", "LumiFreq", "Resonant Light"),
    ("P06", "NucleoSim", "Fast Reactor"),
    ("P07", "PlastiCycle", "Bioreactor"),
    ("P08", "EverLume", "Centennial Bulb"),
    ("P09", "AquaGen", "AWG"),
    ("P10", "ThermalGrid", "Geothermal"),
    ("P11", "Reserved", "Future"),
    ("P12", "SolarShare", "Solar Gardens"),
    ("P13", "MicroHydro", "Micro-Hydro"),
];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub readiness: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProjectListing {
    pub projects: Vec<ProjectSummary>,
    pub total: usize,
    pub average_readiness: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReadinessReport {
    pub total_initiatives: usize,
    pub initiatives_in_60_to_70_band: usize,
    pub average_readiness: String,
    pub results: ReadinessResults,
}

pub fn format_percent(value: f64) -> String {
    format!("{value:.1}%")
}

/// Every project annotated with its checklist readiness
pub fn project_listing(results: &ReadinessResults) -> ProjectListing {
    let projects = PROJECTS
        .iter()
        .map(|(id, name, kind)| ProjectSummary {
            id: id.to_string(),
            name: name.to_string(),
            kind: kind.to_string(),
            readiness: results
                .get(id)
                .map(|result| format!("{}%", result.readiness))
                .unwrap_or_else(|| "0%".to_string()),
        })
        .collect();

    ProjectListing {
        projects,
        total: PROJECTS.len(),
        average_readiness: format_percent(results.average_readiness()),
    }
}

pub fn readiness_report(results: ReadinessResults) -> ReadinessReport {
    ReadinessReport {
        total_initiatives: results.len(),
        initiatives_in_60_to_70_band: results.in_target_band(),
        average_readiness: format_percent(results.average_readiness()),
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checklist::{execute_all_initiatives, DEFAULT_PROJECT_CODES};

    #[test]
    fn test_project_table_matches_checklist_codes() {
        let codes: Vec<&str> = PROJECTS.iter().map(|(code, _, _)| *code).collect();
        assert_eq!(codes, DEFAULT_PROJECT_CODES.to_vec());
    }

    #[test]
    fn test_project_listing() {
        let listing = project_listing(&execute_all_initiatives(None));
        assert_eq!(listing.total, 13);
        assert_eq!(listing.projects[8].name, "AquaGen");
        assert_eq!(listing.projects[8].readiness, "70%");
        assert_eq!(listing.projects[10].readiness, "0%");
        assert!(listing.average_readiness.ends_with('%'));

        let value = serde_json::to_value(&listing.projects[0]).unwrap();
        assert_eq!(value["type"], "Foam Homes");
    }

    #[test]
    fn test_readiness_report() {
        let report = readiness_report(execute_all_initiatives(None));
        assert_eq!(report.total_initiatives, 13);
        assert_eq!(report.initiatives_in_60_to_70_band, 12);
        assert_eq!(report.average_readiness, format_percent(840.0 / 13.0));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["results"]["P09"]["readiness"], 70);
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(64.615), "64.6%");
        assert_eq!(format_percent(0.0), "0.0%");
    }
}
