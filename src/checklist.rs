//! Readiness checklist for the ECOS initiatives
//!
//! Each initiative is scored on four levels: Digital Brain (level 1), Digital
//! Body (level 2), Physical Twin (level 3) and RegenCity Integration (level 4).
//! Levels 1-3 are worth 20 points and level 4 is worth 10, so a fully passing
//! initiative lands at 70.

use crate::protocol::telemetry_topic;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::HashSet;

pub const DEFAULT_PROJECT_CODES: [&str; 13] = [
    "P01", "P02", "P03", "P04", "P05", "P06", "P07", "P08", "P09", "P10", "P11", "P12", "P13",
];

pub const DEFAULT_CONTROL_LOOP_LATENCY_MS: u32 = 150;
pub const CONTROL_LOOP_LIMIT_MS: u32 = 200;
pub const DEFAULT_DEVICE_ID: &str = "sim-device";
pub const DEFAULT_ZONE: &str = "A";

/// Code reserved for a future initiative; always scores zero
pub const RESERVED_PROJECT_CODE: &str = "P11";

const TARGET_BAND: std::ops::RangeInclusive<u32> = 60..=70;

/// Ordered set of named boolean checks, serialised as a JSON object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckSet(Vec<(String, bool)>);

impl CheckSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, passed: bool) -> Self {
        self.0.push((name.to_string(), passed));
        self
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.0
            .iter()
            .find(|(check, _)| check == name)
            .map(|(_, passed)| *passed)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when every check passed; an empty set has nothing to fail
    pub fn all_passed(&self) -> bool {
        self.0.iter().all(|(_, passed)| *passed)
    }
}

impl<S: Into<String>> FromIterator<(S, bool)> for CheckSet {
    fn from_iter<I: IntoIterator<Item = (S, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(name, passed)| (name.into(), passed)).collect())
    }
}

impl Serialize for CheckSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, passed) in &self.0 {
            map.serialize_entry(name, passed)?;
        }
        map.end()
    }
}

/// Level 2: Digital Body
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Level2Report {
    pub project_code: String,
    pub mqtt_topic: String,
    pub checks: CheckSet,
    pub passed: bool,
}

/// Level 3: Physical Twin
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Level3Report {
    pub project_code: String,
    pub control_loop_latency_ms: u32,
    pub checks: CheckSet,
    pub passed: bool,
}

/// Level 4: RegenCity Integration
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Level4Report {
    pub project_code: String,
    pub zone: String,
    pub checks: CheckSet,
    pub passed: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct LevelFlags {
    pub level_1: bool,
    pub level_2: bool,
    pub level_3: bool,
    pub level_4: bool,
}

impl LevelFlags {
    /// 20 points each for levels 1-3, 10 for level 4
    pub fn readiness(&self) -> u32 {
        [
            (self.level_1, 20),
            (self.level_2, 20),
            (self.level_3, 20),
            (self.level_4, 10),
        ]
        .iter()
        .filter(|(passed, _)| *passed)
        .map(|(_, points)| points)
        .sum()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InitiativeReadiness {
    pub project_code: String,
    pub readiness: u32,
    pub target_60_to_70: bool,
    pub levels: LevelFlags,
    pub level_2: Level2Report,
    pub level_3: Level3Report,
    pub level_4: Level4Report,
}

pub fn execute_level_2(
    project_code: &str,
    device_id: &str,
    checks_override: Option<CheckSet>,
) -> Level2Report {
    let checks = checks_override
        .filter(|checks| !checks.is_empty())
        .unwrap_or_else(|| {
            CheckSet::new()
                .with("iot_pipeline", true)
                .with("shared_auth", true)
                .with("ui_component", true)
                .with("billing_hook", true)
        });

    Level2Report {
        project_code: project_code.to_string(),
        mqtt_topic: telemetry_topic(project_code, device_id),
        passed: checks.all_passed(),
        checks,
    }
}

pub fn execute_level_3(project_code: &str, control_loop_latency_ms: u32) -> Level3Report {
    let checks = CheckSet::new()
        .with("firmware_flash", true)
        .with("telemetry_flow", true)
        .with("control_loop", control_loop_latency_ms <= CONTROL_LOOP_LIMIT_MS);

    Level3Report {
        project_code: project_code.to_string(),
        control_loop_latency_ms,
        passed: checks.all_passed(),
        checks,
    }
}

pub fn execute_level_4(project_code: &str, zone: &str, has_synergy: bool) -> Level4Report {
    let checks = CheckSet::new()
        .with("zone_deployment", true)
        .with("synergy_check", has_synergy)
        .with("data_lake_verify", true);

    Level4Report {
        project_code: project_code.to_string(),
        zone: zone.to_string(),
        passed: checks.all_passed(),
        checks,
    }
}

/// Run levels 1-4 for one initiative with the default parameters
pub fn execute_checklist_phases(project_code: &str) -> InitiativeReadiness {
    if project_code == RESERVED_PROJECT_CODE {
        return reserved_readiness(project_code);
    }

    let level_2 = execute_level_2(project_code, DEFAULT_DEVICE_ID, None);
    let level_3 = execute_level_3(project_code, DEFAULT_CONTROL_LOOP_LATENCY_MS);
    let level_4 = execute_level_4(project_code, DEFAULT_ZONE, true);

    let levels = LevelFlags {
        level_1: true,
        level_2: level_2.passed,
        level_3: level_3.passed,
        level_4: level_4.passed,
    };
    let readiness = levels.readiness();

    InitiativeReadiness {
        project_code: project_code.to_string(),
        readiness,
        target_60_to_70: TARGET_BAND.contains(&readiness),
        levels,
        level_2,
        level_3,
        level_4,
    }
}

fn reserved_readiness(project_code: &str) -> InitiativeReadiness {
    InitiativeReadiness {
        project_code: project_code.to_string(),
        readiness: 0,
        target_60_to_70: false,
        levels: LevelFlags {
            level_1: false,
            level_2: false,
            level_3: false,
            level_4: false,
        },
        level_2: Level2Report {
            project_code: project_code.to_string(),
            mqtt_topic: String::new(),
            checks: CheckSet::new(),
            passed: false,
        },
        level_3: Level3Report {
            project_code: project_code.to_string(),
            control_loop_latency_ms: 0,
            checks: CheckSet::new(),
            passed: false,
        },
        level_4: Level4Report {
            project_code: project_code.to_string(),
            zone: String::new(),
            checks: CheckSet::new(),
            passed: false,
        },
    }
}

/// Readiness results keyed by project code, in the order they were requested
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadinessResults(Vec<InitiativeReadiness>);

impl ReadinessResults {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, project_code: &str) -> Option<&InitiativeReadiness> {
        self.0.iter().find(|result| result.project_code == project_code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InitiativeReadiness> {
        self.0.iter()
    }

    /// Mean readiness across all results, 0 when empty
    pub fn average_readiness(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        let total: u32 = self.0.iter().map(|result| result.readiness).sum();
        f64::from(total) / self.0.len() as f64
    }

    pub fn in_target_band(&self) -> usize {
        self.0.iter().filter(|result| result.target_60_to_70).count()
    }
}

impl Serialize for ReadinessResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for result in &self.0 {
            map.serialize_entry(&result.project_code, result)?;
        }
        map.end()
    }
}

/// Run the checklist for the given codes, or for the 13 defaults when the
/// list is missing or empty. A repeated code is checked once, at its first
/// position.
pub fn execute_all_initiatives(codes: Option<&[&str]>) -> ReadinessResults {
    let codes = match codes {
        Some(codes) if !codes.is_empty() => codes,
        _ => &DEFAULT_PROJECT_CODES[..],
    };

    let mut seen = HashSet::new();
    ReadinessResults(
        codes
            .iter()
            .filter(|code| seen.insert(**code))
            .map(|code| execute_checklist_phases(code))
            .collect(),
    )
}
