//! Topic construction and classification for the ECOS MQTT namespace
//!
//! Device traffic lives under `ecos/{project_code}/{device_id}/{kind}` where
//! kind is `telemetry` or `control`; coordination traffic lives under
//! `ecos/dispatcher/...`.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub const TOPIC_ROOT: &str = "ecos";
pub const DISPATCHER_PREFIX: &str = "ecos/dispatcher/";

/// Filters the gateway subscribes to once connected
pub const SUBSCRIPTION_FILTERS: [&str; 3] =
    ["ecos/+/+/telemetry", "ecos/+/+/control", "ecos/dispatcher/#"];

pub const PROJECT_CODE_PATTERN: &str = r"^P\d{2}";

static PROJECT_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(PROJECT_CODE_PATTERN).expect("project code pattern is valid"));

/// `ecos/{project_code}/{device_id}/telemetry`
pub fn telemetry_topic(project_code: &str, device_id: &str) -> String {
    format!("{TOPIC_ROOT}/{project_code}/{device_id}/telemetry")
}

/// `ecos/{project_code}/{device_id}/control`
pub fn control_topic(project_code: &str, device_id: &str) -> String {
    format!("{TOPIC_ROOT}/{project_code}/{device_id}/control")
}

/// `ecos/dispatcher/{subtopic}`
pub fn dispatcher_topic(subtopic: &str) -> String {
    format!("{DISPATCHER_PREFIX}{subtopic}")
}

/// True when the code starts with `P` followed by two digits
pub fn is_project_code(code: &str) -> bool {
    PROJECT_CODE_RE.is_match(code)
}

/// Classified inbound topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcosTopic {
    Telemetry { project_code: String, device_id: String },
    Control { project_code: String, device_id: String },
    Dispatcher { subtopic: String },
    Unrecognized,
}

/// Classify a concrete topic; the dispatcher prefix wins over the device layout
pub fn parse_topic(topic: &str) -> EcosTopic {
    if let Some(subtopic) = topic.strip_prefix(DISPATCHER_PREFIX) {
        return EcosTopic::Dispatcher {
            subtopic: subtopic.to_string(),
        };
    }

    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 4 || parts[0] != TOPIC_ROOT {
        return EcosTopic::Unrecognized;
    }

    let project_code = parts[1].to_string();
    let device_id = parts[2].to_string();
    match parts[3] {
        "telemetry" => EcosTopic::Telemetry {
            project_code,
            device_id,
        },
        "control" => EcosTopic::Control {
            project_code,
            device_id,
        },
        _ => EcosTopic::Unrecognized,
    }
}

/// Reject segments that would change the shape of a topic
pub fn validate_topic_segment(segment: &str) -> Result<(), TopicError> {
    if segment.is_empty() {
        return Err(TopicError::EmptySegment);
    }

    for ch in segment.chars() {
        if matches!(ch, '/' | '+' | '#') || ch.is_control() {
            return Err(TopicError::InvalidSegmentChar(ch));
        }
    }

    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic segment cannot be empty")]
    EmptySegment,
    #[error("Topic segment contains invalid character: {0:?}")]
    InvalidSegmentChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_topic_construction() {
        assert_eq!(
            telemetry_topic("P09", "awg-01"),
            "ecos/P09/awg-01/telemetry"
        );
        assert_eq!(control_topic("P08", "bulb-001"), "ecos/P08/bulb-001/control");
        assert_eq!(dispatcher_topic("commands"), "ecos/dispatcher/commands");
    }

    #[test]
    fn test_parse_device_topics() {
        assert_eq!(
            parse_topic("ecos/P13/hydro-7/telemetry"),
            EcosTopic::Telemetry {
                project_code: "P13".to_string(),
                device_id: "hydro-7".to_string()
            }
        );
        assert_eq!(
            parse_topic("ecos/P10/loop-2/control"),
            EcosTopic::Control {
                project_code: "P10".to_string(),
                device_id: "loop-2".to_string()
            }
        );
    }

    #[test]
    fn test_dispatcher_prefix_takes_precedence() {
        // Shaped like a device topic but lives under the dispatcher prefix
        assert_eq!(
            parse_topic("ecos/dispatcher/x/telemetry"),
            EcosTopic::Dispatcher {
                subtopic: "x/telemetry".to_string()
            }
        );
    }

    #[test]
    fn test_unrecognized_topics() {
        assert_eq!(parse_topic("ecos/P01"), EcosTopic::Unrecognized);
        assert_eq!(
            parse_topic("other/P01/dev/telemetry"),
            EcosTopic::Unrecognized
        );
        assert_eq!(parse_topic("ecos/P01/dev/status"), EcosTopic::Unrecognized);
        assert_eq!(parse_topic(""), EcosTopic::Unrecognized);
    }

    #[test]
    fn test_project_code_pattern() {
        assert!(is_project_code("P01"));
        assert!(is_project_code("P13_HYDRO"));
        assert!(!is_project_code("p01"));
        assert!(!is_project_code("X01"));
        assert!(!is_project_code("P1"));
        assert!(!is_project_code(""));
    }

    #[test]
    fn test_segment_validation() {
        assert!(validate_topic_segment("awg-01").is_ok());
        assert_eq!(validate_topic_segment(""), Err(TopicError::EmptySegment));
        assert_eq!(
            validate_topic_segment("a/b"),
            Err(TopicError::InvalidSegmentChar('/'))
        );
        assert!(validate_topic_segment("dev+").is_err());
        assert!(validate_topic_segment("#").is_err());
    }

    proptest! {
        #[test]
        fn built_telemetry_topics_parse_back(
            project in "P[0-9]{2}",
            device in "[a-zA-Z0-9._-]{1,32}"
        ) {
            prop_assume!(project != "dispatcher");
            let topic = telemetry_topic(&project, &device);
            prop_assert_eq!(
                parse_topic(&topic),
                EcosTopic::Telemetry { project_code: project, device_id: device }
            );
        }

        #[test]
        fn built_control_topics_parse_back(
            project in "P[0-9]{2}",
            device in "[a-zA-Z0-9._-]{1,32}"
        ) {
            let topic = control_topic(&project, &device);
            prop_assert_eq!(
                parse_topic(&topic),
                EcosTopic::Control { project_code: project, device_id: device }
            );
        }

        #[test]
        fn valid_segments_never_contain_wildcards(segment in "[^/+#]{1,16}") {
            prop_assume!(!segment.chars().any(|c| c.is_control()));
            prop_assert!(validate_topic_segment(&segment).is_ok());
        }
    }
}
