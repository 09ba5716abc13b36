//! MQTT topic filter matching and validation.
//!
//! Filters may contain the wildcards:
//! ```text
//! +   matches exactly one level        sensors/+/temp  ~ sensors/room1/temp
//! #   matches all remaining levels     sensors/#       ~ sensors/room1/temp/x
//! ```

use crate::error::{ProtocolError, ProtocolResult};

const SEPARATOR: char = '/';
const SINGLE_LEVEL: &str = "+";
const MULTI_LEVEL: &str = "#";

// ─── Matching ───

/// Check whether a published `topic` matches a subscription `filter`.
///
/// Levels are compared pairwise. A `#` level matches the remainder of the
/// topic, a `+` level matches any single level, anything else must be equal.
/// A filter with more levels than the topic never matches.
pub fn matches(filter: &str, topic: &str) -> bool {
    let filter_levels: Vec<&str> = filter.split(SEPARATOR).collect();
    let topic_levels: Vec<&str> = topic.split(SEPARATOR).collect();

    if filter_levels.len() > topic_levels.len() {
        return false;
    }

    for (filter_level, topic_level) in filter_levels.iter().zip(&topic_levels) {
        if *filter_level == MULTI_LEVEL {
            return true;
        }
        if *filter_level != SINGLE_LEVEL && filter_level != topic_level {
            return false;
        }
    }

    filter_levels.len() == topic_levels.len()
}

// ─── Validation ───

/// Validate a subscription filter.
///
/// `#` is only allowed as the final level and `+` only as a whole level.
pub fn validate_filter(filter: &str) -> ProtocolResult<()> {
    if filter.is_empty() {
        return Err(ProtocolError::InvalidTopic {
            topic: filter.to_string(),
            reason: "topic filter is empty",
        });
    }

    let levels: Vec<&str> = filter.split(SEPARATOR).collect();
    let last = levels.len() - 1;
    for (i, level) in levels.iter().enumerate() {
        if level.contains(MULTI_LEVEL) && (*level != MULTI_LEVEL || i != last) {
            return Err(ProtocolError::InvalidTopic {
                topic: filter.to_string(),
                reason: "'#' must occupy the whole final level",
            });
        }
        if level.contains(SINGLE_LEVEL) && *level != SINGLE_LEVEL {
            return Err(ProtocolError::InvalidTopic {
                topic: filter.to_string(),
                reason: "'+' must occupy a whole level",
            });
        }
    }
    Ok(())
}

/// Validate a topic name used for publishing (no wildcards allowed).
pub fn validate_topic(topic: &str) -> ProtocolResult<()> {
    if topic.is_empty() {
        return Err(ProtocolError::InvalidTopic {
            topic: topic.to_string(),
            reason: "topic is empty",
        });
    }
    if topic.contains(['+', '#']) {
        return Err(ProtocolError::InvalidTopic {
            topic: topic.to_string(),
            reason: "wildcards are not allowed in a publish topic",
        });
    }
    Ok(())
}
