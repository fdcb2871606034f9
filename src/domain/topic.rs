use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Topic {
    pub name: String,
    pub partitions: i32,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,
}

fn default_replication_factor() -> i32 {
    1
}

impl Topic {
    pub fn new(name: impl Into<String>, partitions: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor: default_replication_factor(),
        }
    }
}

/// Longest topic name Kafka accepts.
pub const MAX_TOPIC_NAME_LEN: usize = 249;

/// Default ceiling on partitions per created topic.
pub const DEFAULT_MAX_PARTITIONS: i32 = 4096;

/// Checks a topic name against Kafka's naming rules.
///
/// Returns the reason on failure so callers can surface it verbatim.
pub fn check_topic_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("topic must not be empty".to_string());
    }
    if name == "." || name == ".." {
        return Err(format!("topic '{}' is reserved", name));
    }
    if name.len() > MAX_TOPIC_NAME_LEN {
        return Err(format!(
            "topic is {} characters long, at most {} allowed",
            name.len(),
            MAX_TOPIC_NAME_LEN
        ));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(format!("topic '{}' contains illegal character {:?}", name, c));
    }
    Ok(())
}
