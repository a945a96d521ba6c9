//! Topic naming conventions shared by every producer and consumer.

/// Suffix appended to a topic name to form its dead-letter channel.
pub const DEAD_LETTER_SUFFIX: &str = ".dead-letter";

/// Returns the dead-letter channel for a topic: `<topic>.dead-letter`.
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}{DEAD_LETTER_SUFFIX}")
}

/// Returns true if the topic is itself a dead-letter channel.
pub fn is_dead_letter_topic(topic: &str) -> bool {
    topic.ends_with(DEAD_LETTER_SUFFIX)
}
