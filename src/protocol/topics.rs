//! Topic validation, wildcard matching and SchoolBridge topic construction
//!
//! Topic names are what messages are published on; topic filters are what
//! subscriptions and handlers are registered with. Filters may contain the
//! single-level wildcard `+` and the multi-level wildcard `#`.

use thiserror::Error;

/// Topic validation errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TopicError {
    #[error("topic cannot be empty")]
    Empty,
    #[error("topic '{0}' contains a NUL character")]
    NulCharacter(String),
    #[error("topic name '{0}' cannot contain wildcards")]
    WildcardInName(String),
    #[error("'#' must be the last level of filter '{0}' and occupy it entirely")]
    MisplacedMultiLevelWildcard(String),
    #[error("'+' must occupy an entire level of filter '{0}'")]
    MisplacedSingleLevelWildcard(String),
    #[error("invalid topic segment '{0}'")]
    InvalidSegment(String),
}

/// Validate a topic name used for publishing
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains('\0') {
        return Err(TopicError::NulCharacter(topic.to_string()));
    }
    if topic.contains('+') || topic.contains('#') {
        return Err(TopicError::WildcardInName(topic.to_string()));
    }
    Ok(())
}

/// Validate a topic filter used for subscriptions and handlers
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }
    if filter.contains('\0') {
        return Err(TopicError::NulCharacter(filter.to_string()));
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(TopicError::MisplacedMultiLevelWildcard(filter.to_string()));
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::MisplacedSingleLevelWildcard(filter.to_string()));
        }
    }
    Ok(())
}

/// Check whether a topic name matches a (valid) topic filter
///
/// - `+` matches exactly one level
/// - `#` matches any number of levels, including the parent level itself
///   (`school/#` matches `school`)
/// - topics starting with `$` are not matched by a leading wildcard
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic == filter {
        return true;
    }

    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(expected), Some(actual)) if expected == actual => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Validate one dynamic segment (school id, user id) before it is spliced into a topic
pub fn validate_segment(segment: &str) -> Result<(), TopicError> {
    let valid = !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(TopicError::InvalidSegment(segment.to_string()))
    }
}

/// SchoolBridge topic conventions
pub struct TopicBuilder;

impl TopicBuilder {
    /// `school/{school_id}/alerts`
    pub fn school_alerts(school_id: &str) -> Result<String, TopicError> {
        Self::school_topic(school_id, "alerts")
    }

    /// `school/{school_id}/grades`
    pub fn school_grades(school_id: &str) -> Result<String, TopicError> {
        Self::school_topic(school_id, "grades")
    }

    /// `school/{school_id}/finance`
    pub fn school_finance(school_id: &str) -> Result<String, TopicError> {
        Self::school_topic(school_id, "finance")
    }

    /// `school/{school_id}/announcements`
    pub fn school_announcements(school_id: &str) -> Result<String, TopicError> {
        Self::school_topic(school_id, "announcements")
    }

    /// `users/{user_id}/messages`
    pub fn user_messages(user_id: &str) -> Result<String, TopicError> {
        validate_segment(user_id)?;
        Ok(format!("users/{user_id}/messages"))
    }

    /// `school/{school_id}/#` - everything for one school
    pub fn everything_for_school(school_id: &str) -> Result<String, TopicError> {
        validate_segment(school_id)?;
        Ok(format!("school/{school_id}/#"))
    }

    fn school_topic(school_id: &str, channel: &str) -> Result<String, TopicError> {
        validate_segment(school_id)?;
        Ok(format!("school/{school_id}/{channel}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches_filter("school/42/alerts", "school/42/alerts"));
        assert!(!topic_matches_filter("school/42/alerts", "school/43/alerts"));
        assert!(!topic_matches_filter("school/42", "school/42/alerts"));
        assert!(!topic_matches_filter("school/42/alerts", "school/42"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches_filter("school/42/alerts", "school/+/alerts"));
        assert!(!topic_matches_filter("school/42/grades", "school/+/alerts"));
        assert!(!topic_matches_filter("school/alerts", "school/+/alerts"));
        assert!(!topic_matches_filter("school/42/7/alerts", "school/+/alerts"));
        assert!(topic_matches_filter("a/b/c", "+/+/+"));
        // An empty level is still a level
        assert!(topic_matches_filter("school//alerts", "school/+/alerts"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches_filter("school/42/alerts", "#"));
        assert!(topic_matches_filter("school/42/alerts", "school/#"));
        assert!(topic_matches_filter("school", "school/#"));
        assert!(topic_matches_filter("school/42/alerts/urgent", "school/+/#"));
        assert!(!topic_matches_filter("users/7/messages", "school/#"));
    }

    #[test]
    fn test_system_topics_skip_leading_wildcards() {
        assert!(!topic_matches_filter("$SYS/broker/uptime", "#"));
        assert!(!topic_matches_filter("$SYS/broker/uptime", "+/broker/uptime"));
        assert!(topic_matches_filter("$SYS/broker/uptime", "$SYS/#"));
    }

    #[test]
    fn test_filter_validation() {
        assert!(validate_topic_filter("school/+/alerts").is_ok());
        assert!(validate_topic_filter("school/#").is_ok());
        assert!(validate_topic_filter("#").is_ok());
        assert!(validate_topic_filter("+").is_ok());

        assert_eq!(validate_topic_filter(""), Err(TopicError::Empty));
        assert!(matches!(
            validate_topic_filter("school/#/alerts"),
            Err(TopicError::MisplacedMultiLevelWildcard(_))
        ));
        assert!(matches!(
            validate_topic_filter("school/4#"),
            Err(TopicError::MisplacedMultiLevelWildcard(_))
        ));
        assert!(matches!(
            validate_topic_filter("school/4+/alerts"),
            Err(TopicError::MisplacedSingleLevelWildcard(_))
        ));
        assert!(matches!(
            validate_topic_filter("school\0"),
            Err(TopicError::NulCharacter(_))
        ));
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_topic_name("school/42/alerts").is_ok());
        assert_eq!(validate_topic_name(""), Err(TopicError::Empty));
        assert!(matches!(
            validate_topic_name("school/+/alerts"),
            Err(TopicError::WildcardInName(_))
        ));
    }

    #[test]
    fn test_topic_builder() {
        assert_eq!(TopicBuilder::school_alerts("42").unwrap(), "school/42/alerts");
        assert_eq!(TopicBuilder::school_grades("42").unwrap(), "school/42/grades");
        assert_eq!(TopicBuilder::school_finance("42").unwrap(), "school/42/finance");
        assert_eq!(
            TopicBuilder::school_announcements("kigali-01").unwrap(),
            "school/kigali-01/announcements"
        );
        assert_eq!(TopicBuilder::user_messages("u-7").unwrap(), "users/u-7/messages");
        assert_eq!(TopicBuilder::everything_for_school("42").unwrap(), "school/42/#");
        assert!(topic_matches_filter(
            &TopicBuilder::school_alerts("42").unwrap(),
            "school/+/alerts"
        ));
    }

    #[test]
    fn test_topic_builder_rejects_unsafe_segments() {
        assert!(TopicBuilder::school_alerts("").is_err());
        assert!(TopicBuilder::school_alerts("42/../7").is_err());
        assert!(TopicBuilder::user_messages("#").is_err());
        assert!(TopicBuilder::everything_for_school("+").is_err());
    }

    proptest! {
        #[test]
        fn valid_name_matches_itself_and_hash(topic in "[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,4}") {
            prop_assert!(topic_matches_filter(&topic, &topic));
            prop_assert!(topic_matches_filter(&topic, "#"));
        }

        #[test]
        fn plus_per_level_matches_same_depth(levels in proptest::collection::vec("[a-z0-9]{1,6}", 1..6)) {
            let topic = levels.join("/");
            let filter = vec!["+"; levels.len()].join("/");
            prop_assert!(topic_matches_filter(&topic, &filter));

            let deeper = format!("{filter}/+");
            prop_assert!(!topic_matches_filter(&topic, &deeper));
        }

        #[test]
        fn prefix_hash_matches_descendants(
            prefix in "[a-z]{1,6}(/[a-z]{1,6}){0,2}",
            suffix in "(/[a-z0-9]{1,6}){0,3}",
        ) {
            let topic = format!("{prefix}{suffix}");
            let filter = format!("{prefix}/#");
            prop_assert!(topic_matches_filter(&topic, &filter));
        }

        #[test]
        fn differing_literal_level_never_matches(
            base in "[a-z]{1,6}",
            other in "[0-9]{1,6}",
            rest in "[a-z]{1,6}",
        ) {
            let topic = format!("{base}/{rest}");
            let filter = format!("{other}/{rest}");
            prop_assert!(!topic_matches_filter(&topic, &filter));
        }
    }
}
