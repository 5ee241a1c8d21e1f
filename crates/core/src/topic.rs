//! Topic patterns.
//!
//! Topics are `/`-separated routing keys (`org/example/render`). Patterns:
//!
//! - `org/example/render` matches exactly that topic
//! - `org/example/*` matches exactly one more segment (`org/example/render`)
//! - `org/example/**` matches any deeper topic (`org/example/a/b`)
//! - `*` matches every topic

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TopicMatcher {
    Exact(String),
    /// Prefix without the trailing `/*`.
    OneLevel(String),
    /// Prefix without the trailing `/**`.
    Subtree(String),
    Any,
}

impl TopicMatcher {
    /// Match `topic`, returning the part covered by the wildcard.
    ///
    /// Exact matches return an empty remainder.
    pub fn match_topic<'t>(&self, topic: &'t str) -> Option<&'t str> {
        match self {
            TopicMatcher::Exact(t) => (t == topic).then_some(""),
            TopicMatcher::OneLevel(prefix) => {
                let rest = strip_segment_prefix(topic, prefix)?;
                (!rest.contains('/')).then_some(rest)
            }
            TopicMatcher::Subtree(prefix) => strip_segment_prefix(topic, prefix),
            TopicMatcher::Any => (!topic.is_empty()).then_some(topic),
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.match_topic(topic).is_some()
    }

    /// Higher is more specific. Used to pick one of several matching patterns.
    pub fn specificity(&self) -> (u8, usize) {
        match self {
            TopicMatcher::Exact(t) => (3, t.len()),
            TopicMatcher::OneLevel(p) => (2, p.len()),
            TopicMatcher::Subtree(p) => (1, p.len()),
            TopicMatcher::Any => (0, 0),
        }
    }

    pub fn pattern(&self) -> String {
        match self {
            TopicMatcher::Exact(t) => t.clone(),
            TopicMatcher::OneLevel(p) => format!("{p}/*"),
            TopicMatcher::Subtree(p) => format!("{p}/**"),
            TopicMatcher::Any => "*".to_string(),
        }
    }
}

fn strip_segment_prefix<'t>(topic: &'t str, prefix: &str) -> Option<&'t str> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    (!rest.is_empty()).then_some(rest)
}

impl FromStr for TopicMatcher {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CoreError::validation("empty topic pattern"));
        }
        if s == "*" || s == "**" {
            return Ok(TopicMatcher::Any);
        }
        let (matcher, prefix) = if let Some(p) = s.strip_suffix("/**") {
            (TopicMatcher::Subtree(p.to_string()), p)
        } else if let Some(p) = s.strip_suffix("/*") {
            (TopicMatcher::OneLevel(p.to_string()), p)
        } else {
            (TopicMatcher::Exact(s.to_string()), s)
        };
        let malformed = prefix.is_empty()
            || prefix.contains('*')
            || prefix.contains("//")
            || prefix.starts_with('/')
            || prefix.ends_with('/');
        if malformed {
            return Err(CoreError::validation(format!("invalid topic pattern: {s}")));
        }
        Ok(matcher)
    }
}

impl TryFrom<String> for TopicMatcher {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TopicMatcher> for String {
    fn from(value: TopicMatcher) -> Self {
        value.pattern()
    }
}

impl core::fmt::Display for TopicMatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.pattern())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn m(p: &str) -> TopicMatcher {
        p.parse().unwrap()
    }

    #[test]
    fn exact_matches_only_itself() {
        let matcher = m("org/example/render");
        assert_eq!(matcher.match_topic("org/example/render"), Some(""));
        assert!(!matcher.matches("org/example/render/more"));
        assert!(!matcher.matches("org/example"));
    }

    #[test]
    fn one_level_matches_a_single_segment() {
        let matcher = m("org/example/*");
        assert_eq!(matcher.match_topic("org/example/render"), Some("render"));
        assert!(!matcher.matches("org/example/a/b"));
        assert!(!matcher.matches("org/example"));
        assert!(!matcher.matches("org/examples/render"));
    }

    #[test]
    fn subtree_matches_any_depth() {
        let matcher = m("org/example/**");
        assert_eq!(matcher.match_topic("org/example/a/b"), Some("a/b"));
        assert!(!matcher.matches("org/example"));
    }

    #[test]
    fn rejects_malformed_patterns() {
        for bad in ["", "  ", "/*", "a/*/b", "a/", "/a", "org//bad", "org//x/*", "a//b/**"] {
            assert!(bad.parse::<TopicMatcher>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn specificity_prefers_exact_then_longer_prefix() {
        assert!(m("a/b").specificity() > m("a/*").specificity());
        assert!(m("a/b/*").specificity() > m("a/*").specificity());
        assert!(m("a/**").specificity() > m("*").specificity());
    }

    #[test]
    fn serde_uses_the_pattern_string() {
        let json = serde_json::to_string(&m("a/b/**")).unwrap();
        assert_eq!(json, "\"a/b/**\"");
        let back: TopicMatcher = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m("a/b/**"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a subtree pattern built from the first segments of a topic
        /// always matches and returns exactly the remaining segments.
        #[test]
        fn subtree_remainder_is_the_tail(
            segments in prop::collection::vec("[a-z]{1,6}", 2..6),
            split in 1usize..5
        ) {
            let split = split.min(segments.len() - 1);
            let prefix = segments[..split].join("/");
            let tail = segments[split..].join("/");
            let topic = segments.join("/");

            let matcher = m(&format!("{prefix}/**"));
            prop_assert_eq!(matcher.match_topic(&topic), Some(tail.as_str()));
        }
    }
}
