//! Topic names, topic filters, and the matching predicate.

use std::fmt;

/// A `/`-separated destination name, as carried in a PUBLISH packet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName(String);

/// A topic pattern: `+` matches exactly one segment, a trailing `#`
/// matches zero or more remaining segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter(String);

/// Splits on `/`, preserving empty segments at the start, the end, and
/// between adjacent separators. Rejoining with `/` reproduces the input.
pub fn split(s: &str) -> Vec<&str> {
    s.split('/').collect()
}

impl TopicName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TopicFilter {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this filter matches `name`.
    ///
    /// A filter whose segments are all consumed matches even when the name
    /// has further segments (`a/b` matches `a/b/c`). See
    /// [`matches_strict`](Self::matches_strict) for the equal-length rule.
    pub fn matches(&self, name: &TopicName) -> bool {
        self.matches_impl(name, false)
    }

    /// [`matches`](Self::matches), except that leftover name segments fail
    /// the match unless the filter ended with `#`.
    pub fn matches_strict(&self, name: &TopicName) -> bool {
        self.matches_impl(name, true)
    }

    fn matches_impl(&self, name: &TopicName, strict: bool) -> bool {
        let filter_parts = split(&self.0);
        let name_parts = split(&name.0);

        // Wildcard filters never see $-prefixed system topics.
        if (filter_parts[0].starts_with('+') || filter_parts[0].starts_with('#'))
            && name_parts[0].starts_with('$')
        {
            return false;
        }

        for (i, part) in filter_parts.iter().enumerate() {
            if *part == "#" {
                return true;
            }
            if i >= name_parts.len() {
                return false;
            }
            if *part != "+" && *part != name_parts[i] {
                return false;
            }
        }
        !strict || filter_parts.len() == name_parts.len()
    }
}

impl From<&str> for TopicName {
    fn from(s: &str) -> Self {
        TopicName(s.to_string())
    }
}

impl From<String> for TopicName {
    fn from(s: String) -> Self {
        TopicName(s)
    }
}

impl From<&str> for TopicFilter {
    fn from(s: &str) -> Self {
        TopicFilter(s.to_string())
    }
}

impl From<String> for TopicFilter {
    fn from(s: String) -> Self {
        TopicFilter(s)
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
