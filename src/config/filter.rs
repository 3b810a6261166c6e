//! Resource name filters
//!
//! A filter is `*`, a single name, or a comma-separated list of names. Each name may
//! carry a leading and/or trailing `*`, giving suffix, prefix or substring matching.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One entry of a filter list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamePattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
}

impl NamePattern {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Exact(exact) => name == exact,
            NamePattern::Prefix(prefix) => name.starts_with(prefix.as_str()),
            NamePattern::Suffix(suffix) => name.ends_with(suffix.as_str()),
            NamePattern::Contains(part) => name.contains(part.as_str()),
        }
    }
}

impl FromStr for NamePattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let leading = s.starts_with('*');
        let trailing = s.len() > 1 && s.ends_with('*');
        let core = s.trim_start_matches('*').trim_end_matches('*');

        if core.is_empty() {
            return Err(format!("Filter entry has no name: '{}'", s));
        }
        if core.contains('*') {
            return Err(format!(
                "Wildcards are only allowed at the start or end of a name: '{}'",
                s
            ));
        }

        let core = core.to_string();
        Ok(match (leading, trailing) {
            (false, false) => NamePattern::Exact(core),
            (false, true) => NamePattern::Prefix(core),
            (true, false) => NamePattern::Suffix(core),
            (true, true) => NamePattern::Contains(core),
        })
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamePattern::Exact(name) => write!(f, "{}", name),
            NamePattern::Prefix(name) => write!(f, "{}*", name),
            NamePattern::Suffix(name) => write!(f, "*{}", name),
            NamePattern::Contains(name) => write!(f, "*{}*", name),
        }
    }
}

/// Which resources of a type a run should include
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FilterPattern {
    /// Every resource of the type
    #[default]
    All,
    /// Resources matching at least one of the names
    Names(Vec<NamePattern>),
}

impl FilterPattern {
    /// Whether a resource identifier is selected by this filter
    ///
    /// A name matches when it matches the whole identifier or any of its `/`- or
    /// `:`-separated segments, so short names select resources listed by ARN.
    pub fn matches(&self, identifier: &str) -> bool {
        match self {
            FilterPattern::All => true,
            FilterPattern::Names(patterns) => patterns.iter().any(|pattern| {
                pattern.matches(identifier)
                    || identifier
                        .split(['/', ':'])
                        .filter(|segment| !segment.is_empty())
                        .any(|segment| pattern.matches(segment))
            }),
        }
    }
}

impl FromStr for FilterPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let entries: Vec<&str> = s
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .collect();

        if entries.is_empty() {
            return Err("Filter pattern is empty".to_string());
        }
        if entries.iter().any(|entry| *entry == "*") {
            return Ok(FilterPattern::All);
        }

        let patterns = entries
            .into_iter()
            .map(NamePattern::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FilterPattern::Names(patterns))
    }
}

impl TryFrom<String> for FilterPattern {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FilterPattern> for String {
    fn from(pattern: FilterPattern) -> Self {
        pattern.to_string()
    }
}

impl fmt::Display for FilterPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterPattern::All => f.write_str("*"),
            FilterPattern::Names(patterns) => {
                let joined: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}
