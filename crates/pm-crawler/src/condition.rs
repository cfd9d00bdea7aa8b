//! Filter conditions
//!
//! Two forms are recognised, `href.includes(<literal>)` and
//! `text.includes(<literal>)`. Anything else is a text match on the whole
//! input, so parsing never fails. There is no escaping and no boolean
//! composition.

use std::convert::Infallible;
use std::str::FromStr;

/// Predicate applied to each matched element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterCondition {
    /// The element's `href` contains the substring
    Href(String),
    /// The element's text contains the substring
    Text(String),
}

impl FilterCondition {
    pub fn parse(input: &str) -> Self {
        if let Some(literal) = call_argument(input, "href.includes(") {
            FilterCondition::Href(literal)
        } else if let Some(literal) = call_argument(input, "text.includes(") {
            FilterCondition::Text(literal)
        } else {
            FilterCondition::Text(input.to_string())
        }
    }

    /// Attribute the predicate reads, `None` for element text
    pub fn attribute(&self) -> Option<&'static str> {
        match self {
            FilterCondition::Href(_) => Some("href"),
            FilterCondition::Text(_) => None,
        }
    }

    pub fn needle(&self) -> &str {
        match self {
            FilterCondition::Href(s) | FilterCondition::Text(s) => s,
        }
    }

    pub fn holds(&self, value: &str) -> bool {
        value.contains(self.needle())
    }
}

impl FromStr for FilterCondition {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(FilterCondition::parse(s))
    }
}

/// Literal passed to `prefix...)`, without the wrapper and quotes
fn call_argument(input: &str, prefix: &str) -> Option<String> {
    let start = input.find(prefix)? + prefix.len();
    let rest = &input[start..];
    let inner = match rest.rfind(')') {
        Some(end) => &rest[..end],
        None => rest,
    };
    Some(strip_quotes(inner.trim()).to_string())
}

fn strip_quotes(s: &str) -> &str {
    for quote in ['"', '\'', '`'] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}
