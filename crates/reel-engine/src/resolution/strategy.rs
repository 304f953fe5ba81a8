use crate::session::{Query, Session, SessionError};
use async_recursion::async_recursion;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Text predicate used by text and attribute strategies.
/// All non-regex forms compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TextMatcher {
    ContainsAll { terms: Vec<String> },
    ContainsAny { terms: Vec<String> },
    Equals { value: String },
    Regex { pattern: String },
}

impl TextMatcher {
    pub fn contains_all<I, T>(terms: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        TextMatcher::ContainsAll {
            terms: terms.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains_any<I, T>(terms: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        TextMatcher::ContainsAny {
            terms: terms.into_iter().map(Into::into).collect(),
        }
    }

    pub fn equals(value: impl Into<String>) -> Self {
        TextMatcher::Equals {
            value: value.into(),
        }
    }

    pub fn matches(&self, haystack: &str) -> bool {
        let lowered = haystack.trim().to_lowercase();
        match self {
            TextMatcher::ContainsAll { terms } => terms
                .iter()
                .all(|t| lowered.contains(&t.to_lowercase())),
            TextMatcher::ContainsAny { terms } => terms
                .iter()
                .any(|t| lowered.contains(&t.to_lowercase())),
            TextMatcher::Equals { value } => lowered == value.trim().to_lowercase(),
            TextMatcher::Regex { pattern } => RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map(|re| re.is_match(haystack))
                .unwrap_or(false),
        }
    }

    /// Reject patterns that can never match because they do not compile.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            TextMatcher::Regex { pattern } => RegexBuilder::new(pattern)
                .build()
                .map(|_| ())
                .map_err(|e| format!("invalid pattern `{}`: {}", pattern, e)),
            TextMatcher::ContainsAny { terms } if terms.is_empty() => {
                Err("contains_any needs at least one term".into())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for TextMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextMatcher::ContainsAll { terms } => write!(f, "contains all {:?}", terms),
            TextMatcher::ContainsAny { terms } => write!(f, "contains any {:?}", terms),
            TextMatcher::Equals { value } => write!(f, "equals {:?}", value),
            TextMatcher::Regex { pattern } => write!(f, "matches /{}/", pattern),
        }
    }
}

/// One technique for locating a UI element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum IdentificationStrategy {
    /// Every element the query returns.
    Selector { query: Query },
    /// Elements whose text content satisfies the matcher.
    Text { query: Query, matcher: TextMatcher },
    /// Elements whose attribute value satisfies the matcher.
    Attribute {
        query: Query,
        name: String,
        matcher: TextMatcher,
    },
    /// Elements whose text or the named attribute satisfies the matcher.
    TextOrAttribute {
        query: Query,
        attribute: String,
        matcher: TextMatcher,
    },
    /// Resolve `anchor`, then evaluate `query` relative to the first anchor
    /// match. A missing anchor is a structural failure.
    Related {
        anchor: Box<IdentificationStrategy>,
        query: Query,
    },
    /// A fixed structural path from the document root.
    Path { xpath: String },
}

impl IdentificationStrategy {
    pub fn label(&self) -> String {
        match self {
            IdentificationStrategy::Selector { query } => format!("selector({})", query),
            IdentificationStrategy::Text { query, matcher } => {
                format!("text({}, {})", query, matcher)
            }
            IdentificationStrategy::Attribute {
                query,
                name,
                matcher,
            } => format!("attribute({}, @{} {})", query, name, matcher),
            IdentificationStrategy::TextOrAttribute {
                query,
                attribute,
                matcher,
            } => format!("text_or_attribute({}, @{} {})", query, attribute, matcher),
            IdentificationStrategy::Related { anchor, query } => {
                format!("related({} -> {})", anchor.label(), query)
            }
            IdentificationStrategy::Path { xpath } => format!("path(`{}`)", xpath),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            IdentificationStrategy::Text { matcher, .. }
            | IdentificationStrategy::Attribute { matcher, .. }
            | IdentificationStrategy::TextOrAttribute { matcher, .. } => matcher.validate(),
            IdentificationStrategy::Related { anchor, .. } => anchor.validate(),
            IdentificationStrategy::Selector { .. } | IdentificationStrategy::Path { .. } => Ok(()),
        }
    }

    /// Every element this strategy matches, in document order, with no
    /// visibility filtering.
    ///
    /// Errors are returned as-is; the resolver decides which of them mean
    /// "no match" and which abort resolution.
    #[async_recursion]
    pub async fn collect<S: Session>(
        &self,
        session: &S,
        scope: Option<&S::Element>,
    ) -> Result<Vec<S::Element>, StrategyError> {
        match self {
            IdentificationStrategy::Selector { query } => {
                Ok(session.query(query, scope).await?)
            }
            IdentificationStrategy::Path { xpath } => {
                Ok(session.query(&Query::XPath(xpath.clone()), None).await?)
            }
            IdentificationStrategy::Text { query, matcher } => {
                let mut matched = Vec::new();
                for element in session.query(query, scope).await? {
                    match session.text(&element).await {
                        Ok(text) if matcher.matches(&text) => matched.push(element),
                        Ok(_) => {}
                        Err(e) if e.is_fault() => return Err(e.into()),
                        Err(_) => {}
                    }
                }
                Ok(matched)
            }
            IdentificationStrategy::Attribute {
                query,
                name,
                matcher,
            } => {
                let mut matched = Vec::new();
                for element in session.query(query, scope).await? {
                    if attribute_matches(session, &element, name, matcher).await? {
                        matched.push(element);
                    }
                }
                Ok(matched)
            }
            IdentificationStrategy::TextOrAttribute {
                query,
                attribute,
                matcher,
            } => {
                let mut matched = Vec::new();
                for element in session.query(query, scope).await? {
                    let text_hit = match session.text(&element).await {
                        Ok(text) => matcher.matches(&text),
                        Err(e) if e.is_fault() => return Err(e.into()),
                        Err(_) => false,
                    };
                    if text_hit || attribute_matches(session, &element, attribute, matcher).await?
                    {
                        matched.push(element);
                    }
                }
                Ok(matched)
            }
            IdentificationStrategy::Related { anchor, query } => {
                let anchors = anchor.collect(session, scope).await?;
                let Some(first) = anchors.first() else {
                    return Err(StrategyError::Structural(format!(
                        "anchor {} not present",
                        anchor.label()
                    )));
                };
                Ok(session.query(query, Some(first)).await?)
            }
        }
    }
}

async fn attribute_matches<S: Session>(
    session: &S,
    element: &S::Element,
    name: &str,
    matcher: &TextMatcher,
) -> Result<bool, StrategyError> {
    match session.attribute(element, name).await {
        Ok(Some(value)) => Ok(matcher.matches(&value)),
        Ok(None) => Ok(false),
        Err(e) if e.is_fault() => Err(e.into()),
        Err(_) => Ok(false),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    /// An expected part of the tree is missing; treated as "no match".
    #[error("structural lookup failed: {0}")]
    Structural(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl StrategyError {
    pub fn is_fault(&self) -> bool {
        matches!(self, StrategyError::Session(e) if e.is_fault())
    }
}
