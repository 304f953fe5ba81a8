use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct NavigationResult {
    pub url: String,
    pub title: String,
}

/// A selector-like expression understood by the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Query {
    #[serde(rename = "css")]
    Css(String),
    #[serde(rename = "xpath")]
    XPath(String),
}

impl Query {
    pub fn css(selector: impl Into<String>) -> Self {
        Query::Css(selector.into())
    }

    pub fn xpath(path: impl Into<String>) -> Self {
        Query::XPath(path.into())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Css(s) => write!(f, "css `{}`", s),
            Query::XPath(s) => write!(f, "xpath `{}`", s),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Invalid query {query}: {reason}")]
    InvalidQuery { query: String, reason: String },

    #[error("Element is stale (removed from DOM)")]
    StaleElement,

    #[error("Element is not interactable: {0}")]
    NotInteractable(String),

    #[error("Script execution error: {0}")]
    Script(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Not ready")]
    NotReady,

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl SessionError {
    /// True when the browser context itself is unusable, as opposed to a
    /// single lookup or interaction going wrong.
    pub fn is_fault(&self) -> bool {
        matches!(self, SessionError::ConnectionLost(_) | SessionError::NotReady)
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(e.to_string())
    }
}

/// A controllable browser context, exclusively owned by one workflow run.
///
/// Element handles are only meaningful against the DOM they were queried
/// from; callers must not hold them across phases.
#[async_trait]
pub trait Session: Send + Sync {
    type Element: Clone + fmt::Debug + Send + Sync;

    /// Acquire the browser context (start or connect to the driver).
    async fn launch(&mut self) -> Result<(), SessionError>;

    /// Release the browser context. Must be safe to call on a session that
    /// was never launched.
    async fn close(&mut self) -> Result<(), SessionError>;

    async fn navigate(&self, url: &str) -> Result<NavigationResult, SessionError>;

    /// All elements matching `query` in document order, optionally scoped
    /// to the subtree (or XPath context) of `scope`.
    async fn query(
        &self,
        query: &Query,
        scope: Option<&Self::Element>,
    ) -> Result<Vec<Self::Element>, SessionError>;

    async fn attribute(
        &self,
        element: &Self::Element,
        name: &str,
    ) -> Result<Option<String>, SessionError>;

    async fn text(&self, element: &Self::Element) -> Result<String, SessionError>;

    async fn is_visible(&self, element: &Self::Element) -> Result<bool, SessionError>;

    async fn scroll_into_view(&self, element: &Self::Element) -> Result<(), SessionError>;

    /// Move a simulated pointer onto the element and click.
    async fn pointer_click(&self, element: &Self::Element) -> Result<(), SessionError>;

    /// The driver's own element click.
    async fn native_click(&self, element: &Self::Element) -> Result<(), SessionError>;

    /// Invoke `click()` on the element from page script.
    async fn script_click(&self, element: &Self::Element) -> Result<(), SessionError> {
        self.execute_script(element, "arguments[0].click();")
            .await
            .map(|_| ())
    }

    async fn clear(&self, element: &Self::Element) -> Result<(), SessionError>;

    async fn insert_text(&self, element: &Self::Element, text: &str) -> Result<(), SessionError>;

    /// Send the platform's confirm signal (Enter) to the element.
    async fn confirm(&self, element: &Self::Element) -> Result<(), SessionError>;

    /// Hand a local file to a file input element.
    async fn upload_file(&self, element: &Self::Element, path: &Path)
    -> Result<(), SessionError>;

    /// Run `script` with the element bound to `arguments[0]`.
    async fn execute_script(
        &self,
        element: &Self::Element,
        script: &str,
    ) -> Result<serde_json::Value, SessionError>;

    /// Pointer click at viewport coordinates.
    async fn click_at(&self, _x: i32, _y: i32) -> Result<(), SessionError> {
        Err(SessionError::NotSupported("click_at".into()))
    }
}
