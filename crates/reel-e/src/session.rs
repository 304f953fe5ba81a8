use crate::driver::{self, DriverProcess};
use crate::webdriver::{self, WebDriverClient};
use async_trait::async_trait;
use fantoccini::actions::{InputSource, MOUSE_BUTTON_LEFT, MouseActions, PointerAction};
use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::key::Key;
use fantoccini::{Client, Locator};
use reel_engine::session::{NavigationResult, Query, Session, SessionError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// How a [`WebDriverSession`] acquires its browser.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Connect to an already running driver instead of spawning chromedriver.
    pub webdriver_url: Option<String>,
    /// Port for a spawned chromedriver.
    pub port: Option<u16>,
    pub headless: bool,
    /// Persistent browser profile, so a logged-in account survives runs.
    pub profile_dir: Option<PathBuf>,
    pub download_dir: Option<PathBuf>,
}

/// A Chrome session driven over WebDriver.
pub struct WebDriverSession {
    client: Option<WebDriverClient>,
    driver: Option<DriverProcess>,
    options: LaunchOptions,
}

impl WebDriverSession {
    pub fn new(options: LaunchOptions) -> Self {
        Self {
            client: None,
            driver: None,
            options,
        }
    }

    fn client(&self) -> Result<&Client, SessionError> {
        self.client
            .as_ref()
            .map(|c| &c.client)
            .ok_or(SessionError::NotReady)
    }

    async fn navigation_result(client: &Client) -> NavigationResult {
        let title = client.title().await.unwrap_or_default();
        let url = client
            .current_url()
            .await
            .map(|u| u.to_string())
            .unwrap_or_default();
        NavigationResult { url, title }
    }
}

impl Default for WebDriverSession {
    fn default() -> Self {
        Self::new(LaunchOptions::default())
    }
}

fn locator(query: &Query) -> Locator<'_> {
    match query {
        Query::Css(s) => Locator::Css(s),
        Query::XPath(s) => Locator::XPath(s),
    }
}

/// Map a driver error message onto the session's error taxonomy.
pub fn classify(message: &str) -> SessionError {
    let lower = message.to_lowercase();
    if lower.contains("stale element") {
        SessionError::StaleElement
    } else if lower.contains("not interactable") || lower.contains("intercepted") {
        SessionError::NotInteractable(message.to_string())
    } else if lower.contains("invalid selector") {
        SessionError::InvalidQuery {
            query: String::new(),
            reason: message.to_string(),
        }
    } else if [
        "invalid session id",
        "disconnected",
        "connection refused",
        "session deleted",
        "no such window",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
    {
        SessionError::ConnectionLost(message.to_string())
    } else if lower.contains("javascript error") {
        SessionError::Script(message.to_string())
    } else {
        SessionError::Other(message.to_string())
    }
}

fn cmd_error(e: CmdError) -> SessionError {
    classify(&e.to_string())
}

fn query_error(query: &Query, e: CmdError) -> SessionError {
    match cmd_error(e) {
        SessionError::InvalidQuery { reason, .. } => SessionError::InvalidQuery {
            query: query.to_string(),
            reason,
        },
        other => other,
    }
}

#[async_trait]
impl Session for WebDriverSession {
    type Element = Element;

    async fn launch(&mut self) -> Result<(), SessionError> {
        let webdriver_url = match &self.options.webdriver_url {
            Some(url) => {
                info!("Connecting to external WebDriver at {}...", url);
                url.clone()
            }
            None => {
                let port = self.options.port.unwrap_or(driver::DEFAULT_DRIVER_PORT);
                info!("Launching chromedriver on port {}...", port);
                let process = driver::launch_chromedriver(port)
                    .await
                    .map_err(SessionError::Other)?;
                let url = process.webdriver_url();
                self.driver = Some(process);
                url
            }
        };

        let headless = self.options.headless || driver::is_headless_environment();
        let capabilities = webdriver::chrome_capabilities(
            self.options.profile_dir.as_deref(),
            self.options.download_dir.as_deref(),
            headless,
        );
        let client = WebDriverClient::connect(&webdriver_url, Some(capabilities))
            .await
            .map_err(|e| SessionError::ConnectionLost(e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let result = match self.client.take() {
            Some(client) => client
                .close()
                .await
                .map_err(|e| SessionError::Other(e.to_string())),
            None => Ok(()),
        };
        // Dropping the handle stops a spawned chromedriver.
        self.driver = None;
        result
    }

    async fn navigate(&self, url: &str) -> Result<NavigationResult, SessionError> {
        let client = self.client()?;
        info!("Navigating to: {}", url);
        client.goto(url).await.map_err(|e| match cmd_error(e) {
            fault @ SessionError::ConnectionLost(_) => fault,
            other => SessionError::Navigation(other.to_string()),
        })?;
        Ok(Self::navigation_result(client).await)
    }

    async fn query(
        &self,
        query: &Query,
        scope: Option<&Element>,
    ) -> Result<Vec<Element>, SessionError> {
        let client = self.client()?;
        let found = match scope {
            Some(element) => element.find_all(locator(query)).await,
            None => client.find_all(locator(query)).await,
        };
        found.map_err(|e| query_error(query, e))
    }

    async fn attribute(&self, element: &Element, name: &str) -> Result<Option<String>, SessionError> {
        element.attr(name).await.map_err(cmd_error)
    }

    async fn text(&self, element: &Element) -> Result<String, SessionError> {
        element.text().await.map_err(cmd_error)
    }

    async fn is_visible(&self, element: &Element) -> Result<bool, SessionError> {
        element.is_displayed().await.map_err(cmd_error)
    }

    async fn scroll_into_view(&self, element: &Element) -> Result<(), SessionError> {
        self.execute_script(
            element,
            "arguments[0].scrollIntoView({block: 'center', inline: 'center'});",
        )
        .await
        .map(|_| ())
    }

    async fn pointer_click(&self, element: &Element) -> Result<(), SessionError> {
        let client = self.client()?;
        let actions = MouseActions::new("mouse".into())
            .then(PointerAction::MoveToElement {
                element: element.clone(),
                duration: Some(Duration::from_millis(150)),
                x: 0i32.into(),
                y: 0i32.into(),
            })
            .then(PointerAction::Down {
                button: MOUSE_BUTTON_LEFT,
            })
            .then(PointerAction::Up {
                button: MOUSE_BUTTON_LEFT,
            });
        let performed = client.perform_actions(actions).await.map_err(cmd_error);
        let released = client.release_actions().await.map_err(cmd_error);
        performed.and(released)
    }

    async fn native_click(&self, element: &Element) -> Result<(), SessionError> {
        element.click().await.map_err(cmd_error)
    }

    async fn clear(&self, element: &Element) -> Result<(), SessionError> {
        element.clear().await.map_err(cmd_error)
    }

    async fn insert_text(&self, element: &Element, text: &str) -> Result<(), SessionError> {
        element.send_keys(text).await.map_err(cmd_error)
    }

    async fn confirm(&self, element: &Element) -> Result<(), SessionError> {
        element
            .send_keys(&char::from(Key::Enter).to_string())
            .await
            .map_err(cmd_error)
    }

    async fn upload_file(&self, element: &Element, path: &Path) -> Result<(), SessionError> {
        let absolute = path.canonicalize()?;
        debug!("Uploading {}", absolute.display());
        element
            .send_keys(&absolute.to_string_lossy())
            .await
            .map_err(cmd_error)
    }

    async fn execute_script(
        &self,
        element: &Element,
        script: &str,
    ) -> Result<serde_json::Value, SessionError> {
        let client = self.client()?;
        let arg = serde_json::to_value(element).map_err(|e| SessionError::Script(e.to_string()))?;
        client.execute(script, vec![arg]).await.map_err(cmd_error)
    }

    async fn click_at(&self, x: i32, y: i32) -> Result<(), SessionError> {
        let client = self.client()?;
        let actions = MouseActions::new("mouse".into())
            .then(PointerAction::MoveTo {
                duration: Some(Duration::from_millis(100)),
                x: x.into(),
                y: y.into(),
            })
            .then(PointerAction::Down {
                button: MOUSE_BUTTON_LEFT,
            })
            .then(PointerAction::Up {
                button: MOUSE_BUTTON_LEFT,
            });
        let performed = client.perform_actions(actions).await.map_err(cmd_error);
        let released = client.release_actions().await.map_err(cmd_error);
        performed.and(released)
    }
}
