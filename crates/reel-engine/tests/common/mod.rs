#![allow(dead_code)]

use async_trait::async_trait;
use reel_engine::config::WorkflowConfig;
use reel_engine::session::{NavigationResult, Query, Session, SessionError};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MockElement(pub usize);

/// One scripted DOM node. Presence and attributes are functions of time
/// since the session was created.
#[derive(Debug, Clone)]
pub struct Node {
    pub tag: String,
    pub text: String,
    pub attrs: BTreeMap<String, String>,
    pub visible: bool,
    pub appears_after: Duration,
    pub removed_after: Option<Duration>,
    pub attr_changes: Vec<(Duration, String, String)>,
}

impl Node {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            text: String::new(),
            attrs: BTreeMap::new(),
            visible: true,
            appears_after: Duration::ZERO,
            removed_after: None,
            attr_changes: Vec::new(),
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn appears_after(mut self, after: Duration) -> Self {
        self.appears_after = after;
        self
    }

    pub fn removed_after(mut self, after: Duration) -> Self {
        self.removed_after = Some(after);
        self
    }

    pub fn attr_after(mut self, after: Duration, name: &str, value: &str) -> Self {
        self.attr_changes
            .push((after, name.to_string(), value.to_string()));
        self
    }
}

#[derive(Default)]
pub struct MockState {
    pub nodes: Vec<Node>,
    pub routes: HashMap<Query, Vec<usize>>,
    pub scoped_routes: HashMap<(usize, Query), Vec<usize>>,
    pub failing_queries: HashMap<Query, SessionError>,
    /// (element, step) -> error. Steps: simulated, native, scripted, clear,
    /// insert, confirm, upload, scroll.
    pub failures: HashMap<(usize, String), SessionError>,
    pub click_at_error: Option<SessionError>,
    pub launch_error: Option<SessionError>,
    pub downloads_on_click: HashMap<usize, PathBuf>,
    /// element -> replacement swapped in when the element is scrolled to.
    pub rerenders_on_scroll: HashMap<usize, usize>,
    pub log: Vec<String>,
    pub launched: bool,
    pub closed: bool,
}

/// Scripted session for driving the engine without a browser.
///
/// Clones share state, so a test can keep one clone for assertions while
/// the workflow owns the other.
#[derive(Clone)]
pub struct MockSession {
    state: Arc<Mutex<MockState>>,
    start: Instant,
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            start: Instant::now(),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn add(&self, node: Node) -> usize {
        let mut state = self.state();
        state.nodes.push(node);
        state.nodes.len() - 1
    }

    pub fn route(&self, query: Query, ids: &[usize]) {
        self.state()
            .routes
            .entry(query)
            .or_default()
            .extend_from_slice(ids);
    }

    pub fn route_scoped(&self, scope: usize, query: Query, ids: &[usize]) {
        self.state()
            .scoped_routes
            .entry((scope, query))
            .or_default()
            .extend_from_slice(ids);
    }

    pub fn fail_query(&self, query: Query, error: SessionError) {
        self.state().failing_queries.insert(query, error);
    }

    pub fn fail(&self, id: usize, step: &str, error: SessionError) {
        self.state().failures.insert((id, step.to_string()), error);
    }

    pub fn fail_click_at(&self, error: SessionError) {
        self.state().click_at_error = Some(error);
    }

    pub fn fail_launch(&self, error: SessionError) {
        self.state().launch_error = Some(error);
    }

    pub fn download_on_click(&self, id: usize, path: PathBuf) {
        self.state().downloads_on_click.insert(id, path);
    }

    /// Scrolling to `id` detaches it and shows `replacement` in its place.
    pub fn rerender_on_scroll(&self, id: usize, replacement: usize) {
        self.state().rerenders_on_scroll.insert(id, replacement);
    }

    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn logged(&self, prefix: &str) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|l| l.starts_with(prefix))
            .collect()
    }

    pub fn closed(&self) -> bool {
        self.state().closed
    }

    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn present(&self, state: &MockState, id: usize) -> bool {
        let now = self.now();
        state.nodes.get(id).is_some_and(|n| {
            n.appears_after <= now && n.removed_after.is_none_or(|r| now < r)
        })
    }

    fn with_node<T>(
        &self,
        element: &MockElement,
        f: impl FnOnce(&Node) -> T,
    ) -> Result<T, SessionError> {
        let state = self.state();
        if !self.present(&state, element.0) {
            return Err(SessionError::StaleElement);
        }
        Ok(f(&state.nodes[element.0]))
    }

    fn step(&self, element: &MockElement, step: &str) -> Result<(), SessionError> {
        let mut state = self.state();
        if !self.present(&state, element.0) {
            return Err(SessionError::StaleElement);
        }
        if let Some(err) = state.failures.get(&(element.0, step.to_string())) {
            let err = err.clone();
            state.log.push(format!("{}! {}", step, element.0));
            return Err(err);
        }
        state.log.push(format!("{} {}", step, element.0));
        Ok(())
    }

    fn clicked(&self, element: &MockElement) {
        let path = self.state().downloads_on_click.get(&element.0).cloned();
        if let Some(path) = path {
            std::fs::write(path, b"\x00\x00\x00\x18ftypmp42").unwrap();
        }
    }
}

#[async_trait]
impl Session for MockSession {
    type Element = MockElement;

    async fn launch(&mut self) -> Result<(), SessionError> {
        let mut state = self.state();
        state.log.push("launch".into());
        if let Some(err) = state.launch_error.clone() {
            return Err(err);
        }
        state.launched = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let mut state = self.state();
        state.log.push("close".into());
        state.closed = true;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<NavigationResult, SessionError> {
        self.state().log.push(format!("navigate {}", url));
        Ok(NavigationResult {
            url: url.to_string(),
            title: "Mock Editor".into(),
        })
    }

    async fn query(
        &self,
        query: &Query,
        scope: Option<&MockElement>,
    ) -> Result<Vec<MockElement>, SessionError> {
        let state = self.state();
        if let Some(err) = state.failing_queries.get(query) {
            return Err(err.clone());
        }
        let ids = match scope {
            Some(scope) => state.scoped_routes.get(&(scope.0, query.clone())),
            None => state.routes.get(query),
        };
        let mut found: Vec<usize> = ids
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|id| self.present(&state, *id))
                    .collect()
            })
            .unwrap_or_default();
        found.sort_unstable();
        Ok(found.into_iter().map(MockElement).collect())
    }

    async fn attribute(
        &self,
        element: &MockElement,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        let now = self.now();
        self.with_node(element, |n| {
            n.attr_changes
                .iter()
                .filter(|(at, attr, _)| *at <= now && attr == name)
                .last()
                .map(|(_, _, v)| v.clone())
                .or_else(|| n.attrs.get(name).cloned())
        })
    }

    async fn text(&self, element: &MockElement) -> Result<String, SessionError> {
        self.with_node(element, |n| n.text.clone())
    }

    async fn is_visible(&self, element: &MockElement) -> Result<bool, SessionError> {
        self.with_node(element, |n| n.visible)
    }

    async fn scroll_into_view(&self, element: &MockElement) -> Result<(), SessionError> {
        self.step(element, "scroll")?;
        let now = self.now();
        let mut state = self.state();
        if let Some(replacement) = state.rerenders_on_scroll.remove(&element.0) {
            state.nodes[element.0].removed_after = Some(now);
            state.nodes[replacement].appears_after = now;
        }
        Ok(())
    }

    async fn pointer_click(&self, element: &MockElement) -> Result<(), SessionError> {
        self.step(element, "simulated")?;
        self.clicked(element);
        Ok(())
    }

    async fn native_click(&self, element: &MockElement) -> Result<(), SessionError> {
        self.step(element, "native")?;
        self.clicked(element);
        Ok(())
    }

    async fn script_click(&self, element: &MockElement) -> Result<(), SessionError> {
        self.step(element, "scripted")?;
        self.clicked(element);
        Ok(())
    }

    async fn clear(&self, element: &MockElement) -> Result<(), SessionError> {
        self.step(element, "clear")
    }

    async fn insert_text(&self, element: &MockElement, text: &str) -> Result<(), SessionError> {
        self.step(element, "insert")?;
        self.state().log.push(format!("typed {}", text));
        Ok(())
    }

    async fn confirm(&self, element: &MockElement) -> Result<(), SessionError> {
        self.step(element, "confirm")
    }

    async fn upload_file(&self, element: &MockElement, path: &Path) -> Result<(), SessionError> {
        self.step(element, "upload")?;
        self.state()
            .log
            .push(format!("uploaded {}", path.display()));
        Ok(())
    }

    async fn execute_script(
        &self,
        element: &MockElement,
        script: &str,
    ) -> Result<serde_json::Value, SessionError> {
        self.with_node(element, |_| ())?;
        self.state()
            .log
            .push(format!("script {} {}", element.0, script));
        Ok(serde_json::Value::Null)
    }

    async fn click_at(&self, x: i32, y: i32) -> Result<(), SessionError> {
        let mut state = self.state();
        state.log.push(format!("click_at {},{}", x, y));
        match state.click_at_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Element ids of the scripted editor page.
pub struct EditorPage {
    pub file_input: usize,
    pub edit_button: usize,
    pub textarea: usize,
    pub make_video: usize,
    pub video: usize,
    pub download: usize,
}

/// Knobs for the scripted editor page.
pub struct PageScript {
    /// Route the fixed footer path to the generation control.
    pub footer_path: bool,
    pub textarea: bool,
    /// When the video's `src` becomes a playable reference; `None` = never.
    pub video_ready_after: Option<Duration>,
    pub download_button: bool,
}

impl Default for PageScript {
    fn default() -> Self {
        Self {
            footer_path: true,
            textarea: true,
            video_ready_after: Some(secs(40)),
            download_button: true,
        }
    }
}

pub const FOOTER_PATH: &str = "/html/body/div[7]/div/footer/div/div/div[1]/button";

/// Build a page matching the default target tables.
pub fn editor_page(session: &MockSession, script: PageScript) -> EditorPage {
    let file_input = session.add(
        Node::new("input")
            .attr("type", "file")
            .attr("name", "files")
            .hidden(),
    );
    let edit_button = session.add(
        Node::new("button")
            .text("Edit Image")
            .appears_after(secs(2)),
    );
    let textarea = session.add(
        Node::new("textarea")
            .attr("placeholder", "Customize your video...")
            .appears_after(secs(4)),
    );
    let make_video = session.add(
        Node::new("button")
            .text("Make video")
            .attr("aria-label", "Make video")
            .appears_after(secs(5)),
    );
    let mut video = Node::new("video").attr("src", "").appears_after(secs(10));
    if let Some(after) = script.video_ready_after {
        video = video.attr_after(after, "src", "blob:https://app.example/5d1f-9a");
    }
    let video = session.add(video);
    let download = session.add(
        Node::new("button")
            .attr("aria-label", "Download")
            .appears_after(script.video_ready_after.unwrap_or(secs(10))),
    );

    session.route(Query::css("input[type='file']"), &[file_input]);
    let mut buttons = vec![edit_button, make_video];
    if script.download_button {
        buttons.push(download);
        session.route(Query::css("button[aria-label*='ownload']"), &[download]);
    }
    session.route(Query::css("button"), &buttons);
    if script.textarea {
        session.route(Query::css("textarea"), &[textarea]);
    }
    if script.footer_path {
        session.route(Query::xpath(FOOTER_PATH), &[make_video]);
    }
    session.route(Query::css("video"), &[video]);

    EditorPage {
        file_input,
        edit_button,
        textarea,
        make_video,
        video,
        download,
    }
}

/// Default config pointing at a real temporary asset.
pub fn config_with_asset(dir: &Path) -> WorkflowConfig {
    let asset = dir.join("portrait.png");
    std::fs::write(&asset, b"\x89PNG\r\n").unwrap();
    WorkflowConfig {
        url: "https://app.example/imagine".into(),
        asset_path: asset,
        instruction: "slow dolly zoom toward the subject".into(),
        ..Default::default()
    }
}
