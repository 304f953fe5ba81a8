use super::targets::TargetTables;
use crate::interaction::InteractionMethod;
use crate::learner::LearningHints;
use crate::monitor::ReferenceRule;
use crate::poller::PollBudget;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Page hosting the editor.
    #[serde(default)]
    pub url: String,
    /// Image uploaded in the first phase.
    #[serde(default)]
    pub asset_path: PathBuf,
    /// Text submitted to the prompt input.
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub interaction: InteractionConfig,
    #[serde(default)]
    pub policies: PhasePolicies,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub targets: TargetTables,
    /// Browser download directory; enables download verification.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Learning store root; `~/.reel/learned` when unset.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
    #[serde(default)]
    pub hints: Option<LearningHints>,
}

impl WorkflowConfig {
    /// Structural checks on the configuration itself.
    pub fn validate(&self) -> Result<(), String> {
        if self.interaction.click_chain.is_empty() {
            return Err("interaction.click_chain must name at least one method".into());
        }
        for key in BudgetKey::ALL {
            let budget = self.timeouts.get(key);
            if budget.interval_ms == 0 {
                return Err(format!("timeouts.{}.interval_ms must be positive", key));
            }
        }
        if self.monitor.reference.schemes.is_empty() {
            return Err("monitor.reference.schemes must not be empty".into());
        }
        for spec in self.targets.iter() {
            spec.validate()?;
        }
        Ok(())
    }

    /// Run inputs: checked before a session is touched.
    pub fn validate_inputs(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("url is required".into());
        }
        url::Url::parse(self.url.trim()).map_err(|e| format!("url `{}`: {}", self.url, e))?;
        if self.instruction.trim().is_empty() {
            return Err("instruction text is required".into());
        }
        if self.asset_path.as_os_str().is_empty() {
            return Err("asset_path is required".into());
        }
        if !self.asset_path.is_file() {
            return Err(format!(
                "asset `{}` does not exist or is not a file",
                self.asset_path.display()
            ));
        }
        self.validate()
    }
}

/// Every bounded wait the workflow performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetKey {
    Upload,
    EditorEntry,
    EditorReady,
    GenerationControl,
    PromptReady,
    Generation,
    DownloadControl,
    DownloadFile,
}

impl BudgetKey {
    pub const ALL: [BudgetKey; 8] = [
        BudgetKey::Upload,
        BudgetKey::EditorEntry,
        BudgetKey::EditorReady,
        BudgetKey::GenerationControl,
        BudgetKey::PromptReady,
        BudgetKey::Generation,
        BudgetKey::DownloadControl,
        BudgetKey::DownloadFile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetKey::Upload => "upload",
            BudgetKey::EditorEntry => "editor_entry",
            BudgetKey::EditorReady => "editor_ready",
            BudgetKey::GenerationControl => "generation_control",
            BudgetKey::PromptReady => "prompt_ready",
            BudgetKey::Generation => "generation",
            BudgetKey::DownloadControl => "download_control",
            BudgetKey::DownloadFile => "download_file",
        }
    }
}

impl fmt::Display for BudgetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseBudget {
    pub timeout_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    1000
}

impl PhaseBudget {
    pub const fn new(timeout_ms: u64, interval_ms: u64) -> Self {
        Self {
            timeout_ms,
            interval_ms,
        }
    }

    pub fn to_poll_budget(self) -> PollBudget {
        PollBudget::from_millis(self.timeout_ms, self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_upload")]
    pub upload: PhaseBudget,
    #[serde(default = "default_editor_entry")]
    pub editor_entry: PhaseBudget,
    #[serde(default = "default_editor_ready")]
    pub editor_ready: PhaseBudget,
    #[serde(default = "default_generation_control")]
    pub generation_control: PhaseBudget,
    #[serde(default = "default_prompt_ready")]
    pub prompt_ready: PhaseBudget,
    #[serde(default = "default_generation")]
    pub generation: PhaseBudget,
    #[serde(default = "default_download_control")]
    pub download_control: PhaseBudget,
    #[serde(default = "default_download_file")]
    pub download_file: PhaseBudget,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            upload: default_upload(),
            editor_entry: default_editor_entry(),
            editor_ready: default_editor_ready(),
            generation_control: default_generation_control(),
            prompt_ready: default_prompt_ready(),
            generation: default_generation(),
            download_control: default_download_control(),
            download_file: default_download_file(),
        }
    }
}

fn default_upload() -> PhaseBudget {
    PhaseBudget::new(20_000, 500)
}

fn default_editor_entry() -> PhaseBudget {
    PhaseBudget::new(20_000, 500)
}

fn default_editor_ready() -> PhaseBudget {
    PhaseBudget::new(20_000, 500)
}

fn default_generation_control() -> PhaseBudget {
    PhaseBudget::new(20_000, 500)
}

fn default_prompt_ready() -> PhaseBudget {
    PhaseBudget::new(60_000, 1000)
}

fn default_generation() -> PhaseBudget {
    PhaseBudget::new(180_000, 2000)
}

fn default_download_control() -> PhaseBudget {
    PhaseBudget::new(30_000, 1000)
}

fn default_download_file() -> PhaseBudget {
    PhaseBudget::new(60_000, 1000)
}

impl Timeouts {
    pub fn get(&self, key: BudgetKey) -> PhaseBudget {
        match key {
            BudgetKey::Upload => self.upload,
            BudgetKey::EditorEntry => self.editor_entry,
            BudgetKey::EditorReady => self.editor_ready,
            BudgetKey::GenerationControl => self.generation_control,
            BudgetKey::PromptReady => self.prompt_ready,
            BudgetKey::Generation => self.generation,
            BudgetKey::DownloadControl => self.download_control,
            BudgetKey::DownloadFile => self.download_file,
        }
    }

    pub fn get_mut(&mut self, key: BudgetKey) -> &mut PhaseBudget {
        match key {
            BudgetKey::Upload => &mut self.upload,
            BudgetKey::EditorEntry => &mut self.editor_entry,
            BudgetKey::EditorReady => &mut self.editor_ready,
            BudgetKey::GenerationControl => &mut self.generation_control,
            BudgetKey::PromptReady => &mut self.prompt_ready,
            BudgetKey::Generation => &mut self.generation,
            BudgetKey::DownloadControl => &mut self.download_control,
            BudgetKey::DownloadFile => &mut self.download_file,
        }
    }

    /// Configured budget, widened to twice the longest observed duration.
    ///
    /// Hints only ever raise a timeout.
    pub fn effective(&self, key: BudgetKey, hints: Option<&LearningHints>) -> PollBudget {
        let configured = self.get(key).to_poll_budget();
        match hints.and_then(|h| h.observed(key)) {
            Some(observed) => PollBudget::new(
                configured.timeout.max(observed.saturating_mul(2)),
                configured.interval,
            ),
            None => configured,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionConfig {
    #[serde(default = "default_click_chain")]
    pub click_chain: Vec<InteractionMethod>,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Blank page coordinate clicked to give the page focus; `None` skips it.
    #[serde(default = "default_focus_point")]
    pub focus_point: Option<FocusPoint>,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            click_chain: default_click_chain(),
            settle_ms: default_settle_ms(),
            focus_point: default_focus_point(),
        }
    }
}

impl InteractionConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

fn default_click_chain() -> Vec<InteractionMethod> {
    crate::interaction::InteractionExecutor::DEFAULT_CHAIN.to_vec()
}

fn default_settle_ms() -> u64 {
    300
}

fn default_focus_point() -> Option<FocusPoint> {
    Some(FocusPoint { x: 800, y: 400 })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusPoint {
    pub x: i32,
    pub y: i32,
}

/// What a timed-out wait does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnTimeout {
    /// Log, record and carry on.
    Soft,
    /// Abort the run.
    Fatal,
}

impl OnTimeout {
    pub fn is_soft(&self) -> bool {
        matches!(self, OnTimeout::Soft)
    }
}

/// Waits whose failure policy is configurable. Every other wait is fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasePolicies {
    #[serde(default = "soft")]
    pub editor_ready: OnTimeout,
    #[serde(default = "soft")]
    pub prompt_ready: OnTimeout,
    /// Soft means a missing download control ends the run as a shortfall.
    #[serde(default = "soft")]
    pub download_control: OnTimeout,
    #[serde(default = "soft")]
    pub download_file: OnTimeout,
    #[serde(default = "soft")]
    pub focus_nudge: OnTimeout,
}

fn soft() -> OnTimeout {
    OnTimeout::Soft
}

impl Default for PhasePolicies {
    fn default() -> Self {
        Self {
            editor_ready: soft(),
            prompt_ready: soft(),
            download_control: soft(),
            download_file: soft(),
            focus_nudge: soft(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub reference: ReferenceRule,
    #[serde(default = "default_follow_up_probe")]
    pub follow_up_probe: PhaseBudget,
    #[serde(default = "default_progress_every_ms")]
    pub progress_every_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            reference: ReferenceRule::default(),
            follow_up_probe: default_follow_up_probe(),
            progress_every_ms: default_progress_every_ms(),
        }
    }
}

fn default_follow_up_probe() -> PhaseBudget {
    PhaseBudget::new(2000, 500)
}

fn default_progress_every_ms() -> u64 {
    10_000
}
