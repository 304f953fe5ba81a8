//! Per-role target tables.
//!
//! The workflow never names a selector itself; it asks for a role and these
//! tables say how to find it. The defaults describe an image-to-video editor
//! with an upload box, an "Edit Image" entry, a "Make video" control, a
//! prompt textarea and a `<video>` result with a download button.

use crate::resolution::{IdentificationStrategy, TargetSpec, TextMatcher};
use crate::session::Query;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetTables {
    #[serde(default = "default_upload_input")]
    pub upload_input: TargetSpec,
    #[serde(default = "default_editor_entry")]
    pub editor_entry: TargetSpec,
    #[serde(default = "default_editor_ready")]
    pub editor_ready: TargetSpec,
    #[serde(default = "default_generation_control")]
    pub generation_control: TargetSpec,
    #[serde(default = "default_prompt_input")]
    pub prompt_input: TargetSpec,
    #[serde(default = "default_prompt_fallback")]
    pub prompt_fallback: TargetSpec,
    #[serde(default = "default_artifact")]
    pub artifact: TargetSpec,
    #[serde(default = "default_download_control")]
    pub download_control: TargetSpec,
}

impl Default for TargetTables {
    fn default() -> Self {
        Self {
            upload_input: default_upload_input(),
            editor_entry: default_editor_entry(),
            editor_ready: default_editor_ready(),
            generation_control: default_generation_control(),
            prompt_input: default_prompt_input(),
            prompt_fallback: default_prompt_fallback(),
            artifact: default_artifact(),
            download_control: default_download_control(),
        }
    }
}

impl TargetTables {
    pub fn iter(&self) -> impl Iterator<Item = &TargetSpec> {
        [
            &self.upload_input,
            &self.editor_entry,
            &self.editor_ready,
            &self.generation_control,
            &self.prompt_input,
            &self.prompt_fallback,
            &self.artifact,
            &self.download_control,
        ]
        .into_iter()
    }
}

fn default_upload_input() -> TargetSpec {
    let file_inputs = Query::css("input[type='file']");
    TargetSpec::new(
        "upload_input",
        vec![
            IdentificationStrategy::Attribute {
                query: file_inputs.clone(),
                name: "name".into(),
                matcher: TextMatcher::equals("files"),
            },
            IdentificationStrategy::Selector { query: file_inputs },
        ],
    )
    .allow_hidden()
}

fn default_editor_entry() -> TargetSpec {
    TargetSpec::new(
        "editor_entry",
        vec![
            IdentificationStrategy::Text {
                query: Query::css("button"),
                matcher: TextMatcher::contains_all(["edit", "image"]),
            },
            IdentificationStrategy::Attribute {
                query: Query::css("button"),
                name: "aria-label".into(),
                matcher: TextMatcher::equals("edit image"),
            },
        ],
    )
    .extracting(["aria-label"])
}

fn default_editor_ready() -> TargetSpec {
    TargetSpec::new(
        "editor_ready",
        vec![IdentificationStrategy::Selector {
            query: Query::css("textarea"),
        }],
    )
    .allow_hidden()
}

fn default_generation_control() -> TargetSpec {
    TargetSpec::new(
        "generation_control",
        vec![
            IdentificationStrategy::Path {
                xpath: "/html/body/div[7]/div/footer/div/div/div[1]/button".into(),
            },
            IdentificationStrategy::Text {
                query: Query::css("button"),
                matcher: TextMatcher::contains_all(["make", "video"]),
            },
            IdentificationStrategy::Attribute {
                query: Query::css("button"),
                name: "aria-label".into(),
                matcher: TextMatcher::contains_all(["make", "video"]),
            },
        ],
    )
    .extracting(["aria-label"])
}

fn default_prompt_input() -> TargetSpec {
    TargetSpec::new(
        "prompt_input",
        vec![IdentificationStrategy::Attribute {
            query: Query::css("textarea"),
            name: "placeholder".into(),
            matcher: TextMatcher::contains_any(["customize", "video", "describe", "prompt"]),
        }],
    )
    .extracting(["placeholder"])
}

fn default_prompt_fallback() -> TargetSpec {
    TargetSpec::new(
        "prompt_fallback",
        vec![IdentificationStrategy::Selector {
            query: Query::css("textarea"),
        }],
    )
    .extracting(["placeholder"])
}

fn default_artifact() -> TargetSpec {
    TargetSpec::new(
        "artifact",
        vec![IdentificationStrategy::Selector {
            query: Query::css("video"),
        }],
    )
    .extracting(["src"])
}

fn default_download_control() -> TargetSpec {
    TargetSpec::new(
        "download_control",
        vec![
            IdentificationStrategy::Attribute {
                query: Query::css("button[aria-label*='ownload']"),
                name: "aria-label".into(),
                matcher: TextMatcher::contains_all(["download"]),
            },
            IdentificationStrategy::Related {
                anchor: Box::new(IdentificationStrategy::Selector {
                    query: Query::css("video"),
                }),
                query: Query::xpath(
                    "./ancestor::*[.//button][1]//button[contains(translate(@aria-label, 'DOWNLAD', 'downlad'), 'download')]",
                ),
            },
        ],
    )
    .extracting(["aria-label"])
}
