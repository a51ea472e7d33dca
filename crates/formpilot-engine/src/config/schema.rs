use crate::install::{InstallLayout, default_data_dir};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Keys that must be present and non-blank before a run starts.
pub const REQUIRED_KEYS: &[&str] = &[
    "form_url",
    "event_name",
    "start_hour",
    "start_minute",
    "end_hour",
    "end_minute",
    "event_host",
];

/// One event submission, as written by the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    pub form_url: String,
    #[serde(default = "default_record_reply_email")]
    pub record_the_email_address_to_reply: bool,
    pub event_name: String,
    #[serde(default = "default_android_support")]
    pub android_support: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(deserialize_with = "string_or_number")]
    pub start_hour: String,
    #[serde(deserialize_with = "string_or_number")]
    pub start_minute: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(deserialize_with = "string_or_number")]
    pub end_hour: String,
    #[serde(deserialize_with = "string_or_number")]
    pub end_minute: String,
    pub event_host: String,
    #[serde(default)]
    pub event_content: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub participation_conditions: String,
    #[serde(default)]
    pub participation_method: String,
    #[serde(default)]
    pub remarks: String,
    #[serde(default)]
    pub x_announcement: String,
    #[serde(default)]
    pub overseas_announcement: bool,
    #[serde(default)]
    pub engine: EngineSettings,
}

fn default_record_reply_email() -> bool {
    true
}

fn default_android_support() -> String {
    "PC/android".to_string()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub recovery: RecoverySettings,
    #[serde(default)]
    pub launch: LaunchSettings,
    #[serde(default)]
    pub layout: FormLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_presence_ms")]
    pub presence_ms: u64,
    #[serde(default = "default_click_ready_ms")]
    pub click_ready_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_dropdown_open_ms")]
    pub dropdown_open_ms: u64,
    #[serde(default = "default_section_change_ms")]
    pub section_change_ms: u64,
    #[serde(default = "default_toggle_settle_ms")]
    pub toggle_settle_ms: u64,
}

impl TimeoutSettings {
    pub fn presence(&self) -> Duration {
        Duration::from_millis(self.presence_ms)
    }

    pub fn click_ready(&self) -> Duration {
        Duration::from_millis(self.click_ready_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn dropdown_open(&self) -> Duration {
        Duration::from_millis(self.dropdown_open_ms)
    }

    pub fn section_change(&self) -> Duration {
        Duration::from_millis(self.section_change_ms)
    }

    pub fn toggle_settle(&self) -> Duration {
        Duration::from_millis(self.toggle_settle_ms)
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            presence_ms: default_presence_ms(),
            click_ready_ms: default_click_ready_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_ms: default_settle_ms(),
            dropdown_open_ms: default_dropdown_open_ms(),
            section_change_ms: default_section_change_ms(),
            toggle_settle_ms: default_toggle_settle_ms(),
        }
    }
}

fn default_presence_ms() -> u64 {
    10000
}

fn default_click_ready_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_settle_ms() -> u64 {
    500
}

fn default_dropdown_open_ms() -> u64 {
    1000
}

fn default_section_change_ms() -> u64 {
    10000
}

fn default_toggle_settle_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySettings {
    #[serde(default = "default_max_recoveries")]
    pub max_recoveries: u32,
    #[serde(default = "default_recovery_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            max_recoveries: default_max_recoveries(),
            delay_ms: default_recovery_delay_ms(),
        }
    }
}

fn default_max_recoveries() -> u32 {
    3
}

fn default_recovery_delay_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSettings {
    #[serde(default = "default_launch_attempts")]
    pub attempts: u32,
    #[serde(default = "default_relaunch_delay_ms")]
    pub relaunch_delay_ms: u64,
    #[serde(default = "default_orphan_wait_ms")]
    pub orphan_wait_ms: u64,
    #[serde(default = "default_driver_port")]
    pub driver_port: u16,
    /// Use an already running WebDriver server instead of launching one.
    #[serde(default)]
    pub webdriver_url: Option<String>,
    #[serde(default)]
    pub install_dir: Option<PathBuf>,
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
    #[serde(default = "default_profile_name")]
    pub profile_name: String,
    #[serde(default = "default_browser_args")]
    pub browser_args: Vec<String>,
    #[serde(default)]
    pub headless: bool,
}

impl LaunchSettings {
    pub fn install_layout(&self) -> InstallLayout {
        InstallLayout::new(
            self.install_dir
                .clone()
                .unwrap_or_else(|| default_data_dir().join("cft")),
        )
    }

    pub fn profile_path(&self) -> PathBuf {
        self.profile_dir
            .clone()
            .unwrap_or_else(|| default_data_dir().join("profile"))
    }
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            attempts: default_launch_attempts(),
            relaunch_delay_ms: default_relaunch_delay_ms(),
            orphan_wait_ms: default_orphan_wait_ms(),
            driver_port: default_driver_port(),
            webdriver_url: None,
            install_dir: None,
            profile_dir: None,
            profile_name: default_profile_name(),
            browser_args: default_browser_args(),
            headless: false,
        }
    }
}

fn default_launch_attempts() -> u32 {
    3
}

fn default_relaunch_delay_ms() -> u64 {
    1000
}

fn default_orphan_wait_ms() -> u64 {
    5000
}

fn default_driver_port() -> u16 {
    9515
}

fn default_profile_name() -> String {
    "Default".to_string()
}

fn default_browser_args() -> Vec<String> {
    vec!["--start-maximized".to_string(), "--disable-gpu".to_string()]
}

/// Structural hooks of the target form. These change when the form provider
/// changes its markup, so they live in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormLayout {
    /// Class of the block holding a question's title.
    #[serde(default = "default_label_block_class")]
    pub label_block_class: String,
    /// Class of the container wrapping one whole question.
    #[serde(default = "default_question_class")]
    pub question_class: String,
    /// Element whose identity changes when the form moves to the next section.
    #[serde(default = "default_section_xpath")]
    pub section_xpath: String,
    #[serde(default = "default_overlay_class")]
    pub overlay_class: String,
    #[serde(default = "default_hour_label")]
    pub hour_label: String,
    #[serde(default = "default_minute_label")]
    pub minute_label: String,
    #[serde(default = "default_reply_email_label")]
    pub reply_email_label: String,
    #[serde(default = "default_next_button")]
    pub next_button: String,
}

impl Default for FormLayout {
    fn default() -> Self {
        Self {
            label_block_class: default_label_block_class(),
            question_class: default_question_class(),
            section_xpath: default_section_xpath(),
            overlay_class: default_overlay_class(),
            hour_label: default_hour_label(),
            minute_label: default_minute_label(),
            reply_email_label: default_reply_email_label(),
            next_button: default_next_button(),
        }
    }
}

fn default_label_block_class() -> String {
    "HoXoMd".to_string()
}

fn default_question_class() -> String {
    "Qr7Oae".to_string()
}

fn default_section_xpath() -> String {
    "//div[@role='list']".to_string()
}

fn default_overlay_class() -> String {
    "ThHDze".to_string()
}

fn default_hour_label() -> String {
    "時".to_string()
}

fn default_minute_label() -> String {
    "分".to_string()
}

fn default_reply_email_label() -> String {
    "返信に表示するメールアドレス".to_string()
}

fn default_next_button() -> String {
    "次へ".to_string()
}
