//! End-to-end fill sequence for the registration form.

use crate::config::{EngineSettings, TimeoutSettings};
use crate::error::EngineError;
use crate::locator::{Locator, button_query, option_query, radio_query, section_query};
use crate::logging::Reporter;
use crate::normalizer::format_for_input;
use crate::recovery::Task;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::schema::{ControlKind, FieldKey, FieldSpec, FieldValue, FormValues};
use crate::session::{Session, SessionManager};
use crate::transport::{ElementRef, Transport};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The reply-address checkbox is clicked at most this many times per pass.
const REPLY_EMAIL_CLICKS: usize = 2;

const FIRST_SECTION: [FieldKey; 5] = [
    FieldKey::EventName,
    FieldKey::AndroidSupport,
    FieldKey::StartDateTime,
    FieldKey::EndDateTime,
    FieldKey::RegisterEvent,
];

const SECOND_SECTION: [FieldKey; 6] = [
    FieldKey::EventHost,
    FieldKey::EventContent,
    FieldKey::Genres,
    FieldKey::ParticipationConditions,
    FieldKey::ParticipationMethod,
    FieldKey::Remarks,
];

/// Ways of setting a single-choice field, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStrategy {
    Dropdown,
    Radio,
    /// Log and move on.
    SkipIfBothFail,
}

impl fmt::Display for FieldStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldStrategy::Dropdown => f.write_str("dropdown"),
            FieldStrategy::Radio => f.write_str("radio"),
            FieldStrategy::SkipIfBothFail => f.write_str("skip"),
        }
    }
}

pub const OVERSEAS_STRATEGIES: [FieldStrategy; 3] = [
    FieldStrategy::Dropdown,
    FieldStrategy::Radio,
    FieldStrategy::SkipIfBothFail,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckboxAction {
    Check,
    Uncheck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckboxChange {
    /// Position within the group, in document order.
    pub index: usize,
    pub label: String,
    pub action: CheckboxAction,
}

/// Clicks needed to turn the `current` checked state into exactly `targets`.
/// Boxes already in the wanted state are left alone.
pub fn plan_checkbox_changes(current: &[(String, bool)], targets: &[String]) -> Vec<CheckboxChange> {
    current
        .iter()
        .enumerate()
        .filter_map(|(index, (label, checked))| {
            let wanted = targets.iter().any(|t| t == label);
            let action = match (wanted, *checked) {
                (true, false) => CheckboxAction::Check,
                (false, true) => CheckboxAction::Uncheck,
                _ => return None,
            };
            Some(CheckboxChange {
                index,
                label: label.clone(),
                action,
            })
        })
        .collect()
}

fn is_fatal(err: &EngineError) -> bool {
    err.is_session_lost() || matches!(err, EngineError::Cancelled)
}

async fn is_checked(transport: &dyn Transport, element: &ElementRef) -> Result<bool, EngineError> {
    Ok(transport.attribute(element, "aria-checked").await?.as_deref() == Some("true"))
}

#[derive(Debug, Clone)]
pub struct FormDriver {
    locator: Locator,
    retry: RetryExecutor,
    policy: RetryPolicy,
    timeouts: TimeoutSettings,
    reporter: Reporter,
}

impl FormDriver {
    pub fn new(settings: &EngineSettings, reporter: Reporter) -> Self {
        Self {
            locator: Locator::new(settings.layout.clone(), &settings.timeouts),
            retry: RetryExecutor::new(reporter.clone()),
            policy: settings.retry.policy(),
            timeouts: settings.timeouts.clone(),
            reporter,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.retry = self.retry.with_cancellation(cancel);
        self
    }

    /// One full pass over both form sections. The browser is left on the
    /// filled second section.
    pub async fn run(&self, session: &Session, values: &FormValues) -> Result<(), EngineError> {
        let t = session.transport();

        if values.record_reply_email {
            self.ensure_reply_email(t).await?;
        }

        for key in FIRST_SECTION {
            self.fill_field(t, values, key).await?;
        }

        let marker = self
            .retry
            .execute("capture form section", self.policy, || {
                self.locator.section_marker(t)
            })
            .await?;

        // The checkbox sometimes resets while the first section is filled.
        if values.record_reply_email {
            self.ensure_reply_email(t).await?;
        }

        let next = self.locator.layout().next_button.as_str();
        self.retry
            .execute(&format!("click \"{next}\""), self.policy, || {
                self.click_button(t, next)
            })
            .await?;
        self.retry
            .execute("wait for next section", self.policy, || {
                self.wait_section_change(t, &marker)
            })
            .await?;

        let first_label = FieldKey::EventHost.spec().label;
        self.retry
            .execute(&format!("wait for \"{first_label}\""), self.policy, || {
                self.locator.wait_for_label(t, first_label)
            })
            .await?;
        self.reporter
            .ok(format!("\"{first_label}\" is shown (section changed)"));

        for key in SECOND_SECTION {
            self.fill_field(t, values, key).await?;
        }

        self.fill_with_fallback(t, values, FieldKey::OverseasAnnouncement, &OVERSEAS_STRATEGIES)
            .await?;
        self.fill_field(t, values, FieldKey::XAnnouncement).await?;

        Ok(())
    }

    fn field_value<'v>(
        &self,
        values: &'v FormValues,
        spec: &FieldSpec,
    ) -> Result<&'v FieldValue, EngineError> {
        values
            .get(spec.key)
            .ok_or_else(|| EngineError::Interaction(format!("no value for \"{}\"", spec.label)))
    }

    /// Write one field, retried within the field's own budget.
    pub async fn fill_field(
        &self,
        t: &dyn Transport,
        values: &FormValues,
        key: FieldKey,
    ) -> Result<(), EngineError> {
        let spec = key.spec();
        let value = self.field_value(values, spec)?;
        let policy = self.policy.with_attempts(spec.attempts);
        let name = format!("fill \"{}\"", spec.label);
        let label = spec.label;

        match (spec.kind, value) {
            (ControlKind::Text | ControlKind::MultiLineText, FieldValue::Text(text)) => {
                self.retry
                    .execute(&name, policy, || self.fill_text(t, label, spec.kind, text))
                    .await
            }
            (ControlKind::Dropdown, FieldValue::Choice(option)) => {
                self.retry
                    .execute(&name, policy, || self.select_dropdown(t, label, option))
                    .await
            }
            (ControlKind::RadioGroup, FieldValue::Choice(option)) => {
                self.retry
                    .execute(&name, policy, || self.select_radio(t, label, option))
                    .await
            }
            (ControlKind::CheckboxGroup, FieldValue::Choices(targets)) => {
                self.retry
                    .execute(&name, policy, || self.reconcile_checkboxes(t, label, targets))
                    .await
            }
            (ControlKind::DateTime, FieldValue::DateTime { date, hour, minute }) => {
                self.retry
                    .execute(&name, policy, || {
                        self.fill_datetime(t, label, *date, hour, minute)
                    })
                    .await
            }
            (kind, _) => Err(EngineError::Interaction(format!(
                "value for \"{label}\" does not fit a {kind:?} control"
            ))),
        }
    }

    /// Try each strategy in turn and stop at the first success.
    ///
    /// Session loss and cancellation are never swallowed, even when the list
    /// ends in [`FieldStrategy::SkipIfBothFail`].
    pub async fn fill_with_fallback(
        &self,
        t: &dyn Transport,
        values: &FormValues,
        key: FieldKey,
        strategies: &[FieldStrategy],
    ) -> Result<(), EngineError> {
        let spec = key.spec();
        let option = match self.field_value(values, spec)? {
            FieldValue::Choice(option) => option.as_str(),
            _ => {
                return Err(EngineError::Interaction(format!(
                    "\"{}\" needs a single choice",
                    spec.label
                )));
            }
        };
        let label = spec.label;
        let policy = self.policy.with_attempts(spec.attempts);
        let mut last_error = None;

        for strategy in strategies {
            let name = format!("fill \"{label}\" ({strategy})");
            let result = match strategy {
                FieldStrategy::Dropdown => {
                    self.retry
                        .execute(&name, policy, || self.select_dropdown(t, label, option))
                        .await
                }
                FieldStrategy::Radio => {
                    self.retry
                        .execute(&name, policy, || self.select_radio(t, label, option))
                        .await
                }
                FieldStrategy::SkipIfBothFail => {
                    self.reporter.warn(format!(
                        "Could not set \"{label}\"; leaving it as is and continuing"
                    ));
                    return Ok(());
                }
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err) if is_fatal(&err) => return Err(err),
                Err(err) => {
                    self.reporter
                        .warn(format!("\"{label}\" as {strategy} failed: {err}"));
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn fill_text(
        &self,
        t: &dyn Transport,
        label: &str,
        kind: ControlKind,
        value: &str,
    ) -> Result<(), EngineError> {
        let input = self.locator.find_by_label(t, label, kind).await?;
        t.clear(&input).await?;
        t.send_keys(&input, value).await?;
        self.reporter.ok(format!("Filled \"{label}\""));
        Ok(())
    }

    async fn select_dropdown(
        &self,
        t: &dyn Transport,
        label: &str,
        option: &str,
    ) -> Result<(), EngineError> {
        let listbox = self
            .locator
            .find_by_label(t, label, ControlKind::Dropdown)
            .await?;
        t.scroll_into_view(&listbox).await?;
        tokio::time::sleep(self.timeouts.settle()).await;
        t.click(&listbox).await?;
        tokio::time::sleep(self.timeouts.dropdown_open()).await;

        let choice = self
            .locator
            .wait_for(
                t,
                &option_query(option),
                option,
                self.locator.presence_timeout(),
            )
            .await?;
        t.scroll_into_view(&choice).await?;
        t.click(&choice).await?;
        tokio::time::sleep(self.timeouts.settle()).await;

        self.reporter
            .ok(format!("Selected \"{option}\" for \"{label}\""));
        Ok(())
    }

    async fn select_radio(
        &self,
        t: &dyn Transport,
        label: &str,
        option: &str,
    ) -> Result<(), EngineError> {
        let container = self
            .locator
            .find_by_label(t, label, ControlKind::RadioGroup)
            .await?;
        let radio = self
            .locator
            .find_within(t, &container, &radio_query(option), option)
            .await?;
        t.scroll_into_view(&radio).await?;
        tokio::time::sleep(self.timeouts.settle()).await;

        if is_checked(t, &radio).await? {
            self.reporter
                .ok(format!("\"{option}\" is already selected for \"{label}\""));
        } else {
            t.click(&radio).await?;
            self.reporter
                .ok(format!("Selected \"{option}\" for \"{label}\""));
        }
        Ok(())
    }

    async fn fill_datetime(
        &self,
        t: &dyn Transport,
        label: &str,
        date: NaiveDate,
        hour: &str,
        minute: &str,
    ) -> Result<(), EngineError> {
        let inputs = self.locator.find_datetime(t, label).await?;
        let date = format_for_input(date);
        for (input, value) in [
            (&inputs.date, date.as_str()),
            (&inputs.hour, hour),
            (&inputs.minute, minute),
        ] {
            t.clear(input).await?;
            t.send_keys(input, value).await?;
        }
        self.reporter.ok(format!("Filled date and time for \"{label}\""));
        Ok(())
    }

    /// Drive the group to exactly `targets`; re-reads state on every attempt.
    async fn reconcile_checkboxes(
        &self,
        t: &dyn Transport,
        label: &str,
        targets: &[String],
    ) -> Result<(), EngineError> {
        let boxes = self.locator.find_group(t, label).await?;

        let mut current = Vec::with_capacity(boxes.len());
        for checkbox in &boxes {
            let name = match t.attribute(checkbox, "aria-label").await? {
                Some(name) if !name.trim().is_empty() => name,
                _ => t.text(checkbox).await?.trim().to_string(),
            };
            current.push((name, is_checked(t, checkbox).await?));
        }

        for target in targets {
            if !current.iter().any(|(name, _)| name == target) {
                self.reporter
                    .warn(format!("\"{label}\" has no option \"{target}\""));
            }
        }

        for change in plan_checkbox_changes(&current, targets) {
            t.click(&boxes[change.index]).await?;
            match change.action {
                CheckboxAction::Check => self
                    .reporter
                    .ok(format!("Checked \"{}\" in \"{label}\"", change.label)),
                CheckboxAction::Uncheck => self
                    .reporter
                    .ok(format!("Unchecked \"{}\" in \"{label}\"", change.label)),
            }
        }
        Ok(())
    }

    async fn click_button(&self, t: &dyn Transport, text: &str) -> Result<(), EngineError> {
        let button = self.locator.find_button(t, text).await?;
        t.scroll_into_view(&button).await?;
        tokio::time::sleep(self.timeouts.settle()).await;

        if let Err(err) = self
            .locator
            .wait_overlay_gone(t, self.timeouts.click_ready())
            .await
        {
            if is_fatal(&err) {
                return Err(err);
            }
            tracing::debug!("clicking despite overlay: {err}");
        }

        let button = self
            .locator
            .wait_for(t, &button_query(text), text, self.timeouts.click_ready())
            .await?;
        if !t.is_displayed(&button).await? {
            return Err(EngineError::Interaction(format!(
                "\"{text}\" button is not clickable"
            )));
        }
        t.click(&button).await?;
        self.reporter.ok(format!("Clicked the \"{text}\" button"));
        Ok(())
    }

    /// Wait until the section marker is a different element than `previous`.
    async fn wait_section_change(
        &self,
        t: &dyn Transport,
        previous: &ElementRef,
    ) -> Result<(), EngineError> {
        let timeout = self.timeouts.section_change();
        let deadline = Instant::now() + timeout;
        let selector = section_query(self.locator.layout());
        loop {
            let current = t.find_elements(None, &selector).await?;
            if current.first().is_some_and(|marker| marker != previous) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(EngineError::SectionUnchanged(timeout));
            }
            tokio::time::sleep(self.timeouts.poll_interval()).await;
        }
    }

    /// Best effort: a missing checkbox or one that will not turn on is a
    /// warning, not a failure.
    async fn ensure_reply_email(&self, t: &dyn Transport) -> Result<(), EngineError> {
        let checkbox = match self.locator.find_reply_email(t).await {
            Ok(checkbox) => checkbox,
            Err(err) if is_fatal(&err) => return Err(err),
            Err(err) => {
                self.reporter
                    .warn(format!("Reply e-mail checkbox not found, continuing: {err}"));
                return Ok(());
            }
        };

        match self.turn_on(t, &checkbox).await {
            Ok(true) => self.reporter.ok("Reply e-mail checkbox is on"),
            Ok(false) => self.reporter.warn(
                "Could not turn the reply e-mail checkbox on (the form may have changed)",
            ),
            Err(err) if is_fatal(&err) => return Err(err),
            Err(err) => self
                .reporter
                .warn(format!("Could not set the reply e-mail checkbox: {err}")),
        }
        Ok(())
    }

    async fn turn_on(&self, t: &dyn Transport, checkbox: &ElementRef) -> Result<bool, EngineError> {
        t.scroll_into_view(checkbox).await?;
        for _ in 0..REPLY_EMAIL_CLICKS {
            if is_checked(t, checkbox).await? {
                return Ok(true);
            }
            t.click(checkbox).await?;
            tokio::time::sleep(self.timeouts.toggle_settle()).await;
        }
        is_checked(t, checkbox).await
    }
}

/// Open a session and run one fill pass on it.
#[derive(Debug)]
pub struct FormFillTask {
    driver: FormDriver,
    values: FormValues,
}

impl FormFillTask {
    pub fn new(driver: FormDriver, values: FormValues) -> Self {
        Self { driver, values }
    }
}

#[async_trait]
impl Task for FormFillTask {
    async fn run(&mut self, sessions: &mut SessionManager) -> Result<(), EngineError> {
        sessions.open().await?;
        let session = sessions.operate()?;
        self.driver.run(session, &self.values).await
    }
}
