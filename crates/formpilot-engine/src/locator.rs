//! Label-driven element resolution.
//!
//! Every lookup starts from the human-readable question title and walks to the
//! nearest structurally related control, so visual reordering of the form does
//! not matter as long as the label text and local markup stay the same.

use crate::config::{FormLayout, TimeoutSettings};
use crate::error::EngineError;
use crate::schema::ControlKind;
use crate::transport::{ElementRef, Selector, Transport};
use std::time::Duration;
use tokio::time::Instant;

/// Quote `text` as an XPath 1.0 string literal.
pub fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        return format!("'{text}'");
    }
    if !text.contains('"') {
        return format!("\"{text}\"");
    }
    let parts: Vec<String> = text
        .split('\'')
        .map(|part| format!("'{part}'"))
        .collect();
    format!("concat({})", parts.join(", \"'\", "))
}

pub fn label_span_query(label: &str) -> Selector {
    Selector::XPath(format!("//span[contains(text(), {})]", xpath_literal(label)))
}

/// Any element carrying the label, used where the title is not wrapped in a span.
pub fn any_label_query(label: &str) -> Selector {
    Selector::XPath(format!("//*[contains(text(), {})]", xpath_literal(label)))
}

pub fn text_input_query(layout: &FormLayout, label: &str) -> Selector {
    Selector::XPath(format!(
        "//span[contains(text(), {})]/ancestor::div[contains(@class, {})]/following::input[@type='text'][1]",
        xpath_literal(label),
        xpath_literal(&layout.label_block_class)
    ))
}

pub fn textarea_query(layout: &FormLayout, label: &str) -> Selector {
    Selector::XPath(format!(
        "//span[contains(text(), {})]/ancestor::div[contains(@class, {})]/following::textarea[1]",
        xpath_literal(label),
        xpath_literal(&layout.label_block_class)
    ))
}

pub fn label_block_query(layout: &FormLayout, label: &str) -> Selector {
    Selector::XPath(format!(
        "//div[contains(@class, {}) and .//span[contains(text(), {})]]",
        xpath_literal(&layout.label_block_class),
        xpath_literal(label)
    ))
}

/// Relative to a label element.
pub fn container_query(layout: &FormLayout) -> Selector {
    Selector::XPath(format!(
        "./ancestor::div[contains(@class, {})]",
        xpath_literal(&layout.question_class)
    ))
}

pub fn listbox_query() -> Selector {
    Selector::XPath(".//div[@role='listbox']".to_string())
}

pub fn option_query(option: &str) -> Selector {
    Selector::XPath(format!(
        "//div[@role='option'][.//span[contains(text(), {})]]",
        xpath_literal(option)
    ))
}

/// Radio options match their accessible name exactly.
pub fn radio_query(option: &str) -> Selector {
    Selector::XPath(format!(
        ".//*[@role='radio' and @aria-label={}]",
        xpath_literal(option)
    ))
}

pub fn checkbox_query() -> Selector {
    Selector::XPath(".//*[@role='checkbox']".to_string())
}

pub fn date_input_query() -> Selector {
    Selector::XPath(".//input[@type='date']".to_string())
}

pub fn clock_input_query(aria_label: &str) -> Selector {
    Selector::XPath(format!(
        ".//input[@type='text' and @aria-label={}]",
        xpath_literal(aria_label)
    ))
}

pub fn button_query(text: &str) -> Selector {
    Selector::XPath(format!(
        "//div[@role='button' and .//span[text()={}]]",
        xpath_literal(text)
    ))
}

pub fn reply_email_query(layout: &FormLayout) -> Selector {
    Selector::XPath(format!(
        "//div[@role='checkbox' and contains(@aria-label, {})]",
        xpath_literal(&layout.reply_email_label)
    ))
}

pub fn section_query(layout: &FormLayout) -> Selector {
    Selector::XPath(layout.section_xpath.clone())
}

pub fn overlay_query(layout: &FormLayout) -> Selector {
    Selector::Css(format!(".{}", layout.overlay_class))
}

/// The three inputs of a composite date+hour+minute question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateTimeInputs {
    pub date: ElementRef,
    pub hour: ElementRef,
    pub minute: ElementRef,
}

#[derive(Debug, Clone)]
pub struct Locator {
    layout: FormLayout,
    presence_timeout: Duration,
    poll_interval: Duration,
}

impl Locator {
    pub fn new(layout: FormLayout, timeouts: &TimeoutSettings) -> Self {
        Self {
            layout,
            presence_timeout: timeouts.presence(),
            poll_interval: timeouts.poll_interval(),
        }
    }

    pub fn layout(&self) -> &FormLayout {
        &self.layout
    }

    pub fn presence_timeout(&self) -> Duration {
        self.presence_timeout
    }

    /// Poll until `selector` matches under `scope`, returning the first match.
    ///
    /// Transport errors end the wait immediately; only "nothing matched yet"
    /// keeps polling.
    pub async fn wait_for_in(
        &self,
        transport: &dyn Transport,
        scope: Option<&ElementRef>,
        selector: &Selector,
        what: &str,
        timeout: Duration,
    ) -> Result<ElementRef, EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            let found = transport.find_elements(scope, selector).await?;
            if let Some(first) = found.into_iter().next() {
                return Ok(first);
            }
            if Instant::now() >= deadline {
                return Err(EngineError::ElementNotFound {
                    label: what.to_string(),
                    waited: timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn wait_for(
        &self,
        transport: &dyn Transport,
        selector: &Selector,
        what: &str,
        timeout: Duration,
    ) -> Result<ElementRef, EngineError> {
        self.wait_for_in(transport, None, selector, what, timeout)
            .await
    }

    /// Single immediate lookup under `scope`; no waiting.
    pub async fn find_within(
        &self,
        transport: &dyn Transport,
        scope: &ElementRef,
        selector: &Selector,
        what: &str,
    ) -> Result<ElementRef, EngineError> {
        transport
            .find_elements(Some(scope), selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::ElementNotFound {
                label: what.to_string(),
                waited: Duration::ZERO,
            })
    }

    /// Wait for the question title to be shown.
    pub async fn wait_for_label(
        &self,
        transport: &dyn Transport,
        label: &str,
    ) -> Result<ElementRef, EngineError> {
        self.wait_for(
            transport,
            &label_span_query(label),
            label,
            self.presence_timeout,
        )
        .await
    }

    /// The container wrapping the whole question titled `label`.
    pub async fn question_container(
        &self,
        transport: &dyn Transport,
        label_query: &Selector,
        label: &str,
    ) -> Result<ElementRef, EngineError> {
        let title = self
            .wait_for(transport, label_query, label, self.presence_timeout)
            .await?;
        self.find_within(transport, &title, &container_query(&self.layout), label)
            .await
    }

    /// Resolve `label` to the element a caller interacts with for `kind`.
    ///
    /// Text kinds yield the input itself, a dropdown yields its listbox, and
    /// the grouped kinds yield the question container.
    pub async fn find_by_label(
        &self,
        transport: &dyn Transport,
        label: &str,
        kind: ControlKind,
    ) -> Result<ElementRef, EngineError> {
        match kind {
            ControlKind::Text => {
                self.wait_for(
                    transport,
                    &text_input_query(&self.layout, label),
                    label,
                    self.presence_timeout,
                )
                .await
            }
            ControlKind::MultiLineText => {
                self.wait_for(
                    transport,
                    &textarea_query(&self.layout, label),
                    label,
                    self.presence_timeout,
                )
                .await
            }
            ControlKind::Dropdown => {
                let container = self
                    .question_container(transport, &label_span_query(label), label)
                    .await?;
                self.find_within(transport, &container, &listbox_query(), label)
                    .await
            }
            ControlKind::RadioGroup => {
                self.question_container(transport, &any_label_query(label), label)
                    .await
            }
            ControlKind::CheckboxGroup => {
                self.question_container(transport, &label_block_query(&self.layout, label), label)
                    .await
            }
            ControlKind::DateTime => {
                self.question_container(transport, &label_span_query(label), label)
                    .await
            }
        }
    }

    /// Every checkbox in the group titled `label`.
    pub async fn find_group(
        &self,
        transport: &dyn Transport,
        label: &str,
    ) -> Result<Vec<ElementRef>, EngineError> {
        let container = self
            .find_by_label(transport, label, ControlKind::CheckboxGroup)
            .await?;
        Ok(transport
            .find_elements(Some(&container), &checkbox_query())
            .await?)
    }

    pub async fn find_datetime(
        &self,
        transport: &dyn Transport,
        label: &str,
    ) -> Result<DateTimeInputs, EngineError> {
        let container = self
            .find_by_label(transport, label, ControlKind::DateTime)
            .await?;
        let date = self
            .find_within(transport, &container, &date_input_query(), label)
            .await?;
        let hour = self
            .find_within(
                transport,
                &container,
                &clock_input_query(&self.layout.hour_label),
                label,
            )
            .await?;
        let minute = self
            .find_within(
                transport,
                &container,
                &clock_input_query(&self.layout.minute_label),
                label,
            )
            .await?;
        Ok(DateTimeInputs { date, hour, minute })
    }

    /// The element whose identity marks the current form section.
    pub async fn section_marker(
        &self,
        transport: &dyn Transport,
    ) -> Result<ElementRef, EngineError> {
        transport
            .find_elements(None, &section_query(&self.layout))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::ElementNotFound {
                label: "form section".to_string(),
                waited: Duration::ZERO,
            })
    }

    pub async fn find_button(
        &self,
        transport: &dyn Transport,
        text: &str,
    ) -> Result<ElementRef, EngineError> {
        self.wait_for(transport, &button_query(text), text, self.presence_timeout)
            .await
    }

    pub async fn find_reply_email(
        &self,
        transport: &dyn Transport,
    ) -> Result<ElementRef, EngineError> {
        self.wait_for(
            transport,
            &reply_email_query(&self.layout),
            &self.layout.reply_email_label,
            self.presence_timeout,
        )
        .await
    }

    /// Wait until no loading overlay is displayed.
    pub async fn wait_overlay_gone(
        &self,
        transport: &dyn Transport,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        let selector = overlay_query(&self.layout);
        let deadline = Instant::now() + timeout;
        loop {
            let mut visible = false;
            for overlay in transport.find_elements(None, &selector).await? {
                if transport.is_displayed(&overlay).await? {
                    visible = true;
                    break;
                }
            }
            if !visible {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(EngineError::Interaction(format!(
                    "loading overlay still visible after {timeout:?}"
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xpath_literal_quoting() {
        assert_eq!(xpath_literal("イベント名"), "'イベント名'");
        assert_eq!(xpath_literal("it's"), "\"it's\"");
        assert_eq!(
            xpath_literal("a'b\"c"),
            "concat('a', \"'\", 'b\"c')"
        );
    }

    #[test]
    fn test_text_input_query_walks_from_label() {
        let layout = FormLayout::default();
        let Selector::XPath(q) = text_input_query(&layout, "イベント名") else {
            panic!("expected xpath");
        };
        assert_eq!(
            q,
            "//span[contains(text(), 'イベント名')]/ancestor::div[contains(@class, 'HoXoMd')]/following::input[@type='text'][1]"
        );
    }

    #[test]
    fn test_overlay_is_css_class() {
        let layout = FormLayout::default();
        assert_eq!(overlay_query(&layout), Selector::Css(".ThHDze".to_string()));
    }
}
