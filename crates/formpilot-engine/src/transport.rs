use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Opaque reference to a live remote element.
///
/// Two refs are equal when they point at the same remote node, which is how a
/// section transition is detected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(String);

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    XPath(String),
    Css(String),
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::XPath(q) => write!(f, "xpath:{q}"),
            Selector::Css(q) => write!(f, "css:{q}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptArg {
    Value(Value),
    Element(ElementRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The connection to the driver or browser is gone.
    Disconnected,
    NoSuchElement,
    StaleElement,
    Timeout,
    Script,
    SessionNotCreated,
    Other,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The narrow automation-protocol surface the engine drives.
///
/// Every call blocks until the remote side answers; there is no
/// fire-and-forget. Methods take `&self` so a retried operation can borrow the
/// transport on each attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), TransportError>;

    /// Find matching elements under `scope`, or in the whole document.
    /// An empty result is not an error.
    async fn find_elements(
        &self,
        scope: Option<&ElementRef>,
        selector: &Selector,
    ) -> Result<Vec<ElementRef>, TransportError>;

    async fn execute_script(
        &self,
        script: &str,
        args: Vec<ScriptArg>,
    ) -> Result<Value, TransportError>;

    async fn click(&self, element: &ElementRef) -> Result<(), TransportError>;

    async fn clear(&self, element: &ElementRef) -> Result<(), TransportError>;

    async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), TransportError>;

    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, TransportError>;

    async fn text(&self, element: &ElementRef) -> Result<String, TransportError>;

    async fn is_displayed(&self, element: &ElementRef) -> Result<bool, TransportError>;

    /// End the automation session.
    async fn close(&self) -> Result<(), TransportError>;

    /// Keep the remote session alive after this transport is dropped.
    async fn persist(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn scroll_into_view(&self, element: &ElementRef) -> Result<(), TransportError> {
        self.execute_script(
            "arguments[0].scrollIntoView({block: 'center'});",
            vec![ScriptArg::Element(element.clone())],
        )
        .await
        .map(|_| ())
    }
}
