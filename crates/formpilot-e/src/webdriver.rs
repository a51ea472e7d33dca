use async_trait::async_trait;
use fantoccini::elements::{Element, ElementRef as RemoteRef};
use fantoccini::error::{CmdError, ErrorStatus};
use fantoccini::{Client, ClientBuilder, Locator};
use formpilot_engine::transport::{
    ElementRef, ScriptArg, Selector, Transport, TransportError, TransportErrorKind,
};
use serde_json::{Map, Value, json};

/// W3C key under which an element reference travels in script arguments.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// [`Transport`] over a fantoccini WebDriver client.
///
/// Elements are addressed by their WebDriver element id, so an [`ElementRef`]
/// stays valid for as long as the remote node does.
pub struct WebDriverTransport {
    client: Client,
}

impl WebDriverTransport {
    pub async fn connect(
        url: &str,
        capabilities: Map<String, Value>,
    ) -> Result<Self, TransportError> {
        let client = ClientBuilder::native()
            .capabilities(capabilities)
            .connect(url)
            .await
            .map_err(|e| {
                TransportError::new(
                    TransportErrorKind::SessionNotCreated,
                    format!("Failed to connect to WebDriver at {}: {}", url, e),
                )
            })?;
        Ok(Self { client })
    }

    fn element(&self, element: &ElementRef) -> Element {
        Element::from_element_id(self.client.clone(), RemoteRef::from(element.id().to_string()))
    }
}

fn locator(selector: &Selector) -> Locator<'_> {
    match selector {
        Selector::XPath(query) => Locator::XPath(query.as_str()),
        Selector::Css(query) => Locator::Css(query.as_str()),
    }
}

fn element_ref(element: &Element) -> ElementRef {
    ElementRef::new(element.element_id().to_string())
}

fn script_arg(arg: ScriptArg) -> Value {
    match arg {
        ScriptArg::Value(value) => value,
        ScriptArg::Element(element) => json!({ ELEMENT_KEY: element.id() }),
    }
}

/// Sort a WebDriver failure into the engine's error kinds.
///
/// A dropped connection and a dead window or session become `Disconnected`,
/// which the engine treats as session loss whatever the message says.
pub fn map_cmd_error(err: CmdError) -> TransportError {
    let kind = match &err {
        CmdError::Lost(_) => TransportErrorKind::Disconnected,
        CmdError::WaitTimeout => TransportErrorKind::Timeout,
        CmdError::Standard(wd) => match &wd.error {
            ErrorStatus::NoSuchElement => TransportErrorKind::NoSuchElement,
            ErrorStatus::StaleElementReference => TransportErrorKind::StaleElement,
            ErrorStatus::Timeout | ErrorStatus::ScriptTimeout => TransportErrorKind::Timeout,
            ErrorStatus::JavascriptError => TransportErrorKind::Script,
            ErrorStatus::NoSuchWindow | ErrorStatus::InvalidSessionId => {
                TransportErrorKind::Disconnected
            }
            ErrorStatus::SessionNotCreated => TransportErrorKind::SessionNotCreated,
            _ => TransportErrorKind::Other,
        },
        _ => TransportErrorKind::Other,
    };
    TransportError::new(kind, err.to_string())
}

#[async_trait]
impl Transport for WebDriverTransport {
    async fn navigate(&self, url: &str) -> Result<(), TransportError> {
        tracing::info!("Navigating to: {}", url);
        self.client.goto(url).await.map_err(map_cmd_error)
    }

    async fn find_elements(
        &self,
        scope: Option<&ElementRef>,
        selector: &Selector,
    ) -> Result<Vec<ElementRef>, TransportError> {
        let found = match scope {
            Some(parent) => self.element(parent).find_all(locator(selector)).await,
            None => self.client.find_all(locator(selector)).await,
        };
        match found {
            Ok(elements) => Ok(elements.iter().map(element_ref).collect()),
            // Some drivers answer an empty match with an error instead of [].
            Err(err) if err.is_no_such_element() => Ok(Vec::new()),
            Err(err) => Err(map_cmd_error(err)),
        }
    }

    async fn execute_script(
        &self,
        script: &str,
        args: Vec<ScriptArg>,
    ) -> Result<Value, TransportError> {
        let args = args.into_iter().map(script_arg).collect();
        self.client.execute(script, args).await.map_err(map_cmd_error)
    }

    async fn click(&self, element: &ElementRef) -> Result<(), TransportError> {
        self.element(element).click().await.map_err(map_cmd_error)
    }

    async fn clear(&self, element: &ElementRef) -> Result<(), TransportError> {
        self.element(element).clear().await.map_err(map_cmd_error)
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), TransportError> {
        self.element(element)
            .send_keys(text)
            .await
            .map_err(map_cmd_error)
    }

    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, TransportError> {
        self.element(element).attr(name).await.map_err(map_cmd_error)
    }

    async fn text(&self, element: &ElementRef) -> Result<String, TransportError> {
        self.element(element).text().await.map_err(map_cmd_error)
    }

    async fn is_displayed(&self, element: &ElementRef) -> Result<bool, TransportError> {
        self.element(element)
            .is_displayed()
            .await
            .map_err(map_cmd_error)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.client.clone().close().await.map_err(map_cmd_error)
    }

    // Without this, dropping the last client handle deletes the session and
    // the detached browser goes with it.
    async fn persist(&self) -> Result<(), TransportError> {
        self.client.persist().await.map_err(map_cmd_error)
    }
}
