use crate::webdriver::WebDriverTransport;
use async_trait::async_trait;
use formpilot_engine::process::{BrowserLaunch, Connector};
use formpilot_engine::transport::{Transport, TransportError, TransportErrorKind};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const READY_POLLS: u32 = 30;
const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Deserialize)]
struct StatusReply {
    value: StatusValue,
}

#[derive(Debug, Deserialize)]
struct StatusValue {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    message: String,
}

/// Parse a `/status` body. Drivers that answer 2xx without a W3C body count
/// as ready.
fn status_ready(body: &str) -> bool {
    match serde_json::from_str::<StatusReply>(body) {
        Ok(reply) => {
            if !reply.value.ready {
                warn!("chromedriver not ready yet: {}", reply.value.message);
            }
            reply.value.ready
        }
        Err(_) => true,
    }
}

/// Poll `<endpoint>/status` until the driver says it is ready.
pub async fn wait_until_ready(endpoint: &str) -> Result<(), TransportError> {
    let url = format!("{}/status", endpoint.trim_end_matches('/'));
    let client = reqwest::Client::new();

    for attempt in 1..=READY_POLLS {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let body = resp.text().await.unwrap_or_default();
                if status_ready(&body) {
                    info!("chromedriver ready after {} attempts", attempt);
                    return Ok(());
                }
            }
            Ok(resp) => {
                warn!(
                    "chromedriver responded with {} (attempt {})",
                    resp.status(),
                    attempt
                );
            }
            Err(_) => {
                if attempt % 5 == 0 {
                    info!("Waiting for chromedriver... (attempt {})", attempt);
                }
            }
        }
        sleep(READY_POLL_INTERVAL).await;
    }

    Err(TransportError::new(
        TransportErrorKind::SessionNotCreated,
        format!("chromedriver at {} did not become ready within timeout", endpoint),
    ))
}

/// Session capabilities that make chromedriver start the private browser on
/// the private profile.
pub fn chrome_capabilities(browser: &BrowserLaunch) -> Map<String, Value> {
    let mut args = vec![
        format!("--user-data-dir={}", browser.profile_dir.display()),
        format!("--profile-directory={}", browser.profile_name),
    ];
    args.extend(browser.args.iter().cloned());
    args.push("--log-level=3".to_string());
    if browser.headless {
        args.push("--headless=new".to_string());
    }

    let mut caps = Map::new();
    caps.insert("browserName".into(), json!("chrome"));
    caps.insert(
        "goog:chromeOptions".into(),
        json!({
            "binary": browser.browser_executable.display().to_string(),
            "args": args,
            "detach": browser.detach,
            "excludeSwitches": ["enable-logging"],
        }),
    );
    caps
}

/// Creates sessions against a chromedriver endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromeConnector;

impl ChromeConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for ChromeConnector {
    async fn connect(
        &self,
        endpoint: &str,
        browser: &BrowserLaunch,
    ) -> Result<Box<dyn Transport>, TransportError> {
        wait_until_ready(endpoint).await?;
        info!("Starting browser session via {}", endpoint);
        let transport = WebDriverTransport::connect(endpoint, chrome_capabilities(browser)).await?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn launch(headless: bool) -> BrowserLaunch {
        BrowserLaunch {
            browser_executable: PathBuf::from("/opt/formpilot/cft/chrome-linux64/chrome"),
            profile_dir: PathBuf::from("/opt/formpilot/profile"),
            profile_name: "Default".into(),
            args: vec!["--start-maximized".into(), "--disable-gpu".into()],
            detach: true,
            headless,
        }
    }

    #[test]
    fn test_chrome_capabilities() {
        let caps = chrome_capabilities(&launch(false));
        let options = &caps["goog:chromeOptions"];
        assert_eq!(options["binary"], "/opt/formpilot/cft/chrome-linux64/chrome");
        assert_eq!(options["detach"], true);
        assert_eq!(options["excludeSwitches"], json!(["enable-logging"]));

        let args: Vec<&str> = options["args"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(
            args,
            vec![
                "--user-data-dir=/opt/formpilot/profile",
                "--profile-directory=Default",
                "--start-maximized",
                "--disable-gpu",
                "--log-level=3",
            ]
        );
    }

    #[test]
    fn test_headless_flag() {
        let caps = chrome_capabilities(&launch(true));
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(args.contains(&json!("--headless=new")));
    }

    #[test]
    fn test_status_ready() {
        assert!(status_ready(r#"{"value":{"ready":true,"message":"ok"}}"#));
        assert!(!status_ready(r#"{"value":{"ready":false,"message":"busy"}}"#));
        assert!(status_ready("not json"));
    }
}
