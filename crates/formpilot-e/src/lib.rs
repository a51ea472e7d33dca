//! WebDriver-backed collaborators for the form engine: a chromedriver
//! connector, a fantoccini transport and OS process control.

pub mod chromedriver;
pub mod process;
pub mod webdriver;

pub use chromedriver::ChromeConnector;
pub use process::SystemProcessControl;
pub use webdriver::WebDriverTransport;
