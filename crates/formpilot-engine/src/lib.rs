pub mod config;
pub mod driver;
pub mod error;
pub mod install;
pub mod locator;
pub mod logging;
pub mod normalizer;
pub mod process;
pub mod recovery;
pub mod retry;
pub mod schema;
pub mod session;
pub mod transport;

pub use config::{ConfigError, ConfigLoader, EventConfig};
pub use driver::{FormDriver, FormFillTask};
pub use error::{EngineError, ErrorClass, LaunchError, LaunchFailure};
pub use logging::{LogLevel, LogSink, Reporter};
pub use recovery::{RecoveryController, Task, TaskOutcome};
pub use retry::{RetryExecutor, RetryPolicy};
pub use session::{Session, SessionManager, SessionSettings, SessionState};
