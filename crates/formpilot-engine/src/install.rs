use std::path::{Path, PathBuf};

const BROWSER_DIR: &str = "chrome-linux64";
const DRIVER_DIR: &str = "chromedriver-linux64";

/// Where the tool's private browser and driver live.
///
/// Orphan cleanup is scoped to these two directories so a normally installed
/// browser is never touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn browser_dir(&self) -> PathBuf {
        self.root.join(BROWSER_DIR)
    }

    pub fn driver_dir(&self) -> PathBuf {
        self.root.join(DRIVER_DIR)
    }

    pub fn browser_executable(&self) -> PathBuf {
        self.browser_dir().join("chrome")
    }

    pub fn driver_executable(&self) -> PathBuf {
        self.driver_dir().join("chromedriver")
    }

    pub fn owned_roots(&self) -> [PathBuf; 2] {
        [self.browser_dir(), self.driver_dir()]
    }

    /// Whether `executable` sits under the private browser or driver directory.
    pub fn owns(&self, executable: &Path) -> bool {
        self.owned_roots()
            .iter()
            .any(|root| executable.starts_with(root))
    }

    pub fn missing_binaries(&self) -> Vec<PathBuf> {
        [self.browser_executable(), self.driver_executable()]
            .into_iter()
            .filter(|p| !p.exists())
            .collect()
    }
}

/// Default data directory: `<local data dir>/formpilot`, or `./.formpilot`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("formpilot"))
        .unwrap_or_else(|| PathBuf::from(".formpilot"))
}
