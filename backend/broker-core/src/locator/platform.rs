/// Platform strategy table for binary discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

/// Binary names and relative search directories for one platform.
///
/// Directories are `/`-separated and relative to the executable directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformLayout {
    pub broker_binary: &'static str,
    pub host_binary: &'static str,
    pub search_colocated: bool,
    pub embedded_dir: &'static str,
    pub packaged_dir: &'static str,
}

const WINDOWS: PlatformLayout = PlatformLayout {
    broker_binary: "R.Host.Broker.exe",
    host_binary: "R.Host.exe",
    search_colocated: true,
    embedded_dir: "../../Host/Windows",
    packaged_dir: "runtime/win-x64",
};

const MACOS: PlatformLayout = PlatformLayout {
    broker_binary: "R.Host.Broker",
    host_binary: "R.Host",
    search_colocated: false,
    embedded_dir: "../../Host/Mac",
    packaged_dir: "runtime/osx-x64",
};

const LINUX: PlatformLayout = PlatformLayout {
    broker_binary: "R.Host.Broker",
    host_binary: "R.Host",
    search_colocated: false,
    embedded_dir: "../../Host/Linux",
    packaged_dir: "runtime/linux-x64",
};

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    pub fn layout(&self) -> &'static PlatformLayout {
        match self {
            Platform::Windows => &WINDOWS,
            Platform::MacOs => &MACOS,
            Platform::Linux => &LINUX,
        }
    }
}
