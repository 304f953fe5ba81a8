use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// chromedriver's own default port.
pub const DEFAULT_DRIVER_PORT: u16 = 9515;

/// Common paths where chromedriver might be installed
const CHROMEDRIVER_PATHS: &[&str] = &[
    "/usr/bin/chromedriver",
    "/usr/local/bin/chromedriver",
    "/usr/lib/chromium/chromedriver",
    "/usr/lib/chromium-browser/chromedriver",
    "/snap/bin/chromium.chromedriver",
    "/opt/homebrew/bin/chromedriver",
];

/// Detect if we're in a headless environment (no display server)
pub fn is_headless_environment() -> bool {
    cfg!(target_os = "linux")
        && std::env::var("DISPLAY").is_err()
        && std::env::var("WAYLAND_DISPLAY").is_err()
}

/// Find chromedriver on the system
pub fn find_chromedriver_binary() -> Option<String> {
    if let Ok(output) = Command::new("which").arg("chromedriver").output()
        && output.status.success()
        && let Ok(path) = String::from_utf8(output.stdout)
    {
        let path = path.trim();
        if !path.is_empty() {
            return Some(path.to_string());
        }
    }

    CHROMEDRIVER_PATHS
        .iter()
        .find(|path| std::path::Path::new(path).exists())
        .map(|path| path.to_string())
}

/// Handle to a running chromedriver; the process is killed on drop.
pub struct DriverProcess {
    child: Child,
    port: u16,
}

impl DriverProcess {
    pub fn webdriver_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        info!("Shutting down chromedriver...");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Launch chromedriver on `port` and wait until `/status` answers.
pub async fn launch_chromedriver(port: u16) -> Result<DriverProcess, String> {
    let binary = find_chromedriver_binary().ok_or_else(|| {
        "chromedriver not found. Install it or pass --webdriver-url for a running driver"
            .to_string()
    })?;

    info!("Launching chromedriver from: {}", binary);
    let child = Command::new(&binary)
        .arg(format!("--port={}", port))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("Failed to launch chromedriver: {}", e))?;
    info!("chromedriver launched with PID: {}", child.id());

    // Owned from here on, so every early return kills it.
    let process = DriverProcess { child, port };
    let url = format!("{}/status", process.webdriver_url());
    let client = reqwest::Client::new();

    for attempt in 1..=30 {
        sleep(Duration::from_millis(200)).await;

        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("chromedriver ready after {} attempts", attempt);
                return Ok(process);
            }
            Ok(_) => {
                warn!(
                    "chromedriver responded but not ready yet (attempt {})",
                    attempt
                );
            }
            Err(_) => {
                if attempt % 5 == 0 {
                    info!("Waiting for chromedriver... (attempt {})", attempt);
                }
            }
        }
    }

    Err("chromedriver did not become ready within timeout".to_string())
}
