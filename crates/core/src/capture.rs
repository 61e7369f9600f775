//! Screenshot capture
//!
//! Browser captures drive Playwright through a generated Node script, one
//! process per attempt. Custom shots are read from disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use shotcheck_common::{Browser, ShotConfig, ShotItem, ShotMode, Timeouts, Viewport};

use crate::error::CaptureError;
use crate::source::file_url_path;

/// Produces the encoded current image of a shot
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    async fn capture(&self, item: &ShotItem) -> Result<Vec<u8>, CaptureError>;
}

const DEFAULT_VIEWPORT: Viewport = Viewport {
    width: 1280,
    height: Some(720),
};

/// Failure line printed by the capture script on stderr
#[derive(Debug, Deserialize)]
struct ScriptFailure {
    kind: String,
    stage: String,
    error: String,
}

/// Headless browser capture through Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightCapture {
    browser: Browser,
    timeouts: Timeouts,
    wait_for_first_request: u64,
    wait_for_last_request: u64,
    node: PathBuf,
}

impl PlaywrightCapture {
    pub fn from_config(config: &ShotConfig) -> Self {
        Self {
            browser: config.browser,
            timeouts: config.timeouts.clone(),
            wait_for_first_request: config.wait_for_first_request,
            wait_for_last_request: config.wait_for_last_request,
            node: PathBuf::from("node"),
        }
    }

    /// Use a specific node executable
    pub fn with_node(mut self, node: impl Into<PathBuf>) -> Self {
        self.node = node.into();
        self
    }

    /// Build the Playwright script that captures `item` into `output`
    pub fn build_script(&self, item: &ShotItem, output: &Path) -> String {
        let viewport = item.viewport.unwrap_or(DEFAULT_VIEWPORT);
        let height = viewport.height.or(DEFAULT_VIEWPORT.height).unwrap_or(720);
        let masks = item
            .mask_selectors()
            .iter()
            .map(|s| format!("page.locator({})", js_string(s)))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            r#"
const {{ chromium, firefox, webkit }} = require('playwright');

(async () => {{
  const browser = await {browser}.launch({{ headless: true }});
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }}
  }});
  const page = await context.newPage();
  let stage = 'launch';
  let inflight = 0;
  let lastActivity = Date.now();
  page.on('request', () => {{ inflight++; lastActivity = Date.now(); }});
  page.on('requestfinished', () => {{ inflight--; lastActivity = Date.now(); }});
  page.on('requestfailed', () => {{ inflight--; lastActivity = Date.now(); }});

  try {{
    stage = 'navigation';
    await page.goto({url}, {{ timeout: {load_state} }});

    stage = 'load_state';
    await page.waitForLoadState('load', {{ timeout: {load_state} }});

    stage = 'network_requests';
    await page.waitForTimeout({first_request});
    const deadline = Date.now() + {network_requests};
    while (inflight > 0 || Date.now() - lastActivity < {last_request}) {{
      if (Date.now() > deadline) {{
        const err = new Error('network requests did not settle');
        err.name = 'TimeoutError';
        throw err;
      }}
      await page.waitForTimeout(50);
    }}

    stage = 'screenshot';
    await page.waitForTimeout({wait});
    await page.screenshot({{ path: {output}, fullPage: true, animations: 'disabled', mask: [{masks}] }});
    console.log(JSON.stringify({{ success: true }}));
  }} catch (error) {{
    const kind = error.name === 'TimeoutError'
      ? 'timeout'
      : (/net::|NS_ERROR|ERR_/.test(error.message) ? 'navigation' : 'unknown');
    console.error(JSON.stringify({{ kind, stage, error: error.message }}));
    process.exitCode = 1;
  }} finally {{
    await browser.close();
  }}
}})();
"#,
            browser = self.browser.as_str(),
            width = viewport.width,
            height = height,
            url = js_string(&item.url),
            load_state = self.timeouts.load_state,
            first_request = self.wait_for_first_request,
            network_requests = self.timeouts.network_requests,
            last_request = self.wait_for_last_request,
            wait = item.wait_before_screenshot.unwrap_or(0),
            output = js_string(&output.to_string_lossy()),
            masks = masks,
        )
    }

    fn stage_timeout(&self, stage: &str) -> Duration {
        match stage {
            "network_requests" => self.timeouts.network_requests(),
            _ => self.timeouts.load_state(),
        }
    }

    /// Map the script's stderr to a capture error
    fn failure(&self, stderr: &str) -> CaptureError {
        let parsed = stderr
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str::<ScriptFailure>(line.trim()).ok());

        match parsed {
            Some(f) if f.kind == "timeout" => CaptureError::Timeout {
                after: self.stage_timeout(&f.stage),
                stage: f.stage,
            },
            Some(f) if f.kind == "navigation" => CaptureError::Navigation(f.error),
            Some(f) => CaptureError::Other(format!("{} failed: {}", f.stage, f.error)),
            None => CaptureError::Other(format!("capture script failed: {}", stderr.trim())),
        }
    }
}

#[async_trait]
impl CaptureEngine for PlaywrightCapture {
    async fn capture(&self, item: &ShotItem) -> Result<Vec<u8>, CaptureError> {
        let io_err = |e: std::io::Error| CaptureError::Other(e.to_string());

        let temp_dir = tempfile::tempdir().map_err(io_err)?;
        let script_path = temp_dir.path().join("capture.js");
        let output_path = temp_dir.path().join("shot.png");
        tokio::fs::write(&script_path, self.build_script(item, &output_path))
            .await
            .map_err(io_err)?;

        debug!("Capturing {} with {}", item.shot_name, self.browser.as_str());

        let output = Command::new(&self.node)
            .arg(&script_path)
            .current_dir(temp_dir.path())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CaptureError::Other(format!("cannot run {}: {}", self.node.display(), e)))?;

        if !output.status.success() {
            return Err(self.failure(&String::from_utf8_lossy(&output.stderr)));
        }

        tokio::fs::read(&output_path).await.map_err(io_err)
    }
}

/// Reads pre-captured images named by the item's url
#[derive(Debug, Clone, Default)]
pub struct FileCapture;

impl FileCapture {
    fn source_path(item: &ShotItem) -> PathBuf {
        file_url_path(&item.url)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(&item.url))
    }
}

#[async_trait]
impl CaptureEngine for FileCapture {
    async fn capture(&self, item: &ShotItem) -> Result<Vec<u8>, CaptureError> {
        let path = Self::source_path(item);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CaptureError::Other(
                format!("Missing current image: {}", path.display()),
            )),
            Err(e) => Err(CaptureError::Other(format!("{}: {}", path.display(), e))),
        }
    }
}

/// Dispatches to the browser or to files by shot mode
pub struct ModeCapture {
    browser: Arc<dyn CaptureEngine>,
    files: FileCapture,
}

impl ModeCapture {
    pub fn new(browser: Arc<dyn CaptureEngine>) -> Self {
        Self {
            browser,
            files: FileCapture,
        }
    }

    pub fn from_config(config: &ShotConfig) -> Self {
        Self::new(Arc::new(PlaywrightCapture::from_config(config)))
    }
}

#[async_trait]
impl CaptureEngine for ModeCapture {
    async fn capture(&self, item: &ShotItem) -> Result<Vec<u8>, CaptureError> {
        match item.shot_mode {
            ShotMode::Custom => self.files.capture(item).await,
            _ => self.browser.capture(item).await,
        }
    }
}

/// JavaScript string literal
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "''".to_string())
}
