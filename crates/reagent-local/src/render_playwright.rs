use rand::Rng;
use reagent_core::{Error, RenderRequest, RenderedPage, Renderer, Result};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

fn env_truthy(k: &str) -> bool {
    matches!(
        std::env::var(k)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_u64(k: &str) -> Option<u64> {
    std::env::var(k).ok().and_then(|s| s.trim().parse::<u64>().ok())
}

fn node_path_candidates() -> Vec<String> {
    // Best-effort Node global module roots across common setups.
    let mut out: Vec<String> = Vec::new();

    if let Some(home) = std::env::var_os("HOME").map(std::path::PathBuf::from) {
        out.push(
            home.join(".npm-global")
                .join("lib")
                .join("node_modules")
                .to_string_lossy()
                .to_string(),
        );
    }
    out.push("/opt/homebrew/lib/node_modules".to_string());
    out.push("/usr/local/lib/node_modules".to_string());
    out.push("/usr/lib/node_modules".to_string());
    out
}

fn detect_node_path_for_playwright() -> Option<String> {
    fn node_path_has_playwright(np: &str) -> bool {
        np.split(':')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .any(|p| std::path::PathBuf::from(p).join("playwright").is_dir())
    }

    fn npm_root_g() -> Option<String> {
        let out = std::process::Command::new("npm")
            .args(["root", "-g"])
            .output()
            .ok()?;
        if !out.status.success() {
            return None;
        }
        let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if s.is_empty() {
            return None;
        }
        std::path::PathBuf::from(&s)
            .join("playwright")
            .is_dir()
            .then_some(s)
    }

    if let Ok(v) = std::env::var("REAGENT_NODE_PATH") {
        let v = v.trim();
        if !v.is_empty() {
            return Some(v.to_string());
        }
    }

    let existing = std::env::var("NODE_PATH").ok().unwrap_or_default();
    if node_path_has_playwright(&existing) {
        return None;
    }

    let found = npm_root_g().or_else(|| {
        node_path_candidates()
            .into_iter()
            .find(|root| std::path::PathBuf::from(root).join("playwright").is_dir())
    })?;

    if existing.trim().is_empty() {
        Some(found)
    } else {
        Some(format!("{existing}:{found}"))
    }
}

fn sample_ms(range: (u64, u64)) -> u64 {
    let (lo, hi) = (range.0.min(range.1), range.0.max(range.1));
    if lo == hi {
        return lo;
    }
    rand::thread_rng().gen_range(lo..=hi)
}

// Expected setup: Node.js on PATH (or REAGENT_NODE), the `playwright` npm package
// resolvable by Node, and a Chromium build (`npx playwright install chromium`).
// stdout carries exactly one JSON object.
const JS: &str = r#"
const fs = require('fs');

function ok(obj) { process.stdout.write(JSON.stringify(obj)); }
function bad(code, message, hint) { ok({ ok: false, error: { code, message, hint } }); }
const sleep = (ms) => new Promise((resolve) => setTimeout(resolve, ms));

async function main() {
  let arg = '';
  try { arg = fs.readFileSync(0, 'utf8'); } catch (_) {}
  let req;
  try { req = JSON.parse(arg); } catch (e) { return bad('invalid_params', 'bad JSON args', 'Internal error: could not parse render args.'); }

  let pw;
  try { pw = require('playwright'); } catch (e) {
    return bad('not_configured',
      'Playwright is not installed for Node.js (require("playwright") failed)',
      'Install it with `npm i -g playwright` and then `npx playwright install chromium`.');
  }

  const url = String(req.url || '').trim();
  if (!url) return bad('invalid_params', 'url must be non-empty', 'Pass an absolute URL like https://example.com.');

  const timeoutMs = Number(req.timeout_ms || 15000);
  const headers = req.headers || {};
  const settleMs = Number(req.settle_ms || 0);
  const scrollMs = Number(req.scroll_ms || 0);

  const t0 = Date.now();
  let browser;
  try {
    browser = await pw.chromium.launch({ headless: true });
    const page = await browser.newPage();
    await page.setExtraHTTPHeaders(headers);

    const resp = await page.goto(url, { timeout: timeoutMs });
    if (settleMs > 0) await sleep(settleMs);
    await page.waitForLoadState('networkidle', { timeout: timeoutMs });

    await page.evaluate(() => window.scrollTo(0, document.body ? document.body.scrollHeight / 3 : 0));
    if (scrollMs > 0) await sleep(scrollMs);

    const html = await page.content();
    ok({ ok: true, final_url: page.url(), status: resp ? resp.status() : null, html, elapsed_ms: Date.now() - t0 });
  } catch (e) {
    bad('fetch_failed', String(e && e.message ? e.message : e), 'Playwright render failed.');
  } finally {
    try { if (browser) await browser.close(); } catch (_) {}
  }
}

main().catch((e) => bad('fetch_failed', String(e && e.message ? e.message : e), 'Playwright render failed.'));
"#;

/// One headless-browser session: the Node process that owns the Chromium instance.
///
/// The process is killed when the session is dropped, so an early return or a panic between
/// launch and [`BrowserSession::finish`] cannot leak a browser.
pub struct BrowserSession {
    child: Option<tokio::process::Child>,
}

impl BrowserSession {
    pub async fn launch(node_bin: &str, args_json: &str) -> Result<Self> {
        let mut cmd = tokio::process::Command::new(node_bin);
        if let Some(node_path) = detect_node_path_for_playwright() {
            cmd.env("NODE_PATH", node_path);
        }
        let mut child = cmd
            .arg("-e")
            .arg(JS)
            .kill_on_drop(true)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::NotConfigured(format!(
                    "Playwright render requires Node.js (`{node_bin}`) and the Playwright npm package: {e}"
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // If this fails the script reports bad JSON args, which surfaces as an error below.
            let _ = stdin.write_all(args_json.as_bytes()).await;
            let _ = stdin.shutdown().await;
        }
        tracing::debug!(pid = ?child.id(), "browser session acquired");
        Ok(Self { child: Some(child) })
    }

    /// Waits for the session to finish (bounded by `hard_timeout`) and releases it.
    pub async fn finish(mut self, hard_timeout: Duration) -> Result<std::process::Output> {
        let Some(child) = self.child.as_mut() else {
            return Err(Error::Render("browser session already released".to_string()));
        };

        // `wait_with_output` consumes the child, which prevents killing it on timeout.
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Render("missing stdout pipe".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Render("missing stderr pipe".to_string()))?;

        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = tokio::io::AsyncReadExt::read_to_end(&mut stdout, &mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = tokio::io::AsyncReadExt::read_to_end(&mut stderr, &mut buf).await;
            buf
        });

        let status = match tokio::time::timeout(hard_timeout, child.wait()).await {
            Ok(r) => r.map_err(|e| Error::Render(format!("browser process wait failed: {e}")))?,
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                self.child = None;
                tracing::debug!("browser session released after hard timeout");
                return Err(Error::Render(format!(
                    "Playwright render hard timeout after {}ms",
                    hard_timeout.as_millis()
                )));
            }
        };
        self.child = None;
        tracing::debug!(?status, "browser session released");

        Ok(std::process::Output {
            status,
            stdout: stdout_task.await.unwrap_or_default(),
            stderr: stderr_task.await.unwrap_or_default(),
        })
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
            tracing::debug!("browser session released on drop");
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlaywrightRenderer {
    node_bin: String,
    disabled: bool,
    hard_timeout_ms: Option<u64>,
    max_html_chars: usize,
}

impl Default for PlaywrightRenderer {
    fn default() -> Self {
        Self {
            node_bin: "node".to_string(),
            disabled: false,
            hard_timeout_ms: None,
            max_html_chars: 2_000_000,
        }
    }
}

impl PlaywrightRenderer {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            node_bin: std::env::var("REAGENT_NODE")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(d.node_bin),
            // Deterministic escape hatch (tests and “no local tooling” environments).
            disabled: env_truthy("REAGENT_RENDER_DISABLE"),
            hard_timeout_ms: env_u64("REAGENT_RENDER_HARD_TIMEOUT_MS"),
            max_html_chars: env_u64("REAGENT_RENDER_MAX_HTML_CHARS")
                .map(|n| n as usize)
                .unwrap_or(d.max_html_chars),
        }
    }

    pub fn with_node_bin(mut self, node_bin: impl Into<String>) -> Self {
        self.node_bin = node_bin.into();
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn node_bin(&self) -> &str {
        &self.node_bin
    }

    fn hard_timeout(&self, req: &RenderRequest) -> Duration {
        // Navigation + network idle each get `timeout_ms`, plus the sleeps and browser startup.
        let ms = self.hard_timeout_ms.unwrap_or_else(|| {
            req.timeout_ms
                .saturating_mul(2)
                .saturating_add(req.delays.max_total_ms())
                .saturating_add(10_000)
        });
        Duration::from_millis(ms)
    }

    fn args_json(req: &RenderRequest) -> String {
        serde_json::json!({
            "url": req.url,
            "timeout_ms": req.timeout_ms,
            "headers": req.headers,
            "settle_ms": sample_ms(req.delays.settle_ms),
            "scroll_ms": sample_ms(req.delays.scroll_ms),
        })
        .to_string()
    }

    fn parse_output(&self, url: &str, out: std::process::Output) -> Result<RenderedPage> {
        let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
        let v: serde_json::Value = serde_json::from_str(&stdout).map_err(|e| {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            if stderr.is_empty() {
                Error::Render(format!("Playwright render returned invalid JSON: {e}"))
            } else {
                Error::Render(format!(
                    "Playwright render returned invalid JSON: {e}. stderr: {stderr}"
                ))
            }
        })?;

        if v.get("ok").and_then(|x| x.as_bool()) != Some(true) {
            let code = v
                .pointer("/error/code")
                .and_then(|x| x.as_str())
                .unwrap_or("fetch_failed");
            let message = v
                .pointer("/error/message")
                .and_then(|x| x.as_str())
                .unwrap_or("Playwright render failed");
            let hint = v
                .pointer("/error/hint")
                .and_then(|x| x.as_str())
                .unwrap_or("")
                .trim();
            let message = if hint.is_empty() {
                message.to_string()
            } else {
                format!("{message}. {hint}")
            };
            return Err(match code {
                "not_configured" => Error::NotConfigured(message),
                "invalid_params" => Error::InvalidUrl(message),
                _ => Error::Render(message),
            });
        }

        let html = v
            .get("html")
            .and_then(|x| x.as_str())
            .unwrap_or("")
            .to_string();
        if html.trim().is_empty() {
            return Err(Error::Render(
                "Playwright render returned empty HTML".to_string(),
            ));
        }
        if html.len() > self.max_html_chars {
            return Err(Error::Render(format!(
                "Playwright render HTML too large ({} chars > {})",
                html.len(),
                self.max_html_chars
            )));
        }

        Ok(RenderedPage {
            final_url: v
                .get("final_url")
                .and_then(|x| x.as_str())
                .unwrap_or(url)
                .to_string(),
            status: v.get("status").and_then(|x| x.as_u64()).map(|n| n as u16),
            html,
            elapsed_ms: v.get("elapsed_ms").and_then(|x| x.as_u64()).unwrap_or(0),
        })
    }
}

#[async_trait::async_trait]
impl Renderer for PlaywrightRenderer {
    fn name(&self) -> &'static str {
        "playwright"
    }

    async fn render(&self, req: &RenderRequest) -> Result<RenderedPage> {
        if self.disabled {
            return Err(Error::NotConfigured(
                "render backend disabled (REAGENT_RENDER_DISABLE)".to_string(),
            ));
        }
        let args_json = Self::args_json(req);
        let hard_timeout = self.hard_timeout(req);

        let session = BrowserSession::launch(&self.node_bin, &args_json).await?;
        let out = session.finish(hard_timeout).await?;
        self.parse_output(&req.url, out)
    }
}
