use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use thirtyfour::common::config::WebDriverConfigBuilder;
use thirtyfour::extensions::cdp::ChromeDevTools;
use thirtyfour::extensions::query::ElementPollerNoWait;
use thirtyfour::ChromiumLikeCapabilities;

use crate::error::ResolveError;
use crate::resolve::dynamic::MediaSniffer;

/// Installed in every frame before page scripts run. Records resource,
/// fetch and XHR urls; child frames forward theirs to the top frame.
const REQUEST_HOOK_SCRIPT: &str = r#"
(() => {
    if (window.__vidhopHooked) return;
    window.__vidhopHooked = true;
    window.__vidhopRequests = window.__vidhopRequests || [];

    const record = (url) => {
        try {
            const absolute = new URL(String(url), location.href).href;
            if (window === window.top) {
                window.__vidhopRequests.push(absolute);
            } else {
                window.top.postMessage({ __vidhop: absolute }, "*");
            }
        } catch (e) {}
    };

    window.addEventListener("message", (event) => {
        if (event.data && typeof event.data.__vidhop === "string") record(event.data.__vidhop);
    });

    try {
        new PerformanceObserver((list) => list.getEntries().forEach((entry) => record(entry.name)))
            .observe({ type: "resource", buffered: true });
    } catch (e) {}

    const originalFetch = window.fetch;
    if (originalFetch) {
        window.fetch = function (input) {
            record(input && input.url ? input.url : input);
            return originalFetch.apply(this, arguments);
        };
    }

    const originalOpen = XMLHttpRequest.prototype.open;
    XMLHttpRequest.prototype.open = function (method, url) {
        record(url);
        return originalOpen.apply(this, arguments);
    };
})();
"#;

/// Returns and clears the recorded urls, plus the sources of video elements
/// in the top frame.
const DRAIN_SCRIPT: &str = r#"
const requests = window.__vidhopRequests || [];
window.__vidhopRequests = [];
const videos = Array.from(document.querySelectorAll("video, video source"))
    .map((element) => element.currentSrc || element.src)
    .filter((src) => src && !src.startsWith("blob:"));
return requests.concat(videos);
"#;

const NAVIGATOR_PATCH_SCRIPT: &str = r#"
Object.defineProperty(window, "navigator", {
    value: new Proxy(navigator, {
        has: (target, key) => (key === "webdriver" ? false : key in target),
        get: (target, key) =>
        key === "webdriver"
            ? false
            : typeof target[key] === "function"
            ? target[key].bind(target)
            : target[key],
    }),
});
"#;

struct Session {
    driver: thirtyfour::WebDriver,
    child: Child,
    user_agent: Option<String>,
}

/// Media sniffer backed by ChromeDriver. Chrome is started on first use.
pub struct ChromeSniffer {
    headless: bool,
    session: Option<Session>,
    launch_failed: bool,
}

impl ChromeSniffer {
    pub fn new(headless: bool) -> Self {
        Self {
            headless,
            session: None,
            launch_failed: false,
        }
    }

    async fn session(&mut self) -> Result<&mut Session, ResolveError> {
        if self.launch_failed {
            return Err(ResolveError::Browser("Chrome is not available".into()));
        }

        if self.session.is_none() {
            match launch(self.headless).await {
                Ok((driver, child)) => {
                    let user_agent = get_user_agent(&driver).await;
                    self.session = Some(Session {
                        driver,
                        child,
                        user_agent,
                    });
                }
                Err(err) => {
                    log::warn!("Failed to start Chrome: {:#}", err);
                    self.launch_failed = true;
                    return Err(ResolveError::Browser(format!("{err:#}")));
                }
            }
        }

        self.session
            .as_mut()
            .ok_or_else(|| ResolveError::Browser("Chrome session missing".into()))
    }

    pub async fn shutdown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        log::trace!("Stopping Chrome");

        if let Err(err) = session.driver.quit().await {
            log::debug!("Failed to quit ChromeDriver session: {}", err);
        }

        if let Err(err) = session.child.kill() {
            log::debug!("Failed to kill ChromeDriver: {}", err);
        }
    }
}

impl Drop for ChromeSniffer {
    fn drop(&mut self) {
        if let Some(session) = &mut self.session {
            let _ = session.child.kill();
        }
    }
}

impl MediaSniffer for ChromeSniffer {
    async fn open(&mut self, url: &str, referer: Option<&str>) -> Result<(), ResolveError> {
        let session = self.session().await?;
        let dev_tools = ChromeDevTools::new(session.driver.handle.clone());

        let headers = match referer {
            Some(referer) => serde_json::json!({ "Referer": referer }),
            None => serde_json::json!({}),
        };
        dev_tools
            .execute_cdp_with_params("Network.setExtraHTTPHeaders", serde_json::json!({ "headers": headers }))
            .await?;

        session.driver.goto(url).await?;
        Ok(())
    }

    async fn drain_requests(&mut self) -> Result<Vec<String>, ResolveError> {
        let session = self.session().await?;
        let result = session.driver.execute(DRAIN_SCRIPT, Vec::new()).await?;

        Ok(result
            .json()
            .as_array()
            .map(|urls| {
                urls.iter()
                    .filter_map(|url| url.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn reset(&mut self) -> Result<(), ResolveError> {
        if let Some(session) = self.session.as_mut() {
            session.driver.goto("about:blank").await?;
        }

        Ok(())
    }

    async fn user_agent(&mut self) -> Option<String> {
        self.session.as_ref().and_then(|session| session.user_agent.clone())
    }
}

async fn launch(headless: bool) -> Result<(thirtyfour::WebDriver, Child), anyhow::Error> {
    let chromedriver_path = get_chromedriver_path()
        .await
        .with_context(|| "failed to find or fetch ChromeDriver")?;

    let Some(port) = portpicker::pick_unused_port() else {
        anyhow::bail!("no free port found for ChromeDriver");
    };

    log::trace!("Starting ChromeDriver on port {}", port);

    let mut child_process = Command::new(chromedriver_path)
        .arg(format!("--port={}", port))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| "failed to start ChromeDriver")?;

    let mut caps = thirtyfour::DesiredCapabilities::chrome();
    caps.set_no_sandbox()?;
    caps.set_disable_dev_shm_usage()?;
    caps.add_arg("--disable-blink-features=AutomationControlled")?;
    caps.add_arg("window-size=1920,1080")?;
    caps.add_arg("disable-infobars")?;
    caps.add_arg("--autoplay-policy=no-user-gesture-required")?;
    caps.add_arg("--mute-audio")?;
    if headless {
        caps.add_arg("--headless=new")?;
    }
    caps.add_exclude_switch("enable-automation")?;

    let mut driver = None;

    for _ in 0..20 {
        match thirtyfour::WebDriver::new_with_config(
            &format!("http://localhost:{}", port),
            caps.clone(),
            WebDriverConfigBuilder::new()
                .poller(Arc::new(ElementPollerNoWait))
                .build(),
        )
        .await
        {
            Ok(d) => {
                driver = Some(d);
                break;
            }
            Err(err) => {
                log::debug!("Could not connect to ChromeDriver: {}", err);
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
    }

    let Some(driver) = driver else {
        let _ = child_process.kill();
        anyhow::bail!("failed to initialize ChromeDriver");
    };

    if let Err(err) = install_scripts(&driver).await {
        let _ = driver.quit().await;
        let _ = child_process.kill();
        return Err(err);
    }

    Ok((driver, child_process))
}

async fn install_scripts(driver: &thirtyfour::WebDriver) -> Result<(), anyhow::Error> {
    let dev_tools = ChromeDevTools::new(driver.handle.clone());

    // Remove window.cdc_... properties
    dev_tools
        .execute_cdp_with_params(
            "Page.removeScriptToEvaluateOnNewDocument",
            serde_json::json!({"identifier": "1"}),
        )
        .await
        .context("failed to remove ChromeDriver script")?;

    dev_tools
        .execute_cdp_with_params(
            "Page.addScriptToEvaluateOnNewDocument",
            serde_json::json!({ "source": NAVIGATOR_PATCH_SCRIPT }),
        )
        .await
        .context("failed to patch navigator.webdriver")?;

    dev_tools
        .execute_cdp_with_params(
            "Page.addScriptToEvaluateOnNewDocument",
            serde_json::json!({ "source": REQUEST_HOOK_SCRIPT }),
        )
        .await
        .context("failed to install request hook")?;

    dev_tools
        .execute_cdp("Network.enable")
        .await
        .context("failed to enable network domain")?;

    Ok(())
}

async fn get_chromedriver_path() -> Option<PathBuf> {
    match selenium_manager::chrome::ChromeManager::new() {
        Ok(mut manager) => match tokio::task::spawn_blocking(move || manager.setup()).await {
            Ok(result) => match result {
                Ok(driver_path) => return Some(driver_path),
                Err(err) => log::debug!("Failed to set up ChromeDriver: {}", err),
            },
            Err(err) => log::debug!("Failed to set up ChromeDriver: {}", err),
        },
        Err(err) => log::debug!("Failed to create Chrome Manager: {}", err),
    }

    let executable_name = if cfg!(windows) {
        "chromedriver.exe"
    } else {
        "chromedriver"
    };

    pathsearch::find_executable_in_path(executable_name)
}

pub async fn get_user_agent(driver: &thirtyfour::WebDriver) -> Option<String> {
    driver
        .execute("return navigator.userAgent;", vec![])
        .await
        .ok()
        .and_then(|result| result.json().as_str().map(|user_agent| user_agent.to_string()))
}
