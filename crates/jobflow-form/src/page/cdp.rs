//! Chromium-backed page driver over CDP.
//!
//! Tree navigation (parent, siblings) has no stable handle story in CDP, so
//! the implementation tags the target node with a fresh `data-jf-eid`
//! attribute from page script and re-queries it by attribute selector. The
//! JavaScript fallbacks the interactor relies on (native-setter value
//! injection, synthetic mouse events) live here as `call_js_fn` payloads.

use super::{Element, ElementRef, Page, Rect};
use crate::error::{FieldError, FieldErrorKind, FormResult};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

static NEXT_EID: AtomicU64 = AtomicU64::new(1);

fn driver_err(label: &str, e: impl std::fmt::Display) -> FieldError {
    FieldError::new(FieldErrorKind::Other, label, e.to_string())
}

/// A live Chromium session. Owns the browser process and its event loop.
pub struct CdpBrowserSession {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
}

impl CdpBrowserSession {
    /// Launches headless Chromium with an isolated per-user profile dir.
    pub async fn launch(user_data_dir: &std::path::Path) -> FormResult<Self> {
        let config = BrowserConfig::builder()
            .user_data_dir(user_data_dir)
            .build()
            .map_err(|e| driver_err("browser", e))?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| driver_err("browser", e))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!(target: "jobflow::browser", error = %e, "browser event error");
                }
            }
        });
        Ok(Self { browser, handler_task })
    }

    pub async fn open(&self, url: &str) -> FormResult<CdpPage> {
        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(|e| driver_err("browser", e))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| driver_err("browser", e))?;
        Ok(CdpPage { inner: Arc::new(page) })
    }

    pub async fn close(mut self) {
        let _ = self.browser.close().await;
        self.handler_task.abort();
    }
}

/// One browser tab.
#[derive(Clone)]
pub struct CdpPage {
    inner: Arc<chromiumoxide::Page>,
}

#[async_trait]
impl Page for CdpPage {
    async fn query(&self, selector: &str) -> FormResult<Option<ElementRef>> {
        match self.inner.find_element(selector).await {
            Ok(element) => Ok(Some(Arc::new(CdpElement {
                page: Arc::clone(&self.inner),
                inner: element,
            }) as ElementRef)),
            Err(_) => Ok(None),
        }
    }

    async fn query_all(&self, selector: &str) -> FormResult<Vec<ElementRef>> {
        let elements = self.inner.find_elements(selector).await.unwrap_or_default();
        Ok(elements
            .into_iter()
            .map(|inner| {
                Arc::new(CdpElement {
                    page: Arc::clone(&self.inner),
                    inner,
                }) as ElementRef
            })
            .collect())
    }

    async fn content(&self) -> FormResult<String> {
        self.inner.content().await.map_err(|e| driver_err("page", e))
    }

    fn url(&self) -> String {
        // The url is tracked by the navigation watcher; fall back to empty.
        String::new()
    }
}

pub struct CdpElement {
    page: Arc<chromiumoxide::Page>,
    inner: chromiumoxide::element::Element,
}

impl CdpElement {
    async fn js<T: serde::de::DeserializeOwned>(&self, function: &str) -> FormResult<T> {
        let result = self
            .inner
            .call_js_fn(function, false)
            .await
            .map_err(|e| driver_err("element", e))?;
        let value = result.result.value.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(value).map_err(|e| driver_err("element", e))
    }

    async fn js_unit(&self, function: &str) -> FormResult<()> {
        self.inner
            .call_js_fn(function, false)
            .await
            .map_err(|e| driver_err("element", e))?;
        Ok(())
    }

    /// Tags a related node (resolved by `expr` over `this`) with a fresh
    /// eid and returns a re-queried handle to it.
    async fn related(&self, expr: &str) -> FormResult<Option<ElementRef>> {
        let eid = NEXT_EID.fetch_add(1, Ordering::Relaxed);
        let function = format!(
            "function() {{ const t = {}; if (!t) return false; t.setAttribute('data-jf-eid', '{}'); return true; }}",
            expr, eid
        );
        let found: bool = self.js(&function).await?;
        if !found {
            return Ok(None);
        }
        let selector = format!("[data-jf-eid=\"{}\"]", eid);
        match self.page.find_element(selector).await {
            Ok(element) => Ok(Some(Arc::new(CdpElement {
                page: Arc::clone(&self.page),
                inner: element,
            }) as ElementRef)),
            Err(_) => Ok(None),
        }
    }
}

#[async_trait]
impl Element for CdpElement {
    async fn tag_name(&self) -> FormResult<String> {
        self.js("function() { return this.tagName.toLowerCase(); }").await
    }

    async fn attr(&self, name: &str) -> FormResult<Option<String>> {
        self.inner
            .attribute(name)
            .await
            .map_err(|e| driver_err("element", e))
    }

    async fn text(&self) -> FormResult<String> {
        Ok(self
            .inner
            .inner_text()
            .await
            .map_err(|e| driver_err("element", e))?
            .unwrap_or_default()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" "))
    }

    async fn is_visible(&self) -> FormResult<bool> {
        self.js(
            "function() { const r = this.getBoundingClientRect(); \
             const s = window.getComputedStyle(this); \
             return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; }",
        )
        .await
    }

    async fn is_enabled(&self) -> FormResult<bool> {
        self.js("function() { return !this.disabled; }").await
    }

    async fn is_checked(&self) -> FormResult<bool> {
        self.js("function() { return !!this.checked; }").await
    }

    async fn input_value(&self) -> FormResult<String> {
        self.js("function() { return this.value ?? ''; }").await
    }

    async fn click(&self) -> FormResult<()> {
        self.inner.click().await.map_err(|e| driver_err("element", e))?;
        Ok(())
    }

    async fn focus(&self) -> FormResult<()> {
        self.inner.focus().await.map_err(|e| driver_err("element", e))?;
        Ok(())
    }

    async fn clear(&self) -> FormResult<()> {
        self.focus().await?;
        self.inner
            .press_key("Control+a")
            .await
            .map_err(|e| driver_err("element", e))?;
        self.inner
            .press_key("Backspace")
            .await
            .map_err(|e| driver_err("element", e))?;
        Ok(())
    }

    async fn fill(&self, value: &str) -> FormResult<()> {
        self.clear().await?;
        self.inner
            .type_str(value)
            .await
            .map_err(|e| driver_err("element", e))?;
        Ok(())
    }

    async fn type_text(&self, text: &str, delay_ms: u64) -> FormResult<()> {
        for c in text.chars() {
            self.inner
                .type_str(&c.to_string())
                .await
                .map_err(|e| driver_err("element", e))?;
            if delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> FormResult<()> {
        self.inner
            .press_key(key)
            .await
            .map_err(|e| driver_err("element", e))?;
        Ok(())
    }

    async fn set_checked(&self, checked: bool) -> FormResult<()> {
        if self.is_checked().await? != checked {
            self.click().await?;
        }
        Ok(())
    }

    async fn select_option_by_label(&self, label: &str) -> FormResult<bool> {
        let function = format!(
            "function() {{ const want = {}; \
             for (const opt of this.options ?? []) {{ \
               if (opt.text.trim() === want) {{ \
                 this.value = opt.value; \
                 this.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 this.dispatchEvent(new Event('change', {{ bubbles: true }})); \
                 return true; }} }} \
             return false; }}",
            serde_json::to_string(label).unwrap_or_default()
        );
        self.js(&function).await
    }

    async fn select_option_by_index(&self, index: usize) -> FormResult<bool> {
        let function = format!(
            "function() {{ if (!this.options || this.options.length <= {idx}) return false; \
             this.selectedIndex = {idx}; \
             this.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             this.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return true; }}",
            idx = index
        );
        self.js(&function).await
    }

    async fn set_input_files(&self, paths: &[PathBuf]) -> FormResult<()> {
        let files: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        let params = SetFileInputFilesParams::builder()
            .files(files)
            .node_id(self.inner.node_id)
            .build()
            .map_err(|e| driver_err("element", e))?;
        self.page
            .execute(params)
            .await
            .map_err(|e| driver_err("element", e))?;
        Ok(())
    }

    async fn js_click(&self) -> FormResult<()> {
        self.js_unit("function() { this.click(); }").await
    }

    async fn dispatch_click_events(&self) -> FormResult<()> {
        self.js_unit(
            "function() { \
             this.dispatchEvent(new MouseEvent('mousedown', { bubbles: true })); \
             this.dispatchEvent(new MouseEvent('mouseup', { bubbles: true })); \
             this.dispatchEvent(new MouseEvent('click', { bubbles: true })); }",
        )
        .await
    }

    async fn force_set_value(&self, value: &str) -> FormResult<()> {
        // Controlled components (React) ignore direct .value writes; go
        // through the native prototype setter, then replay the event storm.
        let function = format!(
            "function() {{ const value = {}; \
             const proto = this.tagName === 'TEXTAREA' ? window.HTMLTextAreaElement.prototype : window.HTMLInputElement.prototype; \
             const setter = Object.getOwnPropertyDescriptor(proto, 'value').set; \
             setter.call(this, value); \
             this.value = value; \
             this.dispatchEvent(new Event('focus', {{ bubbles: true }})); \
             this.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             this.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             this.dispatchEvent(new Event('blur', {{ bubbles: true }})); \
             this.dispatchEvent(new KeyboardEvent('keydown', {{ bubbles: true }})); \
             this.dispatchEvent(new KeyboardEvent('keyup', {{ bubbles: true }})); }}",
            serde_json::to_string(value).unwrap_or_default()
        );
        debug!(target: "jobflow::browser", "forcing value through native setter");
        self.js_unit(&function).await
    }

    async fn parent(&self) -> FormResult<Option<ElementRef>> {
        self.related("this.parentElement").await
    }

    async fn children(&self) -> FormResult<Vec<ElementRef>> {
        let count: usize = self.js("function() { return this.children.length; }").await?;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            if let Some(child) = self.related(&format!("this.children[{}]", i)).await? {
                out.push(child);
            }
        }
        Ok(out)
    }

    async fn preceding_siblings(&self, limit: usize) -> FormResult<Vec<ElementRef>> {
        let mut out = Vec::new();
        let mut expr = "this.previousElementSibling".to_string();
        for _ in 0..limit {
            match self.related(&expr).await? {
                Some(sibling) => out.push(sibling),
                None => break,
            }
            expr.push_str(".previousElementSibling");
        }
        Ok(out)
    }

    async fn query_all(&self, selector: &str) -> FormResult<Vec<ElementRef>> {
        let count: usize = self
            .js(&format!(
                "function() {{ return this.querySelectorAll({}).length; }}",
                serde_json::to_string(selector).unwrap_or_default()
            ))
            .await?;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let expr = format!(
                "this.querySelectorAll({})[{}]",
                serde_json::to_string(selector).unwrap_or_default(),
                i
            );
            if let Some(element) = self.related(&expr).await? {
                out.push(element);
            }
        }
        Ok(out)
    }

    async fn bounding_box(&self) -> FormResult<Option<Rect>> {
        let value: serde_json::Value = self
            .js("function() { const r = this.getBoundingClientRect(); return { x: r.x, y: r.y, width: r.width, height: r.height }; }")
            .await?;
        let get = |name: &str| value.get(name).and_then(|v| v.as_f64());
        Ok(match (get("x"), get("y"), get("width"), get("height")) {
            (Some(x), Some(y), Some(width), Some(height)) => Some(Rect { x, y, width, height }),
            _ => None,
        })
    }
}
