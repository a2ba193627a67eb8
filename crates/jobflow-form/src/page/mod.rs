//! Browser-page abstraction.
//!
//! The engine never talks to a browser API directly; it drives a [`Page`] of
//! [`Element`]s. Two implementations exist: [`fake::FakePage`], an
//! in-process DOM used by every test, and (behind the `browser` feature)
//! [`cdp::CdpPage`] over a real Chromium via CDP. The trait surface is
//! exactly what the filler needs, nothing more.
//!
//! Pages are owned by a single fill session and never shared across users.

pub mod fake;

#[cfg(feature = "browser")]
pub mod cdp;

use crate::error::FormResult;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

pub type ElementRef = Arc<dyn Element>;

/// Element bounding box in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One page of a browser session.
#[async_trait]
pub trait Page: Send + Sync {
    /// First match for a CSS selector, if any.
    async fn query(&self, selector: &str) -> FormResult<Option<ElementRef>>;

    /// All matches for a CSS selector, in document order.
    async fn query_all(&self, selector: &str) -> FormResult<Vec<ElementRef>>;

    /// Full page HTML (used for upload verification and DOM digests).
    async fn content(&self) -> FormResult<String>;

    /// Current page URL.
    fn url(&self) -> String;
}

/// A handle to one DOM element.
///
/// Handles may go stale when the page re-renders; callers that need
/// durability re-resolve through a fresh selector (see the interactor's
/// locator rules) rather than holding handles across iterations.
#[async_trait]
pub trait Element: Send + Sync {
    async fn tag_name(&self) -> FormResult<String>;
    async fn attr(&self, name: &str) -> FormResult<Option<String>>;
    /// Visible text content, whitespace-collapsed.
    async fn text(&self) -> FormResult<String>;
    async fn is_visible(&self) -> FormResult<bool>;
    async fn is_enabled(&self) -> FormResult<bool>;
    async fn is_checked(&self) -> FormResult<bool>;
    /// Current value of an input/select/textarea.
    async fn input_value(&self) -> FormResult<String>;

    async fn click(&self) -> FormResult<()>;
    async fn focus(&self) -> FormResult<()>;
    /// Clears the current value (select-all + delete semantics).
    async fn clear(&self) -> FormResult<()>;
    /// Clears then sets the value in one step.
    async fn fill(&self, value: &str) -> FormResult<()>;
    /// Types character by character with a per-key delay, triggering the
    /// page's filter/autocomplete machinery.
    async fn type_text(&self, text: &str, delay_ms: u64) -> FormResult<()>;
    /// Presses a named key ("Enter", "Escape", "Backspace", ...).
    async fn press_key(&self, key: &str) -> FormResult<()>;
    async fn set_checked(&self, checked: bool) -> FormResult<()>;

    /// Native `<select>`: choose the option whose label matches exactly.
    async fn select_option_by_label(&self, label: &str) -> FormResult<bool>;
    /// Native `<select>`: choose by option index.
    async fn select_option_by_index(&self, index: usize) -> FormResult<bool>;

    async fn set_input_files(&self, paths: &[PathBuf]) -> FormResult<()>;

    /// Click dispatched from page script (`el.click()`), for targets a
    /// trusted click cannot reach.
    async fn js_click(&self) -> FormResult<()>;
    /// Synthetic mousedown + mouseup + click event sequence.
    async fn dispatch_click_events(&self) -> FormResult<()>;
    /// Sets the value through the element's native setter and dispatches
    /// focus/input/change/blur (and key events) so controlled components
    /// observe the change.
    async fn force_set_value(&self, value: &str) -> FormResult<()>;

    async fn parent(&self) -> FormResult<Option<ElementRef>>;
    async fn children(&self) -> FormResult<Vec<ElementRef>>;
    /// Up to `limit` preceding siblings, nearest first.
    async fn preceding_siblings(&self, limit: usize) -> FormResult<Vec<ElementRef>>;
    /// CSS query scoped to this element's subtree.
    async fn query_all(&self, selector: &str) -> FormResult<Vec<ElementRef>>;
    async fn bounding_box(&self) -> FormResult<Option<Rect>>;
}

/// Attribute shorthand defaulting to empty string.
pub async fn attr_or_empty(element: &dyn Element, name: &str) -> String {
    element.attr(name).await.ok().flatten().unwrap_or_default()
}
