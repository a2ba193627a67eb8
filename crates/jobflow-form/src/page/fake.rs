//! In-process page fake.
//!
//! Parses an HTML fixture into a mutable node tree and emulates the small
//! set of browser behaviors the engine depends on: visibility, clicks
//! (radios, checkboxes, buttons), native selects, typed-filter combobox
//! menus, and file inputs. Combobox menus follow one convention: a
//! container carrying `data-fake-menu-for="<input id>"` starts hidden,
//! opens when its input is clicked or typed into, filters its options by
//! the typed text, and closes on Escape or option selection.
//!
//! Every interaction is recorded so tests can assert what the engine did
//! (and, for submit buttons, what it never did).

use super::{attr_or_empty, Element, ElementRef, Page, Rect};
use crate::error::{FieldError, FieldErrorKind, FormResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
struct Node {
    parent: Option<usize>,
    children: Vec<usize>,
    tag: String,
    attrs: BTreeMap<String, String>,
    own_text: String,
    value: String,
    checked: bool,
    visible: bool,
    enabled: bool,
    files: Vec<PathBuf>,
}

/// Shared mutable DOM.
pub struct FakeDom {
    nodes: Mutex<Vec<Node>>,
    clicks: Mutex<Vec<String>>,
    typed: Mutex<Vec<(String, String)>>,
    url: String,
}

/// The fake page handle. Cheap to clone.
#[derive(Clone)]
pub struct FakePage {
    dom: Arc<FakeDom>,
}

/// One element of the fake page.
pub struct FakeElement {
    dom: Arc<FakeDom>,
    index: usize,
}

impl FakePage {
    /// Builds a page from an HTML fixture.
    pub fn from_html(html: &str) -> Self {
        let document = scraper::Html::parse_document(html);
        let mut nodes = Vec::new();
        build_nodes(&mut nodes, document.tree.root(), None);
        FakePage {
            dom: Arc::new(FakeDom {
                nodes: Mutex::new(nodes),
                clicks: Mutex::new(Vec::new()),
                typed: Mutex::new(Vec::new()),
                url: "https://jobs.example/apply".into(),
            }),
        }
    }

    fn element(&self, index: usize) -> ElementRef {
        Arc::new(FakeElement {
            dom: Arc::clone(&self.dom),
            index,
        })
    }

    /// Everything the engine clicked, in order (button text or id).
    pub fn click_log(&self) -> Vec<String> {
        self.dom.clicks.lock().unwrap().clone()
    }

    /// Everything typed, as (element descriptor, text) pairs.
    pub fn typed_log(&self) -> Vec<(String, String)> {
        self.dom.typed.lock().unwrap().clone()
    }

    /// Current value of the element with the given id. Test convenience.
    pub fn value_of(&self, id: &str) -> Option<String> {
        let nodes = self.dom.nodes.lock().unwrap();
        nodes
            .iter()
            .find(|n| n.attrs.get("id").map(String::as_str) == Some(id))
            .map(|n| n.value.clone())
    }

    /// Checked state of the element with the given id. Test convenience.
    pub fn checked_of(&self, id: &str) -> Option<bool> {
        let nodes = self.dom.nodes.lock().unwrap();
        nodes
            .iter()
            .find(|n| n.attrs.get("id").map(String::as_str) == Some(id))
            .map(|n| n.checked)
    }
}

fn build_nodes(nodes: &mut Vec<Node>, node_ref: ego_tree::NodeRef<'_, scraper::node::Node>, parent: Option<usize>) {
    use scraper::node::Node as ScraperNode;
    match node_ref.value() {
        ScraperNode::Element(el) => {
            let tag = el.name().to_lowercase();
            let mut attrs = BTreeMap::new();
            for (name, value) in el.attrs() {
                attrs.insert(name.to_lowercase(), value.to_string());
            }
            let hidden = attrs.contains_key("hidden")
                || attrs.contains_key("data-fake-menu-for")
                || attrs
                    .get("style")
                    .map(|s| s.replace(' ', "").contains("display:none"))
                    .unwrap_or(false);
            let disabled = attrs.contains_key("disabled");
            let checked = attrs.contains_key("checked");
            let value = attrs.get("value").cloned().unwrap_or_default();
            let index = nodes.len();
            nodes.push(Node {
                parent,
                children: Vec::new(),
                tag,
                attrs,
                own_text: String::new(),
                value,
                checked,
                visible: !hidden,
                enabled: !disabled,
                files: Vec::new(),
            });
            if let Some(p) = parent {
                nodes[p].children.push(index);
            }
            for child in node_ref.children() {
                build_nodes(nodes, child, Some(index));
            }
        }
        ScraperNode::Text(text) => {
            if let Some(p) = parent {
                let t = text.trim();
                if !t.is_empty() {
                    if !nodes[p].own_text.is_empty() {
                        nodes[p].own_text.push(' ');
                    }
                    nodes[p].own_text.push_str(t);
                }
            }
        }
        _ => {
            for child in node_ref.children() {
                build_nodes(nodes, child, parent);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Selector matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum AttrOp {
    Exists,
    Equals,
    Contains,
    StartsWith,
}

#[derive(Debug, Clone)]
struct AttrTest {
    name: String,
    op: AttrOp,
    value: String,
}

#[derive(Debug, Clone, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrTest>,
    nots: Vec<Compound>,
}

/// Splits a selector list on top-level commas.
fn split_groups(selector: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in selector.char_indices() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                groups.push(selector[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    groups.push(selector[start..].trim());
    groups.retain(|g| !g.is_empty());
    groups
}

fn parse_compound(input: &str) -> Compound {
    let mut compound = Compound::default();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0usize;

    let ident = |chars: &[char], mut j: usize| -> (String, usize) {
        let start = j;
        while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '-' || chars[j] == '_') {
            j += 1;
        }
        (chars[start..j].iter().collect(), j)
    };

    while i < chars.len() {
        match chars[i] {
            '#' => {
                let (name, j) = ident(&chars, i + 1);
                compound.id = Some(name);
                i = j;
            }
            '.' => {
                let (name, j) = ident(&chars, i + 1);
                compound.classes.push(name);
                i = j;
            }
            '[' => {
                let close = chars[i..].iter().position(|&c| c == ']').map(|p| p + i).unwrap_or(chars.len());
                let body: String = chars[i + 1..close].iter().collect();
                let (name, op, value) = if let Some(pos) = body.find("*=") {
                    (body[..pos].to_string(), AttrOp::Contains, body[pos + 2..].to_string())
                } else if let Some(pos) = body.find("^=") {
                    (body[..pos].to_string(), AttrOp::StartsWith, body[pos + 2..].to_string())
                } else if let Some(pos) = body.find('=') {
                    (body[..pos].to_string(), AttrOp::Equals, body[pos + 1..].to_string())
                } else {
                    (body.clone(), AttrOp::Exists, String::new())
                };
                compound.attrs.push(AttrTest {
                    name: name.trim().to_lowercase(),
                    op,
                    value: value.trim().trim_matches(|c| c == '"' || c == '\'').to_string(),
                });
                i = close + 1;
            }
            ':' => {
                let rest: String = chars[i + 1..].iter().collect();
                if rest.starts_with("not(") {
                    let open = i + 5;
                    let mut depth = 1usize;
                    let mut j = open;
                    while j < chars.len() && depth > 0 {
                        match chars[j] {
                            '(' => depth += 1,
                            ')' => depth -= 1,
                            _ => {}
                        }
                        j += 1;
                    }
                    let inner: String = chars[open..j.saturating_sub(1)].iter().collect();
                    compound.nots.push(parse_compound(inner.trim()));
                    i = j;
                } else {
                    // Unsupported pseudo-class (e.g. :visible); skip its name.
                    let (_, j) = ident(&chars, i + 1);
                    i = j;
                }
            }
            c if c.is_alphanumeric() || c == '*' => {
                let (name, j) = ident(&chars, i);
                if name != "*" && !name.is_empty() {
                    compound.tag = Some(name.to_lowercase());
                }
                i = j.max(i + 1);
            }
            _ => i += 1,
        }
    }
    compound
}

fn matches_compound(node: &Node, compound: &Compound) -> bool {
    if let Some(tag) = &compound.tag {
        if node.tag != *tag {
            return false;
        }
    }
    if let Some(id) = &compound.id {
        if node.attrs.get("id") != Some(id) {
            return false;
        }
    }
    for class in &compound.classes {
        let has = node
            .attrs
            .get("class")
            .map(|c| c.split_whitespace().any(|part| part == class))
            .unwrap_or(false);
        if !has {
            return false;
        }
    }
    for test in &compound.attrs {
        let actual = node.attrs.get(&test.name);
        let ok = match test.op {
            AttrOp::Exists => actual.is_some(),
            AttrOp::Equals => actual.map(|v| v == &test.value).unwrap_or(false),
            AttrOp::Contains => actual.map(|v| v.contains(&test.value)).unwrap_or(false),
            AttrOp::StartsWith => actual.map(|v| v.starts_with(&test.value)).unwrap_or(false),
        };
        if !ok {
            return false;
        }
    }
    for not in &compound.nots {
        if matches_compound(node, not) {
            return false;
        }
    }
    true
}

fn matches_selector(node: &Node, selector: &str) -> bool {
    split_groups(selector)
        .into_iter()
        .any(|group| matches_compound(node, &parse_compound(group)))
}

// ---------------------------------------------------------------------------
// DOM behavior
// ---------------------------------------------------------------------------

impl FakeDom {
    fn effective_visible(nodes: &[Node], mut index: usize) -> bool {
        loop {
            if !nodes[index].visible {
                return false;
            }
            match nodes[index].parent {
                Some(p) => index = p,
                None => return true,
            }
        }
    }

    fn descriptor(nodes: &[Node], index: usize) -> String {
        let node = &nodes[index];
        let text = Self::deep_text(nodes, index);
        if !text.is_empty() {
            text
        } else if let Some(id) = node.attrs.get("id") {
            format!("#{}", id)
        } else {
            node.tag.clone()
        }
    }

    fn deep_text(nodes: &[Node], index: usize) -> String {
        let mut parts = Vec::new();
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            if !nodes[i].own_text.is_empty() {
                parts.push(nodes[i].own_text.clone());
            }
            for &child in nodes[i].children.iter().rev() {
                stack.push(child);
            }
        }
        parts.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Menus owned by the input with this id.
    fn menus_for(nodes: &[Node], input_id: &str) -> Vec<usize> {
        nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.attrs.get("data-fake-menu-for").map(String::as_str) == Some(input_id))
            .map(|(i, _)| i)
            .collect()
    }

    fn set_menu_open(&self, nodes: &mut [Node], input_index: usize, open: bool) {
        let Some(input_id) = nodes[input_index].attrs.get("id").cloned() else {
            return;
        };
        for menu in Self::menus_for(nodes, &input_id) {
            nodes[menu].visible = open;
            if open {
                // Opening resets any previous filter.
                Self::filter_menu_options(nodes, menu, "");
            }
        }
    }

    /// Shows only options whose text contains the typed filter.
    fn filter_menu_options(nodes: &mut [Node], menu: usize, filter: &str) {
        let filter = filter.to_lowercase();
        let mut stack: Vec<usize> = nodes[menu].children.clone();
        while let Some(i) = stack.pop() {
            stack.extend(nodes[i].children.clone());
            let is_option = nodes[i].attrs.get("role").map(String::as_str) == Some("option")
                || nodes[i]
                    .attrs
                    .get("class")
                    .map(|c| c.contains("select__option") || c.contains("option"))
                    .unwrap_or(false);
            if is_option {
                let text = Self::deep_text(nodes, i).to_lowercase();
                nodes[i].visible = filter.is_empty() || text.contains(&filter);
            }
        }
    }

    /// The menu ancestor of an option, if any, with its owning input id.
    fn owning_menu(nodes: &[Node], mut index: usize) -> Option<(usize, String)> {
        loop {
            if let Some(owner) = nodes[index].attrs.get("data-fake-menu-for") {
                return Some((index, owner.clone()));
            }
            index = nodes[index].parent?;
        }
    }

    fn find_by_id(nodes: &[Node], id: &str) -> Option<usize> {
        nodes
            .iter()
            .position(|n| n.attrs.get("id").map(String::as_str) == Some(id))
    }
}

#[async_trait]
impl Page for FakePage {
    async fn query(&self, selector: &str) -> FormResult<Option<ElementRef>> {
        Ok(self.query_all(selector).await?.into_iter().next())
    }

    async fn query_all(&self, selector: &str) -> FormResult<Vec<ElementRef>> {
        let nodes = self.dom.nodes.lock().unwrap();
        let matches: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.tag.is_empty() && matches_selector(n, selector))
            .map(|(i, _)| i)
            .collect();
        drop(nodes);
        Ok(matches.into_iter().map(|i| self.element(i)).collect())
    }

    async fn content(&self) -> FormResult<String> {
        let nodes = self.dom.nodes.lock().unwrap();
        let mut out = String::new();
        for node in nodes.iter() {
            if node.tag.is_empty() {
                continue;
            }
            out.push_str(&format!("<{}", node.tag));
            for (name, value) in &node.attrs {
                out.push_str(&format!(" {}=\"{}\"", name, value));
            }
            if !node.value.is_empty() {
                out.push_str(&format!(" value=\"{}\"", node.value));
            }
            out.push('>');
            if !node.own_text.is_empty() {
                out.push_str(&node.own_text);
            }
            for file in &node.files {
                if let Some(name) = file.file_name() {
                    out.push_str(&name.to_string_lossy());
                }
            }
        }
        Ok(out)
    }

    fn url(&self) -> String {
        self.dom.url.clone()
    }
}

impl FakeElement {
    fn with_node<T>(&self, f: impl FnOnce(&Node) -> T) -> T {
        let nodes = self.dom.nodes.lock().unwrap();
        f(&nodes[self.index])
    }

    fn descriptor(&self) -> String {
        let nodes = self.dom.nodes.lock().unwrap();
        FakeDom::descriptor(&nodes, self.index)
    }

    fn make(&self, index: usize) -> ElementRef {
        Arc::new(FakeElement {
            dom: Arc::clone(&self.dom),
            index,
        })
    }

    fn require_visible(&self, nodes: &[Node]) -> FormResult<()> {
        if !FakeDom::effective_visible(nodes, self.index) {
            return Err(FieldError::new(
                FieldErrorKind::ElementStale,
                FakeDom::descriptor(nodes, self.index),
                "element not visible",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Element for FakeElement {
    async fn tag_name(&self) -> FormResult<String> {
        Ok(self.with_node(|n| n.tag.clone()))
    }

    async fn attr(&self, name: &str) -> FormResult<Option<String>> {
        Ok(self.with_node(|n| n.attrs.get(&name.to_lowercase()).cloned()))
    }

    async fn text(&self) -> FormResult<String> {
        let nodes = self.dom.nodes.lock().unwrap();
        Ok(FakeDom::deep_text(&nodes, self.index))
    }

    async fn is_visible(&self) -> FormResult<bool> {
        let nodes = self.dom.nodes.lock().unwrap();
        Ok(FakeDom::effective_visible(&nodes, self.index))
    }

    async fn is_enabled(&self) -> FormResult<bool> {
        Ok(self.with_node(|n| n.enabled))
    }

    async fn is_checked(&self) -> FormResult<bool> {
        Ok(self.with_node(|n| n.checked))
    }

    async fn input_value(&self) -> FormResult<String> {
        Ok(self.with_node(|n| n.value.clone()))
    }

    async fn click(&self) -> FormResult<()> {
        let mut nodes = self.dom.nodes.lock().unwrap();
        self.require_visible(&nodes)?;
        if !nodes[self.index].enabled {
            return Err(FieldError::new(
                FieldErrorKind::Other,
                FakeDom::descriptor(&nodes, self.index),
                "element disabled",
            ));
        }
        let descriptor = FakeDom::descriptor(&nodes, self.index);
        self.dom.clicks.lock().unwrap().push(descriptor);

        let node = nodes[self.index].clone();
        let input_type = node.attrs.get("type").map(String::as_str).unwrap_or("");

        if node.tag == "input" && input_type == "radio" {
            let name = node.attrs.get("name").cloned();
            for i in 0..nodes.len() {
                if nodes[i].tag == "input"
                    && nodes[i].attrs.get("type").map(String::as_str) == Some("radio")
                    && nodes[i].attrs.get("name") == name.as_ref()
                {
                    nodes[i].checked = false;
                }
            }
            nodes[self.index].checked = true;
            return Ok(());
        }
        if node.tag == "input" && input_type == "checkbox" {
            nodes[self.index].checked = !nodes[self.index].checked;
            return Ok(());
        }

        // Combobox and Workday triggers open their menus.
        let opens_menu = node.attrs.get("role").map(String::as_str) == Some("combobox")
            || node
                .attrs
                .get("data-automation-id")
                .map(|v| v.contains("dropdown"))
                .unwrap_or(false);
        if opens_menu {
            self.dom.set_menu_open(&mut nodes, self.index, true);
            return Ok(());
        }

        // Option inside a menu: select it into the owning input and close.
        if let Some((menu, owner_id)) = FakeDom::owning_menu(&nodes, self.index) {
            let text = FakeDom::deep_text(&nodes, self.index);
            if let Some(owner) = FakeDom::find_by_id(&nodes, &owner_id) {
                nodes[owner].value = text;
            }
            nodes[menu].visible = false;
            nodes[self.index].attrs.insert("aria-selected".into(), "true".into());
            return Ok(());
        }

        // Ashby-style toggle buttons report selection via aria-pressed.
        if node.attrs.get("role").map(String::as_str) == Some("button")
            && node.attrs.contains_key("data-testid")
        {
            nodes[self.index].attrs.insert("aria-pressed".into(), "true".into());
        }
        Ok(())
    }

    async fn focus(&self) -> FormResult<()> {
        let nodes = self.dom.nodes.lock().unwrap();
        self.require_visible(&nodes)
    }

    async fn clear(&self) -> FormResult<()> {
        let mut nodes = self.dom.nodes.lock().unwrap();
        nodes[self.index].value.clear();
        // Clearing a combobox unfilters its menu options.
        if let Some(id) = nodes[self.index].attrs.get("id").cloned() {
            for menu in FakeDom::menus_for(&nodes, &id) {
                FakeDom::filter_menu_options(&mut nodes, menu, "");
            }
        }
        Ok(())
    }

    async fn fill(&self, value: &str) -> FormResult<()> {
        let mut nodes = self.dom.nodes.lock().unwrap();
        self.require_visible(&nodes)?;
        nodes[self.index].value = value.to_string();
        Ok(())
    }

    async fn type_text(&self, text: &str, _delay_ms: u64) -> FormResult<()> {
        let mut nodes = self.dom.nodes.lock().unwrap();
        self.require_visible(&nodes)?;
        nodes[self.index].value.push_str(text);
        let descriptor = FakeDom::descriptor(&nodes, self.index);
        self.dom.typed.lock().unwrap().push((descriptor, text.to_string()));

        // Typing into a combobox opens and filters its menu.
        if nodes[self.index].attrs.get("role").map(String::as_str) == Some("combobox") {
            let filter = nodes[self.index].value.clone();
            if let Some(id) = nodes[self.index].attrs.get("id").cloned() {
                for menu in FakeDom::menus_for(&nodes, &id) {
                    nodes[menu].visible = true;
                    FakeDom::filter_menu_options(&mut nodes, menu, &filter);
                }
            }
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> FormResult<()> {
        let mut nodes = self.dom.nodes.lock().unwrap();
        match key {
            "Escape" => {
                self.dom.set_menu_open(&mut nodes, self.index, false);
            }
            "Backspace" => {
                nodes[self.index].value.pop();
            }
            "Enter" => {
                // Commit the first visible option of an open menu, if any.
                if let Some(id) = nodes[self.index].attrs.get("id").cloned() {
                    let menus = FakeDom::menus_for(&nodes, &id);
                    for menu in menus {
                        if !nodes[menu].visible {
                            continue;
                        }
                        let mut stack: Vec<usize> = nodes[menu].children.clone();
                        while let Some(i) = stack.pop() {
                            stack.extend(nodes[i].children.clone());
                            let is_option = nodes[i].attrs.get("role").map(String::as_str) == Some("option")
                                || nodes[i]
                                    .attrs
                                    .get("class")
                                    .map(|c| c.contains("select__option"))
                                    .unwrap_or(false);
                            if is_option && FakeDom::effective_visible(&nodes, i) {
                                let text = FakeDom::deep_text(&nodes, i);
                                nodes[self.index].value = text;
                                nodes[menu].visible = false;
                                return Ok(());
                            }
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn set_checked(&self, checked: bool) -> FormResult<()> {
        {
            let nodes = self.dom.nodes.lock().unwrap();
            self.require_visible(&nodes)?;
            if nodes[self.index].checked == checked {
                return Ok(());
            }
        }
        self.click().await
    }

    async fn select_option_by_label(&self, label: &str) -> FormResult<bool> {
        let mut nodes = self.dom.nodes.lock().unwrap();
        let mut stack: Vec<usize> = nodes[self.index].children.clone();
        while let Some(i) = stack.pop() {
            stack.extend(nodes[i].children.clone());
            if nodes[i].tag == "option" && FakeDom::deep_text(&nodes, i) == label {
                let text = FakeDom::deep_text(&nodes, i);
                nodes[self.index].value = text;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn select_option_by_index(&self, index: usize) -> FormResult<bool> {
        let mut nodes = self.dom.nodes.lock().unwrap();
        let options: Vec<usize> = {
            let mut found = Vec::new();
            let mut stack: Vec<usize> = nodes[self.index].children.clone();
            while let Some(i) = stack.pop() {
                stack.extend(nodes[i].children.clone());
                if nodes[i].tag == "option" {
                    found.push(i);
                }
            }
            found.sort_unstable();
            found
        };
        let Some(&option) = options.get(index) else {
            return Ok(false);
        };
        nodes[self.index].value = FakeDom::deep_text(&nodes, option);
        Ok(true)
    }

    async fn set_input_files(&self, paths: &[PathBuf]) -> FormResult<()> {
        let mut nodes = self.dom.nodes.lock().unwrap();
        if nodes[self.index].tag != "input"
            || nodes[self.index].attrs.get("type").map(String::as_str) != Some("file")
        {
            return Err(FieldError::new(
                FieldErrorKind::Other,
                FakeDom::descriptor(&nodes, self.index),
                "not a file input",
            ));
        }
        nodes[self.index].files = paths.to_vec();
        nodes[self.index].value = paths
            .first()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(())
    }

    async fn js_click(&self) -> FormResult<()> {
        // Script clicks ignore visibility, like el.click() does.
        let descriptor = self.descriptor();
        self.dom.clicks.lock().unwrap().push(descriptor);
        let mut nodes = self.dom.nodes.lock().unwrap();
        if let Some((menu, owner_id)) = FakeDom::owning_menu(&nodes, self.index) {
            let text = FakeDom::deep_text(&nodes, self.index);
            if let Some(owner) = FakeDom::find_by_id(&nodes, &owner_id) {
                nodes[owner].value = text;
            }
            nodes[menu].visible = false;
        }
        Ok(())
    }

    async fn dispatch_click_events(&self) -> FormResult<()> {
        self.js_click().await
    }

    async fn force_set_value(&self, value: &str) -> FormResult<()> {
        let mut nodes = self.dom.nodes.lock().unwrap();
        nodes[self.index].value = value.to_string();
        Ok(())
    }

    async fn parent(&self) -> FormResult<Option<ElementRef>> {
        let parent = self.with_node(|n| n.parent);
        Ok(parent.map(|p| self.make(p)))
    }

    async fn children(&self) -> FormResult<Vec<ElementRef>> {
        let children = self.with_node(|n| n.children.clone());
        Ok(children.into_iter().map(|c| self.make(c)).collect())
    }

    async fn preceding_siblings(&self, limit: usize) -> FormResult<Vec<ElementRef>> {
        let nodes = self.dom.nodes.lock().unwrap();
        let Some(parent) = nodes[self.index].parent else {
            return Ok(Vec::new());
        };
        let siblings = &nodes[parent].children;
        let Some(position) = siblings.iter().position(|&c| c == self.index) else {
            return Ok(Vec::new());
        };
        let picked: Vec<usize> = siblings[..position].iter().rev().take(limit).copied().collect();
        drop(nodes);
        Ok(picked.into_iter().map(|i| self.make(i)).collect())
    }

    async fn query_all(&self, selector: &str) -> FormResult<Vec<ElementRef>> {
        let nodes = self.dom.nodes.lock().unwrap();
        let mut matches = Vec::new();
        let mut stack: Vec<usize> = nodes[self.index].children.clone();
        while let Some(i) = stack.pop() {
            stack.extend(nodes[i].children.clone());
            if matches_selector(&nodes[i], selector) {
                matches.push(i);
            }
        }
        matches.sort_unstable();
        drop(nodes);
        Ok(matches.into_iter().map(|i| self.make(i)).collect())
    }

    async fn bounding_box(&self) -> FormResult<Option<Rect>> {
        // Synthetic geometry: document order maps to vertical position, so
        // "above" comparisons work without a layout engine.
        Ok(Some(Rect {
            x: 0.0,
            y: self.index as f64 * 20.0,
            width: 200.0,
            height: 20.0,
        }))
    }
}

/// Convenience used by tests and detection: the element's id, if any.
pub async fn element_id(element: &dyn Element) -> String {
    attr_or_empty(element, "id").await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> FakePage {
        FakePage::from_html(
            r#"
            <form>
              <label for="first_name">First Name</label>
              <input type="text" id="first_name" name="first_name">
              <fieldset>
                <legend>Do you require sponsorship?</legend>
                <label><input type="radio" name="sponsor" id="sponsor_yes" value="yes">Yes</label>
                <label><input type="radio" name="sponsor" id="sponsor_no" value="no">No</label>
              </fieldset>
              <input role="combobox" aria-haspopup="true" id="degree" name="degree">
              <div data-fake-menu-for="degree" class="select__menu">
                <div class="select__option">Bachelor of Science</div>
                <div class="select__option">Master of Science</div>
              </div>
              <button type="button">Continue</button>
            </form>
        "#,
        )
    }

    #[tokio::test]
    async fn selectors_match_attributes_classes_and_not() {
        let p = page();
        assert_eq!(p.query_all("input").await.unwrap().len(), 4);
        assert_eq!(p.query_all("input[type=radio]").await.unwrap().len(), 2);
        assert_eq!(p.query_all("[class*=\"select__menu\"]").await.unwrap().len(), 1);
        assert_eq!(
            p.query_all("input:not([type=radio]), button").await.unwrap().len(),
            3
        );
        assert_eq!(p.query_all("label[for=\"first_name\"]").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn radio_clicks_are_exclusive() {
        let p = page();
        let yes = p.query("#sponsor_yes").await.unwrap().unwrap();
        let no = p.query("#sponsor_no").await.unwrap().unwrap();
        yes.click().await.unwrap();
        assert!(yes.is_checked().await.unwrap());
        no.click().await.unwrap();
        assert!(!yes.is_checked().await.unwrap());
        assert!(no.is_checked().await.unwrap());
    }

    #[tokio::test]
    async fn combobox_menu_opens_filters_and_selects() {
        let p = page();
        let combo = p.query("#degree").await.unwrap().unwrap();
        let menu = p.query("[class*=\"select__menu\"]").await.unwrap().unwrap();
        assert!(!menu.is_visible().await.unwrap());

        combo.click().await.unwrap();
        assert!(menu.is_visible().await.unwrap());

        combo.type_text("master", 0).await.unwrap();
        let options = p.query_all("[class*=\"select__option\"]").await.unwrap();
        let mut visible = Vec::new();
        for opt in &options {
            if opt.is_visible().await.unwrap() {
                visible.push(opt.text().await.unwrap());
            }
        }
        assert_eq!(visible, vec!["Master of Science".to_string()]);

        let target = &options[1];
        target.click().await.unwrap();
        assert_eq!(combo.input_value().await.unwrap(), "Master of Science");
        assert!(!menu.is_visible().await.unwrap());
    }

    #[tokio::test]
    async fn click_log_records_button_text() {
        let p = page();
        let button = p.query("button").await.unwrap().unwrap();
        button.click().await.unwrap();
        assert_eq!(p.click_log(), vec!["Continue".to_string()]);
    }
}
