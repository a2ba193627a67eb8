//! Question extraction: given a control, find the *question* it answers and
//! the label of its specific option, then consolidate sibling radios and
//! checkboxes into single logical fields so the mappers see one field per
//! question instead of one per option.

use crate::error::FormResult;
use crate::field::{FieldCategory, FormField, OptionItem};
use crate::page::{attr_or_empty, ElementRef, Page};
use std::collections::HashMap;
use tracing::debug;

/// Where a question was found; kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionSource {
    FieldsetLegend,
    AriaLabelledBy,
    AriaDescribedBy,
    ContainerHeading,
    PrecedingSibling,
    ParentPrecedingSibling,
    RoleGroupAriaLabel,
    Unknown,
}

/// Extracted question context for one control.
#[derive(Debug, Clone)]
pub struct QuestionContext {
    pub question: String,
    pub source: QuestionSource,
    pub option_label: String,
}

const QUESTION_INDICATORS: [&str; 17] = [
    "?",
    "are you",
    "do you",
    "have you",
    "will you",
    "can you",
    "please select",
    "please indicate",
    "please choose",
    "which",
    "what",
    "when",
    "where",
    "how",
    "select your",
    "indicate your",
    "choose your",
];

/// A text "looks like a question" when it carries one of the indicator
/// phrases (or ends with a question mark).
pub fn looks_like_question(text: &str) -> bool {
    if text.len() < 5 {
        return false;
    }
    let lower = text.to_lowercase();
    QUESTION_INDICATORS.iter().any(|indicator| lower.contains(indicator))
}

async fn question_shaped_text(element: &ElementRef) -> FormResult<Option<String>> {
    let text = element.text().await?;
    Ok(if looks_like_question(&text) { Some(text) } else { None })
}

/// This option's own label: `label[for=id]`, enclosing label, `aria-label`,
/// then text adjacent to the control inside its parent.
pub async fn extract_option_label(page: &dyn Page, element: &ElementRef) -> FormResult<String> {
    let id = attr_or_empty(element.as_ref(), "id").await;
    if !id.is_empty() {
        if let Some(label) = page.query(&format!("label[for=\"{}\"]", id)).await? {
            let text = label.text().await?;
            if !text.is_empty() {
                return Ok(text);
            }
        }
    }
    if let Some(parent) = element.parent().await? {
        if parent.tag_name().await? == "label" {
            let text = parent.text().await?;
            if !text.is_empty() {
                return Ok(text);
            }
        }
    }
    let aria = attr_or_empty(element.as_ref(), "aria-label").await;
    if !aria.is_empty() {
        return Ok(aria);
    }
    if let Some(parent) = element.parent().await? {
        let text = parent.text().await?;
        if !text.is_empty() {
            return Ok(text);
        }
    }
    Ok(String::new())
}

/// Finds the question text for a radio/checkbox control by walking the DOM:
/// fieldset legend, ARIA references, the shared-name container's heading,
/// preceding siblings, the parent's preceding siblings, and finally an
/// ARIA group label.
pub async fn extract_question(page: &dyn Page, element: &ElementRef) -> FormResult<QuestionContext> {
    let option_label = extract_option_label(page, element).await?;

    // Strategy A: enclosing fieldset's legend, within 5 ancestors.
    let mut current = element.parent().await?;
    for _ in 0..5 {
        let Some(node) = current else { break };
        if node.tag_name().await? == "fieldset" {
            if let Some(legend) = node.query_all("legend").await?.into_iter().next() {
                let text = legend.text().await?;
                if !text.is_empty() {
                    return Ok(QuestionContext {
                        question: text,
                        source: QuestionSource::FieldsetLegend,
                        option_label,
                    });
                }
            }
        }
        current = node.parent().await?;
    }

    // Strategies B/C: aria-labelledby, then aria-describedby, when the
    // referenced text is question-shaped.
    for (attr, source) in [
        ("aria-labelledby", QuestionSource::AriaLabelledBy),
        ("aria-describedby", QuestionSource::AriaDescribedBy),
    ] {
        if let Some(reference) = element.attr(attr).await? {
            if let Some(ref_id) = reference.split_whitespace().next() {
                if let Some(target) = page.query(&format!("[id=\"{}\"]", ref_id)).await? {
                    if let Some(text) = question_shaped_text(&target).await? {
                        return Ok(QuestionContext {
                            question: text,
                            source,
                            option_label,
                        });
                    }
                }
            }
        }
    }

    // Strategy D: the nearest ancestor containing the whole shared-name
    // group; its first heading at or above the first control is the question.
    let field_name = attr_or_empty(element.as_ref(), "name").await;
    if !field_name.is_empty() {
        let mut container = element.parent().await?;
        for _ in 0..5 {
            let Some(node) = container else { break };
            let shared = node.query_all(&format!("input[name=\"{}\"]", field_name)).await?;
            if shared.len() > 1 {
                let first_control_y = shared[0].bounding_box().await?.map(|r| r.y).unwrap_or(f64::MAX);
                let headings = node
                    .query_all(
                        "h1, h2, h3, h4, h5, h6, label, legend, div[class*=\"label\"], div[class*=\"question\"], \
                         span[class*=\"label\"], span[class*=\"question\"], p[class*=\"question\"]",
                    )
                    .await?;
                for heading in headings {
                    let heading_y = heading.bounding_box().await?.map(|r| r.y).unwrap_or(f64::MAX);
                    if heading_y > first_control_y {
                        continue;
                    }
                    let text = heading.text().await?;
                    if text.len() > 5 && text != option_label {
                        return Ok(QuestionContext {
                            question: text,
                            source: QuestionSource::ContainerHeading,
                            option_label,
                        });
                    }
                }
            }
            container = node.parent().await?;
        }
    }

    // Strategy E: preceding siblings of the control.
    for sibling in element.preceding_siblings(5).await? {
        if let Some(text) = question_shaped_text(&sibling).await? {
            if text != option_label {
                return Ok(QuestionContext {
                    question: text,
                    source: QuestionSource::PrecedingSibling,
                    option_label,
                });
            }
        }
    }

    // Strategy F: the parent's preceding siblings.
    if let Some(parent) = element.parent().await? {
        for sibling in parent.preceding_siblings(3).await? {
            if let Some(text) = question_shaped_text(&sibling).await? {
                return Ok(QuestionContext {
                    question: text,
                    source: QuestionSource::ParentPrecedingSibling,
                    option_label,
                });
            }
        }
    }

    // Strategy G: an ancestor radiogroup/group with an aria-label.
    let mut current = element.parent().await?;
    for _ in 0..5 {
        let Some(node) = current else { break };
        let role = attr_or_empty(node.as_ref(), "role").await;
        if role == "group" || role == "radiogroup" {
            let aria = attr_or_empty(node.as_ref(), "aria-label").await;
            if aria.len() > 5 {
                return Ok(QuestionContext {
                    question: aria,
                    source: QuestionSource::RoleGroupAriaLabel,
                    option_label,
                });
            }
        }
        current = node.parent().await?;
    }

    Ok(QuestionContext {
        question: String::new(),
        source: QuestionSource::Unknown,
        option_label,
    })
}

/// Consolidates radios sharing a `name` into one `radio_group` field whose
/// options carry each member's label, value, id, and element handle.
pub async fn consolidate_radio_groups(page: &dyn Page, fields: Vec<FormField>) -> FormResult<Vec<FormField>> {
    let mut groups: HashMap<String, Vec<FormField>> = HashMap::new();
    let mut rest = Vec::new();

    for mut field in fields {
        if field.category == FieldCategory::Radio && !field.name.is_empty() {
            let context = extract_question(page, &field.element).await?;
            field.option_label = context.option_label;
            if field.question.is_empty() {
                field.question = context.question;
            }
            groups.entry(field.name.clone()).or_default().push(field);
        } else {
            rest.push(field);
        }
    }

    for (name, members) in groups {
        let Some(first) = members.first().cloned() else { continue };
        let question = members
            .iter()
            .map(|m| m.question.clone())
            .find(|q| !q.is_empty())
            .unwrap_or_else(|| first.label.clone());

        let mut options = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for member in &members {
            let text = if member.option_label.is_empty() {
                member.label.clone()
            } else {
                member.option_label.clone()
            };
            if text.is_empty() || !seen.insert(text.clone()) {
                continue;
            }
            options.push(OptionItem {
                text,
                value: attr_or_empty(member.element.as_ref(), "value").await,
                id: member.id.clone(),
                element: Some(member.element.clone()),
            });
        }

        debug!(
            target: "jobflow::questions",
            question = %question,
            options = options.len(),
            "consolidated radio group"
        );
        rest.push(FormField {
            element: first.element.clone(),
            category: FieldCategory::RadioGroup,
            input_type: "radio".into(),
            label: question.clone(),
            name: name.clone(),
            id: first.id.clone(),
            placeholder: String::new(),
            aria_label: String::new(),
            stable_id: format!("radio_group:{}", name),
            tag_name: "input".into(),
            required: members.iter().any(|m| m.required),
            is_filled: members.iter().any(|m| m.is_filled),
            options,
            question,
            option_label: String::new(),
            individual_radios: members,
            individual_checkboxes: Vec::new(),
        });
    }

    Ok(rest)
}

/// First 4 dash-separated segments of a UUID-shaped id, used to group
/// checkboxes generated from the same question widget.
fn id_group_prefix(id: &str) -> Option<String> {
    let parts: Vec<&str> = id.split('-').collect();
    if parts.len() >= 4 {
        Some(parts[..4].join("-"))
    } else {
        None
    }
}

/// Consolidates checkboxes that share a question (or a long id prefix) into
/// `checkbox_group` fields. A single checkbox with a question stays an
/// ordinary checkbox whose label becomes the question.
pub async fn consolidate_checkbox_groups(page: &dyn Page, fields: Vec<FormField>) -> FormResult<Vec<FormField>> {
    let mut checkboxes = Vec::new();
    let mut rest = Vec::new();
    for mut field in fields {
        if field.category == FieldCategory::Checkbox {
            let context = extract_question(page, &field.element).await?;
            field.option_label = context.option_label;
            field.question = context.question;
            checkboxes.push(field);
        } else {
            rest.push(field);
        }
    }
    if checkboxes.is_empty() {
        return Ok(rest);
    }

    // Group by normalized question; questionless boxes join a group whose
    // members share their UUID id prefix, otherwise stand alone.
    let mut groups: Vec<(String, Vec<FormField>)> = Vec::new();
    let mut singles = Vec::new();
    for field in checkboxes {
        let question_key = field.question.trim().to_lowercase();
        if !question_key.is_empty() {
            match groups.iter_mut().find(|(key, _)| *key == question_key) {
                Some((_, members)) => members.push(field),
                None => groups.push((question_key, vec![field])),
            }
            continue;
        }
        let prefix = id_group_prefix(&field.id);
        let mut joined = false;
        if let Some(prefix) = prefix {
            for (_, members) in groups.iter_mut() {
                if members.iter().any(|m| m.id.starts_with(&prefix)) {
                    members.push(field.clone());
                    joined = true;
                    break;
                }
            }
        }
        if !joined {
            singles.push(field);
        }
    }

    for (_, members) in groups {
        let question = members
            .iter()
            .map(|m| m.question.clone())
            .find(|q| !q.is_empty())
            .unwrap_or_default();

        if members.len() == 1 {
            let mut single = members.into_iter().next().unwrap_or_else(|| unreachable!());
            if question.len() > single.label.len() {
                single.label = question.clone();
            }
            single.question = question;
            rest.push(single);
            continue;
        }

        let first = members[0].clone();
        let mut options = Vec::new();
        for member in &members {
            let text = if member.option_label.is_empty() {
                if member.name.is_empty() { member.label.clone() } else { member.name.clone() }
            } else {
                member.option_label.clone()
            };
            options.push(OptionItem {
                text,
                value: attr_or_empty(member.element.as_ref(), "value").await,
                id: member.id.clone(),
                element: Some(member.element.clone()),
            });
        }

        let group_key = if first.name.is_empty() { first.id.clone() } else { first.name.clone() };
        debug!(
            target: "jobflow::questions",
            question = %question,
            options = options.len(),
            "consolidated checkbox group"
        );
        rest.push(FormField {
            element: first.element.clone(),
            category: FieldCategory::CheckboxGroup,
            input_type: "checkbox".into(),
            label: if question.is_empty() {
                format!("Checkbox group {}", group_key)
            } else {
                question.clone()
            },
            name: first.name.clone(),
            id: first.id.clone(),
            placeholder: String::new(),
            aria_label: String::new(),
            stable_id: format!("checkbox_group:{}", group_key),
            tag_name: "input".into(),
            required: members.iter().any(|m| m.required),
            is_filled: false,
            options,
            question,
            option_label: String::new(),
            individual_radios: Vec::new(),
            individual_checkboxes: members,
        });
    }

    rest.extend(singles);
    Ok(rest)
}
