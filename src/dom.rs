use headless_chrome::Tab;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::BrowserConfig;
use crate::error::AgentError;
use crate::types::{ElementRef, PageState};

/// JavaScript injected into the page to produce the observable surface.
/// NON-DESTRUCTIVE apart from stamping `data-eid` attributes onto
/// interactive elements so they stay addressable.
///
/// The script:
///   1. Skips script, style, noscript, svg elements (does NOT remove them).
///   2. Walks the visible DOM tree (max depth 15).
///   3. Assigns sequential ids e0, e1, ... to interactive elements
///      (a, button, input, textarea, select) via data-eid attributes and
///      records selector, role, label and bounding box for each.
///   4. Emits a compact one-line-per-element outline for the model, plus the
///      body HTML with scripts and styles stripped for the viewer.
const SNAPSHOT_JS: &str = r#"
(() => {
  const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','SVG','LINK','META','TEMPLATE']);
  const INTERACTIVE = new Set(['a','button','input','textarea','select']);
  let id = 0;
  const lines = [];
  const elements = [];
  const seen = new Set();

  function isVisible(el) {
    if (el.offsetParent === null && el.tagName !== 'BODY' && el.tagName !== 'HTML') return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0';
  }

  function describe(el, tag, eid) {
    if (tag === 'a') return eid + ' link "' + (el.textContent || '').trim().slice(0, 60) + '"';
    if (tag === 'button') return eid + ' button "' + (el.textContent || '').trim().slice(0, 60) + '"';
    if (tag === 'select') {
      const opts = [...el.options].map(o => o.text.trim().slice(0, 20)).join('|');
      return eid + ' select [' + opts + ']';
    }
    let d = eid + ' ' + tag + ' type=' + (el.type || 'text') + ' placeholder="' + (el.placeholder || '') + '"';
    if (el.name) d += ' name=' + el.name;
    if (el.value) d += ' value="' + el.value.slice(0, 30) + '"';
    return d;
  }

  function labelOf(el, tag) {
    if (tag === 'input' || tag === 'textarea') return el.placeholder || el.name || '';
    if (tag === 'select') return el.name || '';
    return (el.textContent || '').trim().slice(0, 60);
  }

  function walk(node, depth) {
    if (depth > 15) return;
    for (const child of node.children) {
      if (SKIP.has(child.tagName)) continue;
      if (!isVisible(child)) continue;
      const tag = child.tagName.toLowerCase();

      if (INTERACTIVE.has(tag)) {
        const eid = 'e' + (id++);
        child.setAttribute('data-eid', eid);
        const r = child.getBoundingClientRect();
        elements.push({
          selector: '[data-eid="' + eid + '"]',
          role: tag,
          label: labelOf(child, tag),
          bounds: { x: r.x, y: r.y, width: r.width, height: r.height },
        });
        const desc = describe(child, tag, '[' + eid + ']');
        if (!seen.has(desc)) {
          seen.add(desc);
          lines.push(desc);
        }
      } else {
        const text = child.textContent ? child.textContent.trim() : '';
        if (text && text.length > 2 && text.length < 200 && child.children.length === 0) {
          const t = text.slice(0, 100);
          if (!seen.has(t)) {
            seen.add(t);
            lines.push('  "' + t + '"');
          }
        }
      }
      walk(child, depth + 1);
    }
  }

  walk(document.body, 0);
  const clone = document.body.cloneNode(true);
  clone.querySelectorAll('script,style,noscript,template').forEach(n => n.remove());
  return JSON.stringify({ outline: lines.join('\n'), elements: elements, html: clone.outerHTML });
})()
"#;

#[derive(Deserialize)]
struct RawSnapshot {
    outline: String,
    elements: Vec<ElementRef>,
    html: String,
}

/// Capture the full observable page state. Blocking; run under
/// `spawn_blocking` like every other CDP call.
pub fn capture_page_state(tab: &Arc<Tab>, config: &BrowserConfig) -> Result<PageState, AgentError> {
    let raw = eval_string(tab, SNAPSHOT_JS)?.unwrap_or_default();
    let snapshot: RawSnapshot = serde_json::from_str(&raw)
        .map_err(|e| AgentError::Browser(format!("snapshot payload: {e}")))?;

    Ok(PageState {
        url: eval_string(tab, "window.location.href")?.unwrap_or_else(|| "unknown".into()),
        title: eval_string(tab, "document.title")?.unwrap_or_else(|| "untitled".into()),
        html: truncate_chars(&snapshot.html, config.max_html_chars),
        // The outline is truncated by the prompt layer against its own budget.
        outline: snapshot.outline,
        interactive_elements: snapshot.elements,
    })
}

/// Text content of the first element matching `query`, capped like the
/// extraction records in the audit trail.
pub fn extract_text(tab: &Arc<Tab>, query: &str) -> Result<String, AgentError> {
    let js = format!(
        "(document.querySelector('{}') || {{}}).innerText || ''",
        escape_selector(query)
    );
    let content = eval_string(tab, &js)?.unwrap_or_default();
    Ok(content.chars().take(2000).collect())
}

pub fn escape_selector(selector: &str) -> String {
    selector.replace('\\', "\\\\").replace('\'', "\\'")
}

fn eval_string(tab: &Arc<Tab>, js: &str) -> Result<Option<String>, AgentError> {
    let result = tab
        .evaluate(js, false)
        .map_err(|e| AgentError::Browser(e.to_string()))?;
    Ok(result.value.and_then(|v| v.as_str().map(String::from)))
}

/// Cut at a character boundary, keeping the front.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// Like `truncate_chars` but appends an explicit marker so the model knows
/// it is looking at a partial view.
pub fn truncate_with_marker(s: &str, max_chars: usize) -> String {
    let total = s.chars().count();
    if total <= max_chars {
        s.to_string()
    } else {
        let prefix: String = s.chars().take(max_chars).collect();
        format!("{prefix}\n... [truncated, {total} total chars]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_is_a_noop_under_the_budget() {
        assert_eq!(truncate_with_marker("short", 10), "short");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn truncation_appends_marker_over_the_budget() {
        let long = "x".repeat(50);
        let cut = truncate_with_marker(&long, 10);
        assert!(cut.starts_with("xxxxxxxxxx\n... [truncated, 50 total chars]"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "héllo wörld";
        let cut = truncate_chars(s, 4);
        assert_eq!(cut, "héll");
    }

    #[test]
    fn selector_escaping_quotes_and_backslashes() {
        assert_eq!(escape_selector("a[name='q']"), "a[name=\\'q\\']");
        assert_eq!(escape_selector("a\\b"), "a\\\\b");
    }
}
