//! HTML report rendering.
//!
//! One page per `(source_file, parent_path)` pair, named after the parent
//! path. A page lists every line of the file; annotated lines carry a
//! score bar proportional to the line's share of the page's total delta
//! and hyperlink to the pages of the callees reached from that line. The
//! output contains nothing run-dependent, so equal indexes render to
//! byte-equal pages.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{CallPath, Finding, FindingIndex, Scalar, SearchError, SearchResult, SourceResolver};

/// Character width of the `#`/`-` score bar.
pub const BAR_WIDTH: Scalar = 25;

pub fn render_report(
    index: &FindingIndex,
    resolver: &mut SourceResolver,
    out_dir: &Path,
) -> SearchResult<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)
        .map_err(|e| SearchError::Report(format!("{}: {e}", out_dir.display())))?;

    // (depth, parent, file) keys iterate in exactly the renderer's order
    let mut pages: BTreeMap<(usize, CallPath, String), Vec<Finding>> = BTreeMap::new();
    for finding in index.depth_ordered() {
        pages
            .entry((
                finding.parent_path.depth(),
                finding.parent_path.clone(),
                finding.source_file.clone(),
            ))
            .or_default()
            .push(finding);
    }
    // the root page renders even when the search found nothing
    if let Some(root_file) = index.root_file() {
        pages
            .entry((0, CallPath::root(), root_file.to_string()))
            .or_default();
    }

    let mut written = Vec::new();
    for ((_, parent, file), findings) in &pages {
        let Some(source) = resolver.resolve(file) else {
            tracing::warn!("page for {file:?} skipped: source not found");
            continue;
        };
        let text = std::fs::read_to_string(&source)
            .map_err(|e| SearchError::Report(format!("{}: {e}", source.display())))?;
        let page = render_page(file, &text, findings);
        let out_path = out_dir.join(parent.page_name());
        std::fs::write(&out_path, page)
            .map_err(|e| SearchError::Report(format!("{}: {e}", out_path.display())))?;
        written.push(out_path);
    }
    Ok(written)
}

fn render_page(file: &str, text: &str, findings: &[Finding]) -> String {
    let mut by_line: BTreeMap<u32, Vec<&Finding>> = BTreeMap::new();
    for finding in findings {
        by_line.entry(finding.line_number).or_default().push(finding);
    }
    let total: Scalar = findings.iter().fold(0, |acc, f| acc.saturating_add(f.delta()));
    let annotated = by_line.len();

    let mut out = String::new();
    out.push_str("<html><body><kbd>gdbsearch file:");
    out.push_str(&escape(file));
    out.push_str("</kbd><br>\n");

    let mut hit = 0usize;
    for (idx, line) in text.lines().enumerate() {
        let lineno = (idx + 1) as u32;
        match by_line.get(&lineno) {
            None => {
                out.push_str("<kbd>");
                out.push_str(&bar(0));
                out.push_str(&escape_code(line));
                out.push_str("</kbd><br>\n");
            }
            Some(hits) => {
                let line_sum: Scalar = hits.iter().fold(0, |acc, f| acc.saturating_add(f.delta()));
                let score = if total > 0 {
                    (line_sum.max(0).saturating_mul(BAR_WIDTH) / total).clamp(0, BAR_WIDTH)
                } else {
                    0
                };
                let tooltip = hits
                    .iter()
                    .map(|f| format!("step {}: {} -> {}", f.step_index, f.prev_metric, f.new_metric))
                    .collect::<Vec<_>>()
                    .join(", ");

                out.push_str(&format!(
                    "<a id=\"hit{hit}\" href=\"{}\" title=\"{}\"><kbd>{}{}</kbd></a>",
                    hits[0].child_path().page_name(),
                    escape(&tooltip),
                    bar(score),
                    escape_code(line),
                ));
                for extra in &hits[1..] {
                    out.push_str(&format!(
                        " <a href=\"{}\" title=\"step {}: {} -> {}\">[{}]</a>",
                        extra.child_path().page_name(),
                        extra.step_index,
                        extra.prev_metric,
                        extra.new_metric,
                        extra.step_index,
                    ));
                }
                if hit > 0 {
                    out.push_str(&format!(" <a href=\"#hit{}\">&#8593;</a>", hit - 1));
                }
                if hit + 1 < annotated {
                    out.push_str(&format!(" <a href=\"#hit{}\">&#8595;</a>", hit + 1));
                }
                out.push_str("<br>\n");
                hit += 1;
            }
        }
    }
    out.push_str("</body></html>\n");
    out
}

fn bar(score: Scalar) -> String {
    let score = score.clamp(0, BAR_WIDTH) as usize;
    let mut s = String::with_capacity(BAR_WIDTH as usize);
    s.push_str(&"#".repeat(score));
    s.push_str(&"-".repeat(BAR_WIDTH as usize - score));
    s
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Source text keeps its column alignment inside `<kbd>`.
fn escape_code(s: &str) -> String {
    escape(s.trim_end()).replace(' ', "&nbsp;")
}
