//! Call paths, findings, and the persisted findings file.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::{SearchError, SearchResult};

/// A totally-ordered metric value. Deltas may be negative.
pub type Scalar = i64;

/// A sequence of step indexes addressing a function frame: starting at the
/// program entry, take `path[0]` source-line steps and one step-into, then
/// `path[1]` more steps and one step-into, and so on. The empty path is the
/// entry function itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallPath(pub Vec<usize>);

impl CallPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// The path of the callee entered at step `step` of this frame.
    pub fn child(&self, step: usize) -> Self {
        let mut v = self.0.clone();
        v.push(step);
        Self(v)
    }

    /// Deterministic page filename encoding: elements joined with `-`,
    /// brackets and whitespace stripped. The root path encodes to the bare
    /// report name.
    pub fn page_name(&self) -> String {
        let enc: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        format!("gdbsearch{}.html", enc.join("-"))
    }

    /// Parse the literal bootstrap encoding, a JSON list of lists of
    /// non-negative step indexes, e.g. `[[2], [0, 1]]`.
    pub fn parse_list(text: &str) -> SearchResult<Vec<CallPath>> {
        let parsed: Vec<Vec<usize>> = serde_json::from_str(text)
            .map_err(|e| SearchError::InvalidArgument(format!("invalid paths {text:?}: {e}")))?;
        Ok(parsed.into_iter().map(CallPath).collect())
    }
}

impl fmt::Display for CallPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{step}")?;
        }
        write!(f, "]")
    }
}

/// One measurement taken while stepping a frame. The first sample of a
/// frame carries an empty `source_line`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSample {
    pub frame_top: String,
    pub metric: Scalar,
    pub source_line: String,
}

/// A source line whose measurement delta satisfied the predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub source_file: String,
    pub line_number: u32,
    pub prev_metric: Scalar,
    pub new_metric: Scalar,
    pub parent_path: CallPath,
    pub step_index: usize,
}

impl Finding {
    pub fn delta(&self) -> Scalar {
        self.new_metric.saturating_sub(self.prev_metric)
    }

    /// The path enqueued for the callee reached from this line.
    pub fn child_path(&self) -> CallPath {
        self.parent_path.child(self.step_index)
    }
}

/// Findings keyed by file and, in parallel, ordered the way the renderer
/// consumes them: one page per `(source_file, parent_path)` pair, pages in
/// `(depth, parent_path, source_file)` order, lines ascending within a page.
#[derive(Debug, Clone, Default)]
pub struct FindingIndex {
    by_file: BTreeMap<String, Vec<Finding>>,
    ordered: Vec<Finding>,
    root_file: Option<String>,
}

impl FindingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, finding: Finding) {
        self.by_file
            .entry(finding.source_file.clone())
            .or_default()
            .push(finding.clone());
        self.ordered.push(finding);
    }

    /// Remember the entry function's file so the root page renders even
    /// when the search produced no findings at all.
    pub fn set_root_file(&mut self, file: &str) {
        if self.root_file.is_none() {
            self.root_file = Some(file.to_string());
        }
    }

    pub fn root_file(&self) -> Option<&str> {
        self.root_file.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn for_file(&self, file: &str) -> &[Finding] {
        self.by_file.get(file).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All findings sorted by `(depth, parent_path, source_file,
    /// line_number, step_index)`.
    pub fn depth_ordered(&self) -> Vec<Finding> {
        let mut out = self.ordered.clone();
        out.sort_by(|a, b| {
            (a.parent_path.depth(), &a.parent_path, &a.source_file, a.line_number, a.step_index)
                .cmp(&(b.parent_path.depth(), &b.parent_path, &b.source_file, b.line_number, b.step_index))
        });
        out
    }
}

pub const FINDINGS_FORMAT: &str = "gdbsearch-findings";
pub const FINDINGS_VERSION: u32 = 1;

/// The raw findings file written by `-d` and reloaded by `-l`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFindings {
    pub format: String,
    pub version: u32,
    pub root_file: Option<String>,
    pub entries: Vec<Finding>,
}

impl RawFindings {
    pub fn from_index(index: &FindingIndex) -> Self {
        Self {
            format: FINDINGS_FORMAT.to_string(),
            version: FINDINGS_VERSION,
            root_file: index.root_file().map(str::to_string),
            entries: index.depth_ordered(),
        }
    }

    pub fn into_index(self) -> SearchResult<FindingIndex> {
        if self.format != FINDINGS_FORMAT {
            return Err(SearchError::InvalidArgument(format!(
                "unexpected findings format {:?}",
                self.format
            )));
        }
        if self.version != FINDINGS_VERSION {
            return Err(SearchError::InvalidArgument(format!(
                "unsupported findings version {} (expected {FINDINGS_VERSION})",
                self.version
            )));
        }
        let mut index = FindingIndex::new();
        if let Some(file) = &self.root_file {
            index.set_root_file(file);
        }
        for finding in self.entries {
            index.push(finding);
        }
        Ok(index)
    }

    pub fn write_json(&self, path: &Path) -> SearchResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> SearchResult<Self> {
        let bytes = std::fs::read(path)?;
        let raw: RawFindings = serde_json::from_slice(&bytes)?;
        Ok(raw)
    }
}
