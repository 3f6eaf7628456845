//! Metric probes.
//!
//! A probe reads one scalar characteristic of the stopped target without
//! perturbing it. The reference probes read `/proc/<pid>` counters; the
//! session handle is part of the contract so a probe may also interrogate
//! the debugger itself.

use std::collections::BTreeMap;
use std::path::Path;

use crate::{DebuggerOps, Pid, Scalar, SearchError, SearchResult};

pub trait MetricProbe {
    fn sample(&self, session: &mut dyn DebuggerOps, pid: Pid) -> SearchResult<Scalar>;
}

/// Adapter turning a plain closure into a [`MetricProbe`].
pub struct FnProbe<F>(pub F);

impl<F> MetricProbe for FnProbe<F>
where
    F: Fn(&mut dyn DebuggerOps, Pid) -> SearchResult<Scalar>,
{
    fn sample(&self, session: &mut dyn DebuggerOps, pid: Pid) -> SearchResult<Scalar> {
        (self.0)(session, pid)
    }
}

/// A `/proc`-reading probe. Ignores the session handle.
#[derive(Debug, Clone, Copy)]
pub struct ProcProbe {
    pub name: &'static str,
    read: fn(Pid) -> SearchResult<Scalar>,
}

impl MetricProbe for ProcProbe {
    fn sample(&self, _session: &mut dyn DebuggerOps, pid: Pid) -> SearchResult<Scalar> {
        (self.read)(pid)
    }
}

pub const DEFAULT_PROBE: &str = "private_mem";

/// The name-keyed probe registry, built once at startup.
pub fn registry() -> BTreeMap<&'static str, ProcProbe> {
    let probes = [
        ProcProbe { name: "private_dirty", read: private_dirty },
        ProcProbe { name: "private_mem", read: private_mem },
        ProcProbe { name: "io_rchar", read: io_rchar },
        ProcProbe { name: "io_wchar", read: io_wchar },
        ProcProbe { name: "fd_count", read: fd_count },
    ];
    probes.into_iter().map(|p| (p.name, p)).collect()
}

fn private_dirty(pid: Pid) -> SearchResult<Scalar> {
    sum_integer_fields(Path::new(&format!("/proc/{pid}/smaps")), "Private_Dirty:", 1)
}

fn private_mem(pid: Pid) -> SearchResult<Scalar> {
    sum_integer_fields(Path::new(&format!("/proc/{pid}/smaps")), "Private_", 1)
}

fn io_rchar(pid: Pid) -> SearchResult<Scalar> {
    sum_integer_fields(Path::new(&format!("/proc/{pid}/io")), "rchar:", 1)
}

fn io_wchar(pid: Pid) -> SearchResult<Scalar> {
    sum_integer_fields(Path::new(&format!("/proc/{pid}/io")), "wchar:", 1)
}

fn fd_count(pid: Pid) -> SearchResult<Scalar> {
    let dir = format!("/proc/{pid}/fd");
    let entries = std::fs::read_dir(&dir)
        .map_err(|e| SearchError::ProbeUnavailable(format!("{dir}: {e}")))?;
    let mut count: Scalar = 0;
    for entry in entries {
        entry.map_err(|e| SearchError::ProbeUnavailable(format!("{dir}: {e}")))?;
        count = count.saturating_add(1);
    }
    Ok(count)
}

/// Sum field `field_index` of every line starting with `line_prefix`.
fn sum_integer_fields(path: &Path, line_prefix: &str, field_index: usize) -> SearchResult<Scalar> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SearchError::ProbeUnavailable(format!("{}: {e}", path.display())))?;
    let mut total: Scalar = 0;
    for line in text.lines() {
        if !line.starts_with(line_prefix) {
            continue;
        }
        let field = line.split_whitespace().nth(field_index).ok_or_else(|| {
            SearchError::ProbeUnavailable(format!(
                "{}: missing field {field_index} in {line:?}",
                path.display()
            ))
        })?;
        let value: Scalar = field.parse().map_err(|_| {
            SearchError::ProbeUnavailable(format!(
                "{}: non-numeric field {field:?} in {line:?}",
                path.display()
            ))
        })?;
        total = total.saturating_add(value);
    }
    Ok(total)
}
