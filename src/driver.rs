//! The search loop: a FIFO queue of call paths, one debugger run each.

use std::collections::VecDeque;

use crate::{
    dialect, trace_frame, CallPath, Config, DebuggerOps, Finding, FindingIndex, MetricProbe,
    Predicate, SearchResult, SourceResolver,
};

/// Process-wide search state, constructed once and threaded through the
/// driver instead of living in globals.
pub struct SearchContext {
    pub config: Config,
    pub resolver: SourceResolver,
    pub index: FindingIndex,
}

impl SearchContext {
    pub fn new(config: Config) -> Self {
        let resolver = SourceResolver::new(config.source_dirs.clone());
        Self {
            config,
            resolver,
            index: FindingIndex::new(),
        }
    }
}

/// Spawns one fresh debugger per explored path.
pub type SessionFactory<'a> = dyn FnMut() -> SearchResult<Box<dyn DebuggerOps>> + 'a;

pub struct SearchDriver<'a> {
    probe: &'a dyn MetricProbe,
    predicate: &'a Predicate,
    queue: VecDeque<CallPath>,
}

impl<'a> SearchDriver<'a> {
    pub fn new(
        probe: &'a dyn MetricProbe,
        predicate: &'a Predicate,
        initial_paths: Vec<CallPath>,
    ) -> Self {
        Self {
            probe,
            predicate,
            queue: initial_paths.into(),
        }
    }

    /// Drain the queue. Children enqueue FIFO, so a whole generation is
    /// explored before any of its descendants. A path that fails is
    /// abandoned without committing anything; only a failure to spawn the
    /// debugger at all aborts the search.
    pub fn run(&mut self, ctx: &mut SearchContext, factory: &mut SessionFactory) -> SearchResult<()> {
        while let Some(path) = self.queue.pop_front() {
            tracing::info!("exploring path {path}");
            let mut session = factory()?;
            match self.explore(ctx, session.as_mut(), &path) {
                Ok(()) => {}
                Err(err) => tracing::warn!("path {path} abandoned: {err}"),
            }
            session.quit();
        }
        tracing::info!("all interesting paths examined");
        Ok(())
    }

    fn explore(
        &mut self,
        ctx: &mut SearchContext,
        session: &mut dyn DebuggerOps,
        path: &CallPath,
    ) -> SearchResult<()> {
        session.run_to_entry()?;
        let pid = session.query_pid()?;

        if path.is_root() {
            // remember the entry file so the root page renders even when
            // nothing fires
            if let Some(top) = session.backtrace()?.first() {
                if let Some((file, _)) = dialect::frame_location(top) {
                    ctx.index.set_root_file(&file);
                }
            }
        }

        if !self.walk_to_frame(session, path)? {
            return Ok(());
        }

        let samples = trace_frame(session, self.probe, pid)?;
        for (k, pair) in samples.windows(2).enumerate() {
            let (prev, curr) = (&pair[0], &pair[1]);
            if !self.predicate.holds(curr.metric, prev.metric) {
                continue;
            }
            tracing::info!(
                "{} -> {} {} {}",
                prev.metric,
                curr.metric,
                curr.frame_top,
                curr.source_line
            );
            let Some((file, line_number)) = dialect::frame_location(&curr.frame_top) else {
                tracing::warn!("no FILE:LINE in frame top {:?}; finding skipped", curr.frame_top);
                continue;
            };
            if ctx.resolver.resolve(&file).is_none() {
                continue;
            }
            ctx.index.push(Finding {
                source_file: file,
                line_number,
                prev_metric: prev.metric,
                new_metric: curr.metric,
                parent_path: path.clone(),
                step_index: k,
            });
            self.queue.push_back(path.child(k));
        }
        Ok(())
    }

    /// Navigate from the entry to the frame the path addresses: for each
    /// index, that many line-steps and one step-into, verified to have
    /// actually descended. Returns false when a descent fails and the
    /// path is to be abandoned.
    fn walk_to_frame(
        &self,
        session: &mut dyn DebuggerOps,
        path: &CallPath,
    ) -> SearchResult<bool> {
        for &steps in &path.0 {
            for _ in 0..steps {
                session.step_one_source_line()?;
            }
            let before = session.backtrace()?;
            session.step_into()?;
            let after = session.backtrace()?;
            let descended = match (before.first(), after.first()) {
                (Some(b), Some(a)) => !a.starts_with(dialect::frame_prefix(b)),
                _ => false,
            };
            if !descended {
                tracing::warn!("unresolved descent along path {path}; abandoning");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeFrame, FakeProgram};
    use crate::SearchError;

    /// Put the program's sources on disk so the resolver accepts them;
    /// returns the directory to configure as a search dir.
    fn materialize_sources(files: &[&str]) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "gdbsearch-driver-{}",
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).expect("mkdir");
        for name in files {
            let body: String = (1..=20).map(|i| format!("line {i}\n")).collect();
            std::fs::write(dir.join(name), body).expect("write");
        }
        dir
    }

    fn run_with_sources(
        program: &FakeProgram,
        predicate: Predicate,
        files: &[&str],
    ) -> SearchContext {
        let dir = materialize_sources(files);
        let config = Config {
            source_dirs: vec![dir],
            ..Config::default()
        };
        let mut ctx = SearchContext::new(config);
        let probe = program.probe();
        let mut driver = SearchDriver::new(&probe, &predicate, vec![CallPath::root()]);
        let mut factory = program.factory();
        driver.run(&mut ctx, &mut factory).expect("search");
        ctx
    }

    #[test]
    fn noop_program_drains_after_one_path() {
        // nothing measurable happens in the entry function
        let program = FakeProgram::new(FakeFrame::entry(
            "demo.c",
            3,
            vec![(0, "  int x = 0;"), (0, "  return 0;")],
        ));
        let ctx = run_with_sources(&program, Predicate::default(), &["demo.c"]);

        assert!(ctx.index.is_empty());
        assert_eq!(ctx.index.root_file(), Some("demo.c"));
        assert_eq!(program.sessions_spawned(), 1);
    }

    #[test]
    fn single_hit_descends_into_the_library_routine() {
        // one call whose single line moves the metric 0 -> 100
        let callee = FakeFrame::new("lib_grow", "lib.c", 7, "0xlib")
            .step(100, "  buf = malloc(BIG);");
        let program = FakeProgram::new(
            FakeFrame::new("main", "demo.c", 3, "0xmain")
                .call(100, "  lib_grow();", callee)
                .step(0, "  return 0;"),
        );
        let ctx = run_with_sources(&program, Predicate::default(), &["demo.c", "lib.c"]);

        let ordered = ctx.index.depth_ordered();
        assert_eq!(ordered.len(), 2);

        assert_eq!(ordered[0].source_file, "demo.c");
        assert_eq!(ordered[0].parent_path, CallPath::root());
        assert_eq!(ordered[0].step_index, 0);
        assert_eq!((ordered[0].prev_metric, ordered[0].new_metric), (0, 100));

        assert_eq!(ordered[1].source_file, "lib.c");
        // the sample is taken after the step, one line past the hit
        assert_eq!(ordered[1].line_number, 8);
        assert_eq!(ordered[1].parent_path, CallPath(vec![0]));
        assert_eq!((ordered[1].prev_metric, ordered[1].new_metric), (0, 100));

        // root, [0], and the abandoned [0, 0]
        assert_eq!(program.sessions_spawned(), 3);
    }

    #[test]
    fn threshold_predicate_selects_only_the_large_delta() {
        // +50 at step 2, +200 at step 5, predicate n > p + 100
        let program = FakeProgram::new(FakeFrame::entry(
            "demo.c",
            3,
            vec![
                (0, "  a;"),
                (0, "  b;"),
                (50, "  small();"),
                (0, "  c;"),
                (0, "  d;"),
                (200, "  big();"),
            ],
        ));
        let predicate = Predicate::parse("n > p + 100").expect("parse");
        let ctx = run_with_sources(&program, predicate, &["demo.c"]);

        let ordered = ctx.index.depth_ordered();
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].step_index, 5);
        assert_eq!((ordered[0].prev_metric, ordered[0].new_metric), (50, 250));
        // the enqueued child path was explored (and abandoned: no callee)
        assert_eq!(program.sessions_spawned(), 2);
    }

    #[test]
    fn unresolved_source_records_parent_finding_but_never_descends_further() {
        // the callee lives in a file the resolver cannot locate
        let callee = FakeFrame::new("ghost_fn", "ghost.c", 9, "0xghost")
            .step(100, "  leak();")
            .call(100, "  deeper();", FakeFrame::new("deep", "deep.c", 2, "0xdeep"));
        let program = FakeProgram::new(
            FakeFrame::new("main", "demo.c", 3, "0xmain").call(200, "  ghost_fn();", callee),
        );
        // only demo.c is materialized; ghost.c and deep.c stay unresolved
        let ctx = run_with_sources(&program, Predicate::default(), &["demo.c"]);

        let ordered = ctx.index.depth_ordered();
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].source_file, "demo.c");
        // the ghost frame was explored, but none of its hits were recorded
        // and nothing below it was enqueued
        assert_eq!(program.sessions_spawned(), 2);
    }

    #[test]
    fn failed_descent_abandons_path_but_keeps_parent_finding() {
        // the delta fires on a plain line, so the enqueued child path
        // cannot descend
        let program = FakeProgram::new(FakeFrame::entry(
            "demo.c",
            3,
            vec![(100, "  x = malloc(BIG);"), (0, "  return 0;")],
        ));
        let ctx = run_with_sources(&program, Predicate::default(), &["demo.c"]);

        let ordered = ctx.index.depth_ordered();
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].parent_path, CallPath::root());
        assert_eq!(program.sessions_spawned(), 2);
    }

    #[test]
    fn prefix_closure_holds_over_the_index() {
        // every non-root parent path in the index is a recorded child of
        // its own parent
        let inner = FakeFrame::new("inner", "inner.c", 4, "0xinner").step(30, "  grow();");
        let outer = FakeFrame::new("outer", "outer.c", 10, "0xouter")
            .step(0, "  setup();")
            .call(30, "  inner();", inner);
        let program = FakeProgram::new(
            FakeFrame::new("main", "demo.c", 3, "0xmain").call(30, "  outer();", outer),
        );
        let ctx =
            run_with_sources(&program, Predicate::default(), &["demo.c", "outer.c", "inner.c"]);

        let ordered = ctx.index.depth_ordered();
        assert_eq!(ordered.len(), 3);
        for finding in &ordered {
            if finding.parent_path.is_root() {
                continue;
            }
            let mut parent = finding.parent_path.0.clone();
            let step = parent.pop().expect("non-root");
            let grandparent = CallPath(parent);
            assert!(ordered
                .iter()
                .any(|f| f.parent_path == grandparent && f.step_index == step));
        }
    }

    #[test]
    fn initial_paths_bootstrap_the_queue() {
        let callee = FakeFrame::new("lib_grow", "lib.c", 7, "0xlib")
            .step(100, "  buf = malloc(BIG);");
        let program = FakeProgram::new(
            FakeFrame::new("main", "demo.c", 3, "0xmain")
                .step(0, "  setup();")
                .call(100, "  lib_grow();", callee),
        );
        let dir = materialize_sources(&["demo.c", "lib.c"]);
        let config = Config {
            source_dirs: vec![dir],
            ..Config::default()
        };
        let mut ctx = SearchContext::new(config);
        let probe = program.probe();
        let predicate = Predicate::default();
        // skip the root generation and start inside lib_grow
        let mut driver = SearchDriver::new(&probe, &predicate, vec![CallPath(vec![1])]);
        let mut factory = program.factory();
        driver.run(&mut ctx, &mut factory).expect("search");

        let ordered = ctx.index.depth_ordered();
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].source_file, "lib.c");
        assert_eq!(ordered[0].parent_path, CallPath(vec![1]));
        // no root path processed, so no root file was registered
        assert_eq!(ctx.index.root_file(), None);
    }

    #[test]
    fn spawn_failure_aborts_the_search() {
        let mut ctx = SearchContext::new(Config::default());
        let probe = crate::FnProbe(
            |_: &mut dyn DebuggerOps, _: crate::Pid| -> SearchResult<crate::Scalar> { Ok(0) },
        );
        let predicate = Predicate::default();
        let mut driver = SearchDriver::new(&probe, &predicate, vec![CallPath::root()]);
        let mut factory = || -> SearchResult<Box<dyn DebuggerOps>> {
            Err(SearchError::SpawnFailed("gdb: not found".to_string()))
        };
        let err = driver.run(&mut ctx, &mut factory).expect_err("spawn fails");
        assert!(matches!(err, SearchError::SpawnFailed(_)));
    }

    #[test]
    fn probe_failure_abandons_the_path_and_search_completes() {
        let program = FakeProgram::new(FakeFrame::entry(
            "demo.c",
            3,
            vec![(100, "  x = malloc(BIG);")],
        ));
        let mut ctx = SearchContext::new(Config::default());
        let probe = crate::FnProbe(
            |_: &mut dyn DebuggerOps, _: crate::Pid| -> SearchResult<crate::Scalar> {
                Err(SearchError::ProbeUnavailable("io file gone".to_string()))
            },
        );
        let predicate = Predicate::default();
        let mut driver = SearchDriver::new(&probe, &predicate, vec![CallPath::root()]);
        let mut factory = program.factory();
        driver.run(&mut ctx, &mut factory).expect("search completes");
        assert!(ctx.index.is_empty());
    }
}
