//! Scripted debugger fakes for tests.
//!
//! A [`FakeProgram`] models a target as a tree of frames with a metric
//! delta per source line; every session it spawns replays the program from
//! its entry, which is exactly the restart-per-path contract the driver
//! relies on.

use std::cell::Cell;
use std::rc::Rc;

use crate::{
    DebuggerOps, FnProbe, MetricProbe, Pid, Scalar, SearchError, SearchResult,
};

pub const FAKE_PID: Pid = 4242;

#[derive(Debug, Clone)]
pub struct FakeStep {
    pub delta: Scalar,
    pub text: &'static str,
    pub callee: Option<FakeFrame>,
}

#[derive(Debug, Clone)]
pub struct FakeFrame {
    pub func: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub token: &'static str,
    pub steps: Vec<FakeStep>,
}

impl FakeFrame {
    pub fn new(func: &'static str, file: &'static str, line: u32, token: &'static str) -> Self {
        Self {
            func,
            file,
            line,
            token,
            steps: Vec::new(),
        }
    }

    /// A plain line: executing it adds `delta` to the metric.
    pub fn step(mut self, delta: Scalar, text: &'static str) -> Self {
        self.steps.push(FakeStep {
            delta,
            text,
            callee: None,
        });
        self
    }

    /// A call line: stepping over it adds `delta`; stepping into it enters
    /// `callee`.
    pub fn call(mut self, delta: Scalar, text: &'static str, callee: FakeFrame) -> Self {
        self.steps.push(FakeStep {
            delta,
            text,
            callee: Some(callee),
        });
        self
    }

    /// Entry-frame shorthand for tracer tests: `main` with plain steps.
    pub fn entry(file: &'static str, line: u32, steps: Vec<(Scalar, &'static str)>) -> Self {
        let mut frame = Self::new("main", file, line, "0xmain");
        for (delta, text) in steps {
            frame = frame.step(delta, text);
        }
        frame
    }
}

#[derive(Debug)]
struct FrameState {
    frame: FakeFrame,
    pos: usize,
}

/// A scripted [`DebuggerOps`] positioned at the entry of its program.
pub struct FakeSession {
    entry: Option<FakeFrame>,
    stack: Vec<FrameState>,
    metric: Rc<Cell<Scalar>>,
    tail_swap: Option<(usize, String)>,
}

impl FakeSession {
    pub fn new(entry: FakeFrame) -> Self {
        Self::with_metric(Some(entry), Rc::new(Cell::new(0)))
    }

    /// A session whose target has already exited: empty backtrace.
    pub fn exited() -> Self {
        Self::with_metric(None, Rc::new(Cell::new(0)))
    }

    fn with_metric(entry: Option<FakeFrame>, metric: Rc<Cell<Scalar>>) -> Self {
        metric.set(0);
        let stack = entry
            .clone()
            .map(|frame| vec![FrameState { frame, pos: 0 }])
            .unwrap_or_default();
        Self {
            entry,
            stack,
            metric,
            tail_swap: None,
        }
    }

    /// Shared handle to the live metric value; probes read it.
    pub fn metric(&self) -> Rc<Cell<Scalar>> {
        Rc::clone(&self.metric)
    }

    /// Make the entry frame's identity token change once more than
    /// `steps` line-steps have been taken, without changing the depth.
    pub fn replace_frame_after(&mut self, steps: usize, token: &str) {
        self.tail_swap = Some((steps, token.to_string()));
    }

    fn top(&self) -> Option<&FrameState> {
        self.stack.last()
    }

    fn frame_top(&self, idx_from_top: usize) -> String {
        let state = &self.stack[self.stack.len() - 1 - idx_from_top];
        let line = state.frame.line + state.pos as u32;
        format!(
            "#{idx_from_top}  {} () at {}:{line}",
            state.frame.func, state.frame.file
        )
    }
}

impl DebuggerOps for FakeSession {
    fn run_to_entry(&mut self) -> SearchResult<()> {
        self.metric.set(0);
        self.stack = self
            .entry
            .clone()
            .map(|frame| vec![FrameState { frame, pos: 0 }])
            .unwrap_or_default();
        Ok(())
    }

    fn query_pid(&mut self) -> SearchResult<Pid> {
        Ok(FAKE_PID)
    }

    fn backtrace(&mut self) -> SearchResult<Vec<String>> {
        Ok((0..self.stack.len()).map(|i| self.frame_top(i)).collect())
    }

    fn current_frame_address(&mut self) -> SearchResult<Option<String>> {
        let Some(top) = self.top() else {
            return Ok(None);
        };
        if self.stack.len() == 1 {
            if let Some((after, token)) = &self.tail_swap {
                if top.pos > *after {
                    return Ok(Some(token.clone()));
                }
            }
        }
        Ok(Some(top.frame.token.to_string()))
    }

    fn step_one_source_line(&mut self) -> SearchResult<String> {
        let Some(state) = self.stack.last_mut() else {
            return Ok(String::new());
        };
        if state.pos < state.frame.steps.len() {
            let step = &state.frame.steps[state.pos];
            self.metric.set(self.metric.get().saturating_add(step.delta));
            let text = step.text.to_string();
            state.pos += 1;
            Ok(text)
        } else {
            // past the last line: the frame returns
            self.stack.pop();
            Ok(String::new())
        }
    }

    fn step_into(&mut self) -> SearchResult<()> {
        let Some(state) = self.stack.last() else {
            return Err(SearchError::Protocol("step with no stack".to_string()));
        };
        let callee = state
            .frame
            .steps
            .get(state.pos)
            .and_then(|step| step.callee.clone());
        match callee {
            Some(frame) => self.stack.push(FrameState { frame, pos: 0 }),
            // no call on this line: behaves like a plain line-step
            None => {
                self.step_one_source_line()?;
            }
        }
        Ok(())
    }

    fn quit(&mut self) {
        self.stack.clear();
    }
}

/// A replayable target: every spawned session restarts it from entry.
pub struct FakeProgram {
    entry: FakeFrame,
    metric: Rc<Cell<Scalar>>,
    spawned: Rc<Cell<usize>>,
}

impl FakeProgram {
    pub fn new(entry: FakeFrame) -> Self {
        Self {
            entry,
            metric: Rc::new(Cell::new(0)),
            spawned: Rc::new(Cell::new(0)),
        }
    }

    /// How many sessions (= explored paths) were spawned so far.
    pub fn sessions_spawned(&self) -> usize {
        self.spawned.get()
    }

    pub fn probe(&self) -> impl MetricProbe {
        let metric = Rc::clone(&self.metric);
        FnProbe(move |_: &mut dyn DebuggerOps, _: Pid| -> SearchResult<Scalar> {
            Ok(metric.get())
        })
    }

    pub fn factory(&self) -> impl FnMut() -> SearchResult<Box<dyn DebuggerOps>> + '_ {
        move || {
            self.spawned.set(self.spawned.get() + 1);
            Ok(Box::new(FakeSession::with_metric(
                Some(self.entry.clone()),
                Rc::clone(&self.metric),
            )) as Box<dyn DebuggerOps>)
        }
    }
}
