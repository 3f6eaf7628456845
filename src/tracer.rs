//! Single-stepping a frame while sampling the metric.

use crate::{dialect, DebuggerOps, FrameSample, MetricProbe, Pid, SearchResult};

/// Step through the current function, sampling the probe after every
/// source line, until the frame is left.
///
/// Exit is detected by backtrace depth (a return), by frame-identity
/// change at equal depth (a tail-call-like replacement), or by the
/// backtrace vanishing (the target exited). A one-line function yields
/// exactly the initial sample.
pub fn trace_frame(
    session: &mut dyn DebuggerOps,
    probe: &dyn MetricProbe,
    pid: Pid,
) -> SearchResult<Vec<FrameSample>> {
    let bt0 = session.backtrace()?;
    let Some(top0) = bt0.first().cloned() else {
        return Ok(Vec::new());
    };
    let frame0 = session.current_frame_address()?;
    tracing::debug!("inspecting: {}", dialect::frame_prefix(&top0));

    let mut samples = vec![FrameSample {
        frame_top: top0,
        metric: probe.sample(session, pid)?,
        source_line: String::new(),
    }];

    loop {
        let line = session.step_one_source_line()?;
        let bt = session.backtrace()?;
        let top = match bt.first() {
            Some(top) if bt.len() == bt0.len() => top.clone(),
            _ => break, // returned, or no stack left
        };
        if session.current_frame_address()? != frame0 {
            break; // same depth, different frame
        }
        samples.push(FrameSample {
            frame_top: top,
            metric: probe.sample(session, pid)?,
            source_line: line,
        });
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeFrame, FakeSession, FAKE_PID};
    use crate::{FnProbe, Scalar, SearchError};

    fn live_probe(session: &FakeSession) -> impl MetricProbe {
        let metric = session.metric();
        FnProbe(move |_: &mut dyn DebuggerOps, _: Pid| -> SearchResult<Scalar> {
            Ok(metric.get())
        })
    }

    #[test]
    fn samples_every_line_until_return() {
        let mut session = FakeSession::new(FakeFrame::entry(
            "demo.c",
            3,
            vec![(0, "  int x = 0;"), (10, "  grow();"), (10, "  return 0;")],
        ));
        let probe = live_probe(&session);
        let samples = trace_frame(&mut session, &probe, FAKE_PID).expect("trace");

        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0].source_line, "");
        assert_eq!(samples[0].metric, 0);
        assert_eq!(samples[1].metric, 0);
        assert_eq!(samples[2].metric, 10);
        assert_eq!(samples[3].metric, 20);
        assert_eq!(samples[1].source_line, "  int x = 0;");
        // every sample came from the frame under study
        for s in &samples {
            assert!(s.frame_top.starts_with("#0  main ()"));
        }
    }

    #[test]
    fn one_line_function_yields_only_the_initial_sample() {
        let mut session = FakeSession::new(FakeFrame::entry("demo.c", 3, vec![]));
        let probe = live_probe(&session);
        let samples = trace_frame(&mut session, &probe, FAKE_PID).expect("trace");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].source_line, "");
    }

    #[test]
    fn frame_identity_change_at_equal_depth_stops_the_trace() {
        let mut session = FakeSession::new(FakeFrame::entry(
            "demo.c",
            3,
            vec![(0, "  a();"), (0, "  b();")],
        ));
        session.replace_frame_after(1, "0xother");
        let probe = live_probe(&session);
        let samples = trace_frame(&mut session, &probe, FAKE_PID).expect("trace");
        // the step that replaced the frame is not sampled
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn probe_failure_propagates() {
        let failing = FnProbe(|_: &mut dyn DebuggerOps, _: Pid| -> SearchResult<Scalar> {
            Err(SearchError::ProbeUnavailable("gone".to_string()))
        });
        let mut session =
            FakeSession::new(FakeFrame::entry("demo.c", 3, vec![(0, "  int x = 0;")]));
        let err = trace_frame(&mut session, &failing, FAKE_PID).expect_err("probe down");
        assert!(matches!(err, SearchError::ProbeUnavailable(_)));
    }

    #[test]
    fn empty_backtrace_yields_no_samples() {
        let mut session = FakeSession::exited();
        let probe = live_probe(&session);
        let samples = trace_frame(&mut session, &probe, FAKE_PID).expect("trace");
        assert!(samples.is_empty());
    }
}
