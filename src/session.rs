//! Debugger subprocess driving.
//!
//! The debugger is spawned through the shell with piped stdin/stdout and
//! driven synchronously: every command blocks until the prompt marker is
//! read back or the idle timeout elapses. A dedicated reader thread pumps
//! stdout chunks over a channel so the timeout can be enforced with
//! `recv_timeout`; nothing else runs concurrently.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::{dialect, Config, SearchError, SearchResult};

pub type Pid = u32;

/// The operations the search needs from a positioned debugger. The one
/// production implementation is [`DebuggerSession`]; tests drive the
/// tracer and driver with scripted fakes.
pub trait DebuggerOps {
    /// Plant a breakpoint at the program entry and run to it.
    fn run_to_entry(&mut self) -> SearchResult<()>;

    /// The pid of the debugged process.
    fn query_pid(&mut self) -> SearchResult<Pid>;

    /// Stack frames, outermost last. Empty when the target is not running.
    fn backtrace(&mut self) -> SearchResult<Vec<String>>;

    /// A stable identity token for the current frame, when one exists.
    fn current_frame_address(&mut self) -> SearchResult<Option<String>>;

    /// Advance one source line, auto-finishing any frames entered on the
    /// way. Returns the last non-prompt reply line (usually the source
    /// text of the line now stopped at; may be empty).
    fn step_one_source_line(&mut self) -> SearchResult<String>;

    /// Advance exactly one step, entering any call taken.
    fn step_into(&mut self) -> SearchResult<()>;

    /// Terminate the session. Quiet: never fails.
    fn quit(&mut self);
}

// A step that enters a recursive chain could otherwise finish forever.
const MAX_FINISH_PER_STEP: usize = 64;

pub struct DebuggerSession {
    child: Child,
    rx: Receiver<Vec<u8>>,
    reply_timeout: Duration,
    run_timeout: Duration,
}

impl DebuggerSession {
    /// Spawn `command` through the shell and consume the initial prompt.
    pub fn start(command: &str, config: &Config) -> SearchResult<Self> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| SearchError::SpawnFailed(format!("{command}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SearchError::SpawnFailed(format!("{command}: no stdout pipe")))?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut stdout = stdout;
            let mut buf = [0u8; 4096];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut session = Self {
            child,
            rx,
            reply_timeout: Duration::from_millis(config.reply_timeout_ms),
            run_timeout: Duration::from_millis(config.run_timeout_ms),
        };
        let greeting = session.read_reply(session.reply_timeout);
        expect_prompt(&greeting)?;
        Ok(session)
    }

    fn send(&mut self, command: &str) -> SearchResult<()> {
        let stdin = self
            .child
            .stdin
            .as_mut()
            .ok_or_else(|| SearchError::Protocol("debugger stdin closed".to_string()))?;
        stdin
            .write_all(command.as_bytes())
            .and_then(|()| stdin.write_all(b"\n"))
            .and_then(|()| stdin.flush())
            .map_err(|e| SearchError::Protocol(format!("write {command:?}: {e}")))?;
        Ok(())
    }

    /// Read lines until the prompt marker is seen or the channel stays
    /// idle for `timeout`. On timeout the partial buffer is returned and
    /// the caller's prompt assertion fails.
    fn read_reply(&mut self, timeout: Duration) -> Vec<String> {
        let mut lines = Vec::new();
        let mut partial = String::new();

        while partial != dialect::PROMPT {
            match self.rx.recv_timeout(timeout) {
                Ok(chunk) => consume(&chunk, &mut lines, &mut partial),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        if !partial.is_empty() {
            lines.push(partial);
        }
        lines
    }

    /// Send a command and collect its prompt-terminated reply.
    fn roundtrip(&mut self, command: &str, timeout: Duration) -> SearchResult<Vec<String>> {
        self.send(command)?;
        let reply = self.read_reply(timeout);
        expect_prompt(&reply)?;
        Ok(reply)
    }
}

fn consume(chunk: &[u8], lines: &mut Vec<String>, partial: &mut String) {
    for &byte in chunk {
        if byte == b'\n' {
            lines.push(std::mem::take(partial));
        } else {
            partial.push(byte as char);
        }
    }
}

fn expect_prompt(reply: &[String]) -> SearchResult<()> {
    match reply.last() {
        Some(last) if last.starts_with(dialect::PROMPT.trim_end()) => Ok(()),
        _ => Err(SearchError::NoPrompt(reply.join("\n"))),
    }
}

/// All reply lines except the trailing prompt.
fn body(reply: &[String]) -> &[String] {
    match reply.last() {
        Some(last) if last.starts_with(dialect::PROMPT.trim_end()) => &reply[..reply.len() - 1],
        _ => reply,
    }
}

/// The last reply line before the prompt, or empty when there is none.
fn last_body_line(reply: &[String]) -> String {
    body(reply).last().cloned().unwrap_or_default()
}

impl DebuggerOps for DebuggerSession {
    fn run_to_entry(&mut self) -> SearchResult<()> {
        self.send(dialect::CMD_BREAK_ENTRY)?;
        let reply = self.read_reply(self.reply_timeout);
        match reply.first() {
            Some(first) if dialect::breakpoint_confirmed(first) => {}
            _ => return Err(SearchError::EntryBreakpointFailed(reply.join("\n"))),
        }
        expect_prompt(&reply)?;

        self.send(dialect::CMD_RUN)?;
        let reply = self.read_reply(self.run_timeout);
        expect_prompt(&reply)?;
        Ok(())
    }

    fn query_pid(&mut self) -> SearchResult<Pid> {
        let reply = self.roundtrip(dialect::CMD_INFO_PROC, self.reply_timeout)?;
        dialect::parse_pid(body(&reply))
            .ok_or_else(|| SearchError::PidUnparseable(reply.join("\n")))
    }

    fn backtrace(&mut self) -> SearchResult<Vec<String>> {
        let reply = self.roundtrip(dialect::CMD_BACKTRACE, self.reply_timeout)?;
        Ok(body(&reply).to_vec())
    }

    fn current_frame_address(&mut self) -> SearchResult<Option<String>> {
        let reply = self.roundtrip(dialect::CMD_INFO_FRAME, self.reply_timeout)?;
        Ok(dialect::parse_frame_token(body(&reply)))
    }

    fn step_one_source_line(&mut self) -> SearchResult<String> {
        let depth0 = self.backtrace()?.len();
        let reply = self.roundtrip(dialect::CMD_NEXT, self.reply_timeout)?;
        let mut line = last_body_line(&reply);

        // A breakpoint inside a callee can leave us below the starting
        // frame; finish frames until we are back at the starting depth.
        for _ in 0..MAX_FINISH_PER_STEP {
            if self.backtrace()?.len() <= depth0 {
                return Ok(line);
            }
            let reply = self.roundtrip(dialect::CMD_FINISH, self.reply_timeout)?;
            line = last_body_line(&reply);
        }
        Err(SearchError::Protocol(format!(
            "frame depth did not return to {depth0} after {MAX_FINISH_PER_STEP} finishes"
        )))
    }

    fn step_into(&mut self) -> SearchResult<()> {
        self.roundtrip(dialect::CMD_STEP, self.reply_timeout)?;
        Ok(())
    }

    fn quit(&mut self) {
        // gdb may ask for confirmation; answer it and move on
        let _ = self.send(dialect::CMD_QUIT);
        let _ = self.send(dialect::CMD_CONFIRM);
        self.child.stdin.take();
    }
}

impl Drop for DebuggerSession {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
