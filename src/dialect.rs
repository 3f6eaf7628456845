//! Textual contract with the external debugger.
//!
//! Everything that depends on the exact shape of gdb's output lives here:
//! the prompt marker, the command vocabulary, and the parsers for the few
//! replies the driver actually interprets. Targeting another line-oriented
//! debugger (or gdb/MI) should only ever touch this module.

/// The distinguished line the debugger emits when ready for a command.
pub const PROMPT: &str = "(gdb) ";

pub const CMD_BREAK_ENTRY: &str = "break main";
pub const CMD_RUN: &str = "run";
pub const CMD_INFO_PROC: &str = "info proc";
pub const CMD_BACKTRACE: &str = "bt";
pub const CMD_NEXT: &str = "next";
pub const CMD_STEP: &str = "step";
pub const CMD_FINISH: &str = "finish";
pub const CMD_INFO_FRAME: &str = "info frame";
pub const CMD_QUIT: &str = "quit";
pub const CMD_CONFIRM: &str = "y";

/// Does this reply line confirm that the entry breakpoint was planted?
pub fn breakpoint_confirmed(line: &str) -> bool {
    line.starts_with("Breakpoint 1 at")
}

/// Parse the target pid out of an `info proc` reply.
///
/// gdb answers with a block whose first line reads `process <pid>`.
pub fn parse_pid(lines: &[String]) -> Option<u32> {
    let first = lines.first()?;
    let rest = first.strip_prefix("process ")?;
    rest.split_whitespace().next()?.parse().ok()
}

/// Parse the frame token out of an `info frame` reply.
///
/// The first line reads `Stack level N, frame at 0x...:`; the address is
/// stable for the lifetime of the frame and distinguishes frames at equal
/// backtrace depth.
pub fn parse_frame_token(lines: &[String]) -> Option<String> {
    for line in lines {
        if let Some(idx) = line.find("frame at ") {
            let rest = &line[idx + "frame at ".len()..];
            let token = rest.trim_end().trim_end_matches(':');
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    None
}

/// Split a backtrace top line into `(file, line)` from its trailing
/// `" at FILE:LINE"` form.
pub fn frame_location(frame_top: &str) -> Option<(String, u32)> {
    let (_, loc) = frame_top.rsplit_once(" at ")?;
    let (file, row) = loc.trim().rsplit_once(':')?;
    let row: u32 = row.trim().parse().ok()?;
    if file.is_empty() {
        return None;
    }
    Some((file.to_string(), row))
}

/// The frame-identity prefix used to detect a step-into that did not
/// actually descend: everything before the first colon of the frame top.
pub fn frame_prefix(frame_top: &str) -> &str {
    match frame_top.split_once(':') {
        Some((prefix, _)) => prefix,
        None => frame_top,
    }
}
