use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

const MAX_LOG_CHARS: usize = 2048;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<OsString>,
    pub envs: Vec<(String, String)>,
    pub capture_stdout: bool,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn capture_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for a in &self.args {
            out.push(' ');
            out.push_str(&a.to_string_lossy());
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: i32,
    // empty unless `capture_stdout` was set
    pub stdout: String,
}

pub trait ToolInvoker: Send + Sync {
    // A non-zero exit must come back as a process error carrying the code.
    fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemInvoker {
    timeout: Option<Duration>,
}

enum StreamMsg {
    Line(String),
    Captured(Vec<u8>),
}

impl SystemInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl ToolInvoker for SystemInvoker {
    fn run(&self, tool: &ToolCommand) -> Result<ToolOutput> {
        let shown = tool.display();
        tracing::debug!(command = %shown, "running");

        let mut cmd = Command::new(&tool.program);
        cmd.args(&tool.args);
        for (k, v) in &tool.envs {
            cmd.env(k, v);
        }

        // Own process group, so a timeout can take down the whole subtree.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::io(format!("failed to spawn {}: {e}", tool.program)))?;
        let pgid = child.id();

        let (tx, rx) = mpsc::channel::<StreamMsg>();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            let capture = tool.capture_stdout;
            std::thread::spawn(move || forward_stream(out, capture, tx));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            std::thread::spawn(move || forward_stream(err, false, tx));
        }
        drop(tx);

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut captured = Vec::new();
        let mut timed_out = false;
        loop {
            let msg = match deadline {
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(left) {
                        Ok(m) => m,
                        Err(RecvTimeoutError::Timeout) => {
                            timed_out = true;
                            break;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match rx.recv() {
                    Ok(m) => m,
                    Err(_) => break,
                },
            };
            match msg {
                StreamMsg::Line(line) => {
                    let line = sanitize_line(&line);
                    if !line.is_empty() {
                        tracing::debug!(tool = %tool.program, "{line}");
                    }
                }
                StreamMsg::Captured(bytes) => captured = bytes,
            }
        }

        if !timed_out {
            timed_out = !wait_until(&mut child, deadline)?;
        }
        if timed_out {
            kill_pgroup(pgid);
            let _ = child.wait();
            let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
            return Err(Error::process(
                shown,
                None,
                format!("command timed out after {secs}s"),
            ));
        }

        let status = child
            .wait()
            .map_err(|e| Error::io(format!("wait failed for {}: {e}", tool.program)))?;
        if !status.success() {
            return Err(Error::process(shown, status.code(), "command failed"));
        }
        Ok(ToolOutput {
            code: status.code().unwrap_or_default(),
            stdout: String::from_utf8_lossy(&captured).into_owned(),
        })
    }
}

// Returns false when the deadline passed before the child exited.
fn wait_until(child: &mut Child, deadline: Option<Instant>) -> Result<bool> {
    let Some(deadline) = deadline else {
        return Ok(true);
    };
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return Ok(true),
            Ok(None) => {}
            Err(e) => return Err(Error::io(format!("wait failed: {e}"))),
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn kill_pgroup(pgid: u32) {
    #[cfg(unix)]
    {
        // Negative pid addresses the process group.
        let _ = unsafe { libc::kill(-(pgid as i32), libc::SIGKILL) };
    }
    #[cfg(not(unix))]
    {
        let _ = pgid;
    }
}

// Either the whole stream in one message (captured stdout) or one message
// per line for the log. Carriage returns split lines too, for progress
// meters; overlong lines are cut into chunks.
fn forward_stream<R: Read>(reader: R, capture: bool, tx: mpsc::Sender<StreamMsg>) {
    const MAX_LINE_BYTES: u64 = 16 * 1024;
    let mut r = BufReader::new(reader);
    if capture {
        let mut all = Vec::new();
        let _ = r.read_to_end(&mut all);
        let _ = tx.send(StreamMsg::Captured(all));
        return;
    }

    let mut chunk = Vec::new();
    loop {
        chunk.clear();
        match (&mut r).take(MAX_LINE_BYTES).read_until(b'\n', &mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        for part in chunk.split(|b| *b == b'\n' || *b == b'\r') {
            if !part.is_empty() {
                let line = String::from_utf8_lossy(part).into_owned();
                if tx.send(StreamMsg::Line(line)).is_err() {
                    return;
                }
            }
        }
    }
}

pub fn sanitize_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LOG_CHARS));
    let mut chars = input.chars().peekable();
    let mut kept = 0usize;

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.next() {
                // CSI: parameters up to a final byte in '@'..='~'.
                Some('[') => {
                    for n in chars.by_ref() {
                        if ('@'..='~').contains(&n) {
                            break;
                        }
                    }
                }
                // OSC: terminated by BEL or ESC '\'.
                Some(']') => {
                    while let Some(n) = chars.next() {
                        if n == '\x07' {
                            break;
                        }
                        if n == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
            continue;
        }
        if c == '\t' {
            out.push(' ');
        } else if c.is_control() {
            continue;
        } else {
            out.push(c);
        }
        kept += 1;
        if kept >= MAX_LOG_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_color_and_title_sequences() {
        let got = sanitize_line("Parallel \u{1b}[1mmksquashfs\u{1b}[0m \u{1b}]0;t\u{7}ok\r");
        assert_eq!(got, "Parallel mksquashfs ok");
    }

    #[test]
    fn sanitize_truncates_long_lines() {
        let long = "x".repeat(MAX_LOG_CHARS + 10);
        let got = sanitize_line(&long);
        assert!(got.ends_with("...[truncated]"));
    }

    #[test]
    fn streamed_output_splits_on_newlines_and_carriage_returns() {
        let (tx, rx) = mpsc::channel();
        forward_stream(&b"one\r\ntwo\rthree\n\nfour"[..], false, tx);
        let lines: Vec<String> = rx
            .iter()
            .map(|m| match m {
                StreamMsg::Line(l) => l,
                StreamMsg::Captured(_) => panic!("unexpected capture"),
            })
            .collect();
        assert_eq!(lines, vec!["one", "two", "three", "four"]);
    }

    #[test]
    fn captured_output_arrives_whole() {
        let (tx, rx) = mpsc::channel();
        forward_stream(&b"A /etc/a\r\nM /etc/b\n"[..], true, tx);
        let msgs: Vec<StreamMsg> = rx.iter().collect();
        assert_eq!(msgs.len(), 1);
        let StreamMsg::Captured(bytes) = &msgs[0] else {
            panic!("expected captured bytes");
        };
        assert_eq!(bytes.as_slice(), b"A /etc/a\r\nM /etc/b\n");
    }

    #[test]
    fn command_display_joins_program_and_args() {
        let cmd = ToolCommand::new("tar").args(["-cf", "out.tar"]).arg(".");
        assert_eq!(cmd.display(), "tar -cf out.tar .");
        assert_eq!(cmd.args_lossy(), vec!["-cf", "out.tar", "."]);
    }

    #[cfg(unix)]
    #[test]
    fn system_invoker_captures_stdout() {
        let out = SystemInvoker::new()
            .run(&ToolCommand::new("sh").args(["-c", "printf 'A /etc/a\\n'"]).capture_stdout())
            .expect("sh runs");
        assert_eq!(out.code, 0);
        assert_eq!(out.stdout, "A /etc/a\n");
    }

    #[cfg(unix)]
    #[test]
    fn system_invoker_reports_exit_code() {
        let err = SystemInvoker::new()
            .run(&ToolCommand::new("sh").args(["-c", "exit 3"]))
            .expect_err("non-zero exit");
        assert_eq!(
            err.kind(),
            &crate::error::ErrorKind::Process {
                command: "sh -c exit 3".into(),
                code: Some(3),
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn system_invoker_kills_tools_past_the_timeout() {
        let invoker = SystemInvoker::with_timeout(Some(Duration::from_millis(200)));
        let started = Instant::now();
        let err = invoker
            .run(&ToolCommand::new("sleep").arg("30"))
            .expect_err("timeout");
        assert!(err.is_process());
        assert!(err.to_string().contains("timed out"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_program_is_an_io_error() {
        let err = SystemInvoker::new()
            .run(&ToolCommand::new("definitely-not-a-real-tool-4821"))
            .expect_err("spawn fails");
        assert!(err.is_io());
    }
}
