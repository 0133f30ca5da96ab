use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::Context;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of one external process invocation.
#[derive(Debug)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    /// Combined stdout + stderr, verbatim.
    pub output: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn describe_exit(&self) -> String {
        if self.timed_out {
            return "timed out".to_owned();
        }
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_owned(),
        }
    }
}

/// Run an external tool with an environment overlay, capturing stdout and
/// stderr. The child is killed once `timeout` elapses; an exceeded timeout
/// is reported as a failed invocation, not an `Err`.
pub fn run_command(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    env_overlay: &HashMap<String, String>,
    timeout: Duration,
) -> anyhow::Result<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in env_overlay {
        cmd.env(key, value);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {} {:?}", program, args))?;

    // Drain both pipes off-thread so a chatty child can't deadlock on a
    // full pipe buffer while we poll for exit.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("child stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("child stderr was not piped"))?;

    let stdout_reader = std::thread::spawn(move || read_all(stdout));
    let stderr_reader = std::thread::spawn(move || read_all(stderr));

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;

    let status = loop {
        if let Some(status) = child.try_wait().context("wait for child process")? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            timed_out = true;
            let _ = child.kill();
            let _ = child.wait();
            break None;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let mut output = String::from_utf8_lossy(&stdout_reader.join().unwrap_or_default())
        .into_owned();
    let stderr_text = String::from_utf8_lossy(&stderr_reader.join().unwrap_or_default())
        .into_owned();
    output.push_str(&stderr_text);

    if timed_out {
        output.push_str(&format!(
            "\n[{} killed after exceeding the {}s timeout]\n",
            program,
            timeout.as_secs()
        ));
    }

    Ok(CommandOutput {
        success: status.map(|s| s.success()).unwrap_or(false),
        code: status.and_then(|s| s.code()),
        output,
        timed_out,
    })
}

fn read_all(mut source: impl Read) -> Vec<u8> {
    let mut buffer = Vec::new();
    let _ = source.read_to_end(&mut buffer);
    buffer
}
