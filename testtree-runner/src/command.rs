// Copyright (c) The testtree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Spawning the build tool and streaming its output line by line.

use crate::errors::CommandError;
use camino::Utf8PathBuf;
use std::process::Stdio;
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines},
    process::{Child, ChildStderr, ChildStdout, Command},
};
use tracing::debug;

/// A fully resolved command invocation.
#[derive(Clone, Debug)]
pub struct CommandLine {
    /// Path to the program, or a bare name resolved through `PATH`.
    pub program: Utf8PathBuf,
    /// Arguments, not including the program itself.
    pub args: Vec<String>,
    /// Working directory for the spawned process.
    pub cwd: Utf8PathBuf,
}

impl CommandLine {
    /// Creates a new command line.
    pub fn new(program: Utf8PathBuf, args: Vec<String>, cwd: Utf8PathBuf) -> Self {
        Self { program, args, cwd }
    }

    /// Renders the invocation roughly the way a shell would receive it.
    pub fn display(&self) -> String {
        let mut out = self.program.to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// A line read from a spawned process, tagged with the stream it arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputLine<'a> {
    /// A line from standard output.
    Stdout(&'a str),
    /// A line from standard error.
    Stderr(&'a str),
}

/// Spawns `cmd` and feeds each output line to `on_line` as it arrives.
///
/// Stdout and stderr lines are each delivered in order, but the interleaving
/// between the two streams does not necessarily reflect the order in which
/// the process wrote them. Resolves once the process exits; a non-zero exit
/// is an error, delivered after all output has been dispatched.
pub async fn stream(
    cmd: &CommandLine,
    mut on_line: impl FnMut(OutputLine<'_>),
) -> Result<(), CommandError> {
    let (mut child, mut reader) = spawn(cmd)?;
    if let Err(error) = reader.for_each(cmd, |line| on_line(line)).await {
        // Don't leave the child around if its pipes went bad.
        let _ = child.kill().await;
        return Err(error);
    }
    wait(cmd, &mut child).await
}

/// Spawns `cmd`, buffers stdout and stderr lines merged in arrival order,
/// and dispatches the whole buffer to `on_line` only after the process has
/// exited.
///
/// This trades latency for knowing, while parsing, that the full output is
/// available; list-mode parsing relies on that.
pub async fn stream_buffered(
    cmd: &CommandLine,
    mut on_line: impl FnMut(&str),
) -> Result<(), CommandError> {
    let (mut child, mut reader) = spawn(cmd)?;
    let mut lines = Vec::new();
    let read_result = reader
        .for_each(cmd, |line| {
            let (OutputLine::Stdout(text) | OutputLine::Stderr(text)) = line;
            lines.push(text.to_owned());
        })
        .await;
    if let Err(error) = read_result {
        let _ = child.kill().await;
        return Err(error);
    }
    let result = wait(cmd, &mut child).await;
    for line in &lines {
        on_line(line);
    }
    result
}

struct LineReader {
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
}

impl LineReader {
    /// Drives both streams to EOF, invoking `on_line` per line.
    async fn for_each(
        &mut self,
        cmd: &CommandLine,
        mut on_line: impl FnMut(OutputLine<'_>),
    ) -> Result<(), CommandError> {
        let mut stdout_done = false;
        let mut stderr_done = false;
        while !(stdout_done && stderr_done) {
            tokio::select! {
                line = self.stdout.next_line(), if !stdout_done => match line {
                    Ok(Some(line)) => on_line(OutputLine::Stdout(&line)),
                    Ok(None) => stdout_done = true,
                    Err(error) => {
                        return Err(CommandError::Read {
                            program: cmd.program.clone(),
                            error,
                        });
                    }
                },
                line = self.stderr.next_line(), if !stderr_done => match line {
                    Ok(Some(line)) => on_line(OutputLine::Stderr(&line)),
                    Ok(None) => stderr_done = true,
                    Err(error) => {
                        return Err(CommandError::Read {
                            program: cmd.program.clone(),
                            error,
                        });
                    }
                },
            }
        }
        Ok(())
    }
}

fn spawn(cmd: &CommandLine) -> Result<(Child, LineReader), CommandError> {
    debug!(command = %cmd.display(), "spawning build tool");
    let mut child = Command::new(cmd.program.as_str())
        .args(&cmd.args)
        .current_dir(&cmd.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| CommandError::Launch {
            program: cmd.program.clone(),
            error,
        })?;
    let stdout = child.stdout.take().expect("child stdout is piped");
    let stderr = child.stderr.take().expect("child stderr is piped");
    let reader = LineReader {
        stdout: BufReader::new(stdout).lines(),
        stderr: BufReader::new(stderr).lines(),
    };
    Ok((child, reader))
}

async fn wait(cmd: &CommandLine, child: &mut Child) -> Result<(), CommandError> {
    let status = child.wait().await.map_err(|error| CommandError::Wait {
        program: cmd.program.clone(),
        error,
    })?;
    if status.success() {
        Ok(())
    } else {
        Err(CommandError::ExitStatus {
            program: cmd.program.clone(),
            code: status.code(),
        })
    }
}
