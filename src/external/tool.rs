/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Running external command-line tools with their output captured and their exit status checked.

use std::{
    fmt::{self, Display, Formatter},
    io,
    process::{Command, Output},
};

/// Run `command` to completion, log what it printed, and fail unless it exited successfully.
///
/// Returns the captured standard output.
pub(crate) fn run_tool(mut command: Command) -> Result<String, ExternalToolError> {
    let description = describe(&command);
    log::info!("Running: {}", description);

    let Output {
        status,
        stdout,
        stderr,
    } = command.output().map_err(|err| ExternalToolError::Spawn {
        command: description.clone(),
        source: err,
    })?;

    let stdout = String::from_utf8_lossy(&stdout).into_owned();
    let stderr = String::from_utf8_lossy(&stderr).into_owned();
    if !stdout.trim().is_empty() {
        log::info!("{}", stdout.trim_end());
    }
    if !stderr.trim().is_empty() {
        log::warn!("{}", stderr.trim_end());
    }

    if status.success() {
        Ok(stdout)
    } else {
        Err(ExternalToolError::Failed {
            command: description,
            code: status.code(),
            stderr,
        })
    }
}

fn describe(command: &Command) -> String {
    let mut description = command.get_program().to_string_lossy().into_owned();
    for arg in command.get_args() {
        description.push(' ');
        description.push_str(&arg.to_string_lossy());
    }
    description
}

/// Enumerates the ways an external tool invocation can fail.
#[derive(Debug)]
pub enum ExternalToolError {
    /// The tool could not be started at all, e.g., because it is not installed.
    Spawn { command: String, source: io::Error },

    /// The tool ran but exited unsuccessfully. `code` is `None` if it was killed by a signal.
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The tool succeeded but printed something we could not interpret.
    UnexpectedOutput { command: String, stdout: String },

    /// A file the tool was supposed to read or produce could not be accessed.
    Io(io::Error),
}

impl From<io::Error> for ExternalToolError {
    fn from(value: io::Error) -> Self {
        ExternalToolError::Io(value)
    }
}

impl Display for ExternalToolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ExternalToolError::Spawn { command, source } => {
                write!(f, "could not run `{}`: {}", command, source)
            }
            ExternalToolError::Failed { command, code, .. } => match code {
                Some(code) => write!(f, "`{}` exited with status {}", command, code),
                None => write!(f, "`{}` was terminated by a signal", command),
            },
            ExternalToolError::UnexpectedOutput { command, .. } => {
                write!(f, "could not interpret the output of `{}`", command)
            }
            ExternalToolError::Io(err) => write!(f, "{}", err),
        }
    }
}
