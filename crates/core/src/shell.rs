//! Invocation policy for child processes
//!
//! Package managers ship `.cmd` shims on Windows that can only be started
//! through the command interpreter, while POSIX hosts run every executable
//! directly. [`Invocation::build`] turns an executable and its arguments into
//! the concrete program and argument list for the host.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::platform::Os;

/// Whether a command is routed through the host's command interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShellWrapping {
    /// Use the interpreter only where the host requires it
    #[default]
    Auto,
    /// Always run the executable directly
    Never,
    /// Always run through the interpreter
    Always,
}

/// A fully resolved way of starting a process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Start the executable itself
    Direct {
        /// Executable path
        program: PathBuf,
        /// Arguments
        args: Vec<String>,
    },
    /// `cmd.exe /d /s /c "<command line>"`
    CmdShell {
        /// Interpreter, normally `%ComSpec%`
        interpreter: PathBuf,
        /// Quoted command line passed after `/c`
        command_line: String,
    },
    /// `/bin/sh -c '<command line>'`
    PosixShell {
        /// Quoted command line passed after `-c`
        command_line: String,
    },
}

impl Invocation {
    /// Decide how to start `executable` on a host running `os`.
    #[must_use]
    pub fn build(os: Os, executable: &Path, args: &[String], wrapping: ShellWrapping) -> Self {
        let wrap = match wrapping {
            ShellWrapping::Never => false,
            ShellWrapping::Always => true,
            ShellWrapping::Auto => os == Os::Windows && is_script_shim(executable),
        };
        if !wrap {
            return Self::Direct {
                program: executable.to_path_buf(),
                args: args.to_vec(),
            };
        }
        if os == Os::Windows {
            let line = std::iter::once(quote_cmd(&executable.to_string_lossy()))
                .chain(args.iter().map(|a| quote_cmd(a)))
                .collect::<Vec<_>>()
                .join(" ");
            Self::CmdShell {
                interpreter: comspec(),
                command_line: line,
            }
        } else {
            let line = std::iter::once(quote_posix(&executable.to_string_lossy()))
                .chain(args.iter().map(|a| quote_posix(a)))
                .collect::<Vec<_>>()
                .join(" ");
            Self::PosixShell { command_line: line }
        }
    }

    /// Program that is actually spawned
    #[must_use]
    pub fn program(&self) -> PathBuf {
        match self {
            Self::Direct { program, .. } => program.clone(),
            Self::CmdShell { interpreter, .. } => interpreter.clone(),
            Self::PosixShell { .. } => PathBuf::from("/bin/sh"),
        }
    }

    /// Arguments passed to [`Self::program`]. For `CmdShell` the last
    /// argument must be passed verbatim (unquoted) by the spawner.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Direct { args, .. } => args.clone(),
            Self::CmdShell { command_line, .. } => vec![
                "/d".to_string(),
                "/s".to_string(),
                "/c".to_string(),
                format!("\"{command_line}\""),
            ],
            Self::PosixShell { command_line } => vec!["-c".to_string(), command_line.clone()],
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { program, args } => {
                write!(f, "{}", program.display())?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
            Self::CmdShell { command_line, .. } | Self::PosixShell { command_line } => {
                f.write_str(command_line)
            }
        }
    }
}

/// Batch files cannot be started without the command interpreter
fn is_script_shim(executable: &Path) -> bool {
    executable
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("cmd") || e.eq_ignore_ascii_case("bat"))
}

fn comspec() -> PathBuf {
    std::env::var_os("ComSpec")
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from("cmd.exe"), PathBuf::from)
}

fn quote_cmd(arg: &str) -> String {
    // cmd.exe expands `%NAME%` even inside quotes. `%cd:~,%` expands to
    // nothing, so a literal `%` never pairs up with the next one.
    let arg = arg.replace('%', "%%cd:~,%");
    if !arg.is_empty() && !arg.contains([' ', '\t', '"', '&', '|', '<', '>', '^', '(', ')']) {
        return arg;
    }
    format!("\"{}\"", arg.replace('"', "\"\""))
}

fn quote_posix(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@+,".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', "'\\''"))
}
