use clap::{Parser, Subcommand, ValueEnum};
use nodekit_core::config::CONFIG_FILE_NAME;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nodekit")]
#[command(
    about = "Provision Node.js and a package manager, then run frontend builds incrementally"
)]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short = 'c',
        long,
        global = true,
        env = "NODEKIT_CONFIG",
        help = "Path to the project configuration",
        default_value = CONFIG_FILE_NAME
    )]
    pub config: PathBuf,

    #[arg(
        short = 'L',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: crate::tracing::LogLevel,

    #[arg(long, global = true, help = "Output logs in JSON format")]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Print the platform distributions are resolved for")]
    Platform,
    #[command(about = "Install the Node.js runtime")]
    InstallNode,
    #[command(about = "Install Node.js and the declared package manager")]
    InstallPackageManager,
    #[command(about = "Install the toolchain and project dependencies")]
    Install,
    #[command(about = "Run configured scripts, all of them when none is named")]
    Run {
        #[arg(help = "Script names from the configuration")]
        scripts: Vec<String>,
    },
    #[command(about = "Run the whole pipeline")]
    Build,
    #[command(about = "Run a toolchain executable in the project directory")]
    Exec {
        #[arg(value_enum, help = "Executable to run")]
        tool: ExecTool,
        #[arg(last = true, help = "Arguments passed through unchanged")]
        args: Vec<String>,
    },
}

/// Executables `exec` can start
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecTool {
    /// The Node.js runtime
    Node,
    /// The project's package manager
    Pm,
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracing::LogLevel;

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::try_parse_from(["nodekit", "build"]).unwrap();

        assert!(matches!(cli.level, LogLevel::Warn));
        assert_eq!(cli.config, PathBuf::from("nodekit.toml"));
        assert!(!cli.json);
        assert!(matches!(cli.command, Commands::Build));
    }

    #[test]
    fn test_cli_global_options_after_subcommand() {
        let cli =
            Cli::try_parse_from(["nodekit", "install", "-L", "debug", "--config", "web/nk.toml"])
                .unwrap();
        assert!(matches!(cli.level, LogLevel::Debug));
        assert_eq!(cli.config, PathBuf::from("web/nk.toml"));
        assert!(matches!(cli.command, Commands::Install));
    }

    #[test]
    fn test_run_collects_script_names() {
        let cli = Cli::try_parse_from(["nodekit", "run", "assemble", "check"]).unwrap();
        assert!(
            matches!(cli.command, Commands::Run { ref scripts } if scripts == &["assemble", "check"])
        );

        let cli = Cli::try_parse_from(["nodekit", "run"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { scripts } if scripts.is_empty()));
    }

    #[test]
    fn test_exec_passes_arguments_after_separator() {
        let cli =
            Cli::try_parse_from(["nodekit", "exec", "node", "--", "-e", "1", "--version"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Exec { tool: ExecTool::Node, ref args } if args == &["-e", "1", "--version"]
        ));

        let cli = Cli::try_parse_from(["nodekit", "exec", "pm", "--", "ls"]).unwrap();
        assert!(matches!(cli.command, Commands::Exec { tool: ExecTool::Pm, .. }));
    }

    #[test]
    fn test_invalid_arguments_are_rejected() {
        assert!(Cli::try_parse_from(["nodekit", "exec", "deno"]).is_err());
        assert!(Cli::try_parse_from(["nodekit", "--level", "loud", "build"]).is_err());
        assert!(Cli::try_parse_from(["nodekit"]).is_err());
    }
}
