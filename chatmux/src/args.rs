use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// chatmux gateway
#[derive(Debug, Parser)]
#[command(name = "chatmux", about = "OpenAI-compatible gateway for ChatGPT, Grok, OpenRouter and Qwen")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "chatmux.toml", env = "CHATMUX_CONFIG")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(long, env = "CHATMUX_LISTEN")]
    pub listen: Option<std::net::SocketAddr>,

    /// Serve when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the stored session's account id, email and plan
    Info {
        /// Print the raw auth.json contents instead
        #[arg(long)]
        json: bool,

        /// Read this auth.json instead of searching the session homes
        #[arg(long)]
        auth_file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn arguments_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_and_overrides() {
        let args = Args::try_parse_from(["chatmux"]).unwrap();
        assert_eq!(args.config, PathBuf::from("chatmux.toml"));

        let args = Args::try_parse_from(["chatmux", "-c", "/etc/chatmux.toml", "--listen", "0.0.0.0:9000"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/chatmux.toml"));
        assert_eq!(args.listen, Some(([0, 0, 0, 0], 9000).into()));
        assert!(args.command.is_none());
    }

    #[test]
    fn info_subcommand() {
        let args = Args::try_parse_from(["chatmux", "info"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Command::Info {
                json: false,
                auth_file: None
            })
        ));

        let args = Args::try_parse_from(["chatmux", "info", "--json", "--auth-file", "/tmp/auth.json"]).unwrap();
        let Some(Command::Info { json, auth_file }) = args.command else {
            panic!("expected the info subcommand");
        };
        assert!(json);
        assert_eq!(auth_file, Some(PathBuf::from("/tmp/auth.json")));
    }
}
