use std::path::PathBuf;

use clap::Parser;

/// Streams one chat completion from a configured provider.
#[derive(Debug, Parser)]
#[command(name = "conduit", version, about)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "CONDUIT_CONFIG", default_value = "./conduit.toml")]
    pub config: PathBuf,
    /// Provider to call. Defaults to the first configured one.
    #[arg(short, long)]
    pub provider: Option<String>,
    /// Model to use instead of the provider's default.
    #[arg(short, long)]
    pub model: Option<String>,
    /// System prompt sent before the user prompt.
    #[arg(short, long)]
    pub system: Option<String>,
    /// Wait for the complete answer instead of streaming it.
    #[arg(long)]
    pub no_stream: bool,
    /// Print the embedding of the prompt instead of chatting.
    #[arg(long, conflicts_with_all = ["system", "no_stream", "model"])]
    pub embed: bool,
    /// Log filter, e.g. "info" or "llm=debug".
    #[arg(long = "log", env = "CONDUIT_LOG", default_value = "warn")]
    pub log_filter: String,
    /// The user prompt.
    pub prompt: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = temp_env::with_vars_unset(["CONDUIT_CONFIG", "CONDUIT_LOG"], || {
            Args::try_parse_from(["conduit", "Hello"]).unwrap()
        });

        assert_eq!(args.config, PathBuf::from("./conduit.toml"));
        assert_eq!(args.log_filter, "warn");
        assert_eq!(args.prompt, "Hello");
        assert!(args.provider.is_none());
        assert!(!args.no_stream);
    }

    #[test]
    fn config_from_environment() {
        let args = temp_env::with_var("CONDUIT_CONFIG", Some("/etc/conduit.toml"), || {
            Args::try_parse_from(["conduit", "-p", "ark", "--log", "llm=debug", "Hi"]).unwrap()
        });

        assert_eq!(args.config, PathBuf::from("/etc/conduit.toml"));
        assert_eq!(args.provider.as_deref(), Some("ark"));
        assert_eq!(args.log_filter, "llm=debug");
    }

    #[test]
    fn embed_conflicts_with_chat_flags() {
        let error = Args::try_parse_from(["conduit", "--embed", "--no-stream", "text"]).unwrap_err();

        assert_eq!(error.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn prompt_is_required() {
        assert!(Args::try_parse_from(["conduit"]).is_err());
    }
}
