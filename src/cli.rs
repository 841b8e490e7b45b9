use clap::Parser;
use std::path::PathBuf;

use crate::config::{Config, ProviderKind};

#[derive(Parser)]
#[command(name = "redgreen")]
#[command(version)]
#[command(about = "Let a language model make your tests pass")]
#[command(long_about = "redgreen watches a test file, runs the test command, and asks a language \
model to rewrite the implementation until the tests pass. Every attempt is committed; once the \
tests pass the attempts are squashed into a single commit.")]
pub struct Cli {
    /// Working directory containing the implementation and test files
    #[arg(default_value = "example")]
    pub dir: PathBuf,

    /// Completion provider
    #[arg(long, value_enum, env = "REDGREEN_PROVIDER")]
    pub provider: Option<ProviderKind>,

    /// Model name (defaults to the provider's own default)
    #[arg(long, env = "REDGREEN_MODEL")]
    pub model: Option<String>,

    /// Maximum patch attempts per sequence (0 = unlimited)
    #[arg(short, long, env = "REDGREEN_MAX_ITERATIONS")]
    pub max_iterations: Option<u32>,

    /// Run a single sequence and exit instead of watching the test file
    #[arg(long)]
    pub once: bool,

    /// Wait for the full response instead of applying sections as they stream in
    #[arg(long)]
    pub no_stream: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Command-line flags take precedence over file and environment config
    pub fn apply(&self, config: &mut Config) {
        if let Some(kind) = self.provider {
            config.provider.kind = kind;
        }
        if let Some(model) = &self.model {
            config.provider.model = model.clone();
        }
        if let Some(max) = self.max_iterations {
            config.looping.max_iterations = max;
        }
        if self.no_stream {
            config.provider.stream = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["redgreen"]).unwrap();
        assert_eq!(cli.dir, PathBuf::from("example"));
        assert!(!cli.once);
        assert!(!cli.no_stream);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "redgreen",
            "work",
            "--provider",
            "openai",
            "--model",
            "gpt-4.1",
            "--max-iterations",
            "3",
            "--no-stream",
            "--once",
        ])
        .unwrap();
        assert_eq!(cli.dir, PathBuf::from("work"));
        assert!(cli.once);

        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.provider.kind, ProviderKind::OpenAi);
        assert_eq!(config.provider.model, "gpt-4.1");
        assert_eq!(config.looping.max_iterations, 3);
        assert!(!config.provider.stream);
    }

    #[test]
    fn test_rejects_unknown_provider() {
        assert!(Cli::try_parse_from(["redgreen", "--provider", "llama"]).is_err());
    }
}
