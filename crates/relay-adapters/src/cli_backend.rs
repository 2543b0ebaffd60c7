//! Per-backend command construction.
//!
//! Each backend is driven through its vendor CLI in non-interactive JSON
//! streaming mode. The defaults here match the stock installs; deployments
//! with wrappers or nonstandard paths override them in the configuration.

use relay_core::OrchestratorConfig;
use relay_proto::BackendKind;

/// How one backend's CLI is invoked. The prompt is always appended as the
/// final positional argument.
#[derive(Debug, Clone)]
pub struct CliBackend {
    pub kind: BackendKind,
    pub program: String,
    pub args: Vec<String>,
}

impl CliBackend {
    /// The stock invocation for a backend.
    pub fn stock(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Codex => Self {
                kind,
                program: "codex".to_string(),
                args: vec!["exec".to_string(), "--json".to_string()],
            },
            BackendKind::Claude => Self {
                kind,
                program: "claude".to_string(),
                args: vec![
                    "-p".to_string(),
                    "--output-format".to_string(),
                    "stream-json".to_string(),
                    "--verbose".to_string(),
                ],
            },
        }
    }

    /// The configured invocation for a backend, falling back to stock.
    pub fn from_config(kind: BackendKind, config: &OrchestratorConfig) -> Self {
        match config.backend_commands.get(&kind) {
            Some(command) => Self {
                kind,
                program: command.program.clone(),
                args: command.args.clone(),
            },
            None => Self::stock(kind),
        }
    }

    /// The full argument vector for one prompt.
    pub fn args_with_prompt(&self, prompt: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(prompt.to_string());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_commands() {
        let codex = CliBackend::stock(BackendKind::Codex);
        assert_eq!(codex.program, "codex");
        assert_eq!(codex.args_with_prompt("hi").last().unwrap(), "hi");

        let claude = CliBackend::stock(BackendKind::Claude);
        assert_eq!(claude.program, "claude");
        assert!(claude.args.contains(&"stream-json".to_string()));
    }

    #[test]
    fn test_config_override_wins() {
        let yaml = r#"
backend_commands:
  codex:
    program: /opt/ai/codex-wrapper
    args: ["run"]
"#;
        let config = OrchestratorConfig::from_yaml(yaml).unwrap();

        let codex = CliBackend::from_config(BackendKind::Codex, &config);
        assert_eq!(codex.program, "/opt/ai/codex-wrapper");
        assert_eq!(codex.args_with_prompt("hi"), vec!["run", "hi"]);

        // Unconfigured backends keep the stock invocation.
        let claude = CliBackend::from_config(BackendKind::Claude, &config);
        assert_eq!(claude.program, "claude");
    }
}
