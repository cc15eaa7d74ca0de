//! Layered agent configuration: built-in defaults, then `SIM_*` environment
//! variables, then an optional TOML file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sim_coordination::context_packer::{DEFAULT_CHUNK_LINES, DEFAULT_TOP_K};
use sim_coordination::feedback::sandbox::DEFAULT_MAX_DIAGNOSTIC_CHARS;
use sim_coordination::{
    CleanupPolicy, ContextAssembler, CorrectionConfig, ExecutionSandbox, Interpreter,
    ReferenceCorpus, SandboxConfig, SlurmSettings,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Base URL; `/chat/completions` is appended.
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1".into(),
            model: "gpt-4o".into(),
            api_key: None,
            temperature: 0.01,
            top_p: 0.9,
            request_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    /// Upper bound on any task's attempt budget.
    pub max_iterations: Option<u32>,
    /// Characters of the previous failure quoted in a retry prompt.
    pub max_diagnostic_chars: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: None,
            max_diagnostic_chars: DEFAULT_MAX_DIAGNOSTIC_CHARS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Interpreter command line, split shell-style (e.g. `"python3 -u"`).
    pub interpreter: String,
    /// Wall-clock limit per attempt; unset means no limit.
    pub timeout_secs: Option<u64>,
    pub cleanup: CleanupPolicy,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            interpreter: "python3 -u".into(),
            timeout_secs: Some(120),
            cleanup: CleanupPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub corpus_dir: Option<PathBuf>,
    pub top_k: usize,
    pub chunk_lines: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            corpus_dir: None,
            top_k: DEFAULT_TOP_K,
            chunk_lines: DEFAULT_CHUNK_LINES,
        }
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub llm: LlmSettings,
    #[serde(rename = "loop")]
    pub correction: LoopSettings,
    pub sandbox: SandboxSettings,
    pub retrieval: RetrievalSettings,
    pub slurm: SlurmSettings,
}

impl AgentConfig {
    /// Defaults overridden by the process environment, then by `file` if given.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        if let Some(path) = file {
            config = config.merge_file(path)?;
        }
        config.check()?;
        info!(
            url = %config.llm.url,
            model = %config.llm.model,
            interpreter = %config.sandbox.interpreter,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Apply `SIM_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("SIM_LLM_URL") {
            self.llm.url = url;
        }
        if let Some(model) = lookup("SIM_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = lookup("SIM_LLM_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.llm.api_key = Some(key);
        }
        if let Some(raw) = lookup("SIM_MAX_ITERATIONS") {
            let n: u32 = raw.parse().with_context(|| {
                format!("SIM_MAX_ITERATIONS must be a positive integer, got {raw:?}")
            })?;
            self.correction.max_iterations = Some(n);
        }
        if let Some(raw) = lookup("SIM_EXEC_TIMEOUT_SECS") {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("SIM_EXEC_TIMEOUT_SECS must be an integer, got {raw:?}"))?;
            // 0 disables the limit
            self.sandbox.timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(interpreter) = lookup("SIM_INTERPRETER") {
            self.sandbox.interpreter = interpreter;
        }
        if let Some(dir) = lookup("SIM_CORPUS_DIR") {
            self.retrieval.corpus_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Overlay the keys present in a TOML file onto this configuration.
    pub fn merge_file(&self, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        self.merge_toml(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn merge_toml(&self, text: &str) -> Result<Self> {
        let overlay: toml::Value = toml::from_str(text)?;
        let mut base = toml::Value::try_from(self)?;
        merge_values(&mut base, overlay);
        let merged: Self = base.try_into()?;
        merged.check()?;
        Ok(merged)
    }

    fn check(&self) -> Result<()> {
        if self.correction.max_iterations == Some(0) {
            bail!("loop.max_iterations must be at least 1");
        }
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be at least 1");
        }
        if self.retrieval.chunk_lines == 0 {
            bail!("retrieval.chunk_lines must be at least 1");
        }
        Ok(())
    }

    /// Interpreter parsed from the configured command line.
    pub fn interpreter(&self) -> Result<Interpreter> {
        let parts = shlex::split(&self.sandbox.interpreter).with_context(|| {
            format!(
                "Interpreter command line is not valid shell syntax: {}",
                self.sandbox.interpreter
            )
        })?;
        let mut parts = parts.into_iter();
        let Some(program) = parts.next() else {
            bail!("Interpreter command line is empty");
        };
        Ok(Interpreter::from_command(program, parts.collect()))
    }

    pub fn sandbox(&self) -> Result<ExecutionSandbox> {
        Ok(ExecutionSandbox::new(SandboxConfig {
            interpreter: self.interpreter()?,
            timeout: self.sandbox.timeout_secs.map(Duration::from_secs),
            max_diagnostic_chars: self.correction.max_diagnostic_chars,
            ..SandboxConfig::default()
        }))
    }

    pub fn correction(&self) -> CorrectionConfig {
        CorrectionConfig {
            max_iterations: self.correction.max_iterations,
            cleanup: self.sandbox.cleanup,
        }
    }

    /// Assembler without retrieval.
    pub fn assembler(&self) -> ContextAssembler {
        ContextAssembler::new().max_diagnostic_chars(self.correction.max_diagnostic_chars)
    }

    /// Assembler backed by the configured reference corpus, if any.
    pub fn retrieval_assembler(&self) -> Result<ContextAssembler> {
        let Some(dir) = &self.retrieval.corpus_dir else {
            return Ok(self.assembler());
        };
        let corpus = ReferenceCorpus::load_dir(dir, self.retrieval.chunk_lines)
            .with_context(|| format!("Failed to load reference corpus from {}", dir.display()))?;
        Ok(
            ContextAssembler::with_corpus(Arc::new(corpus), self.retrieval.top_k)
                .max_diagnostic_chars(self.correction.max_diagnostic_chars),
        )
    }
}

/// Recursively overlay `overlay` tables onto `base`; scalars and arrays replace.
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.sandbox.interpreter, "python3 -u");
        assert_eq!(config.sandbox.timeout_secs, Some(120));
        assert!(config.correction.max_iterations.is_none());
        assert_eq!(config.slurm.partition, "RM");
    }

    #[test]
    fn test_env_overrides_defaults() {
        let mut config = AgentConfig::default();
        config
            .apply_env(env(&[
                ("SIM_LLM_URL", "http://localhost:8080/v1"),
                ("SIM_MAX_ITERATIONS", "5"),
                ("SIM_EXEC_TIMEOUT_SECS", "0"),
                ("SIM_INTERPRETER", "sh"),
                ("OPENAI_API_KEY", "sk-fallback"),
            ]))
            .unwrap();
        assert_eq!(config.llm.url, "http://localhost:8080/v1");
        assert_eq!(config.correction.max_iterations, Some(5));
        assert_eq!(config.sandbox.timeout_secs, None);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-fallback"));
        assert_eq!(config.interpreter().unwrap(), Interpreter::shell());
    }

    #[test]
    fn test_sim_api_key_wins_over_openai_key() {
        let mut config = AgentConfig::default();
        config
            .apply_env(env(&[("SIM_LLM_API_KEY", "sk-sim"), ("OPENAI_API_KEY", "sk-openai")]))
            .unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-sim"));
    }

    #[test]
    fn test_bad_env_number_is_an_error() {
        let mut config = AgentConfig::default();
        let err = config
            .apply_env(env(&[("SIM_MAX_ITERATIONS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("SIM_MAX_ITERATIONS"));
    }

    #[test]
    fn test_file_overrides_only_named_keys() {
        let mut base = AgentConfig::default();
        base.apply_env(env(&[("SIM_LLM_MODEL", "local-model")])).unwrap();

        let merged = base
            .merge_toml(
                r#"
                [loop]
                max_iterations = 4

                [sandbox]
                interpreter = "python3.11 -u"
                cleanup = "retain"

                [slurm]
                partition = "GPU"
                email = "someone@example.org"
                "#,
            )
            .unwrap();

        // Environment value survives when the file does not mention it
        assert_eq!(merged.llm.model, "local-model");
        assert_eq!(merged.correction.max_iterations, Some(4));
        assert_eq!(merged.sandbox.cleanup, CleanupPolicy::Retain);
        assert_eq!(merged.sandbox.timeout_secs, Some(120));
        assert_eq!(merged.slurm.partition, "GPU");
        assert_eq!(merged.slurm.ntasks, 2);
        assert_eq!(merged.slurm.email.as_deref(), Some("someone@example.org"));

        let interpreter = merged.interpreter().unwrap();
        assert_eq!(interpreter.program, "python3.11");
        assert_eq!(interpreter.args, vec!["-u".to_string()]);
        assert_eq!(interpreter.extension, "py");
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let err = AgentConfig::default()
            .merge_toml("[loop]\nmax_iterations = 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn test_unbalanced_interpreter_quotes() {
        let mut config = AgentConfig::default();
        config.sandbox.interpreter = "python3 'unterminated".into();
        assert!(config.interpreter().is_err());
    }

    #[test]
    fn test_missing_corpus_dir_is_an_error() {
        let mut config = AgentConfig::default();
        config.retrieval.corpus_dir = Some(PathBuf::from("/nonexistent/corpus"));
        assert!(config.retrieval_assembler().is_err());
        config.retrieval.corpus_dir = None;
        assert!(!config.retrieval_assembler().unwrap().has_corpus());
    }
}
