use std::io::{self, Write};
use std::process::Command;

use serde::Serialize;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// The tool could not be found. Distinct from a check that ran and failed.
    #[error("syntax checker `{tool}` is not available")]
    Unavailable {
        tool: String,
        #[source]
        source: io::Error,
    },
    #[error("could not run syntax checker `{tool}`")]
    Launch {
        tool: String,
        #[source]
        source: io::Error,
    },
    #[error("could not stage generated text for checking")]
    Stage(#[source] io::Error),
}

/// What the checker reported, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub passed: bool,
    /// Diagnostic output lines, stderr first.
    pub lines: Vec<String>,
}

/// Runs `<tool> -c <file>` over generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxChecker {
    tool: String,
}

impl SyntaxChecker {
    pub fn new(tool: impl Into<String>) -> Self {
        SyntaxChecker { tool: tool.into() }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn check(&self, text: &str) -> Result<CheckOutcome, CheckError> {
        let mut file = tempfile::Builder::new()
            .prefix("questscript-")
            .suffix(".pl")
            .tempfile()
            .map_err(CheckError::Stage)?;
        file.write_all(text.as_bytes()).map_err(CheckError::Stage)?;
        file.flush().map_err(CheckError::Stage)?;

        let output = Command::new(&self.tool)
            .arg("-c")
            .arg(file.path())
            .output()
            .map_err(|source| {
                let tool = self.tool.clone();
                if source.kind() == io::ErrorKind::NotFound {
                    CheckError::Unavailable { tool, source }
                } else {
                    CheckError::Launch { tool, source }
                }
            })?;

        let lines: Vec<String> = String::from_utf8_lossy(&output.stderr)
            .lines()
            .chain(String::from_utf8_lossy(&output.stdout).lines())
            .map(str::to_string)
            .collect();
        let passed = output.status.success();
        debug!(tool = %self.tool, passed, lines = lines.len(), "syntax check finished");
        Ok(CheckOutcome { passed, lines })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_is_unavailable() {
        let checker = SyntaxChecker::new("questscript-no-such-checker");
        let err = checker.check("1;\n").unwrap_err();
        assert!(matches!(err, CheckError::Unavailable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_decides_the_outcome() {
        let passed = SyntaxChecker::new("true").check("1;\n").unwrap();
        assert!(passed.passed);
        assert!(passed.lines.is_empty());

        let failed = SyntaxChecker::new("false").check("1;\n").unwrap();
        assert!(!failed.passed);
    }
}
