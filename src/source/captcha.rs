//! CAPTCHA solving
//!
//! The portal's verification challenge is an image of a short arithmetic
//! expression. Recognition is delegated to an external program; the
//! recognised text is evaluated here.

use crate::source::{SourceError, SourceResult};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Turns a challenge image into the answer the portal expects
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, image: &[u8]) -> SourceResult<String>;
}

/// Runs an external recogniser with the image on stdin and reads the
/// recognised text from stdout
#[derive(Debug, Clone)]
pub struct CommandSolver {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSolver {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CaptchaSolver for CommandSolver {
    async fn solve(&self, image: &[u8]) -> SourceResult<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image).await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                SourceError::Verification(format!(
                    "captcha command timed out after {:?}",
                    self.timeout
                ))
            })??;

        if !output.status.success() {
            return Err(SourceError::Verification(format!(
                "captcha command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        tracing::debug!("Recognised captcha text: {}", text.trim());

        solve_expression(&text).map(|answer| answer.to_string())
    }
}

/// Evaluates recognised challenge text
///
/// Supports one of `+ - * x /` between two integers (stray non-digit
/// characters in an operand are ignored). Text without an operator yields
/// its digits as a number.
pub fn solve_expression(text: &str) -> SourceResult<i64> {
    let text: String = text.chars().filter(|c| !c.is_whitespace()).collect();

    for op in ['+', '-', '*', 'x', '/'] {
        if !text.contains(op) {
            continue;
        }

        let operands: Vec<&str> = text.split(op).collect();
        if operands.len() != 2 {
            return Err(invalid(&text));
        }
        let left = digits(operands[0]).ok_or_else(|| invalid(&text))?;
        let right = digits(operands[1]).ok_or_else(|| invalid(&text))?;

        let result = match op {
            '+' => left.checked_add(right),
            '-' => left.checked_sub(right),
            '*' | 'x' => left.checked_mul(right),
            _ => left.checked_div(right),
        };
        return result.ok_or_else(|| invalid(&text));
    }

    digits(&text).ok_or_else(|| invalid(&text))
}

fn digits(part: &str) -> Option<i64> {
    let digits: String = part.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn invalid(text: &str) -> SourceError {
    SourceError::Verification(format!("cannot evaluate captcha text '{}'", text))
}
