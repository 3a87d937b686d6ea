//! Template source rendering: variable substitution and the typst compile step.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::{Captures, Regex};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::instrument;

use crate::config::RenderConfig;
use crate::error::{PdfgenError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Variable Substitution
// ═══════════════════════════════════════════════════════════════════════════════

/// `{{ .Name }}`, `{{Name}}`, or `{{ .Customer.Name }}`.
static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.?([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}").expect("Invalid placeholder regex")
});

/// Replace every placeholder in `source` with its variable value.
///
/// Placeholders without a value render as the empty string. Values are
/// inserted verbatim.
pub fn substitute(source: &str, variables: &HashMap<String, String>) -> String {
    PLACEHOLDER_REGEX
        .replace_all(source, |caps: &Captures<'_>| {
            variables
                .get(&caps[1])
                .cloned()
                .unwrap_or_default()
        })
        .into_owned()
}

/// Names referenced by placeholders in `source`, in order of first use.
pub fn placeholders(source: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_REGEX.captures_iter(source) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

// ═══════════════════════════════════════════════════════════════════════════════
// Typst Compiler
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs the `typst` CLI, feeding source on stdin and reading the PDF from stdout.
#[derive(Debug, Clone)]
pub struct TypstRenderer {
    binary: String,
    timeout: Duration,
}

impl TypstRenderer {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(config.typst_binary.clone(), config.timeout)
    }

    /// Compile typst source into PDF bytes.
    #[instrument(skip(self, source), fields(binary = %self.binary, source_len = source.len()))]
    pub async fn compile(&self, source: &str) -> Result<Vec<u8>> {
        let start = Instant::now();

        let mut child = Command::new(&self.binary)
            .args(["compile", "--format", "pdf", "-", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => PdfgenError::render_unavailable(
                    format!("cannot start '{}': {}", self.binary, e),
                ),
                _ => PdfgenError::from(e),
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PdfgenError::internal("typst stdin was not captured"))?;
        let input = source.as_bytes().to_vec();
        // Write concurrently with reading stdout so a large document cannot
        // fill both pipes.
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                PdfgenError::render_failed(format!("typst did not finish within {:?}", self.timeout))
            })??;

        match writer.await {
            Ok(Ok(())) => {}
            // The compiler may exit before reading everything; its status says why.
            Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(e) => return Err(PdfgenError::internal(format!("stdin writer failed: {}", e))),
        }

        metrics::histogram!("pdfgen_render_duration_seconds").record(start.elapsed().as_secs_f64());

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PdfgenError::render_failed(format!(
                "typst exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        tracing::debug!(bytes = output.stdout.len(), "Template compiled");
        Ok(output.stdout)
    }
}
