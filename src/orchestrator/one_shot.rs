//! Blocking one-shot runs: spawn, collect all output, return the answer.

use tokio::io::AsyncReadExt;
use tracing::{info, info_span, warn, Instrument};

use crate::config::OutputFormat;
use crate::stream::decoder::{decode_line, decode_result_document, DecodedEvent};
use crate::stream::framer::LineFramer;
use crate::stream::spawner::{spawn_one_shot, AgentCommand, AgentProcess};
use crate::{AppError, Result};

/// Run the agent once for `prompt` and return its answer.
///
/// The answer depends on `format`:
/// - `text`: the whole stdout, with carriage returns and trailing
///   whitespace removed.
/// - `json`: the `result` field of the output document.
/// - `stream-json`: the terminal result, or the concatenated assistant
///   text when the agent never sent one.
///
/// A non-zero exit yields an empty answer (logged at `WARN`).
///
/// # Errors
///
/// - `AppError::Unavailable` if the agent binary cannot be found.
/// - `AppError::Spawn` if the process fails to start.
/// - `AppError::Io` if reading its output fails.
pub async fn run_one_shot(
    agent: &AgentCommand,
    prompt: &str,
    format: OutputFormat,
) -> Result<String> {
    agent.locate()?;

    let span = info_span!("run_one_shot", format = format.as_arg());
    async move {
        let AgentProcess {
            mut child,
            mut stdout,
            mut stderr,
            ..
        } = spawn_one_shot(agent, prompt, Some(format))?;

        let mut out = Vec::new();
        let mut err = Vec::new();
        let (out_read, err_read) =
            tokio::join!(stdout.read_to_end(&mut out), stderr.read_to_end(&mut err));
        out_read.map_err(|e| AppError::Io(format!("failed to read agent stdout: {e}")))?;
        err_read.map_err(|e| AppError::Io(format!("failed to read agent stderr: {e}")))?;

        let status = child
            .wait()
            .await
            .map_err(|e| AppError::Io(format!("failed to wait for agent: {e}")))?;

        if !status.success() {
            warn!(
                code = ?status.code(),
                stderr = %String::from_utf8_lossy(&err).trim(),
                "one-shot agent run failed"
            );
            return Ok(String::new());
        }

        let answer = extract_answer(&out, format);
        info!(bytes = out.len(), answer_len = answer.len(), "one-shot agent run finished");
        Ok(answer)
    }
    .instrument(span)
    .await
}

/// Extract the answer from complete one-shot output.
#[must_use]
pub fn extract_answer(output: &[u8], format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => String::from_utf8_lossy(output)
            .replace('\r', "")
            .trim_end()
            .to_owned(),
        OutputFormat::Json => decode_result_document(&String::from_utf8_lossy(output)),
        OutputFormat::StreamJson => fold_stream(output),
    }
}

fn fold_stream(output: &[u8]) -> String {
    let mut framer = LineFramer::new();
    let mut lines = framer.push(output);
    lines.extend(framer.finish());

    let mut streamed = String::new();
    for line in lines {
        match decode_line(&line) {
            DecodedEvent::Result { text } => return text,
            DecodedEvent::AssistantText { fragments } => {
                streamed.extend(fragments);
            }
            DecodedEvent::Other { .. } | DecodedEvent::Unparseable { .. } => {}
        }
    }
    streamed
}
