//! # L2: Same-Host Subprocess Bridge
//!
//! One call is one process: the caller writes a JSON [`Request`] to the
//! child's stdin, closes it, and reads exactly one JSON [`Envelope`] from its
//! stdout. The trust boundary is the ability to spawn the process, so no
//! signature is involved; only the `on_bridge_call` gate applies.
//!
//! ## Failure Mapping (caller side)
//!
//! | Situation                      | Kind             |
//! |--------------------------------|------------------|
//! | spawn failed                   | `TransportError` |
//! | non-zero exit / killed         | `TransportError` |
//! | stdout not a single envelope   | `TransportError` |
//! | deadline elapsed (child killed)| `TimeoutError`   |
//! | `{ok:false}` envelope          | kind from `code` |

use bridge_registry::{BridgeCall, DistributorDirectory, Tier};
use bridge_types::{CallError, CallResult, Envelope, Request};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::StdioConfig;

/// Environment variable carrying the caller's distributor code.
pub const SOURCE_DIST_ENV: &str = "BRIDGE_SOURCE_DIST";

/// Largest stdout accepted from a bridge process.
const MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

/// stderr excerpt length carried into transport errors.
const STDERR_EXCERPT: usize = 512;

/// stderr kept in memory; the rest is drained and dropped.
const STDERR_CAPTURE_BYTES: usize = 64 * 1024;

/// L2 caller.
#[derive(Debug, Clone)]
pub struct StdioBridgeClient {
    config: StdioConfig,
    source_dist: Option<String>,
    max_output_bytes: usize,
}

impl StdioBridgeClient {
    pub fn new(config: StdioConfig) -> Self {
        Self {
            config,
            source_dist: None,
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }

    /// Cap on stdout read from the child. Reading stops one byte past it.
    #[must_use]
    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Identify the calling distributor to the callee's bridge gate.
    #[must_use]
    pub fn with_source_dist(mut self, dist: impl Into<String>) -> Self {
        self.source_dist = Some(dist.into());
        self
    }

    /// Run one call. No retry.
    pub async fn call(&self, request: &Request) -> CallResult {
        request.validate()?;
        let body = request.to_body()?;

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dist) = &self.source_dist {
            cmd.env(SOURCE_DIST_ENV, dist);
        }

        let mut child = cmd.spawn().map_err(|e| {
            CallError::transport(format!(
                "failed to spawn bridge process '{}': {e}",
                self.config.program.display()
            ))
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let max_output = self.max_output_bytes;

        // stderr drains on its own task so a chatty child never blocks on it.
        let stderr_task = tokio::spawn(async move {
            let mut captured = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = (&mut stderr)
                    .take(STDERR_CAPTURE_BYTES as u64)
                    .read_to_end(&mut captured)
                    .await;
                let _ = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await;
            }
            captured
        });

        let exchange = async move {
            let write = async {
                if let Some(mut stdin) = stdin {
                    if let Err(e) = stdin.write_all(&body).await {
                        // The exit status and output decide the outcome.
                        debug!(error = %e, "Bridge process closed stdin early");
                    }
                    // Dropped here: EOF for the child.
                }
            };
            let read = async {
                let mut out = Vec::new();
                if let Some(stdout) = stdout {
                    stdout
                        .take(max_output as u64 + 1)
                        .read_to_end(&mut out)
                        .await?;
                }
                Ok::<_, std::io::Error>(out)
            };
            let ((), out) = tokio::join!(write, read);
            let out = out?;
            if out.len() > max_output {
                return Ok(None);
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>(Some((status, out)))
        };

        // On timeout or overflow the future (and with it the child) is
        // dropped, and `kill_on_drop` terminates the process.
        let (status, stdout) = match tokio::time::timeout(self.config.timeout, exchange).await {
            Ok(Ok(Some(output))) => output,
            Ok(Ok(None)) => {
                stderr_task.abort();
                warn!(
                    program = %self.config.program.display(),
                    max_output,
                    "Bridge process output over limit, killed"
                );
                return Err(CallError::transport(format!(
                    "bridge process output too large (over {max_output} bytes)"
                )));
            }
            Ok(Err(e)) => {
                stderr_task.abort();
                return Err(CallError::transport(format!(
                    "failed to wait for bridge process: {e}"
                )));
            }
            Err(_elapsed) => {
                stderr_task.abort();
                warn!(
                    program = %self.config.program.display(),
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    dist = %request.dist,
                    module = %request.module,
                    command = %request.command,
                    "Bridge process timed out, killed"
                );
                return Err(CallError::timeout(format!(
                    "bridge process exceeded {}ms",
                    self.config.timeout.as_millis()
                )));
            }
        };

        if !status.success() {
            let stderr = stderr_task.await.unwrap_or_default();
            let stderr = String::from_utf8_lossy(&stderr);
            let excerpt = truncate(stderr.trim(), STDERR_EXCERPT);
            return Err(CallError::transport(match status.code() {
                Some(code) => format!("bridge process exited with status {code}: {excerpt}"),
                None => format!("bridge process terminated by signal: {excerpt}"),
            }));
        }
        stderr_task.abort();

        let envelope = Envelope::decode(stdout.trim_ascii()).map_err(|e| {
            CallError::transport(format!("malformed bridge process output: {e}"))
        })?;
        envelope.into_result()
    }
}

fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// =============================================================================
// SERVER SIDE
// =============================================================================

/// Dispatch one L2 request body.
///
/// `source_dist` is what the bridge gate sees as the caller; it defaults to
/// the request's own `dist`.
pub fn handle_stdio_request(
    directory: &dyn DistributorDirectory,
    body: &[u8],
    source_dist: Option<&str>,
) -> Envelope {
    Envelope::from_result(dispatch(directory, body, source_dist))
}

fn dispatch(
    directory: &dyn DistributorDirectory,
    body: &[u8],
    source_dist: Option<&str>,
) -> CallResult {
    let request = Request::parse(body)?;
    request.validate()?;

    let distributor = directory
        .resolve(&request.dist)
        .ok_or_else(|| CallError::not_found(format!("distributor '{}' not found", request.dist)))?;

    distributor.execute_bridge(BridgeCall {
        source_dist: source_dist.unwrap_or(&request.dist),
        module: &request.module,
        command: &request.command,
        args: &request.args,
        origin: Tier::Bridge,
    })
}

/// Serve exactly one L2 call: read the request to EOF, write one envelope
/// line, flush.
///
/// Nothing but the envelope is written to `output`.
pub async fn serve_stdio<R, W>(
    directory: &dyn DistributorDirectory,
    source_dist: Option<&str>,
    max_bytes: usize,
    input: R,
    mut output: W,
) -> std::io::Result<Envelope>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut body = Vec::new();
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    input.take(limit).read_to_end(&mut body).await?;

    let envelope = if body.len() > max_bytes {
        Envelope::from_error(&CallError::validation(format!(
            "request exceeds {max_bytes} bytes"
        )))
    } else {
        handle_stdio_request(directory, &body, source_dist)
    };

    match &envelope {
        Envelope::Success(_) => debug!("Stdio call served"),
        Envelope::Failure { error, code } => debug!(code, error = %error, "Stdio call failed"),
    }

    let mut line = envelope.to_json_string();
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(envelope)
}
