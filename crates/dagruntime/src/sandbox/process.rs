use super::{ExecutionEnv, ExecutionLimits, ExecutionRequest, SandboxBackend};
use crate::registry::NodeTypeDefinition;
use async_trait::async_trait;
use dagcore::{CodeRuntime, ExecutionError, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Calls the user's `run(inputs, config)` and prints its JSON result.
///
/// User prints are redirected to stderr so stdout carries only the result.
const PYTHON_HARNESS: &str = r#"
import json, sys
_result_out = sys.stdout
sys.stdout = sys.stderr
_namespace = {"__name__": "__node__"}
exec(compile(sys.argv[1], "<node>", "exec"), _namespace)
_run = _namespace.get("run")
if not callable(_run):
    raise SystemExit("node code does not define run(inputs, config)")
_envelope = json.load(sys.stdin)
_value = _run(_envelope["inputs"], _envelope["config"])
try:
    _encoded = json.dumps(_value, allow_nan=False)
except (TypeError, ValueError) as _error:
    raise SystemExit("malformed return value: %s" % _error)
_result_out.write(_encoded)
_result_out.flush()
"#;

/// Applies the address-space cap, then replaces itself with the node process
#[cfg(unix)]
const MEMORY_LIMIT_WRAPPER: &str = r#"ulimit -v "$1" || exit 125; shift; exec "$@""#;

/// Exit status the wrapper uses when the limit cannot be applied
#[cfg(unix)]
const LIMIT_SETUP_FAILED: i32 = 125;

const STDERR_CAPTURE_BYTES: usize = 64 * 1024;

/// Interpreters used for process-backed node code
#[derive(Debug, Clone)]
pub struct ProcessSandboxConfig {
    pub python: String,
    pub shell: String,
}

impl Default for ProcessSandboxConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            shell: "sh".to_string(),
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    inputs: &'a BTreeMap<String, Value>,
    config: &'a Value,
}

/// Runs node code in a child process, one process per execution.
///
/// The input envelope `{"inputs": .., "config": ..}` is written to stdin
/// and the result is read from stdout. Each child leads its own process
/// group; the whole group is killed once the child exits or the execution
/// future is dropped.
pub struct ProcessSandbox {
    config: ProcessSandboxConfig,
}

impl ProcessSandbox {
    pub fn new(config: ProcessSandboxConfig) -> Self {
        Self { config }
    }

    fn command(
        &self,
        definition: &NodeTypeDefinition,
        limits: &ExecutionLimits,
    ) -> Result<Command, String> {
        let (program, args): (&str, Vec<&str>) = match definition.runtime {
            CodeRuntime::Python => (
                self.config.python.as_str(),
                vec!["-c", PYTHON_HARNESS, definition.code.as_str()],
            ),
            CodeRuntime::Shell => (self.config.shell.as_str(), vec!["-c", definition.code.as_str()]),
            CodeRuntime::Builtin => {
                return Err(format!("{} is a builtin node type", definition.id));
            }
        };

        #[cfg(unix)]
        if let Some(bytes) = limits.max_memory_bytes {
            let kib = (bytes / 1024).max(1).to_string();
            let mut cmd = Command::new(&self.config.shell);
            cmd.arg("-c")
                .arg(MEMORY_LIMIT_WRAPPER)
                .arg("dagflow-limit")
                .arg(kib)
                .arg(program)
                .args(&args);
            return Ok(cmd);
        }
        #[cfg(not(unix))]
        let _ = limits;

        let mut cmd = Command::new(program);
        cmd.args(&args);
        Ok(cmd)
    }
}

#[async_trait]
impl SandboxBackend for ProcessSandbox {
    async fn run(
        &self,
        definition: &NodeTypeDefinition,
        request: ExecutionRequest,
        env: ExecutionEnv,
    ) -> Result<Value, ExecutionError> {
        let node_id = request.node_id.clone();
        let fail = |cause: String| ExecutionError::failed(node_id.clone(), cause);
        let limits = env.limits;
        let max_output = limits.max_output_bytes;

        let envelope = serde_json::to_vec(&Envelope {
            inputs: &request.inputs,
            config: &request.config,
        })
        .map_err(|e| fail(format!("cannot encode inputs: {}", e)))?;

        let mut cmd = self.command(definition, &limits).map_err(fail)?;
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| fail(format!("failed to spawn {:?}: {}", definition.runtime, e)))?;
        // Killed on every exit path, including a dropped future on timeout or cancel
        let mut group = ProcessGroup::new(child.id());
        tracing::debug!("Spawned process for node {} (pid {:?})", node_id, child.id());

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stderr_task = tokio::spawn(async move {
            match stderr {
                Some(stderr) => read_limited(stderr, STDERR_CAPTURE_BYTES, true).await,
                None => Ok((Vec::new(), false)),
            }
        });

        // Writing on its own task keeps a child that never reads stdin from
        // blocking the stdout cap
        tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                // Code that never reads stdin closes the pipe early; that is fine
                let _ = stdin.write_all(&envelope).await;
                let _ = stdin.shutdown().await;
            }
        });

        let read_stdout = async move {
            match stdout {
                Some(stdout) => read_limited(stdout, max_output, false).await,
                None => Ok((Vec::new(), false)),
            }
        };
        tokio::pin!(read_stdout);

        let mut exit = None;
        let read = loop {
            tokio::select! {
                read = &mut read_stdout => break read,
                status = child.wait(), if exit.is_none() => {
                    exit = Some(status.map_err(|e| fail(format!("failed to wait for process: {}", e)))?);
                    // Leftover background processes would hold stdout open
                    group.kill();
                }
            }
        };
        let (stdout, overflowed) = read.map_err(|e| fail(format!("failed to read stdout: {}", e)))?;

        if overflowed {
            group.kill();
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(ExecutionError::ResourceLimit {
                node_id: node_id.clone(),
                resource: "output".to_string(),
                detail: format!("stdout exceeded {} bytes", max_output),
            });
        }

        let status = match exit {
            Some(status) => status,
            None => child
                .wait()
                .await
                .map_err(|e| fail(format!("failed to wait for process: {}", e)))?,
        };
        group.kill();
        let stderr = match stderr_task.await {
            Ok(Ok((bytes, _))) => String::from_utf8_lossy(&bytes).trim().to_string(),
            _ => String::new(),
        };
        if !stderr.is_empty() {
            env.events.warn(format!("stderr: {}", last_line(&stderr)));
        }

        if !status.success() {
            if limits.max_memory_bytes.is_some() && looks_out_of_memory(&stderr) {
                return Err(ExecutionError::ResourceLimit {
                    node_id: node_id.clone(),
                    resource: "memory".to_string(),
                    detail: last_line(&stderr).to_string(),
                });
            }
            #[cfg(unix)]
            if limits.max_memory_bytes.is_some() && status.code() == Some(LIMIT_SETUP_FAILED) {
                return Err(fail("memory limit could not be applied".to_string()));
            }
            return Err(fail(format!("process exited with {}: {}", status, last_line(&stderr))));
        }

        parse_output(definition.runtime, &stdout).map_err(fail)
    }
}

/// The process group a node's child leads, so grandchildren die with it
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn kill(&mut self) {
        let pgid = self.pgid.take();
        #[cfg(unix)]
        if let Some(pgid) = pgid.and_then(|p| libc::pid_t::try_from(p).ok()) {
            // SAFETY: killpg only sends a signal; the group was created for this child
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Read up to `cap` bytes; `drain` keeps consuming (and discarding) past the cap.
///
/// Returns the captured bytes and whether the stream exceeded `cap`.
async fn read_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    cap: usize,
    drain: bool,
) -> std::io::Result<(Vec<u8>, bool)> {
    let mut captured = Vec::new();
    let mut overflowed = false;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(captured.len());
        captured.extend_from_slice(&chunk[..n.min(room)]);
        if n > room {
            overflowed = true;
            if !drain {
                break;
            }
        }
    }
    Ok((captured, overflowed))
}

fn parse_output(runtime: CodeRuntime, stdout: &[u8]) -> Result<Value, String> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    match runtime {
        CodeRuntime::Python => serde_json::from_str::<Value>(text)
            .map_err(|e| format!("malformed return value: {}", e)),
        // Shell output that is not JSON is kept as text
        _ if text.is_empty() => Ok(Value::Null),
        _ => Ok(serde_json::from_str::<Value>(text).unwrap_or_else(|_| Value::String(text.to_string()))),
    }
}

fn looks_out_of_memory(stderr: &str) -> bool {
    const MARKERS: [&str; 4] = [
        "MemoryError",
        "Cannot allocate memory",
        "out of memory",
        "bad_alloc",
    ];
    MARKERS.iter().any(|m| stderr.contains(m))
}

fn last_line(text: &str) -> &str {
    text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("")
}
