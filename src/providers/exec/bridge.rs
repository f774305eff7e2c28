//! Lifecycle of one `codex exec` subprocess.

use super::events::ExecEvent;
use super::ExecSettings;
use crate::line_stream::LineStreamExt;
use crate::{Error, Result};
use futures_util::{Stream, StreamExt};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything needed to start one subprocess. Built once per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Entries layered over the inherited environment.
    pub env: HashMap<String, String>,
    /// Written to stdin in full, then stdin is closed.
    pub input: String,
}

impl Invocation {
    pub fn new(settings: &ExecSettings, model_id: Option<&str>, input: impl Into<String>) -> Self {
        Self {
            program: settings.codex_path.clone(),
            args: build_args(settings, model_id),
            env: settings.env.clone(),
            input: input.into(),
        }
    }
}

/// Build CLI arguments. Caller arguments always come last and are not deduplicated.
pub fn build_args(settings: &ExecSettings, model_id: Option<&str>) -> Vec<String> {
    let mut args = vec!["exec".to_string(), "--json".to_string()];

    if settings.skip_git_repo_check {
        args.push("--skip-git-repo-check".to_string());
    }

    if let Some(model) = model_id {
        args.push("--model".to_string());
        args.push(model.to_string());
    }

    args.extend(settings.args.iter().cloned());
    args
}

/// How the subprocess ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    /// Name of the terminating signal, e.g. `SIGTERM`.
    pub signal: Option<String>,
    /// Everything the process wrote to stderr.
    pub stderr: String,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Cause reported for an unsuccessful exit: the signal name, else the code.
    pub fn failure_cause(&self) -> String {
        match (&self.signal, self.exit_code) {
            (Some(signal), _) => signal.clone(),
            (None, Some(code)) => code.to_string(),
            (None, None) => "unknown".to_string(),
        }
    }
}

/// Run one invocation to completion.
///
/// `on_event` receives decoded stdout lines in the order they completed;
/// `on_stderr` receives stderr chunks as they arrive. If `cancel` fires (or
/// was already cancelled), termination is requested and the real exit status
/// is still awaited and reported.
pub async fn run_exec<F, G>(
    invocation: &Invocation,
    cancel: Option<&CancellationToken>,
    mut on_event: F,
    mut on_stderr: G,
) -> Result<ExecOutcome>
where
    F: FnMut(ExecEvent),
    G: FnMut(&str),
{
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .envs(&invocation.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| Error::spawn(invocation.program.clone(), e))?;
    info!(
        program = %invocation.program,
        args = ?invocation.args,
        pid = ?child.id(),
        "spawned codex exec"
    );

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::streaming("codex stdin was not captured"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::streaming("codex stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::streaming("codex stderr was not captured"))?;

    let input = invocation.input.as_bytes();
    let write_input = async move {
        let mut stdin = stdin;
        // The child may exit without reading its input
        if let Err(e) = stdin.write_all(input).await {
            debug!(error = %e, "could not write prompt to codex stdin");
        }
        if let Err(e) = stdin.shutdown().await {
            debug!(error = %e, "could not close codex stdin");
        }
    };

    let read_stdout = forward_events(ReaderStream::new(stdout), &mut on_event);

    let read_stderr = async {
        let mut collected = Vec::new();
        let mut chunks = ReaderStream::new(stderr);
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) => {
                    on_stderr(&String::from_utf8_lossy(&chunk));
                    collected.extend_from_slice(&chunk);
                }
                Err(e) => {
                    warn!(error = %e, "failed reading codex stderr");
                    break;
                }
            }
        }
        String::from_utf8_lossy(&collected).into_owned()
    };

    let io = async {
        let ((), stdout, stderr) = tokio::join!(write_input, read_stdout, read_stderr);
        (stdout, stderr)
    };
    tokio::pin!(io);

    let mut terminated = false;
    let (stdout, stderr) = match cancel {
        Some(token) => tokio::select! {
            done = &mut io => done,
            _ = token.cancelled() => {
                request_termination(&mut child);
                terminated = true;
                io.await
            }
        },
        None => io.await,
    };

    let status = match cancel {
        Some(token) if !terminated => tokio::select! {
            status = child.wait() => status?,
            _ = token.cancelled() => {
                request_termination(&mut child);
                child.wait().await?
            }
        },
        _ => child.wait().await?,
    };

    let outcome = ExecOutcome {
        exit_code: status.code(),
        signal: exit_signal(&status),
        stderr,
    };
    if outcome.success() {
        debug!("codex exec exited successfully");
    } else {
        warn!(cause = %outcome.failure_cause(), "codex exec exited unsuccessfully");
    }
    // Events after a failed stdout read were lost
    stdout?;
    Ok(outcome)
}

/// Decode stdout into events until it ends or a read fails.
///
/// A read error is returned after the events that preceded it were delivered.
async fn forward_events<S, B, E, F>(stdout: S, on_event: &mut F) -> Result<()>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
    F: FnMut(ExecEvent),
{
    let mut lines = stdout.lines();
    while let Some(line) = lines.next().await {
        let line = line.map_err(|e| {
            warn!(error = %e, "failed reading codex stdout");
            e
        })?;
        if let Some(event) = ExecEvent::decode_line(&line) {
            if let ExecEvent::ParseError { line } = &event {
                warn!(line = %truncate(line, 200), "failed to parse codex output line");
            }
            on_event(event);
        }
    }
    Ok(())
}

/// Ask the child to stop. This is a request: the caller still waits for exit.
fn request_termination(child: &mut Child) {
    debug!(pid = ?child.id(), "requesting codex exec termination");
    if send_sigterm(child) {
        return;
    }
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "could not kill codex exec");
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: `pid` is our own child and has not been reaped yet, since
    // `id()` returns `None` after the exit status has been collected.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    status.signal().map(|signal| {
        match signal {
            libc::SIGTERM => "SIGTERM",
            libc::SIGKILL => "SIGKILL",
            libc::SIGINT => "SIGINT",
            libc::SIGHUP => "SIGHUP",
            libc::SIGQUIT => "SIGQUIT",
            libc::SIGABRT => "SIGABRT",
            libc::SIGPIPE => "SIGPIPE",
            libc::SIGSEGV => "SIGSEGV",
            other => return format!("SIG{other}"),
        }
        .to_string()
    })
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<String> {
    None
}

fn truncate(line: &str, max_chars: usize) -> String {
    if line.chars().count() > max_chars {
        format!("{}...", line.chars().take(max_chars).collect::<String>())
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ExecSettings {
        ExecSettings::default()
    }

    #[test]
    fn test_default_args() {
        assert_eq!(
            build_args(&settings(), None),
            vec!["exec", "--json", "--skip-git-repo-check"]
        );
    }

    #[test]
    fn test_args_order() {
        let settings = settings()
            .skip_git_repo_check(false)
            .args(vec!["--model".to_string(), "override".to_string()]);
        assert_eq!(
            build_args(&settings, Some("gpt-5-codex")),
            vec!["exec", "--json", "--model", "gpt-5-codex", "--model", "override"]
        );
    }

    #[test]
    fn test_invocation_carries_settings() {
        let settings = settings().codex_path("/opt/codex").env("CODEX_HOME", "/tmp/h");
        let invocation = Invocation::new(&settings, Some("m"), "User:\nhi");
        assert_eq!(invocation.program, "/opt/codex");
        assert_eq!(invocation.env.get("CODEX_HOME").map(String::as_str), Some("/tmp/h"));
        assert_eq!(invocation.input, "User:\nhi");
        assert!(invocation.args.ends_with(&["--model".to_string(), "m".to_string()]));
    }

    #[test]
    fn test_failure_cause() {
        let outcome = ExecOutcome {
            exit_code: None,
            signal: Some("SIGTERM".to_string()),
            stderr: String::new(),
        };
        assert_eq!(outcome.failure_cause(), "SIGTERM");

        let outcome = ExecOutcome {
            exit_code: Some(2),
            signal: None,
            stderr: String::new(),
        };
        assert!(!outcome.success());
        assert_eq!(outcome.failure_cause(), "2");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }

    const PAYLOAD: &str = concat!(
        r#"{"type":"thread.started","thread_id":"t1"}"#,
        "\n",
        r#"{"type":"item.completed","item":{"type":"agent_message","text":"héllo €"}}"#,
        "\n",
        "not valid json\n",
        r#"{"type":"turn.completed","usage":{"input_tokens":3,"output_tokens":1}}"#,
        "\n",
    );

    async fn events_from(chunks: Vec<Vec<u8>>) -> Vec<ExecEvent> {
        let stream = futures_util::stream::iter(
            chunks.into_iter().map(Ok::<_, std::io::Error>),
        );
        let mut events = Vec::new();
        forward_events(stream, &mut |event| events.push(event))
            .await
            .unwrap();
        events
    }

    #[tokio::test]
    async fn test_events_independent_of_chunk_boundaries() {
        let bytes = PAYLOAD.as_bytes();
        let expected = events_from(vec![bytes.to_vec()]).await;
        assert_eq!(expected.len(), 4);
        assert_eq!(expected[1].agent_text(), Some("héllo €"));

        for split in 1..bytes.len() {
            let chunks = vec![bytes[..split].to_vec(), bytes[split..].to_vec()];
            assert_eq!(events_from(chunks).await, expected, "split at byte {split}");
        }

        let single_bytes = bytes.iter().map(|b| vec![*b]).collect();
        assert_eq!(events_from(single_bytes).await, expected);
    }

    #[tokio::test]
    async fn test_trailing_newline_is_optional() {
        let with_newline = events_from(vec![PAYLOAD.as_bytes().to_vec()]).await;
        let without = events_from(vec![PAYLOAD.trim_end_matches('\n').as_bytes().to_vec()]).await;
        assert_eq!(with_newline, without);
    }

    #[tokio::test]
    async fn test_stdout_read_error_is_returned() {
        let items: Vec<std::io::Result<Vec<u8>>> = vec![
            Ok(br#"{"type":"thread.started"}"#.to_vec()),
            Ok(b"\n{\"type\":\"partial".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke")),
        ];
        let mut events = Vec::new();
        let result = forward_events(futures_util::stream::iter(items), &mut |event| {
            events.push(event)
        })
        .await;

        assert!(matches!(result, Err(Error::Streaming(_))));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].raw_value()["type"], "thread.started");
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::time::Duration;

        fn shell(script: &str) -> Invocation {
            Invocation {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), script.to_string()],
                env: HashMap::new(),
                input: String::new(),
            }
        }

        async fn collect(
            invocation: &Invocation,
            cancel: Option<&CancellationToken>,
        ) -> (Vec<ExecEvent>, Vec<String>, ExecOutcome) {
            let mut events = Vec::new();
            let mut stderr_chunks = Vec::new();
            let outcome = run_exec(
                invocation,
                cancel,
                |event| events.push(event),
                |chunk| stderr_chunks.push(chunk.to_string()),
            )
            .await
            .unwrap();
            (events, stderr_chunks, outcome)
        }

        #[tokio::test]
        async fn test_events_in_order_with_trailing_flush() {
            let invocation = shell(r#"printf '{"type":"a"}\nnot valid json\n{"type":"b"}'"#);
            let (events, stderr, outcome) = collect(&invocation, None).await;

            assert_eq!(events.len(), 3);
            assert_eq!(events[0].raw_value()["type"], "a");
            assert_eq!(
                events[1],
                ExecEvent::ParseError {
                    line: "not valid json".to_string()
                }
            );
            assert_eq!(events[2].raw_value()["type"], "b");
            assert!(stderr.is_empty());
            assert!(outcome.success());
            assert_eq!(outcome.stderr, "");
        }

        #[tokio::test]
        async fn test_input_is_written_then_closed() {
            let mut invocation = shell(
                r#"input=$(cat); printf '{"type":"item.completed","item":{"type":"agent_message","text":"%s"}}\n' "$input""#,
            );
            invocation.input = "hello".to_string();
            let (events, _, outcome) = collect(&invocation, None).await;

            assert!(outcome.success());
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].agent_text(), Some("hello"));
        }

        #[tokio::test]
        async fn test_stderr_and_exit_code() {
            let invocation = shell("echo boom >&2; exit 3");
            let (events, stderr, outcome) = collect(&invocation, None).await;

            assert!(events.is_empty());
            assert_eq!(stderr.concat(), "boom\n");
            assert_eq!(outcome.stderr, "boom\n");
            assert_eq!(outcome.exit_code, Some(3));
            assert_eq!(outcome.signal, None);
        }

        #[tokio::test]
        async fn test_env_overrides_are_applied() {
            let mut invocation = shell(r#"printf '{"type":"env","value":"%s"}\n' "$CODEX_BRIDGE_TEST""#);
            invocation
                .env
                .insert("CODEX_BRIDGE_TEST".to_string(), "override".to_string());
            let (events, _, _) = collect(&invocation, None).await;

            assert_eq!(events[0].raw_value()["value"], "override");
        }

        #[tokio::test]
        async fn test_already_cancelled_terminates_immediately() {
            let token = CancellationToken::new();
            token.cancel();
            let invocation = shell("exec sleep 30");

            let (_, _, outcome) = tokio::time::timeout(
                Duration::from_secs(10),
                collect(&invocation, Some(&token)),
            )
            .await
            .expect("terminated process should exit");

            assert_eq!(outcome.exit_code, None);
            assert_eq!(outcome.signal.as_deref(), Some("SIGTERM"));
        }

        #[tokio::test]
        async fn test_cancel_while_running() {
            let token = CancellationToken::new();
            let invocation = shell(r#"printf '{"type":"started"}\n'; exec sleep 30"#);

            let mut events = Vec::new();
            let outcome = tokio::time::timeout(
                Duration::from_secs(10),
                run_exec(
                    &invocation,
                    Some(&token),
                    |event| {
                        events.push(event);
                        token.cancel();
                    },
                    |_| {},
                ),
            )
            .await
            .expect("terminated process should exit")
            .unwrap();

            assert_eq!(events.len(), 1);
            assert_eq!(outcome.signal.as_deref(), Some("SIGTERM"));
            assert!(!outcome.success());
        }

        #[tokio::test]
        async fn test_spawn_failure() {
            let invocation = Invocation {
                program: "/nonexistent/codex".to_string(),
                args: vec![],
                env: HashMap::new(),
                input: String::new(),
            };
            let err = run_exec(&invocation, None, |_| {}, |_| {}).await.unwrap_err();
            assert!(matches!(err, Error::Spawn { .. }));
        }
    }
}
