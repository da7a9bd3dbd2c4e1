use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use acctest_domain::{flatmap, Address, ResourceReference, StateSnapshot};
use acctest_fixture::Fixture;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{ApplyEngine, EngineFactory, PlanSummary};
use crate::error::ApplyError;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const PROVIDER_TF: &str = "provider \"azurerm\" {\n  features {}\n}\n\n";
const IMPORT_MARKER: &str = "already exists - to be managed via Terraform";

/// Drives the `terraform` (or `tofu`) binary in a per-scenario workspace.
///
/// - Writes the fixture to `main.tf` alongside a provider block
/// - Runs `init` once, then `apply` / `plan` / `destroy` as asked
/// - Reads state back through `show -json`
/// - Imports into a scratch state file so the real state is untouched
pub struct TerraformEngine {
    binary: String,
    workspace: PathBuf,
    env: HashMap<String, String>,
    timeout: Duration,
    inner: Mutex<Session>,
}

#[derive(Default)]
struct Session {
    initialized: bool,
    state: StateSnapshot,
}

/// Exit code and output of one command. `log` interleaves both streams
/// for diagnostics; `stdout` alone is what JSON sub-commands print.
struct Run {
    code: i32,
    log: String,
    stdout: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

impl TerraformEngine {
    pub fn new(binary: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            workspace: workspace.into(),
            env: HashMap::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            inner: Mutex::new(Session::default()),
        }
    }

    /// Extra environment for every command (provider credentials).
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    async fn write_config(&self, fixture: &Fixture) -> Result<(), ApplyError> {
        tokio::fs::create_dir_all(&self.workspace)
            .await
            .map_err(|e| ApplyError::Io(format!("create workspace {}: {}", self.workspace.display(), e)))?;
        let main = self.workspace.join("main.tf");
        let text = format!("{}{}", PROVIDER_TF, fixture.text());
        tokio::fs::write(&main, text)
            .await
            .map_err(|e| ApplyError::Io(format!("write {}: {}", main.display(), e)))
    }

    /// Write the configuration and make sure `init` has run.
    async fn prepare(&self, session: &mut Session, fixture: &Fixture) -> Result<(), ApplyError> {
        self.write_config(fixture).await?;
        if !session.initialized {
            self.run_checked(&["init", "-input=false", "-no-color"]).await?;
            session.initialized = true;
        }
        Ok(())
    }

    async fn run_checked(&self, args: &[&str]) -> Result<Run, ApplyError> {
        let run = self.run_tf(args).await?;
        if run.code != 0 {
            return Err(self.failed(args, run));
        }
        Ok(run)
    }

    fn failed(&self, args: &[&str], run: Run) -> ApplyError {
        ApplyError::Failed {
            command: format!("{} {}", self.binary, args.first().copied().unwrap_or("")),
            code: run.code,
            output: run.log,
        }
    }

    /// Run a sub-command. The child is killed if this future is dropped
    /// or the command outlives `timeout`.
    async fn run_tf(&self, args: &[&str]) -> Result<Run, ApplyError> {
        info!(binary = %self.binary, ?args, workspace = %self.workspace.display(), "running terraform");

        let mut child = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.workspace)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0")
            .envs(&self.env)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ApplyError::Io(format!("spawn {}: {}", self.binary, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ApplyError::Io("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ApplyError::Io("stderr not captured".into()))?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(Stream, String)>();
        let readers = [
            forward_lines(stdout, Stream::Stdout, tx.clone()),
            forward_lines(stderr, Stream::Stderr, tx),
        ];

        let mut log = String::new();
        let mut out = String::new();
        let collect = async {
            while let Some((stream, line)) = rx.recv().await {
                debug!(target: "acctest::engine", ?stream, "{}", line);
                log.push_str(&line);
                log.push('\n');
                if stream == Stream::Stdout {
                    out.push_str(&line);
                    out.push('\n');
                }
            }
        };
        let timed_out = tokio::time::timeout(self.timeout, collect).await.is_err();
        if timed_out {
            let _ = child.kill().await;
        }
        for reader in readers {
            reader.await.ok();
        }

        if timed_out {
            return Err(ApplyError::Timeout {
                command: format!("{} {}", self.binary, args.first().copied().unwrap_or("")),
                minutes: self.timeout.as_secs() / 60,
            });
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ApplyError::Io(format!("wait {}: {}", self.binary, e)))?;

        let code = status.code().unwrap_or(-1);
        if code != 0 {
            debug!(binary = %self.binary, code, "terraform exited non-zero");
        }
        Ok(Run {
            code,
            log,
            stdout: out,
        })
    }

    /// `show -json [state file]` mapped to a snapshot of managed resources.
    async fn read_state(&self, state_file: Option<&str>) -> Result<StateSnapshot, ApplyError> {
        let mut args = vec!["show", "-json", "-no-color"];
        if let Some(file) = state_file {
            args.push(file);
        }
        let run = self.run_checked(&args).await?;
        let json: Value = serde_json::from_str(run.stdout.trim()).map_err(|e| ApplyError::Decode {
            what: "terraform show output".into(),
            message: e.to_string(),
        })?;
        Ok(snapshot_from_show(&json))
    }
}

fn forward_lines<R>(
    reader: R,
    stream: Stream,
    tx: tokio::sync::mpsc::UnboundedSender<(Stream, String)>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = tx.send((stream, line));
        }
    })
}

fn snapshot_from_show(json: &Value) -> StateSnapshot {
    let mut snapshot = StateSnapshot::new();
    let resources = json["values"]["root_module"]["resources"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    for r in resources {
        if r["mode"].as_str() != Some("managed") {
            continue;
        }
        let (Some(ty), Some(name)) = (r["type"].as_str(), r["name"].as_str()) else {
            continue;
        };
        let mut reference = ResourceReference::new(ty, name);
        reference.attributes = flatmap::flatten(&r["values"]);
        snapshot.insert(reference);
    }
    snapshot
}

/// Pull `(address, id)` out of the provider's "needs to be imported" diagnostic.
fn parse_import_required(log: &str) -> Option<(String, String)> {
    let marker = log.find(IMPORT_MARKER)?;
    let head = &log[..marker];
    let id_start = head.rfind("A resource with the ID \"")? + "A resource with the ID \"".len();
    let id_end = id_start + head[id_start..].find('"')?;
    let id = head[id_start..id_end].to_string();

    let tail = &log[marker..];
    let address = tail
        .find("with ")
        .map(|i| &tail[i + "with ".len()..])
        .and_then(|rest| rest.split(|c: char| c == ',' || c.is_whitespace()).next())
        .unwrap_or_default()
        .to_string();
    Some((address, id))
}

/// Counts from the `Plan: X to add, Y to change, Z to destroy.` summary line.
fn parse_plan_counts(log: &str) -> Option<PlanSummary> {
    let line = log.lines().find(|l| l.trim_start().starts_with("Plan: "))?;
    let mut numbers = line
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>());
    Some(PlanSummary {
        add: numbers.next()?.ok()?,
        change: numbers.next()?.ok()?,
        destroy: numbers.next()?.ok()?,
    })
}

#[async_trait]
impl ApplyEngine for TerraformEngine {
    fn name(&self) -> &'static str {
        "terraform"
    }

    async fn apply(&self, fixture: &Fixture) -> Result<StateSnapshot, ApplyError> {
        let mut session = self.inner.lock().await;
        self.prepare(&mut session, fixture).await?;

        let args = ["apply", "-auto-approve", "-input=false", "-no-color"];
        let run = self.run_tf(&args).await?;
        let outcome = if run.code == 0 {
            Ok(())
        } else if let Some((address, id)) = parse_import_required(&run.log) {
            let message = run
                .log
                .lines()
                .find(|l| l.contains(IMPORT_MARKER))
                .map(|l| l.trim_start_matches("Error: ").trim().to_string())
                .unwrap_or_default();
            Err(ApplyError::ImportRequired { address, id, message })
        } else {
            Err(self.failed(&args, run))
        };

        // Partially applied resources must stay reachable for teardown.
        match (outcome, self.read_state(None).await) {
            (Ok(()), Ok(state)) => {
                session.state = state;
                Ok(session.state.clone())
            }
            (Ok(()), Err(e)) => Err(e),
            (Err(e), Ok(state)) => {
                session.state = state;
                Err(e)
            }
            (Err(e), Err(read)) => {
                warn!(error = %read, "could not read state after failed apply");
                Err(e)
            }
        }
    }

    async fn plan(&self, fixture: &Fixture) -> Result<PlanSummary, ApplyError> {
        let mut session = self.inner.lock().await;
        self.prepare(&mut session, fixture).await?;

        let args = ["plan", "-detailed-exitcode", "-input=false", "-no-color", "-lock=false"];
        let run = self.run_tf(&args).await?;
        match run.code {
            0 => Ok(PlanSummary::default()),
            2 => Ok(parse_plan_counts(&run.log).unwrap_or(PlanSummary {
                change: 1,
                ..Default::default()
            })),
            _ => Err(self.failed(&args, run)),
        }
    }

    async fn import(
        &self,
        address: &str,
        id: &str,
        fixture: &Fixture,
    ) -> Result<ResourceReference, ApplyError> {
        let parsed = Address::parse(address).map_err(|e| ApplyError::Invalid(e.to_string()))?;
        let mut session = self.inner.lock().await;
        self.prepare(&mut session, fixture).await?;

        let scratch = format!("import-{}.tfstate", Uuid::new_v4().simple());
        let state_arg = format!("-state={}", scratch);
        let result = async {
            self.run_checked(&["import", "-input=false", "-no-color", state_arg.as_str(), address, id])
                .await?;
            let imported = self.read_state(Some(&scratch)).await?;
            imported
                .get(parsed.as_str())
                .cloned()
                .ok_or_else(|| ApplyError::Invalid(format!("{} missing from imported state", address)))
        }
        .await;

        let path = self.workspace.join(&scratch);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!(path = %path.display(), error = %e, "scratch state not removed");
        }
        result
    }

    async fn destroy(&self, fixture: &Fixture) -> Result<(), ApplyError> {
        let mut session = self.inner.lock().await;
        self.prepare(&mut session, fixture).await?;
        self.run_checked(&["destroy", "-auto-approve", "-input=false", "-no-color"])
            .await?;
        session.state = StateSnapshot::new();
        Ok(())
    }

    async fn state(&self) -> StateSnapshot {
        self.inner.lock().await.state.clone()
    }
}

/// Creates one [`TerraformEngine`] per scenario under `root/<scenario>-<id>/`.
#[derive(Clone)]
pub struct TerraformEngineFactory {
    binary: String,
    root: PathBuf,
    env: HashMap<String, String>,
    timeout: Duration,
}

impl TerraformEngineFactory {
    pub fn new(binary: impl Into<String>, root: impl Into<PathBuf>, env: HashMap<String, String>) -> Self {
        Self {
            binary: binary.into(),
            root: root.into(),
            env,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl EngineFactory for TerraformEngineFactory {
    fn name(&self) -> &'static str {
        "terraform"
    }

    fn create(&self, scenario: &str) -> Result<Arc<dyn ApplyEngine>, ApplyError> {
        let dir: String = scenario
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let workspace = self
            .root
            .join(format!("{}-{}", dir, &Uuid::new_v4().simple().to_string()[..8]));
        Ok(Arc::new(
            TerraformEngine::new(self.binary.clone(), workspace)
                .with_env(self.env.clone())
                .with_timeout(self.timeout),
        ))
    }
}
