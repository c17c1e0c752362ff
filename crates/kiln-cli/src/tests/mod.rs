//! Unit tests for the CLI runtime.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use kiln_config::{Config, SandboxMode};
use kiln_sandbox::{ChildExit, InfraFailure, Invocation, Spawner};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use crate::{AppError, ConfigLoader, IoStreams, exit_code_from_status, run_with};


const POLICY: &str = r"
name: hermetic
namespaces:
  process: true
  mount: true
  network: true
  user: true
  ipc: true
  uts: true
  cgroup: true
root_filesystem:
  kind: tmpfs
mounts:
  - destination: /proc
    kind: proc
";

/// Returns a fixed configuration and records the arguments it was given.
struct StubLoader {
    config: Config,
    seen: RefCell<Vec<OsString>>,
}

impl ConfigLoader for StubLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        self.seen.replace(args.to_vec());
        Ok(self.config.clone())
    }
}

/// Records invocations and answers with a fixed exit, optionally writing
/// `log` to the primitive's `--log` file first.
#[derive(Debug, Clone)]
pub(super) struct RecordingSpawner {
    exit: ChildExit,
    log: Option<&'static str>,
    pub(super) spawned: Arc<Mutex<Vec<Invocation>>>,
}

impl RecordingSpawner {
    pub(super) fn exiting(code: i32) -> Self {
        Self {
            exit: ChildExit::Exited(code),
            log: None,
            spawned: Arc::default(),
        }
    }

    const fn logging(mut self, text: &'static str) -> Self {
        self.log = Some(text);
        self
    }

    pub(super) fn invocations(&self) -> Vec<Invocation> {
        self.spawned.lock().expect("spawn log poisoned").clone()
    }
}

impl Spawner for RecordingSpawner {
    fn run(&self, invocation: &Invocation) -> Result<ChildExit, InfraFailure> {
        self.spawned
            .lock()
            .expect("spawn log poisoned")
            .push(invocation.clone());
        if let Some(text) = self.log {
            let log_file = invocation
                .args()
                .windows(2)
                .find_map(|pair| match pair {
                    [flag, path] if flag == "--log" => Some(path.clone()),
                    _ => None,
                })
                .expect("captured runs pass --log");
            fs::write(log_file, text).expect("write isolation log");
        }
        Ok(self.exit)
    }
}

pub(super) struct Host {
    pub(super) dir: TempDir,
    pub(super) config: Config,
}

impl Host {
    pub(super) fn utf8(&self, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().join(name)).expect("temp path is UTF-8")
    }

    pub(super) fn write_policy(&self, yaml: &str) {
        fs::write(self.dir.path().join("policy.yaml"), yaml).expect("write policy");
    }
}

#[fixture]
pub(super) fn host() -> Host {
    let dir = TempDir::new().expect("create temp dir");
    fs::write(dir.path().join("policy.yaml"), POLICY).expect("write policy");
    fs::create_dir(dir.path().join("checkout")).expect("create workspace");
    let policy_path =
        Utf8PathBuf::from_path_buf(dir.path().join("policy.yaml")).expect("temp path is UTF-8");
    let config = Config {
        policy_path: Some(policy_path),
        sandbox_binary: Some(String::from("/bin/sh")),
        ..Config::default()
    };
    Host { dir, config }
}

struct Outcome {
    code: ExitCode,
    stdout: String,
    stderr: String,
    loader_args: Vec<OsString>,
}

fn invoke(config: Config, spawner: RecordingSpawner, args: &[&str]) -> Outcome {
    let loader = StubLoader {
        config,
        seen: RefCell::new(Vec::new()),
    };
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = {
        let mut io = IoStreams::new(&mut stdout, &mut stderr);
        run_with(
            std::iter::once("kiln").chain(args.iter().copied()).map(OsString::from),
            &mut io,
            &loader,
            spawner,
        )
    };
    Outcome {
        code,
        stdout: String::from_utf8(stdout).expect("stdout is UTF-8"),
        stderr: String::from_utf8(stderr).expect("stderr is UTF-8"),
        loader_args: loader.seen.into_inner(),
    }
}

#[rstest]
fn render_policy_prints_the_primitive_description(host: Host) {
    let outcome = invoke(host.config, RecordingSpawner::exiting(0), &["render-policy"]);

    assert_eq!(outcome.code, ExitCode::SUCCESS);
    assert!(outcome.stdout.contains("name: \"hermetic\""), "{}", outcome.stdout);
    assert!(outcome.stdout.contains("mode: ONCE"));
}

#[rstest]
fn missing_policy_fails_with_a_stage_tag(host: Host) {
    let config = Config {
        policy_path: Some(host.utf8("absent.yaml")),
        ..host.config
    };
    let spawner = RecordingSpawner::exiting(0);

    let outcome = invoke(config, spawner.clone(), &["run", "--", "make"]);

    assert_eq!(outcome.code, ExitCode::from(125));
    assert!(outcome.stderr.starts_with("kiln: policy:"), "{}", outcome.stderr);
    assert!(spawner.invocations().is_empty());
}

#[rstest]
fn run_propagates_the_command_exit_code(host: Host) {
    let workspace = host.utf8("checkout");
    let spawner = RecordingSpawner::exiting(3);

    let outcome = invoke(
        host.config,
        spawner.clone(),
        &["run", "--workspace", workspace.as_str(), "--", "make", "all"],
    );

    assert_eq!(outcome.code, ExitCode::from(3));
    assert!(outcome.stderr.is_empty(), "{}", outcome.stderr);
    let invocations = spawner.invocations();
    let invocation = invocations.first().expect("one invocation");
    assert_eq!(invocation.program().to_str(), Some("/bin/sh"));
    assert_eq!(
        invocation.command_args(),
        [OsString::from("make"), OsString::from("all")]
    );
    assert!(invocation.args().iter().any(|arg| arg == "--bindmount"));
}

#[rstest]
fn failing_commands_show_the_isolation_log_tail(host: Host) {
    let workspace = host.utf8("checkout");
    let spawner = RecordingSpawner::exiting(3).logging("[W] mount of /cache skipped\n");

    let outcome = invoke(
        host.config,
        spawner,
        &["run", "--workspace", workspace.as_str(), "--", "make", "all"],
    );

    assert_eq!(outcome.code, ExitCode::from(3));
    assert!(
        outcome
            .stderr
            .contains("kiln: isolation log (tail):\n[W] mount of /cache skipped"),
        "{}",
        outcome.stderr
    );
    assert!(!outcome.stderr.contains("kiln: command:"), "{}", outcome.stderr);
}

#[rstest]
fn successful_commands_stay_quiet_despite_isolation_logs(host: Host) {
    let spawner = RecordingSpawner::exiting(0).logging("[I] mode: ONCE\n");

    let outcome = invoke(host.config, spawner, &["run", "--", "true"]);

    assert_eq!(outcome.code, ExitCode::SUCCESS);
    assert!(outcome.stderr.is_empty(), "{}", outcome.stderr);
}

#[rstest]
fn missing_primitive_never_spawns(host: Host) {
    let config = Config {
        sandbox_binary: Some(host.utf8("no-such-nsjail").into_string()),
        ..host.config
    };
    let spawner = RecordingSpawner::exiting(0);

    let outcome = invoke(config, spawner.clone(), &["run", "--", "make"]);

    assert_eq!(outcome.code, ExitCode::from(125));
    assert!(outcome.stderr.starts_with("kiln: sandbox:"), "{}", outcome.stderr);
    assert!(spawner.invocations().is_empty());
}

#[rstest]
fn reserved_setup_status_is_an_infrastructure_failure(host: Host) {
    let outcome = invoke(host.config, RecordingSpawner::exiting(255), &["run", "--", "make"]);

    assert_eq!(outcome.code, ExitCode::from(125));
    assert!(outcome.stderr.contains("sandbox:"), "{}", outcome.stderr);
}

#[rstest]
fn disabled_mode_runs_the_command_directly(host: Host) {
    let config = Config {
        sandbox_mode: Some(SandboxMode::Disabled),
        policy_path: Some(host.utf8("absent.yaml")),
        ..host.config
    };
    let spawner = RecordingSpawner::exiting(7);

    let outcome = invoke(config, spawner.clone(), &["run", "--env", "CI=1", "--", "make"]);

    assert_eq!(outcome.code, ExitCode::from(7));
    let invocations = spawner.invocations();
    let invocation = invocations.first().expect("one invocation");
    assert_eq!(invocation.program().to_str(), Some("make"));
    assert_eq!(invocation.env().get("CI").map(String::as_str), Some("1"));
}

#[rstest]
#[case(0, ExitCode::SUCCESS, "visible: /etc/shadow")]
#[case(1, ExitCode::from(1), "hidden: /etc/shadow")]
fn probe_reports_visibility(
    host: Host,
    #[case] status: i32,
    #[case] expected: ExitCode,
    #[case] line: &str,
) {
    let outcome = invoke(
        host.config,
        RecordingSpawner::exiting(status),
        &["probe", "/etc/shadow"],
    );

    assert_eq!(outcome.code, expected);
    assert_eq!(outcome.stdout.trim_end(), line);
}

#[rstest]
fn inconclusive_probe_exits_with_the_failure_code(host: Host) {
    let outcome = invoke(host.config, RecordingSpawner::exiting(2), &["probe", "/etc"]);

    assert_eq!(outcome.code, ExitCode::from(125));
    assert!(outcome.stderr.contains("probe:"), "{}", outcome.stderr);
}

#[rstest]
fn tcp_builder_needs_the_host_network(host: Host) {
    let outcome = invoke(
        host.config,
        RecordingSpawner::exiting(0),
        &["run", "--builder-endpoint", "tcp://127.0.0.1:1234", "--", "docker", "build", "."],
    );

    assert_eq!(outcome.code, ExitCode::from(125));
    assert!(outcome.stderr.starts_with("kiln: policy:"), "{}", outcome.stderr);
}

#[rstest]
fn tcp_builder_is_exported_to_the_command(host: Host) {
    host.write_policy(&POLICY.replace("network: true", "network: false"));
    let spawner = RecordingSpawner::exiting(0);

    let outcome = invoke(
        host.config,
        spawner.clone(),
        &["run", "--builder-endpoint", "tcp://127.0.0.1:1234", "--", "docker", "build", "."],
    );

    assert_eq!(outcome.code, ExitCode::SUCCESS, "{}", outcome.stderr);
    let invocations = spawner.invocations();
    let invocation = invocations.first().expect("one invocation");
    assert!(
        invocation
            .args()
            .iter()
            .any(|arg| arg == "KILN_BUILDER_HOST=tcp://127.0.0.1:1234"),
        "{:?}",
        invocation.args()
    );
}

#[rstest]
fn malformed_environment_entries_are_rejected(host: Host) {
    let outcome = invoke(
        host.config,
        RecordingSpawner::exiting(0),
        &["run", "--env", "NOVALUE", "--", "make"],
    );

    assert_eq!(outcome.code, ExitCode::from(125));
    assert!(outcome.stderr.contains("NOVALUE"), "{}", outcome.stderr);
}

#[rstest]
fn config_flags_reach_the_loader_only(host: Host) {
    let outcome = invoke(
        host.config,
        RecordingSpawner::exiting(0),
        &["--log-filter", "debug", "render-policy"],
    );

    assert_eq!(outcome.code, ExitCode::SUCCESS, "{}", outcome.stderr);
    assert_eq!(
        outcome.loader_args,
        [
            OsString::from("kiln"),
            OsString::from("--log-filter"),
            OsString::from("debug")
        ]
    );
}

#[rstest]
fn missing_command_is_a_usage_error(host: Host) {
    let outcome = invoke(host.config, RecordingSpawner::exiting(0), &["run"]);

    assert_eq!(outcome.code, ExitCode::from(2));
    assert!(outcome.stderr.contains("Usage"), "{}", outcome.stderr);
}

#[rstest]
fn help_goes_to_stdout(host: Host) {
    let outcome = invoke(host.config, RecordingSpawner::exiting(0), &["--help"]);

    assert_eq!(outcome.code, ExitCode::SUCCESS);
    assert!(outcome.stdout.contains("render-policy"));
}

#[rstest]
#[case(0, ExitCode::SUCCESS)]
#[case(42, ExitCode::from(42))]
#[case(143, ExitCode::from(143))]
#[case(-1, ExitCode::from(125))]
#[case(300, ExitCode::from(125))]
fn statuses_map_onto_exit_codes(#[case] status: i32, #[case] expected: ExitCode) {
    assert_eq!(exit_code_from_status(status), expected);
}
