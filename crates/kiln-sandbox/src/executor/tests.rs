//! Unit tests for session execution and exit classification.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::policy::Policy;
use crate::session::{SandboxCommand, build_session};

const POLICY: &str = r"
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
";

/// Stand-in primitive: logs one line when asked to, then execs the command
/// after `--`.
const FAKE_PRIMITIVE: &str = r#"#!/bin/sh
while [ "$#" -gt 0 ]; do
  case "$1" in
    --log) echo "[W] fake primitive ready" >> "$2"; shift 2 ;;
    --) shift; exec "$@" ;;
    *) shift ;;
  esac
done
exit 255
"#;

struct Harness {
    dir: TempDir,
    primitive: PathBuf,
}

#[fixture]
fn harness() -> Harness {
    let dir = TempDir::new().expect("create temp dir");
    let primitive = dir.path().join("nsjail");
    fs::write(&primitive, FAKE_PRIMITIVE).expect("write fake primitive");
    fs::set_permissions(&primitive, fs::Permissions::from_mode(0o755))
        .expect("make fake primitive executable");
    Harness { dir, primitive }
}

impl Harness {
    fn locator(&self) -> PrimitiveLocator {
        PrimitiveLocator::new(self.primitive.display().to_string())
    }
}

fn session(command: SandboxCommand, log_sink: Option<LogSink>) -> SandboxSession {
    let policy = Policy::from_yaml("test", POLICY).expect("policy should load");
    build_session(Arc::new(policy), Vec::new(), command, log_sink)
}

fn shell(script: &str) -> SandboxCommand {
    SandboxCommand::new("/bin/sh").arg("-c").arg(script)
}

#[test]
fn missing_primitive_never_spawns() {
    let empty = TempDir::new().expect("create temp dir");
    let mut spawner = MockSpawner::new();
    spawner.expect_run().never();
    let executor = Executor::new(PrimitiveLocator::new("nsjail").with_search_path(empty.path()))
        .with_spawner(spawner);

    let result = executor.execute(session(shell("true"), None));

    assert!(result.sandbox_infra_failure());
    assert_eq!(result.exit_code(), NO_PROCESS_EXIT);
    assert!(matches!(
        result.infra_failure(),
        Some(InfraFailure::BinaryMissing { .. })
    ));
}

#[rstest]
fn command_exit_codes_pass_through(harness: Harness) {
    let mut spawner = MockSpawner::new();
    spawner
        .expect_run()
        .times(1)
        .returning(|_| Ok(ChildExit::Exited(3)));
    let executor = Executor::new(harness.locator()).with_spawner(spawner);

    let result = executor.execute(session(shell("exit 3"), None));

    assert_eq!(result.exit_code(), 3);
    assert!(!result.sandbox_infra_failure());
    assert!(matches!(
        result.into_outcome(),
        Err(SandboxError::CommandFailure { exit_code: 3, .. })
    ));
}

#[rstest]
#[case(DEFAULT_SETUP_FAILURE_EXIT, DEFAULT_SETUP_FAILURE_EXIT)]
#[case(101, 101)]
fn reserved_status_is_an_infra_failure(
    harness: Harness,
    #[case] reserved: i32,
    #[case] observed: i32,
) {
    let mut spawner = MockSpawner::new();
    spawner
        .expect_run()
        .returning(move |_| Ok(ChildExit::Exited(observed)));
    let executor = Executor::new(harness.locator())
        .with_spawner(spawner)
        .with_setup_failure_exit(reserved);

    let result = executor.execute(session(shell("true"), None));

    assert!(result.sandbox_infra_failure());
    assert!(matches!(
        result.infra_failure(),
        Some(InfraFailure::PrimitiveRejected { exit_code }) if *exit_code == observed
    ));
}

#[rstest]
fn spawn_errors_are_infra_failures(harness: Harness) {
    let mut spawner = MockSpawner::new();
    spawner.expect_run().returning(|invocation| {
        Err(InfraFailure::Spawn {
            binary: invocation.program().to_path_buf(),
            source: Arc::new(io::Error::from(io::ErrorKind::PermissionDenied)),
        })
    });
    let executor = Executor::new(harness.locator()).with_spawner(spawner);

    let outcome = executor.execute(session(shell("true"), None)).into_outcome();

    assert!(matches!(outcome, Err(ref error) if error.is_infra()));
}

#[rstest]
fn policy_description_is_materialised_before_spawn(harness: Harness) {
    let mut spawner = MockSpawner::new();
    spawner.expect_run().returning(|invocation| {
        let args = invocation.args();
        let config = args
            .iter()
            .position(|arg| arg == "--config")
            .and_then(|index| args.get(index + 1))
            .expect("--config should be passed");
        let rendered = fs::read_to_string(config).expect("policy file should exist");
        assert!(rendered.contains("mode: ONCE"));
        Ok(ChildExit::Exited(0))
    });
    let executor = Executor::new(harness.locator()).with_spawner(spawner);

    let result = executor.execute(session(shell("true"), None));

    assert!(result.succeeded());
    assert!(result.log_excerpt().is_none());
}

#[rstest]
fn real_primitive_propagates_exit_and_log(harness: Harness) {
    let executor = Executor::new(harness.locator());

    let result = executor.execute(session(shell("exit 3"), Some(LogSink::Capture)));

    assert_eq!(result.exit_code(), 3);
    assert!(!result.sandbox_infra_failure());
    assert_eq!(result.log_excerpt(), Some("[W] fake primitive ready"));
}

#[rstest]
fn kept_log_files_survive_the_run(harness: Harness) {
    let log = harness.dir.path().join("logs").join("nsjail.log");
    let executor = Executor::new(harness.locator());

    let result = executor.execute(session(shell("true"), Some(LogSink::File(log.clone()))));

    assert!(result.succeeded());
    let contents = fs::read_to_string(&log).expect("log file should be kept");
    assert!(contents.contains("fake primitive ready"));
}

#[rstest]
fn signalled_commands_report_shell_codes(harness: Harness) {
    let executor = Executor::new(harness.locator());

    let result = executor.execute(session(shell("kill -TERM $$"), None));

    assert_eq!(result.exit_code(), 128 + 15);
    assert!(!result.sandbox_infra_failure());
}

#[test]
fn direct_execution_skips_the_primitive() {
    let mut spawner = MockSpawner::new();
    spawner
        .expect_run()
        .withf(|invocation| invocation.program() == Path::new("/bin/sh"))
        .returning(|_| Ok(ChildExit::Exited(0)));
    let executor = Executor::new(PrimitiveLocator::new("unused")).with_spawner(spawner);

    let result = executor.execute_direct(&shell("true").direct_invocation(None));

    assert!(result.succeeded());
}
