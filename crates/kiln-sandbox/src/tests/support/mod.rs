//! Shared fixtures for launcher behavioural tests.

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::binds::{BindIntent, ResolvedBind};
use crate::error::{BindError, InfraFailure, SandboxError};
use crate::executor::{ChildExit, ExecutionResult, Executor, Spawner};
use crate::policy::Policy;
use crate::probe::ProbeReport;
use crate::runtime::PrimitiveLocator;
use crate::session::Invocation;

pub const HERMETIC_POLICY: &str = r"
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

/// Hermetic policy that also exposes the host's `/usr` read-only, so the
/// `test` program used by visibility checks can run.
pub const TOOLED_POLICY: &str = r"
name: tooled
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
  - source: /usr
    destination: /usr
    kind: bind
";

/// Exit status the fake primitive reports when it cannot exec the command.
pub const EXEC_FAILURE_EXIT: i32 = 255;

/// Spawner emulating the primitive without creating namespaces.
///
/// `PROGRAM -e PATH` commands answer from the mounts the primitive would
/// set up: static bind mounts from the rendered policy plus the bind flags
/// on the command line, over an empty tmpfs root. The program itself must be
/// reachable through those mounts, otherwise the primitive fails to exec it
/// and reports [`EXEC_FAILURE_EXIT`]. Other commands exit with
/// `command_exit`.
#[derive(Debug, Clone)]
pub struct FakePrimitive {
    pub command_exit: i32,
    pub spawned: Arc<Mutex<Vec<Invocation>>>,
}

impl FakePrimitive {
    fn probe_answer(invocation: &Invocation, program: &Path, target: &Path) -> i32 {
        let mut mappings = static_bind_mappings(invocation.args());
        mappings.extend(bind_mappings(invocation.args()));

        if !is_visible(&mappings, program) {
            return EXEC_FAILURE_EXIT;
        }
        i32::from(!is_visible(&mappings, target))
    }
}

impl Spawner for FakePrimitive {
    fn run(&self, invocation: &Invocation) -> Result<ChildExit, InfraFailure> {
        self.spawned
            .lock()
            .expect("spawn log poisoned")
            .push(invocation.clone());

        let command = invocation.command_args();
        let code = match command {
            [program, flag, target] if flag == "-e" => {
                Self::probe_answer(invocation, Path::new(program), Path::new(target))
            }
            _ => self.command_exit,
        };
        Ok(ChildExit::Exited(code))
    }
}

fn is_visible(mappings: &[(PathBuf, PathBuf)], path: &Path) -> bool {
    mappings
        .iter()
        .filter_map(|(host, destination)| {
            path.strip_prefix(destination)
                .ok()
                .map(|rest| host.join(rest))
        })
        .any(|host_path| host_path.exists())
}

fn bind_mappings(args: &[OsString]) -> Vec<(PathBuf, PathBuf)> {
    args.windows(2)
        .filter_map(|pair| match pair {
            [flag, mapping] if flag == "--bindmount" || flag == "--bindmount_ro" => {
                let text = mapping.to_string_lossy();
                text.split_once(':')
                    .map(|(host, dest)| (PathBuf::from(host), PathBuf::from(dest)))
            }
            _ => None,
        })
        .collect()
}

/// Reads `src`/`dst` pairs of bind mounts from the policy file named by
/// `--config`. The root mount is skipped.
fn static_bind_mappings(args: &[OsString]) -> Vec<(PathBuf, PathBuf)> {
    let Some(config) = args.windows(2).find_map(|pair| match pair {
        [flag, path] if flag == "--config" => Some(PathBuf::from(path)),
        _ => None,
    }) else {
        return Vec::new();
    };
    let text = fs::read_to_string(config).expect("policy file exists during spawn");

    let unquote = |value: &str| PathBuf::from(value.trim().trim_matches('"'));
    let mut mappings = Vec::new();
    let mut source = None;
    for line in text.lines().map(str::trim) {
        if line == "mount {" {
            source = None;
        } else if let Some(value) = line.strip_prefix("src:") {
            source = Some(unquote(value));
        } else if let Some(value) = line.strip_prefix("dst:") {
            let destination = unquote(value);
            if let Some(host) = source.take()
                && destination != Path::new("/")
            {
                mappings.push((host, destination));
            }
        }
    }
    mappings
}

/// Shared state for behavioural launcher tests.
pub struct TestWorld {
    pub dir: TempDir,
    pub primitive: PathBuf,
    pub primitive_missing: bool,
    pub policy: Option<Arc<Policy>>,
    pub intents: Vec<BindIntent>,
    pub binds: Option<Result<Vec<ResolvedBind>, BindError>>,
    pub command_exit: i32,
    pub spawned: Arc<Mutex<Vec<Invocation>>>,
    pub result: Option<ExecutionResult>,
    pub probe: Option<Result<ProbeReport, SandboxError>>,
}

impl TestWorld {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to allocate temporary directory");
        let primitive = dir.path().join("nsjail");
        fs::write(&primitive, "#!/bin/sh\nexit 255\n").expect("write fake primitive");
        fs::set_permissions(&primitive, fs::Permissions::from_mode(0o755))
            .expect("make fake primitive executable");

        Self {
            dir,
            primitive,
            primitive_missing: false,
            policy: None,
            intents: Vec::new(),
            binds: None,
            command_exit: 0,
            spawned: Arc::new(Mutex::new(Vec::new())),
            result: None,
            probe: None,
        }
    }

    pub fn host_path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn policy(&self) -> Arc<Policy> {
        self.policy.clone().expect("policy not configured")
    }

    pub fn executor(&self) -> Executor<FakePrimitive> {
        let locator = if self.primitive_missing {
            PrimitiveLocator::new("nsjail").with_search_path(self.host_path("empty-bin"))
        } else {
            PrimitiveLocator::new(self.primitive.display().to_string())
        };
        Executor::new(locator).with_spawner(FakePrimitive {
            command_exit: self.command_exit,
            spawned: Arc::clone(&self.spawned),
        })
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().expect("spawn log poisoned").len()
    }
}
