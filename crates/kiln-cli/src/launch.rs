//! Wiring from parsed arguments to the sandbox library.
//!
//! A launch loads the policy, settles the builder endpoint, turns the bind
//! flags into ordered intents and hands the resulting session to the
//! executor. Nothing here retries without isolation.

use std::path::PathBuf;
use std::sync::Arc;

use kiln_config::{Config, IsolationLogs, SandboxMode};
use kiln_sandbox::{
    BUILDER_HOST_ENV, BindIntent, BindKind, BuilderEndpoint, Executor, LogSink, Policy,
    PolicyLoader, PolicySource, PrimitiveLocator, ProbeReport, Prober, SandboxCommand,
    SandboxError, Spawner, build_session, resolve_binds,
};
use tracing::info;

use crate::AppError;
use crate::cli::{BindArgs, ProbeArgs, RunArgs};

const LAUNCH_TARGET: &str = "kiln_cli::launch";

/// Executes launcher actions against a configuration.
pub(crate) struct Launcher<'a, S> {
    config: &'a Config,
    spawner: S,
}

impl<'a, S> Launcher<'a, S>
where
    S: Spawner + Clone,
{
    pub(crate) const fn new(config: &'a Config, spawner: S) -> Self {
        Self { config, spawner }
    }

    /// Runs a command to successful completion.
    ///
    /// A command that exits non-zero surfaces as
    /// [`SandboxError::CommandFailure`] carrying its status.
    pub(crate) fn run(&self, args: RunArgs) -> Result<(), AppError> {
        let mut command = build_command(&args)?;

        if self.config.sandbox_mode() == SandboxMode::Disabled {
            let invocation = command.direct_invocation(args.binds.workspace.as_deref());
            return Ok(self.executor().execute_direct(&invocation).into_outcome()?);
        }

        let policy = self.load_policy()?;
        let endpoint = builder_endpoint(&policy, &args.binds)?;
        if let Some(tcp) = endpoint.as_ref().filter(|e| e.requires_host_network()) {
            command = command.with_env(BUILDER_HOST_ENV, tcp.to_string())?;
        }
        let intents = bind_intents(&args.binds, endpoint.as_ref())?;
        let binds = resolve_binds(&intents).map_err(SandboxError::from)?;

        let sink = match (args.log_file, self.config.isolation_logs()) {
            (Some(path), _) => Some(LogSink::File(path)),
            (None, IsolationLogs::Capture) => Some(LogSink::Capture),
            (None, IsolationLogs::Stream) => None,
        };
        let session = build_session(policy, binds, command, sink);
        Ok(self.executor().execute(session).into_outcome()?)
    }

    /// Probes whether a path is visible inside the sandbox.
    ///
    /// Probes always run isolated, whatever the configured sandbox mode.
    pub(crate) fn probe(&self, args: &ProbeArgs) -> Result<ProbeReport, AppError> {
        let policy = self.load_policy()?;
        let endpoint = builder_endpoint(&policy, &args.binds)?;
        let intents = bind_intents(&args.binds, endpoint.as_ref())?;
        let prober = Prober::new(self.executor()).with_program(self.config.probe_program());
        Ok(prober.probe(policy, &intents, &args.path)?)
    }

    /// Renders the policy's primitive description.
    pub(crate) fn render_policy(&self) -> Result<String, AppError> {
        Ok(self.load_policy()?.render())
    }

    fn load_policy(&self) -> Result<Arc<Policy>, SandboxError> {
        let source = PolicySource::File(self.config.policy_path().as_std_path().to_path_buf());
        let policy = PolicyLoader::load(&source)?;
        info!(
            target: LAUNCH_TARGET,
            policy = %policy.name(),
            origin = %policy.origin(),
            "loaded isolation policy"
        );
        Ok(Arc::new(policy))
    }

    fn executor(&self) -> Executor<S> {
        Executor::new(PrimitiveLocator::new(self.config.sandbox_binary()))
            .with_spawner(self.spawner.clone())
            .with_setup_failure_exit(self.config.setup_failure_exit())
    }
}

fn build_command(args: &RunArgs) -> Result<SandboxCommand, AppError> {
    let mut command = SandboxCommand::from_argv(args.command.iter().cloned())?;
    for entry in &args.env {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| AppError::MalformedEnv(entry.clone()))?;
        command = command.with_env(key, value)?;
    }
    if let Some(workdir) = &args.workdir {
        command = command.with_workdir(workdir)?;
    }
    Ok(command)
}

/// Picks the builder endpoint: the command line's when given, else the
/// policy's.
fn builder_endpoint(
    policy: &Policy,
    binds: &BindArgs,
) -> Result<Option<BuilderEndpoint>, AppError> {
    let Some(text) = binds.builder_endpoint.as_deref() else {
        return Ok(policy.builder_endpoint().cloned());
    };
    let endpoint: BuilderEndpoint = text.parse()?;
    policy
        .admit_endpoint(&endpoint)
        .map_err(SandboxError::from)?;
    Ok(Some(endpoint))
}

/// Turns the bind flags into intents: workspace, cache, builder socket,
/// explicit binds, then the home directory.
pub(crate) fn bind_intents(
    binds: &BindArgs,
    endpoint: Option<&BuilderEndpoint>,
) -> Result<Vec<BindIntent>, AppError> {
    let mut intents = Vec::new();
    if let Some(workspace) = &binds.workspace {
        intents.push(BindIntent::new(
            BindKind::Workspace,
            workspace,
            &binds.workspace_dest,
            true,
        ));
    }
    if let Some(cache) = &binds.cache {
        intents.push(BindIntent::new(
            BindKind::Cache,
            cache,
            &binds.cache_dest,
            true,
        ));
    }
    if let Some(intent) = endpoint.and_then(|e| e.bind_intent(&binds.builder_dest)) {
        intents.push(intent);
    }
    intents.extend(binds.binds.iter().map(kiln_config::BindSpec::intent));
    if binds.mount_home {
        let home: PathBuf = dirs::home_dir().ok_or(AppError::HomeUnavailable)?;
        intents.push(BindIntent::new(BindKind::Home, &home, &home, false));
    }
    Ok(intents)
}
