//! Docker Compose implementation of the container runtime.
//!
//! Every operation shells out to the `docker` CLI from the project
//! directory, optionally through `sudo`. Commands are bounded by a timeout
//! and killed when it expires; the group launch is the exception and runs
//! detached until it exits on its own.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use linkguard_core::error::RuntimeCommandError;
use linkguard_core::runtime::{ContainerRuntime, UnitId};
use linkguard_core::settings::RuntimeSettings;

/// Slack on top of a per-unit grace period before the CLI call itself is
/// considered hung.
const UNIT_COMMAND_SLACK: Duration = Duration::from_secs(10);

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DockerCompose {
    project_dir: PathBuf,
    profile: Option<String>,
    sudo: bool,
    command_timeout: Duration,
    launch_log: Option<PathBuf>,
}

impl DockerCompose {
    pub fn new(settings: &RuntimeSettings) -> Self {
        Self {
            project_dir: settings.project_dir.clone(),
            profile: settings.profile.clone(),
            sudo: settings.sudo,
            command_timeout: settings.stop_timeout,
            launch_log: settings.launch_log.clone(),
        }
    }

    /// `docker <args>`, wrapped in sudo when configured.
    fn docker<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv: Vec<String> = vec!["docker".into()];
        argv.extend(args.into_iter().map(Into::into));
        if self.sudo {
            Invocation {
                program: "sudo".into(),
                args: argv,
            }
        } else {
            let program = argv.remove(0);
            Invocation {
                program,
                args: argv,
            }
        }
    }

    /// `docker compose [--profile P] <args>`.
    fn compose(&self, args: &[&str]) -> Invocation {
        let mut argv: Vec<String> = vec!["compose".into()];
        if let Some(profile) = &self.profile {
            argv.push("--profile".into());
            argv.push(profile.clone());
        }
        argv.extend(args.iter().map(|a| a.to_string()));
        self.docker(argv)
    }

    fn command(&self, inv: &Invocation) -> Command {
        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null());
        cmd
    }

    /// Run to completion within `timeout`, returning stdout.
    async fn run(&self, inv: Invocation, timeout: Duration) -> Result<String, RuntimeCommandError> {
        tracing::debug!(command = %inv, "running runtime command");
        let mut cmd = self.command(&inv);
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => {
                return Err(RuntimeCommandError::Timeout {
                    command: inv.to_string(),
                    timeout,
                });
            }
            Ok(Err(source)) => {
                return Err(RuntimeCommandError::Spawn {
                    command: inv.to_string(),
                    source,
                });
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(RuntimeCommandError::Failed {
                command: inv.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn ids(&self, inv: Invocation) -> Result<Vec<UnitId>, RuntimeCommandError> {
        let stdout = self.run(inv, self.command_timeout).await?;
        Ok(parse_ids(&stdout))
    }

    fn launch_stdio(&self) -> Result<(Stdio, Stdio), std::io::Error> {
        match &self.launch_log {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                let err = file.try_clone()?;
                Ok((Stdio::from(file), Stdio::from(err)))
            }
            None => Ok((Stdio::null(), Stdio::null())),
        }
    }
}

/// One container id per non-empty line.
fn parse_ids(stdout: &str) -> Vec<UnitId> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(UnitId::from)
        .collect()
}

#[async_trait]
impl ContainerRuntime for DockerCompose {
    async fn list_active(&self) -> Result<Vec<UnitId>, RuntimeCommandError> {
        self.ids(self.compose(&["ps", "-q"])).await
    }

    async fn stop_group(&self, deadline: Duration) -> Result<(), RuntimeCommandError> {
        self.run(self.compose(&["down"]), deadline).await.map(drop)
    }

    async fn stop_unit(&self, id: &UnitId, grace: Duration) -> Result<(), RuntimeCommandError> {
        let grace_s = grace.as_secs().to_string();
        let inv = self.docker(["stop", "-t", grace_s.as_str(), id.as_str()]);
        self.run(inv, grace + UNIT_COMMAND_SLACK).await.map(drop)
    }

    async fn kill_unit(&self, id: &UnitId) -> Result<(), RuntimeCommandError> {
        let inv = self.docker(["kill", id.as_str()]);
        self.run(inv, UNIT_COMMAND_SLACK).await.map(drop)
    }

    async fn prune_units(&self) -> Result<(), RuntimeCommandError> {
        let inv = self.docker(["container", "prune", "-f"]);
        self.run(inv, self.command_timeout).await.map(drop)
    }

    async fn prune_networks(&self) -> Result<(), RuntimeCommandError> {
        let inv = self.docker(["network", "prune", "-f"]);
        self.run(inv, self.command_timeout).await.map(drop)
    }

    async fn launch_group(&self) -> Result<(), RuntimeCommandError> {
        let inv = self.compose(&["up"]);
        let spawn_err = |source| RuntimeCommandError::Spawn {
            command: inv.to_string(),
            source,
        };

        let (stdout, stderr) = self.launch_stdio().map_err(spawn_err)?;
        let mut child = self
            .command(&inv)
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(spawn_err)?;

        tracing::info!(command = %inv, pid = child.id(), "launched managed group");
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => tracing::info!("managed group exited"),
                Ok(status) => tracing::warn!(code = status.code(), "managed group exited with failure"),
                Err(e) => tracing::warn!(error = %e, "could not reap managed group process"),
            }
        });
        Ok(())
    }

    async fn nuclear_cleanup(&self) -> Result<(), RuntimeCommandError> {
        let mut first_err = None;
        let mut note = |step: &str, result: Result<(), RuntimeCommandError>| {
            if let Err(e) = result {
                tracing::warn!(step, error = %e, "nuclear cleanup step failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        };

        match self.ids(self.docker(["ps", "-q"])).await {
            Ok(running) if !running.is_empty() => {
                let mut args = vec!["kill".to_string()];
                args.extend(running.into_iter().map(|id| id.0));
                note("kill", self.run(self.docker(args), self.command_timeout).await.map(drop));
            }
            Ok(_) => {}
            Err(e) => note("kill", Err(e)),
        }

        match self.ids(self.docker(["ps", "-a", "-q"])).await {
            Ok(all) if !all.is_empty() => {
                let mut args = vec!["rm".to_string(), "-f".to_string()];
                args.extend(all.into_iter().map(|id| id.0));
                note("rm", self.run(self.docker(args), self.command_timeout).await.map(drop));
            }
            Ok(_) => {}
            Err(e) => note("rm", Err(e)),
        }

        for (step, args) in [
            ("network prune", ["network", "prune", "-f"]),
            ("volume prune", ["volume", "prune", "-f"]),
            ("system prune", ["system", "prune", "-f"]),
        ] {
            note(step, self.run(self.docker(args), self.command_timeout).await.map(drop));
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
