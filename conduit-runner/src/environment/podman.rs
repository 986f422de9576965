//! Podman environments
//!
//! Each custom task gets its own container:
//! - created detached from the task image, idling on `sleep infinity`
//! - seeded with the task environment variables
//! - the script runs through `podman exec` as one `sh -c` invocation
//! - removed with `podman rm -f` on release

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::{Environment, EnvironmentError, EnvironmentProvider, EnvironmentSpec, ExitReport};

/// Label carrying the identity the task runs under
const SERVICE_ACCOUNT_LABEL: &str = "conduit.service-account";

/// Creates task environments with podman
#[derive(Debug, Clone)]
pub struct PodmanProvider {
    binary: String,
}

impl PodmanProvider {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Checks that podman is installed and answering
    pub async fn check_available(&self) -> Result<String, EnvironmentError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                EnvironmentError::Create(format!(
                    "failed to execute '{} --version': {}",
                    self.binary, e
                ))
            })?;

        if !output.status.success() {
            return Err(EnvironmentError::Create(format!(
                "{} is not working correctly",
                self.binary
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Podman is available: {}", version);
        Ok(version)
    }

    /// Arguments of the `podman run` call creating the environment
    fn run_args(spec: &EnvironmentSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--entrypoint".to_string(),
            "/bin/sh".to_string(),
        ];

        for variable in &spec.environment_variables {
            args.push("-e".to_string());
            args.push(variable.clone());
        }

        if let Some(account) = &spec.service_account {
            args.push("--label".to_string());
            args.push(format!("{SERVICE_ACCOUNT_LABEL}={account}"));
            args.push("-e".to_string());
            args.push(format!("SERVICE_ACCOUNT={account}"));
        }

        args.push(spec.image.clone());
        args.push("-c".to_string());
        args.push("sleep infinity".to_string());
        args
    }
}

#[async_trait]
impl EnvironmentProvider for PodmanProvider {
    async fn create(&self, spec: &EnvironmentSpec) -> Result<Box<dyn Environment>, EnvironmentError> {
        info!("Creating container {} from image {}", spec.name, spec.image);

        let pending = PendingContainer::new(&self.binary, &spec.name);

        // kill_on_drop stops a pull still in progress when the task deadline
        // drops this future; `pending` then removes whatever was created
        let output = Command::new(&self.binary)
            .args(Self::run_args(spec))
            .kill_on_drop(true)
            .output()
            .await;
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                // podman never started, so there is nothing to remove
                pending.disarm();
                return Err(EnvironmentError::Create(format!(
                    "failed to execute podman run: {e}"
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let message = format!(
                "podman run for image {} exited with {}: {}",
                spec.image,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
            error!("{}", message);

            // A failed run can still leave a created container behind.
            pending.remove().await;

            return Err(EnvironmentError::Create(message));
        }

        pending.disarm();
        debug!(
            "Container {} started with ID {}",
            spec.name,
            stdout.trim()
        );

        Ok(Box::new(PodmanEnvironment {
            binary: self.binary.clone(),
            name: spec.name.clone(),
        }))
    }
}

/// Container whose `podman run` has not completed yet
///
/// Dropped before [`PendingContainer::disarm`], it removes the container in
/// the background.
struct PendingContainer {
    binary: String,
    name: String,
    armed: bool,
}

impl PendingContainer {
    fn new(binary: &str, name: &str) -> Self {
        Self {
            binary: binary.to_string(),
            name: name.to_string(),
            armed: true,
        }
    }

    /// The container is handed over to a [`PodmanEnvironment`]
    fn disarm(mut self) {
        self.armed = false;
    }

    async fn remove(mut self) {
        self.armed = false;
        remove_container(&self.binary, &self.name).await;
    }
}

impl Drop for PendingContainer {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let binary = std::mem::take(&mut self.binary);
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Creation of container {} was abandoned; removing it", name);
                handle.spawn(async move { remove_container(&binary, &name).await });
            }
            Err(_) => warn!("No runtime available to remove container {}", name),
        }
    }
}

/// Best-effort `podman rm -f` of a container that may not exist
async fn remove_container(binary: &str, name: &str) {
    match Command::new(binary)
        .args(["rm", "-f", "-t", "0", name])
        .output()
        .await
    {
        Ok(output) if !output.status.success() => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("podman rm -f {} exited with an error: {}", name, stderr.trim());
        }
        Ok(_) => debug!("Container {} removed", name),
        Err(e) => warn!("Failed to execute podman rm for {}: {}", name, e),
    }
}

/// A running podman container
struct PodmanEnvironment {
    binary: String,
    name: String,
}

/// Joins script commands into one shell program that stops at the first
/// failing command
fn shell_program(script: &[String]) -> String {
    let mut program = String::from("set -e\n");
    for command in script {
        program.push_str(command);
        program.push('\n');
    }
    program
}

#[async_trait]
impl Environment for PodmanEnvironment {
    fn id(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, script: &[String]) -> Result<ExitReport, EnvironmentError> {
        debug!("Executing {} command(s) in {}", script.len(), self.name);

        // kill_on_drop ends the exec client when a timeout drops this future
        let output = Command::new(&self.binary)
            .arg("exec")
            .arg(&self.name)
            .arg("/bin/sh")
            .arg("-c")
            .arg(shell_program(script))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EnvironmentError::Run(format!("failed to execute podman exec: {e}")))?;

        let report = ExitReport {
            exit_code: output.status.code().unwrap_or(1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        debug!(
            "Script in {} finished: exit_code={}, stdout_len={}, stderr_len={}",
            self.name,
            report.exit_code,
            report.stdout.len(),
            report.stderr.len()
        );

        Ok(report)
    }

    async fn release(self: Box<Self>) -> Result<(), EnvironmentError> {
        debug!("Removing container {}", self.name);

        let output = Command::new(&self.binary)
            .args(["rm", "-f", "-t", "0", self.name.as_str()])
            .output()
            .await
            .map_err(|e| EnvironmentError::Release {
                id: self.name.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Failed to remove container {}: {}", self.name, stderr.trim());
            return Err(EnvironmentError::Release {
                id: self.name.clone(),
                message: stderr.trim().to_string(),
            });
        }

        debug!("Container {} removed", self.name);
        Ok(())
    }
}
