//! Microsoft Hyper-V backend over PowerShell remoting.
//!
//! Runs a WMI query on the remote host through `Invoke-Command` and parses
//! the JSON the remote side emits. Requires PowerShell (`pwsh`) on the
//! machine running the service.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, instrument};

use super::require;
use crate::error::{ProviderError, Result, Unavailable};
use crate::traits::Provider;
use crate::types::{ProviderKind, VmSnapshot};

const KIND: ProviderKind = ProviderKind::HyperV;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Lists virtual machines on the remote host as compressed JSON.
const LIST_SCRIPT: &str = r#"Get-WmiObject -Namespace "root\virtualization\v2" -Class "Msvm_ComputerSystem" | Where-Object { $_.Caption -eq "Virtual Machine" } | Select-Object @{l="Id";e={$_.Name.ToLower()}},@{l="Name";e={$_.ElementName}},@{l="State";e={if ($_.ProcessID){"Running"} else {"Stopped"}}} | ConvertTo-Json -Compress"#;

/// Hyper-V host and WinRM credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperVConfig {
    pub host: String,
    /// WinRM port
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_ssl: bool,
    /// PowerShell executable
    pub shell: String,
}

impl Default for HyperVConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5985,
            username: String::new(),
            password: String::new(),
            use_ssl: false,
            shell: "pwsh".to_string(),
        }
    }
}

impl HyperVConfig {
    pub fn is_configured(&self) -> bool {
        [&self.host, &self.username, &self.password]
            .iter()
            .any(|v| !v.trim().is_empty())
    }
}

/// Hyper-V provider. List only.
pub struct HyperVProvider {
    config: HyperVConfig,
}

impl HyperVProvider {
    pub async fn connect(config: HyperVConfig) -> std::result::Result<Self, Unavailable> {
        require(KIND, "host", &config.host)?;
        require(KIND, "username", &config.username)?;
        require(KIND, "password", &config.password)?;
        require(KIND, "shell", &config.shell)?;
        Ok(Self { config })
    }

    /// Wrap the listing script in a remoting call. Credentials travel in the
    /// child's environment, never on its command line.
    fn remote_script(&self) -> String {
        let ssl = if self.config.use_ssl { " -UseSSL" } else { "" };
        format!(
            "$ErrorActionPreference = 'Stop'; \
             $secure = ConvertTo-SecureString $env:ANYVM_HYPERV_PASSWORD -AsPlainText -Force; \
             $cred = New-Object System.Management.Automation.PSCredential($env:ANYVM_HYPERV_USERNAME, $secure); \
             Invoke-Command -ComputerName $env:ANYVM_HYPERV_HOST -Port {port}{ssl} -Credential $cred -ScriptBlock {{ {script} }}",
            port = self.config.port,
            ssl = ssl,
            script = LIST_SCRIPT,
        )
    }

    async fn run(&self) -> Result<String> {
        let child = Command::new(&self.config.shell)
            .args(["-NoProfile", "-NonInteractive", "-Command"])
            .arg(self.remote_script())
            .env("ANYVM_HYPERV_HOST", &self.config.host)
            .env("ANYVM_HYPERV_USERNAME", &self.config.username)
            .env("ANYVM_HYPERV_PASSWORD", &self.config.password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProviderError::backend(KIND.as_str(), format!("failed to start {}: {}", self.config.shell, e))
            })?;

        let output = tokio::time::timeout(COMMAND_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| ProviderError::Timeout {
                backend: KIND.as_str().to_string(),
                after: COMMAND_TIMEOUT,
            })?
            .map_err(|e| ProviderError::backend(KIND.as_str(), format!("failed to run command: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::backend(
                KIND.as_str(),
                format!("failed to run command ({}): {}", output.status, stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Provider for HyperVProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    #[instrument(skip(self), fields(provider = "hyperv", host = %self.config.host))]
    async fn list_vms(&self) -> Result<Vec<VmSnapshot>> {
        let stdout = self.run().await?;
        let vms = parse_vm_json(&stdout, &self.config.host)?;
        debug!(count = vms.len(), "Listed Hyper-V VMs");
        Ok(vms)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HyperVVm {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
}

/// Parse the remote listing output.
///
/// Accepts a JSON array, a single object (PowerShell unwraps one-element
/// arrays), either of those wrapped in a JSON string, and empty output.
pub(crate) fn parse_vm_json(output: &str, host: &str) -> Result<Vec<VmSnapshot>> {
    let trimmed = output.trim();
    let unquoted;
    let text = if trimmed.starts_with('"') {
        match serde_json::from_str::<String>(trimmed) {
            Ok(inner) => {
                unquoted = inner;
                unquoted.trim()
            }
            Err(_) => trimmed,
        }
    } else {
        trimmed
    };

    if text.is_empty() {
        return Ok(Vec::new());
    }

    let raw: Vec<HyperVVm> = match serde_json::from_str::<Vec<HyperVVm>>(text) {
        Ok(list) => list,
        Err(list_err) => match serde_json::from_str::<HyperVVm>(text) {
            Ok(single) => vec![single],
            Err(_) => {
                return Err(ProviderError::backend(
                    KIND.as_str(),
                    format!("failed to parse JSON output: {}, output: {}", list_err, text),
                ))
            }
        },
    };

    Ok(raw
        .into_iter()
        .map(|vm| VmSnapshot::new(id_string(&vm.id), vm.name, KIND.as_str(), host, vm.state))
        .collect())
}

fn id_string(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => match (n.as_u64(), n.as_i64(), n.as_f64()) {
            (Some(u), _, _) => u.to_string(),
            (None, Some(i), _) => i.to_string(),
            (None, None, Some(f)) => format!("{:.0}", f),
            _ => n.to_string(),
        },
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
