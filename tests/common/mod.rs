//! Shared fixtures for integration tests
//!
//! `ScriptedRunner` stands in for the hub tooling and the remote hosts: it
//! answers `wg`, `wg-quick`, `ssh` and `scp` the way the real programs do on
//! success, and can be told which hosts are unreachable and which remote
//! commands fail.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::TempDir;
use wg_provision::config::{HubConfig, HubContext};
use wg_provision::exec::{CommandOutput, CommandRunner, CommandSpec};
use wg_provision::runtime::{Interrupt, Workspace};
use wg_provision::wireguard::PrivateKey;
use wg_provision::Provisioner;

pub const HUB_KEY: &str = "HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=";

pub const SERVER_CONFIG: &str = "[Interface]
Address = 172.17.0.1/16
ListenPort = 51820
PrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=

# existing.example.com
[Peer]
AllowedIPs = 172.17.0.2/32
PublicKey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=
";

const PING_OK: &str = "PING 172.17.0.1 (172.17.0.1) 56(84) bytes of data.

--- 172.17.0.1 ping statistics ---
3 packets transmitted, 3 received, 0% packet loss, time 2003ms
";

/// Fake command runner recording every call
#[derive(Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<CommandSpec>>,
    unreachable: Vec<String>,
    failing: Vec<(String, i32)>,
    ping_output: Option<String>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections to `host` fail like an ssh timeout
    pub fn unreachable(mut self, host: &str) -> Self {
        self.unreachable.push(host.to_string());
        self
    }

    /// Any call whose description starts with `prefix` exits with status 1
    pub fn failing(mut self, prefix: &str) -> Self {
        self.failing.push((prefix.to_string(), 1));
        self
    }

    /// Any call whose description starts with `prefix` loses the connection
    /// (ssh and scp exit with status 255)
    pub fn dropping(mut self, prefix: &str) -> Self {
        self.failing.push((prefix.to_string(), 255));
        self
    }

    /// Replace the output of remote `ping`
    pub fn ping_output(mut self, output: &str) -> Self {
        self.ping_output = Some(output.to_string());
        self
    }

    /// Descriptions of every call so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(describe).collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn failure(&self, description: &str) -> Option<i32> {
        self.failing
            .iter()
            .find(|(prefix, _)| description.starts_with(prefix.as_str()))
            .map(|(_, code)| *code)
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> wg_provision::Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let description = describe(spec);

        if let Some(host) = target_host(spec) {
            if self.unreachable.iter().any(|h| h == &host) {
                return Ok(CommandOutput::failed(
                    255,
                    format!("ssh: connect to host {} port 22: Connection timed out", host),
                ));
            }
        }
        if let Some(code) = self.failure(&description) {
            return Ok(CommandOutput::failed(code, format!("{}: simulated failure", description)));
        }

        let output = match description.as_str() {
            "wg genkey" => {
                let private = PrivateKey::generate();
                CommandOutput::ok(format!("{}\n", private.to_base64().as_str()))
            }
            "wg pubkey" => {
                let input = String::from_utf8_lossy(spec.stdin.as_deref().unwrap_or_default())
                    .to_string();
                let private = PrivateKey::from_base64(input.trim())?;
                CommandOutput::ok(format!("{}\n", private.public_key()))
            }
            d if d.starts_with("ssh ping") => {
                CommandOutput::ok(self.ping_output.clone().unwrap_or_else(|| PING_OK.to_string()))
            }
            _ => CommandOutput::ok(""),
        };
        Ok(output)
    }
}

/// Short form of a call: local command line, `ssh <remote command>` or
/// `scp <remote path>`
pub fn describe(spec: &CommandSpec) -> String {
    match spec.program.as_str() {
        "ssh" => format!("ssh {}", spec.args.last().cloned().unwrap_or_default()),
        "scp" => {
            let dest = spec.args.last().cloned().unwrap_or_default();
            let path = dest.split_once(':').map(|(_, p)| p.to_string()).unwrap_or(dest);
            format!("scp {}", path)
        }
        _ => spec.command_line(),
    }
}

fn target_host(spec: &CommandSpec) -> Option<String> {
    let target = match spec.program.as_str() {
        "ssh" => {
            let sep = spec.args.iter().position(|a| a == "--")?;
            spec.args.get(sep.checked_sub(1)?)?.clone()
        }
        "scp" => {
            let dest = spec.args.last()?;
            dest.split_once(':')?.0.to_string()
        }
        _ => return None,
    };
    Some(target.rsplit('@').next()?.to_string())
}

/// A hub laid out in a temporary directory
pub struct TestHub {
    pub context: HubContext,
    pub workspace: Workspace,
    pub interrupt: Interrupt,
    pub dir: TempDir,
}

impl TestHub {
    pub fn new() -> Self {
        Self::with_extra("")
    }

    /// Hub whose configuration carries an additional TOML fragment
    pub fn with_extra(extra: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("wg0.conf"), SERVER_CONFIG).unwrap();
        fs::write(root.join("install.sh"), "#!/bin/sh\nexit 0\n").unwrap();
        fs::write(root.join("watchdog.tar.gz"), b"archive").unwrap();

        let toml = format!(
            r#"
subnet = "172.17.0.0/16"
endpoint = "vpn.example.com:51820"
hub_public_key = "{key}"
hub_address = "172.17.0.1"
server_config = "{root}/wg0.conf"
client_config_dir = "{root}/clients"
installer = "{root}/install.sh"
watchdog_archive = "{root}/watchdog.tar.gz"
lock_file = "{root}/wg-provision.pid"
{extra}
"#,
            key = HUB_KEY,
            root = root.display(),
            extra = extra,
        );
        let context = HubContext::from_config(HubConfig::parse(&toml).unwrap()).unwrap();
        let workspace = Workspace::create_in(root).unwrap();

        Self {
            context,
            workspace,
            interrupt: Interrupt::new(),
            dir,
        }
    }

    pub fn provisioner<'a>(&'a self, runner: &'a dyn CommandRunner) -> Provisioner<'a> {
        Provisioner::new(&self.context, runner, &self.workspace, &self.interrupt)
    }

    pub fn server_path(&self) -> PathBuf {
        self.context.server_config.clone()
    }

    pub fn server_text(&self) -> String {
        fs::read_to_string(self.server_path()).unwrap()
    }

    pub fn client_path(&self, fqdn: &str) -> PathBuf {
        self.context.client_config_path(fqdn)
    }
}
