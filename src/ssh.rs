//! Double-hop SSH session: local → bastion → target VM.
//!
//! The session to the bastion is held open for the whole run. Commands
//! for the target are executed from the bastion over an
//! agent-forwarded `ssh` invocation, which is the same trust model as
//! a gateway/jump configuration: the private key authenticates the
//! first hop and the forwarded agent authenticates the second.
//!
//! The target's sshd is not up the moment the server goes ACTIVE
//! (cloud-init is still booting), so [`BastionSession::connect`] waits
//! a settle delay and then probes port 22 from the bastion with a
//! bounded retry budget. Exhaustion is fatal to the whole run.

use crate::config::SshEndpoint;
use crate::retry::{PollConfig, poll_until};
use ssh2::Session;
use std::io::Read;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Boot settle time before the first port probe.
const SETTLE_DELAY: Duration = Duration::from_secs(30);
/// Port 22 probe budget: 10 attempts, 6 s apart.
const PROBE_ATTEMPTS: u32 = 10;
const PROBE_INTERVAL: Duration = Duration::from_secs(6);

#[derive(Debug, Error)]
pub enum SshError {
    #[error("could not reach bastion {host}: {message}")]
    Bastion { host: String, message: String },

    /// The target never opened port 22 within the probe budget.
    /// Callers treat this as fatal to the whole run.
    #[error("ssh service on {host} did not come up: {message}")]
    Exhausted { host: String, message: String },

    #[error("remote command {command:?} exited with status {exit_status}: {stderr}")]
    CommandFailed {
        command: String,
        exit_status: i32,
        stderr: String,
    },

    #[error("ssh transport error: {0}")]
    Transport(#[from] ssh2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured output of one remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_status == 0
    }
}

/// Command execution seam between the harness and the transport.
///
/// The real implementation is [`BastionSession`]; harness tests script
/// their own.
pub trait RemoteRunner {
    /// Run a command on the target; non-zero exit is an error.
    fn run(&mut self, command: &str) -> Result<CommandOutput, SshError> {
        let output = self.run_unchecked(command)?;
        if output.succeeded() {
            Ok(output)
        } else {
            Err(SshError::CommandFailed {
                command: command.to_string(),
                exit_status: output.exit_status,
                stderr: output.stderr,
            })
        }
    }

    /// Run a command on the target, reporting non-zero exit in the
    /// output instead of failing.
    fn run_unchecked(&mut self, command: &str) -> Result<CommandOutput, SshError>;

    /// Rebuild the session after the target has rebooted.
    fn reconnect(&mut self) -> Result<(), SshError>;
}

pub struct BastionSession {
    endpoint: SshEndpoint,
    bastion: Session,
}

impl BastionSession {
    /// Connect to the bastion, wait out the boot settle delay, probe
    /// the target's port 22 until it answers, then hand back a session
    /// ready for command execution.
    pub fn connect(endpoint: &SshEndpoint) -> Result<Self, SshError> {
        let bastion = open_bastion(endpoint)?;
        let mut session = Self {
            endpoint: endpoint.clone(),
            bastion,
        };

        log::info!(
            "waiting {}s for {} to boot",
            SETTLE_DELAY.as_secs(),
            endpoint.server_ip
        );
        thread::sleep(SETTLE_DELAY);

        let probe = format!("nc -zv {} 22", endpoint.server_ip);
        let config = PollConfig::new(PROBE_ATTEMPTS, PROBE_INTERVAL);
        poll_until("target port 22", config, || {
            match session.exec_on_bastion(&probe) {
                Ok(output) if output.succeeded() => Some(()),
                _ => None,
            }
        })
        .map_err(|e| SshError::Exhausted {
            host: endpoint.server_ip.clone(),
            message: e.to_string(),
        })?;

        Ok(session)
    }

    /// Run a command directly on the bastion.
    fn exec_on_bastion(&self, command: &str) -> Result<CommandOutput, SshError> {
        let mut channel = self.bastion.channel_session()?;
        // Best effort; only target commands need the agent.
        let _ = channel.request_auth_agent_forwarding();
        channel.exec(command)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr)?;
        channel.wait_close()?;

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_status: channel.exit_status()?,
        })
    }

    fn target_command(&self, command: &str) -> String {
        format!(
            "ssh -o StrictHostKeyChecking=no -o BatchMode=yes {}@{} {}",
            self.endpoint.server_username,
            self.endpoint.server_ip,
            shell_quote(command)
        )
    }
}

impl RemoteRunner for BastionSession {
    fn run_unchecked(&mut self, command: &str) -> Result<CommandOutput, SshError> {
        self.exec_on_bastion(&self.target_command(command))
    }

    fn reconnect(&mut self) -> Result<(), SshError> {
        *self = Self::connect(&self.endpoint)?;
        Ok(())
    }
}

fn open_bastion(endpoint: &SshEndpoint) -> Result<Session, SshError> {
    let addr = format!("{}:{}", endpoint.gateway_host, endpoint.gateway_port);
    let connect = || -> Result<Session, SshError> {
        let stream = TcpStream::connect(&addr)?;
        let mut session = Session::new()?;
        session.set_tcp_stream(stream);
        session.handshake()?;
        session.userauth_pubkey_file(
            &endpoint.gateway_username,
            None,
            &endpoint.private_key_path,
            None,
        )?;
        Ok(session)
    };
    connect().map_err(|e| SshError::Bastion {
        host: endpoint.gateway_host.clone(),
        message: e.to_string(),
    })
}

/// Single-quote a command for the remote shell.
fn shell_quote(command: &str) -> String {
    format!("'{}'", command.replace('\'', r"'\''"))
}
