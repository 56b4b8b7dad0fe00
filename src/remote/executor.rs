//! SSH-based remote command execution.
//!
//! This module provides the `SSHExecutor` for establishing password
//! authenticated SSH connections and executing commands on remote machines,
//! capturing stdout, stderr and exit codes.

use crate::config::HostKeyPolicy;
use crate::error::{Error, Result};
use crate::remote::diagnostics::diagnose_connection_failure;
use crate::remote::session::{CommandOutput, SessionTarget};
use log::{debug, warn};
use ssh2::{Channel, CheckResult, KnownHostFileKind, Session};
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

/// SSH executor for running commands on one remote machine.
pub struct SSHExecutor {
    target: SessionTarget,
    policy: HostKeyPolicy,
    timeout: Duration,
}

impl SSHExecutor {
    /// Creates a new SSH executor for the given target.
    pub fn new(target: SessionTarget, policy: HostKeyPolicy, timeout: Duration) -> Self {
        Self {
            target,
            policy,
            timeout,
        }
    }

    /// Establishes an authenticated SSH connection to the remote host.
    ///
    /// Every failure is reported as a transport error carrying a diagnosis.
    fn connect(&self) -> Result<Session> {
        self.connect_once().map_err(|e| {
            Error::transport(diagnose_connection_failure(
                &e.to_string(),
                &self.target.address.host,
                self.target.port,
            ))
        })
    }

    fn connect_once(&self) -> Result<Session> {
        let host = &self.target.address.host;
        debug!("Connecting to {}:{}", host, self.target.port);

        let addr = (host.as_str(), self.target.port)
            .to_socket_addrs()
            .map_err(|e| Error::transport(format!("Failed to resolve host '{}': {}", host, e)))?
            .next()
            .ok_or_else(|| Error::transport(format!("No addresses found for host '{}'", host)))?;

        let tcp = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| Error::transport(format!("Failed to connect to {}: {}", host, e)))?;

        let mut sess = Session::new()
            .map_err(|e| Error::transport(format!("Failed to create SSH session: {}", e)))?;

        sess.set_timeout(self.timeout.as_millis().min(u32::MAX as u128) as u32);
        sess.set_tcp_stream(tcp);
        sess.handshake()
            .map_err(|e| Error::transport(format!("SSH handshake failed: {}", e)))?;

        self.verify_host_key(&sess)?;
        self.authenticate(&sess)?;

        // Remote scripts may stay silent for long stretches; only the connect
        // phase is bounded.
        sess.set_timeout(0);

        debug!("SSH connection to {} established", host);
        Ok(sess)
    }

    /// Applies the configured host key policy to a freshly handshaken session.
    fn verify_host_key(&self, sess: &Session) -> Result<()> {
        let host = &self.target.address.host;

        match self.policy {
            HostKeyPolicy::AcceptAny => {
                debug!("Skipping host key verification for {}", host);
                Ok(())
            }
            HostKeyPolicy::KnownHosts => {
                let (key, _) = sess
                    .host_key()
                    .ok_or_else(|| Error::transport("Remote did not present a host key"))?;

                let known_hosts_path = dirs::home_dir()
                    .map(|home| home.join(".ssh").join("known_hosts"))
                    .ok_or_else(|| {
                        Error::transport("Could not determine home directory for known_hosts")
                    })?;

                let mut known_hosts = sess
                    .known_hosts()
                    .map_err(|e| Error::transport(format!("Failed to init known_hosts: {}", e)))?;
                known_hosts
                    .read_file(&known_hosts_path, KnownHostFileKind::OpenSSH)
                    .map_err(|e| {
                        Error::transport(format!(
                            "Failed to read {}: {}",
                            known_hosts_path.display(),
                            e
                        ))
                    })?;

                match known_hosts.check_port(host, self.target.port, key) {
                    CheckResult::Match => Ok(()),
                    CheckResult::NotFound => Err(Error::transport(format!(
                        "Host key for {} not found in known_hosts",
                        host
                    ))),
                    CheckResult::Mismatch => Err(Error::transport(format!(
                        "Host key for {} does not match known_hosts entry",
                        host
                    ))),
                    CheckResult::Failure => Err(Error::transport(format!(
                        "Host key check for {} failed",
                        host
                    ))),
                }
            }
        }
    }

    /// Authenticates the session with the configured password.
    fn authenticate(&self, sess: &Session) -> Result<()> {
        let user = &self.target.address.user;
        debug!("Authenticating as user: {}", user);

        if let Err(e) = sess.userauth_password(user, &self.target.secret) {
            warn!("Password authentication failed for {}: {}", self.target.address, e);
            return Err(Error::transport(format!(
                "SSH authentication failed for {}: {}",
                self.target.address, e
            )));
        }

        if !sess.authenticated() {
            return Err(Error::transport(format!(
                "SSH authentication failed for {}",
                self.target.address
            )));
        }

        Ok(())
    }

    /// Executes a command on the remote host.
    ///
    /// Standard output and standard error are captured separately. Both are
    /// drained together so a chatty stderr cannot stall the channel while
    /// stdout is still open.
    pub fn execute(&self, command: &str) -> Result<CommandOutput> {
        debug!("Executing on {}: {}", self.target.address, command);

        let sess = self.connect()?;

        let mut channel = sess
            .channel_session()
            .map_err(|e| Error::transport(format!("Failed to open channel: {}", e)))?;

        channel
            .exec(command)
            .map_err(|e| Error::transport(format!("Failed to execute command: {}", e)))?;

        sess.set_blocking(false);
        let drained = drain_streams(&mut channel);
        sess.set_blocking(true);
        let (stdout, stderr) = drained?;

        channel
            .wait_close()
            .map_err(|e| Error::transport(format!("Failed to close channel: {}", e)))?;

        let exit_code = channel
            .exit_status()
            .map_err(|e| Error::transport(format!("Failed to get exit status: {}", e)))?;

        debug!("Command exit code: {}", exit_code);
        if !stderr.is_empty() {
            debug!("Command stderr: {}", stderr.trim_end());
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

/// Reads stdout and stderr of a non-blocking channel until the remote side
/// closes both.
fn drain_streams(channel: &mut Channel) -> Result<(String, String)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buffer = vec![0u8; 4096];

    loop {
        let read_out = read_available(channel, &mut buffer, &mut stdout)?;
        let read_err = read_available(&mut channel.stderr(), &mut buffer, &mut stderr)?;

        if channel.eof() && read_out == 0 && read_err == 0 {
            break;
        }
        if read_out == 0 && read_err == 0 {
            thread::sleep(Duration::from_millis(10));
        }
    }

    Ok((
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    ))
}

/// Appends whatever `stream` has ready to `sink`; returns the byte count.
fn read_available(stream: &mut impl Read, buffer: &mut [u8], sink: &mut Vec<u8>) -> Result<usize> {
    match stream.read(buffer) {
        Ok(n) => {
            sink.extend_from_slice(&buffer[..n]);
            Ok(n)
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(Error::transport(format!(
            "Failed to read command output: {}",
            e
        ))),
    }
}
