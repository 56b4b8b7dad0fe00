//! Diagnostic utilities for remote failures.
//!
//! These helpers turn raw failure text into a message with troubleshooting
//! suggestions, so the failure detail kept for each host is actionable
//! without re-running the batch.

/// Exit code `sshpass` uses when the password was rejected.
const SSHPASS_BAD_PASSWORD: i32 = 5;

/// Exit code `sshpass` uses when the host key is unknown.
const SSHPASS_HOST_KEY_UNKNOWN: i32 = 6;

/// Builds a diagnosis for a failure to open an SSH session.
pub fn diagnose_connection_failure(error: &str, host: &str, port: u16) -> String {
    let error_lower = error.to_lowercase();
    let mut suggestions = Vec::new();

    if error_lower.contains("connection refused")
        || error_lower.contains("timed out")
        || error_lower.contains("no route to host")
        || error_lower.contains("failed to resolve")
    {
        suggestions.push(format!("• Verify the host '{}' is reachable", host));
        suggestions.push(format!(
            "• Check that SSH is listening on port {} (try: ssh -p {} {})",
            port, port, host
        ));
        suggestions.push("• Verify your network connection and firewall settings".to_string());
    }

    if error_lower.contains("authentication") || error_lower.contains("permission denied") {
        suggestions.push("• Check the password configured for this host".to_string());
        suggestions.push(format!(
            "• Verify password logins are allowed on {} (PasswordAuthentication yes)",
            host
        ));
    }

    if error_lower.contains("host key") || error_lower.contains("known_hosts") {
        suggestions.push(format!(
            "• Add the host to known_hosts: ssh-keyscan -p {} {} >> ~/.ssh/known_hosts",
            port, host
        ));
        suggestions.push("• Or run with --host-key-policy accept-any".to_string());
    }

    if suggestions.is_empty() {
        suggestions.push("• Verify the remote host is accessible".to_string());
        suggestions.push(format!(
            "• Test the connection manually: ssh -p {} {}",
            port, host
        ));
    }

    format!(
        "SSH connection to {} failed: {}\n\nTroubleshooting suggestions:\n{}",
        host,
        error,
        suggestions.join("\n")
    )
}

/// Builds a diagnosis for a failed rsync/sshpass invocation.
pub fn diagnose_transfer_failure(exit_code: Option<i32>, stderr: &str, host: &str) -> String {
    let stderr_lower = stderr.to_lowercase();
    let mut suggestions = Vec::new();

    if exit_code == Some(SSHPASS_BAD_PASSWORD) || stderr_lower.contains("permission denied") {
        suggestions.push(format!(
            "• Authentication failed: check the password configured for {}",
            host
        ));
    } else if exit_code == Some(SSHPASS_HOST_KEY_UNKNOWN)
        || stderr_lower.contains("host key verification failed")
    {
        suggestions.push(format!(
            "• Host key for {} is unknown or changed; add it to ~/.ssh/known_hosts",
            host
        ));
    } else if stderr_lower.contains("rsync: command not found")
        || stderr_lower.contains("rsync: not found")
    {
        suggestions.push(format!("• Install rsync on {}", host));
    } else if stderr_lower.contains("connection refused")
        || stderr_lower.contains("could not resolve")
        || stderr_lower.contains("timed out")
    {
        suggestions.push(format!("• Verify the host '{}' is reachable over SSH", host));
    }

    if suggestions.is_empty() {
        suggestions.push("• Review the transfer output above for details".to_string());
    }

    let status = exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string());

    let mut msg = format!("Transfer to/from {} failed (exit {})\n", host, status);
    if !stderr.trim().is_empty() {
        msg.push_str("stderr:\n");
        msg.push_str(&indent_text(stderr.trim(), 2));
        msg.push('\n');
    }
    msg.push_str("Troubleshooting suggestions:\n");
    msg.push_str(&suggestions.join("\n"));
    msg
}

/// Builds a diagnosis for a local tool that could not be started.
pub fn diagnose_missing_tool(tool: &str, error: &str) -> String {
    format!(
        "Failed to run {}: {}\n\nTroubleshooting suggestions:\n\
         • Install {} on this machine (e.g. sudo apt install {})\n\
         • Verify it is on PATH",
        tool, error, tool, tool
    )
}

/// Summarises a remote command that exited non-zero.
pub fn diagnose_command_failure(exit_code: i32, command: &str, host: &str) -> String {
    let hint = match exit_code {
        127 => Some("a command used by the script was not found on the remote host"),
        126 => Some("a command used by the script is not executable (permission denied)"),
        _ => None,
    };

    let mut msg = format!(
        "Command failed on {} (exit {})\ncommand: {}",
        host, exit_code, command
    );
    if let Some(hint) = hint {
        msg.push_str(&format!("\nhint: {}", hint));
    }
    msg
}

/// Indents each line of text by the specified number of spaces.
pub fn indent_text(text: &str, spaces: usize) -> String {
    let indent = " ".repeat(spaces);
    text.lines()
        .map(|line| format!("{}{}", indent, line))
        .collect::<Vec<_>>()
        .join("\n")
}
