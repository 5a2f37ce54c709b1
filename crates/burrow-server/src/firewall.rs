//! Forwarding and NAT rules for the tunnel interface

use burrow_core::command::{ForwardRule, NetCommand, Privilege};
use burrow_core::error::EndpointError;
use burrow_core::exec::CommandRunner;

/// Upper bound on deletions of one rule during teardown
///
/// Repeated starts without a clean stop can stack identical rules; this
/// bounds the loop if a deletion keeps reporting success.
pub const MAX_RULE_DELETIONS: usize = 32;

/// Enable forwarding and append `rules`, returning those installed
///
/// A rule that is already present is not appended again.
pub async fn install(
    runner: &dyn CommandRunner,
    privilege: Privilege,
    rules: &[ForwardRule],
) -> Result<Vec<ForwardRule>, EndpointError> {
    let forward = NetCommand::EnableIpForward;
    let out = runner
        .run(&privilege.wrap_command(&forward))
        .await
        .map_err(|e| EndpointError::Engine(e.to_string()))?;
    if !out.success() {
        return Err(EndpointError::Engine(format!(
            "{} failed: {}",
            forward,
            out.stderr.trim()
        )));
    }

    let mut installed = Vec::with_capacity(rules.len());
    for rule in rules {
        let check = NetCommand::CheckForwardRule(rule.clone());
        let present = runner
            .run(&privilege.wrap_command(&check))
            .await
            .map_err(|e| EndpointError::Engine(e.to_string()))?
            .success();
        if present {
            tracing::debug!("Rule already present: {}", rule);
            installed.push(rule.clone());
            continue;
        }

        let add = NetCommand::AddForwardRule(rule.clone());
        let out = runner
            .run(&privilege.wrap_command(&add))
            .await
            .map_err(|e| EndpointError::Engine(e.to_string()))?;
        if !out.success() {
            return Err(EndpointError::Engine(format!(
                "adding rule ({}) failed: {}",
                rule,
                out.stderr.trim()
            )));
        }
        tracing::info!("Installed rule: {}", rule);
        installed.push(rule.clone());
    }
    Ok(installed)
}

/// Delete every instance of `rule`, returning how many were removed
///
/// Absence is the normal end state, not an error.
pub async fn remove_all(
    runner: &dyn CommandRunner,
    privilege: Privilege,
    rule: &ForwardRule,
) -> Result<usize, EndpointError> {
    let delete = NetCommand::DeleteForwardRule(rule.clone());
    let command = privilege.wrap_command(&delete);
    let mut removed = 0;

    while removed < MAX_RULE_DELETIONS {
        let out = runner
            .run(&command)
            .await
            .map_err(|e| EndpointError::Engine(e.to_string()))?;
        if out.success() {
            removed += 1;
            continue;
        }
        if delete.is_already_absent(&out.stderr) || out.exit_code == 1 {
            tracing::debug!("Rule absent after {} deletion(s): {}", removed, rule);
            return Ok(removed);
        }
        return Err(EndpointError::Engine(format!(
            "deleting rule ({}) failed: {}",
            rule,
            out.stderr.trim()
        )));
    }

    tracing::warn!(
        "Stopped deleting rule ({}) after {} attempts",
        rule,
        MAX_RULE_DELETIONS
    );
    Ok(removed)
}
