//! Agent process supervision.
//!
//! Every run is bracketed by the credential vault: restore the plaintext
//! secrets into the config before spawn, re-secure them when the process
//! exits — normally, by crash, or by cancellation. The re-secure runs on
//! every exit path.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ca_gateway::Relay;
use ca_store::profile::ProfileStore;
use ca_store::CredentialVault;

use crate::bridge::{BridgeEvent, LineDemux};
use crate::error::BridgeError;
use crate::stderr::{AgentFailure, StderrTail};

pub struct AgentLaunch {
    pub profile_id: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workspace: PathBuf,
}

#[derive(Debug)]
pub struct ExitSummary {
    pub exit_code: Option<i32>,
    /// Known fatal condition mapped from the stderr tail.
    pub failure: Option<AgentFailure>,
    pub stderr_tail: String,
}

/// Run the agent to completion (or cancellation), demultiplexing its
/// stdout into `events`.
pub async fn run_agent(
    vault: &CredentialVault,
    launch: &AgentLaunch,
    events: mpsc::Sender<BridgeEvent>,
    cancel: CancellationToken,
) -> Result<ExitSummary, BridgeError> {
    vault.restore()?;

    let result = supervise(launch, events, cancel).await;

    // Re-secure regardless of how the run ended.
    if let Err(e) = vault.secure() {
        tracing::error!(
            target: "commands_agent",
            event = "resecure_failed",
            profile_id = %launch.profile_id,
            error = %e,
        );
    }
    result
}

async fn supervise(
    launch: &AgentLaunch,
    events: mpsc::Sender<BridgeEvent>,
    cancel: CancellationToken,
) -> Result<ExitSummary, BridgeError> {
    let mut child = Command::new(&launch.program)
        .args(&launch.args)
        .current_dir(&launch.workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BridgeError::Spawn(format!("{}: {e}", launch.program.display())))?;

    tracing::info!(
        target: "commands_agent",
        event = "agent_started",
        profile_id = %launch.profile_id,
        program = %launch.program.display(),
    );

    let mut stdout = child.stdout.take().expect("stdout piped");
    let mut stderr = child.stderr.take().expect("stderr piped");

    // Reader tasks run to pipe EOF, which a kill also produces.
    let out_task = {
        let events = events.clone();
        let mut demux = LineDemux::new(launch.profile_id.clone());
        tokio::spawn(async move {
            let mut buf = [0u8; 8192];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        for event in demux.push(&buf[..n]) {
                            let _ = events.send(event).await;
                        }
                    }
                }
            }
            if let Some(event) = demux.finish() {
                let _ = events.send(event).await;
            }
        })
    };
    let err_task = tokio::spawn(async move {
        let mut tail = StderrTail::default();
        let mut buf = [0u8; 8192];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => tail.push(&buf[..n]),
            }
        }
        tail
    });

    enum WaitOutcome {
        Exited(std::io::Result<std::process::ExitStatus>),
        Cancelled,
    }

    let outcome = {
        let wait = child.wait();
        tokio::pin!(wait);
        tokio::select! {
            status = &mut wait => WaitOutcome::Exited(status),
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
        }
    };
    let mut cancelled = false;
    let exit_status = match outcome {
        WaitOutcome::Exited(status) => status?,
        WaitOutcome::Cancelled => {
            cancelled = true;
            tracing::info!(
                target: "commands_agent",
                event = "agent_stopping",
                profile_id = %launch.profile_id,
            );
            let _ = child.start_kill();
            child.wait().await?
        }
    };

    let _ = out_task.await;
    let tail = err_task.await.unwrap_or_default();

    let exit_code = exit_status.code();
    let failure = if exit_status.success() || cancelled {
        None
    } else {
        tail.diagnose()
    };

    tracing::info!(
        target: "commands_agent",
        event = "agent_exited",
        profile_id = %launch.profile_id,
        exit_code = exit_code.unwrap_or(-1),
        diagnosed = failure.is_some(),
    );

    Ok(ExitSummary {
        exit_code,
        failure,
        stderr_tail: tail.contents(),
    })
}

/// Delete a profile: best-effort device deregistration on the relay, then
/// remove the profile directory. The caller must ensure no local runtime
/// still references the profile.
pub async fn delete_profile(
    store: &ProfileStore,
    relay: &dyn Relay,
    profile_id: &str,
) -> Result<(), BridgeError> {
    let profile = store.load(profile_id)?;
    if let Err(e) = relay.deregister_device(&profile.device_id).await {
        tracing::warn!(
            target: "commands_agent",
            event = "deregister_device_failed",
            profile_id = %profile_id,
            device_id = %profile.device_id,
            error = %e,
        );
    }
    store.delete(profile_id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ca_store::vault::{SecureOutcome, WrapKeyStore};
    use std::sync::Mutex;

    struct MemoryKeys(Mutex<Option<[u8; 32]>>);

    impl WrapKeyStore for MemoryKeys {
        fn get_or_create(&self) -> Result<[u8; 32], ca_store::StoreError> {
            let mut slot = self.0.lock().unwrap();
            Ok(*slot.get_or_insert([7u8; 32]))
        }
    }

    fn vault_in(dir: &std::path::Path) -> CredentialVault {
        CredentialVault::new(
            dir.join("config.json"),
            dir.join("credentials.enc"),
            Box::new(MemoryKeys(Mutex::new(None))),
        )
    }

    #[tokio::test]
    async fn run_brackets_vault_and_demuxes_stdout() {
        let dir = tempfile::tempdir().unwrap();
        ca_store::config::AgentConfig {
            access_token: Some("tok".into()),
            ..Default::default()
        }
        .save(&dir.path().join("config.json"))
        .unwrap();
        let vault = vault_in(dir.path());
        vault.secure().unwrap();

        let launch = AgentLaunch {
            profile_id: "profile_1700000000_abcd1234".into(),
            program: PathBuf::from("/bin/sh"),
            args: vec![
                "-c".into(),
                "echo '__DESKTOP_EVENT__:{\"kind\":\"turn\"}'; echo plain".into(),
            ],
            workspace: dir.path().to_path_buf(),
        };
        let (tx, mut rx) = mpsc::channel(16);
        let summary = run_agent(&vault, &launch, tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.exit_code, Some(0));
        assert!(summary.failure.is_none());

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, BridgeEvent::ConversationEvent { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, BridgeEvent::Stdout { ref line, .. } if line == "plain"));

        // The vault re-secured after exit.
        assert_eq!(vault.secure().unwrap(), SecureOutcome::AlreadySecured);
    }

    #[tokio::test]
    async fn failing_agent_is_diagnosed_from_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(dir.path());
        let launch = AgentLaunch {
            profile_id: "profile_1700000000_abcd1234".into(),
            program: PathBuf::from("/bin/sh"),
            args: vec![
                "-c".into(),
                "echo 'fatal: identity key already registered' >&2; exit 3".into(),
            ],
            workspace: dir.path().to_path_buf(),
        };
        let (tx, _rx) = mpsc::channel(16);
        let summary = run_agent(&vault, &launch, tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.exit_code, Some(3));
        assert_eq!(summary.failure, Some(AgentFailure::IdentityConflict));
        assert!(summary.stderr_tail.contains("identity key"));
    }
}
