//! Runs the bundler before pre-rendering.

use crate::error::BuildError;
use tokio::process::Command;

/// Run `command` through the platform shell; any non-zero exit is fatal.
pub async fn run_build_command(command: &str, production: bool) -> Result<(), BuildError> {
    if command.trim().is_empty() {
        return Err(BuildError::EmptyCommand);
    }

    let mut cmd = if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    };
    cmd.env("NODE_ENV", if production { "production" } else { "development" });

    tracing::info!(%command, "running build command");
    let status = cmd.status().await.map_err(|source| BuildError::Spawn {
        command: command.to_string(),
        source,
    })?;

    if !status.success() {
        return Err(BuildError::Failed {
            command: command.to_string(),
            status: status.to_string(),
        });
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_command() {
        run_build_command("true", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_command_is_an_error() {
        let err = run_build_command("exit 3", true).await.unwrap_err();
        assert!(matches!(err, BuildError::Failed { .. }));
    }

    #[tokio::test]
    async fn test_empty_command() {
        assert!(matches!(
            run_build_command("  ", true).await,
            Err(BuildError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn test_node_env_reflects_mode() {
        run_build_command("test \"$NODE_ENV\" = development", false)
            .await
            .unwrap();
    }
}
