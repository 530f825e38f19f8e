use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a cancellation handler that fires on SIGTERM, SIGINT, or when the
/// optional `deadline` elapses.
///
/// Long-running reads watch the returned token and stop early, reporting
/// which results were abandoned.
pub fn install_shutdown_handler(deadline: Option<Duration>) -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Failed to install signal handlers");
                if let Some(deadline) = deadline {
                    tokio::time::sleep(deadline).await;
                    tracing::info!(?deadline, "Deadline elapsed, cancelling");
                    token_clone.cancel();
                }
                return;
            }
        };

        let expiry = async {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, cancelling");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, cancelling");
            }
            _ = expiry => {
                tracing::info!(?deadline, "Deadline elapsed, cancelling");
            }
        }

        token_clone.cancel();
    });

    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_cancels_token() {
        let token = install_shutdown_handler(Some(Duration::from_millis(20)));
        tokio::time::timeout(Duration::from_secs(2), token.cancelled())
            .await
            .expect("token should be cancelled after the deadline");
    }

    #[tokio::test]
    async fn no_deadline_stays_live() {
        let token = install_shutdown_handler(None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!token.is_cancelled());
    }
}
