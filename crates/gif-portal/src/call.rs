//! cancellation and deadlines for suspension points

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{PortalError, Result};

/// run `fut` until it resolves or `cancel` fires
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    what: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PortalError::Cancelled(what)),
        res = fut => res,
    }
}

/// like `cancellable`, also failing with `Timeout` after `limit`
pub(crate) async fn bounded<T>(
    cancel: &CancellationToken,
    limit: Duration,
    what: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    cancellable(cancel, what, async move {
        tokio::time::timeout(limit, fut)
            .await
            .unwrap_or(Err(PortalError::Timeout(what)))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let cancel = CancellationToken::new();
        let res: Result<()> = bounded(&cancel, Duration::from_secs(5), "fetch", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(PortalError::Timeout("fetch"))));
    }

    #[tokio::test]
    async fn test_cancel_wins() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = cancellable(&cancel, "connect", async { Ok(1) }).await;
        assert!(matches!(res, Err(PortalError::Cancelled("connect"))));
    }

    #[tokio::test]
    async fn test_passthrough() {
        let cancel = CancellationToken::new();
        let res = bounded(&cancel, Duration::from_secs(1), "fetch", async { Ok(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }
}
