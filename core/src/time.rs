use std::future::Future;
use std::time::Duration;

/// Races `future` against a timer.
///
/// Returns `None` if `limit` elapsed first; the future is dropped in that case.
pub async fn deadline<F: Future>(limit: Duration, future: F) -> Option<F::Output> {
    futures_lite::future::or(async { Some(future.await) }, async {
        async_io::Timer::after(limit).await;
        None
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_limit() {
        let value = deadline(Duration::from_secs(5), async { 7 }).await;
        assert_eq!(value, Some(7));
    }

    #[tokio::test]
    async fn times_out() {
        let value = deadline(Duration::from_millis(10), futures_lite::future::pending::<()>()).await;
        assert_eq!(value, None);
    }
}
