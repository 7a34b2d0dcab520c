//! Periodic loop driver shared by the polling packages.

use std::{future::Future, time::Duration};

use log::{debug, info, warn};
use tokio::time::{MissedTickBehavior, interval};
use tokio_stream::{StreamExt, wrappers::IntervalStream};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Runs `tick` every `period` until `cancel` fires.
///
/// Ticks never overlap: the next one is scheduled only after the current one
/// settled, and ticks missed meanwhile are delayed rather than bunched.
/// Non-fatal errors are logged and the loop carries on; a fatal error ends it.
/// The first tick runs immediately.
pub async fn run_polling<F, Fut>(
    name: &str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = IntervalStream::new(timer);

    info!("{name}: polling every {}s", period.as_secs_f64());

    loop {
        let Some(Some(_)) = cancel.run_until_cancelled(ticks.next()).await else {
            break;
        };
        debug!("{name}: tick");

        match cancel.run_until_cancelled(tick()).await {
            None => break,
            Some(Ok(())) => {}
            Some(Err(e)) if e.is_fatal() => return Err(e),
            Some(Err(e)) => warn!("{name}: {e}"),
        }
    }

    info!("{name}: stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn ticks_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let count = count.clone();
            let cancel = cancel.clone();
            async move {
                run_polling("test", Duration::from_secs(10), cancel, || {
                    let count = count.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await
            }
        });

        sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        // t=0, t=10, t=20
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_do_not_stop_the_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let count = count.clone();
            let cancel = cancel.clone();
            async move {
                run_polling("flaky", Duration::from_secs(1), cancel, || {
                    let count = count.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Err(Error::Network("refused".into()))
                    }
                })
                .await
            }
        });

        sleep(Duration::from_millis(3500)).await;
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_ends_the_loop() {
        let result = run_polling(
            "fatal",
            Duration::from_secs(1),
            CancellationToken::new(),
            || async { Err(Error::DeviceNotFound("413d:2107".into())) },
        )
        .await;
        assert!(matches!(result, Err(Error::DeviceNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ticks_never_overlap() {
        let busy = Arc::new(AtomicBool::new(false));
        let overlapped = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let busy = busy.clone();
            let overlapped = overlapped.clone();
            let cancel = cancel.clone();
            async move {
                run_polling("slow", Duration::from_secs(1), cancel, || {
                    let busy = busy.clone();
                    let overlapped = overlapped.clone();
                    async move {
                        if busy.swap(true, Ordering::SeqCst) {
                            overlapped.store(true, Ordering::SeqCst);
                        }
                        sleep(Duration::from_secs(3)).await;
                        busy.store(false, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await
            }
        });

        sleep(Duration::from_secs(20)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(!overlapped.load(Ordering::SeqCst));
    }
}
