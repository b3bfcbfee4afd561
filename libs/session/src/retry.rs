//! Retry with recovery.

use std::future::Future;

use tracing::warn;

/// Number of recoveries attempted by default.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Run `action`; after each failure run `recover` once and try again, up to
/// `max_retries` times.
///
/// The last failure of `action` is returned. A failing recovery ends the loop
/// with the recovery's error.
pub async fn with_recovery<T, E, RE, A, AFut, R, RFut>(
    mut action: A,
    mut recover: R,
    max_retries: u32,
) -> Result<T, E>
where
    A: FnMut() -> AFut,
    AFut: Future<Output = Result<T, E>>,
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<(), RE>>,
    E: From<RE> + std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match action().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                warn!(attempt, error = %e, "Action failed, recovering before retry");
                recover().await.map_err(E::from)?;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Failure(&'static str);

    impl std::fmt::Display for Failure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    #[tokio::test]
    async fn test_retry_bound() {
        let attempts = Cell::new(0);
        let recoveries = Cell::new(0);

        let result: Result<(), Failure> = with_recovery(
            || {
                attempts.set(attempts.get() + 1);
                let n = attempts.get();
                async move { Err(if n == 1 { Failure("first") } else { Failure("second") }) }
            },
            || {
                recoveries.set(recoveries.get() + 1);
                async { Ok::<(), Failure>(()) }
            },
            DEFAULT_MAX_RETRIES,
        )
        .await;

        assert_eq!(result, Err(Failure("second")));
        assert_eq!(attempts.get(), 2);
        assert_eq!(recoveries.get(), 1);
    }

    #[tokio::test]
    async fn test_success_after_recovery() {
        let attempts = Cell::new(0);

        let result: Result<u32, Failure> = with_recovery(
            || {
                attempts.set(attempts.get() + 1);
                let n = attempts.get();
                async move {
                    if n == 1 {
                        Err(Failure("expired"))
                    } else {
                        Ok(n)
                    }
                }
            },
            || async { Ok::<(), Failure>(()) },
            1,
        )
        .await;

        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn test_no_recovery_on_success() {
        let recoveries = Cell::new(0);

        let result: Result<&str, Failure> = with_recovery(
            || async { Ok("done") },
            || {
                recoveries.set(recoveries.get() + 1);
                async { Ok::<(), Failure>(()) }
            },
            1,
        )
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(recoveries.get(), 0);
    }

    #[tokio::test]
    async fn test_failed_recovery_stops() {
        let attempts = Cell::new(0);

        let result: Result<(), Failure> = with_recovery(
            || {
                attempts.set(attempts.get() + 1);
                async { Err(Failure("expired")) }
            },
            || async { Err(Failure("refresh failed")) },
            1,
        )
        .await;

        assert_eq!(result, Err(Failure("refresh failed")));
        assert_eq!(attempts.get(), 1);
    }
}
