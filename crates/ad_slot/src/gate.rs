//! Completion gate.
//!
//! Every external script hands the gate a [`Settlement`]. The gate resolves
//! once all of them have settled or the deadline passes, whichever is first.
//! Loading and failing both count as settled.

use core::fmt::{Display, Formatter, Result as FmtResult};
use futures::StreamExt as _;
use futures::stream::FuturesUnordered;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep_until};

/// How one external script ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptOutcome {
    Loaded,
    Failed(String),
}

/// Receiving half of one external script's settlement signal.
#[derive(Debug)]
pub struct Settlement {
    receiver: oneshot::Receiver<ScriptOutcome>,
}

impl Settlement {
    /// A connected sender/settlement pair.
    pub fn channel() -> (oneshot::Sender<ScriptOutcome>, Self) {
        let (sender, receiver) = oneshot::channel();
        (sender, Self { receiver })
    }

    /// A settlement that has already happened.
    pub fn ready(outcome: ScriptOutcome) -> Self {
        let (sender, settlement) = Self::channel();
        let _unused = sender.send(outcome);
        settlement
    }

    async fn settled(self) -> ScriptOutcome {
        self.receiver
            .await
            .unwrap_or_else(|_| ScriptOutcome::Failed("load was cancelled".to_owned()))
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GateReport {
    pub loaded: usize,
    pub failed: usize,
    /// Scripts still loading when the gate resolved.
    pub outstanding: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    AllSettled(GateReport),
    TimedOut(GateReport),
}

impl GateOutcome {
    pub const fn report(&self) -> &GateReport {
        match self {
            Self::AllSettled(report) | Self::TimedOut(report) => report,
        }
    }
}

impl Display for GateOutcome {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        let (label, report) = match self {
            Self::AllSettled(report) => ("all scripts settled", report),
            Self::TimedOut(report) => ("timed out", report),
        };
        write!(
            formatter,
            "{label} ({} loaded, {} failed, {} outstanding)",
            report.loaded, report.failed, report.outstanding
        )
    }
}

/// Wait for every settlement, giving up at `deadline`.
///
/// Resolves immediately when there is nothing to wait for. Settlements that
/// arrive after the deadline are not observed.
pub async fn wait_for_completion(settlements: Vec<Settlement>, deadline: Instant) -> GateOutcome {
    let mut report = GateReport {
        outstanding: settlements.len(),
        ..GateReport::default()
    };
    let mut pending: FuturesUnordered<_> = settlements.into_iter().map(Settlement::settled).collect();
    let timeout = sleep_until(deadline);
    tokio::pin!(timeout);

    loop {
        tokio::select! {
            biased;
            next = pending.next() => {
                match next {
                    Some(ScriptOutcome::Loaded) => report.loaded = report.loaded.saturating_add(1),
                    Some(ScriptOutcome::Failed(_)) => report.failed = report.failed.saturating_add(1),
                    None => return GateOutcome::AllSettled(report),
                }
                report.outstanding = report.outstanding.saturating_sub(1);
            }
            () = &mut timeout => return GateOutcome::TimedOut(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn nothing_to_wait_for_resolves_immediately() {
        let started = Instant::now();
        let outcome = wait_for_completion(Vec::new(), started + Duration::from_millis(5000)).await;
        assert_eq!(outcome, GateOutcome::AllSettled(GateReport::default()));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_count_as_settled() {
        let started = Instant::now();
        let (loaded, first) = Settlement::channel();
        let (failed, second) = Settlement::channel();
        let _unused = loaded.send(ScriptOutcome::Loaded);
        let _unused = failed.send(ScriptOutcome::Failed("404".to_owned()));

        let outcome = wait_for_completion(vec![first, second], started + Duration::from_millis(5000)).await;
        assert_eq!(
            outcome,
            GateOutcome::AllSettled(GateReport {
                loaded: 1,
                failed: 1,
                outstanding: 0,
            })
        );
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_caps_the_wait() {
        let started = Instant::now();
        let (loaded, first) = Settlement::channel();
        let (_never, second) = Settlement::channel();
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            let _unused = loaded.send(ScriptOutcome::Loaded);
        });

        let outcome = wait_for_completion(vec![first, second], started + Duration::from_millis(5000)).await;
        assert_eq!(
            outcome,
            GateOutcome::TimedOut(GateReport {
                loaded: 1,
                failed: 0,
                outstanding: 1,
            })
        );
        assert_eq!(started.elapsed(), Duration::from_millis(5000));
        assert_eq!(
            outcome.to_string(),
            "timed out (1 loaded, 0 failed, 1 outstanding)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_settles_as_failure() {
        let started = Instant::now();
        let (sender, settlement) = Settlement::channel();
        drop(sender);
        let outcome = wait_for_completion(vec![settlement], started + Duration::from_millis(5000)).await;
        assert_eq!(outcome.report().failed, 1);
        assert!(matches!(outcome, GateOutcome::AllSettled(_)));
    }
}
