//! Debounced finalize: reset-on-event, fire-after-quiescence, hard ceiling.
//!
//! [`Debounce`] is the bookkeeping half (pure, clock passed in), [`settle`]
//! drives it from an mpsc receiver. The first observation arms the timer;
//! nothing fires before that except an explicit final signal or the overall
//! timeout.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceTiming {
    /// Quiet period after the most recent observation.
    pub settle: Duration,
    /// Limit counted from the first observation.
    pub ceiling: Duration,
}

#[derive(Debug, Clone)]
pub struct Debounce {
    timing: DebounceTiming,
    first: Option<Instant>,
    last: Option<Instant>,
}

impl Debounce {
    pub fn new(timing: DebounceTiming) -> Self {
        Self {
            timing,
            first: None,
            last: None,
        }
    }

    /// Record an observation at `now`, restarting the quiet period.
    pub fn observe(&mut self, now: Instant) {
        self.first.get_or_insert(now);
        self.last = Some(now);
    }

    pub fn is_armed(&self) -> bool {
        self.first.is_some()
    }

    /// When finalize fires, or `None` while nothing was observed.
    pub fn deadline(&self) -> Option<Instant> {
        let first = self.first?;
        let last = self.last?;
        Some((last + self.timing.settle).min(first + self.timing.ceiling))
    }

    /// Whether the ceiling (rather than quiescence) bounds the deadline.
    pub fn ceiling_reached(&self, now: Instant) -> bool {
        self.first
            .is_some_and(|first| now >= first + self.timing.ceiling)
    }
}

/// How [`settle`] should treat one received item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Counts as activity; restarts the quiet period.
    Reset,
    /// Explicit end signal; finalize now.
    Final,
    /// Not relevant to the timer.
    Ignore,
    /// Stop waiting; the caller recorded why.
    Abort,
}

/// Why [`settle`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Quiet,
    Ceiling,
    Final,
    Aborted,
    /// Nothing was observed within the overall timeout.
    TimedOut,
    /// Sender side dropped before anything fired.
    Closed,
}

impl Settled {
    /// Whether the collected observations may be used.
    pub fn is_finalized(self) -> bool {
        matches!(self, Settled::Quiet | Settled::Ceiling | Settled::Final)
    }
}

/// Pull items from `rx`, classifying each with `classify`, until the
/// debounce fires or `overall` elapses with no observation.
pub async fn settle<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    timing: DebounceTiming,
    overall: Duration,
    mut classify: impl FnMut(T) -> Observation,
) -> Settled {
    let mut debounce = Debounce::new(timing);
    let give_up = Instant::now() + overall;

    loop {
        let deadline = debounce.deadline().unwrap_or(give_up);
        tokio::select! {
            item = rx.recv() => match item {
                Some(item) => match classify(item) {
                    Observation::Reset => debounce.observe(Instant::now()),
                    Observation::Final => return Settled::Final,
                    Observation::Ignore => {}
                    Observation::Abort => return Settled::Aborted,
                },
                None => {
                    // A closed stream after observations still settles.
                    if !debounce.is_armed() {
                        return Settled::Closed;
                    }
                    if let Some(deadline) = debounce.deadline() {
                        tokio::time::sleep_until(deadline).await;
                    }
                    return if debounce.ceiling_reached(Instant::now()) {
                        Settled::Ceiling
                    } else {
                        Settled::Quiet
                    };
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                if !debounce.is_armed() {
                    return Settled::TimedOut;
                }
                return if debounce.ceiling_reached(Instant::now()) {
                    Settled::Ceiling
                } else {
                    Settled::Quiet
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMING: DebounceTiming = DebounceTiming {
        settle: Duration::from_secs(1),
        ceiling: Duration::from_secs(5),
    };
    const OVERALL: Duration = Duration::from_secs(15);

    #[test]
    fn test_deadline_is_min_of_settle_and_ceiling() {
        let t0 = Instant::now();
        let mut d = Debounce::new(TIMING);
        assert_eq!(d.deadline(), None);

        d.observe(t0);
        assert_eq!(d.deadline(), Some(t0 + Duration::from_secs(1)));

        d.observe(t0 + Duration::from_millis(4500));
        assert_eq!(d.deadline(), Some(t0 + Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_after_quiet_period() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for n in 0..3 {
            tx.send(n).unwrap();
        }
        let start = Instant::now();
        let mut seen = Vec::new();
        let outcome = settle(&mut rx, TIMING, OVERALL, |n| {
            seen.push(n);
            Observation::Reset
        })
        .await;

        assert_eq!(outcome, Settled::Quiet);
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_bounds_a_steady_trickle() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                if tx.send(()).is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        });
        let start = Instant::now();
        let outcome = settle(&mut rx, TIMING, OVERALL, |_| Observation::Reset).await;
        assert_eq!(outcome, Settled::Ceiling);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_fires_without_an_observation() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<()>();
        let start = Instant::now();
        let outcome = settle(&mut rx, TIMING, OVERALL, |_| Observation::Reset).await;
        assert_eq!(outcome, Settled::TimedOut);
        assert_eq!(start.elapsed(), OVERALL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_items_do_not_arm() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(false).unwrap();
        let start = Instant::now();
        let outcome = settle(&mut rx, TIMING, Duration::from_secs(3), |relevant| {
            if relevant { Observation::Reset } else { Observation::Ignore }
        })
        .await;
        assert_eq!(outcome, Settled::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_signal_short_circuits() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Observation::Reset).unwrap();
        tx.send(Observation::Final).unwrap();
        let start = Instant::now();
        let outcome = settle(&mut rx, TIMING, OVERALL, |o| o).await;
        assert_eq!(outcome, Settled::Final);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_without_items() {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        drop(tx);
        assert_eq!(
            settle(&mut rx, TIMING, OVERALL, |_| Observation::Reset).await,
            Settled::Closed
        );
    }
}
