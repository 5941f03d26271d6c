use std::time::Duration;

use ::log::{debug, trace};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use super::node::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerSignal {
    /// Stop the running countdown, if any.
    Reset,
    /// Start a countdown (or restart the running one).
    Gate,
}

/// Handle the event loop uses to drive the election timer task.
#[derive(Debug, Clone)]
pub(crate) struct ElectionTimer {
    signals: mpsc::UnboundedSender<TimerSignal>,
}

impl ElectionTimer {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<TimerSignal>) {
        let (signals, rx) = mpsc::unbounded_channel();
        (Self { signals }, rx)
    }

    pub(crate) fn reset(&self) {
        let _ = self.signals.send(TimerSignal::Reset);
    }

    pub(crate) fn open_gate(&self) {
        let _ = self.signals.send(TimerSignal::Gate);
    }
}

/// Picks a timeout uniformly in `[min, min + span)` milliseconds.
pub(crate) fn election_timeout(min: u64, span: u64) -> Duration {
    let jitter = if span == 0 {
        0
    } else {
        rand::rng().random_range(0..span)
    };
    Duration::from_millis(min + jitter)
}

/// Resolves once the shutdown flag is raised or its sender is gone.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

/// Election timer loop. Idles until gated, then counts down; a `Reset`
/// sends it back to idle, a `Gate` restarts the countdown. On expiry it
/// enqueues `Event::ElectionTimeout` and goes back to idle.
pub(crate) async fn run_election_timer(
    mut signals: mpsc::UnboundedReceiver<TimerSignal>,
    events: mpsc::UnboundedSender<Event>,
    mut shutdown: watch::Receiver<bool>,
    min_timeout: u64,
    timeout_span: u64,
) {
    'idle: loop {
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => return,
                signal = signals.recv() => match signal {
                    Some(TimerSignal::Gate) => break,
                    Some(TimerSignal::Reset) => continue,
                    None => return,
                },
            }
        }

        loop {
            let timeout = election_timeout(min_timeout, timeout_span);
            trace!("Election countdown {timeout:?}");
            tokio::select! {
                _ = stopped(&mut shutdown) => return,
                signal = signals.recv() => match signal {
                    Some(TimerSignal::Reset) => continue 'idle,
                    Some(TimerSignal::Gate) => continue,
                    None => return,
                },
                _ = sleep(timeout) => {
                    if events.send(Event::ElectionTimeout).is_err() {
                        return;
                    }
                    continue 'idle;
                }
            }
        }
    }
}

/// Heartbeat ticker for one leadership term. Exits as soon as the node is no
/// longer leader for `term`.
pub(crate) async fn run_heartbeat(
    term: u64,
    period: Duration,
    mut leadership: watch::Receiver<Option<u64>>,
    events: mpsc::UnboundedSender<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => return,
            changed = leadership.changed() => {
                if changed.is_err() || *leadership.borrow() != Some(term) {
                    break;
                }
            }
            _ = ticker.tick() => {
                if *leadership.borrow() != Some(term) {
                    break;
                }
                if events.send(Event::SendAppendEntries).is_err() {
                    return;
                }
            }
        }
    }

    debug!("Heartbeat ticker for term {term} stopped");
}
