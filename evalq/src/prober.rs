//! Liveness prober.
//!
//! While work is outstanding, a recurring timer asks the host for a pong so
//! that a stalled host shows up in the logs and the host's event loop keeps
//! turning. The timer task only produces [`ProbeTick`]s; deciding whether to
//! ping happens on the event loop in [`LivenessProber::on_tick`].
//!
//! ```text
//! Idle --start--> Probing --tick, completed < started--> Probing (ping)
//!                    |
//!                    +----tick, settled / budget spent--> Idle (timer cleared)
//! ```

use std::str::FromStr;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::bridge::protocol::{HostCall, PingId};
use crate::config::{ConfigError, MIN_PROBE_INTERVAL};
use crate::registry::OperationCounters;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProbeMode {
    /// Ping on every tick until `completed == started`.
    #[default]
    UntilDrained,
    /// Ping exactly `pings` times regardless of counters.
    Bounded { pings: u32 },
    Disabled,
}

impl FromStr for ProbeMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "until-drained" => Ok(Self::UntilDrained),
            "disabled" | "off" => Ok(Self::Disabled),
            other => {
                let pings = other
                    .strip_prefix("bounded:")
                    .and_then(|n| n.parse::<u32>().ok())
                    .ok_or_else(|| ConfigError::invalid("probe mode", other))?;
                Ok(Self::Bounded { pings })
            }
        }
    }
}

impl std::fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UntilDrained => f.write_str("until-drained"),
            Self::Bounded { pings } => write!(f, "bounded:{pings}"),
            Self::Disabled => f.write_str("disabled"),
        }
    }
}

/// Tick delivered to the event loop, tagged with the cycle that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTick {
    generation: u64,
}

struct ProbeTimer {
    generation: u64,
    handle: JoinHandle<()>,
    /// Pings left in bounded mode; `None` means counter-driven.
    remaining: Option<u32>,
}

pub struct LivenessProber {
    interval: Duration,
    tick_tx: mpsc::UnboundedSender<ProbeTick>,
    timer: Option<ProbeTimer>,
    generation: u64,
    next_ping_id: u64,
    pings_sent: u64,
}

impl LivenessProber {
    /// `interval` is raised to [`MIN_PROBE_INTERVAL`] if shorter.
    pub fn new(interval: Duration, tick_tx: mpsc::UnboundedSender<ProbeTick>) -> Self {
        Self {
            interval: interval.max(MIN_PROBE_INTERVAL),
            tick_tx,
            timer: None,
            generation: 0,
            next_ping_id: 0,
            pings_sent: 0,
        }
    }

    /// Start a probe cycle, cancelling any running one first.
    pub fn start(&mut self, mode: ProbeMode) {
        self.cancel();

        let remaining = match mode {
            ProbeMode::Disabled | ProbeMode::Bounded { pings: 0 } => return,
            ProbeMode::UntilDrained => None,
            ProbeMode::Bounded { pings } => Some(pings),
        };

        self.generation += 1;
        let generation = self.generation;
        let interval = self.interval;
        let tx = self.tick_tx.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(ProbeTick { generation }).is_err() {
                    break;
                }
            }
        });

        tracing::debug!(generation, interval = ?self.interval, %mode, "Liveness probe started");
        self.timer = Some(ProbeTimer {
            generation,
            handle,
            remaining,
        });
    }

    /// Stop the current cycle. Returns whether a timer was running.
    pub fn cancel(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                timer.handle.abort();
                tracing::debug!(generation = timer.generation, "Liveness probe cancelled");
                true
            }
            None => false,
        }
    }

    /// Handle one tick. Returns the ping to submit, if any.
    ///
    /// Ticks from a cancelled cycle are ignored.
    pub fn on_tick(&mut self, tick: ProbeTick, counters: &OperationCounters) -> Option<HostCall> {
        let timer = match self.timer.as_mut() {
            Some(timer) if timer.generation == tick.generation => timer,
            _ => {
                tracing::trace!(generation = tick.generation, "Ignoring stale probe tick");
                return None;
            }
        };

        match timer.remaining.as_mut() {
            None if counters.completed >= counters.started => {
                tracing::info!(%counters, "Work settled; liveness probe stopping");
                self.cancel();
                None
            }
            None => {
                tracing::debug!(outstanding = counters.outstanding(), "Operations outstanding; pinging host");
                Some(self.next_ping())
            }
            Some(remaining) => {
                *remaining -= 1;
                let exhausted = *remaining == 0;
                let ping = self.next_ping();
                if exhausted {
                    tracing::debug!("Bounded liveness probe finished");
                    self.cancel();
                }
                Some(ping)
            }
        }
    }

    fn next_ping(&mut self) -> HostCall {
        self.next_ping_id += 1;
        self.pings_sent += 1;
        HostCall::Ping {
            id: PingId::new(self.next_ping_id),
        }
    }

    pub fn is_active(&self) -> bool {
        self.timer.is_some()
    }

    pub fn pings_sent(&self) -> u64 {
        self.pings_sent
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Generation of the running cycle, if any.
    pub fn current_tick(&self) -> Option<ProbeTick> {
        self.timer.as_ref().map(|t| ProbeTick {
            generation: t.generation,
        })
    }
}

impl Drop for LivenessProber {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(started: u64, completed: u64) -> OperationCounters {
        OperationCounters {
            queued: started,
            started,
            completed,
        }
    }

    fn ping(raw: u64) -> Option<HostCall> {
        Some(HostCall::Ping {
            id: PingId::new(raw),
        })
    }

    fn prober() -> (LivenessProber, mpsc::UnboundedReceiver<ProbeTick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LivenessProber::new(Duration::from_secs(1), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn pings_while_outstanding_then_stops() {
        let (mut prober, mut ticks) = prober();
        prober.start(ProbeMode::UntilDrained);

        let outstanding = counters(1, 0);
        for expected in 1..=3 {
            let tick = ticks.recv().await.unwrap();
            assert_eq!(prober.on_tick(tick, &outstanding), ping(expected));
        }

        let settled = counters(1, 1);
        let tick = ticks.recv().await.unwrap();
        assert_eq!(prober.on_tick(tick, &settled), None);
        assert!(!prober.is_active());
        assert_eq!(prober.pings_sent(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_cancels_previous_timer() {
        let (mut prober, mut ticks) = prober();
        prober.start(ProbeMode::UntilDrained);
        let first = prober.current_tick().unwrap();

        prober.start(ProbeMode::UntilDrained);
        let second = prober.current_tick().unwrap();
        assert_ne!(first, second);

        // A tick from the first cycle is ignored.
        assert_eq!(prober.on_tick(first, &counters(2, 0)), None);
        assert!(prober.is_active());

        // Only the second cycle keeps ticking.
        let tick = ticks.recv().await.unwrap();
        assert_eq!(tick, second);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        while let Ok(tick) = ticks.try_recv() {
            assert_eq!(tick, second);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_mode_ignores_counters() {
        let (mut prober, mut ticks) = prober();
        prober.start(ProbeMode::Bounded { pings: 2 });

        let settled = counters(0, 0);
        let tick = ticks.recv().await.unwrap();
        assert_eq!(prober.on_tick(tick, &settled), ping(1));
        let tick = ticks.recv().await.unwrap();
        assert_eq!(prober.on_tick(tick, &settled), ping(2));
        assert!(!prober.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_still_ticks() {
        let (tx, mut ticks) = mpsc::unbounded_channel();
        let mut prober = LivenessProber::new(Duration::ZERO, tx);
        assert_eq!(prober.interval(), MIN_PROBE_INTERVAL);

        prober.start(ProbeMode::UntilDrained);
        let tick = ticks.recv().await.unwrap();
        assert_eq!(prober.on_tick(tick, &counters(1, 0)), ping(1));
        assert_eq!(prober.pings_sent(), 1);
    }

    #[tokio::test]
    async fn disabled_and_empty_bounded_never_start() {
        let (mut prober, _ticks) = prober();
        prober.start(ProbeMode::Disabled);
        assert!(!prober.is_active());
        prober.start(ProbeMode::Bounded { pings: 0 });
        assert!(!prober.is_active());
    }

    #[tokio::test]
    async fn cancel_clears_handle() {
        let (mut prober, _ticks) = prober();
        prober.start(ProbeMode::UntilDrained);
        assert!(prober.cancel());
        assert!(!prober.is_active());
        assert!(prober.current_tick().is_none());
        assert!(!prober.cancel());
    }

    #[test]
    fn probe_mode_parses() {
        assert_eq!("until-drained".parse::<ProbeMode>().unwrap(), ProbeMode::UntilDrained);
        assert_eq!("disabled".parse::<ProbeMode>().unwrap(), ProbeMode::Disabled);
        assert_eq!(
            "bounded:5".parse::<ProbeMode>().unwrap(),
            ProbeMode::Bounded { pings: 5 }
        );
        assert!("bounded:".parse::<ProbeMode>().is_err());
        assert!("sometimes".parse::<ProbeMode>().is_err());
        assert_eq!(ProbeMode::Bounded { pings: 5 }.to_string(), "bounded:5");
    }
}
