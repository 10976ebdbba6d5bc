//! Escalating reminder alarm
//!
//! While a reminder is showing, an alert plays every two seconds. It starts
//! soft and switches to the urgent sound once the reminder has been ignored
//! for long enough.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::AlertConfig;

/// Time between alert plays
pub const CYCLE: Duration = Duration::from_secs(2);

/// Elapsed time after which the urgent sound is used
pub const ESCALATION_THRESHOLD: Duration = Duration::from_secs(270);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Soft,
    Urgent,
}

impl AlertKind {
    pub fn for_elapsed(elapsed: Duration) -> Self {
        if elapsed < ESCALATION_THRESHOLD {
            Self::Soft
        } else {
            Self::Urgent
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Played,
    Unavailable,
}

/// Something that can make noise
pub trait AlertPlayer: Send + Sync + 'static {
    /// Start one alert and return without waiting for playback to end
    fn play(&self, kind: AlertKind) -> PlayOutcome;

    /// Fallback when no sound could be played
    fn flash(&self) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(b"\x07");
        let _ = stdout.flush();
    }
}

/// Plays sound files with an external program (`paplay` by default)
///
/// The player runs in the background. A playback that exits with an error
/// is reported as `Unavailable` by the following call.
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    config: AlertConfig,
    last_failed: Arc<AtomicBool>,
}

impl CommandPlayer {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            last_failed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl AlertPlayer for CommandPlayer {
    fn play(&self, kind: AlertKind) -> PlayOutcome {
        let file = match kind {
            AlertKind::Soft => &self.config.soft,
            AlertKind::Urgent => &self.config.urgent,
        };
        let previous_failed = self.last_failed.swap(false, Ordering::SeqCst);

        let spawned = Command::new(&self.config.player)
            .arg(file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                debug!(?kind, error = %e, "CommandPlayer::play: player not available");
                return PlayOutcome::Unavailable;
            }
        };

        // Reap the player when it finishes and remember whether it worked
        let last_failed = self.last_failed.clone();
        std::thread::spawn(move || match child.wait() {
            Ok(status) if status.success() => {}
            Ok(status) => {
                debug!(?kind, code = ?status.code(), "CommandPlayer::play: player failed");
                last_failed.store(true, Ordering::SeqCst);
            }
            Err(e) => {
                debug!(?kind, error = %e, "CommandPlayer::play: wait failed");
                last_failed.store(true, Ordering::SeqCst);
            }
        });

        if previous_failed {
            PlayOutcome::Unavailable
        } else {
            PlayOutcome::Played
        }
    }
}

#[derive(Debug, Default)]
struct AlarmState {
    beeping: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    generation: AtomicU64,
}

impl AlarmState {
    fn started_at(&self) -> Option<Instant> {
        *self.started_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_started_at(&self, value: Option<Instant>) {
        *self.started_at.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }
}

/// Cancellable repeating alert
///
/// Clones share state, so `stop` can be called from any task holding a clone.
#[derive(Clone)]
pub struct AlarmEscalator {
    state: Arc<AlarmState>,
    player: Arc<dyn AlertPlayer>,
}

impl AlarmEscalator {
    pub fn new(player: Arc<dyn AlertPlayer>) -> Self {
        Self {
            state: Arc::new(AlarmState::default()),
            player,
        }
    }

    /// Begin the alert cycle; returns immediately
    ///
    /// Must be called from within a tokio runtime. Starting an already
    /// beeping alarm is a no-op.
    pub fn start(&self) {
        if self.state.beeping.load(Ordering::SeqCst) {
            debug!("AlarmEscalator::start: already beeping");
            return;
        }
        self.state.set_started_at(Some(Instant::now()));
        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.beeping.store(true, Ordering::SeqCst);
        info!("Alarm started");

        let state = self.state.clone();
        let player = self.player.clone();
        tokio::spawn(run_cycle(state, player, generation));
    }

    /// Ask the cycle to end before its next alert; never blocks
    pub fn stop(&self) {
        if self.state.beeping.swap(false, Ordering::SeqCst) {
            info!("Alarm stopped");
        }
        self.state.set_started_at(None);
    }

    pub fn is_beeping(&self) -> bool {
        self.state.beeping.load(Ordering::SeqCst)
    }

    /// Time since `start`, or `None` when not beeping
    pub fn elapsed(&self) -> Option<Duration> {
        self.state.started_at().map(|t| t.elapsed())
    }
}

async fn run_cycle(state: Arc<AlarmState>, player: Arc<dyn AlertPlayer>, generation: u64) {
    let mut ticker = tokio::time::interval(CYCLE);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !state.beeping.load(Ordering::SeqCst) || state.generation.load(Ordering::SeqCst) != generation {
            break;
        }
        let Some(started_at) = state.started_at() else {
            break;
        };
        let kind = AlertKind::for_elapsed(started_at.elapsed());

        if player.play(kind) == PlayOutcome::Unavailable {
            player.flash();
        }
    }
    debug!(generation, "run_cycle: finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingPlayer {
        plays: Mutex<Vec<AlertKind>>,
        flashes: AtomicUsize,
        unavailable: bool,
    }

    impl RecordingPlayer {
        fn plays(&self) -> Vec<AlertKind> {
            self.plays.lock().unwrap().clone()
        }
    }

    impl AlertPlayer for RecordingPlayer {
        fn play(&self, kind: AlertKind) -> PlayOutcome {
            self.plays.lock().unwrap().push(kind);
            if self.unavailable {
                PlayOutcome::Unavailable
            } else {
                PlayOutcome::Played
            }
        }

        fn flash(&self) {
            self.flashes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_kind_for_elapsed() {
        assert_eq!(AlertKind::for_elapsed(Duration::ZERO), AlertKind::Soft);
        assert_eq!(AlertKind::for_elapsed(Duration::from_secs(269)), AlertKind::Soft);
        assert_eq!(AlertKind::for_elapsed(Duration::from_secs(270)), AlertKind::Urgent);
        assert_eq!(AlertKind::for_elapsed(Duration::from_secs(3600)), AlertKind::Urgent);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_quick_stop_never_urgent() {
        let player = Arc::new(RecordingPlayer::default());
        let alarm = AlarmEscalator::new(player.clone());

        alarm.start();
        assert!(alarm.is_beeping());
        tokio::time::sleep(Duration::from_millis(500)).await;
        alarm.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let plays = player.plays();
        assert!(!plays.is_empty());
        assert!(plays.iter().all(|k| *k == AlertKind::Soft));
        assert!(!alarm.is_beeping());
        assert!(alarm.elapsed().is_none());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_escalates_and_never_reverts() {
        let player = Arc::new(RecordingPlayer::default());
        let alarm = AlarmEscalator::new(player.clone());

        alarm.start();
        tokio::time::sleep(Duration::from_secs(300)).await;
        alarm.stop();

        let plays = player.plays();
        assert_eq!(plays.first(), Some(&AlertKind::Soft));
        assert_eq!(plays.last(), Some(&AlertKind::Urgent));
        let first_urgent = plays.iter().position(|k| *k == AlertKind::Urgent).unwrap();
        assert!(plays[first_urgent..].iter().all(|k| *k == AlertKind::Urgent));
        // One play per cycle
        assert!(plays.len() >= 140);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_stop_is_idempotent_and_ends_cycle() {
        let player = Arc::new(RecordingPlayer::default());
        let alarm = AlarmEscalator::new(player.clone());

        alarm.start();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let other = alarm.clone();
        other.stop();
        alarm.stop();

        tokio::time::sleep(Duration::from_secs(3)).await;
        let count = player.plays().len();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(player.plays().len(), count);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_unavailable_player_degrades_to_flash() {
        let player = Arc::new(RecordingPlayer {
            unavailable: true,
            ..Default::default()
        });
        let alarm = AlarmEscalator::new(player.clone());

        alarm.start();
        tokio::time::sleep(Duration::from_secs(7)).await;
        alarm.stop();

        let plays = player.plays().len();
        assert!(plays >= 3);
        assert_eq!(player.flashes.load(Ordering::SeqCst), plays);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_restart_does_not_double_the_cycle() {
        let player = Arc::new(RecordingPlayer::default());
        let alarm = AlarmEscalator::new(player.clone());

        alarm.start();
        alarm.stop();
        alarm.start();
        tokio::time::sleep(Duration::from_secs(11)).await;
        alarm.stop();

        // One cycle: plays at 0, 2, 4, 6, 8, 10
        assert!(player.plays().len() <= 7);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_plays_on_a_fixed_period() {
        #[derive(Default)]
        struct TimedPlayer {
            at: Mutex<Vec<Instant>>,
        }

        impl AlertPlayer for TimedPlayer {
            fn play(&self, _: AlertKind) -> PlayOutcome {
                self.at.lock().unwrap().push(Instant::now());
                PlayOutcome::Played
            }

            fn flash(&self) {}
        }

        let player = Arc::new(TimedPlayer::default());
        let alarm = AlarmEscalator::new(player.clone());

        alarm.start();
        tokio::time::sleep(Duration::from_secs(9)).await;
        alarm.stop();

        let at = player.at.lock().unwrap().clone();
        assert_eq!(at.len(), 5);
        for pair in at.windows(2) {
            assert_eq!(pair[1] - pair[0], CYCLE);
        }
    }

    #[test]
    fn test_command_player_does_not_wait_for_playback() {
        let player = CommandPlayer::new(AlertConfig {
            player: "sleep".to_string(),
            soft: "5".to_string(),
            ..Default::default()
        });

        let started = std::time::Instant::now();
        assert_eq!(player.play(AlertKind::Soft), PlayOutcome::Played);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_command_player_reports_failed_playback_next_time() {
        let player = CommandPlayer::new(AlertConfig {
            player: "false".to_string(),
            ..Default::default()
        });

        assert_eq!(player.play(AlertKind::Soft), PlayOutcome::Played);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !player.last_failed.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(player.play(AlertKind::Urgent), PlayOutcome::Unavailable);
    }

    #[test]
    fn test_command_player_missing_program_is_unavailable() {
        let player = CommandPlayer::new(AlertConfig {
            player: "tasknag-no-such-player".to_string(),
            ..Default::default()
        });
        assert_eq!(player.play(AlertKind::Soft), PlayOutcome::Unavailable);
    }
}
