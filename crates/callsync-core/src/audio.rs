//! Audio route control
//!
//! Wraps the platform audio session. The controller is a small state machine
//! over two axes, whether call audio is enabled and which output it uses:
//!
//! ```text
//!            activate / resumable interruption end
//!                        (only while a call holds the session)
//!   Disabled ---------------------------------------> Enabled
//!      ^      deactivate / interruption begin            |
//!      +-------------------------------------------------+
//!
//!   Earpiece <---- set_route(true/false) ----> Speaker
//!   ringing and deactivation force Earpiece
//! ```
//!
//! Platform calls are best effort. A failing call is retried once after
//! reconfiguring the session from its baseline; a second failure is reported
//! and left alone.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("audio session {operation} failed: {reason}")]
pub struct AudioError {
    pub operation: String,
    pub reason: String,
}

impl AudioError {
    pub fn new(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Platform audio session
pub trait AudioSession: Send + Sync {
    /// Reset category, mode and options to the call baseline
    fn configure_baseline(&self) -> Result<(), AudioError>;

    fn set_active(&self, active: bool) -> Result<(), AudioError>;

    /// Enable or disable microphone capture and playout
    fn set_capture_enabled(&self, enabled: bool) -> Result<(), AudioError>;

    fn set_speaker(&self, enabled: bool) -> Result<(), AudioError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioRoute {
    Earpiece,
    Speaker,
}

/// Audio session notifications from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSignal {
    /// The media services were reset; everything must be set up again
    SessionReset,
    InterruptionBegan,
    InterruptionEnded { should_resume: bool },
}

/// Snapshot of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioState {
    /// Capture and playout are running
    pub enabled: bool,
    /// The platform session is active for a call; survives interruptions
    pub session_active: bool,
    pub route: AudioRoute,
    pub interrupted: bool,
}

impl Default for AudioState {
    fn default() -> Self {
        Self {
            enabled: false,
            session_active: false,
            route: AudioRoute::Earpiece,
            interrupted: false,
        }
    }
}

pub struct AudioRouteController {
    session: Arc<dyn AudioSession>,
    state: Mutex<AudioState>,
}

impl AudioRouteController {
    pub fn new(session: Arc<dyn AudioSession>) -> Self {
        Self {
            session,
            state: Mutex::new(AudioState::default()),
        }
    }

    pub fn state(&self) -> AudioState {
        *self.state.lock()
    }

    /// Route output to the speaker or the earpiece. No-op if already there.
    pub fn set_route(&self, to_speaker: bool) -> Result<AudioRoute, AudioError> {
        let desired = if to_speaker {
            AudioRoute::Speaker
        } else {
            AudioRoute::Earpiece
        };

        let mut state = self.state.lock();
        if state.route == desired {
            debug!(route = ?desired, "Audio route unchanged");
            return Ok(desired);
        }

        self.with_retry("set_speaker", || self.session.set_speaker(to_speaker))?;
        state.route = desired;
        info!(route = ?desired, "Audio route changed");
        Ok(desired)
    }

    /// Ringing always plays through the earpiece
    pub fn force_earpiece(&self) {
        let mut state = self.state.lock();
        if let Err(e) = self.with_retry("set_speaker", || self.session.set_speaker(false)) {
            warn!(error = %e, "Could not force earpiece route");
            return;
        }
        state.route = AudioRoute::Earpiece;
    }

    /// The call authority activated the audio session
    pub fn activate(&self) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        if state.enabled {
            return Ok(());
        }
        self.enable(&mut state)?;
        info!("Call audio enabled");
        Ok(())
    }

    /// The call authority deactivated the audio session, or the last call ended
    pub fn deactivate(&self) {
        let mut state = self.state.lock();
        if *state == AudioState::default() {
            return;
        }

        if let Err(e) = self.session.set_capture_enabled(false) {
            warn!(error = %e, "Failed to disable capture");
        }
        if let Err(e) = self.session.set_active(false) {
            warn!(error = %e, "Failed to deactivate audio session");
        }
        if state.route == AudioRoute::Speaker {
            if let Err(e) = self.session.set_speaker(false) {
                warn!(error = %e, "Failed to reset audio route");
            }
        }
        *state = AudioState::default();
        info!("Call audio disabled");
    }

    pub fn handle_signal(&self, signal: AudioSignal) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        match signal {
            AudioSignal::SessionReset => {
                info!("Audio session reset, reconfiguring");
                self.session.configure_baseline()?;
                state.interrupted = false;
                if state.enabled {
                    state.enabled = false;
                    self.enable(&mut state)?;
                }
                Ok(())
            }
            AudioSignal::InterruptionBegan => {
                state.interrupted = true;
                if state.enabled {
                    if let Err(e) = self.session.set_capture_enabled(false) {
                        warn!(error = %e, "Failed to disable capture on interruption");
                    }
                    state.enabled = false;
                }
                debug!("Audio interruption began");
                Ok(())
            }
            AudioSignal::InterruptionEnded { should_resume } => {
                state.interrupted = false;
                if !should_resume {
                    debug!("Audio interruption ended, not resumable");
                    return Ok(());
                }
                if !state.session_active {
                    debug!("Audio interruption ended with no call audio to resume");
                    return Ok(());
                }
                self.enable(&mut state)?;
                info!("Audio resumed after interruption");
                Ok(())
            }
        }
    }

    fn enable(&self, state: &mut AudioState) -> Result<(), AudioError> {
        self.with_retry("set_active", || self.session.set_active(true))?;
        self.with_retry("set_capture_enabled", || {
            self.session.set_capture_enabled(true)
        })?;
        if state.route == AudioRoute::Speaker {
            self.with_retry("set_speaker", || self.session.set_speaker(true))?;
        }
        state.enabled = true;
        state.session_active = true;
        Ok(())
    }

    /// Run a platform call, retrying once after a baseline reconfiguration
    fn with_retry<F>(&self, operation: &str, mut f: F) -> Result<(), AudioError>
    where
        F: FnMut() -> Result<(), AudioError>,
    {
        match f() {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(operation, error = %first, "Audio operation failed, reconfiguring and retrying");
                if let Err(e) = self.session.configure_baseline() {
                    warn!(error = %e, "Baseline reconfiguration failed");
                }
                match f() {
                    Ok(()) => {
                        debug!(operation, "Audio operation succeeded on retry");
                        Ok(())
                    }
                    Err(second) => {
                        error!(operation, error = %second, "Audio operation failed after retry");
                        Err(second)
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for AudioRouteController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioRouteController")
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    #[derive(Default)]
    struct ScriptedSession {
        speaker_failures: AtomicUsize,
        speaker_calls: AtomicUsize,
        baseline_calls: AtomicUsize,
        capture: parking_lot::Mutex<Vec<bool>>,
        active: parking_lot::Mutex<Vec<bool>>,
    }

    impl AudioSession for ScriptedSession {
        fn configure_baseline(&self) -> Result<(), AudioError> {
            self.baseline_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn set_active(&self, active: bool) -> Result<(), AudioError> {
            self.active.lock().push(active);
            Ok(())
        }

        fn set_capture_enabled(&self, enabled: bool) -> Result<(), AudioError> {
            self.capture.lock().push(enabled);
            Ok(())
        }

        fn set_speaker(&self, _enabled: bool) -> Result<(), AudioError> {
            self.speaker_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.speaker_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.speaker_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(AudioError::new("set_speaker", "route busy"));
            }
            Ok(())
        }
    }

    fn controller(speaker_failures: usize) -> (AudioRouteController, Arc<ScriptedSession>) {
        let session = Arc::new(ScriptedSession::default());
        session.speaker_failures.store(speaker_failures, Ordering::SeqCst);
        (AudioRouteController::new(session.clone()), session)
    }

    #[test]
    fn test_set_route_is_idempotent() {
        let (audio, session) = controller(0);
        assert_eq!(audio.set_route(false).unwrap(), AudioRoute::Earpiece);
        assert_eq!(session.speaker_calls.load(Ordering::SeqCst), 0);

        audio.set_route(true).unwrap();
        audio.set_route(true).unwrap();
        assert_eq!(session.speaker_calls.load(Ordering::SeqCst), 1);
        assert_eq!(audio.state().route, AudioRoute::Speaker);
    }

    #[test]
    fn test_single_failure_is_retried() {
        let (audio, session) = controller(1);
        assert_eq!(audio.set_route(true).unwrap(), AudioRoute::Speaker);
        assert_eq!(session.speaker_calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.baseline_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[traced_test]
    fn test_retry_is_logged() {
        let (audio, _) = controller(1);
        audio.set_route(true).unwrap();
        assert!(logs_contain("reconfiguring and retrying"));
        assert!(logs_contain("succeeded on retry"));
    }

    #[test]
    fn test_second_failure_is_reported() {
        let (audio, session) = controller(2);
        assert!(audio.set_route(true).is_err());
        assert_eq!(session.speaker_calls.load(Ordering::SeqCst), 2);
        assert_eq!(audio.state().route, AudioRoute::Earpiece);
    }

    #[test]
    fn test_force_earpiece_overrides_speaker() {
        let (audio, _) = controller(0);
        audio.set_route(true).unwrap();
        audio.force_earpiece();
        assert_eq!(audio.state().route, AudioRoute::Earpiece);
    }

    #[test]
    fn test_interruption_resumes_only_when_allowed() {
        let (audio, session) = controller(0);
        audio.activate().unwrap();
        assert!(audio.state().enabled);

        audio.handle_signal(AudioSignal::InterruptionBegan).unwrap();
        assert!(!audio.state().enabled);
        assert!(audio.state().interrupted);

        audio
            .handle_signal(AudioSignal::InterruptionEnded { should_resume: false })
            .unwrap();
        assert!(!audio.state().enabled);

        audio.handle_signal(AudioSignal::InterruptionBegan).unwrap();
        audio
            .handle_signal(AudioSignal::InterruptionEnded { should_resume: true })
            .unwrap();
        assert!(audio.state().enabled);
        assert_eq!(*session.capture.lock(), vec![true, false, true]);
    }

    #[test]
    fn test_session_reset_reapplies_route() {
        let (audio, session) = controller(0);
        audio.activate().unwrap();
        audio.set_route(true).unwrap();

        audio.handle_signal(AudioSignal::SessionReset).unwrap();
        let state = audio.state();
        assert!(state.enabled);
        assert_eq!(state.route, AudioRoute::Speaker);
        assert_eq!(session.baseline_calls.load(Ordering::SeqCst), 1);
        // set_route, then reapply after reset
        assert_eq!(session.speaker_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_interruption_while_idle_stays_idle() {
        let (audio, session) = controller(0);

        audio.handle_signal(AudioSignal::InterruptionBegan).unwrap();
        audio
            .handle_signal(AudioSignal::InterruptionEnded { should_resume: true })
            .unwrap();

        let state = audio.state();
        assert!(!state.enabled);
        assert!(!state.session_active);
        assert!(session.capture.lock().is_empty());
        assert!(session.active.lock().is_empty());
    }

    #[test]
    fn test_deactivate_during_interruption_releases_session() {
        let (audio, session) = controller(0);
        audio.activate().unwrap();
        audio.handle_signal(AudioSignal::InterruptionBegan).unwrap();

        audio.deactivate();
        assert_eq!(*session.active.lock(), vec![true, false]);
        assert_eq!(audio.state(), AudioState::default());

        // Nothing left to resume once the call is gone
        audio
            .handle_signal(AudioSignal::InterruptionEnded { should_resume: true })
            .unwrap();
        assert!(!audio.state().enabled);
        assert_eq!(*session.active.lock(), vec![true, false]);
    }

    #[test]
    fn test_deactivate_resets_to_earpiece() {
        let (audio, _) = controller(0);
        audio.activate().unwrap();
        audio.set_route(true).unwrap();
        audio.deactivate();
        assert_eq!(audio.state(), AudioState::default());
    }
}
