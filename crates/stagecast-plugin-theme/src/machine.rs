//! Theme announcement followed by a 3-2-1 countdown.
//!
//! ```text
//! Idle -> ShowingTheme -(pre_countdown)-> CountingDown(3) -(tick)-> 2 -> 1 -> Idle
//! ```
//!
//! A theme directive in any state restarts the cycle. The shared theme is
//! published on adoption and left in place when the cycle ends.

use stagecast_core::{
    AppConfig, DirectiveKind, DirectiveScanner, MessageStore, Overlay, OverlayTimer, ThemeState,
};
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ThemeDisplay {
    #[default]
    Idle,
    ShowingTheme {
        theme: String,
    },
    CountingDown {
        theme: String,
        remaining: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThemeEffect {
    /// A new theme was adopted and must become the shared theme.
    Adopted(ThemeState),
    /// The countdown reached zero.
    CountdownFinished { session_id: String, privileged: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeTimings {
    pub pre_countdown: Duration,
    pub tick: Duration,
    pub countdown_from: u32,
}

impl Default for ThemeTimings {
    fn default() -> Self {
        Self {
            pre_countdown: Duration::from_millis(2000),
            tick: Duration::from_millis(1000),
            countdown_from: 3,
        }
    }
}

#[derive(Debug)]
struct Cycle {
    session_id: String,
    privileged: bool,
}

#[derive(Debug)]
pub struct ThemeOverlay {
    app: AppConfig,
    scanner: DirectiveScanner,
    timer: OverlayTimer,
    timings: ThemeTimings,
    state: ThemeDisplay,
    cycle: Option<Cycle>,
}

impl ThemeOverlay {
    pub fn new(app: AppConfig, timings: ThemeTimings, dedup_capacity: usize) -> Self {
        let scanner = DirectiveScanner::new(
            DirectiveKind::ThemeChange,
            app.directives.clone(),
            dedup_capacity,
        );
        Self {
            app,
            scanner,
            timer: OverlayTimer::default(),
            timings,
            state: ThemeDisplay::Idle,
            cycle: None,
        }
    }

    pub fn state(&self) -> &ThemeDisplay {
        &self.state
    }

    fn theme_text(&self) -> String {
        match &self.state {
            ThemeDisplay::ShowingTheme { theme } | ThemeDisplay::CountingDown { theme, .. } => {
                theme.clone()
            }
            ThemeDisplay::Idle => String::new(),
        }
    }

    fn finish(&mut self, effects: &mut Vec<ThemeEffect>) {
        self.timer.cancel();
        self.state = ThemeDisplay::Idle;
        if let Some(cycle) = self.cycle.take() {
            effects.push(ThemeEffect::CountdownFinished {
                session_id: cycle.session_id,
                privileged: cycle.privileged,
            });
        }
    }
}

impl Overlay for ThemeOverlay {
    type Display = ThemeDisplay;
    type Effect = ThemeEffect;

    fn on_store(&mut self, store: &MessageStore, now: Instant, effects: &mut Vec<ThemeEffect>) {
        let Some(found) = self.scanner.next_directive(store) else {
            return;
        };
        self.timer.cancel();

        let sender = &found.message.sender.user_id;
        let state = ThemeState::new(found.payload.clone(), found.message.send_time);
        tracing::info!("Theme change from {sender}: {} ({})", state.theme, state.session_id);
        self.cycle = Some(Cycle {
            session_id: state.session_id.clone(),
            privileged: self.app.is_privileged_local(sender),
        });
        self.state = ThemeDisplay::ShowingTheme {
            theme: found.payload,
        };
        effects.push(ThemeEffect::Adopted(state));
        self.timer.arm_after(now, self.timings.pre_countdown);
    }

    fn on_deadline(&mut self, now: Instant, effects: &mut Vec<ThemeEffect>) {
        if self.timer.take_due(now).is_none() {
            return;
        }
        let theme = self.theme_text();
        match self.state {
            ThemeDisplay::Idle => {}
            ThemeDisplay::ShowingTheme { .. } => {
                if self.timings.countdown_from == 0 {
                    self.finish(effects);
                } else {
                    self.state = ThemeDisplay::CountingDown {
                        theme,
                        remaining: self.timings.countdown_from,
                    };
                    self.timer.arm_after(now, self.timings.tick);
                }
            }
            ThemeDisplay::CountingDown { remaining, .. } => {
                let remaining = remaining.saturating_sub(1);
                if remaining == 0 {
                    self.finish(effects);
                } else {
                    self.state = ThemeDisplay::CountingDown { theme, remaining };
                    self.timer.arm_after(now, self.timings.tick);
                }
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    fn display(&self) -> ThemeDisplay {
        self.state.clone()
    }

    fn sweep(&mut self) -> bool {
        self.scanner.sweep()
    }
}

#[cfg(test)]
mod tests {
    use stagecast_core::{ChatMessage, Sender};

    use super::*;

    fn app(local: &str) -> AppConfig {
        AppConfig {
            local_user_id: Some(local.into()),
            admin_user_ids: vec!["host".into()],
            ..AppConfig::default()
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn step_to_idle(overlay: &mut ThemeOverlay, effects: &mut Vec<ThemeEffect>) -> Vec<(Instant, ThemeDisplay)> {
        let mut seen = Vec::new();
        while let Some(at) = overlay.next_deadline() {
            overlay.on_deadline(at, effects);
            seen.push((at, overlay.display()));
        }
        seen
    }

    #[test]
    fn full_cycle_for_viewer() {
        let t0 = Instant::now();
        let mut store = MessageStore::new();
        let mut overlay = ThemeOverlay::new(app("viewer"), ThemeTimings::default(), 100);
        let mut effects = Vec::new();

        store.append(ChatMessage::new("t1", "[THEME] Robots", Sender::new("viewer")));
        overlay.on_store(&store, t0, &mut effects);
        assert_eq!(overlay.display(), ThemeDisplay::ShowingTheme { theme: "Robots".into() });
        match effects.remove(0) {
            ThemeEffect::Adopted(state) => assert_eq!(state.session_id, "Robots_session_id"),
            other => panic!("unexpected effect {other:?}"),
        }

        let seen = step_to_idle(&mut overlay, &mut effects);
        let countdown = |remaining| ThemeDisplay::CountingDown { theme: "Robots".into(), remaining };
        assert_eq!(
            seen,
            vec![
                (t0 + ms(2000), countdown(3)),
                (t0 + ms(3000), countdown(2)),
                (t0 + ms(4000), countdown(1)),
                (t0 + ms(5000), ThemeDisplay::Idle),
            ]
        );
        assert_eq!(
            effects,
            vec![ThemeEffect::CountdownFinished {
                session_id: "Robots_session_id".into(),
                privileged: false,
            }]
        );
    }

    #[test]
    fn admin_sender_on_admin_client_is_privileged() {
        let t0 = Instant::now();
        let mut store = MessageStore::new();
        let mut overlay = ThemeOverlay::new(app("host"), ThemeTimings::default(), 100);
        let mut effects = Vec::new();
        store.append(ChatMessage::new("t1", "[THEME] Robots", Sender::new("host")));
        overlay.on_store(&store, t0, &mut effects);
        effects.clear();
        step_to_idle(&mut overlay, &mut effects);
        assert_eq!(
            effects,
            vec![ThemeEffect::CountdownFinished {
                session_id: "Robots_session_id".into(),
                privileged: true,
            }]
        );
    }

    #[test]
    fn new_theme_mid_countdown_restarts_cycle() {
        let t0 = Instant::now();
        let mut store = MessageStore::new();
        let mut overlay = ThemeOverlay::new(app("viewer"), ThemeTimings::default(), 100);
        let mut effects = Vec::new();

        store.append(ChatMessage::new("t1", "[THEME] Robots", Sender::new("host")));
        overlay.on_store(&store, t0, &mut effects);
        overlay.on_deadline(t0 + ms(2000), &mut effects);
        overlay.on_deadline(t0 + ms(3000), &mut effects);
        assert_eq!(
            overlay.display(),
            ThemeDisplay::CountingDown { theme: "Robots".into(), remaining: 2 }
        );

        let t1 = t0 + ms(3500);
        store.append(ChatMessage::new("t2", "[THEME] Cats", Sender::new("host")));
        effects.clear();
        overlay.on_store(&store, t1, &mut effects);
        assert_eq!(overlay.display(), ThemeDisplay::ShowingTheme { theme: "Cats".into() });
        assert_eq!(overlay.next_deadline(), Some(t1 + ms(2000)));
        assert!(matches!(&effects[..], [ThemeEffect::Adopted(s)] if s.theme == "Cats"));

        // The old cycle's next tick is gone.
        overlay.on_deadline(t0 + ms(4000), &mut effects);
        assert_eq!(overlay.display(), ThemeDisplay::ShowingTheme { theme: "Cats".into() });

        effects.clear();
        step_to_idle(&mut overlay, &mut effects);
        assert_eq!(
            effects,
            vec![ThemeEffect::CountdownFinished {
                session_id: "Cats_session_id".into(),
                privileged: false,
            }]
        );
    }

    #[test]
    fn zero_countdown_finishes_after_announcement() {
        let t0 = Instant::now();
        let mut store = MessageStore::new();
        let timings = ThemeTimings { countdown_from: 0, ..ThemeTimings::default() };
        let mut overlay = ThemeOverlay::new(app("viewer"), timings, 100);
        let mut effects = Vec::new();
        store.append(ChatMessage::new("t1", "[THEME] Quick", Sender::new("host")));
        overlay.on_store(&store, t0, &mut effects);
        let seen = step_to_idle(&mut overlay, &mut effects);
        assert_eq!(seen, vec![(t0 + ms(2000), ThemeDisplay::Idle)]);
    }
}
