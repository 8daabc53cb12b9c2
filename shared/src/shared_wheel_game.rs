use rand::Rng;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::constants::{
    FRAME_INTERVAL_MS, MAX_REVOLUTIONS, MIN_REVOLUTIONS, RESET_DELAY_MS, SPIN_DURATION_MS,
};
use crate::error::{WheelError, WheelResult};
use crate::roster::{DemoteMode, Participant, ParticipantRoster};
use crate::spin_animator::{SpinAnimator, SpinPlan, Tick};
use crate::validation::{normalize_display_name, validate_display_name};
use crate::wheel_selector::winner_index;

/// Lifecycle of one round of the wheel
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Idle,
    Spinning,
    Finished,
}

impl std::fmt::Display for GameState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Spinning => "spinning",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Whoever is asking for an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct WheelSettings {
    pub min_revolutions: u32,
    pub max_revolutions: u32,
    pub spin_duration_ms: u64,
    pub reset_delay_ms: u64,
    pub frame_interval_ms: u64,
}

impl Default for WheelSettings {
    fn default() -> Self {
        Self {
            min_revolutions: MIN_REVOLUTIONS,
            max_revolutions: MAX_REVOLUTIONS,
            spin_duration_ms: SPIN_DURATION_MS,
            reset_delay_ms: RESET_DELAY_MS,
            frame_interval_ms: FRAME_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GameRound {
    pub id: u64,
    pub state: GameState,
    pub winner_id: Option<String>,
    pub participants: ParticipantRoster,
    pub created_at: u64,
}

impl GameRound {
    fn new(id: u64, created_at: u64) -> Self {
        Self {
            id,
            state: GameState::Idle,
            winner_id: None,
            participants: ParticipantRoster::new(),
            created_at,
        }
    }
}

/// One line of the append-only winner history.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WinnerRecord {
    pub round_id: u64,
    pub participant_id: String,
    pub display_name: String,
    pub decided_at: u64,
    pub final_rotation: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SpinStarted {
    pub round_id: u64,
    pub plan: SpinPlan,
    /// Frozen prize pool, in wheel segment order
    pub participants: Vec<Participant>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SpinCompleted {
    pub round_id: u64,
    pub winner: Participant,
    pub winner_index: usize,
    pub record: WinnerRecord,
    pub reset_at: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GameEvent {
    SpinStarted(SpinStarted),
    Tick { round_id: u64, tick: Tick },
    SpinCompleted(SpinCompleted),
    RoundReset { previous_round_id: u64, round_id: u64, at: u64 },
}

/// Read-only view of the game for rendering and API responses.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WheelSnapshot {
    pub round_id: u64,
    pub state: GameState,
    pub participants: Vec<Participant>,
    pub accepted: Vec<Participant>,
    pub rotation: f64,
    pub spin: Option<SpinPlan>,
    pub last_winner: Option<WinnerRecord>,
    pub reset_at: Option<u64>,
}

struct ActiveSpin {
    animator: SpinAnimator,
    pool: Vec<Participant>,
}

type TickObserver = Box<dyn FnMut(&Tick) + Send>;
type CompleteObserver = Box<dyn FnMut(&SpinCompleted) + Send>;

/// Owns the current round and gates every action on its state.
///
/// Time is always passed in (`now`, unix ms) so the caller decides whether it
/// is a wall clock or a virtual one.
pub struct WheelGame {
    settings: WheelSettings,
    round: GameRound,
    spin: Option<ActiveSpin>,
    rotation: f64,
    reset_at: Option<u64>,
    history: Vec<WinnerRecord>,
    tick_observers: Vec<TickObserver>,
    complete_observers: Vec<CompleteObserver>,
}

impl WheelGame {
    pub fn new(settings: WheelSettings, now: u64) -> Self {
        Self::starting_at_round(settings, 1, now)
    }

    /// Opens round `round_id` first, so ids keep increasing across restarts.
    pub fn starting_at_round(settings: WheelSettings, round_id: u64, now: u64) -> Self {
        Self {
            settings,
            round: GameRound::new(round_id.max(1), now),
            spin: None,
            rotation: 0.0,
            reset_at: None,
            history: Vec::new(),
            tick_observers: Vec::new(),
            complete_observers: Vec::new(),
        }
    }

    pub fn settings(&self) -> &WheelSettings {
        &self.settings
    }

    pub fn state(&self) -> GameState {
        self.round.state
    }

    pub fn round(&self) -> &GameRound {
        &self.round
    }

    pub fn participants(&self) -> &[Participant] {
        self.round.participants.all()
    }

    /// Wheel segments, in order. While a spin is running this is the frozen pool.
    pub fn accepted_participants(&self) -> Vec<Participant> {
        match &self.spin {
            Some(spin) => spin.pool.clone(),
            None => self.round.participants.accepted(),
        }
    }

    pub fn history(&self) -> &[WinnerRecord] {
        &self.history
    }

    pub fn current_rotation(&self) -> f64 {
        self.rotation
    }

    pub fn scheduled_reset_at(&self) -> Option<u64> {
        self.reset_at
    }

    /// True while something is waiting on the clock: a running spin or a pending reset.
    pub fn needs_advance(&self) -> bool {
        self.spin.is_some() || self.reset_at.is_some()
    }

    pub fn snapshot(&self) -> WheelSnapshot {
        WheelSnapshot {
            round_id: self.round.id,
            state: self.round.state,
            participants: self.round.participants.all().to_vec(),
            accepted: self.accepted_participants(),
            rotation: self.rotation,
            spin: self.spin.as_ref().map(|s| *s.animator.plan()),
            last_winner: self
                .history
                .last()
                .filter(|r| r.round_id == self.round.id)
                .cloned(),
            reset_at: self.reset_at,
        }
    }

    pub fn on_tick(&mut self, observer: impl FnMut(&Tick) + Send + 'static) {
        self.tick_observers.push(Box::new(observer));
    }

    pub fn on_spin_complete(&mut self, observer: impl FnMut(&SpinCompleted) + Send + 'static) {
        self.complete_observers.push(Box::new(observer));
    }

    fn ensure_idle(&self, action: &'static str) -> WheelResult<()> {
        if self.round.state != GameState::Idle {
            return Err(WheelError::invalid_state(
                action,
                format!("round {} is {}", self.round.id, self.round.state),
            ));
        }
        Ok(())
    }

    fn ensure_admin(actor: &Actor, action: &'static str) -> WheelResult<()> {
        if !actor.is_admin {
            return Err(WheelError::Forbidden(action));
        }
        Ok(())
    }

    pub fn register(&mut self, actor: &Actor, display_name: &str, now: u64) -> WheelResult<Participant> {
        self.ensure_idle("register")?;
        let display_name = normalize_display_name(display_name);
        validate_display_name(&display_name)
            .map_err(|e| {
                WheelError::InvalidInput(
                    e.message
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string()),
                )
            })?;
        let participant = Participant::new(actor.user_id.clone(), display_name, now);
        self.round.participants.register(participant).cloned()
    }

    pub fn cancel(&mut self, actor: &Actor, participant_id: &str) -> WheelResult<Participant> {
        self.ensure_idle("cancel")?;
        if actor.user_id != participant_id {
            Self::ensure_admin(actor, "cancel another participant's registration")?;
        }
        self.round.participants.cancel(participant_id)
    }

    pub fn accept(&mut self, actor: &Actor, participant_id: &str) -> WheelResult<Participant> {
        self.ensure_idle("accept")?;
        Self::ensure_admin(actor, "accept participants")?;
        self.round.participants.accept(participant_id).cloned()
    }

    pub fn accept_all(&mut self, actor: &Actor) -> WheelResult<usize> {
        self.ensure_idle("accept")?;
        Self::ensure_admin(actor, "accept participants")?;
        Ok(self.round.participants.accept_all())
    }

    pub fn demote(&mut self, actor: &Actor, participant_id: &str, mode: DemoteMode) -> WheelResult<Participant> {
        self.ensure_idle("demote")?;
        Self::ensure_admin(actor, "demote participants")?;
        self.round.participants.demote(participant_id, mode)
    }

    pub fn demote_all(&mut self, actor: &Actor, mode: DemoteMode) -> WheelResult<Vec<Participant>> {
        self.ensure_idle("demote")?;
        Self::ensure_admin(actor, "demote participants")?;
        Ok(self.round.participants.demote_all(mode))
    }

    /// Draws the target rotation once and starts the spin.
    pub fn start_spin<R: Rng>(&mut self, actor: &Actor, now: u64, rng: &mut R) -> WheelResult<SpinStarted> {
        self.check_can_spin(actor)?;
        let plan = SpinPlan::random(
            rng,
            now,
            self.settings.min_revolutions,
            self.settings.max_revolutions,
            self.settings.spin_duration_ms,
        );
        self.begin_spin(plan)
    }

    /// Starts a spin toward a rotation decided elsewhere.
    pub fn start_spin_to(&mut self, actor: &Actor, now: u64, target_rotation: f64) -> WheelResult<SpinStarted> {
        self.check_can_spin(actor)?;
        if !target_rotation.is_finite() || target_rotation < 0.0 {
            return Err(WheelError::InvalidInput(format!(
                "target rotation {} must be a finite non-negative angle",
                target_rotation
            )));
        }
        self.begin_spin(SpinPlan {
            target_rotation,
            duration_ms: self.settings.spin_duration_ms.max(1),
            started_at: now,
        })
    }

    fn check_can_spin(&self, actor: &Actor) -> WheelResult<()> {
        self.ensure_idle("spin")?;
        Self::ensure_admin(actor, "spin the wheel")?;
        if self.round.participants.accepted_count() == 0 {
            return Err(WheelError::EmptyPool);
        }
        Ok(())
    }

    fn begin_spin(&mut self, plan: SpinPlan) -> WheelResult<SpinStarted> {
        let pool = self.round.participants.accepted();
        let animator = SpinAnimator::new(plan, pool.len())?;
        self.round.state = GameState::Spinning;
        self.rotation = 0.0;
        self.spin = Some(ActiveSpin {
            animator,
            pool: pool.clone(),
        });
        log::debug!("round {} spinning toward {:.4} rad", self.round.id, plan.target_rotation);
        Ok(SpinStarted {
            round_id: self.round.id,
            plan,
            participants: pool,
        })
    }

    /// Moves the clock forward. A single call may finish the spin and also
    /// perform the reset if `now` is far enough ahead.
    pub fn advance(&mut self, now: u64) -> Vec<GameEvent> {
        let mut events = Vec::new();

        if let Some(spin) = self.spin.as_mut() {
            let frame = spin.animator.advance(now);
            self.rotation = frame.rotation;
            for tick in &frame.ticks {
                for observer in self.tick_observers.iter_mut() {
                    observer(tick);
                }
                events.push(GameEvent::Tick {
                    round_id: self.round.id,
                    tick: *tick,
                });
            }
            if frame.finished {
                if let Some(completed) = self.finish_spin() {
                    events.push(GameEvent::SpinCompleted(completed));
                }
            }
        }

        if self.round.state == GameState::Finished {
            if let Some(reset_at) = self.reset_at {
                if now >= reset_at {
                    events.push(self.reset_round(reset_at));
                }
            }
        }

        events
    }

    fn finish_spin(&mut self) -> Option<SpinCompleted> {
        let spin = self.spin.take()?;
        let plan = *spin.animator.plan();
        let rotation = spin.animator.rotation();
        // the pool is never empty once a spin exists
        let index = winner_index(spin.pool.len(), rotation).unwrap_or(0);
        let winner = spin.pool.get(index)?.clone();
        let decided_at = plan.ends_at();

        let record = WinnerRecord {
            round_id: self.round.id,
            participant_id: winner.id.clone(),
            display_name: winner.display_name.clone(),
            decided_at,
            final_rotation: rotation,
        };
        let reset_at = decided_at + self.settings.reset_delay_ms;

        self.round.state = GameState::Finished;
        self.round.winner_id = Some(winner.id.clone());
        self.history.push(record.clone());
        self.reset_at = Some(reset_at);

        let completed = SpinCompleted {
            round_id: self.round.id,
            winner,
            winner_index: index,
            record,
            reset_at,
        };
        for observer in self.complete_observers.iter_mut() {
            observer(&completed);
        }
        Some(completed)
    }

    fn reset_round(&mut self, at: u64) -> GameEvent {
        let previous_round_id = self.round.id;
        self.round = GameRound::new(previous_round_id + 1, at);
        self.rotation = 0.0;
        self.reset_at = None;
        GameEvent::RoundReset {
            previous_round_id,
            round_id: self.round.id,
            at,
        }
    }
}

// === API Types ===

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 32), custom = "validate_display_name")]
    pub display_name: String,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct CancelRequest {
    /// Admins may cancel someone else's registration; defaults to the caller.
    pub participant_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct DemoteRequest {
    #[serde(default)]
    pub mode: DemoteMode,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub snapshot: WheelSnapshot,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Everything pushed to connected viewers
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WheelMessage {
    Snapshot(WheelSnapshot),
    Event(GameEvent),
    RosterChanged { round_id: u64, participants: Vec<Participant> },
}
