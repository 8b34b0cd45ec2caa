//! State machine for the steps of a full update episode.
//!
//! Within one episode the update state only moves forward. The episode ends
//! by resetting to `None`, either from `Done` or from `ImpossibleToStart`
//! when the cluster cancels the update.

use crate::crd::UpdateState;

// ============================================================================
// Update Events
// ============================================================================

/// Events that can trigger update state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateEvent {
    /// The cluster entered Updating.
    EpisodeStarted,

    /// Every component is healthy enough to be updated.
    UpdatePossible,

    /// Some component is broken; the episode cannot start.
    UpdateImpossible,

    /// Every component reported its pods removed.
    AllPodsRemoved,

    /// Every component is Ready again on the new spec.
    AllPodsCreated,

    /// The masters left read-only mode.
    MasterExitedReadOnly,

    /// The episode is over.
    EpisodeClosed,
}

impl std::fmt::Display for UpdateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateEvent::EpisodeStarted => write!(f, "EpisodeStarted"),
            UpdateEvent::UpdatePossible => write!(f, "UpdatePossible"),
            UpdateEvent::UpdateImpossible => write!(f, "UpdateImpossible"),
            UpdateEvent::AllPodsRemoved => write!(f, "AllPodsRemoved"),
            UpdateEvent::AllPodsCreated => write!(f, "AllPodsCreated"),
            UpdateEvent::MasterExitedReadOnly => write!(f, "MasterExitedReadOnly"),
            UpdateEvent::EpisodeClosed => write!(f, "EpisodeClosed"),
        }
    }
}

// ============================================================================
// Transition Context
// ============================================================================

/// Context data used to evaluate transition guards.
#[derive(Debug, Clone, Default)]
pub struct UpdateTransitionContext {
    /// Every component reported Ready (or NeedFullUpdate) in this pass.
    pub all_ready: bool,

    /// Components that are neither Ready nor NeedFullUpdate.
    pub blocked_components: Vec<String>,

    /// Every component recorded its pods as removed.
    pub all_pods_removed: bool,

    /// The masters recorded that they left read-only mode.
    pub master_exited_read_only: bool,
}

impl UpdateTransitionContext {
    /// Whether the possibility check passes.
    pub fn update_possible(&self) -> bool {
        self.blocked_components.is_empty()
    }
}

// ============================================================================
// Update Transition
// ============================================================================

/// Represents a single state transition.
#[derive(Debug, Clone)]
pub struct UpdateTransition {
    /// Source state.
    pub from: UpdateState,

    /// Target state.
    pub to: UpdateState,

    /// Event that triggers this transition.
    pub event: UpdateEvent,

    /// Human-readable description.
    pub description: &'static str,
}

// ============================================================================
// Update State Machine
// ============================================================================

/// State machine for validating update state transitions.
#[derive(Debug, Clone)]
pub struct UpdateStateMachine {
    transitions: Vec<UpdateTransition>,
}

impl Default for UpdateStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateStateMachine {
    /// Create a new state machine with all valid transitions.
    pub fn new() -> Self {
        let transitions = vec![
            UpdateTransition {
                from: UpdateState::None,
                to: UpdateState::PossibilityCheck,
                event: UpdateEvent::EpisodeStarted,
                description: "Check whether the update can start",
            },
            // From PossibilityCheck
            UpdateTransition {
                from: UpdateState::PossibilityCheck,
                to: UpdateState::WaitingForPodsRemoval,
                event: UpdateEvent::UpdatePossible,
                description: "Update possible, removing pods",
            },
            UpdateTransition {
                from: UpdateState::PossibilityCheck,
                to: UpdateState::ImpossibleToStart,
                event: UpdateEvent::UpdateImpossible,
                description: "Update impossible, some components are not ready",
            },
            UpdateTransition {
                from: UpdateState::WaitingForPodsRemoval,
                to: UpdateState::WaitingForPodsCreation,
                event: UpdateEvent::AllPodsRemoved,
                description: "Pods removed, recreating them from the new spec",
            },
            UpdateTransition {
                from: UpdateState::WaitingForPodsCreation,
                to: UpdateState::WaitingForMasterExitReadOnly,
                event: UpdateEvent::AllPodsCreated,
                description: "Pods recreated, taking masters out of read-only mode",
            },
            UpdateTransition {
                from: UpdateState::WaitingForMasterExitReadOnly,
                to: UpdateState::Done,
                event: UpdateEvent::MasterExitedReadOnly,
                description: "Masters left read-only mode",
            },
            // Episode end
            UpdateTransition {
                from: UpdateState::Done,
                to: UpdateState::None,
                event: UpdateEvent::EpisodeClosed,
                description: "Update finished",
            },
            UpdateTransition {
                from: UpdateState::ImpossibleToStart,
                to: UpdateState::None,
                event: UpdateEvent::EpisodeClosed,
                description: "Update cancelled",
            },
        ];

        Self { transitions }
    }

    /// Attempt to transition from one state to another given an event.
    ///
    /// Returns the transition if valid and its guard passes.
    pub fn transition(
        &self,
        from: UpdateState,
        event: UpdateEvent,
        ctx: &UpdateTransitionContext,
    ) -> Option<UpdateTransition> {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == from && t.event == event)?;

        if !self.evaluate_guards(transition, ctx) {
            return None;
        }

        Some(transition.clone())
    }

    fn evaluate_guards(&self, transition: &UpdateTransition, ctx: &UpdateTransitionContext) -> bool {
        match transition.event {
            UpdateEvent::UpdatePossible => ctx.update_possible(),
            UpdateEvent::UpdateImpossible => !ctx.update_possible(),
            UpdateEvent::AllPodsRemoved => ctx.all_pods_removed,
            UpdateEvent::AllPodsCreated => ctx.all_ready,
            UpdateEvent::MasterExitedReadOnly => ctx.master_exited_read_only,
            UpdateEvent::EpisodeStarted | UpdateEvent::EpisodeClosed => true,
        }
    }

    /// Check if a state transition is valid (without guards).
    pub fn can_transition(&self, from: UpdateState, to: UpdateState) -> bool {
        if from == to {
            return true;
        }

        self.transitions
            .iter()
            .any(|t| t.from == from && t.to == to)
    }

    /// Get the list of valid next states from a given state.
    pub fn valid_transitions(&self, from: UpdateState) -> Vec<UpdateState> {
        self.transitions
            .iter()
            .filter(|t| t.from == from)
            .map(|t| t.to)
            .collect()
    }
}

/// Determine the event an update state waits for.
///
/// `None` and the episode-ending states are driven by the cluster state
/// machine, so only the in-episode steps are derived here.
pub fn determine_update_event(
    state: UpdateState,
    ctx: &UpdateTransitionContext,
) -> Option<UpdateEvent> {
    match state {
        UpdateState::PossibilityCheck => Some(if ctx.update_possible() {
            UpdateEvent::UpdatePossible
        } else {
            UpdateEvent::UpdateImpossible
        }),
        UpdateState::WaitingForPodsRemoval => {
            ctx.all_pods_removed.then_some(UpdateEvent::AllPodsRemoved)
        }
        UpdateState::WaitingForPodsCreation => ctx.all_ready.then_some(UpdateEvent::AllPodsCreated),
        UpdateState::WaitingForMasterExitReadOnly => ctx
            .master_exited_read_only
            .then_some(UpdateEvent::MasterExitedReadOnly),
        UpdateState::None | UpdateState::ImpossibleToStart | UpdateState::Done => None,
    }
}
