//! Finite state machine for the cluster lifecycle.
//!
//! Only the transitions listed in the table are allowed. Guards check the
//! facts gathered from the component statuses of the current pass; a failed
//! guard keeps the cluster where it is.
//!
//! ## Lifecycle
//!
//! Created → Initializing → Running
//!
//! ### Full update
//! Running → Updating → Running
//!
//! ### Abandoned update
//! Updating → CancelUpdate → Running

use std::fmt;

use crate::crd::{ClusterState, UpdateState};

/// Events that trigger cluster state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterEvent {
    /// The controller saw the cluster for the first time
    Initialize,
    /// Every component reported Ready
    AllComponentsReady,
    /// A component needs its pods recreated and the update was approved
    FullUpdateRequested,
    /// The update episode reached Done
    UpdateFinished,
    /// The episode cannot start and the approval was withdrawn
    UpdateCancelled,
    /// The cancellation was persisted
    CancelCompleted,
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterEvent::Initialize => write!(f, "Initialize"),
            ClusterEvent::AllComponentsReady => write!(f, "AllComponentsReady"),
            ClusterEvent::FullUpdateRequested => write!(f, "FullUpdateRequested"),
            ClusterEvent::UpdateFinished => write!(f, "UpdateFinished"),
            ClusterEvent::UpdateCancelled => write!(f, "UpdateCancelled"),
            ClusterEvent::CancelCompleted => write!(f, "CancelCompleted"),
        }
    }
}

/// Facts available during a cluster state transition
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    /// Every component reported Ready in this pass
    pub all_ready: bool,
    /// Some component reported NeedFullUpdate
    pub need_full_update: bool,
    /// `spec.enableFullUpdate`
    pub full_update_enabled: bool,
    /// Current step of the update episode
    pub update_state: UpdateState,
}

impl TransitionContext {
    pub fn new(update_state: UpdateState, full_update_enabled: bool) -> Self {
        Self {
            update_state,
            full_update_enabled,
            ..Default::default()
        }
    }

    pub fn with_all_ready(mut self, all_ready: bool) -> Self {
        self.all_ready = all_ready;
        self
    }

    pub fn with_need_full_update(mut self, need_full_update: bool) -> Self {
        self.need_full_update = need_full_update;
        self
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: ClusterState,
    pub to: ClusterState,
    pub event: ClusterEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: ClusterState,
        to: ClusterState,
        event: ClusterEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Outcome of [`ClusterStateMachine::transition`].
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: ClusterState,
        to: ClusterState,
        event: ClusterEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: ClusterState,
        event: ClusterEvent,
    },
    GuardFailed {
        from: ClusterState,
        to: ClusterState,
        event: ClusterEvent,
        reason: String,
    },
}

/// State machine for the cluster lifecycle
pub struct ClusterStateMachine {
    transitions: Vec<Transition>,
}

impl Default for ClusterStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStateMachine {
    pub fn new() -> Self {
        Self {
            transitions: vec![
                Transition::new(
                    ClusterState::Created,
                    ClusterState::Initializing,
                    ClusterEvent::Initialize,
                    "Starting initial rollout",
                ),
                Transition::new(
                    ClusterState::Initializing,
                    ClusterState::Running,
                    ClusterEvent::AllComponentsReady,
                    "Initial rollout finished",
                ),
                Transition::new(
                    ClusterState::Running,
                    ClusterState::Updating,
                    ClusterEvent::FullUpdateRequested,
                    "Starting full update",
                ),
                Transition::new(
                    ClusterState::Updating,
                    ClusterState::Running,
                    ClusterEvent::UpdateFinished,
                    "Full update finished",
                ),
                Transition::new(
                    ClusterState::Updating,
                    ClusterState::CancelUpdate,
                    ClusterEvent::UpdateCancelled,
                    "Full update cancelled",
                ),
                Transition::new(
                    ClusterState::CancelUpdate,
                    ClusterState::Running,
                    ClusterEvent::CancelCompleted,
                    "Returned to running after cancelled update",
                ),
            ],
        }
    }

    /// Apply `event` to `from`, checking the transition guard.
    pub fn transition(
        &self,
        current: ClusterState,
        event: ClusterEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event);

        match transition {
            Some(t) => match self.check_guard(t, ctx) {
                Some(reason) => TransitionResult::GuardFailed {
                    from: t.from,
                    to: t.to,
                    event,
                    reason,
                },
                None => TransitionResult::Success {
                    from: t.from,
                    to: t.to,
                    event,
                    description: t.description,
                },
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    /// Whether the table has an edge for `event` out of `from`. Guards are not evaluated.
    pub fn can_transition(&self, from: ClusterState, event: ClusterEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// Events with an outgoing edge from `state`.
    pub fn valid_events(&self, state: ClusterState) -> Vec<ClusterEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.event)
            .collect()
    }

    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match transition.event {
            ClusterEvent::AllComponentsReady if !ctx.all_ready => {
                Some("Not every component is ready".to_string())
            }
            ClusterEvent::FullUpdateRequested if !ctx.need_full_update => {
                Some("No component needs a full update".to_string())
            }
            ClusterEvent::FullUpdateRequested if !ctx.full_update_enabled => {
                Some("Full update is not enabled".to_string())
            }
            ClusterEvent::UpdateFinished if ctx.update_state != UpdateState::Done => Some(
                format!("Update is still in progress: {}", ctx.update_state),
            ),
            ClusterEvent::UpdateCancelled
                if ctx.update_state != UpdateState::ImpossibleToStart =>
            {
                Some(format!(
                    "Only an impossible update can be cancelled, current: {}",
                    ctx.update_state
                ))
            }
            ClusterEvent::UpdateCancelled if ctx.full_update_enabled => {
                Some("Full update is still enabled".to_string())
            }
            _ => None,
        }
    }
}

/// Determine the event the current state waits for, if any fires.
pub fn determine_event(current: ClusterState, ctx: &TransitionContext) -> Option<ClusterEvent> {
    match current {
        ClusterState::Created => Some(ClusterEvent::Initialize),
        ClusterState::Initializing => ctx.all_ready.then_some(ClusterEvent::AllComponentsReady),
        ClusterState::Running => (ctx.need_full_update && ctx.full_update_enabled)
            .then_some(ClusterEvent::FullUpdateRequested),
        ClusterState::Updating => match ctx.update_state {
            UpdateState::Done => Some(ClusterEvent::UpdateFinished),
            UpdateState::ImpossibleToStart if !ctx.full_update_enabled => {
                Some(ClusterEvent::UpdateCancelled)
            }
            _ => None,
        },
        ClusterState::CancelUpdate => Some(ClusterEvent::CancelCompleted),
    }
}
