//! State shared by every reconcile pass.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

use crate::config::OperatorConfig;
use crate::crd::Ytsaurus;
use crate::health::{HealthState, Metrics};

/// Server-side apply field manager, also the event reporting controller.
pub const FIELD_MANAGER: &str = "ytsaurus-operator";

#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub config: Arc<OperatorConfig>,
    recorder: Recorder,
    /// Absent when the controller runs without the health server.
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    pub fn new(
        client: Client,
        config: Arc<OperatorConfig>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let recorder = Recorder::new(
            client.clone(),
            Reporter {
                controller: FIELD_MANAGER.to_string(),
                instance: Some(config.pod_name.clone()),
            },
        );
        Self {
            client,
            config,
            recorder,
            health_state,
        }
    }

    /// Operator metrics, when a health server is attached.
    pub fn metrics(&self) -> Option<&Metrics> {
        self.health_state.as_deref().map(|state| &state.metrics)
    }

    /// Attach a Kubernetes Event to `cluster`. Failures are logged and
    /// otherwise ignored.
    pub async fn notify(
        &self,
        cluster: &Ytsaurus,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(error) = self
            .recorder
            .publish(&event, &cluster.object_ref(&()))
            .await
        {
            warn!(reason = %reason, error = %error, "Failed to publish event");
        }
    }
}
