//! Liveness reporting for the long-running loops of the service.
//!
//! Each loop registers a component with a deadline and must keep reporting healthy before that
//! deadline passes. The process is healthy only while every component is.
use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, PoisonError, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::{Duration, OffsetDateTime};
use tracing::info;

#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{:?}", self);
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered, but never reported
    Starting,
    HealthyUntil(OffsetDateTime),
    Unhealthy,
    /// Missed its deadline
    Stalled,
}

type Components = Arc<RwLock<HashMap<String, ComponentStatus>>>;

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Components,
}

impl HealthHandle {
    /// Must be called more frequently than the deadline given at registration.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc().add(self.deadline),
        ))
    }

    pub fn report_status(&self, status: ComponentStatus) {
        self.components
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.component.clone(), status);
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Register a new component. It starts out unhealthy until its first report.
    pub fn register(&self, component: String, deadline: std::time::Duration) -> HealthHandle {
        let handle = HealthHandle {
            component,
            deadline: Duration::try_from(deadline).unwrap_or(Duration::MAX),
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        info!("registered {} in {}", handle.component, self.name);
        handle
    }

    pub fn get_status(&self) -> HealthStatus {
        let components = self
            .components
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let now = OffsetDateTime::now_utc();

        let components: HashMap<String, ComponentStatus> = components
            .iter()
            .map(|(name, status)| {
                let status = match status {
                    ComponentStatus::HealthyUntil(until) if *until <= now => {
                        ComponentStatus::Stalled
                    }
                    other => other.clone(),
                };
                (name.clone(), status)
            })
            .collect();

        let healthy = !components.is_empty()
            && components
                .values()
                .all(|status| matches!(status, ComponentStatus::HealthyUntil(_)));

        HealthStatus {
            healthy,
            components,
        }
    }
}
