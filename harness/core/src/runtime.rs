use std::sync::Arc;

use futures::future::join_all;
use tracing::info;

use crate::{
    component::Component,
    errors::{StartError, TeardownError},
    session::Session,
};

/// Owns a set of components and fans Start/Teardown out across them.
///
/// Components run independently: a failing component never cancels the
/// others, and both calls block until every component has finished,
/// returning the concatenation of all failures.
pub struct Runtime {
    session: Arc<Session>,
    components: Vec<Box<dyn Component>>,
}

impl Runtime {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            components: Vec::new(),
        }
    }

    /// Adds a component to the runtime. No validation happens here.
    #[must_use]
    pub fn with_component(mut self, component: impl Component + 'static) -> Self {
        self.components.push(Box::new(component));
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Starts every component concurrently and joins on all of them. No
    /// ordering is guaranteed across components; within one component,
    /// container startup stays strictly sequential.
    pub async fn start(&self) -> Vec<StartError> {
        info!(components = self.components.len(), "starting components");
        let results = join_all(
            self.components
                .iter()
                .map(|component| component.start(&self.session)),
        )
        .await;

        results.into_iter().filter_map(Result::err).collect()
    }

    /// Tears every component down concurrently, regardless of whether its
    /// start previously failed, so partially started resources are still
    /// cleaned up.
    pub async fn teardown(&self) -> Vec<TeardownError> {
        info!(components = self.components.len(), "tearing components down");
        let results = join_all(
            self.components
                .iter()
                .map(|component| component.teardown(&self.session)),
        )
        .await;

        results.into_iter().flatten().collect()
    }
}
