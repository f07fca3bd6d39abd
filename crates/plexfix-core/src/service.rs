use tracing::info;

use crate::context::DeploymentContext;
use crate::ports::{ContainerRuntime, ServiceManager};
use crate::profile::ServiceTarget;
use crate::{FatalError, ServiceAction};

/// Stops and starts whatever owns the database for the resolved profile.
///
/// Both directions are single attempts; any failure aborts the run.
pub struct ServiceController<'a> {
    services: &'a dyn ServiceManager,
    containers: &'a dyn ContainerRuntime,
}

impl<'a> ServiceController<'a> {
    #[must_use]
    pub fn new(services: &'a dyn ServiceManager, containers: &'a dyn ContainerRuntime) -> Self {
        Self { services, containers }
    }

    /// # Errors
    /// Returns [`FatalError::ServiceControl`] when the stop fails.
    pub fn stop(&self, context: &DeploymentContext) -> Result<(), FatalError> {
        self.control(ServiceAction::Stop, context)
    }

    /// # Errors
    /// Returns [`FatalError::ServiceControl`] when the start fails.
    pub fn start(&self, context: &DeploymentContext) -> Result<(), FatalError> {
        self.control(ServiceAction::Start, context)
    }

    fn control(
        &self,
        action: ServiceAction,
        context: &DeploymentContext,
    ) -> Result<(), FatalError> {
        let target = context.profile().service_target();
        let result = match (target, action) {
            (ServiceTarget::Unit(unit), ServiceAction::Stop) => self.services.stop(unit),
            (ServiceTarget::Unit(unit), ServiceAction::Start) => self.services.start(unit),
            (ServiceTarget::Container(container), ServiceAction::Stop) => {
                self.containers.stop(container)
            }
            (ServiceTarget::Container(container), ServiceAction::Start) => {
                self.containers.start(container)
            }
        };

        result.map_err(|err| FatalError::ServiceControl {
            action,
            target: target.to_string(),
            detail: format!("{err:#}"),
        })?;
        info!(%target, %action, "done");
        Ok(())
    }
}
