//! Workload materialization for admitted tasks.
//!
//! The desired workload is a pure function of the task and the template
//! config. `converge` creates it when absent, overwrites the spec when it
//! drifted, and otherwise leaves the store untouched, so it can be invoked on
//! every re-delivery.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::WorkloadConfig;
use crate::core::audit::{build_audit_event, AuditSink};
use crate::core::resource::{
    Container, LabelSelector, NamespacedName, ObjectMeta, OwnerReference, PodTemplate, Resource,
    Task, Workload, WorkloadSpec,
};
use crate::core::store::ResourceStore;
use crate::core::SchedulerError;
use crate::util::telemetry::Logger;

/// What `converge` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergeOutcome {
    /// The workload did not exist and was created.
    Created,
    /// The workload existed with a different spec and was updated.
    Updated,
    /// The workload already matched.
    Unchanged,
}

/// Deterministic workload name for a task.
#[must_use]
pub fn workload_name(task_name: &str, template: &WorkloadConfig) -> String {
    format!("{task_name}{}", template.name_suffix)
}

/// Desired workload for `task`, owned by it.
#[must_use]
pub fn desired_workload(task: &Task, template: &WorkloadConfig) -> Workload {
    let name = workload_name(&task.metadata.name, template);
    let labels = BTreeMap::from([(template.selector_label.clone(), name.clone())]);

    let mut metadata = ObjectMeta::named(task.metadata.namespace.clone(), name);
    metadata.owner_references.push(OwnerReference {
        kind: Task::KIND.to_string(),
        name: task.metadata.name.clone(),
        uid: task.metadata.uid.clone(),
        controller: true,
    });

    Workload {
        metadata,
        spec: WorkloadSpec {
            replicas: template.replicas,
            selector: LabelSelector {
                match_labels: labels.clone(),
            },
            template: PodTemplate {
                labels,
                containers: vec![Container {
                    name: template.container_name.clone(),
                    image: template.image.clone(),
                }],
            },
        },
    }
}

/// Task controlling `workload`, used to map workload changes back to a
/// reconcile request.
#[must_use]
pub fn owning_task(workload: &Workload) -> Option<NamespacedName> {
    workload
        .metadata
        .controller_ref()
        .filter(|owner| owner.kind == Task::KIND)
        .map(|owner| NamespacedName::new(workload.metadata.namespace.clone(), owner.name.clone()))
}

/// Ensures each admitted task has a matching workload.
pub struct WorkloadMaterializer<S> {
    store: Arc<S>,
    template: WorkloadConfig,
    audit: Option<Arc<dyn AuditSink>>,
    log: Logger,
}

impl<S: ResourceStore> WorkloadMaterializer<S> {
    /// Create a materializer.
    pub fn new(
        store: Arc<S>,
        template: WorkloadConfig,
        audit: Option<Arc<dyn AuditSink>>,
        log: Logger,
    ) -> Self {
        Self {
            store,
            template,
            audit,
            log,
        }
    }

    /// Workload template in use.
    #[must_use]
    pub const fn template(&self) -> &WorkloadConfig {
        &self.template
    }

    /// Create or update the task's workload so it matches the desired spec.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if a workload with the same name is controlled by a
    /// different owner, including an earlier task of the same name; store
    /// errors are passed through.
    pub async fn converge(&self, task: &Task) -> Result<ConvergeOutcome, SchedulerError> {
        let desired = desired_workload(task, &self.template);
        let ns = &desired.metadata.namespace;
        let name = &desired.metadata.name;

        let Some(mut found) = self.store.get::<Workload>(ns, name).await? else {
            tracing::info!(parent: self.log.span(), namespace = %ns, name = %name, "creating workload");
            self.store.create(&desired).await?;
            self.record(task, "workload-create", name);
            return Ok(ConvergeOutcome::Created);
        };

        if let Some(owner) = found.metadata.controller_ref() {
            if owner.kind != Task::KIND
                || owner.name != task.metadata.name
                || owner.uid != task.metadata.uid
            {
                tracing::warn!(
                    parent: self.log.span(),
                    namespace = %ns,
                    name = %name,
                    owner = %owner.name,
                    "workload is controlled by another owner"
                );
                return Err(SchedulerError::AlreadyExists {
                    kind: Workload::KIND,
                    name: name.clone(),
                });
            }
        }

        let adopted = found.metadata.controller_ref().is_some();
        if adopted && found.spec == desired.spec {
            tracing::debug!(parent: self.log.span(), namespace = %ns, name = %name, "workload up to date");
            return Ok(ConvergeOutcome::Unchanged);
        }

        if !adopted {
            found
                .metadata
                .owner_references
                .extend(desired.metadata.owner_references.iter().cloned());
        }
        found.spec = desired.spec;
        tracing::info!(parent: self.log.span(), namespace = %ns, name = %name, "updating workload");
        self.store.update(&found).await?;
        self.record(task, "workload-update", name);
        Ok(ConvergeOutcome::Updated)
    }

    fn record(&self, task: &Task, action: &str, workload: &str) {
        if let Some(audit) = &self.audit {
            audit.record(build_audit_event(
                &task.key(),
                task.spec.user_id.clone(),
                action,
                Some(workload.to_string()),
            ));
        }
    }
}
