//! Declarative resource model: Task, Budget, Cost and the owned Workload.
//!
//! Field names serialize in camelCase and keep the short wire names of the
//! `kubescheduling` custom resources (`spec.uid`, `spec.cost`), so objects
//! written by other tooling decode unchanged.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Reserved resource label holding the priority multiplier of a [`Cost`].
pub const PRIORITY_RESOURCE: &str = "priority";

/// Namespace-qualified object name; the unit of reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    /// Object namespace.
    pub namespace: String,
    /// Object name.
    pub name: String,
}

impl NamespacedName {
    /// Build a key from parts.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Back-reference from an owned object to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// Owner kind.
    pub kind: String,
    /// Owner name (same namespace as the owned object).
    pub name: String,
    /// Owner uid at the time the reference was set.
    pub uid: String,
    /// Whether the owner is the managing controller.
    #[serde(default)]
    pub controller: bool,
}

/// Metadata common to all stored objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique per kind and namespace.
    pub name: String,
    /// Object namespace.
    pub namespace: String,
    /// Store-assigned identity.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Store-assigned version for optimistic concurrency; zero before create.
    #[serde(default)]
    pub resource_version: u64,
    /// Free-form labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Owners of this object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Metadata with only a name and namespace set.
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Controller owner reference, if any.
    #[must_use]
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }
}

/// Object kinds the store can hold.
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Kind name used in keys, owner references and errors.
    const KIND: &'static str;

    /// Object metadata.
    fn meta(&self) -> &ObjectMeta;

    /// Mutable object metadata.
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Namespaced key of this object.
    fn key(&self) -> NamespacedName {
        let meta = self.meta();
        NamespacedName::new(meta.namespace.clone(), meta.name.clone())
    }
}

macro_rules! impl_resource {
    ($ty:ty, $kind:literal) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;

            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

/// Lifecycle phase of a [`Task`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskPhase {
    /// Not yet observed by the reconciler (serialized as the empty string).
    #[default]
    #[serde(rename = "")]
    Pending,
    /// Claimed; admission in progress.
    Queued,
    /// Admitted; waiting for execution to start.
    Ready,
    /// Executing; counts against the user's budget.
    InProgress,
    /// Execution finished.
    Complete,
    /// Rejected or failed during admission.
    Failed,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "<none>",
            Self::Queued => "Queued",
            Self::Ready => "Ready",
            Self::InProgress => "InProgress",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Immutable part of a [`Task`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Opaque owning user identifier.
    #[serde(rename = "uid")]
    pub user_id: String,
    /// Name of the [`Cost`] profile in the task's namespace.
    #[serde(rename = "cost")]
    pub cost_profile: String,
}

/// Reconciler-owned part of a [`Task`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Current lifecycle phase.
    #[serde(default)]
    pub phase: TaskPhase,
    /// Human-readable reason, set on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A unit of schedulable work submitted by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: TaskSpec,
    /// Observed state.
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    /// New unobserved task.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        user_id: impl Into<String>,
        cost_profile: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::named(namespace, name),
            spec: TaskSpec {
                user_id: user_id.into(),
                cost_profile: cost_profile.into(),
            },
            status: TaskStatus::default(),
        }
    }

    /// Same task with the given phase, for seeding stores.
    #[must_use]
    pub fn with_phase(mut self, phase: TaskPhase) -> Self {
        self.status.phase = phase;
        self
    }
}

impl_resource!(Task, "Task");

/// Budget ceiling for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetSpec {
    /// User the budget applies to.
    #[serde(rename = "uid")]
    pub user_id: String,
    /// Ceiling on the aggregate cost of running tasks.
    pub amount: f64,
}

/// Per-user budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Budget parameters.
    pub spec: BudgetSpec,
}

impl Budget {
    /// New budget for `user_id`.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        user_id: impl Into<String>,
        amount: f64,
    ) -> Self {
        Self {
            metadata: ObjectMeta::named(namespace, name),
            spec: BudgetSpec {
                user_id: user_id.into(),
                amount,
            },
        }
    }
}

impl_resource!(Budget, "Budget");

/// Resource quantities plus the priority multiplier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSpec {
    /// Resource label to quantity; [`PRIORITY_RESOURCE`] is the multiplier.
    #[serde(default)]
    pub resources: BTreeMap<String, f64>,
}

/// Named cost profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Profile contents.
    pub spec: CostSpec,
}

impl Cost {
    /// New cost profile from `(label, value)` pairs.
    pub fn new<I, K>(namespace: impl Into<String>, name: impl Into<String>, resources: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self {
            metadata: ObjectMeta::named(namespace, name),
            spec: CostSpec {
                resources: resources.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            },
        }
    }
}

impl_resource!(Cost, "Cost");

/// Label selector of a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Labels a pod must carry to be selected.
    pub match_labels: BTreeMap<String, String>,
}

/// One container of a workload template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
}

/// Pod template of a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTemplate {
    /// Labels stamped on every pod.
    pub labels: BTreeMap<String, String>,
    /// Containers to run.
    pub containers: Vec<Container>,
}

/// Desired state of a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Desired replica count.
    pub replicas: u32,
    /// Pod selector.
    pub selector: LabelSelector,
    /// Pod template.
    pub template: PodTemplate,
}

/// Deployable unit materialized for an admitted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: WorkloadSpec,
}

impl_resource!(Workload, "Workload");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_wire_format() {
        let json = r#"{
            "metadata": {"name": "t1", "namespace": "default"},
            "spec": {"uid": "alice", "cost": "small"}
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.spec.user_id, "alice");
        assert_eq!(task.spec.cost_profile, "small");
        assert_eq!(task.status.phase, TaskPhase::Pending);

        let encoded = serde_json::to_value(task.with_phase(TaskPhase::InProgress)).unwrap();
        assert_eq!(encoded["status"]["phase"], "InProgress");
        assert_eq!(encoded["spec"]["uid"], "alice");
    }

    #[test]
    fn test_pending_phase_is_empty_string() {
        let encoded = serde_json::to_string(&TaskPhase::Pending).unwrap();
        assert_eq!(encoded, "\"\"");
        let decoded: TaskPhase = serde_json::from_str("\"\"").unwrap();
        assert_eq!(decoded, TaskPhase::Pending);
    }

    #[test]
    fn test_controller_ref_lookup() {
        let mut meta = ObjectMeta::named("default", "w");
        meta.owner_references.push(OwnerReference {
            kind: "Team".into(),
            name: "x".into(),
            uid: "1".into(),
            controller: false,
        });
        assert!(meta.controller_ref().is_none());
        meta.owner_references.push(OwnerReference {
            kind: "Task".into(),
            name: "t1".into(),
            uid: "2".into(),
            controller: true,
        });
        assert_eq!(meta.controller_ref().map(|r| r.name.as_str()), Some("t1"));
    }

    #[test]
    fn test_key_display() {
        let task = Task::new("ns", "t1", "u", "c");
        assert_eq!(task.key().to_string(), "ns/t1");
    }
}
