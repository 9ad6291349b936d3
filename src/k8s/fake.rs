//! In-memory cluster and overlay builder for engine tests

use crate::config::Component;
use crate::k8s::client::{ClusterClient, ExecOutput};
use crate::manifest::kustomize::OverlayBuilder;
use crate::manifest::patch;
use crate::manifest::vfs::VirtualFs;
use crate::utils::errors::{InstallerError, Result};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
use k8s_openapi::api::core::v1::{
    Container, Namespace, Pod, PodSpec, PodStatus, PodTemplateSpec, Secret,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_yaml::{Mapping, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

const CLUSTER_SCOPED: &[&str] = &[
    "Namespace",
    "StorageClass",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
];

/// One mutating or exec call, in the order it reached the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `objects` are `Kind/name`, in document order
    Apply { namespace: String, objects: Vec<String> },
    Delete { namespace: String, objects: Vec<String> },
    Exec { pod: String, namespace: String, command: Vec<String> },
    CreateSecret { namespace: String, name: String },
    LabelSecret { namespace: String, name: String },
    CreateStorageClass { name: String },
}

impl Call {
    pub fn objects(&self) -> &[String] {
        match self {
            Call::Apply { objects, .. } | Call::Delete { objects, .. } => objects,
            _ => &[],
        }
    }

    pub fn is_apply(&self) -> bool {
        matches!(self, Call::Apply { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Call::Delete { .. })
    }
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Objects removed alongside a deleted object of `kind`, standing in for
/// controller garbage collection
struct Cascade {
    kind: String,
    secrets: Vec<Key>,
    storage_classes: Vec<String>,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    namespaces: BTreeSet<String>,
    deployments: BTreeMap<Key, Deployment>,
    unready: BTreeSet<Key>,
    pods: BTreeMap<Key, Pod>,
    secrets: BTreeMap<Key, Secret>,
    storage_classes: BTreeMap<String, StorageClass>,
    cascades: Vec<Cascade>,
    exec_stderr: Vec<(String, String)>,
    exec_errors: Vec<String>,
}

/// Shared handle: clones see the same cluster, so a test can keep one while
/// the engine owns another.
#[derive(Clone)]
pub struct FakeCluster {
    state: Rc<RefCell<State>>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn meta(namespace: Option<&str>, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}

fn running_pod(namespace: &str, name: &str) -> Pod {
    Pod {
        metadata: meta(Some(namespace), name),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn deployment(namespace: &str, name: &str, image: &str, replicas: i32) -> Deployment {
    Deployment {
        metadata: meta(Some(namespace), name),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "manager".to_string(),
                        image: Some(image.to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        status: Some(DeploymentStatus {
            ready_replicas: Some(replicas),
            ..Default::default()
        }),
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        let cluster = Self {
            state: Rc::new(RefCell::new(State::default())),
        };
        cluster.add_namespace("default");
        cluster.add_namespace("kube-system");
        cluster
    }

    pub fn add_namespace(&self, name: &str) {
        self.state.borrow_mut().namespaces.insert(name.to_string());
    }

    /// A ready deployment running `image`, with one running pod
    pub fn add_deployment(&self, namespace: &str, name: &str, image: &str) {
        let mut state = self.state.borrow_mut();
        state.namespaces.insert(namespace.to_string());
        state
            .deployments
            .insert(key(namespace, name), deployment(namespace, name, image, 1));
        let pod = format!("{name}-0");
        state.pods.insert(key(namespace, &pod), running_pod(namespace, &pod));
    }

    /// Keep a deployment at zero ready replicas
    pub fn hold_unready(&self, namespace: &str, name: &str) {
        self.state.borrow_mut().unready.insert(key(namespace, name));
    }

    pub fn add_secret(&self, namespace: &str, name: &str, labels: &[(&str, &str)]) {
        let mut secret = Secret {
            metadata: meta(Some(namespace), name),
            ..Default::default()
        };
        if !labels.is_empty() {
            secret.metadata.labels = Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
        }
        self.put_secret(namespace, secret);
    }

    pub fn put_secret(&self, namespace: &str, mut secret: Secret) {
        let mut state = self.state.borrow_mut();
        state.namespaces.insert(namespace.to_string());
        secret.metadata.namespace = Some(namespace.to_string());
        let name = secret.metadata.name.clone().unwrap_or_default();
        state.secrets.insert(key(namespace, &name), secret);
    }

    pub fn add_storage_class(&self, name: &str, provisioner: &str) {
        self.state.borrow_mut().storage_classes.insert(
            name.to_string(),
            StorageClass {
                metadata: meta(None, name),
                provisioner: provisioner.to_string(),
                ..Default::default()
            },
        );
    }

    /// Deleting any object of `kind` also removes these secrets and storage classes
    pub fn cascade_on_delete(&self, kind: &str, secrets: &[(&str, &str)], storage_classes: &[&str]) {
        self.state.borrow_mut().cascades.push(Cascade {
            kind: kind.to_string(),
            secrets: secrets.iter().map(|(ns, n)| key(ns, n)).collect(),
            storage_classes: storage_classes.iter().map(|s| s.to_string()).collect(),
        });
    }

    /// Exec calls whose command mentions `needle` report `stderr`
    pub fn exec_stderr_for(&self, needle: &str, stderr: &str) {
        self.state
            .borrow_mut()
            .exec_stderr
            .push((needle.to_string(), stderr.to_string()));
    }

    /// Exec calls whose command mentions `needle` fail outright
    pub fn exec_error_for(&self, needle: &str) {
        self.state.borrow_mut().exec_errors.push(needle.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Number of apply and delete calls
    pub fn mutations(&self) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| c.is_apply() || c.is_delete())
            .count()
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state.borrow().namespaces.contains(name)
    }

    pub fn has_deployment(&self, namespace: &str, name: &str) -> bool {
        self.state.borrow().deployments.contains_key(&key(namespace, name))
    }

    pub fn has_pod(&self, namespace: &str, name: &str) -> bool {
        self.state.borrow().pods.contains_key(&key(namespace, name))
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state.borrow().secrets.get(&key(namespace, name)).cloned()
    }

    pub fn storage_class(&self, name: &str) -> Option<StorageClass> {
        self.state.borrow().storage_classes.get(name).cloned()
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }
}

struct DocRef {
    kind: String,
    name: String,
    namespace: String,
}

fn parse_stream(yaml: &str, call_namespace: &str) -> Result<Vec<(DocRef, Value)>> {
    let mut docs = Vec::new();
    for text in patch::split_documents(yaml) {
        let doc = patch::parse_document(&text)?;
        let kind = doc["kind"].as_str().unwrap_or_default().to_string();
        let name = doc["metadata"]["name"].as_str().unwrap_or_default().to_string();
        let namespace = doc["metadata"]["namespace"]
            .as_str()
            .filter(|ns| !ns.is_empty())
            .or(Some(call_namespace).filter(|ns| !ns.is_empty()))
            .unwrap_or("default")
            .to_string();
        docs.push((
            DocRef {
                kind,
                name,
                namespace,
            },
            doc,
        ));
    }
    Ok(docs)
}

fn object_names(docs: &[(DocRef, Value)]) -> Vec<String> {
    docs.iter()
        .map(|(r, _)| format!("{}/{}", r.kind, r.name))
        .collect()
}

fn secret_from_doc(r: &DocRef, doc: &Value) -> Result<Secret> {
    let mut metadata: ObjectMeta = serde_yaml::from_value(doc["metadata"].clone())
        .map_err(|e| InstallerError::parse("secret metadata", e))?;
    metadata.namespace = Some(r.namespace.clone());
    let string_data: Option<BTreeMap<String, String>> =
        serde_yaml::from_value(doc["stringData"].clone()).ok();

    Ok(Secret {
        metadata,
        string_data,
        type_: doc["type"].as_str().map(str::to_string),
        ..Default::default()
    })
}

impl State {
    fn apply_doc(&mut self, r: &DocRef, doc: &Value) -> Result<()> {
        let cluster_scoped = CLUSTER_SCOPED.contains(&r.kind.as_str());
        if !cluster_scoped && !self.namespaces.contains(&r.namespace) {
            return Err(InstallerError::not_found(format!(
                "namespaces \"{}\" not found",
                r.namespace
            )));
        }

        match r.kind.as_str() {
            "Namespace" => {
                self.namespaces.insert(r.name.clone());
            }
            "Deployment" => {
                let image = doc["spec"]["template"]["spec"]["containers"][0]["image"]
                    .as_str()
                    .unwrap_or("unknown:latest");
                let replicas = doc["spec"]["replicas"].as_i64().unwrap_or(1) as i32;
                self.deployments.insert(
                    key(&r.namespace, &r.name),
                    deployment(&r.namespace, &r.name, image, replicas),
                );
                let pod = format!("{}-0", r.name);
                self.pods
                    .insert(key(&r.namespace, &pod), running_pod(&r.namespace, &pod));
            }
            "Pod" => {
                self.pods
                    .insert(key(&r.namespace, &r.name), running_pod(&r.namespace, &r.name));
            }
            "Secret" => {
                self.secrets
                    .insert(key(&r.namespace, &r.name), secret_from_doc(r, doc)?);
            }
            "StorageClass" => {
                self.storage_classes.insert(
                    r.name.clone(),
                    StorageClass {
                        metadata: meta(None, &r.name),
                        provisioner: doc["provisioner"].as_str().unwrap_or_default().to_string(),
                        ..Default::default()
                    },
                );
            }
            _ => {}
        }
        Ok(())
    }

    fn delete_doc(&mut self, r: &DocRef) {
        match r.kind.as_str() {
            "Namespace" => {
                self.namespaces.remove(&r.name);
                self.deployments.retain(|(ns, _), _| ns != &r.name);
                self.pods.retain(|(ns, _), _| ns != &r.name);
                self.secrets.retain(|(ns, _), _| ns != &r.name);
            }
            "Deployment" => {
                self.deployments.remove(&key(&r.namespace, &r.name));
                let prefix = format!("{}-", r.name);
                self.pods
                    .retain(|(ns, pod), _| !(ns == &r.namespace && pod.starts_with(&prefix)));
            }
            "Pod" => {
                self.pods.remove(&key(&r.namespace, &r.name));
            }
            "Secret" => {
                self.secrets.remove(&key(&r.namespace, &r.name));
            }
            "StorageClass" => {
                self.storage_classes.remove(&r.name);
            }
            _ => {}
        }

        for cascade in self.cascades.iter().filter(|c| c.kind == r.kind) {
            for secret in &cascade.secrets {
                self.secrets.remove(secret);
            }
            for sc in &cascade.storage_classes {
                self.storage_classes.remove(sc);
            }
        }
    }
}

impl ClusterClient for FakeCluster {
    fn apply(&self, namespace: &str, yaml: &str, _force: bool) -> Result<()> {
        let docs = parse_stream(yaml, namespace)?;
        self.record(Call::Apply {
            namespace: namespace.to_string(),
            objects: object_names(&docs),
        });

        let mut state = self.state.borrow_mut();
        for (r, doc) in &docs {
            state.apply_doc(r, doc)?;
        }
        Ok(())
    }

    fn delete(&self, namespace: &str, yaml: &str, _force: bool) -> Result<()> {
        let docs = parse_stream(yaml, namespace)?;
        self.record(Call::Delete {
            namespace: namespace.to_string(),
            objects: object_names(&docs),
        });

        let mut state = self.state.borrow_mut();
        for (r, _) in &docs {
            state.delete_doc(r);
        }
        Ok(())
    }

    fn exec(&self, pod: &str, namespace: &str, command: &[String]) -> Result<ExecOutput> {
        self.record(Call::Exec {
            pod: pod.to_string(),
            namespace: namespace.to_string(),
            command: command.to_vec(),
        });

        let line = command.join(" ");
        let state = self.state.borrow();
        if state.exec_errors.iter().any(|needle| line.contains(needle.as_str())) {
            return Err(InstallerError::Command {
                program: "kubectl exec".to_string(),
                stderr: format!("command terminated with exit code 1: {line}"),
            });
        }
        if let Some((_, stderr)) = state
            .exec_stderr
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
        {
            return Ok(ExecOutput {
                stdout: String::new(),
                stderr: stderr.clone(),
            });
        }
        Ok(ExecOutput {
            stdout: "OK\n".to_string(),
            stderr: String::new(),
        })
    }

    fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let state = self.state.borrow();
        let k = key(namespace, name);
        Ok(state.deployments.get(&k).cloned().map(|mut d| {
            if state.unready.contains(&k) {
                d.status = Some(DeploymentStatus {
                    ready_replicas: Some(0),
                    ..Default::default()
                });
            }
            d
        }))
    }

    fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.state.borrow().pods.get(&key(namespace, name)).cloned())
    }

    fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        Ok(self
            .state
            .borrow()
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        Ok(self
            .state
            .borrow()
            .namespaces
            .contains(name)
            .then(|| Namespace {
                metadata: meta(None, name),
                ..Default::default()
            }))
    }

    fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secret(namespace, name))
    }

    fn list_secrets(&self, namespace: &str, label_selector: &str) -> Result<Vec<Secret>> {
        let wanted: Vec<(&str, &str)> = label_selector
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .collect();

        Ok(self
            .state
            .borrow()
            .secrets
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, secret)| {
                let labels = secret.metadata.labels.clone().unwrap_or_default();
                wanted
                    .iter()
                    .all(|(k, v)| labels.get(*k).map(String::as_str) == Some(*v))
            })
            .map(|(_, secret)| secret.clone())
            .collect())
    }

    fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.record(Call::CreateSecret {
            namespace: namespace.to_string(),
            name: name.clone(),
        });

        let mut state = self.state.borrow_mut();
        if !state.namespaces.contains(namespace) {
            return Err(InstallerError::not_found(format!(
                "namespaces \"{namespace}\" not found"
            )));
        }
        let k = key(namespace, &name);
        if state.secrets.contains_key(&k) {
            return Err(InstallerError::cluster(format!(
                "secrets \"{name}\" already exists"
            )));
        }
        let mut secret = secret.clone();
        secret.metadata.namespace = Some(namespace.to_string());
        state.secrets.insert(k, secret);
        Ok(())
    }

    fn label_secret(&self, namespace: &str, name: &str, label: &str, value: &str) -> Result<()> {
        self.record(Call::LabelSecret {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });

        let mut state = self.state.borrow_mut();
        let secret = state
            .secrets
            .get_mut(&key(namespace, name))
            .ok_or_else(|| InstallerError::not_found(format!("secrets \"{name}\" not found")))?;
        secret
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(label.to_string(), value.to_string());
        Ok(())
    }

    fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>> {
        Ok(self.storage_class(name))
    }

    fn create_storage_class(&self, storage_class: &StorageClass) -> Result<()> {
        let name = storage_class.metadata.name.clone().unwrap_or_default();
        self.record(Call::CreateStorageClass { name: name.clone() });

        let mut state = self.state.borrow_mut();
        if state.storage_classes.contains_key(&name) {
            return Err(InstallerError::cluster(format!(
                "storageclasses \"{name}\" already exists"
            )));
        }
        state.storage_classes.insert(name, storage_class.clone());
        Ok(())
    }
}

/// Renders an overlay the way kustomize would for the subset the engine
/// uses: concatenated resources, the `namespace:` override and
/// add/replace/remove patches on mapping paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct FakeOverlay;

impl OverlayBuilder for FakeOverlay {
    fn build(&self, fs: &VirtualFs, component: Component) -> Result<String> {
        let kustomization = patch::parse_document(&fs.kustomization(component)?)?;

        let mut docs = Vec::new();
        for resource in kustomization["resources"].as_sequence().into_iter().flatten() {
            let file = resource
                .as_str()
                .ok_or_else(|| InstallerError::parse("resources", "entry is not a string"))?;
            let text = fs.read_string(component.group(), component.name(), file)?;
            for doc in patch::split_documents(&text) {
                docs.push(patch::parse_document(&doc)?);
            }
        }

        if let Some(namespace) = kustomization["namespace"].as_str() {
            for doc in &mut docs {
                let kind = doc["kind"].as_str().unwrap_or_default();
                if !CLUSTER_SCOPED.contains(&kind) {
                    set_path(doc, &["metadata", "namespace"], Value::from(namespace))?;
                }
            }
        }

        for entry in kustomization["patches"].as_sequence().into_iter().flatten() {
            let kind = entry["target"]["kind"].as_str().unwrap_or_default();
            let name = entry["target"]["name"].as_str().unwrap_or_default();
            let ops: Vec<Value> = serde_yaml::from_str(entry["patch"].as_str().unwrap_or("[]"))
                .map_err(|e| InstallerError::parse("patch body", e))?;

            for doc in docs.iter_mut().filter(|d| {
                d["kind"].as_str() == Some(kind) && d["metadata"]["name"].as_str() == Some(name)
            }) {
                for op in &ops {
                    apply_op(doc, op)?;
                }
            }
        }

        let rendered = docs
            .iter()
            .map(patch::to_yaml)
            .collect::<Result<Vec<_>>>()?;
        Ok(patch::join_documents(&rendered))
    }
}

fn apply_op(doc: &mut Value, op: &Value) -> Result<()> {
    let path = op["path"].as_str().unwrap_or_default();
    let segments: Vec<String> = path
        .trim_start_matches('/')
        .split('/')
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect();
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

    match op["op"].as_str() {
        Some("remove") => {
            let Some((last, parents)) = segments.split_last() else {
                return Ok(());
            };
            if let Some(Value::Mapping(map)) = get_path_mut(doc, parents) {
                map.remove(*last);
            }
            Ok(())
        }
        _ => set_path(doc, &segments, op["value"].clone()),
    }
}

fn get_path_mut<'a>(doc: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
    let mut node = doc;
    for segment in path {
        node = node.get_mut(*segment)?;
    }
    Some(node)
}

fn set_path(doc: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        return Ok(());
    };

    let mut node = doc;
    for segment in parents {
        if node.is_null() {
            *node = Value::Mapping(Mapping::new());
        }
        node = match node {
            Value::Mapping(map) => map.entry(Value::from(*segment)).or_insert(Value::Null),
            _ => return Err(InstallerError::parse(path.join("/"), "not a mapping")),
        };
    }
    if node.is_null() {
        *node = Value::Mapping(Mapping::new());
    }
    match node {
        Value::Mapping(map) => {
            map.insert(Value::from(*last), value);
            Ok(())
        }
        _ => Err(InstallerError::parse(path.join("/"), "not a mapping")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::patch::Patch;
    use crate::manifest::vfs::new_kustomization;

    #[test]
    fn test_apply_into_missing_namespace_is_rejected() {
        let cluster = FakeCluster::new();
        let err = cluster
            .apply("", "kind: ConfigMap\nmetadata:\n  name: c\n  namespace: nope\n", false)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_namespace_delete_sweeps_contents() {
        let cluster = FakeCluster::new();
        cluster.add_deployment("tenant-a", "op", "img:1");
        cluster.add_secret("tenant-a", "s", &[]);
        cluster
            .delete("", "kind: Namespace\nmetadata:\n  name: tenant-a\n", false)
            .unwrap();
        assert!(!cluster.has_namespace("tenant-a"));
        assert!(!cluster.has_deployment("tenant-a", "op"));
        assert!(cluster.secret("tenant-a", "s").is_none());
    }

    #[test]
    fn test_overlay_applies_namespace_and_patches() {
        let mut fs = VirtualFs::new();
        fs.set_manifest(
            Component::Operator,
            "kind: Namespace\nmetadata:\n  name: storage-system\n---\nkind: Deployment\nmetadata:\n  name: storage-operator\n  namespace: storage-system\n",
        );
        let k = new_kustomization(Component::Operator.file_name()).unwrap();
        let k = patch::set_field(&k, "ops", "namespace", &[]).unwrap();
        let k = patch::add_patches(
            &k,
            "Namespace",
            "storage-system",
            &[Patch::replace("/metadata/name", Value::from("ops"))],
        )
        .unwrap();
        fs.set_kustomization(Component::Operator, k);

        let out = FakeOverlay.build(&fs, Component::Operator).unwrap();
        let ns = patch::get_manifest_by_kind(&out, "Namespace").unwrap().unwrap();
        assert_eq!(patch::get_field(&ns, &["metadata", "name"]).unwrap(), "ops");
        let dep = patch::get_manifest_by_kind(&out, "Deployment").unwrap().unwrap();
        assert_eq!(patch::get_field(&dep, &["metadata", "namespace"]).unwrap(), "ops");
    }
}
