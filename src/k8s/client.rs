//! Cluster access used by the engine.
//!
//! Typed lookups and secret/storage-class writes go through the kube API;
//! bulk YAML apply/delete and pod exec go through kubectl, which already
//! handles arbitrary kinds and streaming exec.

use crate::k8s::kubectl;
use crate::utils::errors::{InstallerError, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Output of a command run inside a pod
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Everything the engine needs from a cluster. Lookups return `Ok(None)`
/// for absent objects.
pub trait ClusterClient {
    /// Apply a YAML stream; an empty `namespace` leaves namespacing to the documents
    fn apply(&self, namespace: &str, yaml: &str, force: bool) -> Result<()>;
    fn delete(&self, namespace: &str, yaml: &str, force: bool) -> Result<()>;
    fn exec(&self, pod: &str, namespace: &str, command: &[String]) -> Result<ExecOutput>;

    fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;
    fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;
    fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>>;
    fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;
    fn list_secrets(&self, namespace: &str, label_selector: &str) -> Result<Vec<Secret>>;
    fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()>;
    fn label_secret(&self, namespace: &str, name: &str, key: &str, value: &str) -> Result<()>;

    fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>>;
    fn create_storage_class(&self, storage_class: &StorageClass) -> Result<()>;
}

/// Blocking facade over a kube client plus the kubectl binary
pub struct KubeClusterClient {
    runtime: tokio::runtime::Runtime,
    client: Client,
    kubeconfig: Option<PathBuf>,
}

impl KubeClusterClient {
    /// Connect using `kubeconfig`, or the usual in-cluster/`KUBECONFIG` inference
    pub fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let client = runtime.block_on(create_client(kubeconfig))?;

        Ok(Self {
            runtime,
            client,
            kubeconfig: kubeconfig.map(Path::to_path_buf),
        })
    }

    fn block_on<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, kube::Error>>,
    {
        self.runtime.block_on(future).map_err(InstallerError::cluster)
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(InstallerError::cluster)?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(InstallerError::cluster)?
        }
        None => Config::infer().await.map_err(InstallerError::cluster)?,
    };
    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);

    Client::try_from(config).map_err(InstallerError::cluster)
}

impl ClusterClient for KubeClusterClient {
    fn apply(&self, namespace: &str, yaml: &str, force: bool) -> Result<()> {
        kubectl::apply_yaml(namespace, yaml, force, self.kubeconfig.as_deref())
    }

    fn delete(&self, namespace: &str, yaml: &str, force: bool) -> Result<()> {
        kubectl::delete_yaml(namespace, yaml, force, self.kubeconfig.as_deref())
    }

    fn exec(&self, pod: &str, namespace: &str, command: &[String]) -> Result<ExecOutput> {
        let (stdout, stderr) = kubectl::exec(pod, namespace, command, self.kubeconfig.as_deref())?;
        Ok(ExecOutput { stdout, stderr })
    }

    fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = self.namespaced(namespace);
        self.block_on(api.get_opt(name))
    }

    fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let api: Api<Pod> = self.namespaced(namespace);
        self.block_on(api.get_opt(name))
    }

    fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = self.namespaced(namespace);
        Ok(self.block_on(api.list(&ListParams::default()))?.items)
    }

    fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        self.block_on(api.get_opt(name))
    }

    fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = self.namespaced(namespace);
        self.block_on(api.get_opt(name))
    }

    fn list_secrets(&self, namespace: &str, label_selector: &str) -> Result<Vec<Secret>> {
        let api: Api<Secret> = self.namespaced(namespace);
        let params = ListParams::default().labels(label_selector);
        Ok(self.block_on(api.list(&params))?.items)
    }

    fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let api: Api<Secret> = self.namespaced(namespace);
        self.block_on(api.create(&PostParams::default(), secret))
            .map(|_| ())
    }

    fn label_secret(&self, namespace: &str, name: &str, key: &str, value: &str) -> Result<()> {
        let api: Api<Secret> = self.namespaced(namespace);
        let mut labels = serde_json::Map::new();
        labels.insert(key.to_string(), serde_json::Value::from(value));
        let patch = serde_json::json!({ "metadata": { "labels": labels } });
        self.block_on(api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)))
            .map(|_| ())
    }

    fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        self.block_on(api.get_opt(name))
    }

    fn create_storage_class(&self, storage_class: &StorageClass) -> Result<()> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        self.block_on(api.create(&PostParams::default(), storage_class))
            .map(|_| ())
    }
}
