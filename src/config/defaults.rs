//! Fixed names, versions and locations of the platform's resources

use semver::Version;

/// Oldest operator version this tool can uninstall or upgrade from
pub const OLDEST_SUPPORTED_VERSION: Version = Version::new(2, 2, 0);

/// Last release of the legacy operator generation
pub const LAST_PRE_BREAKING_VERSION: Version = Version::new(2, 4, 4);

/// Version an operator image tagged `develop` is treated as
pub const LATEST_SUPPORTED_VERSION: Version = Version::new(2, 6, 0);

pub const DEVELOP_TAG: &str = "develop";

/// Version placeholder resolved through the release catalog
pub const LATEST: &str = "latest";

pub const OPERATOR_NAMESPACE: &str = "storage-system";
pub const OPERATOR_DEPLOYMENT: &str = "storage-operator";
pub const LEGACY_OPERATOR_NAMESPACE: &str = "storage-operator";
pub const LEGACY_OPERATOR_DEPLOYMENT: &str = "storage-cluster-operator";

pub const ETCD_NAMESPACE: &str = "storage-etcd";
pub const ETCD_OPERATOR_DEPLOYMENT: &str = "storage-etcd-controller-manager";
pub const ETCD_SERVICE: &str = "storage-etcd";
pub const ETCD_CLIENT_PORT: u16 = 2379;
pub const ETCD_CLUSTER_KIND: &str = "EtcdCluster";
pub const ETCD_CLUSTER_NAME: &str = "storage-etcd";
pub const ETCD_TLS_SECRET: &str = "storage-etcd-client-tls";

pub const CLUSTER_KIND: &str = "StorageCluster";
pub const CLUSTER_NAME: &str = "storage-cluster";
pub const API_SECRET: &str = "storage-api";

pub const PORTAL_SECRET: &str = "storage-portal-client";
pub const PORTAL_CONFIG_MAP: &str = "storage-portal-config";

pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const PART_OF_VALUE: &str = "storage-platform";
pub const SECRET_FINALIZER: &str = "storage-platform/secret-protection";

/// Secrets the CSI driver of the legacy generation keeps outside the platform namespaces
pub const CSI_SECRET_NAMESPACE: &str = "kube-system";
pub const CSI_SECRETS: [&str; 3] = [
    "csi-controller-expand-secret",
    "csi-controller-publish-secret",
    "csi-node-publish-secret",
];
pub const SNAPSHOT_STORAGE_CLASS: &str = "fast";

pub const VALIDATION_POD: &str = "storage-etcd-validation";
pub const VALIDATION_IMAGE: &str = "quay.io/coreos/etcd:v3.5.15";
pub const VALIDATION_NAMESPACE: &str = "default";
pub const ETCD_CERT_MOUNT: &str = "/etc/etcd/certs";

/// Default URL templates; `{version}` and `{file}` are substituted
pub const STORAGE_URL_TEMPLATE: &str =
    "https://github.com/storage-platform/storage-operator/releases/download/v{version}/{file}";
pub const ETCD_URL_TEMPLATE: &str =
    "https://github.com/storage-platform/storage-etcd-operator/releases/latest/download/{file}";
pub const PORTAL_URL_TEMPLATE: &str =
    "https://github.com/storage-platform/portal-manager/releases/latest/download/{file}";

pub const RELEASES_API: &str =
    "https://api.github.com/repos/storage-platform/storage-operator/releases/latest";

pub const BACKUP_DIR: &str = "storage-deploy-backup";
