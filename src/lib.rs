//! storage-deploy: install, uninstall and upgrade the storage platform on Kubernetes

pub mod commands;
pub mod config;
pub mod install;
pub mod k8s;
pub mod manifest;
pub mod utils;
