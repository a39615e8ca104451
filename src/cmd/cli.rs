//! kubectl / oc wrapper
//!
//! Most resource plumbing goes through `kube::Api`; the CLI covers the
//! rest: applying rendered manifests, bundles on disk, exec, pod logs, and
//! the diagnostic dumps printed before a timeout is surfaced.

use super::Cmd;
use crate::error::Result;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliBinary {
    Kubectl,
    Oc,
}

impl CliBinary {
    pub fn for_cluster(is_openshift: bool) -> Self {
        if is_openshift {
            CliBinary::Oc
        } else {
            CliBinary::Kubectl
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CliBinary::Kubectl => "kubectl",
            CliBinary::Oc => "oc",
        }
    }
}

#[derive(Debug, Clone)]
pub struct KubeCli {
    binary: CliBinary,
}

impl KubeCli {
    pub fn new(binary: CliBinary) -> Self {
        Self { binary }
    }

    pub fn binary(&self) -> CliBinary {
        self.binary
    }

    /// Base command for this CLI
    pub fn cmd(&self) -> Cmd {
        Cmd::new(self.binary.as_str())
    }

    /// Run with output inherited
    pub async fn execute(&self, args: &[&str]) -> Result<()> {
        self.cmd().args(args.iter().copied()).run().await.map(|_| ())
    }

    /// Run and return stdout
    pub async fn output(&self, args: &[&str]) -> Result<String> {
        self.cmd().args(args.iter().copied()).capture().run().await
    }

    /// Pipe one or more objects to `apply -f -` as a YAML stream
    pub async fn apply_manifest<T: Serialize>(&self, namespace: &str, objects: &[T]) -> Result<()> {
        let yaml = to_yaml_stream(objects)?;
        self.cmd()
            .args(["apply", "-n", namespace, "-f", "-"])
            .stdin(yaml)
            .run()
            .await
            .map(|_| ())
    }

    pub async fn delete_manifest<T: Serialize>(&self, namespace: &str, objects: &[T]) -> Result<()> {
        let yaml = to_yaml_stream(objects)?;
        self.cmd()
            .args(["delete", "--ignore-not-found", "-n", namespace, "-f", "-"])
            .stdin(yaml)
            .run()
            .await
            .map(|_| ())
    }

    /// Apply raw YAML text (a rendered template)
    pub async fn apply_yaml(&self, namespace: &str, yaml: &str) -> Result<()> {
        self.cmd()
            .args(["apply", "-n", namespace, "-f", "-"])
            .stdin(yaml)
            .run()
            .await
            .map(|_| ())
    }

    pub async fn delete_yaml(&self, namespace: &str, yaml: &str) -> Result<()> {
        self.cmd()
            .args(["delete", "--ignore-not-found", "-n", namespace, "-f", "-"])
            .stdin(yaml)
            .run()
            .await
            .map(|_| ())
    }

    /// Apply a file, directory or URL
    pub async fn apply_path(&self, namespace: &str, path: &str) -> Result<()> {
        self.execute(&["apply", "-n", namespace, "-f", path]).await
    }

    pub async fn delete_path(&self, namespace: &str, path: &str) -> Result<()> {
        self.execute(&["delete", "--ignore-not-found", "-n", namespace, "-f", path])
            .await
    }

    pub async fn exec(&self, namespace: &str, pod: &str, command: &[&str]) -> Result<String> {
        let mut args = vec!["exec", "-n", namespace, pod, "--"];
        args.extend_from_slice(command);
        self.output(&args).await
    }

    pub async fn logs(&self, namespace: &str, pod: &str, container: &str) -> Result<String> {
        self.output(&["logs", pod, "-c", container, "-n", namespace])
            .await
    }

    pub async fn get_pods(&self, namespace: &str) -> Result<()> {
        self.execute(&["get", "pod", "-n", namespace]).await
    }

    pub async fn get_deployments(&self, namespace: &str) -> Result<()> {
        self.execute(&["get", "deployment", "-n", namespace]).await
    }

    pub async fn get_statefulsets(&self, namespace: &str) -> Result<()> {
        self.execute(&["get", "statefulset", "-n", namespace]).await
    }

    pub async fn get_volumes(&self, namespace: &str) -> Result<()> {
        self.execute(&["get", "pvc", "-n", namespace]).await?;
        self.execute(&["get", "pv"]).await
    }

    /// Print pods, deployments, statefulsets and volumes of a namespace
    ///
    /// Failures are only logged; the dump never masks the error that
    /// triggered it.
    pub async fn dump_diagnostics(&self, namespace: &str) {
        let results = [
            self.get_pods(namespace).await,
            self.get_deployments(namespace).await,
            self.get_statefulsets(namespace).await,
            self.get_volumes(namespace).await,
        ];
        for result in results {
            if let Err(e) = result {
                warn!(namespace = %namespace, error = %e, "Diagnostic dump command failed");
            }
        }
    }

    /// `get <kind> -o yaml`, logged on failure only
    pub async fn dump_yaml(&self, namespace: &str, kind: &str) {
        if let Err(e) = self
            .execute(&["get", kind, "-o", "yaml", "-n", namespace])
            .await
        {
            warn!(namespace = %namespace, kind = %kind, error = %e, "Diagnostic dump command failed");
        }
    }
}

/// Serialize objects as a `---` separated YAML stream
pub fn to_yaml_stream<T: Serialize>(objects: &[T]) -> Result<String> {
    let mut docs = Vec::with_capacity(objects.len());
    for object in objects {
        docs.push(serde_yaml::to_string(object)?);
    }
    Ok(docs.join("---\n"))
}
