use super::*;

#[test]
fn test_installer_from_kind() {
    assert_eq!(OperatorInstaller::from(InstallerKind::Bundle), OperatorInstaller::Bundle);
    assert_eq!(
        OperatorInstaller::from(InstallerKind::Olm),
        OperatorInstaller::Olm { cluster_wide: false }
    );
    assert_eq!(
        OperatorInstaller::from(InstallerKind::OlmClusterwide),
        OperatorInstaller::Olm { cluster_wide: true }
    );
}

#[test]
fn test_bundle_source_parse() {
    assert_eq!(
        BundleSource::parse("https://example.com/install.yaml"),
        BundleSource::Url("https://example.com/install.yaml".to_string())
    );
    assert_eq!(
        BundleSource::parse("/work/operator/install.yaml"),
        BundleSource::File(PathBuf::from("/work/operator/install.yaml"))
    );
    assert_eq!(
        BundleSource::parse("/work/operator/deploy"),
        BundleSource::Directory(PathBuf::from("/work/operator/deploy"))
    );
}

#[test]
fn test_directory_bundle_apply_order() {
    // ACT
    let files = bundle_files(Path::new("/bundle"));

    // ASSERT
    let names: Vec<String> = files
        .iter()
        .map(|f| f.strip_prefix("/bundle").expect("prefix").display().to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            "service_account.yaml",
            "role.yaml",
            "role_binding.yaml",
            "cluster_role.yaml",
            "cluster_role_binding.yaml",
            "crds/apicur.io_apicurioregistries_crd.yaml",
            "operator.yaml",
        ]
    );
    // The CRD must exist before the operator that watches it starts
    let crd = names.iter().position(|n| n.contains("crd")).expect("crd");
    let operator = names.iter().position(|n| n == "operator.yaml").expect("operator");
    assert!(crd < operator);
}

#[tokio::test]
async fn test_bundle_file_is_rendered_with_namespace() {
    // ARRANGE
    let path = std::env::temp_dir().join(format!("bundle-{}.yaml", uuid::Uuid::new_v4()));
    tokio::fs::write(
        &path,
        "kind: ClusterRoleBinding\nsubjects:\n- kind: ServiceAccount\n  namespace: {NAMESPACE}\n",
    )
    .await
    .expect("write");

    // ACT
    let rendered = render_bundle_file(&path, "apicurio-registry-e2e").await;
    tokio::fs::remove_file(&path).await.ok();

    // ASSERT
    let rendered = rendered.expect("render");
    assert!(rendered.contains("namespace: apicurio-registry-e2e"));
    assert!(!rendered.contains("{NAMESPACE}"));
}

#[tokio::test]
async fn test_missing_bundle_file_is_config_error() {
    let err = render_bundle_file(Path::new("/nonexistent/operator.yaml"), "e2e")
        .await
        .expect_err("missing file");
    assert!(matches!(err, Error::Config(_)));
}

fn offline_suite(bundle_path: Option<&str>) -> SuiteContext {
    let config = crate::config::SuiteConfig::from_lookup(|key| match key {
        crate::config::env::SUITE_PROJECT_DIR => Some("/work/suite".to_string()),
        crate::config::env::OPERATOR_BUNDLE_PATH => bundle_path.map(str::to_string),
        _ => None,
    })
    .expect("config");
    SuiteContext::offline(config, crate::config::Flags::default())
}

#[tokio::test]
async fn test_bundle_install_without_path_fails_before_touching_the_cluster() {
    let suite = offline_suite(None);

    let err = OperatorInstaller::Bundle
        .install(&suite)
        .await
        .expect_err("no bundle path");

    assert!(matches!(err, Error::Config(ref m) if m.contains(crate::config::env::OPERATOR_BUNDLE_PATH)));
}

#[tokio::test]
async fn test_planned_bundle_installation_targets_operator_namespace() {
    let suite = offline_suite(Some("/work/operator/deploy"));

    let planned = OperatorInstaller::Bundle.planned_installation(&suite).expect("planned");

    match planned {
        OperatorInstallation::Bundle { namespace, source } => {
            assert_eq!(namespace, OPERATOR_NAMESPACE);
            assert_eq!(source, BundleSource::Directory(PathBuf::from("/work/operator/deploy")));
        }
        other => panic!("expected bundle installation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_planned_olm_installation_undoes_only_the_namespace() {
    // ARRANGE
    let suite = offline_suite(None);

    // ACT
    let namespaced = OperatorInstaller::Olm { cluster_wide: false }
        .planned_installation(&suite)
        .expect("planned");
    let cluster_wide = OperatorInstaller::Olm { cluster_wide: true }
        .planned_installation(&suite)
        .expect("planned");

    // ASSERT: nothing but the operator namespace exists before the first step
    let namespaced = namespaced.olm().expect("olm record");
    assert_eq!(namespaced.state, olm::InstallState::NoCatalog);
    assert_eq!(
        olm::uninstall_plan(namespaced),
        vec![olm::UninstallStep::Namespace(OPERATOR_NAMESPACE.to_string())]
    );

    let cluster_wide = cluster_wide.olm().expect("olm record");
    assert_eq!(cluster_wide.operator_namespace, olm::CLUSTER_WIDE_NAMESPACE);
    assert!(olm::uninstall_plan(cluster_wide).is_empty());
}
