use std::sync::Arc;

use checkout_core::cache::{EndpointCache, init_default_cache, reset_default_cache};
use checkout_core::check::{CheckContext, check_pvs, run_file, run_path};
use checkout_core::comparisons::{Comparison, Severity, Value};
use checkout_core::config::{ConfigurationFile, IdentifierAndComparison, PVConfiguration};
use checkout_core::settings::Settings;
use checkout_core::signal::mock::{MockBehavior, MockDevice, MockDirectory, MockSignalFactory};
use rand::seq::SliceRandom;

fn pvs(ids: &[&str], comparisons: Vec<Comparison>) -> PVConfiguration {
    PVConfiguration {
        name: Some("pvs".into()),
        checklist: vec![IdentifierAndComparison {
            name: None,
            ids: ids.iter().map(|id| id.to_string()).collect(),
            comparisons,
        }],
        ..Default::default()
    }
}

fn context(factory: MockSignalFactory) -> CheckContext {
    CheckContext::new(Arc::new(EndpointCache::new(Arc::new(factory))))
}

#[tokio::test(start_paused = true)]
async fn timed_out_endpoint_uses_if_disconnected() {
    let ctx = context(
        MockSignalFactory::new(MockBehavior::Value(Value::Int(1)))
            .with("PV:DOWN", MockBehavior::NeverConnects),
    );
    let comparison = Comparison::equals(1).with_settings(|s| {
        s.timeout = Some(0.05);
        s.if_disconnected = Severity::Warning;
    });

    let (severity, results) = check_pvs(&pvs(&["PV:UP", "PV:DOWN"], vec![comparison]), &ctx).await;

    assert_eq!(severity, Severity::Warning);
    assert_eq!(results.len(), 2);
    assert!(results[0].is_success());
    assert_eq!(results[1].severity, Severity::Warning);
    let reason = results[1].reason.as_deref().expect("reason");
    assert!(reason.contains("PV:DOWN"), "{reason}");
    assert!(reason.contains("Equals"), "{reason}");
}

#[tokio::test(start_paused = true)]
async fn waits_overlap_across_comparisons() {
    let ctx = context(MockSignalFactory::new(MockBehavior::NeverConnects));
    let comparison = Comparison::equals(1).with_settings(|s| s.timeout = Some(1.0));
    let ids: Vec<String> = (0..20).map(|i| format!("PV:{i:02}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

    let started = tokio::time::Instant::now();
    let (severity, results) = check_pvs(&pvs(&id_refs, vec![comparison]), &ctx).await;

    assert_eq!(severity, Severity::Error);
    assert_eq!(results.len(), 20);
    // Twenty one-second timeouts run side by side, not back to back
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
}

#[tokio::test]
async fn overall_severity_ignores_checklist_order() {
    let factory = || {
        MockSignalFactory::new(MockBehavior::Value(Value::Int(1)))
            .with("PV:B", MockBehavior::Value(Value::Int(2)))
            .with("PV:C", MockBehavior::ReadFails("bad read".into()))
    };
    let comparisons = vec![
        Comparison::equals(1).with_settings(|s| s.severity_on_failure = Severity::Warning),
    ];
    let mut ids = vec!["PV:A", "PV:B", "PV:C", "PV:D", "PV:E"];

    let ctx = context(factory());
    let (expected, _) = check_pvs(&pvs(&ids, comparisons.clone()), &ctx).await;
    assert_eq!(expected, Severity::InternalError);

    let mut rng = rand::thread_rng();
    for _ in 0..5 {
        ids.shuffle(&mut rng);
        let ctx = context(factory());
        let (severity, results) = check_pvs(&pvs(&ids, comparisons.clone()), &ctx).await;
        assert_eq!(severity, expected);

        // Each result stays next to its own identifier
        for (id, result) in ids.iter().zip(&results) {
            let want = match *id {
                "PV:B" => Severity::Warning,
                "PV:C" => Severity::InternalError,
                _ => Severity::Success,
            };
            assert_eq!(result.severity, want, "{id}: {result:?}");
        }
    }
}

#[test]
fn concurrent_gets_share_one_handle() {
    let factory = Arc::new(MockSignalFactory::new(MockBehavior::Value(Value::Int(1))));
    let cache = EndpointCache::new(factory.clone());

    let handles: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| cache.get("PV:SHARED").expect("get")))
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().expect("worker"))
            .collect()
    });

    assert_eq!(factory.creations(), 1);
    assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[test]
fn default_cache_resets_between_runs() {
    let factory = Arc::new(MockSignalFactory::new(MockBehavior::Value(Value::Int(1))));
    let cache = init_default_cache(factory.clone());
    cache.get("PV:1").expect("get");
    assert_eq!(cache.len(), 1);

    reset_default_cache();
    assert!(cache.is_empty());
    assert!(factory.created().iter().all(|s| s.is_destroyed()));
}

const DOC: &str = r#"
macros:
  P: "LAB"
configs:
  - PVConfiguration:
      name: readbacks
      checklist:
        - ids: ["${P}:TEMP"]
          comparisons:
            - Range: { low: 10, high: 30, warn_low: 15, warn_high: 25 }
  - DeviceConfiguration:
      name: pumps
      devices: ["pump1", "pump2"]
      checklist:
        - name: running
          ids: ["state"]
          comparisons:
            - Equals: { value: "ON", string: true }
"#;

fn file_context() -> CheckContext {
    let factory = MockSignalFactory::new(MockBehavior::Value(Value::Float(20.0)));
    let directory = MockDirectory::new()
        .with_device(MockDevice::new("pump1").with_attr("state", MockBehavior::Value(Value::Str("ON".into()))));
    CheckContext::with_settings(
        Arc::new(EndpointCache::new(Arc::new(factory))),
        Settings::default(),
    )
    .with_directory(Arc::new(directory))
}

#[tokio::test]
async fn file_run_reports_per_configuration() {
    let file = ConfigurationFile::from_yaml_str(DOC).expect("document");
    let ctx = file_context();

    let report = run_file(&file, &ctx).await;

    assert_eq!(report.run_id, ctx.run_id());
    assert_eq!(report.configs.len(), 2);
    assert_eq!(report.configs[0].name.as_deref(), Some("readbacks"));
    assert_eq!(report.configs[0].severity, Severity::Success);
    assert!(ctx.cache.contains("LAB:TEMP"));

    // pump2 is unknown to the directory
    let pumps = &report.configs[1];
    assert_eq!(pumps.results.len(), 2);
    assert!(pumps.results[0].is_success());
    let reason = pumps.results[1].reason.as_deref().expect("reason");
    assert!(reason.starts_with("Failed to prepare comparison running for pump2.state"), "{reason}");
    assert_eq!(report.severity, Severity::Error);
}

const GROUPED: &str = r#"
configs:
  - ConfigurationGroup:
      name: either
      mode: any
      values: { MAIN: "LAB:MAIN" }
      configs:
        - PVConfiguration:
            name: main
            checklist:
              - ids: ["${MAIN}"]
                comparisons: [ { Equals: { value: 20 } } ]
        - PVConfiguration:
            name: spare
            checklist:
              - ids: ["LAB:SPARE"]
                comparisons: [ { Equals: { value: 1 } } ]
"#;

#[tokio::test]
async fn any_group_passes_when_one_child_passes() {
    let file = ConfigurationFile::from_yaml_str(GROUPED).expect("document");
    let ctx = file_context();

    let report = run_file(&file, &ctx).await;

    assert_eq!(report.configs.len(), 1);
    let group = &report.configs[0];
    let children: Vec<(Option<&str>, Severity)> = group
        .children
        .iter()
        .map(|c| (c.name.as_deref(), c.severity))
        .collect();
    assert_eq!(
        children,
        vec![(Some("main"), Severity::Success), (Some("spare"), Severity::Error)]
    );
    assert_eq!(group.severity, Severity::Success);
    assert_eq!(report.severity, Severity::Success);
    assert!(ctx.cache.contains("LAB:MAIN"));
}

#[tokio::test]
async fn malformed_file_fails_before_running() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.yaml");
    std::fs::write(&path, "configs: [ { NotAConfiguration: {} } ]").expect("write");

    let ctx = file_context();
    let err = run_path(&path, &ctx).await.expect_err("malformed");
    assert!(format!("{err:#}").contains("broken.yaml"));
    assert!(ctx.cache.is_empty());
}

#[test]
fn validate_counts_unpreparable_steps() {
    let file = ConfigurationFile::from_yaml_str(DOC).expect("document");
    let ctx = file_context();
    let (ok, reason) = file.validate(&ctx.cache, ctx.directory.as_deref());
    assert!(!ok);
    assert_eq!(reason, "Failed to prepare 1 steps");
}
