// src/check.rs
//
// Running configurations: warm the endpoint cache, prepare every unit, then
// compare all prepared units concurrently and fold their severities.

use anyhow::Result;
use futures::future::{BoxFuture, FutureExt, join_all};
use indexmap::IndexMap;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use comparisons::{CheckResult, Comparison, Severity};

use crate::cache::{DataCache, EndpointCache};
use crate::config::{
    expand_macros, Configuration, ConfigurationFile, ConfigurationGroup, DeviceConfiguration,
    PVConfiguration,
};
use crate::prepare::{prepare_devices, prepare_pvs, PrepareOutcome, PreparedComparison};
use crate::settings::Settings;
use crate::signal::DeviceDirectory;
use crate::utils::StatusLog;

/// Everything a run needs besides the configuration itself.
pub struct CheckContext {
    pub cache: Arc<EndpointCache>,
    pub directory: Option<Arc<dyn DeviceDirectory>>,
    pub settings: Settings,
    /// Values acquired by the current run; emptied when a run starts.
    pub data: DataCache,
    run_id: Uuid,
    status_log: Option<StatusLog>,
}

impl CheckContext {
    pub fn new(cache: Arc<EndpointCache>) -> Self {
        Self::with_settings(cache, Settings::default())
    }

    pub fn with_settings(cache: Arc<EndpointCache>, settings: Settings) -> Self {
        let status_log = settings
            .status_log
            .enabled
            .then(|| StatusLog::new(settings.status_log.path.clone()));
        Self {
            cache,
            directory: None,
            settings,
            data: DataCache::new(),
            run_id: Uuid::new_v4(),
            status_log,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn DeviceDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn status_log(&self) -> Option<&StatusLog> {
        self.status_log.as_ref()
    }

    pub(crate) fn log_started(&self, identifier: &str, comparison: &Comparison) {
        if let Some(log) = &self.status_log {
            if let Err(e) = log.started(self.run_id, identifier, &comparison.to_string()) {
                warn!(error = %e, "status log write failed");
            }
        }
    }

    pub(crate) fn log_finished(&self, identifier: &str, comparison: &Comparison, result: &CheckResult) {
        if let Some(log) = &self.status_log {
            let written = log.finished(
                self.run_id,
                identifier,
                &comparison.to_string(),
                result.severity,
                result.reason.as_deref(),
            );
            if let Err(e) = written {
                warn!(error = %e, "status log write failed");
            }
        }
    }
}

/// Outcome of one configuration. Groups report through `children`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigurationReport {
    pub name: Option<String>,
    pub severity: Severity,
    pub results: Vec<CheckResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ConfigurationReport>,
}

/// Outcome of a whole document, one report per configuration in order.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub run_id: Uuid,
    pub severity: Severity,
    pub configs: Vec<ConfigurationReport>,
}

enum Unit {
    Ready(PreparedComparison),
    Failed(CheckResult),
}

/// Check every PV of the configuration. Results follow preparation order.
pub async fn check_pvs(config: &PVConfiguration, ctx: &CheckContext) -> (Severity, Vec<CheckResult>) {
    ctx.data.clear();
    check_pvs_with_macros(config, &IndexMap::new(), ctx).await
}

async fn check_pvs_with_macros(
    config: &PVConfiguration,
    macros: &IndexMap<String, String>,
    ctx: &CheckContext,
) -> (Severity, Vec<CheckResult>) {
    let ids: Vec<String> = config
        .checklist
        .iter()
        .flat_map(|item| item.ids.iter())
        .map(|id| expand_macros(macros, id))
        .collect();
    let warmed = ctx.cache.warm(ids.iter().map(String::as_str));
    info!(warmed, requested = ids.len(), "endpoint cache warmed");

    let prepared = prepare_pvs(config, macros, &ctx.cache);
    execute(prepared, ctx).await
}

/// Check every device attribute of the configuration.
pub async fn check_device(config: &DeviceConfiguration, ctx: &CheckContext) -> (Severity, Vec<CheckResult>) {
    ctx.data.clear();
    check_device_with_macros(config, &IndexMap::new(), ctx).await
}

async fn check_device_with_macros(
    config: &DeviceConfiguration,
    macros: &IndexMap<String, String>,
    ctx: &CheckContext,
) -> (Severity, Vec<CheckResult>) {
    let prepared = prepare_devices(config, macros, ctx.directory.as_deref());
    execute(prepared, ctx).await
}

/// Compare prepared units concurrently. Units that failed preparation
/// contribute their error's result in place.
pub async fn execute(prepared: Vec<PrepareOutcome>, ctx: &CheckContext) -> (Severity, Vec<CheckResult>) {
    let mut units: Vec<Unit> = prepared
        .into_iter()
        .map(|outcome| match outcome {
            Ok(prepared) => Unit::Ready(prepared),
            Err(e) => {
                warn!(error = %e, "preparation failed");
                Unit::Failed(e.to_result())
            }
        })
        .collect();

    let results: Vec<CheckResult> = join_all(units.iter_mut().map(|unit| async move {
        match unit {
            Unit::Ready(prepared) => prepared.compare(ctx).await,
            Unit::Failed(result) => result.clone(),
        }
    }))
    .await;

    let overall = Severity::worst(results.iter().map(|r| r.severity));
    (overall, results)
}

pub async fn run(config: &Configuration, ctx: &CheckContext) -> ConfigurationReport {
    ctx.data.clear();
    run_with_macros(config, &IndexMap::new(), ctx).await
}

// Boxed: groups recurse.
fn run_with_macros<'a>(
    config: &'a Configuration,
    macros: &'a IndexMap<String, String>,
    ctx: &'a CheckContext,
) -> BoxFuture<'a, ConfigurationReport> {
    let label = config.name().unwrap_or(config.kind_name());
    let span = info_span!("checkout", run_id = %ctx.run_id, config = label);
    async move {
        let (severity, results, children) = match config {
            Configuration::PVConfiguration(pvs) => {
                let (severity, results) = check_pvs_with_macros(pvs, macros, ctx).await;
                (severity, results, Vec::new())
            }
            Configuration::DeviceConfiguration(devices) => {
                let (severity, results) = check_device_with_macros(devices, macros, ctx).await;
                (severity, results, Vec::new())
            }
            Configuration::ConfigurationGroup(group) => {
                let (severity, children) = run_group(group, macros, ctx).await;
                (severity, Vec::new(), children)
            }
        };
        info!(
            %severity,
            results = results.len(),
            children = children.len(),
            "configuration checked"
        );
        ConfigurationReport {
            name: config.name().map(str::to_string),
            severity,
            results,
            children,
        }
    }
    .instrument(span)
    .boxed()
}

/// Children run in order; the group's mode folds their severities.
async fn run_group(
    group: &ConfigurationGroup,
    macros: &IndexMap<String, String>,
    ctx: &CheckContext,
) -> (Severity, Vec<ConfigurationReport>) {
    let scoped = group.scoped_macros(macros);
    let mut children = Vec::with_capacity(group.configs.len());
    for config in &group.configs {
        children.push(run_with_macros(config, &scoped, ctx).await);
    }
    let severity = group.mode.reduce(children.iter().map(|c| c.severity));
    debug!(mode = %group.mode, %severity, "group reduced");
    (severity, children)
}

/// Run every top-level configuration of a document in order, applying its
/// macros. Groups run their nested configurations themselves.
pub async fn run_file(file: &ConfigurationFile, ctx: &CheckContext) -> FileReport {
    ctx.data.clear();
    let mut configs = Vec::with_capacity(file.configs.len());
    for config in &file.configs {
        configs.push(run_with_macros(config, &file.macros, ctx).await);
    }
    FileReport {
        run_id: ctx.run_id,
        severity: Severity::worst(configs.iter().map(|c| c.severity)),
        configs,
    }
}

/// Load then run a document. A malformed document fails before any
/// comparison starts.
pub async fn run_path(path: &Path, ctx: &CheckContext) -> Result<FileReport> {
    let file = ConfigurationFile::from_filename(path)?;
    Ok(run_file(&file, ctx).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentifierAndComparison;
    use crate::signal::mock::{MockBehavior, MockDevice, MockDirectory, MockSignalFactory};
    use comparisons::{GroupResultMode, ReduceMethod, Value};

    fn context(factory: MockSignalFactory) -> CheckContext {
        CheckContext::new(Arc::new(EndpointCache::new(Arc::new(factory))))
    }

    fn pvs(ids: &[&str], comparison: Comparison) -> PVConfiguration {
        PVConfiguration {
            name: Some("pvs".into()),
            checklist: vec![IdentifierAndComparison {
                name: None,
                ids: ids.iter().map(|s| s.to_string()).collect(),
                comparisons: vec![comparison],
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn empty_configuration_is_success() {
        let ctx = context(MockSignalFactory::new(MockBehavior::Value(Value::Int(1))));
        let (severity, results) = check_pvs(&PVConfiguration::default(), &ctx).await;
        assert_eq!(severity, Severity::Success);
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn failed_preparation_counts_toward_overall() {
        let ctx = context(
            MockSignalFactory::new(MockBehavior::Value(Value::Int(1))).rejecting("PV:BAD"),
        );
        let config = pvs(&["PV:A", "PV:BAD"], Comparison::equals(1));
        let (severity, results) = check_pvs(&config, &ctx).await;
        assert_eq!(severity, Severity::Error);
        assert!(results[0].is_success());
        assert!(results[1]
            .reason
            .as_deref()
            .is_some_and(|r| r.starts_with("Failed to prepare comparison Equals for PV:BAD")));
    }

    #[tokio::test]
    async fn read_failure_is_internal_error() {
        let ctx = context(
            MockSignalFactory::new(MockBehavior::Value(Value::Int(1)))
                .with("PV:B", MockBehavior::ReadFails("boom".into())),
        );
        let (severity, results) = check_pvs(&pvs(&["PV:A", "PV:B"], Comparison::equals(1)), &ctx).await;
        assert_eq!(severity, Severity::InternalError);
        assert_eq!(results[1].severity, Severity::InternalError);
    }

    #[tokio::test(start_paused = true)]
    async fn sampled_values_are_reduced() {
        let samples = vec![Value::Int(1), Value::Int(3), Value::Int(5)];
        let ctx = context(MockSignalFactory::new(MockBehavior::Samples(samples)));
        let comparison = Comparison::equals(5.0).with_settings(|s| {
            s.reduce_period = Some(0.2);
            s.reduce_method = ReduceMethod::Max;
        });
        let (severity, results) = check_pvs(&pvs(&["PV:S"], comparison), &ctx).await;
        assert_eq!(severity, Severity::Success, "{results:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn comparisons_on_one_pv_share_sampled_reads() {
        let sampled = |value: i32| {
            Comparison::equals(value).with_settings(|s| s.reduce_period = Some(1.0))
        };
        let reads = |comparisons: Vec<Comparison>| async move {
            let factory = Arc::new(MockSignalFactory::new(MockBehavior::Value(Value::Int(1))));
            let ctx = CheckContext::new(Arc::new(EndpointCache::new(factory.clone())));
            let config = PVConfiguration {
                checklist: vec![IdentifierAndComparison {
                    name: None,
                    ids: vec!["PV:S".into()],
                    comparisons,
                }],
                ..Default::default()
            };
            let (_, results) = check_pvs(&config, &ctx).await;
            (results, factory.created()[0].read_count())
        };

        let (_, single) = reads(vec![sampled(1)]).await;
        assert!(single > 1, "{single} reads");

        let (results, shared) = reads(vec![sampled(1), sampled(2), sampled(3)]).await;
        assert_eq!(shared, single);
        let severities: Vec<Severity> = results.iter().map(|r| r.severity).collect();
        assert_eq!(severities, vec![Severity::Success, Severity::Error, Severity::Error]);
    }

    #[tokio::test]
    async fn data_is_read_again_on_the_next_run() {
        let factory = Arc::new(MockSignalFactory::new(MockBehavior::Value(Value::Int(1))));
        let ctx = CheckContext::new(Arc::new(EndpointCache::new(factory.clone())));
        let config = pvs(&["PV:A"], Comparison::equals(1));

        check_pvs(&config, &ctx).await;
        check_pvs(&config, &ctx).await;

        assert_eq!(factory.created()[0].read_count(), 2);
        assert_eq!(ctx.data.len(), 1);
    }

    fn group(mode: GroupResultMode) -> Configuration {
        Configuration::from(ConfigurationGroup {
            name: Some("either".into()),
            mode,
            configs: vec![
                Configuration::from(pvs(&["PV:GOOD"], Comparison::equals(1))),
                Configuration::from(pvs(&["PV:OFF"], Comparison::equals(1))),
            ],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn group_mode_folds_child_severities() {
        let factory = || {
            MockSignalFactory::new(MockBehavior::Value(Value::Int(1)))
                .with("PV:OFF", MockBehavior::Value(Value::Int(0)))
        };

        let all = run(&group(GroupResultMode::All), &context(factory())).await;
        assert_eq!(all.severity, Severity::Error);
        assert!(all.results.is_empty());
        let children: Vec<Severity> = all.children.iter().map(|c| c.severity).collect();
        assert_eq!(children, vec![Severity::Success, Severity::Error]);

        let any = run(&group(GroupResultMode::Any), &context(factory())).await;
        assert_eq!(any.severity, Severity::Success);
        assert_eq!(any.name.as_deref(), Some("either"));
        assert_eq!(any.children.len(), 2);
    }

    #[tokio::test]
    async fn empty_group_is_success() {
        let ctx = context(MockSignalFactory::new(MockBehavior::NeverConnects));
        for mode in GroupResultMode::ALL {
            let empty = Configuration::from(ConfigurationGroup {
                mode,
                ..Default::default()
            });
            let report = run(&empty, &ctx).await;
            assert_eq!(report.severity, Severity::Success, "{mode}");
        }
    }

    #[tokio::test]
    async fn device_run_reports_by_attribute() {
        let directory = MockDirectory::new().with_device(
            MockDevice::new("motor")
                .with_attr("velo", MockBehavior::Value(Value::Float(2.0)))
                .with_attr("acc", MockBehavior::Value(Value::Float(9.0))),
        );
        let ctx = context(MockSignalFactory::new(MockBehavior::NeverConnects))
            .with_directory(Arc::new(directory));
        let config = DeviceConfiguration {
            name: Some("motors".into()),
            devices: vec!["motor".into()],
            checklist: vec![IdentifierAndComparison {
                name: Some("speed".into()),
                ids: vec!["velo".into(), "acc".into()],
                comparisons: vec![Comparison::equals(2.0)],
            }],
            ..Default::default()
        };
        let report = run(&Configuration::from(config), &ctx).await;
        assert_eq!(report.name.as_deref(), Some("motors"));
        assert_eq!(report.severity, Severity::Error);
        assert!(report.results[0].is_success());
        assert!(!report.results[1].is_success());
    }

    #[tokio::test]
    async fn status_log_records_each_comparison() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.status_log.enabled = true;
        settings.status_log.path = dir.path().join("status.jsonl");
        let cache = EndpointCache::new(Arc::new(MockSignalFactory::new(MockBehavior::Value(
            Value::Int(1),
        ))));
        let ctx = CheckContext::with_settings(Arc::new(cache), settings);

        check_pvs(&pvs(&["PV:A", "PV:B"], Comparison::equals(1)), &ctx).await;

        let text = std::fs::read_to_string(dir.path().join("status.jsonl")).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains(&ctx.run_id().to_string()));
    }
}
