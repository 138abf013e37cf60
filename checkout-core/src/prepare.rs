// src/prepare.rs
//
// Binding configurations to live signals. Preparation is synchronous and
// total: every (identifier, comparison) unit yields either a prepared
// comparison or the error that stopped it, in checklist order.

use futures::future::FutureExt;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{debug, info};

use comparisons::{CheckResult, Comparison, Severity, Value};

use crate::cache::{DataKey, EndpointCache};
use crate::check::CheckContext;
use crate::config::{expand_macros, Configuration, DeviceConfiguration, PVConfiguration};
use crate::error::{DirectoryError, PrepareFailure, PreparedComparisonError};
use crate::settings::secs_to_duration;
use crate::signal::{Device, DeviceDirectory, Signal};

pub type PrepareOutcome = Result<PreparedComparison, PreparedComparisonError>;

/// One comparison bound to the signal it reads.
pub struct PreparedComparison {
    pub identifier: String,
    pub comparison: Comparison,
    pub name: Option<String>,
    pub device: Option<Arc<dyn Device>>,
    pub signal: Option<Arc<dyn Signal>>,
    pub result: CheckResult,
    /// Last value acquired, reduced when sampling.
    pub data: Option<Value>,
}

impl fmt::Debug for PreparedComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedComparison")
            .field("identifier", &self.identifier)
            .field("comparison", &self.comparison)
            .field("name", &self.name)
            .field("device", &self.device.as_ref().map(|d| d.name().to_string()))
            .field("signal", &self.signal.as_ref().map(|s| s.name().to_string()))
            .field("result", &self.result)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AcquireError {
    Timeout(String),
    Failed(String),
}

impl PreparedComparison {
    pub fn new(
        identifier: impl Into<String>,
        comparison: Comparison,
        name: Option<String>,
        signal: Option<Arc<dyn Signal>>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            comparison,
            name,
            device: None,
            signal,
            result: CheckResult::incomplete(),
            data: None,
        }
    }

    pub fn with_device(mut self, device: Arc<dyn Device>) -> Self {
        self.device = Some(device);
        self
    }

    /// Connect, acquire a value and run the comparison against it.
    ///
    /// Never fails: transport trouble becomes a result at `if_disconnected`
    /// (timeouts) or `internal_error` (everything else).
    pub async fn compare(&mut self, ctx: &CheckContext) -> CheckResult {
        ctx.log_started(&self.identifier, &self.comparison);
        let result = self.connect_and_compare(ctx).await;
        info!(
            identifier = %self.identifier,
            comparison = %self.comparison,
            severity = %result.severity,
            "comparison finished"
        );
        ctx.log_finished(&self.identifier, &self.comparison, &result);
        self.result = result.clone();
        result
    }

    async fn connect_and_compare(&mut self, ctx: &CheckContext) -> CheckResult {
        let Some(signal) = self.signal.clone() else {
            return CheckResult::new(
                Severity::InternalError,
                format!(
                    "No signal bound to {} for comparison {}",
                    self.identifier, self.comparison
                ),
            );
        };
        let if_disconnected = self.comparison.settings().if_disconnected;
        let window = self
            .comparison
            .settings()
            .timeout
            .map(secs_to_duration)
            .unwrap_or_else(|| ctx.settings.connection.timeout());

        match timeout(window, signal.connect(window)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if !e.is_timeout() => {
                return CheckResult::new(
                    Severity::InternalError,
                    format!(
                        "Connecting to {} for comparison {} raised {e}",
                        self.identifier, self.comparison
                    ),
                );
            }
            _ => {
                return CheckResult::new(
                    if_disconnected,
                    format!(
                        "Unable to connect to {} for comparison {} within {:?}",
                        self.identifier, self.comparison, window
                    ),
                );
            }
        }

        match self.acquire(signal, window, ctx).await {
            Ok(value) => {
                let result = self.comparison.compare(Some(&value));
                self.data = Some(value);
                result
            }
            Err(AcquireError::Timeout(detail)) => CheckResult::new(
                if_disconnected,
                format!(
                    "Unable to retrieve data from {} for comparison {}: {detail}",
                    self.identifier, self.comparison
                ),
            ),
            Err(AcquireError::Failed(detail)) => CheckResult::new(
                Severity::InternalError,
                format!(
                    "Getting data from {} for comparison {} raised {detail}",
                    self.identifier, self.comparison
                ),
            ),
        }
    }

    /// The value this comparison judges, shared with every other comparison
    /// of the run that reads the same identifier the same way.
    async fn acquire(
        &self,
        signal: Arc<dyn Signal>,
        window: Duration,
        ctx: &CheckContext,
    ) -> Result<Value, AcquireError> {
        let key = DataKey::new(&self.identifier, self.comparison.settings());
        let interval = ctx.settings.sampling.interval();
        let acquisition = ctx.data.get_or_start(key, |key| {
            collect_value(signal, key.clone(), window, interval).boxed()
        });
        acquisition.await
    }
}

/// A single read, or samples collected over the key's period and reduced.
async fn collect_value(
    signal: Arc<dyn Signal>,
    key: DataKey,
    window: Duration,
    interval: Duration,
) -> Result<Value, AcquireError> {
    let Some(period) = key.period() else {
        return read_once(signal.as_ref(), key.string, window).await;
    };

    let deadline = Instant::now() + secs_to_duration(period);
    let mut samples = Vec::new();
    loop {
        let value = read_once(signal.as_ref(), false, window).await?;
        let sample = value.as_f64().ok_or_else(|| {
            AcquireError::Failed(format!("non-numeric sample {value} ({})", value.type_name()))
        })?;
        samples.push(sample);
        if Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(interval).await;
    }
    debug!(identifier = %key.identifier, samples = samples.len(), "sampling done");
    key.method
        .reduce(&samples)
        .map(Value::Float)
        .ok_or_else(|| AcquireError::Failed("no samples collected".into()))
}

async fn read_once(
    signal: &dyn Signal,
    as_string: bool,
    window: Duration,
) -> Result<Value, AcquireError> {
    match timeout(window, signal.read(as_string)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if e.is_timeout() => Err(AcquireError::Timeout(e.to_string())),
        Ok(Err(e)) => Err(AcquireError::Failed(e.to_string())),
        Err(_) => Err(AcquireError::Timeout(format!("no value within {window:?}"))),
    }
}

// ---------- preparation ----------

pub fn prepare(
    config: &Configuration,
    cache: &EndpointCache,
    directory: Option<&dyn DeviceDirectory>,
) -> Vec<PrepareOutcome> {
    prepare_with_macros(config, &IndexMap::new(), cache, directory)
}

pub fn prepare_with_macros(
    config: &Configuration,
    macros: &IndexMap<String, String>,
    cache: &EndpointCache,
    directory: Option<&dyn DeviceDirectory>,
) -> Vec<PrepareOutcome> {
    match config {
        Configuration::PVConfiguration(pvs) => prepare_pvs(pvs, macros, cache),
        Configuration::DeviceConfiguration(devices) => prepare_devices(devices, macros, directory),
        Configuration::ConfigurationGroup(group) => {
            let scoped = group.scoped_macros(macros);
            group
                .configs
                .iter()
                .flat_map(|child| prepare_with_macros(child, &scoped, cache, directory))
                .collect()
        }
    }
}

/// Units in checklist order, then comparison order, then identifier order.
pub fn prepare_pvs(
    config: &PVConfiguration,
    macros: &IndexMap<String, String>,
    cache: &EndpointCache,
) -> Vec<PrepareOutcome> {
    let mut units = Vec::new();
    for item in &config.checklist {
        for comparison in &item.comparisons {
            for id in &item.ids {
                let identifier = expand_macros(macros, id);
                let unit = match cache.get(&identifier) {
                    Ok(signal) => Ok(PreparedComparison::new(
                        identifier,
                        comparison.clone(),
                        item.name.clone(),
                        Some(signal),
                    )),
                    Err(e) => Err(PreparedComparisonError {
                        identifier,
                        comparison: comparison.clone(),
                        name: item.name.clone(),
                        source: e.into(),
                    }),
                };
                units.push(unit);
            }
        }
    }
    units
}

/// Units per device (in order), then checklist, comparison and attribute.
///
/// A device that cannot be looked up fails every unit it would have produced.
pub fn prepare_devices(
    config: &DeviceConfiguration,
    macros: &IndexMap<String, String>,
    directory: Option<&dyn DeviceDirectory>,
) -> Vec<PrepareOutcome> {
    let mut units = Vec::new();
    for device_name in &config.devices {
        let device_name = expand_macros(macros, device_name);
        let device = match directory {
            Some(directory) => directory.device(&device_name),
            None => Err(DirectoryError::Unavailable),
        };
        if let Err(e) = &device {
            debug!(device = %device_name, error = %e, "device lookup failed");
        }

        for item in &config.checklist {
            for comparison in &item.comparisons {
                for attr in &item.ids {
                    let attr = expand_macros(macros, attr);
                    let identifier = format!("{device_name}.{attr}");
                    let failure = |source: PrepareFailure| PreparedComparisonError {
                        identifier: identifier.clone(),
                        comparison: comparison.clone(),
                        name: item.name.clone(),
                        source,
                    };
                    let unit = match &device {
                        Err(e) => Err(failure(e.clone().into())),
                        Ok(device) => match device.attribute(&attr) {
                            Some(signal) => Ok(PreparedComparison::new(
                                identifier.clone(),
                                comparison.clone(),
                                item.name.clone(),
                                Some(signal),
                            )
                            .with_device(Arc::clone(device))),
                            None => Err(failure(PrepareFailure::MissingAttribute {
                                device: device_name.clone(),
                                attr: attr.clone(),
                            })),
                        },
                    };
                    units.push(unit);
                }
            }
        }
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigurationGroup, IdentifierAndComparison};
    use crate::signal::mock::{MockBehavior, MockDevice, MockDirectory, MockSignalFactory};

    fn cache() -> EndpointCache {
        EndpointCache::new(Arc::new(
            MockSignalFactory::new(MockBehavior::Value(Value::Int(1))).rejecting("PV:BAD"),
        ))
    }

    fn pv_config() -> PVConfiguration {
        PVConfiguration {
            name: Some("pvs".into()),
            checklist: vec![
                IdentifierAndComparison {
                    name: Some("first".into()),
                    ids: vec!["PV:A".into(), "PV:BAD".into()],
                    comparisons: vec![Comparison::equals(1), Comparison::equals(2)],
                },
                IdentifierAndComparison {
                    name: None,
                    ids: vec!["${P}:C".into()],
                    comparisons: vec![Comparison::equals(3)],
                },
            ],
            ..Default::default()
        }
    }

    fn label(unit: &PrepareOutcome) -> String {
        match unit {
            Ok(p) => format!("ok {} {}", p.identifier, p.comparison),
            Err(e) => format!("err {} {}", e.identifier, e.comparison),
        }
    }

    #[test]
    fn pv_units_follow_checklist_comparison_identifier_order() {
        let macros = IndexMap::from([("P".to_string(), "PV".to_string())]);
        let units = prepare_pvs(&pv_config(), &macros, &cache());
        let labels: Vec<String> = units.iter().map(label).collect();
        assert_eq!(
            labels,
            vec![
                "ok PV:A Equals(== 1)",
                "err PV:BAD Equals(== 1)",
                "ok PV:A Equals(== 2)",
                "err PV:BAD Equals(== 2)",
                "ok PV:C Equals(== 3)",
            ]
        );
    }

    #[test]
    fn device_units_report_missing_attributes_and_devices() {
        let directory = MockDirectory::new()
            .with_device(MockDevice::new("motor").with_attr("velo", MockBehavior::Value(Value::Int(1))));
        let config = DeviceConfiguration {
            devices: vec!["motor".into(), "ghost".into()],
            checklist: vec![IdentifierAndComparison {
                name: None,
                ids: vec!["velo".into(), "acc".into()],
                comparisons: vec![Comparison::equals(1)],
            }],
            ..Default::default()
        };
        let units = prepare_devices(&config, &IndexMap::new(), Some(&directory));
        assert_eq!(units.len(), 4);
        assert_eq!(directory.lookups(), 2);

        let prepared = units[0].as_ref().unwrap();
        assert_eq!(prepared.identifier, "motor.velo");
        assert_eq!(prepared.device.as_ref().map(|d| d.name()), Some("motor"));

        let missing = units[1].as_ref().unwrap_err();
        assert!(matches!(missing.source, PrepareFailure::MissingAttribute { .. }));
        let ghost = units[2].as_ref().unwrap_err();
        assert_eq!(ghost.identifier, "ghost.velo");
        assert!(matches!(
            ghost.source,
            PrepareFailure::Directory(DirectoryError::NotFound(_))
        ));
    }

    #[test]
    fn devices_without_directory_fail_per_unit() {
        let config = DeviceConfiguration {
            devices: vec!["motor".into()],
            checklist: vec![IdentifierAndComparison {
                name: None,
                ids: vec!["velo".into()],
                comparisons: vec![Comparison::equals(1)],
            }],
            ..Default::default()
        };
        let units = prepare(&Configuration::from(config), &cache(), None);
        assert_eq!(units.len(), 1);
        assert!(units[0].as_ref().unwrap_err().to_string().contains("no device directory"));
    }

    #[test]
    fn group_units_use_the_nearest_values() {
        let inner = ConfigurationGroup {
            values: IndexMap::from([("P".to_string(), Value::from("INNER"))]),
            configs: vec![Configuration::from(PVConfiguration {
                checklist: vec![IdentifierAndComparison {
                    name: None,
                    ids: vec!["${P}:A".into(), "${N}:B".into()],
                    comparisons: vec![Comparison::equals(1)],
                }],
                ..Default::default()
            })],
            ..Default::default()
        };
        let outer = ConfigurationGroup {
            values: IndexMap::from([
                ("P".to_string(), Value::from("OUTER")),
                ("N".to_string(), Value::Int(7)),
            ]),
            configs: vec![Configuration::from(inner)],
            ..Default::default()
        };
        let macros = IndexMap::from([("P".to_string(), "FILE".to_string())]);

        let units = prepare_with_macros(&Configuration::from(outer), &macros, &cache(), None);
        let labels: Vec<String> = units.iter().map(label).collect();
        assert_eq!(labels, vec!["ok INNER:A Equals(== 1)", "ok 7:B Equals(== 1)"]);
    }

    #[tokio::test]
    async fn unbound_comparison_is_internal_error() {
        let ctx = CheckContext::new(Arc::new(cache()));
        let mut prepared = PreparedComparison::new("PV:X", Comparison::equals(1), None, None);

        let result = prepared.compare(&ctx).await;

        assert_eq!(result.severity, Severity::InternalError);
        let reason = result.reason.as_deref().unwrap_or_default();
        assert!(reason.contains("PV:X"), "{reason}");
        assert_eq!(prepared.result, result);
        assert!(prepared.data.is_none());
    }

    #[test]
    fn empty_configuration_prepares_nothing() {
        let units = prepare(&Configuration::from(PVConfiguration::default()), &cache(), None);
        assert!(units.is_empty());
    }
}
