// src/config.rs
//
// Checkout documents: configurations of PVs or devices, each with a
// checklist of identifiers and the comparisons to run against them, and
// groups nesting further configurations.
//
// Every document type rejects keys it does not know, so a misspelt field is a
// load error instead of a silently empty checklist.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use comparisons::{
    AnyComparison, AnyValue, Comparison, Equals, GroupResultMode, NotEquals, Range, Threshold,
    Value,
};

use crate::cache::EndpointCache;
use crate::prepare;
use crate::signal::DeviceDirectory;
use crate::tree::{Node, NodeMut, Walk};
use crate::walk_composite;

/// Identifiers checked against every comparison of the same entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentifierAndComparison {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comparisons: Vec<Comparison>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PVConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checklist: Vec<IdentifierAndComparison>,
}

/// Checklist ids are attribute names looked up on each device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checklist: Vec<IdentifierAndComparison>,
}

/// Configurations run together and judged as one.
///
/// `values` are visible to every configuration underneath as `${NAME}`
/// macros; the nearest group wins over enclosing groups and the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigurationGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configs: Vec<Configuration>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub values: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "GroupResultMode::is_default")]
    pub mode: GroupResultMode,
}

impl ConfigurationGroup {
    /// Depth-first, each group before its own configurations.
    pub fn walk_configs(&self) -> impl Iterator<Item = &Configuration> {
        walk_nested(&self.configs)
    }

    /// `outer` with this group's values layered on top, rendered as text.
    pub fn scoped_macros(&self, outer: &IndexMap<String, String>) -> IndexMap<String, String> {
        let mut scoped = outer.clone();
        for (name, value) in &self.values {
            scoped.insert(name.clone(), value.to_string());
        }
        scoped
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Configuration {
    DeviceConfiguration(DeviceConfiguration),
    PVConfiguration(PVConfiguration),
    ConfigurationGroup(ConfigurationGroup),
}

impl Configuration {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Configuration::DeviceConfiguration(_) => "DeviceConfiguration",
            Configuration::PVConfiguration(_) => "PVConfiguration",
            Configuration::ConfigurationGroup(_) => "ConfigurationGroup",
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Configuration::DeviceConfiguration(c) => c.name.as_deref(),
            Configuration::PVConfiguration(c) => c.name.as_deref(),
            Configuration::ConfigurationGroup(c) => c.name.as_deref(),
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            Configuration::DeviceConfiguration(c) => &c.tags,
            Configuration::PVConfiguration(c) => &c.tags,
            Configuration::ConfigurationGroup(c) => &c.tags,
        }
    }

    /// Groups hold configurations, not checklist entries, so theirs is empty.
    pub fn checklist(&self) -> &[IdentifierAndComparison] {
        match self {
            Configuration::DeviceConfiguration(c) => &c.checklist,
            Configuration::PVConfiguration(c) => &c.checklist,
            Configuration::ConfigurationGroup(_) => &[],
        }
    }

    fn inner(&self) -> &dyn Walk {
        match self {
            Configuration::DeviceConfiguration(c) => c,
            Configuration::PVConfiguration(c) => c,
            Configuration::ConfigurationGroup(c) => c,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Walk {
        match self {
            Configuration::DeviceConfiguration(c) => c,
            Configuration::PVConfiguration(c) => c,
            Configuration::ConfigurationGroup(c) => c,
        }
    }
}

fn walk_nested(configs: &[Configuration]) -> impl Iterator<Item = &Configuration> {
    let mut stack = vec![configs.iter()];
    std::iter::from_fn(move || {
        while let Some(level) = stack.last_mut() {
            match level.next() {
                Some(config) => {
                    if let Configuration::ConfigurationGroup(group) = config {
                        stack.push(group.configs.iter());
                    }
                    return Some(config);
                }
                None => {
                    stack.pop();
                }
            }
        }
        None
    })
}

impl From<PVConfiguration> for Configuration {
    fn from(config: PVConfiguration) -> Self {
        Configuration::PVConfiguration(config)
    }
}

impl From<DeviceConfiguration> for Configuration {
    fn from(config: DeviceConfiguration) -> Self {
        Configuration::DeviceConfiguration(config)
    }
}

impl From<ConfigurationGroup> for Configuration {
    fn from(config: ConfigurationGroup) -> Self {
        Configuration::ConfigurationGroup(config)
    }
}

/// A checkout document: versioned list of configurations plus `${NAME}`
/// macros substituted into identifiers and device names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigurationFile {
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub macros: IndexMap<String, String>,
    #[serde(default)]
    pub configs: Vec<Configuration>,
}

impl ConfigurationFile {
    pub fn new(configs: Vec<Configuration>) -> Self {
        Self {
            version: 0,
            macros: IndexMap::new(),
            configs,
        }
    }

    /// Every configuration, groups included, depth-first in declared order.
    pub fn walk_configs(&self) -> impl Iterator<Item = &Configuration> {
        walk_nested(&self.configs)
    }

    pub fn get_by_device<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DeviceConfiguration> {
        self.walk_configs().filter_map(move |config| match config {
            Configuration::DeviceConfiguration(c) if c.devices.iter().any(|d| d == name) => Some(c),
            _ => None,
        })
    }

    pub fn get_by_pv<'a>(&'a self, pv: &'a str) -> impl Iterator<Item = &'a PVConfiguration> {
        self.walk_configs().filter_map(move |config| match config {
            Configuration::PVConfiguration(c)
                if c.checklist.iter().any(|item| item.ids.iter().any(|id| id == pv)) =>
            {
                Some(c)
            }
            _ => None,
        })
    }

    /// Configurations sharing at least one tag; nothing when `tags` is empty.
    pub fn get_by_tag<'a>(&'a self, tags: &'a [&'a str]) -> impl Iterator<Item = &'a Configuration> {
        self.walk_configs().filter(move |config| {
            config.tags().iter().any(|tag| tags.contains(&tag.as_str()))
        })
    }

    /// Substitute `${NAME}` for every macro; unknown names stay verbatim.
    pub fn expand_macros(&self, text: &str) -> String {
        expand_macros(&self.macros, text)
    }

    /// Load a file, dispatching on extension: `.json` or YAML otherwise.
    pub fn from_filename(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_yaml_str(&text)
        };
        parsed.with_context(|| format!("parsing configuration file {}", path.display()))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// YAML goes through the JSON data model so both formats share one shape.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_yaml::from_str(text)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        Ok(serde_yaml::to_string(&value)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let text = if is_json { self.to_json()? } else { self.to_yaml()? };
        fs::write(path, text)
            .with_context(|| format!("writing configuration file {}", path.display()))
    }

    /// Prepare every configuration and report whether all units prepared.
    pub fn validate(
        &self,
        cache: &EndpointCache,
        directory: Option<&dyn DeviceDirectory>,
    ) -> (bool, String) {
        let failures: usize = self
            .configs
            .iter()
            .map(|config| {
                prepare::prepare_with_macros(config, &self.macros, cache, directory)
                    .iter()
                    .filter(|unit| unit.is_err())
                    .count()
            })
            .sum();
        if failures > 0 {
            tracing::debug!(failures, "configuration file failed validation");
            return (false, format!("Failed to prepare {failures} steps"));
        }
        (true, String::new())
    }
}

pub fn expand_macros(macros: &IndexMap<String, String>, text: &str) -> String {
    if macros.is_empty() || !text.contains("${") {
        return text.to_string();
    }
    let mut out = text.to_string();
    for (name, value) in macros {
        out = out.replace(&format!("${{{name}}}"), value);
    }
    out
}

// ----------------- Tree walking -----------------

walk_composite!(Equals {
    ..settings { description, invert, reduce_period, reduce_method, string, severity_on_failure, if_disconnected, timeout },
    value, rtol, atol
});
walk_composite!(NotEquals {
    ..settings { description, invert, reduce_period, reduce_method, string, severity_on_failure, if_disconnected, timeout },
    value, rtol, atol
});
walk_composite!(AnyValue {
    ..settings { description, invert, reduce_period, reduce_method, string, severity_on_failure, if_disconnected, timeout },
    values
});
walk_composite!(AnyComparison {
    ..settings { description, invert, reduce_period, reduce_method, string, severity_on_failure, if_disconnected, timeout },
    comparisons
});
walk_composite!(Threshold {
    ..settings { description, invert, reduce_period, reduce_method, string, severity_on_failure, if_disconnected, timeout },
    value
});
walk_composite!(Range {
    ..settings { description, invert, reduce_period, reduce_method, string, severity_on_failure, if_disconnected, timeout },
    low, high, warn_low, warn_high, inclusive
});
walk_composite!(IdentifierAndComparison { name, ids, comparisons });
walk_composite!(PVConfiguration { name, description, tags, checklist });
walk_composite!(DeviceConfiguration { name, description, tags, devices, checklist });
walk_composite!(ConfigurationGroup { name, description, tags, configs, values, mode });
walk_composite!(ConfigurationFile { version, macros, configs });

fn comparison_inner(comparison: &Comparison) -> &dyn Walk {
    match comparison {
        Comparison::Equals(c) => c,
        Comparison::NotEquals(c) => c,
        Comparison::AnyValue(c) => c,
        Comparison::AnyComparison(c) => c,
        Comparison::Greater(c)
        | Comparison::GreaterOrEqual(c)
        | Comparison::Less(c)
        | Comparison::LessOrEqual(c) => c,
        Comparison::Range(c) => c,
    }
}

fn comparison_inner_mut(comparison: &mut Comparison) -> &mut dyn Walk {
    match comparison {
        Comparison::Equals(c) => c,
        Comparison::NotEquals(c) => c,
        Comparison::AnyValue(c) => c,
        Comparison::AnyComparison(c) => c,
        Comparison::Greater(c)
        | Comparison::GreaterOrEqual(c)
        | Comparison::Less(c)
        | Comparison::LessOrEqual(c) => c,
        Comparison::Range(c) => c,
    }
}

// Union types are transparent: paths step straight into the payload.
impl Walk for Comparison {
    fn type_name(&self) -> &'static str {
        comparison_inner(self).type_name()
    }

    fn node(&self) -> Node<'_> {
        comparison_inner(self).node()
    }

    fn node_mut(&mut self) -> NodeMut<'_> {
        comparison_inner_mut(self).node_mut()
    }
}

impl Walk for Configuration {
    fn type_name(&self) -> &'static str {
        self.inner().type_name()
    }

    fn node(&self) -> Node<'_> {
        self.inner().node()
    }

    fn node_mut(&mut self) -> NodeMut<'_> {
        self.inner_mut().node_mut()
    }
}
