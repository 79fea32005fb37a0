//! Diagnostic settings
//!
//! Settings hang off an arbitrary target resource and are addressed by the
//! composite `{target_resource_id}|{name}` identity. Creation and deletion
//! both take a while to become visible to reads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{non_empty, nullable};
use crate::bag::{BlockReader, BlockWriter, DefaultValue, Field, FieldKind, Schema};
use crate::error::MapError;
use crate::identity::{DiagnosticSettingId, IdentityError};
use crate::reconciler::{ResourceKind, Scope};
use crate::variant::{resolve_for_write, VariantGroup};

const DESTINATION_TYPES: &[&str] = &["AzureDiagnostics", "Dedicated"];

/// Any one of these is enough for the service to accept the setting
const DESTINATIONS: &[&str] = &[
    "log_analytics_workspace_id",
    "storage_account_id",
    "eventhub_authorization_rule_id",
    "partner_solution_id",
];

static RETENTION_POLICY_SCHEMA: Schema = Schema::new(
    "retention_policy",
    &[
        Field::required("enabled", FieldKind::Bool),
        Field::optional("days", FieldKind::Int),
    ],
);

static ENABLED_LOG_SCHEMA: Schema = Schema::new(
    "enabled_log",
    &[
        Field::optional("category", FieldKind::String),
        Field::optional("category_group", FieldKind::String),
        Field::optional("retention_policy", FieldKind::BlockList(&RETENTION_POLICY_SCHEMA)).max_items(1),
    ],
);

static METRIC_SCHEMA: Schema = Schema::new(
    "metric",
    &[
        Field::required("category", FieldKind::String),
        Field::optional("enabled", FieldKind::Bool).with_default(DefaultValue::Bool(true)),
        Field::optional("retention_policy", FieldKind::BlockList(&RETENTION_POLICY_SCHEMA)).max_items(1),
    ],
);

pub static DIAGNOSTIC_SETTING_SCHEMA: Schema = Schema::new(
    "azurerm_monitor_diagnostic_setting",
    &[
        Field::required("name", FieldKind::String),
        Field::required("target_resource_id", FieldKind::String),
        Field::optional("log_analytics_workspace_id", FieldKind::String),
        Field::optional("storage_account_id", FieldKind::String),
        Field::optional("eventhub_authorization_rule_id", FieldKind::String),
        Field::optional("eventhub_name", FieldKind::String),
        Field::optional("partner_solution_id", FieldKind::String),
        Field::optional("log_analytics_destination_type", FieldKind::String).one_of(DESTINATION_TYPES),
        Field::optional("enabled_log", FieldKind::BlockSet(&ENABLED_LOG_SCHEMA)),
        Field::optional("metric", FieldKind::BlockSet(&METRIC_SCHEMA)),
    ],
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub enabled: bool,
    #[serde(default)]
    pub days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_group: Option<String>,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_policy: Option<RetentionPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSettings {
    #[serde(default, deserialize_with = "nullable")]
    pub category: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_policy: Option<RetentionPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSettingProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_hub_authorization_rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_hub_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace_partner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_analytics_destination_type: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub logs: Vec<LogSettings>,
    #[serde(default, deserialize_with = "nullable")]
    pub metrics: Vec<MetricSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticSetting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub properties: DiagnosticSettingProperties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogSelector {
    Category,
    CategoryGroup,
}

const LOG_SELECTORS: [VariantGroup<LogSelector>; 2] = [
    VariantGroup::new(LogSelector::Category, "category"),
    VariantGroup::new(LogSelector::CategoryGroup, "category_group"),
];

fn expand_retention(block: &BlockReader<'_>) -> Result<Option<RetentionPolicy>, MapError> {
    Ok(match block.block("retention_policy")? {
        Some(policy) => Some(RetentionPolicy {
            enabled: policy.bool("enabled")?,
            days: policy.int("days")?,
        }),
        None => None,
    })
}

fn flatten_retention(
    w: &BlockWriter,
    policy: Option<RetentionPolicy>,
) -> Result<Option<Map<String, Value>>, MapError> {
    Ok(match policy {
        Some(policy) => {
            let mut pw = w.nested("retention_policy")?;
            pw.bool("enabled", policy.enabled)?.int("days", policy.days)?;
            Some(pw.finish())
        }
        None => None,
    })
}

fn expand_logs(config: &BlockReader<'_>) -> Result<Vec<LogSettings>, MapError> {
    let mut logs = Vec::new();
    for block in config.blocks("enabled_log")? {
        let (category, category_group) = match resolve_for_write(&block, &LOG_SELECTORS)? {
            LogSelector::Category => (Some(block.string("category")?), None),
            LogSelector::CategoryGroup => (None, Some(block.string("category_group")?)),
        };
        logs.push(LogSettings {
            category,
            category_group,
            enabled: true,
            retention_policy: expand_retention(&block)?,
        });
    }
    Ok(logs)
}

fn expand_metrics(config: &BlockReader<'_>) -> Result<Vec<MetricSettings>, MapError> {
    let mut metrics = Vec::new();
    for block in config.blocks("metric")? {
        metrics.push(MetricSettings {
            category: block.string("category")?,
            enabled: block.bool("enabled")?,
            retention_policy: expand_retention(&block)?,
        });
    }
    Ok(metrics)
}

pub struct DiagnosticSettingKind;

impl ResourceKind for DiagnosticSettingKind {
    type Id = DiagnosticSettingId;
    type Model = DiagnosticSetting;
    type Shape = ();

    const TYPE_NAME: &'static str = "azurerm_monitor_diagnostic_setting";
    const API_VERSION: &'static str = "2021-05-01-preview";
    const SCHEMA: &'static Schema = &DIAGNOSTIC_SETTING_SCHEMA;
    const WAITS_FOR_VISIBILITY: bool = true;
    const WAITS_FOR_DELETION: bool = true;

    fn id_from_config(_scope: &Scope, config: &BlockReader<'_>) -> Result<DiagnosticSettingId, MapError> {
        Ok(DiagnosticSettingId::new(
            config.string("target_resource_id")?,
            config.string("name")?,
        )?)
    }

    fn parse_id(raw: &str) -> Result<DiagnosticSettingId, IdentityError> {
        DiagnosticSettingId::decode(raw)
    }

    fn expand(config: &BlockReader<'_>, _shape: ()) -> Result<DiagnosticSetting, MapError> {
        let mut has_destination = false;
        for field in DESTINATIONS {
            has_destination |= config.is_populated(field)?;
        }
        if !has_destination {
            return Err(MapError::invalid(
                "log_analytics_workspace_id",
                format!("at least one of {} must be set", DESTINATIONS.join(", ")),
            ));
        }

        let logs = expand_logs(config)?;
        let metrics = expand_metrics(config)?;
        if logs.is_empty() && metrics.is_empty() {
            return Err(MapError::invalid(
                "enabled_log",
                "at least one enabled_log or metric block must be set",
            ));
        }

        Ok(DiagnosticSetting {
            id: None,
            properties: DiagnosticSettingProperties {
                workspace_id: non_empty(config.string("log_analytics_workspace_id")?),
                storage_account_id: non_empty(config.string("storage_account_id")?),
                event_hub_authorization_rule_id: non_empty(
                    config.string("eventhub_authorization_rule_id")?,
                ),
                event_hub_name: non_empty(config.string("eventhub_name")?),
                marketplace_partner_id: non_empty(config.string("partner_solution_id")?),
                log_analytics_destination_type: non_empty(
                    config.string("log_analytics_destination_type")?,
                ),
                logs,
                metrics,
            },
        })
    }

    fn flatten(id: &DiagnosticSettingId, model: &DiagnosticSetting) -> Result<Map<String, Value>, MapError> {
        let props = &model.properties;
        let mut w = BlockWriter::new(&DIAGNOSTIC_SETTING_SCHEMA);

        // the service reports every category the target supports; disabled
        // log categories are not part of the configuration
        let mut logs = Vec::new();
        for log in props.logs.iter().filter(|log| log.enabled) {
            let mut lw = w.nested("enabled_log")?;
            let retention = flatten_retention(&lw, log.retention_policy)?;
            lw.opt_string("category", log.category.as_deref())?
                .opt_string("category_group", log.category_group.as_deref())?
                .block("retention_policy", retention)?;
            logs.push(lw.finish());
        }

        let mut metrics = Vec::new();
        for metric in &props.metrics {
            let mut mw = w.nested("metric")?;
            let retention = flatten_retention(&mw, metric.retention_policy)?;
            mw.string("category", metric.category.as_str())?
                .bool("enabled", metric.enabled)?
                .block("retention_policy", retention)?;
            metrics.push(mw.finish());
        }

        w.string("name", id.name.as_str())?
            .string("target_resource_id", id.target_resource_id.as_str())?
            .opt_string("log_analytics_workspace_id", props.workspace_id.as_deref())?
            .opt_string("storage_account_id", props.storage_account_id.as_deref())?
            .opt_string(
                "eventhub_authorization_rule_id",
                props.event_hub_authorization_rule_id.as_deref(),
            )?
            .opt_string("eventhub_name", props.event_hub_name.as_deref())?
            .opt_string("partner_solution_id", props.marketplace_partner_id.as_deref())?
            .opt_string(
                "log_analytics_destination_type",
                props.log_analytics_destination_type.as_deref(),
            )?
            .blocks("enabled_log", logs)?
            .blocks("metric", metrics)?;
        Ok(w.finish())
    }
}
