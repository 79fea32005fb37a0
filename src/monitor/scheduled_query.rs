//! Scheduled query rules
//!
//! A rule either raises alerts from a log query (`trigger` block) or turns
//! log records into a metric (`criteria` block). The API accepts both action
//! shapes on any rule, so no persisted shape is pinned on update.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::numeric::{format_decimal, parse_bool, parse_decimal};
use super::{expand_dimensions, flatten_dimensions, non_empty, nullable, Dimension, DIMENSION_SCHEMA};
use crate::bag::{BlockReader, BlockWriter, DefaultValue, Field, FieldKind, Schema};
use crate::error::MapError;
use crate::identity::{IdentityError, ResourceId};
use crate::reconciler::{ResourceKind, Scope};
use crate::variant::{resolve_for_write, Tagged, VariantGroup};

pub const RESOURCE_TYPE: &str = "scheduledQueryRules";

const ALERTING_ODATA_TYPE: &str = "Microsoft.WindowsAzure.Management.Monitoring.Alerts.Models.Microsoft.AppInsights.Nexus.DataContracts.Resources.ScheduledQueryRules.AlertingAction";
const LOG_TO_METRIC_ODATA_TYPE: &str = "Microsoft.WindowsAzure.Management.Monitoring.Alerts.Models.Microsoft.AppInsights.Nexus.DataContracts.Resources.ScheduledQueryRules.LogToMetricAction";

const CONDITION_OPERATORS: &[&str] = &["GreaterThan", "LessThan", "Equal"];
const METRIC_TRIGGER_TYPES: &[&str] = &["Consecutive", "Total"];
const QUERY_TYPES: &[&str] = &["ResultCount"];

// ============================================================================
// Config schema
// ============================================================================

static METRIC_TRIGGER_SCHEMA: Schema = Schema::new(
    "metric_trigger",
    &[
        Field::required("operator", FieldKind::String).one_of(CONDITION_OPERATORS),
        Field::required("threshold", FieldKind::Float),
        Field::required("metric_trigger_type", FieldKind::String).one_of(METRIC_TRIGGER_TYPES),
        Field::optional("metric_column", FieldKind::String),
    ],
);

static TRIGGER_SCHEMA: Schema = Schema::new(
    "trigger",
    &[
        Field::required("operator", FieldKind::String).one_of(CONDITION_OPERATORS),
        Field::required("threshold", FieldKind::Float),
        Field::optional("metric_trigger", FieldKind::BlockList(&METRIC_TRIGGER_SCHEMA)).max_items(1),
    ],
);

static NOTIFICATION_SCHEMA: Schema = Schema::new(
    "action",
    &[
        Field::optional("action_group", FieldKind::StringSet),
        Field::optional("email_subject", FieldKind::String),
        Field::optional("custom_webhook_payload", FieldKind::String),
    ],
);

static CRITERIA_SCHEMA: Schema = Schema::new(
    "criteria",
    &[
        Field::required("metric_name", FieldKind::String),
        Field::optional("dimension", FieldKind::BlockList(&DIMENSION_SCHEMA)),
    ],
);

pub static SCHEDULED_QUERY_RULE_SCHEMA: Schema = Schema::new(
    "azurerm_monitor_scheduled_query_rule",
    &[
        Field::required("name", FieldKind::String),
        Field::required("resource_group_name", FieldKind::String),
        Field::required("location", FieldKind::String),
        Field::required("data_source_id", FieldKind::String),
        Field::optional("query", FieldKind::String),
        Field::optional("query_type", FieldKind::String)
            .with_default(DefaultValue::Str("ResultCount"))
            .one_of(QUERY_TYPES),
        Field::optional("authorized_resource_ids", FieldKind::StringSet),
        Field::optional("description", FieldKind::String),
        Field::optional("enabled", FieldKind::Bool).with_default(DefaultValue::Bool(true)),
        Field::optional("frequency", FieldKind::Int),
        Field::optional("time_window", FieldKind::Int),
        Field::optional("severity", FieldKind::Int),
        Field::optional("throttling", FieldKind::Int),
        Field::optional("trigger", FieldKind::BlockList(&TRIGGER_SCHEMA)).max_items(1),
        Field::optional("action", FieldKind::BlockList(&NOTIFICATION_SCHEMA)).max_items(1),
        Field::optional("criteria", FieldKind::BlockList(&CRITERIA_SCHEMA)).max_items(1),
        Field::optional("tags", FieldKind::StringMap),
    ],
);

// ============================================================================
// Domain model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMetricTrigger {
    #[serde(default, deserialize_with = "nullable")]
    pub threshold_operator: String,
    #[serde(default, deserialize_with = "nullable")]
    pub threshold: f64,
    #[serde(default, deserialize_with = "nullable")]
    pub metric_trigger_type: String,
    #[serde(default, deserialize_with = "nullable")]
    pub metric_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerCondition {
    pub threshold_operator: String,
    pub threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_trigger: Option<LogMetricTrigger>,
}

/// Who gets notified when an alerting rule fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default, deserialize_with = "nullable")]
    pub action_group: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub email_subject: String,
    #[serde(default, deserialize_with = "nullable")]
    pub custom_webhook_payload: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertingAction {
    /// Decimal string on the wire
    pub severity: String,
    #[serde(rename = "throttlingInMin", default, skip_serializing_if = "Option::is_none")]
    pub throttling_minutes: Option<i64>,
    pub trigger: TriggerCondition,
    #[serde(rename = "aznsAction", default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricMapping {
    pub metric_name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub dimensions: Vec<Dimension>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogToMetricAction {
    #[serde(default, deserialize_with = "nullable")]
    pub criteria: Vec<MetricMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "odata.type")]
pub enum RuleAction {
    #[serde(rename = "Microsoft.WindowsAzure.Management.Monitoring.Alerts.Models.Microsoft.AppInsights.Nexus.DataContracts.Resources.ScheduledQueryRules.AlertingAction")]
    Alerting(AlertingAction),
    #[serde(rename = "Microsoft.WindowsAzure.Management.Monitoring.Alerts.Models.Microsoft.AppInsights.Nexus.DataContracts.Resources.ScheduledQueryRules.LogToMetricAction")]
    LogToMetric(LogToMetricAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Alerting,
    LogToMetric,
}

impl Tagged for RuleAction {
    type Tag = ActionKind;

    fn tag(&self) -> ActionKind {
        match self {
            RuleAction::Alerting(_) => ActionKind::Alerting,
            RuleAction::LogToMetric(_) => ActionKind::LogToMetric,
        }
    }
}

impl RuleAction {
    pub fn odata_type(&self) -> &'static str {
        match self {
            RuleAction::Alerting(_) => ALERTING_ODATA_TYPE,
            RuleAction::LogToMetric(_) => LOG_TO_METRIC_ODATA_TYPE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub authorized_resources: Vec<String>,
    pub data_source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySchedule {
    pub frequency_in_minutes: i64,
    pub time_window_in_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledQueryRuleProperties {
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    /// `"true"` or `"false"` on the wire
    pub enabled: String,
    pub source: QuerySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<QuerySchedule>,
    pub action: RuleAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledQueryRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub location: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tags: BTreeMap<String, String>,
    pub properties: ScheduledQueryRuleProperties,
}

// ============================================================================
// Expand / flatten
// ============================================================================

const ACTION_GROUPS: [VariantGroup<ActionKind>; 2] = [
    VariantGroup::new(ActionKind::Alerting, "trigger"),
    VariantGroup::new(ActionKind::LogToMetric, "criteria"),
];

/// Fields that only apply to alerting rules
const ALERTING_ONLY: &[&str] = &["frequency", "time_window", "severity", "throttling"];

fn expand_alerting(config: &BlockReader<'_>) -> Result<(AlertingAction, QuerySchedule), MapError> {
    let frequency = config.int("frequency")?;
    let time_window = config.int("time_window")?;
    if frequency < 1 || time_window < 1 {
        return Err(MapError::invalid(
            "frequency",
            "alerting rules need a positive frequency and time_window",
        ));
    }

    let severity = config.int("severity")?;
    if !(0..=4).contains(&severity) {
        return Err(MapError::invalid(
            "severity",
            format!("{} is outside the range 0 to 4", severity),
        ));
    }

    let trigger = config
        .block("trigger")?
        .ok_or_else(|| MapError::invalid("trigger", "block is empty"))?;
    let metric_trigger = match trigger.block("metric_trigger")? {
        Some(block) => Some(LogMetricTrigger {
            threshold_operator: block.string("operator")?,
            threshold: block.float("threshold")?,
            metric_trigger_type: block.string("metric_trigger_type")?,
            metric_column: block.string("metric_column")?,
        }),
        None => None,
    };

    let notification = match config.block("action")? {
        Some(block) => Some(Notification {
            action_group: block.strings("action_group")?,
            email_subject: block.string("email_subject")?,
            custom_webhook_payload: block.string("custom_webhook_payload")?,
        }),
        None => None,
    };

    let action = AlertingAction {
        severity: format_decimal(severity),
        throttling_minutes: Some(config.int("throttling")?),
        trigger: TriggerCondition {
            threshold_operator: trigger.string("operator")?,
            threshold: trigger.float("threshold")?,
            metric_trigger,
        },
        notification,
    };
    let schedule = QuerySchedule {
        frequency_in_minutes: frequency,
        time_window_in_minutes: time_window,
    };
    Ok((action, schedule))
}

fn expand_log_to_metric(config: &BlockReader<'_>) -> Result<LogToMetricAction, MapError> {
    for field in ALERTING_ONLY {
        if config.is_populated(field)? && config.int(field)? != 0 {
            return Err(MapError::invalid(
                *field,
                "only applies to rules with a trigger",
            ));
        }
    }
    if config.is_populated("action")? {
        return Err(MapError::invalid("action", "only applies to rules with a trigger"));
    }

    let mut criteria = Vec::new();
    for block in config.blocks("criteria")? {
        criteria.push(MetricMapping {
            metric_name: block.string("metric_name")?,
            dimensions: expand_dimensions(&block, "dimension")?,
        });
    }
    Ok(LogToMetricAction { criteria })
}

fn flatten_alerting(
    w: &mut BlockWriter,
    action: &AlertingAction,
    schedule: Option<QuerySchedule>,
) -> Result<(), MapError> {
    let severity = parse_decimal("severity", &action.severity)?;

    let mut trigger = w.nested("trigger")?;
    let metric_trigger = match &action.trigger.metric_trigger {
        Some(m) => {
            let mut mw = trigger.nested("metric_trigger")?;
            mw.string("operator", m.threshold_operator.as_str())?
                .float("threshold", m.threshold)?
                .string("metric_trigger_type", m.metric_trigger_type.as_str())?
                .string("metric_column", m.metric_column.as_str())?;
            Some(mw.finish())
        }
        None => None,
    };
    trigger
        .string("operator", action.trigger.threshold_operator.as_str())?
        .float("threshold", action.trigger.threshold)?
        .block("metric_trigger", metric_trigger)?;

    let notification = match &action.notification {
        Some(n) => {
            let mut nw = w.nested("action")?;
            nw.strings("action_group", n.action_group.iter().cloned())?
                .string("email_subject", n.email_subject.as_str())?
                .string("custom_webhook_payload", n.custom_webhook_payload.as_str())?;
            Some(nw.finish())
        }
        None => None,
    };

    w.int("severity", severity)?
        .opt_int("throttling", action.throttling_minutes)?
        .opt_int("frequency", schedule.map(|s| s.frequency_in_minutes))?
        .opt_int("time_window", schedule.map(|s| s.time_window_in_minutes))?
        .block("trigger", Some(trigger.finish()))?
        .block("action", notification)?;
    Ok(())
}

fn flatten_log_to_metric(w: &mut BlockWriter, action: &LogToMetricAction) -> Result<(), MapError> {
    let mut criteria = Vec::with_capacity(action.criteria.len());
    for mapping in &action.criteria {
        let mut cw = w.nested("criteria")?;
        cw.string("metric_name", mapping.metric_name.as_str())?
            .blocks("dimension", flatten_dimensions(&mapping.dimensions)?)?;
        criteria.push(cw.finish());
    }
    w.blocks("criteria", criteria)?;
    Ok(())
}

pub struct ScheduledQueryRuleKind;

impl ResourceKind for ScheduledQueryRuleKind {
    type Id = ResourceId;
    type Model = ScheduledQueryRule;
    type Shape = ();

    const TYPE_NAME: &'static str = "azurerm_monitor_scheduled_query_rule";
    const API_VERSION: &'static str = "2018-04-16";
    const SCHEMA: &'static Schema = &SCHEDULED_QUERY_RULE_SCHEMA;

    fn id_from_config(scope: &Scope, config: &BlockReader<'_>) -> Result<ResourceId, MapError> {
        Ok(ResourceId::new(
            scope.subscription_id.as_str(),
            config.string("resource_group_name")?,
            RESOURCE_TYPE,
            config.string("name")?,
        )?)
    }

    fn parse_id(raw: &str) -> Result<ResourceId, IdentityError> {
        ResourceId::parse(raw, RESOURCE_TYPE)
    }

    fn resolve_shape(config: &BlockReader<'_>) -> Result<(), MapError> {
        resolve_for_write(config, &ACTION_GROUPS)?;
        Ok(())
    }

    fn expand(config: &BlockReader<'_>, _shape: ()) -> Result<ScheduledQueryRule, MapError> {
        let (action, schedule, query_type) = match resolve_for_write(config, &ACTION_GROUPS)? {
            ActionKind::Alerting => {
                let (action, schedule) = expand_alerting(config)?;
                (
                    RuleAction::Alerting(action),
                    Some(schedule),
                    Some(config.string("query_type")?),
                )
            }
            ActionKind::LogToMetric => (
                RuleAction::LogToMetric(expand_log_to_metric(config)?),
                None,
                None,
            ),
        };

        Ok(ScheduledQueryRule {
            id: None,
            location: config.string("location")?,
            tags: config.string_map("tags")?,
            properties: ScheduledQueryRuleProperties {
                description: config.string("description")?,
                enabled: config.bool("enabled")?.to_string(),
                source: QuerySource {
                    query: non_empty(config.string("query")?),
                    authorized_resources: config.strings("authorized_resource_ids")?,
                    data_source_id: config.string("data_source_id")?,
                    query_type,
                },
                schedule,
                action,
            },
        })
    }

    fn flatten(id: &ResourceId, model: &ScheduledQueryRule) -> Result<Map<String, Value>, MapError> {
        let props = &model.properties;
        let mut w = BlockWriter::new(&SCHEDULED_QUERY_RULE_SCHEMA);
        w.string("name", id.name.as_str())?
            .string("resource_group_name", id.resource_group.as_str())?
            .string("location", model.location.as_str())?
            .string("data_source_id", props.source.data_source_id.as_str())?
            .opt_string("query", props.source.query.as_deref())?
            .opt_string("query_type", props.source.query_type.as_deref())?
            .strings("authorized_resource_ids", props.source.authorized_resources.iter().cloned())?
            .string("description", props.description.as_str())?
            .bool("enabled", parse_bool("enabled", &props.enabled)?)?
            .string_map("tags", &model.tags)?;

        match &props.action {
            RuleAction::Alerting(action) => flatten_alerting(&mut w, action, props.schedule)?,
            RuleAction::LogToMetric(action) => flatten_log_to_metric(&mut w, action)?,
        }

        Ok(w.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::normalize;
    use crate::variant::resolve_for_read;
    use serde_json::json;

    fn id() -> ResourceId {
        ResourceId::new("1", "rg", RESOURCE_TYPE, "errors").unwrap()
    }

    fn alerting_config() -> Value {
        json!({
            "name": "errors",
            "resource_group_name": "rg",
            "location": "westeurope",
            "data_source_id": "/subscriptions/1/resourceGroups/rg/providers/Microsoft.OperationalInsights/workspaces/logs",
            "query": "requests | where success == false",
            "frequency": 5,
            "time_window": 30,
            "severity": 1,
            "trigger": [{
                "operator": "GreaterThan",
                "threshold": 3,
                "metric_trigger": [{"operator": "GreaterThan", "threshold": 1, "metric_trigger_type": "Total", "metric_column": "operation_Name"}]
            }],
            "action": [{"action_group": ["/ag/2", "/ag/1"], "email_subject": "Errors"}]
        })
    }

    fn log_config() -> Value {
        json!({
            "name": "errors",
            "resource_group_name": "rg",
            "location": "westeurope",
            "data_source_id": "/subscriptions/1/resourceGroups/rg/providers/Microsoft.OperationalInsights/workspaces/logs",
            "criteria": [{
                "metric_name": "Average_% Idle Time",
                "dimension": [{"name": "Computer", "operator": "Include", "values": ["host-1"]}]
            }]
        })
    }

    fn round_trip(config: &Value) -> (ScheduledQueryRule, Map<String, Value>) {
        let reader = BlockReader::from_value(&SCHEDULED_QUERY_RULE_SCHEMA, config).unwrap();
        reader.validate().unwrap();
        let model = ScheduledQueryRuleKind::expand(&reader, ()).unwrap();
        let wire = serde_json::to_value(&model).unwrap();
        let model: ScheduledQueryRule = serde_json::from_value(wire).unwrap();
        let flat = ScheduledQueryRuleKind::flatten(&id(), &model).unwrap();
        (model, flat)
    }

    #[test]
    fn test_alerting_round_trip() {
        let config = alerting_config();
        let (model, flat) = round_trip(&config);
        assert_eq!(resolve_for_read(&model.properties.action), ActionKind::Alerting);
        assert_eq!(flat, normalize(&SCHEDULED_QUERY_RULE_SCHEMA, config.as_object().unwrap()));
    }

    #[test]
    fn test_log_to_metric_round_trip() {
        let config = log_config();
        let (model, flat) = round_trip(&config);
        assert_eq!(resolve_for_read(&model.properties.action), ActionKind::LogToMetric);
        assert!(model.properties.schedule.is_none());
        assert_eq!(flat, normalize(&SCHEDULED_QUERY_RULE_SCHEMA, config.as_object().unwrap()));
    }

    #[test]
    fn test_wire_strings() {
        let config = alerting_config();
        let reader = BlockReader::from_value(&SCHEDULED_QUERY_RULE_SCHEMA, &config).unwrap();
        let model = ScheduledQueryRuleKind::expand(&reader, ()).unwrap();
        let wire = serde_json::to_value(&model).unwrap();
        assert_eq!(wire["properties"]["enabled"], json!("true"));
        assert_eq!(wire["properties"]["action"]["severity"], json!("1"));
        assert_eq!(wire["properties"]["action"]["odata.type"], json!(ALERTING_ODATA_TYPE));
        assert_eq!(wire["properties"]["action"]["aznsAction"]["emailSubject"], json!("Errors"));
        assert_eq!(model.properties.action.odata_type(), ALERTING_ODATA_TYPE);
    }

    #[test]
    fn test_both_actions_rejected() {
        let mut config = alerting_config();
        config["criteria"] = log_config()["criteria"].clone();
        let reader = BlockReader::from_value(&SCHEDULED_QUERY_RULE_SCHEMA, &config).unwrap();
        assert!(matches!(
            ScheduledQueryRuleKind::resolve_shape(&reader),
            Err(MapError::Variant(_))
        ));
    }

    #[test]
    fn test_log_to_metric_rejects_alerting_fields() {
        let mut config = log_config();
        config["frequency"] = json!(5);
        let reader = BlockReader::from_value(&SCHEDULED_QUERY_RULE_SCHEMA, &config).unwrap();
        assert!(matches!(
            ScheduledQueryRuleKind::expand(&reader, ()),
            Err(MapError::Invalid { .. })
        ));
    }

    #[test]
    fn test_flatten_rejects_malformed_severity() {
        let config = alerting_config();
        let reader = BlockReader::from_value(&SCHEDULED_QUERY_RULE_SCHEMA, &config).unwrap();
        let mut model = ScheduledQueryRuleKind::expand(&reader, ()).unwrap();
        if let RuleAction::Alerting(action) = &mut model.properties.action {
            action.severity = "Sev1".to_string();
        }
        match ScheduledQueryRuleKind::flatten(&id(), &model) {
            Err(MapError::Malformed { field, raw, .. }) => {
                assert_eq!(field, "severity");
                assert_eq!(raw, "Sev1");
            }
            other => panic!("expected malformed severity, got {:?}", other),
        }
    }

    #[test]
    fn test_flatten_rejects_malformed_enabled() {
        let config = log_config();
        let reader = BlockReader::from_value(&SCHEDULED_QUERY_RULE_SCHEMA, &config).unwrap();
        let mut model = ScheduledQueryRuleKind::expand(&reader, ()).unwrap();
        model.properties.enabled = "yes".to_string();
        assert!(matches!(
            ScheduledQueryRuleKind::flatten(&id(), &model),
            Err(MapError::Malformed { .. })
        ));
    }
}
