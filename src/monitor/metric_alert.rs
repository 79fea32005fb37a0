//! Metric alert rules
//!
//! The criteria of an alert come in four wire shapes. Static criteria can be
//! written either as single-resource or multi-resource criteria; the two
//! carry the same fields but are distinct on the wire, and an existing alert
//! keeps whichever it was created with.

use std::collections::BTreeMap;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{expand_dimensions, flatten_dimensions, non_empty, nullable, Dimension, DIMENSION_SCHEMA, GLOBAL_LOCATION};
use crate::bag::{BlockReader, BlockWriter, DefaultValue, Field, FieldKind, Schema};
use crate::error::MapError;
use crate::identity::{IdentityError, ResourceId};
use crate::reconciler::{ResourceKind, Scope};
use crate::variant::{resolve_for_read, resolve_for_write, PersistedShape, Tagged, VariantGroup};

pub const RESOURCE_TYPE: &str = "metricAlerts";

const AGGREGATIONS: &[&str] = &["Average", "Count", "Minimum", "Maximum", "Total"];
const STATIC_OPERATORS: &[&str] = &[
    "Equals",
    "GreaterThan",
    "GreaterThanOrEqual",
    "LessThan",
    "LessThanOrEqual",
    "NotEquals",
];
const DYNAMIC_OPERATORS: &[&str] = &["LessThan", "GreaterThan", "GreaterOrLessThan"];
const SENSITIVITIES: &[&str] = &["Low", "Medium", "High"];
const FREQUENCIES: &[&str] = &["PT1M", "PT5M", "PT15M", "PT30M", "PT1H"];
const WINDOW_SIZES: &[&str] = &[
    "PT1M", "PT5M", "PT15M", "PT30M", "PT1H", "PT6H", "PT12H", "P1D",
];

/// Failing periods reported when the remote omits them
const DEFAULT_FAILING_PERIODS: i64 = 1;

const CRITERIA: &str = "criteria";
const DYNAMIC_CRITERIA: &str = "dynamic_criteria";
const WEBTEST_CRITERIA: &str = "application_insights_web_test_location_availability_criteria";

// ============================================================================
// Config schema
// ============================================================================

static STATIC_CRITERION_SCHEMA: Schema = Schema::new(
    "criteria",
    &[
        Field::required("metric_namespace", FieldKind::String),
        Field::required("metric_name", FieldKind::String),
        Field::required("aggregation", FieldKind::String).one_of(AGGREGATIONS),
        Field::optional("dimension", FieldKind::BlockList(&DIMENSION_SCHEMA)),
        Field::required("operator", FieldKind::String).one_of(STATIC_OPERATORS),
        Field::required("threshold", FieldKind::Float),
        Field::optional("skip_metric_validation", FieldKind::Bool)
            .with_default(DefaultValue::Bool(false)),
    ],
);

static DYNAMIC_CRITERION_SCHEMA: Schema = Schema::new(
    "dynamic_criteria",
    &[
        Field::required("metric_namespace", FieldKind::String),
        Field::required("metric_name", FieldKind::String),
        Field::required("aggregation", FieldKind::String).one_of(AGGREGATIONS),
        Field::optional("dimension", FieldKind::BlockList(&DIMENSION_SCHEMA)),
        Field::required("operator", FieldKind::String).one_of(DYNAMIC_OPERATORS),
        Field::required("alert_sensitivity", FieldKind::String).one_of(SENSITIVITIES),
        Field::optional("evaluation_total_count", FieldKind::Int)
            .with_default(DefaultValue::Int(4)),
        Field::optional("evaluation_failure_count", FieldKind::Int)
            .with_default(DefaultValue::Int(4)),
        Field::optional("ignore_data_before", FieldKind::String),
        Field::optional("skip_metric_validation", FieldKind::Bool),
    ],
);

static WEBTEST_CRITERION_SCHEMA: Schema = Schema::new(
    "application_insights_web_test_location_availability_criteria",
    &[
        Field::required("web_test_id", FieldKind::String),
        Field::required("component_id", FieldKind::String),
        Field::required("failed_location_count", FieldKind::Int),
    ],
);

static ACTION_SCHEMA: Schema = Schema::new(
    "action",
    &[
        Field::required("action_group_id", FieldKind::String),
        Field::optional("webhook_properties", FieldKind::StringMap),
    ],
);

pub static METRIC_ALERT_SCHEMA: Schema = Schema::new(
    "azurerm_monitor_metric_alert",
    &[
        Field::required("name", FieldKind::String),
        Field::required("resource_group_name", FieldKind::String),
        Field::required("scopes", FieldKind::StringSet),
        Field::optional("target_resource_type", FieldKind::String),
        Field::optional("target_resource_location", FieldKind::String),
        Field::optional(CRITERIA, FieldKind::BlockSet(&STATIC_CRITERION_SCHEMA)),
        Field::optional(DYNAMIC_CRITERIA, FieldKind::BlockSet(&DYNAMIC_CRITERION_SCHEMA))
            .max_items(1),
        Field::optional(WEBTEST_CRITERIA, FieldKind::BlockList(&WEBTEST_CRITERION_SCHEMA))
            .max_items(1),
        Field::optional("action", FieldKind::BlockSet(&ACTION_SCHEMA)),
        Field::optional("auto_mitigate", FieldKind::Bool).with_default(DefaultValue::Bool(true)),
        Field::optional("description", FieldKind::String),
        Field::optional("enabled", FieldKind::Bool).with_default(DefaultValue::Bool(true)),
        Field::optional("frequency", FieldKind::String)
            .with_default(DefaultValue::Str("PT1M"))
            .one_of(FREQUENCIES),
        Field::optional("severity", FieldKind::Int).with_default(DefaultValue::Int(3)),
        Field::optional("window_size", FieldKind::String)
            .with_default(DefaultValue::Str("PT5M"))
            .one_of(WINDOW_SIZES),
        Field::optional("tags", FieldKind::StringMap),
    ],
);

// ============================================================================
// Domain model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricCriterion {
    pub name: String,
    pub metric_name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub metric_namespace: String,
    pub time_aggregation: String,
    #[serde(default, deserialize_with = "nullable")]
    pub dimensions: Vec<Dimension>,
    pub operator: String,
    pub threshold: f64,
    #[serde(default, deserialize_with = "nullable")]
    pub skip_metric_validation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailingPeriods {
    pub number_of_evaluation_periods: f64,
    pub min_failing_periods_to_alert: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicMetricCriterion {
    pub name: String,
    pub metric_name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub metric_namespace: String,
    pub time_aggregation: String,
    #[serde(default, deserialize_with = "nullable")]
    pub dimensions: Vec<Dimension>,
    pub operator: String,
    pub alert_sensitivity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_periods: Option<FailingPeriods>,
    /// RFC3339, kept as written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_data_before: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub skip_metric_validation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebtestAvailability {
    #[serde(rename = "webTestId")]
    pub web_test_id: String,
    pub component_id: String,
    pub failed_location_count: f64,
}

/// Alert criteria, one variant per wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CriteriaWire", into = "CriteriaWire")]
pub enum AlertCriteria {
    StaticSingleResource(Vec<MetricCriterion>),
    StaticMultiResource(Vec<MetricCriterion>),
    DynamicMultiResource(Vec<DynamicMetricCriterion>),
    WebTestAvailability(WebtestAvailability),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CriteriaKind {
    StaticSingle,
    #[default]
    StaticMulti,
    DynamicMulti,
    WebTest,
}

impl Tagged for AlertCriteria {
    type Tag = CriteriaKind;

    fn tag(&self) -> CriteriaKind {
        match self {
            AlertCriteria::StaticSingleResource(_) => CriteriaKind::StaticSingle,
            AlertCriteria::StaticMultiResource(_) => CriteriaKind::StaticMulti,
            AlertCriteria::DynamicMultiResource(_) => CriteriaKind::DynamicMulti,
            AlertCriteria::WebTestAvailability(_) => CriteriaKind::WebTest,
        }
    }
}

impl PersistedShape for CriteriaKind {
    /// Alerts created with single-resource criteria cannot be switched to the
    /// multi-resource shape
    fn pin_to(self, persisted: Self) -> Self {
        match (self, persisted) {
            (CriteriaKind::StaticMulti, CriteriaKind::StaticSingle) => CriteriaKind::StaticSingle,
            (requested, _) => requested,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "criterionType")]
enum MultiCriterionWire {
    #[serde(rename = "StaticThresholdCriterion")]
    Static(MetricCriterion),
    #[serde(rename = "DynamicThresholdCriterion")]
    Dynamic(DynamicMetricCriterion),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "odata.type")]
enum CriteriaWire {
    #[serde(rename = "Microsoft.Azure.Monitor.SingleResourceMultipleMetricCriteria")]
    Single {
        #[serde(rename = "allOf", default, deserialize_with = "nullable")]
        all_of: Vec<MetricCriterion>,
    },
    #[serde(rename = "Microsoft.Azure.Monitor.MultipleResourceMultipleMetricCriteria")]
    Multi {
        #[serde(rename = "allOf", default, deserialize_with = "nullable")]
        all_of: Vec<MultiCriterionWire>,
    },
    #[serde(rename = "Microsoft.Azure.Monitor.WebtestLocationAvailabilityCriteria")]
    Webtest(WebtestAvailability),
}

impl TryFrom<CriteriaWire> for AlertCriteria {
    type Error = String;

    fn try_from(wire: CriteriaWire) -> Result<Self, Self::Error> {
        match wire {
            CriteriaWire::Single { all_of } => Ok(AlertCriteria::StaticSingleResource(all_of)),
            CriteriaWire::Webtest(criteria) => Ok(AlertCriteria::WebTestAvailability(criteria)),
            CriteriaWire::Multi { all_of } => {
                let Some(first) = all_of.first() else {
                    return Err("multi-resource criteria without any criterion".to_string());
                };
                match first {
                    MultiCriterionWire::Static(_) => all_of
                        .into_iter()
                        .map(|c| match c {
                            MultiCriterionWire::Static(c) => Ok(c),
                            MultiCriterionWire::Dynamic(_) => Err("mixed static and dynamic criteria".to_string()),
                        })
                        .collect::<Result<Vec<_>, _>>()
                        .map(AlertCriteria::StaticMultiResource),
                    MultiCriterionWire::Dynamic(_) => all_of
                        .into_iter()
                        .map(|c| match c {
                            MultiCriterionWire::Dynamic(c) => Ok(c),
                            MultiCriterionWire::Static(_) => Err("mixed static and dynamic criteria".to_string()),
                        })
                        .collect::<Result<Vec<_>, _>>()
                        .map(AlertCriteria::DynamicMultiResource),
                }
            }
        }
    }
}

impl From<AlertCriteria> for CriteriaWire {
    fn from(criteria: AlertCriteria) -> Self {
        match criteria {
            AlertCriteria::StaticSingleResource(all_of) => CriteriaWire::Single { all_of },
            AlertCriteria::StaticMultiResource(all_of) => CriteriaWire::Multi {
                all_of: all_of.into_iter().map(MultiCriterionWire::Static).collect(),
            },
            AlertCriteria::DynamicMultiResource(all_of) => CriteriaWire::Multi {
                all_of: all_of.into_iter().map(MultiCriterionWire::Dynamic).collect(),
            },
            AlertCriteria::WebTestAvailability(criteria) => CriteriaWire::Webtest(criteria),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricAlertAction {
    pub action_group_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub web_hook_properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricAlertProperties {
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    pub severity: i64,
    pub enabled: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub scopes: Vec<String>,
    pub evaluation_frequency: String,
    pub window_size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_resource_region: Option<String>,
    pub criteria: AlertCriteria,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_mitigate: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub actions: Vec<MetricAlertAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAlert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub location: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tags: BTreeMap<String, String>,
    pub properties: MetricAlertProperties,
}

// ============================================================================
// Expand
// ============================================================================

const CRITERIA_GROUPS: [VariantGroup<CriteriaKind>; 3] = [
    VariantGroup::new(CriteriaKind::StaticMulti, CRITERIA),
    VariantGroup::new(CriteriaKind::DynamicMulti, DYNAMIC_CRITERIA),
    VariantGroup::new(CriteriaKind::WebTest, WEBTEST_CRITERIA),
];

/// Remote criterion names are synthesized from the position
fn criterion_name(idx: usize) -> String {
    format!("Metric{}", idx + 1)
}

fn expand_static_criteria(config: &BlockReader<'_>) -> Result<Vec<MetricCriterion>, MapError> {
    let mut criteria = Vec::new();
    for (idx, block) in config.blocks(CRITERIA)?.iter().enumerate() {
        criteria.push(MetricCriterion {
            name: criterion_name(idx),
            metric_namespace: block.string("metric_namespace")?,
            metric_name: block.string("metric_name")?,
            time_aggregation: block.string("aggregation")?,
            dimensions: expand_dimensions(block, "dimension")?,
            operator: block.string("operator")?,
            threshold: block.float("threshold")?,
            skip_metric_validation: block.bool("skip_metric_validation")?,
        });
    }
    Ok(criteria)
}

fn expand_dynamic_criteria(
    config: &BlockReader<'_>,
) -> Result<Vec<DynamicMetricCriterion>, MapError> {
    let mut criteria = Vec::new();
    for (idx, block) in config.blocks(DYNAMIC_CRITERIA)?.iter().enumerate() {
        let total = block.int("evaluation_total_count")?;
        let failing = block.int("evaluation_failure_count")?;
        if total < 1 || failing < 1 {
            return Err(MapError::invalid(
                block.path().to_string(),
                "evaluation counts must be at least 1",
            ));
        }

        let ignore_data_before = block.optional_string("ignore_data_before")?;
        if let Some(raw) = &ignore_data_before {
            DateTime::parse_from_rfc3339(raw).map_err(|e| {
                MapError::invalid(
                    block.path().key("ignore_data_before").to_string(),
                    format!("'{}' is not an RFC3339 timestamp: {}", raw, e),
                )
            })?;
        }

        criteria.push(DynamicMetricCriterion {
            name: criterion_name(idx),
            metric_namespace: block.string("metric_namespace")?,
            metric_name: block.string("metric_name")?,
            time_aggregation: block.string("aggregation")?,
            dimensions: expand_dimensions(block, "dimension")?,
            operator: block.string("operator")?,
            alert_sensitivity: block.string("alert_sensitivity")?,
            failing_periods: Some(FailingPeriods {
                number_of_evaluation_periods: total as f64,
                min_failing_periods_to_alert: failing as f64,
            }),
            ignore_data_before,
            skip_metric_validation: block.bool("skip_metric_validation")?,
        });
    }
    Ok(criteria)
}

fn expand_webtest_criteria(config: &BlockReader<'_>) -> Result<WebtestAvailability, MapError> {
    let block = config
        .block(WEBTEST_CRITERIA)?
        .ok_or_else(|| MapError::invalid(WEBTEST_CRITERIA, "block is empty"))?;
    let failed = block.int("failed_location_count")?;
    if failed < 1 {
        return Err(MapError::invalid(
            block.path().key("failed_location_count").to_string(),
            "must be at least 1",
        ));
    }
    Ok(WebtestAvailability {
        web_test_id: block.string("web_test_id")?,
        component_id: block.string("component_id")?,
        failed_location_count: failed as f64,
    })
}

fn expand_criteria(config: &BlockReader<'_>, shape: CriteriaKind) -> Result<AlertCriteria, MapError> {
    Ok(match shape {
        CriteriaKind::StaticSingle => AlertCriteria::StaticSingleResource(expand_static_criteria(config)?),
        CriteriaKind::StaticMulti => AlertCriteria::StaticMultiResource(expand_static_criteria(config)?),
        CriteriaKind::DynamicMulti => AlertCriteria::DynamicMultiResource(expand_dynamic_criteria(config)?),
        CriteriaKind::WebTest => AlertCriteria::WebTestAvailability(expand_webtest_criteria(config)?),
    })
}

fn expand_actions(config: &BlockReader<'_>) -> Result<Vec<MetricAlertAction>, MapError> {
    let mut actions = Vec::new();
    for block in config.blocks("action")? {
        let action_group_id = block.string("action_group_id")?;
        if action_group_id.is_empty() {
            continue;
        }
        actions.push(MetricAlertAction {
            action_group_id,
            web_hook_properties: block.string_map("webhook_properties")?,
        });
    }
    Ok(actions)
}

// ============================================================================
// Flatten
// ============================================================================

fn flatten_static_criteria(criteria: &[MetricCriterion]) -> Result<Vec<Map<String, Value>>, MapError> {
    criteria
        .iter()
        .map(|c| -> Result<Map<String, Value>, MapError> {
            let mut w = BlockWriter::new(&STATIC_CRITERION_SCHEMA);
            w.string("metric_namespace", c.metric_namespace.as_str())?
                .string("metric_name", c.metric_name.as_str())?
                .string("aggregation", c.time_aggregation.as_str())?
                .blocks("dimension", flatten_dimensions(&c.dimensions)?)?
                .string("operator", c.operator.as_str())?
                .float("threshold", c.threshold)?
                .bool("skip_metric_validation", c.skip_metric_validation)?;
            Ok(w.finish())
        })
        .collect()
}

fn flatten_dynamic_criteria(
    criteria: &[DynamicMetricCriterion],
) -> Result<Vec<Map<String, Value>>, MapError> {
    criteria
        .iter()
        .map(|c| -> Result<Map<String, Value>, MapError> {
            let (total, failing) = match c.failing_periods {
                Some(p) => (
                    p.number_of_evaluation_periods as i64,
                    p.min_failing_periods_to_alert as i64,
                ),
                None => (DEFAULT_FAILING_PERIODS, DEFAULT_FAILING_PERIODS),
            };
            let mut w = BlockWriter::new(&DYNAMIC_CRITERION_SCHEMA);
            w.string("metric_namespace", c.metric_namespace.as_str())?
                .string("metric_name", c.metric_name.as_str())?
                .string("aggregation", c.time_aggregation.as_str())?
                .blocks("dimension", flatten_dimensions(&c.dimensions)?)?
                .string("operator", c.operator.as_str())?
                .string("alert_sensitivity", c.alert_sensitivity.as_str())?
                .int("evaluation_total_count", total)?
                .int("evaluation_failure_count", failing)?
                .opt_string("ignore_data_before", c.ignore_data_before.as_deref())?
                .bool("skip_metric_validation", c.skip_metric_validation)?;
            Ok(w.finish())
        })
        .collect()
}

fn flatten_webtest_criteria(criteria: &WebtestAvailability) -> Result<Map<String, Value>, MapError> {
    let mut w = BlockWriter::new(&WEBTEST_CRITERION_SCHEMA);
    w.string("web_test_id", criteria.web_test_id.as_str())?
        .string("component_id", criteria.component_id.as_str())?
        .int("failed_location_count", criteria.failed_location_count as i64)?;
    Ok(w.finish())
}

fn flatten_actions(actions: &[MetricAlertAction]) -> Result<Vec<Map<String, Value>>, MapError> {
    actions
        .iter()
        .map(|a| -> Result<Map<String, Value>, MapError> {
            let mut w = BlockWriter::new(&ACTION_SCHEMA);
            w.string("action_group_id", a.action_group_id.as_str())?
                .string_map("webhook_properties", &a.web_hook_properties)?;
            Ok(w.finish())
        })
        .collect()
}

// ============================================================================
// Resource kind
// ============================================================================

pub struct MetricAlertKind;

impl ResourceKind for MetricAlertKind {
    type Id = ResourceId;
    type Model = MetricAlert;
    type Shape = CriteriaKind;

    const TYPE_NAME: &'static str = "azurerm_monitor_metric_alert";
    const API_VERSION: &'static str = "2018-03-01";
    const SCHEMA: &'static Schema = &METRIC_ALERT_SCHEMA;
    const PRESERVE_PERSISTED_SHAPE: bool = true;
    const WAITS_FOR_VISIBILITY: bool = true;

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

    fn resolve_shape(config: &BlockReader<'_>) -> Result<CriteriaKind, MapError> {
        Ok(resolve_for_write(config, &CRITERIA_GROUPS)?)
    }

    fn persisted_shape(model: &MetricAlert) -> CriteriaKind {
        resolve_for_read(&model.properties.criteria)
    }

    fn expand(config: &BlockReader<'_>, shape: CriteriaKind) -> Result<MetricAlert, MapError> {
        let severity = config.int("severity")?;
        if !(0..=4).contains(&severity) {
            return Err(MapError::invalid(
                "severity",
                format!("{} is outside the range 0 to 4", severity),
            ));
        }

        Ok(MetricAlert {
            id: None,
            location: GLOBAL_LOCATION.to_string(),
            tags: config.string_map("tags")?,
            properties: MetricAlertProperties {
                description: config.string("description")?,
                severity,
                enabled: config.bool("enabled")?,
                scopes: config.strings("scopes")?,
                evaluation_frequency: config.string("frequency")?,
                window_size: config.string("window_size")?,
                target_resource_type: non_empty(config.string("target_resource_type")?),
                target_resource_region: non_empty(config.string("target_resource_location")?),
                criteria: expand_criteria(config, shape)?,
                auto_mitigate: Some(config.bool("auto_mitigate")?),
                actions: expand_actions(config)?,
            },
        })
    }

    fn flatten(id: &ResourceId, model: &MetricAlert) -> Result<Map<String, Value>, MapError> {
        let props = &model.properties;
        let mut w = BlockWriter::new(&METRIC_ALERT_SCHEMA);
        w.string("name", id.name.as_str())?
            .string("resource_group_name", id.resource_group.as_str())?
            .strings("scopes", props.scopes.iter().cloned())?
            .opt_string("target_resource_type", props.target_resource_type.as_deref())?
            .opt_string("target_resource_location", props.target_resource_region.as_deref())?
            .blocks("action", flatten_actions(&props.actions)?)?
            .opt_bool("auto_mitigate", props.auto_mitigate)?
            .string("description", props.description.as_str())?
            .bool("enabled", props.enabled)?
            .string("frequency", props.evaluation_frequency.as_str())?
            .int("severity", props.severity)?
            .string("window_size", props.window_size.as_str())?
            .string_map("tags", &model.tags)?;

        match &props.criteria {
            AlertCriteria::StaticSingleResource(criteria) | AlertCriteria::StaticMultiResource(criteria) => {
                w.blocks(CRITERIA, flatten_static_criteria(criteria)?)?;
            }
            AlertCriteria::DynamicMultiResource(criteria) => {
                w.blocks(DYNAMIC_CRITERIA, flatten_dynamic_criteria(criteria)?)?;
            }
            AlertCriteria::WebTestAvailability(criteria) => {
                w.block(WEBTEST_CRITERIA, Some(flatten_webtest_criteria(criteria)?))?;
            }
        }

        Ok(w.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::normalize;
    use serde_json::json;

    fn base() -> Value {
        json!({
            "name": "cpu",
            "resource_group_name": "rg",
            "scopes": ["/subscriptions/1/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/b",
                       "/subscriptions/1/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/a"],
            "severity": 2,
            "tags": {"env": "prod"},
            "action": [{"action_group_id": "/subscriptions/1/resourceGroups/rg/providers/Microsoft.Insights/actionGroups/ops",
                        "webhook_properties": {"team": "infra"}}]
        })
    }

    fn id() -> ResourceId {
        ResourceId::new("1", "rg", RESOURCE_TYPE, "cpu").unwrap()
    }

    fn round_trip(config: &Value) -> (MetricAlert, Map<String, Value>) {
        let reader = BlockReader::from_value(&METRIC_ALERT_SCHEMA, config).unwrap();
        reader.validate().unwrap();
        let shape = MetricAlertKind::resolve_shape(&reader).unwrap();
        let model = MetricAlertKind::expand(&reader, shape).unwrap();

        // through the wire and back
        let wire = serde_json::to_value(&model).unwrap();
        let model: MetricAlert = serde_json::from_value(wire).unwrap();

        let flat = MetricAlertKind::flatten(&id(), &model).unwrap();
        (model, flat)
    }

    #[test]
    fn test_static_criteria_round_trip() {
        let mut config = base();
        config["criteria"] = json!([{
            "metric_namespace": "Microsoft.Compute/virtualMachines",
            "metric_name": "Percentage CPU",
            "aggregation": "Average",
            "operator": "GreaterThan",
            "threshold": 90,
            "dimension": [{"name": "Instance", "operator": "Include", "values": ["b", "a"]}]
        }]);

        let (model, flat) = round_trip(&config);
        match &model.properties.criteria {
            AlertCriteria::StaticMultiResource(c) => assert_eq!(c[0].name, "Metric1"),
            other => panic!("unexpected criteria {:?}", other),
        }
        assert_eq!(flat, normalize(&METRIC_ALERT_SCHEMA, config.as_object().unwrap()));
        // dimension values keep their order
        assert_eq!(flat["criteria"][0]["dimension"][0]["values"], json!(["b", "a"]));
    }

    #[test]
    fn test_dynamic_criteria_round_trip() {
        let mut config = base();
        config["dynamic_criteria"] = json!([{
            "metric_namespace": "ns",
            "metric_name": "Requests",
            "aggregation": "Count",
            "operator": "GreaterOrLessThan",
            "alert_sensitivity": "High",
            "ignore_data_before": "2024-03-01T00:00:00Z"
        }]);

        let (model, flat) = round_trip(&config);
        match &model.properties.criteria {
            AlertCriteria::DynamicMultiResource(c) => {
                assert_eq!(c[0].failing_periods.unwrap().number_of_evaluation_periods, 4.0);
            }
            other => panic!("unexpected criteria {:?}", other),
        }
        assert_eq!(flat, normalize(&METRIC_ALERT_SCHEMA, config.as_object().unwrap()));
    }

    #[test]
    fn test_ignore_data_before_kept_as_written() {
        for stamp in ["2024-03-01T00:00:00.500Z", "2024-03-01T00:00:00+00:00", "2024-03-01T02:00:00+02:00"] {
            let mut config = base();
            config["dynamic_criteria"] = json!([{
                "metric_namespace": "ns",
                "metric_name": "Requests",
                "aggregation": "Count",
                "operator": "GreaterThan",
                "alert_sensitivity": "Low",
                "ignore_data_before": stamp
            }]);

            let (model, flat) = round_trip(&config);
            let wire = serde_json::to_value(&model).unwrap();
            assert_eq!(wire["properties"]["criteria"]["allOf"][0]["ignoreDataBefore"], json!(stamp));
            assert_eq!(flat["dynamic_criteria"][0]["ignore_data_before"], json!(stamp));
            assert_eq!(flat, normalize(&METRIC_ALERT_SCHEMA, config.as_object().unwrap()));
        }
    }

    #[test]
    fn test_ignore_data_before_must_be_rfc3339() {
        let mut config = base();
        config["dynamic_criteria"] = json!([{
            "metric_namespace": "ns",
            "metric_name": "Requests",
            "aggregation": "Count",
            "operator": "GreaterThan",
            "alert_sensitivity": "Low",
            "ignore_data_before": "yesterday"
        }]);
        let reader = BlockReader::from_value(&METRIC_ALERT_SCHEMA, &config).unwrap();
        match MetricAlertKind::expand(&reader, CriteriaKind::DynamicMulti) {
            Err(MapError::Invalid { field, .. }) => {
                assert_eq!(field, "dynamic_criteria.0.ignore_data_before")
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_webtest_criteria_round_trip() {
        let mut config = base();
        config[WEBTEST_CRITERIA] = json!([{
            "web_test_id": "wt",
            "component_id": "ai",
            "failed_location_count": 2
        }]);

        let (_, flat) = round_trip(&config);
        assert_eq!(flat, normalize(&METRIC_ALERT_SCHEMA, config.as_object().unwrap()));
    }

    #[test]
    fn test_wire_discriminators() {
        let criterion = MetricCriterion {
            name: "Metric1".to_string(),
            metric_name: "m".to_string(),
            metric_namespace: "ns".to_string(),
            time_aggregation: "Average".to_string(),
            dimensions: vec![],
            operator: "GreaterThan".to_string(),
            threshold: 1.0,
            skip_metric_validation: false,
        };

        let single = serde_json::to_value(AlertCriteria::StaticSingleResource(vec![criterion.clone()])).unwrap();
        assert_eq!(
            single["odata.type"],
            json!("Microsoft.Azure.Monitor.SingleResourceMultipleMetricCriteria")
        );

        let multi = serde_json::to_value(AlertCriteria::StaticMultiResource(vec![criterion])).unwrap();
        assert_eq!(
            multi["odata.type"],
            json!("Microsoft.Azure.Monitor.MultipleResourceMultipleMetricCriteria")
        );
        assert_eq!(multi["allOf"][0]["criterionType"], json!("StaticThresholdCriterion"));
    }

    #[test]
    fn test_decode_rejects_mixed_and_empty_multi() {
        let empty = json!({"odata.type": "Microsoft.Azure.Monitor.MultipleResourceMultipleMetricCriteria", "allOf": []});
        assert!(serde_json::from_value::<AlertCriteria>(empty).is_err());

        let mixed = json!({
            "odata.type": "Microsoft.Azure.Monitor.MultipleResourceMultipleMetricCriteria",
            "allOf": [
                {"criterionType": "StaticThresholdCriterion", "name": "Metric1", "metricName": "a",
                 "timeAggregation": "Average", "operator": "GreaterThan", "threshold": 1.0},
                {"criterionType": "DynamicThresholdCriterion", "name": "Metric2", "metricName": "b",
                 "timeAggregation": "Average", "operator": "GreaterThan", "alertSensitivity": "Low"}
            ]
        });
        assert!(serde_json::from_value::<AlertCriteria>(mixed).is_err());
    }

    #[test]
    fn test_flatten_defaults_missing_failing_periods() {
        let wire = json!({
            "odata.type": "Microsoft.Azure.Monitor.MultipleResourceMultipleMetricCriteria",
            "allOf": [{"criterionType": "DynamicThresholdCriterion", "name": "Metric1", "metricName": "a",
                       "metricNamespace": null, "dimensions": null,
                       "timeAggregation": "Average", "operator": "GreaterThan", "alertSensitivity": "Low"}]
        });
        let criteria: AlertCriteria = serde_json::from_value(wire).unwrap();
        let AlertCriteria::DynamicMultiResource(items) = &criteria else {
            panic!("expected dynamic criteria");
        };
        let flat = flatten_dynamic_criteria(items).unwrap();
        assert_eq!(flat[0]["evaluation_total_count"], json!(1));
        assert_eq!(flat[0]["evaluation_failure_count"], json!(1));
        assert_eq!(flat[0]["metric_namespace"], json!(""));
        assert_eq!(flat[0]["dimension"], json!([]));
    }

    #[test]
    fn test_pin_to_single_resource() {
        assert_eq!(
            CriteriaKind::StaticMulti.pin_to(CriteriaKind::StaticSingle),
            CriteriaKind::StaticSingle
        );
        assert_eq!(
            CriteriaKind::StaticMulti.pin_to(CriteriaKind::StaticMulti),
            CriteriaKind::StaticMulti
        );
        assert_eq!(
            CriteriaKind::DynamicMulti.pin_to(CriteriaKind::StaticSingle),
            CriteriaKind::DynamicMulti
        );
    }

    #[test]
    fn test_expand_rejects_severity_out_of_range() {
        let mut config = base();
        config["severity"] = json!(7);
        config[WEBTEST_CRITERIA] = json!([{"web_test_id": "wt", "component_id": "ai", "failed_location_count": 1}]);
        let reader = BlockReader::from_value(&METRIC_ALERT_SCHEMA, &config).unwrap();
        assert!(matches!(
            MetricAlertKind::expand(&reader, CriteriaKind::WebTest),
            Err(MapError::Invalid { .. })
        ));
    }
}
