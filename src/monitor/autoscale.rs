//! Autoscale settings
//!
//! Capacity bounds and scale-action values travel as decimal strings and are
//! parsed strictly when read back. A profile is scheduled by a fixed date
//! window or a weekly recurrence, never both; a profile with neither is the
//! default profile.

use std::collections::BTreeMap;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::numeric::{format_decimal, parse_decimal};
use super::{non_empty, nullable};
use crate::bag::{BlockReader, BlockWriter, DefaultValue, Field, FieldKind, Schema};
use crate::error::MapError;
use crate::identity::{IdentityError, ResourceId};
use crate::reconciler::{ResourceKind, Scope};
use crate::variant::{resolve_optional, VariantGroup};

pub const RESOURCE_TYPE: &str = "autoScaleSettings";

const CAPACITY_MAX: i64 = 1000;
const RECURRENCE_FREQUENCY: &str = "Week";
const NOTIFICATION_OPERATION: &str = "scale";
const PREDICTIVE_DISABLED: &str = "Disabled";
const DEFAULT_TIME_ZONE: &str = "UTC";

const WEEKDAYS: &[&str] = &[
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Windows time zone names accepted by the autoscale API
const TIME_ZONES: &[&str] = &[
    "Dateline Standard Time",
    "UTC-11",
    "Hawaiian Standard Time",
    "Alaskan Standard Time",
    "Pacific Standard Time (Mexico)",
    "Pacific Standard Time",
    "US Mountain Standard Time",
    "Mountain Standard Time (Mexico)",
    "Mountain Standard Time",
    "Central America Standard Time",
    "Central Standard Time",
    "Central Standard Time (Mexico)",
    "Canada Central Standard Time",
    "SA Pacific Standard Time",
    "Eastern Standard Time",
    "US Eastern Standard Time",
    "Venezuela Standard Time",
    "Paraguay Standard Time",
    "Atlantic Standard Time",
    "Central Brazilian Standard Time",
    "SA Western Standard Time",
    "Pacific SA Standard Time",
    "Newfoundland Standard Time",
    "E. South America Standard Time",
    "Argentina Standard Time",
    "SA Eastern Standard Time",
    "Greenland Standard Time",
    "Montevideo Standard Time",
    "Bahia Standard Time",
    "UTC-02",
    "Mid-Atlantic Standard Time",
    "Azores Standard Time",
    "Cape Verde Standard Time",
    "Morocco Standard Time",
    "UTC",
    "GMT Standard Time",
    "Greenwich Standard Time",
    "W. Europe Standard Time",
    "Central Europe Standard Time",
    "Romance Standard Time",
    "Central European Standard Time",
    "W. Central Africa Standard Time",
    "Namibia Standard Time",
    "Jordan Standard Time",
    "GTB Standard Time",
    "Middle East Standard Time",
    "Egypt Standard Time",
    "Syria Standard Time",
    "E. Europe Standard Time",
    "South Africa Standard Time",
    "FLE Standard Time",
    "Turkey Standard Time",
    "Israel Standard Time",
    "Kaliningrad Standard Time",
    "Libya Standard Time",
    "Arabic Standard Time",
    "Arab Standard Time",
    "Belarus Standard Time",
    "Russian Standard Time",
    "E. Africa Standard Time",
    "Iran Standard Time",
    "Arabian Standard Time",
    "Azerbaijan Standard Time",
    "Russia Time Zone 3",
    "Mauritius Standard Time",
    "Georgian Standard Time",
    "Caucasus Standard Time",
    "Afghanistan Standard Time",
    "West Asia Standard Time",
    "Ekaterinburg Standard Time",
    "Pakistan Standard Time",
    "India Standard Time",
    "Sri Lanka Standard Time",
    "Nepal Standard Time",
    "Central Asia Standard Time",
    "Bangladesh Standard Time",
    "N. Central Asia Standard Time",
    "Myanmar Standard Time",
    "SE Asia Standard Time",
    "North Asia Standard Time",
    "China Standard Time",
    "North Asia East Standard Time",
    "Singapore Standard Time",
    "W. Australia Standard Time",
    "Taipei Standard Time",
    "Ulaanbaatar Standard Time",
    "Tokyo Standard Time",
    "Korea Standard Time",
    "Yakutsk Standard Time",
    "Cen. Australia Standard Time",
    "AUS Central Standard Time",
    "E. Australia Standard Time",
    "AUS Eastern Standard Time",
    "West Pacific Standard Time",
    "Tasmania Standard Time",
    "Magadan Standard Time",
    "Vladivostok Standard Time",
    "Russia Time Zone 10",
    "Central Pacific Standard Time",
    "Russia Time Zone 11",
    "New Zealand Standard Time",
    "UTC+12",
    "Fiji Standard Time",
    "Kamchatka Standard Time",
    "Tonga Standard Time",
    "Samoa Standard Time",
    "Line Islands Standard Time",
];

// ============================================================================
// Config schema
// ============================================================================

static SCALE_DIMENSION_SCHEMA: Schema = Schema::new(
    "dimensions",
    &[
        Field::required("name", FieldKind::String),
        Field::required("operator", FieldKind::String).one_of(&["Equals", "NotEquals"]),
        Field::required("values", FieldKind::StringList),
    ],
);

static METRIC_TRIGGER_SCHEMA: Schema = Schema::new(
    "metric_trigger",
    &[
        Field::required("metric_name", FieldKind::String),
        Field::required("metric_resource_id", FieldKind::String),
        Field::required("time_grain", FieldKind::String),
        Field::required("statistic", FieldKind::String).one_of(&["Average", "Max", "Min", "Sum"]),
        Field::required("time_window", FieldKind::String),
        Field::required("time_aggregation", FieldKind::String)
            .one_of(&["Average", "Count", "Maximum", "Minimum", "Total", "Last"]),
        Field::required("operator", FieldKind::String).one_of(&[
            "Equals",
            "GreaterThan",
            "GreaterThanOrEqual",
            "LessThan",
            "LessThanOrEqual",
            "NotEquals",
        ]),
        Field::required("threshold", FieldKind::Float),
        Field::optional("metric_namespace", FieldKind::String),
        Field::optional("divide_by_instance_count", FieldKind::Bool),
        Field::optional("dimensions", FieldKind::BlockList(&SCALE_DIMENSION_SCHEMA)),
    ],
);

static SCALE_ACTION_SCHEMA: Schema = Schema::new(
    "scale_action",
    &[
        Field::required("direction", FieldKind::String).one_of(&["Decrease", "Increase"]),
        Field::required("type", FieldKind::String).one_of(&[
            "ChangeCount",
            "ExactCount",
            "PercentChangeCount",
            "ServiceAllowedNextValue",
        ]),
        Field::required("value", FieldKind::Int),
        Field::required("cooldown", FieldKind::String),
    ],
);

static RULE_SCHEMA: Schema = Schema::new(
    "rule",
    &[
        Field::required("metric_trigger", FieldKind::BlockList(&METRIC_TRIGGER_SCHEMA)).max_items(1),
        Field::required("scale_action", FieldKind::BlockList(&SCALE_ACTION_SCHEMA)).max_items(1),
    ],
);

static CAPACITY_SCHEMA: Schema = Schema::new(
    "capacity",
    &[
        Field::required("minimum", FieldKind::Int),
        Field::required("maximum", FieldKind::Int),
        Field::required("default", FieldKind::Int),
    ],
);

static FIXED_DATE_SCHEMA: Schema = Schema::new(
    "fixed_date",
    &[
        Field::optional("timezone", FieldKind::String)
            .with_default(DefaultValue::Str(DEFAULT_TIME_ZONE))
            .one_of(TIME_ZONES),
        Field::required("start", FieldKind::String),
        Field::required("end", FieldKind::String),
    ],
);

static RECURRENCE_SCHEMA: Schema = Schema::new(
    "recurrence",
    &[
        Field::optional("timezone", FieldKind::String)
            .with_default(DefaultValue::Str(DEFAULT_TIME_ZONE))
            .one_of(TIME_ZONES),
        Field::required("days", FieldKind::StringList),
        Field::required("hours", FieldKind::IntList).max_items(1),
        Field::required("minutes", FieldKind::IntList).max_items(1),
    ],
);

static PROFILE_SCHEMA: Schema = Schema::new(
    "profile",
    &[
        Field::required("name", FieldKind::String),
        Field::required("capacity", FieldKind::BlockList(&CAPACITY_SCHEMA)).max_items(1),
        Field::optional("rule", FieldKind::BlockList(&RULE_SCHEMA)).max_items(10),
        Field::optional("fixed_date", FieldKind::BlockList(&FIXED_DATE_SCHEMA)).max_items(1),
        Field::optional("recurrence", FieldKind::BlockList(&RECURRENCE_SCHEMA)).max_items(1),
    ],
);

static PREDICTIVE_SCHEMA: Schema = Schema::new(
    "predictive",
    &[
        Field::required("scale_mode", FieldKind::String).one_of(&["Enabled", "ForecastOnly"]),
        Field::optional("look_ahead_time", FieldKind::String),
    ],
);

static EMAIL_SCHEMA: Schema = Schema::new(
    "email",
    &[
        Field::optional("send_to_subscription_administrator", FieldKind::Bool),
        Field::optional("send_to_subscription_co_administrator", FieldKind::Bool),
        Field::optional("custom_emails", FieldKind::StringList),
    ],
);

static WEBHOOK_SCHEMA: Schema = Schema::new(
    "webhook",
    &[
        Field::required("service_uri", FieldKind::String),
        Field::optional("properties", FieldKind::StringMap),
    ],
);

static NOTIFICATION_SCHEMA: Schema = Schema::new(
    "notification",
    &[
        Field::optional("email", FieldKind::BlockList(&EMAIL_SCHEMA)).max_items(1),
        Field::optional("webhook", FieldKind::BlockList(&WEBHOOK_SCHEMA)),
    ],
);

pub static AUTOSCALE_SETTING_SCHEMA: Schema = Schema::new(
    "azurerm_monitor_autoscale_setting",
    &[
        Field::required("name", FieldKind::String),
        Field::required("resource_group_name", FieldKind::String),
        Field::required("location", FieldKind::String),
        Field::required("target_resource_id", FieldKind::String),
        Field::optional("enabled", FieldKind::Bool).with_default(DefaultValue::Bool(true)),
        Field::optional("predictive", FieldKind::BlockList(&PREDICTIVE_SCHEMA)).max_items(1),
        Field::required("profile", FieldKind::BlockList(&PROFILE_SCHEMA)).max_items(20),
        Field::optional("notification", FieldKind::BlockList(&NOTIFICATION_SCHEMA)).max_items(1),
        Field::optional("tags", FieldKind::StringMap),
    ],
);

// ============================================================================
// Domain model
// ============================================================================

/// Instance counts, decimal strings on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleCapacity {
    pub minimum: String,
    pub maximum: String,
    pub default: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScaleRuleDimension {
    pub dimension_name: String,
    pub operator: String,
    #[serde(default, deserialize_with = "nullable")]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricTrigger {
    pub metric_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_namespace: Option<String>,
    pub metric_resource_uri: String,
    pub time_grain: String,
    pub statistic: String,
    pub time_window: String,
    pub time_aggregation: String,
    pub operator: String,
    pub threshold: f64,
    #[serde(default, deserialize_with = "nullable")]
    pub dimensions: Vec<ScaleRuleDimension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divide_per_instance: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleAction {
    pub direction: String,
    #[serde(rename = "type")]
    pub scale_type: String,
    /// Decimal string on the wire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub cooldown: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleRule {
    pub metric_trigger: MetricTrigger,
    pub scale_action: ScaleAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrentSchedule {
    pub time_zone: String,
    #[serde(default, deserialize_with = "nullable")]
    pub days: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub hours: Vec<i64>,
    #[serde(default, deserialize_with = "nullable")]
    pub minutes: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub frequency: String,
    pub schedule: RecurrentSchedule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscaleProfile {
    pub name: String,
    pub capacity: ScaleCapacity,
    #[serde(default, deserialize_with = "nullable")]
    pub rules: Vec<ScaleRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_date: Option<TimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailNotification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_to_subscription_administrator: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_to_subscription_co_administrators: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub custom_emails: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookNotification {
    #[serde(default, deserialize_with = "nullable")]
    pub service_uri: String,
    #[serde(default, deserialize_with = "nullable")]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscaleNotification {
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailNotification>,
    #[serde(default, deserialize_with = "nullable")]
    pub webhooks: Vec<WebhookNotification>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictivePolicy {
    pub scale_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_look_ahead_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscaleSettingProperties {
    #[serde(default, deserialize_with = "nullable")]
    pub profiles: Vec<AutoscaleProfile>,
    #[serde(default, deserialize_with = "nullable")]
    pub notifications: Vec<AutoscaleNotification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(
        rename = "predictiveAutoscalePolicy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub predictive: Option<PredictivePolicy>,
    #[serde(default, deserialize_with = "nullable")]
    pub target_resource_uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscaleSetting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub location: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tags: BTreeMap<String, String>,
    pub properties: AutoscaleSettingProperties,
}

// ============================================================================
// Expand
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    FixedDate,
    Recurrence,
}

const SCHEDULE_GROUPS: [VariantGroup<Schedule>; 2] = [
    VariantGroup::new(Schedule::FixedDate, "fixed_date"),
    VariantGroup::new(Schedule::Recurrence, "recurrence"),
];

fn field_of(block: &BlockReader<'_>, name: &str) -> String {
    block.path().key(name).to_string()
}

fn check_range(block: &BlockReader<'_>, name: &str, value: i64, min: i64, max: i64) -> Result<(), MapError> {
    if value < min || value > max {
        return Err(MapError::invalid(
            field_of(block, name),
            format!("{} is outside the range {} to {}", value, min, max),
        ));
    }
    Ok(())
}

fn required_block<'a>(block: &BlockReader<'a>, name: &str) -> Result<BlockReader<'a>, MapError> {
    block
        .block(name)?
        .ok_or_else(|| MapError::invalid(field_of(block, name), "block is required"))
}

fn expand_capacity(profile: &BlockReader<'_>) -> Result<ScaleCapacity, MapError> {
    let capacity = required_block(profile, "capacity")?;
    let mut values = [0i64; 3];
    for (slot, name) in values.iter_mut().zip(["minimum", "maximum", "default"]) {
        *slot = capacity.int(name)?;
        check_range(&capacity, name, *slot, 0, CAPACITY_MAX)?;
    }
    let [minimum, maximum, default] = values;
    Ok(ScaleCapacity {
        minimum: format_decimal(minimum),
        maximum: format_decimal(maximum),
        default: format_decimal(default),
    })
}

fn expand_rule(rule: &BlockReader<'_>) -> Result<ScaleRule, MapError> {
    let trigger = required_block(rule, "metric_trigger")?;
    let action = required_block(rule, "scale_action")?;

    let mut dimensions = Vec::new();
    for dimension in trigger.blocks("dimensions")? {
        dimensions.push(ScaleRuleDimension {
            dimension_name: dimension.string("name")?,
            operator: dimension.string("operator")?,
            values: dimension.strings("values")?,
        });
    }

    let value = action.int("value")?;
    check_range(&action, "value", value, 0, i64::MAX)?;

    Ok(ScaleRule {
        metric_trigger: MetricTrigger {
            metric_name: trigger.string("metric_name")?,
            metric_namespace: Some(trigger.string("metric_namespace")?),
            metric_resource_uri: trigger.string("metric_resource_id")?,
            time_grain: trigger.string("time_grain")?,
            statistic: trigger.string("statistic")?,
            time_window: trigger.string("time_window")?,
            time_aggregation: trigger.string("time_aggregation")?,
            operator: trigger.string("operator")?,
            threshold: trigger.float("threshold")?,
            dimensions,
            divide_per_instance: Some(trigger.bool("divide_by_instance_count")?),
        },
        scale_action: ScaleAction {
            direction: action.string("direction")?,
            scale_type: action.string("type")?,
            value: Some(format_decimal(value)),
            cooldown: action.string("cooldown")?,
        },
    })
}

/// The raw string goes to the wire unchanged once it parses
fn rfc3339(block: &BlockReader<'_>, name: &str) -> Result<String, MapError> {
    let raw = block.string(name)?;
    DateTime::parse_from_rfc3339(&raw).map_err(|e| {
        MapError::invalid(field_of(block, name), format!("{:?} is not an RFC 3339 time: {}", raw, e))
    })?;
    Ok(raw)
}

fn expand_fixed_date(block: &BlockReader<'_>) -> Result<TimeWindow, MapError> {
    Ok(TimeWindow {
        time_zone: Some(block.string("timezone")?),
        start: rfc3339(block, "start")?,
        end: rfc3339(block, "end")?,
    })
}

fn expand_recurrence(block: &BlockReader<'_>) -> Result<Recurrence, MapError> {
    let days = block.strings("days")?;
    if let Some(day) = days.iter().find(|d| !WEEKDAYS.contains(&d.as_str())) {
        return Err(MapError::invalid(
            field_of(block, "days"),
            format!("{:?} is not a day of the week", day),
        ));
    }
    let hours = block.ints("hours")?;
    for hour in &hours {
        check_range(block, "hours", *hour, 0, 23)?;
    }
    let minutes = block.ints("minutes")?;
    for minute in &minutes {
        check_range(block, "minutes", *minute, 0, 59)?;
    }
    Ok(Recurrence {
        frequency: RECURRENCE_FREQUENCY.to_string(),
        schedule: RecurrentSchedule {
            time_zone: block.string("timezone")?,
            days,
            hours,
            minutes,
        },
    })
}

fn expand_profile(profile: &BlockReader<'_>) -> Result<AutoscaleProfile, MapError> {
    let (fixed_date, recurrence) = match resolve_optional(profile, &SCHEDULE_GROUPS)? {
        Some(Schedule::FixedDate) => (Some(expand_fixed_date(&required_block(profile, "fixed_date")?)?), None),
        Some(Schedule::Recurrence) => (None, Some(expand_recurrence(&required_block(profile, "recurrence")?)?)),
        None => (None, None),
    };

    let mut rules = Vec::new();
    for rule in profile.blocks("rule")? {
        rules.push(expand_rule(&rule)?);
    }

    Ok(AutoscaleProfile {
        name: profile.string("name")?,
        capacity: expand_capacity(profile)?,
        rules,
        fixed_date,
        recurrence,
    })
}

fn expand_notifications(config: &BlockReader<'_>) -> Result<Vec<AutoscaleNotification>, MapError> {
    let mut notifications = Vec::new();
    for block in config.blocks("notification")? {
        let email = match block.block("email")? {
            Some(email) => Some(EmailNotification {
                send_to_subscription_administrator: Some(email.bool("send_to_subscription_administrator")?),
                send_to_subscription_co_administrators: Some(
                    email.bool("send_to_subscription_co_administrator")?,
                ),
                custom_emails: email.strings("custom_emails")?,
            }),
            None => None,
        };
        let mut webhooks = Vec::new();
        for hook in block.blocks("webhook")? {
            webhooks.push(WebhookNotification {
                service_uri: hook.string("service_uri")?,
                properties: hook.string_map("properties")?,
            });
        }
        if email.is_none() && webhooks.is_empty() {
            return Err(MapError::invalid(
                block.path().to_string(),
                "at least one of email or webhook must be set",
            ));
        }
        notifications.push(AutoscaleNotification {
            operation: NOTIFICATION_OPERATION.to_string(),
            email,
            webhooks,
        });
    }
    Ok(notifications)
}

// ============================================================================
// Flatten
// ============================================================================

fn flatten_capacity(w: &BlockWriter, prefix: &str, capacity: &ScaleCapacity) -> Result<Map<String, Value>, MapError> {
    let mut cw = w.nested("capacity")?;
    for (name, raw) in [
        ("minimum", &capacity.minimum),
        ("maximum", &capacity.maximum),
        ("default", &capacity.default),
    ] {
        let value = parse_decimal(&format!("{}.capacity.0.{}", prefix, name), raw)?;
        cw.int(name, value)?;
    }
    Ok(cw.finish())
}

fn flatten_rule(w: &BlockWriter, prefix: &str, rule: &ScaleRule) -> Result<Map<String, Value>, MapError> {
    let mut rw = w.nested("rule")?;
    let trigger = &rule.metric_trigger;

    let mut dimensions = Vec::with_capacity(trigger.dimensions.len());
    let mut tw = rw.nested("metric_trigger")?;
    for dimension in &trigger.dimensions {
        let mut dw = tw.nested("dimensions")?;
        dw.string("name", dimension.dimension_name.as_str())?
            .string("operator", dimension.operator.as_str())?
            .strings("values", dimension.values.iter().cloned())?;
        dimensions.push(dw.finish());
    }
    tw.string("metric_name", trigger.metric_name.as_str())?
        .opt_string("metric_namespace", trigger.metric_namespace.as_deref())?
        .string("metric_resource_id", trigger.metric_resource_uri.as_str())?
        .string("time_grain", trigger.time_grain.as_str())?
        .string("statistic", trigger.statistic.as_str())?
        .string("time_window", trigger.time_window.as_str())?
        .string("time_aggregation", trigger.time_aggregation.as_str())?
        .string("operator", trigger.operator.as_str())?
        .float("threshold", trigger.threshold)?
        .opt_bool("divide_by_instance_count", trigger.divide_per_instance)?
        .blocks("dimensions", dimensions)?;

    let action = &rule.scale_action;
    let value = match action.value.as_deref() {
        Some(raw) if !raw.is_empty() => {
            Some(parse_decimal(&format!("{}.scale_action.0.value", prefix), raw)?)
        }
        _ => None,
    };
    let mut aw = rw.nested("scale_action")?;
    aw.string("direction", action.direction.as_str())?
        .string("type", action.scale_type.as_str())?
        .opt_int("value", value)?
        .string("cooldown", action.cooldown.as_str())?;

    rw.block("metric_trigger", Some(tw.finish()))?
        .block("scale_action", Some(aw.finish()))?;
    Ok(rw.finish())
}

fn flatten_profile(w: &BlockWriter, idx: usize, profile: &AutoscaleProfile) -> Result<Map<String, Value>, MapError> {
    let prefix = format!("profile.{}", idx);
    let mut pw = w.nested("profile")?;

    let capacity = flatten_capacity(&pw, &prefix, &profile.capacity)?;

    let mut rules = Vec::with_capacity(profile.rules.len());
    for (j, rule) in profile.rules.iter().enumerate() {
        rules.push(flatten_rule(&pw, &format!("{}.rule.{}", prefix, j), rule)?);
    }

    let fixed_date = match &profile.fixed_date {
        Some(window) => {
            let mut fw = pw.nested("fixed_date")?;
            fw.opt_string("timezone", window.time_zone.as_deref())?
                .string("start", window.start.as_str())?
                .string("end", window.end.as_str())?;
            Some(fw.finish())
        }
        None => None,
    };

    let recurrence = match &profile.recurrence {
        Some(recurrence) => {
            let schedule = &recurrence.schedule;
            let mut rw = pw.nested("recurrence")?;
            rw.string("timezone", schedule.time_zone.as_str())?
                .strings("days", schedule.days.iter().cloned())?
                .ints("hours", &schedule.hours)?
                .ints("minutes", &schedule.minutes)?;
            Some(rw.finish())
        }
        None => None,
    };

    pw.string("name", profile.name.as_str())?
        .block("capacity", Some(capacity))?
        .blocks("rule", rules)?
        .block("fixed_date", fixed_date)?
        .block("recurrence", recurrence)?;
    Ok(pw.finish())
}

fn flatten_notification(w: &BlockWriter, notification: &AutoscaleNotification) -> Result<Map<String, Value>, MapError> {
    let mut nw = w.nested("notification")?;

    let email = match &notification.email {
        Some(email) => {
            let mut ew = nw.nested("email")?;
            ew.bool(
                "send_to_subscription_administrator",
                email.send_to_subscription_administrator.unwrap_or(false),
            )?
            .bool(
                "send_to_subscription_co_administrator",
                email.send_to_subscription_co_administrators.unwrap_or(false),
            )?
            .strings("custom_emails", email.custom_emails.iter().cloned())?;
            Some(ew.finish())
        }
        None => None,
    };

    let mut webhooks = Vec::with_capacity(notification.webhooks.len());
    for hook in &notification.webhooks {
        let mut hw = nw.nested("webhook")?;
        hw.string("service_uri", hook.service_uri.as_str())?
            .string_map("properties", &hook.properties)?;
        webhooks.push(hw.finish());
    }

    nw.block("email", email)?.blocks("webhook", webhooks)?;
    Ok(nw.finish())
}

pub struct AutoscaleSettingKind;

impl ResourceKind for AutoscaleSettingKind {
    type Id = ResourceId;
    type Model = AutoscaleSetting;
    type Shape = ();

    const TYPE_NAME: &'static str = "azurerm_monitor_autoscale_setting";
    const API_VERSION: &'static str = "2022-10-01";
    const SCHEMA: &'static Schema = &AUTOSCALE_SETTING_SCHEMA;

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

    fn expand(config: &BlockReader<'_>, _shape: ()) -> Result<AutoscaleSetting, MapError> {
        let mut profiles = Vec::new();
        for profile in config.blocks("profile")? {
            profiles.push(expand_profile(&profile)?);
        }

        let predictive = match config.block("predictive")? {
            Some(block) => Some(PredictivePolicy {
                scale_mode: block.string("scale_mode")?,
                scale_look_ahead_time: non_empty(block.string("look_ahead_time")?),
            }),
            None => None,
        };

        Ok(AutoscaleSetting {
            id: None,
            location: config.string("location")?,
            tags: config.string_map("tags")?,
            properties: AutoscaleSettingProperties {
                profiles,
                notifications: expand_notifications(config)?,
                enabled: Some(config.bool("enabled")?),
                predictive,
                target_resource_uri: config.string("target_resource_id")?,
            },
        })
    }

    fn flatten(id: &ResourceId, model: &AutoscaleSetting) -> Result<Map<String, Value>, MapError> {
        let props = &model.properties;
        let mut w = BlockWriter::new(&AUTOSCALE_SETTING_SCHEMA);

        let mut profiles = Vec::with_capacity(props.profiles.len());
        for (idx, profile) in props.profiles.iter().enumerate() {
            profiles.push(flatten_profile(&w, idx, profile)?);
        }

        let mut notifications = Vec::with_capacity(props.notifications.len());
        for notification in &props.notifications {
            notifications.push(flatten_notification(&w, notification)?);
        }

        let predictive = match &props.predictive {
            Some(policy) if policy.scale_mode != PREDICTIVE_DISABLED => {
                let mut pw = w.nested("predictive")?;
                pw.string("scale_mode", policy.scale_mode.as_str())?
                    .opt_string("look_ahead_time", policy.scale_look_ahead_time.as_deref())?;
                Some(pw.finish())
            }
            _ => None,
        };

        // `$type` is a tag the service injects on some targets
        let tags: BTreeMap<String, String> = model
            .tags
            .iter()
            .filter(|(key, _)| key.as_str() != "$type")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        w.string("name", id.name.as_str())?
            .string("resource_group_name", id.resource_group.as_str())?
            .string("location", model.location.as_str())?
            .string("target_resource_id", props.target_resource_uri.as_str())?
            .opt_bool("enabled", props.enabled)?
            .block("predictive", predictive)?
            .blocks("profile", profiles)?
            .blocks("notification", notifications)?
            .string_map("tags", &tags)?;
        Ok(w.finish())
    }
}
