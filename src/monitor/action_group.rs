//! Action groups
//!
//! An action group is a named set of notification receivers. Every receiver
//! kind is an independent block list; an action group may carry none.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{non_empty, nullable, GLOBAL_LOCATION};
use crate::bag::{BlockReader, BlockWriter, DefaultValue, Field, FieldKind, Schema};
use crate::error::MapError;
use crate::identity::{IdentityError, ResourceId};
use crate::reconciler::{ResourceKind, Scope};

pub const RESOURCE_TYPE: &str = "actionGroups";

const SHORT_NAME_MAX: usize = 12;

/// Keys the ITSM connector requires inside `ticket_configuration`
const TICKET_CONFIGURATION_KEYS: &[&str] = &["PayloadRevision", "WorkItemType"];

// ============================================================================
// Config schema
// ============================================================================

static EMAIL_RECEIVER: Schema = Schema::new(
    "email_receiver",
    &[
        Field::required("name", FieldKind::String),
        Field::required("email_address", FieldKind::String),
        Field::optional("use_common_alert_schema", FieldKind::Bool),
    ],
);

static ITSM_RECEIVER: Schema = Schema::new(
    "itsm_receiver",
    &[
        Field::required("name", FieldKind::String),
        Field::required("workspace_id", FieldKind::String),
        Field::required("connection_id", FieldKind::String),
        Field::required("ticket_configuration", FieldKind::String),
        Field::required("region", FieldKind::String),
    ],
);

static APP_PUSH_RECEIVER: Schema = Schema::new(
    "azure_app_push_receiver",
    &[
        Field::required("name", FieldKind::String),
        Field::required("email_address", FieldKind::String),
    ],
);

static PHONE_RECEIVER: Schema = Schema::new(
    "phone_receiver",
    &[
        Field::required("name", FieldKind::String),
        Field::required("country_code", FieldKind::String),
        Field::required("phone_number", FieldKind::String),
    ],
);

static AAD_AUTH: Schema = Schema::new(
    "aad_auth",
    &[
        Field::required("object_id", FieldKind::String),
        Field::optional("identifier_uri", FieldKind::String),
        Field::optional("tenant_id", FieldKind::String),
    ],
);

static WEBHOOK_RECEIVER: Schema = Schema::new(
    "webhook_receiver",
    &[
        Field::required("name", FieldKind::String),
        Field::required("service_uri", FieldKind::String),
        Field::optional("use_common_alert_schema", FieldKind::Bool),
        Field::optional("aad_auth", FieldKind::BlockList(&AAD_AUTH)).max_items(1),
    ],
);

static RUNBOOK_RECEIVER: Schema = Schema::new(
    "automation_runbook_receiver",
    &[
        Field::required("name", FieldKind::String),
        Field::required("automation_account_id", FieldKind::String),
        Field::required("runbook_name", FieldKind::String),
        Field::required("webhook_resource_id", FieldKind::String),
        Field::required("is_global_runbook", FieldKind::Bool),
        Field::required("service_uri", FieldKind::String),
        Field::optional("use_common_alert_schema", FieldKind::Bool),
    ],
);

static LOGIC_APP_RECEIVER: Schema = Schema::new(
    "logic_app_receiver",
    &[
        Field::required("name", FieldKind::String),
        Field::required("resource_id", FieldKind::String),
        Field::required("callback_url", FieldKind::String),
        Field::optional("use_common_alert_schema", FieldKind::Bool),
    ],
);

static FUNCTION_RECEIVER: Schema = Schema::new(
    "azure_function_receiver",
    &[
        Field::required("name", FieldKind::String),
        Field::required("function_app_resource_id", FieldKind::String),
        Field::required("function_name", FieldKind::String),
        Field::required("http_trigger_url", FieldKind::String),
        Field::optional("use_common_alert_schema", FieldKind::Bool),
    ],
);

static ARM_ROLE_RECEIVER: Schema = Schema::new(
    "arm_role_receiver",
    &[
        Field::required("name", FieldKind::String),
        Field::required("role_id", FieldKind::String),
        Field::optional("use_common_alert_schema", FieldKind::Bool),
    ],
);

static EVENT_HUB_RECEIVER: Schema = Schema::new(
    "event_hub_receiver",
    &[
        Field::required("name", FieldKind::String),
        Field::required("event_hub_namespace", FieldKind::String),
        Field::required("event_hub_name", FieldKind::String),
        Field::optional("subscription_id", FieldKind::String),
        Field::optional("tenant_id", FieldKind::String),
        Field::optional("use_common_alert_schema", FieldKind::Bool),
    ],
);

pub static ACTION_GROUP_SCHEMA: Schema = Schema::new(
    "azurerm_monitor_action_group",
    &[
        Field::required("name", FieldKind::String),
        Field::required("resource_group_name", FieldKind::String),
        Field::optional("location", FieldKind::String).with_default(DefaultValue::Str(GLOBAL_LOCATION)),
        Field::required("short_name", FieldKind::String),
        Field::optional("enabled", FieldKind::Bool).with_default(DefaultValue::Bool(true)),
        Field::optional("email_receiver", FieldKind::BlockList(&EMAIL_RECEIVER)),
        Field::optional("itsm_receiver", FieldKind::BlockList(&ITSM_RECEIVER)),
        Field::optional("azure_app_push_receiver", FieldKind::BlockList(&APP_PUSH_RECEIVER)),
        Field::optional("sms_receiver", FieldKind::BlockList(&PHONE_RECEIVER)),
        Field::optional("webhook_receiver", FieldKind::BlockList(&WEBHOOK_RECEIVER)),
        Field::optional("automation_runbook_receiver", FieldKind::BlockList(&RUNBOOK_RECEIVER)),
        Field::optional("voice_receiver", FieldKind::BlockList(&PHONE_RECEIVER)),
        Field::optional("logic_app_receiver", FieldKind::BlockList(&LOGIC_APP_RECEIVER)),
        Field::optional("azure_function_receiver", FieldKind::BlockList(&FUNCTION_RECEIVER)),
        Field::optional("arm_role_receiver", FieldKind::BlockList(&ARM_ROLE_RECEIVER)),
        Field::optional("event_hub_receiver", FieldKind::BlockList(&EVENT_HUB_RECEIVER)),
        Field::optional("tags", FieldKind::StringMap),
    ],
);

// ============================================================================
// Domain model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailReceiver {
    pub name: String,
    pub email_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_common_alert_schema: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItsmReceiver {
    pub name: String,
    pub workspace_id: String,
    pub connection_id: String,
    pub ticket_configuration: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureAppPushReceiver {
    pub name: String,
    pub email_address: String,
}

/// SMS and voice receivers share one shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneReceiver {
    pub name: String,
    pub country_code: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookReceiver {
    pub name: String,
    pub service_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_common_alert_schema: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_aad_auth: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRunbookReceiver {
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    pub automation_account_id: String,
    pub runbook_name: String,
    pub webhook_resource_id: String,
    pub is_global_runbook: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub service_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_common_alert_schema: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicAppReceiver {
    pub name: String,
    pub resource_id: String,
    #[serde(rename = "callbackUrl")]
    pub callback_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_common_alert_schema: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureFunctionReceiver {
    pub name: String,
    pub function_app_resource_id: String,
    pub function_name: String,
    #[serde(rename = "httpTriggerUrl")]
    pub http_trigger_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_common_alert_schema: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmRoleReceiver {
    pub name: String,
    pub role_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_common_alert_schema: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHubReceiver {
    pub name: String,
    #[serde(rename = "eventHubNameSpace")]
    pub event_hub_namespace: String,
    pub event_hub_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_common_alert_schema: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionGroupProperties {
    pub group_short_name: String,
    pub enabled: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub email_receivers: Vec<EmailReceiver>,
    #[serde(default, deserialize_with = "nullable")]
    pub itsm_receivers: Vec<ItsmReceiver>,
    #[serde(default, deserialize_with = "nullable")]
    pub azure_app_push_receivers: Vec<AzureAppPushReceiver>,
    #[serde(default, deserialize_with = "nullable")]
    pub sms_receivers: Vec<PhoneReceiver>,
    #[serde(default, deserialize_with = "nullable")]
    pub webhook_receivers: Vec<WebhookReceiver>,
    #[serde(default, deserialize_with = "nullable")]
    pub automation_runbook_receivers: Vec<AutomationRunbookReceiver>,
    #[serde(default, deserialize_with = "nullable")]
    pub voice_receivers: Vec<PhoneReceiver>,
    #[serde(default, deserialize_with = "nullable")]
    pub logic_app_receivers: Vec<LogicAppReceiver>,
    #[serde(default, deserialize_with = "nullable")]
    pub azure_function_receivers: Vec<AzureFunctionReceiver>,
    #[serde(default, deserialize_with = "nullable")]
    pub arm_role_receivers: Vec<ArmRoleReceiver>,
    #[serde(default, deserialize_with = "nullable")]
    pub event_hub_receivers: Vec<EventHubReceiver>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub location: String,
    #[serde(default, deserialize_with = "nullable")]
    pub tags: BTreeMap<String, String>,
    pub properties: ActionGroupProperties,
}

// ============================================================================
// Expand / flatten
// ============================================================================

fn expand_receivers<T>(
    config: &BlockReader<'_>,
    field: &str,
    expand: impl Fn(&BlockReader<'_>) -> Result<T, MapError>,
) -> Result<Vec<T>, MapError> {
    config.blocks(field)?.iter().map(expand).collect()
}

fn flatten_receivers<T>(
    w: &mut BlockWriter,
    field: &str,
    receivers: &[T],
    flatten: impl Fn(&mut BlockWriter, &T) -> Result<(), MapError>,
) -> Result<(), MapError> {
    let mut blocks = Vec::with_capacity(receivers.len());
    for receiver in receivers {
        let mut rw = w.nested(field)?;
        flatten(&mut rw, receiver)?;
        blocks.push(rw.finish());
    }
    w.blocks(field, blocks)?;
    Ok(())
}

fn check_ticket_configuration(block: &BlockReader<'_>, raw: &str) -> Result<(), MapError> {
    let field = block.path().key("ticket_configuration").to_string();
    let parsed: Map<String, Value> = serde_json::from_str(raw)
        .map_err(|e| MapError::invalid(field.as_str(), format!("not a JSON object: {}", e)))?;
    if TICKET_CONFIGURATION_KEYS.iter().any(|key| !parsed.contains_key(*key)) {
        return Err(MapError::invalid(
            field,
            format!("must contain the keys {}", TICKET_CONFIGURATION_KEYS.join(" and ")),
        ));
    }
    Ok(())
}

fn expand_webhook(block: &BlockReader<'_>) -> Result<WebhookReceiver, MapError> {
    let mut receiver = WebhookReceiver {
        name: block.string("name")?,
        service_uri: block.string("service_uri")?,
        use_common_alert_schema: Some(block.bool("use_common_alert_schema")?),
        use_aad_auth: None,
        object_id: None,
        identifier_uri: None,
        tenant_id: None,
    };
    if let Some(auth) = block.block("aad_auth")? {
        receiver.use_aad_auth = Some(true);
        receiver.object_id = Some(auth.string("object_id")?);
        receiver.identifier_uri = Some(auth.string("identifier_uri")?);
        receiver.tenant_id = non_empty(auth.string("tenant_id")?);
    }
    Ok(receiver)
}

fn flatten_webhook(w: &mut BlockWriter, r: &WebhookReceiver) -> Result<(), MapError> {
    let auth = if r.use_aad_auth.unwrap_or(false) {
        let mut aw = w.nested("aad_auth")?;
        aw.opt_string("object_id", r.object_id.as_deref())?
            .opt_string("identifier_uri", r.identifier_uri.as_deref())?
            .opt_string("tenant_id", r.tenant_id.as_deref())?;
        Some(aw.finish())
    } else {
        None
    };
    w.string("name", r.name.as_str())?
        .string("service_uri", r.service_uri.as_str())?
        .opt_bool("use_common_alert_schema", r.use_common_alert_schema)?
        .block("aad_auth", auth)?;
    Ok(())
}

fn expand_phone(block: &BlockReader<'_>) -> Result<PhoneReceiver, MapError> {
    Ok(PhoneReceiver {
        name: block.string("name")?,
        country_code: block.string("country_code")?,
        phone_number: block.string("phone_number")?,
    })
}

fn flatten_phone(w: &mut BlockWriter, r: &PhoneReceiver) -> Result<(), MapError> {
    w.string("name", r.name.as_str())?
        .string("country_code", r.country_code.as_str())?
        .string("phone_number", r.phone_number.as_str())?;
    Ok(())
}

fn expand_properties(config: &BlockReader<'_>) -> Result<ActionGroupProperties, MapError> {
    let short_name = config.string("short_name")?;
    if short_name.is_empty() || short_name.chars().count() > SHORT_NAME_MAX {
        return Err(MapError::invalid(
            "short_name",
            format!("must be between 1 and {} characters", SHORT_NAME_MAX),
        ));
    }

    Ok(ActionGroupProperties {
        group_short_name: short_name,
        enabled: config.bool("enabled")?,
        email_receivers: expand_receivers(config, "email_receiver", |b| {
            Ok(EmailReceiver {
                name: b.string("name")?,
                email_address: b.string("email_address")?,
                use_common_alert_schema: Some(b.bool("use_common_alert_schema")?),
            })
        })?,
        itsm_receivers: expand_receivers(config, "itsm_receiver", |b| {
            let ticket_configuration = b.string("ticket_configuration")?;
            check_ticket_configuration(b, &ticket_configuration)?;
            Ok(ItsmReceiver {
                name: b.string("name")?,
                workspace_id: b.string("workspace_id")?,
                connection_id: b.string("connection_id")?,
                ticket_configuration,
                region: b.string("region")?,
            })
        })?,
        azure_app_push_receivers: expand_receivers(config, "azure_app_push_receiver", |b| {
            Ok(AzureAppPushReceiver {
                name: b.string("name")?,
                email_address: b.string("email_address")?,
            })
        })?,
        sms_receivers: expand_receivers(config, "sms_receiver", expand_phone)?,
        webhook_receivers: expand_receivers(config, "webhook_receiver", expand_webhook)?,
        automation_runbook_receivers: expand_receivers(config, "automation_runbook_receiver", |b| {
            Ok(AutomationRunbookReceiver {
                name: b.string("name")?,
                automation_account_id: b.string("automation_account_id")?,
                runbook_name: b.string("runbook_name")?,
                webhook_resource_id: b.string("webhook_resource_id")?,
                is_global_runbook: b.bool("is_global_runbook")?,
                service_uri: b.string("service_uri")?,
                use_common_alert_schema: Some(b.bool("use_common_alert_schema")?),
            })
        })?,
        voice_receivers: expand_receivers(config, "voice_receiver", expand_phone)?,
        logic_app_receivers: expand_receivers(config, "logic_app_receiver", |b| {
            Ok(LogicAppReceiver {
                name: b.string("name")?,
                resource_id: b.string("resource_id")?,
                callback_url: b.string("callback_url")?,
                use_common_alert_schema: Some(b.bool("use_common_alert_schema")?),
            })
        })?,
        azure_function_receivers: expand_receivers(config, "azure_function_receiver", |b| {
            Ok(AzureFunctionReceiver {
                name: b.string("name")?,
                function_app_resource_id: b.string("function_app_resource_id")?,
                function_name: b.string("function_name")?,
                http_trigger_url: b.string("http_trigger_url")?,
                use_common_alert_schema: Some(b.bool("use_common_alert_schema")?),
            })
        })?,
        arm_role_receivers: expand_receivers(config, "arm_role_receiver", |b| {
            Ok(ArmRoleReceiver {
                name: b.string("name")?,
                role_id: b.string("role_id")?,
                use_common_alert_schema: Some(b.bool("use_common_alert_schema")?),
            })
        })?,
        event_hub_receivers: expand_receivers(config, "event_hub_receiver", |b| {
            Ok(EventHubReceiver {
                name: b.string("name")?,
                event_hub_namespace: b.string("event_hub_namespace")?,
                event_hub_name: b.string("event_hub_name")?,
                subscription_id: non_empty(b.string("subscription_id")?),
                tenant_id: non_empty(b.string("tenant_id")?),
                use_common_alert_schema: Some(b.bool("use_common_alert_schema")?),
            })
        })?,
    })
}

fn flatten_properties(w: &mut BlockWriter, props: &ActionGroupProperties) -> Result<(), MapError> {
    w.string("short_name", props.group_short_name.as_str())?
        .bool("enabled", props.enabled)?;

    flatten_receivers(w, "email_receiver", &props.email_receivers, |w, r| {
        w.string("name", r.name.as_str())?
            .string("email_address", r.email_address.as_str())?
            .opt_bool("use_common_alert_schema", r.use_common_alert_schema)?;
        Ok(())
    })?;
    flatten_receivers(w, "itsm_receiver", &props.itsm_receivers, |w, r| {
        w.string("name", r.name.as_str())?
            .string("workspace_id", r.workspace_id.as_str())?
            .string("connection_id", r.connection_id.as_str())?
            .string("ticket_configuration", r.ticket_configuration.as_str())?
            .string("region", r.region.as_str())?;
        Ok(())
    })?;
    flatten_receivers(w, "azure_app_push_receiver", &props.azure_app_push_receivers, |w, r| {
        w.string("name", r.name.as_str())?
            .string("email_address", r.email_address.as_str())?;
        Ok(())
    })?;
    flatten_receivers(w, "sms_receiver", &props.sms_receivers, flatten_phone)?;
    flatten_receivers(w, "webhook_receiver", &props.webhook_receivers, flatten_webhook)?;
    flatten_receivers(
        w,
        "automation_runbook_receiver",
        &props.automation_runbook_receivers,
        |w, r| {
            w.string("name", r.name.as_str())?
                .string("automation_account_id", r.automation_account_id.as_str())?
                .string("runbook_name", r.runbook_name.as_str())?
                .string("webhook_resource_id", r.webhook_resource_id.as_str())?
                .bool("is_global_runbook", r.is_global_runbook)?
                .string("service_uri", r.service_uri.as_str())?
                .opt_bool("use_common_alert_schema", r.use_common_alert_schema)?;
            Ok(())
        },
    )?;
    flatten_receivers(w, "voice_receiver", &props.voice_receivers, flatten_phone)?;
    flatten_receivers(w, "logic_app_receiver", &props.logic_app_receivers, |w, r| {
        w.string("name", r.name.as_str())?
            .string("resource_id", r.resource_id.as_str())?
            .string("callback_url", r.callback_url.as_str())?
            .opt_bool("use_common_alert_schema", r.use_common_alert_schema)?;
        Ok(())
    })?;
    flatten_receivers(w, "azure_function_receiver", &props.azure_function_receivers, |w, r| {
        w.string("name", r.name.as_str())?
            .string("function_app_resource_id", r.function_app_resource_id.as_str())?
            .string("function_name", r.function_name.as_str())?
            .string("http_trigger_url", r.http_trigger_url.as_str())?
            .opt_bool("use_common_alert_schema", r.use_common_alert_schema)?;
        Ok(())
    })?;
    flatten_receivers(w, "arm_role_receiver", &props.arm_role_receivers, |w, r| {
        w.string("name", r.name.as_str())?
            .string("role_id", r.role_id.as_str())?
            .opt_bool("use_common_alert_schema", r.use_common_alert_schema)?;
        Ok(())
    })?;
    flatten_receivers(w, "event_hub_receiver", &props.event_hub_receivers, |w, r| {
        w.string("name", r.name.as_str())?
            .string("event_hub_namespace", r.event_hub_namespace.as_str())?
            .string("event_hub_name", r.event_hub_name.as_str())?
            .opt_string("subscription_id", r.subscription_id.as_deref())?
            .opt_string("tenant_id", r.tenant_id.as_deref())?
            .opt_bool("use_common_alert_schema", r.use_common_alert_schema)?;
        Ok(())
    })?;
    Ok(())
}

pub struct ActionGroupKind;

impl ResourceKind for ActionGroupKind {
    type Id = ResourceId;
    type Model = ActionGroup;
    type Shape = ();

    const TYPE_NAME: &'static str = "azurerm_monitor_action_group";
    const API_VERSION: &'static str = "2023-01-01";
    const SCHEMA: &'static Schema = &ACTION_GROUP_SCHEMA;

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

    fn expand(config: &BlockReader<'_>, _shape: ()) -> Result<ActionGroup, MapError> {
        Ok(ActionGroup {
            id: None,
            location: config.string("location")?,
            tags: config.string_map("tags")?,
            properties: expand_properties(config)?,
        })
    }

    fn flatten(id: &ResourceId, model: &ActionGroup) -> Result<Map<String, Value>, MapError> {
        let mut w = BlockWriter::new(&ACTION_GROUP_SCHEMA);
        w.string("name", id.name.as_str())?
            .string("resource_group_name", id.resource_group.as_str())?
            .string("location", model.location.as_str())?
            .string_map("tags", &model.tags)?;
        flatten_properties(&mut w, &model.properties)?;
        Ok(w.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::normalize;
    use serde_json::json;

    fn config() -> Value {
        json!({
            "name": "oncall",
            "resource_group_name": "rg",
            "short_name": "oncall",
            "email_receiver": [
                {"name": "ops", "email_address": "ops@example.com", "use_common_alert_schema": true}
            ],
            "itsm_receiver": [{
                "name": "itsm",
                "workspace_id": "ws",
                "connection_id": "conn",
                "ticket_configuration": "{\"PayloadRevision\":0,\"WorkItemType\":\"Incident\"}",
                "region": "southcentralus"
            }],
            "sms_receiver": [{"name": "pager", "country_code": "1", "phone_number": "5551234567"}],
            "voice_receiver": [{"name": "call", "country_code": "1", "phone_number": "5557654321"}],
            "webhook_receiver": [
                {"name": "plain", "service_uri": "https://example.com/hook"},
                {
                    "name": "secure",
                    "service_uri": "https://example.com/secure",
                    "aad_auth": [{"object_id": "obj", "identifier_uri": "api://hook"}]
                }
            ],
            "event_hub_receiver": [
                {"name": "stream", "event_hub_namespace": "ns", "event_hub_name": "alerts"}
            ],
            "tags": {"team": "sre"}
        })
    }

    fn id() -> ResourceId {
        ResourceId::new("sub-1", "rg", RESOURCE_TYPE, "oncall").unwrap()
    }

    #[test]
    fn test_round_trip() {
        let config = config();
        let reader = BlockReader::from_value(&ACTION_GROUP_SCHEMA, &config).unwrap();
        reader.validate().unwrap();
        let model = ActionGroupKind::expand(&reader, ()).unwrap();
        assert_eq!(model.location, GLOBAL_LOCATION);

        let wire = serde_json::to_value(&model).unwrap();
        let props = &wire["properties"];
        assert_eq!(props["groupShortName"], json!("oncall"));
        assert_eq!(props["webhookReceivers"][1]["useAadAuth"], json!(true));
        assert!(props["webhookReceivers"][0].get("useAadAuth").is_none());
        assert_eq!(props["eventHubReceivers"][0]["eventHubNameSpace"], json!("ns"));

        let model: ActionGroup = serde_json::from_value(wire).unwrap();
        let flat = ActionGroupKind::flatten(&id(), &model).unwrap();
        assert_eq!(flat, normalize(&ACTION_GROUP_SCHEMA, config.as_object().unwrap()));
    }

    #[test]
    fn test_short_name_length() {
        let mut value = config();
        value["short_name"] = json!("much-too-long-name");
        let reader = BlockReader::from_value(&ACTION_GROUP_SCHEMA, &value).unwrap();
        assert!(matches!(
            ActionGroupKind::expand(&reader, ()),
            Err(MapError::Invalid { .. })
        ));
    }

    #[test]
    fn test_ticket_configuration_needs_keys() {
        let mut value = config();
        value["itsm_receiver"][0]["ticket_configuration"] = json!("{\"PayloadRevision\":0}");
        let reader = BlockReader::from_value(&ACTION_GROUP_SCHEMA, &value).unwrap();
        match ActionGroupKind::expand(&reader, ()) {
            Err(MapError::Invalid { field, .. }) => {
                assert_eq!(field, "itsm_receiver.0.ticket_configuration")
            }
            other => panic!("expected invalid ticket configuration, got {:?}", other),
        }
    }

    #[test]
    fn test_null_receiver_lists_flatten_empty() {
        let model: ActionGroup = serde_json::from_value(json!({
            "location": "global",
            "tags": null,
            "properties": {
                "groupShortName": "x",
                "enabled": false,
                "emailReceivers": null,
                "smsReceivers": []
            }
        }))
        .unwrap();
        let flat = ActionGroupKind::flatten(&id(), &model).unwrap();
        assert_eq!(flat["email_receiver"], json!([]));
        assert_eq!(flat["enabled"], json!(false));
        assert_eq!(flat["tags"], json!({}));
    }
}
