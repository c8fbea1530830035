//! Typed view of the Kuzzle JSON envelope.
//!
//! Outbound queries all share one shape:
//!
//! ```json
//! { "index": "iot", "collection": "device-state" | "device-info",
//!   "requestId": "...", "controller": "document" | "realtime",
//!   "action": "create" | "get" | "createOrReplace" | "subscribe",
//!   "_id": "...", "body": { ... } }
//! ```
//!
//! Inbound envelopes carry `status`, `requestId`, `action` and a `result`
//! document. State documents written by older firmware revisions flag a
//! partial update as `state_partial` while newer ones write
//! `partial_state`; reads accept either spelling and writes stick to
//! `partial_state`.

use fieldlink_core::DeviceUid;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Index holding all IoT collections.
pub const INDEX_IOT: &str = "iot";
/// Collection of published device states.
pub const COLLECTION_DEVICE_STATE: &str = "device-state";
/// Collection of device identity records.
pub const COLLECTION_DEVICE_INFO: &str = "device-info";

/// Fixed requestId of the identity lookup query.
pub const REQUEST_GET_DEVICE_INFO: &str = "get_device_info";
/// Fixed requestId of the identity upsert command.
pub const REQUEST_PUBLISH_DEVICE_INFO: &str = "publish_device_info";

/// Canonical partial-update flag written into state documents.
pub const FIELD_PARTIAL_STATE: &str = "partial_state";
/// Legacy spelling of the partial-update flag, accepted on read.
pub const FIELD_STATE_PARTIAL: &str = "state_partial";

/// Deterministic requestId used for this device's own state publications;
/// inbound notifications carrying it are our own echo and are not fed back
/// into the state-changed callback.
#[must_use]
pub fn publish_request_id(device_uid: &DeviceUid) -> String {
    format!("publish_{device_uid}")
}

/// Identity of one logical device as registered on the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_uid: DeviceUid,
    pub device_type: String,
    pub owner: Option<String>,
    pub friendly_name: Option<String>,
    pub additional_info: Option<Value>,
}

impl DeviceIdentity {
    pub fn new(device_uid: DeviceUid, device_type: impl Into<String>) -> Self {
        Self {
            device_uid,
            device_type: device_type.into(),
            owner: None,
            friendly_name: None,
            additional_info: None,
        }
    }

    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn with_friendly_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_additional_info(mut self, info: Value) -> Self {
        self.additional_info = Some(info);
        self
    }
}

/// One outbound query envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub index: &'static str,
    pub collection: &'static str,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub controller: &'static str,
    pub action: &'static str,
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Correlated lookup of this device's identity record.
#[must_use]
pub fn get_device_info(device_uid: &DeviceUid) -> Query {
    Query {
        index: INDEX_IOT,
        collection: COLLECTION_DEVICE_INFO,
        request_id: Some(REQUEST_GET_DEVICE_INFO.to_string()),
        controller: "document",
        action: "get",
        document_id: Some(device_uid.to_string()),
        body: None,
    }
}

/// Idempotent identity upsert, self-healing across restarts.
#[must_use]
pub fn publish_device_info(identity: &DeviceIdentity) -> Query {
    let mut body = Map::new();
    body.insert("device_id".to_string(), json!(identity.device_uid));
    body.insert("owner".to_string(), json!(identity.owner));
    body.insert("friendly_name".to_string(), json!(identity.friendly_name));
    body.insert("device_type".to_string(), json!(identity.device_type));
    if let Some(info) = &identity.additional_info {
        body.insert("additional_info".to_string(), info.clone());
    }

    Query {
        index: INDEX_IOT,
        collection: COLLECTION_DEVICE_INFO,
        request_id: Some(REQUEST_PUBLISH_DEVICE_INFO.to_string()),
        controller: "document",
        action: "createOrReplace",
        document_id: Some(identity.device_uid.to_string()),
        body: Some(Value::Object(body)),
    }
}

/// Fire-and-forget state publication.
#[must_use]
pub fn create_state(identity: &DeviceIdentity, state: Value, partial: bool) -> Query {
    Query {
        index: INDEX_IOT,
        collection: COLLECTION_DEVICE_STATE,
        request_id: Some(publish_request_id(&identity.device_uid)),
        controller: "document",
        action: "create",
        document_id: None,
        body: Some(json!({
            "device_id": identity.device_uid,
            "device_type": identity.device_type,
            FIELD_PARTIAL_STATE: partial,
            "state": state,
        })),
    }
}

/// Realtime subscription to this device's own state documents.
#[must_use]
pub fn subscribe_state(device_uid: &DeviceUid) -> Query {
    Query {
        index: INDEX_IOT,
        collection: COLLECTION_DEVICE_STATE,
        request_id: None,
        controller: "realtime",
        action: "subscribe",
        document_id: None,
        body: Some(json!({
            "equals": { "device_id": device_uid }
        })),
    }
}

/// Error payload of a failed response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stack: Option<String>,
}

/// A remote state update extracted from a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub state: Value,
    pub is_partial: bool,
}

/// One inbound response or notification envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub status: i64,
    #[serde(rename = "requestId", default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub controller: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

impl ResponseEnvelope {
    /// Whether this envelope notifies a state-document change.
    #[must_use]
    pub fn is_state_notification(&self) -> bool {
        matches!(self.action.as_deref(), Some("replace" | "create"))
    }

    /// Pull the state document out of a notification, tolerating both
    /// spellings of the partial-update flag.
    #[must_use]
    pub fn state_change(&self) -> Option<StateChange> {
        let source = self.result.as_ref()?.get("_source")?;
        let is_partial = source
            .get(FIELD_PARTIAL_STATE)
            .or_else(|| source.get(FIELD_STATE_PARTIAL))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Some(StateChange {
            state: source.get("state")?.clone(),
            is_partial,
        })
    }

    /// Whether an identity lookup response demands a (re-)publish of the
    /// device-info record: the document is missing (non-200) or explicitly
    /// marked inactive.
    #[must_use]
    pub fn device_info_missing_or_inactive(&self) -> bool {
        if self.status != 200 {
            return true;
        }
        let active = self
            .result
            .as_ref()
            .and_then(|r| r.get("_source"))
            .and_then(|s| s.get("active"))
            .and_then(Value::as_bool);
        active == Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid() -> DeviceUid {
        DeviceUid::new("NFC_0012345678").unwrap()
    }

    #[test]
    fn test_get_device_info_shape() {
        let query = get_device_info(&uid());
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(
            value,
            json!({
                "index": "iot",
                "collection": "device-info",
                "requestId": "get_device_info",
                "controller": "document",
                "action": "get",
                "_id": "NFC_0012345678",
            })
        );
    }

    #[test]
    fn test_create_state_writes_canonical_partial_flag() {
        let identity = DeviceIdentity::new(uid(), "RFID_reader");
        let query = create_state(&identity, json!({"card_id": "04AABBCC"}), true);
        let value = serde_json::to_value(&query).unwrap();

        assert_eq!(value["requestId"], "publish_NFC_0012345678");
        assert_eq!(value["action"], "create");
        assert_eq!(value["body"]["partial_state"], true);
        assert!(value["body"].get("state_partial").is_none());
        assert_eq!(value["body"]["state"]["card_id"], "04AABBCC");
    }

    #[test]
    fn test_subscribe_filters_on_own_uid() {
        let query = subscribe_state(&uid());
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value["controller"], "realtime");
        assert_eq!(value["action"], "subscribe");
        assert_eq!(value["body"]["equals"]["device_id"], "NFC_0012345678");
    }

    #[test]
    fn test_state_change_accepts_both_partial_spellings() {
        let canonical: ResponseEnvelope = serde_json::from_value(json!({
            "status": 200, "action": "replace",
            "result": {"_source": {"partial_state": true, "state": {"on": true}}}
        }))
        .unwrap();
        assert!(canonical.state_change().unwrap().is_partial);

        let legacy: ResponseEnvelope = serde_json::from_value(json!({
            "status": 200, "action": "create",
            "result": {"_source": {"state_partial": true, "state": {"on": true}}}
        }))
        .unwrap();
        assert!(legacy.state_change().unwrap().is_partial);

        let absent: ResponseEnvelope = serde_json::from_value(json!({
            "status": 200, "action": "create",
            "result": {"_source": {"state": {"on": true}}}
        }))
        .unwrap();
        assert!(!absent.state_change().unwrap().is_partial);
    }

    #[test]
    fn test_device_info_reconciliation_trigger() {
        let missing: ResponseEnvelope = serde_json::from_value(json!({
            "status": 404, "requestId": "get_device_info",
            "error": {"message": "not found", "stack": ""}
        }))
        .unwrap();
        assert!(missing.device_info_missing_or_inactive());

        let inactive: ResponseEnvelope = serde_json::from_value(json!({
            "status": 200,
            "result": {"_source": {"active": false}}
        }))
        .unwrap();
        assert!(inactive.device_info_missing_or_inactive());

        let active: ResponseEnvelope = serde_json::from_value(json!({
            "status": 200,
            "result": {"_source": {"device_type": "RFID_reader"}}
        }))
        .unwrap();
        assert!(!active.device_info_missing_or_inactive());
    }
}
