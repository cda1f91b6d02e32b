//! Wire message envelope.
//!
//! Every inbound message carries a `category`, a `statuscode`, usually a
//! `request`, and optionally an `id` and `description`. [`Message::decode`]
//! extracts that envelope from the generic JSON tree; the payload under
//! `values` is left to [`crate::protocol`].

use serde_json::Value;

/// Top-level message category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Tracker,
    Calibration,
    /// Forward-compatible fallback for unknown categories.
    Unknown,
}

impl Category {
    fn parse(s: &str) -> Self {
        match s {
            "tracker" => Category::Tracker,
            "calibration" => Category::Calibration,
            _ => Category::Unknown,
        }
    }
}

/// Request kind within a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Get,
    Set,
    Start,
    PointStart,
    PointEnd,
    Abort,
    Clear,
    /// Forward-compatible fallback for unknown requests.
    Unknown,
}

impl Request {
    fn parse(s: &str) -> Self {
        match s {
            "get" => Request::Get,
            "set" => Request::Set,
            "start" => Request::Start,
            "pointstart" => Request::PointStart,
            "pointend" => Request::PointEnd,
            "abort" => Request::Abort,
            "clear" => Request::Clear,
            _ => Request::Unknown,
        }
    }
}

/// Reply status or notification kind.
///
/// Three status codes mark unsolicited server pushes rather than replies;
/// any code other than those and OK is an error carrying its wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    CalibrationChange,
    DisplayChange,
    TrackerStateChange,
    Error(u16),
}

impl StatusCode {
    pub fn from_code(code: u64) -> Self {
        match code {
            200 => StatusCode::Ok,
            800 => StatusCode::CalibrationChange,
            801 => StatusCode::DisplayChange,
            802 => StatusCode::TrackerStateChange,
            other => StatusCode::Error(other.min(u16::MAX as u64) as u16),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }

    /// Whether this status marks an unsolicited state-change push.
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            StatusCode::CalibrationChange | StatusCode::DisplayChange | StatusCode::TrackerStateChange
        )
    }
}

/// One decoded message envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub category: Category,
    pub request: Request,
    pub status: StatusCode,
    /// Correlation id tagging this message as the reply to a specific call.
    pub id: Option<u16>,
    pub description: Option<String>,
}

impl Message {
    /// Decode the envelope from a parsed JSON tree.
    ///
    /// Returns `None` when the category or status code is missing, has the
    /// wrong type, or (for the category) is unrecognized; such messages are
    /// discarded whole. An absent `id`, `description`, or `request` is not
    /// an error.
    pub fn decode(root: &Value) -> Option<Self> {
        let id = root.get("id").and_then(Value::as_u64).map(|v| v as u16);
        let description = root
            .get("description")
            .and_then(Value::as_str)
            .map(String::from);

        let category = Category::parse(root.get("category")?.as_str()?);
        if category == Category::Unknown {
            return None;
        }

        let status = StatusCode::from_code(root.get("statuscode")?.as_u64()?);

        let request = root
            .get("request")
            .and_then(Value::as_str)
            .map(Request::parse)
            .unwrap_or(Request::Unknown);

        Some(Message {
            category,
            request,
            status,
            id,
            description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decode_tagged_reply() {
        let root = json!({
            "category": "tracker",
            "request": "set",
            "statuscode": 200,
            "id": 32
        });
        let msg = Message::decode(&root).unwrap();
        assert_eq!(msg.category, Category::Tracker);
        assert_eq!(msg.request, Request::Set);
        assert_eq!(msg.status, StatusCode::Ok);
        assert_eq!(msg.id, Some(32));
        assert_eq!(msg.description, None);
    }

    #[test]
    fn decode_untagged_with_description() {
        let root = json!({
            "category": "calibration",
            "request": "pointend",
            "statuscode": 200,
            "description": "point processed"
        });
        let msg = Message::decode(&root).unwrap();
        assert_eq!(msg.id, None);
        assert_eq!(msg.description.as_deref(), Some("point processed"));
    }

    #[test]
    fn missing_category_is_discarded() {
        assert!(Message::decode(&json!({"statuscode": 200})).is_none());
    }

    #[test]
    fn unknown_category_is_discarded() {
        let root = json!({"category": "heartbeat", "statuscode": 200});
        assert!(Message::decode(&root).is_none());
    }

    #[test]
    fn missing_or_malformed_status_is_discarded() {
        assert!(Message::decode(&json!({"category": "tracker"})).is_none());
        let root = json!({"category": "tracker", "statuscode": "ok"});
        assert!(Message::decode(&root).is_none());
    }

    #[test]
    fn notification_statuses() {
        for (code, expected) in [
            (800u64, StatusCode::CalibrationChange),
            (801, StatusCode::DisplayChange),
            (802, StatusCode::TrackerStateChange),
        ] {
            let status = StatusCode::from_code(code);
            assert_eq!(status, expected);
            assert!(status.is_notification());
            assert!(!status.is_ok());
        }
    }

    #[test]
    fn other_codes_are_errors() {
        let status = StatusCode::from_code(404);
        assert_eq!(status, StatusCode::Error(404));
        assert!(!status.is_notification());
        assert!(!status.is_ok());
    }

    #[test]
    fn missing_request_defaults_to_unknown() {
        let root = json!({"category": "tracker", "statuscode": 800});
        let msg = Message::decode(&root).unwrap();
        assert_eq!(msg.request, Request::Unknown);
        assert!(msg.status.is_notification());
    }
}
