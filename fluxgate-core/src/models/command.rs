use serde::{Deserialize, Serialize};

/// Correlation token echoed onto the venue wire where the protocol carries
/// one. Clients may send either form; absent ids default to wall-clock
/// milliseconds at dispatch.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RequestId {
    Int(i64),
    Str(String),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
}

/// Command received on the `<venue>:control` channel.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlCommand {
    pub action: ControlAction,
    pub symbols: Vec<String>,
    pub stream_type: String,
    pub market_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subscribe_command() {
        let raw = r#"{"action":"subscribe","symbols":["btcusdt"],"streamType":"aggTrade","marketType":"perp"}"#;
        let command: ControlCommand = serde_json::from_str(raw).unwrap();
        assert_eq!(command.action, ControlAction::Subscribe);
        assert_eq!(command.symbols, vec!["btcusdt"]);
        assert_eq!(command.stream_type, "aggTrade");
        assert_eq!(command.market_type, "perp");
        assert_eq!(command.request_id, None);
    }

    #[test]
    fn test_parse_request_id_forms() {
        let raw = r#"{"action":"unsubscribe","symbols":["ethusdt"],"streamType":"trade","marketType":"spot","requestId":17}"#;
        let command: ControlCommand = serde_json::from_str(raw).unwrap();
        assert_eq!(command.request_id, Some(RequestId::Int(17)));

        let raw = r#"{"action":"unsubscribe","symbols":["ethusdt"],"streamType":"trade","marketType":"spot","requestId":"req-1"}"#;
        let command: ControlCommand = serde_json::from_str(raw).unwrap();
        assert_eq!(command.request_id, Some(RequestId::Str("req-1".into())));
    }

    #[test]
    fn test_rejects_unknown_action() {
        let raw = r#"{"action":"resubscribe","symbols":[],"streamType":"trade","marketType":"spot"}"#;
        assert!(serde_json::from_str::<ControlCommand>(raw).is_err());
    }
}
