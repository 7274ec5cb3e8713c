//! Change-feed client — subscribes to inserted records over WebSocket.
//!
//! Each text frame is one JSON `ChangeRecord`; records are forwarded to the
//! engine in arrival order. Malformed frames are logged and skipped. A closed
//! or failed connection ends the client; reconnecting is left to the caller.

use futures_util::StreamExt;
use thiserror::Error;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use minetrack_core::source::ChangeRecord;

use crate::engine::{Action, EngineHandle};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Counters for one feed session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeedStats {
    pub records: u64,
    pub malformed: u64,
}

pub fn parse_record(text: &str) -> Result<ChangeRecord, serde_json::Error> {
    serde_json::from_str(text)
}

/// Stream records from `url` into the engine until the connection closes,
/// the engine stops, or `cancel` fires.
pub async fn run(url: &str, engine: EngineHandle, cancel: CancellationToken) -> Result<FeedStats, FeedError> {
    let (mut ws, _response) = connect_async(url).await?;
    tracing::info!(url, "change feed connected");

    let mut stats = FeedStats::default();
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws.close(None).await;
                break;
            }
            message = ws.next() => message,
        };

        match message {
            None | Some(Ok(Message::Close(_))) => {
                tracing::warn!(url, "change feed closed");
                break;
            }
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Text(text))) => match parse_record(&text) {
                Ok(record) => {
                    stats.records += 1;
                    tracing::debug!(device = record.device_id(), "change record");
                    if engine.send(Action::Record(record)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    stats.malformed += 1;
                    tracing::warn!(error = %e, "malformed change record skipped");
                }
            },
            Some(Ok(_)) => {}
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use minetrack_core::types::AlertType;

    #[test]
    fn test_parse_alert_record() {
        let text = r#"{"table":"alert","record":{
            "id":"a-1","alert_type":"signal-lost","message":"lost","timestamp":5.0,
            "read":false,"device_id":"lhd-02","geofence_id":null,"priority":"high",
            "location":{"lat":-26.2,"lng":28.0,"depth":150.0}}}"#;
        match parse_record(text).unwrap() {
            ChangeRecord::Alert(alert) => {
                assert_eq!(alert.alert_type, AlertType::SignalLost);
                assert_eq!(alert.location.unwrap().depth, 150.0);
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_table() {
        assert!(parse_record(r#"{"table":"zone","record":{}}"#).is_err());
        assert!(parse_record("not json").is_err());
    }
}
