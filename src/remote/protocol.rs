//! JSON messages exchanged with the remote labeling service.

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;
pub const SERVER: &str = "ws-ml";
/// Outgoing messages larger than this are not sent.
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

#[derive(Serialize)]
struct ReaderTime<'a> {
    v: u32,
    op: &'a str,
    start: f64,
    duration: f64,
    server: &'a str,
}

#[derive(Serialize)]
struct Command<'a> {
    v: u32,
    op: &'a str,
    server: &'a str,
}

/// Announces the window whose spectrogram was just uploaded.
pub fn reader_time(start: f64, duration: f64) -> serde_json::Result<String> {
    serde_json::to_string(&ReaderTime {
        v: PROTOCOL_VERSION,
        op: "reader_time",
        start,
        duration,
        server: SERVER,
    })
}

/// Bare command with no payload, e.g. `{"v":1,"op":"ping","server":"ws-ml"}`.
pub fn command(op: &str) -> serde_json::Result<String> {
    serde_json::to_string(&Command {
        v: PROTOCOL_VERSION,
        op,
        server: SERVER,
    })
}

/// One labeled span returned by the service.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LabelSpan {
    pub start: f64,
    pub end: f64,
    pub num: f64,
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerMessage {
    op: String,
    result: Vec<LabelSpan>,
}

/// Spans of a `job_done` message. `None` for other ops or malformed JSON.
pub fn parse_job_done(text: &str) -> Option<Vec<LabelSpan>> {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            log::warn!("Ignoring malformed server message: {}", e);
            return None;
        }
    };
    (msg.op == "job_done").then_some(msg.result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn reader_time_shape() {
        let text = reader_time(10.0, 5.0).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["v"], 1);
        assert_eq!(v["op"], "reader_time");
        assert_eq!(v["start"], 10.0);
        assert_eq!(v["duration"], 5.0);
        assert_eq!(v["server"], "ws-ml");
    }

    #[test]
    fn command_shape() {
        assert_eq!(command("reset").unwrap(), r#"{"v":1,"op":"reset","server":"ws-ml"}"#);
    }

    #[test]
    fn job_done_fields_default() {
        let spans = parse_job_done(
            r#"{"op":"job_done","result":[{"start":1.5,"end":2.0,"num":0.9,"value":"dog"},{"start":3.0},{}]}"#,
        )
        .unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].value, "dog");
        assert_eq!(spans[0].num, 0.9);
        assert_eq!(
            spans[1],
            LabelSpan {
                start: 3.0,
                ..LabelSpan::default()
            }
        );
        assert_eq!(spans[2], LabelSpan::default());
    }

    #[test]
    fn other_messages_are_not_job_done() {
        assert!(parse_job_done(r#"{"op":"status"}"#).is_none());
        assert!(parse_job_done("not json").is_none());
        assert_eq!(parse_job_done(r#"{"op":"job_done"}"#), Some(Vec::new()));
    }
}
