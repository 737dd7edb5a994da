use serde::{Deserialize, Serialize};

/// Compact source reference carried by the terminal `done` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub id: String,
    pub insight_id: String,
    pub score: f32,
    pub index: usize,
    pub title: String,
    pub url: String,
}

/// Events in the chat stream, serialized as the `data:` JSON payload of the
/// SSE framing. The terminal event is `done`; `error` closes the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    Content {
        content: String,
    },
    Done {
        request_id: String,
        latency_ms: u64,
        sources: Vec<SourceRef>,
    },
    Error {
        code: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_event_wire_shape() {
        let event = ChatStreamEvent::Content {
            content: "hello".to_string(),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "content");
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn done_event_wire_shape() {
        let event = ChatStreamEvent::Done {
            request_id: "r1".to_string(),
            latency_ms: 950,
            sources: vec![SourceRef {
                id: "c1".to_string(),
                insight_id: "i1".to_string(),
                score: 0.91,
                index: 1,
                title: "Title".to_string(),
                url: "https://example.com".to_string(),
            }],
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "done");
        assert_eq!(json["sources"][0]["insight_id"], "i1");
        assert_eq!(json["latency_ms"], 950);
    }

    #[test]
    fn error_event_wire_shape() {
        let event = ChatStreamEvent::Error {
            code: "upstream_error".to_string(),
            message: "stream interrupted".to_string(),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "upstream_error");
    }
}
