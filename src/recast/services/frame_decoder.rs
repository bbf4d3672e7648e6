use tracing::debug;

/// Event marker prefixing some streamed frames (`data: {...}`).
const EVENT_MARKER: &str = "data:";
/// Sentinel token signalling end of stream.
const DONE_SENTINEL: &str = "[DONE]";
/// Frame `type` values that signal completion.
const FINAL_TYPES: [&str; 2] = ["done", "end"];

/// A raw frame normalized into content plus a terminal flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedFrame {
    pub content: String,
    pub is_final: bool,
}

/// Normalize one raw frame into `{content, is_final}`.
///
/// The upstream service does not emit a single consistent framing across
/// message types, so decoding is layered, first match wins:
/// (a) strip a leading `data:` event marker, then attempt a structured parse
/// of the remainder; (b) on parse success take the `content` field and any
/// explicit completion indicator; (c) on parse failure the remainder is
/// literal content, not final. The bare `[DONE]` sentinel is terminal with
/// no content.
///
/// Total: never panics, never errors. A failed structured parse is a logged
/// degradation, not a dropped frame.
pub fn decode(raw: &str) -> DecodedFrame {
    // Marker strip keeps the remainder byte-exact apart from the single
    // space SSE puts after the colon.
    let remainder = match raw.strip_prefix(EVENT_MARKER) {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => raw,
    };

    if remainder.trim() == DONE_SENTINEL {
        return DecodedFrame {
            content: String::new(),
            is_final: true,
        };
    }

    match serde_json::from_str::<serde_json::Value>(remainder) {
        Ok(value) => {
            let content = value
                .get("content")
                .and_then(|c| c.as_str())
                .map(str::to_string)
                .unwrap_or_default();
            let is_final = value
                .get("type")
                .and_then(|t| t.as_str())
                .is_some_and(|t| FINAL_TYPES.contains(&t))
                || value
                    .get("is_final")
                    .and_then(|f| f.as_bool())
                    .unwrap_or(false)
                || value.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
            DecodedFrame { content, is_final }
        }
        Err(err) => {
            debug!(error = %err, "frame decode degradation; treating frame as literal content");
            DecodedFrame {
                content: remainder.to_string(),
                is_final: false,
            }
        }
    }
}
