//! Shared SSE infrastructure for upstream adapters.
//!
//! Every upstream follows the same pattern: receive a
//! `reqwest::Response`, buffer chunks, split on `\n\n`, extract `data:`
//! payloads, and feed each payload to a provider-specific translator
//! that returns client-dialect events.
//!
//! A malformed upstream must never corrupt the client stream: payloads
//! that fail to parse are skipped, and a buffer that grows past
//! [`MAX_BUFFER_BYTES`] without producing a complete event tears the
//! connection down behind a synthetic `error` event.

use ens_domain::stream::BoxStream;
use ens_domain::wire::{ErrorBody, StreamEvent};

/// Unprocessed-buffer cap; exceeding it indicates a broken upstream.
pub(crate) const MAX_BUFFER_BYTES: usize = 1024 * 1024;

/// Pull every complete event's `data:` payloads out of `buffer`.
///
/// An SSE event ends at a blank line. Everything up to the last `\n\n`
/// is complete and gets cut out of the buffer in one drain; whatever
/// follows is a partial event and stays put for the next chunk. Field
/// lines other than `data:` (`event:`, `id:`, `retry:`) carry nothing we
/// need and fall through the filter.
pub(crate) fn take_complete_payloads(buffer: &mut String) -> Vec<String> {
    let Some(cut) = buffer.rfind("\n\n") else {
        return Vec::new();
    };
    let complete: String = buffer.drain(..cut + 2).collect();

    complete
        .split("\n\n")
        .flat_map(str::lines)
        .filter_map(|line| line.trim_start().strip_prefix("data:"))
        .map(str::trim)
        .filter(|payload| !payload.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Build a client-event stream from an upstream SSE response and a
/// translator closure.
///
/// The closure receives each `data:` payload and returns zero or more
/// client events; it is `FnMut` because translators keep per-stream
/// state (open block index, accumulated usage). `flush` is called once
/// when the upstream closes, letting the translator emit a well-formed
/// tail if the upstream never did.
pub(crate) fn upstream_event_stream<F, G>(
    response: reqwest::Response,
    prelude: Vec<StreamEvent>,
    mut translate: F,
    mut flush: G,
) -> BoxStream<'static, StreamEvent>
where
    F: FnMut(&str) -> Vec<StreamEvent> + Send + 'static,
    G: FnMut() -> Vec<StreamEvent> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done = false;

        for event in prelude {
            yield event;
        }

        while !done {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));

                    if buffer.len() > MAX_BUFFER_BYTES {
                        tracing::warn!(
                            buffered = buffer.len(),
                            "upstream SSE buffer overflow, destroying connection"
                        );
                        yield StreamEvent::Error {
                            error: ErrorBody {
                                kind: "upstream_stream_error".into(),
                                message: "upstream produced an oversized event".into(),
                            },
                        };
                        return;
                    }

                    for payload in take_complete_payloads(&mut buffer) {
                        for event in translate(&payload) {
                            let is_stop = matches!(event, StreamEvent::MessageStop);
                            yield event;
                            if is_stop {
                                done = true;
                            }
                        }
                    }
                }
                Ok(None) => {
                    // Upstream closed — terminate and flush whatever is
                    // still buffered.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for payload in take_complete_payloads(&mut buffer) {
                            for event in translate(&payload) {
                                let is_stop = matches!(event, StreamEvent::MessageStop);
                                yield event;
                                if is_stop {
                                    done = true;
                                }
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield StreamEvent::Error {
                        error: ErrorBody {
                            kind: "upstream_stream_error".into(),
                            message: format!("upstream read failed: {e}"),
                        },
                    };
                    return;
                }
            }
        }

        if !done {
            for event in flush() {
                yield event;
            }
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(raw: &str) -> (Vec<String>, String) {
        let mut buffer = raw.to_string();
        let out = take_complete_payloads(&mut buffer);
        (out, buffer)
    }

    #[test]
    fn complete_event_is_cut_from_the_buffer() {
        let (out, rest) = payloads("event: chunk\ndata: {\"a\":1}\n\n");
        assert_eq!(out, vec!["{\"a\":1}"]);
        assert!(rest.is_empty());
    }

    #[test]
    fn several_events_come_out_in_order() {
        let (out, rest) = payloads("data: one\n\ndata: two\n\ndata: three\n\n");
        assert_eq!(out, vec!["one", "two", "three"]);
        assert!(rest.is_empty());
    }

    #[test]
    fn trailing_partial_event_survives_for_the_next_chunk() {
        let (out, rest) = payloads("data: whole\n\ndata: half");
        assert_eq!(out, vec!["whole"]);
        assert_eq!(rest, "data: half");

        // Feeding the remainder plus its terminator completes it.
        let mut buffer = rest;
        buffer.push_str("\n\n");
        assert_eq!(take_complete_payloads(&mut buffer), vec!["half"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn nothing_happens_without_a_terminator() {
        let (out, rest) = payloads("data: still going");
        assert!(out.is_empty());
        assert_eq!(rest, "data: still going");
    }

    #[test]
    fn only_data_fields_are_collected() {
        let (out, _) = payloads("event: ping\nid: 7\nretry: 3000\ndata: kept\n\n");
        assert_eq!(out, vec!["kept"]);
    }

    #[test]
    fn blank_data_fields_are_dropped() {
        let (out, _) = payloads("data:\n\ndata:    \n\n");
        assert!(out.is_empty());
    }

    #[test]
    fn done_sentinel_passes_through_verbatim() {
        let (out, _) = payloads("data: [DONE]\n\n");
        assert_eq!(out, vec!["[DONE]"]);
    }

    #[test]
    fn multi_line_data_yields_one_payload_per_line() {
        // Two data lines inside a single event block.
        let (out, _) = payloads("data: first\ndata: second\n\n");
        assert_eq!(out, vec!["first", "second"]);
    }
}
