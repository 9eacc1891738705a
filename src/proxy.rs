//! Upstream calls: the non-streaming relay round-trip and the SSE stream
//! driver that feeds bytes through the line decoder and reshaper.

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::translate::chat_types::{ChatCompletionRequest, ChatCompletionResponse};
use crate::translate::request::build_upstream_request;
use crate::translate::response::upstream_to_chat;
use crate::translate::streaming::{LineDecoder, StreamReshaper};
use crate::translate::upstream_types::{UpstreamChunk, UpstreamErrorResponse, UpstreamResponse};

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;

/// End-of-stream marker, forwarded to the client verbatim.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Outbound body of a streaming response: pre-framed `data: ...\n\n` chunks.
pub type SseStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Relay a non-streaming request and reshape the reply.
pub async fn relay_non_streaming(
    req: &ChatCompletionRequest,
    resolved_model: &str,
    config: &RelayConfig,
    client: &reqwest::Client,
) -> Result<ChatCompletionResponse> {
    let body = send_upstream(req, resolved_model, config, client).await?;

    let upstream_resp: UpstreamResponse = serde_json::from_str(&body).map_err(|e| {
        RelayError::translation(format!(
            "Failed to parse upstream response: {}. Body: {}",
            e,
            truncate(&body, 300)
        ))
    })?;

    let resp = upstream_to_chat(&upstream_resp, &req.model, config);

    tracing::info!(
        prompt_tokens = resp.usage.prompt_tokens,
        completion_tokens = resp.usage.completion_tokens,
        "completed"
    );

    Ok(resp)
}

/// Relay a streaming request, returning the reshaped outbound SSE stream.
/// Errors here happen before any response bytes are sent and still get the
/// structured JSON treatment; once the stream is returned, failures can only
/// end it early.
pub async fn relay_streaming(
    req: &ChatCompletionRequest,
    resolved_model: &str,
    config: &RelayConfig,
    client: &reqwest::Client,
) -> Result<SseStream> {
    let api_key = config.resolve_api_key()?;
    let url = config.chat_completions_url()?;
    let upstream_req = build_upstream_request(req, resolved_model, config);

    tracing::info!(url = %url, model = resolved_model, "POST upstream (streaming)");

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .header("Content-Type", "application/json")
        .json(&upstream_req)
        .send()
        .await
        .map_err(|e| RelayError::upstream(format!("Streaming request failed: {e}")))?;

    let status = response.status().as_u16();
    if status >= 400 {
        let body = response.text().await.unwrap_or_default();
        return Err(upstream_error(status, &body));
    }

    let byte_stream = response.bytes_stream();
    let show_reasoning = config.show_reasoning;

    Ok(Box::pin(reshape_sse_stream(byte_stream, show_reasoning)))
}

/// Drive the upstream byte stream through the line decoder and reshaper,
/// yielding re-framed `data: <json>\n\n` chunks. The sentinel and any
/// unparseable payload are forwarded verbatim; non-data lines (comments,
/// blank keep-alives) are not forwarded.
fn reshape_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    show_reasoning: bool,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    async_stream::stream! {
        let mut decoder = LineDecoder::new();
        let mut reshaper = StreamReshaper::new(show_reasoning);

        tokio::pin!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let bytes = match chunk_result {
                Ok(b) => b,
                Err(e) => {
                    // Headers are long gone; all we can do is log and close.
                    tracing::error!(error = %e, "upstream byte stream failed mid-stream");
                    break;
                }
            };

            for line in decoder.feed(&bytes) {
                if line.is_empty() {
                    continue;
                }

                let data = if let Some(stripped) = line.strip_prefix("data: ") {
                    stripped.trim()
                } else if let Some(stripped) = line.strip_prefix("data:") {
                    stripped.trim()
                } else {
                    continue;
                };

                if data == DONE_SENTINEL {
                    yield Ok(frame(data));
                    continue;
                }

                match serde_json::from_str::<UpstreamChunk>(data) {
                    Ok(chunk) => {
                        let reshaped = reshaper.reshape(&chunk);
                        match serde_json::to_string(&reshaped) {
                            Ok(json) => yield Ok(frame(&json)),
                            Err(e) => {
                                tracing::debug!(error = %e, "reserialization failed, forwarding raw");
                                yield Ok(frame(data));
                            }
                        }
                    }
                    Err(e) => {
                        // Never dropped: forward the raw payload so client
                        // framing stays intact.
                        tracing::debug!(error = %e, "forwarding unparseable chunk verbatim");
                        yield Ok(frame(data));
                    }
                }
            }
        }

        tracing::debug!("stream completed");
    }
}

fn frame(data: &str) -> Bytes {
    Bytes::from(format!("data: {data}\n\n"))
}

async fn send_upstream(
    req: &ChatCompletionRequest,
    resolved_model: &str,
    config: &RelayConfig,
    client: &reqwest::Client,
) -> Result<String> {
    let api_key = config.resolve_api_key()?;
    let url = config.chat_completions_url()?;

    let upstream_req = build_upstream_request(req, resolved_model, config);

    tracing::info!(url = %url, model = resolved_model, "POST upstream");

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .header("Content-Type", "application/json")
        .json(&upstream_req)
        .send()
        .await
        .map_err(|e| RelayError::upstream(format!("Request failed: {e}")))?;

    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| RelayError::upstream(format!("Failed to read response body: {e}")))?;

    tracing::debug!(status, body_len = body.len(), "upstream replied");

    if status >= 400 {
        return Err(upstream_error(status, &body));
    }

    Ok(body)
}

fn upstream_error(status: u16, body: &str) -> RelayError {
    let message = serde_json::from_str::<UpstreamErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("Upstream returned status {}: {}", status, truncate(body, 500)));

    tracing::warn!(status, %message, "upstream error");
    RelayError::upstream_status(status, message)
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    // Back up to a char boundary so the slice cannot split a code point
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn collect_frames(
        chunks: Vec<&'static [u8]>,
        show_reasoning: bool,
    ) -> Vec<String> {
        let byte_stream =
            stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))));
        let out = reshape_sse_stream(byte_stream, show_reasoning);

        tokio_test::block_on(async {
            futures::pin_mut!(out);
            let mut frames = Vec::new();
            while let Some(item) = out.next().await {
                frames.push(String::from_utf8(item.unwrap().to_vec()).unwrap());
            }
            frames
        })
    }

    fn data_payload(frame: &str) -> &str {
        frame
            .strip_prefix("data: ")
            .and_then(|f| f.strip_suffix("\n\n"))
            .expect("frame must be `data: ...\\n\\n`")
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let body = format!("a{}", "\u{1f600}".repeat(75));
        assert!(body.len() > 300);

        // Byte 300 lands inside a code point; the cut must back up, not panic
        let cut = truncate(&body, 300);
        assert!(cut.len() <= 300);
        assert!(body.starts_with(cut));

        assert_eq!(truncate("short", 300), "short");
        assert_eq!(truncate("abcdef", 3), "abc");
    }

    #[test]
    fn test_sentinel_forwarded_verbatim() {
        let frames = collect_frames(vec![b"data: [DONE]\n"], true);
        assert_eq!(frames, vec!["data: [DONE]\n\n"]);
    }

    #[test]
    fn test_malformed_payload_forwarded_verbatim() {
        let frames = collect_frames(vec![b"data: {not json\n"], true);
        assert_eq!(frames, vec!["data: {not json\n\n"]);
    }

    #[test]
    fn test_reasoning_stream_reframed() {
        let frames = collect_frames(
            vec![
                b"data: {\"choices\":[{\"index\":0,\"delta\":{\"reasoning\":\"a\"},\"finish_reason\":null}]}\n\n",
                b"data: {\"choices\":[{\"index\":0,\"delta\":{\"reasoning\":\"b\"},\"finish_reason\":null}]}\n\n",
                b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"c\"},\"finish_reason\":null}]}\n\n",
                b"data: [DONE]\n\n",
            ],
            true,
        );

        assert_eq!(frames.len(), 4);

        let contents: Vec<String> = frames[..3]
            .iter()
            .map(|f| {
                let v: serde_json::Value = serde_json::from_str(data_payload(f)).unwrap();
                v["choices"][0]["delta"]["content"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();

        assert_eq!(contents, vec!["<think>\na", "b", "</think>\n\nc"]);
        assert_eq!(frames[3], "data: [DONE]\n\n");
    }

    #[test]
    fn test_event_split_across_chunk_boundary() {
        let frames = collect_frames(
            vec![
                b"data: {\"choices\":[{\"index\":0,\"delta\":{\"con",
                b"tent\":\"hello\"},\"finish_reason\":null}]}\n\ndata: [DONE]\n\n",
            ],
            true,
        );

        assert_eq!(frames.len(), 2);
        let v: serde_json::Value = serde_json::from_str(data_payload(&frames[0])).unwrap();
        assert_eq!(v["choices"][0]["delta"]["content"], "hello");
        assert_eq!(frames[1], "data: [DONE]\n\n");
    }

    #[test]
    fn test_every_frame_keeps_sse_framing() {
        let frames = collect_frames(
            vec![b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"x\"},\"finish_reason\":null}]}\n"],
            false,
        );

        for frame in &frames {
            assert!(frame.starts_with("data: "));
            assert!(frame.ends_with("\n\n"));
        }
    }
}
