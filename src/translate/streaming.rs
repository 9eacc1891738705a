//! State machines for reshaping the upstream event stream.
//!
//! Two pieces, each per-request and never shared:
//!
//! - [`LineDecoder`] turns arbitrarily-split byte chunks into complete lines,
//!   retaining an unterminated tail between feeds. Upstream chunk boundaries
//!   carry no meaning; only line terminators do.
//! - [`StreamReshaper`] rewrites one well-formed upstream delta at a time,
//!   tracking whether a reasoning section is currently open so `<think>`
//!   markers are emitted exactly once per section.

use super::chat_types::{ChatCompletionChunk, ChunkChoice, ChunkDelta};
use super::upstream_types::{UpstreamChunk, UpstreamDelta};

pub const REASONING_OPEN_MARKER: &str = "<think>\n";
pub const REASONING_CLOSE_MARKER: &str = "</think>\n\n";

/// Splits a byte stream into lines across arbitrary chunk boundaries.
///
/// The buffer stays raw bytes until a terminator is seen: chunk boundaries
/// may fall inside a multibyte character, so decoding anything short of a
/// complete line would mangle it.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every line completed by it. The
    /// terminator is stripped (a trailing `\r` too); an unterminated tail is
    /// held back for the next feed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }
}

/// Rewrites upstream deltas into the inbound chunk shape, folding reasoning
/// fragments into content between `<think>` markers.
///
/// One instance per streamed response; the `reasoning_open` flag is the only
/// cross-chunk state and cannot leak across requests.
#[derive(Debug)]
pub struct StreamReshaper {
    show_reasoning: bool,
    reasoning_open: bool,
}

impl StreamReshaper {
    pub fn new(show_reasoning: bool) -> Self {
        Self {
            show_reasoning,
            reasoning_open: false,
        }
    }

    /// Reshape one well-formed upstream chunk into an outbound chunk.
    /// Sentinel and unparseable payloads never reach this point; the stream
    /// driver forwards those verbatim.
    pub fn reshape(&mut self, chunk: &UpstreamChunk) -> ChatCompletionChunk {
        let choices = chunk
            .choices
            .iter()
            .map(|c| ChunkChoice {
                index: c.index,
                delta: self.rewrite_delta(&c.delta),
                finish_reason: c.finish_reason.clone(),
            })
            .collect();

        ChatCompletionChunk {
            id: chunk.id.clone(),
            object: chunk.object.clone(),
            created: chunk.created,
            model: chunk.model.clone(),
            choices,
            usage: chunk.usage.clone(),
        }
    }

    fn rewrite_delta(&mut self, delta: &UpstreamDelta) -> ChunkDelta {
        if !self.show_reasoning {
            // Reasoning dropped entirely; content is always present, empty
            // when the upstream sent none.
            return ChunkDelta {
                role: delta.role.clone(),
                content: Some(delta.content.clone().unwrap_or_default()),
            };
        }

        let reasoning = delta.reasoning.as_deref().filter(|s| !s.is_empty());
        let content = delta.content.as_deref().filter(|s| !s.is_empty());

        let mut folded: Option<String> = None;

        if let Some(fragment) = reasoning {
            let mut out = String::new();
            if !self.reasoning_open {
                out.push_str(REASONING_OPEN_MARKER);
                self.reasoning_open = true;
            }
            out.push_str(fragment);
            folded = Some(out);
        }

        if let Some(fragment) = content {
            let mut out = folded.unwrap_or_default();
            if self.reasoning_open {
                out.push_str(REASONING_CLOSE_MARKER);
                self.reasoning_open = false;
            }
            out.push_str(fragment);
            folded = Some(out);
        }

        // Neither fragment present: pass the upstream content through
        // untouched (it may be absent). Reasoning is stripped either way.
        ChunkDelta {
            role: delta.role.clone(),
            content: folded.or_else(|| delta.content.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_chunk(reasoning: Option<&str>, content: Option<&str>) -> UpstreamChunk {
        UpstreamChunk {
            id: "up-1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "big-model".to_string(),
            choices: vec![super::super::upstream_types::UpstreamChunkChoice {
                index: 0,
                delta: UpstreamDelta {
                    role: None,
                    content: content.map(String::from),
                    reasoning: reasoning.map(String::from),
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    fn content_of(chunk: &ChatCompletionChunk) -> Option<&str> {
        chunk.choices[0].delta.content.as_deref()
    }

    // -- LineDecoder --------------------------------------------------------

    #[test]
    fn test_decoder_whole_lines() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.feed(b"data: one\ndata: two\n");
        assert_eq!(lines, vec!["data: one", "data: two"]);
    }

    #[test]
    fn test_decoder_split_line_across_chunks() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.feed(b"data: {\"par").is_empty());
        let lines = decoder.feed(b"tial\":true}\n");
        assert_eq!(lines, vec!["data: {\"partial\":true}"]);
    }

    #[test]
    fn test_decoder_retains_trailing_partial() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.feed(b"data: full\ndata: tail");
        assert_eq!(lines, vec!["data: full"]);
        let lines = decoder.feed(b" end\n");
        assert_eq!(lines, vec!["data: tail end"]);
    }

    #[test]
    fn test_decoder_split_inside_multibyte_char() {
        // A chunk boundary in the middle of a UTF-8 code point must not
        // produce replacement characters once the line completes.
        let mut decoder = LineDecoder::new();
        assert!(decoder.feed(b"data: \xf0\x9f").is_empty());
        let lines = decoder.feed(b"\x98\x80\n");
        assert_eq!(lines, vec!["data: \u{1f600}"]);
    }

    #[test]
    fn test_decoder_strips_crlf() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.feed(b"data: one\r\n\r\n");
        assert_eq!(lines, vec!["data: one", ""]);
    }

    // -- StreamReshaper -----------------------------------------------------

    #[test]
    fn test_reasoning_sequence() {
        // The canonical scenario: reasoning "a", reasoning "b", content "c".
        let mut reshaper = StreamReshaper::new(true);

        let out = reshaper.reshape(&delta_chunk(Some("a"), None));
        assert_eq!(content_of(&out), Some("<think>\na"));

        let out = reshaper.reshape(&delta_chunk(Some("b"), None));
        assert_eq!(content_of(&out), Some("b"));

        let out = reshaper.reshape(&delta_chunk(None, Some("c")));
        assert_eq!(content_of(&out), Some("</think>\n\nc"));
    }

    #[test]
    fn test_reasoning_and_content_in_same_delta() {
        let mut reshaper = StreamReshaper::new(true);

        let out = reshaper.reshape(&delta_chunk(Some("thought"), Some("answer")));
        assert_eq!(
            content_of(&out),
            Some("<think>\nthought</think>\n\nanswer")
        );

        // Section closed: further content is emitted bare
        let out = reshaper.reshape(&delta_chunk(None, Some("more")));
        assert_eq!(content_of(&out), Some("more"));
    }

    #[test]
    fn test_combined_delta_while_section_open() {
        let mut reshaper = StreamReshaper::new(true);
        let _ = reshaper.reshape(&delta_chunk(Some("a"), None));

        // Both fragments with the section already open: reasoning first,
        // close marker, then content, all in one outbound event.
        let out = reshaper.reshape(&delta_chunk(Some("b"), Some("c")));
        assert_eq!(content_of(&out), Some("b</think>\n\nc"));
    }

    #[test]
    fn test_content_only_stream_has_no_markers() {
        let mut reshaper = StreamReshaper::new(true);

        let out = reshaper.reshape(&delta_chunk(None, Some("plain")));
        assert_eq!(content_of(&out), Some("plain"));

        let out = reshaper.reshape(&delta_chunk(None, Some(" text")));
        assert_eq!(content_of(&out), Some(" text"));
    }

    #[test]
    fn test_empty_delta_left_alone() {
        let mut reshaper = StreamReshaper::new(true);
        let out = reshaper.reshape(&delta_chunk(None, None));
        assert_eq!(content_of(&out), None);
    }

    #[test]
    fn test_reasoning_stripped_when_disabled() {
        let mut reshaper = StreamReshaper::new(false);

        let out = reshaper.reshape(&delta_chunk(Some("secret"), None));
        assert_eq!(content_of(&out), Some(""));

        let out = reshaper.reshape(&delta_chunk(Some("secret"), Some("visible")));
        assert_eq!(content_of(&out), Some("visible"));

        // Content is never absent in this mode
        let out = reshaper.reshape(&delta_chunk(None, None));
        assert_eq!(content_of(&out), Some(""));
    }

    #[test]
    fn test_outbound_delta_has_no_reasoning_field() {
        let mut reshaper = StreamReshaper::new(true);
        let out = reshaper.reshape(&delta_chunk(Some("r"), None));

        let json = serde_json::to_value(&out).unwrap();
        assert!(json["choices"][0]["delta"].get("reasoning").is_none());
        assert!(json["choices"][0]["delta"]
            .get("reasoning_content")
            .is_none());
    }

    #[test]
    fn test_finish_reason_and_usage_carried() {
        let mut chunk = delta_chunk(None, Some("done"));
        chunk.choices[0].finish_reason = Some("stop".to_string());
        chunk.usage = Some(crate::translate::chat_types::Usage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        });

        let mut reshaper = StreamReshaper::new(true);
        let out = reshaper.reshape(&chunk);
        assert_eq!(out.choices[0].finish_reason, Some("stop".to_string()));
        assert_eq!(out.usage.as_ref().map(|u| u.total_tokens), Some(3));
    }
}
