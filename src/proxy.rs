use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::logging::RequestLogger;
use crate::models;
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse, StreamEvent};
use crate::translate::openai_types::{ChatCompletionRequest, ChatCompletionResponse};
use crate::translate::request::anthropic_to_openai;
use crate::translate::response::openai_to_anthropic;
use crate::translate::streaming::StreamTranslator;

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;

/// Anthropic stream events for one request, ending after `message_stop` or
/// when the backend connection ends.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Resolve the deployment and translate the request for it.
pub fn prepare(req: &MessagesRequest, config: &ProxyConfig) -> ChatCompletionRequest {
    let deployment = models::resolve(&req.model, &config.deployments);
    anthropic_to_openai(req, deployment)
}

/// Send a translated request and return the backend response once its status is known.
/// Non-2xx statuses are turned into [`ProxyError::Backend`].
async fn send(
    chat_req: &ChatCompletionRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    logger: &RequestLogger,
) -> Result<reqwest::Response> {
    let api_key = config.resolve_api_key()?;
    let url = config.chat_completions_url(&chat_req.deployment);

    logger.info_with_context(
        "proxy",
        format!("POST {url}"),
        serde_json::json!({
            "deployment": chat_req.deployment,
            "stream": chat_req.stream,
            "messages": chat_req.messages.len(),
            "tools": chat_req.tools.as_ref().map_or(0, Vec::len),
        }),
    );

    let response = client
        .post(&url)
        .header("api-key", api_key)
        .json(chat_req)
        .send()
        .await
        .map_err(|e| ProxyError::backend(format!("Request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        logger.warn(
            "proxy",
            format!("Backend returned status {}: {}", status.as_u16(), truncate(&body, 300)),
        );
        return Err(ProxyError::backend(format!(
            "Backend returned status {}: {}",
            status.as_u16(),
            truncate(&body, 500)
        )));
    }

    Ok(response)
}

/// Forward a non-streaming request and translate the complete reply.
pub async fn proxy_non_streaming(
    req: &MessagesRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    logger: &RequestLogger,
) -> Result<MessagesResponse> {
    let chat_req = prepare(req, config);
    let response = send(&chat_req, config, client, logger).await?;

    let body = response
        .bytes()
        .await
        .map_err(|e| ProxyError::backend(format!("Failed to read response body: {e}")))?;

    let chat_resp: ChatCompletionResponse = serde_json::from_slice(&body)?;
    let anthropic_resp = openai_to_anthropic(&chat_resp, &req.model)?;

    logger.info(
        "proxy",
        format!(
            "Completed: in={} out={} tokens stop={}",
            anthropic_resp.usage.input_tokens,
            anthropic_resp.usage.output_tokens,
            anthropic_resp.stop_reason.as_deref().unwrap_or("-")
        ),
    );

    Ok(anthropic_resp)
}

/// Open the backend stream. Connection and status failures surface here,
/// before any event has been produced; afterwards the stream only ends.
pub async fn proxy_streaming(
    req: &MessagesRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    logger: &RequestLogger,
) -> Result<EventStream> {
    let chat_req = prepare(req, config);
    let response = send(&chat_req, config, client, logger).await?;

    let stream = translate_stream(response.bytes_stream(), req.model.clone(), logger.clone());
    Ok(Box::pin(stream))
}

/// Pull loop: read bytes, frame, translate, yield. Dropping the returned stream
/// drops the backend response and with it the upstream connection.
pub fn translate_stream<S, E>(
    byte_stream: S,
    model: String,
    logger: RequestLogger,
) -> impl Stream<Item = StreamEvent> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut translator = StreamTranslator::new(&model);
        let mut guard = DisconnectGuard::new(logger.clone());

        yield translator.message_start();

        tokio::pin!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    logger.error("stream", format!("Backend stream error: {e}"));
                    break;
                }
            };

            for event in translator.feed(&chunk) {
                yield event;
            }

            if translator.is_finished() {
                break;
            }
        }

        let state = translator.state();
        if state.malformed_frames > 0 {
            logger.debug(
                "stream",
                format!("Skipped {} unparseable frames", state.malformed_frames),
            );
        }

        if translator.is_finished() {
            logger.info(
                "stream",
                format!(
                    "Stream completed: in={} out={} tokens",
                    state.input_tokens, state.output_tokens
                ),
            );
        } else {
            logger.warn("stream", "Backend stream ended before a finish reason");
        }
        guard.disarm();
    }
}

/// Logs a client disconnect when the event stream is dropped mid-flight.
struct DisconnectGuard {
    logger: RequestLogger,
    armed: bool,
}

impl DisconnectGuard {
    fn new(logger: RequestLogger) -> Self {
        Self {
            logger,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.armed {
            self.logger
                .info("stream", "Client disconnected, backend request aborted");
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::SharedLogger;
    use futures::stream;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    /// Byte stream that records when it is dropped.
    struct Tracked<S> {
        inner: S,
        dropped: Arc<AtomicBool>,
    }

    impl<S: Stream + Unpin> Stream for Tracked<S> {
        type Item = S::Item;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
            self.get_mut().inner.poll_next_unpin(cx)
        }
    }

    impl<S> Drop for Tracked<S> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn logger(dir: &tempfile::TempDir) -> RequestLogger {
        SharedLogger::new(dir.path().join("proxy.log"))
            .unwrap()
            .for_request("test")
    }

    #[tokio::test]
    async fn test_translate_stream_across_chunk_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let chunks: Vec<std::result::Result<Bytes, std::io::Error>> = body
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let events: Vec<StreamEvent> =
            translate_stream(stream::iter(chunks), "claude-sonnet-x".to_string(), logger(&dir))
                .collect()
                .await;

        let names: Vec<&str> = events.iter().map(StreamEvent::event_name).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[tokio::test]
    async fn test_backend_error_ends_stream_without_message_stop() {
        let dir = tempfile::tempdir().unwrap();
        let chunks: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"partial\"}}]}\n\n",
            )),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            )),
        ];

        let events: Vec<StreamEvent> =
            translate_stream(stream::iter(chunks), "m".to_string(), logger(&dir))
                .collect()
                .await;

        let names: Vec<&str> = events.iter().map(StreamEvent::event_name).collect();
        assert_eq!(
            names,
            vec!["message_start", "content_block_start", "content_block_delta"]
        );
    }

    #[tokio::test]
    async fn test_stops_reading_after_finish() {
        let dir = tempfile::tempdir().unwrap();
        let finished = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(
            b"data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        ))]);
        // A backend that never closes; the loop must not wait on it.
        let endless = finished.chain(stream::pending());

        let events: Vec<StreamEvent> = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            translate_stream(endless, "m".to_string(), logger(&dir)).collect(),
        )
        .await
        .expect("stream should end after message_stop");

        assert_eq!(events.last(), Some(&StreamEvent::MessageStop));
    }

    #[tokio::test]
    async fn test_client_disconnect_drops_backend_stream() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedLogger::new(dir.path().join("proxy.log")).unwrap();
        let dropped = Arc::new(AtomicBool::new(false));

        let first = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(
            b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"}}]}\n\n",
        ))]);
        let upstream = Tracked {
            inner: first.chain(stream::pending()),
            dropped: dropped.clone(),
        };

        let events: Vec<StreamEvent> =
            translate_stream(upstream, "m".to_string(), shared.for_request("gone"))
                .take(2)
                .collect()
                .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_name(), "content_block_start");
        assert!(dropped.load(Ordering::SeqCst));

        let recent = shared.recent(10);
        assert!(recent.iter().any(|e| {
            e.message.contains("Client disconnected") && e.request_id.as_deref() == Some("gone")
        }));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
