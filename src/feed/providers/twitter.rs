// src/feed/providers/twitter.rs
//! v2 REST adapter: per-user recent lookup and the filtered push stream.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;
use crate::feed::config::FeedConfig;
use crate::feed::normalize_text;
use crate::feed::types::{
    subscription_channel, FeedItem, FeedSource, SourceId, StreamEvent, Subscription,
    SubscriptionSink,
};

const TWEET_FIELDS: &str = "author_id,created_at,referenced_tweets";
/// Provider-side minimum for `max_results` on the timeline endpoint.
const MIN_RESULTS: usize = 5;
const MAX_RESULTS: usize = 100;
const STREAM_BUFFER: usize = 256;
/// Longest stream line accepted before the partial line is discarded.
const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    #[serde(default)]
    data: Vec<ApiTweet>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

#[derive(Debug, Deserialize)]
struct ApiTweet {
    id: String,
    text: String,
    author_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    referenced_tweets: Vec<ReferencedTweet>,
}

impl ApiTweet {
    fn is_reshare(&self) -> bool {
        self.referenced_tweets.iter().any(|r| r.kind == "retweeted")
    }
}

#[derive(Debug, Deserialize)]
struct ReferencedTweet {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ApiProblem {
    title: Option<String>,
    detail: Option<String>,
}

impl ApiProblem {
    fn describe(problems: &[ApiProblem]) -> String {
        problems
            .iter()
            .map(|p| {
                p.detail
                    .as_deref()
                    .or(p.title.as_deref())
                    .unwrap_or("unknown provider error")
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    data: Option<ApiTweet>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

#[derive(Debug, Deserialize)]
struct RulesResponse {
    #[serde(default)]
    data: Vec<StreamRule>,
}

#[derive(Debug, Deserialize)]
struct StreamRule {
    id: String,
    tag: Option<String>,
}

#[derive(Serialize)]
struct AddRule<'a> {
    value: &'a str,
    tag: &'a str,
}

/// Parse a timeline lookup body into feed items for `source`.
///
/// Reshares and items with no text are left out.
pub fn parse_timeline(body: &str, source: &SourceId) -> Result<Vec<FeedItem>, UpstreamError> {
    let resp: TimelineResponse = serde_json::from_str(body)?;
    if resp.data.is_empty() && !resp.errors.is_empty() {
        return Err(UpstreamError::Api {
            status: 200,
            message: ApiProblem::describe(&resp.errors),
        });
    }

    let items = resp
        .data
        .into_iter()
        .filter(|t| !t.is_reshare())
        .filter_map(|t| {
            let text = normalize_text(&t.text);
            if text.is_empty() {
                return None;
            }
            Some(FeedItem {
                id: Some(t.id),
                source: t.author_id.map(SourceId::from).unwrap_or_else(|| source.clone()),
                text,
                created_at: t.created_at,
            })
        })
        .collect();
    Ok(items)
}

/// Parse one line of the push stream. Blank keep-alive lines yield `None`.
pub fn parse_stream_line(line: &str) -> Result<Option<StreamEvent>, UpstreamError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let frame: StreamFrame = serde_json::from_str(line)?;
    match frame.data {
        Some(t) => {
            let is_reshare = t.is_reshare();
            Ok(Some(StreamEvent {
                id: Some(t.id),
                source: t.author_id.map(SourceId::from),
                text: Some(t.text),
                created_at: t.created_at,
                is_reshare,
            }))
        }
        None if !frame.errors.is_empty() => Err(UpstreamError::Api {
            status: 200,
            message: ApiProblem::describe(&frame.errors),
        }),
        None => Ok(None),
    }
}

/// Stream rule matching posts authored by any of `sources`.
pub fn build_rule(sources: &[SourceId]) -> String {
    sources
        .iter()
        .map(|s| format!("from:{s}"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

pub struct TwitterSource {
    client: Client,
    base: String,
    token: String,
    rule_tag: String,
    request_timeout: Duration,
}

impl TwitterSource {
    pub fn new(
        base: impl Into<String>,
        token: String,
        rule_tag: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        // No overall client timeout: the stream request must stay open.
        let client = Client::builder().connect_timeout(request_timeout).build()?;
        let base: String = base.into();
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            token,
            rule_tag: rule_tag.into(),
            request_timeout,
        })
    }

    pub fn from_config(cfg: &FeedConfig) -> anyhow::Result<Self> {
        let token = cfg.resolve_bearer_token()?;
        Self::new(
            cfg.api_base.clone(),
            token,
            cfg.stream_rule_tag.clone(),
            cfg.pull_timeout(),
        )
        .context("building upstream http client")
    }

    fn rules_url(&self) -> String {
        format!("{}/2/tweets/search/stream/rules", self.base)
    }

    /// Replace our tagged stream rule with one matching `sources`.
    async fn sync_rules(&self, sources: &[SourceId]) -> Result<(), UpstreamError> {
        let resp = self
            .client
            .get(self.rules_url())
            .bearer_auth(&self.token)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let body = check(resp).await?.text().await?;
        let existing: RulesResponse = serde_json::from_str(&body)?;

        let stale: Vec<String> = existing
            .data
            .into_iter()
            .filter(|r| r.tag.as_deref() == Some(self.rule_tag.as_str()))
            .map(|r| r.id)
            .collect();
        if !stale.is_empty() {
            let resp = self
                .client
                .post(self.rules_url())
                .bearer_auth(&self.token)
                .timeout(self.request_timeout)
                .json(&serde_json::json!({ "delete": { "ids": stale } }))
                .send()
                .await?;
            check(resp).await?;
        }

        let value = build_rule(sources);
        let resp = self
            .client
            .post(self.rules_url())
            .bearer_auth(&self.token)
            .timeout(self.request_timeout)
            .json(&serde_json::json!({
                "add": [AddRule { value: &value, tag: &self.rule_tag }]
            }))
            .send()
            .await?;
        check(resp).await?;

        tracing::debug!(target: "feed", rule = %value, "stream rule synced");
        Ok(())
    }
}

#[async_trait]
impl FeedSource for TwitterSource {
    async fn pull_recent(
        &self,
        source: &SourceId,
        limit: usize,
    ) -> Result<Vec<FeedItem>, UpstreamError> {
        let url = format!("{}/2/users/{}/tweets", self.base, source);
        let max_results = limit.clamp(MIN_RESULTS, MAX_RESULTS).to_string();
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .timeout(self.request_timeout)
            .query(&[
                ("exclude", "retweets"),
                ("max_results", max_results.as_str()),
                ("tweet.fields", TWEET_FIELDS),
            ])
            .send()
            .await?;
        let body = check(resp).await?.text().await?;

        let mut items = parse_timeline(&body, source)?;
        items.truncate(limit);
        Ok(items)
    }

    async fn subscribe(&self, sources: &[SourceId]) -> Result<Subscription, UpstreamError> {
        self.sync_rules(sources).await?;

        let resp = self
            .client
            .get(format!("{}/2/tweets/search/stream", self.base))
            .bearer_auth(&self.token)
            .query(&[("tweet.fields", TWEET_FIELDS)])
            .send()
            .await?;
        let resp = check(resp).await?;

        let (sink, sub) = subscription_channel(STREAM_BUFFER);
        tokio::spawn(read_stream(resp, sink));
        Ok(sub)
    }

    fn name(&self) -> &'static str {
        "twitter"
    }
}

async fn check(resp: Response) -> Result<Response, UpstreamError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(UpstreamError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Reassembles newline-delimited frames from arbitrary body chunks.
struct LineBuffer {
    buf: Vec<u8>,
    max_line: usize,
    // inside an over-long line; drop bytes up to the next newline
    discarding: bool,
}

impl LineBuffer {
    fn new(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// Feed one chunk; returns every line it completed, in order.
    /// A line longer than `max_line` comes back once as a parse error.
    fn push(&mut self, chunk: &[u8]) -> Vec<Result<String, UpstreamError>> {
        let mut out = Vec::new();
        self.buf.extend_from_slice(chunk);

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            if self.discarding {
                self.discarding = false;
            } else if raw.len() > self.max_line {
                out.push(Err(self.overflow()));
            } else {
                out.push(Ok(String::from_utf8_lossy(&raw).into_owned()));
            }
        }

        if self.buf.len() > self.max_line {
            self.buf.clear();
            if !self.discarding {
                self.discarding = true;
                out.push(Err(self.overflow()));
            }
        }
        out
    }

    fn overflow(&self) -> UpstreamError {
        UpstreamError::Parse(format!("stream line exceeds {} bytes", self.max_line))
    }
}

/// Split the chunked body into lines and hand events to the subscriber.
/// Exits when the subscriber goes away or the stream ends.
async fn read_stream(mut resp: Response, sink: SubscriptionSink) {
    let mut lines = LineBuffer::new(MAX_LINE_BYTES);
    loop {
        let chunk = tokio::select! {
            _ = sink.closed() => {
                tracing::debug!(target: "feed", "stream subscriber dropped, closing");
                return;
            }
            c = resp.chunk() => c,
        };

        match chunk {
            Ok(Some(bytes)) => {
                for line in lines.push(&bytes) {
                    match line.and_then(|l| parse_stream_line(&l)) {
                        Ok(Some(ev)) => {
                            if !sink.deliver(ev).await {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => sink.report(e),
                    }
                }
            }
            Ok(None) => {
                sink.report(UpstreamError::Closed("stream ended".to_string()));
                return;
            }
            Err(e) => {
                sink.report(e.into());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_joins_sources_in_order() {
        let sources: Vec<SourceId> = vec!["1".into(), "22".into(), "333".into()];
        assert_eq!(build_rule(&sources), "from:1 OR from:22 OR from:333");
    }

    #[test]
    fn keep_alive_lines_are_skipped() {
        assert_eq!(parse_stream_line("\r\n").unwrap(), None);
        assert_eq!(parse_stream_line("").unwrap(), None);
    }

    #[test]
    fn lines_split_across_chunks_are_rejoined() {
        let mut lb = LineBuffer::new(64);
        assert!(lb.push(b"{\"data\":{\"id\"").is_empty());
        let out = lb.push(b":\"1\"}}\r\n\r\nnext");
        let lines: Vec<String> = out.into_iter().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["{\"data\":{\"id\":\"1\"}}\r\n", "\r\n"]);
        assert_eq!(lb.push(b"\n").into_iter().map(|l| l.unwrap()).collect::<Vec<_>>(), vec!["next\n"]);
    }

    #[test]
    fn over_long_line_is_reported_once_and_skipped() {
        let mut lb = LineBuffer::new(8);
        let out = lb.push(b"0123456789");
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(UpstreamError::Parse(_))));

        // rest of the same line is swallowed, then reading resumes
        assert!(lb.push(b"abcdefghijk").is_empty());
        let out = lb.push(b"tail\nok\n");
        let lines: Vec<String> = out.into_iter().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["ok\n"]);

        // a complete line arriving in one chunk is bounded too
        let out = lb.push(b"way too long line\n");
        assert!(matches!(out[..], [Err(UpstreamError::Parse(_))]));
    }

    #[test]
    fn new_trims_trailing_slash() {
        let src = TwitterSource::new(
            "http://localhost:9/",
            "t".into(),
            "tag",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(src.rules_url(), "http://localhost:9/2/tweets/search/stream/rules");
    }
}
