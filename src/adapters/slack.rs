//! Slack Web API notifier.
//!
//! Each execution gets one root message; narrative lines are threaded
//! replies and summary updates rewrite the root. Colors fade with the event
//! level so the thread reads as a nested narrative.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{EventState, ExecutionEvent, ThreadContext};

use super::{MessageHandle, Notifier, NotifyContext};

const SLACK_API: &str = "https://slack.com/api";

/// Slack-flavored message attachment.
#[derive(Debug, Clone, Serialize)]
struct Attachment {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    text: String,
    color: String,
    mrkdwn_in: Vec<&'static str>,
}

impl Attachment {
    fn new(title: Option<String>, text: String, color: &str) -> Self {
        Attachment {
            title,
            text,
            color: color.to_string(),
            mrkdwn_in: vec!["text"],
        }
    }
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    ts: Option<String>,
    error: Option<String>,
}

/// Color shade per event level: pipeline lines use the strongest shade,
/// stage lines a paler one, action lines the palest.
#[derive(Debug, Clone, Copy)]
enum Shade {
    Primary,
    Pale,
    Palest,
}

fn color(state: EventState, shade: Shade) -> &'static str {
    use EventState::*;
    match shade {
        Shade::Primary => match state {
            Started => "#38d",
            Failed => "#dc143c",
            Succeeded => "#1b9932",
            Superseded => "#db7923",
            Canceled => "#bbbbbb",
            Resumed => "#5eba81",
        },
        Shade::Pale => match state {
            Started => "#4d90d4",
            Failed => "#d83354",
            Succeeded => "#36a94b",
            Superseded => "#db7923",
            Canceled => "#dcdcdc",
            Resumed => "#86daa6",
        },
        Shade::Palest => match state {
            Started => "#6a9fd4",
            Failed => "#d64c68",
            Succeeded => "#54c869",
            Superseded => "#db7923",
            Canceled => "#eeeeee",
            Resumed => "#a2f5c5",
        },
    }
}

fn category_icon(category: &str) -> &'static str {
    match category {
        "Source" => "\u{1f4be}",
        "Build" => "\u{1f6e0}",
        "Test" => "\u{1f52c}",
        "Deploy" => "\u{1f680}",
        "Approval" => "\u{1f5f3}",
        "Invoke" => "\u{1f4e1}",
        _ => "",
    }
}

/// Stage names tend to use underscores where the narrative wants spaces.
fn pretty_stage(stage: &str) -> String {
    stage.replace('_', " ")
}

/// Environment label derived from the pipeline name.
fn env_label(pipeline_name: &str) -> &'static str {
    if pipeline_name.contains("staging") {
        "staging"
    } else {
        "production"
    }
}

/// Notifier over the Slack Web API (`chat.postMessage` / `chat.update`).
pub struct SlackNotifier {
    token: String,
    channel: String,
    /// Base URL of the pipeline console, for the 🔗 links. Optional.
    link_base: Option<String>,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(token: String, channel: String, link_base: Option<String>) -> Self {
        SlackNotifier {
            token,
            channel,
            link_base,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{SLACK_API}/{method}")
    }

    fn link(&self, pipeline_name: &str) -> Option<String> {
        self.link_base
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), pipeline_name))
    }

    fn linked(&self, text: &str, pipeline_name: &str) -> String {
        match self.link(pipeline_name) {
            Some(link) => format!("{text} <{link}|\u{1f517}>"),
            None => text.to_string(),
        }
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<SlackResponse> {
        let response = self
            .client
            .post(self.api_url(method))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to call Slack {method}"))?;

        let result: SlackResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Slack {method} response"))?;

        if !result.ok {
            anyhow::bail!(
                "Slack API error on {method}: {}",
                result.error.unwrap_or_default()
            );
        }
        Ok(result)
    }

    async fn post(&self, attachments: &[Attachment], thread_ts: Option<&str>) -> Result<String> {
        let mut body = serde_json::json!({
            "as_user": true,
            "channel": self.channel,
            "attachments": attachments,
        });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = serde_json::json!(ts);
        }
        let result = self.call("chat.postMessage", body).await?;
        result
            .ts
            .context("Slack postMessage response carried no ts")
    }

    async fn post_text(&self, text: &str, thread_ts: &str) -> Result<String> {
        let body = serde_json::json!({
            "as_user": true,
            "channel": self.channel,
            "text": text,
            "thread_ts": thread_ts,
        });
        let result = self.call("chat.postMessage", body).await?;
        result
            .ts
            .context("Slack postMessage response carried no ts")
    }

    async fn update(&self, ts: &str, attachments: &[Attachment]) -> Result<()> {
        let body = serde_json::json!({
            "as_user": true,
            "channel": self.channel,
            "ts": ts,
            "attachments": attachments,
        });
        self.call("chat.update", body).await?;
        Ok(())
    }

    fn narrative_line(&self, ctx: &NotifyContext<'_>, event: &ExecutionEvent) -> Attachment {
        match event {
            ExecutionEvent::Pipeline { state } => Attachment::new(
                Some(format!(
                    "{} ({})",
                    ctx.project_name,
                    env_label(ctx.pipeline_name)
                )),
                self.linked(
                    &format!("Deployment just *{}*", state.label()),
                    ctx.pipeline_name,
                ),
                color(*state, Shade::Primary),
            ),
            ExecutionEvent::Stage { stage, state } => {
                let icons = stage_icons(ctx, stage);
                Attachment::new(
                    None,
                    format!(
                        "{icons} Stage *{}* just *{}*",
                        pretty_stage(stage),
                        state.label()
                    ),
                    color(*state, Shade::Pale),
                )
            }
            ExecutionEvent::Action {
                stage,
                action,
                state,
                run_order,
            } => {
                let icon = ctx
                    .topology
                    .action_category(stage, action)
                    .map(category_icon)
                    .unwrap_or("");
                let waves = ctx
                    .topology
                    .stage(stage)
                    .map(|s| s.wave_count())
                    .unwrap_or(0);
                Attachment::new(
                    None,
                    format!(
                        ">{icon} Action *{action}* _(stage *{}* *[{run_order}/{waves}]*)_ just *{}*",
                        pretty_stage(stage),
                        state.label()
                    ),
                    color(*state, Shade::Palest),
                )
            }
        }
    }

    fn summary_line(&self, ctx: &NotifyContext<'_>, event: &ExecutionEvent) -> Option<Attachment> {
        match event {
            ExecutionEvent::Pipeline { state } => {
                let text = match state {
                    EventState::Succeeded => "Operation is now *Completed!*".to_string(),
                    EventState::Resumed => {
                        "Operation was *Resumed*, it's now in progress".to_string()
                    }
                    EventState::Canceled => "Operation was *Canceled*".to_string(),
                    EventState::Superseded => {
                        "Operation was *Superseded* while waiting, see next build".to_string()
                    }
                    EventState::Failed => self.linked(
                        "Operation is in *Failed* Status\nYou can perform a restart",
                        ctx.pipeline_name,
                    ),
                    EventState::Started => "Operation is now in progress".to_string(),
                };
                Some(Attachment::new(None, text, color(*state, Shade::Primary)))
            }
            ExecutionEvent::Stage { stage, state } => {
                let fstage = pretty_stage(stage);
                let text = match state {
                    EventState::Succeeded => {
                        format!("Stage *_{fstage}_* succeeded, waiting for the next stage to start")
                    }
                    EventState::Resumed => format!("Stage *_{fstage}_* resumed, now in progress"),
                    EventState::Started => format!("Stage *_{fstage}_* started, now in progress"),
                    EventState::Canceled => format!("Stage *_{fstage}_* canceled"),
                    EventState::Superseded => format!("Stage *_{fstage}_* was superseded"),
                    EventState::Failed => self.linked(
                        &format!("Stage *_{fstage}_* in *Failed* Status\nYou can perform a restart"),
                        ctx.pipeline_name,
                    ),
                };
                let icons = stage_icons(ctx, stage);
                Some(Attachment::new(
                    None,
                    format!("{icons} {text}"),
                    color(*state, Shade::Palest),
                ))
            }
            ExecutionEvent::Action { .. } => None,
        }
    }
}

fn stage_icons(ctx: &NotifyContext<'_>, stage: &str) -> String {
    ctx.topology
        .stage(stage)
        .map(|s| s.categories().iter().map(|c| category_icon(c)).collect())
        .unwrap_or_default()
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn open_thread(
        &self,
        project_name: &str,
        pipeline_name: &str,
        execution_id: &str,
        state: EventState,
    ) -> Result<ThreadContext> {
        let headline = self.linked(
            &format!("Deployment just *{}*", state.label()),
            pipeline_name,
        );
        let root = Attachment::new(
            Some(format!("{} ({})", project_name, env_label(pipeline_name))),
            headline.clone(),
            color(EventState::Started, Shade::Primary),
        );
        let root_ts = self.post(std::slice::from_ref(&root), None).await?;

        let execution_line = match self.link(pipeline_name) {
            Some(link) => format!("`execution-id`: <{link}/history|{execution_id}>"),
            None => format!("`execution-id`: {execution_id}"),
        };
        self.post_text(&execution_line, &root_ts).await?;

        Ok(ThreadContext {
            channel: self.channel.clone(),
            root_ts,
            headline,
        })
    }

    async fn announce(
        &self,
        ctx: &NotifyContext<'_>,
        event: &ExecutionEvent,
    ) -> Result<MessageHandle> {
        let line = self.narrative_line(ctx, event);
        let ts = self
            .post(std::slice::from_ref(&line), Some(&ctx.thread.root_ts))
            .await?;
        Ok(MessageHandle(ts))
    }

    async fn update_summary(&self, ctx: &NotifyContext<'_>, event: &ExecutionEvent) -> Result<()> {
        let Some(extra) = self.summary_line(ctx, event) else {
            return Ok(());
        };
        let root = Attachment::new(
            Some(format!(
                "{} ({})",
                ctx.project_name,
                env_label(ctx.pipeline_name)
            )),
            ctx.thread.headline.clone(),
            color(EventState::Started, Shade::Primary),
        );
        self.update(&ctx.thread.root_ts, &[root, extra]).await
    }
}
