//! The per-session agent loop.
//!
//! A state machine with four phases — Idle, Preparing, Inferring,
//! ExecutingTools — driven by a single-consumer event inbox. Sub-tasks (the
//! provider stream reader, the parallel tool dispatcher, the run-timeout
//! timer) are spawned tasks that report back through the same inbox; every
//! callback carries the `run_id` it belongs to, and events from a run that
//! is no longer current are dropped. That one rule implements both stale
//! timers and discard-after-cancel.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use sb_domain::error::{Error, Result};
use sb_domain::message::{Message, ToolCall, ToolDefinition};
use sb_domain::stream::{StreamEvent, Usage};
use sb_providers::{ChatRequest, LlmProvider, StreamCollector};
use sb_sessions::{MessageRecord, SessionEntry};
use sb_tools::ToolContext;

use crate::bus::{agent_topic, BusEvent, RunPhase};
use crate::chunker::BlockChunker;
use crate::state::RuntimeHandle;

use super::dispatch::{dispatch_all, ToolOutcome};
use super::{records_to_messages, truncate_str};

/// Sentinel content when a run ends with no model text.
pub const NO_RESPONSE_SENTINEL: &str = "[No response from AI]";
/// Sentinel content when the iteration cap terminates a run.
pub const TOO_MANY_TOOL_CALLS_SENTINEL: &str = "[Stopped: too many tool calls]";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events & options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// `provider/model` spec; `None` uses the configured default.
    pub model: Option<String>,
    /// Run deadline override.
    pub timeout: Option<Duration>,
    /// Push chunked segments to the session's channel as they form.
    /// Set by channel-originated ingress; cron notifications and API
    /// callers deliver the final content themselves.
    pub deliver_segments: bool,
}

/// Everything the loop can receive through its inbox.
pub enum LoopEvent {
    Run {
        text: String,
        opts: RunOptions,
        reply: Option<oneshot::Sender<Result<String>>>,
    },
    Cancel,
    RunTimeout {
        run_id: Uuid,
    },
    StreamDelta {
        run_id: Uuid,
        text: String,
    },
    InferenceDone {
        run_id: Uuid,
        result: Result<sb_providers::ChatAggregate>,
    },
    ToolsDone {
        run_id: Uuid,
        outcomes: Vec<ToolOutcome>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Preparing,
    Inferring,
    ExecutingTools,
}

/// Ephemeral state of one run.
struct ActiveRun {
    run_id: Uuid,
    provider: Arc<dyn LlmProvider>,
    /// Model override carried into every inference of this run.
    model_override: Option<String>,
    /// Resolved model label (for remap lookup and persistence).
    model_name: String,
    messages: Vec<Message>,
    tool_defs: Vec<ToolDefinition>,
    /// Advertised name → real name, when a vendor remap applies.
    unmap: Option<HashMap<String, String>>,
    /// Tool calls of the cycle currently executing.
    pending: Vec<ToolCall>,
    /// Text streamed in the cycle that requested those tools.
    cycle_text: String,
    iterations: u32,
    usage: Usage,
    reply: Option<oneshot::Sender<Result<String>>>,
    timeout_task: JoinHandle<()>,
    chunker: BlockChunker,
    deliver_segments: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentLoop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AgentLoop {
    deps: Arc<RuntimeHandle>,
    session: SessionEntry,
    /// Clone handed to sub-tasks so their results re-enter the inbox.
    inbox: mpsc::Sender<LoopEvent>,
    phase: Phase,
    run: Option<ActiveRun>,
    /// Runs that arrived while one was in flight; started in order once
    /// the loop returns to Idle.
    queued: VecDeque<(String, RunOptions, Option<oneshot::Sender<Result<String>>>)>,
}

impl AgentLoop {
    pub fn new(
        deps: Arc<RuntimeHandle>,
        session: SessionEntry,
        inbox: mpsc::Sender<LoopEvent>,
    ) -> Self {
        Self {
            deps,
            session,
            inbox,
            phase: Phase::Idle,
            run: None,
            queued: VecDeque::new(),
        }
    }

    fn topic(&self) -> String {
        agent_topic(&self.session.session_key)
    }

    fn publish(&self, event: BusEvent) {
        self.deps.bus.publish(&self.topic(), event);
    }

    fn publish_status(&self, run_id: Uuid, phase: RunPhase, details: Option<String>) {
        self.publish(BusEvent::Status {
            run_id,
            phase,
            details,
        });
    }

    /// Whether an event belongs to the run currently in flight.
    fn is_current(&self, run_id: Uuid) -> bool {
        self.run.as_ref().map(|r| r.run_id) == Some(run_id)
    }

    /// Process one event. Returns `false` on shutdown.
    pub async fn handle(&mut self, event: LoopEvent) -> bool {
        match event {
            LoopEvent::Run { text, opts, reply } => {
                if self.phase == Phase::Idle {
                    self.start_run(text, opts, reply).await;
                } else {
                    // Started once the prior run reaches Idle.
                    self.queued.push_back((text, opts, reply));
                }
            }

            LoopEvent::Cancel => self.on_cancel().await,

            LoopEvent::RunTimeout { run_id } => {
                if self.is_current(run_id) {
                    tracing::warn!(
                        session_key = %self.session.session_key,
                        %run_id,
                        "run timed out"
                    );
                    self.finish_error(Error::Timeout).await;
                }
                // Stale timer: ignore.
            }

            LoopEvent::StreamDelta { run_id, text } => {
                if self.is_current(run_id) {
                    self.on_stream_delta(run_id, text);
                }
            }

            LoopEvent::InferenceDone { run_id, result } => {
                if self.is_current(run_id) && self.phase == Phase::Inferring {
                    self.on_inference_done(result).await;
                }
            }

            LoopEvent::ToolsDone { run_id, outcomes } => {
                if self.is_current(run_id) && self.phase == Phase::ExecutingTools {
                    self.on_tools_done(outcomes).await;
                }
            }

            LoopEvent::Shutdown => {
                if let Some(run) = self.run.take() {
                    finish_reply(run.reply, Err(Error::WorkerDied));
                    run.timeout_task.abort();
                }
                return false;
            }
        }
        true
    }

    // ── Run start ─────────────────────────────────────────────────

    async fn start_run(
        &mut self,
        text: String,
        opts: RunOptions,
        reply: Option<oneshot::Sender<Result<String>>>,
    ) {
        let run_id = Uuid::new_v4();
        self.phase = Phase::Preparing;

        let (provider, model_override) =
            match self.deps.providers.resolve(opts.model.as_deref()) {
                Ok(resolved) => resolved,
                Err(e) => {
                    self.phase = Phase::Idle;
                    self.publish(BusEvent::Error {
                        run_id,
                        reason: e.to_string(),
                    });
                    finish_reply(reply, Err(e));
                    self.pump_queue();
                    return;
                }
            };
        let model_name = model_override
            .clone()
            .unwrap_or_else(|| provider.default_model().to_owned());

        // Arm the run timer; it is matched by run_id when it fires.
        let timeout = opts
            .timeout
            .unwrap_or(Duration::from_secs(self.deps.config.runtime.run_timeout_secs));
        let timer_inbox = self.inbox.clone();
        let timeout_task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = timer_inbox.send(LoopEvent::RunTimeout { run_id }).await;
        });

        // Load the history tail, append and persist the user turn.
        let history = match self
            .deps
            .log
            .tail(&self.session.session_id, self.deps.config.runtime.history_limit)
        {
            Ok(records) => records,
            Err(e) => {
                timeout_task.abort();
                self.phase = Phase::Idle;
                self.publish(BusEvent::Error {
                    run_id,
                    reason: e.to_string(),
                });
                finish_reply(reply, Err(e));
                self.pump_queue();
                return;
            }
        };

        let mut messages = vec![Message::system(&self.deps.config.runtime.system_prompt)];
        messages.extend(records_to_messages(&history));
        messages.push(Message::user(&text));

        if let Err(e) = self
            .deps
            .log
            .append(&self.session.session_id, &[MessageRecord::user(&text)])
        {
            timeout_task.abort();
            self.phase = Phase::Idle;
            self.publish(BusEvent::Error {
                run_id,
                reason: e.to_string(),
            });
            finish_reply(reply, Err(e));
            self.pump_queue();
            return;
        }
        self.deps
            .sessions
            .bump_message_count(&self.session.session_key, 1);

        // Tool set, with the vendor name remap applied as data.
        let tools_cfg = &self.deps.config.tools;
        let mut tool_defs = self
            .deps
            .tools
            .definitions(&tools_cfg.allow, &tools_cfg.deny);
        let unmap = match self.deps.config.llm.tool_name_map_for(&model_name) {
            Some(remap) => {
                let mut reverse = HashMap::new();
                for def in &mut tool_defs {
                    if let Some(advertised) = remap.get(&def.name) {
                        reverse.insert(advertised.clone(), def.name.clone());
                        def.name = advertised.clone();
                    }
                }
                Some(reverse)
            }
            None => None,
        };

        self.run = Some(ActiveRun {
            run_id,
            provider,
            model_override,
            model_name,
            messages,
            tool_defs,
            unmap,
            pending: Vec::new(),
            cycle_text: String::new(),
            iterations: 0,
            usage: Usage::default(),
            reply,
            timeout_task,
            chunker: BlockChunker::new(&self.deps.config.chunker),
            deliver_segments: opts.deliver_segments,
        });

        self.publish_status(run_id, RunPhase::Started, None);
        self.start_inference();
    }

    // ── Inference ─────────────────────────────────────────────────

    fn start_inference(&mut self) {
        let run = self.run.as_ref().expect("run set before inference");
        self.phase = Phase::Inferring;
        self.publish_status(run.run_id, RunPhase::Inferring, None);

        let run_id = run.run_id;
        let provider = run.provider.clone();
        let req = ChatRequest {
            messages: run.messages.clone(),
            tools: run.tool_defs.clone(),
            model: run.model_override.clone(),
            max_tokens: None,
            temperature: None,
        };
        let inbox = self.inbox.clone();
        let span = tracing::info_span!(
            "llm.call",
            "otel.kind" = "CLIENT",
            %run_id,
            model = %run.model_name,
        );

        let reader = async move {
            let mut stream = match provider.chat_stream(&req).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = inbox
                        .send(LoopEvent::InferenceDone {
                            run_id,
                            result: Err(e),
                        })
                        .await;
                    return;
                }
            };

            let mut collector = StreamCollector::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(StreamEvent::Error { message }) => {
                        let _ = inbox
                            .send(LoopEvent::InferenceDone {
                                run_id,
                                result: Err(Error::Other(message)),
                            })
                            .await;
                        return;
                    }
                    Ok(event) => {
                        if let StreamEvent::Token { ref text } = event {
                            let _ = inbox
                                .send(LoopEvent::StreamDelta {
                                    run_id,
                                    text: text.clone(),
                                })
                                .await;
                        }
                        collector.absorb(&event);
                    }
                    Err(e) => {
                        // Transport failure mid-stream: the partial
                        // aggregate is discarded.
                        let _ = inbox
                            .send(LoopEvent::InferenceDone {
                                run_id,
                                result: Err(e),
                            })
                            .await;
                        return;
                    }
                }
            }

            let _ = inbox
                .send(LoopEvent::InferenceDone {
                    run_id,
                    result: Ok(collector.finish()),
                })
                .await;
        };
        tokio::spawn(tracing::Instrument::instrument(reader, span));
    }

    fn on_stream_delta(&mut self, run_id: Uuid, text: String) {
        self.publish(BusEvent::Chunk {
            run_id,
            text: text.clone(),
        });
        if let Some(run) = self.run.as_mut() {
            let enabled = run.deliver_segments;
            let segments = run.chunker.push(&text);
            self.deliver_segments(enabled, segments);
        }
    }

    async fn on_inference_done(&mut self, result: Result<sb_providers::ChatAggregate>) {
        let aggregate = match result {
            Ok(aggregate) => aggregate,
            Err(e) => {
                self.finish_error(e).await;
                return;
            }
        };

        let run = self.run.as_mut().expect("current run checked");
        run.usage.add(&aggregate.usage);

        if aggregate.tool_calls.is_empty() {
            let content = if aggregate.content.is_empty() {
                NO_RESPONSE_SENTINEL.to_owned()
            } else {
                aggregate.content
            };
            self.finish_success(content, Some(aggregate.usage)).await;
            return;
        }

        run.cycle_text = aggregate.content;
        run.pending = aggregate.tool_calls;
        self.phase = Phase::ExecutingTools;

        let run = self.run.as_ref().expect("current run checked");
        let names: Vec<&str> = run.pending.iter().map(|c| c.name.as_str()).collect();
        self.publish_status(
            run.run_id,
            RunPhase::ToolStart,
            Some(names.join(",")),
        );

        let run_id = run.run_id;
        let tools = self.deps.tools.clone();
        let calls = run.pending.clone();
        let unmap = run.unmap.clone();
        let ctx = ToolContext {
            session_id: self.session.session_id.clone(),
            session_key: self.session.session_key.clone(),
            run_id: run_id.to_string(),
            agent_id: self.session.agent_id.clone(),
            channel: self.session.channel.clone(),
        };
        let per_tool_timeout =
            Duration::from_secs(self.deps.config.runtime.tool_timeout_secs);
        let inbox = self.inbox.clone();

        tokio::spawn(async move {
            let outcomes =
                dispatch_all(&tools, &calls, &ctx, per_tool_timeout, unmap.as_ref()).await;
            let _ = inbox
                .send(LoopEvent::ToolsDone { run_id, outcomes })
                .await;
        });
    }

    // ── Tool results ──────────────────────────────────────────────

    async fn on_tools_done(&mut self, outcomes: Vec<ToolOutcome>) {
        let run = self.run.as_mut().expect("current run checked");
        run.iterations += 1;

        let pending = std::mem::take(&mut run.pending);
        let cycle_text = std::mem::take(&mut run.cycle_text);

        // One assistant turn carrying the calls, then one tool turn per
        // result, in both the working set and the persisted log.
        run.messages
            .push(Message::assistant_with_calls(&cycle_text, &pending));
        let mut records = vec![MessageRecord::assistant_with_calls(
            &cycle_text,
            pending.clone(),
        )];
        for outcome in &outcomes {
            run.messages.push(Message::tool_result(
                &outcome.call_id,
                &outcome.content,
                outcome.is_error,
            ));
            records.push(MessageRecord::tool(&outcome.call_id, &outcome.content));
        }

        let run_id = run.run_id;
        let iterations = run.iterations;
        if let Err(e) = self.deps.log.append(&self.session.session_id, &records) {
            self.finish_error(Error::Persistence(e.to_string())).await;
            return;
        }
        self.deps
            .sessions
            .bump_message_count(&self.session.session_key, records.len() as u64);

        self.publish_status(
            run_id,
            RunPhase::ToolDone,
            Some(format!("{} result(s)", outcomes.len())),
        );

        if iterations >= self.deps.config.runtime.max_tool_iterations {
            tracing::warn!(
                session_key = %self.session.session_key,
                %run_id,
                iterations,
                "tool-iteration cap reached"
            );
            self.finish_success(TOO_MANY_TOOL_CALLS_SENTINEL.to_owned(), None)
                .await;
            return;
        }

        self.start_inference();
    }

    // ── Terminal transitions ──────────────────────────────────────

    async fn finish_success(&mut self, content: String, cycle_usage: Option<Usage>) {
        let mut run = self.run.take().expect("current run checked");
        run.timeout_task.abort();

        let mut record = MessageRecord::assistant(&content);
        record.model = Some(run.model_name.clone());
        if let Some(usage) = cycle_usage {
            record.input_tokens = Some(usage.input_tokens);
            record.output_tokens = Some(usage.output_tokens);
        }
        if let Err(e) = self.deps.log.append(&self.session.session_id, &[record]) {
            self.publish(BusEvent::Error {
                run_id: run.run_id,
                reason: e.to_string(),
            });
            finish_reply(run.reply, Err(e));
            self.phase = Phase::Idle;
            self.pump_queue();
            return;
        }

        self.deps
            .sessions
            .bump_message_count(&self.session.session_key, 1);
        self.deps.sessions.record_usage(
            &self.session.session_key,
            run.usage.input_tokens as u64,
            run.usage.output_tokens as u64,
        );

        // Whatever the chunker still buffers goes out as the last segment.
        let tail = run.chunker.flush();
        self.deliver_segments(run.deliver_segments, tail.into_iter().collect());

        self.publish_status(
            run.run_id,
            RunPhase::Done,
            Some(truncate_str(&content, 120)),
        );
        self.publish(BusEvent::Done {
            run_id: run.run_id,
            content: content.clone(),
        });

        finish_reply(run.reply, Ok(content));
        self.phase = Phase::Idle;
        self.pump_queue();
    }

    async fn finish_error(&mut self, error: Error) {
        let run = self.run.take().expect("current run checked");
        run.timeout_task.abort();

        self.publish_status(
            run.run_id,
            RunPhase::Error,
            Some(error.to_string()),
        );
        self.publish(BusEvent::Error {
            run_id: run.run_id,
            reason: error.to_string(),
        });

        finish_reply(run.reply, Err(error));
        self.phase = Phase::Idle;
        self.pump_queue();
    }

    async fn on_cancel(&mut self) {
        if self.phase == Phase::Idle {
            return;
        }
        tracing::debug!(session_key = %self.session.session_key, "run cancelled");
        // In-flight sub-tasks run to completion; their events carry the old
        // run_id and are dropped on arrival.
        self.finish_error(Error::Cancelled).await;
    }

    // ── Segment delivery ──────────────────────────────────────────

    /// Push chunker segments to the session's channel, when it has a
    /// push-capable sender registered. Best-effort: failures are logged.
    fn deliver_segments(&self, enabled: bool, segments: Vec<String>) {
        if !enabled || segments.is_empty() {
            return;
        }
        let Some(channel) = self.session.channel.clone() else {
            return;
        };
        let Some(target) =
            sb_sessions::session_key::peer_of(&self.session.session_key).map(str::to_owned)
        else {
            return;
        };
        if !self.deps.channels.push_capable(&channel) {
            return;
        }

        let channels = self.deps.channels.clone();
        tokio::spawn(async move {
            for segment in segments {
                if let Err(e) = channels.send(&channel, &target, &segment).await {
                    tracing::warn!(error = %e, channel, "segment delivery failed");
                    break;
                }
            }
        });
    }

    fn pump_queue(&mut self) {
        if self.phase != Phase::Idle {
            return;
        }
        if let Some((text, opts, reply)) = self.queued.pop_front() {
            // Re-enqueue through the inbox so the worker task drives it;
            // an awaited send cannot drop the run when the inbox is busy.
            let inbox = self.inbox.clone();
            tokio::spawn(async move {
                let _ = inbox.send(LoopEvent::Run { text, opts, reply }).await;
            });
        }
    }
}

fn finish_reply(reply: Option<oneshot::Sender<Result<String>>>, result: Result<String>) {
    if let Some(tx) = reply {
        // The caller may have stopped waiting; that is fine.
        let _ = tx.send(result);
    }
}
