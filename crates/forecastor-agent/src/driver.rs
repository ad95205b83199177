use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use forecastor_core::{
    ArtifactRef, Budget, BudgetTracker, Message, Result, StepRecord, TerminationReason, ToolCall,
    ToolInvocationRecord, ToolKind, ToolOutput,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::ModelBackend;
use crate::callback::StepCallback;
use crate::tools::{final_answer_text, ToolRegistry};

const SYSTEM_PREAMBLE: &str = "You are an expert machine learning engineer solving a Kaggle \
competition. Work by calling tools: run Python with `write_and_execute_code`, check the \
submission file with `validate_submission`, and call `final_answer` only when you are done.";

const IMAGE_PLACEHOLDER: &str = "[earlier plot removed]";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StepStarted {
        step: u32,
        readout: String,
    },
    ModelText {
        step: u32,
        text: String,
    },
    ToolCalled {
        step: u32,
        call_id: String,
        name: String,
        arguments: String,
    },
    ToolResult {
        step: u32,
        call_id: String,
        name: String,
        success: bool,
        output: String,
    },
    ArtifactAttached {
        step: u32,
        path: PathBuf,
        bytes: usize,
    },
    Terminated {
        reason: TerminationReason,
        steps_taken: u32,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub reason: TerminationReason,
    pub final_answer: Option<String>,
    pub steps: Vec<StepRecord>,
    pub steps_taken: u32,
    pub elapsed: Duration,
    /// Whether the submission file existed when the run terminated.
    pub submission_present: bool,
}

enum Bounded<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

pub struct AgentDriver {
    backend: Arc<dyn ModelBackend>,
    tools: ToolRegistry,
    instructions: String,
    budget: Budget,
    callbacks: Vec<Box<dyn StepCallback>>,
    events: Option<mpsc::Sender<AgentEvent>>,
    cancel: CancellationToken,
    submission: Option<PathBuf>,
}

impl AgentDriver {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        tools: ToolRegistry,
        instructions: impl Into<String>,
        budget: Budget,
    ) -> Self {
        Self {
            backend,
            tools,
            instructions: instructions.into(),
            budget,
            callbacks: Vec::new(),
            events: None,
            cancel: CancellationToken::new(),
            submission: None,
        }
    }

    pub fn with_callback(mut self, callback: impl StepCallback + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn with_events(mut self, tx: mpsc::Sender<AgentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// File checked for existence when the run ends.
    pub fn with_submission(mut self, path: impl Into<PathBuf>) -> Self {
        self.submission = Some(path.into());
        self
    }

    async fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Race `fut` against the remaining wall clock and the cancel token.
    async fn bounded<F: Future>(&self, limit: Duration, fut: F) -> Bounded<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Bounded::Cancelled,
            res = tokio::time::timeout(limit, fut) => match res {
                Ok(value) => Bounded::Done(value),
                Err(_) => Bounded::TimedOut,
            },
        }
    }

    pub async fn run(&self, task: &str) -> Result<RunOutcome> {
        let mut tracker = BudgetTracker::start(self.budget);
        let specs = self.tools.specs();
        let mut history = vec![
            Message::system(format!("{}\n\n{}", SYSTEM_PREAMBLE, self.instructions)),
            Message::user(format!("{}\n\n{}", task, tracker.readout())),
        ];
        let mut steps: Vec<StepRecord> = Vec::new();
        let mut final_answer = None;

        info!(
            "Starting run with {} on {} steps / {}s",
            self.backend.model_id(),
            self.budget.max_steps,
            self.budget.max_duration.as_secs()
        );

        let reason = loop {
            if self.cancel.is_cancelled() {
                break TerminationReason::Cancelled;
            }
            if let Some(reason) = tracker.exhausted() {
                break reason;
            }

            let step = tracker.steps_taken() + 1;
            let step_started = Instant::now();
            self.emit(AgentEvent::StepStarted {
                step,
                readout: tracker.readout(),
            })
            .await;

            let turn = match self
                .bounded(tracker.remaining_time(), self.backend.complete(&history, &specs))
                .await
            {
                Bounded::Done(turn) => turn?,
                Bounded::TimedOut => {
                    warn!("Model call outlived the time budget at step {}", step);
                    break TerminationReason::TimeExhausted;
                }
                Bounded::Cancelled => break TerminationReason::Cancelled,
            };
            tracker.record_step();

            let mut record = StepRecord {
                step,
                model_text: turn.content.clone(),
                ..StepRecord::default()
            };
            if let Some(text) = &turn.content {
                self.emit(AgentEvent::ModelText {
                    step,
                    text: text.clone(),
                })
                .await;
            }
            history.push(Message::Assistant {
                content: turn.content.clone(),
                tool_calls: turn.tool_calls.clone(),
            });

            if turn.tool_calls.is_empty() {
                record.elapsed_ms = step_started.elapsed().as_secs_f64() * 1000.0;
                steps.push(record);
                final_answer = turn.content;
                break TerminationReason::FinalAnswer;
            }

            let mut finished = None;
            let mut interrupted = None;
            for call in &turn.tool_calls {
                self.emit(AgentEvent::ToolCalled {
                    step,
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                })
                .await;

                if ToolKind::from_name(&call.name) == Some(ToolKind::FinalAnswer) {
                    let answer = final_answer_text(&call.arguments);
                    let output = ToolOutput::ok(answer.clone());
                    self.record_call(&mut record, &mut history, call, output, None).await;
                    finished = Some(answer);
                    break;
                }

                let output = match self
                    .bounded(tracker.remaining_time(), self.tools.dispatch(call))
                    .await
                {
                    Bounded::Done(output) => output,
                    Bounded::TimedOut => {
                        interrupted = Some(TerminationReason::TimeExhausted);
                        ToolOutput::failed("Tool call stopped: time budget exhausted.")
                    }
                    Bounded::Cancelled => {
                        interrupted = Some(TerminationReason::Cancelled);
                        ToolOutput::failed("Tool call stopped: run cancelled.")
                    }
                };
                let readout = tracker.readout();
                self.record_call(&mut record, &mut history, call, output, Some(&readout)).await;

                if interrupted.is_some() {
                    break;
                }
            }

            self.run_callbacks(&mut record, &mut history).await;
            record.elapsed_ms = step_started.elapsed().as_secs_f64() * 1000.0;
            debug!(
                "Step {} done: {} tool calls in {:.0}ms",
                step,
                record.invocations.len(),
                record.elapsed_ms
            );
            steps.push(record);

            if let Some(answer) = finished {
                final_answer = Some(answer);
                break TerminationReason::FinalAnswer;
            }
            if let Some(reason) = interrupted {
                break reason;
            }
        };

        let submission_present = self
            .submission
            .as_ref()
            .map(|p| p.is_file())
            .unwrap_or(false);

        info!(
            "Run finished: {} after {} steps (submission present: {})",
            reason.label(),
            tracker.steps_taken(),
            submission_present
        );
        self.emit(AgentEvent::Terminated {
            reason,
            steps_taken: tracker.steps_taken(),
        })
        .await;

        Ok(RunOutcome {
            reason,
            final_answer,
            steps,
            steps_taken: tracker.steps_taken(),
            elapsed: tracker.elapsed(),
            submission_present,
        })
    }

    async fn record_call(
        &self,
        record: &mut StepRecord,
        history: &mut Vec<Message>,
        call: &ToolCall,
        output: ToolOutput,
        readout: Option<&str>,
    ) {
        let content = match readout {
            Some(readout) => format!("{}\n\n{}", output.text, readout),
            None => output.text.clone(),
        };
        history.push(Message::Tool {
            call_id: call.id.clone(),
            content,
        });

        self.emit(AgentEvent::ToolResult {
            step: record.step,
            call_id: call.id.clone(),
            name: call.name.clone(),
            success: output.success,
            output: output.text.clone(),
        })
        .await;

        record.invocations.push(ToolInvocationRecord {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            result: output,
        });
    }

    async fn run_callbacks(&self, record: &mut StepRecord, history: &mut Vec<Message>) {
        for callback in &self.callbacks {
            let Some(artifact) = callback.after_step(record) else {
                continue;
            };

            // Only the newest image stays in context.
            drop_stale_images(history);
            let bytes = artifact.image.bytes.len();
            history.push(Message::User {
                content: format!(
                    "Here is the image saved to {} by your last code execution.",
                    artifact.path.display()
                ),
                images: vec![artifact.image],
            });
            record.artifacts.push(ArtifactRef {
                path: artifact.path.clone(),
                bytes_len: bytes,
            });
            self.emit(AgentEvent::ArtifactAttached {
                step: record.step,
                path: artifact.path,
                bytes,
            })
            .await;
        }
    }
}

fn drop_stale_images(history: &mut [Message]) {
    for msg in history.iter_mut() {
        if let Message::User { content, images } = msg {
            if !images.is_empty() {
                images.clear();
                content.push_str(&format!(" {}", IMAGE_PLACEHOLDER));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forecastor_core::ImageAttachment;

    #[test]
    fn test_drop_stale_images_keeps_text() {
        let mut history = vec![
            Message::user("task"),
            Message::User {
                content: "plot".into(),
                images: vec![ImageAttachment::png(vec![1])],
            },
        ];
        drop_stale_images(&mut history);
        assert!(history.iter().all(|m| !m.has_images()));
        assert_eq!(
            history[1],
            Message::User {
                content: format!("plot {}", IMAGE_PLACEHOLDER),
                images: vec![]
            }
        );
    }
}
