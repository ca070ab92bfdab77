//! Answer pipeline
//!
//! conversation -> planner -> fragment store (access-filtered) -> normalizer
//! -> composer -> streamed answer, citations and trace.
//!
//! Retrieval and normalization finish before `answer` returns, so request
//! errors surface as an `Err` before any text is produced. Generation runs
//! inside the returned stream.

use crate::citation::CitationNormalizer;
use crate::composer::{AnswerComposer, ComposeOptions, ComposerEvent};
use crate::planner::{PlanningStrategy, QueryPlanner, RetrievalResult, RetrievalSettings};
use crate::trace::{elapsed_ms, AnswerTrace, PipelineWarning, WarningKind};
use futures::stream::BoxStream;
use futures::StreamExt;
use lexforge_common::config::{AccessConfig, AppConfig, RetrievalConfig, MAX_SUBQUERIES_HARD_LIMIT};
use lexforge_common::errors::{AppError, Result};
use lexforge_common::llm::ChatModel;
use lexforge_common::metrics;
use lexforge_common::models::{latest_user_message, AnswerOverrides};
use lexforge_common::{CallerIdentity, ChatMessage, CitationKey};
use lexforge_search::{build_filter, FilterBuilder, FragmentStore, MAX_TOP};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Settings the pipeline reads from application configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub retrieval: RetrievalConfig,
    pub access: AccessConfig,
    pub temperature: f32,
    pub max_response_tokens: u32,
    pub max_planner_tokens: u32,
    pub history_token_budget: usize,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            retrieval: config.retrieval.clone(),
            access: config.access.clone(),
            temperature: config.llm.temperature,
            max_response_tokens: config.llm.max_response_tokens,
            max_planner_tokens: config.llm.max_planner_tokens,
            history_token_budget: config.llm.history_token_budget,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// The completed answer, sent after the last text increment
#[derive(Debug, Clone, Serialize)]
pub struct FinalAnswer {
    pub answer: String,
    pub citations: Vec<CitationKey>,
    pub followup_questions: Vec<String>,
    /// Present only for privileged callers who asked for it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<AnswerTrace>,
}

#[derive(Debug, Clone)]
pub enum AnswerEvent {
    Delta(String),
    Completed(Box<FinalAnswer>),
}

pub type AnswerStream = BoxStream<'static, Result<AnswerEvent>>;

/// Everything decided from overrides and configuration before retrieval
struct ResolvedRequest {
    strategy: PlanningStrategy,
    settings: RetrievalSettings,
    compose: ComposeOptions,
    include_trace: bool,
}

pub struct AnswerPipeline {
    planner: QueryPlanner,
    normalizer: CitationNormalizer,
    composer: AnswerComposer,
    config: PipelineConfig,
}

impl AnswerPipeline {
    pub fn new(
        store: Arc<dyn FragmentStore>,
        reasoner: Arc<dyn ChatModel>,
        generator: Arc<dyn ChatModel>,
        config: PipelineConfig,
    ) -> Self {
        let planner = QueryPlanner::new(store.clone(), reasoner)
            .with_history_budget(config.history_token_budget)
            .with_max_planner_tokens(config.max_planner_tokens);

        Self {
            planner,
            normalizer: CitationNormalizer::new(store),
            composer: AnswerComposer::new(generator),
            config,
        }
    }

    /// Answer the latest user turn of `conversation` for `caller`
    #[instrument(skip_all, fields(request_id = %caller.request_id, turns = conversation.len()))]
    pub async fn answer(
        &self,
        caller: &CallerIdentity,
        conversation: Vec<ChatMessage>,
        overrides: AnswerOverrides,
    ) -> Result<AnswerStream> {
        if latest_user_message(&conversation).is_none() {
            return Err(AppError::InvalidQuery {
                message: "conversation has no user message".to_string(),
            });
        }
        let resolved = self.resolve(caller, &overrides)?;
        let strategy = resolved.strategy.name();

        let retrieval = match self
            .planner
            .retrieve(&conversation, resolved.strategy, &resolved.settings)
            .await
        {
            Ok(retrieval) => retrieval,
            Err(err) => {
                warn!(strategy, error = %err, "Retrieval failed");
                metrics::record_answer(strategy, "error");
                return Err(err);
            }
        };
        metrics::record_stage("planning", retrieval.planning_ms as f64 / 1000.0);
        metrics::record_stage("retrieval", retrieval.retrieval_ms as f64 / 1000.0);

        let mut trace = retrieval_trace(&retrieval, resolved.strategy);

        let start = Instant::now();
        let normalized = self.normalizer.normalize(retrieval.fragments).await;
        trace.timings.normalization_ms = elapsed_ms(start);
        metrics::record_stage("normalization", start.elapsed().as_secs_f64());
        trace.warnings.extend(normalized.warnings);
        trace.step(
            "Normalization",
            json!({
                "kept": normalized.fragments.len(),
                "dropped": normalized.dropped,
                "merged": normalized.merged,
            }),
            trace.timings.normalization_ms,
        );

        info!(
            strategy,
            subqueries = trace.queries.len(),
            fragments = normalized.fragments.len(),
            "Retrieval complete, composing answer"
        );

        let events = self
            .composer
            .compose(&conversation, &normalized.fragments, &resolved.compose);

        let include_trace = resolved.include_trace;
        let mut pending_trace = Some(trace);
        let stream = events.map(move |event| match event {
            Ok(ComposerEvent::Delta(text)) => Ok(AnswerEvent::Delta(text)),
            Ok(ComposerEvent::Finished(composed)) => {
                let mut trace = pending_trace.take().unwrap_or_default();
                trace.generation_usage = composed.generation_usage;
                trace.timings.generation_ms = composed.elapsed_ms;
                for marker in &composed.mismatches {
                    trace.warn(PipelineWarning::new(WarningKind::CitationMismatch, marker.clone()));
                }
                trace.step(
                    "Generation",
                    json!({
                        "model": composed.model,
                        "usage": composed.generation_usage,
                        "citations": composed.citations.len(),
                        "mismatches": composed.mismatches.len(),
                    }),
                    composed.elapsed_ms,
                );
                metrics::record_stage("generation", composed.elapsed_ms as f64 / 1000.0);
                metrics::record_answer(strategy, "success");

                Ok(AnswerEvent::Completed(Box::new(FinalAnswer {
                    answer: composed.answer,
                    citations: composed.citations,
                    followup_questions: composed.followup_questions,
                    trace: include_trace.then_some(trace),
                })))
            }
            Err(err) => {
                warn!(error = %err, "Generation failed");
                metrics::record_answer(strategy, "error");
                Err(err)
            }
        });

        Ok(stream.boxed())
    }

    fn resolve(&self, caller: &CallerIdentity, overrides: &AnswerOverrides) -> Result<ResolvedRequest> {
        let defaults = &self.config.retrieval;

        let top = overrides.top.unwrap_or(defaults.top);
        if top == 0 || top > MAX_TOP {
            return Err(AppError::Validation {
                message: format!("top must be between 1 and {}", MAX_TOP),
                field: Some("top".to_string()),
            });
        }

        let strategy = if overrides.agentic.unwrap_or(defaults.agentic) {
            let k = overrides
                .max_subqueries
                .unwrap_or(defaults.max_subqueries)
                .clamp(1, MAX_SUBQUERIES_HARD_LIMIT);
            PlanningStrategy::agentic(k, defaults.max_planning_rounds)
        } else {
            PlanningStrategy::SingleShot
        };

        let access = build_filter(&caller.groups, self.config.access.enforce_access_control);
        let base_filter = FilterBuilder::new()
            .clause(access)
            .include_category(overrides.include_category.as_deref())
            .exclude_category(overrides.exclude_category.as_deref())
            .build();

        let settings = RetrievalSettings {
            mode: overrides.retrieval_mode.unwrap_or(defaults.mode),
            semantic_ranking: overrides.semantic_ranking.unwrap_or(defaults.semantic_ranking),
            top,
            base_filter,
            batch_timeout: batch_timeout(defaults),
            minimum_search_score: overrides.minimum_search_score,
            minimum_reranker_score: overrides.minimum_reranker_score,
        };

        let compose = ComposeOptions {
            temperature: overrides.temperature.unwrap_or(self.config.temperature),
            seed: overrides.seed,
            max_tokens: self.config.max_response_tokens,
            suggest_followup_questions: overrides.suggest_followup_questions,
            history_budget: self.config.history_token_budget,
        };

        let include_trace = overrides.include_trace
            && caller.can_view_thought_process(&self.config.access.privileged_roles);
        if overrides.include_trace && !include_trace {
            info!("Trace requested by a caller without the thought-process role, omitting it");
        }

        Ok(ResolvedRequest {
            strategy,
            settings,
            compose,
            include_trace,
        })
    }
}

fn batch_timeout(config: &RetrievalConfig) -> Duration {
    config.batch_timeout().max(Duration::from_secs(1))
}

/// Start the trace from what retrieval recorded
fn retrieval_trace(retrieval: &RetrievalResult, strategy: PlanningStrategy) -> AnswerTrace {
    let mut trace = AnswerTrace {
        queries: retrieval.executed.clone(),
        fragments_considered: retrieval.fragments.clone(),
        planning_usage: retrieval.planning_usage,
        warnings: retrieval.warnings.clone(),
        ..Default::default()
    };
    trace.timings.planning_ms = retrieval.planning_ms;
    trace.timings.retrieval_ms = retrieval.retrieval_ms;

    trace.step(
        "Planning",
        json!({
            "strategy": strategy.name(),
            "rounds": retrieval.rounds,
            "usage": retrieval.planning_usage,
        }),
        retrieval.planning_ms,
    );
    for query in &retrieval.executed {
        let details = serde_json::to_value(query).unwrap_or_default();
        trace.step(format!("Search query {}", query.index + 1), details, query.elapsed_ms);
    }
    trace
}

/// Drain an answer stream into its final record
pub async fn collect_answer(mut stream: AnswerStream) -> Result<FinalAnswer> {
    while let Some(event) = stream.next().await {
        if let AnswerEvent::Completed(answer) = event? {
            return Ok(*answer);
        }
    }
    Err(AppError::GenerationFailed {
        message: "answer stream ended without a final record".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexforge_common::embeddings::MockEmbedder;
    use lexforge_common::llm::{ScriptedChatModel, ScriptedReply};
    use lexforge_common::{Fragment, RetrievalMode};
    use lexforge_search::MemoryFragmentStore;

    async fn pipeline(generator: Arc<ScriptedChatModel>) -> (AnswerPipeline, Arc<MemoryFragmentStore>) {
        let store = Arc::new(MemoryFragmentStore::new(Arc::new(MockEmbedder::new(64))));
        store
            .insert(Fragment::new("a", "CPR Part 15", "15.4", "The period for filing a defence is 14 days.").with_subsection("15.4"))
            .await
            .unwrap();
        let pipeline = AnswerPipeline::new(
            store.clone(),
            Arc::new(ScriptedChatModel::new()),
            generator,
            PipelineConfig::default(),
        );
        (pipeline, store)
    }

    fn keyword() -> AnswerOverrides {
        AnswerOverrides {
            retrieval_mode: Some(RetrievalMode::Keyword),
            semantic_ranking: Some(false),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_trace_only_for_privileged_callers() {
        let generator = Arc::new(ScriptedChatModel::new());
        generator
            .push_stream(ScriptedReply::Text("Fourteen days [15.4, 15.4, CPR Part 15].".into()))
            .push_stream(ScriptedReply::Text("Fourteen days.".into()));
        let (pipeline, _) = pipeline(generator).await;
        let overrides = AnswerOverrides { include_trace: true, ..keyword() };
        let question = vec![ChatMessage::user("filing a defence")];

        let admin = CallerIdentity::anonymous().with_roles(["admin"]);
        let stream = pipeline.answer(&admin, question.clone(), overrides.clone()).await.unwrap();
        let answer = collect_answer(stream).await.unwrap();
        let trace = answer.trace.unwrap();
        assert_eq!(trace.queries.len(), 1);
        assert_eq!(trace.fragments_considered.len(), 1);
        assert_eq!(trace.steps.first().map(|s| s.title.as_str()), Some("Planning"));
        assert_eq!(trace.steps.last().map(|s| s.title.as_str()), Some("Generation"));

        let visitor = CallerIdentity::anonymous();
        let stream = pipeline.answer(&visitor, question, overrides).await.unwrap();
        let answer = collect_answer(stream).await.unwrap();
        assert!(answer.trace.is_none());
        assert!(answer.citations.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let (pipeline, store) = pipeline(Arc::new(ScriptedChatModel::new())).await;
        let caller = CallerIdentity::anonymous();

        let err = pipeline
            .answer(&caller, vec![ChatMessage::assistant("hello")], keyword())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::InvalidQuery { .. }));

        let err = pipeline
            .answer(
                &caller,
                vec![ChatMessage::user("q")],
                AnswerOverrides { top: Some(51), ..keyword() },
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(store.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_retrieval_outage_is_terminal() {
        let (pipeline, store) = pipeline(Arc::new(ScriptedChatModel::new())).await;
        store.set_unavailable(true);

        let err = pipeline
            .answer(&CallerIdentity::anonymous(), vec![ChatMessage::user("defence")], keyword())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::RetrievalUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_no_results_is_a_valid_answer() {
        let generator = Arc::new(ScriptedChatModel::new());
        let (pipeline, _) = pipeline(generator.clone()).await;

        let stream = pipeline
            .answer(&CallerIdentity::anonymous(), vec![ChatMessage::user("trusts of land")], keyword())
            .await
            .unwrap();
        let answer = collect_answer(stream).await.unwrap();
        assert_eq!(answer.answer, crate::prompts::NO_SOURCES_ANSWER);
        assert_eq!(generator.stream_calls(), 0);
    }
}
