//! Query planner
//!
//! Decides which queries to run against the fragment store.
//!
//! - Single-shot: the latest user message, verbatim, one store call.
//! - Agentic: a reasoning model proposes sub-queries from the whole
//!   conversation (`Planning`), they run concurrently under a shared deadline
//!   (`Executing`), and the model may ask for another round until the round
//!   limit or the sub-query budget is reached (`Done`). A plan fails only
//!   when the model cannot be reached at all or every sub-query fails.

use crate::prompts::{self, RoundSummary, PLANNER_PROMPT};
use crate::trace::{elapsed_ms, ExecutedQuery, PipelineWarning, WarningKind};
use futures::future::join_all;
use lexforge_common::config::MAX_SUBQUERIES_HARD_LIMIT;
use lexforge_common::errors::{AppError, Result};
use lexforge_common::llm::{ChatModel, ChatRequest, TokenUsage};
use lexforge_common::metrics;
use lexforge_common::models::latest_user_message;
use lexforge_common::{ChatMessage, Fragment, RetrievalMode};
use lexforge_search::{FilterBuilder, FilterExpression, FragmentStore, SearchRequest};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout_at;
use tracing::{debug, info, instrument, warn};

/// How many queries to issue and how they are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningStrategy {
    SingleShot,
    Agentic {
        /// Total sub-queries across all rounds
        max_subqueries: usize,
        /// Reasoning calls per plan
        max_rounds: usize,
    },
}

impl PlanningStrategy {
    /// Agentic planning with both bounds clamped to their valid ranges
    pub fn agentic(max_subqueries: usize, max_rounds: usize) -> Self {
        PlanningStrategy::Agentic {
            max_subqueries: max_subqueries.clamp(1, MAX_SUBQUERIES_HARD_LIMIT),
            max_rounds: max_rounds.max(1),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlanningStrategy::SingleShot => "single_shot",
            PlanningStrategy::Agentic { .. } => "agentic",
        }
    }
}

/// Per-request search parameters shared by every sub-query
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub mode: RetrievalMode,
    pub semantic_ranking: bool,
    pub top: usize,
    /// Access predicate plus caller category clauses
    pub base_filter: Option<FilterExpression>,
    pub batch_timeout: Duration,
    pub minimum_search_score: Option<f64>,
    pub minimum_reranker_score: Option<f64>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::Hybrid,
            semantic_ranking: true,
            top: lexforge_search::DEFAULT_TOP,
            base_filter: None,
            batch_timeout: Duration::from_secs(20),
            minimum_search_score: None,
            minimum_reranker_score: None,
        }
    }
}

/// Fragments from every executed sub-query, before normalization
#[derive(Debug, Default)]
pub struct RetrievalResult {
    /// Each tagged in `matched_queries` with the sub-query that returned it
    pub fragments: Vec<Fragment>,
    pub executed: Vec<ExecutedQuery>,
    pub warnings: Vec<PipelineWarning>,
    pub planning_usage: TokenUsage,
    pub planning_ms: u64,
    pub retrieval_ms: u64,
    pub rounds: usize,
}

/// A sub-query waiting to run
#[derive(Debug, Clone, PartialEq)]
struct PlannedQuery {
    text: String,
    category: Option<String>,
}

enum Phase {
    Planning { round: usize },
    Executing { round: usize, batch: Vec<PlannedQuery>, last: bool },
    Done,
    Failed(AppError),
}

/// Planner reply: `{"queries": [...], "done": bool}` or a bare list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlanReply {
    Object {
        queries: Vec<PlanItem>,
        #[serde(default)]
        done: bool,
    },
    List(Vec<PlanItem>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlanItem {
    Text(String),
    Detailed {
        query: String,
        #[serde(default)]
        category: Option<String>,
    },
}

#[derive(Debug, PartialEq)]
struct ParsedPlan {
    queries: Vec<PlannedQuery>,
    done: bool,
}

/// Parse the reasoning model's reply; `None` when it is not a plan at all
fn parse_plan(content: &str) -> Option<ParsedPlan> {
    let body = strip_code_fence(content.trim());
    let (items, done) = match serde_json::from_str::<PlanReply>(body).ok()? {
        PlanReply::Object { queries, done } => (queries, done),
        PlanReply::List(items) => (items, false),
    };

    let queries = items
        .into_iter()
        .map(|item| match item {
            PlanItem::Text(text) => PlannedQuery { text, category: None },
            PlanItem::Detailed { query, category } => PlannedQuery { text: query, category },
        })
        .map(|q| PlannedQuery {
            text: q.text.trim().to_string(),
            category: q.category.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
        })
        .filter(|q| !q.text.is_empty())
        .collect();

    Some(ParsedPlan { queries, done })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Running state of one agentic plan
#[derive(Default)]
struct Run {
    result: RetrievalResult,
    issued: HashSet<String>,
    succeeded: usize,
}

impl Run {
    /// Drop queries already issued and cap the batch at the remaining budget
    fn admit(&mut self, proposed: Vec<PlannedQuery>, budget_left: usize) -> Vec<PlannedQuery> {
        let mut batch = Vec::new();
        for query in proposed {
            if batch.len() == budget_left {
                break;
            }
            if self.issued.insert(query.text.to_lowercase()) {
                batch.push(query);
            }
        }
        batch
    }
}

pub struct QueryPlanner {
    store: Arc<dyn FragmentStore>,
    reasoner: Arc<dyn ChatModel>,
    history_budget: usize,
    max_planner_tokens: u32,
}

impl QueryPlanner {
    pub fn new(store: Arc<dyn FragmentStore>, reasoner: Arc<dyn ChatModel>) -> Self {
        Self {
            store,
            reasoner,
            history_budget: 4000,
            max_planner_tokens: 512,
        }
    }

    pub fn with_history_budget(mut self, tokens: usize) -> Self {
        self.history_budget = tokens;
        self
    }

    pub fn with_max_planner_tokens(mut self, tokens: u32) -> Self {
        self.max_planner_tokens = tokens;
        self
    }

    #[instrument(skip_all, fields(strategy = strategy.name(), mode = %settings.mode, top = settings.top))]
    pub async fn retrieve(
        &self,
        conversation: &[ChatMessage],
        strategy: PlanningStrategy,
        settings: &RetrievalSettings,
    ) -> Result<RetrievalResult> {
        let question = latest_user_message(conversation).ok_or_else(|| AppError::InvalidQuery {
            message: "conversation has no user message".to_string(),
        })?;

        match strategy {
            PlanningStrategy::SingleShot => self.single_shot(question, settings).await,
            PlanningStrategy::Agentic { max_subqueries, max_rounds } => {
                self.agentic(conversation, question, max_subqueries, max_rounds, settings).await
            }
        }
    }

    /// One store call with the question itself; any failure ends the request
    async fn single_shot(&self, question: &str, settings: &RetrievalSettings) -> Result<RetrievalResult> {
        let start = Instant::now();
        let query = PlannedQuery {
            text: question.to_string(),
            category: None,
        };
        let (executed, outcome) = self.execute(0, 1, &query, settings).await;
        let fragments = outcome?;

        Ok(RetrievalResult {
            fragments,
            executed: vec![executed],
            retrieval_ms: elapsed_ms(start),
            rounds: 1,
            ..Default::default()
        })
    }

    async fn agentic(
        &self,
        conversation: &[ChatMessage],
        question: &str,
        max_subqueries: usize,
        max_rounds: usize,
        settings: &RetrievalSettings,
    ) -> Result<RetrievalResult> {
        let mut run = Run::default();
        let mut phase = Phase::Planning { round: 1 };

        loop {
            phase = match phase {
                Phase::Planning { round } => {
                    let budget_left = max_subqueries - run.result.executed.len();
                    if round > max_rounds || budget_left == 0 {
                        Phase::Done
                    } else {
                        let start = Instant::now();
                        let reply = self.plan(conversation, budget_left, &run).await;
                        run.result.planning_ms += elapsed_ms(start);
                        run.result.rounds = round;

                        match reply {
                            Err(e) if round == 1 => Phase::Failed(AppError::PlanningFailed {
                                message: e.to_string(),
                            }),
                            Err(e) => {
                                warn!(round, error = %e, "Planning round failed, keeping earlier results");
                                run.result.warnings.push(
                                    PipelineWarning::new(WarningKind::PlanningDegraded, e.to_string()),
                                );
                                Phase::Done
                            }
                            Ok((usage, parsed)) => {
                                run.result.planning_usage += usage;
                                self.next_phase(&mut run, round, budget_left, parsed)
                            }
                        }
                    }
                }

                Phase::Executing { round, batch, last } => {
                    self.execute_batch(&mut run, round, batch, settings).await;
                    if last {
                        Phase::Done
                    } else {
                        Phase::Planning { round: round + 1 }
                    }
                }

                Phase::Done => {
                    if run.result.executed.is_empty() {
                        // The model proposed nothing in the first round
                        info!("Planner proposed no sub-queries, falling back to single-shot");
                        let mut fallback = self.single_shot(question, settings).await?;
                        fallback.planning_usage = run.result.planning_usage;
                        fallback.planning_ms = run.result.planning_ms;
                        fallback.warnings.splice(0..0, run.result.warnings);
                        return Ok(fallback);
                    }
                    if run.succeeded == 0 {
                        Phase::Failed(AppError::PlanningFailed {
                            message: format!(
                                "all {} sub-queries failed",
                                run.result.executed.len()
                            ),
                        })
                    } else {
                        debug!(
                            subqueries = run.result.executed.len(),
                            fragments = run.result.fragments.len(),
                            "agentic retrieval: done"
                        );
                        return Ok(run.result);
                    }
                }

                Phase::Failed(err) => return Err(err),
            };
        }
    }

    /// Decide what follows a successful planning call
    fn next_phase(
        &self,
        run: &mut Run,
        round: usize,
        budget_left: usize,
        parsed: Option<ParsedPlan>,
    ) -> Phase {
        let Some(plan) = parsed else {
            warn!(round, "Planner reply was not a query plan");
            run.result.warnings.push(PipelineWarning::new(
                WarningKind::PlanningDegraded,
                format!("round {} reply was not a query plan", round),
            ));
            return Phase::Done;
        };

        let batch = run.admit(plan.queries, budget_left);
        if batch.is_empty() {
            return Phase::Done;
        }
        Phase::Executing {
            round,
            batch,
            last: plan.done,
        }
    }

    /// One planning call
    async fn plan(
        &self,
        conversation: &[ChatMessage],
        budget_left: usize,
        run: &Run,
    ) -> Result<(TokenUsage, Option<ParsedPlan>)> {
        let summaries: Vec<RoundSummary<'_>> = run
            .result
            .executed
            .iter()
            .map(|q| RoundSummary {
                query: &q.query,
                sources: run
                    .result
                    .fragments
                    .iter()
                    .filter(|f| f.matched_queries.contains(&q.index))
                    .filter_map(|f| f.citation_key().map(|k| k.to_string()))
                    .collect(),
                failed: q.error.is_some(),
            })
            .collect();

        let mut request = ChatRequest::new(
            PLANNER_PROMPT,
            prompts::planner_messages(conversation, self.history_budget, budget_left, &summaries),
        );
        request.max_tokens = self.max_planner_tokens;
        request.temperature = 0.0;
        request.json_response = true;

        let completion = self.reasoner.complete(request).await?;
        metrics::record_tokens(
            "planning",
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens,
        );
        Ok((completion.usage, parse_plan(&completion.content)))
    }

    /// Run one batch concurrently; each call is cut off at the shared deadline
    async fn execute_batch(
        &self,
        run: &mut Run,
        round: usize,
        batch: Vec<PlannedQuery>,
        settings: &RetrievalSettings,
    ) {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + settings.batch_timeout;
        let first_index = run.result.executed.len();

        let calls = batch.iter().enumerate().map(|(offset, query)| async move {
            let index = first_index + offset;
            match timeout_at(deadline, self.execute(index, round, query, settings)).await {
                Ok(done) => done,
                Err(_) => {
                    let err = AppError::RetrievalUnavailable {
                        message: format!("timed out after {:?}", settings.batch_timeout),
                    };
                    let executed = self.describe(index, round, query, settings, 0, Some(&err), start);
                    (executed, Err(err))
                }
            }
        });

        for ((executed, outcome), query) in join_all(calls).await.into_iter().zip(&batch) {
            match outcome {
                Ok(fragments) => {
                    run.succeeded += 1;
                    run.result.fragments.extend(fragments);
                }
                Err(err) => {
                    warn!(query = %query.text, error = %err, "Sub-query failed, continuing without it");
                    run.result
                        .warnings
                        .push(PipelineWarning::from_error(&err).for_query(query.text.clone()));
                }
            }
            run.result.executed.push(executed);
        }
        run.result.retrieval_ms += elapsed_ms(start);
    }

    /// Issue one sub-query and tag what it returns
    async fn execute(
        &self,
        index: usize,
        round: usize,
        query: &PlannedQuery,
        settings: &RetrievalSettings,
    ) -> (ExecutedQuery, Result<Vec<Fragment>>) {
        let start = Instant::now();
        let filter = FilterBuilder::new()
            .clause(settings.base_filter.clone())
            .include_category(query.category.as_deref())
            .build();

        let request = SearchRequest::new(query.text.clone())
            .with_mode(settings.mode)
            .with_semantic_ranking(settings.semantic_ranking)
            .with_filter(filter)
            .with_top(settings.top);

        let outcome = self.store.search(&request).await.map(|fragments| {
            fragments
                .into_iter()
                .filter(|f| passes_thresholds(f, settings))
                .map(|mut f| {
                    f.matched_queries = vec![index];
                    f
                })
                .collect::<Vec<_>>()
        });

        let count = outcome.as_ref().map_or(0, Vec::len);
        let executed = self.describe(index, round, query, settings, count, outcome.as_ref().err(), start);
        debug!(index, query = %query.text, fragments = count, "sub-query complete");
        (executed, outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn describe(
        &self,
        index: usize,
        round: usize,
        query: &PlannedQuery,
        settings: &RetrievalSettings,
        fragments: usize,
        error: Option<&AppError>,
        start: Instant,
    ) -> ExecutedQuery {
        let filter = FilterBuilder::new()
            .clause(settings.base_filter.clone())
            .include_category(query.category.as_deref())
            .build();

        ExecutedQuery {
            index,
            query: query.text.clone(),
            mode: settings.mode,
            semantic_ranking: settings.semantic_ranking,
            filter: filter.map(|f| f.to_string()),
            round,
            fragments,
            elapsed_ms: elapsed_ms(start),
            error: error.map(|e| e.to_string()),
        }
    }
}

/// Relevance thresholds; unset thresholds pass everything
fn passes_thresholds(fragment: &Fragment, settings: &RetrievalSettings) -> bool {
    let search_ok = settings
        .minimum_search_score
        .map_or(true, |min| fragment.score >= min);
    let reranker_ok = match (settings.minimum_reranker_score, fragment.reranker_score) {
        (Some(min), Some(score)) => score >= min,
        _ => true,
    };
    search_ok && reranker_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexforge_common::embeddings::MockEmbedder;
    use lexforge_common::llm::{ScriptedChatModel, ScriptedReply};
    use lexforge_search::MemoryFragmentStore;

    async fn store() -> Arc<MemoryFragmentStore> {
        let store = Arc::new(MemoryFragmentStore::new(Arc::new(MockEmbedder::new(128))));
        store
            .insert_many(vec![
                Fragment::new("a", "CPR Part 15", "15.4", "The period for filing a defence is 14 days.")
                    .with_category("Rules"),
                Fragment::new("b", "CPR Part 15", "15.5", "Parties may agree to extend the period for filing a defence.")
                    .with_category("Rules"),
                Fragment::new("c", "Practice Direction 3E", "PD3E-1.1", "Costs budgets must be filed.")
                    .with_category("Practice Direction"),
            ])
            .await
            .unwrap();
        store
    }

    fn conversation() -> Vec<ChatMessage> {
        vec![ChatMessage::user("What are the time limits for filing a defence?")]
    }

    fn keyword() -> RetrievalSettings {
        RetrievalSettings {
            mode: RetrievalMode::Keyword,
            semantic_ranking: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_plan_variants() {
        let plan = parse_plan(r#"{"queries": ["defence deadline", {"query": "costs", "category": "Rules"}], "done": true}"#)
            .unwrap();
        assert_eq!(plan.queries.len(), 2);
        assert_eq!(plan.queries[1].category.as_deref(), Some("Rules"));
        assert!(plan.done);

        let fenced = parse_plan("```json\n[\"a\", \"  \", \"b\"]\n```").unwrap();
        assert_eq!(fenced.queries.len(), 2);
        assert!(!fenced.done);

        assert!(parse_plan("I think you should search for defences").is_none());
        assert!(parse_plan(r#"{"queries": []}"#).unwrap().queries.is_empty());
    }

    #[test]
    fn test_strategy_clamps() {
        assert_eq!(
            PlanningStrategy::agentic(0, 0),
            PlanningStrategy::Agentic { max_subqueries: 1, max_rounds: 1 }
        );
        assert_eq!(
            PlanningStrategy::agentic(99, 3),
            PlanningStrategy::Agentic { max_subqueries: MAX_SUBQUERIES_HARD_LIMIT, max_rounds: 3 }
        );
    }

    #[tokio::test]
    async fn test_single_shot_uses_latest_message() {
        let store = store().await;
        let planner = QueryPlanner::new(store.clone(), Arc::new(ScriptedChatModel::new()));

        let result = planner
            .retrieve(&conversation(), PlanningStrategy::SingleShot, &keyword())
            .await
            .unwrap();

        assert_eq!(store.search_calls(), 1);
        assert_eq!(result.executed[0].query, "What are the time limits for filing a defence?");
        assert!(result.fragments.iter().all(|f| f.matched_queries == vec![0]));
    }

    #[tokio::test]
    async fn test_single_shot_failure_is_terminal() {
        let store = store().await;
        store.set_unavailable(true);
        let planner = QueryPlanner::new(store.clone(), Arc::new(ScriptedChatModel::new()));

        let err = planner
            .retrieve(&conversation(), PlanningStrategy::SingleShot, &keyword())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RetrievalUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_agentic_issues_exactly_n_calls_and_tolerates_failures() {
        let store = store().await;
        store.fail_query("costs budgets");
        store.fail_query("extension of time");
        let reasoner = Arc::new(ScriptedChatModel::new());
        reasoner.push_completion(ScriptedReply::Text(
            r#"{"queries": ["defence deadline", "costs budgets", "extension of time"], "done": true}"#.into(),
        ));
        let planner = QueryPlanner::new(store.clone(), reasoner.clone());

        let result = planner
            .retrieve(&conversation(), PlanningStrategy::agentic(5, 3), &keyword())
            .await
            .unwrap();

        assert_eq!(store.search_calls(), 3);
        assert_eq!(reasoner.complete_calls(), 1);
        assert_eq!(result.executed.len(), 3);
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings.iter().all(|w| w.kind == WarningKind::RetrievalUnavailable));
        assert!(!result.fragments.is_empty());
        assert_eq!(result.planning_usage, TokenUsage::new(100, 20));
    }

    #[tokio::test]
    async fn test_agentic_all_failed() {
        let store = store().await;
        store.set_unavailable(true);
        let reasoner = Arc::new(ScriptedChatModel::new());
        reasoner.push_completion(ScriptedReply::Text(r#"["one", "two"]"#.into()));
        let planner = QueryPlanner::new(store.clone(), reasoner.clone());

        let err = planner
            .retrieve(&conversation(), PlanningStrategy::agentic(5, 1), &keyword())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PlanningFailed { .. }));
        assert_eq!(store.search_calls(), 2);
    }

    #[tokio::test]
    async fn test_agentic_budget_spans_rounds() {
        let store = store().await;
        let reasoner = Arc::new(ScriptedChatModel::new());
        reasoner
            .push_completion(ScriptedReply::Text(r#"["defence deadline", "Defence Deadline", "costs"]"#.into()))
            .push_completion(ScriptedReply::Text(r#"["extension", "service", "reply"]"#.into()));
        let planner = QueryPlanner::new(store.clone(), reasoner.clone());

        let result = planner
            .retrieve(&conversation(), PlanningStrategy::agentic(3, 5), &keyword())
            .await
            .unwrap();

        // Round one admits two distinct queries, round two fills the last slot
        assert_eq!(store.search_calls(), 3);
        assert_eq!(reasoner.complete_calls(), 2);
        assert_eq!(result.rounds, 2);
        assert_eq!(result.executed[2].query, "extension");
        assert_eq!(result.executed[2].round, 2);
    }

    #[tokio::test]
    async fn test_round_limit_is_enforced() {
        let store = store().await;
        let reasoner = Arc::new(ScriptedChatModel::new());
        for i in 0..5 {
            reasoner.push_completion(ScriptedReply::Text(format!(r#"["query {}"]"#, i)));
        }
        let planner = QueryPlanner::new(store.clone(), reasoner.clone());

        let result = planner
            .retrieve(&conversation(), PlanningStrategy::agentic(20, 2), &keyword())
            .await;

        // "query N" matches nothing; both rounds still succeed with zero hits
        assert!(result.is_ok());
        assert_eq!(reasoner.complete_calls(), 2);
        assert_eq!(store.search_calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_plan_falls_back_to_single_shot() {
        let store = store().await;
        let reasoner = Arc::new(ScriptedChatModel::new());
        reasoner.push_completion(ScriptedReply::Text(r#"{"queries": []}"#.into()));
        let planner = QueryPlanner::new(store.clone(), reasoner.clone());

        let result = planner
            .retrieve(&conversation(), PlanningStrategy::agentic(5, 3), &keyword())
            .await
            .unwrap();

        assert_eq!(store.search_calls(), 1);
        assert_eq!(result.executed[0].query, "What are the time limits for filing a defence?");
        assert_eq!(result.planning_usage, TokenUsage::new(100, 20));
    }

    #[tokio::test]
    async fn test_reasoner_error_fails_plan() {
        let store = store().await;
        let reasoner = Arc::new(ScriptedChatModel::new());
        reasoner.push_completion(ScriptedReply::Fail("model unavailable".into()));
        let planner = QueryPlanner::new(store.clone(), reasoner);

        let err = planner
            .retrieve(&conversation(), PlanningStrategy::agentic(5, 3), &keyword())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PlanningFailed { .. }));
        assert_eq!(store.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_suggested_category_narrows() {
        let store = store().await;
        let reasoner = Arc::new(ScriptedChatModel::new());
        reasoner.push_completion(ScriptedReply::Text(
            r#"{"queries": [{"query": "filed", "category": "Practice Direction"}], "done": true}"#.into(),
        ));
        let planner = QueryPlanner::new(store.clone(), reasoner);

        let result = planner
            .retrieve(&conversation(), PlanningStrategy::agentic(5, 3), &keyword())
            .await
            .unwrap();

        assert_eq!(result.executed[0].filter.as_deref(), Some("category eq 'Practice Direction'"));
        assert!(result.fragments.iter().all(|f| f.id == "c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_subquery_times_out() {
        let store = store().await;
        store.delay_query("slow", Duration::from_secs(60));
        let reasoner = Arc::new(ScriptedChatModel::new());
        reasoner.push_completion(ScriptedReply::Text(
            r#"{"queries": ["slow", "defence"], "done": true}"#.into(),
        ));
        let planner = QueryPlanner::new(store.clone(), reasoner);
        let settings = RetrievalSettings {
            batch_timeout: Duration::from_secs(5),
            ..keyword()
        };

        let result = planner
            .retrieve(&conversation(), PlanningStrategy::agentic(5, 3), &settings)
            .await
            .unwrap();

        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].query.as_deref(), Some("slow"));
        assert!(result.executed[0].error.is_some());
        assert!(result.executed[1].fragments > 0);
    }

    #[test]
    fn test_thresholds() {
        let settings = RetrievalSettings {
            minimum_search_score: Some(0.5),
            minimum_reranker_score: Some(2.0),
            ..Default::default()
        };
        let mut f = Fragment::new("a", "CPR Part 15", "15.4", "x").with_score(0.7);
        assert!(passes_thresholds(&f, &settings));
        f.reranker_score = Some(1.0);
        assert!(!passes_thresholds(&f, &settings));
        assert!(!passes_thresholds(&f.clone().with_score(0.1), &RetrievalSettings {
            minimum_search_score: Some(0.5),
            ..Default::default()
        }));
    }
}
