//! End-to-end answer scenarios over in-process stores and scripted models

use async_trait::async_trait;
use futures::StreamExt;
use lexforge_common::embeddings::MockEmbedder;
use lexforge_common::llm::{ScriptedChatModel, ScriptedReply};
use lexforge_common::models::AnswerOverrides;
use lexforge_common::{AppError, CallerIdentity, ChatMessage, CitationKey, Fragment, Result, RetrievalMode};
use lexforge_context::{collect_answer, AnswerEvent, AnswerPipeline, PipelineConfig, WarningKind};
use lexforge_search::{FragmentStore, MemoryFragmentStore, SearchRequest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn rule_15_4() -> Fragment {
    Fragment::new(
        "cpr-15-4",
        "CPR Part 15",
        "15.4",
        "The general rule is that the period for filing a defence is 14 days after service of the particulars of claim.",
    )
    .with_subsection("15.4")
}

fn keyword_overrides() -> AnswerOverrides {
    AnswerOverrides {
        retrieval_mode: Some(RetrievalMode::Keyword),
        semantic_ranking: Some(false),
        ..Default::default()
    }
}

async fn memory_store(fragments: Vec<Fragment>) -> Arc<MemoryFragmentStore> {
    let store = Arc::new(MemoryFragmentStore::new(Arc::new(MockEmbedder::new(64))));
    store.insert_many(fragments).await.unwrap();
    store
}

fn pipeline(
    store: Arc<dyn FragmentStore>,
    reasoner: Arc<ScriptedChatModel>,
    generator: Arc<ScriptedChatModel>,
) -> AnswerPipeline {
    AnswerPipeline::new(store, reasoner, generator, PipelineConfig::default())
}

/// Replies by exact query text; unknown queries fail as an outage
struct CannedStore {
    replies: HashMap<String, Vec<Fragment>>,
    calls: AtomicUsize,
}

#[async_trait]
impl FragmentStore for CannedStore {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Fragment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .get(&request.query)
            .cloned()
            .ok_or_else(|| AppError::RetrievalUnavailable {
                message: "index unreachable".to_string(),
            })
    }

    async fn lookup(&self, _id: &str) -> Result<Option<Fragment>> {
        Ok(None)
    }

    fn name(&self) -> &str {
        "canned"
    }
}

#[tokio::test]
async fn test_single_fragment_cited_answer() {
    let store = memory_store(vec![rule_15_4()]).await;
    let generator = Arc::new(ScriptedChatModel::new());
    generator.push_stream(ScriptedReply::Chunks(vec![
        "The period is 14 days ".into(),
        "[15.4, 15.4, CPR Part 15].".into(),
    ]));
    let pipeline = pipeline(store, Arc::new(ScriptedChatModel::new()), generator.clone());

    let stream = pipeline
        .answer(
            &CallerIdentity::anonymous(),
            vec![ChatMessage::user("What is the time limit for filing a defence?")],
            keyword_overrides(),
        )
        .await
        .unwrap();
    let answer = collect_answer(stream).await.unwrap();

    assert_eq!(answer.citations, vec![CitationKey::new("15.4", "15.4", "CPR Part 15")]);
    assert_eq!(answer.answer, "The period is 14 days [15.4, 15.4, CPR Part 15].");
    assert!(generator.requests()[0].messages[0]
        .content
        .contains("[15.4, 15.4, CPR Part 15]: The general rule"));
}

#[tokio::test]
async fn test_uncited_answer_has_no_citations() {
    let store = memory_store(vec![rule_15_4()]).await;
    let generator = Arc::new(ScriptedChatModel::new());
    generator.push_stream(ScriptedReply::Text("The period is 14 days.".into()));
    let pipeline = pipeline(store, Arc::new(ScriptedChatModel::new()), generator);

    let stream = pipeline
        .answer(
            &CallerIdentity::anonymous(),
            vec![ChatMessage::user("time limit for filing a defence")],
            keyword_overrides(),
        )
        .await
        .unwrap();
    let answer = collect_answer(stream).await.unwrap();

    assert!(answer.citations.is_empty());
}

#[tokio::test]
async fn test_caller_never_sees_other_groups() {
    let restricted = Fragment::new(
        "g2-memo",
        "Internal memo",
        "3",
        "Defence strategy notes: file the defence early.",
    )
    .with_subsection("Strategy")
    .with_groups(["G2"]);
    let store = memory_store(vec![rule_15_4(), restricted]).await;

    let generator = Arc::new(ScriptedChatModel::new());
    generator.push_stream(ScriptedReply::Text("Fourteen days [15.4, 15.4, CPR Part 15].".into()));
    let pipeline = pipeline(store.clone(), Arc::new(ScriptedChatModel::new()), generator.clone());

    let caller = CallerIdentity::anonymous().with_groups(["G1"]).with_roles(["admin"]);
    let overrides = AnswerOverrides {
        include_trace: true,
        ..keyword_overrides()
    };
    let stream = pipeline
        .answer(&caller, vec![ChatMessage::user("filing the defence")], overrides)
        .await
        .unwrap();
    let answer = collect_answer(stream).await.unwrap();

    let trace = answer.trace.unwrap();
    assert!(trace.fragments_considered.iter().all(|f| f.id != "g2-memo"));
    assert!(trace.queries[0].filter.as_deref().unwrap().contains("'G1'"));
    assert!(!generator.requests()[0].messages[0].content.contains("Internal memo"));
    assert_eq!(store.search_calls(), 1);
}

#[tokio::test]
async fn test_partial_subquery_failure_keeps_best_score() {
    let cited = rule_15_4();
    let store = Arc::new(CannedStore {
        replies: HashMap::from([
            ("defence deadline".to_string(), vec![cited.clone().with_score(0.8)]),
            ("time to file defence".to_string(), vec![cited.clone().with_score(0.6)]),
        ]),
        calls: AtomicUsize::new(0),
    });

    let reasoner = Arc::new(ScriptedChatModel::new());
    reasoner.push_completion(ScriptedReply::Text(
        r#"{"queries": [{"query": "defence deadline"}, {"query": "time to file defence"}, {"query": "extension of time"}], "done": true}"#
            .into(),
    ));
    let generator = Arc::new(ScriptedChatModel::new());
    generator.push_stream(ScriptedReply::Text("Fourteen days [15.4, 15.4, CPR Part 15].".into()));
    let pipeline = pipeline(store.clone(), reasoner, generator.clone());

    let overrides = AnswerOverrides {
        agentic: Some(true),
        include_trace: true,
        ..Default::default()
    };
    let caller = CallerIdentity::anonymous().with_roles(["thought-process"]);
    let stream = pipeline
        .answer(&caller, vec![ChatMessage::user("How long do I have to file a defence?")], overrides)
        .await
        .unwrap();
    let answer = collect_answer(stream).await.unwrap();

    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    assert_eq!(answer.citations.len(), 1);
    let prompt = &generator.requests()[0].messages[0].content;
    assert_eq!(prompt.matches("[15.4, 15.4, CPR Part 15]:").count(), 1);

    let trace = answer.trace.unwrap();
    assert_eq!(trace.queries.len(), 3);
    let scores: Vec<f64> = trace.fragments_considered.iter().map(|f| f.score).collect();
    assert_eq!(scores, vec![0.8, 0.6]);
    let outages: Vec<_> = trace.warnings_of(WarningKind::RetrievalUnavailable).collect();
    assert_eq!(outages.len(), 1);
    assert_eq!(outages[0].query.as_deref(), Some("extension of time"));
    assert_eq!(trace.planning_usage.prompt_tokens, 100);
    assert_eq!(trace.generation_usage.completion_tokens, 20);
}

#[tokio::test]
async fn test_unknown_marker_is_flagged_not_rewritten() {
    let store = memory_store(vec![rule_15_4()]).await;
    let generator = Arc::new(ScriptedChatModel::new());
    generator.push_stream(ScriptedReply::Text(
        "Fourteen days [15.4, 15.4, CPR Part 15], see also [2.1, CPR Part 7, 7].".into(),
    ));
    let pipeline = pipeline(store, Arc::new(ScriptedChatModel::new()), generator);

    let caller = CallerIdentity::anonymous().with_roles(["admin"]);
    let overrides = AnswerOverrides {
        include_trace: true,
        ..keyword_overrides()
    };
    let mut stream = pipeline
        .answer(&caller, vec![ChatMessage::user("defence time limit")], overrides)
        .await
        .unwrap();

    let mut streamed = String::new();
    let mut answer = None;
    while let Some(event) = stream.next().await {
        match event.unwrap() {
            AnswerEvent::Delta(text) => streamed.push_str(&text),
            AnswerEvent::Completed(done) => answer = Some(*done),
        }
    }
    let answer = answer.unwrap();

    assert!(streamed.contains("[2.1, CPR Part 7, 7]"));
    assert_eq!(answer.answer, streamed);
    assert_eq!(answer.citations, vec![CitationKey::new("15.4", "15.4", "CPR Part 15")]);
    let mismatches: Vec<_> = answer
        .trace
        .unwrap()
        .warnings_of(WarningKind::CitationMismatch)
        .map(|w| w.message.clone())
        .collect();
    assert_eq!(mismatches, vec!["[2.1, CPR Part 7, 7]".to_string()]);
}

#[tokio::test]
async fn test_dropping_the_stream_cancels_generation() {
    let store = memory_store(vec![rule_15_4()]).await;
    let generator = Arc::new(ScriptedChatModel::new());
    generator.push_stream(ScriptedReply::ChunksThenHang(vec!["The period is".into()]));
    let pipeline = pipeline(store, Arc::new(ScriptedChatModel::new()), generator.clone());

    let mut stream = pipeline
        .answer(
            &CallerIdentity::anonymous(),
            vec![ChatMessage::user("defence time limit")],
            keyword_overrides(),
        )
        .await
        .unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert!(matches!(first, AnswerEvent::Delta(ref text) if text == "The period is"));
    assert_eq!(generator.open_streams(), 1);

    drop(stream);
    assert_eq!(generator.open_streams(), 0);
}

#[tokio::test]
async fn test_all_subqueries_failing_is_an_error() {
    let store = Arc::new(CannedStore {
        replies: HashMap::new(),
        calls: AtomicUsize::new(0),
    });
    let reasoner = Arc::new(ScriptedChatModel::new());
    reasoner.push_completion(ScriptedReply::Text(r#"{"queries": ["a", "b"], "done": true}"#.into()));
    let generator = Arc::new(ScriptedChatModel::new());
    let pipeline = pipeline(store, reasoner, generator.clone());

    let overrides = AnswerOverrides {
        agentic: Some(true),
        ..Default::default()
    };
    let err = pipeline
        .answer(&CallerIdentity::anonymous(), vec![ChatMessage::user("q")], overrides)
        .await
        .err()
        .unwrap();

    assert!(matches!(err, AppError::PlanningFailed { .. }));
    assert_eq!(generator.stream_calls(), 0);
}

#[test]
fn test_offline_models_answer_from_first_source() {
    tokio_test::block_on(async {
        let store = memory_store(vec![rule_15_4()]).await;
        let pipeline = AnswerPipeline::new(
            store,
            Arc::new(ScriptedChatModel::offline()),
            Arc::new(ScriptedChatModel::offline()),
            PipelineConfig::default(),
        );

        let overrides = AnswerOverrides {
            agentic: Some(true),
            ..keyword_overrides()
        };
        let stream = pipeline
            .answer(&CallerIdentity::anonymous(), vec![ChatMessage::user("defence time limit")], overrides)
            .await
            .unwrap();
        let answer = collect_answer(stream).await.unwrap();

        assert_eq!(answer.citations, vec![CitationKey::new("15.4", "15.4", "CPR Part 15")]);
    });
}
