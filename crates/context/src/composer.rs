//! Answer composer
//!
//! Streams the generation capability's reply while scanning it for citation
//! markers. The returned stream is lazy and owns the model stream: dropping
//! it stops generation and closes the connection.

use crate::markers::CitationScanner;
use crate::prompts::{self, NO_SOURCES_ANSWER};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use lexforge_common::errors::{AppError, Result};
use lexforge_common::llm::{ChatChunk, ChatModel, ChatRequest, ChatStream, TokenUsage};
use lexforge_common::metrics;
use lexforge_common::{ChatMessage, CitationKey, Fragment};
use regex_lite::Regex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Generation parameters for one answer
#[derive(Debug, Clone)]
pub struct ComposeOptions {
    pub temperature: f32,
    pub seed: Option<u64>,
    pub max_tokens: u32,
    pub suggest_followup_questions: bool,
    pub history_budget: usize,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            seed: None,
            max_tokens: 1024,
            suggest_followup_questions: false,
            history_budget: 4000,
        }
    }
}

/// Final state of a composed answer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposedAnswer {
    /// Generated text with follow-up suggestions removed
    pub answer: String,
    /// Supplied citations the answer references, first-referenced order
    pub citations: Vec<CitationKey>,
    pub followup_questions: Vec<String>,
    pub generation_usage: TokenUsage,
    /// Markers naming no supplied fragment
    pub mismatches: Vec<String>,
    pub model: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComposerEvent {
    Delta(String),
    Finished(ComposedAnswer),
}

pub type ComposerStream = BoxStream<'static, Result<ComposerEvent>>;

enum ComposeState {
    Start {
        generator: Arc<dyn ChatModel>,
        request: ChatRequest,
        scanner: CitationScanner,
    },
    Streaming {
        stream: ChatStream,
        scanner: CitationScanner,
        usage: TokenUsage,
    },
    Done,
}

pub struct AnswerComposer {
    generator: Arc<dyn ChatModel>,
}

impl AnswerComposer {
    pub fn new(generator: Arc<dyn ChatModel>) -> Self {
        Self { generator }
    }

    /// Lazily stream an answer grounded in `fragments`.
    ///
    /// Nothing is sent to the model until the stream is first polled. With no
    /// fragments the model is not called and a fixed no-sources answer is
    /// produced.
    pub fn compose(
        &self,
        conversation: &[ChatMessage],
        fragments: &[Fragment],
        options: &ComposeOptions,
    ) -> ComposerStream {
        let model = self.generator.model_name().to_string();
        let started = Instant::now();

        if fragments.is_empty() {
            info!("No sources retrieved, answering without the model");
            let finished = ComposedAnswer {
                answer: NO_SOURCES_ANSWER.to_string(),
                model,
                ..Default::default()
            };
            return stream::iter(vec![
                Ok(ComposerEvent::Delta(NO_SOURCES_ANSWER.to_string())),
                Ok(ComposerEvent::Finished(finished)),
            ])
            .boxed();
        }

        let mut request = ChatRequest::new(
            prompts::answer_system_prompt(options.suggest_followup_questions),
            prompts::answer_messages(conversation, fragments, options.history_budget),
        );
        request.max_tokens = options.max_tokens;
        request.temperature = options.temperature;
        request.seed = options.seed;

        let scanner = CitationScanner::new(fragments.iter().filter_map(Fragment::citation_key));
        let suggest = options.suggest_followup_questions;
        let initial = ComposeState::Start {
            generator: self.generator.clone(),
            request,
            scanner,
        };

        stream::unfold(initial, move |state| {
            let model = model.clone();
            async move {
                let mut state = state;
                loop {
                    state = match state {
                        ComposeState::Start { generator, request, scanner } => {
                            match generator.stream(request).await {
                                Ok(stream) => ComposeState::Streaming {
                                    stream,
                                    scanner,
                                    usage: TokenUsage::default(),
                                },
                                Err(e) => return Some((Err(e), ComposeState::Done)),
                            }
                        }

                        ComposeState::Streaming { mut stream, mut scanner, mut usage } => {
                            match stream.next().await {
                                Some(Ok(ChatChunk::Delta(text))) => {
                                    if text.is_empty() {
                                        ComposeState::Streaming { stream, scanner, usage }
                                    } else {
                                        scanner.push(&text);
                                        return Some((
                                            Ok(ComposerEvent::Delta(text)),
                                            ComposeState::Streaming { stream, scanner, usage },
                                        ));
                                    }
                                }
                                Some(Ok(ChatChunk::Usage(reported))) => {
                                    usage += reported;
                                    ComposeState::Streaming { stream, scanner, usage }
                                }
                                Some(Err(e)) => return Some((Err(e), ComposeState::Done)),
                                None => {
                                    let finished = finish(scanner, usage, suggest, model, started);
                                    return Some((finished.map(ComposerEvent::Finished), ComposeState::Done));
                                }
                            }
                        }

                        ComposeState::Done => return None,
                    };
                }
            }
        })
        .boxed()
    }
}

fn finish(
    scanner: CitationScanner,
    usage: TokenUsage,
    suggest: bool,
    model: String,
    started: Instant,
) -> Result<ComposedAnswer> {
    let outcome = scanner.finish();
    let (answer, followup_questions) = if suggest {
        extract_followups(&outcome.text)?
    } else {
        (outcome.text.trim().to_string(), Vec::new())
    };

    metrics::record_tokens("generation", usage.prompt_tokens, usage.completion_tokens);
    metrics::record_citation_mismatches(outcome.mismatches.len());
    debug!(
        citations = outcome.referenced.len(),
        mismatches = outcome.mismatches.len(),
        "compose: finished"
    );

    Ok(ComposedAnswer {
        answer,
        citations: outcome.referenced,
        followup_questions,
        generation_usage: usage,
        mismatches: outcome.mismatches,
        model,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

/// Split `<<question>>` suggestions out of the answer text
pub fn extract_followups(text: &str) -> Result<(String, Vec<String>)> {
    let pattern = Regex::new(r"<<([^<>]+)>>").map_err(|e| AppError::Internal {
        message: format!("follow-up pattern: {}", e),
    })?;

    let mut questions: Vec<String> = Vec::new();
    for capture in pattern.captures_iter(text) {
        let question = capture[1].trim().to_string();
        if !question.is_empty() && !questions.contains(&question) {
            questions.push(question);
        }
    }

    let answer = pattern.replace_all(text, "").trim().to_string();
    Ok((answer, questions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexforge_common::llm::{ScriptedChatModel, ScriptedReply};

    fn fragments() -> Vec<Fragment> {
        vec![Fragment::new(
            "a",
            "CPR Part 15",
            "15.4",
            "The period for filing a defence is 14 days after service of the particulars of claim.",
        )
        .with_subsection("15.4")]
    }

    async fn collect(stream: ComposerStream) -> (String, ComposedAnswer) {
        let events: Vec<ComposerEvent> = stream.map(|e| e.unwrap()).collect().await;
        let mut streamed = String::new();
        let mut finished = None;
        for event in events {
            match event {
                ComposerEvent::Delta(text) => streamed.push_str(&text),
                ComposerEvent::Finished(answer) => finished = Some(answer),
            }
        }
        (streamed, finished.unwrap())
    }

    #[tokio::test]
    async fn test_streams_and_collects_citations() {
        let model = Arc::new(ScriptedChatModel::new());
        model.push_stream(ScriptedReply::Chunks(vec![
            "You have 14 days [15.4, 15".into(),
            ".4, CPR Part 15].".into(),
        ]));
        let composer = AnswerComposer::new(model.clone());

        let (streamed, answer) = collect(composer.compose(
            &[ChatMessage::user("Time limits for a defence?")],
            &fragments(),
            &ComposeOptions::default(),
        ))
        .await;

        assert_eq!(streamed, "You have 14 days [15.4, 15.4, CPR Part 15].");
        assert_eq!(answer.answer, streamed);
        assert_eq!(answer.citations, vec![CitationKey::new("15.4", "15.4", "CPR Part 15")]);
        assert_eq!(answer.generation_usage, TokenUsage::new(100, 20));
        assert_eq!(model.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_lazy_until_polled() {
        let model = Arc::new(ScriptedChatModel::new());
        model.push_stream(ScriptedReply::Text("unused".into()));
        let composer = AnswerComposer::new(model.clone());

        let stream = composer.compose(&[ChatMessage::user("q")], &fragments(), &ComposeOptions::default());
        assert_eq!(model.stream_calls(), 0);
        drop(stream);
        assert_eq!(model.stream_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_sources_skips_model() {
        let model = Arc::new(ScriptedChatModel::new());
        let composer = AnswerComposer::new(model.clone());

        let (_, answer) = collect(composer.compose(&[ChatMessage::user("q")], &[], &ComposeOptions::default())).await;
        assert_eq!(answer.answer, NO_SOURCES_ANSWER);
        assert!(answer.citations.is_empty());
        assert_eq!(model.stream_calls(), 0);
    }

    #[tokio::test]
    async fn test_generation_error_ends_stream() {
        let model = Arc::new(ScriptedChatModel::new());
        model.push_stream(ScriptedReply::ChunksThenFail(vec!["Partial".into()], "connection reset".into()));
        let composer = AnswerComposer::new(model.clone());

        let events: Vec<Result<ComposerEvent>> = composer
            .compose(&[ChatMessage::user("q")], &fragments(), &ComposeOptions::default())
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(ComposerEvent::Delta(_))));
        assert!(matches!(events[1], Err(AppError::GenerationFailed { .. })));
    }

    #[tokio::test]
    async fn test_followups_stripped_from_final_answer() {
        let model = Arc::new(ScriptedChatModel::new());
        model.push_stream(ScriptedReply::Text(
            "Fourteen days [15.4, 15.4, CPR Part 15].\n<<Can the period be extended?>> <<What if I miss it?>>".into(),
        ));
        let composer = AnswerComposer::new(model.clone());
        let options = ComposeOptions {
            suggest_followup_questions: true,
            seed: Some(42),
            ..Default::default()
        };

        let (streamed, answer) = collect(composer.compose(&[ChatMessage::user("q")], &fragments(), &options)).await;

        assert!(streamed.contains("<<Can the period be extended?>>"));
        assert_eq!(answer.answer, "Fourteen days [15.4, 15.4, CPR Part 15].");
        assert_eq!(answer.followup_questions, vec!["Can the period be extended?", "What if I miss it?"]);

        let request = &model.requests()[0];
        assert_eq!(request.seed, Some(42));
        assert!(request.system_prompt.contains("<<"));
        assert!(request.messages[0].content.contains("[15.4, 15.4, CPR Part 15]: The period"));
    }
}
