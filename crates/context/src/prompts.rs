//! Prompt templates and conversation shaping for the planner and composer

use lexforge_common::models::estimate_tokens;
use lexforge_common::{ChatMessage, Fragment, Role};

/// Instruction for the planning invocation
pub const PLANNER_PROMPT: &str = "You plan searches over an index of legal materials: \
civil procedure rules, practice directions and case law. Read the conversation and propose \
search queries that together retrieve the sources needed to answer the latest question. \
Each query is a short keyword-rich phrase; expand abbreviations and include rule numbers \
when they are mentioned. You may attach a document category to a query to narrow it. \
Reply with JSON only, in the form \
{\"queries\": [{\"query\": \"...\", \"category\": \"...\"}], \"done\": false}. \
Never propose more queries than the stated budget. When earlier results already cover the \
question, reply {\"queries\": [], \"done\": true}.";

const ANSWER_PROMPT: &str = "You are a legal research assistant answering questions about \
civil procedure from the supplied sources only. Be concise and precise. If the sources do \
not contain the answer, say that you do not know; do not rely on outside knowledge. \
Each source begins with its citation in the form [subsection, sourcePage, sourceFile] \
followed by a colon and its text. Cite every fact you use by copying that citation \
exactly, for example [15.4, 15.4, CPR Part 15]. Cite sources separately and never merge \
two citations into one bracket. Never cite anything that is not in the supplied sources.";

const FOLLOWUP_PROMPT: &str = " After the answer, suggest three short follow-up questions \
the user might ask next, each enclosed in double angle brackets, for example \
<<What is the deadline for a reply?>>.";

/// Answer text when retrieval legitimately found nothing
pub const NO_SOURCES_ANSWER: &str = "I could not find any relevant sources for this question \
in the documents available to you, so I cannot give a grounded answer.";

pub fn answer_system_prompt(suggest_followup_questions: bool) -> String {
    if suggest_followup_questions {
        format!("{}{}", ANSWER_PROMPT, FOLLOWUP_PROMPT)
    } else {
        ANSWER_PROMPT.to_string()
    }
}

/// Most recent user/assistant turns that fit in `budget` tokens.
///
/// The latest user turn is always kept, even when it alone exceeds the
/// budget. Older turns are dropped from the front; system turns never pass.
pub fn fit_history(conversation: &[ChatMessage], budget: usize) -> Vec<ChatMessage> {
    let turns: Vec<&ChatMessage> = conversation.iter().filter(|m| m.role != Role::System).collect();
    let latest_user = turns.iter().rposition(|m| m.role == Role::User);

    let mut kept = Vec::new();
    let mut used = 0;
    for (pos, message) in turns.iter().enumerate().rev() {
        let cost = estimate_tokens(&message.content);
        let required = latest_user.is_some_and(|l| pos >= l);
        if !required && used + cost > budget {
            break;
        }
        used += cost;
        kept.push((*message).clone());
    }

    kept.reverse();
    kept
}

/// One source line: `[key]: content`, flattened to a single line
pub fn format_source(fragment: &Fragment) -> Option<String> {
    let key = fragment.citation_key()?;
    let content = fragment.content.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(format!("{}: {}", key, content))
}

/// History for the answer call with the sources appended to the latest user turn
pub fn answer_messages(
    conversation: &[ChatMessage],
    fragments: &[Fragment],
    history_budget: usize,
) -> Vec<ChatMessage> {
    let mut messages = fit_history(conversation, history_budget);
    let sources: Vec<String> = fragments.iter().filter_map(format_source).collect();

    if let Some(last_user) = messages.iter_mut().rev().find(|m| m.role == Role::User) {
        last_user.content = format!("{}\n\nSources:\n{}", last_user.content, sources.join("\n"));
    }
    messages
}

/// Summary of one executed sub-query, shown to the planner in later rounds
pub struct RoundSummary<'a> {
    pub query: &'a str,
    pub sources: Vec<String>,
    pub failed: bool,
}

/// History for a planning call
pub fn planner_messages(
    conversation: &[ChatMessage],
    history_budget: usize,
    budget_left: usize,
    previous: &[RoundSummary<'_>],
) -> Vec<ChatMessage> {
    let mut messages = fit_history(conversation, history_budget);

    let mut note = format!("Query budget remaining: {}.", budget_left);
    if !previous.is_empty() {
        note.push_str("\nQueries already run:");
        for summary in previous {
            if summary.failed {
                note.push_str(&format!("\n- \"{}\": failed", summary.query));
            } else if summary.sources.is_empty() {
                note.push_str(&format!("\n- \"{}\": no results", summary.query));
            } else {
                note.push_str(&format!("\n- \"{}\": {}", summary.query, summary.sources.join("; ")));
            }
        }
        note.push_str("\nPropose only queries that are still needed.");
    }
    messages.push(ChatMessage::user(note));
    messages
}
