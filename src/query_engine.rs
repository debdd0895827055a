//! The grounded question-answering pipeline (§4.4): embed the question,
//! retrieve the top-K scoped hits, assemble a character-budgeted context,
//! call the LLM, and persist the resulting [`Query`].
//!
//! Retrieval (query embedding, similarity search) is chained into prompt
//! assembly and the LLM call, sequenced around this crate's separate
//! `VectorIndex` and `MetadataStore`.

use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::embedding::{self, EmbeddingConfig, EmbeddingProvider};
use crate::errors::{CoreError, CoreResult};
use crate::llm::LlmClient;
use crate::metadata_store::MetadataStore;
use crate::models::{Item, Query, Source};
use crate::vector_index::{Hit, VectorIndex};

/// A retrieved item, hydrated from the metadata store, paired with its
/// similarity score. Hits whose item was deleted between search and
/// hydration are silently dropped (§4.4 step 5, §7 kind 2).
struct HydratedHit {
    item: Item,
    score: f32,
}

/// Answers `question` against `space_id`, persisting the resulting
/// [`Query`] regardless of whether retrieval found anything (an empty
/// source list still produces a recorded, ungrounded answer attempt).
pub async fn answer_question(
    vector_index: &VectorIndex,
    metadata_store: &dyn MetadataStore,
    embedding_provider: &dyn EmbeddingProvider,
    embedding_config: &EmbeddingConfig,
    llm_client: &dyn LlmClient,
    retrieval_config: &RetrievalConfig,
    space_id: &str,
    question: &str,
) -> CoreResult<Query> {
    if question.trim().is_empty() {
        return Err(CoreError::InvalidInput("question must not be empty".to_string()));
    }

    let space = metadata_store.get_space(space_id).await?;
    let items = metadata_store.list_items(&space.space_id, i64::MAX, 0).await?;
    if !items.iter().any(|i| i.status.is_ready()) {
        return Err(CoreError::InvalidInput(format!(
            "space {space_id} has no ready items to answer from"
        )));
    }

    // The deadline bounds every suspension point of the retrieval+answer
    // sequence, not just the LLM call (§4.4 "Rate and cost", §5 "Cancellation
    // and timeouts"): a hang in embedding or search must also yield
    // `deadline-exceeded` with no Query persisted.
    let deadline = Duration::from_secs(retrieval_config.question_deadline_secs);
    let (answer, sources) = tokio::time::timeout(
        deadline,
        retrieve_and_answer(
            vector_index,
            metadata_store,
            embedding_provider,
            embedding_config,
            llm_client,
            retrieval_config,
            space_id,
            question,
        ),
    )
    .await
    .map_err(|_| CoreError::DeadlineExceeded)??;

    let query = Query {
        query_id: Uuid::new_v4().to_string(),
        space_id: space_id.to_string(),
        question: question.to_string(),
        answer,
        sources,
        created_at: Utc::now(),
    };

    metadata_store.insert_query(&query).await?;
    Ok(query)
}

/// The embed→search→hydrate→LLM sequence, factored out so the caller can
/// bound the whole thing in a single `tokio::time::timeout`.
async fn retrieve_and_answer(
    vector_index: &VectorIndex,
    metadata_store: &dyn MetadataStore,
    embedding_provider: &dyn EmbeddingProvider,
    embedding_config: &EmbeddingConfig,
    llm_client: &dyn LlmClient,
    retrieval_config: &RetrievalConfig,
    space_id: &str,
    question: &str,
) -> CoreResult<(String, Vec<Source>)> {
    let query_vector = embedding::embed(embedding_provider, embedding_config, question).await?;
    let hits = vector_index.search(&query_vector, space_id, retrieval_config.k_retrieve).await?;

    let hydrated = hydrate(metadata_store, hits).await?;
    let (context, sources) = assemble_context(&hydrated, retrieval_config);

    let answer = llm_client.answer(&context, question).await?;
    Ok((answer, sources))
}

async fn hydrate(metadata_store: &dyn MetadataStore, hits: Vec<Hit>) -> CoreResult<Vec<HydratedHit>> {
    let mut hydrated = Vec::with_capacity(hits.len());
    for hit in hits {
        match metadata_store.get_item(&hit.item_id).await {
            Ok(item) => hydrated.push(HydratedHit { item, score: hit.score }),
            Err(CoreError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(hydrated)
}

/// Builds the `[source i] <snippet>` context blocks and the parallel
/// `Source` list under `retrieval_config.context_budget_chars`, trimming
/// each snippet to `snippet_chars` at a whitespace boundary (§4.4 steps 4-6).
fn assemble_context(hits: &[HydratedHit], retrieval_config: &RetrievalConfig) -> (String, Vec<Source>) {
    let mut context = String::new();
    let mut sources = Vec::with_capacity(hits.len());

    for (index, hit) in hits.iter().enumerate() {
        let text = hit.item.extracted_text.as_deref().unwrap_or(&hit.item.content);
        let snippet = truncate_at_boundary(text, retrieval_config.snippet_chars);
        let block = format!("[source {}] {}\n\n", index + 1, snippet);

        if context.chars().count() + block.chars().count() > retrieval_config.context_budget_chars
            && !context.is_empty()
        {
            break;
        }

        context.push_str(&block);
        sources.push(Source {
            item_id: hit.item.item_id.clone(),
            kind: hit.item.kind,
            snippet: truncate_at_boundary(text, retrieval_config.source_display_chars),
            score: hit.score,
        });
    }

    (context, sources)
}

/// Truncates `text` to at most `max_chars` characters, backing off to the
/// nearest preceding whitespace so words aren't split mid-token.
fn truncate_at_boundary(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }

    let mut cut = max_chars;
    while cut > 0 && !chars[cut - 1].is_whitespace() {
        cut -= 1;
    }
    if cut == 0 {
        cut = max_chars;
    }

    chars[..cut].iter().collect::<String>().trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_at_boundary_backs_off_to_whitespace() {
        let text = "the quick brown fox jumps";
        let truncated = truncate_at_boundary(text, 12);
        assert_eq!(truncated, "the quick");
    }

    #[test]
    fn truncate_at_boundary_is_noop_under_limit() {
        let text = "short";
        assert_eq!(truncate_at_boundary(text, 100), "short");
    }

    #[test]
    fn assemble_context_stops_at_budget() {
        let retrieval_config = RetrievalConfig {
            k_retrieve: 5,
            snippet_chars: 50,
            context_budget_chars: 40,
            source_display_chars: 20,
            question_deadline_secs: 30,
        };
        let hits = vec![
            HydratedHit {
                item: sample_item("item-1", "a".repeat(100).as_str()),
                score: 0.9,
            },
            HydratedHit {
                item: sample_item("item-2", "b".repeat(100).as_str()),
                score: 0.8,
            },
        ];
        let (context, sources) = assemble_context(&hits, &retrieval_config);
        assert_eq!(sources.len(), 1);
        assert!(context.contains("[source 1]"));
        assert!(!context.contains("[source 2]"));
    }

    fn sample_item(item_id: &str, text: &str) -> Item {
        Item {
            item_id: item_id.to_string(),
            space_id: "space-1".to_string(),
            kind: crate::models::ItemKind::Message,
            content: text.to_string(),
            extracted_text: Some(text.to_string()),
            metadata: crate::models::ItemMetadata::Message { extra: Default::default() },
            notes: None,
            created_at: Utc::now(),
            status: crate::models::ItemStatus::Ready,
            vector_ref: Some(0),
        }
    }
}
