//! LLM adjudication of knn candidates.

use serde::Deserialize;
use uuid::Uuid;

use crate::data::postgres::repositories::embeddings::KnnCandidate;
use crate::llm::{ChatModel, ChatRequest};

/// Strict-JSON adjudication contract: the model must score every
/// candidate and return nothing else.
const SYSTEM_PROMPT: &str = "\
You decide whether a supplier catalog item is the same product as one of \
the candidate internal products.\n\
Respond with a JSON array only. No prose, no code fences.\n\
Each element: {\"product_id\": string (candidate id, verbatim), \
\"confidence\": number between 0 and 1, \"reasoning\": string}.\n\
Score every candidate. Confidence 1 means certainly the same physical \
product; 0 means certainly different. Different sizes, colors or bundle \
counts are different products.";

#[derive(Debug, Clone, Deserialize)]
pub struct Adjudication {
    pub product_id: Uuid,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

fn build_user_message(
    name: &str,
    description: Option<&str>,
    category_leaf: Option<&str>,
    candidates: &[KnnCandidate],
) -> String {
    let candidate_list: Vec<serde_json::Value> = candidates
        .iter()
        .map(|candidate| {
            serde_json::json!({
                "product_id": candidate.product_id,
                "name": candidate.name,
                "description": candidate.description,
                "category": candidate.category,
            })
        })
        .collect();

    format!(
        "Supplier item:\n{}\n\nCandidates:\n{}",
        serde_json::json!({
            "name": name,
            "description": description,
            "category": category_leaf,
        }),
        serde_json::Value::Array(candidate_list)
    )
}

fn strip_fences(body: &str) -> &str {
    let trimmed = body.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Ask the model to score the candidates. Scores are clamped to [0, 1]
/// and unknown product ids are dropped.
pub async fn adjudicate(
    chat: &dyn ChatModel,
    name: &str,
    description: Option<&str>,
    category_leaf: Option<&str>,
    candidates: &[KnnCandidate],
) -> Result<Vec<Adjudication>, String> {
    let request = ChatRequest {
        system: SYSTEM_PROMPT.to_string(),
        user: build_user_message(name, description, category_leaf, candidates),
        temperature: 0.0,
        seed: Some(0),
    };

    let body = chat.complete(&request).await.map_err(|e| e.to_string())?;
    let mut parsed: Vec<Adjudication> = serde_json::from_str(strip_fences(&body))
        .map_err(|e| format!("adjudication not parseable: {}", e))?;

    parsed.retain(|adjudication| {
        candidates
            .iter()
            .any(|candidate| candidate.product_id == adjudication.product_id)
    });
    for adjudication in &mut parsed {
        adjudication.confidence = adjudication.confidence.clamp(0.0, 1.0);
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use async_trait::async_trait;

    fn candidate(id: Uuid, name: &str) -> KnnCandidate {
        KnnCandidate {
            product_id: id,
            name: name.to_string(),
            description: None,
            category: None,
            score: 0.9,
        }
    }

    struct CannedModel(String);

    #[async_trait]
    impl ChatModel for CannedModel {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, LlmError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_parses_and_clamps() {
        let id = Uuid::new_v4();
        let body = format!(
            r#"[{{"product_id":"{}","confidence":1.7,"reasoning":"same SKU"}}]"#,
            id
        );
        let model = CannedModel(body);
        let results = adjudicate(&model, "Cable", None, None, &[candidate(id, "Cable")])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].confidence, 1.0);
        assert_eq!(results[0].reasoning, "same SKU");
    }

    #[tokio::test]
    async fn test_unknown_candidate_ids_are_dropped() {
        let known = Uuid::new_v4();
        let body = format!(
            r#"[{{"product_id":"{}","confidence":0.9}},{{"product_id":"{}","confidence":0.95}}]"#,
            known,
            Uuid::new_v4()
        );
        let model = CannedModel(body);
        let results = adjudicate(&model, "Cable", None, None, &[candidate(known, "Cable")])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].product_id, known);
    }

    #[tokio::test]
    async fn test_prose_is_an_error() {
        let model = CannedModel("These look similar to me!".to_string());
        let result = adjudicate(&model, "Cable", None, None, &[]).await;
        assert!(result.is_err());
    }
}
