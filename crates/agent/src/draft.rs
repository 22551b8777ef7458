use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use mitsumori_core::domain::estimate::{Estimate, EstimateItem};
use mitsumori_core::domain::product::Product;

use crate::error::AgentError;
use crate::guardrails::{GuardrailPolicy, ProposedItem};
use crate::llm::{ChatMessage, LlmClient};

const DRAFT_PROMPT: &str = "あなたは見積書の下書きを作成するアシスタントです。\
与えられた要件と商品マスタから、次の形式のJSONオブジェクトだけを出力してください。\
{\"title\": 件名, \"notes\": 備考または null, \"items\": [{\"sku\": 商品マスタのSKUまたは null, \
\"name\": 品名, \"quantity\": 数量, \"unit_price\": 税抜単価(円), \"unit\": 単位, \
\"tax_category\": \"standard\" | \"reduced\" | \"exempt\"}]}\
商品マスタにある品目は必ずそのSKUを使ってください。説明文は出力しないでください。";

const CATALOG_LIMIT: usize = 200;

/// An assistant-proposed estimate after guardrails. Always becomes a `draft`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DraftEstimate {
    pub title: String,
    pub notes: Option<String>,
    pub items: Vec<EstimateItem>,
    /// Guardrail interventions, shown to the operator next to the draft.
    pub warnings: Vec<String>,
}

impl DraftEstimate {
    pub fn into_estimate(self, customer_name: impl Into<String>) -> Estimate {
        let mut estimate = Estimate::new_draft(customer_name, self.title);
        estimate.notes = self.notes;
        estimate.items = self.items;
        estimate.issue_date = Some(Utc::now().date_naive());
        estimate.recalculate_totals();
        estimate
    }
}

#[derive(Debug, Deserialize)]
struct ProposedDraft {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    items: Vec<ProposedItem>,
}

pub struct DraftEstimateGenerator {
    client: Arc<dyn LlmClient>,
    policy: GuardrailPolicy,
}

impl DraftEstimateGenerator {
    pub fn new(client: Arc<dyn LlmClient>, policy: GuardrailPolicy) -> Self {
        Self { client, policy }
    }

    pub async fn generate(
        &self,
        requirements: &str,
        catalog: &[Product],
    ) -> Result<DraftEstimate, AgentError> {
        if requirements.trim().is_empty() {
            return Err(AgentError::EmptyConversation);
        }

        let messages = [
            ChatMessage::system(DRAFT_PROMPT),
            ChatMessage::user(format!(
                "## 商品マスタ\n{}\n\n## 要件\n{}",
                catalog_listing(catalog),
                requirements.trim()
            )),
        ];
        let raw = self.client.complete(&messages).await?;
        let draft = parse_draft(&raw, catalog, &self.policy)?;

        info!(
            event_name = "assistant.draft.generated",
            item_count = draft.items.len(),
            warning_count = draft.warnings.len(),
            "draft estimate generated"
        );
        Ok(draft)
    }
}

fn catalog_listing(catalog: &[Product]) -> String {
    let lines: Vec<String> = catalog
        .iter()
        .filter(|product| product.is_active)
        .take(CATALOG_LIMIT)
        .map(|product| {
            format!(
                "- {} | {} | {}円/{} | {}",
                product.sku,
                product.name,
                product.unit_price,
                product.unit,
                product.tax_category.as_str()
            )
        })
        .collect();
    if lines.is_empty() {
        "(登録なし)".to_string()
    } else {
        lines.join("\n")
    }
}

/// Finds the JSON object in a reply: a fenced code block when present, otherwise the
/// outermost `{ ... }` span.
pub fn extract_json_object(reply: &str) -> Option<&str> {
    let fenced = reply.split("```").nth(1).map(|block| {
        let block = block.trim_start();
        block.strip_prefix("json").unwrap_or(block).trim()
    });
    if let Some(block) = fenced.filter(|block| block.starts_with('{')) {
        return Some(block);
    }

    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

fn parse_draft(
    reply: &str,
    catalog: &[Product],
    policy: &GuardrailPolicy,
) -> Result<DraftEstimate, AgentError> {
    let json = extract_json_object(reply)
        .ok_or_else(|| AgentError::MalformedDraft("no JSON object in reply".to_string()))?;
    let proposed: ProposedDraft =
        serde_json::from_str(json).map_err(|error| AgentError::MalformedDraft(error.to_string()))?;

    let title = proposed
        .title
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .ok_or_else(|| AgentError::MalformedDraft("draft has no title".to_string()))?;
    let guarded = policy.apply(proposed.items, catalog);
    let warnings = guarded.notes();

    Ok(DraftEstimate {
        title,
        notes: proposed.notes.map(|notes| notes.trim().to_string()).filter(|notes| !notes.is_empty()),
        items: guarded.items,
        warnings,
    })
}
