// LLM arbiter implementation using Anthropic Claude.
//
// This is the infrastructure implementation of `Arbiter`. The conservative
// same-incident prompt lives here; use cases only see a boolean.

use async_trait::async_trait;
use rig::completion::Prompt;
use rig::providers::anthropic;

use crate::errors::{EngineError, EngineResult};
use crate::kernel::traits::Arbiter;

/// Strict, conservative prompt: bias toward NO whenever subject or location
/// don't both match exactly, since a false merge is worse than a missed one.
const SYSTEM_PROMPT: &str = r#"You are a complaint deduplication validator for an urban complaint
response system. You decide whether two complaint descriptions refer to the
SAME specific real-world incident.

Be strict and conservative. When uncertain, ambiguous, incomplete, or only
partially matching, answer NO. A false merge is worse than a missed one.

Before comparing, normalize both complaints:
- Treat typos, phonetic spellings, abbreviations, slang, and informal
  grammar as equivalent (e.g. "brgy"/"barangay", "purok3"/"prk 3").
- Ignore filler words and emotional expressions.
- Treat mixed Filipino/English/regional-language phrasing as equivalent to
  its English meaning; compare semantic meaning only.
- Extract the main subject (the physical issue) and the specific location
  (street, purok, barangay, landmark) from each complaint.

Decision rules:
1. Same subject AND same exact location -> YES.
2. Different subject -> NO, even if the location matches.
3. Same subject but a different location -> NO, including nearby-but-
   distinct areas (e.g. Purok 3 vs Purok 4).
4. A follow-up about the same unresolved issue counts as the same incident
   (e.g. "kailan aayusin", "hindi pa naaayos") -> YES.
5. If one complaint gives a location and the other gives none, and it is
   not clearly and explicitly the same place -> NO.
6. If time references clearly indicate different events -> NO.
7. Any remaining ambiguity after normalization -> NO.

Reply with exactly one word, YES or NO. Do not explain, punctuate, or add
any other text."#;

pub struct ClaudeArbiter {
    client: anthropic::Client,
    model: String,
}

impl ClaudeArbiter {
    pub fn new(api_key: String, model: String) -> Self {
        let client = anthropic::ClientBuilder::new(&api_key).build();
        Self { client, model }
    }
}

#[async_trait]
impl Arbiter for ClaudeArbiter {
    async fn same_incident(&self, complaint_a: &str, complaint_b: &str) -> EngineResult<bool> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(SYSTEM_PROMPT)
            .max_tokens(8)
            .build();

        let prompt = format!(
            "Complaint A: {complaint_a}\n\nComplaint B: {complaint_b}\n\nAre these the SAME specific incident? Reply YES or NO only."
        );

        let response = agent.prompt(prompt.as_str()).await.map_err(|e| {
            EngineError::TransientExternal(format!("arbiter call failed: {e}"))
        })?;

        Ok(response.trim().eq_ignore_ascii_case("yes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a real ANTHROPIC_API_KEY; run manually against the live provider"]
    async fn same_incident_matches_exact_restatement() {
        let api_key = std::env::var("ANTHROPIC_API_KEY").expect("ANTHROPIC_API_KEY must be set");
        let arbiter = ClaudeArbiter::new(api_key, "claude-3-5-sonnet-20241022".to_string());

        let result = arbiter
            .same_incident(
                "Baha sa Purok 3, barangay Look",
                "Umaapaw na tubig sa Purok 3, Look",
            )
            .await
            .unwrap();

        assert!(result);
    }
}
