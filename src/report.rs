//! Audit report contract: typed schema, shape validation for externally
//! produced JSON, the deterministic mock fallback, and the two-attempt
//! (first, repair, fallback) generation loop against the model API.

use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::detect::truncate_chars;
use crate::entities::PageType;
use crate::scraper::ScrapedPage;

const MODEL: &str = "gpt-4o-mini";
const MODEL_TIMEOUT: Duration = Duration::from_secs(90);
const REPAIR_INPUT_CAP: usize = 6_000;
const PROMPT_ABOVE_FOLD_CAP: usize = 1_500;
const PROMPT_MAIN_TEXT_CAP: usize = 8_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Effort {
    S,
    M,
    L,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Level {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum FindingCategory {
    #[serde(rename = "CRO")]
    Cro,
    Trust,
    Copy,
    #[serde(rename = "Mobile UX")]
    MobileUx,
    Performance,
    #[serde(rename = "SEO")]
    Seo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CategoryScores {
    pub cro: f64,
    pub trust: f64,
    pub copy: f64,
    pub mobile_ux: f64,
    pub performance_basics: f64,
    pub seo_basics: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TopFix {
    pub title: String,
    pub why_it_matters: String,
    pub how_to_fix: String,
    pub where_to_fix: String,
    pub estimated_effort: Effort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Finding {
    pub id: String,
    pub title: String,
    pub category: FindingCategory,
    pub severity: Level,
    pub impact: Level,
    pub confidence: Level,
    pub evidence: String,
    pub where_to_fix: String,
    pub what_to_change: String,
    pub recommendation: String,
    pub estimated_effort: Effort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditReport {
    pub overall_score: f64,
    pub category_scores: CategoryScores,
    pub top_fixes: Vec<TopFix>,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedReport {
    pub report: AuditReport,
    pub used_mock: bool,
}

/// Model-call failures split into quota-style soft failures (fall back to
/// the mock) and everything else (hard job failure).
#[derive(Debug)]
pub enum ModelError {
    Soft(String),
    Hard(String),
}

/* ── shape validation ── */

/// Narrow externally produced JSON to a report, or reject it. Structural
/// only: overall score and category scores present, at least one top fix
/// with non-empty title/how-to-fix/where-to-fix, at least one finding with
/// non-empty id/title/evidence. Quality contracts (score/severity
/// consistency) are the generator's responsibility, not checked here.
pub fn validate_report(value: &Value) -> Option<AuditReport> {
    let report: AuditReport = serde_json::from_value(value.clone()).ok()?;
    if report.top_fixes.is_empty() || report.findings.is_empty() {
        return None;
    }
    for fix in &report.top_fixes {
        if fix.title.is_empty() || fix.how_to_fix.is_empty() || fix.where_to_fix.is_empty() {
            return None;
        }
    }
    for finding in &report.findings {
        if finding.id.is_empty() || finding.title.is_empty() || finding.evidence.is_empty() {
            return None;
        }
    }
    Some(report)
}

fn validate_report_text(text: &str) -> Option<AuditReport> {
    let value: Value = serde_json::from_str(text).ok()?;
    validate_report(&value)
}

/* ── mock report ── */

/// Deterministic fallback computed from the signal record alone: base
/// score gated on detected review signals, fixed per-category offsets,
/// fixed catalog of fixes and findings. Guarantees the pipeline always
/// terminates with a usable report.
pub fn mock_report(scraped: &ScrapedPage) -> AuditReport {
    let base: f64 = if scraped.trust_signals.reviews { 78.0 } else { 64.0 };

    let finding = |id: &str,
                   title: &str,
                   category: FindingCategory,
                   severity: Level,
                   impact: Level,
                   confidence: Level,
                   evidence: &str,
                   where_to_fix: &str,
                   what_to_change: &str,
                   recommendation: &str| Finding {
        id: id.to_string(),
        title: title.to_string(),
        category,
        severity,
        impact,
        confidence,
        evidence: evidence.to_string(),
        where_to_fix: where_to_fix.to_string(),
        what_to_change: what_to_change.to_string(),
        recommendation: recommendation.to_string(),
        estimated_effort: Effort::S,
    };

    AuditReport {
        overall_score: base,
        category_scores: CategoryScores {
            cro: base - 4.0,
            trust: base - 2.0,
            copy: base - 6.0,
            mobile_ux: base - 8.0,
            performance_basics: base - 10.0,
            seo_basics: base - 5.0,
        },
        top_fixes: vec![
            TopFix {
                title: "Surface shipping and returns near the main CTA".to_string(),
                why_it_matters:
                    "Shoppers abandon when delivery and returns are unclear on the first screen."
                        .to_string(),
                how_to_fix:
                    "Add a short line under the primary CTA with shipping ETA and free returns policy."
                        .to_string(),
                where_to_fix: "Below the primary Add to Cart / Buy Now button".to_string(),
                estimated_effort: Effort::S,
            },
            TopFix {
                title: "Strengthen the hero headline with outcome-driven copy".to_string(),
                why_it_matters: "Visitors need a clear value promise within the first 3 seconds."
                    .to_string(),
                how_to_fix:
                    "Rewrite the headline to highlight the primary benefit and who it is for."
                        .to_string(),
                where_to_fix: "Hero section headline".to_string(),
                estimated_effort: Effort::M,
            },
            TopFix {
                title: "Add visible trust signals above the fold".to_string(),
                why_it_matters: "Trust cues increase conversion and reduce purchase anxiety."
                    .to_string(),
                how_to_fix: "Place review stars, guarantee badge, or security seals near the CTA."
                    .to_string(),
                where_to_fix: "Above the fold, near the primary CTA".to_string(),
                estimated_effort: Effort::S,
            },
        ],
        findings: vec![
            finding(
                "f1",
                "CTA lacks supporting urgency or proof",
                FindingCategory::Cro,
                Level::High,
                Level::High,
                Level::Medium,
                "Primary CTA appears without supporting proof or scarcity cues.",
                "Next to the primary CTA button",
                "Add microcopy like \"Ships in 24 hours\" or \"3,200+ sold\" adjacent to the button.",
                "Add microcopy like \"Ships in 24 hours\" or \"3,200+ sold\" next to the CTA.",
            ),
            finding(
                "f2",
                "Shipping details are not visible above the fold",
                FindingCategory::Trust,
                Level::High,
                Level::High,
                Level::Medium,
                "Shipping and returns information is not surfaced in the initial view.",
                "Beneath price or CTA",
                "Insert a concise shipping + returns line (e.g. \"Free shipping · Easy 30-day returns\").",
                "Add a concise shipping + returns line beneath price or CTA.",
            ),
            finding(
                "f3",
                "Headline lacks specificity",
                FindingCategory::Copy,
                Level::Medium,
                Level::Medium,
                Level::Medium,
                "Hero headline does not describe the product outcome or target user.",
                "Hero section",
                "Rewrite to include the primary benefit and audience (e.g., \"For busy parents...\").",
                "Rewrite to include the primary benefit and audience.",
            ),
            finding(
                "f4",
                "Review content not visible on first screen",
                FindingCategory::Trust,
                Level::Medium,
                Level::Medium,
                Level::Medium,
                "Reviews are present but not surfaced near the main CTA.",
                "Near the product title or CTA",
                "Show star rating and review count inline with the product title.",
                "Show star rating and review count near the product title or CTA.",
            ),
            finding(
                "f5",
                "Mobile spacing pushes CTA below the fold",
                FindingCategory::MobileUx,
                Level::Low,
                Level::Medium,
                Level::Low,
                "Large spacing pushes CTA below the fold on mobile.",
                "Hero section on mobile viewports",
                "Reduce vertical gaps between hero elements on screens < 768px.",
                "Reduce vertical gaps between hero elements on mobile viewports.",
            ),
            finding(
                "f6",
                "Trust badges not near the payment section",
                FindingCategory::Trust,
                Level::Low,
                Level::Low,
                Level::Low,
                "Security badges are not visible near checkout or CTA.",
                "Adjacent to CTA or checkout button",
                "Place payment trust badges (Visa/MC/PayPal icons, SSL badge) next to the main action button.",
                "Place payment trust badges adjacent to CTA or checkout button.",
            ),
            finding(
                "f7",
                "Meta description missing persuasive copy",
                FindingCategory::Seo,
                Level::Medium,
                Level::Low,
                Level::High,
                "Meta description is missing or generic.",
                "HTML <head> meta description tag",
                "Write a benefit-driven meta description (< 155 chars) with a clear call to action.",
                "Write a benefit-driven meta description with a clear call to action.",
            ),
            finding(
                "f8",
                "Primary imagery lacks descriptive alt text",
                FindingCategory::Performance,
                Level::Low,
                Level::Low,
                Level::High,
                "Some images are missing alt attributes.",
                "Product image <img> tags",
                "Add descriptive alt text to key product images for accessibility and SEO.",
                "Add descriptive alt text to key product images for accessibility and SEO.",
            ),
        ],
    }
}

/* ── prompt building ── */

const SYSTEM_PROMPT: &str = r#"You are a senior CRO (Conversion Rate Optimization) strategist specializing in ecommerce stores.

RULES:
- Use ONLY evidence from the provided scraped_json. Do NOT fabricate data.
- If a signal is missing or uncertain, explicitly state "Data not available" or "Could not confirm" in the evidence field.
- Each finding MUST include:
  1. "evidence": A SHORT quote or paraphrase from the scraped text that supports the finding.
  2. "where_to_fix": Specific page location (e.g., "hero section", "below Add to Cart", "product gallery", "cart drawer", "footer", "near price").
  3. "what_to_change": Exact, concrete action (not vague advice).
- top_fixes must be 3 DISTINCT fixes that do NOT overlap with each other.
- Category scores must ALIGN with findings severity — if you report multiple High-severity CRO issues, the CRO score should be low.
- Set "confidence" per finding: High = clearly visible in data, Medium = inferred from patterns, Low = educated guess.
- Mention platform-specific tips if detectedPlatform is "shopify" or "woocommerce".
- Output ONLY valid JSON matching the schema. No markdown, no explanation, no wrapping."#;

const REPAIR_SYSTEM_PROMPT: &str = "The previous response was invalid JSON. Repair the JSON below so it matches the required schema exactly. Output ONLY the corrected JSON, no explanation.";

/// Strict response schema sent with every model call.
fn report_json_schema() -> Value {
    let effort = json!({ "type": "string", "enum": ["S", "M", "L"] });
    let level = json!({ "type": "string", "enum": ["High", "Medium", "Low"] });
    let score = json!({ "type": "number", "minimum": 0, "maximum": 100 });
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "overall_score": score.clone(),
            "category_scores": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "cro": score.clone(),
                    "trust": score.clone(),
                    "copy": score.clone(),
                    "mobile_ux": score.clone(),
                    "performance_basics": score.clone(),
                    "seo_basics": score,
                },
                "required": ["cro", "trust", "copy", "mobile_ux", "performance_basics", "seo_basics"],
            },
            "top_fixes": {
                "type": "array",
                "minItems": 3,
                "maxItems": 3,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "title": { "type": "string" },
                        "why_it_matters": { "type": "string" },
                        "how_to_fix": { "type": "string" },
                        "where_to_fix": { "type": "string" },
                        "estimated_effort": effort.clone(),
                    },
                    "required": ["title", "why_it_matters", "how_to_fix", "where_to_fix", "estimated_effort"],
                },
            },
            "findings": {
                "type": "array",
                "minItems": 8,
                "maxItems": 12,
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "id": { "type": "string" },
                        "title": { "type": "string" },
                        "category": {
                            "type": "string",
                            "enum": ["CRO", "Trust", "Copy", "Mobile UX", "Performance", "SEO"],
                        },
                        "severity": level.clone(),
                        "impact": level.clone(),
                        "confidence": level,
                        "evidence": { "type": "string" },
                        "where_to_fix": { "type": "string" },
                        "what_to_change": { "type": "string" },
                        "recommendation": { "type": "string" },
                        "estimated_effort": effort,
                    },
                    "required": ["id", "title", "category", "severity", "impact", "confidence", "evidence", "where_to_fix", "what_to_change", "recommendation", "estimated_effort"],
                },
            },
        },
        "required": ["overall_score", "category_scores", "top_fixes", "findings"],
    })
}

/// Trim the signal record to the documented prompt subset. This is where
/// token cost is controlled; do not widen without tightening elsewhere.
fn build_user_prompt(scraped: &ScrapedPage, page_type: PageType) -> String {
    let take = |items: &[String], n: usize| items.iter().take(n).cloned().collect::<Vec<_>>();
    let trimmed = json!({
        "pageType": page_type,
        "url": scraped.final_url,
        "platform": scraped.detected_platform,
        "title": scraped.title,
        "metaDescription": scraped.meta_description,
        "ogTitle": scraped.og_title,
        "ogDescription": scraped.og_description,
        "canonicalUrl": scraped.canonical_url,
        "viewportMeta": scraped.viewport_meta_present,
        "h1": take(&scraped.h1, 5),
        "h2": take(&scraped.h2, 8),
        "primaryCtaText": scraped.primary_cta_text,
        "addToCartPresent": scraped.add_to_cart_present,
        "pricePresent": scraped.price_present,
        "priceSample": scraped.price_sample,
        "currencyDetected": scraped.currency_detected,
        "ctas": scraped.ctas.iter().take(10).collect::<Vec<_>>(),
        "priceTexts": take(&scraped.price_texts, 10),
        "shippingReturnsMentions": scraped.shipping_returns_mentions,
        "shippingReturnsTextSample": scraped.shipping_returns_text_sample,
        "trustSignals": scraped.trust_signals,
        "reviewsCountHint": scraped.reviews_count_hint,
        "imagesCount": scraped.images_count,
        "missingAltCount": scraped.missing_alt_count,
        "scriptsCount": scraped.scripts_count,
        "stylesCount": scraped.styles_count,
        "wordCountEstimate": scraped.word_count_estimate,
        "internalLinksCount": scraped.internal_links_count,
        "externalLinksCount": scraped.external_links_count,
        "aboveFoldTextSample": truncate_chars(&scraped.above_fold_text_sample, PROMPT_ABOVE_FOLD_CAP),
        "mainTextSample": truncate_chars(&scraped.main_text_sample, PROMPT_MAIN_TEXT_CAP),
    });

    json!({
        "scraped": trimmed,
        "instructions": "Return 8–12 findings. Each evidence field should quote or paraphrase a short snippet from mainTextSample or aboveFoldTextSample. where_to_fix must specify the page area (hero, near price, near Add to Cart, product gallery, footer, etc.). what_to_change must describe the exact change. Ensure top_fixes are 3 distinct non-overlapping recommendations. Scores should be consistent with findings severity.",
    })
    .to_string()
}

/* ── model call ── */

fn extract_output_text(value: &Value) -> Option<String> {
    if let Some(text) = value.get("output_text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    // Responses API shape: output[] → content[] → { type: "output_text", text }.
    for item in value.get("output")?.as_array()? {
        if let Some(contents) = item.get("content").and_then(Value::as_array) {
            for content in contents {
                if content.get("type").and_then(Value::as_str) == Some("output_text") {
                    if let Some(text) = content.get("text").and_then(Value::as_str) {
                        return Some(text.to_string());
                    }
                }
            }
        }
    }
    None
}

fn is_quota_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("quota") || lowered.contains("rate limit") || lowered.contains("insufficient")
}

async fn call_model(
    client: &reqwest::Client,
    api_base: &str,
    api_key: &str,
    system: &str,
    user: &str,
) -> Result<Option<String>, ModelError> {
    let url = format!("{}/v1/responses", api_base.trim_end_matches('/'));
    let body = json!({
        "model": MODEL,
        "input": [
            { "role": "system", "content": system },
            { "role": "user", "content": user },
        ],
        "text": {
            "format": {
                "type": "json_schema",
                "name": "cro_audit_report",
                "schema": report_json_schema(),
                "strict": true,
            },
        },
    });

    let response = client
        .post(&url)
        .bearer_auth(api_key)
        .json(&body)
        .timeout(MODEL_TIMEOUT)
        .send()
        .await
        .map_err(|e| ModelError::Hard(format!("model request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS || is_quota_message(&detail) {
            return Err(ModelError::Soft(format!(
                "model quota exhausted ({status})"
            )));
        }
        return Err(ModelError::Hard(format!(
            "model request failed with status {status}"
        )));
    }

    let value: Value = response
        .json()
        .await
        .map_err(|e| ModelError::Hard(format!("model response unreadable: {e}")))?;
    Ok(extract_output_text(&value))
}

/* ── generation loop ── */

/// Drive the two-attempt loop over an arbitrary model call. Split out
/// from the HTTP plumbing so the attempt discipline (first attempt, one
/// repair re-prompt, then mock) is testable with a stubbed model.
pub async fn run_report_attempts<F, Fut>(
    scraped: &ScrapedPage,
    user_prompt: String,
    mut call: F,
) -> anyhow::Result<GeneratedReport>
where
    F: FnMut(String, String) -> Fut,
    Fut: Future<Output = Result<Option<String>, ModelError>>,
{
    let first = match call(SYSTEM_PROMPT.to_string(), user_prompt).await {
        Ok(text) => text,
        Err(ModelError::Soft(msg)) => {
            tracing::warn!("model degraded ({}); using mock report", msg);
            return Ok(GeneratedReport {
                report: mock_report(scraped),
                used_mock: true,
            });
        }
        Err(ModelError::Hard(msg)) => return Err(anyhow!(msg)),
    };

    if let Some(text) = first {
        if let Some(report) = validate_report_text(&text) {
            return Ok(GeneratedReport {
                report,
                used_mock: false,
            });
        }

        tracing::warn!("first model response failed validation, attempting repair");
        let repair_user = format!(
            "Invalid JSON to repair:\n{}",
            truncate_chars(&text, REPAIR_INPUT_CAP)
        );
        let repaired = match call(REPAIR_SYSTEM_PROMPT.to_string(), repair_user).await {
            Ok(text) => text,
            Err(ModelError::Soft(msg)) => {
                tracing::warn!("model degraded during repair ({})", msg);
                None
            }
            Err(ModelError::Hard(msg)) => return Err(anyhow!(msg)),
        };
        if let Some(text) = repaired {
            if let Some(report) = validate_report_text(&text) {
                return Ok(GeneratedReport {
                    report,
                    used_mock: false,
                });
            }
        }
    }

    tracing::warn!("model output failed validation twice; falling back to mock report");
    Ok(GeneratedReport {
        report: mock_report(scraped),
        used_mock: true,
    })
}

/// Produce an audit report for a scraped page. Live generation is skipped
/// entirely (straight to mock) when disabled by the caller, by
/// configuration, or when no API key is present.
#[tracing::instrument(skip_all, fields(page_type = ?page_type))]
pub async fn generate_report(
    scraped: &ScrapedPage,
    page_type: PageType,
    use_live: bool,
    config: &AppConfig,
    client: &reqwest::Client,
) -> anyhow::Result<GeneratedReport> {
    let api_key = match &config.openai_api_key {
        Some(key) if use_live && !config.use_mock_ai => key.clone(),
        _ => {
            return Ok(GeneratedReport {
                report: mock_report(scraped),
                used_mock: true,
            })
        }
    };

    let api_base = config.openai_api_base.clone();
    let user_prompt = build_user_prompt(scraped, page_type);
    run_report_attempts(scraped, user_prompt, |system, user| {
        let client = client.clone();
        let api_base = api_base.clone();
        let api_key = api_key.clone();
        async move { call_model(&client, &api_base, &api_key, &system, &user).await }
    })
    .await
}
