//! AI field proposer
//!
//! Asks the inference boundary for selectors when extraction comes up short,
//! filters the answer, and merges survivors into the shared selector store.
//! All failures degrade to an empty proposal.

use crate::ai::inference::{InferenceClient, InferenceError, InferenceRequest};
use crate::config::AiConfig;
use crate::extract::{FieldSelector, SelectorStore};
use crate::thermal::ThermalGate;
use regex::Regex;
use scraper::Selector;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Whether a proposal call is currently running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalPhase {
    Idle,
    Requesting,
}

/// How the most recent `propose` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// The reply parsed; `added` selectors were new to the store
    Accepted { added: usize },
    /// The call exceeded its timeout
    TimedOut,
    /// Transport failure or an unusable reply
    Rejected,
    /// The thermal gate was closed; no call was made
    Gated,
    /// Too many recent failures; no call was made
    CoolingDown,
}

/// A selector the model proposed for one field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldProposal {
    pub selector: FieldSelector,
    pub confidence: f64,
    pub sample_value: Option<String>,
}

/// Call counters for run statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProposerStats {
    pub calls: u64,
    pub gated: u64,
    pub failed: u64,
}

#[derive(Debug)]
struct ProposerState {
    phase: ProposalPhase,
    last_outcome: Option<ProposalOutcome>,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

#[derive(Debug, Deserialize)]
struct ProposalReply {
    fields: Vec<RawProposal>,
}

#[derive(Debug, Deserialize)]
struct RawProposal {
    name: String,
    selector: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    attribute: Option<String>,
    #[serde(default)]
    sample_value: Option<String>,
}

/// Proposes selectors under the thermal gate and a failure cooldown
pub struct FieldProposer {
    client: Arc<dyn InferenceClient>,
    gate: Arc<ThermalGate>,
    selectors: Arc<SelectorStore>,
    config: AiConfig,
    state: Mutex<ProposerState>,
    calls: AtomicU64,
    gated: AtomicU64,
    failed: AtomicU64,
}

impl FieldProposer {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        gate: Arc<ThermalGate>,
        selectors: Arc<SelectorStore>,
        config: AiConfig,
    ) -> Self {
        Self {
            client,
            gate,
            selectors,
            config,
            state: Mutex::new(ProposerState {
                phase: ProposalPhase::Idle,
                last_outcome: None,
                consecutive_failures: 0,
                cooldown_until: None,
            }),
            calls: AtomicU64::new(0),
            gated: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> ProposalPhase {
        self.lock_state().phase
    }

    pub fn last_outcome(&self) -> Option<ProposalOutcome> {
        self.lock_state().last_outcome
    }

    pub fn stats(&self) -> ProposerStats {
        ProposerStats {
            calls: self.calls.load(Ordering::Relaxed),
            gated: self.gated.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Proposes selectors for a page and merges them into the store
    ///
    /// Returns the best surviving proposal per field; empty when gated, cooling
    /// down, timed out, or the reply was unusable.
    pub async fn propose(
        &self,
        content: &str,
        screenshot: Option<&[u8]>,
        page_type: &str,
    ) -> BTreeMap<String, FieldProposal> {
        if !self.gate.is_permitted() {
            debug!("AI proposal skipped: thermal gate closed");
            self.gated.fetch_add(1, Ordering::Relaxed);
            self.lock_state().last_outcome = Some(ProposalOutcome::Gated);
            return BTreeMap::new();
        }

        {
            let mut state = self.lock_state();
            match state.cooldown_until {
                Some(until) if Instant::now() < until => {
                    debug!("AI proposal skipped: cooling down after failures");
                    state.last_outcome = Some(ProposalOutcome::CoolingDown);
                    return BTreeMap::new();
                }
                Some(_) => {
                    state.cooldown_until = None;
                    state.consecutive_failures = 0;
                }
                None => {}
            }
            state.phase = ProposalPhase::Requesting;
        }

        self.calls.fetch_add(1, Ordering::Relaxed);
        let request = InferenceRequest {
            content: simplify_html(content, self.config.max_content_chars),
            screenshot: screenshot
                .filter(|_| self.config.visual)
                .map(<[u8]>::to_vec),
            instruction: instruction_for(page_type),
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let reply = match tokio::time::timeout(timeout, self.client.infer(&request)).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout(timeout)),
        };

        let (outcome, accepted) = match reply {
            Ok(text) => match parse_reply(&text) {
                Some(raw) => {
                    let accepted = self.filter_proposals(raw);
                    let added = self.selectors.merge(
                        page_type,
                        accepted
                            .iter()
                            .map(|(field, p)| (field.clone(), p.selector.clone())),
                    );
                    if added > 0 {
                        info!(
                            "AI proposed {} new selector(s) for page type '{}'",
                            added, page_type
                        );
                    }
                    (ProposalOutcome::Accepted { added }, accepted)
                }
                None => {
                    warn!("AI reply did not contain a usable field list");
                    (ProposalOutcome::Rejected, BTreeMap::new())
                }
            },
            Err(InferenceError::Timeout(after)) => {
                warn!("AI proposal timed out after {:?}", after);
                (ProposalOutcome::TimedOut, BTreeMap::new())
            }
            Err(e) => {
                warn!("AI proposal failed: {}", e);
                (ProposalOutcome::Rejected, BTreeMap::new())
            }
        };

        self.finish(outcome);
        accepted
    }

    fn finish(&self, outcome: ProposalOutcome) {
        let mut state = self.lock_state();
        state.phase = ProposalPhase::Idle;
        state.last_outcome = Some(outcome);

        if matches!(outcome, ProposalOutcome::Accepted { .. }) {
            state.consecutive_failures = 0;
            return;
        }

        self.failed.fetch_add(1, Ordering::Relaxed);
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.config.failure_threshold {
            let cooldown = Duration::from_secs(self.config.cooldown_secs);
            warn!(
                "AI proposer failed {} times in a row, cooling down for {:?}",
                state.consecutive_failures, cooldown
            );
            state.cooldown_until = Some(Instant::now() + cooldown);
        }
    }

    /// Keeps the most confident valid proposal per field
    fn filter_proposals(&self, raw: Vec<RawProposal>) -> BTreeMap<String, FieldProposal> {
        let mut best: BTreeMap<String, FieldProposal> = BTreeMap::new();

        for proposal in raw {
            if proposal.confidence < self.config.min_confidence {
                debug!(
                    "Dropping low-confidence proposal {} ({:.2})",
                    proposal.selector, proposal.confidence
                );
                continue;
            }
            if let Err(e) = Selector::parse(&proposal.selector) {
                debug!("Dropping unparsable proposal '{}': {}", proposal.selector, e);
                continue;
            }

            let field = canonical_field(&proposal.name);
            if field.is_empty() {
                continue;
            }

            let attribute = proposal
                .attribute
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty() && !a.eq_ignore_ascii_case("text"));

            let candidate = FieldProposal {
                selector: FieldSelector {
                    css: proposal.selector.trim().to_string(),
                    attribute,
                },
                confidence: proposal.confidence,
                sample_value: proposal.sample_value,
            };

            match best.get(&field) {
                Some(existing) if existing.confidence >= candidate.confidence => {}
                _ => {
                    best.insert(field, candidate);
                }
            }
        }

        best
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ProposerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn instruction_for(page_type: &str) -> String {
    format!(
        "Analyze this {page_type} page and find CSS selectors for business contact fields: \
company_name, phone, email, address, website. For fields stored in an attribute \
(for example mailto: or tel: links) give the attribute name. Reply with JSON only:\n\
{{\"fields\": [{{\"name\": \"phone\", \"selector\": \"a[href^='tel:']\", \
\"attribute\": \"href\", \"sample_value\": \"555-0100\", \"confidence\": 0.9}}]}}"
    )
}

/// Maps model field names onto the record's field names
fn canonical_field(name: &str) -> String {
    let normalized = name
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_");

    match normalized.as_str() {
        "name" | "company" | "business_name" | "business" => "company_name".to_string(),
        "telephone" | "phone_number" | "tel" => "phone".to_string(),
        "mail" | "email_address" | "e_mail" => "email".to_string(),
        "url" | "homepage" | "site" => "website".to_string(),
        _ => normalized,
    }
}

/// Extracts the field list from a model reply
///
/// Accepts bare JSON, JSON inside a markdown fence, or JSON embedded in prose.
fn parse_reply(text: &str) -> Option<Vec<RawProposal>> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();

    let parse = |candidate: &str| serde_json::from_str::<ProposalReply>(candidate.trim()).ok();

    if let Some(reply) = parse(text) {
        return Some(reply.fields);
    }

    let fence = FENCE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").ok());
    if let Some(captures) = fence.as_ref().and_then(|re| re.captures(text)) {
        if let Some(reply) = captures.get(1).and_then(|m| parse(m.as_str())) {
            return Some(reply.fields);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    parse(&text[start..=end]).map(|reply| reply.fields)
}

/// Drops non-content markup and truncates to `max_chars` characters
pub fn simplify_html(html: &str, max_chars: usize) -> String {
    static NOISE: OnceLock<Vec<Regex>> = OnceLock::new();

    let patterns = NOISE.get_or_init(|| {
        [
            r"(?is)<script\b.*?</script\s*>",
            r"(?is)<style\b.*?</style\s*>",
            r"(?is)<svg\b.*?</svg\s*>",
            r"(?is)<noscript\b.*?</noscript\s*>",
            r"(?s)<!--.*?-->",
            r#"(?i)\sstyle\s*=\s*"[^"]*""#,
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    });

    let mut simplified = html.to_string();
    for pattern in patterns {
        simplified = pattern.replace_all(&simplified, "").into_owned();
    }

    let collapsed = simplified.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((cut, _)) => collapsed[..cut].to_string(),
        None => collapsed,
    }
}
