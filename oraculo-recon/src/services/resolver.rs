//! Resolution Engine
//!
//! Decides whether a scraped listing refers to a catalog product. Checks run
//! in a fixed order:
//!
//! 1. EAN fast path (accept on equal codes, reject on conflicting EAN-13s)
//! 2. Token extraction from `name + sub_series` and `title + last URL segment`
//! 3. Recall gate: every catalog token needs a (possibly fuzzy) counterpart
//! 4. Identity filter: a missing rare token is disqualifying on its own
//! 5. Series filter: conflicting or missing product line
//! 6. Weighted coverage against the acceptance threshold

use crate::config::MatchingConfig;
use crate::db::products::Product;
use crate::error::RejectReason;
use crate::services::token_normalizer::{TokenNormalizer, TokenSet};
use crate::services::weight_model::WeightTable;
use std::sync::Arc;
use tracing::{debug, warn};

/// Scores closer than this are treated as equal
const SCORE_EPSILON: f64 = 1e-9;

/// Catalog side of a comparison
#[derive(Debug, Clone, Copy)]
pub struct CandidateRef<'a> {
    pub name: &'a str,
    pub sub_series: Option<&'a str>,
    pub ean: Option<&'a str>,
}

impl<'a> From<&'a Product> for CandidateRef<'a> {
    fn from(product: &'a Product) -> Self {
        Self {
            name: &product.name,
            sub_series: product.sub_series.as_deref(),
            ean: product.ean.as_deref(),
        }
    }
}

/// Listing side of a comparison
#[derive(Debug, Clone, Copy)]
pub struct ListingRef<'a> {
    pub title: &'a str,
    pub url: &'a str,
    pub ean: Option<&'a str>,
}

/// Verdict for one candidate/listing pair
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Accepted {
        score: f64,
        reason: String,
        /// Total weight of matched identity tokens; tie-break key
        specificity: f64,
        /// Decided by the EAN fast path
        via_ean: bool,
    },
    Rejected {
        score: f64,
        reason: RejectReason,
        detail: String,
    },
}

impl MatchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MatchOutcome::Accepted { .. })
    }

    pub fn score(&self) -> f64 {
        match self {
            MatchOutcome::Accepted { score, .. } | MatchOutcome::Rejected { score, .. } => *score,
        }
    }

    /// Human-readable explanation
    pub fn reason(&self) -> String {
        match self {
            MatchOutcome::Accepted { reason, .. } => reason.clone(),
            MatchOutcome::Rejected { detail, .. } => detail.clone(),
        }
    }
}

/// Best verdict across the whole catalog
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Accepted {
        product_id: i64,
        score: f64,
        reason: String,
    },
    Rejected {
        /// Highest-scoring refusal, if the catalog was not empty
        closest: Option<ClosestCandidate>,
    },
    AmbiguousTie {
        score: f64,
        candidates: Vec<i64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosestCandidate {
    pub product_id: i64,
    pub score: f64,
    pub reason: RejectReason,
    pub detail: String,
}

impl Resolution {
    pub fn best_score(&self) -> f64 {
        match self {
            Resolution::Accepted { score, .. } | Resolution::AmbiguousTie { score, .. } => *score,
            Resolution::Rejected { closest } => closest.as_ref().map_or(0.0, |c| c.score),
        }
    }
}

/// Result of comparing the two EAN fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EanCheck {
    Match(String),
    Mismatch,
    /// Missing, malformed or legacy codes that differ; use the name
    Inconclusive,
}

/// Compare EANs after stripping non-digits
pub fn compare_eans(db_ean: Option<&str>, scraped_ean: Option<&str>) -> EanCheck {
    let (Some(db), Some(scraped)) = (db_ean.map(digits_only), scraped_ean.map(digits_only)) else {
        return EanCheck::Inconclusive;
    };
    if db.is_empty() || scraped.is_empty() {
        return EanCheck::Inconclusive;
    }

    if db == scraped {
        if db.len() == 13 {
            return EanCheck::Match("EAN-13 match".to_string());
        }
        if db.len() >= 8 {
            return EanCheck::Match(format!("GTIN match ({} digits)", db.len()));
        }
        return EanCheck::Inconclusive;
    }

    if db.len() == 13 && scraped.len() == 13 {
        return EanCheck::Mismatch;
    }
    EanCheck::Inconclusive
}

fn digits_only(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// Last non-empty path segment, without a page extension
pub fn url_slug(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let slug = [".html", ".htm", ".php", ".aspx"]
        .iter()
        .find_map(|ext| segment.strip_suffix(ext))
        .unwrap_or(segment);
    Some(slug.to_string())
}

pub struct Resolver {
    normalizer: Arc<TokenNormalizer>,
    settings: MatchingConfig,
}

impl Resolver {
    pub fn new(normalizer: Arc<TokenNormalizer>, settings: MatchingConfig) -> Self {
        Self { normalizer, settings }
    }

    pub fn settings(&self) -> &MatchingConfig {
        &self.settings
    }

    /// Tokens the listing contributes: title plus URL slug
    pub fn listing_tokens(&self, listing: &ListingRef<'_>) -> TokenSet {
        let mut text = listing.title.to_string();
        if let Some(slug) = url_slug(listing.url) {
            text.push(' ');
            text.push_str(&slug);
        }
        self.normalizer.normalize(&text)
    }

    /// Compare one candidate against one listing
    pub fn resolve(
        &self,
        weights: &WeightTable,
        candidate: &CandidateRef<'_>,
        listing: &ListingRef<'_>,
    ) -> MatchOutcome {
        match compare_eans(candidate.ean, listing.ean) {
            EanCheck::Match(reason) => {
                return MatchOutcome::Accepted {
                    score: 1.0,
                    reason,
                    specificity: 0.0,
                    via_ean: true,
                }
            }
            EanCheck::Mismatch => {
                return MatchOutcome::Rejected {
                    score: 0.0,
                    reason: RejectReason::EanMismatch,
                    detail: "EAN mismatch".to_string(),
                }
            }
            EanCheck::Inconclusive => {}
        }

        let mut candidate_text = candidate.name.to_string();
        if let Some(sub) = candidate.sub_series.filter(|s| !s.is_empty()) {
            candidate_text.push(' ');
            candidate_text.push_str(sub);
        }
        let db_tokens = self.normalizer.normalize(&candidate_text);
        let scraped_tokens = self.listing_tokens(listing);
        self.score_tokens(weights, &db_tokens, &scraped_tokens)
    }

    /// Steps 3-6 on already normalized token sets
    pub fn score_tokens(
        &self,
        weights: &WeightTable,
        db_tokens: &TokenSet,
        scraped_tokens: &TokenSet,
    ) -> MatchOutcome {
        if db_tokens.is_empty() || scraped_tokens.is_empty() {
            return MatchOutcome::Rejected {
                score: 0.0,
                reason: RejectReason::NoTokens,
                detail: "No significant tokens to compare".to_string(),
            };
        }

        let mut total_weight = 0.0;
        let mut matched_weight = 0.0;
        let mut specificity = 0.0;
        let mut missing: Vec<&str> = Vec::new();

        for token in db_tokens {
            let weight = weights.weight(token);
            total_weight += weight;

            let similarity = self.similarity(token, scraped_tokens);
            if similarity > 0.0 {
                matched_weight += weight * similarity;
                if weights.is_identity(token) {
                    specificity += weight;
                }
            } else {
                missing.push(token);
            }
        }

        let score = if total_weight > 0.0 {
            matched_weight / total_weight
        } else {
            0.0
        };

        let missing_identity: Vec<&str> = missing
            .iter()
            .copied()
            .filter(|t| weights.is_identity(t))
            .collect();
        if !missing_identity.is_empty() {
            return MatchOutcome::Rejected {
                score,
                reason: RejectReason::IdentityConflict,
                detail: format!(
                    "Identity conflict: {} not found in listing",
                    quote_list(&missing_identity)
                ),
            };
        }

        let db_series = self.normalizer.series_tokens(db_tokens);
        if !db_series.is_empty() && db_series.iter().all(|t| missing.contains(t)) {
            let scraped_series = self.normalizer.series_tokens(scraped_tokens);
            if scraped_series.is_empty() {
                return MatchOutcome::Rejected {
                    score,
                    reason: RejectReason::SeriesMissing,
                    detail: format!(
                        "Series missing: listing never mentions {}",
                        quote_list(&db_series.into_iter().collect::<Vec<_>>())
                    ),
                };
            }
            return MatchOutcome::Rejected {
                score,
                reason: RejectReason::SeriesConflict,
                detail: format!(
                    "Series conflict: catalog {} vs listing {}",
                    quote_list(&db_series.into_iter().collect::<Vec<_>>()),
                    quote_list(&scraped_series.into_iter().collect::<Vec<_>>())
                ),
            };
        }

        if !missing.is_empty() {
            return MatchOutcome::Rejected {
                score,
                reason: RejectReason::MissingTokens,
                detail: format!("Missing tokens: {}", quote_list(&missing)),
            };
        }

        if score >= self.settings.accept_threshold {
            MatchOutcome::Accepted {
                score,
                reason: format!("Weighted coverage {:.2}", score),
                specificity,
                via_ean: false,
            }
        } else {
            MatchOutcome::Rejected {
                score,
                reason: RejectReason::InsufficientCoverage,
                detail: format!(
                    "Insufficient coverage: {:.2} < {:.2}",
                    score, self.settings.accept_threshold
                ),
            }
        }
    }

    /// 1.0 for an exact hit, the edit-distance ratio for a tolerated typo,
    /// otherwise 0.0
    fn similarity(&self, token: &str, scraped: &TokenSet) -> f64 {
        if scraped.contains(token) {
            return 1.0;
        }
        if !fuzzy_eligible(token) {
            return 0.0;
        }
        scraped
            .iter()
            .filter(|other| fuzzy_eligible(other))
            .map(|other| strsim::normalized_levenshtein(token, other))
            .filter(|ratio| *ratio >= self.settings.fuzzy_ratio)
            .fold(0.0, f64::max)
    }

    /// Scan the catalog and pick the single best accepted candidate
    ///
    /// Ties on score go to the candidate with more matched identity weight;
    /// a remaining tie is reported, never resolved by iteration order.
    pub fn best_match(
        &self,
        weights: &WeightTable,
        catalog: &[Product],
        listing: &ListingRef<'_>,
    ) -> Resolution {
        let mut best: Vec<(i64, f64, f64, String)> = Vec::new();
        let mut closest: Option<ClosestCandidate> = None;

        for product in catalog {
            match self.resolve(weights, &CandidateRef::from(product), listing) {
                MatchOutcome::Accepted {
                    score,
                    reason,
                    specificity,
                    via_ean,
                } => {
                    if via_ean && score >= self.settings.short_circuit_score {
                        debug!(product_id = product.id, url = listing.url, "EAN short-circuit");
                        return Resolution::Accepted {
                            product_id: product.id,
                            score,
                            reason,
                        };
                    }

                    let ordering = best.first().map(|(_, s, spec, _)| compare(score, specificity, *s, *spec));
                    match ordering {
                        None | Some(std::cmp::Ordering::Greater) => {
                            best.clear();
                            best.push((product.id, score, specificity, reason));
                        }
                        Some(std::cmp::Ordering::Equal) => {
                            best.push((product.id, score, specificity, reason));
                        }
                        Some(std::cmp::Ordering::Less) => {}
                    }
                }
                MatchOutcome::Rejected { score, reason, detail } => {
                    if closest.as_ref().map_or(true, |c| score > c.score) {
                        closest = Some(ClosestCandidate {
                            product_id: product.id,
                            score,
                            reason,
                            detail,
                        });
                    }
                }
            }
        }

        match best.len() {
            0 => Resolution::Rejected { closest },
            1 => {
                let (product_id, score, _, reason) = best.remove(0);
                Resolution::Accepted {
                    product_id,
                    score,
                    reason,
                }
            }
            _ => {
                let candidates: Vec<i64> = best.iter().map(|(id, ..)| *id).collect();
                let score = best[0].1;
                warn!(
                    url = listing.url,
                    score,
                    candidates = ?candidates,
                    "Ambiguous match: equal scores and specificity"
                );
                Resolution::AmbiguousTie { score, candidates }
            }
        }
    }
}

fn compare(score: f64, specificity: f64, best_score: f64, best_specificity: f64) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    if (score - best_score).abs() > SCORE_EPSILON {
        return if score > best_score { Ordering::Greater } else { Ordering::Less };
    }
    if (specificity - best_specificity).abs() > SCORE_EPSILON {
        return if specificity > best_specificity { Ordering::Greater } else { Ordering::Less };
    }
    Ordering::Equal
}

/// Edit-distance tolerance is meaningless for short words and model numbers
fn fuzzy_eligible(token: &str) -> bool {
    token.len() >= 4 && !token.chars().any(|c| c.is_ascii_digit())
}

fn quote_list(tokens: &[&str]) -> String {
    tokens
        .iter()
        .map(|t| format!("'{}'", t))
        .collect::<Vec<_>>()
        .join(", ")
}
