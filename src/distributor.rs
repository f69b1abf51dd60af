//! # Link Resolver / Distributor
//!
//! Turns a job into the concrete `(target, quantity)` submissions sent to
//! the provider. Identifier jobs deliver as-is; link-set jobs split their
//! quantity across the links found in the order item annotations.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::models::smm_job::{Model as Job, TargetKind};
use crate::orders::Annotations;

/// Annotation fields scanned for links, in order.
pub const LINK_FIELDS: &[&str] = &["post_links", "reel_links", "links", "post_link", "reel_link"];

/// URL template for bare post identifiers.
const POST_URL_PREFIX: &str = "https://www.instagram.com/p/";

static REEL_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/(reels?|tv)/").expect("static regex"));

static BARE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Post,
    Reel,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Post => "post",
            LinkKind::Reel => "reel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub url: String,
    pub kind: LinkKind,
}

/// One provider submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub target: String,
    pub quantity: i64,
    pub kind: Option<LinkKind>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DistributionError {
    #[error("no links found for link-set job")]
    NoLinks,
    #[error("job target is empty")]
    EmptyTarget,
    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(i64),
    #[error("quantity {quantity} times multiplier {multiplier} overflows")]
    QuantityOverflow { quantity: i64, multiplier: i64 },
}

/// Parse one comma-separated annotation entry.
///
/// Full URLs keep their text and are classified by path; bare identifiers
/// are treated as post shortcodes.
pub fn parse_link_entry(entry: &str) -> Option<Link> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }

    if BARE_ID.is_match(entry) {
        return Some(Link {
            url: format!("{POST_URL_PREFIX}{entry}/"),
            kind: LinkKind::Post,
        });
    }

    let path = Url::parse(entry)
        .or_else(|_| Url::parse(&format!("https://{entry}")))
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| entry.to_string());

    let kind = if REEL_PATH.is_match(&path) {
        LinkKind::Reel
    } else {
        LinkKind::Post
    };

    Some(Link {
        url: entry.to_string(),
        kind,
    })
}

/// Every link in [`LINK_FIELDS`] order, then comma order within a field.
/// Duplicates are kept.
pub fn links_from_annotations(annotations: &Annotations<'_>) -> Vec<Link> {
    LINK_FIELDS
        .iter()
        .flat_map(|field| annotations.item_values(field))
        .flat_map(|value| value.split(','))
        .filter_map(parse_link_entry)
        .collect()
}

/// Raw link annotation captured on the job at ingestion (comma-joined).
pub fn raw_link_annotation(annotations: &Annotations<'_>) -> String {
    LINK_FIELDS
        .iter()
        .flat_map(|field| annotations.item_values(field))
        .collect::<Vec<_>>()
        .join(",")
}

/// Split `quantity` over `n` slots: `quantity / n` each, plus one for the
/// first `quantity % n` slots.
pub fn distribute(quantity: i64, n: usize) -> Vec<i64> {
    if n == 0 {
        return Vec::new();
    }
    let n_i = n as i64;
    let base = quantity / n_i;
    let remainder = (quantity % n_i) as usize;

    (0..n)
        .map(|slot| base + i64::from(slot < remainder))
        .collect()
}

/// Resolve a job's submissions.
///
/// `annotations` are the current order item annotations when the order is
/// still available; otherwise links come from the job's captured value.
/// A fresh multiplier annotation overrides the captured one.
pub fn resolve_targets(
    job: &Job,
    annotations: Option<&Annotations<'_>>,
) -> Result<Vec<ResolvedTarget>, DistributionError> {
    if job.quantity <= 0 {
        return Err(DistributionError::InvalidQuantity(job.quantity));
    }

    match job.target_kind() {
        TargetKind::Username => {
            let target = job.target_value.trim();
            if target.is_empty() {
                return Err(DistributionError::EmptyTarget);
            }
            Ok(vec![ResolvedTarget {
                target: target.to_string(),
                quantity: job.quantity,
                kind: None,
            }])
        }
        TargetKind::LinkSet => {
            let mut links = annotations
                .map(links_from_annotations)
                .unwrap_or_default();
            if links.is_empty() {
                links = job
                    .target_value
                    .split(',')
                    .filter_map(parse_link_entry)
                    .collect();
            }
            if links.is_empty() {
                return Err(DistributionError::NoLinks);
            }

            let multiplier = annotations
                .and_then(|a| a.multiplier())
                .unwrap_or(job.multiplier)
                .max(1) as i64;

            // Every share is at most the quantity, so no share can overflow past this.
            if job.quantity.checked_mul(multiplier).is_none() {
                return Err(DistributionError::QuantityOverflow {
                    quantity: job.quantity,
                    multiplier,
                });
            }

            let shares = distribute(job.quantity, links.len());

            // Fewer units than links leaves trailing links with nothing to deliver.
            Ok(links
                .into_iter()
                .zip(shares)
                .filter(|(_, share)| *share > 0)
                .map(|(link, share)| ResolvedTarget {
                    target: link.url,
                    quantity: share * multiplier,
                    kind: Some(link.kind),
                })
                .collect())
        }
    }
}
