//! Folding of image pull frames into progress events
//!
//! The engine reports a pull as a stream of per-layer status lines. The
//! tracker keeps the latest state of every layer and derives a phase and an
//! overall percentage after each frame.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::models::PullFrame;
use crate::jobs::{LayerProgress, ProgressDetail, ProgressEvent, PullDetail, PullPhase};

/// Final value of a `docker.pull` job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullOutcome {
    #[serde(rename = "ref")]
    pub image_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub status: PullResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullResult {
    AlreadyExists,
    Downloaded,
}

/// Map a status line to a phase; first match wins
pub fn infer_phase(status: &str) -> Option<PullPhase> {
    let status = status.to_ascii_lowercase();
    if status.contains("downloading") {
        Some(PullPhase::Downloading)
    } else if status.contains("extracting") {
        Some(PullPhase::Extracting)
    } else if status.contains("verifying") {
        Some(PullPhase::Verifying)
    } else if status.contains("pull complete") || status.contains("download complete") {
        Some(PullPhase::Done)
    } else if status.contains("waiting") {
        Some(PullPhase::Waiting)
    } else {
        None
    }
}

/// `floor(current / total * 100)` clamped to 100, when `total > 0`
pub fn layer_percent(current: Option<u64>, total: Option<u64>) -> Option<u8> {
    let total = total.filter(|t| *t > 0)?;
    let current = current.unwrap_or(0) as u128;
    Some((current * 100 / total as u128).min(100) as u8)
}

/// Overall pull percentage across layers
///
/// Byte-weighted over layers with a known total; otherwise the share of
/// completed layers. `None` when no layer has been seen yet.
pub fn overall_percent(layers: &BTreeMap<String, LayerProgress>) -> Option<u8> {
    if layers.is_empty() {
        return None;
    }

    let (done, total) = layers
        .values()
        .filter_map(|layer| {
            let total = layer.total.filter(|t| *t > 0)?;
            Some((layer.current.unwrap_or(0).min(total) as u128, total as u128))
        })
        .fold((0u128, 0u128), |(d, t), (cd, ct)| (d + cd, t + ct));

    if total > 0 {
        return Some((done * 100 / total).min(100) as u8);
    }

    let complete = layers.values().filter(|layer| layer.is_complete()).count();
    Some((complete * 100 / layers.len()) as u8)
}

/// The "Pulling from library/x" banner carries the tag as its id
fn is_banner(status: &str) -> bool {
    status.starts_with("Pulling from")
}

/// Running state of one image pull
#[derive(Debug, Clone)]
pub struct PullTracker {
    image_ref: String,
    phase: PullPhase,
    layers: BTreeMap<String, LayerProgress>,
    already_exists: bool,
    digest: Option<String>,
}

impl PullTracker {
    pub fn new(image_ref: impl Into<String>) -> Self {
        Self {
            image_ref: image_ref.into(),
            phase: PullPhase::Resolving,
            layers: BTreeMap::new(),
            already_exists: false,
            digest: None,
        }
    }

    pub fn phase(&self) -> PullPhase {
        self.phase
    }

    pub fn layers(&self) -> &BTreeMap<String, LayerProgress> {
        &self.layers
    }

    /// Fold one frame and return the progress event describing the new state
    pub fn apply(&mut self, frame: &PullFrame) -> ProgressEvent {
        let status = frame.status.as_str();

        if let Some(phase) = infer_phase(status) {
            self.phase = phase;
        }
        if status.to_ascii_lowercase().contains("already exists") {
            self.already_exists = true;
        }
        if let Some(digest) = frame.aux.as_ref().and_then(|aux| aux.digest.clone()) {
            self.digest = Some(digest);
        } else if let Some(digest) = status.strip_prefix("Digest: ") {
            self.digest = Some(digest.trim().to_string());
        }

        if let Some(id) = frame.id.as_deref().filter(|_| !is_banner(status)) {
            let layer = self.layers.entry(id.to_string()).or_default();
            layer.status = Some(status.to_string());
            if let Some(detail) = &frame.progress_detail {
                if let Some(current) = detail.current {
                    layer.current = Some(current.max(0) as u64);
                }
                if let Some(total) = detail.total.filter(|t| *t > 0) {
                    layer.total = Some(total as u64);
                }
            }
            layer.percent = layer_percent(layer.current, layer.total);
        }

        let message = match frame.id.as_deref() {
            Some(id) if !status.is_empty() => format!("{}: {}", id, status),
            _ => status.to_string(),
        };

        ProgressEvent::now(
            Some(message).filter(|m| !m.is_empty()),
            Some(ProgressDetail::Pull(self.detail())),
        )
    }

    /// Current state as an event detail
    pub fn detail(&self) -> PullDetail {
        PullDetail {
            phase: self.phase,
            percent: overall_percent(&self.layers),
            layers: self.layers.clone(),
            image_ref: self.image_ref.clone(),
        }
    }

    /// Final value once the stream has ended cleanly
    pub fn outcome(&self) -> PullOutcome {
        PullOutcome {
            image_ref: self.image_ref.clone(),
            digest: self.digest.clone(),
            status: if self.already_exists {
                PullResult::AlreadyExists
            } else {
                PullResult::Downloaded
            },
        }
    }
}
