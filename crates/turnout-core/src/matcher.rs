//! Probe-vs-directory matching under a distance tolerance.

use crate::types::{Embedding, KnownFace};
use serde::{Deserialize, Serialize};

/// Default maximum embedding distance for a positive match.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Match predicate: two embeddings `distance` apart are the same person.
pub fn is_match(distance: f32, tolerance: f32) -> bool {
    distance <= tolerance
}

/// How to choose among several directory entries within tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Minimum-distance entry, if it is within tolerance.
    #[default]
    Nearest,
    /// First entry in directory order that is within tolerance.
    FirstWithinTolerance,
}

impl std::str::FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "first" | "first_within_tolerance" => Ok(Self::FirstWithinTolerance),
            other => Err(format!("unknown match policy: {other} (expected nearest or first)")),
        }
    }
}

/// A directory entry matched by a probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub identity: String,
    pub distance: f32,
    /// Position of the entry in the directory.
    pub index: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct FaceMatcher {
    pub tolerance: f32,
    pub policy: MatchPolicy,
}

impl Default for FaceMatcher {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            policy: MatchPolicy::default(),
        }
    }
}

impl FaceMatcher {
    pub fn new(tolerance: f32, policy: MatchPolicy) -> Self {
        Self { tolerance, policy }
    }

    /// Find the directory entry for `probe` by Euclidean distance, or `None`
    /// if nobody is within tolerance.
    pub fn find(&self, probe: &Embedding, directory: &[KnownFace]) -> Option<FaceMatch> {
        self.find_by(probe, directory, Embedding::distance)
    }

    /// Like [`find`](Self::find), with the distance supplied by the caller.
    pub fn find_by<D>(&self, probe: &Embedding, directory: &[KnownFace], distance: D) -> Option<FaceMatch>
    where
        D: Fn(&Embedding, &Embedding) -> f32,
    {
        let mut candidates = directory
            .iter()
            .enumerate()
            .map(|(index, known)| (index, known, distance(probe, &known.embedding)))
            .filter(|&(_, _, distance)| is_match(distance, self.tolerance));

        let chosen = match self.policy {
            MatchPolicy::FirstWithinTolerance => candidates.next(),
            MatchPolicy::Nearest => candidates.min_by(|a, b| {
                a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal)
            }),
        };

        chosen.map(|(index, known, distance)| FaceMatch {
            identity: known.identity.clone(),
            distance,
            index,
        })
    }
}
