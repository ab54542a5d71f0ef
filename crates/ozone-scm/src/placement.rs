//! Container placement policies.
//!
//! The policy set is closed and selected by name from configuration; there
//! is no runtime plugin loading.

use ozone_common::{DatanodeDetails, Error, NodeStat, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use uuid::Uuid;

/// A healthy candidate node offered to the policy.
#[derive(Clone, Debug)]
pub struct CandidateNode {
    pub details: DatanodeDetails,
    pub stat: NodeStat,
}

/// Container placement policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlacementPolicy {
    /// Uniform random selection among healthy nodes.
    Random,
    /// Pick-two-choose-less-utilized selection, biased toward free space.
    Capacity,
}

impl PlacementPolicy {
    /// Resolve a policy from its configured name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "random" => Ok(Self::Random),
            "capacity" => Ok(Self::Capacity),
            other => Err(Error::Configuration(format!(
                "unknown placement policy: {other}"
            ))),
        }
    }

    /// Choose `count` distinct datanodes from `candidates`.
    ///
    /// Nodes in `preferred_excluded` (members of existing pipelines of the
    /// same replication type) are avoided when enough other candidates
    /// exist; a pipeline never repeats a node. Fewer than `count` healthy
    /// candidates in total is an allocation failure.
    pub fn choose_datanodes(
        &self,
        candidates: &[CandidateNode],
        count: usize,
        preferred_excluded: &HashSet<Uuid>,
    ) -> Result<Vec<DatanodeDetails>> {
        if candidates.len() < count {
            return Err(Error::InsufficientNodes {
                available: candidates.len(),
                required: count,
            });
        }

        let fresh: Vec<&CandidateNode> = candidates
            .iter()
            .filter(|c| !preferred_excluded.contains(&c.details.uuid))
            .collect();
        let pool: Vec<&CandidateNode> = if fresh.len() >= count {
            fresh
        } else {
            candidates.iter().collect()
        };

        let chosen = match self {
            Self::Random => Self::choose_random(&pool, count),
            Self::Capacity => Self::choose_by_capacity(&pool, count),
        };
        Ok(chosen)
    }

    fn choose_random(pool: &[&CandidateNode], count: usize) -> Vec<DatanodeDetails> {
        let mut rng = rand::thread_rng();
        pool.choose_multiple(&mut rng, count)
            .map(|c| c.details.clone())
            .collect()
    }

    /// Repeatedly sample two distinct nodes and keep the one with more
    /// remaining space, until the pipeline is filled.
    fn choose_by_capacity(pool: &[&CandidateNode], count: usize) -> Vec<DatanodeDetails> {
        let mut rng = rand::thread_rng();
        let mut remaining: Vec<&CandidateNode> = pool.to_vec();
        let mut chosen = Vec::with_capacity(count);
        while chosen.len() < count {
            if remaining.len() == 1 {
                chosen.push(remaining.remove(0).details.clone());
                continue;
            }
            let first = rng.gen_range(0..remaining.len());
            let mut second = rng.gen_range(0..remaining.len() - 1);
            if second >= first {
                second += 1;
            }
            let pick = if remaining[first].stat.remaining >= remaining[second].stat.remaining {
                first
            } else {
                second
            };
            chosen.push(remaining.remove(pick).details.clone());
        }
        chosen
    }
}
