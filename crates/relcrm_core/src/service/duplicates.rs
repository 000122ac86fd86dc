//! Duplicate detection: candidate scan, pairwise scoring and grouping.
//!
//! # Responsibility
//! - Load every candidate of one user page by page inside one read
//!   transaction, so a scan sees a single consistent snapshot.
//! - Score candidate pairs (all pairs, or only pairs sharing a blocking key
//!   once the candidate count passes the blocking threshold).
//! - Group matches into connected components with union-find.
//!
//! # Invariants
//! - Detection never writes.
//! - Output is deterministic for the same data: members ordered by
//!   `(created_at, id)`, groups ordered by their first member.
//! - Every group has at least two members; the first is the default keeper.

use crate::codec::FieldCodec;
use crate::model::client::{ClientId, MatchCandidate};
use crate::model::UserId;
use crate::repo::client_repo::{ClientRepository, SqliteClientRepository};
use crate::repo::RepoResult;
use crate::service::similarity::{MatchReason, SimilarityScorer};
use log::{info, warn};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Default page size for candidate loading.
pub const DEFAULT_SCAN_PAGE_SIZE: u32 = 500;
/// Default upper bound on candidates examined by one scan.
pub const DEFAULT_MAX_SCAN_CANDIDATES: usize = 20_000;
/// Candidate count above which blocking replaces the full pairwise pass.
pub const DEFAULT_BLOCKING_THRESHOLD: usize = 2_000;

/// One client inside a duplicate group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateMember {
    pub id: ClientId,
    pub name: String,
    pub company_name: String,
    pub emails: Vec<String>,
    #[serde(skip)]
    pub created_at: i64,
}

impl From<&MatchCandidate> for DuplicateMember {
    fn from(candidate: &MatchCandidate) -> Self {
        Self {
            id: candidate.id,
            name: candidate.name.clone(),
            company_name: candidate.company_name.clone(),
            emails: candidate.emails.clone(),
            created_at: candidate.created_at,
        }
    }
}

/// Connected component of the match graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    /// Strongest reason among the component's edges.
    pub match_reason: MatchReason,
    /// Ordered by `(created_at, id)`; the first member is the default keeper.
    pub clients: Vec<DuplicateMember>,
}

impl DuplicateGroup {
    pub fn keeper(&self) -> Option<&DuplicateMember> {
        self.clients.first()
    }
}

/// Disjoint-set forest with path compression and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    pub fn find(&mut self, node: usize) -> usize {
        let mut root = node;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = node;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Merges the sets of `a` and `b`; returns false when already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return false;
        }
        match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Less => self.parent[root_a] = root_b,
            std::cmp::Ordering::Greater => self.parent[root_b] = root_a,
            std::cmp::Ordering::Equal => {
                self.parent[root_b] = root_a;
                self.rank[root_a] = self.rank[root_a].saturating_add(1);
            }
        }
        true
    }
}

/// Accumulates match edges over an indexed candidate list and emits groups.
#[derive(Debug)]
pub struct DuplicateGroupBuilder<'a> {
    candidates: &'a [MatchCandidate],
    sets: UnionFind,
    edges: Vec<(usize, usize, MatchReason)>,
}

impl<'a> DuplicateGroupBuilder<'a> {
    pub fn new(candidates: &'a [MatchCandidate]) -> Self {
        Self {
            candidates,
            sets: UnionFind::new(candidates.len()),
            edges: Vec::new(),
        }
    }

    /// Records a match between candidate indexes `a` and `b`.
    pub fn add_edge(&mut self, a: usize, b: usize, reason: MatchReason) {
        if a == b || a >= self.candidates.len() || b >= self.candidates.len() {
            return;
        }
        self.sets.union(a, b);
        self.edges.push((a, b, reason));
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn finish(mut self) -> Vec<DuplicateGroup> {
        let mut reasons: HashMap<usize, MatchReason> = HashMap::new();
        for &(a, _, reason) in &self.edges {
            let root = self.sets.find(a);
            reasons
                .entry(root)
                .and_modify(|current| *current = current.strongest(reason))
                .or_insert(reason);
        }

        let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
        for index in 0..self.candidates.len() {
            let root = self.sets.find(index);
            if reasons.contains_key(&root) {
                members.entry(root).or_default().push(index);
            }
        }

        let mut groups: Vec<DuplicateGroup> = members
            .into_iter()
            .filter(|(_, indexes)| indexes.len() >= 2)
            .filter_map(|(root, indexes)| {
                let match_reason = *reasons.get(&root)?;
                let mut clients: Vec<DuplicateMember> = indexes
                    .iter()
                    .map(|&index| DuplicateMember::from(&self.candidates[index]))
                    .collect();
                clients.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
                Some(DuplicateGroup {
                    match_reason,
                    clients,
                })
            })
            .collect();

        groups.sort_by(|a, b| {
            let left = a.clients.first().map(|m| (m.created_at, m.id));
            let right = b.clients.first().map(|m| (m.created_at, m.id));
            left.cmp(&right)
        });
        groups
    }
}

/// Scan tunables.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub page_size: u32,
    pub max_candidates: usize,
    pub blocking_threshold: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_SCAN_PAGE_SIZE,
            max_candidates: DEFAULT_MAX_SCAN_CANDIDATES,
            blocking_threshold: DEFAULT_BLOCKING_THRESHOLD,
        }
    }
}

/// Result of one detection pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    pub groups: Vec<DuplicateGroup>,
    pub scanned: usize,
    /// True when `max_candidates` stopped the scan early.
    pub truncated: bool,
    pub blocked: bool,
}

/// Scores every eligible pair of `candidates` and groups the matches.
///
/// Pure over its input; `blocking_threshold` picks the pairing strategy.
pub fn find_duplicate_groups(
    scorer: &SimilarityScorer,
    candidates: &[MatchCandidate],
    blocking_threshold: usize,
) -> Vec<DuplicateGroup> {
    let mut builder = DuplicateGroupBuilder::new(candidates);
    for (a, b) in candidate_pairs(scorer, candidates, blocking_threshold) {
        if let Some(reason) = scorer.score(&candidates[a], &candidates[b]) {
            builder.add_edge(a, b, reason);
        }
    }
    builder.finish()
}

fn candidate_pairs(
    scorer: &SimilarityScorer,
    candidates: &[MatchCandidate],
    blocking_threshold: usize,
) -> Vec<(usize, usize)> {
    if candidates.len() <= blocking_threshold {
        let mut pairs = Vec::new();
        for a in 0..candidates.len() {
            for b in (a + 1)..candidates.len() {
                pairs.push((a, b));
            }
        }
        return pairs;
    }

    let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, candidate) in candidates.iter().enumerate() {
        for key in scorer.blocking_keys(candidate) {
            buckets.entry(key).or_default().push(index);
        }
    }
    let mut pairs = BTreeSet::new();
    for indexes in buckets.values() {
        for (offset, &a) in indexes.iter().enumerate() {
            for &b in &indexes[offset + 1..] {
                pairs.insert((a.min(b), a.max(b)));
            }
        }
    }
    pairs.into_iter().collect()
}

/// Read-only detection over one user's clients.
pub struct DuplicateScanService<'a> {
    conn: &'a Connection,
    owner: UserId,
    codec: &'a FieldCodec,
    scorer: SimilarityScorer,
    options: ScanOptions,
}

impl<'a> DuplicateScanService<'a> {
    pub fn new(
        conn: &'a Connection,
        owner: UserId,
        codec: &'a FieldCodec,
        scorer: SimilarityScorer,
        options: ScanOptions,
    ) -> Self {
        Self {
            conn,
            owner,
            codec,
            scorer,
            options,
        }
    }

    pub fn detect(&self) -> RepoResult<DuplicateReport> {
        let tx = self.conn.unchecked_transaction()?;
        let repo = SqliteClientRepository::new(&tx, self.owner, self.codec);
        let (candidates, truncated) = self.load_candidates(&repo)?;
        tx.commit()?;

        let blocked = candidates.len() > self.options.blocking_threshold;
        let groups =
            find_duplicate_groups(&self.scorer, &candidates, self.options.blocking_threshold);
        info!(
            "event=duplicate_scan module=service status=ok user_id={} scanned={} groups={} blocked={} truncated={}",
            self.owner,
            candidates.len(),
            groups.len(),
            blocked,
            truncated
        );
        Ok(DuplicateReport {
            groups,
            scanned: candidates.len(),
            truncated,
            blocked,
        })
    }

    fn load_candidates(
        &self,
        repo: &SqliteClientRepository<'_>,
    ) -> RepoResult<(Vec<MatchCandidate>, bool)> {
        let page_size = self.options.page_size.max(1);
        let mut candidates: Vec<MatchCandidate> = Vec::new();
        let mut cursor = None;
        loop {
            let remaining = self.options.max_candidates.saturating_sub(candidates.len());
            if remaining == 0 {
                let more = !repo.match_candidates_page(cursor, 1)?.is_empty();
                if more {
                    warn!(
                        "event=duplicate_scan module=service status=capped user_id={} max_candidates={}",
                        self.owner, self.options.max_candidates
                    );
                }
                return Ok((candidates, more));
            }

            let limit = page_size.min(u32::try_from(remaining).unwrap_or(u32::MAX));
            let page = repo.match_candidates_page(cursor, limit)?;
            let fetched = page.len();
            cursor = page.last().map(|last| (last.created_at, last.id));
            candidates.extend(page);
            if fetched < limit as usize {
                return Ok((candidates, false));
            }
        }
    }
}
