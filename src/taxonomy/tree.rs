//! Rank-indexed taxonomy arena.
//!
//! Nodes live in a vector indexed by their server rank (0 and 1 unused, 2 is
//! the root). Parent, child and synonym links are ranks into that vector, so a
//! synonym ring is just a cycle of `synonym` ranks and dropping the tree drops
//! everything at once.
//!
//! A tree is assembled with a [`TreeBuilder`]: records are added in stream order
//! and linked only in [`TreeBuilder::finish`], once every rank is known.
use std::collections::HashMap;

use log::debug;

use crate::protocol::take_quoted;

pub const ROOT_RANK: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonNode {
    pub rank: u32,
    pub name: String,
    pub label: Option<String>,
    /// Taxon ID parsed from an `ID:` entry of the label.
    pub tid: Option<u32>,
    /// `None` for the root and for synonyms.
    pub parent: Option<u32>,
    pub children: Vec<u32>,
    /// Next member of the synonym ring, `None` when the taxon has no synonym.
    pub synonym: Option<u32>,
    /// Sequences attached to this taxon and all its descendants.
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Root,
    Child(u32),
    SynonymOf(u32),
}

/// One decoded `rank&parent&count&"name"[&"label"]` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonRecord {
    pub rank: u32,
    /// Negative values name the taxon this one is a synonym of.
    pub parent: i64,
    pub count: u64,
    pub name: String,
    pub label: Option<String>,
}

impl TaxonRecord {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.splitn(4, '&');
        let mut number = |what: &str| {
            parts
                .next()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .ok_or_else(|| format!("bad {what} in taxon line {line:?}"))
        };
        let rank = number("rank")?;
        let parent = number("parent")?;
        let count = number("count")?;
        let rest = parts.next().unwrap_or_default();

        let (name, after) =
            take_quoted(rest).ok_or_else(|| format!("unquoted name in taxon line {line:?}"))?;
        let label = match after.strip_prefix('&') {
            Some(quoted) => Some(
                take_quoted(quoted)
                    .map(|(label, _)| label)
                    .ok_or_else(|| format!("unquoted label in taxon line {line:?}"))?,
            ),
            None => None,
        };

        Ok(Self {
            rank: u32::try_from(rank).map_err(|_| format!("negative rank in {line:?}"))?,
            parent,
            count: count.max(0) as u64,
            name,
            label,
        })
    }
}

/// Taxon ID carried by a label such as `ID:9606` or `xxx|ID:9606|...`.
pub fn label_tid(label: &str) -> Option<u32> {
    let upper = label.to_ascii_uppercase();
    let digits = match upper.strip_prefix("ID:") {
        Some(rest) => rest,
        None => &upper[upper.find("|ID:")? + 4..],
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse().ok().filter(|tid| *tid > 0)
}

#[derive(Debug)]
pub struct TreeBuilder {
    nodes: Vec<Option<TaxonNode>>,
    links: Vec<Option<Link>>,
    order: Vec<u32>,
}

impl TreeBuilder {
    pub fn with_capacity(total: usize) -> Self {
        Self {
            nodes: vec![None; total + 1],
            links: vec![None; total + 1],
            order: Vec::with_capacity(total),
        }
    }

    /// Adds one record. A rank seen before keeps its first record.
    pub fn insert(&mut self, record: TaxonRecord) -> Result<(), String> {
        let rank = record.rank as usize;
        if rank < ROOT_RANK as usize {
            return Err(format!("taxon rank {rank} is reserved"));
        }
        if rank >= self.nodes.len() {
            self.nodes.resize(rank + 1, None);
            self.links.resize(rank + 1, None);
        }
        if self.nodes[rank].is_some() {
            return Ok(());
        }

        let link = if record.rank == ROOT_RANK {
            Link::Root
        } else if record.parent < 0 {
            Link::SynonymOf(rank_from(-record.parent)?)
        } else {
            Link::Child(rank_from(record.parent)?)
        };
        let count = match link {
            Link::SynonymOf(_) => 0,
            _ => record.count,
        };
        let tid = record.label.as_deref().and_then(label_tid);

        self.nodes[rank] = Some(TaxonNode {
            rank: record.rank,
            name: record.name,
            label: record.label,
            tid,
            parent: None,
            children: Vec::new(),
            synonym: None,
            count,
        });
        self.links[rank] = Some(link);
        self.order.push(record.rank);
        Ok(())
    }

    /// Links parents, children and synonym rings, sums counts bottom-up and
    /// names the root `root_name`.
    pub fn finish(mut self, root_name: &str) -> Result<TaxonomyTree, String> {
        if self.nodes.get(ROOT_RANK as usize).is_none_or(Option::is_none) {
            return Err("taxonomy has no root".to_string());
        }

        let order = std::mem::take(&mut self.order);
        for &rank in &order {
            match self.links[rank as usize] {
                Some(Link::Child(parent)) => {
                    let Some(parent_node) = self.node_mut(parent) else {
                        return Err(format!("taxon {rank} has unknown parent {parent}"));
                    };
                    parent_node.children.push(rank);
                    if let Some(node) = self.node_mut(rank) {
                        node.parent = Some(parent);
                    }
                }
                Some(Link::SynonymOf(principal)) if principal == rank => {
                    return Err(format!("taxon {rank} is declared a synonym of itself"));
                }
                Some(Link::SynonymOf(principal)) => {
                    let Some(principal_node) = self.node_mut(principal) else {
                        return Err(format!("taxon {rank} is a synonym of unknown {principal}"));
                    };
                    // Splice `rank` in right after `principal`.
                    let next = principal_node.synonym.replace(rank).unwrap_or(principal);
                    if let Some(node) = self.node_mut(rank) {
                        node.synonym = Some(next);
                    }
                }
                Some(Link::Root) | None => {}
            }
        }

        let mut tree = TaxonomyTree {
            nodes: self.nodes,
            tid_to_rank: HashMap::new(),
            max_tid: 0,
        };
        tree.sum_counts();
        if let Some(root) = tree.node_mut(ROOT_RANK) {
            root.name = root_name.to_string();
        }
        tree.index_tids();
        debug!(
            "taxonomy built: {} taxa, max taxon ID {}",
            tree.len(),
            tree.max_tid()
        );
        Ok(tree)
    }

    fn node_mut(&mut self, rank: u32) -> Option<&mut TaxonNode> {
        self.nodes.get_mut(rank as usize).and_then(Option::as_mut)
    }
}

fn rank_from(value: i64) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("taxon reference {value} out of range"))
}

#[derive(Debug, Clone)]
pub struct TaxonomyTree {
    nodes: Vec<Option<TaxonNode>>,
    /// Only IDs some taxon carries; the IDs come from server labels and are
    /// never used to size an allocation.
    tid_to_rank: HashMap<u32, u32>,
    max_tid: u32,
}

impl TaxonomyTree {
    pub fn len(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_tid(&self) -> u32 {
        self.max_tid
    }

    pub fn root(&self) -> Option<&TaxonNode> {
        self.get(ROOT_RANK)
    }

    /// The node stored at `rank`, synonym or not.
    pub fn get(&self, rank: u32) -> Option<&TaxonNode> {
        self.nodes.get(rank as usize).and_then(Option::as_ref)
    }

    /// The parent-bearing member of the synonym ring holding `rank`.
    pub fn resolve(&self, rank: u32) -> Option<&TaxonNode> {
        let start = self.get(rank)?;
        if start.rank == ROOT_RANK {
            return Some(start);
        }
        let mut node = start;
        for _ in 0..self.nodes.len() {
            if node.parent.is_some() {
                return Some(node);
            }
            node = self.get(node.synonym?)?;
            if node.rank == start.rank {
                return None;
            }
        }
        None
    }

    /// Case-insensitive lookup of a taxon name, resolved through synonyms.
    pub fn find_by_name(&self, name: &str) -> Option<&TaxonNode> {
        let name = name.trim();
        let found = self
            .nodes
            .iter()
            .skip(ROOT_RANK as usize + 1)
            .flatten()
            .find(|node| node.name.eq_ignore_ascii_case(name))?;
        self.resolve(found.rank)
    }

    pub fn find_by_tid(&self, tid: u32) -> Option<&TaxonNode> {
        self.resolve(*self.tid_to_rank.get(&tid)?)
    }

    pub fn parent(&self, rank: u32) -> Option<&TaxonNode> {
        self.get(self.resolve(rank)?.parent?)
    }

    pub fn children(&self, rank: u32) -> impl Iterator<Item = &TaxonNode> {
        self.resolve(rank)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|child| self.get(*child))
    }

    /// The other members of the synonym ring holding `rank`, in ring order.
    pub fn synonyms(&self, rank: u32) -> Vec<&TaxonNode> {
        let mut ring = Vec::new();
        let Some(start) = self.get(rank) else {
            return ring;
        };
        let mut next = start.synonym;
        while let Some(member) = next.and_then(|r| self.get(r)) {
            if member.rank == start.rank || ring.len() >= self.nodes.len() {
                break;
            }
            ring.push(member);
            next = member.synonym;
        }
        ring
    }

    /// Ranks from `rank` up to the root, resolved through synonyms.
    pub fn lineage(&self, rank: u32) -> Vec<u32> {
        let mut path = Vec::new();
        let mut current = self.resolve(rank);
        while let Some(node) = current {
            if path.len() >= self.nodes.len() {
                break;
            }
            path.push(node.rank);
            current = node.parent.and_then(|p| self.get(p));
        }
        path
    }

    fn node_mut(&mut self, rank: u32) -> Option<&mut TaxonNode> {
        self.nodes.get_mut(rank as usize).and_then(Option::as_mut)
    }

    /// Adds each node's count into its ancestors, deepest nodes first.
    fn sum_counts(&mut self) {
        let mut preorder = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![ROOT_RANK];
        while let Some(rank) = stack.pop() {
            preorder.push(rank);
            if let Some(node) = self.get(rank) {
                stack.extend(node.children.iter().copied());
            }
        }

        for &rank in preorder.iter().rev() {
            let Some((parent, count)) = self.get(rank).and_then(|n| Some((n.parent?, n.count)))
            else {
                continue;
            };
            if let Some(parent) = self.node_mut(parent) {
                parent.count += count;
            }
        }
    }

    fn index_tids(&mut self) {
        let mut table = HashMap::new();
        for node in self.nodes.iter().flatten() {
            if let Some(tid) = node.tid {
                table.entry(tid).or_insert(node.rank);
            }
        }
        self.max_tid = table.keys().copied().max().unwrap_or(0);
        self.tid_to_rank = table;
    }
}
