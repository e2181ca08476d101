use std::net::IpAddr;

use crate::expr;
use crate::range::{AddrRange, Bound, RangeRelation, Span};
use crate::rules::RuleSet;
use crate::AddressError;

/// One element of a compiled address list: a range plus the set of rules
/// whose expressions cover it.
#[derive(Clone, Debug)]
pub struct AddressNode {
    range: AddrRange,
    rules: RuleSet,
    dst: Option<Box<AddressSet>>,
}

impl AddressNode {
    pub(crate) fn new(range: AddrRange, rules: RuleSet) -> Self {
        Self {
            range,
            rules,
            dst: None,
        }
    }

    pub fn range(&self) -> &AddrRange {
        &self.range
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// The nested destination container, if the detection driver attached
    /// one after compilation.
    pub fn dst(&self) -> Option<&AddressSet> {
        self.dst.as_deref()
    }

    /// Attaches the destination container consulted after this node
    /// matches on the source side of a rule.
    pub fn set_dst(&mut self, dst: AddressSet) {
        self.dst = Some(Box::new(dst));
    }
}

/// A compiled address container: per family, a sorted sequence of
/// pairwise-disjoint [`AddressNode`]s.
///
/// The `any` list is populated only when an expression was literally
/// `any`; the corresponding full-family ranges are inserted into the v4
/// and v6 lists at the same time, so lookups never need to consult it.
#[derive(Clone, Debug, Default)]
pub struct AddressSet {
    v4: Vec<AddressNode>,
    v6: Vec<AddressNode>,
    any: Vec<AddressNode>,
}

impl AddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a full address expression (negation, nesting, `any`) into
    /// the set, without tagging the produced ranges with a rule id.
    pub fn parse(&mut self, text: &str) -> Result<(), AddressError> {
        self.parse_tagged(text, RuleSet::empty())
    }

    /// Parses a full address expression, tagging every produced range
    /// with the given rule id. This is the loader-facing entry point:
    /// call it once per rule side.
    pub fn parse_rule(&mut self, text: &str, rule: u32) -> Result<(), AddressError> {
        self.parse_tagged(text, RuleSet::single(rule))
    }

    fn parse_tagged(&mut self, text: &str, rules: RuleSet) -> Result<(), AddressError> {
        let mut negative = AddressSet::new();
        let result = expr::parse_into(self, &mut negative, text, false, &rules)
            .and_then(|_| self.merge_not(&negative, &rules));
        if let Err(err) = &result {
            log::warn!("rejected address expression '{}': {}", text, err);
        }
        result
    }

    /// Finds the node containing `addr`, if any. At most one node can
    /// match because the per-family lists are disjoint.
    pub fn lookup(&self, addr: &IpAddr) -> Option<&AddressNode> {
        match addr {
            IpAddr::V4(a) => {
                let value = u32::from(*a);
                let idx = self.v4.partition_point(|node| match node.range {
                    AddrRange::V4 { low, .. } => low <= value,
                    _ => false,
                });
                idx.checked_sub(1)
                    .map(|i| &self.v4[i])
                    .filter(|node| node.range.contains_addr(addr))
            }
            IpAddr::V6(a) => {
                let value = u128::from(*a);
                let idx = self.v6.partition_point(|node| match node.range {
                    AddrRange::V6 { low, .. } => low <= value,
                    _ => false,
                });
                idx.checked_sub(1)
                    .map(|i| &self.v6[i])
                    .filter(|node| node.range.contains_addr(addr))
            }
        }
    }

    pub fn v4(&self) -> &[AddressNode] {
        &self.v4
    }

    pub fn v6(&self) -> &[AddressNode] {
        &self.v6
    }

    pub fn any(&self) -> &[AddressNode] {
        &self.any
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty() && self.any.is_empty()
    }

    /// Inserts one parsed range. `any` lands in the `any` list and also
    /// expands to the full v4 and v6 spaces so that lookups work
    /// uniformly across families.
    pub(crate) fn add_range(&mut self, range: AddrRange, rules: &RuleSet) -> Result<(), AddressError> {
        match range {
            AddrRange::Any => {
                insert_node(&mut self.any, AddressNode::new(AddrRange::Any, rules.clone()))?;
                insert_node(
                    &mut self.v4,
                    AddressNode::new(AddrRange::v4_all(), rules.clone()),
                )?;
                insert_node(
                    &mut self.v6,
                    AddressNode::new(AddrRange::v6_all(), rules.clone()),
                )
            }
            AddrRange::V4 { .. } => {
                insert_node(&mut self.v4, AddressNode::new(range, rules.clone()))
            }
            AddrRange::V6 { .. } => {
                insert_node(&mut self.v6, AddressNode::new(range, rules.clone()))
            }
        }
    }

    /// Resolves the negated half of an expression against this set.
    ///
    /// A pure negation covers everything it does not name, so an empty
    /// positive family list is first seeded with the full address space.
    /// Inserting the negative ranges then fragments the positive list at
    /// their boundaries, which reduces the removal step to a membership
    /// test: drop every positive node equal to or inside a negative
    /// range.
    fn merge_not(&mut self, negative: &AddressSet, rules: &RuleSet) -> Result<(), AddressError> {
        if self.v4.is_empty() && !negative.v4.is_empty() {
            insert_node(
                &mut self.v4,
                AddressNode::new(AddrRange::v4_all(), rules.clone()),
            )?;
        }
        if self.v6.is_empty() && !negative.v6.is_empty() {
            insert_node(
                &mut self.v6,
                AddressNode::new(AddrRange::v6_all(), rules.clone()),
            )?;
        }

        for node in &negative.v4 {
            insert_node(
                &mut self.v4,
                AddressNode::new(node.range, node.rules.clone()),
            )?;
        }
        for node in &negative.v6 {
            insert_node(
                &mut self.v6,
                AddressNode::new(node.range, node.rules.clone()),
            )?;
        }

        self.v4.retain(|kept| !negative.v4.iter().any(|neg| excludes(neg, kept)));
        self.v6.retain(|kept| !negative.v6.iter().any(|neg| excludes(neg, kept)));
        Ok(())
    }
}

/// Whether a negative range removes a (pre-fragmented) positive node.
fn excludes(negative: &AddressNode, positive: &AddressNode) -> bool {
    matches!(
        negative.range.compare(&positive.range),
        Ok(RangeRelation::Equal) | Ok(RangeRelation::Contains)
    )
}

/// Inserts `new` into a sorted, disjoint list, cutting overlaps.
///
/// Equal bounds merge rule sets. A disjoint range splices in at its
/// ordered position. Any overlap removes the incumbent, carves the union
/// of the two ranges into disjoint pieces with the proper rule sets, and
/// reinserts the pieces; every reinsertion strictly shrinks the overlap
/// left to resolve, so the recursion terminates.
fn insert_node(list: &mut Vec<AddressNode>, new: AddressNode) -> Result<(), AddressError> {
    let mut idx = 0;
    while idx < list.len() {
        match new.range.compare(&list[idx].range)? {
            RangeRelation::Equal => {
                list[idx].rules = list[idx].rules.union(&new.rules);
                return Ok(());
            }
            RangeRelation::Before => {
                list.insert(idx, new);
                return Ok(());
            }
            RangeRelation::After => idx += 1,
            relation => {
                let cur = list.remove(idx);
                for piece in cut_nodes(cur, new, relation)? {
                    insert_node(list, piece)?;
                }
                return Ok(());
            }
        }
    }
    list.push(new);
    Ok(())
}

/// Carves two overlapping same-family nodes into disjoint pieces.
/// `relation` is the relation of `new` to `cur`.
fn cut_nodes(
    cur: AddressNode,
    new: AddressNode,
    relation: RangeRelation,
) -> Result<Vec<AddressNode>, AddressError> {
    match (cur.range, new.range) {
        (
            AddrRange::V4 { low: cl, high: ch },
            AddrRange::V4 { low: nl, high: nh },
        ) => Ok(cut_spans(
            Span::new(cl, ch),
            cur.rules,
            Span::new(nl, nh),
            new.rules,
            relation,
        )
        .into_iter()
        .map(|(span, rules)| {
            AddressNode::new(
                AddrRange::V4 {
                    low: span.low,
                    high: span.high,
                },
                rules,
            )
        })
        .collect()),
        (
            AddrRange::V6 { low: cl, high: ch },
            AddrRange::V6 { low: nl, high: nh },
        ) => Ok(cut_spans(
            Span::new(cl, ch),
            cur.rules,
            Span::new(nl, nh),
            new.rules,
            relation,
        )
        .into_iter()
        .map(|(span, rules)| {
            AddressNode::new(
                AddrRange::V6 {
                    low: span.low,
                    high: span.high,
                },
                rules,
            )
        })
        .collect()),
        _ => Err(AddressError::FamilyMismatch),
    }
}

/// Splits `cur ∪ new` into two or three disjoint spans. The span covered
/// by both inherits the union of the rule sets; a span covered by only
/// one side inherits that side's set alone.
fn cut_spans<T: Bound>(
    cur: Span<T>,
    cur_rules: RuleSet,
    new: Span<T>,
    new_rules: RuleSet,
    relation: RangeRelation,
) -> Vec<(Span<T>, RuleSet)> {
    let shared = cur_rules.union(&new_rules);
    let mut pieces = Vec::with_capacity(3);
    match relation {
        RangeRelation::Inside => {
            if cur.low < new.low {
                pieces.push((Span::new(cur.low, new.low.prev_value()), cur_rules.clone()));
            }
            pieces.push((new, shared));
            if new.high < cur.high {
                pieces.push((Span::new(new.high.next_value(), cur.high), cur_rules));
            }
        }
        RangeRelation::Contains => {
            if new.low < cur.low {
                pieces.push((Span::new(new.low, cur.low.prev_value()), new_rules.clone()));
            }
            pieces.push((cur, shared));
            if cur.high < new.high {
                pieces.push((Span::new(cur.high.next_value(), new.high), new_rules));
            }
        }
        RangeRelation::OverlapsLeft => {
            pieces.push((Span::new(new.low, cur.low.prev_value()), new_rules));
            pieces.push((Span::new(cur.low, new.high), shared));
            pieces.push((Span::new(new.high.next_value(), cur.high), cur_rules));
        }
        RangeRelation::OverlapsRight => {
            pieces.push((Span::new(cur.low, new.low.prev_value()), cur_rules));
            pieces.push((Span::new(new.low, cur.high), shared));
            pieces.push((Span::new(cur.high.next_value(), new.high), new_rules));
        }
        // Equal, Before and After never reach the cut path; putting both
        // nodes back unchanged keeps the fallback loss-free.
        _ => {
            pieces.push((cur, cur_rules));
            pieces.push((new, new_rules));
        }
    }
    pieces
}
