use std::{cmp::Reverse, collections::HashMap};

use crate::api::{self, CommentId};

/// A comment together with its ranked replies
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommentNode {
    pub comment: api::Comment,

    /// Replies, best first
    pub children: Vec<CommentNode>,
}

impl CommentNode {
    /// Number of comments in this subtree, this one included
    pub fn count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(n) = stack.pop() {
            count += 1;
            stack.extend(&n.children);
        }
        count
    }

    /// First node with this id, in display order
    pub fn find<'a>(nodes: &'a [CommentNode], id: &CommentId) -> Option<&'a CommentNode> {
        let mut stack = nodes.iter().rev().collect::<Vec<_>>();
        while let Some(n) = stack.pop() {
            if n.comment.id == *id {
                return Some(n);
            }
            stack.extend(n.children.iter().rev());
        }
        None
    }
}

// Iterative: reply chains may be deeper than the stack allows recursion for
impl Drop for CommentNode {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(mut n) = stack.pop() {
            stack.append(&mut n.children);
        }
    }
}

#[derive(Clone, Copy)]
enum Walk {
    Unknown,
    OnPath,
    Rooted,
}

/// Builds the ranked reply forest of one post's flat comment list
///
/// Comments whose parent is missing from `comments` (or is themselves) become
/// roots. If the parent links form a cycle, the cycle is cut where a walk up
/// the parent links, started from the earliest-listed comment that leads
/// into it, first comes back to a comment it already saw. That comment
/// becomes a root, so every comment is returned exactly once. Duplicate ids
/// resolve to the last comment carrying that id.
///
/// Every sibling list is sorted by score, highest first, then by creation
/// date, oldest first. The sort is stable, so full ties keep input order.
pub fn build_tree(comments: &[api::Comment]) -> Vec<CommentNode> {
    let index = comments
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id, i))
        .collect::<HashMap<CommentId, usize>>();

    let mut parents = comments
        .iter()
        .enumerate()
        .map(|(i, c)| {
            c.parent_id
                .and_then(|p| index.get(&p).copied())
                .filter(|&p| p != i)
        })
        .collect::<Vec<Option<usize>>>();

    break_cycles(comments, &mut parents);

    let mut roots = Vec::new();
    let mut children = vec![Vec::new(); comments.len()];
    for (i, p) in parents.iter().enumerate() {
        match p {
            Some(p) => children[*p].push(i),
            None => roots.push(i),
        }
    }

    let rank = |i: &usize| {
        let c = &comments[*i];
        (Reverse(c.score), c.created_at)
    };
    roots.sort_by_key(rank);
    for siblings in children.iter_mut() {
        siblings.sort_by_key(rank);
    }

    materialize(comments, &roots, &children)
}

fn break_cycles(comments: &[api::Comment], parents: &mut [Option<usize>]) {
    let mut state = vec![Walk::Unknown; parents.len()];
    let mut path = Vec::new();
    for start in 0..parents.len() {
        let mut cur = start;
        loop {
            match state[cur] {
                Walk::Rooted => break,
                Walk::OnPath => {
                    tracing::warn!(
                        comment = ?comments[cur].id,
                        "reply cycle in comment list, promoting comment to root"
                    );
                    parents[cur] = None;
                    break;
                }
                Walk::Unknown => {
                    state[cur] = Walk::OnPath;
                    path.push(cur);
                    match parents[cur] {
                        Some(p) => cur = p,
                        None => break,
                    }
                }
            }
        }
        for i in path.drain(..) {
            state[i] = Walk::Rooted;
        }
    }
}

// Children always come after their parent in preorder, so walking it
// backwards finishes every node before it is moved into its parent
fn materialize(
    comments: &[api::Comment],
    roots: &[usize],
    children: &[Vec<usize>],
) -> Vec<CommentNode> {
    let mut preorder = Vec::with_capacity(comments.len());
    let mut stack = roots.iter().rev().copied().collect::<Vec<_>>();
    while let Some(i) = stack.pop() {
        preorder.push(i);
        stack.extend(children[i].iter().rev());
    }

    let mut built = comments.iter().map(|_| None).collect::<Vec<Option<CommentNode>>>();
    for &i in preorder.iter().rev() {
        let node = CommentNode {
            comment: comments[i].clone(),
            children: children[i].iter().filter_map(|&c| built[c].take()).collect(),
        };
        built[i] = Some(node);
    }
    roots.iter().filter_map(|&r| built[r].take()).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::api::{PostId, UserId, Uuid, Vote};
    use bolero::generator::TypeGenerator;

    fn id(n: u128) -> CommentId {
        CommentId(Uuid::from_u128(n))
    }

    fn comment(n: u128, parent: Option<u128>, score: i64, created: i64) -> api::Comment {
        api::Comment {
            id: id(n),
            post_id: PostId::stub(),
            parent_id: parent.map(id),
            author_id: UserId::stub(),
            content: format!("comment {n}"),
            created_at: Utc.timestamp_opt(1_600_000_000, 0).unwrap() + Duration::seconds(created),
            edited_at: None,
            score,
            viewer_vote: Vote::None,
        }
    }

    fn ids(nodes: &[CommentNode]) -> Vec<CommentId> {
        nodes.iter().map(|n| n.comment.id).collect()
    }

    #[test]
    fn ranks_roots_and_nests_replies() {
        let tree = build_tree(&[
            comment(1, None, 5, 1),
            comment(2, Some(1), 2, 2),
            comment(3, None, 9, 3),
        ]);
        assert_eq!(ids(&tree), vec![id(3), id(1)]);
        assert_eq!(ids(&tree[1].children), vec![id(2)]);
        assert!(tree[0].children.is_empty());
    }

    #[test]
    fn orphan_becomes_root() {
        let tree = build_tree(&[comment(1, Some(404), 0, 1)]);
        assert_eq!(ids(&tree), vec![id(1)]);
    }

    #[test]
    fn empty_input() {
        assert_eq!(build_tree(&[]), vec![]);
    }

    #[test]
    fn self_reference_becomes_root() {
        let tree = build_tree(&[comment(1, Some(1), 0, 1), comment(2, Some(1), 0, 2)]);
        assert_eq!(ids(&tree), vec![id(1)]);
        assert_eq!(ids(&tree[0].children), vec![id(2)]);
    }

    #[test]
    fn cycle_is_broken_at_one_member() {
        // 1 -> 2 -> 3 -> 1, with 4 hanging off 2
        let tree = build_tree(&[
            comment(4, Some(2), 0, 0),
            comment(1, Some(3), 0, 1),
            comment(2, Some(1), 0, 2),
            comment(3, Some(2), 0, 3),
        ]);
        // walking up from 4 reaches 2, 1, 3, then 2 again: 2 is promoted
        assert_eq!(ids(&tree), vec![id(2)]);
        assert_eq!(tree[0].count(), 4);
        assert_eq!(ids(&tree[0].children), vec![id(4), id(3)]);
        assert_eq!(ids(&tree[0].children[1].children), vec![id(1)]);
    }

    #[test]
    fn subtrees_are_ranked_independently() {
        let tree = build_tree(&[
            comment(1, None, 0, 0),
            comment(2, Some(1), 1, 1),
            comment(3, Some(1), 4, 2),
            comment(4, Some(3), -2, 3),
            comment(5, Some(3), 7, 4),
            comment(6, Some(3), 7, 5),
        ]);
        assert_eq!(ids(&tree[0].children), vec![id(3), id(2)]);
        assert_eq!(
            ids(&tree[0].children[0].children),
            vec![id(5), id(6), id(4)]
        );
    }

    #[test]
    fn input_order_does_not_matter_for_attachment() {
        let tree = build_tree(&[comment(2, Some(1), 0, 2), comment(1, None, 0, 1)]);
        assert_eq!(ids(&tree), vec![id(1)]);
        assert_eq!(ids(&tree[0].children), vec![id(2)]);
    }

    #[test]
    fn duplicate_ids_attach_to_last() {
        let mut first = comment(1, None, 0, 0);
        first.content = String::from("first");
        let mut second = comment(1, None, 0, 1);
        second.content = String::from("second");
        let tree = build_tree(&[first, second, comment(2, Some(1), 0, 2)]);
        assert_eq!(tree.len(), 2);
        assert!(tree[0].children.is_empty());
        assert_eq!(tree[1].comment.content, "second");
        assert_eq!(ids(&tree[1].children), vec![id(2)]);
    }

    #[test]
    fn find_searches_nested_replies() {
        let tree = build_tree(&[
            comment(1, None, 0, 0),
            comment(2, Some(1), 0, 1),
            comment(3, Some(2), 0, 2),
        ]);
        assert_eq!(CommentNode::find(&tree, &id(3)).map(|n| n.count()), Some(1));
        assert_eq!(CommentNode::find(&tree, &id(2)).map(|n| n.count()), Some(2));
        assert!(CommentNode::find(&tree, &id(9)).is_none());
    }

    #[derive(Clone, Debug, bolero::generator::TypeGenerator)]
    struct FuzzComment {
        id: u8,
        parent: Option<u8>,
        score: i8,
        created: u8,
    }

    fn from_fuzz(comments: &[FuzzComment]) -> Vec<api::Comment> {
        comments
            .iter()
            .map(|c| {
                comment(
                    // keep ids small so that parents and duplicates actually hit
                    u128::from(c.id % 16),
                    c.parent.map(|p| u128::from(p % 20)),
                    i64::from(c.score % 4),
                    i64::from(c.created % 8),
                )
            })
            .collect()
    }

    fn check_siblings(nodes: &[CommentNode]) {
        for pair in nodes.windows(2) {
            let (a, b) = (&pair[0].comment, &pair[1].comment);
            assert!(a.score > b.score || (a.score == b.score && a.created_at <= b.created_at));
        }
        for n in nodes {
            for c in &n.children {
                assert_eq!(c.comment.parent_id, Some(n.comment.id));
            }
            check_siblings(&n.children);
        }
    }

    #[test]
    fn tree_properties() {
        bolero::check!()
            .with_type::<Vec<FuzzComment>>()
            .cloned()
            .for_each(|fuzz| {
                let comments = from_fuzz(&fuzz);
                let tree = build_tree(&comments);

                // every comment is emitted exactly once
                assert_eq!(tree.iter().map(CommentNode::count).sum::<usize>(), comments.len());

                // parentless and orphaned comments are roots
                let last_index = comments
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (c.id, i))
                    .collect::<HashMap<_, _>>();
                for (i, c) in comments.iter().enumerate() {
                    let resolvable = c
                        .parent_id
                        .and_then(|p| last_index.get(&p))
                        .map_or(false, |&p| p != i);
                    if !resolvable {
                        assert!(tree.iter().any(|n| n.comment == *c));
                    }
                }

                check_siblings(&tree);

                // building is deterministic
                assert_eq!(build_tree(&comments), tree);
            })
    }

    #[test]
    fn acyclic_replies_never_become_roots() {
        bolero::check!()
            .with_type::<Vec<(u8, i8)>>()
            .cloned()
            .for_each(|fuzz| {
                // comment i may only reply to an earlier comment, so there are no cycles
                let comments = fuzz
                    .iter()
                    .enumerate()
                    .map(|(i, (parent, score))| {
                        let parent = match (i, *parent) {
                            (0, _) | (_, 0) => None,
                            (i, p) => Some(u128::from(p) % i as u128),
                        };
                        comment(i as u128, parent, i64::from(*score), 0)
                    })
                    .collect::<Vec<_>>();
                let tree = build_tree(&comments);
                let roots = ids(&tree);
                for c in &comments {
                    assert_eq!(roots.contains(&c.id), c.parent_id.is_none());
                }
            })
    }

    #[test]
    fn full_ties_keep_input_order() {
        bolero::check!()
            .with_type::<Vec<u8>>()
            .cloned()
            .for_each(|order| {
                let comments = order
                    .iter()
                    .enumerate()
                    .map(|(i, _)| comment(i as u128, None, 3, 7))
                    .collect::<Vec<_>>();
                let tree = build_tree(&comments);
                assert_eq!(ids(&tree), comments.iter().map(|c| c.id).collect::<Vec<_>>());
            })
    }

    fn chain(len: u128) -> Vec<api::Comment> {
        (0..len)
            .map(|i| comment(i, i.checked_sub(1), 0, i as i64))
            .collect()
    }

    #[test]
    fn very_deep_chains_do_not_overflow() {
        let comments = chain(100_000);
        let tree = build_tree(&comments);
        assert_eq!(ids(&tree), vec![id(0)]);
        assert_eq!(tree[0].count(), 100_000);
        assert_eq!(
            CommentNode::find(&tree, &id(99_999)).map(|n| n.comment.parent_id),
            Some(Some(id(99_998)))
        );
        let depth = crate::render::render(&tree, |_, depth, children: Vec<usize>| {
            children.into_iter().max().unwrap_or(depth)
        });
        assert_eq!(depth, vec![99_999]);
        let mut visited = 0;
        crate::render::walk(&tree, |_, _| visited += 1);
        assert_eq!(visited, 100_000);
        drop(tree);
    }
}
