use crate::CommentNode;

/// Renders a comment forest bottom-up
///
/// `render` is called once per node with the node, its depth (0 for roots)
/// and the already-rendered replies, in display order.
pub fn render<R, F>(nodes: &[CommentNode], mut render: F) -> Vec<R>
where
    F: FnMut(&CommentNode, usize, Vec<R>) -> R,
{
    struct Level<'a, R> {
        nodes: &'a [CommentNode],
        next: usize,
        done: Vec<R>,
    }

    // One level per ancestor of the node being rendered, so depth is
    // bounded by the heap instead of the stack
    let mut levels = vec![Level {
        nodes,
        next: 0,
        done: Vec::with_capacity(nodes.len()),
    }];
    loop {
        let depth = levels.len() - 1;
        let top = match levels.last_mut() {
            Some(top) => top,
            None => return Vec::new(),
        };
        let siblings = top.nodes;
        if let Some(node) = siblings.get(top.next) {
            levels.push(Level {
                nodes: &node.children,
                next: 0,
                done: Vec::with_capacity(node.children.len()),
            });
            continue;
        }
        let finished = match levels.pop() {
            Some(finished) => finished,
            None => return Vec::new(),
        };
        match levels.last_mut() {
            None => return finished.done,
            Some(parent) => {
                let node = &parent.nodes[parent.next];
                parent.done.push(render(node, depth - 1, finished.done));
                parent.next += 1;
            }
        }
    }
}

/// Visits every node in display order (each node before its replies)
pub fn walk<F>(nodes: &[CommentNode], mut visit: F)
where
    F: FnMut(&CommentNode, usize),
{
    let mut stack = nodes.iter().rev().map(|n| (n, 0)).collect::<Vec<_>>();
    while let Some((n, depth)) = stack.pop() {
        visit(n, depth);
        stack.extend(n.children.iter().rev().map(|c| (c, depth + 1)));
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        api::{self, CommentId, PostId, UserId, Uuid, Vote},
        build_tree,
    };

    fn comment(n: u128, parent: Option<u128>, score: i64) -> api::Comment {
        api::Comment {
            id: CommentId(Uuid::from_u128(n)),
            post_id: PostId::stub(),
            parent_id: parent.map(|p| CommentId(Uuid::from_u128(p))),
            author_id: UserId::stub(),
            content: format!("c{n}"),
            created_at: Utc::now(),
            edited_at: None,
            score,
            viewer_vote: Vote::None,
        }
    }

    fn forest() -> Vec<CommentNode> {
        build_tree(&[
            comment(1, None, 1),
            comment(2, Some(1), 0),
            comment(3, Some(2), 0),
            comment(4, None, 5),
        ])
    }

    #[test]
    fn render_nests_children() {
        let html = render(&forest(), |n, _, children| {
            format!("<li>{}<ul>{}</ul></li>", n.comment.content, children.concat())
        });
        assert_eq!(
            html.concat(),
            "<li>c4<ul></ul></li><li>c1<ul><li>c2<ul><li>c3<ul></ul></li></ul></li></ul></li>"
        );
    }

    #[test]
    fn render_passes_depth() {
        let depths = render(&forest(), |n, depth, children: Vec<Vec<(String, usize)>>| {
            let mut res = vec![(n.comment.content.clone(), depth)];
            res.extend(children.into_iter().flatten());
            res
        });
        assert_eq!(
            depths.concat(),
            vec![
                (String::from("c4"), 0),
                (String::from("c1"), 0),
                (String::from("c2"), 1),
                (String::from("c3"), 2),
            ]
        );
    }

    #[test]
    fn walk_is_preorder() {
        let mut lines = Vec::new();
        walk(&forest(), |n, depth| {
            lines.push(format!("{}{}", "  ".repeat(depth), n.comment.content))
        });
        assert_eq!(lines, vec!["c4", "c1", "  c2", "    c3"]);
    }
}
