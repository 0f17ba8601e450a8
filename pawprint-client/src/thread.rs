use crate::{
    api::{
        Comment, CommentId, EditComment, Error, ForumApi, NewComment, Post, Vote, VoteTarget,
    },
    build_tree, render, CommentNode, VoteOverlay,
};

/// One post with its comment tree, kept in sync with the forum
///
/// Every change goes through the injected `ForumApi` and is followed by a
/// full re-fetch, so the tree always reflects the server once a call returns.
pub struct ThreadView<A> {
    api: A,
    post: Post,
    comments: Vec<Comment>,
    tree: Vec<CommentNode>,
    overlay: VoteOverlay,
}

impl<A: ForumApi> ThreadView<A> {
    pub async fn open(mut api: A, slug: &str) -> Result<ThreadView<A>, Error> {
        let post = api.fetch_post_by_slug(slug).await?;
        let comments = api.fetch_comments(post.id).await?;
        let tree = build_tree(&comments);
        Ok(ThreadView {
            api,
            post,
            comments,
            tree,
            overlay: VoteOverlay::new(),
        })
    }

    pub fn post(&self) -> &Post {
        &self.post
    }

    /// The flat comment list, as last fetched
    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn tree(&self) -> &[CommentNode] {
        &self.tree
    }

    pub fn api(&mut self) -> &mut A {
        &mut self.api
    }

    pub fn render<R, F>(&self, f: F) -> Vec<R>
    where
        F: FnMut(&CommentNode, usize, Vec<R>) -> R,
    {
        render::render(&self.tree, f)
    }

    /// Re-fetches the post and its comments and rebuilds the tree
    ///
    /// On failure the previous snapshot is kept and all pending local votes
    /// are dropped.
    pub async fn refresh(&mut self) -> Result<(), Error> {
        match self.fetch().await {
            Ok((post, comments)) => {
                self.tree = build_tree(&comments);
                self.post = post;
                self.comments = comments;
                self.overlay.clear();
                Ok(())
            }
            Err(err) => {
                tracing::warn!(?err, post = ?self.post.id, "failed refreshing thread");
                self.overlay.clear();
                Err(err)
            }
        }
    }

    async fn fetch(&mut self) -> Result<(Post, Vec<Comment>), Error> {
        let post = self.api.fetch_post_by_slug(&self.post.slug).await?;
        let comments = self.api.fetch_comments(post.id).await?;
        Ok((post, comments))
    }

    /// Posts a comment and returns its id
    ///
    /// The id is returned once the forum accepted the comment, even if the
    /// following refresh fails and the view keeps its previous snapshot.
    pub async fn reply(
        &mut self,
        parent: Option<CommentId>,
        content: String,
    ) -> Result<CommentId, Error> {
        let comment = NewComment::new(self.post.id, parent, content);
        comment.validate()?;
        let id = self.api.create_comment(comment).await?.id;
        // Already logged by refresh
        let _ = self.refresh().await;
        Ok(id)
    }

    pub async fn edit(&mut self, comment: CommentId, content: String) -> Result<(), Error> {
        let edit = EditComment { content };
        edit.validate()?;
        self.api.edit_comment(comment, edit).await?;
        self.refresh().await
    }

    pub async fn delete(&mut self, comment: CommentId) -> Result<(), Error> {
        self.api.delete_comment(comment).await?;
        self.refresh().await
    }

    pub async fn vote_post(&mut self, vote: Vote) -> Result<(), Error> {
        let server_vote = self.post.viewer_vote;
        self.vote(VoteTarget::Post(self.post.id), server_vote, vote)
            .await
    }

    pub async fn vote_comment(&mut self, comment: CommentId, vote: Vote) -> Result<(), Error> {
        let server_vote = self
            .comments
            .iter()
            .find(|c| c.id == comment)
            .ok_or(Error::NotFound)?
            .viewer_vote;
        self.vote(VoteTarget::Comment(comment), server_vote, vote)
            .await
    }

    async fn vote(&mut self, target: VoteTarget, server_vote: Vote, vote: Vote) -> Result<(), Error> {
        self.overlay.cast(target, server_vote, vote);
        if let Err(err) = self.api.vote(target, vote).await {
            self.overlay.discard(&target);
            return Err(err);
        }
        self.refresh().await
    }

    /// Score to display for `target`, including votes not yet confirmed by a fetch
    pub fn displayed_score(&self, target: &VoteTarget) -> Option<i64> {
        let server_score = match target {
            VoteTarget::Post(p) if *p == self.post.id => self.post.score,
            VoteTarget::Post(_) => return None,
            VoteTarget::Comment(c) => self.comments.iter().find(|comm| comm.id == *c)?.score,
        };
        Some(self.overlay.score(target, server_score))
    }

    /// Vote to display for `target`, including votes not yet confirmed by a fetch
    pub fn displayed_vote(&self, target: &VoteTarget) -> Option<Vote> {
        let server_vote = match target {
            VoteTarget::Post(p) if *p == self.post.id => self.post.viewer_vote,
            VoteTarget::Post(_) => return None,
            VoteTarget::Comment(c) => self.comments.iter().find(|comm| comm.id == *c)?.viewer_vote,
        };
        Some(self.overlay.vote(target, server_vote))
    }

    /// Records a vote locally without sending it, for callers that submit votes themselves
    pub fn predict_vote(&mut self, target: VoteTarget, vote: Vote) -> Result<(), Error> {
        let server_vote = self.displayed_vote(&target).ok_or(Error::NotFound)?;
        self.overlay.cast(target, server_vote, vote);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use pawprint_mock_server::{MockServer, MockSession};
    use tokio::sync::Mutex;

    use super::*;
    use crate::api::{AuthToken, NewPost, NewUser, PostId, PostOrder, UserId};

    struct Forum {
        server: Arc<Mutex<MockServer>>,
        alice: AuthToken,
        bob: AuthToken,
    }

    impl Forum {
        async fn new() -> Forum {
            let server = MockServer::new().shared();
            let (alice, bob) = {
                let mut s = server.lock().await;
                (
                    s.admin_create_user(NewUser::new(String::from("alice"), false))
                        .unwrap(),
                    s.admin_create_user(NewUser::new(String::from("bob"), false))
                        .unwrap(),
                )
            };
            let mut api = MockSession::new(server.clone(), Some(alice));
            api.create_post(NewPost::new(
                String::from("Leash-free parks"),
                String::from("Where can dogs run around?"),
            ))
            .await
            .unwrap();
            Forum { server, alice, bob }
        }

        fn session(&self, tok: AuthToken) -> MockSession {
            MockSession::new(self.server.clone(), Some(tok))
        }
    }

    /// Fails every call once `fail` is set, and only reads once `fail_reads` is
    struct Flaky<A> {
        inner: A,
        fail: bool,
        fail_reads: bool,
    }

    impl<A> Flaky<A> {
        fn new(inner: A) -> Flaky<A> {
            Flaky {
                inner,
                fail: false,
                fail_reads: false,
            }
        }

        fn check(&self) -> Result<(), Error> {
            match self.fail {
                true => Err(Error::Unknown(String::from("connection reset"))),
                false => Ok(()),
            }
        }

        fn check_read(&self) -> Result<(), Error> {
            match self.fail_reads {
                true => Err(Error::Unknown(String::from("read timed out"))),
                false => self.check(),
            }
        }
    }

    #[async_trait]
    impl<A: ForumApi> ForumApi for Flaky<A> {
        async fn whoami(&mut self) -> Result<UserId, Error> {
            self.check()?;
            self.inner.whoami().await
        }
        async fn fetch_posts(&mut self, order: PostOrder) -> Result<Vec<Post>, Error> {
            self.check_read()?;
            self.inner.fetch_posts(order).await
        }
        async fn fetch_post_by_slug(&mut self, slug: &str) -> Result<Post, Error> {
            self.check_read()?;
            self.inner.fetch_post_by_slug(slug).await
        }
        async fn fetch_comments(&mut self, post: PostId) -> Result<Vec<Comment>, Error> {
            self.check_read()?;
            self.inner.fetch_comments(post).await
        }
        async fn create_post(&mut self, post: NewPost) -> Result<Post, Error> {
            self.check()?;
            self.inner.create_post(post).await
        }
        async fn create_comment(&mut self, comment: NewComment) -> Result<Comment, Error> {
            self.check()?;
            self.inner.create_comment(comment).await
        }
        async fn edit_comment(&mut self, id: CommentId, edit: EditComment) -> Result<(), Error> {
            self.check()?;
            self.inner.edit_comment(id, edit).await
        }
        async fn delete_comment(&mut self, id: CommentId) -> Result<(), Error> {
            self.check()?;
            self.inner.delete_comment(id).await
        }
        async fn vote(&mut self, target: VoteTarget, vote: Vote) -> Result<i64, Error> {
            self.check()?;
            self.inner.vote(target, vote).await
        }
    }

    fn contents(view: &ThreadView<impl ForumApi>) -> Vec<String> {
        view.render(|n, depth, children: Vec<Vec<String>>| {
            let mut res = vec![format!("{}{}", "-".repeat(depth), n.comment.content)];
            res.extend(children.into_iter().flatten());
            res
        })
        .concat()
    }

    #[tokio::test]
    async fn replies_and_votes_rebuild_the_tree() {
        let forum = Forum::new().await;
        let mut alice = ThreadView::open(forum.session(forum.alice), "leash-free-parks")
            .await
            .unwrap();
        assert!(alice.tree().is_empty());

        let first = alice.reply(None, String::from("Parc de la Tête d'Or")).await.unwrap();
        let second = alice.reply(None, String::from("Any beach")).await.unwrap();
        alice.reply(Some(first), String::from("Only the north side")).await.unwrap();
        assert_eq!(
            contents(&alice),
            vec!["Parc de la Tête d'Or", "-Only the north side", "Any beach"]
        );
        assert_eq!(alice.post().comment_count, 3);

        let mut bob = ThreadView::open(forum.session(forum.bob), "leash-free-parks")
            .await
            .unwrap();
        bob.vote_comment(second, Vote::Up).await.unwrap();
        assert_eq!(
            contents(&bob),
            vec!["Any beach", "Parc de la Tête d'Or", "-Only the north side"]
        );
        assert_eq!(bob.displayed_score(&VoteTarget::Comment(second)), Some(1));
        assert_eq!(bob.displayed_vote(&VoteTarget::Comment(second)), Some(Vote::Up));

        // alice only sees it after her next refresh
        assert_eq!(alice.displayed_score(&VoteTarget::Comment(second)), Some(0));
        alice.refresh().await.unwrap();
        assert_eq!(alice.displayed_score(&VoteTarget::Comment(second)), Some(1));
        assert_eq!(alice.displayed_vote(&VoteTarget::Comment(second)), Some(Vote::None));
    }

    #[tokio::test]
    async fn deleted_parent_orphans_become_roots() {
        let forum = Forum::new().await;
        let mut view = ThreadView::open(forum.session(forum.alice), "leash-free-parks")
            .await
            .unwrap();
        let parent = view.reply(None, String::from("parent")).await.unwrap();
        view.reply(Some(parent), String::from("child")).await.unwrap();
        view.delete(parent).await.unwrap();
        assert_eq!(contents(&view), vec!["child"]);
        assert_eq!(view.comments().len(), 1);
    }

    #[tokio::test]
    async fn edits_show_up_after_refresh() {
        let forum = Forum::new().await;
        let mut view = ThreadView::open(forum.session(forum.alice), "leash-free-parks")
            .await
            .unwrap();
        let c = view.reply(None, String::from("typo")).await.unwrap();
        view.edit(c, String::from("fixed")).await.unwrap();
        assert_eq!(contents(&view), vec!["fixed"]);
        assert!(view.comments()[0].edited_at.is_some());
        assert_eq!(
            view.edit(c, String::from("  ")).await,
            Err(Error::EmptyString)
        );
    }

    #[tokio::test]
    async fn failed_vote_drops_its_prediction() {
        let forum = Forum::new().await;
        let api = Flaky::new(forum.session(forum.bob));
        let mut view = ThreadView::open(api, "leash-free-parks").await.unwrap();
        let post = VoteTarget::Post(view.post().id);
        view.api().fail = true;
        assert!(view.vote_post(Vote::Up).await.is_err());
        assert_eq!(view.displayed_score(&post), Some(0));
        assert_eq!(view.displayed_vote(&post), Some(Vote::None));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_snapshot_and_drops_predictions() {
        let forum = Forum::new().await;
        let api = Flaky::new(forum.session(forum.bob));
        let mut view = ThreadView::open(api, "leash-free-parks").await.unwrap();
        let c = view.reply(None, String::from("hello")).await.unwrap();
        let target = VoteTarget::Comment(c);

        view.predict_vote(target, Vote::Down).unwrap();
        assert_eq!(view.displayed_score(&target), Some(-1));

        view.api().fail = true;
        assert!(view.refresh().await.is_err());
        assert_eq!(view.displayed_score(&target), Some(0));
        assert_eq!(contents(&view), vec!["hello"]);

        view.api().fail = false;
        view.predict_vote(target, Vote::Up).unwrap();
        view.refresh().await.unwrap();
        assert_eq!(view.displayed_score(&target), Some(0));
    }

    #[tokio::test]
    async fn reply_returns_its_id_when_refresh_fails() {
        let forum = Forum::new().await;
        let mut view = ThreadView::open(Flaky::new(forum.session(forum.alice)), "leash-free-parks")
            .await
            .unwrap();
        view.api().fail_reads = true;
        let c = view.reply(None, String::from("Try the old orchard")).await.unwrap();
        assert!(view.tree().is_empty());

        view.api().fail_reads = false;
        view.refresh().await.unwrap();
        assert_eq!(view.tree()[0].comment.id, c);
        assert_eq!(contents(&view), vec!["Try the old orchard"]);
    }

    #[tokio::test]
    async fn anonymous_viewers_cannot_write() {
        let forum = Forum::new().await;
        let mut view = ThreadView::open(
            MockSession::new(forum.server.clone(), None),
            "leash-free-parks",
        )
        .await
        .unwrap();
        assert_eq!(
            view.reply(None, String::from("hi")).await,
            Err(Error::PermissionDenied)
        );
        assert_eq!(view.vote_post(Vote::Up).await, Err(Error::PermissionDenied));
        assert!(matches!(
            ThreadView::open(MockSession::new(forum.server.clone(), None), "nope").await,
            Err(Error::NotFound)
        ));
    }
}
