use std::{
    collections::{btree_map, BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use pawprint_api::{
    AuthToken, Comment, CommentId, EditComment, Error, ForumApi, NewComment, NewPost, NewUser,
    Post, PostId, PostOrder, Time, User, UserId, Uuid, Vote, VoteTarget, MAX_REPLY_DEPTH,
};
use tokio::sync::Mutex;

/// In-memory forum with the same observable behavior as the real server
pub struct MockServer {
    users: BTreeMap<UserId, User>,
    sessions: HashMap<AuthToken, UserId>,
    posts: BTreeMap<PostId, MockPost>,
    comments: BTreeMap<CommentId, MockComment>,
    votes: HashMap<(UserId, VoteTarget), Vote>,
    last_time: Time,
}

#[derive(Debug)]
struct MockPost {
    slug: String,
    title: String,
    body: String,
    author_id: UserId,
    created_at: Time,
}

#[derive(Debug)]
struct MockComment {
    post_id: PostId,
    parent_id: Option<CommentId>,
    // Number of ancestors
    depth: usize,
    author_id: UserId,
    content: String,
    created_at: Time,
    edited_at: Option<Time>,
    deleted_at: Option<Time>,
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer {
            users: BTreeMap::new(),
            sessions: HashMap::new(),
            posts: BTreeMap::new(),
            comments: BTreeMap::new(),
            votes: HashMap::new(),
            last_time: Utc::now(),
        }
    }

    /// Wraps the server so that several sessions can share it
    pub fn shared(self) -> Arc<Mutex<MockServer>> {
        Arc::new(Mutex::new(self))
    }

    // Strictly increasing, so that creation order is always observable
    fn now(&mut self) -> Time {
        let now = Utc::now();
        self.last_time = match now > self.last_time {
            true => now,
            false => self.last_time + Duration::microseconds(1),
        };
        self.last_time
    }

    fn resolve(&self, tok: AuthToken) -> Result<UserId, Error> {
        self.sessions
            .get(&tok)
            .copied()
            .ok_or(Error::PermissionDenied)
    }

    fn resolve_opt(&self, tok: Option<AuthToken>) -> Result<Option<UserId>, Error> {
        tok.map(|t| self.resolve(t)).transpose()
    }

    fn score(&self, target: VoteTarget) -> i64 {
        self.votes
            .iter()
            .filter(|((_, t), _)| *t == target)
            .map(|(_, v)| v.value())
            .sum()
    }

    fn viewer_vote(&self, viewer: Option<UserId>, target: VoteTarget) -> Vote {
        viewer
            .and_then(|u| self.votes.get(&(u, target)).copied())
            .unwrap_or(Vote::None)
    }

    fn visible_comment(&self, id: &CommentId) -> Option<&MockComment> {
        self.comments.get(id).filter(|c| c.deleted_at.is_none())
    }

    fn post(&self, viewer: Option<UserId>, id: PostId, p: &MockPost) -> Post {
        Post {
            id,
            slug: p.slug.clone(),
            title: p.title.clone(),
            body: p.body.clone(),
            author_id: p.author_id,
            created_at: p.created_at,
            score: self.score(VoteTarget::Post(id)),
            comment_count: self
                .comments
                .values()
                .filter(|c| c.post_id == id && c.deleted_at.is_none())
                .count() as i64,
            viewer_vote: self.viewer_vote(viewer, VoteTarget::Post(id)),
        }
    }

    fn comment(&self, viewer: Option<UserId>, id: CommentId, c: &MockComment) -> Comment {
        Comment {
            id,
            post_id: c.post_id,
            parent_id: c.parent_id,
            author_id: c.author_id,
            content: c.content.clone(),
            created_at: c.created_at,
            edited_at: c.edited_at,
            score: self.score(VoteTarget::Comment(id)),
            viewer_vote: self.viewer_vote(viewer, VoteTarget::Comment(id)),
        }
    }

    /// Creates a user, returning a fresh session token for them
    pub fn admin_create_user(&mut self, u: NewUser) -> Result<AuthToken, Error> {
        u.validate()?;

        if self.users.values().any(|user| user.name == u.name) {
            return Err(Error::NameAlreadyUsed(u.name));
        }

        match self.users.entry(u.id) {
            btree_map::Entry::Occupied(_) => Err(Error::UuidAlreadyUsed(u.id.0)),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(User {
                    id: u.id,
                    name: u.name,
                    is_moderator: u.is_moderator,
                });
                let tok = AuthToken(Uuid::new_v4());
                self.sessions.insert(tok, u.id);
                Ok(tok)
            }
        }
    }

    pub fn unauth(&mut self, tok: AuthToken) -> Result<(), Error> {
        self.sessions
            .remove(&tok)
            .map(|_| ())
            .ok_or(Error::PermissionDenied)
    }

    pub fn whoami(&self, tok: AuthToken) -> Result<UserId, Error> {
        self.resolve(tok)
    }

    pub fn fetch_posts(&self, tok: Option<AuthToken>, order: PostOrder) -> Result<Vec<Post>, Error> {
        let viewer = self.resolve_opt(tok)?;
        let mut posts = self
            .posts
            .iter()
            .map(|(id, p)| self.post(viewer, *id, p))
            .collect::<Vec<_>>();
        match order {
            PostOrder::New => posts.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            PostOrder::Top => posts.sort_by(|a, b| {
                b.score
                    .cmp(&a.score)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            }),
        }
        Ok(posts)
    }

    pub fn fetch_post_by_slug(&self, tok: Option<AuthToken>, slug: &str) -> Result<Post, Error> {
        let viewer = self.resolve_opt(tok)?;
        self.posts
            .iter()
            .find(|(_, p)| p.slug == slug)
            .map(|(id, p)| self.post(viewer, *id, p))
            .ok_or(Error::NotFound)
    }

    pub fn fetch_comments(
        &self,
        tok: Option<AuthToken>,
        post: PostId,
    ) -> Result<Vec<Comment>, Error> {
        let viewer = self.resolve_opt(tok)?;
        let mut comments = self
            .comments
            .iter()
            .filter(|(_, c)| c.post_id == post && c.deleted_at.is_none())
            .map(|(id, c)| self.comment(viewer, *id, c))
            .collect::<Vec<_>>();
        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }

    pub fn create_post(&mut self, tok: AuthToken, p: NewPost) -> Result<Post, Error> {
        let user = self.resolve(tok)?;
        p.validate()?;
        let slug = p.slug()?;
        if self.posts.contains_key(&p.id) {
            return Err(Error::UuidAlreadyUsed(p.id.0));
        }
        if self.posts.values().any(|other| other.slug == slug) {
            return Err(Error::SlugAlreadyUsed(slug));
        }
        let created_at = self.now();
        let post = MockPost {
            slug,
            title: p.title,
            body: p.body,
            author_id: user,
            created_at,
        };
        let res = self.post(Some(user), p.id, &post);
        self.posts.insert(p.id, post);
        Ok(res)
    }

    pub fn create_comment(&mut self, tok: AuthToken, c: NewComment) -> Result<Comment, Error> {
        let user = self.resolve(tok)?;
        c.validate()?;
        if !self.posts.contains_key(&c.post_id) {
            return Err(Error::NotFound);
        }
        if self.comments.contains_key(&c.id) {
            return Err(Error::UuidAlreadyUsed(c.id.0));
        }
        let depth = match c.parent_id {
            None => 0,
            Some(parent) => match self.visible_comment(&parent) {
                Some(p) if p.post_id != c.post_id => return Err(Error::InvalidParent(parent.0)),
                Some(p) if p.depth >= MAX_REPLY_DEPTH => {
                    return Err(Error::ReplyTooDeep {
                        parent: parent.0,
                        max: MAX_REPLY_DEPTH,
                    })
                }
                Some(p) => p.depth + 1,
                None => return Err(Error::InvalidParent(parent.0)),
            },
        };
        let created_at = self.now();
        let comment = MockComment {
            post_id: c.post_id,
            parent_id: c.parent_id,
            depth,
            author_id: user,
            content: c.content,
            created_at,
            edited_at: None,
            deleted_at: None,
        };
        let res = self.comment(Some(user), c.id, &comment);
        self.comments.insert(c.id, comment);
        Ok(res)
    }

    pub fn edit_comment(
        &mut self,
        tok: AuthToken,
        id: CommentId,
        edit: EditComment,
    ) -> Result<(), Error> {
        let user = self.resolve(tok)?;
        edit.validate()?;
        let author = self.visible_comment(&id).ok_or(Error::NotFound)?.author_id;
        if author != user {
            return Err(Error::PermissionDenied);
        }
        let now = self.now();
        if let Some(c) = self.comments.get_mut(&id) {
            c.content = edit.content;
            c.edited_at = Some(now);
        }
        Ok(())
    }

    pub fn delete_comment(&mut self, tok: AuthToken, id: CommentId) -> Result<(), Error> {
        let user = self.resolve(tok)?;
        let author = self.visible_comment(&id).ok_or(Error::NotFound)?.author_id;
        let is_moderator = self.users.get(&user).map_or(false, |u| u.is_moderator);
        if author != user && !is_moderator {
            return Err(Error::PermissionDenied);
        }
        let now = self.now();
        if let Some(c) = self.comments.get_mut(&id) {
            c.deleted_at = Some(now);
        }
        Ok(())
    }

    pub fn vote(&mut self, tok: AuthToken, target: VoteTarget, vote: Vote) -> Result<i64, Error> {
        let user = self.resolve(tok)?;
        let exists = match target {
            VoteTarget::Post(p) => self.posts.contains_key(&p),
            VoteTarget::Comment(c) => self.visible_comment(&c).is_some(),
        };
        if !exists {
            return Err(Error::NotFound);
        }
        match vote {
            Vote::None => self.votes.remove(&(user, target)),
            v => self.votes.insert((user, target), v),
        };
        Ok(self.score(target))
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

/// `ForumApi` session on a shared `MockServer`
#[derive(Clone)]
pub struct MockSession {
    server: Arc<Mutex<MockServer>>,
    token: Option<AuthToken>,
}

impl MockSession {
    pub fn new(server: Arc<Mutex<MockServer>>, token: Option<AuthToken>) -> MockSession {
        MockSession { server, token }
    }

    fn token(&self) -> Result<AuthToken, Error> {
        self.token.ok_or(Error::PermissionDenied)
    }
}

#[async_trait]
impl ForumApi for MockSession {
    async fn whoami(&mut self) -> Result<UserId, Error> {
        self.server.lock().await.whoami(self.token()?)
    }

    async fn fetch_posts(&mut self, order: PostOrder) -> Result<Vec<Post>, Error> {
        self.server.lock().await.fetch_posts(self.token, order)
    }

    async fn fetch_post_by_slug(&mut self, slug: &str) -> Result<Post, Error> {
        self.server.lock().await.fetch_post_by_slug(self.token, slug)
    }

    async fn fetch_comments(&mut self, post: PostId) -> Result<Vec<Comment>, Error> {
        self.server.lock().await.fetch_comments(self.token, post)
    }

    async fn create_post(&mut self, post: NewPost) -> Result<Post, Error> {
        let tok = self.token()?;
        self.server.lock().await.create_post(tok, post)
    }

    async fn create_comment(&mut self, comment: NewComment) -> Result<Comment, Error> {
        let tok = self.token()?;
        self.server.lock().await.create_comment(tok, comment)
    }

    async fn edit_comment(&mut self, comment: CommentId, edit: EditComment) -> Result<(), Error> {
        let tok = self.token()?;
        self.server.lock().await.edit_comment(tok, comment, edit)
    }

    async fn delete_comment(&mut self, comment: CommentId) -> Result<(), Error> {
        let tok = self.token()?;
        self.server.lock().await.delete_comment(tok, comment)
    }

    async fn vote(&mut self, target: VoteTarget, vote: Vote) -> Result<i64, Error> {
        let tok = self.token()?;
        self.server.lock().await.vote(tok, target, vote)
    }
}
