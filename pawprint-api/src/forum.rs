use async_trait::async_trait;

use crate::{
    Comment, CommentId, EditComment, Error, NewComment, NewPost, Post, PostId, PostOrder, UserId,
    Vote, VoteTarget,
};

/// Data access for one forum session
///
/// Implementations are bound to the acting user (or to nobody, for anonymous
/// browsing), so every call acts on behalf of that user.
#[async_trait]
pub trait ForumApi: Send {
    async fn whoami(&mut self) -> Result<UserId, Error>;

    async fn fetch_posts(&mut self, order: PostOrder) -> Result<Vec<Post>, Error>;

    async fn fetch_post_by_slug(&mut self, slug: &str) -> Result<Post, Error>;

    /// Visible comments of `post`, in ascending creation order
    async fn fetch_comments(&mut self, post: PostId) -> Result<Vec<Comment>, Error>;

    async fn create_post(&mut self, post: NewPost) -> Result<Post, Error>;

    async fn create_comment(&mut self, comment: NewComment) -> Result<Comment, Error>;

    async fn edit_comment(&mut self, comment: CommentId, edit: EditComment) -> Result<(), Error>;

    async fn delete_comment(&mut self, comment: CommentId) -> Result<(), Error>;

    /// Sets the current user's vote on `target`, returning the target's new score
    async fn vote(&mut self, target: VoteTarget, vote: Vote) -> Result<i64, Error>;
}
