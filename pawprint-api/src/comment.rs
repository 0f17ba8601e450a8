use crate::{Error, PostId, Time, UserId, Uuid, Vote, MAX_CONTENT_LEN, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

impl CommentId {
    pub fn stub() -> CommentId {
        CommentId(STUB_UUID)
    }
}

/// One row of a post's flat comment list
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,

    /// None for a direct reply to the post
    pub parent_id: Option<CommentId>,

    pub author_id: UserId,
    pub content: String,
    pub created_at: Time,
    pub edited_at: Option<Time>,

    /// Sum of all active votes on this comment
    pub score: i64,

    /// Vote of the user who fetched this comment, `Vote::None` for anonymous fetches
    pub viewer_vote: Vote,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub id: CommentId,
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,
    pub content: String,
}

impl NewComment {
    pub fn new(post_id: PostId, parent_id: Option<CommentId>, content: String) -> NewComment {
        NewComment {
            id: CommentId(Uuid::new_v4()),
            post_id,
            parent_id,
            content,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_content(&self.content, MAX_CONTENT_LEN)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EditComment {
    pub content: String,
}

impl EditComment {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_content(&self.content, MAX_CONTENT_LEN)
    }
}
