use anyhow::Context;
use chrono::Utc;
use pawprint_api::{
    AuthToken, Comment, CommentId, EditComment, NewComment, NewPost, NewUser, Post, PostId,
    PostOrder, Time, UserId, Uuid, Vote, VoteTarget, MAX_REPLY_DEPTH,
};
use sqlx::{Connection, Row};

use crate::Error;

macro_rules! select_posts {
    ($tail:expr) => {
        concat!(
            "
                SELECT
                    p.id,
                    p.slug,
                    p.title,
                    p.body,
                    p.author_id,
                    p.created_at,
                    COALESCE((
                        SELECT SUM(v.value) FROM post_votes v WHERE v.post_id = p.id
                    ), 0)::BIGINT AS score,
                    (
                        SELECT COUNT(*) FROM comments c
                        WHERE c.post_id = p.id AND c.deleted_at IS NULL
                    ) AS comment_count,
                    COALESCE((
                        SELECT v.value FROM post_votes v
                        WHERE v.post_id = p.id AND v.user_id = $1
                    ), 0)::BIGINT AS viewer_vote
                FROM posts p
            ",
            $tail
        )
    };
}

macro_rules! select_comments {
    ($tail:expr) => {
        concat!(
            "
                SELECT
                    c.id,
                    c.post_id,
                    c.parent_id,
                    c.author_id,
                    c.content,
                    c.created_at,
                    c.edited_at,
                    COALESCE((
                        SELECT SUM(v.value) FROM comment_votes v WHERE v.comment_id = c.id
                    ), 0)::BIGINT AS score,
                    COALESCE((
                        SELECT v.value FROM comment_votes v
                        WHERE v.comment_id = c.id AND v.user_id = $1
                    ), 0)::BIGINT AS viewer_vote
                FROM comments c
                WHERE c.deleted_at IS NULL
            ",
            $tail
        )
    };
}

#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    slug: String,
    title: String,
    body: String,
    author_id: Uuid,
    created_at: Time,
    score: i64,
    comment_count: i64,
    viewer_vote: i64,
}

impl PostRow {
    fn into_post(self) -> anyhow::Result<Post> {
        let id = self.id;
        Ok(Post {
            id: PostId(self.id),
            slug: self.slug,
            title: self.title,
            body: self.body,
            author_id: UserId(self.author_id),
            created_at: self.created_at,
            score: self.score,
            comment_count: self.comment_count,
            viewer_vote: Vote::try_from(self.viewer_vote)
                .with_context(|| format!("post {id} has an invalid stored vote"))?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: Uuid,
    post_id: Uuid,
    parent_id: Option<Uuid>,
    author_id: Uuid,
    content: String,
    created_at: Time,
    edited_at: Option<Time>,
    score: i64,
    viewer_vote: i64,
}

impl CommentRow {
    fn into_comment(self) -> anyhow::Result<Comment> {
        let id = self.id;
        Ok(Comment {
            id: CommentId(self.id),
            post_id: PostId(self.post_id),
            parent_id: self.parent_id.map(CommentId),
            author_id: UserId(self.author_id),
            content: self.content,
            created_at: self.created_at,
            edited_at: self.edited_at,
            score: self.score,
            viewer_vote: Vote::try_from(self.viewer_vote)
                .with_context(|| format!("comment {id} has an invalid stored vote"))?,
        })
    }
}

/// Creates the user and opens a first session for them
pub async fn create_user(conn: &mut sqlx::PgConnection, u: NewUser) -> Result<AuthToken, Error> {
    let mut tx = conn.begin().await.context("starting transaction")?;

    let name_taken = sqlx::query("SELECT 1 FROM users WHERE name = $1")
        .bind(&u.name)
        .fetch_optional(&mut *tx)
        .await
        .context("checking for name conflicts")?
        .is_some();
    if name_taken {
        return Err(Error::name_already_used(u.name));
    }

    let id_taken = sqlx::query("SELECT 1 FROM users WHERE id = $1")
        .bind(u.id.0)
        .fetch_optional(&mut *tx)
        .await
        .context("checking for id conflicts")?
        .is_some();
    if id_taken {
        return Err(Error::uuid_already_used(u.id.0));
    }

    sqlx::query("INSERT INTO users (id, name, is_moderator) VALUES ($1, $2, $3)")
        .bind(u.id.0)
        .bind(&u.name)
        .bind(u.is_moderator)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("inserting user {:?}", u.id))?;

    let token = AuthToken(Uuid::new_v4());
    sqlx::query("INSERT INTO sessions (id, user_id, created_at) VALUES ($1, $2, $3)")
        .bind(token.0)
        .bind(u.id.0)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .with_context(|| format!("opening session for user {:?}", u.id))?;

    tx.commit().await.context("committing transaction")?;
    Ok(token)
}

/// Returns `false` iff the session did not exist
pub async fn logout_user(conn: &mut sqlx::PgConnection, token: AuthToken) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(token.0)
        .execute(conn)
        .await
        .context("deleting session")?;
    Ok(res.rows_affected() > 0)
}

pub async fn recover_session(
    conn: &mut sqlx::PgConnection,
    token: AuthToken,
) -> Result<UserId, Error> {
    let row = sqlx::query("SELECT user_id FROM sessions WHERE id = $1")
        .bind(token.0)
        .fetch_optional(conn)
        .await
        .context("recovering session")?
        .ok_or_else(Error::permission_denied)?;
    Ok(UserId(row.try_get("user_id").context("retrieving the user_id field")?))
}

pub async fn fetch_posts(
    conn: &mut sqlx::PgConnection,
    viewer: Option<UserId>,
    order: PostOrder,
) -> anyhow::Result<Vec<Post>> {
    let query = match order {
        PostOrder::New => select_posts!("ORDER BY created_at DESC, id ASC"),
        PostOrder::Top => select_posts!("ORDER BY score DESC, created_at DESC, id ASC"),
    };
    sqlx::query_as::<_, PostRow>(query)
        .bind(viewer.map(|u| u.0))
        .fetch_all(conn)
        .await
        .context("querying posts table")?
        .into_iter()
        .map(PostRow::into_post)
        .collect()
}

pub async fn fetch_post_by_slug(
    conn: &mut sqlx::PgConnection,
    viewer: Option<UserId>,
    slug: &str,
) -> Result<Post, Error> {
    let row = sqlx::query_as::<_, PostRow>(select_posts!("WHERE p.slug = $2"))
        .bind(viewer.map(|u| u.0))
        .bind(slug)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("querying post with slug {slug:?}"))?
        .ok_or_else(Error::not_found)?;
    Ok(row.into_post()?)
}

async fn fetch_post(
    conn: &mut sqlx::PgConnection,
    viewer: Option<UserId>,
    post: PostId,
) -> anyhow::Result<Post> {
    sqlx::query_as::<_, PostRow>(select_posts!("WHERE p.id = $2"))
        .bind(viewer.map(|u| u.0))
        .bind(post.0)
        .fetch_one(conn)
        .await
        .with_context(|| format!("querying post {post:?}"))?
        .into_post()
}

/// Visible comments of `post`, oldest first
pub async fn fetch_comments(
    conn: &mut sqlx::PgConnection,
    viewer: Option<UserId>,
    post: PostId,
) -> anyhow::Result<Vec<Comment>> {
    sqlx::query_as::<_, CommentRow>(select_comments!(
        "AND c.post_id = $2 ORDER BY c.created_at ASC, c.id ASC"
    ))
    .bind(viewer.map(|u| u.0))
    .bind(post.0)
    .fetch_all(conn)
    .await
    .with_context(|| format!("querying comments of post {post:?}"))?
    .into_iter()
    .map(CommentRow::into_comment)
    .collect()
}

async fn fetch_comment(
    conn: &mut sqlx::PgConnection,
    viewer: Option<UserId>,
    comment: CommentId,
) -> anyhow::Result<Comment> {
    sqlx::query_as::<_, CommentRow>(select_comments!("AND c.id = $2"))
        .bind(viewer.map(|u| u.0))
        .bind(comment.0)
        .fetch_one(conn)
        .await
        .with_context(|| format!("querying comment {comment:?}"))?
        .into_comment()
}

/// Author of `comment` if it exists and was not deleted
async fn visible_comment(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
) -> anyhow::Result<Option<(PostId, UserId)>> {
    let row = sqlx::query(
        "SELECT post_id, author_id FROM comments WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(comment.0)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("looking up comment {comment:?}"))?;
    row.map(|r| -> anyhow::Result<_> {
        Ok((
            PostId(r.try_get("post_id").context("retrieving the post_id field")?),
            UserId(r.try_get("author_id").context("retrieving the author_id field")?),
        ))
    })
    .transpose()
}

/// Assumes `p` was already validated
pub async fn create_post(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    p: NewPost,
    slug: String,
) -> Result<Post, Error> {
    let mut tx = conn.begin().await.context("starting transaction")?;

    let id_taken = sqlx::query("SELECT 1 FROM posts WHERE id = $1")
        .bind(p.id.0)
        .fetch_optional(&mut *tx)
        .await
        .context("checking for id conflicts")?
        .is_some();
    if id_taken {
        return Err(Error::uuid_already_used(p.id.0));
    }

    let slug_taken = sqlx::query("SELECT 1 FROM posts WHERE slug = $1")
        .bind(&slug)
        .fetch_optional(&mut *tx)
        .await
        .context("checking for slug conflicts")?
        .is_some();
    if slug_taken {
        return Err(Error::Api(pawprint_api::Error::SlugAlreadyUsed(slug)));
    }

    sqlx::query(
        "
            INSERT INTO posts (id, slug, title, body, author_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
    .bind(p.id.0)
    .bind(&slug)
    .bind(&p.title)
    .bind(&p.body)
    .bind(user.0)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await
    .with_context(|| format!("inserting post {:?}", p.id))?;

    let post = fetch_post(&mut *tx, Some(user), p.id).await?;
    tx.commit().await.context("committing transaction")?;
    Ok(post)
}

/// Assumes `c` was already validated
pub async fn create_comment(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    c: NewComment,
) -> Result<Comment, Error> {
    let mut tx = conn.begin().await.context("starting transaction")?;

    let post_exists = sqlx::query("SELECT 1 FROM posts WHERE id = $1")
        .bind(c.post_id.0)
        .fetch_optional(&mut *tx)
        .await
        .context("checking the post exists")?
        .is_some();
    if !post_exists {
        return Err(Error::not_found());
    }

    let id_taken = sqlx::query("SELECT 1 FROM comments WHERE id = $1")
        .bind(c.id.0)
        .fetch_optional(&mut *tx)
        .await
        .context("checking for id conflicts")?
        .is_some();
    if id_taken {
        return Err(Error::uuid_already_used(c.id.0));
    }

    let depth = match c.parent_id {
        None => 0,
        Some(parent) => match visible_comment(&mut *tx, parent).await? {
            Some((post, _)) if post == c.post_id => {
                let depth: i32 = sqlx::query("SELECT depth FROM comments WHERE id = $1")
                    .bind(parent.0)
                    .fetch_one(&mut *tx)
                    .await
                    .with_context(|| format!("fetching depth of comment {parent:?}"))?
                    .try_get("depth")
                    .context("retrieving the depth field")?;
                if depth as usize >= MAX_REPLY_DEPTH {
                    return Err(Error::Api(pawprint_api::Error::ReplyTooDeep {
                        parent: parent.0,
                        max: MAX_REPLY_DEPTH,
                    }));
                }
                depth + 1
            }
            _ => return Err(Error::Api(pawprint_api::Error::InvalidParent(parent.0))),
        },
    };

    sqlx::query(
        "
            INSERT INTO comments (id, post_id, parent_id, depth, author_id, content, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        ",
    )
    .bind(c.id.0)
    .bind(c.post_id.0)
    .bind(c.parent_id.map(|p| p.0))
    .bind(depth)
    .bind(user.0)
    .bind(&c.content)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await
    .with_context(|| format!("inserting comment {:?}", c.id))?;

    let comment = fetch_comment(&mut *tx, Some(user), c.id).await?;
    tx.commit().await.context("committing transaction")?;
    Ok(comment)
}

/// Assumes `edit` was already validated
pub async fn edit_comment(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    comment: CommentId,
    edit: EditComment,
) -> Result<(), Error> {
    let (_, author) = visible_comment(&mut *conn, comment)
        .await?
        .ok_or_else(Error::not_found)?;
    if author != user {
        return Err(Error::permission_denied());
    }
    sqlx::query("UPDATE comments SET content = $1, edited_at = $2 WHERE id = $3")
        .bind(&edit.content)
        .bind(Utc::now())
        .bind(comment.0)
        .execute(conn)
        .await
        .with_context(|| format!("editing comment {comment:?}"))?;
    Ok(())
}

/// Soft-deletes the comment; its replies stay visible
pub async fn delete_comment(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    comment: CommentId,
) -> Result<(), Error> {
    let (_, author) = visible_comment(&mut *conn, comment)
        .await?
        .ok_or_else(Error::not_found)?;
    if author != user {
        let is_moderator: bool = sqlx::query("SELECT is_moderator FROM users WHERE id = $1")
            .bind(user.0)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("fetching moderator status of {user:?}"))?
            .try_get("is_moderator")
            .context("retrieving the is_moderator field")?;
        if !is_moderator {
            return Err(Error::permission_denied());
        }
    }
    sqlx::query("UPDATE comments SET deleted_at = $1 WHERE id = $2")
        .bind(Utc::now())
        .bind(comment.0)
        .execute(conn)
        .await
        .with_context(|| format!("deleting comment {comment:?}"))?;
    Ok(())
}

struct VoteTable {
    exists: &'static str,
    upsert: &'static str,
    remove: &'static str,
    score: &'static str,
}

macro_rules! vote_table {
    ($votes:literal, $column:literal, $targets:literal, $visible:literal) => {
        VoteTable {
            exists: concat!("SELECT 1 FROM ", $targets, " WHERE id = $1", $visible),
            upsert: concat!(
                "INSERT INTO ", $votes, " (user_id, ", $column, ", value) VALUES ($1, $2, $3)
                ON CONFLICT (user_id, ", $column, ") DO UPDATE SET value = EXCLUDED.value"
            ),
            remove: concat!("DELETE FROM ", $votes, " WHERE user_id = $1 AND ", $column, " = $2"),
            score: concat!(
                "SELECT COALESCE(SUM(value), 0)::BIGINT AS score FROM ", $votes,
                " WHERE ", $column, " = $1"
            ),
        }
    };
}

const POST_VOTES: VoteTable = vote_table!("post_votes", "post_id", "posts", "");
const COMMENT_VOTES: VoteTable = vote_table!(
    "comment_votes",
    "comment_id",
    "comments",
    " AND deleted_at IS NULL"
);

/// Records `user`'s vote and returns the target's new score
pub async fn vote(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    target: VoteTarget,
    vote: Vote,
) -> Result<i64, Error> {
    let (table, id) = match target {
        VoteTarget::Post(p) => (&POST_VOTES, p.0),
        VoteTarget::Comment(c) => (&COMMENT_VOTES, c.0),
    };

    let exists = sqlx::query(table.exists)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .with_context(|| format!("checking {target:?} exists"))?
        .is_some();
    if !exists {
        return Err(Error::not_found());
    }

    match vote {
        Vote::None => sqlx::query(table.remove)
            .bind(user.0)
            .bind(id)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("removing vote of {user:?} on {target:?}"))?,
        v => sqlx::query(table.upsert)
            .bind(user.0)
            .bind(id)
            .bind(v.value() as i16)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("recording vote of {user:?} on {target:?}"))?,
    };

    let score: i64 = sqlx::query(table.score)
        .bind(id)
        .fetch_one(conn)
        .await
        .with_context(|| format!("summing votes on {target:?}"))?
        .try_get("score")
        .context("retrieving the score field")?;
    Ok(score)
}
