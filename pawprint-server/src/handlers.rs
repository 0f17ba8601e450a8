use anyhow::Context;
use axum::{
    extract::{Path, Query},
    Json,
};
use pawprint_api::{
    AuthToken, Comment, CommentId, EditComment, NewComment, NewPost, NewUser, Post, PostId,
    PostOrder, UserId, Uuid, Vote, VoteTarget,
};

use crate::{db, extractors::*, Error};

pub async fn admin_create_user(
    AdminAuth: AdminAuth,
    mut conn: PgConn,
    Json(data): Json<NewUser>,
) -> Result<Json<AuthToken>, Error> {
    data.validate()?;
    Ok(Json(db::create_user(&mut *conn, data).await?))
}

pub async fn unauth(user: PreAuth, mut conn: PgConn) -> Result<(), Error> {
    match db::logout_user(&mut *conn, user.0).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::permission_denied()),
        Err(e) => Err(Error::Anyhow(e)),
    }
}

pub async fn whoami(Auth(user): Auth) -> Json<UserId> {
    Json(user)
}

#[derive(serde::Deserialize)]
pub struct PostsQuery {
    #[serde(default)]
    order: PostOrder,
}

pub async fn fetch_posts(
    MaybeAuth(viewer): MaybeAuth,
    mut conn: PgConn,
    Query(q): Query<PostsQuery>,
) -> Result<Json<Vec<Post>>, Error> {
    Ok(Json(
        db::fetch_posts(&mut *conn, viewer, q.order)
            .await
            .with_context(|| format!("fetching {:?} posts for {viewer:?}", q.order))?,
    ))
}

pub async fn fetch_post_by_slug(
    MaybeAuth(viewer): MaybeAuth,
    mut conn: PgConn,
    Path(slug): Path<String>,
) -> Result<Json<Post>, Error> {
    Ok(Json(db::fetch_post_by_slug(&mut *conn, viewer, &slug).await?))
}

pub async fn fetch_comments(
    MaybeAuth(viewer): MaybeAuth,
    mut conn: PgConn,
    Path(post): Path<Uuid>,
) -> Result<Json<Vec<Comment>>, Error> {
    Ok(Json(
        db::fetch_comments(&mut *conn, viewer, PostId(post))
            .await
            .with_context(|| format!("fetching comments of {post} for {viewer:?}"))?,
    ))
}

pub async fn create_post(
    Auth(user): Auth,
    mut conn: PgConn,
    Json(data): Json<NewPost>,
) -> Result<Json<Post>, Error> {
    data.validate()?;
    let slug = data.slug()?;
    Ok(Json(db::create_post(&mut *conn, user, data, slug).await?))
}

pub async fn create_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Json(data): Json<NewComment>,
) -> Result<Json<Comment>, Error> {
    data.validate()?;
    Ok(Json(db::create_comment(&mut *conn, user, data).await?))
}

pub async fn edit_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(comment): Path<Uuid>,
    Json(data): Json<EditComment>,
) -> Result<(), Error> {
    data.validate()?;
    db::edit_comment(&mut *conn, user, CommentId(comment), data).await
}

pub async fn delete_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(comment): Path<Uuid>,
) -> Result<(), Error> {
    db::delete_comment(&mut *conn, user, CommentId(comment)).await
}

// Raw integer, so that out-of-range votes map to `InvalidVote`
pub async fn vote_post(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(post): Path<Uuid>,
    Json(vote): Json<i64>,
) -> Result<Json<i64>, Error> {
    let vote = Vote::try_from(vote)?;
    Ok(Json(
        db::vote(&mut *conn, user, VoteTarget::Post(PostId(post)), vote).await?,
    ))
}

pub async fn vote_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(comment): Path<Uuid>,
    Json(vote): Json<i64>,
) -> Result<Json<i64>, Error> {
    let vote = Vote::try_from(vote)?;
    Ok(Json(
        db::vote(&mut *conn, user, VoteTarget::Comment(CommentId(comment)), vote).await?,
    ))
}
