#![cfg(test)]

use async_recursion::async_recursion;
use axum::{
    extract::FromRequestParts,
    http::{self, request},
    response::IntoResponse,
};
use bolero::generator::{gen_with, TypeGenerator};
use pawprint_api::{
    Comment, CommentId, EditComment, Error as ApiError, NewComment, NewPost, NewUser, Post,
    PostId, PostOrder, UserId, Vote, VoteTarget, MAX_REPLY_DEPTH,
};
use pawprint_mock_server::MockServer;
use std::{cmp, fmt::Debug, ops::RangeTo, panic::AssertUnwindSafe, path::Path};
use tower::{Service, ServiceExt};

use crate::{extractors::*, *};

macro_rules! do_tokio_test {
    ( $name:ident, $typ:ty, $fn:expr ) => {
        #[test]
        fn $name() {
            let runtime = AssertUnwindSafe(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed initializing tokio runtime"),
            );
            bolero::check!()
                .with_type::<$typ>()
                .cloned()
                .for_each(move |v| {
                    let () = runtime.block_on($fn(v));
                })
        }
    };
}

fn build_pg_cluster(data: &Path) -> postgresfixture::cluster::Cluster {
    let mut runtime = None;
    let mut best_version = None;
    for r in postgresfixture::runtime::Runtime::find_on_path() {
        if let Ok(v) = r.version() {
            match (&mut runtime, &mut best_version) {
                (None, None) => {
                    runtime = Some(r);
                    best_version = Some(v);
                }
                (Some(runtime), Some(best_version)) => {
                    if *best_version < v {
                        *runtime = r;
                        *best_version = v;
                    }
                }
                _ => unreachable!(),
            }
        }
    }
    postgresfixture::cluster::Cluster::new(
        data,
        runtime.expect("postgresql seems to not be installed in path"),
    )
}

macro_rules! do_sqlx_test {
    ( $name:ident, $gen:expr, $fn:expr ) => {
        #[test]
        #[ignore = "spins up a local postgresql cluster"]
        fn $name() {
            if std::env::var("RUST_LOG").is_ok() {
                tracing_subscriber::fmt::init();
            }
            let lockfile = tempfile::tempfile().expect("creating tempfile");
            let datadir = tempfile::tempdir().expect("creating tempdir");
            let datadir_path: &Path = datadir.as_ref();
            let cluster = build_pg_cluster(datadir_path);
            let datadir_path: &str = datadir_path.to_str().expect("tempdir is not valid utf8");
            postgresfixture::coordinate::run_and_destroy(&cluster, lockfile.into(), || {
                cluster.createdb("test_db").expect("creating test_db database");
                let runtime = AssertUnwindSafe(
                    tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed initializing tokio runtime"),
                );
                let pool = AssertUnwindSafe(runtime.block_on(async move {
                    let pool = create_sqlx_pool(
                        &format!("postgresql://?host={}&dbname=test_db", datadir_path),
                        4,
                    )
                    .await
                    .expect("creating sqlx pool");
                    MIGRATOR
                        .run(&mut *pool.acquire().await.expect("getting migrator connection"))
                        .await
                        .expect("failed applying migrations");
                    pool
                }));
                bolero::check!()
                    .with_generator($gen)
                    .cloned()
                    .for_each(move |v| {
                        let pool = pool.clone();
                        let idle_before = pool.num_idle();
                        let v_str = format!("{v:?}");
                        let idle_after_res: Result<usize, _> = {
                            let pool = pool.clone();
                            std::panic::catch_unwind(AssertUnwindSafe(|| {
                                runtime.block_on(async move {
                                    let () = $fn(pool.clone(), v).await;
                                    let mut idle_after = pool.num_idle();
                                    let wait_release_since = std::time::Instant::now();
                                    while idle_after < idle_before
                                        && wait_release_since.elapsed()
                                            <= std::time::Duration::from_secs(1)
                                    {
                                        tokio::task::yield_now().await;
                                        idle_after = pool.num_idle();
                                    }
                                    idle_after
                                })
                            }))
                        };
                        runtime.block_on(async move {
                            let mut conn =
                                pool.acquire().await.expect("getting db cleanup connection");
                            sqlx::query(include_str!("../reset-test-db.sql"))
                                .execute(&mut *conn)
                                .await
                                .expect("failed cleaning up database");
                        });
                        match idle_after_res {
                            Err(e) => std::panic::resume_unwind(e),
                            Ok(idle_after) => assert!(
                                idle_after >= idle_before,
                                "test {} held onto pool after exiting test: before there were {idle_before} connections, and after there were {idle_after} with value {v_str}",
                                stringify!($name)
                            ),
                        }
                    });
            })
            .expect("coordinating spinup and shutdown of the pg cluster");
        }
    };
}

do_tokio_test!(fuzz_preauth_extractor, String, |token| async move {
    if let Ok(req) = http::Request::builder()
        .method(http::Method::GET)
        .uri("/")
        .header(http::header::AUTHORIZATION, token)
        .body(())
    {
        let mut req = req.into_parts().0;
        let res = PreAuth::from_request_parts(&mut req, &()).await;
        match res {
            Ok(_) => (),
            Err(Error::Api(ApiError::PermissionDenied)) => (),
            Err(e) => panic!("got unexpected error: {e}"),
        }
    }
});

async fn preauth(header: &str) -> Result<AuthToken, Error> {
    let mut req = http::Request::builder()
        .header(http::header::AUTHORIZATION, header)
        .body(())
        .expect("building request")
        .into_parts()
        .0;
    PreAuth::from_request_parts(&mut req, &()).await.map(|a| a.0)
}

#[tokio::test]
async fn preauth_accepts_only_bearer_uuids() {
    let token = Uuid::new_v4();
    assert_eq!(
        preauth(&format!("Bearer {token}")).await.ok(),
        Some(AuthToken(token))
    );
    assert_eq!(
        preauth(&format!("bearer {token}")).await.ok(),
        Some(AuthToken(token))
    );
    for bad in [
        format!("Basic {token}"),
        format!("Bearer {token} extra"),
        String::from("Bearer not-a-uuid"),
        String::from("Bearer"),
    ] {
        assert!(matches!(
            preauth(&bad).await,
            Err(Error::Api(ApiError::PermissionDenied))
        ));
    }
}

async fn into_api_error(err: Error) -> (http::StatusCode, ApiError) {
    let resp = err.into_response();
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    (status, ApiError::parse(&body).expect("parsing error body"))
}

#[tokio::test]
async fn errors_render_as_api_errors() {
    assert_eq!(
        into_api_error(Error::not_found()).await,
        (http::StatusCode::NOT_FOUND, ApiError::NotFound)
    );
    let uuid = Uuid::new_v4();
    assert_eq!(
        into_api_error(Error::uuid_already_used(uuid)).await,
        (http::StatusCode::CONFLICT, ApiError::UuidAlreadyUsed(uuid))
    );
    let (status, err) = into_api_error(Error::Anyhow(anyhow::anyhow!("db is on fire"))).await;
    assert_eq!(status, http::StatusCode::INTERNAL_SERVER_ERROR);
    assert!(matches!(err, ApiError::Unknown(msg) if msg.contains("db is on fire")));
}

// Routes must reject bad credentials before touching the database, so a pool
// that never connects is enough here
async fn offline_app(admin_token: Option<AuthToken>) -> Router {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgresql://localhost/nonexistent")
        .expect("creating lazy pool");
    app(PgPool::new(pool), admin_token).await
}

#[tokio::test]
async fn routes_reject_missing_credentials() {
    let admin = AuthToken(Uuid::new_v4());
    let mut app = offline_app(Some(admin)).await;
    let user = NewUser::new(String::from("alice"), false);

    let res: Result<AuthToken, _> =
        run_on_app(&mut app, "POST", "/api/admin/create-user", None, &user).await;
    assert_eq!(res, Err(ApiError::PermissionDenied));
    let res: Result<AuthToken, _> = run_on_app(
        &mut app,
        "POST",
        "/api/admin/create-user",
        Some(Uuid::new_v4()),
        &user,
    )
    .await;
    assert_eq!(res, Err(ApiError::PermissionDenied));

    let res: Result<UserId, _> = run_on_app(&mut app, "GET", "/api/whoami", None, &()).await;
    assert_eq!(res, Err(ApiError::PermissionDenied));
    let res: Result<i64, _> = run_on_app(
        &mut app,
        "POST",
        &format!("/api/posts/{}/vote", Uuid::new_v4()),
        None,
        &Vote::Up,
    )
    .await;
    assert_eq!(res, Err(ApiError::PermissionDenied));
}

#[tokio::test]
async fn admin_routes_are_closed_without_configured_token() {
    let mut app = offline_app(None).await;
    let user = NewUser::new(String::from("alice"), false);
    let res: Result<AuthToken, _> = run_on_app(
        &mut app,
        "POST",
        "/api/admin/create-user",
        Some(Uuid::new_v4()),
        &user,
    )
    .await;
    assert_eq!(res, Err(ApiError::PermissionDenied));
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzTarget {
    Post(usize),
    Comment(usize),
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    CreateUser {
        name: u8,
        is_moderator: bool,
    },
    Unauth {
        sid: usize,
    },
    Whoami {
        sid: usize,
    },
    FetchPosts {
        sid: Option<usize>,
        top: bool,
    },
    FetchPostBySlug {
        sid: Option<usize>,
        pid: usize,
    },
    FetchComments {
        sid: Option<usize>,
        pid: usize,
    },
    CreatePost {
        sid: usize,
        reuse: Option<usize>,
        title: u8,
        #[generator(gen_with::<String>().len(0..40usize))]
        body: String,
    },
    CreateComment {
        sid: usize,
        reuse: Option<usize>,
        pid: usize,
        parent: Option<usize>,
        #[generator(gen_with::<String>().len(0..40usize))]
        content: String,
    },
    EditComment {
        sid: usize,
        cid: usize,
        #[generator(gen_with::<String>().len(0..40usize))]
        content: String,
    },
    DeleteComment {
        sid: usize,
        cid: usize,
    },
    Vote {
        sid: usize,
        target: FuzzTarget,
        vote: Vote,
    },
}

async fn call<Req, Resp>(
    app: &mut Router,
    req: request::Request<axum::body::Body>,
    req_body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    if status == http::StatusCode::OK {
        if std::any::TypeId::of::<Resp>() == std::any::TypeId::of::<()>() {
            // the server returns an empty body in this situation, which does not parse with serde_json
            return Ok(serde_json::from_slice(b"null").unwrap());
        } else {
            return Ok(serde_json::from_slice(&body).unwrap_or_else(|err| {
                panic!(
                    r#"
                        Failed parsing resp body!

                        The error is the following:
                        ---
                        {err}
                        ---

                        Response body is:
                        ---
                        {body:?}
                        ---

                        Request was:
                        ---
                        {req_body:?}
                        ---
                    "#
                )
            }));
        }
    }
    Err(ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}")))
}

async fn run_on_app<Req, Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    token: Option<Uuid>,
    body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug + serde::Serialize,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    let req = request::Builder::new()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    let req = match token {
        Some(token) => req.header(http::header::AUTHORIZATION, format!("bearer {token}")),
        None => req,
    };
    let req = req
        .body(axum::body::Body::from(
            serde_json::to_vec(body).expect("serializing request body to json"),
        ))
        .expect("building request");
    call(app, req, body).await
}

fn compare<T>(name: &str, app_res: Result<T, ApiError>, mock_res: Result<T, ApiError>)
where
    T: Debug + PartialEq,
{
    assert_eq!(
        app_res, mock_res,
        "app and mock did not return the same result for {name}"
    );
}

// Timestamps come from two different clocks, so only compare the rest
type PostView = (PostId, String, String, String, UserId, i64, i64, Vote);
type CommentView = (CommentId, PostId, Option<CommentId>, UserId, String, bool, i64, Vote);

fn post_view(p: Post) -> PostView {
    (
        p.id,
        p.slug,
        p.title,
        p.body,
        p.author_id,
        p.score,
        p.comment_count,
        p.viewer_vote,
    )
}

fn comment_view(c: Comment) -> CommentView {
    (
        c.id,
        c.post_id,
        c.parent_id,
        c.author_id,
        c.content,
        c.edited_at.is_some(),
        c.score,
        c.viewer_vote,
    )
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end); // in case we rounded to 0
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1)) // in case id was actually over end - 1 due to rounding
}

const TITLES: [&str; 6] = [
    "Leash-free parks",
    "leash free parks?",
    "Cat cafés",
    "Vets open on sundays",
    "!!!",
    "Dog beaches",
];

struct Session {
    app: AuthToken,
    mock: AuthToken,
}

struct ComparativeFuzzer {
    admin_token: Uuid,
    app: Router,
    mock: MockServer,
    sessions: Vec<Session>,
    posts: Vec<PostId>,
    comments: Vec<CommentId>,
}

impl ComparativeFuzzer {
    async fn new(pool: PgPool) -> ComparativeFuzzer {
        let admin_token = Uuid::new_v4();
        let app = app(pool, Some(AuthToken(admin_token))).await;
        ComparativeFuzzer {
            admin_token,
            app,
            mock: MockServer::new(),
            sessions: Vec::new(),
            posts: Vec::new(),
            comments: Vec::new(),
        }
    }

    fn post(&self, pid: usize) -> PostId {
        resize_int(pid, ..self.posts.len())
            .map(|i| self.posts[i])
            .unwrap_or_else(PostId::stub)
    }

    fn comment(&self, cid: usize) -> CommentId {
        resize_int(cid, ..self.comments.len())
            .map(|i| self.comments[i])
            .unwrap_or_else(CommentId::stub)
    }

    /// Picks a session, creating a user first if there is none yet
    #[async_recursion]
    async fn session(&mut self, sid: usize) -> (AuthToken, AuthToken) {
        match resize_int(sid, ..self.sessions.len()) {
            Some(i) => (self.sessions[i].app, self.sessions[i].mock),
            None => {
                let name = self.sessions.len() as u8;
                self.execute_fuzz_op(FuzzOp::CreateUser {
                    name,
                    is_moderator: false,
                })
                .await;
                self.session(sid).await
            }
        }
    }

    async fn maybe_session(&mut self, sid: Option<usize>) -> Option<(AuthToken, AuthToken)> {
        match sid {
            None => None,
            Some(sid) => Some(self.session(sid).await),
        }
    }

    #[async_recursion]
    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        match op {
            FuzzOp::CreateUser { name, is_moderator } => {
                let new_user = NewUser::new(format!("user{}", name % 16), is_moderator);
                let app_tok = run_on_app(
                    &mut self.app,
                    "POST",
                    "/api/admin/create-user",
                    Some(self.admin_token),
                    &new_user,
                )
                .await;
                let mock_tok = self.mock.admin_create_user(new_user);
                if let (&Ok(app), &Ok(mock)) = (&app_tok, &mock_tok) {
                    self.sessions.push(Session { app, mock });
                }
                compare("CreateUser", app_tok.map(|_| ()), mock_tok.map(|_| ()));
            }
            FuzzOp::Unauth { sid } => {
                let (app, mock) = self.session(sid).await;
                compare(
                    "Unauth",
                    run_on_app(&mut self.app, "POST", "/api/unauth", Some(app.0), &()).await,
                    self.mock.unauth(mock),
                );
            }
            FuzzOp::Whoami { sid } => {
                let (app, mock) = self.session(sid).await;
                compare(
                    "Whoami",
                    run_on_app(&mut self.app, "GET", "/api/whoami", Some(app.0), &()).await,
                    self.mock.whoami(mock),
                );
            }
            FuzzOp::FetchPosts { sid, top } => {
                let tokens = self.maybe_session(sid).await;
                let (order, query) = match top {
                    true => (PostOrder::Top, "top"),
                    false => (PostOrder::New, "new"),
                };
                let app_res: Result<Vec<Post>, _> = run_on_app(
                    &mut self.app,
                    "GET",
                    &format!("/api/posts?order={query}"),
                    tokens.map(|t| t.0 .0),
                    &(),
                )
                .await;
                compare(
                    "FetchPosts",
                    app_res.map(|p| p.into_iter().map(post_view).collect::<Vec<_>>()),
                    self.mock
                        .fetch_posts(tokens.map(|t| t.1), order)
                        .map(|p| p.into_iter().map(post_view).collect()),
                );
            }
            FuzzOp::FetchPostBySlug { sid, pid } => {
                let tokens = self.maybe_session(sid).await;
                let slug = match self.mock.fetch_posts(None, PostOrder::New) {
                    Ok(posts) => resize_int(pid, ..posts.len())
                        .map(|i| posts[i].slug.clone())
                        .unwrap_or_else(|| String::from("no-such-post")),
                    Err(_) => String::from("no-such-post"),
                };
                let app_res: Result<Post, _> = run_on_app(
                    &mut self.app,
                    "GET",
                    &format!("/api/posts-by-slug/{slug}"),
                    tokens.map(|t| t.0 .0),
                    &(),
                )
                .await;
                compare(
                    "FetchPostBySlug",
                    app_res.map(post_view),
                    self.mock
                        .fetch_post_by_slug(tokens.map(|t| t.1), &slug)
                        .map(post_view),
                );
            }
            FuzzOp::FetchComments { sid, pid } => {
                let tokens = self.maybe_session(sid).await;
                let post = self.post(pid);
                let app_res: Result<Vec<Comment>, _> = run_on_app(
                    &mut self.app,
                    "GET",
                    &format!("/api/posts/{}/comments", post.0),
                    tokens.map(|t| t.0 .0),
                    &(),
                )
                .await;
                compare(
                    "FetchComments",
                    app_res.map(|c| c.into_iter().map(comment_view).collect::<Vec<_>>()),
                    self.mock
                        .fetch_comments(tokens.map(|t| t.1), post)
                        .map(|c| c.into_iter().map(comment_view).collect()),
                );
            }
            FuzzOp::CreatePost {
                sid,
                reuse,
                title,
                body,
            } => {
                let (app, mock) = self.session(sid).await;
                let mut new_post = NewPost::new(
                    String::from(TITLES[title as usize % TITLES.len()]),
                    body,
                );
                if let Some(reuse) = reuse {
                    new_post.id = self.post(reuse);
                }
                let app_res: Result<Post, _> =
                    run_on_app(&mut self.app, "POST", "/api/posts", Some(app.0), &new_post).await;
                let mock_res = self.mock.create_post(mock, new_post.clone());
                if mock_res.is_ok() {
                    self.posts.push(new_post.id);
                }
                compare("CreatePost", app_res.map(post_view), mock_res.map(post_view));
            }
            FuzzOp::CreateComment {
                sid,
                reuse,
                pid,
                parent,
                content,
            } => {
                let (app, mock) = self.session(sid).await;
                let parent = parent.map(|p| self.comment(p));
                let mut new_comment = NewComment::new(self.post(pid), parent, content);
                if let Some(reuse) = reuse {
                    new_comment.id = self.comment(reuse);
                }
                let app_res: Result<Comment, _> = run_on_app(
                    &mut self.app,
                    "POST",
                    "/api/comments",
                    Some(app.0),
                    &new_comment,
                )
                .await;
                let mock_res = self.mock.create_comment(mock, new_comment.clone());
                if mock_res.is_ok() {
                    self.comments.push(new_comment.id);
                }
                compare(
                    "CreateComment",
                    app_res.map(comment_view),
                    mock_res.map(comment_view),
                );
            }
            FuzzOp::EditComment { sid, cid, content } => {
                let (app, mock) = self.session(sid).await;
                let comment = self.comment(cid);
                let edit = EditComment { content };
                compare(
                    "EditComment",
                    run_on_app(
                        &mut self.app,
                        "PUT",
                        &format!("/api/comments/{}", comment.0),
                        Some(app.0),
                        &edit,
                    )
                    .await,
                    self.mock.edit_comment(mock, comment, edit),
                );
            }
            FuzzOp::DeleteComment { sid, cid } => {
                let (app, mock) = self.session(sid).await;
                let comment = self.comment(cid);
                compare(
                    "DeleteComment",
                    run_on_app(
                        &mut self.app,
                        "DELETE",
                        &format!("/api/comments/{}", comment.0),
                        Some(app.0),
                        &(),
                    )
                    .await,
                    self.mock.delete_comment(mock, comment),
                );
            }
            FuzzOp::Vote { sid, target, vote } => {
                let (app, mock) = self.session(sid).await;
                let (target, uri) = match target {
                    FuzzTarget::Post(pid) => {
                        let post = self.post(pid);
                        (VoteTarget::Post(post), format!("/api/posts/{}/vote", post.0))
                    }
                    FuzzTarget::Comment(cid) => {
                        let comment = self.comment(cid);
                        (
                            VoteTarget::Comment(comment),
                            format!("/api/comments/{}/vote", comment.0),
                        )
                    }
                };
                compare(
                    "Vote",
                    run_on_app(&mut self.app, "POST", &uri, Some(app.0), &vote).await,
                    self.mock.vote(mock, target, vote),
                );
            }
        }
    }
}

do_sqlx_test!(
    compare_with_mock,
    gen_with::<Vec<FuzzOp>>().len(1..100usize),
    |pool, test: Vec<FuzzOp>| async move {
        let mut fuzzer = ComparativeFuzzer::new(pool).await;
        for op in test {
            fuzzer.execute_fuzz_op(op).await;
        }
    }
);

do_sqlx_test!(
    reply_chains_stop_at_max_depth,
    gen_with::<String>().len(0..40usize),
    |pool, content: String| async move {
        let mut fuzzer = ComparativeFuzzer::new(pool).await;
        fuzzer
            .execute_fuzz_op(FuzzOp::CreatePost {
                sid: 0,
                reuse: None,
                title: 0,
                body: String::from("Walk report"),
            })
            .await;
        let mut parent = None;
        for _ in 0..MAX_REPLY_DEPTH + 2 {
            fuzzer
                .execute_fuzz_op(FuzzOp::CreateComment {
                    sid: 0,
                    reuse: None,
                    pid: 0,
                    parent,
                    content: content.clone(),
                })
                .await;
            // Always the latest comment
            parent = Some(usize::MAX);
        }
        // Empty when the content itself is rejected
        let created = fuzzer.comments.len();
        assert!(created == 0 || created == MAX_REPLY_DEPTH + 1, "{created} comments");
    }
);
