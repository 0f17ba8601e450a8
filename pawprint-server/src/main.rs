use anyhow::Context;
use axum::{
    routing::{get, post, put},
    Router,
};
use pawprint_api::{AuthToken, Uuid};
use std::net::SocketAddr;
use structopt::StructOpt;

mod db;
mod error;
mod extractors;
mod fuzz;
mod handlers;

use error::Error;
use extractors::{AppState, PgPool};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, StructOpt)]
#[structopt(name = "pawprint-server", about = "Forum server for pawprint")]
struct Opt {
    /// Postgres connection string
    #[structopt(long, env = "DATABASE_URL")]
    database_url: String,

    #[structopt(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Token allowing user creation; admin routes are disabled when unset
    #[structopt(long, env = "ADMIN_TOKEN")]
    admin_token: Option<Uuid>,

    #[structopt(long, default_value = "16")]
    max_connections: u32,
}

pub async fn create_sqlx_pool(url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    Ok(PgPool::new(
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .with_context(|| format!("Error opening database {:?}", url))?,
    ))
}

pub async fn app(db: PgPool, admin_token: Option<AuthToken>) -> Router {
    let state = AppState { db, admin_token };
    Router::new()
        .route("/api/admin/create-user", post(handlers::admin_create_user))
        .route("/api/unauth", post(handlers::unauth))
        .route("/api/whoami", get(handlers::whoami))
        .route(
            "/api/posts",
            get(handlers::fetch_posts).post(handlers::create_post),
        )
        .route("/api/posts-by-slug/:slug", get(handlers::fetch_post_by_slug))
        .route("/api/posts/:id/comments", get(handlers::fetch_comments))
        .route("/api/posts/:id/vote", post(handlers::vote_post))
        .route("/api/comments", post(handlers::create_comment))
        .route(
            "/api/comments/:id",
            put(handlers::edit_comment).delete(handlers::delete_comment),
        )
        .route("/api/comments/:id/vote", post(handlers::vote_comment))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = Opt::from_args();
    if opt.admin_token.is_none() {
        tracing::warn!("no admin token configured, user creation is disabled");
    }

    let db = create_sqlx_pool(&opt.database_url, opt.max_connections).await?;
    let mut conn = db.acquire().await.context("getting migrator connection")?;
    MIGRATOR
        .run(&mut *conn)
        .await
        .context("failed applying migrations")?;
    std::mem::drop(conn);

    let app = app(db, opt.admin_token.map(AuthToken)).await;

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
