use std::ops::{Deref, DerefMut};

use anyhow::Context;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{self, request},
};
use pawprint_api::{AuthToken, UserId, Uuid};

use crate::{db, Error};

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub db: PgPool,
    pub admin_token: Option<AuthToken>,
}

#[derive(Clone)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    pub fn new(pool: sqlx::PgPool) -> PgPool {
        PgPool(pool)
    }

    pub async fn acquire(&self) -> Result<PgConn, Error> {
        Ok(PgConn(
            self.0.acquire().await.context("acquiring db connection")?,
        ))
    }

    pub fn num_idle(&self) -> usize {
        self.0.num_idle()
    }
}

pub struct PgConn(sqlx::pool::PoolConnection<sqlx::Postgres>);

#[async_trait]
impl FromRequestParts<AppState> for PgConn {
    type Rejection = Error;

    async fn from_request_parts(
        _req: &mut request::Parts,
        state: &AppState,
    ) -> Result<PgConn, Error> {
        state.db.acquire().await
    }
}

impl Deref for PgConn {
    type Target = sqlx::PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PgConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Bearer token, not yet checked against the sessions table
pub struct PreAuth(pub AuthToken);

impl PreAuth {
    fn parse(header: &http::HeaderValue) -> Result<PreAuth, Error> {
        let header = header.to_str().map_err(|_| Error::permission_denied())?;
        let mut parts = header.split(' ');
        if !parts
            .next()
            .ok_or_else(Error::permission_denied)?
            .eq_ignore_ascii_case("bearer")
        {
            return Err(Error::permission_denied());
        }
        let token = parts.next().ok_or_else(Error::permission_denied)?;
        if parts.next().is_some() {
            return Err(Error::permission_denied());
        }
        let token = Uuid::try_parse(token).map_err(|_| Error::permission_denied())?;
        Ok(PreAuth(AuthToken(token)))
    }
}

#[async_trait]
impl<S: Sync> FromRequestParts<S> for PreAuth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<PreAuth, Error> {
        match req.headers.get(http::header::AUTHORIZATION) {
            None => Err(Error::permission_denied()),
            Some(header) => PreAuth::parse(header),
        }
    }
}

/// Logged-in user
pub struct Auth(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for Auth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, state: &AppState) -> Result<Auth, Error> {
        let token = PreAuth::from_request_parts(req, state).await?.0;
        let mut conn = PgConn::from_request_parts(req, state).await?;
        Ok(Auth(db::recover_session(&mut *conn, token).await?))
    }
}

/// Logged-in user, or `None` for anonymous readers
///
/// A token that is present but invalid is still rejected.
pub struct MaybeAuth(pub Option<UserId>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuth {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<MaybeAuth, Error> {
        if !req.headers.contains_key(http::header::AUTHORIZATION) {
            return Ok(MaybeAuth(None));
        }
        let Auth(user) = Auth::from_request_parts(req, state).await?;
        Ok(MaybeAuth(Some(user)))
    }
}

pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<AdminAuth, Error> {
        let token = PreAuth::from_request_parts(req, state).await?.0;
        if Some(token) == state.admin_token {
            Ok(AdminAuth)
        } else {
            Err(Error::permission_denied())
        }
    }
}
