use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Not found")]
    NotFound,

    #[error("Uuid already used {0}")]
    UuidAlreadyUsed(Uuid),

    #[error("Name already used {0}")]
    NameAlreadyUsed(String),

    #[error("Slug already used {0}")]
    SlugAlreadyUsed(String),

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Invalid character in name {0:?}")]
    InvalidName(String),

    #[error("Title {0:?} does not give a usable slug")]
    InvalidSlug(String),

    #[error("String is empty")]
    EmptyString,

    #[error("String is {len} characters long, at most {max} are allowed")]
    StringTooLong { len: usize, max: usize },

    #[error("Parent comment {0} is not a visible comment of this post")]
    InvalidParent(Uuid),

    #[error("Invalid vote value {0}")]
    InvalidVote(i64),

    #[error("Replying to {parent} would nest deeper than {max} levels")]
    ReplyTooDeep { parent: Uuid, max: usize },
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::UuidAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::NameAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::SlugAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::InvalidName(_) => StatusCode::BAD_REQUEST,
            Error::InvalidSlug(_) => StatusCode::BAD_REQUEST,
            Error::EmptyString => StatusCode::BAD_REQUEST,
            Error::StringTooLong { .. } => StatusCode::BAD_REQUEST,
            Error::InvalidParent(_) => StatusCode::BAD_REQUEST,
            Error::InvalidVote(_) => StatusCode::BAD_REQUEST,
            Error::ReplyTooDeep { .. } => StatusCode::BAD_REQUEST,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::NotFound => json!({
                "message": "not found",
                "type": "not-found",
            }),
            Error::UuidAlreadyUsed(u) => json!({
                "message": "uuid conflict",
                "type": "conflict-uuid",
                "uuid": u,
            }),
            Error::NameAlreadyUsed(n) => json!({
                "message": "name already used",
                "type": "conflict-name",
                "name": n,
            }),
            Error::SlugAlreadyUsed(s) => json!({
                "message": "slug already used",
                "type": "conflict-slug",
                "slug": s,
            }),
            Error::NullByteInString(s) => json!({
                "message": "there was a null byte in argument string",
                "type": "null-byte",
                "string": s,
            }),
            Error::InvalidName(n) => json!({
                "message": "there was an invalid character in a user name",
                "type": "invalid-name",
                "name": n,
            }),
            Error::InvalidSlug(t) => json!({
                "message": "the title does not contain any character usable in a slug",
                "type": "invalid-slug",
                "title": t,
            }),
            Error::EmptyString => json!({
                "message": "a required string was empty",
                "type": "empty-string",
            }),
            Error::StringTooLong { len, max } => json!({
                "message": "string too long",
                "type": "string-too-long",
                "len": len,
                "max": max,
            }),
            Error::InvalidParent(p) => json!({
                "message": "parent comment is not a visible comment of this post",
                "type": "invalid-parent",
                "parent": p,
            }),
            Error::InvalidVote(v) => json!({
                "message": "votes must be -1, 0 or 1",
                "type": "invalid-vote",
                "vote": v,
            }),
            Error::ReplyTooDeep { parent, max } => json!({
                "message": "reply chain is too deep",
                "type": "reply-too-deep",
                "parent": parent,
                "max": max,
            }),
        })
        .expect("serializing error")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let str_field = |field: &str| {
            data.get(field)
                .and_then(|s| s.as_str())
                .map(String::from)
                .ok_or_else(|| anyhow!("error is missing string field {field:?}"))
        };
        let uuid_field = |field: &str| {
            data.get(field)
                .and_then(|u| u.as_str())
                .and_then(|u| Uuid::from_str(u).ok())
                .ok_or_else(|| anyhow!("error is missing uuid field {field:?}"))
        };
        let int_field = |field: &str| {
            data.get(field)
                .and_then(|i| i.as_i64())
                .ok_or_else(|| anyhow!("error is missing integer field {field:?}"))
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(str_field("message").unwrap_or_default()),
                "permission-denied" => Error::PermissionDenied,
                "not-found" => Error::NotFound,
                "conflict-uuid" => Error::UuidAlreadyUsed(uuid_field("uuid")?),
                "conflict-name" => Error::NameAlreadyUsed(str_field("name")?),
                "conflict-slug" => Error::SlugAlreadyUsed(str_field("slug")?),
                "null-byte" => Error::NullByteInString(str_field("string")?),
                "invalid-name" => Error::InvalidName(str_field("name")?),
                "invalid-slug" => Error::InvalidSlug(str_field("title")?),
                "empty-string" => Error::EmptyString,
                "string-too-long" => Error::StringTooLong {
                    len: int_field("len")? as usize,
                    max: int_field("max")? as usize,
                },
                "invalid-parent" => Error::InvalidParent(uuid_field("parent")?),
                "invalid-vote" => Error::InvalidVote(int_field("vote")?),
                "reply-too-deep" => Error::ReplyTooDeep {
                    parent: uuid_field("parent")?,
                    max: int_field("max")? as usize,
                },
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}
