use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

/// Maximum length of a post title, in characters
pub const MAX_TITLE_LEN: usize = 300;

/// Maximum length of a post body or comment, in characters
pub const MAX_CONTENT_LEN: usize = 10_000;

/// Maximum length of a user name, in characters
pub const MAX_NAME_LEN: usize = 64;

/// Maximum length of a post slug, in bytes (slugs are ASCII-only)
pub const MAX_SLUG_LEN: usize = 80;

/// Maximum number of ancestors a comment may have
pub const MAX_REPLY_DEPTH: usize = 64;

mod auth;
pub use auth::AuthToken;

mod comment;
pub use comment::{Comment, CommentId, EditComment, NewComment};

mod error;
pub use error::Error;

mod forum;
pub use forum::ForumApi;

mod post;
pub use post::{NewPost, Post, PostId, PostOrder};

mod user;
pub use user::{NewUser, User, UserId};

mod vote;
pub use vote::{Vote, VoteTarget};

// Postgres text columns cannot hold NUL bytes: every user-provided string
// goes through this before reaching the database.
pub fn validate_string(s: &str) -> Result<(), Error> {
    match s.contains('\0') {
        true => Err(Error::NullByteInString(String::from(s))),
        false => Ok(()),
    }
}

/// Validates user-provided text that must carry actual content
pub fn validate_content(s: &str, max_len: usize) -> Result<(), Error> {
    validate_string(s)?;
    if s.trim().is_empty() {
        return Err(Error::EmptyString);
    }
    let len = s.chars().count();
    if len > max_len {
        return Err(Error::StringTooLong { len, max: max_len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_validation() {
        assert_eq!(validate_content("hello", 10), Ok(()));
        assert_eq!(validate_content(" \n\t", 10), Err(Error::EmptyString));
        assert_eq!(
            validate_content("a\0b", 10),
            Err(Error::NullByteInString(String::from("a\0b")))
        );
        assert_eq!(
            validate_content("ééééé", 4),
            Err(Error::StringTooLong { len: 5, max: 4 })
        );
        assert_eq!(validate_content("ééééé", 5), Ok(()));
    }

    #[test]
    fn null_bytes_never_validate() {
        bolero::check!()
            .with_type::<String>()
            .cloned()
            .for_each(|s| {
                assert_eq!(validate_string(&s).is_ok(), !s.contains('\0'));
            })
    }
}
