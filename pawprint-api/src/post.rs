use crate::{Error, Time, UserId, Uuid, Vote, MAX_CONTENT_LEN, MAX_SLUG_LEN, MAX_TITLE_LEN, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct PostId(pub Uuid);

impl PostId {
    pub fn stub() -> PostId {
        PostId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Post {
    pub id: PostId,
    pub slug: String,
    pub title: String,
    pub body: String,
    pub author_id: UserId,
    pub created_at: Time,

    /// Sum of all active votes on this post
    pub score: i64,

    /// Number of visible comments
    pub comment_count: i64,

    /// Vote of the user who fetched this post, `Vote::None` for anonymous fetches
    pub viewer_vote: Vote,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewPost {
    pub id: PostId,
    pub title: String,
    pub body: String,
}

impl NewPost {
    pub fn new(title: String, body: String) -> NewPost {
        NewPost {
            id: PostId(Uuid::new_v4()),
            title,
            body,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_content(&self.title, MAX_TITLE_LEN)?;
        crate::validate_content(&self.body, MAX_CONTENT_LEN)?;
        self.slug().map(|_| ())
    }

    /// URL slug for this post, derived from its title
    ///
    /// Lowercase ASCII alphanumerics are kept, every other run of characters
    /// becomes a single dash, and leading or trailing dashes are dropped.
    pub fn slug(&self) -> Result<String, Error> {
        let mut slug = String::with_capacity(self.title.len());
        for c in self.title.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
        }
        slug.truncate(MAX_SLUG_LEN);
        let slug = slug.trim_end_matches('-');
        match slug.is_empty() {
            true => Err(Error::InvalidSlug(self.title.clone())),
            false => Ok(String::from(slug)),
        }
    }
}

/// Listing order for the post index
///
/// Posts are ranked newest-first, unlike comments which rank oldest-first
/// among equal scores.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PostOrder {
    #[default]
    New,
    Top,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slug_of(title: &str) -> Result<String, Error> {
        NewPost::new(String::from(title), String::from("body")).slug()
    }

    #[test]
    fn slugs() {
        assert_eq!(slug_of("Dog parks in Lyon").unwrap(), "dog-parks-in-lyon");
        assert_eq!(slug_of("  Cats & dogs!! ").unwrap(), "cats-dogs");
        assert_eq!(slug_of("Café -- terrace").unwrap(), "caf-terrace");
        assert_eq!(
            slug_of("?!"),
            Err(Error::InvalidSlug(String::from("?!")))
        );
    }

    #[test]
    fn slug_is_bounded_and_clean() {
        bolero::check!()
            .with_type::<String>()
            .cloned()
            .for_each(|title| {
                if let Ok(slug) = slug_of(&title) {
                    assert!(!slug.is_empty());
                    assert!(slug.len() <= MAX_SLUG_LEN);
                    assert!(!slug.starts_with('-') && !slug.ends_with('-'));
                    assert!(!slug.contains("--"));
                    assert!(slug
                        .chars()
                        .all(|c| c == '-' || c.is_ascii_lowercase() || c.is_ascii_digit()));
                }
            })
    }

    #[test]
    fn post_order_wire_format() {
        assert_eq!(serde_json::to_string(&PostOrder::Top).unwrap(), r#""top""#);
        assert_eq!(
            serde_json::from_str::<PostOrder>(r#""new""#).unwrap(),
            PostOrder::New
        );
    }
}
