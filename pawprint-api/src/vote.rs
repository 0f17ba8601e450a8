use crate::{CommentId, Error, PostId};
use bolero::generator::TypeGenerator;

/// A user's vote on a post or comment; at most one is active per user and target
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    PartialEq,
    bolero::generator::TypeGenerator,
    serde::Deserialize,
    serde::Serialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub enum Vote {
    Down,
    #[default]
    None,
    Up,
}

impl Vote {
    pub fn value(self) -> i64 {
        match self {
            Vote::Down => -1,
            Vote::None => 0,
            Vote::Up => 1,
        }
    }

    /// How much a target's score moves when a user's vote goes from `previous` to `next`
    pub fn score_delta(previous: Vote, next: Vote) -> i64 {
        next.value() - previous.value()
    }
}

impl TryFrom<i64> for Vote {
    type Error = Error;

    fn try_from(v: i64) -> Result<Vote, Error> {
        match v {
            -1 => Ok(Vote::Down),
            0 => Ok(Vote::None),
            1 => Ok(Vote::Up),
            v => Err(Error::InvalidVote(v)),
        }
    }
}

impl From<Vote> for i64 {
    fn from(v: Vote) -> i64 {
        v.value()
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum VoteTarget {
    Post(PostId),
    Comment(CommentId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_the_integer() {
        assert_eq!(serde_json::to_string(&Vote::Down).unwrap(), "-1");
        assert_eq!(serde_json::from_str::<Vote>("1").unwrap(), Vote::Up);
        assert_eq!(serde_json::from_str::<Vote>("0").unwrap(), Vote::None);
        assert!(serde_json::from_str::<Vote>("2").is_err());
    }

    #[test]
    fn deltas_compose() {
        bolero::check!()
            .with_type::<(Vote, Vote, Vote)>()
            .cloned()
            .for_each(|(a, b, c)| {
                assert_eq!(
                    Vote::score_delta(a, b) + Vote::score_delta(b, c),
                    Vote::score_delta(a, c)
                );
                assert_eq!(Vote::score_delta(a, a), 0);
                assert!(Vote::score_delta(a, b).abs() <= 2);
            })
    }
}
