use crate::{Error, Uuid, MAX_NAME_LEN, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,

    /// Moderators may soft-delete any comment
    pub is_moderator: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewUser {
    pub id: UserId,
    pub name: String,
    pub is_moderator: bool,
}

impl NewUser {
    pub fn new(name: String, is_moderator: bool) -> NewUser {
        NewUser {
            id: UserId(Uuid::new_v4()),
            name,
            is_moderator,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.name)?;
        let valid_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
        if self.name.is_empty()
            || self.name.len() > MAX_NAME_LEN
            || !self.name.chars().all(valid_char)
        {
            return Err(Error::InvalidName(self.name.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert_eq!(NewUser::new(String::from("dog_walker-42"), false).validate(), Ok(()));
        for bad in ["", "has space", "émile", "a/b"] {
            assert_eq!(
                NewUser::new(String::from(bad), false).validate(),
                Err(Error::InvalidName(String::from(bad)))
            );
        }
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(NewUser::new(long, false).validate().is_err());
    }
}
