use sea_orm::{
    sea_query::{ArrayType, Nullable, ValueType, ValueTypeErr},
    DbErr, QueryResult, TryFromU64, TryGetError, TryGetable, Value,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn into_uuid(self) -> Uuid {
                self.0
            }

            pub fn to_string(&self) -> String {
                self.0.to_string()
            }

            pub fn parse_str(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl TryFrom<String> for $name {
            type Error = uuid::Error;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Ok(Self(Uuid::parse_str(&s)?))
            }
        }

        impl<'a> TryFrom<&'a str> for $name {
            type Error = uuid::Error;

            fn try_from(s: &'a str) -> Result<Self, Self::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        // SeaORM trait implementations
        impl From<$name> for Value {
            fn from(id: $name) -> Self {
                Value::Uuid(Some(Box::new(id.0)))
            }
        }

        impl TryGetable for $name {
            fn try_get_by<I: sea_orm::ColIdx>(
                res: &QueryResult,
                idx: I,
            ) -> Result<Self, TryGetError> {
                let uuid: Uuid = res.try_get_by(idx).map_err(TryGetError::DbErr)?;
                Ok(Self(uuid))
            }
        }

        impl ValueType for $name {
            fn try_from(v: Value) -> Result<Self, ValueTypeErr> {
                match v {
                    Value::Uuid(Some(uuid)) => Ok(Self(*uuid)),
                    _ => Err(ValueTypeErr),
                }
            }

            fn type_name() -> String {
                stringify!($name).to_owned()
            }

            fn array_type() -> ArrayType {
                ArrayType::Uuid
            }

            fn column_type() -> sea_orm::ColumnType {
                sea_orm::ColumnType::Uuid
            }
        }

        impl Nullable for $name {
            fn null() -> Value {
                Value::Uuid(None)
            }
        }

        impl TryFromU64 for $name {
            fn try_from_u64(_: u64) -> Result<Self, DbErr> {
                Err(DbErr::ConvertFromU64(stringify!($name)))
            }
        }
    };
}

// Define all our ID types
define_id!(UserId);
define_id!(GroupId);
define_id!(PostId);
define_id!(CommentId);
define_id!(FollowId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_posts_sort_after_earlier_ones() {
        // Feeds break created_at ties on the post id
        let posts: Vec<PostId> = (0..64).map(|_| PostId::new()).collect();
        let mut sorted = posts.clone();
        sorted.sort_by_key(|id| *id.as_uuid());
        assert_eq!(posts, sorted);
    }

    #[test]
    fn post_id_round_trips_through_a_route() {
        let post_id = PostId::new();
        let route = format!("/posts/{post_id}/comment");

        let segment = route.split('/').nth(2).unwrap();
        assert_eq!(segment.parse::<PostId>().unwrap(), post_id);
        assert!("not-a-post".parse::<PostId>().is_err());
        assert!(<PostId as TryFrom<&str>>::try_from("").is_err());
    }

    #[test]
    fn ids_travel_as_plain_uuid_strings() {
        let group_id = GroupId::new();
        let json = serde_json::to_value(group_id).unwrap();
        assert_eq!(json, serde_json::Value::String(group_id.to_string()));

        let redirect = crate::error::Redirect::PostDetail {
            post_id: PostId::new(),
        };
        let back: crate::error::Redirect =
            serde_json::from_str(&serde_json::to_string(&redirect).unwrap()).unwrap();
        assert_eq!(back, redirect);
    }

    #[test]
    fn store_values_keep_their_id_kind() {
        let user_id = UserId::new();
        let value: Value = user_id.into();
        assert_eq!(<UserId as ValueType>::try_from(value).unwrap(), user_id);

        // A null author on a comment is not a user id
        assert!(<UserId as ValueType>::try_from(UserId::null()).is_err());
        assert_eq!(UserId::column_type(), sea_orm::ColumnType::Uuid);
    }

    #[test]
    fn ids_cannot_come_from_row_counts() {
        assert!(matches!(
            CommentId::try_from_u64(1),
            Err(DbErr::ConvertFromU64("CommentId"))
        ));
    }
}
