use std::cmp::Reverse;

use crate::api::{Post, PostOrder};

pub trait OrderExt {
    fn sort(&self, posts: &mut [Post]);
}

impl OrderExt for PostOrder {
    fn sort(&self, posts: &mut [Post]) {
        match self {
            PostOrder::New => posts.sort_by_key(|p| (Reverse(p.created_at), p.id)),
            PostOrder::Top => {
                posts.sort_by_key(|p| (Reverse(p.score), Reverse(p.created_at), p.id))
            }
        }
    }
}
