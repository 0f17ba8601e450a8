mod comment;
pub use comment::{build_tree, CommentNode};

mod http;
pub use http::HttpApi;

mod order;
pub use order::OrderExt;

mod overlay;
pub use overlay::VoteOverlay;

pub mod render;

mod thread;
pub use thread::ThreadView;

pub mod api {
    pub use pawprint_api::*;
}

pub mod prelude {
    pub use crate::{api::ForumApi, OrderExt};
}
