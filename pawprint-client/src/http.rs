use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};

use crate::api::{
    AuthToken, Comment, CommentId, EditComment, Error, ForumApi, NewComment, NewPost, Post,
    PostId, PostOrder, UserId, Vote, VoteTarget,
};

/// `ForumApi` over the server's HTTP interface
#[derive(Clone, Debug)]
pub struct HttpApi {
    client: reqwest::Client,
    host: String,
    token: Option<AuthToken>,
}

impl HttpApi {
    pub fn new(host: String, token: Option<AuthToken>) -> HttpApi {
        HttpApi {
            client: reqwest::Client::new(),
            host: String::from(host.trim_end_matches('/')),
            token,
        }
    }

    /// Revokes this client's session token
    pub async fn unauth(&mut self) -> Result<(), Error> {
        Self::send(self.request(Method::POST, "unauth"))
            .await
            .map(|_| ())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}/api/{}", self.host, path));
        match self.token {
            Some(token) => req.bearer_auth(token.0),
            None => req,
        }
    }

    async fn send(req: RequestBuilder) -> Result<Response, Error> {
        let resp = req.send().await.map_err(transport_error)?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.bytes().await.map_err(transport_error)?;
        Err(Error::parse(&body).unwrap_or_else(|err| {
            tracing::warn!(?err, %status, "server returned an unparseable error");
            Error::Unknown(format!("server answered with status {status}"))
        }))
    }

    async fn call<R>(req: RequestBuilder) -> Result<R, Error>
    where
        R: for<'de> serde::Deserialize<'de>,
    {
        Self::send(req)
            .await?
            .json()
            .await
            .map_err(transport_error)
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    tracing::error!(?err, "failed talking to the forum server");
    Error::Unknown(format!("transport error: {err}"))
}

fn order_param(order: PostOrder) -> &'static str {
    match order {
        PostOrder::New => "new",
        PostOrder::Top => "top",
    }
}

#[async_trait]
impl ForumApi for HttpApi {
    async fn whoami(&mut self) -> Result<UserId, Error> {
        Self::call(self.request(Method::GET, "whoami")).await
    }

    async fn fetch_posts(&mut self, order: PostOrder) -> Result<Vec<Post>, Error> {
        Self::call(self.request(Method::GET, &format!("posts?order={}", order_param(order)))).await
    }

    async fn fetch_post_by_slug(&mut self, slug: &str) -> Result<Post, Error> {
        Self::call(self.request(Method::GET, &format!("posts-by-slug/{slug}"))).await
    }

    async fn fetch_comments(&mut self, post: PostId) -> Result<Vec<Comment>, Error> {
        Self::call(self.request(Method::GET, &format!("posts/{}/comments", post.0))).await
    }

    async fn create_post(&mut self, post: NewPost) -> Result<Post, Error> {
        Self::call(self.request(Method::POST, "posts").json(&post)).await
    }

    async fn create_comment(&mut self, comment: NewComment) -> Result<Comment, Error> {
        Self::call(self.request(Method::POST, "comments").json(&comment)).await
    }

    async fn edit_comment(&mut self, comment: CommentId, edit: EditComment) -> Result<(), Error> {
        Self::send(
            self.request(Method::PUT, &format!("comments/{}", comment.0))
                .json(&edit),
        )
        .await
        .map(|_| ())
    }

    async fn delete_comment(&mut self, comment: CommentId) -> Result<(), Error> {
        Self::send(self.request(Method::DELETE, &format!("comments/{}", comment.0)))
            .await
            .map(|_| ())
    }

    async fn vote(&mut self, target: VoteTarget, vote: Vote) -> Result<i64, Error> {
        let path = match target {
            VoteTarget::Post(p) => format!("posts/{}/vote", p.0),
            VoteTarget::Comment(c) => format!("comments/{}/vote", c.0),
        };
        Self::call(self.request(Method::POST, &path).json(&vote)).await
    }
}
