use anyhow::Context;
use pawprint_client::{
    api::{AuthToken, CommentId, ForumApi, NewPost, NewUser, PostOrder, Uuid, Vote, VoteTarget},
    render, HttpApi, OrderExt, ThreadView,
};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long, env = "PAWPRINT_HOST")]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Create a user and print their session token
    CreateUser {
        /// Username
        name: String,

        /// Allow the user to delete other people's comments
        #[structopt(long)]
        moderator: bool,
    },

    /// List posts
    Posts {
        /// Rank by score instead of recency
        #[structopt(long)]
        top: bool,
    },

    /// Display a post and its comment tree
    Thread { slug: String },

    /// Create a post
    Post { title: String, body: String },

    /// Comment on a post
    Reply {
        slug: String,

        /// Comment to reply to, the post itself if unset
        #[structopt(long)]
        parent: Option<Uuid>,

        content: String,
    },

    /// Vote on a post, or on one of its comments
    Vote {
        slug: String,

        #[structopt(long)]
        comment: Option<Uuid>,

        /// One of `up`, `down` or `none`
        #[structopt(parse(try_from_str = parse_vote))]
        vote: Vote,
    },

    /// Revoke the current session token
    Logout,
}

fn parse_vote(s: &str) -> anyhow::Result<Vote> {
    match s {
        "up" => Ok(Vote::Up),
        "down" => Ok(Vote::Down),
        "none" => Ok(Vote::None),
        _ => Err(anyhow::anyhow!("unknown vote {s:?}")),
    }
}

fn token_from_env(var: &str) -> anyhow::Result<AuthToken> {
    let tok = std::env::var(var).with_context(|| format!("retrieving {var} environment variable"))?;
    let tok = Uuid::try_parse(&tok).with_context(|| format!("parsing {var} as an auth token"))?;
    Ok(AuthToken(tok))
}

fn session_token() -> Option<AuthToken> {
    match token_from_env("PAWPRINT_TOKEN") {
        Ok(tok) => Some(tok),
        Err(err) => {
            tracing::debug!(?err, "no session token, continuing anonymously");
            None
        }
    }
}

fn show_thread(view: &ThreadView<HttpApi>) {
    let post = view.post();
    println!("{} [{}] ({} comments)", post.title, post.score, post.comment_count);
    println!("{}", post.body);
    render::walk(view.tree(), |node, depth| {
        let c = &node.comment;
        println!(
            "{:indent$}[{}] {} {}{}",
            "",
            c.score,
            c.id.0,
            c.content,
            if c.edited_at.is_some() { " (edited)" } else { "" },
            indent = 2 * depth,
        );
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <Opt as structopt::StructOpt>::from_args();
    let mut api = HttpApi::new(opt.host.clone(), session_token());

    match opt.cmd {
        Command::CreateUser { name, moderator } => {
            let token: AuthToken = reqwest::Client::new()
                .post(format!("{}/api/admin/create-user", opt.host))
                .json(&NewUser::new(name, moderator))
                .bearer_auth(token_from_env("ADMIN_TOKEN")?.0)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
                .context("parsing session token")?;
            println!("{}", token.0);
        }
        Command::Posts { top } => {
            let order = match top {
                true => PostOrder::Top,
                false => PostOrder::New,
            };
            let mut posts = api.fetch_posts(order).await?;
            order.sort(&mut posts);
            for p in posts {
                println!("[{}] {} ({} comments)", p.score, p.slug, p.comment_count);
            }
        }
        Command::Thread { slug } => {
            let view = ThreadView::open(api, &slug).await?;
            show_thread(&view);
        }
        Command::Post { title, body } => {
            let post = api.create_post(NewPost::new(title, body)).await?;
            println!("{}", post.slug);
        }
        Command::Reply {
            slug,
            parent,
            content,
        } => {
            let mut view = ThreadView::open(api, &slug).await?;
            view.reply(parent.map(CommentId), content).await?;
            show_thread(&view);
        }
        Command::Vote {
            slug,
            comment,
            vote,
        } => {
            let mut view = ThreadView::open(api, &slug).await?;
            let target = match comment {
                Some(c) => {
                    view.vote_comment(CommentId(c), vote).await?;
                    VoteTarget::Comment(CommentId(c))
                }
                None => {
                    view.vote_post(vote).await?;
                    VoteTarget::Post(view.post().id)
                }
            };
            if let Some(score) = view.displayed_score(&target) {
                println!("{score}");
            }
        }
        Command::Logout => {
            api.unauth().await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use structopt::StructOpt;

    use super::*;

    fn parse(args: &[&str]) -> Result<Opt, structopt::clap::Error> {
        Opt::from_iter_safe(["pawprint-ctl", "--host", "http://localhost:3000"].iter().chain(args))
    }

    #[test]
    fn votes_are_spelled_out() {
        assert!(matches!(parse_vote("up"), Ok(Vote::Up)));
        assert!(matches!(parse_vote("down"), Ok(Vote::Down)));
        assert!(matches!(parse_vote("none"), Ok(Vote::None)));
        assert!(parse_vote("-1").is_err());
        assert!(parse_vote("1").is_err());
    }

    #[test]
    fn vote_command_parses() {
        let opt = parse(&["vote", "leash-free-parks", "down"]).unwrap();
        assert!(matches!(
            opt.cmd,
            Command::Vote {
                comment: None,
                vote: Vote::Down,
                ..
            }
        ));
        assert!(parse(&["vote", "leash-free-parks", "-1"]).is_err());
    }
}
