//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "techblog",
    version,
    about = "Command-line client for the techblog platform",
    long_about = "Read and write techblog posts and comments.\n\n\
                  The session is kept between runs; an expired session is\n\
                  cleared automatically and you are asked to log in again."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Backend base URL (overrides config and TECHBLOG_API_URL).
    #[arg(long = "api-url", value_name = "URL", global = true)]
    pub api_url: Option<String>,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Log in with email and password.
    Login {
        /// Account email (defaults to the last one used).
        #[arg(long)]
        email: Option<String>,
    },

    /// Create an account and log in.
    Register {
        #[arg(long)]
        username: String,

        #[arg(long)]
        email: String,
    },

    /// Forget the stored session.
    Logout,

    /// Show who is logged in.
    Whoami,

    /// Browse and write posts.
    #[command(subcommand)]
    Posts(PostsCommand),

    /// Read and write comments.
    #[command(subcommand)]
    Comments(CommentsCommand),

    /// Upload an image and print its URL.
    Upload {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum PostsCommand {
    /// List published posts.
    List {
        #[arg(long, default_value_t = 0)]
        page: u32,

        #[arg(long, default_value_t = 10)]
        size: u32,
    },

    /// Show one post by slug.
    Show { slug: String },

    /// Write a new post.
    Create(PostArgs),

    /// Edit an existing post; omitted fields keep their current value.
    Edit {
        id: i64,

        #[command(flatten)]
        fields: PostEditArgs,
    },

    /// Delete a post (admins may delete any post).
    Delete {
        id: i64,

        /// Use the admin endpoint.
        #[arg(long)]
        admin: bool,
    },

    /// Like or unlike a post.
    Like { id: i64 },
}

#[derive(Args)]
pub struct PostArgs {
    #[arg(long)]
    pub title: String,

    /// File holding the post body ("-" reads stdin).
    #[arg(long = "content-file", value_name = "PATH")]
    pub content_file: PathBuf,

    #[arg(long)]
    pub excerpt: Option<String>,

    /// Comma-separated tags.
    #[arg(long)]
    pub tags: Option<String>,

    /// Cover image URL, e.g. from `techblog upload`.
    #[arg(long)]
    pub cover: Option<String>,

    /// draft, published or archived.
    #[arg(long, default_value = "draft")]
    pub status: String,
}

#[derive(Args)]
pub struct PostEditArgs {
    #[arg(long)]
    pub title: Option<String>,

    #[arg(long = "content-file", value_name = "PATH")]
    pub content_file: Option<PathBuf>,

    #[arg(long)]
    pub excerpt: Option<String>,

    #[arg(long)]
    pub tags: Option<String>,

    #[arg(long)]
    pub cover: Option<String>,

    #[arg(long)]
    pub status: Option<String>,
}

#[derive(Subcommand)]
pub enum CommentsCommand {
    /// List comments under a post.
    List {
        #[arg(value_name = "POST_ID")]
        post_id: i64,
    },

    /// Comment on a post.
    Add {
        #[arg(value_name = "POST_ID")]
        post_id: i64,

        text: String,
    },

    /// Delete a comment.
    Delete {
        #[arg(value_name = "POST_ID")]
        post_id: i64,

        #[arg(value_name = "COMMENT_ID")]
        id: String,

        /// Use the admin endpoint.
        #[arg(long)]
        admin: bool,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_nested_commands() {
        let cli = Cli::try_parse_from(["techblog", "posts", "list", "--page", "2"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Posts(PostsCommand::List { page: 2, size: 10 })
        ));

        let cli = Cli::try_parse_from([
            "techblog",
            "--api-url",
            "http://blog.test",
            "comments",
            "delete",
            "7",
            "abc",
            "--admin",
        ])
        .unwrap();
        assert_eq!(cli.api_url.as_deref(), Some("http://blog.test"));
        match cli.command {
            Command::Comments(CommentsCommand::Delete { post_id, id, admin }) => {
                assert_eq!(post_id, 7);
                assert_eq!(id, "abc");
                assert!(admin);
            }
            _ => panic!("expected comments delete"),
        }
    }

    #[test]
    fn test_register_requires_username() {
        assert!(Cli::try_parse_from(["techblog", "register", "--email", "a@b.com"]).is_err());
    }
}
