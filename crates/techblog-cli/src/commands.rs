//! Command handlers.

use std::io::{self, BufRead, Read, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use techblog_core::models::{PostRequest, PostStatus};
use techblog_core::{ApiClient, Config};
use tracing::warn;

use crate::cli::{CommentsCommand, Command, PostArgs, PostEditArgs, PostsCommand};

pub async fn run(command: Command, client: &ApiClient, config: &mut Config) -> Result<()> {
    match command {
        Command::Login { email } => login(client, config, email).await,
        Command::Register { username, email } => register(client, config, &username, &email).await,
        Command::Logout => {
            if client.logout() {
                println!("Logged out.");
            } else {
                println!("Not logged in.");
            }
            Ok(())
        }
        Command::Whoami => {
            match client.session().user() {
                Some(user) => println!("{} <{}> ({})", user.username, user.email, user.role.as_str()),
                None => println!("Not logged in."),
            }
            Ok(())
        }
        Command::Posts(command) => posts(client, command).await,
        Command::Comments(command) => comments(client, command).await,
        Command::Upload { file } => upload(client, &file).await,
    }
}

async fn login(client: &ApiClient, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    let user = client.login(&email, &password).await?;
    remember_email(config, email);
    println!("Logged in as {}.", user.username);
    Ok(())
}

async fn register(client: &ApiClient, config: &mut Config, username: &str, email: &str) -> Result<()> {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    let user = client.register(username, email, &password).await?;
    remember_email(config, email.to_string());
    println!("Welcome, {}! You are now logged in.", user.username);
    Ok(())
}

fn remember_email(config: &mut Config, email: String) {
    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

async fn posts(client: &ApiClient, command: PostsCommand) -> Result<()> {
    match command {
        PostsCommand::List { page, size } => {
            let listing = client.list_posts(page, size).await?;
            if listing.content.is_empty() {
                println!("No posts yet.");
                return Ok(());
            }
            for post in &listing.content {
                println!(
                    "#{:<5} {}  by {} {}  ({} likes)",
                    post.id,
                    post.title,
                    post.author_username,
                    post.age_display(),
                    post.like_count
                );
                println!("       {}", post.slug);
            }
            println!(
                "Page {} of {} ({} posts)",
                listing.number + 1,
                listing.total_pages.max(1),
                listing.total_elements
            );
        }
        PostsCommand::Show { slug } => {
            let post = client.get_post(&slug).await?;
            let user = client.session().user();

            println!("{}", post.title);
            println!(
                "by {}, {} | {} views | {} likes{}",
                post.author_username,
                post.age_display(),
                post.view_count,
                post.like_count,
                if post.liked_by_current_user { " (liked)" } else { "" }
            );
            let tags = post.tags();
            if !tags.is_empty() {
                println!("tags: {}", tags.join(", "));
            }
            if post.can_edit(user.as_ref()) {
                println!("[{}] id {}", post.status, post.id);
            }
            println!();
            println!("{}", post.content);
        }
        PostsCommand::Create(args) => {
            let request = new_post_request(args)?;
            let post = client.create_post(&request).await?;
            println!("Created post #{} ({}).", post.id, post.slug);
        }
        PostsCommand::Edit { id, fields } => {
            let current = client.get_post_by_id(id).await?;
            let mut request = current.to_request();
            apply_edits(&mut request, fields)?;
            let post = client.update_post(id, &request).await?;
            println!("Updated post #{} ({}).", post.id, post.slug);
        }
        PostsCommand::Delete { id, admin } => {
            if admin {
                client.admin_delete_post(id).await?;
            } else {
                client.delete_post(id).await?;
            }
            println!("Deleted post #{}.", id);
        }
        PostsCommand::Like { id } => {
            if client.toggle_like(id).await? {
                println!("Liked post #{}.", id);
            } else {
                println!("Unliked post #{}.", id);
            }
        }
    }
    Ok(())
}

async fn comments(client: &ApiClient, command: CommentsCommand) -> Result<()> {
    match command {
        CommentsCommand::List { post_id } => {
            let comments = client.list_comments(post_id).await?;
            if comments.is_empty() {
                println!("No comments yet.");
            }
            let user = client.session().user();
            for comment in &comments {
                let marker = if comment.can_delete(user.as_ref()) {
                    format!("  [{}]", comment.id)
                } else {
                    String::new()
                };
                println!("{} {}{}", comment.author_username, comment.age_display(), marker);
                println!("  {}", comment.content);
            }
        }
        CommentsCommand::Add { post_id, text } => {
            let comment = client.add_comment(post_id, &text).await?;
            println!("Comment {} added.", comment.id);
        }
        CommentsCommand::Delete { post_id, id, admin } => {
            if admin {
                client.admin_delete_comment(post_id, &id).await?;
            } else {
                client.delete_comment(post_id, &id).await?;
            }
            println!("Deleted comment {}.", id);
        }
    }
    Ok(())
}

async fn upload(client: &ApiClient, file: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload")
        .to_string();

    let url = client
        .upload_image(&file_name, content_type_for(file), bytes)
        .await?;
    println!("{}", url);
    Ok(())
}

fn new_post_request(args: PostArgs) -> Result<PostRequest> {
    Ok(PostRequest {
        title: args.title,
        content: read_content(&args.content_file)?,
        excerpt: args.excerpt,
        cover_image_url: args.cover,
        tags: args.tags,
        status: Some(parse_status(&args.status)?),
    })
}

fn apply_edits(request: &mut PostRequest, fields: PostEditArgs) -> Result<()> {
    if let Some(title) = fields.title {
        request.title = title;
    }
    if let Some(path) = fields.content_file {
        request.content = read_content(&path)?;
    }
    if fields.excerpt.is_some() {
        request.excerpt = fields.excerpt;
    }
    if fields.tags.is_some() {
        request.tags = fields.tags;
    }
    if fields.cover.is_some() {
        request.cover_image_url = fields.cover;
    }
    if let Some(status) = fields.status {
        request.status = Some(parse_status(&status)?);
    }
    Ok(())
}

fn parse_status(value: &str) -> Result<PostStatus> {
    value.parse::<PostStatus>().map_err(|e| anyhow!(e))
}

fn read_content(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut content = String::new();
        io::stdin().read_to_string(&mut content)?;
        return Ok(content);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("{} is required", label.trim_end_matches(": "));
    }
    Ok(value)
}

/// Guess the image MIME type from the file extension.
fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
