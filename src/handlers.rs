use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use spin_sdk::http::{Request, Response};

use crate::auth::{authenticate, Credentials};
use crate::core::errors::{ApiError, DomainError};
use crate::core::helpers::{avatar_url, empty_response, json_response, parse_json_body, path_param};
use crate::core::query_params::{get_f64, get_page, parse_query_params};
use crate::core::store::DocumentStore;
use crate::feed::{FeedAggregator, FeedView};
use crate::follow::FollowGraph;
use crate::messages::{notifications_since, Mailbox};
use crate::models::models::{User, UserView};
use crate::posts::PostStore;
use crate::users::{display_of, NewUser, ProfileUpdate, UserDirectory};
use crate::App;

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct BodyRequest {
    body: String,
}

#[derive(Deserialize)]
struct ResetRequest {
    email: String,
}

#[derive(Deserialize)]
struct NewPassword {
    password: String,
}

/// Authenticate the caller and record the visit.
fn caller<S: DocumentStore>(app: &App<S>, req: &Request) -> Result<User, ApiError> {
    let now = Utc::now();
    let user = authenticate(req, app.store(), app.settings(), now)?;
    app.presence().touch(&user, now);
    Ok(user)
}

fn user_view<S: DocumentStore>(app: &App<S>, user: &User, with_email: bool) -> Result<UserView, DomainError> {
    let graph = FollowGraph::new(app.store(), app.settings().follow_write_attempts);
    Ok(UserView {
        id: user.id.clone(),
        username: user.username.clone(),
        about_me: user.about_me.clone(),
        avatar: avatar_url(&user.email, 128),
        last_seen: user.last_seen,
        followers: graph.followers(&user.id)?,
        following: graph.following(&user.id)?,
        email: with_email.then(|| user.email.clone()),
    })
}

pub fn register<S: DocumentStore>(app: &App<S>, req: &Request) -> Result<Response, ApiError> {
    let new_user: NewUser = parse_json_body(req)?;
    let user = UserDirectory::new(app.store()).create(new_user)?;
    json_response(201, &user_view(app, &user, true)?)
}

pub fn issue_token<S: DocumentStore>(app: &App<S>, req: &Request) -> Result<Response, ApiError> {
    let login: LoginRequest = parse_json_body(req)?;
    let user = UserDirectory::new(app.store()).check_password(&login.username, &login.password)?;
    let token = Credentials::new(app.store(), app.settings()).get_token(&user.id, Utc::now())?;
    json_response(200, &json!({ "token": token, "user_id": user.id }))
}

pub fn revoke_token<S: DocumentStore>(app: &App<S>, req: &Request) -> Result<Response, ApiError> {
    let user = caller(app, req)?;
    Credentials::new(app.store(), app.settings()).revoke_token(&user.id, Utc::now())?;
    Ok(empty_response(204))
}

pub fn get_profile<S: DocumentStore>(app: &App<S>, req: &Request) -> Result<Response, ApiError> {
    let user = caller(app, req)?;
    json_response(200, &user_view(app, &user, true)?)
}

pub fn update_profile<S: DocumentStore>(app: &App<S>, req: &Request) -> Result<Response, ApiError> {
    let user = caller(app, req)?;
    let update: ProfileUpdate = parse_json_body(req)?;
    let user = UserDirectory::new(app.store()).update_profile(&user.id, update)?;
    json_response(200, &user_view(app, &user, true)?)
}

pub fn list_users<S: DocumentStore>(app: &App<S>, req: &Request) -> Result<Response, ApiError> {
    caller(app, req)?;
    let items = UserDirectory::new(app.store())
        .list()?
        .iter()
        .map(|user| user_view(app, user, false))
        .collect::<Result<Vec<_>, _>>()?;
    json_response(200, &json!({ "items": items }))
}

pub fn get_user<S: DocumentStore>(app: &App<S>, req: &Request, user_id: &str) -> Result<Response, ApiError> {
    caller(app, req)?;
    let user = UserDirectory::new(app.store()).get(user_id)?;
    json_response(200, &user_view(app, &user, false)?)
}

/// `followers` or `followed` of one user, as author displays.
pub fn user_relations<S: DocumentStore>(
    app: &App<S>,
    req: &Request,
    user_id: &str,
    followers: bool,
) -> Result<Response, ApiError> {
    caller(app, req)?;
    let users = UserDirectory::new(app.store());
    users.get(user_id)?;

    let graph = FollowGraph::new(app.store(), app.settings().follow_write_attempts);
    let ids = if followers {
        graph.followers(user_id)?
    } else {
        graph.following(user_id)?
    };

    let mut items = Vec::with_capacity(ids.len());
    for id in ids {
        // edges may outlive their user
        if let Some(user) = users.find_by_id(&id)? {
            items.push(display_of(&user));
        }
    }
    json_response(200, &json!({ "items": items }))
}

pub fn create_post<S: DocumentStore>(app: &App<S>, req: &Request) -> Result<Response, ApiError> {
    let user = caller(app, req)?;
    let input: BodyRequest = parse_json_body(req)?;
    let post = PostStore::new(app.store()).create(&user.id, &input.body, Utc::now())?;
    json_response(201, &post)
}

pub fn feed<S: DocumentStore>(app: &App<S>, req: &Request, view: FeedView) -> Result<Response, ApiError> {
    let user = caller(app, req)?;
    let page = get_page(&parse_query_params(&req.uri()));
    let settings = app.settings();
    let feed = FeedAggregator::new(app.store(), settings.posts_per_page, settings.exact_page_counts)
        .get_page(&view, &user.id, page)?;
    json_response(200, &feed)
}

pub fn follow<S: DocumentStore>(app: &App<S>, req: &Request, username: &str, follow: bool) -> Result<Response, ApiError> {
    let user = caller(app, req)?;
    let graph = FollowGraph::new(app.store(), app.settings().follow_write_attempts);
    let outcome = if follow {
        graph.follow(&user.id, username, Utc::now())?
    } else {
        graph.unfollow(&user.id, username)?
    };
    json_response(200, &json!({ "status": outcome.as_str() }))
}

/// Always answers the same way so addresses cannot be probed.
pub fn reset_password_request<S: DocumentStore>(app: &App<S>, req: &Request) -> Result<Response, ApiError> {
    let input: ResetRequest = parse_json_body(req)?;
    if let Some(user) = UserDirectory::new(app.store()).find_by_email(&input.email)? {
        Credentials::new(app.store(), app.settings()).issue_reset_token(&user, Utc::now())?;
        log::info!("password reset requested for user {}", user.id);
    }
    json_response(
        202,
        &json!({ "message": "Check your email for the instructions to reset your password" }),
    )
}

pub fn reset_password<S: DocumentStore>(app: &App<S>, req: &Request, token: &str) -> Result<Response, ApiError> {
    let input: NewPassword = parse_json_body(req)?;
    let user = Credentials::new(app.store(), app.settings())
        .verify_reset_token(token, Utc::now())?
        .ok_or(DomainError::InvalidCredential)?;
    UserDirectory::new(app.store()).set_password(&user.id, &input.password)?;
    log::info!("password reset for user {}", user.id);
    json_response(200, &json!({ "message": "Your password has been reset" }))
}

pub fn notifications<S: DocumentStore>(app: &App<S>, req: &Request) -> Result<Response, ApiError> {
    let user = caller(app, req)?;
    let since = get_f64(&parse_query_params(&req.uri()), "since", 0.0);
    json_response(200, &notifications_since(app.store(), &user.id, since)?)
}

pub fn messages<S: DocumentStore>(app: &App<S>, req: &Request) -> Result<Response, ApiError> {
    let user = caller(app, req)?;
    let page = get_page(&parse_query_params(&req.uri()));
    let inbox = Mailbox::new(app.store(), app.settings().posts_per_page).inbox(&user.id, page, Utc::now())?;
    json_response(200, &inbox)
}

pub fn send_message<S: DocumentStore>(app: &App<S>, req: &Request, username: &str) -> Result<Response, ApiError> {
    let user = caller(app, req)?;
    let input: BodyRequest = parse_json_body(req)?;
    let message = Mailbox::new(app.store(), app.settings().posts_per_page)
        .send_message(&user.id, username, &input.body, Utc::now())?;
    json_response(201, &message)
}

/// Dispatch one request.
pub fn route<S: DocumentStore>(app: &App<S>, req: &Request) -> Result<Response, ApiError> {
    let uri = req.uri();
    let path = req.path();
    let method = req.method().to_string();
    log::debug!("{} {}", method, uri);

    match (method.as_str(), path) {
        ("GET", "/users") => list_users(app, req),
        ("POST", "/users") => register(app, req),
        ("POST", "/tokens") => issue_token(app, req),
        ("DELETE", "/tokens") => revoke_token(app, req),
        ("GET", "/profile") => get_profile(app, req),
        ("PUT", "/profile") => update_profile(app, req),
        ("POST", "/posts") => create_post(app, req),
        ("GET", "/") | ("GET", "/index") => feed(app, req, FeedView::Own),
        ("GET", "/followed") => feed(app, req, FeedView::Followed),
        ("GET", "/explore") => feed(app, req, FeedView::Explore),
        ("GET", "/notifications") => notifications(app, req),
        ("GET", "/messages") => messages(app, req),
        ("POST", "/reset_password_request") => reset_password_request(app, req),
        ("GET", p) if p.starts_with("/users/") && p.ends_with("/followers") => {
            let id = path_param(p.trim_end_matches("/followers"), "/users/")?;
            user_relations(app, req, &id, true)
        }
        ("GET", p) if p.starts_with("/users/") && p.ends_with("/followed") => {
            let id = path_param(p.trim_end_matches("/followed"), "/users/")?;
            user_relations(app, req, &id, false)
        }
        ("GET", p) if p.starts_with("/users/") => get_user(app, req, &path_param(p, "/users/")?),
        ("GET", p) if p.starts_with("/user/") => {
            let username = path_param(p, "/user/")?;
            feed(app, req, FeedView::User(username))
        }
        ("POST", p) if p.starts_with("/follow/") => follow(app, req, &path_param(p, "/follow/")?, true),
        ("POST", p) if p.starts_with("/unfollow/") => follow(app, req, &path_param(p, "/unfollow/")?, false),
        ("POST", p) if p.starts_with("/reset_password/") => {
            reset_password(app, req, &path_param(p, "/reset_password/")?)
        }
        ("POST", p) if p.starts_with("/send_message/") => {
            send_message(app, req, &path_param(p, "/send_message/")?)
        }
        _ => Err(ApiError::NotFound("No route found".to_string())),
    }
}
