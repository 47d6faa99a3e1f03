use std::str::FromStr;

pub const USERS: &str = "users";
pub const POSTS: &str = "posts";
pub const FOLLOWS: &str = "follows";
pub const NOTIFICATIONS: &str = "notifications";
pub const MESSAGES: &str = "messages";

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 64;
pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_ABOUT_ME_LENGTH: usize = 140;
pub const MAX_POST_LENGTH: usize = 140;
pub const MAX_MESSAGE_LENGTH: usize = 140;

/// Seconds a bearer token must still be valid for to be handed out again.
pub const TOKEN_REUSE_MARGIN_SECS: i64 = 60;

const DEV_SECRET_KEY: &str = "you-will-never-guess";

#[derive(Debug, Clone)]
pub struct Settings {
    pub secret_key: String,
    pub posts_per_page: usize,
    pub exact_page_counts: bool,
    pub token_ttl_secs: i64,
    pub reset_token_ttl_secs: i64,
    pub last_seen_interval_secs: i64,
    pub follow_write_attempts: u32,
    pub bind_addr: String,
    pub seed_demo_data: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            secret_key: DEV_SECRET_KEY.to_string(),
            posts_per_page: 25,
            exact_page_counts: false,
            token_ttl_secs: 3600,
            reset_token_ttl_secs: 600,
            last_seen_interval_secs: 60,
            follow_write_attempts: 3,
            bind_addr: "0.0.0.0:5000".to_string(),
            seed_demo_data: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secret_key = std::env::var("MICROBLOG_SECRET_KEY").unwrap_or_else(|_| {
            log::warn!("MICROBLOG_SECRET_KEY not set, using the development key");
            defaults.secret_key.clone()
        });

        Self {
            secret_key,
            posts_per_page: env_or("MICROBLOG_POSTS_PER_PAGE", defaults.posts_per_page).max(1),
            exact_page_counts: env_or("MICROBLOG_EXACT_PAGE_COUNTS", defaults.exact_page_counts),
            token_ttl_secs: env_or("MICROBLOG_TOKEN_TTL_SECS", defaults.token_ttl_secs),
            reset_token_ttl_secs: env_or("MICROBLOG_RESET_TOKEN_TTL_SECS", defaults.reset_token_ttl_secs),
            last_seen_interval_secs: env_or("MICROBLOG_LAST_SEEN_INTERVAL_SECS", defaults.last_seen_interval_secs),
            follow_write_attempts: env_or("MICROBLOG_FOLLOW_WRITE_ATTEMPTS", defaults.follow_write_attempts).max(1),
            bind_addr: env_or("MICROBLOG_BIND_ADDR", defaults.bind_addr),
            seed_demo_data: env_or("MICROBLOG_SEED_DEMO_DATA", defaults.seed_demo_data),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub fn follow_edge_id(follower_id: &str, followee_id: &str) -> String {
    format!("{}:{}", follower_id, followee_id)
}
