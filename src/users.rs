use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::*;
use crate::core::errors::DomainError;
use crate::core::helpers::{avatar_url, hash_password, verify_password};
use crate::core::store::{find_first, find_record, find_records, insert_record, set_fields, DocumentStore, Filter};
use crate::models::models::{AuthorDisplay, User};

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub about_me: Option<String>,
}

fn username_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("Regex should compile"))
}

fn email_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("Regex should compile"))
}

pub fn validate_username(username: &str) -> Result<(), DomainError> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len) {
        return Err(DomainError::invalid(format!(
            "Username must be {}-{} characters",
            MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
        )));
    }
    if !username_regex().is_match(username) {
        return Err(DomainError::invalid(
            "Username may only contain letters, digits, '.', '_' and '-'",
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), DomainError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(DomainError::invalid(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

pub fn display_of(user: &User) -> AuthorDisplay {
    AuthorDisplay {
        id: user.id.clone(),
        username: user.username.clone(),
        avatar: avatar_url(&user.email, 36),
    }
}

/// Owner of the `users` collection.
pub struct UserDirectory<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: DocumentStore + ?Sized> UserDirectory<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn create(&self, new_user: NewUser) -> Result<User, DomainError> {
        let username = new_user.username.trim().to_string();
        let email = new_user.email.trim().to_lowercase();

        validate_username(&username)?;
        if !email_regex().is_match(&email) {
            return Err(DomainError::invalid("Invalid email address"));
        }
        validate_password(&new_user.password)?;

        let user = User {
            id: Uuid::new_v4().to_string(),
            username,
            email,
            password_hash: hash_password(&new_user.password)?,
            about_me: String::new(),
            last_seen: None,
            token: None,
            token_expiration: None,
            last_message_read_time: None,
        };

        insert_record(self.store, USERS, &user).map_err(DomainError::from_store)?;
        log::info!("registered user {} ({})", user.username, user.id);
        Ok(user)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<User>, DomainError> {
        Ok(find_record(self.store, USERS, id)?)
    }

    pub fn get(&self, id: &str) -> Result<User, DomainError> {
        self.find_by_id(id)?
            .ok_or_else(|| DomainError::not_found("user", id))
    }

    /// Every user, ordered by username.
    pub fn list(&self) -> Result<Vec<User>, DomainError> {
        let mut users: Vec<User> = find_records(self.store, USERS, &Filter::All)?;
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    pub fn find_by_username(&self, username: &str) -> Result<Option<User>, DomainError> {
        Ok(find_first(self.store, USERS, &Filter::eq("username", username))?)
    }

    pub fn get_by_username(&self, username: &str) -> Result<User, DomainError> {
        self.find_by_username(username)?
            .ok_or_else(|| DomainError::not_found("user", username))
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<User>, DomainError> {
        let email = email.trim().to_lowercase();
        Ok(find_first(self.store, USERS, &Filter::eq("email", email))?)
    }

    pub fn update_profile(&self, id: &str, update: ProfileUpdate) -> Result<User, DomainError> {
        let mut fields = serde_json::Map::new();

        if let Some(username) = update.username {
            let username = username.trim().to_string();
            validate_username(&username)?;
            fields.insert("username".to_string(), Value::String(username));
        }
        if let Some(about_me) = update.about_me {
            let about_me = about_me.trim();
            if about_me.chars().count() > MAX_ABOUT_ME_LENGTH {
                return Err(DomainError::invalid(format!(
                    "About me is limited to {} characters",
                    MAX_ABOUT_ME_LENGTH
                )));
            }
            fields.insert("about_me".to_string(), Value::String(about_me.to_string()));
        }

        if !fields.is_empty() {
            let found = self
                .store
                .update(USERS, id, fields)
                .map_err(DomainError::from_store)?;
            if !found {
                return Err(DomainError::not_found("user", id));
            }
        }
        self.get(id)
    }

    pub fn set_password(&self, id: &str, password: &str) -> Result<(), DomainError> {
        validate_password(password)?;
        let hash = hash_password(password)?;
        self.set(id, set_fields([("password_hash", Value::String(hash))]))
    }

    pub fn touch_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.set(id, set_fields([("last_seen", at.timestamp_micros())]))
    }

    pub fn mark_messages_read(&self, id: &str, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.set(id, set_fields([("last_message_read_time", at.timestamp_micros())]))
    }

    /// Unknown usernames and wrong passwords fail identically.
    pub fn check_password(&self, username: &str, password: &str) -> Result<User, DomainError> {
        match self.find_by_username(username.trim())? {
            Some(user) if verify_password(password, &user.password_hash) => Ok(user),
            _ => {
                log::warn!("rejected credentials for login attempt");
                Err(DomainError::InvalidCredential)
            }
        }
    }

    pub(crate) fn set(&self, id: &str, fields: serde_json::Map<String, Value>) -> Result<(), DomainError> {
        let found = self.store.update(USERS, id, fields).map_err(DomainError::from_store)?;
        if found {
            Ok(())
        } else {
            Err(DomainError::not_found("user", id))
        }
    }
}
