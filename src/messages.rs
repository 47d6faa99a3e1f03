//! Private messages and the per-user notification slots that announce them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::*;
use crate::core::errors::DomainError;
use crate::core::helpers::{clamp_page, page_offset};
use crate::core::pipeline::Pipeline;
use crate::core::store::{decode, insert_record, DocumentStore, Filter, SortOrder, StoreError};
use crate::models::models::{AuthorDisplay, Message, Notification, User};
use crate::users::{display_of, UserDirectory};

pub const UNREAD_MESSAGE_COUNT: &str = "unread_message_count";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageItem {
    pub message: Message,
    pub sender: AuthorDisplay,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessagePage {
    pub items: Vec<MessageItem>,
    pub page: u64,
    pub next_page: Option<u64>,
    pub prev_page: Option<u64>,
}

fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// Replace the `(user_id, name)` notification with a new payload.
pub fn add_notification<S: DocumentStore + ?Sized>(
    store: &S,
    user_id: &str,
    name: &str,
    payload: Value,
    now: DateTime<Utc>,
) -> Result<Notification, DomainError> {
    store.delete_many(
        NOTIFICATIONS,
        &Filter::And(vec![Filter::eq("user_id", user_id), Filter::eq("name", name)]),
    )?;
    let notification = Notification {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        name: name.to_string(),
        payload,
        timestamp: epoch_seconds(now),
    };
    insert_record(store, NOTIFICATIONS, &notification)?;
    Ok(notification)
}

/// Notifications newer than `since` (epoch seconds), oldest first.
pub fn notifications_since<S: DocumentStore + ?Sized>(
    store: &S,
    user_id: &str,
    since: f64,
) -> Result<Vec<Notification>, DomainError> {
    let docs = Pipeline::new()
        .filter(Filter::And(vec![Filter::eq("user_id", user_id), Filter::gt("timestamp", since)]))
        .sort("timestamp", SortOrder::Asc)
        .run(store, NOTIFICATIONS)?;
    Ok(docs.into_iter().map(decode).collect::<Result<_, _>>()?)
}

pub struct Mailbox<'a, S: ?Sized> {
    store: &'a S,
    per_page: usize,
}

impl<'a, S: DocumentStore + ?Sized> Mailbox<'a, S> {
    pub fn new(store: &'a S, per_page: usize) -> Self {
        Self {
            store,
            per_page: per_page.max(1),
        }
    }

    pub fn send_message(
        &self,
        sender_id: &str,
        recipient_username: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<Message, DomainError> {
        let body = body.trim();
        let len = body.chars().count();
        if len == 0 || len > MAX_MESSAGE_LENGTH {
            return Err(DomainError::invalid(format!(
                "Message must be 1-{} characters",
                MAX_MESSAGE_LENGTH
            )));
        }
        let users = UserDirectory::new(self.store);
        users.get(sender_id)?;
        let recipient = users.get_by_username(recipient_username)?;

        let message = Message {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient.id.clone(),
            body: body.to_string(),
            timestamp: now,
        };
        insert_record(self.store, MESSAGES, &message)?;

        let unread = self.new_message_count(&recipient)?;
        add_notification(self.store, &recipient.id, UNREAD_MESSAGE_COUNT, Value::from(unread), now)?;
        log::debug!("message {} from {} to {}", message.id, sender_id, recipient.id);
        Ok(message)
    }

    /// Messages to `user` newer than their read cursor.
    pub fn new_message_count(&self, user: &User) -> Result<usize, DomainError> {
        let mut filter = vec![Filter::eq("recipient_id", user.id.as_str())];
        if let Some(read) = user.last_message_read_time {
            filter.push(Filter::gt("timestamp", read.timestamp_micros()));
        }
        Ok(self.store.count(MESSAGES, &Filter::And(filter))?)
    }

    /// Mark everything read and return one page of received messages, newest first.
    pub fn inbox(&self, user_id: &str, page: i64, now: DateTime<Utc>) -> Result<MessagePage, DomainError> {
        let page = clamp_page(page);
        UserDirectory::new(self.store).mark_messages_read(user_id, now)?;
        add_notification(self.store, user_id, UNREAD_MESSAGE_COUNT, Value::from(0), now)?;

        let docs = Pipeline::new()
            .filter(Filter::eq("recipient_id", user_id))
            .sort("timestamp", SortOrder::Desc)
            .skip(page_offset(page, self.per_page))
            .limit(self.per_page.saturating_add(1))
            .lookup(USERS, "sender_id", "_id", "sender")
            .unwind("sender")
            .run(self.store, MESSAGES)?;

        let mut items = docs.into_iter().map(message_item).collect::<Result<Vec<_>, _>>()?;
        let has_more = items.len() > self.per_page;
        items.truncate(self.per_page);

        Ok(MessagePage {
            items,
            page,
            next_page: has_more.then_some(page + 1),
            prev_page: (page > 1).then(|| page - 1),
        })
    }
}

fn message_item(mut doc: Value) -> Result<MessageItem, StoreError> {
    let sender = doc
        .as_object_mut()
        .and_then(|map| map.remove("sender"))
        .unwrap_or(Value::Null);
    let sender: User = decode(sender)?;
    Ok(MessageItem {
        message: decode(doc)?,
        sender: display_of(&sender),
    })
}
