use chrono::{DateTime, Duration, Utc};

use crate::config::*;
use crate::core::errors::DomainError;
use crate::core::store::{set_fields, DocumentStore, IndexSpec, SortOrder, StoreError};
use crate::follow::FollowGraph;
use crate::posts::PostStore;
use crate::users::{NewUser, UserDirectory};

/// Create every index the components rely on. Safe to call on each start.
pub fn ensure_indexes<S: DocumentStore + ?Sized>(store: &S) -> Result<(), StoreError> {
    store.create_index(USERS, IndexSpec::unique("users_username", "username"))?;
    store.create_index(USERS, IndexSpec::unique("users_email", "email"))?;
    store.create_index(USERS, IndexSpec::unique("users_token", "token"))?;

    store.create_index(
        POSTS,
        IndexSpec::new(
            "posts_author_timestamp",
            &[("author_id", SortOrder::Asc), ("timestamp", SortOrder::Desc)],
        ),
    )?;
    store.create_index(POSTS, IndexSpec::new("posts_timestamp", &[("timestamp", SortOrder::Desc)]))?;

    store.create_index(FOLLOWS, IndexSpec::new("follows_follower", &[("follower_id", SortOrder::Asc)]))?;
    store.create_index(FOLLOWS, IndexSpec::new("follows_followee", &[("followee_id", SortOrder::Asc)]))?;

    store.create_index(
        NOTIFICATIONS,
        IndexSpec::new("notifications_user", &[("user_id", SortOrder::Asc), ("timestamp", SortOrder::Asc)]),
    )?;
    store.create_index(
        MESSAGES,
        IndexSpec::new("messages_recipient", &[("recipient_id", SortOrder::Asc), ("timestamp", SortOrder::Desc)]),
    )?;

    log::debug!("indexes ensured");
    Ok(())
}

struct DemoUser {
    username: &'static str,
    about_me: &'static str,
    posts: &'static [&'static str],
}

const DEMO_USERS: &[DemoUser] = &[
    DemoUser {
        username: "test",
        about_me: "Test user bio",
        posts: &["This is my first post!"],
    },
    DemoUser {
        username: "alice",
        about_me: "Hello, I'm Alice!",
        posts: &[
            "Welcome to my page! Excited to share thoughts here.",
            "Just finished an amazing project. Feeling productive today!",
        ],
    },
    DemoUser {
        username: "bob",
        about_me: "Bob's corner of the internet",
        posts: &["Hey everyone! Just joined, looking forward to connecting with you all."],
    },
];

/// Create the demo accounts (password `{username}-password`) and `test -> bob` if missing.
pub fn seed_demo_data<S: DocumentStore + ?Sized>(store: &S, now: DateTime<Utc>) -> Result<(), DomainError> {
    let users = UserDirectory::new(store);
    let posts = PostStore::new(store);
    let mut offset = 0;

    for demo in DEMO_USERS {
        if users.find_by_username(demo.username)?.is_some() {
            continue;
        }
        let user = users.create(NewUser {
            username: demo.username.to_string(),
            email: format!("{}@example.com", demo.username),
            password: format!("{}-password", demo.username),
        })?;
        users.set(&user.id, set_fields([("about_me", demo.about_me)]))?;
        for body in demo.posts {
            posts.create(&user.id, body, now + Duration::seconds(offset))?;
            offset += 1;
        }
    }

    let test = users.get_by_username("test")?;
    let bob = users.get_by_username("bob")?;
    FollowGraph::new(store, 1).follow_user(&test.id, &bob, now)?;

    log::info!("demo data seeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::MemoryStore;
    use crate::core::store::Filter;

    #[test]
    fn indexes_are_idempotent() {
        let store = MemoryStore::new();
        ensure_indexes(&store).unwrap();
        ensure_indexes(&store).unwrap();
    }

    #[test]
    fn seeding_twice_changes_nothing() {
        let store = MemoryStore::new();
        ensure_indexes(&store).unwrap();
        let now = Utc::now();
        seed_demo_data(&store, now).unwrap();
        seed_demo_data(&store, now).unwrap();

        assert_eq!(store.count(USERS, &Filter::All).unwrap(), 3);
        assert_eq!(store.count(POSTS, &Filter::All).unwrap(), 4);
        assert_eq!(store.count(FOLLOWS, &Filter::All).unwrap(), 1);

        let users = UserDirectory::new(&store);
        let test = users.check_password("test", "test-password").unwrap();
        let bob = users.get_by_username("bob").unwrap();
        assert!(FollowGraph::new(&store, 1).is_following(&test.id, &bob.id).unwrap());
        assert_eq!(test.about_me, "Test user bio");
    }
}
