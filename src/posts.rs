use std::sync::OnceLock;

use ammonia::Builder;
use chrono::{DateTime, Utc};
use html_escape::encode_double_quoted_attribute;
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::config::*;
use crate::core::errors::DomainError;
use crate::core::pipeline::Pipeline;
use crate::core::store::{decode, find_records, insert_record, DocumentStore, Filter, SortOrder, StoreError};
use crate::models::models::{FeedItem, Post, User};
use crate::users::{display_of, UserDirectory};

/// Which authors a post query covers.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorSet {
    All,
    Only(Vec<String>),
}

impl AuthorSet {
    fn filter(&self) -> Filter {
        match self {
            AuthorSet::All => Filter::All,
            AuthorSet::Only(ids) => Filter::is_in("author_id", ids.iter().map(String::as_str)),
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, AuthorSet::Only(ids) if ids.is_empty())
    }
}

fn url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"https?://[^\s<]+").expect("Regex should compile"))
}

/// Strip markup and turn bare URLs into links.
pub fn filter_post_body(body: &str) -> String {
    let clean = Builder::default()
        .link_rel(Some("noopener noreferrer"))
        .clean(body)
        .to_string();

    url_regex()
        .replace_all(&clean, |caps: &regex::Captures| {
            let url = &caps[0];
            format!(
                r#"<a href="{}" target="_blank" rel="noopener noreferrer">{}</a>"#,
                encode_double_quoted_attribute(url),
                url
            )
        })
        .to_string()
}

/// Owner of the `posts` collection.
pub struct PostStore<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: DocumentStore + ?Sized> PostStore<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn create(&self, author_id: &str, body: &str, now: DateTime<Utc>) -> Result<Post, DomainError> {
        let body = body.trim();
        let len = body.chars().count();
        if len == 0 || len > MAX_POST_LENGTH {
            return Err(DomainError::invalid(format!(
                "Post must be 1-{} characters",
                MAX_POST_LENGTH
            )));
        }
        UserDirectory::new(self.store).get(author_id)?;

        let post = Post {
            id: Uuid::new_v4().to_string(),
            author_id: author_id.to_string(),
            body: filter_post_body(body),
            timestamp: now,
        };
        insert_record(self.store, POSTS, &post)?;
        log::debug!("user {} posted {}", author_id, post.id);
        Ok(post)
    }

    /// Posts by one author, newest first.
    pub fn find_by_author(&self, author_id: &str) -> Result<Vec<Post>, DomainError> {
        let docs = Pipeline::new()
            .filter(Filter::eq("author_id", author_id))
            .sort("timestamp", SortOrder::Desc)
            .run(self.store, POSTS)?;
        Ok(docs.into_iter().map(decode).collect::<Result<_, _>>()?)
    }

    /// One window of posts by `authors`, newest first, each joined with its author.
    ///
    /// Posts whose author no longer resolves are left out.
    pub fn page(&self, authors: &AuthorSet, skip: usize, limit: usize) -> Result<Vec<FeedItem>, DomainError> {
        if authors.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let docs = Pipeline::new()
            .filter(authors.filter())
            .sort("timestamp", SortOrder::Desc)
            .skip(skip)
            .limit(limit)
            .lookup(USERS, "author_id", "_id", "author")
            .unwind("author")
            .run(self.store, POSTS)?;

        Ok(docs.into_iter().map(feed_item).collect::<Result<_, _>>()?)
    }

    pub fn count(&self, authors: &AuthorSet) -> Result<usize, DomainError> {
        if authors.is_empty() {
            return Ok(0);
        }
        Ok(self.store.count(POSTS, &authors.filter())?)
    }

    pub fn all(&self) -> Result<Vec<Post>, DomainError> {
        Ok(find_records(self.store, POSTS, &Filter::All)?)
    }
}

fn feed_item(mut doc: Value) -> Result<FeedItem, StoreError> {
    let author = doc
        .as_object_mut()
        .and_then(|map| map.remove("author"))
        .unwrap_or(Value::Null);
    let author: User = decode(author)?;
    Ok(FeedItem {
        post: decode(doc)?,
        author: display_of(&author),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::ensure_indexes;
    use crate::core::memory::MemoryStore;
    use crate::users::NewUser;
    use chrono::Duration;

    fn setup() -> (MemoryStore, User, User) {
        let store = MemoryStore::new();
        ensure_indexes(&store).unwrap();
        let users = UserDirectory::new(&store);
        let mk = |name: &str| {
            users
                .create(NewUser {
                    username: name.into(),
                    email: format!("{}@example.com", name),
                    password: "password123".into(),
                })
                .unwrap()
        };
        let alice = mk("alice");
        let bob = mk("bob");
        (store, alice, bob)
    }

    #[test]
    fn body_is_sanitized_and_linkified() {
        let out = filter_post_body("<script>alert(1)</script>see https://example.com/a?b=1");
        assert!(!out.contains("<script>"));
        assert!(out.contains(r#"<a href="https://example.com/a?b=1""#));
    }

    #[test]
    fn create_validates_body_and_author() {
        let (store, alice, _) = setup();
        let posts = PostStore::new(&store);
        let now = Utc::now();

        assert!(matches!(posts.create(&alice.id, "   ", now), Err(DomainError::Invalid(_))));
        assert!(matches!(
            posts.create(&alice.id, &"x".repeat(MAX_POST_LENGTH + 1), now),
            Err(DomainError::Invalid(_))
        ));
        assert!(matches!(posts.create("ghost", "hello", now), Err(DomainError::NotFound { .. })));

        let post = posts.create(&alice.id, &"é".repeat(MAX_POST_LENGTH), now).unwrap();
        assert_eq!(post.author_id, alice.id);
        assert_eq!(posts.all().unwrap().len(), 1);
    }

    #[test]
    fn find_by_author_is_newest_first() {
        let (store, alice, bob) = setup();
        let posts = PostStore::new(&store);
        let t0 = Utc::now();

        posts.create(&alice.id, "one", t0).unwrap();
        posts.create(&bob.id, "other", t0 + Duration::seconds(1)).unwrap();
        posts.create(&alice.id, "two", t0 + Duration::seconds(2)).unwrap();

        let bodies: Vec<_> = posts.find_by_author(&alice.id).unwrap().into_iter().map(|p| p.body).collect();
        assert_eq!(bodies, ["two", "one"]);
    }

    #[test]
    fn page_joins_authors() {
        let (store, alice, bob) = setup();
        let posts = PostStore::new(&store);
        let t0 = Utc::now();

        posts.create(&alice.id, "a", t0).unwrap();
        posts.create(&bob.id, "b", t0 + Duration::seconds(1)).unwrap();

        let items = posts.page(&AuthorSet::All, 0, 10).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].author.username, "bob");
        assert_eq!(items[1].author.username, "alice");
        assert!(items[0].author.avatar.starts_with("https://www.gravatar.com/avatar/"));

        let only_alice = AuthorSet::Only(vec![alice.id.clone()]);
        assert_eq!(posts.count(&only_alice).unwrap(), 1);
        assert_eq!(posts.page(&only_alice, 0, 10).unwrap()[0].post.body, "a");
    }

    #[test]
    fn empty_author_set_is_an_empty_page() {
        let (store, alice, _) = setup();
        let posts = PostStore::new(&store);
        posts.create(&alice.id, "a", Utc::now()).unwrap();

        let none = AuthorSet::Only(Vec::new());
        assert!(posts.page(&none, 0, 10).unwrap().is_empty());
        assert_eq!(posts.count(&none).unwrap(), 0);
    }
}
