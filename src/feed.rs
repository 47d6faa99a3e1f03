//! Feed aggregation.
//!
//! Every view is the same query with a different author set: resolve the
//! authors, page through their posts newest first, join author metadata.
//! `next_page` comes from a one-row lookahead, or from an exact count when
//! `exact_page_counts` is enabled.

use serde::Serialize;

use crate::core::errors::DomainError;
use crate::core::helpers::{clamp_page, page_offset};
use crate::core::store::DocumentStore;
use crate::follow::FollowGraph;
use crate::models::models::FeedItem;
use crate::posts::{AuthorSet, PostStore};
use crate::users::UserDirectory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedView {
    /// The viewer and everyone they follow.
    Own,
    Explore,
    User(String),
    /// Same author set as `Own`.
    Followed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    pub page: u64,
    pub next_page: Option<u64>,
    pub prev_page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

pub struct FeedAggregator<'a, S: ?Sized> {
    store: &'a S,
    per_page: usize,
    exact_counts: bool,
}

impl<'a, S: DocumentStore + ?Sized> FeedAggregator<'a, S> {
    pub fn new(store: &'a S, per_page: usize, exact_counts: bool) -> Self {
        Self {
            store,
            per_page: per_page.max(1),
            exact_counts,
        }
    }

    pub fn get_page(&self, view: &FeedView, viewer_id: &str, page: i64) -> Result<FeedPage, DomainError> {
        let page = clamp_page(page);
        let authors = self.authors_for(view, viewer_id)?;
        let posts = PostStore::new(self.store);

        let skip = page_offset(page, self.per_page);
        let mut items = posts.page(&authors, skip, self.per_page.saturating_add(1))?;
        let has_more = items.len() > self.per_page;
        items.truncate(self.per_page);

        let (total, has_more) = if self.exact_counts {
            let total = posts.count(&authors)?;
            (Some(total), total > page_offset(page + 1, self.per_page))
        } else {
            (None, has_more)
        };

        log::debug!("{:?} page {} for {}: {} items", view, page, viewer_id, items.len());

        Ok(FeedPage {
            items,
            page,
            next_page: has_more.then_some(page + 1),
            prev_page: (page > 1).then(|| page - 1),
            total,
        })
    }

    fn authors_for(&self, view: &FeedView, viewer_id: &str) -> Result<AuthorSet, DomainError> {
        match view {
            FeedView::Own | FeedView::Followed => {
                let mut ids = FollowGraph::new(self.store, 1).following(viewer_id)?;
                ids.push(viewer_id.to_string());
                Ok(AuthorSet::Only(ids))
            }
            FeedView::Explore => Ok(AuthorSet::All),
            FeedView::User(username) => {
                let user = UserDirectory::new(self.store).get_by_username(username)?;
                Ok(AuthorSet::Only(vec![user.id]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::ensure_indexes;
    use crate::core::memory::MemoryStore;
    use crate::models::models::User;
    use crate::users::NewUser;
    use chrono::{Duration, Utc};

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        ensure_indexes(&store).unwrap();
        store
    }

    fn register(store: &MemoryStore, name: &str) -> User {
        UserDirectory::new(store)
            .create(NewUser {
                username: name.into(),
                email: format!("{}@example.com", name),
                password: "password123".into(),
            })
            .unwrap()
    }

    fn bodies(page: &FeedPage) -> Vec<&str> {
        page.items.iter().map(|i| i.post.body.as_str()).collect()
    }

    #[test]
    fn own_timeline_merges_followed_authors() {
        let store = store();
        let alice = register(&store, "alice");
        let bob = register(&store, "bob");
        let carol = register(&store, "carol");
        let dave = register(&store, "dave");
        let graph = FollowGraph::new(&store, 3);
        let t = Utc::now();
        graph.follow_user(&alice.id, &bob, t).unwrap();
        graph.follow_user(&alice.id, &carol, t).unwrap();

        let posts = PostStore::new(&store);
        posts.create(&bob.id, "hi", t).unwrap();
        posts.create(&carol.id, "yo", t + Duration::seconds(1)).unwrap();
        posts.create(&alice.id, "me", t + Duration::seconds(2)).unwrap();
        posts.create(&dave.id, "unseen", t + Duration::seconds(3)).unwrap();

        let feed = FeedAggregator::new(&store, 10, false);
        let own = feed.get_page(&FeedView::Own, &alice.id, 1).unwrap();
        assert_eq!(bodies(&own), ["me", "yo", "hi"]);
        assert_eq!(own.next_page, None);
        assert_eq!(own.prev_page, None);
        assert_eq!(feed.get_page(&FeedView::Followed, &alice.id, 1).unwrap(), own);

        let explore = feed.get_page(&FeedView::Explore, &alice.id, 1).unwrap();
        assert_eq!(bodies(&explore), ["unseen", "me", "yo", "hi"]);

        let user = feed.get_page(&FeedView::User("carol".into()), &alice.id, 1).unwrap();
        assert_eq!(bodies(&user), ["yo"]);
        assert_eq!(user.items[0].author.username, "carol");
    }

    #[test]
    fn unknown_user_view_is_not_found() {
        let store = store();
        let alice = register(&store, "alice");
        let feed = FeedAggregator::new(&store, 10, false);
        let err = feed.get_page(&FeedView::User("ghost".into()), &alice.id, 1).unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));
    }

    fn seeded(count: i64) -> (MemoryStore, User) {
        let store = store();
        let alice = register(&store, "alice");
        let posts = PostStore::new(&store);
        let t = Utc::now();
        for i in 0..count {
            posts.create(&alice.id, &format!("post {}", i), t + Duration::seconds(i)).unwrap();
        }
        (store, alice)
    }

    #[test]
    fn exactly_one_full_page_has_no_next() {
        for exact in [false, true] {
            let (store, alice) = seeded(5);
            let feed = FeedAggregator::new(&store, 5, exact);
            let page = feed.get_page(&FeedView::Own, &alice.id, 1).unwrap();
            assert_eq!(page.items.len(), 5);
            assert_eq!(page.next_page, None);
            assert_eq!(page.total, exact.then_some(5));
        }
    }

    #[test]
    fn one_extra_post_spills_to_page_two() {
        for exact in [false, true] {
            let (store, alice) = seeded(6);
            let feed = FeedAggregator::new(&store, 5, exact);

            let first = feed.get_page(&FeedView::Own, &alice.id, 1).unwrap();
            assert_eq!(first.items.len(), 5);
            assert_eq!(first.next_page, Some(2));

            let second = feed.get_page(&FeedView::Own, &alice.id, 2).unwrap();
            assert_eq!(bodies(&second), ["post 0"]);
            assert_eq!(second.next_page, None);
            assert_eq!(second.prev_page, Some(1));
        }
    }

    #[test]
    fn non_positive_pages_clamp_to_first() {
        let (store, alice) = seeded(3);
        let feed = FeedAggregator::new(&store, 2, false);
        let first = feed.get_page(&FeedView::Own, &alice.id, 1).unwrap();
        assert_eq!(feed.get_page(&FeedView::Own, &alice.id, 0).unwrap(), first);
        assert_eq!(feed.get_page(&FeedView::Own, &alice.id, -7).unwrap(), first);
        assert_eq!(first.page, 1);
    }

    #[test]
    fn empty_feed_is_not_an_error() {
        let store = store();
        let alice = register(&store, "alice");
        let feed = FeedAggregator::new(&store, 5, true);
        let page = feed.get_page(&FeedView::Own, &alice.id, 3).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_page, None);
        assert_eq!(page.prev_page, Some(2));
        assert_eq!(page.total, Some(0));
    }

    #[test]
    fn far_pages_and_huge_page_sizes_do_not_overflow() {
        for exact in [false, true] {
            let (store, alice) = seeded(3);

            let far = FeedAggregator::new(&store, 5, exact)
                .get_page(&FeedView::Own, &alice.id, 1 << 32)
                .unwrap();
            assert!(far.items.is_empty());
            assert_eq!(far.page, 1 << 32);
            assert_eq!(far.next_page, None);

            let feed = FeedAggregator::new(&store, usize::MAX, exact);
            let whole = feed.get_page(&FeedView::Own, &alice.id, 1).unwrap();
            assert_eq!(bodies(&whole), ["post 2", "post 1", "post 0"]);
            assert_eq!(whole.next_page, None);
            assert!(feed.get_page(&FeedView::Own, &alice.id, 2).unwrap().items.is_empty());
        }
    }
}
