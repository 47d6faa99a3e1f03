use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use microblog::core::db::ensure_indexes;
use microblog::core::errors::DomainError;
use microblog::core::memory::MemoryStore;
use microblog::feed::{FeedAggregator, FeedView};
use microblog::follow::{FollowGraph, FollowOutcome};
use microblog::models::models::User;
use microblog::posts::PostStore;
use microblog::users::{NewUser, UserDirectory};

struct World {
    store: MemoryStore,
    t0: DateTime<Utc>,
}

impl World {
    fn new() -> Self {
        let store = MemoryStore::new();
        ensure_indexes(&store).unwrap();
        Self { store, t0: Utc::now() }
    }

    fn user(&self, name: &str) -> User {
        UserDirectory::new(&self.store)
            .create(NewUser {
                username: name.to_string(),
                email: format!("{}@example.com", name),
                password: "password123".to_string(),
            })
            .unwrap()
    }

    fn post_at(&self, author: &User, body: &str, secs: i64) {
        PostStore::new(&self.store)
            .create(&author.id, body, self.t0 + Duration::seconds(secs))
            .unwrap();
    }

    fn graph(&self) -> FollowGraph<'_, MemoryStore> {
        FollowGraph::new(&self.store, 3)
    }

    fn feed(&self, per_page: usize, exact: bool) -> FeedAggregator<'_, MemoryStore> {
        FeedAggregator::new(&self.store, per_page, exact)
    }
}

#[test]
fn follow_twice_records_one_edge() {
    let w = World::new();
    let a = w.user("alice");
    let b = w.user("bob");

    assert_eq!(w.graph().follow(&a.id, "bob", w.t0).unwrap(), FollowOutcome::Followed);
    assert_eq!(w.graph().follow(&a.id, "bob", w.t0).unwrap(), FollowOutcome::AlreadyFollowing);
    assert_eq!(w.graph().following(&a.id).unwrap(), vec![b.id.clone()]);
    assert_eq!(w.graph().unfollow(&a.id, "bob").unwrap(), FollowOutcome::Unfollowed);
    assert_eq!(w.graph().unfollow(&a.id, "bob").unwrap(), FollowOutcome::NotFollowing);
}

#[test]
fn self_follow_never_mutates() {
    let w = World::new();
    let a = w.user("alice");

    for _ in 0..2 {
        assert!(matches!(
            w.graph().follow(&a.id, "alice", w.t0),
            Err(DomainError::SelfReferenceRejected { .. })
        ));
        assert!(matches!(
            w.graph().unfollow(&a.id, "alice"),
            Err(DomainError::SelfReferenceRejected { .. })
        ));
    }
    assert!(w.graph().following(&a.id).unwrap().is_empty());
    assert!(w.graph().followers(&a.id).unwrap().is_empty());
}

#[test]
fn follow_is_visible_from_both_ends() {
    let w = World::new();
    let a = w.user("alice");
    let b = w.user("bob");

    w.graph().follow(&a.id, "bob", w.t0).unwrap();
    assert!(w.graph().is_following(&a.id, &b.id).unwrap());
    assert!(w.graph().followers(&b.id).unwrap().contains(&a.id));
}

#[test]
fn unknown_target_is_not_found() {
    let w = World::new();
    let a = w.user("alice");
    let b = w.user("bob");
    w.graph().follow_user(&a.id, &b, w.t0).unwrap();

    let err = w.graph().follow(&a.id, "nobody", w.t0).unwrap_err();
    assert!(matches!(err, DomainError::NotFound { .. }));
    assert_eq!(w.graph().following(&a.id).unwrap(), vec![b.id.clone()]);
}

#[test]
fn pages_concatenate_to_the_whole_timeline() {
    let w = World::new();
    let a = w.user("alice");
    let b = w.user("bob");
    w.graph().follow_user(&a.id, &b, w.t0).unwrap();

    // interleaved authors with some equal timestamps
    let total = 23;
    for i in 0..total {
        let author = if i % 3 == 0 { &b } else { &a };
        w.post_at(author, &format!("post {}", i), i / 2);
    }

    for exact in [false, true] {
        let feed = w.feed(5, exact);
        let mut seen = Vec::new();
        let mut page = 1;
        loop {
            let result = feed.get_page(&FeedView::Own, &a.id, page).unwrap();
            seen.extend(result.items);
            match result.next_page {
                Some(next) => page = next as i64,
                None => break,
            }
        }

        assert_eq!(page, 5);
        assert_eq!(seen.len(), total as usize);
        let ids: HashSet<_> = seen.iter().map(|i| i.post.id.clone()).collect();
        assert_eq!(ids.len(), seen.len());
        assert!(seen.windows(2).all(|w| w[0].post.timestamp >= w[1].post.timestamp));
    }
}

#[test]
fn repeated_queries_return_identical_order() {
    let w = World::new();
    let a = w.user("alice");
    for i in 0..6 {
        w.post_at(&a, &format!("same time {}", i), 0);
    }
    let feed = w.feed(4, false);
    let first = feed.get_page(&FeedView::Explore, &a.id, 1).unwrap();
    let second = feed.get_page(&FeedView::Explore, &a.id, 1).unwrap();
    assert_eq!(first, second);
}

#[test]
fn page_boundaries_with_five_per_page() {
    for exact in [false, true] {
        let w = World::new();
        let a = w.user("alice");
        for i in 0..5 {
            w.post_at(&a, &format!("p{}", i), i);
        }
        let page = w.feed(5, exact).get_page(&FeedView::User("alice".into()), &a.id, 1).unwrap();
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.next_page, None);

        w.post_at(&a, "p5", 5);
        let feed = w.feed(5, exact);
        let first = feed.get_page(&FeedView::User("alice".into()), &a.id, 1).unwrap();
        assert_eq!(first.items.len(), 5);
        assert_eq!(first.next_page, Some(2));
        let second = feed.get_page(&FeedView::User("alice".into()), &a.id, 2).unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.next_page, None);
        assert_eq!(second.prev_page, Some(1));
    }
}

#[test]
fn own_timeline_scenario() {
    let w = World::new();
    let alice = w.user("alice");
    let bob = w.user("bob");
    let carol = w.user("carol");
    w.graph().follow(&alice.id, "bob", w.t0).unwrap();
    w.graph().follow(&alice.id, "carol", w.t0).unwrap();

    w.post_at(&bob, "hi", 1);
    w.post_at(&carol, "yo", 2);
    w.post_at(&alice, "me", 3);

    let page = w.feed(10, false).get_page(&FeedView::Own, &alice.id, 1).unwrap();
    let bodies: Vec<_> = page.items.iter().map(|i| i.post.body.as_str()).collect();
    assert_eq!(bodies, ["me", "yo", "hi"]);
    assert_eq!(page.next_page, None);
    assert_eq!(page.prev_page, None);
}
