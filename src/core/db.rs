use crate::config::{post_key, FEED_KEY};
use crate::core::helpers::{new_id, now_iso};
use crate::core::kv::{KvStore, KvStoreExt};
use crate::graph::{FollowDecision, RelationshipStore};
use crate::models::models::Post;
use crate::users::{create_account, find_by_username, NewAccount};

const DEMO_PASSWORD: &str = "password123";

fn demo_account(store: &dyn KvStore, username: &str, name: &str, is_private: bool) -> anyhow::Result<String> {
    let user = create_account(
        store,
        NewAccount {
            username: username.to_string(),
            name: name.to_string(),
            email: format!("{}@example.com", username),
            password: DEMO_PASSWORD.to_string(),
            is_private: Some(is_private),
        },
    )?;
    Ok(user.id)
}

fn demo_post(store: &dyn KvStore, author_id: &str, caption: &str, tags: &[&str]) -> anyhow::Result<()> {
    let post = Post {
        id: new_id(),
        author_id: author_id.to_string(),
        image: format!("https://picsum.photos/seed/{}/600/600", new_id()),
        caption: caption.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        location: String::new(),
        is_public: true,
        likes: Vec::new(),
        view_count: 0,
        created_at: now_iso(),
        updated_at: None,
    };
    store.set_json(&post_key(&post.id), &post)?;
    store.prepend(FEED_KEY, &post.id)
}

/// Populate demo accounts on an empty store.
///
/// alice and carol are public and follow each other; bob is private, has
/// accepted alice, and has a pending request from carol. Does nothing once
/// alice exists.
pub fn seed_demo_data(store: &dyn KvStore) -> anyhow::Result<()> {
    if find_by_username(store, "alice")?.is_some() {
        return Ok(());
    }

    let alice = demo_account(store, "alice", "Alice", false)?;
    let bob = demo_account(store, "bob", "Bob", true)?;
    let carol = demo_account(store, "carol", "Carol", false)?;

    demo_post(store, &alice, "Morning light over the harbour", &["sunrise", "sea"])?;
    demo_post(store, &bob, "Weekend hike, no signal and no regrets", &["outdoors"])?;
    demo_post(store, &carol, "First attempt at sourdough", &["baking"])?;

    let graph = RelationshipStore::new(store);
    graph.follow_mutually(&alice, &carol)?;
    graph.add_follow_request(&bob, &alice)?;
    graph.resolve_follow_request(&bob, &alice, FollowDecision::Accept)?;
    graph.add_follow_request(&bob, &carol)?;

    tracing::info!("demo data seeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::USERS_LIST_KEY;
    use crate::core::kv::MemoryStore;
    use crate::graph::RelationState;

    #[test]
    fn seeding_is_idempotent() {
        let store = MemoryStore::new();
        seed_demo_data(&store).unwrap();
        seed_demo_data(&store).unwrap();

        assert_eq!(store.get_list(USERS_LIST_KEY).unwrap().len(), 3);
        assert_eq!(store.get_list(FEED_KEY).unwrap().len(), 3);
    }

    #[test]
    fn seeded_graph_covers_each_relation_state() {
        let store = MemoryStore::new();
        seed_demo_data(&store).unwrap();
        let id = |name: &str| find_by_username(&store, name).unwrap().unwrap().id;
        let graph = RelationshipStore::new(&store);

        assert_eq!(graph.relation_state(&id("alice"), &id("carol")).unwrap(), RelationState::Mutual);
        assert_eq!(graph.relation_state(&id("alice"), &id("bob")).unwrap(), RelationState::OneWay);
        assert_eq!(graph.relation_state(&id("carol"), &id("bob")).unwrap(), RelationState::Requested);
    }
}
