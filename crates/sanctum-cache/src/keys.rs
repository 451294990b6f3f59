//! Cache key inventory.
//!
//! Keys follow a `resource:identifier` convention. Each resource has a TTL
//! matching how quickly it goes stale: profiles in minutes, feed pages in
//! tens of seconds.

use std::time::Duration;

use crate::aside::CacheAside;

pub const USER_TTL: Duration = Duration::from_secs(5 * 60);
pub const POST_TTL: Duration = Duration::from_secs(30 * 60);
pub const SANCTUM_TTL: Duration = Duration::from_secs(10 * 60);
pub const ROOM_TTL: Duration = Duration::from_secs(2 * 60);
pub const MESSAGE_HISTORY_TTL: Duration = Duration::from_secs(2 * 60);
pub const FEED_PAGE_TTL: Duration = Duration::from_secs(30);

pub fn user_key(user_id: u64) -> String {
    format!("user:{user_id}")
}

pub fn post_key(post_id: u64) -> String {
    format!("post:{post_id}")
}

pub fn sanctum_key(slug: &str) -> String {
    format!("sanctum:{slug}")
}

pub fn room_key(room_id: u64) -> String {
    format!("room:{room_id}")
}

pub fn message_history_key(room_id: u64) -> String {
    format!("room:{room_id}:messages")
}

/// Key for one page of a feed. `scope` is `global` or `user:{id}`.
pub fn feed_page_key(scope: &str, page: u32) -> String {
    format!("feed:{scope}:page:{page}")
}

pub async fn invalidate_user(cache: &CacheAside, user_id: u64) {
    cache.invalidate(&user_key(user_id)).await;
}

pub async fn invalidate_post(cache: &CacheAside, post_id: u64) {
    cache.invalidate(&post_key(post_id)).await;
}

pub async fn invalidate_sanctum(cache: &CacheAside, slug: &str) {
    cache.invalidate(&sanctum_key(slug)).await;
}

/// Drop a room and its message history.
pub async fn invalidate_room(cache: &CacheAside, room_id: u64) {
    cache.invalidate(&room_key(room_id)).await;
    cache.invalidate(&message_history_key(room_id)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aside::Lookup;
    use crate::memory::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_key_formats() {
        assert_eq!(user_key(42), "user:42");
        assert_eq!(post_key(7), "post:7");
        assert_eq!(sanctum_key("rust"), "sanctum:rust");
        assert_eq!(room_key(3), "room:3");
        assert_eq!(message_history_key(3), "room:3:messages");
        assert_eq!(feed_page_key("global", 2), "feed:global:page:2");
    }

    #[tokio::test]
    async fn test_invalidate_room_removes_history() {
        let cache = CacheAside::new(Arc::new(MemoryStore::new()));
        cache.put(&room_key(5), &"lobby", ROOM_TTL).await;
        cache
            .put(&message_history_key(5), &vec!["hi", "there"], MESSAGE_HISTORY_TTL)
            .await;

        invalidate_room(&cache, 5).await;

        assert_eq!(cache.lookup::<String>(&room_key(5)).await, Lookup::Miss);
        assert_eq!(
            cache.lookup::<Vec<String>>(&message_history_key(5)).await,
            Lookup::Miss
        );
    }

    #[tokio::test]
    async fn test_invalidate_user_leaves_other_entries() {
        let cache = CacheAside::new(Arc::new(MemoryStore::new()));
        cache.put(&user_key(1), &"alice", USER_TTL).await;
        cache.put(&user_key(2), &"bob", USER_TTL).await;

        invalidate_user(&cache, 1).await;

        assert_eq!(cache.lookup::<String>(&user_key(1)).await, Lookup::Miss);
        assert_eq!(
            cache.lookup::<String>(&user_key(2)).await,
            Lookup::Hit("bob".to_string())
        );
    }
}
