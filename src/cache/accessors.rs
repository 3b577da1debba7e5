//! Specialized accessors over the generic store.
//!
//! Thin wrappers fixing the category and key shape for the data feature
//! modules touch most often.

use serde_json::Value;

use super::{categories::Category, keys::KeyPart, store::CacheStore};

impl CacheStore {
    pub async fn get_guild_data(&self, guild_id: u64, data_type: &str) -> Option<Value> {
        self.get(
            Category::GuildData,
            &[KeyPart::from(guild_id), KeyPart::from(data_type)],
        )
        .await
    }

    pub async fn set_guild_data(&self, guild_id: u64, data_type: &str, value: Value) {
        self.set(
            Category::GuildData,
            value,
            &[KeyPart::from(guild_id), KeyPart::from(data_type)],
            None,
        )
        .await
    }

    pub async fn delete_guild_data(&self, guild_id: u64, data_type: &str) -> bool {
        self.delete(
            Category::GuildData,
            &[KeyPart::from(guild_id), KeyPart::from(data_type)],
        )
        .await
    }

    pub async fn get_user_data(&self, guild_id: u64, user_id: u64, data_type: &str) -> Option<Value> {
        self.get(
            Category::UserData,
            &[
                KeyPart::from(guild_id),
                KeyPart::from(user_id),
                KeyPart::from(data_type),
            ],
        )
        .await
    }

    pub async fn set_user_data(&self, guild_id: u64, user_id: u64, data_type: &str, value: Value) {
        self.set(
            Category::UserData,
            value,
            &[
                KeyPart::from(guild_id),
                KeyPart::from(user_id),
                KeyPart::from(data_type),
            ],
            None,
        )
        .await
    }

    pub async fn get_event_data(&self, guild_id: u64, event_type: &str) -> Option<Value> {
        self.get(
            Category::EventsData,
            &[KeyPart::from(guild_id), KeyPart::from(event_type)],
        )
        .await
    }

    pub async fn set_event_data(&self, guild_id: u64, event_type: &str, value: Value) {
        self.set(
            Category::EventsData,
            value,
            &[KeyPart::from(guild_id), KeyPart::from(event_type)],
            None,
        )
        .await
    }

    pub async fn get_static_data(&self, data_type: &str, game_id: Option<u64>) -> Option<Value> {
        self.get(
            Category::StaticData,
            &[KeyPart::from(data_type), KeyPart::from(game_id)],
        )
        .await
    }

    pub async fn set_static_data(&self, data_type: &str, value: Value, game_id: Option<u64>) {
        self.set(
            Category::StaticData,
            value,
            &[KeyPart::from(data_type), KeyPart::from(game_id)],
            None,
        )
        .await
    }

    pub async fn get_guild_members(&self, guild_id: u64) -> Option<Value> {
        self.get(
            Category::RosterData,
            &[KeyPart::from(guild_id), KeyPart::from("members")],
        )
        .await
    }

    /// Store a guild's member map and cascade-invalidate roster-derived
    /// categories.
    pub async fn set_guild_members(&self, guild_id: u64, members: Value) {
        self.set(
            Category::RosterData,
            members,
            &[KeyPart::from(guild_id), KeyPart::from("members")],
            None,
        )
        .await;
        self.invalidate_related(Category::RosterData).await;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_guild_data_round_trip() {
        let cache = CacheStore::new();
        cache.set_guild_data(111, "guild_lang", json!("fr")).await;
        assert_eq!(
            cache.get_guild_data(111, "guild_lang").await,
            Some(json!("fr"))
        );
        assert!(cache.delete_guild_data(111, "guild_lang").await);
        assert!(cache.get_guild_data(111, "guild_lang").await.is_none());
    }

    #[tokio::test]
    async fn test_user_data_key_shape() {
        let cache = CacheStore::new();
        cache
            .set_user_data(1, 2, "setup", json!({"locale": "de"}))
            .await;
        // Distinct users do not collide.
        assert!(cache.get_user_data(1, 3, "setup").await.is_none());
        assert_eq!(
            cache.get_user_data(1, 2, "setup").await,
            Some(json!({"locale": "de"}))
        );
    }

    #[tokio::test]
    async fn test_static_data_with_and_without_game() {
        let cache = CacheStore::new();
        cache.set_static_data("weapons", json!({"1": {}}), None).await;
        cache
            .set_static_data("weapons", json!({"sns": "Sword"}), Some(1))
            .await;
        assert_eq!(
            cache.get_static_data("weapons", None).await,
            Some(json!({"1": {}}))
        );
        assert_eq!(
            cache.get_static_data("weapons", Some(1)).await,
            Some(json!({"sns": "Sword"}))
        );
    }

    #[tokio::test]
    async fn test_set_guild_members_cascades() {
        let cache = CacheStore::new();
        cache.set_event_data(1, "all", json!([1, 2])).await;
        cache.set_guild_members(1, json!({"42": {}})).await;

        // roster_data -> events_data cascade removed the event entry.
        assert!(cache.get_event_data(1, "all").await.is_none());
        assert_eq!(
            cache.get_guild_members(1).await,
            Some(json!({"42": {}}))
        );
    }
}
