//! Built-in catalogs for the podcast and conference-session domains

use super::{Catalog, EntityDescriptor};
use crate::embedded::schema;

pub const PODCAST: &str = "podcast";
pub const SESSION: &str = "session";

/// Relational columns holding timestamps
pub const TIMESTAMP_COLUMNS: &[&str] = &["last_build_date", "pub_date", "starts_at", "ends_at"];

/// Server-side audit columns that never reach a snapshot
pub const EXCLUDED_COLUMNS: &[&str] = &["created_at", "updated_at"];

pub fn podcast_catalog() -> Catalog {
    Catalog::new(
        PODCAST,
        vec![
            EntityDescriptor::new("PodcastChannelCategories", "podcast_channel_categories")
                .identity("id")
                .column("id", "id")
                .column("name", "name")
                .ddl(schema::CREATE_PODCAST_CHANNEL_CATEGORIES),
            EntityDescriptor::new("PodcastEpisodeCategories", "podcast_episode_categories")
                .identity("id")
                .column("id", "id")
                .column("name", "name")
                .ddl(schema::CREATE_PODCAST_EPISODE_CATEGORIES),
            EntityDescriptor::new("PodcastChannels", "podcast_channels")
                .identity("id")
                .column("id", "id")
                .column("title", "title")
                .column("link", "link")
                .column("description", "description")
                .column("copyright", "copyright")
                .column("language", "language")
                .column("author", "author")
                .column("ownerEmail", "owner_email")
                .column("ownerName", "owner_name")
                .column("imageUrl", "image_url")
                .column("lastBuildDate", "last_build_date")
                .ddl(schema::CREATE_PODCAST_CHANNELS),
            EntityDescriptor::new("PodcastEpisodes", "podcast_episodes")
                .identity("id")
                .column("id", "id")
                .column("channelId", "channel_id")
                .column("guid", "guid")
                .column("title", "title")
                .column("description", "description")
                .column("link", "link")
                .column("pubDate", "pub_date")
                .column("duration", "duration")
                .column("explicit", "explicit")
                .column("imageUrl", "image_url")
                .column("mediaUrl", "media_url")
                .column("mediaType", "media_type")
                .column("mediaLength", "media_length")
                .depends_on(["PodcastChannels"])
                .ddl(schema::CREATE_PODCAST_EPISODES),
            EntityDescriptor::new("ChannelCategoryMap", "channel_category_map")
                .column("channelId", "channel_id")
                .column("categoryId", "category_id")
                .depends_on(["PodcastChannels", "PodcastChannelCategories"])
                .ddl(schema::CREATE_CHANNEL_CATEGORY_MAP),
            EntityDescriptor::new("EpisodeCategoryMap", "episode_category_map")
                .column("episodeId", "episode_id")
                .column("categoryId", "category_id")
                .depends_on(["PodcastEpisodes", "PodcastEpisodeCategories"])
                .ddl(schema::CREATE_EPISODE_CATEGORY_MAP),
        ],
    )
}

pub fn session_catalog() -> Catalog {
    Catalog::new(
        SESSION,
        vec![
            EntityDescriptor::new("ConferenceRoomsTable", "conference_rooms")
                .identity("id")
                .column("id", "id")
                .column("name", "name")
                .column("sort", "sort"),
            EntityDescriptor::new("ConferenceCategoriesTable", "conference_categories")
                .identity("id")
                .column("id", "id")
                .column("title", "title")
                .column("sort", "sort")
                .column("type", "type"),
            EntityDescriptor::new("ConferenceSpeakersTable", "conference_speakers")
                .identity("id")
                .column("id", "id")
                .column("firstName", "first_name")
                .column("lastName", "last_name")
                .column("bio", "bio")
                .column("tagLine", "tag_line")
                .column("profilePicture", "profile_picture")
                .column("isTopSpeaker", "is_top_speaker"),
            EntityDescriptor::new("SessionTable", "conference_sessions")
                .identity("id")
                .column("id", "id")
                .column("title", "title")
                .column("description", "description")
                .column("roomId", "room_id")
                .column("startsAt", "starts_at")
                .column("endsAt", "ends_at")
                .column("isServiceSession", "is_service_session")
                .column("isPlenumSession", "is_plenum_session")
                .column("status", "status")
                .derived("isPending")
                .depends_on(["ConferenceRoomsTable"]),
            EntityDescriptor::new("SessionSpeakersTable", "session_speakers")
                .column("sessionId", "session_id")
                .column("speakerId", "speaker_id")
                .depends_on(["SessionTable", "ConferenceSpeakersTable"]),
            EntityDescriptor::new("SessionCategoriesTable", "session_categories")
                .column("sessionId", "session_id")
                .column("categoryId", "category_item_id")
                .depends_on(["SessionTable", "ConferenceCategoriesTable"]),
        ],
    )
}
