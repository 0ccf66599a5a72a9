//! Snapshot schema definitions

/// SQL to create the channels table
pub const CREATE_PODCAST_CHANNELS: &str = r#"
CREATE TABLE IF NOT EXISTS PodcastChannels (
    id INTEGER NOT NULL PRIMARY KEY,
    title TEXT NOT NULL,
    link TEXT NOT NULL,
    description TEXT NOT NULL,
    copyright TEXT,
    language TEXT NOT NULL,
    author TEXT NOT NULL,
    ownerEmail TEXT NOT NULL,
    ownerName TEXT NOT NULL,
    imageUrl TEXT NOT NULL,
    lastBuildDate INTEGER NOT NULL
)
"#;

/// SQL to create the episodes table
pub const CREATE_PODCAST_EPISODES: &str = r#"
CREATE TABLE IF NOT EXISTS PodcastEpisodes (
    id INTEGER NOT NULL PRIMARY KEY,
    channelId INTEGER NOT NULL,
    guid TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    link TEXT NOT NULL,
    pubDate INTEGER NOT NULL,
    duration INTEGER NOT NULL,
    explicit INTEGER NOT NULL,
    imageUrl TEXT,
    mediaUrl TEXT NOT NULL,
    mediaType TEXT NOT NULL,
    mediaLength INTEGER NOT NULL
)
"#;

pub const CREATE_PODCAST_CHANNEL_CATEGORIES: &str = r#"
CREATE TABLE IF NOT EXISTS PodcastChannelCategories (
    id INTEGER NOT NULL PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
)
"#;

pub const CREATE_PODCAST_EPISODE_CATEGORIES: &str = r#"
CREATE TABLE IF NOT EXISTS PodcastEpisodeCategories (
    id INTEGER NOT NULL PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
)
"#;

/// Channel ↔ category join table
pub const CREATE_CHANNEL_CATEGORY_MAP: &str = r#"
CREATE TABLE IF NOT EXISTS ChannelCategoryMap (
    channelId INTEGER NOT NULL,
    categoryId INTEGER NOT NULL,
    PRIMARY KEY (channelId, categoryId),
    FOREIGN KEY (channelId) REFERENCES PodcastChannels(id),
    FOREIGN KEY (categoryId) REFERENCES PodcastChannelCategories(id)
)
"#;

/// Episode ↔ category join table
pub const CREATE_EPISODE_CATEGORY_MAP: &str = r#"
CREATE TABLE IF NOT EXISTS EpisodeCategoryMap (
    episodeId INTEGER NOT NULL,
    categoryId INTEGER NOT NULL,
    PRIMARY KEY (episodeId, categoryId),
    FOREIGN KEY (episodeId) REFERENCES PodcastEpisodes(id),
    FOREIGN KEY (categoryId) REFERENCES PodcastEpisodeCategories(id)
)
"#;
