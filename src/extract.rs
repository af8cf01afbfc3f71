//! # Entity Extractor
//!
//! Splits one decoded [`Tweet`] into the candidate rows of every table it
//! touches. Extraction is pure; key computation and write ordering belong to
//! [`crate::upsert::UpsertController`].

use crate::decode::tweet_id;
use crate::error::RecordError;
use crate::model::{Entities, Field, MediaEntity, MentionEntity, Point, Tweet};
use crate::temporal::normalized_timestamp;

/// Row for the `users` table.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub id: i64,
    pub name: Option<String>,
    pub screen_name: Option<String>,
    pub description: Option<String>,
    pub verified: Option<bool>,
    pub statuses_count: Option<i64>,
    pub followers_count: Option<i64>,
    pub friends_count: Option<i64>,
    pub time_zone: Option<String>,
    pub lang: Option<String>,
    pub location: Option<String>,
}

/// Row for the `places` table.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceRow {
    pub id: String,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub full_name: Option<String>,
    pub place_type: Option<String>,
    pub min_lon: Option<f64>,
    pub min_lat: Option<f64>,
    pub max_lon: Option<f64>,
    pub max_lat: Option<f64>,
}

/// Row for the `tweets` table.
#[derive(Debug, Clone, PartialEq)]
pub struct TweetRow {
    pub id: i64,
    pub user_id: i64,
    pub place_id: Option<String>,
    pub created_at: Option<String>,
    /// Epoch seconds, millisecond resolution.
    pub timestamp: Option<f64>,
    pub lang: Option<String>,
    pub text: Option<String>,
    pub quoted_status_id: Option<i64>,
    pub in_reply_to_status_id: Option<i64>,
    pub in_reply_to_user_id: Option<i64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UrlRow {
    pub tweet_id: i64,
    pub url: Option<String>,
    pub shortened_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaRow {
    pub tweet_id: i64,
    /// Discriminator such as `photo`, `video` or `animated_gif`.
    pub kind: Option<String>,
    pub url: Option<String>,
    pub shortened_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashtagRow {
    pub tweet_id: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MentionRow {
    pub tweet_id: i64,
    pub user_id: i64,
    pub screen_name: Option<String>,
}

/// Every candidate row carried by one tweet.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRecord {
    pub user: UserRow,
    pub place: Option<PlaceRow>,
    pub tweet: TweetRow,
    pub urls: Vec<UrlRow>,
    pub media: Vec<MediaRow>,
    pub hashtags: Vec<HashtagRow>,
    pub mentions: Vec<MentionRow>,
}

impl ExtractedRecord {
    pub fn child_count(&self) -> usize {
        self.urls.len() + self.media.len() + self.hashtags.len() + self.mentions.len()
    }
}

/// Extract all rows from a decoded tweet.
///
/// The author is required: a missing `user` object or `user.id` is a
/// [`RecordError::Shape`] and nothing is produced.
pub fn extract(tweet: &Tweet) -> Result<ExtractedRecord, RecordError> {
    let id = tweet_id(tweet)?.0;
    let user = extract_user(tweet)?;
    let place = extract_place(tweet);
    let (lat, lon) = extract_point(tweet).unzip();
    let created_at = tweet.created_at.cloned();

    let row = TweetRow {
        id,
        user_id: user.id,
        place_id: place.as_ref().map(|place| place.id.clone()),
        timestamp: normalized_timestamp(id, created_at.as_deref()),
        created_at,
        lang: tweet.lang.cloned(),
        text: tweet.body_text().map(str::to_string),
        quoted_status_id: tweet.quoted_status_id.as_option().map(|id| id.0),
        in_reply_to_status_id: tweet.in_reply_to_status_id.as_option().map(|id| id.0),
        in_reply_to_user_id: tweet.in_reply_to_user_id.as_option().map(|id| id.0),
        lat,
        lon,
    };

    let entities = tweet.entities.as_option();
    Ok(ExtractedRecord {
        urls: extract_urls(id, entities),
        media: extract_media(id, tweet),
        hashtags: extract_hashtags(id, entities),
        mentions: extract_mentions(id, entities),
        user,
        place,
        tweet: row,
    })
}

fn extract_user(tweet: &Tweet) -> Result<UserRow, RecordError> {
    let user = tweet
        .user
        .as_option()
        .ok_or_else(|| RecordError::shape("user"))?;
    let id = user
        .id
        .as_option()
        .ok_or_else(|| RecordError::shape("user.id"))?;

    Ok(UserRow {
        id: id.0,
        name: user.name.cloned(),
        screen_name: user.screen_name.cloned(),
        description: user.description.cloned(),
        verified: user.verified.cloned(),
        statuses_count: user.statuses_count.cloned(),
        followers_count: user.followers_count.cloned(),
        friends_count: user.friends_count.cloned(),
        time_zone: user.time_zone.cloned(),
        lang: user.lang.cloned(),
        location: user.location.cloned(),
    })
}

fn extract_place(tweet: &Tweet) -> Option<PlaceRow> {
    let place = tweet.place.as_option()?;
    let id = place.id.cloned()?;
    let extent = place
        .bounding_box
        .as_option()
        .and_then(|bbox| bbox.extent());

    Some(PlaceRow {
        id,
        country: place.country.cloned(),
        country_code: place.country_code.cloned(),
        full_name: place.full_name.cloned(),
        place_type: place.place_type.cloned(),
        min_lon: extent.map(|e| e.0),
        min_lat: extent.map(|e| e.1),
        max_lon: extent.map(|e| e.2),
        max_lat: extent.map(|e| e.3),
    })
}

/// `(lat, lon)` from the GeoJSON `coordinates` point (`[lon, lat]`), falling
/// back to the legacy `geo` point (`[lat, lon]`).
fn extract_point(tweet: &Tweet) -> Option<(f64, f64)> {
    let coordinates = |point: &Field<Point>| point.as_option().and_then(|p| p.coordinates.cloned());

    if let Some([lon, lat]) = coordinates(&tweet.coordinates) {
        return Some((lat, lon));
    }
    coordinates(&tweet.geo).map(|[lat, lon]| (lat, lon))
}

fn entity_list<T>(field: Option<&Field<Vec<T>>>) -> &[T] {
    field
        .and_then(Field::as_option)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn extract_urls(tweet_id: i64, entities: Option<&Entities>) -> Vec<UrlRow> {
    entity_list(entities.map(|e| &e.urls))
        .iter()
        .filter(|url| url.url.is_present() || url.expanded_url.is_present())
        .map(|url| UrlRow {
            tweet_id,
            url: url.expanded_url.cloned(),
            shortened_url: url.url.cloned(),
        })
        .collect()
}

fn extract_media(tweet_id: i64, tweet: &Tweet) -> Vec<MediaRow> {
    // The extended list is a superset of the basic one when present.
    let extended = entity_list(tweet.extended_entities.as_option().map(|e| &e.media));
    let media: &[MediaEntity] = if extended.is_empty() {
        entity_list(tweet.entities.as_option().map(|e| &e.media))
    } else {
        extended
    };

    media
        .iter()
        .filter_map(|item| {
            let url = item
                .media_url_https
                .cloned()
                .or_else(|| item.media_url.cloned());
            let shortened_url = item.url.cloned();
            if url.is_none() && shortened_url.is_none() {
                return None;
            }
            Some(MediaRow {
                tweet_id,
                kind: item.kind.cloned(),
                url,
                shortened_url,
            })
        })
        .collect()
}

fn extract_hashtags(tweet_id: i64, entities: Option<&Entities>) -> Vec<HashtagRow> {
    entity_list(entities.map(|e| &e.hashtags))
        .iter()
        .filter_map(|hashtag| hashtag.text.cloned())
        .map(|text| HashtagRow { tweet_id, text })
        .collect()
}

fn extract_mentions(tweet_id: i64, entities: Option<&Entities>) -> Vec<MentionRow> {
    let user_mentions: &[MentionEntity] = entity_list(entities.map(|e| &e.user_mentions));
    let mentions: &[MentionEntity] = entity_list(entities.map(|e| &e.mentions));

    user_mentions
        .iter()
        .chain(mentions)
        .filter_map(|mention| {
            let user_id = mention.id.as_option()?.0;
            Some(MentionRow {
                tweet_id,
                user_id,
                screen_name: mention.screen_name.cloned(),
            })
        })
        .collect()
}
