//! Event types for the Greenlight server.
//!
//! Defines the calendar event record, the request bodies used to create and
//! update it, and the listing filters with their pagination metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::validator::{unique, Validator};

/// Maximum length of an event title, in bytes.
pub const MAX_TITLE_LEN: usize = 500;

/// Maximum length of an event description, in bytes.
pub const MAX_DESCRIPTION_LEN: usize = 1000;

/// Maximum number of tags on an event.
pub const MAX_TAGS: usize = 5;

/// Largest page number accepted by the list endpoint.
pub const MAX_PAGE: u32 = 10_000_000;

/// Largest page size accepted by the list endpoint.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Default page size for the list endpoint.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Sort keys accepted by the list endpoint; a leading `-` sorts descending.
pub const SORT_SAFELIST: &[&str] = &["id", "title", "start", "-id", "-title", "-start"];

/// A calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub all_day: bool,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented on every update; used for optimistic concurrency.
    pub version: i32,
}

/// Fields of an event before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub all_day: bool,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Body of `POST /v1/events`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateEventInput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub all_day: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl CreateEventInput {
    /// Validates the input and turns it into a [`NewEvent`].
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::FailedValidation`] listing every invalid field.
    pub fn into_new_event(self) -> Result<NewEvent, ApiError> {
        let mut v = Validator::new();
        validate_details(&mut v, &self.title, &self.description, &self.tags);

        let times = match (self.start, self.end) {
            (Some(start), Some(end)) => {
                validate_times(&mut v, start, end);
                Some((start, end))
            }
            (start, end) => {
                v.check(start.is_some(), "start", "must be provided");
                v.check(end.is_some(), "end", "must be provided");
                None
            }
        };

        match times {
            Some((start, end)) if v.is_valid() => Ok(NewEvent {
                title: self.title,
                description: self.description,
                tags: self.tags,
                all_day: self.all_day,
                start,
                end,
            }),
            _ => Err(v.into_error()),
        }
    }
}

/// Body of `PATCH /v1/events/{id}`; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateEventInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub all_day: Option<bool>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl UpdateEventInput {
    /// Applies the provided fields to `event` and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::FailedValidation`] if the updated event is invalid;
    /// `event` may be partially modified in that case.
    pub fn apply(self, event: &mut Event) -> Result<(), ApiError> {
        if let Some(title) = self.title {
            event.title = title;
        }
        if let Some(description) = self.description {
            event.description = description;
        }
        if let Some(tags) = self.tags {
            event.tags = tags;
        }
        if let Some(all_day) = self.all_day {
            event.all_day = all_day;
        }
        if let Some(start) = self.start {
            event.start = start;
        }
        if let Some(end) = self.end {
            event.end = end;
        }

        let mut v = Validator::new();
        validate_details(&mut v, &event.title, &event.description, &event.tags);
        validate_times(&mut v, event.start, event.end);
        v.finish()
    }
}

fn validate_details(v: &mut Validator, title: &str, description: &str, tags: &[String]) {
    v.check(!title.trim().is_empty(), "title", "must be provided");
    v.check(
        title.len() <= MAX_TITLE_LEN,
        "title",
        "must not be more than 500 bytes long",
    );
    v.check(
        description.len() <= MAX_DESCRIPTION_LEN,
        "description",
        "must not be more than 1000 bytes long",
    );
    v.check(
        tags.len() <= MAX_TAGS,
        "tags",
        "must not contain more than 5 tags",
    );
    v.check(
        tags.iter().all(|tag| !tag.trim().is_empty()),
        "tags",
        "must not contain empty tags",
    );
    v.check(unique(tags), "tags", "must not contain duplicate values");
}

fn validate_times(v: &mut Validator, start: DateTime<Utc>, end: DateTime<Utc>) {
    v.check(end >= start, "end", "must not be before start");
}

/// Raw query parameters of `GET /v1/events`.
///
/// Numbers arrive as strings so that malformed values become validation
/// errors rather than a rejected request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListEventsQuery {
    pub title: Option<String>,
    pub tags: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub sort: Option<String>,
}

/// Validated listing filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// Case-insensitive substring the title must contain.
    pub title: Option<String>,
    /// Tags that must all be present on the event.
    pub tags: Vec<String>,
    pub page: u32,
    pub page_size: u32,
    pub sort: String,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            title: None,
            tags: Vec::new(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort: "id".to_string(),
        }
    }
}

impl EventFilter {
    /// Column to sort on, without the direction prefix.
    pub fn sort_column(&self) -> &str {
        self.sort.trim_start_matches('-')
    }

    /// Returns `true` when sorting descending.
    pub fn is_descending(&self) -> bool {
        self.sort.starts_with('-')
    }

    /// Number of records to skip.
    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.page_size as usize
    }
}

impl TryFrom<ListEventsQuery> for EventFilter {
    type Error = ApiError;

    fn try_from(query: ListEventsQuery) -> Result<Self, Self::Error> {
        let mut v = Validator::new();
        let defaults = Self::default();

        let page = read_int(&mut v, query.page.as_deref(), "page", defaults.page);
        let page_size = read_int(
            &mut v,
            query.page_size.as_deref(),
            "page_size",
            defaults.page_size,
        );
        let sort = query.sort.unwrap_or(defaults.sort);

        v.check(page > 0, "page", "must be greater than zero");
        v.check(page <= MAX_PAGE, "page", "must be a maximum of 10,000,000");
        v.check(page_size > 0, "page_size", "must be greater than zero");
        v.check(
            page_size <= MAX_PAGE_SIZE,
            "page_size",
            "must be a maximum of 100",
        );
        v.check(
            SORT_SAFELIST.contains(&sort.as_str()),
            "sort",
            "invalid sort value",
        );
        v.finish()?;

        let title = query
            .title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty());
        let tags = query
            .tags
            .map(|tags| {
                tags.split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            title,
            tags,
            page,
            page_size,
            sort,
        })
    }
}

fn read_int(v: &mut Validator, value: Option<&str>, key: &str, default: u32) -> u32 {
    match value {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            v.add_error(key, "must be an integer value");
            default
        }),
    }
}

/// Pagination metadata returned alongside a page of events.
///
/// All fields are omitted when there are no matching records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub current_page: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub page_size: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub first_page: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub last_page: u32,
    #[serde(default, skip_serializing_if = "is_zero_total")]
    pub total_records: usize,
}

impl Metadata {
    pub fn new(total_records: usize, page: u32, page_size: u32) -> Self {
        if total_records == 0 {
            return Self::default();
        }

        let last_page = total_records.div_ceil(page_size as usize);

        Self {
            current_page: page,
            page_size,
            first_page: 1,
            last_page: u32::try_from(last_page).unwrap_or(u32::MAX),
            total_records,
        }
    }
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

fn is_zero_total(value: &usize) -> bool {
    *value == 0
}
