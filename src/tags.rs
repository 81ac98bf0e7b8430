//! Tag input handling: search filters, tag edits and the subscription catalogue.
//!
//! All checks here are advisory. They stop obviously bad requests before they are
//! sent; the backend remains the authority on what a record's tags are.

use crate::{
    error::{BirdTagError, BirdTagResult},
    models::{MediaRecord, ModifyTagsRequest, TagCounts, TagOperation},
};

/// Tags a user can subscribe to for upload notifications.
pub const BIRD_TAGS: [&str; 5] = ["owl", "pigeon", "myna", "kingfisher", "peacock"];

// --- Search Filters ---

/// parse_tag_filter
///
/// Parses `name` or `name=count`. Blank names yield `None`; a count that is
/// missing, unparsable or below 1 becomes 1.
pub fn parse_tag_filter(input: &str) -> Option<(String, u32)> {
    let (name, count) = match input.split_once('=') {
        Some((name, count)) => (name, count.trim().parse::<i64>().ok()),
        None => (input, None),
    };
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let count = match count {
        Some(c) if c >= 1 => u32::try_from(c).unwrap_or(u32::MAX),
        _ => 1,
    };
    Some((name.to_string(), count))
}

/// search_filters
///
/// Builds the body of a tag search. A name given twice keeps its last count.
pub fn search_filters<I, S>(inputs: I) -> BirdTagResult<TagCounts>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let filters: TagCounts = inputs
        .into_iter()
        .filter_map(|input| parse_tag_filter(input.as_ref()))
        .collect();

    if filters.is_empty() {
        return Err(BirdTagError::validation("Please enter at least one valid tag."));
    }
    Ok(filters)
}

/// Trims species names and drops blanks; at least one must remain.
pub fn species_list<I, S>(inputs: I) -> BirdTagResult<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let species: Vec<String> = inputs
        .into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if species.is_empty() {
        return Err(BirdTagError::validation("Please enter at least one species."));
    }
    Ok(species)
}

// --- Tag Edits ---

/// TagChange
///
/// One tag and the amount to add or subtract. Travels as `"name,count"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagChange {
    pub tag: String,
    pub count: u32,
}

impl TagChange {
    pub fn wire(&self) -> String {
        format!("{},{}", self.tag, self.count)
    }

    /// Inverse of `wire`; `None` for malformed input.
    pub fn parse_wire(raw: &str) -> Option<Self> {
        let (tag, count) = raw.split_once(',')?;
        let tag = tag.trim();
        if tag.is_empty() {
            return None;
        }
        Some(Self {
            tag: tag.to_string(),
            count: count.trim().parse().ok()?,
        })
    }
}

/// TagEdit
///
/// A planned `/modify-tags` call for a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEdit {
    pub file_id: String,
    pub operation: TagOperation,
    pub change: TagChange,
}

impl TagEdit {
    pub fn request(&self) -> ModifyTagsRequest {
        ModifyTagsRequest {
            file_ids: vec![self.file_id.clone()],
            operation: self.operation,
            tags: vec![self.change.wire()],
        }
    }
}

fn valid_change(tag: &str, count: i64) -> BirdTagResult<TagChange> {
    let tag = tag.trim();
    match u32::try_from(count) {
        Ok(count) if count >= 1 && !tag.is_empty() => Ok(TagChange {
            tag: tag.to_string(),
            count,
        }),
        _ => Err(BirdTagError::validation("Enter valid tag and count.")),
    }
}

/// Adds `count` occurrences of `tag` to a file. Count must be at least 1.
pub fn plan_add(file_id: &str, tag: &str, count: i64) -> BirdTagResult<TagEdit> {
    Ok(TagEdit {
        file_id: file_id.to_string(),
        operation: TagOperation::Add,
        change: valid_change(tag, count)?,
    })
}

/// plan_remove
///
/// Removes a tag entirely by subtracting its current count.
pub fn plan_remove(record: &MediaRecord, tag: &str) -> BirdTagResult<TagEdit> {
    let tag = tag.trim();
    let current = record.tag_count(tag).ok_or_else(|| {
        BirdTagError::NotFound(format!("Tag '{}' is not on file {}", tag, record.file_id))
    })?;
    Ok(TagEdit {
        file_id: record.file_id.clone(),
        operation: TagOperation::Remove,
        change: TagChange {
            tag: tag.to_string(),
            count: current,
        },
    })
}

/// plan_set
///
/// Moves a tag's count to `new_count` by sending only the difference: an add
/// when it grows, a remove when it shrinks, nothing when it is unchanged.
pub fn plan_set(record: &MediaRecord, tag: &str, new_count: i64) -> BirdTagResult<Option<TagEdit>> {
    let target = valid_change(tag, new_count)?;
    let current = record.tag_count(&target.tag).unwrap_or(0);

    let (operation, delta) = match target.count.cmp(&current) {
        std::cmp::Ordering::Equal => return Ok(None),
        std::cmp::Ordering::Greater => (TagOperation::Add, target.count - current),
        std::cmp::Ordering::Less => (TagOperation::Remove, current - target.count),
    };

    Ok(Some(TagEdit {
        file_id: record.file_id.clone(),
        operation,
        change: TagChange {
            tag: target.tag,
            count: delta,
        },
    }))
}

/// apply_tag_change
///
/// The backend's update rule: adds accumulate, removes saturate at zero and a
/// tag that reaches zero disappears.
pub fn apply_tag_change(tags: &mut TagCounts, operation: TagOperation, change: &TagChange) {
    match operation {
        TagOperation::Add => {
            let entry = tags.entry(change.tag.clone()).or_insert(0);
            *entry = entry.saturating_add(change.count);
        }
        TagOperation::Remove => {
            if let Some(current) = tags.get(&change.tag).copied() {
                let remaining = current.saturating_sub(change.count);
                if remaining == 0 {
                    tags.remove(&change.tag);
                } else {
                    tags.insert(change.tag.clone(), remaining);
                }
            }
        }
    }
}

// --- Subscriptions ---

/// subscription_tags
///
/// Normalises a subscription set: lower-cased, trimmed, de-duplicated, and
/// restricted to `BIRD_TAGS`.
pub fn subscription_tags<I, S>(inputs: I) -> BirdTagResult<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tags: Vec<String> = Vec::new();
    for input in inputs {
        let tag = input.as_ref().trim().to_lowercase();
        if tag.is_empty() {
            continue;
        }
        if !BIRD_TAGS.contains(&tag.as_str()) {
            return Err(BirdTagError::validation(format!(
                "Unknown bird tag '{}'. Choose from: {}",
                tag,
                BIRD_TAGS.join(", ")
            )));
        }
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    if tags.is_empty() {
        return Err(BirdTagError::validation("Please select at least one bird tag."));
    }
    Ok(tags)
}

/// toggle_subscription
///
/// Adds `tag` to `current` if absent, removes it if present. Only the toggled tag
/// is checked against `BIRD_TAGS`; tags already held by the backend pass through
/// unchanged.
pub fn toggle_subscription(current: &[String], tag: &str) -> BirdTagResult<Vec<String>> {
    let tag = tag.trim().to_lowercase();
    if !BIRD_TAGS.contains(&tag.as_str()) {
        return Err(BirdTagError::validation(format!(
            "Unknown bird tag '{}'. Choose from: {}",
            tag,
            BIRD_TAGS.join(", ")
        )));
    }

    let next: Vec<String> = if current.contains(&tag) {
        current.iter().filter(|t| **t != tag).cloned().collect()
    } else {
        let mut next = current.to_vec();
        next.push(tag);
        next
    };

    if next.is_empty() {
        return Err(BirdTagError::validation("Please select at least one bird tag."));
    }
    Ok(next)
}
