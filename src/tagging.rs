use indexmap::IndexMap;
use thiserror::Error;

/// Errors that could occur while building a tagged metric name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagError {
    /// A tag or tag key was empty or whitespace-only.
    #[error("tag key must be non-empty")]
    EmptyTagKey,

    /// A metric name was missing, empty, or whitespace-only.
    #[error("metric name must be non-empty")]
    EmptyMetricName,
}

/// A metric identifier decomposed into a base name and its bracket-encoded tags.
///
/// Registries only carry flat metric names, so tags ride along inside the name itself using the
/// `name[tag1:v1,tag2:v2]` convention. `TaggedName` is the decoded form of that convention.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaggedName {
    metric_name: String,
    encoded_tags: Vec<String>,
}

impl TaggedName {
    /// Returns a builder for assembling a `TaggedName` tag by tag.
    pub fn builder() -> TaggedNameBuilder {
        TaggedNameBuilder::default()
    }

    /// Decodes a raw metric identifier.
    ///
    /// Decoding is tolerant: a malformed suffix (no closing bracket, a base name with characters
    /// outside `[\w.-]`, or an empty tag in the list) yields the entire input as a bare name with
    /// zero tags.
    pub fn decode(raw: &str) -> TaggedName {
        match split_encoded(raw) {
            Some((base, tags)) => TaggedName { metric_name: base.to_string(), encoded_tags: tags },
            None => TaggedName { metric_name: raw.to_string(), encoded_tags: Vec::new() },
        }
    }

    /// Encodes this name back into the bracketed convention.
    ///
    /// A name with no tags encodes as the bare base name.
    pub fn encode(&self) -> String {
        if self.encoded_tags.is_empty() {
            return self.metric_name.clone();
        }

        let tags_len = self.encoded_tags.iter().map(|tag| tag.len() + 1).sum::<usize>();
        let mut encoded = String::with_capacity(self.metric_name.len() + tags_len + 1);
        encoded.push_str(&self.metric_name);
        encoded.push('[');
        for (position, tag) in self.encoded_tags.iter().enumerate() {
            if position > 0 {
                encoded.push(',');
            }
            encoded.push_str(tag);
        }
        encoded.push(']');
        encoded
    }

    /// Returns the base metric name, free of any tag encoding.
    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Returns the encoded tags, in the order they appeared.
    pub fn encoded_tags(&self) -> &[String] {
        &self.encoded_tags
    }
}

fn split_encoded(raw: &str) -> Option<(&str, Vec<String>)> {
    let (base, rest) = raw.split_once('[')?;
    let inner = rest.strip_suffix(']')?;
    if base.is_empty() || !base.chars().all(is_name_char) {
        return None;
    }
    if inner.is_empty() {
        return None;
    }

    let tags: Vec<&str> = inner.split(',').collect();
    if tags.iter().any(|tag| tag.trim().is_empty()) {
        return None;
    }

    Some((base, tags.into_iter().map(str::to_string).collect()))
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// Builder for [`TaggedName`].
#[derive(Debug, Default)]
pub struct TaggedNameBuilder {
    metric_name: Option<String>,
    encoded_tags: Vec<String>,
}

impl TaggedNameBuilder {
    /// Sets the base metric name.
    #[must_use]
    pub fn metric_name<S>(mut self, name: S) -> Self
    where
        S: Into<String>,
    {
        self.metric_name = Some(name.into());
        self
    }

    /// Appends a `key:value` tag.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::EmptyTagKey`] if the key is empty or whitespace-only.
    pub fn tag(mut self, key: &str, value: &str) -> Result<Self, TagError> {
        if key.trim().is_empty() {
            return Err(TagError::EmptyTagKey);
        }
        self.encoded_tags.push(format!("{key}:{value}"));
        Ok(self)
    }

    /// Appends an already-encoded tag, either bare or `key:value`.
    ///
    /// # Errors
    ///
    /// Returns [`TagError::EmptyTagKey`] if the tag is empty or whitespace-only.
    pub fn encoded_tag(mut self, tag: &str) -> Result<Self, TagError> {
        if tag.trim().is_empty() {
            return Err(TagError::EmptyTagKey);
        }
        self.encoded_tags.push(tag.to_string());
        Ok(self)
    }

    /// Builds the [`TaggedName`].
    ///
    /// # Errors
    ///
    /// Returns [`TagError::EmptyMetricName`] if the base name was never set, or is
    /// empty/whitespace-only.
    pub fn build(self) -> Result<TaggedName, TagError> {
        let metric_name =
            self.metric_name.filter(|name| !name.trim().is_empty()).ok_or(TagError::EmptyMetricName)?;

        Ok(TaggedName { metric_name, encoded_tags: self.encoded_tags })
    }
}

// Valued tags collide by key, bare tags only with an identical bare tag.
#[derive(Debug, Hash, PartialEq, Eq)]
enum TagKey<'a> {
    Bare(&'a str),
    Keyed(&'a str),
}

fn tag_key(tag: &str) -> TagKey<'_> {
    match tag.split_once(':') {
        Some((key, _)) => TagKey::Keyed(key),
        None => TagKey::Bare(tag),
    }
}

/// Merges two tag lists key-wise, with the second list winning on key collision.
///
/// The output is deduplicated by key and deterministic: the first list's keys keep their
/// first-seen position, then the second list's new keys follow in order.
pub fn merge_tags(first: &[String], second: &[String]) -> Vec<String> {
    let mut merged: IndexMap<TagKey<'_>, &str> = IndexMap::with_capacity(first.len() + second.len());
    for tag in first.iter().chain(second.iter()) {
        merged.insert(tag_key(tag), tag.as_str());
    }
    merged.into_values().map(str::to_string).collect()
}
