//! Search queries

use std::collections::BTreeMap;

/// A query parameter paginated by incrementing a numeric value
///
/// `start` and `end` are inclusive and zero-padded to the same width, e.g.
/// `"001"`..`"010"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeField {
    pub name: String,
    pub start: String,
    pub end: String,
}

/// User search parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub keywords: String,
    /// Global category names; empty means all categories
    pub categories: Vec<String>,
    /// Series title the results must match
    pub series: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Maximum number of results to return
    pub limit: Option<usize>,
    pub ranges: Vec<RangeField>,
    /// Additional named values exposed to templates as `.Query.<name>`
    pub fields: BTreeMap<String, String>,
}

impl Query {
    pub fn new(keywords: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into(),
            ..Default::default()
        }
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_series(mut self, series: impl Into<String>) -> Self {
        self.series = Some(series.into());
        self
    }

    pub fn with_episode(mut self, season: u32, episode: Option<u32>) -> Self {
        self.season = Some(season);
        self.episode = episode;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_range(
        mut self,
        name: impl Into<String>,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        self.ranges.push(RangeField {
            name: name.into(),
            start: start.into(),
            end: end.into(),
        });
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn is_series(&self) -> bool {
        self.series.is_some()
    }

    /// Keywords as sent to a site, with an `S01E02` style suffix for episode queries
    pub fn search_keywords(&self) -> String {
        let mut keywords = match &self.series {
            Some(series) if self.keywords.is_empty() => series.clone(),
            _ => self.keywords.clone(),
        };
        if let Some(season) = self.season {
            let suffix = match self.episode {
                Some(episode) => format!("S{:02}E{:02}", season, episode),
                None => format!("S{:02}", season),
            };
            if !keywords.is_empty() {
                keywords.push(' ');
            }
            keywords.push_str(&suffix);
        }
        keywords
    }

    /// True once `count` results satisfy the limit
    pub fn limit_reached(&self, count: usize) -> bool {
        self.limit.is_some_and(|limit| count >= limit)
    }
}
