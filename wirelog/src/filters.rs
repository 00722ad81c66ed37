//! Filters applied to the captured copy of an exchange before it is logged.
//!
//! They never touch what goes over the wire; they exist to keep credentials
//! and volatile values out of transaction logs.

use crate::record::RecordDraft;
use regex::Regex;
use std::{collections::BTreeMap, fmt::Debug};

pub const MASK: &str = "******";

pub trait BodyFilter: Debug {
    fn filter(&self, body: &mut String);
}

pub trait HeadersFilter: Debug {
    fn filter(&self, headers: &mut BTreeMap<String, String>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

#[derive(Debug)]
enum FilterKind {
    Body(Box<dyn BodyFilter + Send + Sync>),
    Headers(Box<dyn HeadersFilter + Send + Sync>),
}

#[derive(Debug)]
pub struct LogFilter {
    direction: Direction,
    kind: FilterKind,
}

impl LogFilter {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Applies the filter to the side of `draft` it was built for.
    pub fn apply(&self, draft: &mut RecordDraft) {
        let (headers, body) = match self.direction {
            Direction::Request => (&mut draft.http.request_headers, &mut draft.request_body),
            Direction::Response => (&mut draft.http.response_headers, &mut draft.response_body),
        };

        match &self.kind {
            FilterKind::Headers(hf) => hf.filter(headers),
            FilterKind::Body(bf) => {
                if let Some(body) = body {
                    bf.filter(body);
                }
            }
        }
    }
}

#[derive(Debug)]
struct RemoveHeaders {
    headers: Vec<String>,
}

impl HeadersFilter for RemoveHeaders {
    fn filter(&self, headers: &mut BTreeMap<String, String>) {
        headers.retain(|name, _| {
            !self
                .headers
                .iter()
                .any(|removed| removed.eq_ignore_ascii_case(name))
        });
    }
}

#[derive(Debug)]
struct RemoveHeadersRegex {
    patterns: Vec<Regex>,
}

impl HeadersFilter for RemoveHeadersRegex {
    fn filter(&self, headers: &mut BTreeMap<String, String>) {
        headers.retain(|name, _| !self.patterns.iter().any(|p| p.is_match(name)));
    }
}

#[derive(Debug)]
struct MaskHeader {
    header: String,
}

impl HeadersFilter for MaskHeader {
    fn filter(&self, headers: &mut BTreeMap<String, String>) {
        for (name, value) in headers.iter_mut() {
            if name.eq_ignore_ascii_case(&self.header) {
                *value = String::from(MASK);
            }
        }
    }
}

#[derive(Debug)]
struct BodyReplace {
    text: String,
    substitution: String,
}

impl BodyFilter for BodyReplace {
    fn filter(&self, body: &mut String) {
        *body = body.replace(&self.text, &self.substitution);
    }
}

#[derive(Debug)]
struct BodyReplaceRegex {
    pattern: Regex,
    substitution: String,
}

impl BodyFilter for BodyReplaceRegex {
    fn filter(&self, body: &mut String) {
        *body = self
            .pattern
            .replace_all(body, self.substitution.as_str())
            .into();
    }
}

/// Collects filters for one direction.
///
/// ```ignore
/// config.add_request_filters(|f| f.mask_header("Authorization").remove_headers(["Cookie"]));
/// ```
pub struct LogFiltersBuilder {
    direction: Direction,
    filters: Vec<FilterKind>,
}

impl LogFiltersBuilder {
    pub(crate) fn new(direction: Direction) -> Self {
        Self {
            direction,
            filters: Vec::new(),
        }
    }

    pub fn remove_headers<S: Into<String>, I: IntoIterator<Item = S>>(
        &mut self,
        headers: I,
    ) -> &mut Self {
        self.add_headers_filter(RemoveHeaders {
            headers: headers.into_iter().map(Into::into).collect(),
        })
    }

    pub fn remove_headers_regex<I: IntoIterator<Item = Regex>>(&mut self, patterns: I) -> &mut Self {
        self.add_headers_filter(RemoveHeadersRegex {
            patterns: patterns.into_iter().collect(),
        })
    }

    pub fn mask_header<S: Into<String>>(&mut self, header: S) -> &mut Self {
        self.add_headers_filter(MaskHeader {
            header: header.into(),
        })
    }

    pub fn body_replace<S1: Into<String>, S2: Into<String>>(
        &mut self,
        text: S1,
        substitution: S2,
    ) -> &mut Self {
        self.add_body_filter(BodyReplace {
            text: text.into(),
            substitution: substitution.into(),
        })
    }

    pub fn body_replace_regex<S: Into<String>>(
        &mut self,
        pattern: Regex,
        substitution: S,
    ) -> &mut Self {
        self.add_body_filter(BodyReplaceRegex {
            pattern,
            substitution: substitution.into(),
        })
    }

    pub fn add_headers_filter<HF: HeadersFilter + Send + Sync + 'static>(
        &mut self,
        filter: HF,
    ) -> &mut Self {
        self.filters.push(FilterKind::Headers(Box::new(filter)));
        self
    }

    pub fn add_body_filter<BF: BodyFilter + Send + Sync + 'static>(&mut self, filter: BF) -> &mut Self {
        self.filters.push(FilterKind::Body(Box::new(filter)));
        self
    }

    pub fn build(self) -> Vec<LogFilter> {
        let direction = self.direction;
        self.filters
            .into_iter()
            .map(|kind| LogFilter { direction, kind })
            .collect()
    }
}
