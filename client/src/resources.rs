//! Typed REST resources.
//!
//! Every platform resource follows the same CRUD layout under `/v1`. A
//! [`Resource`] names it once; [`ListParams`] carries the list filters and
//! turns them into both query-string pairs and a cache key, so two list views
//! with different filters never share a cache entry.

use lms_core::{QueryKey, RecordId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::client::ApiClient;
use crate::error::Result;
use crate::request::ApiRequest;

/// A REST collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resource {
    /// Cache-key name
    pub name: &'static str,
    /// Collection path
    pub path: &'static str,
}

/// `/v1/users`
pub const USERS: Resource = Resource::new("users", "/v1/users");
/// `/v1/classes`
pub const CLASSES: Resource = Resource::new("classes", "/v1/classes");
/// `/v1/tugas`
pub const ASSIGNMENTS: Resource = Resource::new("assignments", "/v1/tugas");
/// `/v1/exams`
pub const EXAMS: Resource = Resource::new("exams", "/v1/exams");
/// `/v1/quizzes`
pub const QUIZZES: Resource = Resource::new("quizzes", "/v1/quizzes");
/// `/v1/badges`
pub const BADGES: Resource = Resource::new("badges", "/v1/badges");
/// `/v1/parent-reports`
pub const PARENT_REPORTS: Resource = Resource::new("parent-reports", "/v1/parent-reports");

impl Resource {
    /// Declare a resource.
    #[must_use]
    pub const fn new(name: &'static str, path: &'static str) -> Self {
        Self { name, path }
    }

    /// Path of one record.
    #[must_use]
    pub fn item_path(&self, id: &RecordId) -> String {
        format!("{}/{id}", self.path)
    }

    /// Prefix key matching every cached query of this resource.
    #[must_use]
    pub fn key(&self) -> QueryKey {
        QueryKey::new(self.name)
    }

    /// Key of one list view: `(name, "list", params)`.
    #[must_use]
    pub fn list_key(&self, params: &ListParams) -> QueryKey {
        self.key().with("list").with(params.key_param())
    }

    /// Key of one record: `(name, "detail", id)`.
    #[must_use]
    pub fn detail_key(&self, id: &RecordId) -> QueryKey {
        let id = match id {
            RecordId::Int(n) => Value::from(*n),
            RecordId::Str(s) => Value::from(s.as_str()),
        };
        self.key().with("detail").with(id)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

impl SortOrder {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// List filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    /// 1-based page
    pub page: Option<u32>,
    /// Page size
    pub limit: Option<u32>,
    /// Free-text search
    pub search: Option<String>,
    /// Sort field
    pub sort_by: Option<String>,
    /// Sort direction
    pub order: Option<SortOrder>,
    /// Resource-specific filters (e.g. `classId`)
    pub filters: BTreeMap<String, String>,
}

impl ListParams {
    /// No filters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Page number.
    #[must_use]
    pub const fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Page size.
    #[must_use]
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Search text; blank text clears the search.
    #[must_use]
    pub fn search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        self.search = (!search.trim().is_empty()).then_some(search);
        self
    }

    /// Sort field and direction.
    #[must_use]
    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = Some(field.into());
        self.order = Some(order);
        self
    }

    /// Extra filter.
    #[must_use]
    pub fn filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }

    /// Query-string pairs, in a stable order.
    #[must_use]
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(page) = self.page {
            pairs.push(("page".to_string(), page.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(search) = &self.search {
            pairs.push(("search".to_string(), search.clone()));
        }
        if let Some(sort_by) = &self.sort_by {
            pairs.push(("sortBy".to_string(), sort_by.clone()));
        }
        if let Some(order) = self.order {
            pairs.push(("order".to_string(), order.as_str().to_string()));
        }
        pairs.extend(self.filters.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }

    fn key_param(&self) -> Value {
        let map: Map<String, Value> = self
            .to_query()
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        Value::Object(map)
    }
}

/// Pagination block of a list response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Current page
    #[serde(default)]
    pub page: u32,
    /// Page size
    #[serde(default)]
    pub limit: u32,
    /// Total records
    #[serde(default)]
    pub total: u64,
    /// Total pages
    #[serde(default)]
    pub total_pages: u32,
}

/// One page of a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Records on this page
    pub data: Vec<T>,
    /// Pagination block (absent on unpaginated routes)
    #[serde(default)]
    pub pagination: Pagination,
}

impl<T> Page<T> {
    /// Whether a later page exists.
    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.pagination.page < self.pagination.total_pages
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            pagination: Pagination::default(),
        }
    }
}

impl ApiClient {
    /// `GET {resource}` with list filters.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`]; also [`crate::ClientError::Decode`].
    pub async fn list<T: DeserializeOwned>(
        &self,
        resource: Resource,
        params: &ListParams,
    ) -> Result<Page<T>> {
        let request = ApiRequest::get(resource.path).query(params.to_query());
        self.send(request).await?.json()
    }

    /// `GET {resource}/{id}`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`]; also [`crate::ClientError::Decode`].
    pub async fn fetch<T: DeserializeOwned>(&self, resource: Resource, id: &RecordId) -> Result<T> {
        self.get_json(&resource.item_path(id)).await
    }

    /// `POST {resource}`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`]; also [`crate::ClientError::Decode`].
    pub async fn create<B, T>(&self, resource: Resource, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.post_json(resource.path, body).await
    }

    /// `PUT {resource}/{id}`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`]; also [`crate::ClientError::Decode`].
    pub async fn update<B, T>(&self, resource: Resource, id: &RecordId, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.put_json(&resource.item_path(id), body).await
    }

    /// `DELETE {resource}/{id}`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn remove(&self, resource: Resource, id: &RecordId) -> Result<()> {
        self.delete(&resource.item_path(id)).await
    }
}
