use axum::Json;
use serde::{Deserialize, Serialize};

/// Success envelope used by every admin and public endpoint.
#[derive(Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Serialize)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
        pagination: None,
    })
}

pub fn paginated<T: Serialize>(data: T, pagination: Pagination) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
        pagination: Some(pagination),
    })
}

const DEFAULT_PER_PAGE: i64 = 25;
const MAX_PER_PAGE: i64 = 100;

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.per_page()
    }
}

#[cfg(test)]
mod tests {
    use super::PageQuery;

    #[test]
    fn clamps_out_of_range_paging() {
        let query = PageQuery {
            page: Some(0),
            per_page: Some(10_000),
        };
        assert_eq!(query.page(), 1);
        assert_eq!(query.per_page(), 100);
        assert_eq!(query.offset(), 0);
    }

    #[test]
    fn computes_offset_from_page() {
        let query = PageQuery {
            page: Some(3),
            per_page: Some(20),
        };
        assert_eq!(query.offset(), 40);
    }
}
