//! Pagination.

use super::ValidationError;

/// Page size used when the caller gives none.
pub const DEFAULT_LIMIT: i64 = 100;

/// Largest page a caller may request unless configured otherwise.
pub const DEFAULT_MAX_LIMIT: usize = 10_000;

/// Raw pagination input, as received from a caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Return every match; limit and offset are ignored.
    pub all_data: bool,
}

impl PageRequest {
    /// Validate against `max_limit` and resolve defaults.
    ///
    /// Limit and offset are checked even when `all_data` is set, so a bad
    /// value is reported instead of silently dropped.
    pub fn resolve(&self, max_limit: usize) -> Result<Page, ValidationError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if limit < 1 || limit as u64 > max_limit as u64 {
            return Err(ValidationError::LimitOutOfRange {
                limit,
                max: max_limit,
            });
        }
        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(ValidationError::NegativeOffset(offset));
        }

        if self.all_data {
            return Ok(Page::ALL);
        }
        Ok(Page {
            limit: Some(limit as usize),
            offset: offset as usize,
        })
    }
}

/// A resolved window over an ordered result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// `None` means unbounded.
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Page {
    pub const ALL: Page = Page {
        limit: None,
        offset: 0,
    };

    /// Slice `[offset, offset + limit)` out of `items`.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let rest = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => rest.take(limit).collect(),
            None => rest.collect(),
        }
    }

    /// 1-based inclusive row-number bounds for windowed SQL.
    ///
    /// Saturates at `i64::MAX`; no table holds that many rows.
    pub fn row_bounds(&self) -> (i64, Option<i64>) {
        let offset = i64::try_from(self.offset).unwrap_or(i64::MAX);
        let first = offset.saturating_add(1);
        let last = self.limit.map(|limit| {
            offset.saturating_add(i64::try_from(limit).unwrap_or(i64::MAX))
        });
        (first, last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let page = PageRequest::default().resolve(DEFAULT_MAX_LIMIT).unwrap();
        assert_eq!(
            page,
            Page {
                limit: Some(100),
                offset: 0
            }
        );
    }

    #[test]
    fn test_limit_boundaries() {
        let at_max = PageRequest {
            limit: Some(10_000),
            ..Default::default()
        };
        assert!(at_max.resolve(DEFAULT_MAX_LIMIT).is_ok());

        for limit in [0, -1, 10_001] {
            let request = PageRequest {
                limit: Some(limit),
                ..Default::default()
            };
            assert_eq!(
                request.resolve(DEFAULT_MAX_LIMIT),
                Err(ValidationError::LimitOutOfRange {
                    limit,
                    max: DEFAULT_MAX_LIMIT
                })
            );
        }
    }

    #[test]
    fn test_negative_offset_rejected() {
        let request = PageRequest {
            offset: Some(-3),
            ..Default::default()
        };
        assert_eq!(
            request.resolve(DEFAULT_MAX_LIMIT),
            Err(ValidationError::NegativeOffset(-3))
        );
    }

    #[test]
    fn test_row_bounds_saturate_at_max_offset() {
        let page = PageRequest {
            limit: Some(100),
            offset: Some(i64::MAX),
            all_data: false,
        }
        .resolve(DEFAULT_MAX_LIMIT)
        .unwrap();
        assert_eq!(page.row_bounds(), (i64::MAX, Some(i64::MAX)));
        assert!(page.apply(vec![1, 2, 3]).is_empty());

        let page = Page {
            limit: Some(10),
            offset: 20,
        };
        assert_eq!(page.row_bounds(), (21, Some(30)));
    }

    #[test]
    fn test_all_data_ignores_window() {
        let request = PageRequest {
            limit: Some(5),
            offset: Some(7),
            all_data: true,
        };
        let page = request.resolve(DEFAULT_MAX_LIMIT).unwrap();
        assert_eq!(page, Page::ALL);
        assert_eq!(page.apply((0..20).collect::<Vec<_>>()).len(), 20);
    }

    #[test]
    fn test_pages_concatenate_to_full_set() {
        let items: Vec<u32> = (0..23).collect();
        let mut collected = Vec::new();
        let mut offset = 0;
        loop {
            let page = Page {
                limit: Some(5),
                offset,
            };
            let chunk = page.apply(items.clone());
            assert!(chunk.len() <= 5);
            if chunk.is_empty() {
                break;
            }
            collected.extend(chunk);
            offset += 5;
        }
        assert_eq!(collected, items);
    }

    #[test]
    fn test_row_bounds() {
        let page = Page {
            limit: Some(10),
            offset: 20,
        };
        assert_eq!(page.row_bounds(), (21, Some(30)));
        assert_eq!(Page::ALL.row_bounds(), (1, None));
    }
}
