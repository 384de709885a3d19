//! Local resource URIs
//!
//! Only `file://` URIs and plain paths are supported. The `StartTime` and
//! `EndTime` query items (microseconds) restrict a resource to a time range.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::DataError;

const FILE_SCHEME: &str = "file://";

/// A parsed local resource location
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUri {
    path: PathBuf,
    start_time: Option<i64>,
    end_time: Option<i64>,
}

impl ResourceUri {
    pub fn parse(uri: &str) -> Result<Self, DataError> {
        let invalid = |reason: &str| DataError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let (location, query) = match uri.split_once('?') {
            Some((location, query)) => (location, query),
            None => (uri, ""),
        };

        let path = match location.strip_prefix(FILE_SCHEME) {
            Some(path) => path,
            None if location.contains("://") => return Err(invalid("unsupported scheme")),
            None => location,
        };
        if path.is_empty() {
            return Err(invalid("empty path"));
        }

        let mut result = Self {
            path: PathBuf::from(path),
            start_time: None,
            end_time: None,
        };

        for item in query.split('&').filter(|item| !item.is_empty()) {
            let (key, value) = item.split_once('=').unwrap_or((item, ""));
            let slot = match key {
                "StartTime" => &mut result.start_time,
                "EndTime" => &mut result.end_time,
                _ => continue,
            };
            let parsed: f64 = value
                .parse()
                .map_err(|_| invalid(&format!("bad value for {}", key)))?;
            *slot = Some(parsed.round() as i64);
        }

        Ok(result)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start_time(&self) -> Option<i64> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<i64> {
        self.end_time
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", FILE_SCHEME, self.path.display())?;
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => write!(f, "?StartTime={}&EndTime={}", start, end),
            (Some(start), None) => write!(f, "?StartTime={}", start),
            (None, Some(end)) => write!(f, "?EndTime={}", end),
            (None, None) => Ok(()),
        }
    }
}

/// Append `StartTime`/`EndTime` query items to `base`
pub fn with_time_range(base: &str, start_time: i64, end_time: i64) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{}{}StartTime={}&EndTime={}",
        base, separator, start_time, end_time
    )
}
