//! Secondary-index query filters

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

/// Which part of a bin an index covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    /// The bin's scalar value
    #[default]
    Default,
    /// Elements of a list bin
    List,
    /// Keys of a map bin
    MapKeys,
    /// Values of a map bin
    MapValues,
}

impl IndexType {
    /// Wire value of the index-type field.
    pub fn as_u8(self) -> u8 {
        match self {
            IndexType::Default => 0,
            IndexType::List => 1,
            IndexType::MapKeys => 2,
            IndexType::MapValues => 3,
        }
    }

    /// Parse a wire value.
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => IndexType::Default,
            1 => IndexType::List,
            2 => IndexType::MapKeys,
            3 => IndexType::MapValues,
            _ => return None,
        })
    }

    /// Name used by the `sindex-create` info command.
    pub fn info_name(self) -> &'static str {
        match self {
            IndexType::Default => "DEFAULT",
            IndexType::List => "LIST",
            IndexType::MapKeys => "MAPKEYS",
            IndexType::MapValues => "MAPVALUES",
        }
    }

    /// Parse an info name.
    pub fn from_info_name(name: &str) -> Option<Self> {
        Some(match name {
            "DEFAULT" => IndexType::Default,
            "LIST" => IndexType::List,
            "MAPKEYS" => IndexType::MapKeys,
            "MAPVALUES" => IndexType::MapValues,
            _ => return None,
        })
    }
}

/// Type of the indexed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexDataType {
    /// Strings
    String,
    /// Integers
    Numeric,
    /// GeoJSON
    Geo2dSphere,
}

impl IndexDataType {
    /// Name used by the `sindex-create` info command.
    pub fn info_name(self) -> &'static str {
        match self {
            IndexDataType::String => "STRING",
            IndexDataType::Numeric => "NUMERIC",
            IndexDataType::Geo2dSphere => "GEO2DSPHERE",
        }
    }

    /// Parse an info name.
    pub fn from_info_name(name: &str) -> Option<Self> {
        Some(match name {
            "STRING" => IndexDataType::String,
            "NUMERIC" => IndexDataType::Numeric,
            "GEO2DSPHERE" => IndexDataType::Geo2dSphere,
            _ => return None,
        })
    }
}

/// Filter predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Exact match on a string or integer
    Equal(Value),
    /// Inclusive integer range
    Range {
        /// Lower bound
        begin: i64,
        /// Upper bound
        end: i64,
    },
    /// Points/regions inside the given region
    GeoWithin(String),
    /// Regions containing the given point/region
    GeoContains(String),
}

/// Secondary-index filter of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Indexed bin
    pub bin: String,
    /// Which part of the bin is indexed
    pub index_type: IndexType,
    /// Predicate
    pub predicate: Predicate,
}

impl Filter {
    /// Records whose bin equals `value` (string or integer).
    #[track_caller]
    pub fn equal(bin: &str, value: impl Into<Value>) -> Result<Self> {
        Filter::contains(bin, value, IndexType::Default)
    }

    /// Records whose collection bin holds `value`.
    #[track_caller]
    pub fn contains(bin: &str, value: impl Into<Value>, index_type: IndexType) -> Result<Self> {
        let value = value.into();
        if !matches!(value, Value::Int(_) | Value::String(_)) {
            return Err(Error::parameter(format!(
                "filter value must be a string or integer, got {}",
                value.type_name()
            )));
        }
        Ok(Filter {
            bin: bin.to_string(),
            index_type,
            predicate: Predicate::Equal(value),
        })
    }

    /// Records whose integer bin lies in `[begin, end]`.
    pub fn range(bin: &str, begin: i64, end: i64) -> Self {
        Filter::range_in(bin, begin, end, IndexType::Default)
    }

    /// Range over a collection index.
    pub fn range_in(bin: &str, begin: i64, end: i64, index_type: IndexType) -> Self {
        Filter {
            bin: bin.to_string(),
            index_type,
            predicate: Predicate::Range { begin, end },
        }
    }

    /// Geo points or regions within a GeoJSON region.
    pub fn geo_within_region(bin: &str, region: &str) -> Self {
        Filter {
            bin: bin.to_string(),
            index_type: IndexType::Default,
            predicate: Predicate::GeoWithin(region.to_string()),
        }
    }

    /// Geo points within `radius` meters of `(lng, lat)`.
    pub fn geo_within_radius(bin: &str, lng: f64, lat: f64, radius: f64) -> Self {
        let circle = serde_json::json!({
            "type": "AeroCircle",
            "coordinates": [[lng, lat], radius],
        });
        Filter::geo_within_region(bin, &circle.to_string())
    }

    /// Regions containing a GeoJSON region.
    pub fn geo_contains_region(bin: &str, region: &str) -> Self {
        Filter {
            bin: bin.to_string(),
            index_type: IndexType::Default,
            predicate: Predicate::GeoContains(region.to_string()),
        }
    }

    /// Regions containing the point `(lng, lat)`.
    pub fn geo_contains_point(bin: &str, lng: f64, lat: f64) -> Self {
        let point = serde_json::json!({
            "type": "Point",
            "coordinates": [lng, lat],
        });
        Filter::geo_contains_region(bin, &point.to_string())
    }

    /// Data type the backing index must have.
    pub fn data_type(&self) -> IndexDataType {
        match &self.predicate {
            Predicate::Equal(Value::String(_)) => IndexDataType::String,
            Predicate::Equal(_) | Predicate::Range { .. } => IndexDataType::Numeric,
            Predicate::GeoWithin(_) | Predicate::GeoContains(_) => IndexDataType::Geo2dSphere,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_accepts_only_string_or_int() {
        assert!(Filter::equal("a", 1).is_ok());
        assert!(Filter::equal("a", "x").is_ok());
        assert!(Filter::equal("a", 1.5).is_err());
    }

    #[test]
    fn test_data_types() {
        assert_eq!(Filter::equal("a", "x").unwrap().data_type(), IndexDataType::String);
        assert_eq!(Filter::range("a", 1, 2).data_type(), IndexDataType::Numeric);
        assert_eq!(
            Filter::geo_contains_point("loc", 1.0, 2.0).data_type(),
            IndexDataType::Geo2dSphere
        );
    }

    #[test]
    fn test_radius_builds_aero_circle() {
        let f = Filter::geo_within_radius("loc", -122.0, 37.5, 1000.0);
        match f.predicate {
            Predicate::GeoWithin(region) => {
                let v: serde_json::Value = serde_json::from_str(&region).unwrap();
                assert_eq!(v["type"], "AeroCircle");
                assert_eq!(v["coordinates"][1], 1000.0);
            }
            other => panic!("unexpected predicate {:?}", other),
        }
    }

    #[test]
    fn test_info_names_round_trip() {
        for t in [IndexType::Default, IndexType::List, IndexType::MapKeys, IndexType::MapValues] {
            assert_eq!(IndexType::from_info_name(t.info_name()), Some(t));
            assert_eq!(IndexType::from_u8(t.as_u8()), Some(t));
        }
        assert_eq!(
            IndexDataType::from_info_name("NUMERIC"),
            Some(IndexDataType::Numeric)
        );
    }
}
