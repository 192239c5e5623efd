/* Schema model: the data-format descriptors drivers and consumers share.
 *
 * A schema file is a YAML list of entries, each describing one data id:
 *
 *   - id: 0x100
 *     name: engine_rpm
 *     fmt:
 *       - name: rpm
 *         unit: rpm
 *         type: float
 *
 * Schemas are parsed once at driver registration and retained in memory;
 * consumers use the format list to decode record payloads. */

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::record::DataId;

/// Field value type. `Bytes` is the only variable-size type; its size
/// comes from the schema (0 marks a variable-length trailing field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FmtType {
    Float,
    Double,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Bool,
    Bytes,
}

impl FmtType {
    /// Wire size in bytes; `None` for `Bytes`.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            FmtType::Float => Some(4),
            FmtType::Double => Some(8),
            FmtType::Int8 | FmtType::Uint8 | FmtType::Bool => Some(1),
            FmtType::Int16 | FmtType::Uint16 => Some(2),
            FmtType::Int32 | FmtType::Uint32 => Some(4),
            FmtType::Int64 | FmtType::Uint64 => Some(8),
            FmtType::Bytes => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    #[default]
    None,
    Degree,
    Radian,
    Meter,
    MetersPerSecond,
    MetersPerSecondSquared,
    RadiansPerSecond,
    Kelvin,
    Celsius,
    Pascal,
    Percent,
    Second,
    Nanosecond,
    Rpm,
}

/// One decoded field extracted from a record payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f32),
    Double(f64),
    Int(i64),
    Uint(u64),
    Bool(bool),
    Bytes(Vec<u8>),
}

/// A resolved field: offset computed, size pinned down.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFmt {
    pub name: String,
    pub unit: Unit,
    pub ty: FmtType,
    pub offset: usize,
    /* 0 only for a variable-length trailing `bytes` field. */
    pub size: usize,
}

impl FieldFmt {
    /// Decode this field from a record payload. Little-endian, matching
    /// the built-in drivers' encoders. Returns `None` when the payload is
    /// too short.
    pub fn decode(&self, data: &[u8]) -> Option<FieldValue> {
        let end = if self.size == 0 {
            data.len()
        } else {
            self.offset + self.size
        };
        let raw = data.get(self.offset..end)?;
        let value = match self.ty {
            FmtType::Float => FieldValue::Float(f32::from_le_bytes(raw.try_into().ok()?)),
            FmtType::Double => FieldValue::Double(f64::from_le_bytes(raw.try_into().ok()?)),
            FmtType::Int8 => FieldValue::Int(i64::from(raw[0] as i8)),
            FmtType::Int16 => FieldValue::Int(i64::from(i16::from_le_bytes(raw.try_into().ok()?))),
            FmtType::Int32 => FieldValue::Int(i64::from(i32::from_le_bytes(raw.try_into().ok()?))),
            FmtType::Int64 => FieldValue::Int(i64::from_le_bytes(raw.try_into().ok()?)),
            FmtType::Uint8 => FieldValue::Uint(u64::from(raw[0])),
            FmtType::Uint16 => {
                FieldValue::Uint(u64::from(u16::from_le_bytes(raw.try_into().ok()?)))
            }
            FmtType::Uint32 => {
                FieldValue::Uint(u64::from(u32::from_le_bytes(raw.try_into().ok()?)))
            }
            FmtType::Uint64 => FieldValue::Uint(u64::from_le_bytes(raw.try_into().ok()?)),
            FmtType::Bool => FieldValue::Bool(raw[0] != 0),
            FmtType::Bytes => FieldValue::Bytes(raw.to_vec()),
        };
        Some(value)
    }
}

/// One schema entry: a data id plus its payload layout.
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub id: DataId,
    pub name: String,
    pub fmt: Vec<FieldFmt>,
    /// Total fixed payload size; a trailing variable field contributes 0.
    pub size: usize,
}

/* Raw YAML shapes. */

#[derive(Debug, Deserialize)]
struct RawField {
    name: String,
    #[serde(default)]
    unit: Unit,
    #[serde(rename = "type")]
    ty: FmtType,
    #[serde(default)]
    size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    id: u32,
    name: String,
    #[serde(default)]
    fmt: Vec<RawField>,
}

/// Parse a schema document (a YAML list of entries).
pub fn parse_schema(text: &str) -> Result<Vec<SchemaEntry>> {
    let raw: Vec<RawEntry> = serde_yaml::from_str(text)?;
    raw.into_iter().map(resolve_entry).collect()
}

/// Load `base/file` and parse it.
pub fn load_schema(base: &Path, file: &str) -> Result<Vec<SchemaEntry>> {
    let path = base.join(file);
    let text = fs::read_to_string(&path)?;
    parse_schema(&text)
}

/* Compute field offsets and pin down sizes for one entry. */
fn resolve_entry(raw: RawEntry) -> Result<SchemaEntry> {
    let mut fmt = Vec::with_capacity(raw.fmt.len());
    let mut offset = 0usize;
    let count = raw.fmt.len();

    for (idx, field) in raw.fmt.into_iter().enumerate() {
        let size = match (field.ty.fixed_size(), field.size) {
            (Some(fixed), None) => fixed,
            (Some(fixed), Some(given)) if given == fixed => fixed,
            (Some(fixed), Some(given)) => {
                return Err(Error::InvalidVal(format!(
                    "field '{}' of '{}': size {} does not match type size {}",
                    field.name, raw.name, given, fixed
                )));
            }
            (None, Some(given)) => given,
            (None, None) => {
                return Err(Error::InvalidVal(format!(
                    "field '{}' of '{}': bytes fields need an explicit size",
                    field.name, raw.name
                )));
            }
        };
        /* A variable-length field (size 0) consumes the rest of the
         * payload, so it must come last. */
        if size == 0 && idx + 1 != count {
            return Err(Error::InvalidVal(format!(
                "field '{}' of '{}': variable-size field must be the last one",
                field.name, raw.name
            )));
        }
        fmt.push(FieldFmt {
            name: field.name,
            unit: field.unit,
            ty: field.ty,
            offset,
            size,
        });
        offset += size;
    }

    Ok(SchemaEntry {
        id: DataId(raw.id),
        name: raw.name,
        fmt,
        size: offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
- id: 0x100
  name: engine_rpm
  fmt:
    - name: rpm
      unit: rpm
      type: float
- id: 0x101
  name: imu_sample
  fmt:
    - name: x
      unit: meters_per_second_squared
      type: int16
    - name: y
      unit: meters_per_second_squared
      type: int16
    - name: z
      unit: meters_per_second_squared
      type: int16
"#;

    #[test]
    fn test_parse_schema() {
        let entries = parse_schema(SCHEMA).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, DataId(0x100));
        assert_eq!(entries[0].name, "engine_rpm");
        assert_eq!(entries[0].size, 4);
        assert_eq!(entries[1].size, 6);
    }

    #[test]
    fn test_offsets_are_cumulative() {
        let entries = parse_schema(SCHEMA).unwrap();
        let offsets: Vec<usize> = entries[1].fmt.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 2, 4]);
    }

    #[test]
    fn test_bytes_needs_size() {
        let err = parse_schema("- id: 1\n  name: blob\n  fmt:\n    - name: b\n      type: bytes\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_variable_field_must_be_last() {
        let doc = "\
- id: 1
  name: blob
  fmt:
    - name: b
      type: bytes
      size: 0
    - name: tail
      type: uint8
";
        assert!(parse_schema(doc).is_err());
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let doc = "- id: 1\n  name: x\n  fmt:\n    - name: v\n      type: uint32\n      size: 2\n";
        assert!(parse_schema(doc).is_err());
    }

    #[test]
    fn test_decode_fields() {
        let entries = parse_schema(SCHEMA).unwrap();
        let data = 1250.5f32.to_le_bytes();
        match entries[0].fmt[0].decode(&data) {
            Some(FieldValue::Float(v)) => assert!((v - 1250.5).abs() < f32::EPSILON),
            other => panic!("unexpected decode result: {other:?}"),
        }

        let sample: Vec<u8> = [100i16, -200, 300]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        assert_eq!(
            entries[1].fmt[1].decode(&sample),
            Some(FieldValue::Int(-200))
        );
    }

    #[test]
    fn test_decode_short_payload() {
        let entries = parse_schema(SCHEMA).unwrap();
        assert_eq!(entries[0].fmt[0].decode(&[0u8; 2]), None);
    }
}
